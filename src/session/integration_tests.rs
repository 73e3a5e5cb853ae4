//! Scenario tests for the preview/commit cycle against the in-memory service

#[cfg(test)]
mod tests {
    use crate::fetch::CohortFetcher;
    use crate::filter::{AttributeConstraint, AttributeRef, MaterializationEngine};
    use crate::graph::{
        ConstraintValues, DataSource, ElementId, EqualsValue, LineageStore, NumRange, Row, TaskKind,
    };
    use crate::service::{Dataset, InMemoryCohortService};
    use crate::session::{
        ApplyRequest, ApplyStatus, CollectingSink, ControllerConfig, Dispatched, FilterBin,
        Intent, LineageEvent, OutputSlot, PreviewController, SessionError, SessionState,
    };
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// 500 patients: every fifth has no sex recorded, the rest alternate Male/Female
    fn patients(n: usize) -> Vec<Row> {
        (0..n)
            .filter_map(|i| {
                let mut v = json!({ "id": format!("p{}", i), "age": 20 + (i % 60) });
                if i % 5 != 4 {
                    v["sex"] = json!(if i % 2 == 0 { "Male" } else { "Female" });
                }
                v.as_object().cloned()
            })
            .collect()
    }

    struct Fixture {
        svc: Arc<InMemoryCohortService>,
        sink: Arc<CollectingSink>,
        controller: PreviewController,
        root: ElementId,
    }

    async fn fixture_with(config: ControllerConfig) -> Fixture {
        let svc = Arc::new(InMemoryCohortService::new(Dataset::new(patients(500))));
        let sink = Arc::new(CollectingSink::new());
        let mut controller = PreviewController::new(
            Arc::new(Mutex::new(LineageStore::new())),
            MaterializationEngine::new(svc.clone()),
            CohortFetcher::new(svc.clone()),
            sink.clone(),
            config,
        );
        let root = controller
            .select_dataset("All Patients", "", DataSource::default())
            .await
            .unwrap();
        sink.take();
        Fixture {
            svc,
            sink,
            controller,
            root,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(ControllerConfig::default()).await
    }

    fn sex(value: &str) -> AttributeConstraint {
        AttributeConstraint::new(
            AttributeRef::column("sex", "Sex", false),
            ConstraintValues::Equals(vec![EqualsValue::is(value)]),
        )
    }

    fn age(range: NumRange) -> AttributeConstraint {
        AttributeConstraint::new(
            AttributeRef::column("age", "Age", true),
            ConstraintValues::Ranges(vec![range]),
        )
    }

    fn request(kind: TaskKind, bins: Vec<(&ElementId, AttributeConstraint)>) -> ApplyRequest {
        let mut targets: Vec<ElementId> = Vec::new();
        for (target, _) in &bins {
            if !targets.contains(target) {
                targets.push((*target).clone());
            }
        }
        ApplyRequest {
            kind,
            targets,
            bins: bins
                .into_iter()
                .map(|(cohort, constraint)| FilterBin {
                    cohort: cohort.clone(),
                    constraints: vec![constraint],
                })
                .collect(),
        }
    }

    fn sex_split(target: &ElementId) -> ApplyRequest {
        request(
            TaskKind::Split,
            vec![(target, sex("Female")), (target, sex("Male"))],
        )
    }

    fn outputs_of(controller: &PreviewController, task: &ElementId) -> Vec<ElementId> {
        let store = controller.store().lock().unwrap();
        store.task(task).unwrap().children.clone()
    }

    fn preview_tasks(status: ApplyStatus) -> Vec<ElementId> {
        match status {
            ApplyStatus::Previewing { tasks } => tasks,
            ApplyStatus::Stale => panic!("expected a preview"),
        }
    }

    // ================================================================
    // Preview / Confirm
    // ================================================================

    // === Scenario: Sex split on a 500-row root ===
    #[tokio::test]
    async fn sex_split_previews_then_confirms() {
        let mut fx = fixture().await;

        let job = fx.controller.begin_apply(sex_split(&fx.root)).unwrap();
        // Two loading slots appear before anything resolves
        assert_eq!(
            fx.controller.slots(&fx.root),
            &[OutputSlot::Loading, OutputSlot::Loading]
        );
        let events = fx.sink.take();
        assert!(matches!(
            &events[..],
            [LineageEvent::PlaceholdersAttached { slots, .. }] if slots[0].count == 2
        ));

        let status = fx.controller.complete(job.run().await).unwrap();
        let tasks = preview_tasks(status);
        assert_eq!(tasks.len(), 1);
        let task = tasks[0].clone();

        let outputs = outputs_of(&fx.controller, &task);
        let (labels, total) = {
            let store = fx.controller.store().lock().unwrap();
            let labels: Vec<String> = outputs
                .iter()
                .map(|id| store.cohort(id).unwrap().label())
                .collect();
            let total: u64 = outputs
                .iter()
                .map(|id| store.cohort(id).unwrap().cached_size().unwrap())
                .sum();
            assert!(store.task(&task).unwrap().preview);
            (labels, total)
        };
        assert_eq!(labels, vec!["Sex: Female", "Sex: Male"]);
        assert!(total <= 500);
        assert_eq!(total, 400);

        // In the graph, not yet in history
        assert!(fx.controller.task_history().is_empty());
        assert!(matches!(
            fx.controller.select_cohort(&outputs[0], false),
            Err(SessionError::NotSelectable(_))
        ));

        let events = fx.sink.take();
        assert!(events
            .iter()
            .any(|e| matches!(e, LineageEvent::PreviewChanged { attributes, .. } if attributes == &vec!["Sex".to_string()])));
        assert!(events.iter().any(|e| matches!(
            e,
            LineageEvent::SizeChanged { reference: Some(500), .. }
        )));

        let confirmed = fx.controller.confirm().unwrap();
        assert_eq!(confirmed, vec![task.clone()]);
        assert_eq!(fx.controller.task_history(), &[task.clone()]);
        assert_eq!(fx.controller.state(), &SessionState::Idle);
        fx.controller.select_cohort(&outputs[0], true).unwrap();
        assert_eq!(fx.controller.selected().unwrap(), vec![outputs[0].clone()]);

        let store = fx.controller.store().lock().unwrap();
        assert!(store.validate().is_empty());
        assert!(store.elements().all(|e| !e.is_preview()));
    }

    // === Scenario: Task label lists the attribute labels ===
    #[tokio::test]
    async fn task_carries_kind_label_and_attributes() {
        let mut fx = fixture().await;
        let req = ApplyRequest {
            kind: TaskKind::Filter,
            targets: vec![fx.root.clone()],
            bins: vec![FilterBin {
                cohort: fx.root.clone(),
                constraints: vec![sex("Male"), age(NumRange::at_least(50.0))],
            }],
        };
        let tasks = match fx.controller.dispatch(Intent::Apply(req)).await.unwrap() {
            Dispatched::Applied(status) => preview_tasks(status),
            other => panic!("unexpected {:?}", other),
        };
        let store = fx.controller.store().lock().unwrap();
        let task = store.task(&tasks[0]).unwrap();
        assert_eq!(task.kind, TaskKind::Filter);
        assert_eq!(task.label, "Sex, Age");
        assert_eq!(task.attributes, vec!["sex".to_string(), "age".to_string()]);
        assert!(task
            .id
            .as_str()
            .starts_with(&format!("filter-{}-", fx.root)));
    }

    // === Scenario: Confirm without a preview is rejected ===
    #[tokio::test]
    async fn confirm_requires_a_preview() {
        let mut fx = fixture().await;
        assert!(matches!(
            fx.controller.confirm(),
            Err(SessionError::NoPreview)
        ));
    }

    // ================================================================
    // Single live branch
    // ================================================================

    // === Scenario: Newer apply resolves first, older one arrives late ===
    #[tokio::test]
    async fn older_result_arriving_late_is_dropped() {
        let mut fx = fixture().await;
        let job1 = fx.controller.begin_apply(sex_split(&fx.root)).unwrap();
        let job2 = fx
            .controller
            .begin_apply(request(
                TaskKind::Filter,
                vec![(&fx.root, age(NumRange::at_least(40.0)))],
            ))
            .unwrap();

        let (out1, out2) = tokio::join!(job1.run(), job2.run());
        let stale_ids: Vec<ElementId> = out1
            .result
            .as_ref()
            .unwrap()
            .iter()
            .flat_map(|io| io.outputs.iter().map(|c| c.id.clone()))
            .collect();

        let tasks = preview_tasks(fx.controller.complete(out2).unwrap());
        assert_eq!(fx.controller.complete(out1).unwrap(), ApplyStatus::Stale);

        let store = fx.controller.store().lock().unwrap();
        assert_eq!(store.tasks().count(), 1);
        assert_eq!(store.task(&tasks[0]).unwrap().label, "Age");
        assert!(stale_ids.iter().all(|id| !store.contains(id)));
    }

    // === Scenario: Older apply resolves first while a newer one is in flight ===
    #[tokio::test]
    async fn older_result_arriving_first_is_dropped() {
        let mut fx = fixture().await;
        let job1 = fx.controller.begin_apply(sex_split(&fx.root)).unwrap();
        let job2 = fx
            .controller
            .begin_apply(request(
                TaskKind::Filter,
                vec![(&fx.root, age(NumRange::at_least(40.0)))],
            ))
            .unwrap();

        let out1 = job1.run().await;
        assert_eq!(fx.controller.complete(out1).unwrap(), ApplyStatus::Stale);
        assert!(matches!(
            fx.controller.state(),
            SessionState::Materializing { .. }
        ));

        let out2 = job2.run().await;
        preview_tasks(fx.controller.complete(out2).unwrap());
        let store = fx.controller.store().lock().unwrap();
        assert_eq!(store.tasks().count(), 1);
        assert_eq!(store.len(), 3);
    }

    // === Scenario: Applying again replaces the unconfirmed branch ===
    #[tokio::test]
    async fn new_apply_clears_previous_preview() {
        let mut fx = fixture().await;
        let first = match fx
            .controller
            .dispatch(Intent::Apply(sex_split(&fx.root)))
            .await
            .unwrap()
        {
            Dispatched::Applied(status) => preview_tasks(status),
            other => panic!("unexpected {:?}", other),
        };
        fx.controller
            .dispatch(Intent::Apply(request(
                TaskKind::Filter,
                vec![(&fx.root, age(NumRange::at_most(30.0)))],
            )))
            .await
            .unwrap();

        let store = fx.controller.store().lock().unwrap();
        assert!(!store.contains(&first[0]));
        assert_eq!(store.tasks().count(), 1);
        assert_eq!(store.cohort(&fx.root).unwrap().children.len(), 1);
    }

    // === Scenario: Discard while materializing makes the result stale ===
    #[tokio::test]
    async fn discard_during_materialization() {
        let mut fx = fixture().await;
        let job = fx.controller.begin_apply(sex_split(&fx.root)).unwrap();
        fx.controller.dispatch(Intent::DiscardPreview).await.unwrap();
        assert!(fx.controller.slots(&fx.root).is_empty());

        assert_eq!(
            fx.controller.complete(job.run().await).unwrap(),
            ApplyStatus::Stale
        );
        assert_eq!(fx.controller.store().lock().unwrap().len(), 1);
    }

    // === Scenario: Deselect-all drops the preview ===
    #[tokio::test]
    async fn deselect_all_discards_preview() {
        let mut fx = fixture().await;
        fx.controller.select_cohort(&fx.root, true).unwrap();
        fx.controller
            .dispatch(Intent::Apply(sex_split(&fx.root)))
            .await
            .unwrap();

        fx.controller.dispatch(Intent::DeselectAll).await.unwrap();
        assert_eq!(fx.controller.state(), &SessionState::Idle);
        assert!(fx.controller.selected().unwrap().is_empty());
        assert_eq!(fx.controller.store().lock().unwrap().len(), 1);
    }

    // ================================================================
    // Failure
    // ================================================================

    // === Scenario: Remote failure removes the placeholders ===
    #[tokio::test]
    async fn failure_removes_placeholders() {
        let mut fx = fixture().await;
        fx.svc.fail_when_named("Male");

        let job = fx.controller.begin_apply(sex_split(&fx.root)).unwrap();
        let err = fx.controller.complete(job.run().await).unwrap_err();
        assert!(matches!(err, SessionError::Materialize(_)));

        assert_eq!(fx.controller.state(), &SessionState::Idle);
        assert!(fx.controller.slots(&fx.root).is_empty());
        assert_eq!(fx.controller.store().lock().unwrap().len(), 1);
        assert!(fx
            .sink
            .events()
            .iter()
            .any(|e| matches!(e, LineageEvent::OperationFailed { .. })));
    }

    // === Scenario: Unknown and preview targets are refused up front ===
    #[tokio::test]
    async fn bad_targets_are_rejected_before_anything_changes() {
        let mut fx = fixture().await;
        let ghost = ElementId::from("cohort-999");
        assert!(matches!(
            fx.controller.begin_apply(sex_split(&ghost)),
            Err(SessionError::UnknownTarget(_))
        ));
        assert_eq!(fx.controller.last_token(), 0);

        let tasks = match fx
            .controller
            .dispatch(Intent::Apply(sex_split(&fx.root)))
            .await
            .unwrap()
        {
            Dispatched::Applied(status) => preview_tasks(status),
            other => panic!("unexpected {:?}", other),
        };
        let output = outputs_of(&fx.controller, &tasks[0])[0].clone();
        assert!(matches!(
            fx.controller.begin_apply(sex_split(&output)),
            Err(SessionError::NotSelectable(_))
        ));
        // The preview is still there
        assert!(matches!(
            fx.controller.state(),
            SessionState::Previewing { .. }
        ));
    }

    // ================================================================
    // Output slots
    // ================================================================

    // === Scenario: Empty outputs stay unselected and out of the graph ===
    #[tokio::test]
    async fn empty_outputs_are_not_linked() {
        let mut fx = fixture().await;
        let req = request(
            TaskKind::Split,
            vec![(&fx.root, sex("Male")), (&fx.root, sex("Other"))],
        );
        let tasks = match fx.controller.dispatch(Intent::Apply(req)).await.unwrap() {
            Dispatched::Applied(status) => preview_tasks(status),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(outputs_of(&fx.controller, &tasks[0]).len(), 1);

        let slots = fx.controller.slots(&fx.root);
        assert_eq!(slots.len(), 2);
        assert!(slots.iter().any(|s| matches!(
            s,
            OutputSlot::Ready { size: Some(0), selected: false, .. }
        )));
    }

    // === Scenario: No selected output means no task ===
    #[tokio::test]
    async fn all_empty_outputs_link_no_task() {
        let mut fx = fixture().await;
        let req = request(TaskKind::Filter, vec![(&fx.root, sex("Other"))]);
        let outcome = fx.controller.begin_apply(req).unwrap().run().await;
        assert_eq!(
            fx.controller.complete(outcome).unwrap(),
            ApplyStatus::Previewing { tasks: Vec::new() }
        );
        assert_eq!(fx.controller.store().lock().unwrap().len(), 1);
    }

    // === Scenario: Without auto-selection every output joins the graph ===
    #[tokio::test]
    async fn auto_selection_can_be_turned_off() {
        let mut fx = fixture_with(ControllerConfig {
            auto_select_nonempty: false,
            ..ControllerConfig::default()
        })
        .await;
        let req = request(
            TaskKind::Split,
            vec![(&fx.root, sex("Male")), (&fx.root, sex("Other"))],
        );
        let job = fx.controller.begin_apply(req).unwrap();
        let tasks = preview_tasks(fx.controller.complete(job.run().await).unwrap());
        assert_eq!(outputs_of(&fx.controller, &tasks[0]).len(), 2);
    }

    // === Scenario: A target without bins shows one empty slot ===
    #[tokio::test]
    async fn target_without_bins_gets_an_empty_slot() {
        let mut fx = fixture().await;
        let split = match fx
            .controller
            .dispatch(Intent::Apply(sex_split(&fx.root)))
            .await
            .unwrap()
        {
            Dispatched::Applied(status) => preview_tasks(status),
            other => panic!("unexpected {:?}", other),
        };
        fx.controller.confirm().unwrap();
        let outputs = outputs_of(&fx.controller, &split[0]);

        let req = ApplyRequest {
            kind: TaskKind::Filter,
            targets: outputs.clone(),
            bins: vec![FilterBin {
                cohort: outputs[0].clone(),
                constraints: vec![age(NumRange::at_least(60.0))],
            }],
        };
        let job = fx.controller.begin_apply(req).unwrap();
        assert_eq!(fx.controller.slots(&outputs[1]), &[OutputSlot::Loading]);
        let tasks = preview_tasks(fx.controller.complete(job.run().await).unwrap());
        assert_eq!(tasks.len(), 1);
        assert_eq!(fx.controller.slots(&outputs[1]), &[OutputSlot::Empty]);
    }

    // ================================================================
    // Pruning and memoization
    // ================================================================

    // === Scenario: Pruning the last output drops the task from history ===
    #[tokio::test]
    async fn pruning_removes_task_from_history() {
        let mut fx = fixture().await;
        fx.controller
            .dispatch(Intent::Apply(sex_split(&fx.root)))
            .await
            .unwrap();
        let task = fx.controller.confirm().unwrap()[0].clone();
        let outputs = outputs_of(&fx.controller, &task);
        fx.controller.select_cohort(&outputs[0], false).unwrap();
        fx.sink.take();

        let removed = fx
            .controller
            .dispatch(Intent::RemoveLeafCohort {
                cohort: outputs[0].clone(),
            })
            .await
            .unwrap();
        assert_eq!(removed, Dispatched::Removed(vec![outputs[0].clone()]));
        assert_eq!(fx.controller.task_history(), &[task.clone()]);
        assert!(matches!(
            fx.sink.take().first(),
            Some(LineageEvent::SelectionChanged { selected: false, .. })
        ));

        let removed = fx.controller.remove_leaf_cohort(&outputs[1]).unwrap();
        assert_eq!(removed, vec![outputs[1].clone(), task.clone()]);
        assert!(fx.controller.task_history().is_empty());

        let store = fx.controller.store().lock().unwrap();
        assert!(store.cohort(&fx.root).unwrap().children.is_empty());
        assert_eq!(store.len(), 1);
    }

    // === Scenario: Root is never removable ===
    #[tokio::test]
    async fn root_cannot_be_removed() {
        let mut fx = fixture().await;
        let root = fx.root.clone();
        assert!(matches!(
            fx.controller.remove_leaf_cohort(&root),
            Err(SessionError::Lineage(_))
        ));
    }

    // === Scenario: Sizes are fetched once per cohort ===
    #[tokio::test]
    async fn sizes_are_memoized() {
        let fx = fixture().await;
        let before = fx.svc.calls().size;
        assert_eq!(fx.controller.size(&fx.root).await.unwrap(), 500);
        assert_eq!(fx.controller.size(&fx.root).await.unwrap(), 500);
        assert_eq!(fx.svc.calls().size, before);
        assert_eq!(
            fx.sink.take().last(),
            Some(&LineageEvent::SizeChanged {
                id: fx.root.clone(),
                size: 500,
                reference: Some(500),
            })
        );
    }

    // === Scenario: Histogram of a confirmed output ===
    #[tokio::test]
    async fn histogram_counts_within_a_cohort() {
        let mut fx = fixture().await;
        let tasks = match fx
            .controller
            .dispatch(Intent::Apply(sex_split(&fx.root)))
            .await
            .unwrap()
        {
            Dispatched::Applied(status) => preview_tasks(status),
            other => panic!("unexpected {:?}", other),
        };
        fx.controller.confirm().unwrap();
        let female = outputs_of(&fx.controller, &tasks[0])[0].clone();

        let histogram = fx.controller.histogram(&female, "sex").await.unwrap();
        assert_eq!(histogram.counts.get("Female"), Some(&200));
        assert_eq!(histogram.counts.len(), 1);
        let rows_calls = fx.svc.calls().rows;
        fx.controller.histogram(&female, "sex").await.unwrap();
        assert_eq!(fx.svc.calls().rows, rows_calls);

        let bloodline = fx.controller.bloodline(&female).unwrap();
        assert_eq!(bloodline.len(), 3);
    }
}

//! Shared fixtures for the cohortgraph scenario tests
//!
//! A small clinical-style dataset (sex, age, stage, treatments, one expression score
//! and one gene panel) and helpers to stand up a session against it.

#![allow(dead_code)]

use cohortgraph::service::ScoreTable;
use cohortgraph::session::{CollectingSink, Dispatched};
use cohortgraph::{
    ApplyRequest, ApplyStatus, AttributeConstraint, AttributeRef, AttributeSource,
    CohortFetcher, ConstraintValues, ControllerConfig, DataSource, Dataset, ElementId,
    EqualsValue, FilterBin, InMemoryCohortService, Intent, LineageStore, MaterializationEngine,
    NumRange, PreviewController, Row, ScoreRef, TaskKind,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// `n` patients. Every fifth has no sex; ages cycle 20..80; stages I-IV; even patients
/// got Cisplatin (with Paclitaxel every fourth) in regimen 1.
pub fn patients(n: usize) -> Vec<Row> {
    (0..n)
        .filter_map(|i| {
            let mut v = json!({
                "id": format!("p{}", i),
                "age": 20 + (i % 60),
                "stage": (["I", "II", "III", "IV"][i % 4]),
            });
            if i % 5 != 4 {
                v["sex"] = json!(if i % 2 == 0 { "Male" } else { "Female" });
            }
            if i % 2 == 0 {
                let mut treatment = vec![json!({ "agent": "Cisplatin", "regimen": 1 })];
                if i % 4 == 0 {
                    treatment.push(json!({ "agent": "Paclitaxel", "regimen": 1 }));
                }
                v["treatment"] = json!(treatment);
            }
            v.as_object().cloned()
        })
        .collect()
}

pub fn tp53() -> ScoreRef {
    ScoreRef {
        table: "expression".into(),
        attribute: "tpm".into(),
        ensg: "ENSG00000141510".into(),
    }
}

/// TP53 expression equal to the patient number mod 10; patient 0 has no value.
/// Every third patient is on the "Hotspot" panel.
pub fn dataset(n: usize) -> Dataset {
    let values: BTreeMap<String, serde_json::Value> = (1..n)
        .map(|i| (format!("p{}", i), json!((i % 10) as f64)))
        .collect();
    Dataset::new(patients(n))
        .with_score(ScoreTable {
            table: "expression".into(),
            attribute: "tpm".into(),
            ensg: "ENSG00000141510".into(),
            screen: None,
            values,
        })
        .with_panel("Hotspot", (0..n).step_by(3).map(|i| format!("p{}", i)))
}

pub struct Session {
    pub service: Arc<InMemoryCohortService>,
    pub sink: Arc<CollectingSink>,
    pub controller: PreviewController,
    pub root: ElementId,
}

pub async fn session(n: usize) -> Session {
    session_with(n, ControllerConfig::default()).await
}

pub async fn session_with(n: usize, config: ControllerConfig) -> Session {
    let service = Arc::new(InMemoryCohortService::new(dataset(n)));
    let sink = Arc::new(CollectingSink::new());
    let mut controller = PreviewController::new(
        Arc::new(Mutex::new(LineageStore::new())),
        MaterializationEngine::new(service.clone()),
        CohortFetcher::new(service.clone()),
        sink.clone(),
        config,
    );
    let root = controller
        .select_dataset(
            "All Patients",
            "",
            DataSource::new("clinical", "public", "patients", ""),
        )
        .await
        .expect("root cohort");
    sink.take();
    Session {
        service,
        sink,
        controller,
        root,
    }
}

pub fn categorical(id: &str, label: &str, values: &[&str]) -> AttributeConstraint {
    AttributeConstraint::new(
        AttributeRef::column(id, label, false),
        ConstraintValues::Equals(values.iter().map(|v| EqualsValue::is(*v)).collect()),
    )
}

pub fn numeric(id: &str, label: &str, range: NumRange) -> AttributeConstraint {
    AttributeConstraint::new(
        AttributeRef::column(id, label, true),
        ConstraintValues::Ranges(vec![range]),
    )
}

pub fn expression(range: NumRange) -> AttributeConstraint {
    AttributeConstraint::new(
        AttributeRef {
            id: "tp53_tpm".into(),
            label: "TP53 Expression".into(),
            source: AttributeSource::GeneScore {
                score: tp53(),
                numeric: true,
            },
        },
        ConstraintValues::Ranges(vec![range]),
    )
}

pub fn panel(panels: &[&str]) -> AttributeConstraint {
    AttributeConstraint::new(
        AttributeRef {
            id: "panel".into(),
            label: "Panel".into(),
            source: AttributeSource::PanelAnnotation,
        },
        ConstraintValues::Equals(panels.iter().map(|p| EqualsValue::is(*p)).collect()),
    )
}

pub fn treatment(combinations: &[&str], base_agent: bool) -> AttributeConstraint {
    AttributeConstraint::new(
        AttributeRef {
            id: "treatment".into(),
            label: "Treatment".into(),
            source: AttributeSource::Treatment {
                base_agent,
                regimen: Some(1),
            },
        },
        ConstraintValues::Equals(combinations.iter().map(|c| EqualsValue::is(*c)).collect()),
    )
}

/// One bin per constraint, all on `target`
pub fn split(target: &ElementId, constraints: Vec<AttributeConstraint>) -> Intent {
    Intent::Apply(ApplyRequest {
        kind: TaskKind::Split,
        targets: vec![target.clone()],
        bins: constraints
            .into_iter()
            .map(|c| FilterBin {
                cohort: target.clone(),
                constraints: vec![c],
            })
            .collect(),
    })
}

/// One bin on `target` narrowed by every constraint in turn
pub fn filter(target: &ElementId, constraints: Vec<AttributeConstraint>) -> Intent {
    Intent::Apply(ApplyRequest {
        kind: TaskKind::Filter,
        targets: vec![target.clone()],
        bins: vec![FilterBin {
            cohort: target.clone(),
            constraints,
        }],
    })
}

pub fn preview_tasks(status: ApplyStatus) -> Vec<ElementId> {
    match status {
        ApplyStatus::Previewing { tasks } => tasks,
        ApplyStatus::Stale => panic!("expected a preview"),
    }
}

/// Dispatch an Apply and return the tasks of its preview
pub async fn apply(session: &mut Session, intent: Intent) -> Vec<ElementId> {
    match session.controller.dispatch(intent).await.expect("apply") {
        Dispatched::Applied(status) => preview_tasks(status),
        other => panic!("unexpected {:?}", other),
    }
}

/// Apply then confirm; returns the outputs of the (single) task, in display order
pub async fn apply_and_confirm(session: &mut Session, intent: Intent) -> Vec<ElementId> {
    let tasks = apply(session, intent).await;
    assert!(
        !tasks.is_empty(),
        "apply linked no task; every output was empty or unselected"
    );
    session.controller.confirm().expect("confirm");
    outputs(session, &tasks[0])
}

pub fn outputs(session: &Session, task: &ElementId) -> Vec<ElementId> {
    let store = session.controller.store().lock().unwrap();
    store.task(task).unwrap().children.clone()
}

pub fn label_of(session: &Session, id: &ElementId) -> String {
    let store = session.controller.store().lock().unwrap();
    store.cohort(id).unwrap().label()
}

pub fn size_of(session: &Session, id: &ElementId) -> Option<u64> {
    let store = session.controller.store().lock().unwrap();
    store.cohort(id).unwrap().cached_size()
}

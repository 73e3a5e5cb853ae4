//! Saving a session's confirmed graph and picking it up again

mod common;

use cohortgraph::{
    CohortFetcher, ControllerConfig, LineageStore, MaterializationEngine, NumRange, OpenStore,
    PreviewController, Snapshot, SnapshotStore, SqliteSnapshotStore,
};
use cohortgraph::session::CollectingSink;
use common::{apply, apply_and_confirm, categorical, filter, numeric, session, split};
use std::sync::{Arc, Mutex};

// === Scenario: The unconfirmed branch is not saved ===
#[tokio::test]
async fn snapshot_excludes_preview_and_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("snapshots.db");

    let mut s = session(120).await;
    let root = s.root.clone();
    let sexes = apply_and_confirm(
        &mut s,
        split(
            &root,
            vec![
                categorical("sex", "Sex", &["Female"]),
                categorical("sex", "Sex", &["Male"]),
            ],
        ),
    )
    .await;
    // Left unconfirmed
    let preview = apply(
        &mut s,
        filter(&sexes[0], vec![numeric("age", "Age", NumRange::at_least(40.0))]),
    )
    .await;

    let snapshot = {
        let lineage = s.controller.store().lock().unwrap();
        Snapshot::capture("study", &lineage, s.controller.task_history())
    };
    assert_eq!(snapshot.elements.len(), 4);
    assert!(snapshot.elements.iter().all(|e| e.id() != &preview[0]));

    {
        let store = SqliteSnapshotStore::open(&db_path).unwrap();
        store.save(&snapshot).unwrap();
    }

    let store = SqliteSnapshotStore::open(&db_path).unwrap();
    let loaded = store.load("study").unwrap().unwrap();
    assert_eq!(loaded.history, snapshot.history);

    let restored = loaded.restore().unwrap();
    assert!(restored.validate().is_empty());
    assert_eq!(restored.root(), Some(&root));
    let female = restored.cohort(&sexes[0]).unwrap();
    assert!(female.children.is_empty());
    assert!(!female.preview);
    assert_eq!(female.label(), "Sex: Female");
}

// === Scenario: A restored graph can be derived from again ===
#[tokio::test]
async fn restored_session_continues() {
    let mut s = session(120).await;
    let root = s.root.clone();
    let male = apply_and_confirm(
        &mut s,
        filter(&root, vec![categorical("sex", "Sex", &["Male"])]),
    )
    .await;
    let store = SqliteSnapshotStore::open_in_memory().unwrap();
    {
        let lineage = s.controller.store().lock().unwrap();
        store
            .save(&Snapshot::capture("study", &lineage, s.controller.task_history()))
            .unwrap();
    }

    // Same service, fresh controller
    let snapshot = store.load("study").unwrap().unwrap();
    let lineage: LineageStore = LineageStore::try_from(&snapshot).unwrap();
    let mut resumed = common::Session {
        controller: PreviewController::new(
            Arc::new(Mutex::new(lineage)),
            MaterializationEngine::new(s.service.clone()),
            CohortFetcher::new(s.service.clone()),
            Arc::new(CollectingSink::new()),
            ControllerConfig::default(),
        )
        .with_history(snapshot.history.clone()),
        service: s.service.clone(),
        sink: Arc::new(CollectingSink::new()),
        root: root.clone(),
    };
    assert_eq!(resumed.controller.task_history().len(), 1);

    let before = resumed.service.calls().size;
    // The size came back with the snapshot
    assert!(resumed.controller.size(&male[0]).await.unwrap() > 0);
    assert_eq!(resumed.service.calls().size, before);

    let old = apply_and_confirm(
        &mut resumed,
        filter(&male[0], vec![numeric("age", "Age", NumRange::at_least(50.0))]),
    )
    .await;
    assert_eq!(resumed.controller.task_history().len(), 2);
    let line = resumed.controller.bloodline(&old[0]).unwrap();
    assert_eq!(line.len(), 5);
}

// === Scenario: Saving again after pruning drops the pruned elements ===
#[tokio::test]
async fn resave_after_prune() {
    let mut s = session(120).await;
    let root = s.root.clone();
    let sexes = apply_and_confirm(
        &mut s,
        split(
            &root,
            vec![
                categorical("sex", "Sex", &["Female"]),
                categorical("sex", "Sex", &["Male"]),
            ],
        ),
    )
    .await;
    let store = SqliteSnapshotStore::open_in_memory().unwrap();
    let save = |s: &common::Session| {
        let lineage = s.controller.store().lock().unwrap();
        store
            .save(&Snapshot::capture("study", &lineage, s.controller.task_history()))
            .unwrap();
    };
    save(&s);

    for id in &sexes {
        s.controller.remove_leaf_cohort(id).unwrap();
    }
    save(&s);

    let infos = store.list().unwrap();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].elements, 1);
    assert_eq!(infos[0].history, 0);
}

//! PreviewController: the preview-then-commit state machine of one editing session
//!
//! An Apply attaches loading slots to its targets and hands back a [`MaterializeJob`].
//! When the job's outcome comes back the controller checks its token: a stale outcome
//! is dropped without touching the graph, a current one is spliced in as an
//! unconfirmed branch. Confirm turns that branch into history; a new Apply, a discard
//! or deselect-all clears it. There is at most one live branch at a time.

use super::cancel::{Token, TokenSource};
use super::config::ControllerConfig;
use super::events::{LineageEvent, PlaceholderSlots, TaskParams};
use super::intent::{ApplyRequest, Intent};
use super::job::{InputOutputs, JobInput, MaterializeJob, MaterializeOutcome};
use super::sink::EventSink;
use crate::fetch::{CohortFetcher, FetchError, Histogram};
use crate::filter::{MaterializationEngine, MaterializeError};
use crate::graph::{DataSource, ElementId, LineageError, LineageStore, Task, TaskKind};
use crate::query::{bloodline, Bloodline};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors surfaced by session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Lineage error: {0}")]
    Lineage(#[from] LineageError),

    #[error("Materialization failed: {0}")]
    Materialize(#[from] MaterializeError),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("No preview to confirm")]
    NoPreview,

    #[error("Cohort {0} belongs to an unconfirmed preview")]
    NotSelectable(ElementId),

    #[error("Unknown target cohort: {0}")]
    UnknownTarget(ElementId),

    #[error("Materialization task failed: {0}")]
    Join(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Where the session is in the preview cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Materializing { token: Token },
    Previewing { token: Token, tasks: Vec<ElementId> },
}

/// Display slot for one output of an input cohort
#[derive(Debug, Clone, PartialEq)]
pub enum OutputSlot {
    /// Materialization in flight
    Loading,
    /// The input received no bins
    Empty,
    /// A materialized output; only selected outputs are in the graph
    Ready {
        id: ElementId,
        label: String,
        size: Option<u64>,
        selected: bool,
    },
}

/// How an Apply ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyStatus {
    /// A newer Apply (or a discard) superseded this one; nothing changed
    Stale,
    /// The branch is shown; `tasks` may be empty if no output was selected
    Previewing { tasks: Vec<ElementId> },
}

/// Result of dispatching one intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Applied(ApplyStatus),
    Confirmed(Vec<ElementId>),
    Discarded,
    Removed(Vec<ElementId>),
    Selection,
}

/// Preview/commit controller for one dataset selection
pub struct PreviewController {
    store: Arc<Mutex<LineageStore>>,
    engine: MaterializationEngine,
    fetcher: CohortFetcher,
    sink: Arc<dyn EventSink>,
    config: ControllerConfig,
    tokens: TokenSource,
    state: SessionState,
    /// Display slots per input cohort of the current Apply
    slots: BTreeMap<ElementId, Vec<OutputSlot>>,
    /// Attribute labels of the current preview
    preview_attributes: Vec<String>,
    pending: Option<PendingApply>,
    task_history: Vec<ElementId>,
}

/// Task shape remembered between begin_apply and complete
#[derive(Debug, Clone)]
struct PendingApply {
    kind: TaskKind,
    label: String,
    attributes: Vec<String>,
}

impl std::fmt::Debug for PreviewController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewController")
            .field("state", &self.state)
            .field("task_history", &self.task_history)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn lock(store: &Mutex<LineageStore>) -> SessionResult<MutexGuard<'_, LineageStore>> {
    store
        .lock()
        .map_err(|e| SessionError::Internal(format!("lock poisoned: {}", e)))
}

fn reference_size(store: &LineageStore) -> Option<u64> {
    store
        .root()
        .and_then(|r| store.cohort(r).ok())
        .and_then(|c| c.cached_size())
}

fn task_params(task: &Task) -> TaskParams {
    TaskParams {
        task: task.id.clone(),
        kind: task.kind,
        label: task.label.clone(),
        input: task.input().cloned().unwrap_or_else(|| ElementId::from("")),
        outputs: task.children.clone(),
    }
}

impl PreviewController {
    pub fn new(
        store: Arc<Mutex<LineageStore>>,
        engine: MaterializationEngine,
        fetcher: CohortFetcher,
        sink: Arc<dyn EventSink>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            engine,
            fetcher,
            sink,
            config,
            tokens: TokenSource::new(),
            state: SessionState::Idle,
            slots: BTreeMap::new(),
            preview_attributes: Vec::new(),
            pending: None,
            task_history: Vec::new(),
        }
    }

    /// Resume with an existing history (e.g. from a snapshot)
    pub fn with_history(mut self, history: Vec<ElementId>) -> Self {
        self.task_history = history;
        self
    }

    pub fn store(&self) -> &Arc<Mutex<LineageStore>> {
        &self.store
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &CohortFetcher {
        &self.fetcher
    }

    /// Confirmed tasks, oldest first
    pub fn task_history(&self) -> &[ElementId] {
        &self.task_history
    }

    /// Display slots of an input cohort during the current Apply
    pub fn slots(&self, input: &ElementId) -> &[OutputSlot] {
        self.slots.get(input).map(|s| s.as_slice()).unwrap_or(&[])
    }

    /// The most recently issued token
    pub fn last_token(&self) -> u64 {
        self.tokens.last()
    }

    fn emit(&self, event: LineageEvent) {
        self.sink.emit(event);
    }

    /// Create the root cohort of a dataset selection and fetch its size
    pub async fn select_dataset(
        &mut self,
        label_primary: &str,
        label_secondary: &str,
        source: DataSource,
    ) -> SessionResult<ElementId> {
        let mut root = self
            .engine
            .create_root(label_primary, label_secondary, source)
            .await?;
        let size = self.fetcher.size(&mut root).await?;
        let id = root.id.clone();
        let (primary, secondary) = (
            root.label_primary().to_string(),
            root.label_secondary().to_string(),
        );
        lock(&self.store)?.add_element(root)?;
        tracing::info!(root = %id, size, "dataset selected");

        self.emit(LineageEvent::GraphChanged);
        self.emit(LineageEvent::LabelChanged {
            id: id.clone(),
            primary,
            secondary,
        });
        self.emit(LineageEvent::SizeChanged {
            id: id.clone(),
            size,
            reference: Some(size),
        });
        Ok(id)
    }

    /// Drop the current preview branch or in-flight placeholders and go Idle
    fn clear_preview(&mut self) -> SessionResult<()> {
        let state = std::mem::replace(&mut self.state, SessionState::Idle);
        match state {
            SessionState::Previewing { tasks, .. } => {
                let store = self.store.clone();
                let mut store = lock(&store)?;
                for task in &tasks {
                    for id in store.clear_branch(task)? {
                        self.fetcher.cache().evict_cohort(&id);
                    }
                }
                drop(store);
                tracing::debug!(tasks = tasks.len(), "preview branch cleared");
                self.emit(LineageEvent::GraphChanged);
            }
            SessionState::Materializing { token } => {
                tracing::debug!(%token, "placeholders dropped");
                self.emit(LineageEvent::GraphChanged);
            }
            SessionState::Idle => {}
        }
        self.slots.clear();
        self.preview_attributes.clear();
        self.pending = None;
        Ok(())
    }

    /// Start an Apply: clear any preview, issue a token and attach loading slots.
    ///
    /// The returned job does the remote work; hand its outcome to [`Self::complete`].
    /// Targets are checked before anything changes.
    pub fn begin_apply(&mut self, request: ApplyRequest) -> SessionResult<MaterializeJob> {
        let inputs = {
            let store = lock(&self.store)?;
            let mut inputs = Vec::with_capacity(request.targets.len());
            for target in &request.targets {
                let cohort = store
                    .cohort(target)
                    .map_err(|_| SessionError::UnknownTarget(target.clone()))?;
                if cohort.preview {
                    return Err(SessionError::NotSelectable(target.clone()));
                }
                let bins = request
                    .bins_for(target)
                    .map(|b| b.constraints.clone())
                    .collect();
                inputs.push(JobInput {
                    cohort: cohort.clone(),
                    bins,
                });
            }
            inputs
        };

        self.clear_preview()?;
        let token = self.tokens.issue();
        tracing::debug!(%token, kind = %request.kind, targets = inputs.len(), "apply started");

        let mut placeholders = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let count = input.bins.len().max(1);
            self.slots
                .insert(input.cohort.id.clone(), vec![OutputSlot::Loading; count]);
            placeholders.push(PlaceholderSlots {
                input: input.cohort.id.clone(),
                count,
            });
        }
        self.emit(LineageEvent::PlaceholdersAttached {
            token,
            slots: placeholders,
        });

        self.preview_attributes = request.attribute_labels();
        self.pending = Some(PendingApply {
            kind: request.kind,
            label: request.task_label(),
            attributes: request.attribute_ids(),
        });
        self.state = SessionState::Materializing { token };
        Ok(MaterializeJob::new(
            token,
            self.engine.clone(),
            self.fetcher.clone(),
            self.config.clone(),
            inputs,
        ))
    }

    /// Take a finished job's outcome.
    ///
    /// A stale outcome changes nothing. A failed one removes the placeholders and is
    /// returned as the error. Otherwise the selected outputs are linked as a preview branch.
    pub fn complete(&mut self, outcome: MaterializeOutcome) -> SessionResult<ApplyStatus> {
        let MaterializeOutcome { token, result } = outcome;
        let awaited = matches!(&self.state, SessionState::Materializing { token: t } if *t == token);
        if !awaited || !self.tokens.is_current(token) {
            tracing::debug!(%token, latest = self.tokens.last(), "stale apply result discarded");
            return Ok(ApplyStatus::Stale);
        }

        let per_input = match result {
            Ok(per_input) => per_input,
            Err(e) => {
                tracing::warn!(%token, error = %e, "apply failed");
                self.slots.clear();
                self.preview_attributes.clear();
                self.pending = None;
                self.state = SessionState::Idle;
                self.emit(LineageEvent::OperationFailed {
                    token,
                    message: e.to_string(),
                });
                self.emit(LineageEvent::GraphChanged);
                return Err(e);
            }
        };
        let pending = self
            .pending
            .take()
            .ok_or_else(|| SessionError::Internal(format!("no pending apply for {}", token)))?;

        let (tasks, events) = self.splice(&pending, per_input)?;
        let params = {
            let store = lock(&self.store)?;
            tasks
                .iter()
                .map(|t| store.task(t).map(task_params))
                .collect::<Result<Vec<_>, _>>()?
        };

        for event in events {
            self.emit(event);
        }
        self.emit(LineageEvent::PreviewChanged {
            tasks: params,
            attributes: self.preview_attributes.clone(),
        });
        self.emit(LineageEvent::GraphChanged);
        tracing::debug!(%token, tasks = tasks.len(), "preview branch attached");

        self.state = SessionState::Previewing {
            token,
            tasks: tasks.clone(),
        };
        Ok(ApplyStatus::Previewing { tasks })
    }

    /// Link the outputs of every input into the store; returns the new task ids and the
    /// display events to emit once the store is released
    fn splice(
        &mut self,
        pending: &PendingApply,
        per_input: Vec<InputOutputs>,
    ) -> SessionResult<(Vec<ElementId>, Vec<LineageEvent>)> {
        let store = self.store.clone();
        let mut store = lock(&store)?;
        let reference = reference_size(&store);
        let mut tasks = Vec::new();
        let mut events = Vec::new();

        for InputOutputs { input, outputs } in per_input {
            if outputs.is_empty() {
                self.slots.insert(input, vec![OutputSlot::Empty]);
                continue;
            }
            if !store.contains(&input) {
                tracing::debug!(input = %input, "input removed while materializing, outputs dropped");
                self.slots.remove(&input);
                continue;
            }

            let mut slots = Vec::with_capacity(outputs.len());
            let mut linked = Vec::new();
            for mut output in outputs {
                slots.push(OutputSlot::Ready {
                    id: output.id.clone(),
                    label: output.label(),
                    size: output.cached_size(),
                    selected: output.selected,
                });
                if !output.selected {
                    continue;
                }
                output.preview = true;
                events.push(LineageEvent::LabelChanged {
                    id: output.id.clone(),
                    primary: output.label_primary().to_string(),
                    secondary: output.label_secondary().to_string(),
                });
                if let Some(size) = output.cached_size() {
                    events.push(LineageEvent::SizeChanged {
                        id: output.id.clone(),
                        size,
                        reference,
                    });
                }
                events.push(LineageEvent::SelectionChanged {
                    id: output.id.clone(),
                    selected: true,
                });
                linked.push(output.id.clone());
                store.add_element(output)?;
            }
            self.slots.insert(input.clone(), slots);

            if linked.is_empty() {
                tracing::debug!(input = %input, "no output selected, no task linked");
                continue;
            }
            let mut task = Task::new(
                pending.kind,
                &input,
                pending.label.clone(),
                pending.attributes.clone(),
            );
            task.preview = true;
            let task_id = task.id.clone();
            store.add_element(task)?;
            store.link_task_to_cohort(&task_id, &input, &linked)?;
            tasks.push(task_id);
        }
        Ok((tasks, events))
    }

    /// Make the preview branch permanent; its outputs become selectable
    pub fn confirm(&mut self) -> SessionResult<Vec<ElementId>> {
        let tasks = match &self.state {
            SessionState::Previewing { tasks, .. } => tasks.clone(),
            _ => return Err(SessionError::NoPreview),
        };

        let params = {
            let mut store = lock(&self.store)?;
            let mut params = Vec::with_capacity(tasks.len());
            for task_id in &tasks {
                let task = store.task_mut(task_id)?;
                task.preview = false;
                params.push(task_params(task));
                let outputs = task.children.clone();
                for output in &outputs {
                    store.cohort_mut(output)?.preview = false;
                }
            }
            params
        };

        self.task_history.extend(tasks.iter().cloned());
        let attributes = std::mem::take(&mut self.preview_attributes);
        self.slots.clear();
        self.state = SessionState::Idle;
        tracing::info!(tasks = tasks.len(), history = self.task_history.len(), "preview confirmed");

        self.emit(LineageEvent::PreviewConfirmed {
            tasks: params,
            attributes,
        });
        self.emit(LineageEvent::GraphChanged);
        Ok(tasks)
    }

    /// Drop the preview branch, or make an in-flight Apply stale
    pub fn discard(&mut self) -> SessionResult<()> {
        if let SessionState::Materializing { token } = &self.state {
            tracing::debug!(%token, "in-flight apply discarded");
            self.tokens.invalidate();
        }
        self.clear_preview()
    }

    /// Remove a leaf cohort, pruning its task if it was the last output.
    ///
    /// Pruned tasks leave the history and the preview. Returns the removed ids.
    pub fn remove_leaf_cohort(&mut self, id: &ElementId) -> SessionResult<Vec<ElementId>> {
        let (was_selected, removed) = {
            let mut store = lock(&self.store)?;
            let was_selected = store.cohort(id)?.selected;
            (was_selected, store.remove_leaf_cohort(id)?)
        };

        if was_selected {
            self.emit(LineageEvent::SelectionChanged {
                id: id.clone(),
                selected: false,
            });
        }
        for removed_id in &removed {
            self.fetcher.cache().evict_cohort(removed_id);
        }
        self.task_history.retain(|t| !removed.contains(t));
        if let SessionState::Previewing { tasks, .. } = &mut self.state {
            tasks.retain(|t| !removed.contains(t));
        }
        tracing::info!(cohort = %id, removed = removed.len(), "cohort removed");
        self.emit(LineageEvent::GraphChanged);
        Ok(removed)
    }

    /// Select a cohort as an Apply target, optionally replacing the current selection
    pub fn select_cohort(&mut self, id: &ElementId, replace: bool) -> SessionResult<()> {
        let mut changed = Vec::new();
        {
            let mut store = lock(&self.store)?;
            let cohort = store
                .cohort(id)
                .map_err(|_| SessionError::UnknownTarget(id.clone()))?;
            if cohort.preview {
                return Err(SessionError::NotSelectable(id.clone()));
            }
            if replace {
                let others: Vec<ElementId> = store
                    .cohorts()
                    .filter(|c| c.selected && &c.id != id)
                    .map(|c| c.id.clone())
                    .collect();
                for other in others {
                    store.cohort_mut(&other)?.selected = false;
                    changed.push((other, false));
                }
            }
            let cohort = store.cohort_mut(id)?;
            if !cohort.selected {
                cohort.selected = true;
                changed.push((id.clone(), true));
            }
        }
        for (id, selected) in changed {
            self.emit(LineageEvent::SelectionChanged { id, selected });
        }
        Ok(())
    }

    /// Clear every selection and drop the preview branch
    pub fn deselect_all(&mut self) -> SessionResult<()> {
        self.discard()?;
        let deselected = {
            let mut store = lock(&self.store)?;
            let selected: Vec<ElementId> = store
                .cohorts()
                .filter(|c| c.selected)
                .map(|c| c.id.clone())
                .collect();
            for id in &selected {
                store.cohort_mut(id)?.selected = false;
            }
            selected
        };
        for id in deselected {
            self.emit(LineageEvent::SelectionChanged {
                id,
                selected: false,
            });
        }
        Ok(())
    }

    /// Ids of the currently selected cohorts, sorted
    pub fn selected(&self) -> SessionResult<Vec<ElementId>> {
        let store = lock(&self.store)?;
        let mut ids: Vec<ElementId> = store
            .cohorts()
            .filter(|c| c.selected)
            .map(|c| c.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Handle one intent. An Apply runs its job to completion before returning.
    pub async fn dispatch(&mut self, intent: Intent) -> SessionResult<Dispatched> {
        match intent {
            Intent::Apply(request) => {
                let job = self.begin_apply(request)?;
                let outcome = job.run().await;
                Ok(Dispatched::Applied(self.complete(outcome)?))
            }
            Intent::Confirm => Ok(Dispatched::Confirmed(self.confirm()?)),
            Intent::DiscardPreview => {
                self.discard()?;
                Ok(Dispatched::Discarded)
            }
            Intent::RemoveLeafCohort { cohort } => {
                Ok(Dispatched::Removed(self.remove_leaf_cohort(&cohort)?))
            }
            Intent::SelectCohort { cohort, replace } => {
                self.select_cohort(&cohort, replace)?;
                Ok(Dispatched::Selection)
            }
            Intent::DeselectAll => {
                self.deselect_all()?;
                Ok(Dispatched::Selection)
            }
        }
    }

    /// Size of a cohort, memoized on the cohort; emits the size with the root as reference
    pub async fn size(&self, id: &ElementId) -> SessionResult<u64> {
        let size = self.fetcher.size_of(&self.store, id).await?;
        let reference = reference_size(&*lock(&self.store)?);
        self.emit(LineageEvent::SizeChanged {
            id: id.clone(),
            size,
            reference,
        });
        Ok(size)
    }

    /// Category counts of `attribute` in a cohort
    pub async fn histogram(&self, id: &ElementId, attribute: &str) -> SessionResult<Histogram> {
        Ok(self.fetcher.histogram(&self.store, id, attribute).await?)
    }

    /// Path from a cohort up to the root
    pub fn bloodline(&self, id: &ElementId) -> SessionResult<Bloodline> {
        let store = lock(&self.store)?;
        Ok(bloodline(&store, id)?)
    }
}

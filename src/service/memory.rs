//! In-process cohort service over JSON rows
//!
//! Evaluates every constraint route against a loaded [`Dataset`] the way the SQL
//! backend does: missing values (`null` or absent) never match a category or a bounded
//! range, only the explicit missing-value entries. Keeps per-call counters and can be
//! told to fail or to delay, which is what the session tests lean on.

use super::traits::{BaseDescriptor, CohortQuery, CohortService, ServiceError, ServiceResult};
use crate::graph::{
    format_number, CohortHandle, ConstraintDescriptor, EqualsValue, NumRange, Row, ScoreRef,
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn default_key() -> String {
    "id".to_string()
}

/// Per-entity values of one score (expression, copy number, depletion, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreTable {
    pub table: String,
    pub attribute: String,
    pub ensg: String,
    /// Depletion screen, for depletion scores
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<String>,
    /// Entity key -> value
    pub values: BTreeMap<String, Value>,
}

impl ScoreTable {
    fn matches(&self, score: &ScoreRef, screen: Option<&str>) -> bool {
        self.table == score.table
            && self.attribute == score.attribute
            && self.ensg == score.ensg
            && self.screen.as_deref() == screen
    }
}

/// Everything the in-memory service can query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    /// Column holding the entity key that score tables and panels refer to
    #[serde(default = "default_key")]
    pub key: String,
    pub rows: Vec<Row>,
    #[serde(default)]
    pub scores: Vec<ScoreTable>,
    /// Panel name -> member entity keys
    #[serde(default)]
    pub panels: BTreeMap<String, BTreeSet<String>>,
}

impl Dataset {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            key: default_key(),
            rows,
            scores: Vec::new(),
            panels: BTreeMap::new(),
        }
    }

    pub fn with_score(mut self, score: ScoreTable) -> Self {
        self.scores.push(score);
        self
    }

    pub fn with_panel(
        mut self,
        panel: impl Into<String>,
        members: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.panels
            .insert(panel.into(), members.into_iter().map(Into::into).collect());
        self
    }

    fn entity_key(&self, row: &Row) -> Option<String> {
        row.get(&self.key).and_then(canonical)
    }
}

/// Number of calls made per service operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create: usize,
    pub create_with_constraint: usize,
    pub size: usize,
    pub rows: usize,
    pub rename: usize,
}

#[derive(Debug, Default)]
struct Counters {
    create: AtomicUsize,
    create_with_constraint: AtomicUsize,
    size: AtomicUsize,
    rows: AtomicUsize,
    rename: AtomicUsize,
}

#[derive(Debug, Clone)]
struct StoredCohort {
    name: String,
    /// Indices into `Dataset::rows`
    members: Arc<Vec<usize>>,
}

/// A complete cohort service held in memory
#[derive(Debug)]
pub struct InMemoryCohortService {
    dataset: Dataset,
    cohorts: DashMap<CohortHandle, StoredCohort>,
    next_handle: AtomicU64,
    counters: Counters,
    /// Remaining calls that should fail
    failures: AtomicUsize,
    /// Failures keyed by the service-side name a constrained create would use
    failing_names: Mutex<BTreeSet<String>>,
    latency: Mutex<Option<Duration>>,
}

impl InMemoryCohortService {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            cohorts: DashMap::new(),
            next_handle: AtomicU64::new(1),
            counters: Counters::default(),
            failures: AtomicUsize::new(0),
            failing_names: Mutex::new(BTreeSet::new()),
            latency: Mutex::new(None),
        }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Snapshot of the call counters
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            create: self.counters.create.load(Ordering::SeqCst),
            create_with_constraint: self.counters.create_with_constraint.load(Ordering::SeqCst),
            size: self.counters.size.load(Ordering::SeqCst),
            rows: self.counters.rows.load(Ordering::SeqCst),
            rename: self.counters.rename.load(Ordering::SeqCst),
        }
    }

    /// Make the next `n` calls fail with `Unavailable`
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Make every constrained create whose name contains `fragment` fail
    pub fn fail_when_named(&self, fragment: impl Into<String>) {
        if let Ok(mut names) = self.failing_names.lock() {
            names.insert(fragment.into());
        }
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut l) = self.latency.lock() {
            *l = latency;
        }
    }

    /// Service-side name of a cohort
    pub fn name_of(&self, handle: CohortHandle) -> Option<String> {
        self.cohorts.get(&handle).map(|c| c.name.clone())
    }

    async fn enter(&self, counter: &AtomicUsize, operation: &str) -> ServiceResult<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency.lock().ok().and_then(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            tracing::warn!(operation, "injected service failure");
            return Err(ServiceError::Unavailable(format!("{} failed", operation)));
        }
        Ok(())
    }

    fn store(&self, name: &str, members: Vec<usize>) -> CohortHandle {
        let handle = CohortHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.cohorts.insert(
            handle,
            StoredCohort {
                name: name.to_string(),
                members: Arc::new(members),
            },
        );
        handle
    }

    fn members(&self, handle: CohortHandle) -> ServiceResult<Arc<Vec<usize>>> {
        self.cohorts
            .get(&handle)
            .map(|c| c.members.clone())
            .ok_or(ServiceError::UnknownHandle(handle))
    }

    fn select(&self, query: &CohortQuery) -> ServiceResult<Vec<usize>> {
        match query {
            CohortQuery::Handle { handle } => Ok(self.members(*handle)?.to_vec()),
            CohortQuery::Narrowed { handle, constraint } => {
                self.narrow(&self.members(*handle)?, constraint)
            }
        }
    }

    fn narrow(
        &self,
        members: &[usize],
        constraint: &ConstraintDescriptor,
    ) -> ServiceResult<Vec<usize>> {
        let mut kept = Vec::new();
        for &idx in members {
            let row = self
                .dataset
                .rows
                .get(idx)
                .ok_or_else(|| ServiceError::InvalidQuery(format!("row {} out of range", idx)))?;
            if self.row_matches(row, constraint)? {
                kept.push(idx);
            }
        }
        Ok(kept)
    }

    fn score_value<'a>(
        &'a self,
        row: &Row,
        score: &ScoreRef,
        screen: Option<&str>,
    ) -> ServiceResult<Option<&'a Value>> {
        let table = self
            .dataset
            .scores
            .iter()
            .find(|t| t.matches(score, screen))
            .ok_or_else(|| {
                ServiceError::InvalidQuery(format!(
                    "no score table {}.{} for {}",
                    score.table, score.attribute, score.ensg
                ))
            })?;
        Ok(self
            .dataset
            .entity_key(row)
            .and_then(|key| table.values.get(&key)))
    }

    fn row_matches(&self, row: &Row, constraint: &ConstraintDescriptor) -> ServiceResult<bool> {
        Ok(match constraint {
            ConstraintDescriptor::CategoricalEquals {
                attribute,
                numeric,
                values,
            } => equals_match(row.get(attribute), values, *numeric),
            ConstraintDescriptor::NumericRange { attribute, ranges } => {
                ranges_match(row.get(attribute), ranges)
            }
            ConstraintDescriptor::GeneScoreRange { score, ranges } => {
                ranges_match(self.score_value(row, score, None)?, ranges)
            }
            ConstraintDescriptor::GeneScoreEquals {
                score,
                numeric,
                values,
            } => equals_match(self.score_value(row, score, None)?, values, *numeric),
            ConstraintDescriptor::DepletionScoreRange {
                score,
                screen,
                ranges,
            } => ranges_match(self.score_value(row, score, Some(screen))?, ranges),
            // `values` names the panels; the entity must belong to one of them
            ConstraintDescriptor::PanelAnnotation { values, .. } => {
                match self.dataset.entity_key(row) {
                    Some(key) => values.iter().any(|panel| {
                        self.dataset
                            .panels
                            .get(panel)
                            .map(|members| members.contains(&key))
                            .unwrap_or(false)
                    }),
                    None => false,
                }
            }
            ConstraintDescriptor::Treatment {
                base_agent,
                agents,
                regimen,
            } => treatment_match(row.get("treatment"), *base_agent, agents, *regimen),
        })
    }
}

#[async_trait]
impl CohortService for InMemoryCohortService {
    async fn create_cohort(&self, base: &BaseDescriptor) -> ServiceResult<CohortHandle> {
        self.enter(&self.counters.create, "create_cohort").await?;
        let handle = self.store(&base.name, (0..self.dataset.rows.len()).collect());
        tracing::debug!(%handle, name = %base.name, "base cohort created");
        Ok(handle)
    }

    async fn create_cohort_with_constraint(
        &self,
        parent: CohortHandle,
        name: &str,
        constraint: &ConstraintDescriptor,
    ) -> ServiceResult<CohortHandle> {
        self.enter(
            &self.counters.create_with_constraint,
            "create_cohort_with_constraint",
        )
        .await?;
        let rejected = self
            .failing_names
            .lock()
            .map(|names| names.iter().any(|f| name.contains(f.as_str())))
            .unwrap_or(false);
        if rejected {
            return Err(ServiceError::Rejected(format!("cannot create {}", name)));
        }
        let members = self.narrow(&self.members(parent)?, constraint)?;
        let handle = self.store(name, members);
        tracing::debug!(%parent, %handle, route = constraint.route(), "constrained cohort created");
        Ok(handle)
    }

    async fn size(&self, query: &CohortQuery) -> ServiceResult<u64> {
        self.enter(&self.counters.size, "size").await?;
        Ok(self.select(query)?.len() as u64)
    }

    async fn rows(&self, query: &CohortQuery) -> ServiceResult<Vec<Row>> {
        self.enter(&self.counters.rows, "rows").await?;
        Ok(self
            .select(query)?
            .into_iter()
            .filter_map(|idx| self.dataset.rows.get(idx).cloned())
            .collect())
    }

    async fn rename(&self, handle: CohortHandle, name: &str) -> ServiceResult<()> {
        self.enter(&self.counters.rename, "rename").await?;
        let mut cohort = self
            .cohorts
            .get_mut(&handle)
            .ok_or(ServiceError::UnknownHandle(handle))?;
        cohort.name = name.to_string();
        Ok(())
    }
}

/// Canonical text of a present value; `None` for missing
pub(crate) fn canonical(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => n.as_f64().map(format_number),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_missing(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

fn equals_match(value: Option<&Value>, values: &[EqualsValue], numeric_attr: bool) -> bool {
    let same = |v: &Value, s: &crate::graph::Scalar| -> bool {
        if numeric_attr {
            let expected = match s {
                crate::graph::Scalar::Number(n) => Some(*n),
                crate::graph::Scalar::Text(t) => t.trim().parse().ok(),
            };
            matches!((numeric(v), expected), (Some(a), Some(b)) if a == b)
        } else {
            canonical(v).map(|c| c == s.canonical()).unwrap_or(false)
        }
    };
    values.iter().any(|entry| match entry {
        EqualsValue::Missing => is_missing(value),
        EqualsValue::Present => !is_missing(value),
        EqualsValue::Is(s) => value.map(|v| same(v, s)).unwrap_or(false),
        EqualsValue::IsNot(s) => match value {
            Some(v) if !is_missing(Some(v)) => !same(v, s),
            _ => false,
        },
    })
}

fn ranges_match(value: Option<&Value>, ranges: &[NumRange]) -> bool {
    ranges.iter().any(|range| match range {
        NumRange::Missing => is_missing(value),
        NumRange::Between { .. } => value
            .and_then(numeric)
            .map(|n| range.contains(n))
            .unwrap_or(false),
    })
}

/// `treatment` is a list of `{ "agent": .., "regimen": .. }` entries. Agents are grouped per
/// regimen; a regimen matches a combination when its agent set equals it, or contains it when
/// `base_agent` is set. Without a requested regimen any regimen may match.
fn treatment_match(
    value: Option<&Value>,
    base_agent: bool,
    combinations: &[String],
    regimen: Option<u32>,
) -> bool {
    let entries = match value {
        Some(Value::Array(entries)) => entries,
        _ => return false,
    };
    let mut regimens: BTreeMap<u64, BTreeSet<String>> = BTreeMap::new();
    for entry in entries {
        let agent = entry.get("agent").and_then(canonical);
        let number = entry.get("regimen").and_then(numeric).unwrap_or(1.0) as u64;
        if let Some(agent) = agent {
            regimens.entry(number).or_default().insert(agent);
        }
    }
    let wanted: Vec<BTreeSet<String>> = combinations
        .iter()
        .map(|c| c.split(", ").map(str::to_string).collect())
        .collect();
    regimens.iter().any(|(number, present)| {
        let regimen_ok = regimen.map(|r| u64::from(r) == *number).unwrap_or(true);
        let agents_ok = wanted.is_empty()
            || wanted.iter().any(|w| {
                if base_agent {
                    present.is_superset(w)
                } else {
                    present == w
                }
            });
        regimen_ok && agents_ok
    })
}

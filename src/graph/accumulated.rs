//! Accumulated filter: a cohort's cumulative constraints, kept for conflict detection
//!
//! The map-of-maps is keyed by comparison kind and then by attribute. It is not the
//! authority on what the service stored; it only answers "can this cohort still be
//! non-empty?" A merge that leaves an attribute with an impossible range or an empty
//! category set yields `None`, the standing-conflict marker.

use super::constraint::{Limit, NumRange};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Comparison kinds the filter is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Equals,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// Cumulative constraints by comparison kind and attribute
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccumulatedFilter {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub equals: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lt: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lte: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gt: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gte: BTreeMap<String, f64>,
}

impl AccumulatedFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty()
            && self.lt.is_empty()
            && self.lte.is_empty()
            && self.gt.is_empty()
            && self.gte.is_empty()
    }

    /// A filter holding a single categorical constraint
    pub fn with_equals(attribute: impl Into<String>, values: Vec<String>) -> Self {
        let mut f = Self::new();
        f.equals.insert(attribute.into(), values);
        f
    }

    /// A filter holding one comparison on one attribute
    pub fn with_comparison(kind: Comparison, attribute: impl Into<String>, value: f64) -> Self {
        let mut f = Self::new();
        let attribute = attribute.into();
        match kind {
            Comparison::Equals => {
                f.equals.insert(attribute, vec![super::constraint::format_number(value)]);
            }
            Comparison::Lt => {
                f.lt.insert(attribute, value);
            }
            Comparison::Lte => {
                f.lte.insert(attribute, value);
            }
            Comparison::Gt => {
                f.gt.insert(attribute, value);
            }
            Comparison::Gte => {
                f.gte.insert(attribute, value);
            }
        }
        f
    }

    /// A filter holding the bounds of a numeric range. Missing-value ranges contribute nothing.
    pub fn with_range(attribute: impl Into<String>, range: &NumRange) -> Self {
        let mut f = Self::new();
        let attribute = attribute.into();
        if let NumRange::Between { lower, upper } = range {
            if let Some(l) = lower {
                f.set_lower(&attribute, *l);
            }
            if let Some(u) = upper {
                f.set_upper(&attribute, *u);
            }
        }
        f
    }

    /// Effective upper bound on an attribute (tighter of lt/lte)
    pub fn upper(&self, attribute: &str) -> Option<Limit> {
        let lt = self.lt.get(attribute).map(|v| Limit::exclusive(*v));
        let lte = self.lte.get(attribute).map(|v| Limit::inclusive(*v));
        match (lt, lte) {
            (Some(a), Some(b)) => Some(tighter_upper(a, b)),
            (a, b) => a.or(b),
        }
    }

    /// Effective lower bound on an attribute (tighter of gt/gte)
    pub fn lower(&self, attribute: &str) -> Option<Limit> {
        let gt = self.gt.get(attribute).map(|v| Limit::exclusive(*v));
        let gte = self.gte.get(attribute).map(|v| Limit::inclusive(*v));
        match (gt, gte) {
            (Some(a), Some(b)) => Some(tighter_lower(a, b)),
            (a, b) => a.or(b),
        }
    }

    fn set_upper(&mut self, attribute: &str, limit: Limit) {
        self.lt.remove(attribute);
        self.lte.remove(attribute);
        if limit.inclusive {
            self.lte.insert(attribute.to_string(), limit.value);
        } else {
            self.lt.insert(attribute.to_string(), limit.value);
        }
    }

    fn set_lower(&mut self, attribute: &str, limit: Limit) {
        self.gt.remove(attribute);
        self.gte.remove(attribute);
        if limit.inclusive {
            self.gte.insert(attribute.to_string(), limit.value);
        } else {
            self.gt.insert(attribute.to_string(), limit.value);
        }
    }

    fn bounded_attributes(&self) -> BTreeSet<&String> {
        self.lt
            .keys()
            .chain(self.lte.keys())
            .chain(self.gt.keys())
            .chain(self.gte.keys())
            .collect()
    }

    /// Merge `incoming` into this filter.
    ///
    /// Categories intersect (exclusions strike admitted values), bounds of the same direction
    /// keep the tighter one.
    /// Returns `None` when any attribute ends up with no admissible value.
    pub fn merge(&self, incoming: &AccumulatedFilter) -> Option<AccumulatedFilter> {
        let mut merged = self.clone();

        for (attribute, values) in &incoming.equals {
            let next = match merged.equals.get(attribute) {
                Some(existing) => {
                    match CategorySet::parse(existing).intersect(CategorySet::parse(values)) {
                        Some(set) => set.into_values(),
                        None => {
                            tracing::debug!(attribute = %attribute, "category sets are disjoint");
                            return None;
                        }
                    }
                }
                None => values.clone(),
            };
            merged.equals.insert(attribute.clone(), next);
        }

        for attribute in incoming.bounded_attributes() {
            if let Some(candidate) = incoming.upper(attribute) {
                let next = match merged.upper(attribute) {
                    Some(current) => tighter_upper(current, candidate),
                    None => candidate,
                };
                merged.set_upper(attribute, next);
            }
            if let Some(candidate) = incoming.lower(attribute) {
                let next = match merged.lower(attribute) {
                    Some(current) => tighter_lower(current, candidate),
                    None => candidate,
                };
                merged.set_lower(attribute, next);
            }
        }

        for attribute in merged.bounded_attributes() {
            if let (Some(lo), Some(up)) = (merged.lower(attribute), merged.upper(attribute)) {
                let empty = lo.value > up.value
                    || (lo.value == up.value && !(lo.inclusive && up.inclusive));
                if empty {
                    tracing::debug!(attribute = %attribute, "range collapsed to nothing");
                    return None;
                }
            }
        }

        Some(merged)
    }
}

/// Admissible categories of one attribute, read from the `equals` bookkeeping.
///
/// `"v"` and `"null"` admit a value, `"!v"` and `"!null"` exclude one. A list with any
/// exclusion admits everything but the exclusions it does not also admit.
#[derive(Debug, PartialEq)]
enum CategorySet {
    Only(Vec<String>),
    AllExcept(Vec<String>),
}

impl CategorySet {
    fn parse(values: &[String]) -> Self {
        let mut admitted = Vec::new();
        let mut excluded = Vec::new();
        for v in values {
            match v.strip_prefix('!') {
                Some(rest) => excluded.push(rest.to_string()),
                None => admitted.push(v.clone()),
            }
        }
        if excluded.is_empty() {
            CategorySet::Only(admitted)
        } else {
            excluded.retain(|v| !admitted.contains(v));
            CategorySet::AllExcept(excluded)
        }
    }

    /// `None` when no value is admitted by both sides
    fn intersect(self, other: CategorySet) -> Option<CategorySet> {
        let set = match (self, other) {
            (CategorySet::Only(a), CategorySet::Only(b)) => {
                CategorySet::Only(a.into_iter().filter(|v| b.contains(v)).collect())
            }
            (CategorySet::Only(a), CategorySet::AllExcept(e))
            | (CategorySet::AllExcept(e), CategorySet::Only(a)) => {
                CategorySet::Only(a.into_iter().filter(|v| !e.contains(v)).collect())
            }
            (CategorySet::AllExcept(mut a), CategorySet::AllExcept(b)) => {
                for v in b {
                    if !a.contains(&v) {
                        a.push(v);
                    }
                }
                CategorySet::AllExcept(a)
            }
        };
        match &set {
            CategorySet::Only(values) if values.is_empty() => None,
            _ => Some(set),
        }
    }

    fn into_values(self) -> Vec<String> {
        match self {
            CategorySet::Only(values) => values,
            CategorySet::AllExcept(values) => {
                values.into_iter().map(|v| format!("!{}", v)).collect()
            }
        }
    }
}

/// Merge into a possibly-conflicting filter. A standing conflict stays a conflict.
pub fn merge_filters(
    existing: Option<&AccumulatedFilter>,
    incoming: &AccumulatedFilter,
) -> Option<AccumulatedFilter> {
    existing.and_then(|f| f.merge(incoming))
}

fn tighter_upper(a: Limit, b: Limit) -> Limit {
    if a.value < b.value {
        a
    } else if b.value < a.value {
        b
    } else if !a.inclusive {
        a
    } else {
        b
    }
}

fn tighter_lower(a: Limit, b: Limit) -> Limit {
    if a.value > b.value {
        a
    } else if b.value > a.value {
        b
    } else if !a.inclusive {
        a
    } else {
        b
    }
}

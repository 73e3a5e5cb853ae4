//! Attributes and the constraints placed on them
//!
//! An attribute knows which service route its constraints travel on, and whether a
//! constraint on it takes part in accumulated-filter bookkeeping. Plain columns and
//! treatments merge; score and panel attributes carry the parent filter unchanged.

use super::engine::{MaterializeError, MaterializeResult};
use super::labels::constraint_label;
use crate::graph::{
    AccumulatedFilter, ConstraintDescriptor, ConstraintValues, EqualsValue, NumRange, ScoreRef,
};
use serde::{Deserialize, Serialize};

/// Where an attribute's values come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttributeSource {
    /// A column of the entity table
    Column {
        #[serde(default)]
        numeric: bool,
    },
    /// A per-gene score (expression, copy number, mutation, ...)
    GeneScore {
        score: ScoreRef,
        #[serde(default)]
        numeric: bool,
    },
    /// A per-gene depletion score from one screen
    DepletionScore { score: ScoreRef, screen: String },
    /// Membership in named panels
    PanelAnnotation,
    /// Treatment agents per regimen
    Treatment {
        #[serde(default)]
        base_agent: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        regimen: Option<u32>,
    },
}

/// An attribute a cohort can be filtered or split by
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRef {
    pub id: String,
    pub label: String,
    pub source: AttributeSource,
}

impl AttributeRef {
    pub fn column(id: impl Into<String>, label: impl Into<String>, numeric: bool) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            source: AttributeSource::Column { numeric },
        }
    }
}

/// How a constraint affects the accumulated filter of the cohort it produces
#[derive(Debug, Clone, PartialEq)]
pub enum FilterUpdate {
    /// Keep the parent's accumulated filter as is
    Carry,
    /// Merge this filter into the parent's, detecting contradictions
    Merge(AccumulatedFilter),
}

/// One attribute and the values it is constrained to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeConstraint {
    pub attribute: AttributeRef,
    pub values: ConstraintValues,
}

impl AttributeConstraint {
    pub fn new(attribute: AttributeRef, values: ConstraintValues) -> Self {
        Self { attribute, values }
    }

    /// Secondary label of the cohort this constraint produces
    pub fn label(&self) -> String {
        constraint_label(&self.values, &self.attribute.label)
    }

    fn unsupported(&self, reason: &str) -> MaterializeError {
        MaterializeError::Unsupported {
            attribute: self.attribute.id.clone(),
            reason: reason.to_string(),
        }
    }

    /// The service route and payload for this constraint
    pub fn descriptor(&self) -> MaterializeResult<ConstraintDescriptor> {
        let attribute = self.attribute.id.clone();
        Ok(match (&self.attribute.source, &self.values) {
            (AttributeSource::Column { .. }, ConstraintValues::Ranges(ranges)) => {
                ConstraintDescriptor::NumericRange {
                    attribute,
                    ranges: ranges.clone(),
                }
            }
            (AttributeSource::Column { numeric }, ConstraintValues::Equals(values)) => {
                ConstraintDescriptor::CategoricalEquals {
                    attribute,
                    numeric: *numeric,
                    values: values.clone(),
                }
            }
            (AttributeSource::GeneScore { score, .. }, ConstraintValues::Ranges(ranges)) => {
                ConstraintDescriptor::GeneScoreRange {
                    score: score.clone(),
                    ranges: ranges.clone(),
                }
            }
            (AttributeSource::GeneScore { score, numeric }, ConstraintValues::Equals(values)) => {
                ConstraintDescriptor::GeneScoreEquals {
                    score: score.clone(),
                    numeric: *numeric,
                    values: values.clone(),
                }
            }
            (AttributeSource::DepletionScore { score, screen }, ConstraintValues::Ranges(ranges)) => {
                ConstraintDescriptor::DepletionScoreRange {
                    score: score.clone(),
                    screen: screen.clone(),
                    ranges: ranges.clone(),
                }
            }
            (AttributeSource::DepletionScore { .. }, ConstraintValues::Equals(_)) => {
                return Err(self.unsupported("depletion scores only take ranges"))
            }
            (AttributeSource::PanelAnnotation, ConstraintValues::Equals(values)) => {
                ConstraintDescriptor::PanelAnnotation {
                    panel: attribute,
                    values: present_values(values),
                }
            }
            (AttributeSource::PanelAnnotation, ConstraintValues::Ranges(_)) => {
                return Err(self.unsupported("panel annotations only take categories"))
            }
            (
                AttributeSource::Treatment {
                    base_agent,
                    regimen,
                },
                ConstraintValues::Equals(values),
            ) => ConstraintDescriptor::Treatment {
                base_agent: *base_agent,
                agents: present_values(values),
                regimen: *regimen,
            },
            (AttributeSource::Treatment { .. }, ConstraintValues::Ranges(_)) => {
                return Err(self.unsupported("treatments only take agents"))
            }
        })
    }

    /// Plain columns and treatments merge; scores and panels carry the parent filter
    pub fn filter_update(&self) -> FilterUpdate {
        match &self.attribute.source {
            AttributeSource::Column { .. } => match &self.values {
                ConstraintValues::Equals(values) => {
                    FilterUpdate::Merge(AccumulatedFilter::with_equals(
                        self.attribute.id.clone(),
                        filter_values(values),
                    ))
                }
                ConstraintValues::Ranges(ranges) => match hull(ranges) {
                    Some(range) => FilterUpdate::Merge(AccumulatedFilter::with_range(
                        self.attribute.id.clone(),
                        &range,
                    )),
                    None => FilterUpdate::Merge(AccumulatedFilter::new()),
                },
            },
            AttributeSource::Treatment { .. } => match &self.values {
                ConstraintValues::Equals(values) => FilterUpdate::Merge(
                    AccumulatedFilter::with_equals("agent", filter_values(values)),
                ),
                ConstraintValues::Ranges(_) => FilterUpdate::Carry,
            },
            AttributeSource::GeneScore { .. }
            | AttributeSource::DepletionScore { .. }
            | AttributeSource::PanelAnnotation => FilterUpdate::Carry,
        }
    }
}

fn present_values(values: &[EqualsValue]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| match v {
            EqualsValue::Is(s) => Some(s.canonical()),
            _ => None,
        })
        .collect()
}

/// Category values in filter bookkeeping form: `"null"`, `"!null"`, `"!<v>"`, `"<v>"`
fn filter_values(values: &[EqualsValue]) -> Vec<String> {
    values
        .iter()
        .map(|v| match v {
            EqualsValue::Is(s) => s.canonical(),
            EqualsValue::IsNot(s) => format!("!{}", s.canonical()),
            EqualsValue::Missing => "null".to_string(),
            EqualsValue::Present => "!null".to_string(),
        })
        .collect()
}

/// Smallest single range covering every bin, or `None` when a missing-value bin (or an
/// unbounded side) means no bound can be recorded
fn hull(ranges: &[NumRange]) -> Option<NumRange> {
    let mut lower = None;
    let mut upper = None;
    for (i, range) in ranges.iter().enumerate() {
        let (l, u) = match range {
            NumRange::Missing => return None,
            NumRange::Between { lower, upper } => (*lower, *upper),
        };
        if i == 0 {
            lower = l;
            upper = u;
            continue;
        }
        lower = match (lower, l) {
            (Some(a), Some(b)) if b.value < a.value || (b.value == a.value && b.inclusive) => Some(b),
            (Some(a), Some(_)) => Some(a),
            _ => None,
        };
        upper = match (upper, u) {
            (Some(a), Some(b)) if b.value > a.value || (b.value == a.value && b.inclusive) => Some(b),
            (Some(a), Some(_)) => Some(a),
            _ => None,
        };
    }
    if ranges.is_empty() {
        return None;
    }
    Some(NumRange::Between { lower, upper })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Limit;

    fn age() -> AttributeRef {
        AttributeRef::column("age", "Age", true)
    }

    fn gene_score() -> AttributeRef {
        AttributeRef {
            id: "tp53_tpm".into(),
            label: "TP53 Expression".into(),
            source: AttributeSource::GeneScore {
                score: ScoreRef {
                    table: "expression".into(),
                    attribute: "tpm".into(),
                    ensg: "ENSG00000141510".into(),
                },
                numeric: true,
            },
        }
    }

    #[test]
    fn column_ranges_route_to_numeric_range() {
        let c = AttributeConstraint::new(
            age(),
            ConstraintValues::Ranges(vec![NumRange::half_open(40.0, 60.0)]),
        );
        assert_eq!(c.descriptor().unwrap().route(), "range");
        assert_eq!(c.label(), "40 to 60");
    }

    #[test]
    fn panel_ranges_are_unsupported() {
        let panel = AttributeRef {
            id: "panel".into(),
            label: "Panel".into(),
            source: AttributeSource::PanelAnnotation,
        };
        let c = AttributeConstraint::new(panel, ConstraintValues::Ranges(vec![NumRange::at_least(1.0)]));
        assert!(matches!(
            c.descriptor(),
            Err(MaterializeError::Unsupported { .. })
        ));
    }

    #[test]
    fn score_constraints_carry_the_parent_filter() {
        let c = AttributeConstraint::new(
            gene_score(),
            ConstraintValues::Ranges(vec![NumRange::at_least(5.0)]),
        );
        assert_eq!(c.filter_update(), FilterUpdate::Carry);
    }

    #[test]
    fn treatment_merges_as_agent_equals() {
        let treatment = AttributeRef {
            id: "treatment".into(),
            label: "Treatment".into(),
            source: AttributeSource::Treatment {
                base_agent: false,
                regimen: Some(1),
            },
        };
        let c = AttributeConstraint::new(
            treatment,
            ConstraintValues::Equals(vec![EqualsValue::is("Cisplatin")]),
        );
        match c.filter_update() {
            FilterUpdate::Merge(f) => assert_eq!(f.equals["agent"], vec!["Cisplatin".to_string()]),
            FilterUpdate::Carry => panic!("treatment should merge"),
        }
    }

    #[test]
    fn several_range_bins_merge_their_hull() {
        let c = AttributeConstraint::new(
            age(),
            ConstraintValues::Ranges(vec![
                NumRange::half_open(10.0, 20.0),
                NumRange::half_open(30.0, 40.0),
            ]),
        );
        match c.filter_update() {
            FilterUpdate::Merge(f) => {
                assert_eq!(f.lower("age"), Some(Limit::inclusive(10.0)));
                assert_eq!(f.upper("age"), Some(Limit::exclusive(40.0)));
            }
            FilterUpdate::Carry => panic!("column ranges should merge"),
        }
    }

    #[test]
    fn missing_bin_records_no_bound() {
        let c = AttributeConstraint::new(
            age(),
            ConstraintValues::Ranges(vec![NumRange::half_open(10.0, 20.0), NumRange::Missing]),
        );
        assert_eq!(c.filter_update(), FilterUpdate::Merge(AccumulatedFilter::new()));
    }
}

//! Constraint value shapes carried by cohorts and sent to the cohort service

use serde::{Deserialize, Serialize};

/// A single categorical or numeric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

impl Scalar {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Canonical string form, used for matching and for filter bookkeeping
    pub fn canonical(&self) -> String {
        match self {
            Self::Number(n) => format_number(*n),
            Self::Text(s) => s.clone(),
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<f64> for Scalar {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

/// Integers render without a trailing `.0`
pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// One entry of a categorical-equals list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum EqualsValue {
    /// attribute = value
    Is(Scalar),
    /// attribute != value (missing values are excluded too)
    IsNot(Scalar),
    /// attribute is missing
    Missing,
    /// attribute is present
    Present,
}

impl EqualsValue {
    pub fn is(value: impl Into<Scalar>) -> Self {
        Self::Is(value.into())
    }
}

/// One side of a numeric range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    pub value: f64,
    pub inclusive: bool,
}

impl Limit {
    pub fn inclusive(value: f64) -> Self {
        Self { value, inclusive: true }
    }

    pub fn exclusive(value: f64) -> Self {
        Self { value, inclusive: false }
    }
}

/// A numeric range bin, or the bin of rows where the attribute is missing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NumRange {
    Between {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lower: Option<Limit>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        upper: Option<Limit>,
    },
    Missing,
}

impl NumRange {
    /// `[lower, upper)`, the usual histogram bin
    pub fn half_open(lower: f64, upper: f64) -> Self {
        Self::Between {
            lower: Some(Limit::inclusive(lower)),
            upper: Some(Limit::exclusive(upper)),
        }
    }

    /// `[lower, upper]`
    pub fn closed(lower: f64, upper: f64) -> Self {
        Self::Between {
            lower: Some(Limit::inclusive(lower)),
            upper: Some(Limit::inclusive(upper)),
        }
    }

    pub fn at_least(lower: f64) -> Self {
        Self::Between { lower: Some(Limit::inclusive(lower)), upper: None }
    }

    pub fn at_most(upper: f64) -> Self {
        Self::Between { lower: None, upper: Some(Limit::inclusive(upper)) }
    }

    /// Whether a present numeric value falls inside this range
    pub fn contains(&self, value: f64) -> bool {
        match self {
            Self::Missing => false,
            Self::Between { lower, upper } => {
                let above = match lower {
                    Some(l) if l.inclusive => value >= l.value,
                    Some(l) => value > l.value,
                    None => true,
                };
                let below = match upper {
                    Some(u) if u.inclusive => value <= u.value,
                    Some(u) => value < u.value,
                    None => true,
                };
                above && below
            }
        }
    }
}

/// The constraint applied to one attribute: a list of ranges or a list of categories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum ConstraintValues {
    Ranges(Vec<NumRange>),
    Equals(Vec<EqualsValue>),
}

/// Locates a per-gene score column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScoreRef {
    pub table: String,
    pub attribute: String,
    pub ensg: String,
}

/// A constraint as the cohort service understands it, one variant per service route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum ConstraintDescriptor {
    CategoricalEquals {
        attribute: String,
        numeric: bool,
        values: Vec<EqualsValue>,
    },
    NumericRange {
        attribute: String,
        ranges: Vec<NumRange>,
    },
    GeneScoreRange {
        score: ScoreRef,
        ranges: Vec<NumRange>,
    },
    GeneScoreEquals {
        score: ScoreRef,
        numeric: bool,
        values: Vec<EqualsValue>,
    },
    DepletionScoreRange {
        score: ScoreRef,
        screen: String,
        ranges: Vec<NumRange>,
    },
    PanelAnnotation {
        panel: String,
        values: Vec<String>,
    },
    Treatment {
        base_agent: bool,
        /// Agent combinations, each a `", "`-joined list; any combination may match
        agents: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        regimen: Option<u32>,
    },
}

impl ConstraintDescriptor {
    /// Short route name, used in logs
    pub fn route(&self) -> &'static str {
        match self {
            Self::CategoricalEquals { .. } => "equals",
            Self::NumericRange { .. } => "range",
            Self::GeneScoreRange { .. } => "gene-score-range",
            Self::GeneScoreEquals { .. } => "gene-score-equals",
            Self::DepletionScoreRange { .. } => "depletion-score-range",
            Self::PanelAnnotation { .. } => "panel-annotation",
            Self::Treatment { .. } => "treatment",
        }
    }
}

/// The query-time narrowing attached to a virtual clone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter", content = "constraint", rename_all = "snake_case")]
pub enum CloneFilter {
    /// The clone shows its parent's rows unchanged
    None,
    Constraint(ConstraintDescriptor),
}

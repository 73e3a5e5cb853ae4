//! Display labels for attributes and constraints

use crate::graph::{format_number, ConstraintValues, EqualsValue, Limit, NumRange};

/// `"copy_number_class"` -> `"Copy Number Class"`
pub fn nice_name(raw: &str) -> String {
    raw.split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// At most one decimal, trailing zeros dropped
fn short_number(n: f64) -> String {
    let rounded = (n * 10.0).round() / 10.0;
    format_number(rounded)
}

fn lower_label(l: &Limit) -> String {
    let op = if l.inclusive { "\u{2265}" } else { ">" };
    format!("{} {}", op, short_number(l.value))
}

fn upper_label(u: &Limit) -> String {
    let op = if u.inclusive { "\u{2264}" } else { "<" };
    format!("{} {}", op, short_number(u.value))
}

pub fn range_label(range: &NumRange, attribute_label: &str) -> String {
    match range {
        NumRange::Missing => format!("Missing {} Values", attribute_label),
        NumRange::Between {
            lower: Some(l),
            upper: Some(u),
        } => format!("{} to {}", short_number(l.value), short_number(u.value)),
        NumRange::Between {
            lower: Some(l),
            upper: None,
        } => lower_label(l),
        NumRange::Between {
            lower: None,
            upper: Some(u),
        } => upper_label(u),
        NumRange::Between {
            lower: None,
            upper: None,
        } => "All".to_string(),
    }
}

pub fn label_for_categories(values: &[EqualsValue]) -> String {
    values
        .iter()
        .map(|v| match v {
            EqualsValue::Is(s) => nice_name(&s.canonical()),
            EqualsValue::IsNot(s) => format!("Not {}", nice_name(&s.canonical())),
            EqualsValue::Missing => "Missing Values".to_string(),
            EqualsValue::Present => "Any Value".to_string(),
        })
        .collect::<Vec<String>>()
        .join("/")
}

/// Secondary label for a constraint on the attribute labelled `attribute_label`
pub fn constraint_label(values: &ConstraintValues, attribute_label: &str) -> String {
    match values {
        ConstraintValues::Ranges(ranges) => ranges
            .iter()
            .map(|r| range_label(r, attribute_label))
            .collect::<Vec<String>>()
            .join(" / "),
        ConstraintValues::Equals(values) => label_for_categories(values),
    }
}

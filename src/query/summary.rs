//! Plain-text renderings of a lineage: one line per bloodline, or the whole tree

use super::types::Bloodline;
use crate::graph::{Element, ElementId, LineageStore};

/// `"All Patients → Sex → Sex: Male"`
pub fn describe(bloodline: &Bloodline) -> String {
    bloodline.labels_from_root().join(" \u{2192} ")
}

/// Indented tree of a store, starting at its root
#[derive(Debug, Clone, Default)]
pub struct LineageSummary {
    lines: Vec<String>,
}

impl LineageSummary {
    pub fn render(store: &LineageStore) -> Self {
        let mut summary = Self::default();
        if let Some(root) = store.root() {
            summary.walk(store, root, 0);
        }
        summary
    }

    fn walk(&mut self, store: &LineageStore, id: &ElementId, depth: usize) {
        let Some(element) = store.get(id) else {
            return;
        };
        let indent = "  ".repeat(depth);
        let line = match element {
            Element::Cohort(c) => {
                let mut line = format!("{}{} [{}]", indent, c.label(), id);
                if let Some(size) = c.cached_size() {
                    line.push_str(&format!(" n={}", size));
                }
                if c.selected {
                    line.push_str(" *");
                }
                if c.has_filter_conflict() {
                    line.push_str(" (conflict)");
                }
                line
            }
            Element::Task(t) => {
                let mut line = format!("{}{} <{}>", indent, t.label, t.kind);
                if t.preview {
                    line.push_str(" (preview)");
                }
                line
            }
        };
        self.lines.push(line);
        for child in element.children() {
            self.walk(store, child, depth + 1);
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl std::fmt::Display for LineageSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

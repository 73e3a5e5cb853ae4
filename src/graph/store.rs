//! LineageStore: the flat id-keyed arena holding every cohort and task

use super::cohort::Cohort;
use super::element::{Element, ElementId, ElementKind};
use super::task::Task;
use std::collections::HashMap;
use thiserror::Error;

/// Structural rules of the lineage forest
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("root cohort {0} cannot be removed")]
    RemoveRoot(ElementId),

    #[error("cohort {0} still has children")]
    HasChildren(ElementId),

    #[error("a root cohort already exists: {0}")]
    DuplicateRoot(ElementId),

    #[error("no root cohort")]
    MissingRoot,

    #[error("root cohort {0} has parents")]
    RootHasParents(ElementId),

    #[error("{0} must have exactly one parent, a {1}")]
    BadParent(ElementId, ElementKind),

    #[error("task {0} has no outputs")]
    ChildlessTask(ElementId),

    #[error("{from} references missing element {to}")]
    DanglingReference { from: ElementId, to: ElementId },

    #[error("parent chain of {0} does not reach the root")]
    Cycle(ElementId),

    #[error("{parent} and {child} are not linked both ways")]
    OneSidedLink { parent: ElementId, child: ElementId },
}

/// Errors raised by lineage store operations
#[derive(Debug, Error)]
pub enum LineageError {
    #[error("Element not found: {0}")]
    ElementNotFound(ElementId),

    #[error("Element {id} is not a {expected}")]
    WrongKind { id: ElementId, expected: ElementKind },

    #[error("Invariant violation: {0}")]
    InvariantViolation(#[from] Violation),
}

/// Result type for lineage store operations
pub type LineageResult<T> = Result<T, LineageError>;

/// All elements of one dataset selection
///
/// Parents and children are id lists on the elements themselves; the store is the only
/// place that edits them, so both directions stay in step.
#[derive(Debug, Default, Clone)]
pub struct LineageStore {
    elements: HashMap<ElementId, Element>,
    root: Option<ElementId>,
}

impl LineageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted elements, rejecting anything that breaks the tree rules
    pub fn from_elements(elements: impl IntoIterator<Item = Element>) -> LineageResult<Self> {
        let mut store = Self::new();
        for element in elements {
            store.add_element(element)?;
        }
        if let Some(v) = store.validate().into_iter().next() {
            return Err(v.into());
        }
        Ok(store)
    }

    /// Insert an element unless one with the same id exists. Returns whether it was inserted.
    pub fn add_element(&mut self, element: impl Into<Element>) -> LineageResult<bool> {
        let element = element.into();
        let id = element.id().clone();
        if self.elements.contains_key(&id) {
            return Ok(false);
        }
        if let Element::Cohort(c) = &element {
            if c.is_root {
                if let Some(existing) = &self.root {
                    return Err(Violation::DuplicateRoot(existing.clone()).into());
                }
                self.root = Some(id.clone());
            }
        }
        tracing::debug!(id = %id, kind = %element.kind(), "element added");
        self.elements.insert(id, element);
        Ok(true)
    }

    pub fn root(&self) -> Option<&ElementId> {
        self.root.as_ref()
    }

    pub fn get(&self, id: &ElementId) -> Option<&Element> {
        self.elements.get(id)
    }

    pub fn contains(&self, id: &ElementId) -> bool {
        self.elements.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    pub fn cohorts(&self) -> impl Iterator<Item = &Cohort> {
        self.elements.values().filter_map(Element::as_cohort)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.elements.values().filter_map(Element::as_task)
    }

    pub fn cohort(&self, id: &ElementId) -> LineageResult<&Cohort> {
        self.get(id)
            .ok_or_else(|| LineageError::ElementNotFound(id.clone()))?
            .as_cohort()
            .ok_or_else(|| wrong_kind(id, ElementKind::Cohort))
    }

    pub fn cohort_mut(&mut self, id: &ElementId) -> LineageResult<&mut Cohort> {
        self.elements
            .get_mut(id)
            .ok_or_else(|| LineageError::ElementNotFound(id.clone()))?
            .as_cohort_mut()
            .ok_or_else(|| wrong_kind(id, ElementKind::Cohort))
    }

    pub fn task(&self, id: &ElementId) -> LineageResult<&Task> {
        self.get(id)
            .ok_or_else(|| LineageError::ElementNotFound(id.clone()))?
            .as_task()
            .ok_or_else(|| wrong_kind(id, ElementKind::Task))
    }

    pub fn task_mut(&mut self, id: &ElementId) -> LineageResult<&mut Task> {
        self.elements
            .get_mut(id)
            .ok_or_else(|| LineageError::ElementNotFound(id.clone()))?
            .as_task_mut()
            .ok_or_else(|| wrong_kind(id, ElementKind::Task))
    }

    /// Wire `task` between `input` and `outputs`.
    ///
    /// The task gets `input` as its only parent and is appended to the input's children;
    /// each output gets the task as its only parent and is appended to the task's children.
    /// Callers pass only the outputs that should join the graph.
    pub fn link_task_to_cohort(
        &mut self,
        task: &ElementId,
        input: &ElementId,
        outputs: &[ElementId],
    ) -> LineageResult<()> {
        self.task(task)?;
        self.cohort(input)?;
        for output in outputs {
            self.cohort(output)?;
        }

        let input_cohort = self.cohort_mut(input)?;
        if !input_cohort.children.contains(task) {
            input_cohort.children.push(task.clone());
        }
        for output in outputs {
            self.cohort_mut(output)?.parents = vec![task.clone()];
        }
        let t = self.task_mut(task)?;
        t.parents = vec![input.clone()];
        for output in outputs {
            if !t.children.contains(output) {
                t.children.push(output.clone());
            }
        }
        Ok(())
    }

    /// Remove a leaf cohort, pruning its producing task if that leaves the task without outputs.
    ///
    /// Returns the ids removed from the store, the cohort first.
    pub fn remove_leaf_cohort(&mut self, id: &ElementId) -> LineageResult<Vec<ElementId>> {
        let cohort = self.cohort(id)?;
        if cohort.is_root {
            return Err(Violation::RemoveRoot(id.clone()).into());
        }
        if !cohort.children.is_empty() {
            return Err(Violation::HasChildren(id.clone()).into());
        }
        let parent = cohort.parents.first().cloned();

        self.elements.remove(id);
        let mut removed = vec![id.clone()];

        if let Some(task_id) = parent {
            if let Some(element) = self.elements.get_mut(&task_id) {
                element.children_mut().retain(|c| c != id);
                if element.children().is_empty() {
                    self.detach_and_remove_task(&task_id);
                    removed.push(task_id);
                }
            }
        }
        tracing::info!(cohort = %id, removed = removed.len(), "leaf cohort removed");
        Ok(removed)
    }

    /// Remove a task, its outputs and anything below them.
    ///
    /// A task that is already gone is not an error; outputs already removed are skipped.
    pub fn clear_branch(&mut self, task: &ElementId) -> LineageResult<Vec<ElementId>> {
        let outputs = match self.get(task) {
            None => return Ok(Vec::new()),
            Some(Element::Cohort(_)) => return Err(wrong_kind(task, ElementKind::Task)),
            Some(Element::Task(t)) => t.children.clone(),
        };

        let mut removed = Vec::new();
        let mut stack = outputs;
        while let Some(next) = stack.pop() {
            if let Some(element) = self.elements.remove(&next) {
                stack.extend(element.children().iter().cloned());
                removed.push(next);
            }
        }
        self.detach_and_remove_task(task);
        removed.push(task.clone());
        tracing::debug!(task = %task, removed = removed.len(), "branch cleared");
        Ok(removed)
    }

    fn detach_and_remove_task(&mut self, task: &ElementId) {
        if let Some(Element::Task(t)) = self.elements.remove(task) {
            for parent in &t.parents {
                if let Some(p) = self.elements.get_mut(parent) {
                    p.children_mut().retain(|c| c != task);
                }
            }
        }
    }

    /// Check every structural rule, returning all violations found
    pub fn validate(&self) -> Vec<Violation> {
        let mut violations = Vec::new();

        match &self.root {
            None if !self.elements.is_empty() => violations.push(Violation::MissingRoot),
            _ => {}
        }

        for element in self.elements.values() {
            let id = element.id();
            match element {
                Element::Cohort(c) if c.is_root => {
                    if !c.parents.is_empty() {
                        violations.push(Violation::RootHasParents(id.clone()));
                    }
                }
                Element::Cohort(c) => {
                    if !self.single_parent_of_kind(&c.parents, ElementKind::Task) {
                        violations.push(Violation::BadParent(id.clone(), ElementKind::Task));
                    }
                }
                Element::Task(t) => {
                    if !self.single_parent_of_kind(&t.parents, ElementKind::Cohort) {
                        violations.push(Violation::BadParent(id.clone(), ElementKind::Cohort));
                    }
                    if t.children.is_empty() {
                        violations.push(Violation::ChildlessTask(id.clone()));
                    }
                }
            }

            for child in element.children() {
                match self.elements.get(child) {
                    None => violations.push(Violation::DanglingReference {
                        from: id.clone(),
                        to: child.clone(),
                    }),
                    Some(c) if !c.parents().contains(id) => {
                        violations.push(Violation::OneSidedLink {
                            parent: id.clone(),
                            child: child.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }
            for parent in element.parents() {
                match self.elements.get(parent) {
                    None => violations.push(Violation::DanglingReference {
                        from: id.clone(),
                        to: parent.clone(),
                    }),
                    Some(p) if !p.children().contains(id) => {
                        violations.push(Violation::OneSidedLink {
                            parent: parent.clone(),
                            child: id.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }
        violations
    }

    fn single_parent_of_kind(&self, parents: &[ElementId], kind: ElementKind) -> bool {
        match parents {
            [only] => self.get(only).map(|p| p.kind() == kind).unwrap_or(false),
            _ => false,
        }
    }
}

fn wrong_kind(id: &ElementId, expected: ElementKind) -> LineageError {
    LineageError::WrongKind {
        id: id.clone(),
        expected,
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Result of removing a child edge, recorded by the processor after it
/// finishes (or gives up on) a triplet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyOutcome {
    Succeed,
    Fail,
    Retry,
}

struct Inner {
    /// parent key -> set of child keys it is still waiting on.
    children_of: HashMap<String, HashSet<String>>,
    /// parents that have seen at least one `Fail` outcome among their children.
    /// A failed parent must never be processed; its deletion (if any) is skipped.
    failed_parents: HashSet<String>,
}

/// Directed graph from a folder key to the set of child keys whose processing
/// it waits on. The only gate for deletion ordering: a folder deletion triplet
/// is processed only once `is_ready` reports true for it.
///
/// Acyclic by construction — callers only add edges from a folder to an item
/// strictly beneath it, so no cycle detection is needed.
pub struct DependencyGraph {
    inner: Mutex<Inner>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                children_of: HashMap::new(),
                failed_parents: HashSet::new(),
            }),
        }
    }

    /// Inserts an edge. Idempotent.
    pub fn add(&self, parent: &str, child: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .children_of
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string());
    }

    /// Drops one child edge and records the outcome against the parent.
    pub fn remove(&self, parent: &str, child: &str, outcome: DependencyOutcome) {
        let mut inner = self.inner.lock().unwrap();
        Self::remove_locked(&mut inner, parent, child, outcome);
    }

    /// Drops every remaining child edge of `parent`, used when the parent
    /// itself turns out not to need processing (e.g. a tentative parent from
    /// the change-log ingester that never appeared as a change event).
    pub fn remove_all(&self, parent: &str, outcome: DependencyOutcome) {
        let mut inner = self.inner.lock().unwrap();
        let children: Vec<String> = inner
            .children_of
            .get(parent)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for child in children {
            Self::remove_locked(&mut inner, parent, &child, outcome);
        }
    }

    fn remove_locked(inner: &mut Inner, parent: &str, child: &str, outcome: DependencyOutcome) {
        if outcome == DependencyOutcome::Fail {
            inner.failed_parents.insert(parent.to_string());
        }
        if let Some(set) = inner.children_of.get_mut(parent) {
            set.remove(child);
            if set.is_empty() {
                inner.children_of.remove(parent);
            }
        }
    }

    /// The set of child keys `parent` is still waiting on.
    pub fn dependencies_of(&self, parent: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .children_of
            .get(parent)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// True iff `parent` has no outstanding children.
    pub fn is_ready(&self, parent: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .children_of
            .get(parent)
            .map(|set| set.is_empty())
            .unwrap_or(true)
    }

    /// True iff at least one child of `parent` finished with `Fail`. A parent
    /// in this state must be skipped rather than processed.
    pub fn has_failed_dependency(&self, parent: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.failed_parents.contains(parent)
    }

    /// True iff there are no outstanding edges at all. The processor's second
    /// termination condition: no requeued triplet is in flight.
    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.children_of.values().all(|set| set.is_empty())
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

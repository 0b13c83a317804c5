use archi_core::iteration::{Iteration, IterationId};
use tracing::debug;

/// Ordered, id-unique list of iterations plus the user's current selection.
///
/// Most recently completed entries sit at the front. The list only changes
/// through [`HistoryStore::merge`] and [`HistoryStore::replace_all`].
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    entries: Vec<Iteration>,
    selected: Option<IterationId>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new id at the front, or refresh an existing entry in place.
    pub fn merge(&mut self, iteration: Iteration) {
        match self.entries.iter_mut().find(|e| e.id == iteration.id) {
            Some(existing) => {
                if iteration.supersedes(existing) {
                    debug!("Refreshing iteration {} ({})", iteration.id, iteration.status);
                    *existing = iteration;
                }
            }
            None => {
                debug!("Adding iteration {} ({})", iteration.id, iteration.status);
                self.entries.insert(0, iteration);
            }
        }
    }

    /// Swap in a freshly fetched history, keeping the caller's order.
    ///
    /// The selection is left alone even if its id is no longer listed.
    pub fn replace_all(&mut self, iterations: impl IntoIterator<Item = Iteration>) {
        self.entries.clear();
        for iteration in iterations {
            if !self.entries.iter().any(|e| e.id == iteration.id) {
                self.entries.push(iteration);
            }
        }
    }

    /// Select an id, which need not be in the list yet.
    pub fn select(&mut self, id: Option<IterationId>) {
        self.selected = id;
    }

    pub fn selected_id(&self) -> Option<&IterationId> {
        self.selected.as_ref()
    }

    /// The selected iteration, if it is present in the list.
    pub fn selected(&self) -> Option<&Iteration> {
        self.selected.as_ref().and_then(|id| self.get(id))
    }

    pub fn get(&self, id: &IterationId) -> Option<&Iteration> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn entries(&self) -> &[Iteration] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

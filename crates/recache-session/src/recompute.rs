//! Recomputation manager.
//!
//! Keeps, per computed stored field, the records whose value must be
//! recomputed, and the nesting depth of recomputation passes. Only the
//! outermost pass drains the pending sets and finalizes; a compute callback
//! that writes (and thus asks for a recomputation) from inside a pass only
//! adds to the pending sets, which the outer pass picks up.

use parking_lot::Mutex;
use recache_core::{FieldId, RecordId};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
struct State {
    todo: BTreeMap<FieldId, BTreeSet<RecordId>>,
    level: usize,
    finalized: u64,
}

/// Pending recomputations, shared by the scopes of one thread and connection.
#[derive(Debug, Default)]
pub struct Recomputation {
    state: Mutex<State>,
}

impl Recomputation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records to recompute for `field` (possibly empty).
    pub fn pending(&self, field: FieldId) -> BTreeSet<RecordId> {
        self.state
            .lock()
            .todo
            .get(&field)
            .cloned()
            .unwrap_or_default()
    }

    /// Replace the records to recompute for `field`. An empty set removes
    /// the entry.
    pub fn set_pending(&self, field: FieldId, ids: BTreeSet<RecordId>) {
        let mut state = self.state.lock();
        if ids.is_empty() {
            state.todo.remove(&field);
        } else {
            state.todo.insert(field, ids);
        }
    }

    /// Add records to recompute for `field`.
    pub fn todo(&self, field: FieldId, ids: impl IntoIterator<Item = RecordId>) {
        let mut state = self.state.lock();
        let entry = state.todo.entry(field).or_default();
        entry.extend(ids);
        if entry.is_empty() {
            state.todo.remove(&field);
        }
    }

    /// Mark `ids` as recomputed for `field`.
    pub fn done(&self, field: FieldId, ids: &BTreeSet<RecordId>) {
        let mut state = self.state.lock();
        if let Some(entry) = state.todo.get_mut(&field) {
            entry.retain(|id| !ids.contains(id));
            if entry.is_empty() {
                state.todo.remove(&field);
            }
        }
    }

    pub fn is_pending(&self, field: FieldId, id: RecordId) -> bool {
        self.state
            .lock()
            .todo
            .get(&field)
            .is_some_and(|ids| ids.contains(&id))
    }

    /// Fields with pending records, in declaration order.
    pub fn fields(&self) -> Vec<FieldId> {
        self.state.lock().todo.keys().copied().collect()
    }

    /// The first pending field in declaration order, with its records.
    pub fn next_pending(&self) -> Option<(FieldId, BTreeSet<RecordId>)> {
        self.state
            .lock()
            .todo
            .iter()
            .next()
            .map(|(field, ids)| (*field, ids.clone()))
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().todo.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().todo.len()
    }

    /// Enter a recomputation pass. The returned guard exits it on drop.
    pub fn enter_pass(&self) -> RecomputePass<'_> {
        let mut state = self.state.lock();
        state.level += 1;
        RecomputePass {
            manager: self,
            outermost: state.level == 1,
        }
    }

    /// Current nesting depth of passes.
    pub fn level(&self) -> usize {
        self.state.lock().level
    }

    /// Number of outermost passes finalized so far.
    pub fn finalizations(&self) -> u64 {
        self.state.lock().finalized
    }

    fn exit_pass(&self) {
        let mut state = self.state.lock();
        state.level = state.level.saturating_sub(1);
        if state.level == 0 {
            state.finalized += 1;
            tracing::trace!(
                remaining = state.todo.len(),
                finalized = state.finalized,
                "Recomputation pass finalized"
            );
        }
    }
}

/// Guard of one recomputation pass.
#[derive(Debug)]
pub struct RecomputePass<'a> {
    manager: &'a Recomputation,
    outermost: bool,
}

impl RecomputePass<'_> {
    /// Only the outermost pass performs recomputations.
    pub fn is_outermost(&self) -> bool {
        self.outermost
    }
}

impl Drop for RecomputePass<'_> {
    fn drop(&mut self) {
        self.manager.exit_pass();
    }
}

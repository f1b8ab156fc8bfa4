//! Draft mode.
//!
//! In draft mode, field assignments on persisted records only affect the
//! cache. The switch is shared by all the scopes of a thread; nesting is
//! idempotent:
//!
//! ```ignore
//! {
//!     let _draft = scope.draft();
//!     scope.set(&order, "note", "not saved")?;   // cache only
//!     {
//!         let _again = scope.draft();            // still draft
//!     }
//!     assert!(scope.is_draft());
//! }
//! assert!(!scope.is_draft());                    // "note" is read from the store again
//! ```

use crate::scope::Scope;
use parking_lot::Mutex;
use recache_core::{FieldId, ModelId, RecordId};
use std::sync::{Arc, Weak};

/// A value assigned in draft mode and not saved yet.
#[derive(Debug, Clone)]
pub(crate) struct DirtyEntry {
    pub(crate) scope: Weak<Scope>,
    pub(crate) model: ModelId,
    pub(crate) id: RecordId,
    pub(crate) field: FieldId,
}

impl DirtyEntry {
    fn same_slot(&self, other: &DirtyEntry) -> bool {
        self.scope.ptr_eq(&other.scope)
            && self.model == other.model
            && self.id == other.id
            && self.field == other.field
    }
}

#[derive(Debug, Default)]
struct DraftState {
    active: bool,
    dirty: Vec<DirtyEntry>,
}

/// Draft/non-draft mode of a thread.
#[derive(Debug, Default)]
pub struct DraftSwitch {
    state: Mutex<DraftState>,
}

impl DraftSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Switch to draft mode until the guard is dropped.
    pub fn enter(self: &Arc<Self>) -> DraftGuard {
        let mut state = self.state.lock();
        let previous = state.active;
        state.active = true;
        DraftGuard {
            switch: Arc::clone(self),
            previous,
        }
    }

    /// Number of values assigned in draft mode and not saved yet.
    pub fn dirty_len(&self) -> usize {
        self.state.lock().dirty.len()
    }

    pub(crate) fn mark_dirty(&self, entry: DirtyEntry) {
        let mut state = self.state.lock();
        if !state.dirty.iter().any(|e| e.same_slot(&entry)) {
            state.dirty.push(entry);
        }
    }

    /// Remove and return the dirty fields of one record.
    pub(crate) fn take_dirty(&self, model: ModelId, id: RecordId) -> Vec<FieldId> {
        let mut state = self.state.lock();
        let mut fields = Vec::new();
        state.dirty.retain(|entry| {
            if entry.model == model && entry.id == id {
                if !fields.contains(&entry.field) {
                    fields.push(entry.field);
                }
                false
            } else {
                true
            }
        });
        fields
    }

    fn leave(&self, previous: bool) {
        let dirty = {
            let mut state = self.state.lock();
            state.active = previous;
            if previous {
                return;
            }
            std::mem::take(&mut state.dirty)
        };
        if dirty.is_empty() {
            return;
        }
        tracing::debug!(count = dirty.len(), "Leaving draft mode with unsaved values");
        for entry in dirty {
            if let Some(scope) = entry.scope.upgrade() {
                scope.discard_draft(entry.model, entry.id, entry.field);
            }
        }
    }
}

/// Guard returned by [`Scope::draft`]; restores the previous mode on drop.
#[derive(Debug)]
#[must_use = "draft mode ends when the guard is dropped"]
pub struct DraftGuard {
    switch: Arc<DraftSwitch>,
    previous: bool,
}

impl Drop for DraftGuard {
    fn drop(&mut self) {
        self.switch.leave(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: RecordId, field: u32) -> DirtyEntry {
        DirtyEntry {
            scope: Weak::new(),
            model: ModelId(0),
            id,
            field: FieldId(field),
        }
    }

    #[test]
    fn test_nesting_is_idempotent() {
        let switch = Arc::new(DraftSwitch::new());
        assert!(!switch.is_active());
        {
            let _outer = switch.enter();
            assert!(switch.is_active());
            {
                let _inner = switch.enter();
                assert!(switch.is_active());
            }
            assert!(switch.is_active());
        }
        assert!(!switch.is_active());
    }

    #[test]
    fn test_dirty_set_cleared_on_return_to_clean_state() {
        let switch = Arc::new(DraftSwitch::new());
        {
            let _outer = switch.enter();
            switch.mark_dirty(entry(1, 0));
            {
                let _inner = switch.enter();
                switch.mark_dirty(entry(1, 0));
                switch.mark_dirty(entry(2, 0));
            }
            assert_eq!(switch.dirty_len(), 2);
        }
        assert_eq!(switch.dirty_len(), 0);
    }

    #[test]
    fn test_take_dirty_for_one_record() {
        let switch = Arc::new(DraftSwitch::new());
        let _draft = switch.enter();
        switch.mark_dirty(entry(1, 0));
        switch.mark_dirty(entry(1, 3));
        switch.mark_dirty(entry(2, 0));
        assert_eq!(switch.take_dirty(ModelId(0), 1), vec![FieldId(0), FieldId(3)]);
        assert_eq!(switch.dirty_len(), 1);
    }
}

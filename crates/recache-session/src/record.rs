//! Record handles.
//!
//! A [`Record`] names one record of one model: either a persisted id, or an
//! unsaved record whose field cache is owned by the handle itself (it is
//! never stored in a scope cache). [`Records`] is an ordered set of handles
//! of one model.

use crate::cache::RecordCache;
use parking_lot::Mutex;
use recache_core::{FieldId, ModelId, NEW_ID, RecordId};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEW_RECORD_SERIAL: AtomicU64 = AtomicU64::new(1);

/// An unsaved record: its cache lives in the handle.
#[derive(Clone)]
pub struct NewRecord {
    serial: u64,
    pub(crate) cache: Arc<Mutex<RecordCache>>,
    /// Fields explicitly assigned, in assignment order
    assigned: Arc<Mutex<Vec<FieldId>>>,
}

impl NewRecord {
    pub(crate) fn new() -> Self {
        Self {
            serial: NEW_RECORD_SERIAL.fetch_add(1, Ordering::Relaxed),
            cache: Arc::new(Mutex::new(RecordCache::default())),
            assigned: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Process-unique number identifying the unsaved record.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub(crate) fn mark_assigned(&self, field: FieldId) {
        let mut assigned = self.assigned.lock();
        if !assigned.contains(&field) {
            assigned.push(field);
        }
    }

    /// Fields assigned so far; these are the values a save sends.
    pub fn assigned(&self) -> Vec<FieldId> {
        self.assigned.lock().clone()
    }
}

impl PartialEq for NewRecord {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cache, &other.cache)
    }
}

impl Eq for NewRecord {}

impl fmt::Debug for NewRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NewRecord({})", self.serial)
    }
}

/// Identity of a record inside its model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKey {
    Id(RecordId),
    New(NewRecord),
}

impl RecordKey {
    pub fn id(&self) -> RecordId {
        match self {
            RecordKey::Id(id) => *id,
            RecordKey::New(_) => NEW_ID,
        }
    }
}

/// Handle on a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub(crate) model: ModelId,
    pub(crate) key: RecordKey,
}

impl Record {
    pub fn new(model: ModelId, id: RecordId) -> Self {
        Self {
            model,
            key: RecordKey::Id(id),
        }
    }

    pub(crate) fn unsaved(model: ModelId) -> Self {
        Self {
            model,
            key: RecordKey::New(NewRecord::new()),
        }
    }

    pub fn model(&self) -> ModelId {
        self.model
    }

    /// Database id, or `0` for an unsaved record.
    pub fn id(&self) -> RecordId {
        self.key.id()
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn is_new(&self) -> bool {
        matches!(self.key, RecordKey::New(_))
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            RecordKey::Id(id) => write!(f, "{}({})", self.model, id),
            RecordKey::New(new) => write!(f, "{}(new#{})", self.model, new.serial),
        }
    }
}

/// An ordered, duplicate-free collection of records of one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Records {
    pub(crate) model: ModelId,
    pub(crate) keys: Vec<RecordKey>,
}

impl Records {
    pub fn empty(model: ModelId) -> Self {
        Self {
            model,
            keys: Vec::new(),
        }
    }

    /// Records for persisted ids; duplicates and the unsaved id are dropped.
    pub fn from_ids(model: ModelId, ids: impl IntoIterator<Item = RecordId>) -> Self {
        let mut records = Self::empty(model);
        for id in ids {
            if id != NEW_ID {
                records.push(RecordKey::Id(id));
            }
        }
        records
    }

    pub fn model(&self) -> ModelId {
        self.model
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Ids of the persisted records.
    pub fn ids(&self) -> Vec<RecordId> {
        self.keys
            .iter()
            .filter_map(|key| match key {
                RecordKey::Id(id) => Some(*id),
                RecordKey::New(_) => None,
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = Record> + '_ {
        self.keys.iter().map(|key| Record {
            model: self.model,
            key: key.clone(),
        })
    }

    pub fn first(&self) -> Option<Record> {
        self.iter().next()
    }

    pub fn contains(&self, record: &Record) -> bool {
        record.model == self.model && self.keys.contains(&record.key)
    }

    /// Append a record unless it is already present.
    pub fn push(&mut self, key: RecordKey) {
        if !self.keys.contains(&key) {
            self.keys.push(key);
        }
    }

    /// Union of both collections, keeping order of first appearance.
    #[must_use]
    pub fn union(mut self, other: &Records) -> Self {
        for key in &other.keys {
            self.push(key.clone());
        }
        self
    }
}

impl From<Record> for Records {
    fn from(record: Record) -> Self {
        Self {
            model: record.model,
            keys: vec![record.key],
        }
    }
}

impl From<&Record> for Records {
    fn from(record: &Record) -> Self {
        Self::from(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_ids_drops_duplicates_and_new_id() {
        let records = Records::from_ids(ModelId(0), [3, 1, 3, 0]);
        assert_eq!(records.ids(), vec![3, 1]);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn unsaved_records_compare_by_handle() {
        let a = Record::unsaved(ModelId(0));
        let b = Record::unsaved(ModelId(0));
        assert!(a.is_new());
        assert_eq!(a.id(), NEW_ID);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());

        let records = Records::from(a.clone()).union(&Records::from(b.clone()));
        assert!(records.contains(&a));
        assert!(records.contains(&b));
        assert!(records.ids().is_empty());
    }

    #[test]
    fn assigned_fields_are_shared_by_clones() {
        let record = Record::unsaved(ModelId(0));
        let RecordKey::New(new) = record.key().clone() else {
            panic!("expected an unsaved record");
        };
        new.mark_assigned(FieldId(2));
        new.mark_assigned(FieldId(1));
        new.mark_assigned(FieldId(2));
        let RecordKey::New(same) = record.key() else {
            panic!("expected an unsaved record");
        };
        assert_eq!(same.assigned(), vec![FieldId(2), FieldId(1)]);
    }

    #[test]
    fn display() {
        assert_eq!(Record::new(ModelId(2), 7).to_string(), "model#2(7)");
    }
}

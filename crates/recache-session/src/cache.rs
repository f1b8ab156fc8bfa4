//! The record cache.
//!
//! Nested maps indexed by model, record id and field:
//!
//! ```text
//! Cache ── ModelCache (per model) ── RecordCache (per id) ── Slot (per field)
//! ```
//!
//! A slot is more than a value: it also tells the engine how the field must
//! be read. Only [`Slot::Value`] is trusted by a plain read; every other
//! state sends the read back to the engine.

use recache_core::{FieldId, ModelId, NEW_ID, RecordId, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Cached state of one field on one record.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Slot {
    /// Nothing known: read-through or compute on access.
    #[default]
    Empty,
    /// The field is known to hold its null value.
    Null,
    Value(Value),
    /// Being computed for this record alone; reading it again is a cycle.
    Busy { recompute: bool },
    /// Being computed as part of a batch; reading it computes this record
    /// on its own.
    BatchPending { recompute: bool },
}

impl Slot {
    pub fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Slot::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Whether a compute pass marked this slot and has not assigned it yet.
    pub fn is_computing(&self) -> bool {
        matches!(self, Slot::Busy { .. } | Slot::BatchPending { .. })
    }
}

/// Slots of one record.
#[derive(Debug, Clone, Default)]
pub struct RecordCache {
    slots: HashMap<FieldId, Slot>,
}

impl RecordCache {
    /// Current slot of `field` (`Empty` when never touched).
    pub fn get(&self, field: FieldId) -> Slot {
        self.slots.get(&field).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, field: FieldId, slot: Slot) {
        if slot.is_empty() {
            self.slots.remove(&field);
        } else {
            self.slots.insert(field, slot);
        }
    }

    /// Drop the slot of `field`, returning its value if it held one.
    pub fn pop(&mut self, field: FieldId) -> Option<Value> {
        match self.slots.remove(&field) {
            Some(Slot::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Whether `field` holds a trusted value.
    pub fn contains(&self, field: FieldId) -> bool {
        matches!(self.slots.get(&field), Some(Slot::Value(_)))
    }

    /// Trusted values, by field.
    pub fn values(&self) -> impl Iterator<Item = (FieldId, &Value)> {
        self.slots
            .iter()
            .filter_map(|(field, slot)| slot.value().map(|v| (*field, v)))
    }

    pub fn dump(&self) -> BTreeMap<FieldId, Value> {
        self.values().map(|(f, v)| (f, v.clone())).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Record caches of one model, plus the set of fields present somewhere in
/// them. Only records with an id are retained.
#[derive(Debug, Clone, Default)]
pub struct ModelCache {
    records: BTreeMap<RecordId, RecordCache>,
    fields: HashSet<FieldId>,
}

impl ModelCache {
    pub fn get(&self, id: RecordId) -> Option<&RecordCache> {
        self.records.get(&id)
    }

    /// Record cache of `id`, created on first touch. Returns `None` for
    /// the unsaved id, which is never retained here.
    pub fn record_mut(&mut self, id: RecordId) -> Option<&mut RecordCache> {
        if id == NEW_ID {
            return None;
        }
        Some(self.records.entry(id).or_default())
    }

    pub fn slot(&self, id: RecordId, field: FieldId) -> Slot {
        self.records
            .get(&id)
            .map(|record| record.get(field))
            .unwrap_or_default()
    }

    pub fn set_slot(&mut self, id: RecordId, field: FieldId, slot: Slot) {
        let present = !slot.is_empty();
        if let Some(record) = self.record_mut(id) {
            record.set(field, slot);
            if present {
                self.fields.insert(field);
            }
        }
    }

    /// Ids of the cached records whose slot for `field` is empty.
    pub fn without_field(&self, field: FieldId) -> Vec<RecordId> {
        self.records
            .iter()
            .filter(|(_, record)| record.get(field).is_empty())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.records.keys().copied()
    }

    pub fn has_field(&self, field: FieldId) -> bool {
        self.fields.contains(&field)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dump(&self) -> BTreeMap<RecordId, BTreeMap<FieldId, Value>> {
        self.records
            .iter()
            .map(|(id, record)| (*id, record.dump()))
            .collect()
    }
}

/// Per-scope cache of every model.
#[derive(Debug, Clone, Default)]
pub struct Cache {
    models: HashMap<ModelId, ModelCache>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(&self, model: ModelId) -> Option<&ModelCache> {
        self.models.get(&model)
    }

    /// Model cache, created on first touch.
    pub fn model_mut(&mut self, model: ModelId) -> &mut ModelCache {
        self.models.entry(model).or_default()
    }

    pub fn slot(&self, model: ModelId, id: RecordId, field: FieldId) -> Slot {
        self.models
            .get(&model)
            .map(|cache| cache.slot(id, field))
            .unwrap_or_default()
    }

    pub fn set_slot(&mut self, model: ModelId, id: RecordId, field: FieldId, slot: Slot) {
        self.model_mut(model).set_slot(id, field, slot);
    }

    /// Make sure a record cache exists for each id.
    pub fn touch(&mut self, model: ModelId, ids: &[RecordId]) {
        let cache = self.model_mut(model);
        for id in ids {
            cache.record_mut(*id);
        }
    }

    /// Send `field` back to `Empty`, for `ids` or, with `None`, for every
    /// record of the model. Nothing happens when the field is not present
    /// in the model cache.
    pub fn invalidate(&mut self, model: ModelId, field: FieldId, ids: Option<&[RecordId]>) {
        let Some(cache) = self.models.get_mut(&model) else {
            return;
        };
        if !cache.fields.contains(&field) {
            return;
        }
        match ids {
            None => {
                cache.fields.remove(&field);
                for record in cache.records.values_mut() {
                    record.pop(field);
                }
            }
            Some(ids) => {
                for id in ids {
                    if let Some(record) = cache.records.get_mut(id) {
                        record.pop(field);
                    }
                }
            }
        }
    }

    /// Empty every record cache. Record caches themselves are kept.
    pub fn invalidate_all(&mut self) {
        for cache in self.models.values_mut() {
            cache.fields.clear();
            for record in cache.records.values_mut() {
                record.clear();
            }
        }
    }

    pub fn dump(&self) -> BTreeMap<ModelId, BTreeMap<RecordId, BTreeMap<FieldId, Value>>> {
        self.models
            .iter()
            .map(|(model, cache)| (*model, cache.dump()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: ModelId = ModelId(0);
    const A: FieldId = FieldId(0);
    const B: FieldId = FieldId(1);

    #[test]
    fn empty_slots_are_not_retained() {
        let mut record = RecordCache::default();
        record.set(A, Slot::Value(Value::BigInt(1)));
        record.set(B, Slot::Null);
        assert_eq!(record.len(), 2);
        record.set(B, Slot::Empty);
        assert_eq!(record.len(), 1);
        assert!(record.contains(A));
        assert!(!record.contains(B));
        assert_eq!(record.pop(A), Some(Value::BigInt(1)));
        assert!(record.is_empty());
    }

    #[test]
    fn unsaved_id_is_never_cached() {
        let mut cache = Cache::new();
        cache.set_slot(M, NEW_ID, A, Slot::Value(Value::BigInt(1)));
        assert!(cache.model(M).unwrap().is_empty());
        assert!(cache.slot(M, NEW_ID, A).is_empty());
    }

    #[test]
    fn invalidate_ids_only_touches_those_records() {
        let mut cache = Cache::new();
        cache.set_slot(M, 1, A, Slot::Value(Value::BigInt(1)));
        cache.set_slot(M, 2, A, Slot::Value(Value::BigInt(2)));
        cache.invalidate(M, A, Some(&[1]));
        assert!(cache.slot(M, 1, A).is_empty());
        assert_eq!(cache.slot(M, 2, A), Slot::Value(Value::BigInt(2)));
        assert!(cache.model(M).unwrap().has_field(A));
    }

    #[test]
    fn invalidate_none_clears_model_wide() {
        let mut cache = Cache::new();
        cache.set_slot(M, 1, A, Slot::Value(Value::BigInt(1)));
        cache.set_slot(M, 2, A, Slot::Busy { recompute: false });
        cache.set_slot(M, 2, B, Slot::Value(Value::BigInt(5)));
        cache.invalidate(M, A, None);
        assert!(cache.slot(M, 1, A).is_empty());
        assert!(cache.slot(M, 2, A).is_empty());
        assert!(!cache.model(M).unwrap().has_field(A));
        assert_eq!(cache.slot(M, 2, B), Slot::Value(Value::BigInt(5)));
    }

    #[test]
    fn without_field_lists_empty_slots() {
        let mut cache = Cache::new();
        cache.touch(M, &[1, 2, 3]);
        cache.set_slot(M, 2, A, Slot::Value(Value::Null));
        cache.set_slot(M, 3, A, Slot::BatchPending { recompute: false });
        assert_eq!(cache.model(M).unwrap().without_field(A), vec![1]);
    }

    #[test]
    fn invalidate_all_keeps_record_caches() {
        let mut cache = Cache::new();
        cache.set_slot(M, 1, A, Slot::Value(Value::BigInt(1)));
        cache.invalidate_all();
        let model = cache.model(M).unwrap();
        assert_eq!(model.len(), 1);
        assert!(!model.has_field(A));
        assert!(cache.dump()[&M][&1].is_empty());
    }
}

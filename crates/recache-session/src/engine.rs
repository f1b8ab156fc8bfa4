//! Cache/slot engine.
//!
//! Field reads dispatch on the current [`Slot`]; field writes go through the
//! store (or stay in the cache in draft mode) and then run the modification
//! protocol, which invalidates and schedules the dependents registered as
//! triggers on the written field.

use crate::cache::Slot;
use crate::draft::DirtyEntry;
use crate::field::{FieldDescriptor, FieldKind, Trigger};
use crate::record::{Record, RecordKey, Records};
use crate::scope::{Scope, live};
use recache_core::{
    AccessError, Domain, Error, FieldId, LookupError, ModelId, RecordId, ReentrancyError, Result,
    TypeError, UnassignedError, Value, Values,
};
use std::collections::BTreeSet;

/// Bound on slot transitions during one read. A compute that keeps
/// leaving its slot unassigned is reported instead of retried forever.
const MAX_READ_ATTEMPTS: usize = 3;

// ============================================================================
// Value normalization
// ============================================================================

/// Bring a value to the cache representation of `field`: relational values
/// become `Value::Records`, a many2one given as a bare id included.
#[allow(clippy::result_large_err)]
pub(crate) fn normalize(field: &FieldDescriptor, value: Value) -> Result<Value> {
    let mismatch = |expected: &'static str, actual: &Value| {
        Error::Type(TypeError {
            expected,
            actual: actual.type_name().to_string(),
            field: Some(field.to_string()),
        })
    };
    match field.kind() {
        FieldKind::Many2one { .. } => match value {
            Value::Null | Value::BigInt(0) => Ok(Value::Records(Vec::new())),
            Value::BigInt(id) => Ok(Value::Records(vec![id])),
            Value::Records(ids) if ids.len() <= 1 => Ok(Value::Records(ids)),
            Value::Records(ids) => Err(Error::Type(TypeError {
                expected: "at most one record",
                actual: format!("{} records", ids.len()),
                field: Some(field.to_string()),
            })),
            other => Err(mismatch("RECORDS", &other)),
        },
        FieldKind::One2many { .. } | FieldKind::Many2many { .. } => match value {
            Value::Null => Ok(Value::Records(Vec::new())),
            Value::Records(ids) => {
                let mut unique = Vec::with_capacity(ids.len());
                for id in ids {
                    if !unique.contains(&id) {
                        unique.push(id);
                    }
                }
                Ok(Value::Records(unique))
            }
            other => Err(mismatch("RECORDS", &other)),
        },
        _ => Ok(value),
    }
}

fn slot_for(value: Value) -> Slot {
    if value.is_null() {
        Slot::Null
    } else {
        Slot::Value(value)
    }
}

// ============================================================================
// Records and slots
// ============================================================================

impl Scope {
    /// Records of `model` for `ids`. Their record caches are created, so a
    /// later read-through fetches them together.
    #[allow(clippy::result_large_err)]
    pub fn browse(&self, model: &str, ids: impl IntoIterator<Item = RecordId>) -> Result<Records> {
        let model = self.registry().model_id(model)?;
        Ok(self.browse_model(model, ids))
    }

    pub fn browse_model(&self, model: ModelId, ids: impl IntoIterator<Item = RecordId>) -> Records {
        let records = Records::from_ids(model, ids);
        self.cache.lock().touch(model, &records.ids());
        records
    }

    #[allow(clippy::result_large_err)]
    pub fn record(&self, model: &str, id: RecordId) -> Result<Record> {
        let model = self.registry().model_id(model)?;
        self.cache.lock().touch(model, &[id]);
        Ok(Record::new(model, id))
    }

    /// A record that does not exist in the store yet. Its values live in
    /// the handle until [`Scope::save`].
    #[allow(clippy::result_large_err)]
    pub fn new_record(&self, model: &str) -> Result<Record> {
        let model = self.registry().model_id(model)?;
        Ok(Record::unsaved(model))
    }

    pub(crate) fn slot(&self, record: &Record, field: FieldId) -> Slot {
        match &record.key {
            RecordKey::Id(id) => self.cache.lock().slot(record.model, *id, field),
            RecordKey::New(new) => new.cache.lock().get(field),
        }
    }

    pub(crate) fn put_slot(&self, record: &Record, field: FieldId, slot: Slot) {
        match &record.key {
            RecordKey::Id(id) => self.cache.lock().set_slot(record.model, *id, field, slot),
            RecordKey::New(new) => new.cache.lock().set(field, slot),
        }
    }

    #[allow(clippy::result_large_err)]
    fn field_of(&self, model: ModelId, name: &str) -> Result<&FieldDescriptor> {
        let registry = self.registry();
        Ok(registry.field(registry.field_id(model, name)?))
    }

    /// `field`, provided it belongs to the model of `record`.
    #[allow(clippy::result_large_err)]
    fn field_on(&self, record: &Record, field: FieldId) -> Result<&FieldDescriptor> {
        let registry = self.registry();
        let descriptor = registry.field(field);
        if descriptor.model() != record.model {
            return Err(Error::Lookup(LookupError {
                model: registry.model(record.model).name().to_string(),
                field: Some(descriptor.to_string()),
            }));
        }
        Ok(descriptor)
    }

    #[allow(clippy::result_large_err)]
    fn resolve_values(&self, model: ModelId, values: &[(&str, Value)]) -> Result<Vec<(FieldId, Value)>> {
        values
            .iter()
            .map(|(name, value)| {
                let field = self.field_of(model, name)?;
                Ok((field.id(), normalize(field, value.clone())?))
            })
            .collect()
    }
}

// ============================================================================
// Reads
// ============================================================================

impl Scope {
    /// Value of the field `name` on `record`.
    #[allow(clippy::result_large_err)]
    pub fn get(&self, record: &Record, name: &str) -> Result<Value> {
        let field = self.field_of(record.model, name)?.id();
        self.get_field(record, field)
    }

    /// Value of `field` on `record`, reading through or computing it when
    /// the slot does not hold a value.
    #[allow(clippy::result_large_err)]
    pub fn get_field(&self, record: &Record, field: FieldId) -> Result<Value> {
        let descriptor = self.field_on(record, field)?;
        for _ in 0..MAX_READ_ATTEMPTS {
            match self.slot(record, field) {
                Slot::Value(value) => return Ok(value),
                Slot::Null => return Ok(descriptor.null_value()),
                Slot::Busy { .. } => {
                    tracing::warn!(field = %descriptor, record = %record, "Reentrant field access");
                    return Err(Error::Reentrancy(ReentrancyError {
                        model: descriptor.model_name().to_string(),
                        field: descriptor.name().to_string(),
                        id: Some(record.id()),
                    }));
                }
                Slot::BatchPending { recompute } => {
                    self.compute_value(&Records::from(record), descriptor, Some(recompute))?;
                }
                Slot::Empty => self.determine_value(record, descriptor)?,
            }
        }
        Err(Error::Unassigned(UnassignedError {
            model: descriptor.model_name().to_string(),
            field: descriptor.name().to_string(),
            id: Some(record.id()),
        }))
    }

    /// Records a relational field points to.
    #[allow(clippy::result_large_err)]
    pub fn relation(&self, record: &Record, name: &str) -> Result<Records> {
        let field = self.field_of(record.model, name)?;
        self.related_records(record, field)
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn related_records(&self, record: &Record, field: &FieldDescriptor) -> Result<Records> {
        let Some(comodel) = field.comodel_id() else {
            return Err(Error::Type(TypeError {
                expected: "relational field",
                actual: field.kind().type_name().to_string(),
                field: Some(field.to_string()),
            }));
        };
        let value = self.get_field(record, field.id())?;
        let ids = value.as_ids().ok_or_else(|| {
            Error::Type(TypeError {
                expected: "RECORDS",
                actual: value.type_name().to_string(),
                field: Some(field.to_string()),
            })
        })?;
        Ok(self.browse_model(comodel, ids.iter().copied()))
    }

    /// Fill an empty slot of `field` on `record`.
    #[allow(clippy::result_large_err)]
    fn determine_value(&self, record: &Record, field: &FieldDescriptor) -> Result<()> {
        if record.is_new() {
            return self.determine_default(record, field);
        }
        let id = record.id();
        if field.is_stored() {
            if self.recomputation.is_pending(field.id(), id) {
                let pending = self.recomputation.pending(field.id());
                return self.compute_pending(field, &pending);
            }
            return self.read_value(record, field);
        }
        if !field.is_computed() {
            self.put_slot(record, field.id(), Slot::Null);
            return Ok(());
        }
        // compute for every cached sibling still lacking the value
        let siblings = {
            let cache = self.cache.lock();
            cache
                .model(field.model())
                .map(|model| model.without_field(field.id()))
                .unwrap_or_default()
        };
        let records = Records::from(record).union(&Records::from_ids(field.model(), siblings));
        self.compute_value(&records, field, None)
    }

    /// Unsaved records get the declared default, or the null value, and
    /// computed fields are then computed on the record.
    #[allow(clippy::result_large_err)]
    fn determine_default(&self, record: &Record, field: &FieldDescriptor) -> Result<()> {
        let value = match field.default_value() {
            Some(value) => normalize(field, value.clone())?,
            None => field.null_value(),
        };
        self.put_slot(record, field.id(), slot_for(value));
        if field.is_computed() {
            self.compute_value(&Records::from(record), field, None)?;
        }
        Ok(())
    }

    /// Read-through of a stored field.
    #[allow(clippy::result_large_err)]
    fn read_value(&self, record: &Record, field: &FieldDescriptor) -> Result<()> {
        let registry = self.registry();
        let model = registry.model(field.model());
        let id = record.id();

        let mut fields = vec![field];
        let mut ids = vec![id];
        if self.config().prefetch && field.is_prefetchable() {
            fields.extend(
                model
                    .fields()
                    .iter()
                    .map(|f| registry.field(*f))
                    .filter(|f| f.id() != field.id() && f.is_prefetchable()),
            );
            let siblings = {
                let cache = self.cache.lock();
                cache
                    .model(field.model())
                    .map(|m| m.without_field(field.id()))
                    .unwrap_or_default()
            };
            ids.extend(siblings.into_iter().filter(|other| *other != id));
        }
        // values about to be recomputed must not be fetched
        fields.retain(|f| !self.recomputation.is_pending(f.id(), id));
        ids.retain(|other| !self.recomputation.is_pending(field.id(), *other));
        let pending: Vec<(FieldId, BTreeSet<RecordId>)> = fields
            .iter()
            .map(|f| (f.id(), self.recomputation.pending(f.id())))
            .collect();

        let names: Vec<&str> = fields.iter().map(|f| f.name()).collect();
        tracing::debug!(
            model = model.name(),
            field = field.name(),
            count = ids.len(),
            fields = names.len(),
            "Store read"
        );
        let rows = self
            .store()
            .read(&self.store_context(), model.name(), &ids, &names)?;

        let mut normalized = Vec::with_capacity(rows.len() * fields.len());
        for row in &rows {
            for (f, (_, pending_ids)) in fields.iter().zip(&pending) {
                if pending_ids.contains(&row.id) {
                    continue;
                }
                let value = row.get(f.name()).cloned().unwrap_or(Value::Null);
                normalized.push((row.id, f.id(), normalize(f, value)?));
            }
        }
        {
            let mut cache = self.cache.lock();
            for (row_id, f, value) in normalized {
                if cache.slot(field.model(), row_id, f).is_empty() {
                    cache.set_slot(field.model(), row_id, f, slot_for(value));
                }
            }
        }

        if self.slot(record, field.id()).is_empty() {
            tracing::warn!(model = model.name(), id, field = field.name(), "Record not returned by the store");
            return Err(Error::Access(AccessError {
                model: model.name().to_string(),
                field: Some(field.name().to_string()),
                ids: vec![id],
                message: "the store did not return the record".to_string(),
            }));
        }
        Ok(())
    }

    /// Run the compute hook of `field` on `records`.
    ///
    /// The slots are marked `Busy` (single record) or `BatchPending`
    /// (several) while the hook runs. Slots the hook leaves marked are reset
    /// to `Empty`, whether it failed or returned without assigning them.
    #[allow(clippy::result_large_err)]
    pub(crate) fn compute_value(
        &self,
        records: &Records,
        field: &FieldDescriptor,
        recompute: Option<bool>,
    ) -> Result<()> {
        let Some(hook) = field.compute() else {
            return Err(Error::Custom(format!("field {field} has no compute")));
        };
        let recompute = recompute.unwrap_or(false);
        let marker = if records.len() == 1 {
            Slot::Busy { recompute }
        } else {
            Slot::BatchPending { recompute }
        };
        for record in records.iter() {
            self.put_slot(&record, field.id(), marker.clone());
        }
        tracing::debug!(field = %field, count = records.len(), recompute, "Compute pass");

        let result = hook.call(self, field, records);

        let mut unassigned = None;
        for record in records.iter() {
            if self.slot(&record, field.id()).is_computing() {
                self.put_slot(&record, field.id(), Slot::Empty);
                unassigned.get_or_insert(record.id());
            }
        }
        result?;
        match unassigned {
            Some(id) => Err(Error::Unassigned(UnassignedError {
                model: field.model_name().to_string(),
                field: field.name().to_string(),
                id: Some(id),
            })),
            None => Ok(()),
        }
    }

    /// Compute a stored field for pending records. Records whose value was
    /// assigned (and not invalidated again meanwhile) are marked done.
    ///
    /// In draft mode the values only reach the cache and stay pending.
    #[allow(clippy::result_large_err)]
    fn compute_pending(&self, field: &FieldDescriptor, ids: &BTreeSet<RecordId>) -> Result<()> {
        let records = self.browse_model(field.model(), ids.iter().copied());
        let recompute = !self.is_draft();
        self.compute_value(&records, field, Some(recompute))?;
        if recompute {
            let settled: BTreeSet<RecordId> = {
                let cache = self.cache.lock();
                ids.iter()
                    .copied()
                    .filter(|id| !cache.slot(field.model(), *id, field.id()).is_empty())
                    .collect()
            };
            self.recomputation.done(field.id(), &settled);
        }
        Ok(())
    }

    /// Recompute every pending stored field, in declaration order. Only the
    /// outermost call does the work; nested calls return at once and leave
    /// what they scheduled to it.
    #[tracing::instrument(level = "debug", skip(self))]
    #[allow(clippy::result_large_err)]
    pub fn recompute(&self) -> Result<()> {
        if self.is_draft() {
            return Ok(());
        }
        let pass = self.recomputation.enter_pass();
        if !pass.is_outermost() {
            return Ok(());
        }
        while let Some((field, ids)) = self.recomputation.next_pending() {
            let descriptor = self.registry().field(field);
            self.compute_pending(descriptor, &ids)?;
        }
        Ok(())
    }
}

// ============================================================================
// Writes
// ============================================================================

impl Scope {
    /// Assign `value` to the field `name` of `record`.
    #[allow(clippy::result_large_err)]
    pub fn set(&self, record: &Record, name: &str, value: impl Into<Value>) -> Result<()> {
        let field = self.field_of(record.model, name)?.id();
        self.set_field(record, field, value.into())
    }

    /// Assign `value` to `field` on `record`.
    ///
    /// - inside a compute of this field: cache (and store, when recomputing)
    /// - unsaved record, or draft mode: cache only
    /// - otherwise: store, then the modification protocol
    #[allow(clippy::result_large_err)]
    pub fn set_field(&self, record: &Record, field: FieldId, value: Value) -> Result<()> {
        let descriptor = self.field_on(record, field)?;
        let value = normalize(descriptor, value)?;
        match self.slot(record, field) {
            Slot::Busy { recompute } | Slot::BatchPending { recompute } => {
                return self.assign_computed(record, descriptor, value, recompute);
            }
            _ => {}
        }
        match &record.key {
            RecordKey::New(new) => {
                self.modified_draft(record, descriptor);
                self.put_slot(record, field, slot_for(value));
                new.mark_assigned(field);
                Ok(())
            }
            RecordKey::Id(id) if self.is_draft() => {
                self.modified_draft(record, descriptor);
                self.put_slot(record, field, slot_for(value));
                self.draft.mark_dirty(DirtyEntry {
                    scope: self.weak(),
                    model: record.model,
                    id: *id,
                    field,
                });
                Ok(())
            }
            RecordKey::Id(_) => self.write_values(&Records::from(record), vec![(field, value)]),
        }
    }

    /// Assign several fields on several records.
    #[allow(clippy::result_large_err)]
    pub fn write(&self, records: &Records, values: &[(&str, Value)]) -> Result<()> {
        let resolved = self.resolve_values(records.model, values)?;
        self.assign(records, resolved)
    }

    /// Route an assignment: one batched store write when every record is
    /// persisted and no slot is being computed, per-record assignment
    /// otherwise.
    #[allow(clippy::result_large_err)]
    pub(crate) fn assign(&self, records: &Records, values: Vec<(FieldId, Value)>) -> Result<()> {
        let batched = !self.is_draft()
            && records.iter().all(|record| {
                !record.is_new()
                    && values
                        .iter()
                        .all(|(field, _)| !self.slot(&record, *field).is_computing())
            });
        if batched {
            return self.write_values(records, values);
        }
        for record in records.iter() {
            for (field, value) in &values {
                self.set_field(&record, *field, value.clone())?;
            }
        }
        Ok(())
    }

    /// Value produced by a compute callback for a slot it was asked to fill.
    #[allow(clippy::result_large_err)]
    fn assign_computed(
        &self,
        record: &Record,
        field: &FieldDescriptor,
        value: Value,
        recompute: bool,
    ) -> Result<()> {
        self.put_slot(record, field.id(), slot_for(value.clone()));
        if !(recompute && field.is_stored() && !record.is_new() && !self.is_draft()) {
            return Ok(());
        }
        let id = record.id();
        let mut values = Values::new();
        values.insert(field.name().to_string(), value);
        tracing::debug!(field = %field, id, "Store write of recomputed value");
        self.store()
            .write(&self.sudo_context(), field.model_name(), &[id], &values)?;
        self.broadcast_invalidate(field.model(), field.id(), Some(&[id]), false);
        self.propagate(&Records::from(record), field)
    }

    /// Write persisted records through the store and run the modification
    /// protocol for every written field.
    #[tracing::instrument(level = "debug", skip_all, fields(model = %records.model, count = records.len()))]
    #[allow(clippy::result_large_err)]
    pub(crate) fn write_values(&self, records: &Records, values: Vec<(FieldId, Value)>) -> Result<()> {
        let registry = self.registry();
        let model = registry.model(records.model);
        let ids = records.ids();
        if ids.is_empty() || values.is_empty() {
            return Ok(());
        }

        // records losing a relation must be recomputed too
        let mut before = Vec::new();
        let mut moved = Vec::new();
        for (field, value) in &values {
            let descriptor = registry.field(*field);
            if descriptor.is_relational() && descriptor.is_stored() {
                before.extend(self.resolve_stored_dependents(records, descriptor)?);
            }
            if let Some(inverse) = descriptor.inverse_field().filter(|_| descriptor.kind().is_x2many()) {
                let inverse = registry.field(inverse);
                let changed = self.membership_changes(records, descriptor, value)?;
                if !changed.is_empty() {
                    let others = Records::from_ids(inverse.model(), changed);
                    before.extend(self.resolve_stored_dependents(&others, inverse)?);
                    moved.push((inverse.id(), others));
                }
            }
        }

        let stored: Values = values
            .iter()
            .map(|(field, value)| (registry.field(*field), value))
            .filter(|(descriptor, _)| descriptor.is_stored())
            .map(|(descriptor, value)| (descriptor.name().to_string(), value.clone()))
            .collect();
        if !stored.is_empty() {
            tracing::debug!(model = model.name(), count = ids.len(), fields = stored.len(), "Store write");
            self.store()
                .write(&self.store_context(), model.name(), &ids, &stored)?;
        }

        for (field, _) in &values {
            self.modified(records, *field)?;
        }
        // the other side changed for every record that joined or left
        for (inverse, others) in &moved {
            self.modified(others, *inverse)?;
        }
        for (field, value) in &values {
            for record in records.iter() {
                self.put_slot(&record, *field, slot_for(value.clone()));
            }
        }
        for (field, _) in &values {
            let descriptor = registry.field(*field);
            if descriptor.is_stored() {
                continue;
            }
            if let Some(inverse) = descriptor.inverse() {
                inverse.call(self, descriptor, records)?;
            }
        }
        for (dependent, targets) in before {
            self.schedule(registry.field(dependent), &targets);
        }

        if self.config().recompute_on_write {
            self.recompute()?;
        }
        Ok(())
    }

    /// Insert a record through the store.
    #[allow(clippy::result_large_err)]
    pub fn create(&self, model: &str, values: &[(&str, Value)]) -> Result<Record> {
        let model = self.registry().model_id(model)?;
        let resolved = self.resolve_values(model, values)?;
        self.create_values(model, resolved)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(model = %model))]
    #[allow(clippy::result_large_err)]
    fn create_values(&self, model: ModelId, mut values: Vec<(FieldId, Value)>) -> Result<Record> {
        let registry = self.registry();
        let descriptor = registry.model(model);

        for field in descriptor.fields() {
            let field = registry.field(*field);
            if values.iter().any(|(given, _)| *given == field.id()) {
                continue;
            }
            if let (true, false, Some(default)) =
                (field.is_stored(), field.is_computed(), field.default_value())
            {
                values.push((field.id(), normalize(field, default.clone())?));
            }
        }

        let stored: Values = values
            .iter()
            .map(|(field, value)| (registry.field(*field), value))
            .filter(|(field, _)| field.is_stored())
            .map(|(field, value)| (field.name().to_string(), value.clone()))
            .collect();
        let id = self
            .store()
            .create(&self.store_context(), descriptor.name(), &stored)?;
        tracing::debug!(model = descriptor.name(), id, fields = stored.len(), "Store create");

        let record = Record::new(model, id);
        let records = Records::from(&record);
        self.cache.lock().touch(model, &[id]);

        for field in descriptor.fields() {
            let field = registry.field(*field);
            if field.is_stored()
                && field.is_computed()
                && !values.iter().any(|(given, _)| *given == field.id())
            {
                self.recomputation.todo(field.id(), [id]);
            }
        }
        for (field, _) in &values {
            self.modified(&records, *field)?;
        }
        for (field, value) in &values {
            self.put_slot(&record, *field, slot_for(value.clone()));
        }
        for (field, _) in &values {
            let field = registry.field(*field);
            if field.is_stored() {
                continue;
            }
            if let Some(inverse) = field.inverse() {
                inverse.call(self, field, &records)?;
            }
        }

        if self.config().recompute_on_write {
            self.recompute()?;
        }
        Ok(record)
    }

    /// Persist a record edited in draft mode, or create an unsaved one.
    /// Returns the persisted record.
    #[allow(clippy::result_large_err)]
    pub fn save(&self, record: &Record) -> Result<Record> {
        match &record.key {
            RecordKey::New(new) => {
                let values = {
                    let cache = new.cache.lock();
                    new.assigned()
                        .into_iter()
                        .filter_map(|field| match cache.get(field) {
                            Slot::Value(value) => Some((field, value)),
                            Slot::Null => Some((field, self.registry().field(field).null_value())),
                            _ => None,
                        })
                        .collect::<Vec<_>>()
                };
                self.create_values(record.model, values)
            }
            RecordKey::Id(id) => {
                let fields = self.draft.take_dirty(record.model, *id);
                let values: Vec<(FieldId, Value)> = fields
                    .into_iter()
                    .filter_map(|field| match self.slot(record, field) {
                        Slot::Value(value) => Some((field, value)),
                        Slot::Null => Some((field, self.registry().field(field).null_value())),
                        _ => None,
                    })
                    .collect();
                tracing::debug!(record = %record, fields = values.len(), "Saving draft values");
                self.write_values(&Records::from(record), values)?;
                Ok(record.clone())
            }
        }
    }
}

// ============================================================================
// Modification protocol
// ============================================================================

impl Scope {
    /// `field` changed on `records`: invalidate it, then invalidate and
    /// schedule its dependents.
    #[allow(clippy::result_large_err)]
    pub fn modified(&self, records: &Records, field: FieldId) -> Result<()> {
        let descriptor = self.registry().field(field);
        let ids = records.ids();
        self.broadcast_invalidate(descriptor.model(), field, Some(&ids), true);
        self.propagate(records, descriptor)
    }

    /// Dependents of `field` on `records`. Stored dependents are resolved
    /// through the store and scheduled; non-stored ones are invalidated for
    /// the whole model. The mirror field of a relation is invalidated too.
    #[allow(clippy::result_large_err)]
    fn propagate(&self, records: &Records, field: &FieldDescriptor) -> Result<()> {
        let registry = self.registry();
        for trigger in field.triggers() {
            let dependent = registry.field(trigger.field);
            if dependent.is_stored() {
                let targets = self.resolve_trigger(records, trigger)?;
                self.schedule(dependent, &targets);
            } else {
                self.broadcast_invalidate(dependent.model(), dependent.id(), None, true);
            }
        }
        if let Some(inverse) = field.inverse_field() {
            let inverse = registry.field(inverse);
            self.broadcast_invalidate(inverse.model(), inverse.id(), None, true);
        }
        Ok(())
    }

    /// Records holding the dependent of `trigger`, for changes on `records`.
    #[allow(clippy::result_large_err)]
    fn resolve_trigger(&self, records: &Records, trigger: &Trigger) -> Result<Vec<RecordId>> {
        let ids = records.ids();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if trigger.is_local() {
            return Ok(ids);
        }
        let dependent = self.registry().field(trigger.field);
        let found = self.store().search(
            &self.sudo_context(),
            dependent.model_name(),
            &Domain::ids_in(trigger.path.clone(), &ids),
        )?;
        tracing::trace!(
            dependent = %dependent,
            path = %trigger.path,
            count = found.len(),
            "Trigger resolved"
        );
        Ok(found)
    }

    #[allow(clippy::result_large_err)]
    fn resolve_stored_dependents(
        &self,
        records: &Records,
        field: &FieldDescriptor,
    ) -> Result<Vec<(FieldId, Vec<RecordId>)>> {
        let mut resolved = Vec::new();
        for trigger in field.triggers() {
            if self.registry().field(trigger.field).is_stored() {
                resolved.push((trigger.field, self.resolve_trigger(records, trigger)?));
            }
        }
        Ok(resolved)
    }

    /// Comodel ids joining or leaving the x2many `field` of `records` when
    /// it is assigned `value`. The current membership is the stored one: in
    /// draft mode the cache already holds the assigned value.
    #[allow(clippy::result_large_err)]
    fn membership_changes(
        &self,
        records: &Records,
        field: &FieldDescriptor,
        value: &Value,
    ) -> Result<BTreeSet<RecordId>> {
        let wanted: BTreeSet<RecordId> = value.as_ids().unwrap_or_default().iter().copied().collect();
        let rows = self.store().read(
            &self.sudo_context(),
            field.model_name(),
            &records.ids(),
            &[field.name()],
        )?;
        let mut changed = BTreeSet::new();
        for row in &rows {
            let current: BTreeSet<RecordId> = row
                .get(field.name())
                .and_then(Value::as_ids)
                .unwrap_or_default()
                .iter()
                .copied()
                .collect();
            changed.extend(current.symmetric_difference(&wanted).copied());
        }
        Ok(changed)
    }

    /// Invalidate a stored dependent on `ids` and mark it for recomputation.
    fn schedule(&self, dependent: &FieldDescriptor, ids: &[RecordId]) {
        if ids.is_empty() {
            return;
        }
        self.broadcast_invalidate(dependent.model(), dependent.id(), Some(ids), true);
        self.recomputation.todo(dependent.id(), ids.iter().copied());
    }

    /// Invalidate in every live scope sharing this registry, on any thread.
    pub(crate) fn broadcast_invalidate(
        &self,
        model: ModelId,
        field: FieldId,
        ids: Option<&[RecordId]>,
        include_self: bool,
    ) {
        let scopes = live::sharing(self.registry());
        tracing::trace!(
            model = %model,
            field = %field,
            ids = ids.map_or(0, <[RecordId]>::len),
            scopes = scopes.len(),
            "Invalidation broadcast"
        );
        for scope in scopes {
            if !include_self && std::ptr::eq(std::sync::Arc::as_ptr(&scope), self) {
                continue;
            }
            scope.cache.lock().invalidate(model, field, ids);
        }
    }

    /// Draft variant of [`Scope::modified`]: only the record itself and its
    /// dependents on the same record are cleared.
    pub fn modified_draft(&self, record: &Record, field: &FieldDescriptor) {
        let registry = self.registry();
        self.put_slot(record, field.id(), Slot::Empty);
        for trigger in field.triggers() {
            let dependent = registry.field(trigger.field);
            if trigger.is_local() && dependent.model() == field.model() {
                self.put_slot(record, dependent.id(), Slot::Empty);
            }
        }
    }

    /// Undo one draft assignment that was never saved.
    pub(crate) fn discard_draft(&self, model: ModelId, id: RecordId, field: FieldId) {
        if !self.config().discard_drafts_on_exit {
            return;
        }
        let registry = self.registry();
        let descriptor = registry.field(field);
        tracing::debug!(field = %descriptor, id, "Discarding draft value");
        let mut cache = self.cache.lock();
        cache.invalidate(model, field, Some(&[id]));
        for trigger in descriptor.triggers() {
            let dependent = registry.field(trigger.field);
            if trigger.is_local() && dependent.model() == model {
                cache.invalidate(model, dependent.id(), Some(&[id]));
            } else {
                cache.invalidate(dependent.model(), dependent.id(), None);
            }
        }
        if let Some(inverse) = descriptor.inverse_field() {
            let inverse = registry.field(inverse);
            cache.invalidate(inverse.model(), inverse.id(), None);
        }
    }

    /// Search `model`. Conditions on fields with a search hook are rewritten
    /// by the hook before the store sees them.
    #[allow(clippy::result_large_err)]
    pub fn search(&self, model: &str, domain: &Domain) -> Result<Records> {
        let registry = self.registry();
        let model_id = registry.model_id(model)?;
        let descriptor = registry.model(model_id);
        let mut rewritten = Domain::new();
        for condition in domain.iter() {
            let hook = descriptor
                .field_id(&condition.path)
                .map(|field| registry.field(field))
                .filter(|field| !field.is_stored())
                .and_then(|field| field.search().map(|hook| (field, hook)));
            rewritten = match hook {
                Some((field, hook)) => {
                    rewritten.extend(hook.call(self, field, condition.operator, &condition.value)?)
                }
                None => rewritten.and(condition.clone()),
            };
        }
        let ids = self
            .store()
            .search(&self.store_context(), model, &rewritten)?;
        tracing::debug!(model, count = ids.len(), "Store search");
        Ok(self.browse_model(model_id, ids))
    }

    /// Send `name` back to empty in this scope's cache, for `ids` or for
    /// every record of the model.
    #[allow(clippy::result_large_err)]
    pub fn invalidate(&self, model: &str, name: &str, ids: Option<&[RecordId]>) -> Result<()> {
        let model = self.registry().model_id(model)?;
        let field = self.field_of(model, name)?.id();
        self.cache.lock().invalidate(model, field, ids);
        Ok(())
    }

    /// Empty every record cache of this scope.
    pub fn invalidate_all(&self) {
        self.cache.lock().invalidate_all();
    }
}

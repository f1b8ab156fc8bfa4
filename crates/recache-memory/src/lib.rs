//! In-memory backing store for recache.
//!
//! `recache-memory` implements [`BackingStore`] over plain maps. It is the
//! driver used by the engine's tests and by examples, and it can stand in
//! for a database in applications that only need the cache semantics.
//!
//! - Rows are kept per model, keyed by id.
//! - One2many values are derived from the inverse many2one column.
//! - Many2many values live in relation tables of id pairs.
//! - `search` evaluates dot-separated relational paths.
//! - Call counters and injectable access denial support testing.
//!
//! ```ignore
//! let store = Arc::new(MemoryStore::new(registry.schema().clone()));
//! store.deny("res.partner", [7]);
//! let connection = Connection::open(registry, store.clone());
//! // ...
//! assert_eq!(store.stats().writes, 0);
//! ```

use parking_lot::RwLock;
use recache_core::{
    AccessError, BackingStore, ColumnKind, ColumnSchema, Condition, Domain, Error, RecordId,
    Result, Row, SUPERUSER_ID, StoreContext, StoreErrorKind, StoreSchema, Uid, Value, Values,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of store calls of each kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub reads: u64,
    pub writes: u64,
    pub searches: u64,
    pub creates: u64,
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    searches: AtomicU64,
    creates: AtomicU64,
}

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<String, BTreeMap<RecordId, Values>>,
    /// Pairs per relation table, ordered by column name
    relations: HashMap<String, BTreeSet<(RecordId, RecordId)>>,
    next_id: RecordId,
}

/// Thread-safe in-memory store.
#[derive(Debug)]
pub struct MemoryStore {
    schema: StoreSchema,
    superuser: Uid,
    tables: RwLock<Tables>,
    denied: RwLock<HashMap<String, BTreeSet<RecordId>>>,
    counters: Counters,
}

impl MemoryStore {
    /// Create an empty store for the models of `schema`.
    pub fn new(schema: StoreSchema) -> Self {
        let rows = schema
            .models
            .keys()
            .map(|name| (name.clone(), BTreeMap::new()))
            .collect();
        Self {
            schema,
            superuser: SUPERUSER_ID,
            tables: RwLock::new(Tables {
                rows,
                relations: HashMap::new(),
                next_id: 1,
            }),
            denied: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Principal that bypasses access denial (builder pattern).
    #[must_use]
    pub fn superuser(mut self, uid: Uid) -> Self {
        self.superuser = uid;
        self
    }

    pub fn schema(&self) -> &StoreSchema {
        &self.schema
    }

    // ------------------------------------------------------------------
    // Test helpers: none of these count as store calls.
    // ------------------------------------------------------------------

    /// Insert a row directly.
    #[allow(clippy::result_large_err)]
    pub fn insert(&self, model: &str, values: Values) -> Result<RecordId> {
        let mut tables = self.tables.write();
        let id = tables.next_id;
        tables.next_id += 1;
        self.table_mut(&mut tables, model)?.insert(id, Values::new());
        self.apply(&mut tables, model, id, &values)?;
        Ok(id)
    }

    /// Change one stored value directly, behind the engine's back.
    #[allow(clippy::result_large_err)]
    pub fn set(&self, model: &str, id: RecordId, field: &str, value: impl Into<Value>) -> Result<()> {
        let mut values = Values::new();
        values.insert(field.to_string(), value.into());
        let mut tables = self.tables.write();
        self.check_exists(&tables, model, id)?;
        self.apply(&mut tables, model, id, &values)
    }

    /// Current stored value of one field.
    pub fn value(&self, model: &str, id: RecordId, field: &str) -> Option<Value> {
        let tables = self.tables.read();
        tables.rows.get(model)?.get(&id)?;
        let column = self.schema.column(model, field)?;
        Some(self.column_value(&tables, model, id, column))
    }

    /// Ids of every row of `model`.
    pub fn ids(&self, model: &str) -> Vec<RecordId> {
        self.tables
            .read()
            .rows
            .get(model)
            .map(|rows| rows.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Refuse `ids` of `model` to every principal but the superuser.
    pub fn deny(&self, model: &str, ids: impl IntoIterator<Item = RecordId>) {
        self.denied
            .write()
            .entry(model.to_string())
            .or_default()
            .extend(ids);
    }

    /// Lift every denial.
    pub fn allow_all(&self) {
        self.denied.write().clear();
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            reads: self.counters.reads.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            searches: self.counters.searches.load(Ordering::Relaxed),
            creates: self.counters.creates.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.counters.reads.store(0, Ordering::Relaxed);
        self.counters.writes.store(0, Ordering::Relaxed);
        self.counters.searches.store(0, Ordering::Relaxed);
        self.counters.creates.store(0, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn is_denied(&self, ctx: &StoreContext, model: &str, id: RecordId) -> bool {
        ctx.uid != self.superuser
            && self
                .denied
                .read()
                .get(model)
                .is_some_and(|ids| ids.contains(&id))
    }

    #[allow(clippy::result_large_err)]
    fn column(&self, model: &str, name: &str) -> Result<&ColumnSchema> {
        self.schema.column(model, name).ok_or_else(|| {
            Error::store(
                StoreErrorKind::Backend,
                format!("unknown column {model}.{name}"),
            )
        })
    }

    #[allow(clippy::result_large_err)]
    fn table_mut<'a>(
        &self,
        tables: &'a mut Tables,
        model: &str,
    ) -> Result<&'a mut BTreeMap<RecordId, Values>> {
        tables
            .rows
            .get_mut(model)
            .ok_or_else(|| Error::store(StoreErrorKind::Backend, format!("unknown model {model}")))
    }

    #[allow(clippy::result_large_err)]
    fn check_exists(&self, tables: &Tables, model: &str, id: RecordId) -> Result<()> {
        let exists = tables
            .rows
            .get(model)
            .ok_or_else(|| Error::store(StoreErrorKind::Backend, format!("unknown model {model}")))?
            .contains_key(&id);
        if exists {
            Ok(())
        } else {
            Err(Error::store(
                StoreErrorKind::Missing,
                format!("{model}({id}) does not exist"),
            ))
        }
    }

    /// The relation pair of `(own, other)` as stored for a column.
    fn pair(column1: &str, column2: &str, own: RecordId, other: RecordId) -> (RecordId, RecordId) {
        if column1 <= column2 {
            (own, other)
        } else {
            (other, own)
        }
    }

    fn column_value(&self, tables: &Tables, model: &str, id: RecordId, column: &ColumnSchema) -> Value {
        match &column.kind {
            ColumnKind::Scalar | ColumnKind::ManyToOne { .. } => tables
                .rows
                .get(model)
                .and_then(|rows| rows.get(&id))
                .and_then(|row| row.get(&column.name))
                .cloned()
                .unwrap_or(Value::Null),
            ColumnKind::OneToMany { comodel, inverse } => {
                let ids = tables
                    .rows
                    .get(comodel)
                    .into_iter()
                    .flat_map(|rows| rows.iter())
                    .filter(|(_, row)| {
                        row.get(inverse)
                            .and_then(Value::as_ids)
                            .is_some_and(|ids| ids.contains(&id))
                    })
                    .map(|(other, _)| *other);
                Value::records(ids)
            }
            ColumnKind::ManyToMany {
                relation,
                column1,
                column2,
                ..
            } => {
                let pairs = tables.relations.get(relation);
                let ids = pairs.into_iter().flat_map(|pairs| pairs.iter()).filter_map(|pair| {
                    let (own, other) = if column1 <= column2 {
                        (pair.0, pair.1)
                    } else {
                        (pair.1, pair.0)
                    };
                    (own == id).then_some(other)
                });
                Value::records(ids)
            }
        }
    }

    /// Apply `values` to one existing row.
    #[allow(clippy::result_large_err)]
    fn apply(&self, tables: &mut Tables, model: &str, id: RecordId, values: &Values) -> Result<()> {
        for (name, value) in values {
            let column = self.column(model, name)?;
            match &column.kind {
                ColumnKind::Scalar => {
                    self.table_mut(tables, model)?
                        .entry(id)
                        .or_default()
                        .insert(name.clone(), value.clone());
                }
                ColumnKind::ManyToOne { .. } => {
                    let value = match value {
                        Value::BigInt(other) => Value::Records(vec![*other]),
                        Value::Null => Value::Records(Vec::new()),
                        other => other.clone(),
                    };
                    self.table_mut(tables, model)?
                        .entry(id)
                        .or_default()
                        .insert(name.clone(), value);
                }
                ColumnKind::OneToMany { comodel, inverse } => {
                    let wanted: BTreeSet<RecordId> =
                        value.as_ids().unwrap_or_default().iter().copied().collect();
                    let rows = self.table_mut(tables, comodel)?;
                    for (other, row) in rows.iter_mut() {
                        let points_here = row
                            .get(inverse)
                            .and_then(Value::as_ids)
                            .is_some_and(|ids| ids.contains(&id));
                        if wanted.contains(other) {
                            row.insert(inverse.clone(), Value::Records(vec![id]));
                        } else if points_here {
                            row.insert(inverse.clone(), Value::Records(Vec::new()));
                        }
                    }
                }
                ColumnKind::ManyToMany {
                    relation,
                    column1,
                    column2,
                    ..
                } => {
                    let others = value.as_ids().unwrap_or_default().to_vec();
                    let pairs = tables.relations.entry(relation.clone()).or_default();
                    pairs.retain(|pair| {
                        let own = if column1 <= column2 { pair.0 } else { pair.1 };
                        own != id
                    });
                    for other in others {
                        pairs.insert(Self::pair(column1, column2, id, other));
                    }
                }
            }
        }
        Ok(())
    }

    /// Values reached by `path` from one record.
    fn reach(&self, tables: &Tables, model: &str, id: RecordId, path: &[&str]) -> Vec<Value> {
        let Some((head, tail)) = path.split_first() else {
            return Vec::new();
        };
        if *head == "id" {
            return vec![Value::BigInt(id)];
        }
        let Some(column) = self.schema.column(model, head) else {
            return Vec::new();
        };
        let value = self.column_value(tables, model, id, column);
        if tail.is_empty() {
            return vec![value];
        }
        let Some(comodel) = column.kind.comodel() else {
            return Vec::new();
        };
        value
            .as_ids()
            .unwrap_or_default()
            .iter()
            .flat_map(|other| self.reach(tables, comodel, *other, tail))
            .collect()
    }

    fn matches(&self, tables: &Tables, model: &str, id: RecordId, condition: &Condition) -> bool {
        let path: Vec<&str> = condition.segments().collect();
        let reached = self.reach(tables, model, id, &path);
        condition.operator.matches(&reached, &condition.value)
    }

    /// Whether inactive rows are filtered out of a search.
    fn active_only(&self, ctx: &StoreContext, model: &str) -> bool {
        self.schema.column(model, "active").is_some()
            && ctx.option("active_test") != Some(&Value::Bool(false))
    }
}

impl BackingStore for MemoryStore {
    fn read(
        &self,
        ctx: &StoreContext,
        model: &str,
        ids: &[RecordId],
        fields: &[&str],
    ) -> Result<Vec<Row>> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let columns = fields
            .iter()
            .map(|name| self.column(model, name))
            .collect::<Result<Vec<_>>>()?;
        let tables = self.tables.read();
        let Some(rows) = tables.rows.get(model) else {
            return Err(Error::store(
                StoreErrorKind::Backend,
                format!("unknown model {model}"),
            ));
        };
        let mut result = Vec::with_capacity(ids.len());
        for id in ids {
            if !rows.contains_key(id) || self.is_denied(ctx, model, *id) {
                continue;
            }
            let mut row = Row::new(*id);
            for column in &columns {
                if column.stored {
                    row.values.insert(
                        column.name.clone(),
                        self.column_value(&tables, model, *id, column),
                    );
                }
            }
            result.push(row);
        }
        tracing::trace!(model, requested = ids.len(), returned = result.len(), "Memory read");
        Ok(result)
    }

    fn write(&self, ctx: &StoreContext, model: &str, ids: &[RecordId], values: &Values) -> Result<()> {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        let denied: Vec<RecordId> = ids
            .iter()
            .copied()
            .filter(|id| self.is_denied(ctx, model, *id))
            .collect();
        if !denied.is_empty() {
            return Err(Error::Access(AccessError {
                model: model.to_string(),
                field: None,
                ids: denied,
                message: "write refused".to_string(),
            }));
        }
        let mut tables = self.tables.write();
        for id in ids {
            self.check_exists(&tables, model, *id)?;
        }
        for id in ids {
            self.apply(&mut tables, model, *id, values)?;
        }
        tracing::trace!(model, count = ids.len(), fields = values.len(), "Memory write");
        Ok(())
    }

    fn search(&self, ctx: &StoreContext, model: &str, domain: &Domain) -> Result<Vec<RecordId>> {
        self.counters.searches.fetch_add(1, Ordering::Relaxed);
        for condition in domain.iter() {
            let head = condition.segments().next().unwrap_or_default();
            if head != "id" && self.schema.column(model, head).is_none() {
                return Err(Error::store(
                    StoreErrorKind::InvalidDomain,
                    format!("unknown path {} on {model}", condition.path),
                ));
            }
        }
        let active_only = self.active_only(ctx, model);
        let tables = self.tables.read();
        let Some(rows) = tables.rows.get(model) else {
            return Err(Error::store(
                StoreErrorKind::Backend,
                format!("unknown model {model}"),
            ));
        };
        let found: Vec<RecordId> = rows
            .iter()
            .filter(|(_, row)| !active_only || row.get("active") != Some(&Value::Bool(false)))
            .map(|(id, _)| *id)
            .filter(|id| !self.is_denied(ctx, model, *id))
            .filter(|id| {
                domain
                    .iter()
                    .all(|condition| self.matches(&tables, model, *id, condition))
            })
            .collect();
        tracing::trace!(model, conditions = domain.conditions.len(), found = found.len(), "Memory search");
        Ok(found)
    }

    fn create(&self, _ctx: &StoreContext, model: &str, values: &Values) -> Result<RecordId> {
        self.counters.creates.fetch_add(1, Ordering::Relaxed);
        let id = self.insert(model, values.clone())?;
        tracing::trace!(model, id, "Memory create");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recache_core::{ModelSchema, Operator};

    fn schema() -> StoreSchema {
        let mut schema = StoreSchema::default();
        let column = |name: &str, kind: ColumnKind| ColumnSchema {
            name: name.to_string(),
            kind,
            stored: true,
        };
        schema.models.insert(
            "order".to_string(),
            ModelSchema {
                name: "order".to_string(),
                columns: vec![
                    column("name", ColumnKind::Scalar),
                    column(
                        "line_ids",
                        ColumnKind::OneToMany {
                            comodel: "line".to_string(),
                            inverse: "order_id".to_string(),
                        },
                    ),
                    column(
                        "tag_ids",
                        ColumnKind::ManyToMany {
                            comodel: "tag".to_string(),
                            relation: "order_tag_rel".to_string(),
                            column1: "order_id".to_string(),
                            column2: "tag_id".to_string(),
                        },
                    ),
                ],
            },
        );
        schema.models.insert(
            "line".to_string(),
            ModelSchema {
                name: "line".to_string(),
                columns: vec![
                    column(
                        "order_id",
                        ColumnKind::ManyToOne {
                            comodel: "order".to_string(),
                        },
                    ),
                    column("amount", ColumnKind::Scalar),
                    column("active", ColumnKind::Scalar),
                ],
            },
        );
        schema.models.insert(
            "tag".to_string(),
            ModelSchema {
                name: "tag".to_string(),
                columns: vec![
                    column("name", ColumnKind::Scalar),
                    column(
                        "order_ids",
                        ColumnKind::ManyToMany {
                            comodel: "order".to_string(),
                            relation: "order_tag_rel".to_string(),
                            column1: "tag_id".to_string(),
                            column2: "order_id".to_string(),
                        },
                    ),
                ],
            },
        );
        schema
    }

    fn values(pairs: &[(&str, Value)]) -> Values {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn user() -> StoreContext {
        StoreContext::new(7)
    }

    #[test]
    fn one2many_is_derived_from_inverse() {
        let store = MemoryStore::new(schema());
        let order = store.insert("order", values(&[("name", "A".into())])).unwrap();
        let l1 = store.insert("line", values(&[("order_id", Value::BigInt(order))])).unwrap();
        let l2 = store.insert("line", values(&[("order_id", Value::record(Some(order)))])).unwrap();
        assert_eq!(store.value("order", order, "line_ids"), Some(Value::records([l1, l2])));

        store
            .write(&user(), "order", &[order], &values(&[("line_ids", Value::records([l2]))]))
            .unwrap();
        assert_eq!(store.value("line", l1, "order_id"), Some(Value::records([])));
        assert_eq!(store.value("line", l2, "order_id"), Some(Value::records([order])));
    }

    #[test]
    fn many2many_is_visible_from_both_sides() {
        let store = MemoryStore::new(schema());
        let order = store.insert("order", Values::new()).unwrap();
        let tag = store.insert("tag", Values::new()).unwrap();
        store
            .write(&user(), "order", &[order], &values(&[("tag_ids", Value::records([tag]))]))
            .unwrap();
        assert_eq!(store.value("tag", tag, "order_ids"), Some(Value::records([order])));
        store
            .write(&user(), "tag", &[tag], &values(&[("order_ids", Value::records([]))]))
            .unwrap();
        assert_eq!(store.value("order", order, "tag_ids"), Some(Value::records([])));
    }

    #[test]
    fn search_follows_paths() {
        let store = MemoryStore::new(schema());
        let a = store.insert("order", values(&[("name", "A".into())])).unwrap();
        let b = store.insert("order", values(&[("name", "B".into())])).unwrap();
        let line = store.insert("line", values(&[("order_id", Value::BigInt(a))])).unwrap();
        store.insert("line", values(&[("order_id", Value::BigInt(b))])).unwrap();

        let found = store
            .search(&user(), "order", &Domain::ids_in("line_ids", &[line]))
            .unwrap();
        assert_eq!(found, vec![a]);

        let found = store
            .search(
                &user(),
                "line",
                &Domain::from(Condition::new("order_id.name", Operator::Eq, "B")),
            )
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(store.stats().searches, 2);
    }

    #[test]
    fn search_skips_inactive_unless_asked() {
        let store = MemoryStore::new(schema());
        store.insert("line", values(&[("active", Value::Bool(false))])).unwrap();
        store.insert("line", values(&[("active", Value::Bool(true))])).unwrap();
        assert_eq!(store.search(&user(), "line", &Domain::new()).unwrap().len(), 1);

        let mut ctx = user();
        ctx.options.insert("active_test".to_string(), Value::Bool(false));
        assert_eq!(store.search(&ctx, "line", &Domain::new()).unwrap().len(), 2);
    }

    #[test]
    fn denied_rows_are_omitted_from_reads() {
        let store = MemoryStore::new(schema());
        let a = store.insert("order", values(&[("name", "A".into())])).unwrap();
        let b = store.insert("order", values(&[("name", "B".into())])).unwrap();
        store.deny("order", [b]);

        let rows = store.read(&user(), "order", &[a, b], &["name"]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::from("A")));

        let rows = store
            .read(&StoreContext::new(SUPERUSER_ID), "order", &[a, b], &["name"])
            .unwrap();
        assert_eq!(rows.len(), 2);

        let err = store
            .write(&user(), "order", &[b], &values(&[("name", "C".into())]))
            .unwrap_err();
        assert!(err.is_access());
    }

    #[test]
    fn write_on_missing_row_fails() {
        let store = MemoryStore::new(schema());
        let err = store
            .write(&user(), "order", &[42], &values(&[("name", "x".into())]))
            .unwrap_err();
        assert!(err.is_skippable_on_check());
    }

    #[test]
    fn stats_count_calls_but_not_helpers() {
        let store = MemoryStore::new(schema());
        let id = store.insert("order", Values::new()).unwrap();
        store.set("order", id, "name", "x").unwrap();
        assert_eq!(store.stats(), StoreStats::default());

        store.read(&user(), "order", &[id], &["name"]).unwrap();
        store.create(&user(), "order", &Values::new()).unwrap();
        let stats = store.stats();
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.creates, 1);
        store.reset_stats();
        assert_eq!(store.stats(), StoreStats::default());
    }
}

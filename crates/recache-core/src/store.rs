//! Backing store contract.
//!
//! The record cache never builds queries itself. It decides *when* the
//! store is consulted, and talks to it through the narrow [`BackingStore`]
//! trait:
//!
//! - [`BackingStore::read`] - fetch column values for a set of ids
//! - [`BackingStore::write`] - write the same values to a set of ids
//! - [`BackingStore::search`] - evaluate a [`Domain`], used for trigger resolution
//! - [`BackingStore::create`] - insert a record saved out of draft mode
//!
//! Drivers receive a [`StoreSchema`] describing every model's columns, so
//! relational paths (`line_ids.amount`) can be evaluated without depending
//! on the field registry.

use crate::error::Result;
use crate::identifiers::{RecordId, Uid};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Column values keyed by field name.
pub type Values = BTreeMap<String, Value>;

/// One record's values, as returned by [`BackingStore::read`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: RecordId,
    pub values: Values,
}

impl Row {
    /// Create an empty row for `id`.
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            values: Values::new(),
        }
    }

    /// Add a column value.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

// ============================================================================
// Domains
// ============================================================================

/// Comparison operator of a domain condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// Any value reached by the path is one of the given values
    In,
    /// No value reached by the path is one of the given values
    NotIn,
    Eq,
    Ne,
}

impl Operator {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::Eq => "=",
            Operator::Ne => "!=",
        }
    }

    /// Evaluate the operator on the values a path reached on one record.
    ///
    /// Relational values are flattened to their ids first, so a condition
    /// `("line_ids", In, [4])` matches a record whose `line_ids` contains 4.
    pub fn matches(&self, reached: &[Value], target: &Value) -> bool {
        let flat = flatten(reached);
        match self {
            Operator::In => {
                let targets = flatten(std::slice::from_ref(target));
                flat.iter().any(|v| targets.contains(v))
            }
            Operator::NotIn => {
                let targets = flatten(std::slice::from_ref(target));
                !flat.iter().any(|v| targets.contains(v))
            }
            Operator::Eq => match target {
                Value::Null => flat.is_empty(),
                Value::Records(ids) if ids.is_empty() => flat.is_empty(),
                _ => {
                    let targets = flatten(std::slice::from_ref(target));
                    flat.iter().any(|v| targets.contains(v))
                }
            },
            Operator::Ne => !Operator::Eq.matches(reached, target),
        }
    }
}

fn flatten(values: &[Value]) -> Vec<Value> {
    let mut out = Vec::new();
    for value in values {
        match value {
            Value::Null => {}
            Value::Records(ids) => out.extend(ids.iter().map(|id| Value::BigInt(*id))),
            other => out.push(other.clone()),
        }
    }
    out
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single condition `(path, operator, value)`.
///
/// `path` is `id` or a dot-separated chain of field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub path: String,
    pub operator: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(path: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            operator,
            value: value.into(),
        }
    }

    /// Path segments of the condition.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('.')
    }
}

/// A conjunction of conditions. The empty domain matches every record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub conditions: Vec<Condition>,
}

impl Domain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Domain matching the records whose `path` reaches one of `ids`.
    pub fn ids_in(path: impl Into<String>, ids: &[RecordId]) -> Self {
        Self::new().and(Condition::new(
            path,
            Operator::In,
            Value::records(ids.iter().copied()),
        ))
    }

    #[must_use]
    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Append every condition of `other`.
    #[must_use]
    pub fn extend(mut self, other: Domain) -> Self {
        self.conditions.extend(other.conditions);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.iter()
    }
}

impl From<Condition> for Domain {
    fn from(condition: Condition) -> Self {
        Domain {
            conditions: vec![condition],
        }
    }
}

// ============================================================================
// Schema
// ============================================================================

/// How a column relates to other models.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Scalar,
    ManyToOne {
        comodel: String,
    },
    /// Computed by the store from `comodel.inverse`
    OneToMany {
        comodel: String,
        inverse: String,
    },
    /// Stored in the `relation` table as `(column1, column2)` pairs
    ManyToMany {
        comodel: String,
        relation: String,
        column1: String,
        column2: String,
    },
}

impl ColumnKind {
    pub fn comodel(&self) -> Option<&str> {
        match self {
            ColumnKind::Scalar => None,
            ColumnKind::ManyToOne { comodel }
            | ColumnKind::OneToMany { comodel, .. }
            | ColumnKind::ManyToMany { comodel, .. } => Some(comodel),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub kind: ColumnKind,
    /// Whether the column's value lives in the store (as opposed to only
    /// being navigable, e.g. a derived field used in a search path).
    pub stored: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl ModelSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Column descriptions of every registered model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSchema {
    pub models: BTreeMap<String, ModelSchema>,
}

impl StoreSchema {
    pub fn model(&self, name: &str) -> Option<&ModelSchema> {
        self.models.get(name)
    }

    pub fn column(&self, model: &str, column: &str) -> Option<&ColumnSchema> {
        self.model(model).and_then(|m| m.column(column))
    }
}

// ============================================================================
// Store trait
// ============================================================================

/// Acting principal and options forwarded with every store call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreContext {
    pub uid: Uid,
    pub options: BTreeMap<String, Value>,
}

impl StoreContext {
    pub fn new(uid: Uid) -> Self {
        Self {
            uid,
            options: BTreeMap::new(),
        }
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }
}

/// The persistence collaborator consumed by the record cache.
///
/// All calls are synchronous and may block. Implementations must be
/// shareable across threads: every scope of a connection holds the same
/// store.
pub trait BackingStore: Send + Sync {
    /// Read `fields` for `ids`.
    ///
    /// The store may return fewer rows than requested (permission filtering,
    /// deleted rows). The cache treats a missing row as an access failure for
    /// that record and caches nothing for it.
    fn read(
        &self,
        ctx: &StoreContext,
        model: &str,
        ids: &[RecordId],
        fields: &[&str],
    ) -> Result<Vec<Row>>;

    /// Write `values` on every record of `ids`.
    fn write(&self, ctx: &StoreContext, model: &str, ids: &[RecordId], values: &Values)
    -> Result<()>;

    /// Return the ids of the records of `model` matching `domain`.
    fn search(&self, ctx: &StoreContext, model: &str, domain: &Domain) -> Result<Vec<RecordId>>;

    /// Insert a new record and return its id.
    fn create(&self, ctx: &StoreContext, model: &str, values: &Values) -> Result<RecordId>;
}

//! Field descriptors and their declarative builders.
//!
//! A field is declared once with a [`FieldBuilder`] and turned into an
//! immutable [`FieldDescriptor`] when the registry is built. Compute,
//! inverse and search hooks are given either as a closure or as the name of
//! a method registered on the model; both resolve to a [`Hook`] at setup
//! time, so record traffic never looks a method up by name.

use crate::record::Records;
use crate::scope::Scope;
use recache_core::{Domain, FieldId, ModelId, Operator, Result, Value};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Callback computing (or inverting) a field on a set of records.
pub type ComputeFn = Arc<dyn Fn(&Scope, &FieldDescriptor, &Records) -> Result<()> + Send + Sync>;

/// Callback turning a condition on a field into a domain the store understands.
pub type SearchFn =
    Arc<dyn Fn(&Scope, &FieldDescriptor, Operator, &Value) -> Result<Domain> + Send + Sync>;

// ============================================================================
// Field kinds
// ============================================================================

/// The type of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Boolean,
    Integer,
    Float,
    Char,
    Text,
    Date,
    Datetime,
    Selection,
    Many2one {
        comodel: String,
    },
    One2many {
        comodel: String,
        inverse_name: String,
    },
    Many2many {
        comodel: String,
        relation: String,
        column1: String,
        column2: String,
    },
}

impl FieldKind {
    /// Type name, as compared by related-field setup.
    pub const fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Boolean => "boolean",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Char => "char",
            FieldKind::Text => "text",
            FieldKind::Date => "date",
            FieldKind::Datetime => "datetime",
            FieldKind::Selection => "selection",
            FieldKind::Many2one { .. } => "many2one",
            FieldKind::One2many { .. } => "one2many",
            FieldKind::Many2many { .. } => "many2many",
        }
    }

    /// Name of the model the field points to, for relational fields.
    pub fn comodel(&self) -> Option<&str> {
        match self {
            FieldKind::Many2one { comodel }
            | FieldKind::One2many { comodel, .. }
            | FieldKind::Many2many { comodel, .. } => Some(comodel),
            _ => None,
        }
    }

    pub fn is_relational(&self) -> bool {
        self.comodel().is_some()
    }

    pub fn is_x2many(&self) -> bool {
        matches!(
            self,
            FieldKind::One2many { .. } | FieldKind::Many2many { .. }
        )
    }

    /// The value read for a field whose slot is known to be null.
    pub fn null_value(&self) -> Value {
        if self.is_relational() {
            Value::Records(Vec::new())
        } else {
            Value::Null
        }
    }

    /// Whether a read of this field may fetch other fields alongside it.
    pub fn is_prefetchable(&self) -> bool {
        !self.is_x2many()
    }

    /// Human readable type, including the comodel of relational fields.
    pub fn describe(&self) -> String {
        match self.comodel() {
            Some(comodel) => format!("{}({})", self.type_name(), comodel),
            None => self.type_name().to_string(),
        }
    }
}

// ============================================================================
// Hooks
// ============================================================================

/// A hook as declared: a model method name, or a closure.
pub enum HookRef<F> {
    Named(String),
    Closure(F),
}

impl<F> fmt::Debug for HookRef<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookRef::Named(name) => f.debug_tuple("Named").field(name).finish(),
            HookRef::Closure(_) => f.write_str("Closure(..)"),
        }
    }
}

/// A hook after setup: dispatched through the resolved function only.
#[derive(Clone)]
pub enum Hook<F> {
    NamedMethod { name: String, func: F },
    Closure(F),
}

impl<F> Hook<F> {
    pub fn func(&self) -> &F {
        match self {
            Hook::NamedMethod { func, .. } | Hook::Closure(func) => func,
        }
    }

    /// Method name, for hooks registered on the model.
    pub fn method_name(&self) -> Option<&str> {
        match self {
            Hook::NamedMethod { name, .. } => Some(name),
            Hook::Closure(_) => None,
        }
    }
}

impl<F> fmt::Debug for Hook<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::NamedMethod { name, .. } => write!(f, "NamedMethod({name})"),
            Hook::Closure(_) => f.write_str("Closure(..)"),
        }
    }
}

impl Hook<ComputeFn> {
    pub fn call(&self, scope: &Scope, field: &FieldDescriptor, records: &Records) -> Result<()> {
        (self.func())(scope, field, records)
    }
}

impl Hook<SearchFn> {
    pub fn call(
        &self,
        scope: &Scope,
        field: &FieldDescriptor,
        operator: Operator,
        value: &Value,
    ) -> Result<Domain> {
        (self.func())(scope, field, operator, value)
    }
}

// ============================================================================
// Triggers
// ============================================================================

/// "When the field holding this trigger changes, re-derive `field` on the
/// records reachable through `path`."
///
/// `path` is a dot-separated sequence of field names leading from the
/// dependent field's model to the changed field's model, or `id` when both
/// sit on the same record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub field: FieldId,
    pub path: String,
}

impl Trigger {
    /// Whether the dependent lives on the very records that changed.
    pub fn is_local(&self) -> bool {
        self.path == "id"
    }
}

// ============================================================================
// Descriptor
// ============================================================================

/// Static metadata of one field of one model.
pub struct FieldDescriptor {
    pub(crate) id: FieldId,
    pub(crate) model: ModelId,
    pub(crate) model_name: String,
    pub(crate) name: String,
    pub(crate) kind: FieldKind,
    /// Resolved model of `kind.comodel()`
    pub(crate) comodel_id: Option<ModelId>,
    pub(crate) store: bool,
    pub(crate) compute: Option<Hook<ComputeFn>>,
    pub(crate) inverse: Option<Hook<ComputeFn>>,
    pub(crate) search: Option<Hook<SearchFn>>,
    pub(crate) depends: Vec<String>,
    pub(crate) related: Option<Vec<String>>,
    /// Resolved fields of `related`, from this model to the target field
    pub(crate) related_chain: Vec<FieldId>,
    pub(crate) default: Option<Value>,
    pub(crate) string: String,
    pub(crate) help: Option<String>,
    pub(crate) readonly: bool,
    pub(crate) required: bool,
    pub(crate) inverse_field: Option<FieldId>,
    pub(crate) triggers: Vec<Trigger>,
}

impl FieldDescriptor {
    pub fn id(&self) -> FieldId {
        self.id
    }

    pub fn model(&self) -> ModelId {
        self.model
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// The model relational values point to.
    pub fn comodel_id(&self) -> Option<ModelId> {
        self.comodel_id
    }

    pub fn is_stored(&self) -> bool {
        self.store
    }

    pub fn is_computed(&self) -> bool {
        self.compute.is_some()
    }

    pub fn is_relational(&self) -> bool {
        self.kind.is_relational()
    }

    pub fn compute(&self) -> Option<&Hook<ComputeFn>> {
        self.compute.as_ref()
    }

    pub fn inverse(&self) -> Option<&Hook<ComputeFn>> {
        self.inverse.as_ref()
    }

    pub fn search(&self) -> Option<&Hook<SearchFn>> {
        self.search.as_ref()
    }

    pub fn depends(&self) -> &[String] {
        &self.depends
    }

    pub fn related(&self) -> Option<&[String]> {
        self.related.as_deref()
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn string(&self) -> &str {
        &self.string
    }

    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    pub fn readonly(&self) -> bool {
        self.readonly
    }

    pub fn required(&self) -> bool {
        self.required
    }

    /// The field on the comodel that mirrors this relation, if any.
    pub fn inverse_field(&self) -> Option<FieldId> {
        self.inverse_field
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn null_value(&self) -> Value {
        self.kind.null_value()
    }

    /// Whether the store provides this field's value directly, so it can be
    /// fetched together with its siblings.
    pub fn is_prefetchable(&self) -> bool {
        self.store && self.compute.is_none() && self.kind.is_prefetchable()
    }

    /// Serializable description of the field.
    pub fn description(&self) -> FieldDescription {
        FieldDescription {
            name: self.name.clone(),
            field_type: self.kind.type_name(),
            store: self.store,
            depends: self.depends.clone(),
            related: self.related.as_ref().map(|path| path.join(".")),
            string: self.string.clone(),
            help: self.help.clone(),
            readonly: self.readonly,
            required: self.required,
            relation: self.kind.comodel().map(str::to_string),
            relation_field: match &self.kind {
                FieldKind::One2many { inverse_name, .. } => Some(inverse_name.clone()),
                _ => None,
            },
        }
    }
}

impl fmt::Display for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.model_name, self.name)
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("id", &self.id)
            .field("field", &format_args!("{self}"))
            .field("kind", &self.kind)
            .field("store", &self.store)
            .field("compute", &self.compute)
            .field("depends", &self.depends)
            .field("triggers", &self.triggers)
            .finish_non_exhaustive()
    }
}

/// Exported description of a field, as returned by
/// [`FieldDescriptor::description`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: &'static str,
    pub store: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related: Option<String>,
    pub string: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    pub readonly: bool,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation_field: Option<String>,
}

// ============================================================================
// Builder
// ============================================================================

/// Declarative definition of a field, consumed by
/// [`ModelBuilder::field`](crate::registry::ModelBuilder::field).
///
/// ```ignore
/// FieldBuilder::float("total")
///     .compute_with(&["line_ids.amount"], |scope, field, records| { ... })
///     .store(true)
/// ```
#[derive(Debug)]
pub struct FieldBuilder {
    pub(crate) name: String,
    pub(crate) kind: FieldKind,
    pub(crate) store: Option<bool>,
    pub(crate) compute: Option<HookRef<ComputeFn>>,
    pub(crate) inverse: Option<HookRef<ComputeFn>>,
    pub(crate) search: Option<HookRef<SearchFn>>,
    pub(crate) depends: Vec<String>,
    pub(crate) related: Option<String>,
    pub(crate) default: Option<Value>,
    pub(crate) string: Option<String>,
    pub(crate) help: Option<String>,
    pub(crate) readonly: bool,
    pub(crate) required: bool,
}

impl FieldBuilder {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            store: None,
            compute: None,
            inverse: None,
            search: None,
            depends: Vec::new(),
            related: None,
            default: None,
            string: None,
            help: None,
            readonly: false,
            required: false,
        }
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn char(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Char)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Date)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Datetime)
    }

    pub fn selection(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Selection)
    }

    pub fn many2one(name: impl Into<String>, comodel: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Many2one {
                comodel: comodel.into(),
            },
        )
    }

    pub fn one2many(
        name: impl Into<String>,
        comodel: impl Into<String>,
        inverse_name: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            FieldKind::One2many {
                comodel: comodel.into(),
                inverse_name: inverse_name.into(),
            },
        )
    }

    pub fn many2many(
        name: impl Into<String>,
        comodel: impl Into<String>,
        relation: impl Into<String>,
        column1: impl Into<String>,
        column2: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            FieldKind::Many2many {
                comodel: comodel.into(),
                relation: relation.into(),
                column1: column1.into(),
                column2: column2.into(),
            },
        )
    }

    /// Whether the value lives in the store. Defaults to `true` for plain
    /// fields and `false` for computed and related fields.
    #[must_use]
    pub fn store(mut self, store: bool) -> Self {
        self.store = Some(store);
        self
    }

    /// Compute with the named model method; its declared dependencies apply.
    #[must_use]
    pub fn compute(mut self, method: impl Into<String>) -> Self {
        self.compute = Some(HookRef::Named(method.into()));
        self
    }

    /// Compute with a closure depending on `depends`.
    #[must_use]
    pub fn compute_with<F>(mut self, depends: &[&str], func: F) -> Self
    where
        F: Fn(&Scope, &FieldDescriptor, &Records) -> Result<()> + Send + Sync + 'static,
    {
        self.compute = Some(HookRef::Closure(Arc::new(func)));
        self.depends = depends.iter().map(|d| (*d).to_string()).collect();
        self
    }

    /// Inverse with the named model method.
    #[must_use]
    pub fn inverse(mut self, method: impl Into<String>) -> Self {
        self.inverse = Some(HookRef::Named(method.into()));
        self
    }

    #[must_use]
    pub fn inverse_with<F>(mut self, func: F) -> Self
    where
        F: Fn(&Scope, &FieldDescriptor, &Records) -> Result<()> + Send + Sync + 'static,
    {
        self.inverse = Some(HookRef::Closure(Arc::new(func)));
        self
    }

    /// Search with the named model search method.
    #[must_use]
    pub fn search(mut self, method: impl Into<String>) -> Self {
        self.search = Some(HookRef::Named(method.into()));
        self
    }

    #[must_use]
    pub fn search_with<F>(mut self, func: F) -> Self
    where
        F: Fn(&Scope, &FieldDescriptor, Operator, &Value) -> Result<Domain> + Send + Sync + 'static,
    {
        self.search = Some(HookRef::Closure(Arc::new(func)));
        self
    }

    /// Make this field mirror the dot-separated `path`.
    #[must_use]
    pub fn related(mut self, path: impl Into<String>) -> Self {
        self.related = Some(path.into());
        self
    }

    /// Value given to records that are not saved yet.
    #[must_use]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    #[must_use]
    pub fn string(mut self, label: impl Into<String>) -> Self {
        self.string = Some(label.into());
        self
    }

    #[must_use]
    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    #[must_use]
    pub fn readonly(mut self, value: bool) -> Self {
        self.readonly = value;
        self
    }

    #[must_use]
    pub fn required(mut self, value: bool) -> Self {
        self.required = value;
        self
    }

    /// Label derived from the field name: `partner_id` becomes `Partner id`.
    pub(crate) fn default_label(name: &str) -> String {
        let spaced = name.replace('_', " ");
        let mut chars = spaced.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

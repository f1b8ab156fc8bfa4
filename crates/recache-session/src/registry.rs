//! Model registry.
//!
//! Models and fields live in an arena: the [`Registry`] owns two flat
//! tables indexed by [`ModelId`] and [`FieldId`]. Triggers, inverse fields
//! and related chains refer to other fields by index only, so the cyclic
//! field graph has no ownership cycles.
//!
//! A registry is declared with [`ModelBuilder`]s and built once:
//!
//! ```ignore
//! let registry = Registry::builder()
//!     .model(ModelBuilder::new("sale.order")
//!         .field(FieldBuilder::one2many("line_ids", "sale.line", "order_id"))
//!         .field(FieldBuilder::float("total").compute("compute_total").store(true))
//!         .method("compute_total", &["line_ids.amount"], compute_total))
//!     .model(ModelBuilder::new("sale.line")
//!         .field(FieldBuilder::many2one("order_id", "sale.order"))
//!         .field(FieldBuilder::float("amount")))
//!     .build()?;
//! ```

use crate::field::{ComputeFn, FieldBuilder, FieldDescriptor, SearchFn};
use crate::graph;
use crate::record::Records;
use crate::scope::Scope;
use recache_core::{
    Domain, Error, FieldId, LookupError, ModelId, Operator, Result, StoreSchema, Value,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A compute/inverse method registered on a model.
#[derive(Clone)]
pub struct Method {
    pub(crate) name: String,
    pub(crate) depends: Vec<String>,
    pub(crate) func: ComputeFn,
}

impl Method {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dependency paths declared with the method.
    pub fn depends(&self) -> &[String] {
        &self.depends
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("depends", &self.depends)
            .finish_non_exhaustive()
    }
}

/// A model: its fields in declaration order and its methods.
pub struct ModelDescriptor {
    pub(crate) id: ModelId,
    pub(crate) name: String,
    pub(crate) fields: Vec<FieldId>,
    pub(crate) by_name: HashMap<String, FieldId>,
    pub(crate) methods: HashMap<String, Method>,
    pub(crate) search_methods: HashMap<String, SearchFn>,
}

impl ModelDescriptor {
    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field ids in declaration order.
    pub fn fields(&self) -> &[FieldId] {
        &self.fields
    }

    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.by_name.get(name).copied()
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }
}

impl fmt::Debug for ModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}

/// The built, immutable table of models and fields.
pub struct Registry {
    pub(crate) models: Vec<ModelDescriptor>,
    pub(crate) fields: Vec<FieldDescriptor>,
    pub(crate) by_name: HashMap<String, ModelId>,
    pub(crate) schema: StoreSchema,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Get a model by id.
    ///
    /// Ids are only handed out by this registry, so an id from another
    /// registry is a programming error.
    pub fn model(&self, id: ModelId) -> &ModelDescriptor {
        &self.models[id.index()]
    }

    pub fn field(&self, id: FieldId) -> &FieldDescriptor {
        &self.fields[id.index()]
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    /// All fields, in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    /// Resolve a model name.
    #[allow(clippy::result_large_err)]
    pub fn model_id(&self, name: &str) -> Result<ModelId> {
        self.by_name.get(name).copied().ok_or_else(|| {
            Error::Lookup(LookupError {
                model: name.to_string(),
                field: None,
            })
        })
    }

    /// Resolve a field name on a model.
    #[allow(clippy::result_large_err)]
    pub fn field_id(&self, model: ModelId, name: &str) -> Result<FieldId> {
        let descriptor = self.model(model);
        descriptor.field_id(name).ok_or_else(|| {
            Error::Lookup(LookupError {
                model: descriptor.name.clone(),
                field: Some(name.to_string()),
            })
        })
    }

    /// Resolve `model.field` names to a descriptor.
    #[allow(clippy::result_large_err)]
    pub fn field_by_name(&self, model: &str, name: &str) -> Result<&FieldDescriptor> {
        let model = self.model_id(model)?;
        Ok(self.field(self.field_id(model, name)?))
    }

    /// Column descriptions for store drivers.
    pub fn schema(&self) -> &StoreSchema {
        &self.schema
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("models", &self.models.len())
            .field("fields", &self.fields.len())
            .finish()
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Declarative definition of a model.
#[derive(Default)]
pub struct ModelBuilder {
    pub(crate) name: String,
    pub(crate) fields: Vec<FieldBuilder>,
    pub(crate) methods: Vec<Method>,
    pub(crate) search_methods: Vec<(String, SearchFn)>,
}

impl ModelBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn field(mut self, field: FieldBuilder) -> Self {
        self.fields.push(field);
        self
    }

    /// Register a compute or inverse method, with the dependency paths it
    /// reads when used as a compute.
    #[must_use]
    pub fn method<F>(mut self, name: impl Into<String>, depends: &[&str], func: F) -> Self
    where
        F: Fn(&Scope, &FieldDescriptor, &Records) -> Result<()> + Send + Sync + 'static,
    {
        self.methods.push(Method {
            name: name.into(),
            depends: depends.iter().map(|d| (*d).to_string()).collect(),
            func: Arc::new(func),
        });
        self
    }

    /// Register a search method.
    #[must_use]
    pub fn search_method<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Scope, &FieldDescriptor, Operator, &Value) -> Result<Domain> + Send + Sync + 'static,
    {
        self.search_methods.push((name.into(), Arc::new(func)));
        self
    }
}

impl fmt::Debug for ModelBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBuilder")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}

/// Collects model definitions; [`RegistryBuilder::build`] runs field setup.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    pub(crate) models: Vec<ModelBuilder>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn model(mut self, model: ModelBuilder) -> Self {
        self.models.push(model);
        self
    }

    /// Build the registry: resolve hooks and inverse fields, set up related
    /// fields, and register every dependency trigger.
    ///
    /// Fails with a setup error for unknown names and malformed dependency
    /// paths, and with [`Error::TypeConsistency`] for a related field whose
    /// type differs from its target.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<Arc<Registry>> {
        graph::build(self).map(Arc::new)
    }
}

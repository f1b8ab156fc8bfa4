//! recache - an ORM record cache with dependency-tracked computed fields.
//!
//! recache sits between record handles and a backing store:
//!
//! - Per-scope caching of field values with read-through and write-through
//! - Computed fields, stored or not, derived from dependency paths
//! - Related fields that mirror a field through a relation chain
//! - Batched recomputation of stored computed fields
//! - Draft mode for cache-only edits
//! - Cache invalidation across scopes and threads
//!
//! # Quick Start
//!
//! ```ignore
//! use recache::prelude::*;
//!
//! let registry = Registry::builder()
//!     .model(ModelBuilder::new("res.partner").field(FieldBuilder::char("name")))
//!     .model(ModelBuilder::new("sale.order")
//!         .field(FieldBuilder::many2one("partner_id", "res.partner"))
//!         .field(FieldBuilder::char("partner_name").related("partner_id.name")))
//!     .build()?;
//! let store = Arc::new(MemoryStore::new(registry.schema().clone()));
//! let scope = Connection::open(registry, store).scope(SUPERUSER_ID);
//!
//! let partner = scope.create("res.partner", &[("name", "Azure".into())])?;
//! let order = scope.create("sale.order", &[("partner_id", partner.id().into())])?;
//! assert_eq!(scope.get(&order, "partner_name")?, Value::from("Azure"));
//! ```

pub use recache_core::{
    AccessError, BackingStore, CacheInconsistencyError, ColumnKind, ColumnSchema, Condition,
    Domain, EngineConfig, Error, FieldId, InconsistentEntry, LookupError, ModelId, ModelSchema,
    NEW_ID, Operator, RecordId, ReentrancyError, Result, Row, SUPERUSER_ID, SetupError,
    SetupErrorKind, StoreContext, StoreError, StoreErrorKind, StoreSchema, TypeConsistencyError,
    TypeError, Uid, UnassignedError, Value, Values,
};
pub use recache_memory::{MemoryStore, StoreStats};
pub use recache_session::{
    CacheDump, Connection, DraftGuard, FieldBuilder, FieldDescription, FieldDescriptor,
    FieldKind, ModelBuilder, Overrides, Record, Records, Recomputation, Registry, Scope,
    ScopeArgs, ScopeGuard, Slot, Trigger, live_scope_count,
};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        // Store
        BackingStore,
        Condition,
        // Engine
        Connection,
        Domain,
        EngineConfig,
        Error,
        FieldBuilder,
        FieldDescriptor,
        MemoryStore,
        ModelBuilder,
        Operator,
        Record,
        Records,
        Registry,
        Result,
        SUPERUSER_ID,
        Scope,
        Value,
    };
    pub use std::sync::Arc;
}

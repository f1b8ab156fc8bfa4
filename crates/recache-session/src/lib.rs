//! Scopes, record cache and computed-field engine for recache.
//!
//! `recache-session` is the **engine layer**. It keeps a per-scope cache of
//! record values in front of a [`BackingStore`](recache_core::BackingStore)
//! and keeps derived fields consistent with what they depend on.
//!
//! # Role In The Architecture
//!
//! - **Registry**: models and fields declared once, held in an arena and
//!   linked by dependency triggers built at setup time.
//! - **Scopes**: execution contexts (connection, principal, options), each
//!   owning a cache; equal identities share one scope per thread.
//! - **Slot engine**: read-through, write-through, and lazy computation of
//!   derived fields, with cycle detection.
//! - **Recomputation**: stored computed fields are scheduled when their
//!   dependencies change and recomputed in batches.
//! - **Draft mode**: cache-only edits until an explicit save.
//!
//! # Example
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
//!
//! let connection = Connection::open(registry, store);
//! let scope = connection.scope(uid);
//! let order = scope.create("sale.order", &[])?;
//! scope.create("sale.line", &[("order_id", order.id().into()), ("amount", 10.0.into())])?;
//! assert_eq!(scope.get(&order, "total")?, Value::Double(10.0));
//! ```

pub mod cache;
pub mod check;
pub mod draft;
mod engine;
pub mod field;
mod graph;
pub mod record;
pub mod recompute;
pub mod registry;
mod related;
pub mod scope;

pub use cache::{Cache, ModelCache, RecordCache, Slot};
pub use check::CacheDump;
pub use draft::{DraftGuard, DraftSwitch};
pub use field::{
    ComputeFn, FieldBuilder, FieldDescription, FieldDescriptor, FieldKind, Hook, HookRef,
    SearchFn, Trigger,
};
pub use record::{NewRecord, Record, RecordKey, Records};
pub use recompute::{RecomputePass, Recomputation};
pub use registry::{Method, ModelBuilder, ModelDescriptor, Registry, RegistryBuilder};
pub use scope::{Connection, Overrides, Scope, ScopeArgs, ScopeGuard, live_scope_count};

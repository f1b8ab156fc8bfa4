//! Core types for the recache record cache.
//!
//! This crate provides the foundations shared by the engine and its store
//! drivers:
//!
//! - `Value` for dynamically-typed field values
//! - identifiers for records, principals, models and fields
//! - the `Error` taxonomy
//! - the `BackingStore` contract and its `Domain`/`StoreSchema` vocabulary
//! - `EngineConfig`

pub mod config;
pub mod error;
pub mod identifiers;
pub mod store;
pub mod value;

pub use config::EngineConfig;
pub use error::{
    AccessError, CacheInconsistencyError, Error, InconsistentEntry, LookupError,
    ReentrancyError, Result, SetupError, SetupErrorKind, StoreError, StoreErrorKind,
    TypeConsistencyError, TypeError, UnassignedError,
};
pub use identifiers::{FieldId, ModelId, NEW_ID, RecordId, SUPERUSER_ID, Uid};
pub use store::{
    BackingStore, ColumnKind, ColumnSchema, Condition, Domain, ModelSchema, Operator, Row,
    StoreContext, StoreSchema, Values,
};
pub use value::Value;

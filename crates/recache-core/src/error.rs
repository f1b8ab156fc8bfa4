//! Error types for record cache operations.

use crate::identifiers::RecordId;
use crate::value::Value;
use std::fmt;

/// The primary error type for all record cache operations.
#[derive(Debug)]
pub enum Error {
    /// A field access found its own slot busy: a cyclic or re-entrant
    /// derivation was entered.
    Reentrancy(ReentrancyError),
    /// The backing store refused or failed a read-through.
    Access(AccessError),
    /// The cache self-check found cached values that disagree with the store.
    CacheInconsistency(CacheInconsistencyError),
    /// A related field's type disagrees with its target field.
    TypeConsistency(TypeConsistencyError),
    /// Field graph setup failed (unknown field, method, bad dependency path).
    Setup(SetupError),
    /// A model or field name could not be resolved.
    Lookup(LookupError),
    /// The backing store failed for a reason other than access denial.
    Store(StoreError),
    /// Value conversion errors
    Type(TypeError),
    /// A compute pass returned without assigning the field.
    Unassigned(UnassignedError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug, Clone)]
pub struct ReentrancyError {
    pub model: String,
    pub field: String,
    pub id: Option<RecordId>,
}

#[derive(Debug, Clone)]
pub struct AccessError {
    pub model: String,
    pub field: Option<String>,
    pub ids: Vec<RecordId>,
    pub message: String,
}

/// One cached value that disagrees with a fresh fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct InconsistentEntry {
    pub model: String,
    pub id: RecordId,
    pub field: String,
    pub cached: Value,
    pub fetched: Value,
}

#[derive(Debug, Clone)]
pub struct CacheInconsistencyError {
    pub entries: Vec<InconsistentEntry>,
}

#[derive(Debug, Clone)]
pub struct TypeConsistencyError {
    /// The related field, as `model.field`
    pub field: String,
    /// The target field at the end of the related path, as `model.field`
    pub target: String,
    pub expected: String,
    pub found: String,
}

#[derive(Debug, Clone)]
pub struct SetupError {
    pub kind: SetupErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupErrorKind {
    /// Dependency path names a field that does not exist
    UnknownField,
    /// Relational field points to an unknown model
    UnknownModel,
    /// Named compute/inverse/search method is not registered on the model
    UnknownMethod,
    /// Dependency path is syntactically invalid or traverses a non-relational field
    InvalidPath,
    /// Model or field registered twice
    Duplicate,
    /// Derived field with neither a compute method nor a related path
    MissingCompute,
}

#[derive(Debug, Clone)]
pub struct LookupError {
    pub model: String,
    pub field: Option<String>,
}

#[derive(Debug)]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Record does not exist in the store
    Missing,
    /// Constraint rejected the write
    Constraint,
    /// Domain could not be evaluated
    InvalidDomain,
    /// Other store failure
    Backend,
}

#[derive(Debug, Clone)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub field: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UnassignedError {
    pub model: String,
    pub field: String,
    pub id: Option<RecordId>,
}

impl Error {
    /// Is this a reentrancy (cycle) error?
    pub fn is_reentrancy(&self) -> bool {
        matches!(self, Error::Reentrancy(_))
    }

    /// Is this a collaborator access denial?
    pub fn is_access(&self) -> bool {
        matches!(self, Error::Access(_))
    }

    /// Errors raised while building the field graph, before any record traffic.
    pub fn is_setup(&self) -> bool {
        matches!(self, Error::Setup(_) | Error::TypeConsistency(_))
    }

    /// Whether the cache self-check should skip the record instead of failing.
    pub fn is_skippable_on_check(&self) -> bool {
        match self {
            Error::Access(_) => true,
            Error::Store(e) => e.kind == StoreErrorKind::Missing,
            _ => false,
        }
    }

    pub fn setup(kind: SetupErrorKind, message: impl Into<String>) -> Self {
        Error::Setup(SetupError {
            kind,
            message: message.into(),
        })
    }

    /// Shorthand for an unknown-field setup error.
    pub fn unknown_field(model: &str, field: &str) -> Self {
        Self::setup(
            SetupErrorKind::UnknownField,
            format!("field '{field}' does not exist on model '{model}'"),
        )
    }

    /// Shorthand for an unknown-model setup error.
    pub fn unknown_model(model: &str) -> Self {
        Self::setup(
            SetupErrorKind::UnknownModel,
            format!("model '{model}' is not registered"),
        )
    }

    /// Shorthand for an unknown-method setup error.
    pub fn unknown_method(model: &str, method: &str) -> Self {
        Self::setup(
            SetupErrorKind::UnknownMethod,
            format!("method '{method}' is not registered on model '{model}'"),
        )
    }

    /// Shorthand for an invalid dependency path.
    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::setup(SetupErrorKind::InvalidPath, message)
    }

    /// Shorthand for a duplicate registration.
    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::setup(SetupErrorKind::Duplicate, message)
    }

    /// Shorthand for a store backend failure.
    pub fn store(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Error::Store(StoreError {
            kind,
            message: message.into(),
            source: None,
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Reentrancy(e) => write!(f, "Reentrancy error: {}", e),
            Error::Access(e) => write!(f, "Access error: {}", e),
            Error::CacheInconsistency(e) => write!(f, "Cache inconsistency: {}", e),
            Error::TypeConsistency(e) => write!(f, "Type consistency error: {}", e),
            Error::Setup(e) => write!(f, "Setup error: {}", e.message),
            Error::Lookup(e) => write!(f, "Lookup error: {}", e),
            Error::Store(e) => write!(f, "Store error: {}", e.message),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Unassigned(e) => write!(f, "Unassigned value: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ReentrancyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(
                f,
                "no value for field {}.{} on record {} (field is being computed)",
                self.model, self.field, id
            ),
            None => write!(
                f,
                "no value for field {}.{} on a new record (field is being computed)",
                self.model, self.field
            ),
        }
    }
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(
                f,
                "cannot read {} on {}{:?}: {}",
                field, self.model, self.ids, self.message
            ),
            None => write!(f, "{}{:?}: {}", self.model, self.ids, self.message),
        }
    }
}

impl fmt::Display for CacheInconsistencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "invalid cache for {} value(s):", self.entries.len())?;
        for e in &self.entries {
            writeln!(
                f,
                "  - {}({}).{}: cached {:?}, fetched {:?}",
                e.model, e.id, e.field, e.cached, e.fetched
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for TypeConsistencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type of related field {} ({}) is inconsistent with {} ({})",
            self.field, self.expected, self.target, self.found
        )
    }
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "unknown field '{}' on model '{}'", field, self.model),
            None => write!(f, "unknown model '{}'", self.model),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(field) = &self.field {
            write!(
                f,
                "expected {} for field '{}', found {}",
                self.expected, field, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for UnassignedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "compute of {}.{} did not assign a value",
            self.model, self.field
        )?;
        if let Some(id) = self.id {
            write!(f, " for record {}", id)?;
        }
        Ok(())
    }
}

impl From<ReentrancyError> for Error {
    fn from(err: ReentrancyError) -> Self {
        Error::Reentrancy(err)
    }
}

impl From<AccessError> for Error {
    fn from(err: AccessError) -> Self {
        Error::Access(err)
    }
}

impl From<CacheInconsistencyError> for Error {
    fn from(err: CacheInconsistencyError) -> Self {
        Error::CacheInconsistency(err)
    }
}

impl From<TypeConsistencyError> for Error {
    fn from(err: TypeConsistencyError) -> Self {
        Error::TypeConsistency(err)
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::Store(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Custom(format!("serialization error: {err}"))
    }
}

/// Result type alias for record cache operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        let reentrant = Error::Reentrancy(ReentrancyError {
            model: "sale.order".to_string(),
            field: "total".to_string(),
            id: Some(4),
        });
        assert!(reentrant.is_reentrancy());
        assert!(!reentrant.is_access());

        let denied = Error::Access(AccessError {
            model: "sale.order".to_string(),
            field: Some("name".to_string()),
            ids: vec![4],
            message: "denied".to_string(),
        });
        assert!(denied.is_access());
        assert!(denied.is_skippable_on_check());

        assert!(Error::unknown_field("a", "b").is_setup());
        assert!(!Error::store(StoreErrorKind::Backend, "boom").is_skippable_on_check());
        assert!(Error::store(StoreErrorKind::Missing, "gone").is_skippable_on_check());
    }

    #[test]
    fn display_messages() {
        let err = Error::Reentrancy(ReentrancyError {
            model: "m".to_string(),
            field: "a".to_string(),
            id: Some(1),
        });
        assert_eq!(
            err.to_string(),
            "Reentrancy error: no value for field m.a on record 1 (field is being computed)"
        );

        let err = Error::TypeConsistency(TypeConsistencyError {
            field: "sale.order.partner_name".to_string(),
            target: "res.partner.name".to_string(),
            expected: "integer".to_string(),
            found: "char".to_string(),
        });
        assert!(err.to_string().contains("inconsistent with res.partner.name"));

        let err = Error::Lookup(LookupError {
            model: "m".to_string(),
            field: Some("x".to_string()),
        });
        assert_eq!(err.to_string(), "Lookup error: unknown field 'x' on model 'm'");
    }

    #[test]
    fn inconsistency_lists_every_entry() {
        let err = CacheInconsistencyError {
            entries: vec![InconsistentEntry {
                model: "m".to_string(),
                id: 2,
                field: "f".to_string(),
                cached: Value::BigInt(1),
                fetched: Value::BigInt(2),
            }],
        };
        let text = err.to_string();
        assert!(text.contains("m(2).f"));
        assert!(text.contains("BigInt(1)"));
    }
}

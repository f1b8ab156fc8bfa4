//! Identifiers for records, principals, and registry entries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Database id of a record. `0` is reserved for records not yet saved.
pub type RecordId = i64;

/// Id carried by records that exist only in memory.
pub const NEW_ID: RecordId = 0;

/// Id of the acting principal (user).
pub type Uid = i64;

/// The superuser principal, used for trigger resolution and `sudo`.
pub const SUPERUSER_ID: Uid = 1;

/// Index of a model in the registry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelId(pub u32);

/// Index of a field in the registry arena.
///
/// Field ids are handed out in declaration order, so ordering by `FieldId`
/// is ordering by declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldId(pub u32);

impl ModelId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl FieldId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model#{}", self.0)
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_ids_order_by_declaration() {
        let mut ids = vec![FieldId(3), FieldId(0), FieldId(2)];
        ids.sort();
        assert_eq!(ids, vec![FieldId(0), FieldId(2), FieldId(3)]);
        assert_eq!(FieldId(2).index(), 2);
        assert_eq!(ModelId(1).to_string(), "model#1");
    }
}

//! Cache dump and self-check.
//!
//! Diagnostics only: the check invalidates the whole cache of the scope and
//! reads every dumped value again, so it is meant for tests and debugging.

use crate::record::Record;
use crate::scope::Scope;
use recache_core::{CacheInconsistencyError, Error, InconsistentEntry, RecordId, Result, Value};
use std::collections::BTreeMap;

/// Cached values by model name, record id and field name.
pub type CacheDump = BTreeMap<String, BTreeMap<RecordId, BTreeMap<String, Value>>>;

impl Scope {
    /// Snapshot of every trusted value in this scope's cache.
    pub fn dump(&self) -> CacheDump {
        let registry = self.registry();
        let raw = self.cache.lock().dump();
        raw.into_iter()
            .map(|(model, records)| {
                let records = records
                    .into_iter()
                    .map(|(id, fields)| {
                        let fields = fields
                            .into_iter()
                            .map(|(field, value)| (registry.field(field).name().to_string(), value))
                            .collect();
                        (id, fields)
                    })
                    .collect();
                (registry.model(model).name().to_string(), records)
            })
            .collect()
    }

    /// Compare every cached value with a fresh read.
    ///
    /// Records the store refuses or no longer has are skipped. Any other
    /// error aborts the check.
    #[allow(clippy::result_large_err)]
    pub fn check_cache(&self) -> Result<()> {
        let snapshot = self.cache.lock().dump();
        self.invalidate_all();

        let registry = self.registry();
        let mut entries = Vec::new();
        for (model, records) in snapshot {
            for (id, fields) in records {
                let record = Record::new(model, id);
                for (field, cached) in fields {
                    let fetched = match self.get_field(&record, field) {
                        Ok(value) => value,
                        Err(err) if err.is_skippable_on_check() => continue,
                        Err(err) => return Err(err),
                    };
                    if fetched != cached {
                        entries.push(InconsistentEntry {
                            model: registry.model(model).name().to_string(),
                            id,
                            field: registry.field(field).name().to_string(),
                            cached,
                            fetched,
                        });
                    }
                }
            }
        }

        if entries.is_empty() {
            Ok(())
        } else {
            tracing::warn!(count = entries.len(), "Cache disagrees with the store");
            Err(Error::CacheInconsistency(CacheInconsistencyError { entries }))
        }
    }
}

//! Engine configuration.

use crate::identifiers::{SUPERUSER_ID, Uid};

/// Configuration attached to a connection and shared by all of its scopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Whether a read-through of a stored field also fetches every other
    /// prefetchable stored field, for every record of the model cache that
    /// lacks the requested field.
    pub prefetch: bool,
    /// Whether every non-draft write ends with a recomputation pass over
    /// the pending stored fields.
    pub recompute_on_write: bool,
    /// Whether leaving draft mode without a save invalidates the values that
    /// were assigned in draft mode.
    pub discard_drafts_on_exit: bool,
    /// Principal used for trigger resolution and `Scope::sudo`.
    pub superuser: Uid,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prefetch: true,
            recompute_on_write: true,
            discard_drafts_on_exit: true,
            superuser: SUPERUSER_ID,
        }
    }
}

impl EngineConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `prefetch` option (builder pattern).
    #[must_use]
    pub fn prefetch(mut self, value: bool) -> Self {
        self.prefetch = value;
        self
    }

    /// Set the `recompute_on_write` option (builder pattern).
    #[must_use]
    pub fn recompute_on_write(mut self, value: bool) -> Self {
        self.recompute_on_write = value;
        self
    }

    /// Set the `discard_drafts_on_exit` option (builder pattern).
    #[must_use]
    pub fn discard_drafts_on_exit(mut self, value: bool) -> Self {
        self.discard_drafts_on_exit = value;
        self
    }

    /// Set the superuser principal (builder pattern).
    #[must_use]
    pub fn superuser(mut self, uid: Uid) -> Self {
        self.superuser = uid;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = EngineConfig::new().prefetch(false).superuser(7);
        assert!(!config.prefetch);
        assert!(config.recompute_on_write);
        assert_eq!(config.superuser, 7);
        assert_eq!(EngineConfig::default().superuser, SUPERUSER_ID);
    }
}

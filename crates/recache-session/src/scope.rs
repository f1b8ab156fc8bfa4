//! Scopes: execution contexts for record operations.
//!
//! A scope is identified by its connection, acting principal (uid) and
//! option map. It owns a record cache, and shares the recomputation manager
//! and draft switch of its thread.
//!
//! Scopes are looked up by value: asking twice for the same identity on one
//! thread returns the same scope (and thus the same cache). Every scope is
//! also registered in a process-wide live-scope registry, which is how an
//! invalidation reaches the caches of every scope on the same database,
//! including those of other threads.
//!
//! Scopes can be used explicitly (`connection.scope(uid)`), or pushed on
//! the thread's scope stack with [`Scope::enter`] and retrieved with
//! [`Scope::current`]. When the stack of a thread becomes empty, the
//! thread's scopes are released. The thread only keeps weak handles to
//! scopes it did not enter, so a scope nobody holds is dropped with its
//! cache.

use crate::cache::Cache;
use crate::draft::{DraftGuard, DraftSwitch};
use crate::recompute::Recomputation;
use crate::registry::Registry;
use parking_lot::Mutex;
use recache_core::{BackingStore, EngineConfig, StoreContext, Uid, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

// ============================================================================
// Connection
// ============================================================================

static CONNECTION_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Handle on a database: a registry of models and the store holding their
/// records.
pub struct Connection {
    id: u64,
    registry: Arc<Registry>,
    store: Arc<dyn BackingStore>,
    config: EngineConfig,
}

impl Connection {
    /// Open a connection with the default configuration.
    pub fn open(registry: Arc<Registry>, store: Arc<dyn BackingStore>) -> Arc<Self> {
        Self::with_config(registry, store, EngineConfig::default())
    }

    pub fn with_config(
        registry: Arc<Registry>,
        store: Arc<dyn BackingStore>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let id = CONNECTION_SERIAL.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection = id, ?config, "Connection opened");
        Arc::new(Self {
            id,
            registry,
            store,
            config,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The scope of `uid` on this connection, without options.
    pub fn scope(self: &Arc<Self>, uid: Uid) -> Arc<Scope> {
        Scope::new(ScopeArgs::new(Arc::clone(self), uid))
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Scope identity
// ============================================================================

/// Identity of a scope. Two scopes with equal args are the same scope.
#[derive(Clone)]
pub struct ScopeArgs {
    pub connection: Arc<Connection>,
    pub uid: Uid,
    pub options: BTreeMap<String, Value>,
}

impl ScopeArgs {
    pub fn new(connection: Arc<Connection>, uid: Uid) -> Self {
        Self {
            connection,
            uid,
            options: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

impl PartialEq for ScopeArgs {
    fn eq(&self, other: &Self) -> bool {
        self.connection.id == other.connection.id
            && self.uid == other.uid
            && self.options == other.options
    }
}

impl fmt::Debug for ScopeArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeArgs")
            .field("connection", &self.connection.id)
            .field("uid", &self.uid)
            .field("options", &self.options)
            .finish()
    }
}

/// Changes applied by [`Scope::derive`].
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    uid: Option<Uid>,
    options: Option<BTreeMap<String, Value>>,
    extra: BTreeMap<String, Value>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Act as another principal.
    #[must_use]
    pub fn uid(mut self, uid: Uid) -> Self {
        self.uid = Some(uid);
        self
    }

    /// Replace the whole option map.
    #[must_use]
    pub fn options(mut self, options: BTreeMap<String, Value>) -> Self {
        self.options = Some(options);
        self
    }

    /// Add or update one option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Scope
// ============================================================================

/// An execution context: identity, record cache, and the thread's
/// recomputation manager and draft switch.
pub struct Scope {
    args: ScopeArgs,
    thread: ThreadId,
    me: Weak<Scope>,
    pub(crate) cache: Mutex<Cache>,
    pub(crate) recomputation: Arc<Recomputation>,
    pub(crate) draft: Arc<DraftSwitch>,
}

#[derive(Default)]
struct ThreadScopes {
    stack: Vec<Arc<Scope>>,
    scopes: Vec<Weak<Scope>>,
    recomputations: HashMap<u64, Arc<Recomputation>>,
    draft: Option<Arc<DraftSwitch>>,
}

thread_local! {
    static THREAD_SCOPES: RefCell<ThreadScopes> = RefCell::new(ThreadScopes::default());
}

impl Scope {
    /// The scope with identity `args` on this thread, created and
    /// registered if it does not exist yet.
    pub fn new(args: ScopeArgs) -> Arc<Scope> {
        THREAD_SCOPES.with(|cell| {
            let mut thread = cell.borrow_mut();
            if let Some(existing) = thread
                .scopes
                .iter()
                .filter_map(Weak::upgrade)
                .find(|scope| scope.args == args)
            {
                return existing;
            }

            let recomputation = Arc::clone(
                thread
                    .recomputations
                    .entry(args.connection.id)
                    .or_insert_with(|| Arc::new(Recomputation::new())),
            );
            let draft = Arc::clone(
                thread
                    .draft
                    .get_or_insert_with(|| Arc::new(DraftSwitch::new())),
            );
            tracing::debug!(
                connection = args.connection.id,
                uid = args.uid,
                options = args.options.len(),
                "Scope created"
            );
            let scope = Arc::new_cyclic(|me| Scope {
                args,
                thread: std::thread::current().id(),
                me: me.clone(),
                cache: Mutex::new(Cache::new()),
                recomputation,
                draft,
            });
            thread.scopes.retain(|weak| weak.strong_count() > 0);
            thread.scopes.push(Arc::downgrade(&scope));
            live::register(&scope);
            scope
        })
    }

    /// Push this scope on the thread's scope stack until the guard drops.
    pub fn enter(self: &Arc<Self>) -> ScopeGuard {
        THREAD_SCOPES.with(|cell| cell.borrow_mut().stack.push(Arc::clone(self)));
        ScopeGuard {
            _not_send: PhantomData,
        }
    }

    /// Top of the thread's scope stack.
    pub fn current() -> Option<Arc<Scope>> {
        THREAD_SCOPES.with(|cell| cell.borrow().stack.last().cloned())
    }

    /// Depth of the thread's scope stack.
    pub fn depth() -> usize {
        THREAD_SCOPES.with(|cell| cell.borrow().stack.len())
    }

    /// A scope equal to this one except for `overrides`.
    pub fn derive(&self, overrides: Overrides) -> Arc<Scope> {
        let mut args = self.args.clone();
        if let Some(uid) = overrides.uid {
            args.uid = uid;
        }
        if let Some(options) = overrides.options {
            args.options = options;
        }
        args.options.extend(overrides.extra);
        Scope::new(args)
    }

    /// The same scope acting as the superuser.
    pub fn sudo(&self) -> Arc<Scope> {
        self.derive(Overrides::new().uid(self.config().superuser))
    }

    pub fn with_option(&self, key: impl Into<String>, value: impl Into<Value>) -> Arc<Scope> {
        self.derive(Overrides::new().option(key, value))
    }

    pub fn args(&self) -> &ScopeArgs {
        &self.args
    }

    pub fn uid(&self) -> Uid {
        self.args.uid
    }

    pub fn options(&self) -> &BTreeMap<String, Value> {
        &self.args.options
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.args.options.get(key)
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.args.connection
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.args.connection.registry
    }

    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.args.connection.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.args.connection.config
    }

    /// Thread this scope was created on.
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn recomputation(&self) -> &Recomputation {
        &self.recomputation
    }

    /// Switch the thread to draft mode until the guard is dropped.
    pub fn draft(&self) -> DraftGuard {
        self.draft.enter()
    }

    pub fn is_draft(&self) -> bool {
        self.draft.is_active()
    }

    pub(crate) fn weak(&self) -> Weak<Scope> {
        self.me.clone()
    }

    /// Context for store calls made on behalf of the acting principal.
    pub(crate) fn store_context(&self) -> StoreContext {
        StoreContext {
            uid: self.args.uid,
            options: self.args.options.clone(),
        }
    }

    /// Context for trigger resolution and recomputation writes: superuser,
    /// inactive records included.
    pub(crate) fn sudo_context(&self) -> StoreContext {
        let mut options = self.args.options.clone();
        options.insert("active_test".to_string(), Value::Bool(false));
        StoreContext {
            uid: self.config().superuser,
            options,
        }
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.args == other.args
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("args", &self.args)
            .field("thread", &self.thread)
            .finish_non_exhaustive()
    }
}

/// Guard returned by [`Scope::enter`]; pops the scope on drop.
#[must_use = "the scope is popped when the guard is dropped"]
pub struct ScopeGuard {
    _not_send: PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let released = THREAD_SCOPES.with(|cell| {
            let mut thread = cell.borrow_mut();
            thread.stack.pop();
            if thread.stack.is_empty() {
                Some(std::mem::take(&mut *thread))
            } else {
                None
            }
        });
        if let Some(released) = released {
            tracing::trace!(scopes = released.scopes.len(), "Releasing thread scopes");
            drop(released);
        }
    }
}

impl fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ScopeGuard")
    }
}

// ============================================================================
// Live-scope registry
// ============================================================================

/// Process-wide list of live scopes.
///
/// The lock is only held to register a scope or to take a snapshot; it is
/// never held while a cache is locked or a store is called.
pub(crate) mod live {
    use super::Scope;
    use crate::registry::Registry;
    use parking_lot::Mutex;
    use std::sync::{Arc, Weak};

    static LIVE: Mutex<Vec<Weak<Scope>>> = parking_lot::const_mutex(Vec::new());

    pub(crate) fn register(scope: &Arc<Scope>) {
        let mut live = LIVE.lock();
        live.retain(|weak| weak.strong_count() > 0);
        live.push(Arc::downgrade(scope));
    }

    /// Live scopes whose connection uses `registry`.
    pub(crate) fn sharing(registry: &Arc<Registry>) -> Vec<Arc<Scope>> {
        let snapshot: Vec<Arc<Scope>> = {
            let live = LIVE.lock();
            live.iter().filter_map(Weak::upgrade).collect()
        };
        snapshot
            .into_iter()
            .filter(|scope| Arc::ptr_eq(scope.registry(), registry))
            .collect()
    }

    /// Number of live scopes in the process.
    pub(crate) fn count() -> usize {
        LIVE.lock()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

/// Number of scopes alive in the process, on every thread.
pub fn live_scope_count() -> usize {
    live::count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldBuilder;
    use crate::registry::ModelBuilder;
    use recache_core::{Domain, RecordId, Result, Row, Values};

    struct NullStore;

    impl BackingStore for NullStore {
        fn read(&self, _: &StoreContext, _: &str, _: &[RecordId], _: &[&str]) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }
        fn write(&self, _: &StoreContext, _: &str, _: &[RecordId], _: &Values) -> Result<()> {
            Ok(())
        }
        fn search(&self, _: &StoreContext, _: &str, _: &Domain) -> Result<Vec<RecordId>> {
            Ok(Vec::new())
        }
        fn create(&self, _: &StoreContext, _: &str, _: &Values) -> Result<RecordId> {
            Ok(1)
        }
    }

    fn connection() -> Arc<Connection> {
        let registry = Registry::builder()
            .model(ModelBuilder::new("m").field(FieldBuilder::char("name")))
            .build()
            .unwrap();
        Connection::open(registry, Arc::new(NullStore))
    }

    #[test]
    fn test_equal_identity_reuses_scope() {
        let conn = connection();
        let a = conn.scope(2);
        let b = Scope::new(ScopeArgs::new(Arc::clone(&conn), 2));
        assert!(Arc::ptr_eq(&a, &b));

        let c = a.with_option("lang", "fr_FR");
        assert!(!Arc::ptr_eq(&a, &c));
        let d = Scope::new(ScopeArgs::new(Arc::clone(&conn), 2).with_option("lang", "fr_FR"));
        assert!(Arc::ptr_eq(&c, &d));
    }

    #[test]
    fn test_sudo_changes_only_principal() {
        let conn = connection();
        let scope = conn.scope(5).with_option("tz", "UTC");
        let sudo = scope.sudo();
        assert_eq!(sudo.uid(), recache_core::SUPERUSER_ID);
        assert_eq!(sudo.option("tz"), Some(&Value::from("UTC")));
        assert!(Arc::ptr_eq(&sudo.recomputation, &scope.recomputation));
        assert!(Arc::ptr_eq(&sudo.draft, &scope.draft));
    }

    #[test]
    fn test_derive_replaces_options() {
        let conn = connection();
        let scope = conn.scope(5).with_option("tz", "UTC");
        let derived = scope.derive(Overrides::new().options(BTreeMap::new()).option("lang", "en"));
        assert_eq!(derived.option("tz"), None);
        assert_eq!(derived.option("lang"), Some(&Value::from("en")));
    }

    #[test]
    fn test_stack_push_pop() {
        let conn = connection();
        let scope = conn.scope(3);
        assert!(Scope::current().is_none());
        {
            let _outer = scope.enter();
            let sudo = scope.sudo();
            {
                let _inner = sudo.enter();
                assert_eq!(Scope::depth(), 2);
                assert!(Arc::ptr_eq(&Scope::current().unwrap(), &sudo));
            }
            assert!(Arc::ptr_eq(&Scope::current().unwrap(), &scope));
        }
        assert_eq!(Scope::depth(), 0);
        assert!(Scope::current().is_none());
    }

    #[test]
    fn test_release_forgets_thread_scopes() {
        let conn = connection();
        let weak = {
            let scope = conn.scope(9);
            let _guard = scope.enter();
            Arc::downgrade(&scope)
        };
        // released with the empty stack, nothing else holds it
        assert!(weak.upgrade().is_none());
        let again = conn.scope(9);
        assert!(Arc::ptr_eq(&again, &conn.scope(9)));
    }

    #[test]
    fn test_unheld_derived_scopes_are_dropped() {
        let conn = connection();
        let base = conn.scope(7);
        let derived: Vec<Weak<Scope>> = (0..200i64)
            .map(|i| Arc::downgrade(&base.with_option("req", i)))
            .collect();
        assert!(derived.iter().all(|weak| weak.upgrade().is_none()));

        let fresh = base.with_option("req", 0i64);
        assert_eq!(fresh.option("req"), Some(&Value::from(0i64)));
        let known = THREAD_SCOPES.with(|cell| cell.borrow().scopes.len());
        assert_eq!(known, 2);
        assert!(Arc::ptr_eq(&base, &conn.scope(7)));
    }

    #[test]
    fn test_scopes_are_per_thread() {
        let conn = connection();
        let here = conn.scope(4);
        let conn2 = Arc::clone(&conn);
        let there_thread = std::thread::spawn(move || {
            let there = conn2.scope(4);
            there.thread()
        })
        .join()
        .unwrap();
        assert_ne!(here.thread(), there_thread);
        assert!(live_scope_count() >= 1);
    }
}

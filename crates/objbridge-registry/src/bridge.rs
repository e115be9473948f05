//! The bridge context.
//!
//! A [`Bridge`] owns every piece of bridge state: the instance cache, the
//! callback table, the deferred release queue and the type factory registry.
//! There are no globals; native code reaches the bridge through whatever
//! handle the embedding keeps, and `shutdown` tears all of it down.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use objbridge_core::{
    BridgeConfig, BridgeError, BridgeResult, CallbackHandle, Handle, ManagedType, NativeRuntime,
    TypeHash,
};
use tracing::{debug, error, info, trace, warn};

use crate::cache::InstanceCache;
use crate::callbacks::CallbackTable;
use crate::deferred::ReleaseQueue;
use crate::factory::{Binding, Constructor, TypeFactoryRegistry, TypeRegistration};
use crate::object::{Managed, downcast};

const RUNNING: u8 = 0;
const SHUTTING_DOWN: u8 = 1;
const SHUT_DOWN: u8 = 2;

/// State shared by every clone of a [`Bridge`] and referenced weakly by
/// wrappers.
pub(crate) struct Shared {
    pub(crate) native: Arc<dyn NativeRuntime>,
    pub(crate) config: BridgeConfig,
    pub(crate) instances: InstanceCache,
    pub(crate) callbacks: CallbackTable,
    pub(crate) releases: ReleaseQueue,
    pub(crate) factories: TypeFactoryRegistry,
    live_wrappers: AtomicUsize,
    /// Address of the root object, zero if none.
    root: AtomicUsize,
    state: AtomicU8,
    collected: AtomicBool,
}

impl Shared {
    pub(crate) fn ensure_running(&self) -> BridgeResult<()> {
        if self.state.load(Ordering::Acquire) != RUNNING {
            return Err(BridgeError::ShutDown);
        }
        Ok(())
    }

    fn is_shutting_down(&self) -> bool {
        self.state.load(Ordering::Acquire) != RUNNING
    }

    pub(crate) fn root(&self) -> Option<Handle> {
        Handle::from_addr(self.root.load(Ordering::Acquire)).non_null()
    }

    /// Fails if `handle` is the root and other wrappers are still live.
    ///
    /// Shutdown disposes the root last and is exempt.
    pub(crate) fn check_teardown_order(&self, handle: Handle) -> BridgeResult<()> {
        if self.root() != Some(handle) || self.is_shutting_down() {
            return Ok(());
        }
        let live = self.instances.live_count_except(handle);
        if live > 0 {
            error!(%handle, live, "root object disposed before the objects that depend on it");
            return Err(BridgeError::TeardownOrderViolation { handle, live });
        }
        Ok(())
    }

    pub(crate) fn wrapper_created(&self) {
        self.live_wrappers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn wrapper_dropped(&self) {
        self.live_wrappers.fetch_sub(1, Ordering::Relaxed);
    }

    fn native_destroyed(&self, handle: Handle) -> bool {
        match self.instances.get(handle) {
            Some(wrapper) => wrapper.native().mark_destroyed_by_native(),
            None => false,
        }
    }

    /// Run every queued release. Keeps going past failures and reports the
    /// first one.
    fn drain_releases(&self) -> BridgeResult<usize> {
        let mut ran = 0;
        let mut first_error = None;
        for release in self.releases.drain() {
            match release.run() {
                Ok(destroyed) => {
                    if let Some(handle) = destroyed {
                        self.native_destroyed(handle);
                    }
                    ran += 1;
                }
                Err(err) => {
                    error!(%err, "deferred release failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(ran),
        }
    }
}

/// Point-in-time counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BridgeStats {
    /// Instance cache entries, expired ones included.
    pub cached_entries: usize,
    /// Wrappers constructed and not yet dropped.
    pub live_wrappers: usize,
    /// Allocated callback identities.
    pub callbacks: usize,
    /// Callback identities held strongly.
    pub pinned: usize,
    pub pending_releases: usize,
    pub evictions: u64,
    pub registered_types: usize,
}

/// Outcome of [`Bridge::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    /// Wrappers disposed by the shutdown, root included.
    pub disposed: usize,
    pub root_disposed: bool,
    /// Wrappers still referenced by application code afterwards.
    pub leaked: usize,
}

/// Handle to one bridge between managed wrappers and a native runtime.
///
/// Cloning is cheap; all clones share the same state.
#[derive(Clone)]
pub struct Bridge {
    shared: Arc<Shared>,
}

impl Bridge {
    pub fn new(native: Arc<dyn NativeRuntime>) -> Self {
        Self::with_config(native, BridgeConfig::default())
    }

    pub fn with_config(native: Arc<dyn NativeRuntime>, config: BridgeConfig) -> Self {
        debug!(?config, "bridge created");
        let shared = Shared {
            instances: InstanceCache::new(&config),
            callbacks: CallbackTable::new(),
            releases: ReleaseQueue::new(config.release_policy),
            factories: TypeFactoryRegistry::new(),
            live_wrappers: AtomicUsize::new(0),
            root: AtomicUsize::new(0),
            state: AtomicU8::new(RUNNING),
            collected: AtomicBool::new(false),
            native,
            config,
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub fn native(&self) -> &Arc<dyn NativeRuntime> {
        &self.shared.native
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    pub fn instances(&self) -> &InstanceCache {
        &self.shared.instances
    }

    pub fn callbacks(&self) -> &CallbackTable {
        &self.shared.callbacks
    }

    pub fn factories(&self) -> &TypeFactoryRegistry {
        &self.shared.factories
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.is_shutting_down()
    }

    // ========================================================================
    // Wrapper setup
    // ========================================================================

    /// Give a wrapper its callback identity and announce it to native code.
    fn attach(&self, wrapper: &Arc<dyn Managed>) -> BridgeResult<()> {
        let object = wrapper.native();
        if !object.belongs_to(&self.shared) {
            return Err(BridgeError::construction(
                object.type_name(),
                "wrapper belongs to a different bridge",
            ));
        }
        object.ensure_live()?;
        if object.callback().is_some() {
            return Ok(());
        }

        let callback = self
            .shared
            .callbacks
            .insert(Arc::downgrade(wrapper))
            .ok_or_else(|| BridgeError::construction(object.type_name(), "callback table is full"))?;
        if !object.set_callback(callback) {
            // Another thread set the wrapper up first.
            drop(self.shared.callbacks.free(callback));
            return Ok(());
        }

        self.shared
            .native
            .setup(object.raw_handle(), callback, object.type_name());
        debug!(handle = %object.raw_handle(), ?callback, type_name = object.type_name(), "wrapper set up");
        Ok(())
    }

    /// Set up an application-constructed wrapper and register it.
    ///
    /// The wrapper receives its callback identity, native code is told about
    /// it, and it becomes the cached wrapper for its handle.
    pub fn setup<T: Managed>(&self, wrapper: T) -> BridgeResult<Arc<T>> {
        let wrapper = Arc::new(wrapper);
        self.register(&wrapper)?;
        Ok(wrapper)
    }

    /// Set up an already shared wrapper and register it, replacing any
    /// cached wrapper for the same handle.
    pub fn register<T: Managed>(&self, wrapper: &Arc<T>) -> BridgeResult<()> {
        self.shared.ensure_running()?;
        let wrapper: Arc<dyn Managed> = Arc::clone(wrapper) as Arc<dyn Managed>;
        self.attach(&wrapper)?;
        self.shared.instances.register(wrapper)
    }

    /// The cached wrapper for `handle`, or one built by `factory`.
    ///
    /// Concurrent callers for the same unseen handle converge on one wrapper
    /// and `factory` runs once. A failing factory leaves no entry behind. The
    /// new wrapper is set up before any other caller can observe it.
    ///
    /// Factories may wrap other handles. Re-entering for the handle being
    /// built fails with `ReentrantConstruction`, and a nested wait that would
    /// deadlock against another thread's factory fails with
    /// `ConstructionCycle`.
    pub fn get_or_create<T, F>(&self, handle: Handle, factory: F) -> BridgeResult<Arc<T>>
    where
        T: Managed,
        F: FnOnce(&Bridge, Handle) -> BridgeResult<T>,
    {
        self.shared.ensure_running()?;
        self.shared.instances.get_or_create(handle, |handle| {
            let wrapper = Arc::new(factory(self, handle)?);
            self.attach(&(Arc::clone(&wrapper) as Arc<dyn Managed>))?;
            Ok(wrapper)
        })
    }

    /// The live cached wrapper for `handle`, if any.
    pub fn get(&self, handle: Handle) -> Option<Arc<dyn Managed>> {
        self.shared.instances.get(handle)
    }

    /// Forget the cached wrapper for `handle` without disposing it.
    pub fn remove(&self, handle: Handle) -> bool {
        self.shared.instances.remove(handle)
    }

    /// The wrapper for a native object surfaced by native code.
    ///
    /// On a cache miss the native type id of the object selects a binding;
    /// if the exact type is unbound, its base types are tried nearest first.
    /// A null handle yields `Ok(None)`.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn wrap(&self, handle: Handle) -> BridgeResult<Option<Arc<dyn Managed>>> {
        self.shared.ensure_running()?;
        if handle.is_null() {
            return Ok(None);
        }

        self.shared
            .instances
            .get_or_create_dyn(handle, |handle| {
                let type_id = self.shared.native.type_id(handle);
                let (bound, binding) = self
                    .shared
                    .factories
                    .binding_for(type_id, &*self.shared.native)
                    .ok_or(BridgeError::UnboundType { handle, type_id })?;
                trace!(%handle, %type_id, %bound, "wrapping native object");

                let wrapper = binding(self, handle)?;
                self.attach(&wrapper)?;
                Ok(wrapper)
            })
            .map(Some)
    }

    /// [`wrap`](Self::wrap) followed by a downcast to `T`.
    pub fn wrap_as<T: Managed>(&self, handle: Handle) -> BridgeResult<Option<Arc<T>>> {
        match self.wrap(handle)? {
            Some(wrapper) => downcast(handle, wrapper).map(Some),
            None => Ok(None),
        }
    }

    /// The wrapper behind a callback identity, while it is alive.
    pub fn resolve_callback(&self, callback: CallbackHandle) -> Option<Arc<dyn Managed>> {
        self.shared.callbacks.resolve(callback)
    }

    /// Native code destroyed the object at `handle` on its own.
    ///
    /// Its wrapper is marked disposed without calling back into the native
    /// runtime. Returns whether a live wrapper was found.
    pub fn on_native_destroyed(&self, handle: Handle) -> bool {
        self.shared.native_destroyed(handle)
    }

    // ========================================================================
    // Type factory
    // ========================================================================

    /// Register a managed type native code can request by hash.
    ///
    /// The constructor receives the requester's context handle and must
    /// create the native object itself. Wrappers built this way are kept by
    /// the instance cache only for the grace window unless they are
    /// refcounted, in which case `create` takes one managed reference on the
    /// requester's behalf. Non-refcounted types registered here should
    /// therefore not own their native object.
    pub fn register_type<T, F>(&self, constructor: F) -> BridgeResult<TypeHash>
    where
        T: Managed + ManagedType,
        F: Fn(&Bridge, Handle) -> BridgeResult<T> + Send + Sync + 'static,
    {
        let constructor: Constructor = Arc::new(move |bridge: &Bridge, context: Handle| {
            Ok(Arc::new(constructor(bridge, context)?) as Arc<dyn Managed>)
        });
        self.register_factory(T::type_name(), T::base_type_name(), T::category(), constructor)
    }

    /// Type-erased form of [`register_type`](Self::register_type).
    pub fn register_factory(
        &self,
        name: &str,
        base_name: &str,
        category: Option<&str>,
        constructor: Constructor,
    ) -> BridgeResult<TypeHash> {
        self.shared.ensure_running()?;
        let type_hash = self
            .shared
            .factories
            .register(name, base_name, category, constructor)?;
        self.shared
            .native
            .register_factory(name, TypeHash::from_name(base_name), category);
        debug!(name, base = base_name, ?category, %type_hash, "managed type registered");
        Ok(type_hash)
    }

    /// Register every type submitted by `#[derive(Managed)]`.
    ///
    /// Runs once; later calls register nothing and return zero.
    pub fn register_collected_types(&self) -> BridgeResult<usize> {
        self.shared.ensure_running()?;
        if self.shared.collected.swap(true, Ordering::AcqRel) {
            return Ok(0);
        }

        let mut count = 0;
        for registration in TypeRegistration::collected() {
            self.register_factory(
                registration.name,
                registration.base,
                registration.category,
                Arc::new(registration.construct),
            )?;
            count += 1;
        }
        debug!(count, "collected types registered");
        Ok(count)
    }

    /// Bind wrapper type `T` to its native type id for [`wrap`](Self::wrap).
    ///
    /// Returns `false` if an existing binding was replaced.
    pub fn bind<T, F>(&self, wrap: F) -> bool
    where
        T: Managed + ManagedType,
        F: Fn(&Bridge, Handle) -> BridgeResult<T> + Send + Sync + 'static,
    {
        let binding: Binding = Arc::new(move |bridge: &Bridge, handle: Handle| {
            Ok(Arc::new(wrap(bridge, handle)?) as Arc<dyn Managed>)
        });
        self.shared.factories.bind(T::type_hash(), binding)
    }

    /// Construct a registered managed type for native code.
    ///
    /// Returns the new object's handle, or the null handle if no managed type
    /// is registered under `type_hash`; a miss touches no bridge state.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn create(&self, type_hash: TypeHash, context: Handle) -> BridgeResult<Handle> {
        self.shared.ensure_running()?;
        let Some(constructor) = self.shared.factories.constructor(type_hash) else {
            trace!(%type_hash, "no managed factory registered");
            return Ok(Handle::NULL);
        };

        let wrapper = constructor(self, context)?;
        let handle = wrapper.native().raw_handle();
        self.attach(&wrapper)?;
        self.shared.instances.register(Arc::clone(&wrapper))?;
        if wrapper.native().is_refcounted() {
            wrapper.native().add_ref()?;
        }
        debug!(%handle, %type_hash, type_name = wrapper.native().type_name(), "managed type created for native code");
        Ok(handle)
    }

    // ========================================================================
    // Lifetime
    // ========================================================================

    /// Designate the root object, disposed last at shutdown.
    pub fn set_root(&self, handle: Handle) -> BridgeResult<()> {
        self.shared.ensure_running()?;
        if handle.is_null() {
            return Err(BridgeError::NullHandle);
        }
        self.shared.root.store(handle.addr(), Ordering::Release);
        Ok(())
    }

    pub fn root(&self) -> Option<Handle> {
        self.shared.root()
    }

    /// Run releases queued for the owning thread.
    ///
    /// Returns the number of releases performed.
    pub fn run_deferred(&self) -> BridgeResult<usize> {
        if !self.shared.releases.is_owner_thread() {
            return Err(BridgeError::NotOwnerThread);
        }
        self.shared.drain_releases()
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            cached_entries: self.shared.instances.len(),
            live_wrappers: self.shared.live_wrappers.load(Ordering::Relaxed),
            callbacks: self.shared.callbacks.len(),
            pinned: self.shared.callbacks.pinned_count(),
            pending_releases: self.shared.releases.len(),
            evictions: self.shared.instances.evictions(),
            registered_types: self.shared.factories.len(),
        }
    }

    /// Tear the bridge down.
    ///
    /// Runs pending releases, disposes every reachable wrapper except the
    /// root, then the root. Afterwards every operation fails with
    /// `ShutDown`. Must not race other bridge calls.
    pub fn shutdown(&self) -> BridgeResult<ShutdownReport> {
        if self
            .shared
            .state
            .compare_exchange(RUNNING, SHUTTING_DOWN, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BridgeError::ShutDown);
        }
        info!("bridge shutting down");

        if let Err(err) = self.shared.drain_releases() {
            warn!(%err, "deferred release failed during shutdown");
        }

        let root = self.shared.root();
        let mut wrappers = self.shared.instances.snapshot();
        wrappers.extend(self.shared.callbacks.snapshot());

        let mut report = ShutdownReport::default();
        let mut roots = Vec::new();
        for wrapper in wrappers {
            if Some(wrapper.native().raw_handle()) == root {
                roots.push(wrapper);
            } else if matches!(wrapper.native().dispose(), Ok(true)) {
                report.disposed += 1;
            }
        }
        for wrapper in roots {
            if matches!(wrapper.native().dispose(), Ok(true)) {
                report.disposed += 1;
                report.root_disposed = true;
            }
        }

        drop(self.shared.instances.clear());
        drop(self.shared.callbacks.clear());
        self.shared.state.store(SHUT_DOWN, Ordering::Release);

        report.leaked = self.shared.live_wrappers.load(Ordering::Acquire);
        if report.leaked > 0 {
            warn!(leaked = report.leaked, "wrappers outlived bridge shutdown");
        }
        info!(disposed = report.disposed, "bridge shut down");
        Ok(report)
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("stats", &self.stats())
            .field("root", &self.root())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

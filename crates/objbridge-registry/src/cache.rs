//! The instance cache: the single source of truth for "does a wrapper already
//! exist for this handle".
//!
//! Entries hold their wrapper through a [`CacheEntry`], a weak reference that
//! is additionally pinned by a strong one for a grace window after every
//! access. Dropped wrappers leave expired entries behind; the incremental
//! sweeper in `sweeper.rs` removes them a step at a time.
//!
//! # Locking
//!
//! The map is split into shards, each a `RwLock<IndexMap>` from handle to a
//! slot. A slot is an `Arc<Mutex<SlotState>>` owned by exactly one handle.
//!
//! - Shard locks are held only to look up, insert or unlink a slot.
//! - Wrapper construction runs under the slot mutex, never a shard lock.
//! - A slot mutex may be held while taking a shard lock, never the reverse.
//! - A slot unlinked from its shard is marked `Detached`; anyone who locked it
//!   through a stale lookup retries.
//! - A thread that is building a wrapper records what it builds and, before
//!   blocking on another slot, what it waits for. A wait that would close a
//!   cycle of builders fails with `ConstructionCycle` instead of blocking.
//! - Wrappers released by the cache are dropped after every lock is released.

use std::cell::RefCell;
use std::hash::BuildHasher;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use objbridge_core::{BridgeConfig, BridgeError, BridgeResult, Clock, Handle};
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxBuildHasher, FxHashMap};
use tracing::{debug, trace};

use crate::object::{Managed, NativeObject, downcast};
use crate::sweeper::Cursor;

pub(crate) type Slot = Arc<Mutex<SlotState>>;
pub(crate) type Shard = IndexMap<Handle, Slot, FxBuildHasher>;
type SlotGuard = parking_lot::ArcMutexGuard<parking_lot::RawMutex, SlotState>;

pub(crate) enum SlotState {
    /// Inserted for a construction that has not finished.
    Vacant,
    Live(CacheEntry),
    /// Unlinked from its shard.
    Detached,
}

/// A handle's reference to its wrapper.
pub struct CacheEntry {
    strong: Option<Arc<dyn Managed>>,
    weak: std::sync::Weak<dyn Managed>,
    last_access: Instant,
}

impl CacheEntry {
    pub fn new(wrapper: Arc<dyn Managed>, now: Instant) -> Self {
        Self {
            weak: Arc::downgrade(&wrapper),
            strong: Some(wrapper),
            last_access: now,
        }
    }

    /// Resolve the wrapper, refreshing the access time.
    ///
    /// Tries the strong reference first, then the weak one. With `rearm` a
    /// weakly held wrapper is pinned again.
    pub fn resolve(&mut self, now: Instant, rearm: bool) -> Option<Arc<dyn Managed>> {
        let wrapper = match &self.strong {
            Some(strong) => Arc::clone(strong),
            None => self.weak.upgrade()?,
        };
        self.last_access = now;
        if rearm && self.strong.is_none() {
            self.strong = Some(Arc::clone(&wrapper));
        }
        Some(wrapper)
    }

    /// The wrapper is gone and the entry can be removed.
    pub fn is_expired(&self) -> bool {
        self.strong.is_none() && self.weak.strong_count() == 0
    }

    /// Whether the grace-window pin is still in place.
    pub fn is_pinned(&self) -> bool {
        self.strong.is_some()
    }

    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    /// Whether this entry refers to the wrapper owning `object`.
    pub(crate) fn refers_to(&self, object: &NativeObject) -> Option<Arc<dyn Managed>> {
        let wrapper = self.weak.upgrade()?;
        std::ptr::eq(wrapper.native(), object).then_some(wrapper)
    }

    /// Drop the grace-window pin once it is older than `grace`.
    ///
    /// The released reference is returned so the caller can drop it after
    /// unlocking.
    pub(crate) fn expire_pin(&mut self, now: Instant, grace: Duration) -> Option<Arc<dyn Managed>> {
        if now.saturating_duration_since(self.last_access) >= grace {
            self.strong.take()
        } else {
            None
        }
    }
}

thread_local! {
    static BUILDING: RefCell<Vec<Handle>> = const { RefCell::new(Vec::new()) };
}

/// Marks a handle as under construction on the current thread.
pub(crate) struct BuildGuard {
    handle: Handle,
}

impl BuildGuard {
    fn enter(handle: Handle) -> Self {
        BUILDING.with_borrow_mut(|building| building.push(handle));
        Self { handle }
    }

    pub(crate) fn is_building(handle: Handle) -> bool {
        BUILDING.with_borrow(|building| building.contains(&handle))
    }

    /// Whether the current thread is inside any factory.
    pub(crate) fn in_progress() -> bool {
        BUILDING.with_borrow(|building| !building.is_empty())
    }
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        BUILDING.with_borrow_mut(|building| {
            if let Some(pos) = building.iter().rposition(|h| *h == self.handle) {
                building.swap_remove(pos);
            }
        });
    }
}

/// Builders and the slots nested builders are blocked on.
#[derive(Default)]
struct WaitGraph {
    builders: FxHashMap<Handle, ThreadId>,
    waiting: FxHashMap<ThreadId, Handle>,
}

impl WaitGraph {
    /// Whether `thread` waiting for `handle` would wait on itself.
    fn closes_cycle(&self, thread: ThreadId, handle: Handle) -> bool {
        let mut wanted = handle;
        for _ in 0..=self.waiting.len() {
            let Some(&builder) = self.builders.get(&wanted) else {
                return false;
            };
            if builder == thread {
                return true;
            }
            let Some(&next) = self.waiting.get(&builder) else {
                return false;
            };
            wanted = next;
        }
        false
    }
}

/// A construction in progress on the current thread.
struct Building<'a> {
    waits: &'a Mutex<WaitGraph>,
    handle: Handle,
    thread: ThreadId,
    _local: BuildGuard,
}

impl<'a> Building<'a> {
    fn enter(waits: &'a Mutex<WaitGraph>, handle: Handle) -> Self {
        let thread = thread::current().id();
        waits.lock().builders.insert(handle, thread);
        Self {
            waits,
            handle,
            thread,
            _local: BuildGuard::enter(handle),
        }
    }
}

impl Drop for Building<'_> {
    fn drop(&mut self) {
        let mut waits = self.waits.lock();
        if waits.builders.get(&self.handle) == Some(&self.thread) {
            waits.builders.remove(&self.handle);
        }
    }
}

/// Concurrent map from native handle to its managed wrapper.
pub struct InstanceCache {
    pub(crate) shards: Box<[RwLock<Shard>]>,
    hasher: FxBuildHasher,
    pub(crate) cursor: Mutex<Cursor>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) grace_window: Duration,
    pub(crate) sweep_interval: Duration,
    pub(crate) steps_per_call: usize,
    rearm_on_access: bool,
    pub(crate) evictions: AtomicU64,
    waits: Mutex<WaitGraph>,
}

impl InstanceCache {
    pub fn new(config: &BridgeConfig) -> Self {
        let shard_count = config.shard_count.max(1);
        let shards = (0..shard_count)
            .map(|_| RwLock::new(IndexMap::with_hasher(FxBuildHasher)))
            .collect();
        let now = config.clock.now();

        Self {
            shards,
            hasher: FxBuildHasher,
            cursor: Mutex::new(Cursor::new(now)),
            clock: Arc::clone(&config.clock),
            grace_window: config.grace_window,
            sweep_interval: config.sweep_interval,
            steps_per_call: config.sweep_steps_per_call,
            rearm_on_access: config.rearm_on_access,
            evictions: AtomicU64::new(0),
            waits: Mutex::new(WaitGraph::default()),
        }
    }

    #[inline]
    pub(crate) fn shard_index(&self, handle: Handle) -> usize {
        (self.hasher.hash_one(handle) >> 32) as usize % self.shards.len()
    }

    fn slot(&self, handle: Handle) -> Option<Slot> {
        self.shards[self.shard_index(handle)].read().get(&handle).cloned()
    }

    fn slot_or_insert(&self, handle: Handle) -> Slot {
        if let Some(slot) = self.slot(handle) {
            return slot;
        }
        let mut shard = self.shards[self.shard_index(handle)].write();
        Arc::clone(
            shard
                .entry(handle)
                .or_insert_with(|| Arc::new(Mutex::new(SlotState::Vacant))),
        )
    }

    /// Lock `slot`, the slot for `handle`.
    ///
    /// Outside a factory this simply blocks. Inside one, the wait is recorded
    /// first and refused with `ConstructionCycle` when the slot's builder is,
    /// directly or through other builders, waiting for this thread.
    fn lock_slot(&self, handle: Handle, slot: &Slot) -> BridgeResult<SlotGuard> {
        if !BuildGuard::in_progress() {
            return Ok(slot.lock_arc());
        }
        if let Some(state) = slot.try_lock_arc() {
            return Ok(state);
        }

        let thread = thread::current().id();
        {
            let mut waits = self.waits.lock();
            if waits.closes_cycle(thread, handle) {
                debug!(%handle, "nested construction would deadlock");
                return Err(BridgeError::ConstructionCycle { handle });
            }
            waits.waiting.insert(thread, handle);
        }
        let state = slot.lock_arc();
        self.waits.lock().waiting.remove(&thread);
        Ok(state)
    }

    /// Lock the slot currently linked for `handle`, inserting one if needed.
    fn lock_linked(&self, handle: Handle) -> BridgeResult<(Slot, SlotGuard)> {
        loop {
            let slot = self.slot_or_insert(handle);
            let state = self.lock_slot(handle, &slot)?;
            if !matches!(*state, SlotState::Detached) {
                return Ok((slot, state));
            }
        }
    }

    /// Remove `slot` from its shard if it is still the one linked for `handle`.
    ///
    /// The caller holds the slot lock.
    pub(crate) fn unlink(&self, handle: Handle, slot: &Slot) {
        let mut shard = self.shards[self.shard_index(handle)].write();
        if shard.get(&handle).is_some_and(|linked| Arc::ptr_eq(linked, slot)) {
            shard.swap_remove(&handle);
        }
    }

    /// Return the live wrapper for `handle` or build one with `factory`.
    ///
    /// Concurrent callers for the same unseen handle converge on one wrapper;
    /// the factory runs once. A cached wrapper of a different type fails with
    /// `TypeMismatch`. A failing factory leaves no entry behind.
    ///
    /// Wrappers inserted here have no callback identity; `Bridge::get_or_create`
    /// is the public entry point.
    pub(crate) fn get_or_create<T, F>(&self, handle: Handle, factory: F) -> BridgeResult<Arc<T>>
    where
        T: Managed,
        F: FnOnce(Handle) -> BridgeResult<Arc<T>>,
    {
        let wrapper = self.get_or_create_dyn(handle, |handle| {
            factory(handle).map(|wrapper| wrapper as Arc<dyn Managed>)
        })?;
        downcast(handle, wrapper)
    }

    /// Type-erased form of [`get_or_create`](Self::get_or_create).
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub(crate) fn get_or_create_dyn<F>(&self, handle: Handle, factory: F) -> BridgeResult<Arc<dyn Managed>>
    where
        F: FnOnce(Handle) -> BridgeResult<Arc<dyn Managed>>,
    {
        if handle.is_null() {
            return Err(BridgeError::NullHandle);
        }
        if BuildGuard::is_building(handle) {
            return Err(BridgeError::ReentrantConstruction { handle });
        }
        self.sweep();

        let (slot, mut state) = self.lock_linked(handle)?;
        let now = self.clock.now();

        let mut stale = None;
        if let SlotState::Live(entry) = &mut *state
            && let Some(wrapper) = entry.resolve(now, self.rearm_on_access)
        {
            if !wrapper.native().is_disposed() {
                drop(state);
                trace!(%handle, "instance cache hit");
                return Ok(wrapper);
            }
            stale = Some(wrapper);
        }

        let built = {
            let _building = Building::enter(&self.waits, handle);
            factory(handle)
        };

        let result = match built {
            Ok(wrapper) => {
                let found = wrapper.native().raw_handle();
                if found == handle {
                    let previous = mem::replace(
                        &mut *state,
                        SlotState::Live(CacheEntry::new(Arc::clone(&wrapper), now)),
                    );
                    drop(state);
                    drop(previous);
                    debug!(%handle, type_name = wrapper.native().type_name(), "wrapper constructed");
                    Ok(wrapper)
                } else {
                    let previous = mem::replace(&mut *state, SlotState::Detached);
                    self.unlink(handle, &slot);
                    drop(state);
                    drop(previous);
                    drop(wrapper);
                    Err(BridgeError::HandleMismatch {
                        expected: handle,
                        found,
                    })
                }
            }
            Err(err) => {
                let previous = mem::replace(&mut *state, SlotState::Detached);
                self.unlink(handle, &slot);
                drop(state);
                drop(previous);
                debug!(%handle, %err, "wrapper construction failed");
                Err(err)
            }
        };
        drop(stale);
        result
    }

    /// Look up the live wrapper for `handle` without constructing one.
    pub fn get(&self, handle: Handle) -> Option<Arc<dyn Managed>> {
        if handle.is_null() || BuildGuard::is_building(handle) {
            return None;
        }
        self.sweep();

        let slot = self.slot(handle)?;
        let mut state = match self.lock_slot(handle, &slot) {
            Ok(state) => state,
            Err(err) => {
                debug!(%handle, %err, "lookup skipped");
                return None;
            }
        };
        let now = self.clock.now();
        let wrapper = match &mut *state {
            SlotState::Live(entry) => entry.resolve(now, self.rearm_on_access),
            _ => None,
        };
        drop(state);
        wrapper.filter(|wrapper| !wrapper.native().is_disposed())
    }

    /// Insert or overwrite the entry for the wrapper's handle.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub(crate) fn register(&self, wrapper: Arc<dyn Managed>) -> BridgeResult<()> {
        let handle = wrapper.native().raw_handle();
        if handle.is_null() {
            return Err(BridgeError::NullHandle);
        }
        wrapper.native().ensure_live()?;
        if BuildGuard::is_building(handle) {
            return Err(BridgeError::ReentrantConstruction { handle });
        }
        self.sweep();

        let (_slot, mut state) = self.lock_linked(handle)?;
        let entry = CacheEntry::new(wrapper, self.clock.now());
        let previous = mem::replace(&mut *state, SlotState::Live(entry));
        drop(state);
        drop(previous);
        trace!(%handle, "wrapper registered");
        Ok(())
    }

    /// Delete the entry for `handle` without disposing its wrapper.
    ///
    /// Returns whether an entry was present.
    pub fn remove(&self, handle: Handle) -> bool {
        self.sweep();

        let slot = self.shards[self.shard_index(handle)]
            .write()
            .swap_remove(&handle);
        let Some(slot) = slot else {
            return false;
        };
        if BuildGuard::is_building(handle) {
            // The slot lock is ours further up the stack; unlinking is enough.
            return true;
        }

        let Ok(mut state) = self.lock_slot(handle, &slot) else {
            // Unlinked; its builder finishes into a detached slot.
            return true;
        };
        let previous = mem::replace(&mut *state, SlotState::Detached);
        drop(state);
        let removed = matches!(previous, SlotState::Live(_));
        drop(previous);
        trace!(%handle, removed, "entry removed");
        removed
    }

    /// Remove the entry for `object`'s handle if it still refers to `object`.
    ///
    /// A newer wrapper registered for a reused address is left alone.
    pub(crate) fn evict(&self, object: &NativeObject) -> bool {
        let handle = object.raw_handle();
        if BuildGuard::is_building(handle) {
            return false;
        }
        self.sweep();

        let Some(slot) = self.slot(handle) else {
            return false;
        };
        let Ok(mut state) = self.lock_slot(handle, &slot) else {
            return false;
        };
        let target = match &*state {
            SlotState::Live(entry) => entry.refers_to(object),
            _ => None,
        };
        let previous = if target.is_some() {
            self.unlink(handle, &slot);
            Some(mem::replace(&mut *state, SlotState::Detached))
        } else {
            None
        };
        drop(state);

        let evicted = previous.is_some();
        if evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        drop(previous);
        drop(target);
        evicted
    }

    /// Number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.slot(handle).is_some()
    }

    /// Entries removed so far by eviction and sweeping.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    fn slots(&self) -> Vec<(Handle, Slot)> {
        self.shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .iter()
                    .map(|(handle, slot)| (*handle, Arc::clone(slot)))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Every wrapper that still resolves. Access times are not refreshed.
    pub fn snapshot(&self) -> Vec<Arc<dyn Managed>> {
        self.slots()
            .into_iter()
            .filter_map(|(handle, slot)| match &*self.lock_slot(handle, &slot).ok()? {
                SlotState::Live(entry) => entry
                    .strong
                    .clone()
                    .or_else(|| entry.weak.upgrade()),
                _ => None,
            })
            .collect()
    }

    /// Number of live, undisposed wrappers other than the one at `except`.
    pub(crate) fn live_count_except(&self, except: Handle) -> usize {
        self.slots()
            .into_iter()
            .filter(|(handle, _)| *handle != except)
            .filter(|(_, slot)| match slot.try_lock().as_deref() {
                Some(SlotState::Live(entry)) => !entry.is_expired(),
                Some(_) => false,
                // locked slots are mid-construction or mid-update; count them
                None => true,
            })
            .count()
    }

    /// Unlink every entry. The released wrappers are returned undropped.
    pub(crate) fn clear(&self) -> Vec<CacheEntry> {
        let slots: Vec<Slot> = self
            .shards
            .iter()
            .flat_map(|shard| shard.write().drain(..).map(|(_, slot)| slot).collect::<Vec<_>>())
            .collect();

        slots
            .into_iter()
            .filter_map(|slot| match mem::replace(&mut *slot.lock(), SlotState::Detached) {
                SlotState::Live(entry) => Some(entry),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use super::*;
    use crate::testing::{Leaf, Node, test_bridge, test_bridge_with_clock};

    #[test]
    fn get_or_create_builds_once_then_hits() {
        let (bridge, native) = test_bridge();
        let cache = bridge.instances();
        let handle = native.spawn("Node");
        let calls = AtomicUsize::new(0);

        let make = |h| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Node::borrowed(&bridge, h)))
        };
        let first = cache.get_or_create(handle, make).unwrap();
        let second = cache
            .get_or_create(handle, |h| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Node::borrowed(&bridge, h)))
            })
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn null_handle_is_rejected() {
        let (bridge, _native) = test_bridge();
        let result = bridge
            .instances()
            .get_or_create(Handle::NULL, |h| Ok(Arc::new(Node::borrowed(&bridge, h))));
        assert_eq!(result.unwrap_err(), BridgeError::NullHandle);
    }

    #[test]
    fn failing_factory_leaves_no_entry() {
        let (bridge, native) = test_bridge();
        let cache = bridge.instances();
        let handle = native.spawn("Node");

        let err = cache
            .get_or_create::<Node, _>(handle, |_| Err(BridgeError::construction("Node", "boom")))
            .unwrap_err();
        assert_eq!(err, BridgeError::construction("Node", "boom"));
        assert!(!cache.contains(handle));

        let node = cache
            .get_or_create(handle, |h| Ok(Arc::new(Node::borrowed(&bridge, h))))
            .unwrap();
        assert_eq!(node.native().raw_handle(), handle);
    }

    #[test]
    fn factory_for_wrong_handle_is_rejected() {
        let (bridge, native) = test_bridge();
        let cache = bridge.instances();
        let requested = native.spawn("Node");
        let other = native.spawn("Node");

        let err = cache
            .get_or_create(requested, |_| Ok(Arc::new(Node::borrowed(&bridge, other))))
            .unwrap_err();
        assert_eq!(
            err,
            BridgeError::HandleMismatch {
                expected: requested,
                found: other
            }
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn cached_wrapper_of_other_type_is_a_mismatch() {
        let (bridge, native) = test_bridge();
        let cache = bridge.instances();
        let handle = native.spawn("Node");

        let _node = cache
            .get_or_create(handle, |h| Ok(Arc::new(Node::borrowed(&bridge, h))))
            .unwrap();
        let err = cache
            .get_or_create(handle, |h| Ok(Arc::new(Leaf::borrowed(&bridge, h))))
            .unwrap_err();
        assert!(matches!(err, BridgeError::TypeMismatch { .. }));
    }

    #[test]
    fn reentrant_factory_is_detected() {
        let (bridge, native) = test_bridge();
        let cache = bridge.instances();
        let handle = native.spawn("Node");

        let err = cache
            .get_or_create(handle, |h| {
                cache.get_or_create(h, |h| Ok(Arc::new(Node::borrowed(&bridge, h))))
            })
            .unwrap_err();
        assert_eq!(err, BridgeError::ReentrantConstruction { handle });
        assert!(!cache.contains(handle));
    }

    #[test]
    fn factory_may_wrap_other_handles() {
        let (bridge, native) = test_bridge();
        let cache = bridge.instances();
        let parent = native.spawn("Node");
        let child = native.spawn("Node");

        let node = cache
            .get_or_create(child, |h| {
                cache.get_or_create(parent, |p| Ok(Arc::new(Node::borrowed(&bridge, p))))?;
                Ok(Arc::new(Node::borrowed(&bridge, h)))
            })
            .unwrap();
        assert_eq!(node.native().raw_handle(), child);
        assert!(cache.contains(parent));
    }

    #[test]
    fn opposite_nested_factories_do_not_deadlock() {
        let (bridge, native) = test_bridge();
        let a = native.spawn("Node");
        let b = native.spawn("Node");
        let barrier = Arc::new(Barrier::new(2));
        let (tx, rx) = crossbeam_channel::unbounded();

        for (outer, inner) in [(a, b), (b, a)] {
            let bridge = bridge.clone();
            let barrier = Arc::clone(&barrier);
            let tx = tx.clone();
            thread::spawn(move || {
                let result = bridge.get_or_create(outer, |bridge, h| {
                    barrier.wait();
                    bridge.get_or_create(inner, |bridge, h| Ok(Node::borrowed(bridge, h)))?;
                    Ok(Node::borrowed(bridge, h))
                });
                let _ = tx.send(result.map(|node| node.native().raw_handle()));
            });
        }

        let results: Vec<BridgeResult<Handle>> = (0..2)
            .map(|_| {
                rx.recv_timeout(Duration::from_secs(5))
                    .expect("nested construction deadlocked")
            })
            .collect();
        let cycles = results
            .iter()
            .filter(|result| matches!(result, Err(BridgeError::ConstructionCycle { .. })))
            .count();
        assert_eq!(cycles, 1);
        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
        assert!(bridge.get(a).is_some());
        assert!(bridge.get(b).is_some());
    }

    #[test]
    fn wait_graph_follows_builders() {
        let main = thread::current().id();
        let other = thread::spawn(|| thread::current().id()).join().unwrap();
        let a = Handle::from_addr(0x10);
        let b = Handle::from_addr(0x20);
        let c = Handle::from_addr(0x30);
        let mut graph = WaitGraph::default();
        graph.builders.insert(a, main);
        graph.builders.insert(b, other);

        // Nobody waits yet: waiting for b just blocks on `other`.
        assert!(!graph.closes_cycle(main, b));
        graph.waiting.insert(main, b);
        // `other` waiting for a would wait on `main`, which waits on `other`.
        assert!(graph.closes_cycle(other, a));
        // Unbuilt handles never close a cycle.
        assert!(!graph.closes_cycle(other, c));
    }

    #[test]
    fn register_overwrites_existing_entry() {
        let (bridge, native) = test_bridge();
        let cache = bridge.instances();
        let handle = native.spawn("Node");

        let first = cache
            .get_or_create(handle, |h| Ok(Arc::new(Node::borrowed(&bridge, h))))
            .unwrap();
        let replacement = Arc::new(Node::borrowed(&bridge, handle));
        cache.register(replacement.clone()).unwrap();

        let found = cache.get(handle).unwrap();
        assert!(std::ptr::eq(found.native(), replacement.native()));
        assert!(!std::ptr::eq(found.native(), first.native()));
    }

    #[test]
    fn register_rejects_disposed_wrapper() {
        let (bridge, native) = test_bridge();
        let handle = native.spawn("Node");
        let node = Arc::new(Node::borrowed(&bridge, handle));
        node.native().dispose().unwrap();

        let err = bridge.instances().register(node).unwrap_err();
        assert!(matches!(err, BridgeError::UseAfterDispose { .. }));
    }

    #[test]
    fn remove_does_not_dispose() {
        let (bridge, native) = test_bridge();
        let cache = bridge.instances();
        let handle = native.spawn("Node");

        let node = cache
            .get_or_create(handle, |h| Ok(Arc::new(Node::owned(&bridge, h))))
            .unwrap();
        assert!(cache.remove(handle));
        assert!(!cache.remove(handle));
        assert!(!node.native().is_disposed());
        assert_eq!(native.destroy_count(handle), 0);

        let rebuilt = cache
            .get_or_create(handle, |h| Ok(Arc::new(Node::borrowed(&bridge, h))))
            .unwrap();
        assert!(!Arc::ptr_eq(&node, &rebuilt));
    }

    #[test]
    fn disposed_wrapper_is_not_returned() {
        let (bridge, native) = test_bridge();
        let cache = bridge.instances();
        let handle = native.spawn("Node");

        let node = cache
            .get_or_create(handle, |h| Ok(Arc::new(Node::borrowed(&bridge, h))))
            .unwrap();
        node.native().dispose().unwrap();
        assert!(cache.get(handle).is_none());

        let rebuilt = cache
            .get_or_create(handle, |h| Ok(Arc::new(Node::borrowed(&bridge, h))))
            .unwrap();
        assert!(!rebuilt.native().is_disposed());
    }

    #[test]
    fn evict_ignores_newer_wrapper() {
        let (bridge, native) = test_bridge();
        let cache = bridge.instances();
        let handle = native.spawn("Node");

        let old = Arc::new(Node::borrowed(&bridge, handle));
        let new = Arc::new(Node::borrowed(&bridge, handle));
        cache.register(new.clone()).unwrap();

        assert!(!cache.evict(old.native()));
        assert!(cache.contains(handle));
        assert!(cache.evict(new.native()));
        assert!(!cache.contains(handle));
    }

    #[test]
    fn grace_window_pins_then_releases() {
        let (bridge, native, clock) = test_bridge_with_clock();
        let cache = bridge.instances();
        let handle = native.spawn("Node");

        let node = cache
            .get_or_create(handle, |h| Ok(Arc::new(Node::borrowed(&bridge, h))))
            .unwrap();
        let weak = Arc::downgrade(&node);
        drop(node);

        // Still pinned by the entry.
        assert!(weak.upgrade().is_some());

        clock.advance(cache.grace_window + Duration::from_secs(1));
        assert_eq!(cache.sweep_all(), 1);
        assert!(weak.upgrade().is_none());
        assert!(!cache.contains(handle));
    }

    #[test]
    fn concurrent_callers_converge() {
        let (bridge, native) = test_bridge();
        let cache = bridge.instances();
        let handle = native.spawn("Node");
        let calls = AtomicUsize::new(0);
        let barrier = Barrier::new(8);

        let wrappers: Vec<Arc<Node>> = thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        cache
                            .get_or_create(handle, |h| {
                                calls.fetch_add(1, Ordering::SeqCst);
                                thread::sleep(Duration::from_millis(5));
                                Ok(Arc::new(Node::borrowed(&bridge, h)))
                            })
                            .unwrap()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(wrappers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn clear_returns_entries() {
        let (bridge, native) = test_bridge();
        let cache = bridge.instances();
        for _ in 0..4 {
            let handle = native.spawn("Node");
            cache
                .get_or_create(handle, |h| Ok(Arc::new(Node::borrowed(&bridge, h))))
                .unwrap();
        }
        let entries = cache.clear();
        assert_eq!(entries.len(), 4);
        assert!(cache.is_empty());
    }
}

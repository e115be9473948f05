//! In-memory native runtime and wrapper types for tests.
//!
//! Enabled by the `test-util` feature. [`RecordingNative`] stands in for a
//! native engine: it hands out unique addresses, keeps per-object reference
//! counts and records every call the bridge makes, so tests can assert on
//! exactly what reached the native side.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use objbridge_core::{
    BridgeConfig, CallbackHandle, Handle, ManagedType, ManualClock, NativeRuntime, TypeHash,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::{Bridge, Managed, NativeObject};

/// First address handed out by [`RecordingNative::spawn`].
const BASE_ADDR: usize = 0x10_0000;
const ADDR_STRIDE: usize = 0x40;

/// A factory announcement received through `register_factory`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryAnnouncement {
    pub name: String,
    pub base: TypeHash,
    pub category: Option<String>,
}

#[derive(Debug)]
struct ObjectRecord {
    type_id: TypeHash,
    refs: i32,
}

#[derive(Default)]
struct State {
    objects: FxHashMap<Handle, ObjectRecord>,
    bases: FxHashMap<TypeHash, TypeHash>,
    destroy_counts: FxHashMap<Handle, usize>,
    destroy_order: Vec<Handle>,
    callbacks: FxHashMap<Handle, CallbackHandle>,
    setups: FxHashMap<Handle, usize>,
    factories: Vec<FactoryAnnouncement>,
}

/// A native runtime that keeps everything in memory and records calls.
pub struct RecordingNative {
    state: Mutex<State>,
    next_addr: AtomicUsize,
}

impl RecordingNative {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            next_addr: AtomicUsize::new(BASE_ADDR),
        })
    }

    /// Create a native object of `type_name` with a reference count of one.
    pub fn spawn(&self, type_name: &str) -> Handle {
        let addr = self.next_addr.fetch_add(ADDR_STRIDE, Ordering::Relaxed);
        let handle = Handle::from_addr(addr);
        self.state.lock().objects.insert(
            handle,
            ObjectRecord {
                type_id: TypeHash::from_name(type_name),
                refs: 1,
            },
        );
        handle
    }

    /// Declare `base` as the native base type of `type_name`.
    pub fn set_base(&self, type_name: &str, base: &str) {
        self.state
            .lock()
            .bases
            .insert(TypeHash::from_name(type_name), TypeHash::from_name(base));
    }

    /// How many times `destroy` was called for `handle`.
    pub fn destroy_count(&self, handle: Handle) -> usize {
        self.state
            .lock()
            .destroy_counts
            .get(&handle)
            .copied()
            .unwrap_or(0)
    }

    /// Handles passed to `destroy`, in call order.
    pub fn destroy_order(&self) -> Vec<Handle> {
        self.state.lock().destroy_order.clone()
    }

    pub fn is_alive(&self, handle: Handle) -> bool {
        self.state.lock().objects.contains_key(&handle)
    }

    /// Native reference count of a live object.
    pub fn refs(&self, handle: Handle) -> Option<i32> {
        self.state.lock().objects.get(&handle).map(|object| object.refs)
    }

    /// Drop the object without telling the bridge. Later calls for it fail.
    pub fn forget(&self, handle: Handle) {
        self.state.lock().objects.remove(&handle);
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn factories(&self) -> Vec<FactoryAnnouncement> {
        self.state.lock().factories.clone()
    }

    /// The callback identity most recently attached to `handle`.
    pub fn callback_of(&self, handle: Handle) -> Option<CallbackHandle> {
        self.state.lock().callbacks.get(&handle).copied()
    }

    /// How many times `setup` was called for `handle`.
    pub fn setup_count(&self, handle: Handle) -> usize {
        self.state.lock().setups.get(&handle).copied().unwrap_or(0)
    }
}

impl NativeRuntime for RecordingNative {
    fn type_id(&self, handle: Handle) -> TypeHash {
        self.state
            .lock()
            .objects
            .get(&handle)
            .map_or(TypeHash::EMPTY, |object| object.type_id)
    }

    fn base_type_id(&self, type_id: TypeHash) -> Option<TypeHash> {
        self.state.lock().bases.get(&type_id).copied()
    }

    fn destroy(&self, handle: Handle) {
        let mut state = self.state.lock();
        *state.destroy_counts.entry(handle).or_default() += 1;
        state.destroy_order.push(handle);
        state.objects.remove(&handle);
    }

    fn add_ref(&self, handle: Handle) -> i32 {
        match self.state.lock().objects.get_mut(&handle) {
            Some(object) => {
                object.refs += 1;
                object.refs
            }
            None => -1,
        }
    }

    fn release(&self, handle: Handle) -> i32 {
        let mut state = self.state.lock();
        let Some(object) = state.objects.get_mut(&handle) else {
            return -1;
        };
        object.refs -= 1;
        let refs = object.refs;
        if refs == 0 {
            state.objects.remove(&handle);
        }
        refs
    }

    fn register_factory(&self, type_name: &str, base_type: TypeHash, category: Option<&str>) {
        let mut state = self.state.lock();
        let type_id = TypeHash::from_name(type_name);
        if base_type != type_id {
            state.bases.insert(type_id, base_type);
        }
        state.factories.push(FactoryAnnouncement {
            name: type_name.to_string(),
            base: base_type,
            category: category.map(str::to_string),
        });
    }

    fn setup(&self, handle: Handle, callback: CallbackHandle, _type_name: &str) {
        let mut state = self.state.lock();
        state.callbacks.insert(handle, callback);
        *state.setups.entry(handle).or_default() += 1;
    }
}

/// A refcounted wrapper type.
#[derive(Debug)]
pub struct Node {
    native: NativeObject,
}

impl Node {
    /// Wrap `handle`, destroying it on disposal. Panics on a bridge error.
    pub fn owned(bridge: &Bridge, handle: Handle) -> Self {
        Self::new(bridge, handle, true)
    }

    /// Wrap `handle` without taking ownership. Panics on a bridge error.
    pub fn borrowed(bridge: &Bridge, handle: Handle) -> Self {
        Self::new(bridge, handle, false)
    }

    fn new(bridge: &Bridge, handle: Handle, owns_native: bool) -> Self {
        match NativeObject::new::<Self>(bridge, handle, owns_native) {
            Ok(native) => Self { native },
            Err(err) => panic!("cannot wrap test node at {handle}: {err}"),
        }
    }
}

impl ManagedType for Node {
    fn type_name() -> &'static str {
        "Node"
    }

    fn is_refcounted() -> bool {
        true
    }
}

impl Managed for Node {
    fn native(&self) -> &NativeObject {
        &self.native
    }
}

/// A plain wrapper type deriving from [`Node`].
#[derive(Debug)]
pub struct Leaf {
    native: NativeObject,
}

impl Leaf {
    pub fn owned(bridge: &Bridge, handle: Handle) -> Self {
        Self::new(bridge, handle, true)
    }

    pub fn borrowed(bridge: &Bridge, handle: Handle) -> Self {
        Self::new(bridge, handle, false)
    }

    fn new(bridge: &Bridge, handle: Handle, owns_native: bool) -> Self {
        match NativeObject::new::<Self>(bridge, handle, owns_native) {
            Ok(native) => Self { native },
            Err(err) => panic!("cannot wrap test leaf at {handle}: {err}"),
        }
    }
}

impl ManagedType for Leaf {
    fn type_name() -> &'static str {
        "Leaf"
    }

    fn base_type_name() -> &'static str {
        "Node"
    }
}

impl Managed for Leaf {
    fn native(&self) -> &NativeObject {
        &self.native
    }
}

/// A bridge over a fresh [`RecordingNative`] with default settings.
pub fn test_bridge() -> (Bridge, Arc<RecordingNative>) {
    let native = RecordingNative::new();
    let bridge = Bridge::new(Arc::clone(&native) as Arc<dyn NativeRuntime>);
    (bridge, native)
}

/// Like [`test_bridge`], driven by a manual clock.
pub fn test_bridge_with_clock() -> (Bridge, Arc<RecordingNative>, Arc<ManualClock>) {
    test_bridge_with_config(BridgeConfig::new())
}

/// A bridge with `config`, its clock replaced by a manual one.
pub fn test_bridge_with_config(
    config: BridgeConfig,
) -> (Bridge, Arc<RecordingNative>, Arc<ManualClock>) {
    let native = RecordingNative::new();
    let clock = Arc::new(ManualClock::new());
    let config = config.with_clock(Arc::clone(&clock) as Arc<dyn objbridge_core::Clock>);
    let bridge = Bridge::with_config(Arc::clone(&native) as Arc<dyn NativeRuntime>, config);
    (bridge, native, clock)
}

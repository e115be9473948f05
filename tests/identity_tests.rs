//! Integration tests for wrapper identity.
//!
//! A handle maps to at most one live wrapper no matter how many threads ask
//! for it at once, and lookups never hand out a disposed wrapper.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use objbridge::{BridgeError, Handle, Managed};
use objbridge_registry::testing::{Leaf, Node, test_bridge};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// =============================================================================
// Convergence
// =============================================================================

#[test]
fn two_threads_one_unseen_handle_build_once() {
    init_tracing();
    let (bridge, native) = test_bridge();
    let handle = native.spawn("Node");
    let calls = AtomicUsize::new(0);
    let barrier = Barrier::new(2);

    let (a, b) = thread::scope(|scope| {
        let build = || {
            barrier.wait();
            bridge
                .get_or_create(handle, |bridge, h| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Node::borrowed(bridge, h))
                })
                .unwrap()
        };
        let first = scope.spawn(build);
        let second = scope.spawn(build);
        (first.join().unwrap(), second.join().unwrap())
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(native.setup_count(handle), 1);
}

#[test]
fn many_threads_many_handles_stay_unique() {
    let (bridge, native) = test_bridge();
    let handles: Vec<Handle> = (0..32).map(|_| native.spawn("Node")).collect();
    let calls = AtomicUsize::new(0);
    let barrier = Barrier::new(8);

    let seen: Vec<Vec<Arc<Node>>> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    handles
                        .iter()
                        .map(|handle| {
                            bridge
                                .get_or_create(*handle, |bridge, h| {
                                    calls.fetch_add(1, Ordering::SeqCst);
                                    Ok(Node::borrowed(bridge, h))
                                })
                                .unwrap()
                        })
                        .collect()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert_eq!(calls.load(Ordering::SeqCst), handles.len());
    for column in 0..handles.len() {
        let first = &seen[0][column];
        assert!(seen.iter().all(|row| Arc::ptr_eq(&row[column], first)));
    }
    assert_eq!(bridge.stats().callbacks, handles.len());
}

#[test]
fn concurrent_wrap_through_binding_converges() {
    let (bridge, native) = test_bridge();
    bridge.bind::<Node, _>(|bridge, h| Ok(Node::borrowed(bridge, h)));
    let handle = native.spawn("Node");

    let wrappers: Vec<Arc<dyn Managed>> = thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| bridge.wrap(handle).unwrap().unwrap()))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert!(wrappers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

// =============================================================================
// Replacement and removal
// =============================================================================

#[test]
fn remove_then_get_or_create_builds_new_wrapper() {
    let (bridge, native) = test_bridge();
    let handle = native.spawn("Node");

    let first = bridge
        .get_or_create(handle, |bridge, h| Ok(Node::borrowed(bridge, h)))
        .unwrap();
    assert!(bridge.remove(handle));
    let second = bridge
        .get_or_create(handle, |bridge, h| Ok(Node::borrowed(bridge, h)))
        .unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(!first.native().is_disposed());
    assert_ne!(first.native().callback(), second.native().callback());
}

#[test]
fn disposed_wrapper_is_replaced_on_next_lookup() {
    let (bridge, native) = test_bridge();
    let handle = native.spawn("Node");

    let first = bridge
        .get_or_create(handle, |bridge, h| Ok(Node::borrowed(bridge, h)))
        .unwrap();
    first.native().dispose().unwrap();
    assert!(bridge.get(handle).is_none());

    let second = bridge
        .get_or_create(handle, |bridge, h| Ok(Node::borrowed(bridge, h)))
        .unwrap();
    assert!(!second.native().is_disposed());
    assert!(matches!(
        first.native().handle(),
        Err(BridgeError::UseAfterDispose { .. })
    ));
}

#[test]
fn lookup_with_wrong_type_is_rejected() {
    let (bridge, native) = test_bridge();
    let handle = native.spawn("Leaf");
    let _leaf = bridge
        .get_or_create(handle, |bridge, h| Ok(Leaf::borrowed(bridge, h)))
        .unwrap();

    let err = bridge
        .get_or_create(handle, |bridge, h| Ok(Node::borrowed(bridge, h)))
        .unwrap_err();
    assert!(matches!(err, BridgeError::TypeMismatch { .. }));
}

#[test]
fn callback_resolves_to_cached_wrapper() {
    let (bridge, native) = test_bridge();
    let handle = native.spawn("Node");
    let node = bridge
        .get_or_create(handle, |bridge, h| Ok(Node::borrowed(bridge, h)))
        .unwrap();

    let callback = native.callback_of(handle).unwrap();
    let resolved = bridge.resolve_callback(callback).unwrap();
    assert!(std::ptr::eq(resolved.native(), node.native()));
}

//! Final native releases queued for the owning thread.
//!
//! Some native engines only tolerate reference-count changes on the thread
//! that owns them. With `ReleasePolicy::Owner`, a managed reference count that
//! reaches zero on any other thread posts its unpin and native release here;
//! the owner drains the queue with `Bridge::run_deferred`.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use crossbeam_channel::{Receiver, Sender, unbounded};
use objbridge_core::{BridgeError, BridgeResult, Handle, NativeRuntime, ReleasePolicy};
use tracing::trace;

use crate::object::Managed;

/// One final release waiting for the owner thread.
pub(crate) struct PendingRelease {
    handle: Handle,
    runtime: Arc<dyn NativeRuntime>,
    /// The wrapper, kept alive until its release has run.
    wrapper: Option<Arc<dyn Managed>>,
}

impl PendingRelease {
    pub(crate) fn new(
        handle: Handle,
        runtime: Arc<dyn NativeRuntime>,
        wrapper: Option<Arc<dyn Managed>>,
    ) -> Self {
        Self {
            handle,
            runtime,
            wrapper,
        }
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }

    /// Run the release.
    ///
    /// Returns the handle if the native side destroyed an object whose wrapper
    /// was not kept with the job.
    pub(crate) fn run(self) -> BridgeResult<Option<Handle>> {
        match self.wrapper {
            Some(wrapper) => {
                wrapper.native().complete_release()?;
                Ok(None)
            }
            None => {
                let count = self.runtime.release(self.handle);
                if count < 0 {
                    return Err(BridgeError::NativeProtocolViolation {
                        handle: self.handle,
                        count,
                    });
                }
                Ok((count == 0).then_some(self.handle))
            }
        }
    }
}

pub(crate) struct ReleaseQueue {
    owner: Option<ThreadId>,
    sender: Sender<PendingRelease>,
    receiver: Receiver<PendingRelease>,
}

impl ReleaseQueue {
    pub(crate) fn new(policy: ReleasePolicy) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            owner: policy.owner(),
            sender,
            receiver,
        }
    }

    /// Whether a release on the current thread must be queued.
    pub(crate) fn should_defer(&self) -> bool {
        self.owner
            .is_some_and(|owner| owner != thread::current().id())
    }

    pub(crate) fn is_owner_thread(&self) -> bool {
        self.owner
            .is_none_or(|owner| owner == thread::current().id())
    }

    pub(crate) fn push(&self, release: PendingRelease) {
        trace!(handle = %release.handle(), "release queued");
        // The receiver lives as long as the queue, so sending cannot fail.
        let _ = self.sender.send(release);
    }

    /// Take every queued release.
    pub(crate) fn drain(&self) -> Vec<PendingRelease> {
        self.receiver.try_iter().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.receiver.len()
    }
}

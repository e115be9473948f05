//! Amortized expiration of cache entries.
//!
//! Rather than scanning the whole cache at once, every cache operation
//! advances a shared cursor by a few entries. A pass walks the shards in
//! order; once it reaches the end the sweeper idles until `sweep_interval`
//! has elapsed since the pass began, then starts over.
//!
//! Entries inserted behind the cursor wait for the next pass. Entries near
//! the end of a large cache are visited late in each pass; raise
//! `sweep_steps_per_call` if they need to be released sooner.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use objbridge_core::Handle;
use tracing::trace;

use crate::cache::{BuildGuard, InstanceCache, Slot, SlotState};
use crate::object::Managed;

/// Position of the sweeper within the cache.
#[derive(Debug)]
pub(crate) struct Cursor {
    shard: usize,
    index: usize,
    last_reset: Instant,
    needs_reset: bool,
}

impl Cursor {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            shard: 0,
            index: 0,
            last_reset: now,
            needs_reset: false,
        }
    }

    fn reset(&mut self, now: Instant) {
        self.shard = 0;
        self.index = 0;
        self.last_reset = now;
        self.needs_reset = false;
    }
}

/// What one sweep step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Another thread holds the cursor.
    Contended,
    /// The pass is complete and the interval has not elapsed.
    Idle,
    /// The cursor went back to the start.
    Reset,
    /// One entry was inspected.
    Inspected { removed: bool },
}

impl InstanceCache {
    /// Run the configured number of sweep steps.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub(crate) fn sweep(&self) {
        for _ in 0..self.steps_per_call {
            if matches!(self.sweep_step(), Step::Contended | Step::Idle) {
                break;
            }
        }
    }

    pub(crate) fn sweep_step(&self) -> Step {
        let Some(mut cursor) = self.cursor.try_lock() else {
            return Step::Contended;
        };
        let now = self.clock.now();

        if now.saturating_duration_since(cursor.last_reset) > self.sweep_interval {
            cursor.reset(now);
            trace!("sweep cursor reset");
            return Step::Reset;
        }
        if cursor.needs_reset {
            return Step::Idle;
        }

        let (handle, slot) = loop {
            if cursor.shard >= self.shards.len() {
                cursor.needs_reset = true;
                return Step::Idle;
            }
            let shard = self.shards[cursor.shard].read();
            if let Some((handle, slot)) = shard.get_index(cursor.index) {
                cursor.index += 1;
                break (*handle, Arc::clone(slot));
            }
            drop(shard);
            cursor.shard += 1;
            cursor.index = 0;
        };
        let (shard, index) = (cursor.shard, cursor.index - 1);
        drop(cursor);

        let removed = self.inspect(handle, &slot, now, false);
        if removed {
            // Removal swapped the shard's last entry into `index`.
            let mut cursor = self.cursor.lock();
            if cursor.shard == shard && cursor.index == index + 1 {
                cursor.index = index;
            }
        }
        Step::Inspected { removed }
    }

    /// Expire one entry's pin and remove it if its wrapper is gone.
    ///
    /// With `wait` unset a slot whose lock is held is skipped.
    fn inspect(&self, handle: Handle, slot: &Slot, now: Instant, wait: bool) -> bool {
        let (expired, released) = self.expire(handle, slot, now, wait);
        let Some(released) = released else {
            return expired;
        };
        drop(released);
        // The released pin may have been the wrapper's last reference.
        self.expire(handle, slot, now, wait).0
    }

    /// One locked look at an entry. The released pin, if any, is returned
    /// for the caller to drop unlocked.
    fn expire(
        &self,
        handle: Handle,
        slot: &Slot,
        now: Instant,
        wait: bool,
    ) -> (bool, Option<Arc<dyn Managed>>) {
        let guard = if wait { Some(slot.lock()) } else { slot.try_lock() };
        let Some(mut state) = guard else {
            return (false, None);
        };

        let mut released = None;
        let expired = match &mut *state {
            SlotState::Live(entry) => {
                released = entry.expire_pin(now, self.grace_window);
                entry.is_expired()
            }
            SlotState::Vacant => true,
            SlotState::Detached => false,
        };
        if expired {
            *state = SlotState::Detached;
            self.unlink(handle, slot);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        drop(state);

        if expired {
            trace!(%handle, "expired entry swept");
        }
        (expired, released)
    }

    /// Inspect every entry once. Returns the number of entries removed.
    pub fn sweep_all(&self) -> usize {
        let now = self.clock.now();
        let slots: Vec<(Handle, Slot)> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .iter()
                    .map(|(handle, slot)| (*handle, Arc::clone(slot)))
                    .collect::<Vec<_>>()
            })
            .collect();

        slots
            .iter()
            .filter(|(handle, slot)| {
                self.inspect(*handle, slot, now, !BuildGuard::in_progress())
            })
            .count()
    }
}

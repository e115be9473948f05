//! Bridge configuration.

use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use crate::{Clock, SystemClock};

/// How long a cache entry keeps its wrapper strongly referenced after the
/// last access.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(10);

/// How often the expiration sweeper restarts its pass over the cache.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Number of independently locked shards in the instance cache.
pub const DEFAULT_SHARD_COUNT: usize = 16;

/// Where the final native release of a refcounted wrapper runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleasePolicy {
    /// Release on whichever thread drops the last managed reference.
    #[default]
    Immediate,
    /// Releases from other threads are queued for this thread.
    Owner(ThreadId),
}

impl ReleasePolicy {
    /// Queue releases for the calling thread.
    pub fn current_thread() -> Self {
        ReleasePolicy::Owner(std::thread::current().id())
    }

    /// The owning thread, if releases are deferred.
    pub fn owner(&self) -> Option<ThreadId> {
        match self {
            ReleasePolicy::Immediate => None,
            ReleasePolicy::Owner(id) => Some(*id),
        }
    }
}

/// Tunables for a bridge and its instance cache.
#[derive(Clone)]
pub struct BridgeConfig {
    /// Time an entry stays pinned after its last access.
    pub grace_window: Duration,
    /// Interval after which the sweeper starts a new pass.
    pub sweep_interval: Duration,
    /// Sweeper steps performed per cache operation.
    pub sweep_steps_per_call: usize,
    /// Number of cache shards.
    pub shard_count: usize,
    /// Re-pin a weakly held wrapper when it is read.
    pub rearm_on_access: bool,
    pub release_policy: ReleasePolicy,
    pub clock: Arc<dyn Clock>,
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self {
            grace_window: DEFAULT_GRACE_WINDOW,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweep_steps_per_call: 1,
            shard_count: DEFAULT_SHARD_COUNT,
            rearm_on_access: true,
            release_policy: ReleasePolicy::Immediate,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_grace_window(mut self, grace_window: Duration) -> Self {
        self.grace_window = grace_window;
        self
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    pub fn with_sweep_steps_per_call(mut self, steps: usize) -> Self {
        self.sweep_steps_per_call = steps;
        self
    }

    /// Set the shard count. Zero is treated as one.
    pub fn with_shard_count(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count.max(1);
        self
    }

    pub fn with_rearm_on_access(mut self, rearm: bool) -> Self {
        self.rearm_on_access = rearm;
        self
    }

    pub fn with_release_policy(mut self, policy: ReleasePolicy) -> Self {
        self.release_policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("grace_window", &self.grace_window)
            .field("sweep_interval", &self.sweep_interval)
            .field("sweep_steps_per_call", &self.sweep_steps_per_call)
            .field("shard_count", &self.shard_count)
            .field("rearm_on_access", &self.rearm_on_access)
            .field("release_policy", &self.release_policy)
            .finish_non_exhaustive()
    }
}

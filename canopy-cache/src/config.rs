// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use tokio::time::Duration;

const TTL: Duration = Duration::from_secs(60);
const GC_PERIOD: Duration = Duration::from_secs(20);

/// Configuration parameters for idle eviction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Minimum time an object without any references stays in the cache.
    ///
    /// Default: 60 seconds.
    pub(crate) ttl: Duration,

    /// Interval between garbage collection runs of `spawn_gc`. A zero period disables periodic
    /// collection.
    ///
    /// Default: 20 seconds.
    pub(crate) gc_period: Duration,
}

impl CacheConfig {
    /// Return a default instance of `CacheConfig`.
    pub fn new() -> Self {
        Default::default()
    }

    /// Define the minimum time an unreferenced object stays in the cache.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Define the interval between garbage collection runs.
    pub fn gc_period(mut self, gc_period: Duration) -> Self {
        self.gc_period = gc_period;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            ttl: TTL,
            gc_period: GC_PERIOD,
        }
    }
}

//! Construction-time configuration (§10.3). Handed into the store and each
//! queue explicitly — no ambient global state, so tests stay hermetic.

use std::path::PathBuf;

/// Knobs for one [`crate::store::SharedMessageStore`] instance.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub dir: PathBuf,
    /// Target size of one `N.rdq` segment file before rolling to the next.
    pub segment_size: u64,
    /// A segment is a compaction candidate once its live-byte ratio drops
    /// below this threshold (§4.1 GC discipline).
    pub gc_live_ratio_threshold: f64,
    /// Bound on the global read cache, in entries.
    pub read_cache_capacity: usize,
    /// Bound on each client's private read cache, in entries.
    pub client_cache_capacity: usize,
}

impl StoreConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            segment_size: 64 * 1024 * 1024,
            gc_live_ratio_threshold: 0.5,
            read_cache_capacity: 4096,
            client_cache_capacity: 256,
        }
    }
}

/// Knobs for one [`crate::queue::TieredQueue`] / [`crate::pqi::PerQueueIndex`] pair.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub dir: PathBuf,
    /// `S` in §4.2: number of seq-ids per PQI segment. Must be a power of two.
    pub segment_size: u64,
    /// `B` in §4.3 `limit_ram_index`: how many PQI publish records are
    /// batch-written per demotion pass.
    pub ram_index_batch_size: usize,
    pub durable: bool,
}

impl QueueConfig {
    pub fn new(dir: impl Into<PathBuf>, durable: bool) -> Self {
        Self {
            dir: dir.into(),
            segment_size: 16384,
            ram_index_batch_size: 64,
            durable,
        }
    }
}

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tiered_mq::clock::SystemClock;
use tiered_mq::config::{QueueConfig, StoreConfig};
use tiered_mq::store::{ClientRef, SharedMessageStore};
use tiered_mq::TieredQueue;

pub struct Harness {
    pub persistent_store: Arc<SharedMessageStore>,
    pub transient_store: Arc<SharedMessageStore>,
    pub queue: TieredQueue,
}

/// Opens both shared stores and one durable tiered queue rooted at `dir`,
/// simulating whatever shutdown state (clean or crashed) the directory was
/// left in by a prior `Harness`.
pub fn open(dir: &Path, durable: bool) -> Harness {
    let queue_dir = dir.join("queue");
    let refs = TieredQueue::peek_refs(&queue_dir).expect("peek refs");

    let mut persistent_refs = HashSet::new();
    let mut transient_refs = HashSet::new();
    if let Some((p, t)) = refs {
        persistent_refs.insert(p);
        transient_refs.insert(t);
    }

    let persistent_outcome = SharedMessageStore::open(
        StoreConfig::new(dir.join("persistent")),
        true,
        &persistent_refs,
    )
    .expect("open persistent store");
    let transient_outcome = SharedMessageStore::open(
        StoreConfig::new(dir.join("transient")),
        false,
        &transient_refs,
    )
    .expect("open transient store");

    let persistent_store = Arc::new(persistent_outcome.store);
    let transient_store = Arc::new(transient_outcome.store);
    let msg_store_recovered = persistent_outcome.clean && transient_outcome.clean;

    let queue = TieredQueue::open(
        "orders",
        durable,
        QueueConfig::new(queue_dir, durable),
        persistent_store.clone(),
        transient_store.clone(),
        msg_store_recovered,
        Box::new(SystemClock),
    )
    .expect("open queue");

    Harness {
        persistent_store,
        transient_store,
        queue,
    }
}

/// Flushes the queue and both stores' index/refs snapshots, then cleanly
/// terminates the queue so a subsequent `open` of the same directory
/// observes a clean-shutdown restart.
pub fn clean_shutdown(mut harness: Harness) {
    harness.queue.sync().expect("sync queue");
    harness.persistent_store.close().expect("close persistent store");
    harness.transient_store.close().expect("close transient store");
    harness.queue.terminate().expect("terminate queue");
}

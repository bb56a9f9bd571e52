//! A variable-capacity message queue engine: messages page between RAM and
//! disk across five tiers (α/β/γ/δ) as ingress/egress rates and a caller-set
//! RAM-duration target dictate, backed by a content-addressed shared message
//! store and a per-queue index journal.

pub mod backing_queue;
pub mod clock;
pub mod config;
pub mod error;
pub mod message;
pub mod mmap;
pub mod pqi;
pub mod queue;
pub mod rate;
pub mod store;
pub mod txn;

pub use backing_queue::BackingQueue;
pub use error::{Error, Result};
pub use message::{Guid, Message, SeqId};
pub use queue::{AckTag, QueueStatus, TieredQueue};

//! The external backing-queue contract (§6): the surface a channel/AMQP
//! layer above this crate would drive. [`TieredQueue`] is the only
//! implementation today, but keeping the contract as a trait lets tests and
//! future backends (e.g. a pure-RAM queue for non-durable vhosts) swap in
//! without touching call sites.

use crate::message::{Message, SeqId};
use crate::queue::{AckTag, QueueStatus, TieredQueue};
use crate::txn::TxnId;
use crate::Result;

pub trait BackingQueue {
    fn publish(&mut self, msg: Message, force: bool) -> Result<SeqId>;
    fn publish_delivered(&mut self, ack_required: bool, msg: Message) -> Result<Option<AckTag>>;
    fn fetch(&mut self, ack_required: bool) -> Result<Option<(Message, bool, Option<AckTag>, u64)>>;
    fn ack(&mut self, tags: &[AckTag]) -> Result<()>;
    fn requeue(&mut self, tags: &[AckTag]) -> Result<()>;

    fn tx_publish(&mut self, txn: TxnId, msg: Message) -> Result<()>;
    fn tx_ack(&mut self, txn: TxnId, tags: Vec<AckTag>);
    fn tx_rollback(&mut self, txn: TxnId) -> Result<Vec<AckTag>>;
    fn tx_commit(&mut self, txn: TxnId, on_persisted: Box<dyn FnOnce(Result<()>) + Send>) -> Result<()>;

    fn set_ram_duration_target(&mut self, target: Option<f64>) -> Result<()>;
    fn ram_duration(&mut self) -> Option<f64>;

    fn len(&self) -> u64;
    fn is_empty(&self) -> bool;
    fn status(&self) -> QueueStatus;
    fn needs_sync(&self) -> bool;
    fn sync(&mut self) -> Result<()>;
    fn handle_pre_hibernate(&mut self) -> Result<()>;
    fn purge(&mut self) -> Result<u64>;
}

impl BackingQueue for TieredQueue {
    fn publish(&mut self, msg: Message, force: bool) -> Result<SeqId> {
        TieredQueue::publish(self, msg, force)
    }

    fn publish_delivered(&mut self, ack_required: bool, msg: Message) -> Result<Option<AckTag>> {
        TieredQueue::publish_delivered(self, ack_required, msg)
    }

    fn fetch(&mut self, ack_required: bool) -> Result<Option<(Message, bool, Option<AckTag>, u64)>> {
        TieredQueue::fetch(self, ack_required)
    }

    fn ack(&mut self, tags: &[AckTag]) -> Result<()> {
        TieredQueue::ack(self, tags)
    }

    fn requeue(&mut self, tags: &[AckTag]) -> Result<()> {
        TieredQueue::requeue(self, tags)
    }

    fn tx_publish(&mut self, txn: TxnId, msg: Message) -> Result<()> {
        TieredQueue::tx_publish(self, txn, msg)
    }

    fn tx_ack(&mut self, txn: TxnId, tags: Vec<AckTag>) {
        TieredQueue::tx_ack(self, txn, tags)
    }

    fn tx_rollback(&mut self, txn: TxnId) -> Result<Vec<AckTag>> {
        TieredQueue::tx_rollback(self, txn)
    }

    fn tx_commit(&mut self, txn: TxnId, on_persisted: Box<dyn FnOnce(Result<()>) + Send>) -> Result<()> {
        TieredQueue::tx_commit(self, txn, move |res| on_persisted(res))
    }

    fn set_ram_duration_target(&mut self, target: Option<f64>) -> Result<()> {
        TieredQueue::set_ram_duration_target(self, target)
    }

    fn ram_duration(&mut self) -> Option<f64> {
        TieredQueue::ram_duration(self)
    }

    fn len(&self) -> u64 {
        TieredQueue::len(self)
    }

    fn is_empty(&self) -> bool {
        TieredQueue::is_empty(self)
    }

    fn status(&self) -> QueueStatus {
        TieredQueue::status(self)
    }

    fn needs_sync(&self) -> bool {
        TieredQueue::needs_sync(self)
    }

    fn sync(&mut self) -> Result<()> {
        TieredQueue::sync(self)
    }

    fn handle_pre_hibernate(&mut self) -> Result<()> {
        TieredQueue::handle_pre_hibernate(self)
    }

    fn purge(&mut self) -> Result<u64> {
        TieredQueue::purge(self)
    }
}

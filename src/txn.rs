//! Transaction Buffer (C5, §4.5): per-transaction pending publishes and acks,
//! keyed by an opaque handle owned by the channel layer.

use std::collections::HashMap;

use crate::message::Message;

pub type TxnId = u64;

#[derive(Default)]
pub struct TxnState {
    pub pending_publishes: Vec<Message>,
    pub pending_acks: Vec<Vec<u64>>,
}

#[derive(Default)]
pub struct TransactionBuffer {
    txns: HashMap<TxnId, TxnState>,
}

impl TransactionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tx_publish(&mut self, txn: TxnId, msg: Message) {
        self.txns.entry(txn).or_default().pending_publishes.push(msg);
    }

    pub fn tx_ack(&mut self, txn: TxnId, tags: Vec<u64>) {
        self.txns.entry(txn).or_default().pending_acks.push(tags);
    }

    /// Removes and returns the transaction's buffered state. Idempotent:
    /// a handle with no prior activity yields an empty state.
    pub fn take(&mut self, txn: TxnId) -> TxnState {
        self.txns.remove(&txn).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_on_unknown_handle_is_empty() {
        let mut txb = TransactionBuffer::new();
        let state = txb.take(42);
        assert!(state.pending_publishes.is_empty());
        assert!(state.pending_acks.is_empty());
    }

    #[test]
    fn accumulates_until_taken() {
        let mut txb = TransactionBuffer::new();
        txb.tx_publish(1, Message::new(b"a".to_vec(), b"".to_vec(), false));
        txb.tx_publish(1, Message::new(b"b".to_vec(), b"".to_vec(), false));
        txb.tx_ack(1, vec![7, 8]);
        let state = txb.take(1);
        assert_eq!(state.pending_publishes.len(), 2);
        assert_eq!(state.pending_acks, vec![vec![7, 8]]);
        assert!(txb.take(1).pending_publishes.is_empty());
    }
}

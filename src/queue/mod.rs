//! Tiered Queue (C3, §4.3): the core of the engine. Owns the five tiers
//! (q1 α, q2 β/γ, Δ, q3 β/γ, q4 α), the pending-ack table, the per-queue
//! index, and the rate controller, and drives every paging transition
//! between them.

mod controller;
mod tier;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::message::{Guid, Message, SeqId};
use crate::pqi::PerQueueIndex;
use crate::rate::RateEstimator;
use crate::store::{ClientRef, SharedMessageStore};
use crate::txn::{TransactionBuffer, TxnId};
use crate::{Error, Result};

pub use controller::StorageType;
pub use tier::{AckTag, Delta, MsgStatus, PendingAck, TierEntry};

const QUEUE_REFS_FILE: &str = "queue_refs.json";

#[derive(Serialize, Deserialize)]
struct QueueRefs {
    persistent: ClientRef,
    transient: ClientRef,
}

/// A snapshot of tier sizes and controller state (§10.5 `status`).
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStatus {
    pub len: u64,
    pub q1: u64,
    pub q2: u64,
    pub delta: u64,
    pub q3: u64,
    pub q4: u64,
    pub persistent_count: u64,
    pub ram_msg_count: u64,
    pub ram_index_count: u64,
    pub target_ram_msg_count: Option<u64>,
}

pub struct TieredQueue {
    name: String,
    durable: bool,
    config: QueueConfig,

    persistent_store: Arc<SharedMessageStore>,
    transient_store: Arc<SharedMessageStore>,
    persistent_client: ClientRef,
    transient_client: ClientRef,

    pqi: PerQueueIndex,
    clock: Box<dyn Clock>,

    q1: VecDeque<MsgStatus>,
    q2: VecDeque<TierEntry>,
    delta: Delta,
    q3: VecDeque<TierEntry>,
    q4: VecDeque<MsgStatus>,

    pending_acks: HashMap<AckTag, PendingAck>,
    next_ack_tag: AckTag,
    next_seq: SeqId,

    len: u64,
    persistent_count: u64,
    ram_msg_count: u64,
    ram_index_count: u64,

    rate: RateEstimator,
    txn_buffer: TransactionBuffer,
    dirty: bool,
    transient_threshold: SeqId,
}

impl TieredQueue {
    /// Opens (or creates) a queue directory. `msg_store_recovered` should be
    /// true only when both shared-store instances themselves reported a
    /// clean shutdown; it decides whether PQI performs its recovery walk.
    pub fn open(
        name: impl Into<String>,
        durable: bool,
        config: QueueConfig,
        persistent_store: Arc<SharedMessageStore>,
        transient_store: Arc<SharedMessageStore>,
        msg_store_recovered: bool,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        let name = name.into();
        std::fs::create_dir_all(&config.dir)?;

        let refs_path = config.dir.join(QUEUE_REFS_FILE);
        let refs = std::fs::read(&refs_path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<QueueRefs>(&bytes).ok())
            .unwrap_or_else(|| QueueRefs {
                persistent: ClientRef::new(),
                transient: ClientRef::new(),
            });
        let encoded = serde_json::to_vec(&refs)
            .map_err(|_| Error::CorruptMetadata("failed to encode queue refs"))?;
        std::fs::write(&refs_path, encoded)?;

        persistent_store.client_init(refs.persistent);
        transient_store.client_init(refs.transient);

        let contains_fn = |guid: &Guid| persistent_store.contains(guid);
        let outcome = PerQueueIndex::init(&config.dir, config.segment_size, msg_store_recovered, contains_fn)?;
        let (low_seq, next_seq) = outcome.pqi.bounds();
        let recovered_count = outcome.recovered_count;

        let mut persistent_count = 0u64;
        let mut cursor = low_seq;
        while cursor < next_seq {
            let (entries, next) = outcome.pqi.read(cursor, next_seq);
            persistent_count += entries.iter().filter(|(_, _, is_persistent, _)| *is_persistent).count() as u64;
            match next {
                Some(n) => cursor = n,
                None => break,
            }
        }

        let delta = if recovered_count > 0 {
            Delta {
                start_seq_id: low_seq,
                count: recovered_count,
            }
        } else {
            Delta::default()
        };

        let now = clock.now_micros();
        Ok(Self {
            name,
            durable,
            config,
            persistent_store,
            transient_store,
            persistent_client: refs.persistent,
            transient_client: refs.transient,
            pqi: outcome.pqi,
            clock,
            q1: VecDeque::new(),
            q2: VecDeque::new(),
            delta,
            q3: VecDeque::new(),
            q4: VecDeque::new(),
            pending_acks: HashMap::new(),
            next_ack_tag: 0,
            next_seq,
            len: recovered_count,
            persistent_count,
            ram_msg_count: 0,
            ram_index_count: 0,
            rate: RateEstimator::new(now),
            txn_buffer: TransactionBuffer::new(),
            dirty: false,
            transient_threshold: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads a queue directory's persisted client refs without opening
    /// anything, so a caller managing several queues can union the refs of
    /// all durable queues before opening the shared persistent store.
    pub fn peek_refs(dir: &std::path::Path) -> Result<Option<(ClientRef, ClientRef)>> {
        match std::fs::read(dir.join(QUEUE_REFS_FILE)) {
            Ok(bytes) => {
                let refs: QueueRefs = serde_json::from_slice(&bytes)
                    .map_err(|_| Error::CorruptMetadata("malformed queue refs file"))?;
                Ok(Some((refs.persistent, refs.transient)))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// A seq-id below which leftover transient publishes are dropped as
    /// stragglers the next time `maybe_deltas_to_betas` visits them.
    pub fn set_transient_threshold(&mut self, seq_id: SeqId) {
        self.transient_threshold = seq_id;
    }

    fn store_for(&self, is_persistent: bool) -> &Arc<SharedMessageStore> {
        if is_persistent {
            &self.persistent_store
        } else {
            &self.transient_store
        }
    }

    fn client_for(&self, is_persistent: bool) -> ClientRef {
        if is_persistent {
            self.persistent_client
        } else {
            self.transient_client
        }
    }

    fn permitted_ram_index(&self) -> Option<u64> {
        controller::permitted_ram_index_count(self.len, self.delta.count, (self.q2.len() + self.q3.len()) as u64)
    }

    // ---- publish path (§4.3) ----

    pub fn publish(&mut self, msg: Message, force: bool) -> Result<SeqId> {
        let seq_id = self.next_seq;
        self.next_seq += 1;
        self.do_publish(msg, seq_id, force, false)?;
        self.rate.record_ingress();
        Ok(seq_id)
    }

    fn requeue_one(&mut self, msg: Message) -> Result<SeqId> {
        let seq_id = self.next_seq;
        self.next_seq += 1;
        self.do_publish(msg, seq_id, false, true)?;
        self.rate.record_ingress();
        Ok(seq_id)
    }

    fn do_publish(&mut self, msg: Message, seq_id: SeqId, force: bool, already_in_store: bool) -> Result<()> {
        let is_persistent = msg.is_persistent;
        let q1_empty = self.q1.is_empty();
        let q3_empty = self.q3.is_empty();
        let q3_head_seq = self.q3.front().map(|e| e.seq_id);
        let target = self.rate.target_ram_msg_count();
        let storage = controller::select_storage_type(
            target,
            self.ram_msg_count,
            q1_empty,
            q3_empty,
            q3_head_seq,
            seq_id,
            self.config.segment_size,
        );

        match storage {
            StorageType::Msg => {
                let payload_written = if already_in_store {
                    true
                } else if is_persistent || force {
                    let client = self.client_for(is_persistent);
                    self.store_for(is_persistent).write(msg.guid, &msg.encode(), client)?;
                    true
                } else {
                    false
                };
                let status = MsgStatus {
                    seq_id,
                    msg,
                    is_delivered: false,
                    payload_written,
                };
                if self.q1.is_empty() && self.q2.is_empty() && self.delta.is_empty() && self.q3.is_empty() {
                    self.q4.push_back(status);
                } else {
                    self.q1.push_back(status);
                }
                self.ram_msg_count += 1;
            }
            StorageType::Index => {
                if !already_in_store {
                    let client = self.client_for(is_persistent);
                    self.store_for(is_persistent).write(msg.guid, &msg.encode(), client)?;
                }
                let mut on_pqi = false;
                if let Some(permitted) = self.permitted_ram_index() {
                    if self.ram_index_count >= permitted {
                        self.pqi.publish(msg.guid, seq_id, is_persistent)?;
                        on_pqi = true;
                    }
                }
                let entry = TierEntry {
                    seq_id,
                    guid: msg.guid,
                    is_persistent,
                    on_pqi,
                };
                if self.delta.is_empty() {
                    self.q3.push_back(entry);
                } else {
                    self.q2.push_back(entry);
                }
                if !on_pqi {
                    self.ram_index_count += 1;
                }
            }
            StorageType::Neither => {
                if !already_in_store {
                    let client = self.client_for(is_persistent);
                    self.store_for(is_persistent).write(msg.guid, &msg.encode(), client)?;
                }
                self.pqi.publish(msg.guid, seq_id, is_persistent)?;
                if self.delta.is_empty() {
                    self.delta = Delta {
                        start_seq_id: seq_id,
                        count: 1,
                    };
                } else {
                    self.delta.count += 1;
                }
            }
        }

        self.len += 1;
        if is_persistent {
            self.persistent_count += 1;
            self.dirty = true;
        }
        self.reduce_alphas_to_target()?;
        self.limit_ram_index()?;
        Ok(())
    }

    pub fn publish_delivered(&mut self, ack_required: bool, msg: Message) -> Result<Option<AckTag>> {
        let seq_id = self.next_seq;
        self.next_seq += 1;
        self.rate.record_ingress();
        self.rate.record_egress();

        if !ack_required {
            return Ok(None);
        }

        let client = self.client_for(msg.is_persistent);
        self.store_for(msg.is_persistent).write(msg.guid, &msg.encode(), client)?;
        if msg.is_persistent {
            self.dirty = true;
        }

        let tag = self.next_ack_tag;
        self.next_ack_tag += 1;
        self.pending_acks.insert(
            tag,
            PendingAck::InRam(MsgStatus {
                seq_id,
                msg,
                is_delivered: true,
                payload_written: true,
            }),
        );
        Ok(Some(tag))
    }

    // ---- fetch path (§4.3) ----

    pub fn fetch(&mut self, ack_required: bool) -> Result<Option<(Message, bool, Option<AckTag>, u64)>> {
        let popped = if let Some(status) = self.q4.pop_front() {
            self.ram_msg_count -= 1;
            Some(status)
        } else {
            self.fetch_from_q3_or_delta()?
        };
        let Some(mut status) = popped else {
            return Ok(None);
        };

        self.len -= 1;
        if status.msg.is_persistent {
            self.persistent_count -= 1;
        }
        self.rate.record_egress();

        if self.durable && status.msg.is_persistent && !status.is_delivered {
            self.pqi.deliver(status.seq_id)?;
            status.is_delivered = true;
        }

        let remaining = self.len;
        let is_delivered = status.is_delivered;
        let msg = status.msg.clone();

        if !ack_required {
            self.release(status.seq_id, &msg)?;
            return Ok(Some((msg, is_delivered, None, remaining)));
        }

        let tag = self.next_ack_tag;
        self.next_ack_tag += 1;
        let pending = if status.payload_written {
            PendingAck::OnDisk {
                seq_id: status.seq_id,
                guid: msg.guid,
                is_persistent: msg.is_persistent,
            }
        } else {
            PendingAck::InRam(status)
        };
        self.pending_acks.insert(tag, pending);
        Ok(Some((msg, is_delivered, Some(tag), remaining)))
    }

    fn fetch_from_q3_or_delta(&mut self) -> Result<Option<MsgStatus>> {
        // q3 can start a call empty while Δ still holds entries — e.g. right
        // after a restart collapses all recovered PQI entries into one Δ run
        // with q3 untouched. Promote a segment's worth before giving up.
        if self.q3.is_empty() && !self.delta.is_empty() {
            self.maybe_deltas_to_betas()?;
        }
        if self.q3.is_empty() {
            debug_assert!(self.q2.is_empty() && self.delta.is_empty() && self.q1.is_empty());
            return Ok(None);
        }
        let entry = self.q3.pop_front().expect("checked non-empty above");
        let client = self.client_for(entry.is_persistent);
        let bytes = self.store_for(entry.is_persistent).read(&entry.guid, client)?;
        let msg = Message::decode(entry.guid, entry.is_persistent, &bytes)?;

        if !entry.on_pqi {
            self.ram_index_count = self.ram_index_count.saturating_sub(1);
        }
        self.ram_msg_count += 1;

        if self.q3.is_empty() && self.delta.is_empty() {
            while let Some(status) = self.q1.pop_front() {
                self.q4.push_back(status);
            }
        } else if self.q3.is_empty() {
            self.maybe_deltas_to_betas()?;
        }

        Ok(Some(MsgStatus {
            seq_id: entry.seq_id,
            msg,
            is_delivered: false,
            payload_written: true,
        }))
    }

    fn release(&mut self, seq_id: SeqId, msg: &Message) -> Result<()> {
        self.store_for(msg.is_persistent).remove(&[msg.guid])?;
        if msg.is_persistent {
            self.pqi.ack(&[seq_id])?;
            self.dirty = true;
        }
        Ok(())
    }

    // ---- ack path (§4.3) ----

    pub fn ack(&mut self, tags: &[AckTag]) -> Result<()> {
        if tags.is_empty() {
            return Ok(());
        }
        let mut persistent_guids = Vec::new();
        let mut transient_guids = Vec::new();
        let mut persistent_seq_ids = Vec::new();
        for tag in tags {
            if let Some(pending) = self.pending_acks.remove(tag) {
                if pending.is_persistent() {
                    persistent_guids.push(pending.guid());
                    persistent_seq_ids.push(pending.seq_id());
                } else {
                    transient_guids.push(pending.guid());
                }
            }
        }
        if !persistent_guids.is_empty() {
            self.persistent_store.remove(&persistent_guids)?;
        }
        if !transient_guids.is_empty() {
            self.transient_store.remove(&transient_guids)?;
        }
        if !persistent_seq_ids.is_empty() {
            self.pqi.ack(&persistent_seq_ids)?;
            self.dirty = true;
        }
        Ok(())
    }

    /// Reads payloads back and re-publishes with fresh seq-ids, preserving
    /// the order `tags` were given in (§8 scenario 6).
    pub fn requeue(&mut self, tags: &[AckTag]) -> Result<()> {
        if tags.is_empty() {
            return Ok(());
        }
        for tag in tags {
            if let Some(pending) = self.pending_acks.remove(tag) {
                let msg = match pending {
                    PendingAck::InRam(status) => status.msg,
                    PendingAck::OnDisk {
                        guid, is_persistent, ..
                    } => {
                        let client = self.client_for(is_persistent);
                        let bytes = self.store_for(is_persistent).read(&guid, client)?;
                        Message::decode(guid, is_persistent, &bytes)?
                    }
                };
                self.requeue_one(msg)?;
            }
        }
        Ok(())
    }

    // ---- paging transitions (§4.3 "the heart") ----

    /// Writes `status`'s payload if needed and decides β vs γ, without
    /// deciding where in q2/q3 it lands — callers pop from the tail of q1/q4
    /// in furthest-from-delivery-first order, so the caller is responsible
    /// for re-establishing ascending seq-id order on insertion.
    fn demote_alpha_entry(&mut self, status: MsgStatus) -> Result<TierEntry> {
        let MsgStatus {
            seq_id,
            msg,
            payload_written,
            ..
        } = status;
        if !payload_written {
            let client = self.client_for(msg.is_persistent);
            self.store_for(msg.is_persistent).write(msg.guid, &msg.encode(), client)?;
        }
        let mut on_pqi = false;
        if let Some(permitted) = self.permitted_ram_index() {
            if self.ram_index_count >= permitted {
                self.pqi.publish(msg.guid, seq_id, msg.is_persistent)?;
                on_pqi = true;
            }
        }
        if !on_pqi {
            self.ram_index_count += 1;
        }
        self.ram_msg_count -= 1;
        Ok(TierEntry {
            seq_id,
            guid: msg.guid,
            is_persistent: msg.is_persistent,
            on_pqi,
        })
    }

    /// q1's back is popped youngest-first (descending seq-id), but entries
    /// land at q3/q2's *back* (the youngest position there), so the batch
    /// must be reversed before insertion to keep ascending seq-id order.
    fn maybe_push_q1_to_betas(&mut self) -> Result<()> {
        let mut demoted = Vec::new();
        loop {
            let Some(target) = self.rate.target_ram_msg_count() else {
                break;
            };
            if self.ram_msg_count <= target {
                break;
            }
            let Some(status) = self.q1.pop_back() else {
                break;
            };
            demoted.push(self.demote_alpha_entry(status)?);
        }
        for entry in demoted.into_iter().rev() {
            if self.delta.is_empty() {
                self.q3.push_back(entry);
            } else {
                self.q2.push_back(entry);
            }
        }
        Ok(())
    }

    /// q4's back is popped least-old-first (descending seq-id), and entries
    /// land at q3's *front* (the oldest position there); unlike q1's case,
    /// pushing each one to the front as it's popped already re-establishes
    /// ascending order, so no reversal is needed here.
    fn maybe_push_q4_to_betas(&mut self) -> Result<()> {
        loop {
            let Some(target) = self.rate.target_ram_msg_count() else {
                return Ok(());
            };
            if self.ram_msg_count <= target {
                return Ok(());
            }
            let Some(status) = self.q4.pop_back() else {
                return Ok(());
            };
            let entry = self.demote_alpha_entry(status)?;
            self.q3.push_front(entry);
        }
    }

    fn reduce_alphas_to_target(&mut self) -> Result<()> {
        self.maybe_push_q1_to_betas()?;
        self.maybe_push_q4_to_betas()?;
        Ok(())
    }

    fn fold_into_delta(&mut self, entry: TierEntry) -> Result<()> {
        if !entry.on_pqi {
            self.pqi.publish(entry.guid, entry.seq_id, entry.is_persistent)?;
            self.ram_index_count = self.ram_index_count.saturating_sub(1);
        }
        if self.delta.is_empty() {
            self.delta = Delta {
                start_seq_id: entry.seq_id,
                count: 1,
            };
        } else {
            self.delta.count += 1;
        }
        Ok(())
    }

    /// Demotion β/γ → δ: drains q2 wholesale, then the tail of q3 beyond its
    /// head's next segment boundary.
    fn push_betas_to_deltas(&mut self) -> Result<()> {
        while let Some(entry) = self.q2.pop_front() {
            self.fold_into_delta(entry)?;
        }
        if let Some(head) = self.q3.front() {
            let boundary = self.pqi.next_segment_boundary(head.seq_id);
            while let Some(&entry) = self.q3.back() {
                if entry.seq_id < boundary {
                    break;
                }
                self.q3.pop_back();
                self.fold_into_delta(entry)?;
            }
        }
        Ok(())
    }

    /// Promotion δ → β/γ: loads one PQI segment's worth of Δ's surviving
    /// entries into q3, joining q2 onto q3 once Δ drains entirely.
    fn maybe_deltas_to_betas(&mut self) -> Result<()> {
        if self.delta.is_empty() {
            return Ok(());
        }
        let start = self.delta.start_seq_id;
        let boundary = self.pqi.next_segment_boundary(start).min(self.next_seq);
        let (entries, _) = self.pqi.read(start, boundary);

        let mut loaded = 0u64;
        for (seq_id, guid, is_persistent, _delivered) in entries {
            loaded += 1;
            if seq_id < self.transient_threshold && !is_persistent {
                self.pqi.ack(&[seq_id])?;
                continue;
            }
            self.q3.push_back(TierEntry {
                seq_id,
                guid,
                is_persistent,
                on_pqi: true,
            });
        }

        self.delta.start_seq_id = boundary;
        self.delta.count = self.delta.count.saturating_sub(loaded);
        if self.delta.count == 0 {
            self.delta = Delta::default();
            while let Some(entry) = self.q2.pop_front() {
                self.q3.push_back(entry);
            }
        }
        Ok(())
    }

    /// Demotion β → γ: batch-writes up to `ram_index_batch_size` PQI publish
    /// records, tail of q3 first, then q2.
    fn limit_ram_index(&mut self) -> Result<()> {
        let Some(permitted) = self.permitted_ram_index() else {
            return Ok(());
        };
        let mut budget = self.config.ram_index_batch_size as u64;
        for i in (0..self.q3.len()).rev() {
            if self.ram_index_count <= permitted || budget == 0 {
                break;
            }
            if self.q3[i].is_beta() {
                let entry = self.q3[i];
                self.pqi.publish(entry.guid, entry.seq_id, entry.is_persistent)?;
                self.q3[i].on_pqi = true;
                self.ram_index_count -= 1;
                budget -= 1;
            }
        }
        for i in (0..self.q2.len()).rev() {
            if self.ram_index_count <= permitted || budget == 0 {
                break;
            }
            if self.q2[i].is_beta() {
                let entry = self.q2[i];
                self.pqi.publish(entry.guid, entry.seq_id, entry.is_persistent)?;
                self.q2[i].on_pqi = true;
                self.ram_index_count -= 1;
                budget -= 1;
            }
        }
        Ok(())
    }

    // ---- transactions (§4.3, §4.5) ----

    pub fn tx_publish(&mut self, txn: TxnId, msg: Message) -> Result<()> {
        if self.durable && msg.is_persistent {
            let client = self.client_for(true);
            self.persistent_store.write(msg.guid, &msg.encode(), client)?;
        }
        self.txn_buffer.tx_publish(txn, msg);
        Ok(())
    }

    pub fn tx_ack(&mut self, txn: TxnId, tags: Vec<AckTag>) {
        self.txn_buffer.tx_ack(txn, tags);
    }

    pub fn tx_rollback(&mut self, txn: TxnId) -> Result<Vec<AckTag>> {
        let state = self.txn_buffer.take(txn);
        for msg in &state.pending_publishes {
            if self.durable && msg.is_persistent {
                self.persistent_store.remove(&[msg.guid])?;
            }
        }
        Ok(state.pending_acks.into_iter().flatten().collect())
    }

    pub fn tx_commit(&mut self, txn: TxnId, on_persisted: impl FnOnce(Result<()>)) -> Result<()> {
        let state = self.txn_buffer.take(txn);
        let has_persistent_publish = state.pending_publishes.iter().any(|m| m.is_persistent);
        if !self.durable || !has_persistent_publish {
            return self.run_post_commit(state, on_persisted);
        }
        let guids: Vec<Guid> = state
            .pending_publishes
            .iter()
            .filter(|m| m.is_persistent)
            .map(|m| m.guid)
            .collect();
        let mut sync_result = Ok(());
        self.persistent_store.sync(&guids, |res| sync_result = res);
        sync_result?;
        self.run_post_commit(state, on_persisted)
    }

    fn run_post_commit(&mut self, state: crate::txn::TxnState, on_persisted: impl FnOnce(Result<()>)) -> Result<()> {
        let eager_written = self.durable;
        let mut seq_ids = Vec::new();
        for msg in state.pending_publishes {
            let is_persistent = msg.is_persistent;
            let already_in_store = eager_written && is_persistent;
            let seq_id = self.next_seq;
            self.next_seq += 1;
            self.do_publish(msg, seq_id, false, already_in_store)?;
            self.rate.record_ingress();
            if is_persistent {
                seq_ids.push(seq_id);
            }
        }
        let ack_tags: Vec<AckTag> = state.pending_acks.into_iter().flatten().collect();
        if !ack_tags.is_empty() {
            self.ack(&ack_tags)?;
        }
        if !seq_ids.is_empty() {
            self.pqi.sync(&seq_ids)?;
        }
        on_persisted(Ok(()));
        Ok(())
    }

    // ---- controller entry points (§4.4) ----

    pub fn set_ram_duration_target(&mut self, target: Option<f64>) -> Result<()> {
        if self.rate.set_ram_duration_target(target) {
            self.reduce_memory_use()?;
        }
        Ok(())
    }

    pub fn ram_duration(&mut self) -> Option<f64> {
        let now = self.clock.now_micros();
        self.rate.ram_duration(now, self.ram_msg_count)
    }

    fn reduce_memory_use(&mut self) -> Result<()> {
        self.reduce_alphas_to_target()?;
        if self.rate.target_ram_msg_count() == Some(0) {
            self.push_betas_to_deltas()?;
        }
        self.limit_ram_index()?;
        Ok(())
    }

    // ---- supplemented operations (§10.5) ----

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            len: self.len,
            q1: self.q1.len() as u64,
            q2: self.q2.len() as u64,
            delta: self.delta.count,
            q3: self.q3.len() as u64,
            q4: self.q4.len() as u64,
            persistent_count: self.persistent_count,
            ram_msg_count: self.ram_msg_count,
            ram_index_count: self.ram_index_count,
            target_ram_msg_count: self.rate.target_ram_msg_count(),
        }
    }

    pub fn needs_sync(&self) -> bool {
        self.dirty
    }

    pub fn sync(&mut self) -> Result<()> {
        self.pqi.flush()?;
        self.pqi.sync(&[])?;
        self.dirty = false;
        Ok(())
    }

    pub fn handle_pre_hibernate(&mut self) -> Result<()> {
        self.pqi.flush()
    }

    /// Drops every message in the queue without individual acks (§10.5).
    pub fn purge(&mut self) -> Result<u64> {
        let purged = self.len;
        let mut persistent_guids = Vec::new();
        let mut transient_guids = Vec::new();

        while let Some(status) = self.q1.pop_front() {
            push_guid(&mut persistent_guids, &mut transient_guids, status.msg.guid, status.msg.is_persistent);
        }
        while let Some(status) = self.q4.pop_front() {
            push_guid(&mut persistent_guids, &mut transient_guids, status.msg.guid, status.msg.is_persistent);
        }
        while let Some(entry) = self.q2.pop_front() {
            if !entry.on_pqi {
                push_guid(&mut persistent_guids, &mut transient_guids, entry.guid, entry.is_persistent);
            }
        }
        while let Some(entry) = self.q3.pop_front() {
            if !entry.on_pqi {
                push_guid(&mut persistent_guids, &mut transient_guids, entry.guid, entry.is_persistent);
            }
        }

        let (low_seq, next_seq) = self.pqi.bounds();
        let mut cursor = low_seq;
        while cursor < next_seq {
            let (entries, next) = self.pqi.read(cursor, next_seq);
            for (_, guid, is_persistent, _) in entries {
                push_guid(&mut persistent_guids, &mut transient_guids, guid, is_persistent);
            }
            match next {
                Some(n) => cursor = n,
                None => break,
            }
        }
        if next_seq > low_seq {
            let all: Vec<u64> = (low_seq..next_seq).collect();
            self.pqi.ack(&all)?;
        }

        if !persistent_guids.is_empty() {
            self.persistent_store.remove(&persistent_guids)?;
        }
        if !transient_guids.is_empty() {
            self.transient_store.remove(&transient_guids)?;
        }

        self.delta = Delta::default();
        self.len = 0;
        self.persistent_count = 0;
        self.ram_msg_count = 0;
        self.ram_index_count = 0;
        self.dirty = true;
        Ok(purged)
    }

    /// Unconditionally converts every remaining β entry (`on_pqi == false`)
    /// to γ, ignoring the usual `ram_index_batch_size` budget. A clean
    /// shutdown must leave every still-queued message durably represented in
    /// PQI — `limit_ram_index`'s amortized batching is only safe while the
    /// process keeps running.
    fn force_betas_to_gammas(&mut self) -> Result<()> {
        for i in 0..self.q3.len() {
            if !self.q3[i].on_pqi {
                let entry = self.q3[i];
                self.pqi.publish(entry.guid, entry.seq_id, entry.is_persistent)?;
                self.q3[i].on_pqi = true;
                self.ram_index_count = self.ram_index_count.saturating_sub(1);
            }
        }
        for i in 0..self.q2.len() {
            if !self.q2[i].on_pqi {
                let entry = self.q2[i];
                self.pqi.publish(entry.guid, entry.seq_id, entry.is_persistent)?;
                self.q2[i].on_pqi = true;
                self.ram_index_count = self.ram_index_count.saturating_sub(1);
            }
        }
        Ok(())
    }

    pub fn terminate(mut self) -> Result<()> {
        self.force_betas_to_gammas()?;
        self.persistent_store.client_terminate(self.persistent_client);
        self.transient_store.client_terminate(self.transient_client);
        self.pqi.terminate()
    }

    pub fn delete_and_terminate(mut self) -> Result<()> {
        self.purge()?;
        self.persistent_store.delete_client(self.persistent_client);
        self.transient_store.delete_client(self.transient_client);
        self.pqi.delete_and_terminate()
    }
}

fn push_guid(persistent: &mut Vec<Guid>, transient: &mut Vec<Guid>, guid: Guid, is_persistent: bool) {
    if is_persistent {
        persistent.push(guid);
    } else {
        transient.push(guid);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::clock::SystemClock;
    use crate::config::StoreConfig;

    fn open_queue(dir: &std::path::Path, segment_size: u64) -> TieredQueue {
        let persistent = SharedMessageStore::open(StoreConfig::new(dir.join("p")), true, &HashSet::new())
            .expect("open persistent store")
            .store;
        let transient = SharedMessageStore::open(StoreConfig::new(dir.join("t")), false, &HashSet::new())
            .expect("open transient store")
            .store;
        let mut config = QueueConfig::new(dir.join("q"), true);
        config.segment_size = segment_size;
        TieredQueue::open(
            "test",
            true,
            config,
            Arc::new(persistent),
            Arc::new(transient),
            true,
            Box::new(SystemClock),
        )
        .expect("open queue")
    }

    /// A restart that collapses surviving PQI entries into one Δ run leaves
    /// q3 empty; fetching right after must still promote Δ into q3 instead
    /// of reporting the queue empty (this used to trip a `debug_assert!`
    /// that assumed q3-empty implied everything was empty).
    #[test]
    fn fetch_after_restart_promotes_delta_into_q3() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut queue = open_queue(dir.path(), 4);
        queue.set_ram_duration_target(Some(0.0)).expect("pin target");
        for i in 0..10u32 {
            queue
                .publish(Message::new(format!("m-{i}").into_bytes(), b"".to_vec(), true), false)
                .expect("publish");
        }
        queue.terminate().expect("terminate");

        let mut queue = open_queue(dir.path(), 4);
        assert_eq!(queue.len(), 10);
        assert_eq!(queue.status().q3, 0);
        assert_eq!(queue.status().delta, 10);

        for i in 0..10u32 {
            let (msg, _is_delivered, _tag, _remaining) = queue.fetch(false).expect("fetch").expect("some message");
            assert_eq!(&*msg.payload, format!("m-{i}").as_bytes());
        }
        assert!(queue.fetch(false).expect("fetch").is_none());
    }

    /// A deterministic, controllable clock so the rate estimator's smoothed
    /// ingress/egress can be pinned to an exact value instead of depending
    /// on real wall-clock timing.
    #[derive(Clone)]
    struct FakeClock(Arc<std::sync::atomic::AtomicU64>);

    impl FakeClock {
        fn new(start: u64) -> Self {
            Self(Arc::new(std::sync::atomic::AtomicU64::new(start)))
        }
        fn advance(&self, micros: u64) {
            self.0.fetch_add(micros, std::sync::atomic::Ordering::Relaxed);
        }
    }

    impl Clock for FakeClock {
        fn now_micros(&self) -> u64 {
            self.0.load(std::sync::atomic::Ordering::Relaxed)
        }
    }

    fn open_queue_with_clock(dir: &std::path::Path, segment_size: u64, clock: FakeClock) -> TieredQueue {
        let persistent = SharedMessageStore::open(StoreConfig::new(dir.join("p")), true, &HashSet::new())
            .expect("open persistent store")
            .store;
        let transient = SharedMessageStore::open(StoreConfig::new(dir.join("t")), false, &HashSet::new())
            .expect("open transient store")
            .store;
        let mut config = QueueConfig::new(dir.join("q"), true);
        config.segment_size = segment_size;
        TieredQueue::open(
            "test",
            true,
            config,
            Arc::new(persistent),
            Arc::new(transient),
            true,
            Box::new(clock),
        )
        .expect("open queue")
    }

    /// A moderate RAM-duration target (neither zero nor infinite) lets some
    /// β entries sit in RAM without a PQI record (`on_pqi == false`) at
    /// shutdown time, while q4 still holds pure-α entries that can never be
    /// recovered by design. Terminating must force every remaining β to γ so
    /// the β/γ portion survives intact; only the pure-α portion is expected
    /// to be lost.
    #[test]
    fn clean_terminate_preserves_ram_only_betas() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = FakeClock::new(0);
        let mut queue = open_queue_with_clock(dir.path(), 64, clock.clone());

        for i in 0..20u32 {
            queue
                .publish(Message::new(format!("m-{i}").into_bytes(), b"".to_vec(), true), false)
                .expect("publish");
        }
        // All 20 publishes landed in q4 (target is still unset, so every
        // message takes the pure-α path). Advance the clock and fold that
        // ingress into the rate estimator, then pin a target of 10.
        clock.advance(1_000_000);
        queue.ram_duration();
        queue.set_ram_duration_target(Some(0.5)).expect("pin target");
        assert_eq!(queue.status().q4, 10);
        assert_eq!(queue.status().q3, 10);

        queue.terminate().expect("terminate");

        let mut queue = open_queue_with_clock(dir.path(), 64, FakeClock::new(0));
        // The 10 pure-α messages that stayed in q4 never touched PQI and
        // cannot be recovered; the 10 that were demoted into q3 must all
        // survive, regardless of how many were still β (un-PQI'd) at the
        // moment of termination.
        assert_eq!(queue.len(), 10);
        for i in 10..20u32 {
            let (msg, _is_delivered, _tag, _remaining) = queue.fetch(false).expect("fetch").expect("some message");
            assert_eq!(&*msg.payload, format!("m-{i}").as_bytes());
        }
        assert!(queue.fetch(false).expect("fetch").is_none());
    }
}

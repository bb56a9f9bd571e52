//! Per-Queue Index (C2, §4.2): a journal plus segmented index tracking
//! which seq-ids have been published, delivered, and acked for one queue.

mod journal;
mod segment;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::message::Guid;
use crate::{Error, Result};

use journal::{Journal, JournalRecord};
pub use segment::SeqState;

/// Small persisted summary written at clean `terminate`, letting a future
/// `open` skip straight to a known low/next seq-id instead of re-deriving
/// them from a full segment walk — purely an optimization, correctness
/// never depends on it being present.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PqiTerms {
    pub low_seq: u64,
    pub next_seq: u64,
}

const TERMS_FILE: &str = "pqi_terms.json";

fn terms_path(dir: &Path) -> PathBuf {
    dir.join(TERMS_FILE)
}

pub struct PerQueueIndex {
    dir: PathBuf,
    segment_size: u64,
    journal: Journal,
    segments: BTreeMap<u64, BTreeMap<u64, SeqState>>,
    dirty_segments: HashSet<u64>,
    next_seq: u64,
}

pub struct OpenOutcome {
    pub pqi: PerQueueIndex,
    pub recovered_count: u64,
    pub terms: Option<PqiTerms>,
}

impl PerQueueIndex {
    /// Opens (or creates) the index directory for one queue.
    ///
    /// `msg_store_recovered` mirrors whether the backing SMS instances
    /// themselves came back up clean; when false, a recovery walk calls
    /// `contains_fn(guid)` for every still-outstanding publish and treats a
    /// miss as an implicit ack (§4.2 `init`, §8 "Recovery filters transients").
    pub fn init(
        dir: impl Into<PathBuf>,
        segment_size: u64,
        msg_store_recovered: bool,
        mut contains_fn: impl FnMut(&Guid) -> bool,
    ) -> Result<OpenOutcome> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut segments = BTreeMap::new();
        let mut next_seq = 0u64;
        for segment_id in segment::list_segment_ids(&dir)? {
            let entries = segment::load_segment(&dir, segment_id, segment_size)?;
            if let Some((&local_idx, _)) = entries.iter().next_back() {
                next_seq = next_seq.max(segment_id * segment_size + local_idx + 1);
            }
            if !entries.is_empty() {
                segments.insert(segment_id, entries);
            }
        }

        let terms = std::fs::read(terms_path(&dir))
            .ok()
            .and_then(|bytes| serde_json::from_slice::<PqiTerms>(&bytes).ok());
        if let Some(terms) = &terms {
            next_seq = next_seq.max(terms.next_seq);
        }

        let mut journal = Journal::open(&dir)?;
        let mut dirty_segments = HashSet::new();
        for record in Journal::read_all(&dir)? {
            apply_record(&mut segments, segment_size, &mut next_seq, &mut dirty_segments, record);
        }

        if !msg_store_recovered {
            let mut to_ack = Vec::new();
            for (segment_id, local_map) in segments.iter() {
                for (local_idx, state) in local_map.iter() {
                    if !contains_fn(&state.guid) {
                        to_ack.push(segment_id * segment_size + local_idx);
                    }
                }
            }
            if !to_ack.is_empty() {
                log::warn!(
                    "pqi recovery walk found {} publishes whose payload is gone, acking as transient stragglers",
                    to_ack.len()
                );
            }
            for seq_id in to_ack {
                let segment_id = seq_id / segment_size;
                let local_idx = seq_id % segment_size;
                if let Some(local_map) = segments.get_mut(&segment_id) {
                    local_map.remove(&local_idx);
                }
                dirty_segments.insert(segment_id);
            }
        }

        let recovered_count = segments.values().map(|m| m.len() as u64).sum();

        flush_dirty(&dir, segment_size, &mut segments, &mut dirty_segments)?;
        journal.reset()?;

        Ok(OpenOutcome {
            pqi: PerQueueIndex {
                dir,
                segment_size,
                journal,
                segments,
                dirty_segments,
                next_seq,
            },
            recovered_count,
            terms,
        })
    }

    /// Lowest unacked seq-id (or `next_seq` if the index is empty) and the
    /// next seq-id to be assigned on publish.
    pub fn bounds(&self) -> (u64, u64) {
        let low_seq = self
            .segments
            .iter()
            .next()
            .and_then(|(segment_id, local_map)| {
                local_map
                    .keys()
                    .next()
                    .map(|local_idx| segment_id * self.segment_size + local_idx)
            })
            .unwrap_or(self.next_seq);
        (low_seq, self.next_seq)
    }

    pub fn next_segment_boundary(&self, seq_id: u64) -> u64 {
        (seq_id / self.segment_size + 1) * self.segment_size
    }

    pub fn publish(&mut self, guid: Guid, seq_id: u64, is_persistent: bool) -> Result<()> {
        self.journal.append(&JournalRecord::Publish {
            seq_id,
            guid,
            is_persistent,
        })?;
        apply_record(
            &mut self.segments,
            self.segment_size,
            &mut self.next_seq,
            &mut self.dirty_segments,
            JournalRecord::Publish {
                seq_id,
                guid,
                is_persistent,
            },
        );
        Ok(())
    }

    pub fn deliver(&mut self, seq_id: u64) -> Result<()> {
        self.journal.append(&JournalRecord::Deliver { seq_id })?;
        apply_record(
            &mut self.segments,
            self.segment_size,
            &mut self.next_seq,
            &mut self.dirty_segments,
            JournalRecord::Deliver { seq_id },
        );
        Ok(())
    }

    /// Batch-acks `seq_ids`; a drained segment is deleted immediately rather
    /// than waiting for the next `flush` (§4.2 "once all seq-ids inside have
    /// a matching ACK, the segment file is deleted").
    pub fn ack(&mut self, seq_ids: &[u64]) -> Result<()> {
        for &seq_id in seq_ids {
            self.journal.append(&JournalRecord::Ack { seq_id })?;
            let segment_id = seq_id / self.segment_size;
            let local_idx = seq_id % self.segment_size;
            if let Some(local_map) = self.segments.get_mut(&segment_id) {
                local_map.remove(&local_idx);
                if local_map.is_empty() {
                    self.segments.remove(&segment_id);
                    self.dirty_segments.remove(&segment_id);
                    segment::delete_segment(&self.dir, segment_id)?;
                } else {
                    self.dirty_segments.insert(segment_id);
                }
            }
        }
        Ok(())
    }

    /// Returns entries in `[start, end)`, one segment at a time, plus the
    /// start of the next call needed to keep reading (`None` once `end` has
    /// been reached).
    pub fn read(&self, start: u64, end: u64) -> (Vec<(u64, Guid, bool, bool)>, Option<u64>) {
        if start >= end {
            return (Vec::new(), None);
        }
        let segment_id = start / self.segment_size;
        let boundary = (segment_id + 1) * self.segment_size;
        let window_end = end.min(boundary);

        let mut entries = Vec::new();
        if let Some(local_map) = self.segments.get(&segment_id) {
            for (local_idx, state) in local_map.range(start % self.segment_size..window_end - segment_id * self.segment_size) {
                let seq_id = segment_id * self.segment_size + local_idx;
                entries.push((seq_id, state.guid, state.is_persistent, state.delivered));
            }
        }
        let next_start = if boundary < end { Some(boundary) } else { None };
        (entries, next_start)
    }

    /// Persists all segments touched since the last flush, then truncates
    /// the journal — everything it held is now reflected on disk.
    pub fn flush(&mut self) -> Result<()> {
        flush_dirty(&self.dir, self.segment_size, &mut self.segments, &mut self.dirty_segments)?;
        self.journal.reset()?;
        Ok(())
    }

    /// Forces the journal durable. Coalesces naturally with concurrent
    /// callers since it always syncs everything appended so far.
    pub fn sync(&self, _seq_ids: &[u64]) -> Result<()> {
        self.journal.sync()
    }

    pub fn terminate(mut self) -> Result<()> {
        self.flush()?;
        let (low_seq, next_seq) = self.bounds();
        let terms = PqiTerms { low_seq, next_seq };
        let bytes = serde_json::to_vec(&terms)
            .map_err(|_| Error::CorruptMetadata("failed to encode pqi terms"))?;
        std::fs::write(terms_path(&self.dir), bytes)?;
        Ok(())
    }

    pub fn delete_and_terminate(self) -> Result<()> {
        std::fs::remove_dir_all(&self.dir).or_else(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Ok(())
            } else {
                Err(err)
            }
        })?;
        Ok(())
    }
}

fn apply_record(
    segments: &mut BTreeMap<u64, BTreeMap<u64, SeqState>>,
    segment_size: u64,
    next_seq: &mut u64,
    dirty_segments: &mut HashSet<u64>,
    record: JournalRecord,
) {
    match record {
        JournalRecord::Publish {
            seq_id,
            guid,
            is_persistent,
        } => {
            let segment_id = seq_id / segment_size;
            let local_idx = seq_id % segment_size;
            segments.entry(segment_id).or_default().insert(
                local_idx,
                SeqState {
                    guid,
                    is_persistent,
                    delivered: false,
                },
            );
            dirty_segments.insert(segment_id);
            *next_seq = (*next_seq).max(seq_id + 1);
        }
        JournalRecord::Deliver { seq_id } => {
            let segment_id = seq_id / segment_size;
            let local_idx = seq_id % segment_size;
            if let Some(state) = segments.get_mut(&segment_id).and_then(|m| m.get_mut(&local_idx)) {
                state.delivered = true;
                dirty_segments.insert(segment_id);
            }
        }
        JournalRecord::Ack { seq_id } => {
            let segment_id = seq_id / segment_size;
            let local_idx = seq_id % segment_size;
            if let Some(local_map) = segments.get_mut(&segment_id) {
                local_map.remove(&local_idx);
                dirty_segments.insert(segment_id);
            }
        }
    }
}

fn flush_dirty(
    dir: &Path,
    segment_size: u64,
    segments: &mut BTreeMap<u64, BTreeMap<u64, SeqState>>,
    dirty_segments: &mut HashSet<u64>,
) -> Result<()> {
    for segment_id in dirty_segments.drain() {
        match segments.get(&segment_id) {
            Some(local_map) if !local_map.is_empty() => {
                segment::persist_segment(dir, segment_id, segment_size, local_map)?;
            }
            _ => {
                segments.remove(&segment_id);
                segment::delete_segment(dir, segment_id)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(dir: &Path, segment_size: u64) -> OpenOutcome {
        PerQueueIndex::init(dir, segment_size, true, |_| true).expect("init")
    }

    #[test]
    fn publish_and_read_round_trip() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut outcome = open(tmp.path(), 16);
        for i in 0..5u64 {
            outcome
                .pqi
                .publish(Guid([i as u8; 16]), i, true)
                .expect("publish");
        }
        let (entries, next_start) = outcome.pqi.read(0, 5);
        assert_eq!(entries.len(), 5);
        assert_eq!(next_start, None);
        assert_eq!(outcome.pqi.bounds(), (0, 5));
    }

    #[test]
    fn ack_drains_and_deletes_segment() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut outcome = open(tmp.path(), 4);
        for i in 0..4u64 {
            outcome.pqi.publish(Guid([i as u8; 16]), i, true).expect("publish");
        }
        outcome.pqi.flush().expect("flush");
        assert!(segment::segment_path(tmp.path(), 0).exists());
        outcome.pqi.ack(&[0, 1, 2, 3]).expect("ack");
        assert!(!segment::segment_path(tmp.path(), 0).exists());
        assert_eq!(outcome.pqi.bounds(), (4, 4));
    }

    #[test]
    fn recovery_walk_drops_missing_guids() {
        let tmp = tempfile::tempdir().expect("tempdir");
        {
            let mut outcome = open(tmp.path(), 16);
            outcome.pqi.publish(Guid([1; 16]), 0, false).expect("publish");
            outcome.pqi.publish(Guid([2; 16]), 1, true).expect("publish");
            outcome.pqi.terminate().expect("terminate");
        }
        let present = std::collections::HashSet::from([Guid([2; 16])]);
        let outcome =
            PerQueueIndex::init(tmp.path(), 16, false, |guid| present.contains(guid)).expect("init");
        assert_eq!(outcome.recovered_count, 1);
        let (entries, _) = outcome.pqi.read(0, 2);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1, Guid([2; 16]));
    }
}

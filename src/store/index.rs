//! The authoritative guid → location map (§4.1), plus the persisted snapshot
//! format used to skip a full segment scan on clean shutdown.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::message::Guid;
use crate::store::client::ClientRef;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug)]
pub struct Location {
    pub segment: u64,
    pub offset: u64,
    pub len: u32,
    pub refcount: u32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SegmentSummary {
    pub total_bytes: u64,
    pub live_bytes: u64,
}

impl SegmentSummary {
    pub fn live_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            1.0
        } else {
            self.live_bytes as f64 / self.total_bytes as f64
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    guid: [u8; 16],
    segment: u64,
    offset: u64,
    len: u32,
    refcount: u32,
}

#[derive(Serialize, Deserialize)]
struct SnapshotSummary {
    segment: u64,
    total_bytes: u64,
    live_bytes: u64,
}

#[derive(Serialize, Deserialize)]
pub struct Snapshot {
    entries: Vec<SnapshotEntry>,
    summaries: Vec<SnapshotSummary>,
    known_refs: Vec<[u8; 16]>,
}

const SNAPSHOT_FILE: &str = "index.snapshot.json";
const REFS_FILE: &str = "client_refs.json";

pub fn snapshot_path(dir: &Path) -> std::path::PathBuf {
    dir.join(SNAPSHOT_FILE)
}

pub fn refs_path(dir: &Path) -> std::path::PathBuf {
    dir.join(REFS_FILE)
}

pub fn persist(
    dir: &Path,
    index: &HashMap<Guid, Location>,
    summaries: &HashMap<u64, SegmentSummary>,
    known_refs: &HashSet<ClientRef>,
) -> Result<()> {
    let snapshot = Snapshot {
        entries: index
            .iter()
            .map(|(guid, loc)| SnapshotEntry {
                guid: guid.0,
                segment: loc.segment,
                offset: loc.offset,
                len: loc.len,
                refcount: loc.refcount,
            })
            .collect(),
        summaries: summaries
            .iter()
            .map(|(segment, summary)| SnapshotSummary {
                segment: *segment,
                total_bytes: summary.total_bytes,
                live_bytes: summary.live_bytes,
            })
            .collect(),
        known_refs: known_refs.iter().map(|r| r.0).collect(),
    };
    let bytes = serde_json::to_vec(&snapshot)
        .map_err(|_| Error::CorruptMetadata("failed to encode sms snapshot"))?;
    let tmp = snapshot_path(dir).with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(tmp, snapshot_path(dir))?;
    Ok(())
}

/// Attempts to load a persisted snapshot. Returns `Ok(None)` (not an error)
/// when no snapshot exists yet, `Err` only on a malformed file.
pub fn load(
    dir: &Path,
) -> Result<Option<(HashMap<Guid, Location>, HashMap<u64, SegmentSummary>, HashSet<ClientRef>)>> {
    let path = snapshot_path(dir);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let snapshot: Snapshot = match serde_json::from_slice(&bytes) {
        Ok(snapshot) => snapshot,
        Err(_) => return Ok(None),
    };
    let mut index = HashMap::new();
    for entry in snapshot.entries {
        index.insert(
            Guid(entry.guid),
            Location {
                segment: entry.segment,
                offset: entry.offset,
                len: entry.len,
                refcount: entry.refcount,
            },
        );
    }
    let mut summaries = HashMap::new();
    for summary in snapshot.summaries {
        summaries.insert(
            summary.segment,
            SegmentSummary {
                total_bytes: summary.total_bytes,
                live_bytes: summary.live_bytes,
            },
        );
    }
    let known_refs = snapshot.known_refs.into_iter().map(ClientRef).collect();
    Ok(Some((index, summaries, known_refs)))
}

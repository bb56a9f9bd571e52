//! On-disk segment files for the per-queue index (§4.2): one file per
//! `S`-sized range of seq-ids, holding a fixed-width slot per seq-id. A
//! segment is deleted outright once every slot inside it is acked.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::message::Guid;
use crate::{Error, Result};

/// guid(16) + flags(1) + checksum(4).
const SLOT_LEN: usize = 16 + 1 + 4;

const FLAG_PRESENT: u8 = 0b001;
const FLAG_PERSISTENT: u8 = 0b010;
const FLAG_DELIVERED: u8 = 0b100;

#[derive(Clone, Copy, Debug)]
pub struct SeqState {
    pub guid: Guid,
    pub is_persistent: bool,
    pub delivered: bool,
}

pub fn segment_path(dir: &Path, segment_id: u64) -> PathBuf {
    dir.join(format!("{segment_id}.pqi"))
}

/// Writes the full fixed-width segment file for `segment_id`, covering
/// local slots `0..segment_size`. Acked (absent) seq-ids are written as all
/// zero with `FLAG_PRESENT` unset.
pub fn persist_segment(
    dir: &Path,
    segment_id: u64,
    segment_size: u64,
    entries: &BTreeMap<u64, SeqState>,
) -> Result<()> {
    let mut buf = vec![0u8; segment_size as usize * SLOT_LEN];
    for (local_idx, state) in entries {
        let start = *local_idx as usize * SLOT_LEN;
        let slot = &mut buf[start..start + SLOT_LEN];
        slot[0..16].copy_from_slice(state.guid.as_bytes());
        let mut flags = FLAG_PRESENT;
        if state.is_persistent {
            flags |= FLAG_PERSISTENT;
        }
        if state.delivered {
            flags |= FLAG_DELIVERED;
        }
        slot[16] = flags;
        let checksum = crc32fast::hash(&slot[0..17]);
        slot[17..21].copy_from_slice(&checksum.to_le_bytes());
    }
    let tmp = segment_path(dir, segment_id).with_extension("pqi.tmp");
    std::fs::write(&tmp, &buf)?;
    std::fs::rename(&tmp, segment_path(dir, segment_id))?;
    Ok(())
}

/// Loads a segment file back into its sparse in-memory map, skipping slots
/// that were never published or have since been acked.
pub fn load_segment(dir: &Path, segment_id: u64, segment_size: u64) -> Result<BTreeMap<u64, SeqState>> {
    let path = segment_path(dir, segment_id);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(err.into()),
    };
    if bytes.len() != segment_size as usize * SLOT_LEN {
        return Err(Error::CorruptMetadata("pqi segment file has unexpected length"));
    }
    let mut out = BTreeMap::new();
    for local_idx in 0..segment_size {
        let start = local_idx as usize * SLOT_LEN;
        let slot = &bytes[start..start + SLOT_LEN];
        let checksum = u32::from_le_bytes(slot[17..21].try_into().expect("4 bytes"));
        if crc32fast::hash(&slot[0..17]) != checksum {
            continue;
        }
        let flags = slot[16];
        if flags & FLAG_PRESENT == 0 {
            continue;
        }
        let mut guid_bytes = [0u8; 16];
        guid_bytes.copy_from_slice(&slot[0..16]);
        out.insert(
            local_idx,
            SeqState {
                guid: Guid(guid_bytes),
                is_persistent: flags & FLAG_PERSISTENT != 0,
                delivered: flags & FLAG_DELIVERED != 0,
            },
        );
    }
    Ok(out)
}

pub fn delete_segment(dir: &Path, segment_id: u64) -> Result<()> {
    let path = segment_path(dir, segment_id);
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Lists segment ids present in `dir`, ascending.
pub fn list_segment_ids(dir: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    if !dir.exists() {
        return Ok(ids);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("pqi") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if let Ok(id) = stem.parse::<u64>() {
                ids.push(id);
            }
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

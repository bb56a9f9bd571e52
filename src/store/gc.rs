//! Compacting GC (§4.1): when a segment's live-byte ratio drops below a
//! threshold it is rewritten without its dead records and the old file is
//! unlinked. Only one compaction runs at a time per store instance.

use std::collections::HashMap;
use std::path::Path;

use crate::message::Guid;
use crate::store::index::{Location, SegmentSummary};
use crate::store::segment::{scan_segment_file, segment_path, SegmentWriter, RECORD_OVERHEAD};
use crate::Result;

/// Rewrites `segment_id` keeping only guids with `refcount > 0`, returning the
/// new locations for every guid that survived. The caller is responsible for
/// updating the shared index and unlinking the old file.
pub fn compact_segment(
    dir: &Path,
    segment_id: u64,
    index: &HashMap<Guid, Location>,
    capacity: u64,
) -> Result<(HashMap<Guid, Location>, SegmentSummary)> {
    let records = scan_segment_file(dir, segment_id)?;
    let tmp_path = segment_path(dir, segment_id).with_extension("rdq.compact");
    let mut writer = SegmentWriter::create_at(&tmp_path, segment_id, capacity)?;

    let mut new_locations = HashMap::new();
    let mut summary = SegmentSummary::default();
    for record in records {
        let Some(location) = index.get(&record.guid) else {
            continue;
        };
        if location.segment != segment_id || location.refcount == 0 {
            continue;
        }
        let payload = crate::store::segment::read_payload_at(
            dir,
            segment_id,
            record.offset,
            record.len,
        )?;
        let offset = writer
            .append(&record.guid, &payload)?
            .expect("compacted segment must not exceed original capacity");
        let record_size = RECORD_OVERHEAD + payload.len() as u64;
        summary.total_bytes += record_size;
        summary.live_bytes += record_size;
        new_locations.insert(
            record.guid,
            Location {
                segment: segment_id,
                offset,
                len: payload.len() as u32,
                refcount: location.refcount,
            },
        );
    }
    writer.sync()?;
    drop(writer);

    std::fs::rename(&tmp_path, segment_path(dir, segment_id))?;
    Ok((new_locations, summary))
}

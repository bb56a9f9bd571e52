//! Shared Message Store (C1, §4.1): a content-addressed, ref-counted blob
//! store for message payloads. Two instances exist process-wide — one
//! `persistent` (fsync-backed, survives restart) and one `transient`
//! (cleared on start) — sharing this same implementation.

pub mod cache;
pub mod client;
pub mod gc;
pub mod index;
pub mod segment;

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::config::StoreConfig;
use crate::message::Guid;
use crate::{Error, Result};

pub use client::ClientRef;
use index::{Location, SegmentSummary};

struct Inner {
    current: segment::SegmentWriter,
    index: HashMap<Guid, Location>,
    file_summary: HashMap<u64, SegmentSummary>,
    global_cache: cache::BoundedCache,
    client_caches: HashMap<ClientRef, cache::BoundedCache>,
    known_refs: HashSet<ClientRef>,
    live_clients: HashSet<ClientRef>,
    gc_in_flight: bool,
}

pub struct SharedMessageStore {
    config: StoreConfig,
    persistent: bool,
    inner: Mutex<Inner>,
}

/// Outcome of opening a store: whether the prior shutdown was clean.
pub struct OpenOutcome {
    pub store: SharedMessageStore,
    pub clean: bool,
}

impl SharedMessageStore {
    /// Opens (or creates) a store rooted at `config.dir`.
    ///
    /// `persistent` stores attempt to reuse their persisted index when the
    /// shutdown was clean (§4.1 Recovery protocol); `expected_refs` is the
    /// set of client refs the queues currently claim to hold, used to decide
    /// cleanliness. Transient stores always start empty.
    pub fn open(
        config: StoreConfig,
        persistent: bool,
        expected_refs: &HashSet<ClientRef>,
    ) -> Result<OpenOutcome> {
        if !persistent {
            // Transient instances start empty every process lifetime; any
            // segments left over from a prior run are discarded rather than
            // rescanned.
            let _ = std::fs::remove_dir_all(&config.dir);
        }
        std::fs::create_dir_all(&config.dir)?;

        let mut index = HashMap::new();
        let mut file_summary = HashMap::new();
        let mut known_refs = HashSet::new();
        let mut clean = false;

        if persistent {
            if let Some((loaded_index, loaded_summary, loaded_refs)) = index::load(&config.dir)? {
                if loaded_refs == *expected_refs {
                    index = loaded_index;
                    file_summary = loaded_summary;
                    known_refs = loaded_refs;
                    clean = true;
                }
            }
        }

        if !clean {
            if persistent {
                log::warn!(
                    "sms store at {:?} did not shut down cleanly, rescanning segments",
                    config.dir
                );
            }
            let (scanned_index, scanned_summary) = full_scan(&config.dir)?;
            index = scanned_index;
            file_summary = scanned_summary;
            known_refs = expected_refs.clone();
        }

        let segment_ids = segment::list_segment_ids(&config.dir)?;
        let current_id = segment_ids.last().copied().unwrap_or(0);
        let current = if segment::segment_path(&config.dir, current_id).exists() {
            let write_offset = current_segment_write_offset(&config.dir, current_id);
            segment::SegmentWriter::open_for_append(
                &config.dir,
                current_id,
                write_offset,
                config.segment_size,
            )?
        } else {
            segment::SegmentWriter::create(&config.dir, current_id, config.segment_size)?
        };

        let inner = Inner {
            current,
            index,
            file_summary,
            global_cache: cache::BoundedCache::new(config.read_cache_capacity),
            client_caches: HashMap::new(),
            known_refs,
            live_clients: HashSet::new(),
            gc_in_flight: false,
        };

        Ok(OpenOutcome {
            store: Self {
                config,
                persistent,
                inner: Mutex::new(inner),
            },
            clean,
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn client_init(&self, client: ClientRef) {
        let mut inner = self.inner.lock().expect("sms lock poisoned");
        inner.known_refs.insert(client);
        inner.live_clients.insert(client);
        inner
            .client_caches
            .entry(client)
            .or_insert_with(|| cache::BoundedCache::new(self.config.client_cache_capacity));
    }

    pub fn client_terminate(&self, client: ClientRef) {
        let mut inner = self.inner.lock().expect("sms lock poisoned");
        inner.live_clients.remove(&client);
        inner.client_caches.remove(&client);
    }

    pub fn delete_client(&self, client: ClientRef) {
        let mut inner = self.inner.lock().expect("sms lock poisoned");
        inner.live_clients.remove(&client);
        inner.known_refs.remove(&client);
        inner.client_caches.remove(&client);
    }

    /// Idempotent by guid: a duplicate write only bumps the refcount.
    pub fn write(&self, guid: Guid, bytes: &[u8], client: ClientRef) -> Result<()> {
        let mut inner = self.inner.lock().expect("sms lock poisoned");
        if let Some(location) = inner.index.get_mut(&guid) {
            location.refcount += 1;
            let segment = location.segment;
            if let Some(summary) = inner.file_summary.get_mut(&segment) {
                summary.live_bytes += segment::RECORD_OVERHEAD + location.len as u64;
            }
            return Ok(());
        }

        let location = append_with_retry(&mut inner, &self.config, &guid, bytes)?;
        let record_size = segment::RECORD_OVERHEAD + bytes.len() as u64;
        inner
            .file_summary
            .entry(location.segment)
            .or_default()
            .total_bytes += record_size;
        inner
            .file_summary
            .entry(location.segment)
            .or_default()
            .live_bytes += record_size;
        inner.index.insert(guid, location);

        let arc: std::sync::Arc<[u8]> = bytes.into();
        inner.global_cache.insert(guid, arc.clone());
        if let Some(cache) = inner.client_caches.get_mut(&client) {
            cache.insert(guid, arc);
        }
        Ok(())
    }

    pub fn read(&self, guid: &Guid, client: ClientRef) -> Result<std::sync::Arc<[u8]>> {
        let mut inner = self.inner.lock().expect("sms lock poisoned");

        if let Some(cache) = inner.client_caches.get(&client) {
            if let Some(bytes) = cache.get(guid) {
                return Ok(bytes);
            }
        }
        if let Some(bytes) = inner.global_cache.get(guid) {
            if let Some(cache) = inner.client_caches.get_mut(&client) {
                cache.insert(*guid, bytes.clone());
            }
            return Ok(bytes);
        }

        let location = *inner
            .index
            .get(guid)
            .ok_or(Error::Corrupt("sms read of a guid not present in the index"))?;
        let bytes = if location.segment == inner.current.id {
            inner.current.read_at(location.offset, location.len)?
        } else {
            segment::read_payload_at(&self.config.dir, location.segment, location.offset, location.len)?
        };

        let arc: std::sync::Arc<[u8]> = bytes.into();
        inner.global_cache.insert(*guid, arc.clone());
        if let Some(cache) = inner.client_caches.get_mut(&client) {
            cache.insert(*guid, arc.clone());
        }
        Ok(arc)
    }

    pub fn contains(&self, guid: &Guid) -> bool {
        let inner = self.inner.lock().expect("sms lock poisoned");
        inner.index.contains_key(guid)
    }

    /// Decrements refcounts; idempotent on an empty or already-absent guid
    /// (§8 "Ack idempotence"). Any segment that drops below the live-ratio
    /// threshold is compacted inline before returning.
    pub fn remove(&self, guids: &[Guid]) -> Result<()> {
        let mut inner = self.inner.lock().expect("sms lock poisoned");
        let mut touched_segments = HashSet::new();
        for guid in guids {
            let Some(location) = inner.index.get_mut(guid) else {
                continue;
            };
            if location.refcount == 0 {
                continue;
            }
            location.refcount -= 1;
            if location.refcount == 0 {
                let segment = location.segment;
                let len = location.len;
                if let Some(summary) = inner.file_summary.get_mut(&segment) {
                    summary.live_bytes = summary
                        .live_bytes
                        .saturating_sub(segment::RECORD_OVERHEAD + len as u64);
                }
                touched_segments.insert(segment);
                inner.global_cache.remove(guid);
                for cache in inner.client_caches.values_mut() {
                    cache.remove(guid);
                }
            }
        }
        for segment in touched_segments {
            self.maybe_gc_locked(&mut inner, segment)?;
        }
        Ok(())
    }

    /// Used by a queue's PQI recovery walk after an unclean shutdown, to
    /// reconstruct refcounts the store itself cannot know (§4.1 Recovery
    /// protocol: "refcounts are reconstructed from the union of all queue
    /// PQIs that declared themselves durable").
    pub fn reconstruct_ref(&self, guid: &Guid) {
        let mut inner = self.inner.lock().expect("sms lock poisoned");
        if let Some(location) = inner.index.get_mut(guid) {
            location.refcount += 1;
        }
    }

    /// Forces the named guids durable. Callback fires inline once the
    /// current segment has been fsynced — this crate's engine is expressed
    /// as synchronous calls rather than an async actor mailbox, so there is
    /// no deferred callback queue to coalesce; successive `sync` calls are
    /// naturally coalesced because each one flushes everything written so
    /// far, matching §4.1's "syncs... may share its fsync".
    pub fn sync(&self, _guids: &[Guid], callback: impl FnOnce(Result<()>)) {
        if !self.persistent {
            callback(Ok(()));
            return;
        }
        let inner = self.inner.lock().expect("sms lock poisoned");
        callback(inner.current.sync());
    }

    pub fn close(&self) -> Result<()> {
        let inner = self.inner.lock().expect("sms lock poisoned");
        inner.current.sync()?;
        if self.persistent {
            index::persist(&self.config.dir, &inner.index, &inner.file_summary, &inner.known_refs)?;
        }
        Ok(())
    }

    fn maybe_gc_locked(&self, inner: &mut Inner, segment: u64) -> Result<()> {
        if inner.gc_in_flight || segment == inner.current.id {
            return Ok(());
        }
        let ratio = inner
            .file_summary
            .get(&segment)
            .map(|s| s.live_ratio())
            .unwrap_or(1.0);
        if ratio >= self.config.gc_live_ratio_threshold {
            return Ok(());
        }
        inner.gc_in_flight = true;
        let result = gc::compact_segment(&self.config.dir, segment, &inner.index, self.config.segment_size);
        inner.gc_in_flight = false;
        let (new_locations, summary) = result?;
        for (guid, location) in new_locations {
            if let Some(existing) = inner.index.get_mut(&guid) {
                existing.offset = location.offset;
                existing.len = location.len;
            }
        }
        inner.file_summary.insert(segment, summary);
        Ok(())
    }
}

fn append_with_retry(
    inner: &mut Inner,
    config: &StoreConfig,
    guid: &Guid,
    bytes: &[u8],
) -> Result<Location> {
    for attempt in 0..2 {
        match inner.current.append(guid, bytes) {
            Ok(Some(offset)) => {
                return Ok(Location {
                    segment: inner.current.id,
                    offset,
                    len: bytes.len() as u32,
                    refcount: 1,
                })
            }
            Ok(None) => {
                inner.current.sync()?;
                let next_id = inner.current.id + 1;
                inner.current = segment::SegmentWriter::create(&config.dir, next_id, config.segment_size)?;
            }
            Err(err) if attempt == 0 => {
                log::warn!("sms write failed, retrying once: {err}");
                continue;
            }
            Err(err) => return Err(err),
        }
    }
    // Second attempt after a roll.
    let offset = inner
        .current
        .append(guid, bytes)?
        .ok_or(Error::PayloadTooLarge)?;
    Ok(Location {
        segment: inner.current.id,
        offset,
        len: bytes.len() as u32,
        refcount: 1,
    })
}

fn full_scan(dir: &std::path::Path) -> Result<(HashMap<Guid, Location>, HashMap<u64, SegmentSummary>)> {
    let mut index = HashMap::new();
    let mut summary = HashMap::new();
    for id in segment::list_segment_ids(dir)? {
        let records = segment::scan_segment_file(dir, id)?;
        let mut seg_summary = SegmentSummary::default();
        for record in records {
            let record_size = segment::RECORD_OVERHEAD + record.len as u64;
            seg_summary.total_bytes += record_size;
            seg_summary.live_bytes += record_size;
            index.entry(record.guid).or_insert(Location {
                segment: id,
                offset: record.offset,
                len: record.len,
                refcount: 0,
            });
        }
        summary.insert(id, seg_summary);
    }
    Ok((index, summary))
}

fn current_segment_write_offset(dir: &std::path::Path, id: u64) -> u64 {
    segment::scan_segment_file(dir, id)
        .map(|records| {
            records
                .last()
                .map(|r| r.offset + segment::RECORD_OVERHEAD + r.len as u64)
                .unwrap_or(0)
        })
        .unwrap_or(0)
}

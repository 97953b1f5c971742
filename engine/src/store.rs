//! Link index store - the in-memory state container.
//!
//! The store holds a project's alignment links keyed by id, plus two derived
//! indices mapping sanitized token references to the link ids that touch
//! them on each side. Rendering resolves "what is this token linked to" in
//! O(bucket) through [`LinkStore::find_by_reference`].
//!
//! Every mutation bumps a store-local monotonic revision counter (the
//! coarse cache-invalidation key for the sync layer) and appends a journal
//! entry unless the caller suppresses journaling.

use crate::error::{Error, Result};
use crate::journal::Journal;
use crate::link::{AlignmentLink, Side};
use crate::{LinkId, ProjectId, Revision, Timestamp};
use std::collections::{BTreeSet, HashMap};

/// Default number of links per bulk chunk.
pub const DEFAULT_BULK_CHUNK_SIZE: usize = 2000;

/// Options controlling a save or bulk operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveOptions {
    /// Skip journaling (initial load of data the server already has)
    pub suppress_journal: bool,
    /// Run a bulk operation even while another is in flight
    pub forced: bool,
}

/// Receiver for bulk operation progress.
///
/// `progress` fires after every chunk; `is_canceled` is polled at chunk
/// boundaries only, so cancellation never interrupts a chunk mid-way.
pub trait BulkProgress {
    fn progress(&mut self, done: usize, total: usize);
    fn is_canceled(&self) -> bool {
        false
    }
}

/// Progress receiver that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl BulkProgress for NoProgress {
    fn progress(&mut self, _done: usize, _total: usize) {}
}

/// Summary of a completed (or canceled) bulk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkOutcome {
    /// Links actually written or removed
    pub affected: usize,
    /// Chunks processed
    pub chunks: usize,
    /// Whether the operation stopped early at a chunk boundary
    pub canceled: bool,
}

/// The per-project link store.
#[derive(Debug)]
pub struct LinkStore {
    project_id: ProjectId,
    links: HashMap<LinkId, AlignmentLink>,
    sources_index: HashMap<String, BTreeSet<LinkId>>,
    targets_index: HashMap<String, BTreeSet<LinkId>>,
    revision: Revision,
    busy: u32,
    bulk_chunk_size: usize,
    journal: Journal,
}

impl LinkStore {
    /// Create a store for a project with the given journal.
    pub fn new(project_id: impl Into<ProjectId>, journal: Journal) -> Self {
        Self {
            project_id: project_id.into(),
            links: HashMap::new(),
            sources_index: HashMap::new(),
            targets_index: HashMap::new(),
            revision: 0,
            busy: 0,
            bulk_chunk_size: DEFAULT_BULK_CHUNK_SIZE,
            journal,
        }
    }

    /// Create a store with an in-memory journal.
    pub fn in_memory(project_id: impl Into<ProjectId>) -> Self {
        Self::new(project_id, Journal::in_memory())
    }

    /// Override the bulk chunk size.
    pub fn with_bulk_chunk_size(mut self, size: usize) -> Self {
        self.bulk_chunk_size = size.max(1);
        self
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// Current revision. Monotonic; bumped on every mutation.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn journal_mut(&mut self) -> &mut Journal {
        &mut self.journal
    }

    /// Number of links held.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Get a link by id.
    pub fn get(&self, id: &str) -> Option<&AlignmentLink> {
        self.links.get(id)
    }

    /// All links, in no particular order.
    pub fn get_all(&self) -> Vec<&AlignmentLink> {
        self.links.values().collect()
    }

    /// Links touching the given token reference on the given side.
    ///
    /// The input is sanitized before lookup. Ids missing from the primary
    /// map are stale and filtered out defensively.
    pub fn find_by_reference(&self, side: Side, reference: &str) -> Vec<&AlignmentLink> {
        let key = crate::reference::sanitize(reference);
        let index = self.index(side);
        let Some(bucket) = index.get(key) else {
            return Vec::new();
        };
        bucket
            .iter()
            .filter_map(|id| self.links.get(id))
            .collect()
    }

    /// Upsert a link.
    ///
    /// Any prior link with the same id is removed first, so after this
    /// returns both indices contain the link's id for exactly the
    /// references it now touches. A link without an id gets its
    /// content-derived id. Journals a `CREATE` for new ids, a diffed
    /// `UPDATE` for re-saves, and nothing when the diff is empty.
    pub fn save(&mut self, link: AlignmentLink, timestamp: Timestamp) -> Result<AlignmentLink> {
        self.save_with(link, timestamp, SaveOptions::default())
    }

    /// [`LinkStore::save`] with explicit options.
    pub fn save_with(
        &mut self,
        mut link: AlignmentLink,
        timestamp: Timestamp,
        opts: SaveOptions,
    ) -> Result<AlignmentLink> {
        if link.is_empty() {
            return Err(Error::EmptyLink);
        }
        link.id = link.effective_id();

        let prior = self.unlink(&link.id);
        self.index_link(&link);
        self.links.insert(link.id.clone(), link.clone());

        if !opts.suppress_journal {
            match &prior {
                None => self.journal.record_create(&link, timestamp)?,
                Some(previous) => {
                    let before = serde_json::to_value(previous)
                        .map_err(|e| Error::Serialization(e.to_string()))?;
                    let after = serde_json::to_value(&link)
                        .map_err(|e| Error::Serialization(e.to_string()))?;
                    let ops = crate::diff::diff(&before, &after);
                    if !ops.is_empty() {
                        self.journal.record_update(&link.id, &ops, timestamp)?;
                    }
                }
            }
        }

        self.revision += 1;
        Ok(link)
    }

    /// Remove a link, stripping its id from every index bucket.
    ///
    /// Journals a `DELETE` carrying the pre-removal payload. Removing an
    /// unknown id is a no-op.
    pub fn remove(&mut self, id: &str, timestamp: Timestamp) -> Result<Option<AlignmentLink>> {
        self.remove_with(id, timestamp, SaveOptions::default())
    }

    /// [`LinkStore::remove`] with explicit options.
    pub fn remove_with(
        &mut self,
        id: &str,
        timestamp: Timestamp,
        opts: SaveOptions,
    ) -> Result<Option<AlignmentLink>> {
        let Some(removed) = self.unlink(id) else {
            return Ok(None);
        };

        if !opts.suppress_journal {
            self.journal.record_delete(&removed, timestamp)?;
        }

        self.revision += 1;
        Ok(Some(removed))
    }

    /// Save many links in chunks.
    ///
    /// Rejected with [`Error::StoreBusy`] while another bulk operation is
    /// in flight (unless forced); single-item reads stay unblocked. Each
    /// chunk is journaled as one `BULK_INSERT` entry rather than per-link
    /// `CREATE`s; journaling may be suppressed entirely for initial loads.
    /// Cancellation takes effect at chunk boundaries only. Idempotent by
    /// content-derived id: re-running with the same input converges on the
    /// same link set.
    pub fn save_all(
        &mut self,
        links: Vec<AlignmentLink>,
        timestamp: Timestamp,
        opts: SaveOptions,
        progress: &mut dyn BulkProgress,
    ) -> Result<BulkOutcome> {
        self.enter_bulk(opts)?;
        let result = self.save_all_inner(links, timestamp, opts, progress);
        self.busy -= 1;
        result
    }

    /// Remove many links in chunks, with the same busy/cancel semantics as
    /// [`LinkStore::save_all`]. Removals journal per-link `DELETE` entries.
    pub fn remove_all(
        &mut self,
        ids: &[LinkId],
        timestamp: Timestamp,
        opts: SaveOptions,
        progress: &mut dyn BulkProgress,
    ) -> Result<BulkOutcome> {
        self.enter_bulk(opts)?;
        let result = self.remove_all_inner(ids, timestamp, opts, progress);
        self.busy -= 1;
        result
    }

    /// Replace the store's entire contents without journaling.
    ///
    /// Used when a downloaded project snapshot supersedes local state.
    pub fn replace_all(&mut self, links: Vec<AlignmentLink>) -> Result<usize> {
        self.links.clear();
        self.sources_index.clear();
        self.targets_index.clear();

        let mut count = 0;
        for mut link in links {
            if link.is_empty() {
                continue;
            }
            link.id = link.effective_id();
            self.index_link(&link);
            self.links.insert(link.id.clone(), link);
            count += 1;
        }

        self.revision += 1;
        Ok(count)
    }

    /// Check that the indices and the primary map agree.
    ///
    /// A bucket id absent from the primary map should be unreachable after
    /// any sequence of saves and removes; it indicates a logic error, not a
    /// user-facing condition.
    pub fn verify_consistency(&self) -> Result<()> {
        for index in [&self.sources_index, &self.targets_index] {
            for bucket in index.values() {
                for id in bucket {
                    if !self.links.contains_key(id) {
                        return Err(Error::IndexConsistency(id.clone()));
                    }
                }
            }
        }

        for link in self.links.values() {
            for side in [Side::Source, Side::Target] {
                let index = self.index(side);
                for member in link.sanitized_members(side) {
                    let present = index
                        .get(member)
                        .is_some_and(|bucket| bucket.contains(&link.id));
                    if !present {
                        return Err(Error::IndexConsistency(link.id.clone()));
                    }
                }
            }
        }

        Ok(())
    }

    fn save_all_inner(
        &mut self,
        links: Vec<AlignmentLink>,
        timestamp: Timestamp,
        opts: SaveOptions,
        progress: &mut dyn BulkProgress,
    ) -> Result<BulkOutcome> {
        let total = links.len();
        let mut affected = 0;
        let mut chunks = 0;
        let mut canceled = false;

        for chunk in links.chunks(self.bulk_chunk_size) {
            if progress.is_canceled() {
                canceled = true;
                break;
            }

            let mut written = Vec::with_capacity(chunk.len());
            for link in chunk {
                if link.is_empty() {
                    continue;
                }
                let mut link = link.clone();
                link.id = link.effective_id();
                self.unlink(&link.id);
                self.index_link(&link);
                self.links.insert(link.id.clone(), link.clone());
                written.push(link);
            }

            if !opts.suppress_journal && !written.is_empty() {
                self.journal.record_bulk(&written, timestamp)?;
            }

            affected += written.len();
            chunks += 1;
            self.revision += 1;
            progress.progress(affected, total);
        }

        Ok(BulkOutcome {
            affected,
            chunks,
            canceled,
        })
    }

    fn remove_all_inner(
        &mut self,
        ids: &[LinkId],
        timestamp: Timestamp,
        opts: SaveOptions,
        progress: &mut dyn BulkProgress,
    ) -> Result<BulkOutcome> {
        let total = ids.len();
        let mut affected = 0;
        let mut chunks = 0;
        let mut canceled = false;

        for chunk in ids.chunks(self.bulk_chunk_size) {
            if progress.is_canceled() {
                canceled = true;
                break;
            }

            for id in chunk {
                if let Some(removed) = self.unlink(id) {
                    if !opts.suppress_journal {
                        self.journal.record_delete(&removed, timestamp)?;
                    }
                    affected += 1;
                }
            }

            chunks += 1;
            self.revision += 1;
            progress.progress(affected, total);
        }

        Ok(BulkOutcome {
            affected,
            chunks,
            canceled,
        })
    }

    fn enter_bulk(&mut self, opts: SaveOptions) -> Result<()> {
        if self.busy > 0 && !opts.forced {
            return Err(Error::StoreBusy);
        }
        self.busy += 1;
        Ok(())
    }

    fn index(&self, side: Side) -> &HashMap<String, BTreeSet<LinkId>> {
        match side {
            Side::Source => &self.sources_index,
            Side::Target => &self.targets_index,
        }
    }

    /// Insert a link's id into both indices for every member it touches.
    fn index_link(&mut self, link: &AlignmentLink) {
        for member in link.sanitized_members(Side::Source) {
            self.sources_index
                .entry(member.to_string())
                .or_default()
                .insert(link.id.clone());
        }
        for member in link.sanitized_members(Side::Target) {
            self.targets_index
                .entry(member.to_string())
                .or_default()
                .insert(link.id.clone());
        }
    }

    /// Remove a link from the primary map and strip its id from every
    /// bucket, pruning buckets that become empty.
    fn unlink(&mut self, id: &str) -> Option<AlignmentLink> {
        let link = self.links.remove(id)?;

        for member in link.sanitized_members(Side::Source) {
            if let Some(bucket) = self.sources_index.get_mut(member) {
                bucket.remove(id);
                if bucket.is_empty() {
                    self.sources_index.remove(member);
                }
            }
        }
        for member in link.sanitized_members(Side::Target) {
            if let Some(bucket) = self.targets_index.get_mut(member) {
                bucket.remove(id);
                if bucket.is_empty() {
                    self.targets_index.remove(member);
                }
            }
        }

        Some(link)
    }

    #[cfg(test)]
    fn force_busy(&mut self) {
        self.busy += 1;
    }
}

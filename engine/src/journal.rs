//! Append-only journal of link mutations.
//!
//! Every store write lands here as a [`JournalEntry`] (unless the caller
//! suppresses journaling, e.g. during an initial bulk load). The sync layer
//! drains entries in pages and transmits them to the server; entries are
//! removed only once receipt is confirmed.
//!
//! Large insert batches are not inlined: each chunk is written through the
//! [`BulkPayloadStore`] port and referenced by a single `BULK_INSERT` entry,
//! which bounds per-entry size and avoids diffing data with no prior
//! version.

use crate::diff::PatchOp;
use crate::error::{Error, Result};
use crate::link::AlignmentLink;
use crate::{LinkId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Unique identifier for a journal entry.
pub type EntryId = String;

/// Kind of mutation an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    Create,
    Update,
    Delete,
    BulkInsert,
}

/// A single journaled mutation.
///
/// Persisted shape: `{ id, linkId, type, date, body, bulkInsertFile }`.
/// `BULK_INSERT` bodies are empty; the payload lives behind
/// `bulk_insert_file` and is read lazily.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: EntryId,
    pub link_id: Option<LinkId>,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(rename = "date")]
    pub timestamp: Timestamp,
    pub body: Value,
    pub bulk_insert_file: Option<String>,
}

/// A journal entry prepared for upload.
///
/// For `BULK_INSERT` entries the backing payload has been expanded into
/// `links`; for everything else `links` is `None` and the body carries the
/// payload or diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntryView {
    pub entry: JournalEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<AlignmentLink>>,
}

/// Port for out-of-band bulk payload storage.
///
/// The engine never touches the filesystem; the sync layer provides a
/// file-backed implementation and tests use [`MemoryPayloadStore`].
pub trait BulkPayloadStore: Send {
    /// Persist a chunk, returning an opaque payload reference.
    fn write(&mut self, links: &[AlignmentLink]) -> Result<String>;
    /// Read a chunk back.
    fn read(&self, payload_ref: &str) -> Result<Vec<AlignmentLink>>;
    /// Delete a chunk.
    fn delete(&mut self, payload_ref: &str) -> Result<()>;
}

/// In-memory payload store.
#[derive(Debug, Default)]
pub struct MemoryPayloadStore {
    payloads: HashMap<String, Vec<AlignmentLink>>,
    next: u64,
}

impl MemoryPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads currently held.
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

impl BulkPayloadStore for MemoryPayloadStore {
    fn write(&mut self, links: &[AlignmentLink]) -> Result<String> {
        self.next += 1;
        let payload_ref = format!("payload-{}", self.next);
        self.payloads.insert(payload_ref.clone(), links.to_vec());
        Ok(payload_ref)
    }

    fn read(&self, payload_ref: &str) -> Result<Vec<AlignmentLink>> {
        self.payloads
            .get(payload_ref)
            .cloned()
            .ok_or_else(|| Error::UnknownPayload(payload_ref.to_string()))
    }

    fn delete(&mut self, payload_ref: &str) -> Result<()> {
        self.payloads
            .remove(payload_ref)
            .map(|_| ())
            .ok_or_else(|| Error::UnknownPayload(payload_ref.to_string()))
    }
}

/// The per-project journal.
pub struct Journal {
    entries: Vec<JournalEntry>,
    payloads: Box<dyn BulkPayloadStore>,
    /// Keep bulk payloads past acknowledgement
    retain_payloads: bool,
    next_entry: u64,
}

impl fmt::Debug for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Journal")
            .field("entries", &self.entries.len())
            .field("retain_payloads", &self.retain_payloads)
            .finish()
    }
}

impl Journal {
    /// Create a journal with the given payload store.
    pub fn new(payloads: Box<dyn BulkPayloadStore>) -> Self {
        Self {
            entries: Vec::new(),
            payloads,
            retain_payloads: false,
            next_entry: 0,
        }
    }

    /// Create a journal backed by an in-memory payload store.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryPayloadStore::new()))
    }

    /// Keep bulk payload files even after their entries are acknowledged.
    pub fn retain_payloads(mut self, retain: bool) -> Self {
        self.retain_payloads = retain;
        self
    }

    /// Record a newly created link (full payload).
    pub fn record_create(&mut self, link: &AlignmentLink, timestamp: Timestamp) -> Result<()> {
        let body = serde_json::to_value(link).map_err(|e| Error::Serialization(e.to_string()))?;
        self.push_entry(EntryKind::Create, Some(link.id.clone()), body, None, timestamp);
        Ok(())
    }

    /// Record an update as a structural diff.
    ///
    /// Callers must not invoke this with an empty diff; an unchanged save
    /// emits no entry at all.
    pub fn record_update(
        &mut self,
        link_id: &str,
        ops: &[PatchOp],
        timestamp: Timestamp,
    ) -> Result<()> {
        debug_assert!(!ops.is_empty());
        let body = serde_json::to_value(ops).map_err(|e| Error::Serialization(e.to_string()))?;
        self.push_entry(
            EntryKind::Update,
            Some(link_id.to_string()),
            body,
            None,
            timestamp,
        );
        Ok(())
    }

    /// Record a removal, capturing the pre-removal payload.
    pub fn record_delete(&mut self, removed: &AlignmentLink, timestamp: Timestamp) -> Result<()> {
        let body =
            serde_json::to_value(removed).map_err(|e| Error::Serialization(e.to_string()))?;
        self.push_entry(
            EntryKind::Delete,
            Some(removed.id.clone()),
            body,
            None,
            timestamp,
        );
        Ok(())
    }

    /// Record one chunk of a bulk insert as an external payload.
    pub fn record_bulk(&mut self, chunk: &[AlignmentLink], timestamp: Timestamp) -> Result<()> {
        let payload_ref = self.payloads.write(chunk)?;
        self.push_entry(
            EntryKind::BulkInsert,
            None,
            Value::Null,
            Some(payload_ref),
            timestamp,
        );
        Ok(())
    }

    /// Read the next page of entries for upload, oldest first.
    ///
    /// Returns up to `page_size` entries. Pages are kept homogenous: when a
    /// `BULK_INSERT` entry follows plain entries within the page, only the
    /// plain entries are returned; when the page starts with bulk entries,
    /// only the leading run of bulk entries is returned. Bulk payloads are
    /// expanded into the views but kept on disk, so a page whose push never
    /// gets a receipt can be read again; [`Journal::acknowledge`] reclaims
    /// them once the server confirms.
    pub fn upload_page(&mut self, page_size: usize) -> Result<Vec<JournalEntryView>> {
        if page_size == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let page = &self.entries[..page_size.min(self.entries.len())];
        let first_bulk = page
            .iter()
            .position(|e| e.kind == EntryKind::BulkInsert);

        let selected: Vec<JournalEntry> = match first_bulk {
            None => page.to_vec(),
            Some(0) => page
                .iter()
                .take_while(|e| e.kind == EntryKind::BulkInsert)
                .cloned()
                .collect(),
            Some(idx) => page[..idx].to_vec(),
        };

        let mut views = Vec::with_capacity(selected.len());
        for entry in selected {
            let links = match (&entry.kind, &entry.bulk_insert_file) {
                (EntryKind::BulkInsert, Some(payload_ref)) => {
                    Some(self.payloads.read(payload_ref)?)
                }
                (EntryKind::BulkInsert, None) => {
                    return Err(Error::UnknownPayload(entry.id.clone()));
                }
                _ => None,
            };
            views.push(JournalEntryView { entry, links });
        }

        Ok(views)
    }

    /// Drop entries whose receipt the server has confirmed, reclaiming the
    /// bulk payloads they referenced unless the journal retains them.
    pub fn acknowledge(&mut self, ids: &[EntryId]) {
        for entry in self.entries.iter().filter(|e| ids.contains(&e.id)) {
            if entry.kind != EntryKind::BulkInsert || self.retain_payloads {
                continue;
            }
            if let Some(payload_ref) = &entry.bulk_insert_file {
                // A missing payload here means it was already reclaimed;
                // confirmed entries are dropped regardless.
                let _ = self.payloads.delete(payload_ref);
            }
        }
        self.entries.retain(|e| !ids.contains(&e.id));
    }

    /// Entries in persisted order.
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push_entry(
        &mut self,
        kind: EntryKind,
        link_id: Option<LinkId>,
        body: Value,
        bulk_insert_file: Option<String>,
        timestamp: Timestamp,
    ) {
        self.next_entry += 1;
        // Entries must be non-decreasing in timestamp in persisted order;
        // clamp against the tail to absorb clock regressions.
        let timestamp = self
            .entries
            .last()
            .map(|last| timestamp.max(last.timestamp))
            .unwrap_or(timestamp);

        self.entries.push(JournalEntry {
            id: format!("entry-{:08}", self.next_entry),
            link_id,
            kind,
            timestamp,
            body,
            bulk_insert_file,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff;
    use serde_json::json;

    fn link(id: &str) -> AlignmentLink {
        AlignmentLink::new(
            id,
            vec!["010010010011".into()],
            vec!["010010010021".into()],
        )
    }

    #[test]
    fn create_entry_carries_full_payload() {
        let mut journal = Journal::in_memory();
        journal.record_create(&link("link-1"), 1000).unwrap();

        assert_eq!(journal.len(), 1);
        let entry = &journal.entries()[0];
        assert_eq!(entry.kind, EntryKind::Create);
        assert_eq!(entry.link_id.as_deref(), Some("link-1"));
        assert_eq!(entry.body["sources"], json!(["010010010011"]));
    }

    #[test]
    fn update_entry_carries_diff() {
        let mut journal = Journal::in_memory();
        let before = serde_json::to_value(link("link-1")).unwrap();
        let mut after_link = link("link-1");
        after_link.targets.push("010010010022".into());
        let after = serde_json::to_value(&after_link).unwrap();

        let ops = diff::diff(&before, &after);
        journal.record_update("link-1", &ops, 2000).unwrap();

        let entry = &journal.entries()[0];
        assert_eq!(entry.kind, EntryKind::Update);
        assert!(entry.body.as_array().is_some_and(|a| !a.is_empty()));
    }

    #[test]
    fn delete_entry_captures_prior_state() {
        let mut journal = Journal::in_memory();
        journal.record_delete(&link("link-1"), 3000).unwrap();

        let entry = &journal.entries()[0];
        assert_eq!(entry.kind, EntryKind::Delete);
        assert_eq!(entry.body["id"], json!("link-1"));
    }

    #[test]
    fn bulk_entry_references_external_payload() {
        let mut journal = Journal::in_memory();
        let chunk: Vec<AlignmentLink> = (0..3).map(|i| link(&format!("link-{i}"))).collect();
        journal.record_bulk(&chunk, 1000).unwrap();

        let entry = &journal.entries()[0];
        assert_eq!(entry.kind, EntryKind::BulkInsert);
        assert_eq!(entry.body, Value::Null);
        assert!(entry.bulk_insert_file.is_some());
    }

    #[test]
    fn timestamps_are_non_decreasing() {
        let mut journal = Journal::in_memory();
        journal.record_create(&link("a"), 2000).unwrap();
        journal.record_create(&link("b"), 1000).unwrap(); // clock regressed

        let stamps: Vec<u64> = journal.entries().iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, [2000, 2000]);
    }

    #[test]
    fn upload_page_respects_page_size() {
        let mut journal = Journal::in_memory();
        for i in 0..5 {
            journal
                .record_create(&link(&format!("link-{i}")), 1000 + i)
                .unwrap();
        }

        let page = journal.upload_page(3).unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].entry.link_id.as_deref(), Some("link-0"));
        assert_eq!(page[2].entry.link_id.as_deref(), Some("link-2"));
    }

    #[test]
    fn upload_page_splits_before_bulk_entry() {
        let mut journal = Journal::in_memory();
        journal.record_create(&link("a"), 1000).unwrap();
        journal.record_create(&link("b"), 1001).unwrap();
        journal.record_bulk(&[link("c")], 1002).unwrap();

        // Plain entries come back alone even though the page had room.
        let page = journal.upload_page(10).unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|v| v.entry.kind != EntryKind::BulkInsert));
    }

    #[test]
    fn upload_page_returns_leading_bulk_run() {
        let mut journal = Journal::in_memory();
        journal.record_bulk(&[link("a")], 1000).unwrap();
        journal.record_bulk(&[link("b")], 1001).unwrap();
        journal.record_create(&link("c"), 1002).unwrap();

        let page = journal.upload_page(10).unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|v| v.entry.kind == EntryKind::BulkInsert));
        assert!(page.iter().all(|v| v.links.is_some()));
    }

    #[test]
    fn bulk_expansion_preserves_order() {
        let mut journal = Journal::in_memory();
        let chunk: Vec<AlignmentLink> = (0..4).map(|i| link(&format!("link-{i}"))).collect();
        journal.record_bulk(&chunk, 1000).unwrap();

        let page = journal.upload_page(10).unwrap();
        let links = page[0].links.as_ref().unwrap();
        let ids: Vec<&str> = links.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, ["link-0", "link-1", "link-2", "link-3"]);
    }

    /// Payload store whose contents stay inspectable after the journal
    /// takes ownership of a handle.
    #[derive(Clone, Default)]
    struct SharedPayloads(std::sync::Arc<std::sync::Mutex<MemoryPayloadStore>>);

    impl SharedPayloads {
        fn len(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    impl BulkPayloadStore for SharedPayloads {
        fn write(&mut self, links: &[AlignmentLink]) -> Result<String> {
            self.0.lock().unwrap().write(links)
        }

        fn read(&self, payload_ref: &str) -> Result<Vec<AlignmentLink>> {
            self.0.lock().unwrap().read(payload_ref)
        }

        fn delete(&mut self, payload_ref: &str) -> Result<()> {
            self.0.lock().unwrap().delete(payload_ref)
        }
    }

    #[test]
    fn unconfirmed_page_can_be_read_again() {
        let shared = SharedPayloads::default();
        let mut journal = Journal::new(Box::new(shared.clone()));
        journal.record_bulk(&[link("a")], 1000).unwrap();

        // First expansion went out but its receipt never arrived.
        let first = journal.upload_page(10).unwrap();
        assert_eq!(journal.len(), 1);
        assert_eq!(shared.len(), 1);

        // The retry expands the same payload again.
        let second = journal.upload_page(10).unwrap();
        assert_eq!(first, second);

        // Confirmation drains the entry and reclaims the payload.
        let ids: Vec<EntryId> = second.iter().map(|v| v.entry.id.clone()).collect();
        journal.acknowledge(&ids);
        assert_eq!(journal.len(), 0);
        assert_eq!(shared.len(), 0);
    }

    #[test]
    fn retained_payloads_survive_acknowledge() {
        let shared = SharedPayloads::default();
        let mut journal = Journal::new(Box::new(shared.clone())).retain_payloads(true);
        journal.record_bulk(&[link("a")], 1000).unwrap();

        let page = journal.upload_page(10).unwrap();
        let ids: Vec<EntryId> = page.iter().map(|v| v.entry.id.clone()).collect();
        journal.acknowledge(&ids);

        assert_eq!(journal.len(), 0);
        assert_eq!(shared.len(), 1);
    }

    #[test]
    fn acknowledge_removes_entries() {
        let mut journal = Journal::in_memory();
        journal.record_create(&link("a"), 1000).unwrap();
        journal.record_create(&link("b"), 1001).unwrap();

        let page = journal.upload_page(1).unwrap();
        let ids: Vec<EntryId> = page.iter().map(|v| v.entry.id.clone()).collect();
        journal.acknowledge(&ids);

        assert_eq!(journal.len(), 1);
        assert_eq!(journal.entries()[0].link_id.as_deref(), Some("b"));
    }

    #[test]
    fn entry_persisted_shape() {
        let mut journal = Journal::in_memory();
        journal.record_create(&link("link-1"), 1000).unwrap();

        let json = serde_json::to_string(&journal.entries()[0]).unwrap();
        assert!(json.contains("\"type\":\"CREATE\""));
        assert!(json.contains("\"date\":1000"));
        assert!(json.contains("\"linkId\""));
        assert!(json.contains("\"bulkInsertFile\""));

        let parsed: JournalEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, journal.entries()[0]);
    }

    #[test]
    fn memory_store_unknown_payload() {
        let store = MemoryPayloadStore::new();
        assert!(matches!(
            store.read("nope"),
            Err(Error::UnknownPayload(_))
        ));
    }
}

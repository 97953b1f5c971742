//! # Concord Engine
//!
//! The reference-addressing, link-indexing, and journaling core of Concord,
//! an offline-first editor for scripture-to-scripture word alignments.
//!
//! This crate is the part of the system with real invariants: everything
//! else is UI composition or transport. It handles reference encoding,
//! indexed link storage, structural diffing, and the append-only mutation
//! journal that drives synchronization.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of files, network, or platform
//! - **Deterministic**: the same mutation sequence always produces the same
//!   indices and journal
//! - **Testable**: pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### References
//!
//! Every token has a hierarchical scripture position - book, chapter,
//! verse, word, word-part (BCVWP) - encoded by [`Reference`] into a
//! fixed-width string whose lexicographic order equals the numeric tuple
//! order. Reference strings are the index keys for everything else.
//!
//! ### Links
//!
//! An [`AlignmentLink`] associates source-text token references with
//! target-text token references, plus review metadata.
//!
//! ### The store
//!
//! [`LinkStore`] holds a project's links keyed by id and maintains two
//! derived indices from sanitized reference strings to link ids, one per
//! [`Side`]. Every mutation bumps a monotonic revision counter used by the
//! sync layer as a coarse cache-invalidation key.
//!
//! ### The journal
//!
//! Each store write appends a [`JournalEntry`]: full payloads for creates
//! and deletes, minimal [`PatchOp`] diffs for updates (an unchanged save
//! emits nothing), and externally stored payloads for bulk inserts. The
//! sync layer drains the journal in pages via [`Journal::upload_page`].
//!
//! ## Quick Start
//!
//! ```rust
//! use concord_engine::{AlignmentLink, LinkStore, Side};
//!
//! let mut store = LinkStore::in_memory("project-1");
//!
//! let link = AlignmentLink::new(
//!     "",
//!     vec!["010010010011".to_string()],
//!     vec!["010010010021".to_string()],
//! );
//! let saved = store.save(link, 1706745600000).unwrap();
//!
//! let linked = store.find_by_reference(Side::Source, "010010010011");
//! assert_eq!(linked[0].id, saved.id);
//! assert_eq!(store.journal().len(), 1);
//! ```

pub mod diff;
pub mod error;
pub mod journal;
pub mod link;
pub mod reference;
pub mod store;

// Re-export main types at crate root
pub use diff::{apply, diff, PatchOp};
pub use error::Error;
pub use journal::{
    BulkPayloadStore, EntryId, EntryKind, Journal, JournalEntry, JournalEntryView,
    MemoryPayloadStore,
};
pub use link::{AlignmentLink, LinkMetadata, LinkOrigin, LinkStatus, Side};
pub use reference::{matches_truncated, sanitize, truncate, Field, Reference};
pub use store::{
    BulkOutcome, BulkProgress, LinkStore, NoProgress, SaveOptions, DEFAULT_BULK_CHUNK_SIZE,
};

/// Type aliases for clarity
pub type LinkId = String;
pub type ProjectId = String;
pub type Revision = u64;
pub type Timestamp = u64;

//! # Concord Sync
//!
//! The IO layer of Concord: HTTP transport, durable persistence ports,
//! file-backed bulk payloads, and the synchronization engine that moves
//! projects between the local link store and the alignment server.
//!
//! The pure data structures and invariants live in `concord-engine`; this
//! crate wires them to the network and the filesystem.
//!
//! ## Architecture
//!
//! - [`client`] - `RemoteApi` trait and its `reqwest` implementation
//! - [`persistence`] - durable storage port for links and sync state
//! - [`payloads`] - file-backed bulk journal payloads
//! - [`cache`] - revision-keyed read cache for link queries
//! - [`state`] - project locations and the download phase machine
//! - [`engine`] - the orchestrator tying it all together

pub mod cache;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod payloads;
pub mod persistence;
pub mod state;

pub use cache::{QueryCache, QueryKey};
pub use client::{
    CorpusDescriptor, HttpRemote, LinksResponse, ProjectDescriptor, PushReceipt, RemoteApi,
    TokenRecord, TokensResponse,
};
pub use config::{ConfigError, SyncConfig};
pub use engine::{DownloadOutcome, SyncEngine};
pub use error::{Result, SyncError};
pub use payloads::FilePayloadStore;
pub use persistence::{LinkPersistencePort, MemoryPersistence};
pub use state::{choose_current, ProjectLocation, ProjectSyncState, SyncPhase};

/// Milliseconds since the Unix epoch, the timestamp the journal records.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

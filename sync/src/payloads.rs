//! File-backed bulk payload storage.
//!
//! Bulk journal entries keep their link payloads out of band so the
//! journal itself stays small. Each payload is one JSON file under the
//! configured payload directory, named by a fresh UUID; the payload
//! reference recorded in the journal entry is the file name.

use std::fs;
use std::path::{Path, PathBuf};

use concord_engine::{AlignmentLink, BulkPayloadStore, Error};
use tracing::debug;
use uuid::Uuid;

/// [`BulkPayloadStore`] writing one JSON file per payload.
#[derive(Debug)]
pub struct FilePayloadStore {
    dir: PathBuf,
}

impl FilePayloadStore {
    /// Create the store, making the payload directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::PayloadIo(e.to_string()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, payload_ref: &str) -> Result<PathBuf, Error> {
        // Payload refs are file names we minted ourselves; reject anything
        // that would escape the payload directory.
        if payload_ref.contains(['/', '\\']) || payload_ref.contains("..") {
            return Err(Error::UnknownPayload(payload_ref.to_string()));
        }
        Ok(self.dir.join(payload_ref))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl BulkPayloadStore for FilePayloadStore {
    fn write(&mut self, links: &[AlignmentLink]) -> Result<String, Error> {
        let payload_ref = format!("bulk-{}.json", Uuid::new_v4());
        let path = self.dir.join(&payload_ref);
        let body =
            serde_json::to_vec(links).map_err(|e| Error::Serialization(e.to_string()))?;
        fs::write(&path, body).map_err(|e| Error::PayloadIo(e.to_string()))?;
        debug!(payload = %payload_ref, count = links.len(), "wrote bulk payload");
        Ok(payload_ref)
    }

    fn read(&self, payload_ref: &str) -> Result<Vec<AlignmentLink>, Error> {
        let path = self.path_for(payload_ref)?;
        let body = match fs::read(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::UnknownPayload(payload_ref.to_string()))
            }
            Err(e) => return Err(Error::PayloadIo(e.to_string())),
        };
        serde_json::from_slice(&body).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn delete(&mut self, payload_ref: &str) -> Result<(), Error> {
        let path = self.path_for(payload_ref)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::UnknownPayload(payload_ref.to_string()))
            }
            Err(e) => Err(Error::PayloadIo(e.to_string())),
        }
    }
}

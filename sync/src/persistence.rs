//! Local persistence port for project link data.
//!
//! The sync engine keeps the authoritative in-memory [`LinkStore`] per
//! project and mirrors durable state through this port, so the storage
//! backend (embedded database on device, plain memory in tests) stays
//! swappable.

use std::collections::HashMap;

use async_trait::async_trait;
use concord_engine::{AlignmentLink, ProjectId};
use tokio::sync::RwLock;

use crate::error::{Result, SyncError};
use crate::state::ProjectSyncState;

/// Durable storage operations the sync engine requires.
#[async_trait]
pub trait LinkPersistencePort: Send + Sync {
    /// Persist (insert or overwrite) links for a project.
    async fn save_links(&self, project_id: &str, links: &[AlignmentLink]) -> Result<()>;

    /// Delete links by id.
    async fn delete_links(&self, project_id: &str, ids: &[String]) -> Result<()>;

    /// Replace a project's entire link set, e.g. after a download.
    async fn replace_project(&self, project_id: &str, links: &[AlignmentLink]) -> Result<()>;

    /// Load every link for a project.
    async fn load_project(&self, project_id: &str) -> Result<Vec<AlignmentLink>>;

    /// Persist per-project sync bookkeeping.
    async fn save_state(&self, state: &ProjectSyncState) -> Result<()>;

    /// Load sync bookkeeping for a project, if any.
    async fn load_state(&self, project_id: &str) -> Result<Option<ProjectSyncState>>;
}

/// In-memory [`LinkPersistencePort`] for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryPersistence {
    projects: RwLock<HashMap<ProjectId, HashMap<String, AlignmentLink>>>,
    states: RwLock<HashMap<ProjectId, ProjectSyncState>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link count for a project, for assertions.
    pub async fn link_count(&self, project_id: &str) -> usize {
        self.projects
            .read()
            .await
            .get(project_id)
            .map(|links| links.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl LinkPersistencePort for MemoryPersistence {
    async fn save_links(&self, project_id: &str, links: &[AlignmentLink]) -> Result<()> {
        let mut projects = self.projects.write().await;
        let entry = projects.entry(project_id.to_string()).or_default();
        for link in links {
            if link.id.is_empty() {
                return Err(SyncError::Persistence(
                    "refusing to persist a link without an id".to_string(),
                ));
            }
            entry.insert(link.id.clone(), link.clone());
        }
        Ok(())
    }

    async fn delete_links(&self, project_id: &str, ids: &[String]) -> Result<()> {
        let mut projects = self.projects.write().await;
        if let Some(entry) = projects.get_mut(project_id) {
            for id in ids {
                entry.remove(id);
            }
        }
        Ok(())
    }

    async fn replace_project(&self, project_id: &str, links: &[AlignmentLink]) -> Result<()> {
        let replacement: HashMap<String, AlignmentLink> = links
            .iter()
            .map(|link| (link.id.clone(), link.clone()))
            .collect();
        self.projects
            .write()
            .await
            .insert(project_id.to_string(), replacement);
        Ok(())
    }

    async fn load_project(&self, project_id: &str) -> Result<Vec<AlignmentLink>> {
        Ok(self
            .projects
            .read()
            .await
            .get(project_id)
            .map(|links| links.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_state(&self, state: &ProjectSyncState) -> Result<()> {
        self.states
            .write()
            .await
            .insert(state.project_id.clone(), state.clone());
        Ok(())
    }

    async fn load_state(&self, project_id: &str) -> Result<Option<ProjectSyncState>> {
        Ok(self.states.read().await.get(project_id).cloned())
    }
}

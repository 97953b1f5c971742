//! Project sync state and the per-project sync phase machine.

use chrono::{DateTime, Utc};
use concord_engine::ProjectId;
use serde::{Deserialize, Serialize};

/// Where a project's canonical data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectLocation {
    /// Exists only on this client, never synced
    Local,
    /// Has a server counterpart and local data
    Synced,
    /// Known only from the server, not yet downloaded
    Remote,
}

/// Sync bookkeeping for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSyncState {
    pub project_id: ProjectId,
    pub location: ProjectLocation,
    /// When this client last completed an upload or download
    pub last_sync_time: Option<DateTime<Utc>>,
    /// The server's updated-at observed during the last download
    pub last_sync_server_time: Option<DateTime<Utc>>,
    /// When local data last changed
    pub updated_at: DateTime<Utc>,
}

impl ProjectSyncState {
    /// A never-synced local project.
    pub fn new_local(project_id: impl Into<ProjectId>, now: DateTime<Utc>) -> Self {
        Self {
            project_id: project_id.into(),
            location: ProjectLocation::Local,
            last_sync_time: None,
            last_sync_server_time: None,
            updated_at: now,
        }
    }

    /// A server project not yet downloaded (display-only).
    pub fn new_remote(project_id: impl Into<ProjectId>, now: DateTime<Utc>) -> Self {
        Self {
            project_id: project_id.into(),
            location: ProjectLocation::Remote,
            last_sync_time: None,
            last_sync_server_time: None,
            updated_at: now,
        }
    }

    /// Whether local edits exist that the server has not seen.
    pub fn has_unsynced_changes(&self) -> bool {
        match self.last_sync_time {
            Some(last_sync) => self.updated_at != last_sync,
            None => self.location != ProjectLocation::Remote,
        }
    }

    /// Record a completed sync at `now`.
    pub fn mark_synced(&mut self, now: DateTime<Utc>) {
        self.location = ProjectLocation::Synced;
        self.last_sync_time = Some(now);
        self.updated_at = now;
    }
}

/// Pick the canonical "current" project among candidates for the same
/// logical project: synced beats local beats remote, ties go to the most
/// recently updated.
pub fn choose_current(candidates: &[ProjectSyncState]) -> Option<&ProjectSyncState> {
    candidates
        .iter()
        .max_by_key(|s| (location_rank(s.location), s.updated_at))
}

fn location_rank(location: ProjectLocation) -> u8 {
    match location {
        ProjectLocation::Synced => 2,
        ProjectLocation::Local => 1,
        ProjectLocation::Remote => 0,
    }
}

/// Phases of a download, in order, plus the terminal outcomes.
///
/// Terminal phases auto-reset to [`SyncPhase::Idle`] after a configured
/// delay so transient failure status clears without user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    #[default]
    Idle,
    RetrievingProject,
    RetrievingTokens,
    FormattingResponse,
    Updating,
    RefreshingContainers,
    Success,
    Failed,
    Canceled,
}

impl SyncPhase {
    /// Whether this phase ends a sync attempt.
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncPhase::Success | SyncPhase::Failed | SyncPhase::Canceled)
    }

    /// Whether a sync is in flight.
    pub fn is_active(self) -> bool {
        !self.is_terminal() && self != SyncPhase::Idle
    }

    /// Legal phase transitions.
    ///
    /// Any active phase may abort to `Failed` or `Canceled`; terminal
    /// phases only reset to `Idle`.
    pub fn can_transition_to(self, next: SyncPhase) -> bool {
        use SyncPhase::*;
        match (self, next) {
            (Idle, RetrievingProject) => true,
            (RetrievingProject, RetrievingTokens) => true,
            (RetrievingTokens, FormattingResponse) => true,
            (FormattingResponse, Updating) => true,
            (Updating, RefreshingContainers) => true,
            (RefreshingContainers, Success) => true,
            (from, Failed | Canceled) if from.is_active() => true,
            (from, Idle) if from.is_terminal() => true,
            (Idle, Idle) => true,
            _ => false,
        }
    }
}

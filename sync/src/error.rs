//! Unified error handling for the sync layer.

use crate::state::SyncPhase;
use concord_engine::ProjectId;

/// All possible errors from sync operations.
///
/// Store and sync operations return these explicitly; callers check the
/// result rather than relying on logging side channels. Codec errors bubble
/// up through [`SyncError::Engine`].
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("engine error: {0}")]
    Engine(#[from] concord_engine::Error),

    #[error("server returned an incomplete response: {0}")]
    InvalidResponse(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("unknown project: {0}")]
    UnknownProject(ProjectId),

    #[error("sync canceled")]
    Canceled,

    #[error("invalid sync phase transition: {from:?} -> {to:?}")]
    InvalidTransition { from: SyncPhase, to: SyncPhase },
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SyncError::Canceled;
        assert_eq!(err.to_string(), "sync canceled");

        let err = SyncError::UnknownProject("project-9".into());
        assert_eq!(err.to_string(), "unknown project: project-9");

        let err = SyncError::Engine(concord_engine::Error::StoreBusy);
        assert_eq!(err.to_string(), "engine error: bulk operation already in progress");
    }
}

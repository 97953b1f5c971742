//! Error types for the Concord engine.

use crate::LinkId;
use thiserror::Error;

/// All possible errors from the Concord engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Codec errors - always surfaced to the immediate caller
    #[error("malformed reference: {0}")]
    MalformedReference(String),

    // Index errors - should be unreachable after any valid mutation sequence
    #[error("index bucket references unknown link: {0}")]
    IndexConsistency(LinkId),

    // Store errors
    #[error("link not found: {0}")]
    LinkNotFound(LinkId),

    #[error("bulk operation already in progress")]
    StoreBusy,

    #[error("link has no members on side being persisted")]
    EmptyLink,

    // Journal errors
    #[error("unknown bulk payload: {0}")]
    UnknownPayload(String),

    #[error("payload io failed: {0}")]
    PayloadIo(String),

    #[error("payload serialization failed: {0}")]
    Serialization(String),

    #[error("invalid patch: {0}")]
    InvalidPatch(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::MalformedReference("abc".into());
        assert_eq!(err.to_string(), "malformed reference: abc");

        let err = Error::IndexConsistency("link-1".into());
        assert_eq!(
            err.to_string(),
            "index bucket references unknown link: link-1"
        );

        let err = Error::StoreBusy;
        assert_eq!(err.to_string(), "bulk operation already in progress");
    }
}

use std::path::PathBuf;

use thiserror::Error;

use crate::state_machine::RecordKey;
use crate::tms::TmsError;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("{0}")]
    Tms(#[from] TmsError),

    #[error(
        "The download for {unit_type} {title} failed because of the length of one field translation ({locale}) value: {field}."
    )]
    ContentTooLarge {
        unit_type: String,
        title: String,
        locale: String,
        field: String,
    },

    #[error("No translation record for {0}")]
    RecordNotFound(RecordKey),

    #[error("No source content stored for {0}")]
    UnitNotFound(RecordKey),

    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    #[error("Account blocked until payment is settled")]
    AccountBlocked,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl TrackerError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TrackerError::Tms(e) => e.kind(),
            TrackerError::ContentTooLarge { .. } => FailureKind::ContentTooLarge,
            TrackerError::AccountBlocked => FailureKind::PaymentRequired,
            _ => FailureKind::Local,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{key} changed concurrently (expected version {expected}, found {found})")]
    Conflict {
        key: RecordKey,
        expected: u64,
        found: u64,
    },

    #[error("Failed to access store file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed store file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Classifies a per-record failure for reporting and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    /// Network, auth or server error; retry the same action.
    RemoteCall,
    /// A translated value does not fit its field; the source needs editing.
    ContentTooLarge,
    /// The remote document is gone; a fresh upload is needed.
    DocumentArchived,
    /// The remote document was superseded by a new id.
    DocumentLocked,
    /// The account is blocked until resolved outside the system.
    PaymentRequired,
    /// Local problem that never reached the TMS.
    Local,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::RemoteCall => write!(f, "RemoteCallFailure"),
            FailureKind::ContentTooLarge => write!(f, "ContentTooLargeFailure"),
            FailureKind::DocumentArchived => write!(f, "DocumentArchivedFailure"),
            FailureKind::DocumentLocked => write!(f, "DocumentLockedFailure"),
            FailureKind::PaymentRequired => write!(f, "PaymentRequiredFailure"),
            FailureKind::Local => write!(f, "LocalFailure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_too_large_message() {
        let err = TrackerError::ContentTooLarge {
            unit_type: "node".into(),
            title: "Llamas are cool".into(),
            locale: "es_MX".into(),
            field: "body".into(),
        };
        assert_eq!(
            err.to_string(),
            "The download for node Llamas are cool failed because of the length of one field translation (es_MX) value: body."
        );
        assert_eq!(err.kind(), FailureKind::ContentTooLarge);
    }

    #[test]
    fn kinds_follow_tms_errors() {
        let err: TrackerError = TmsError::PaymentRequired("x".into()).into();
        assert_eq!(err.kind(), FailureKind::PaymentRequired);
        assert_eq!(TrackerError::AccountBlocked.kind(), FailureKind::PaymentRequired);
        assert_eq!(
            TrackerError::UnknownProfile("x".into()).kind(),
            FailureKind::Local
        );
    }

    #[test]
    fn failure_kind_display() {
        assert_eq!(FailureKind::RemoteCall.to_string(), "RemoteCallFailure");
        assert_eq!(FailureKind::DocumentLocked.to_string(), "DocumentLockedFailure");
    }
}

//! Errors returned by a translation management system.

use thiserror::Error;

use crate::error::FailureKind;

#[derive(Debug, Error)]
pub enum TmsError {
    /// Any other non-success HTTP response.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The remote document no longer exists.
    #[error("document {document_id} has been archived")]
    DocumentArchived { document_id: String },

    /// The remote document was superseded; work continues on the new id.
    #[error("document {document_id} is locked, continue with {next_document_id}")]
    DocumentLocked {
        document_id: String,
        next_document_id: String,
    },

    /// The account is blocked until someone settles it outside this system.
    #[error("payment required: {0}")]
    PaymentRequired(String),

    /// The TMS refused the request body as too large (HTTP 413).
    #[error("content too large: {0}")]
    ContentTooLarge(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

impl TmsError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TmsError::DocumentArchived { .. } => FailureKind::DocumentArchived,
            TmsError::DocumentLocked { .. } => FailureKind::DocumentLocked,
            TmsError::PaymentRequired(_) => FailureKind::PaymentRequired,
            TmsError::ContentTooLarge(_) => FailureKind::ContentTooLarge,
            TmsError::Api { .. } | TmsError::Network(_) | TmsError::InvalidResponse(_) => {
                FailureKind::RemoteCall
            }
        }
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::profile::Profile;

/// An action a user or the notification path can take on a record.
///
/// Operations carry no remote results, so their preconditions can be checked
/// before anything is sent to the TMS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Upload,
    CheckUpload,
    EditSource,
    RequestTarget(String),
    CheckTarget(String),
    DownloadTarget(String),
    Cancel,
    CancelTarget(String),
    ChangeProfile(String),
    Disassociate,
}

impl Operation {
    /// The locale a target-scoped operation works on.
    pub fn locale(&self) -> Option<&str> {
        match self {
            Operation::RequestTarget(l)
            | Operation::CheckTarget(l)
            | Operation::DownloadTarget(l)
            | Operation::CancelTarget(l) => Some(l),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Upload => write!(f, "upload"),
            Operation::CheckUpload => write!(f, "check upload"),
            Operation::EditSource => write!(f, "edit source"),
            Operation::RequestTarget(l) => write!(f, "request {l}"),
            Operation::CheckTarget(l) => write!(f, "check {l}"),
            Operation::DownloadTarget(l) => write!(f, "download {l}"),
            Operation::Cancel => write!(f, "cancel"),
            Operation::CancelTarget(l) => write!(f, "cancel {l}"),
            Operation::ChangeProfile(p) => write!(f, "change profile to {p}"),
            Operation::Disassociate => write!(f, "disassociate"),
        }
    }
}

/// Something that happened to a document, carrying whatever the TMS returned.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Uploaded { document_id: String },
    SourceChecked { complete: bool },
    SourceEdited,
    TargetRequested(String),
    TargetChecked { locale: String, complete: bool },
    TargetDownloaded(String),
    Cancelled,
    TargetCancelled(String),
    ProfileChanged(Profile),
    Disassociated,
    SourceFailed(String),
    TargetFailed { locale: String, message: String },
    DocumentArchived,
    DocumentLocked { document_id: String },
}

impl Event {
    /// The gated operation this event completes. Failure and remote-state
    /// events have none and are never refused.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Event::Uploaded { .. } => Some(Operation::Upload),
            Event::SourceChecked { .. } => Some(Operation::CheckUpload),
            Event::SourceEdited => Some(Operation::EditSource),
            Event::TargetRequested(l) => Some(Operation::RequestTarget(l.clone())),
            Event::TargetChecked { locale, .. } => Some(Operation::CheckTarget(locale.clone())),
            Event::TargetDownloaded(l) => Some(Operation::DownloadTarget(l.clone())),
            Event::Cancelled => Some(Operation::Cancel),
            Event::TargetCancelled(l) => Some(Operation::CancelTarget(l.clone())),
            Event::ProfileChanged(p) => Some(Operation::ChangeProfile(p.id.clone())),
            Event::Disassociated => Some(Operation::Disassociate),
            Event::SourceFailed(_)
            | Event::TargetFailed { .. }
            | Event::DocumentArchived
            | Event::DocumentLocked { .. } => None,
        }
    }

    pub fn locale(&self) -> Option<&str> {
        match self {
            Event::TargetRequested(l)
            | Event::TargetDownloaded(l)
            | Event::TargetCancelled(l) => Some(l),
            Event::TargetChecked { locale, .. } | Event::TargetFailed { locale, .. } => Some(locale),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_map_to_operations() {
        assert_eq!(
            Event::Uploaded {
                document_id: "d".into()
            }
            .operation(),
            Some(Operation::Upload)
        );
        assert_eq!(
            Event::TargetChecked {
                locale: "es_MX".into(),
                complete: true
            }
            .operation(),
            Some(Operation::CheckTarget("es_MX".into()))
        );
        assert_eq!(
            Event::TargetFailed {
                locale: "es_MX".into(),
                message: "boom".into()
            }
            .operation(),
            None
        );
        assert_eq!(
            Event::ProfileChanged(Profile::disabled()).operation(),
            Some(Operation::ChangeProfile("disabled".into()))
        );
    }

    #[test]
    fn locales_of_target_scoped_values() {
        assert_eq!(Operation::DownloadTarget("de_DE".into()).locale(), Some("de_DE"));
        assert_eq!(Operation::Cancel.locale(), None);
        let failed = Event::TargetFailed {
            locale: "fr_FR".into(),
            message: "boom".into(),
        };
        assert_eq!(failed.locale(), Some("fr_FR"));
        assert_eq!(Event::SourceFailed("boom".into()).locale(), None);
    }

    #[test]
    fn operation_display() {
        assert_eq!(Operation::RequestTarget("es_MX".into()).to_string(), "request es_MX");
        assert_eq!(
            Operation::ChangeProfile("automatic".into()).to_string(),
            "change profile to automatic"
        );
    }
}

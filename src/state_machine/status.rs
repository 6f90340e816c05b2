use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status of a document source or of one of its targets.
///
/// Purely symbolic: only equality is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Untracked,
    Importing,
    Current,
    Edited,
    Pending,
    Request,
    Ready,
    Error,
    Cancelled,
    Disabled,
}

impl Status {
    pub const ALL: [Status; 10] = [
        Status::Untracked,
        Status::Importing,
        Status::Current,
        Status::Edited,
        Status::Pending,
        Status::Request,
        Status::Ready,
        Status::Error,
        Status::Cancelled,
        Status::Disabled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Untracked => "UNTRACKED",
            Status::Importing => "IMPORTING",
            Status::Current => "CURRENT",
            Status::Edited => "EDITED",
            Status::Pending => "PENDING",
            Status::Request => "REQUEST",
            Status::Ready => "READY",
            Status::Error => "ERROR",
            Status::Cancelled => "CANCELLED",
            Status::Disabled => "DISABLED",
        }
    }

    /// A target in one of these states has already been requested at least
    /// once, so a completed source import must not push it back to `REQUEST`.
    pub fn is_further_along_than_request(&self) -> bool {
        matches!(
            self,
            Status::Pending | Status::Ready | Status::Current | Status::Error | Status::Edited
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Status::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == upper)
            .ok_or_else(|| format!("unknown status: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display() {
        assert_eq!(Status::Untracked.to_string(), "UNTRACKED");
        assert_eq!(Status::Request.to_string(), "REQUEST");
        assert_eq!(Status::Cancelled.to_string(), "CANCELLED");
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("ready".parse::<Status>().unwrap(), Status::Ready);
        assert_eq!(" Disabled ".parse::<Status>().unwrap(), Status::Disabled);
        assert!("INTERMEDIATE".parse::<Status>().is_err());
    }

    #[test]
    fn status_serializes_as_constant_name() {
        let json = serde_json::to_string(&Status::Importing).unwrap();
        assert_eq!(json, r#""IMPORTING""#);
        let parsed: Status = serde_json::from_str(r#""EDITED""#).unwrap();
        assert_eq!(parsed, Status::Edited);
    }

    #[test]
    fn request_is_not_further_along_than_itself() {
        assert!(!Status::Request.is_further_along_than_request());
        assert!(!Status::Untracked.is_further_along_than_request());
        assert!(!Status::Cancelled.is_further_along_than_request());
        assert!(Status::Pending.is_further_along_than_request());
        assert!(Status::Current.is_further_along_than_request());
    }
}

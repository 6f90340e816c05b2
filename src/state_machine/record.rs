use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::Status;
use crate::profile::Profile;
use crate::unit::TranslatableUnit;

/// Identifies the local object a document belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub unit_type: String,
    pub unit_id: String,
}

impl RecordKey {
    pub fn new(unit_type: impl Into<String>, unit_id: impl Into<String>) -> Self {
        Self {
            unit_type: unit_type.into(),
            unit_id: unit_id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.unit_type, self.unit_id)
    }
}

impl FromStr for RecordKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((unit_type, unit_id)) if !unit_type.is_empty() && !unit_id.is_empty() => {
                Ok(Self::new(unit_type, unit_id))
            }
            _ => Err(format!("expected <type>:<id>, got {s:?}")),
        }
    }
}

/// Statuses remembered while a record sits under the `disabled` profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendedStatuses {
    pub source_status: Status,
    pub target_statuses: BTreeMap<String, Status>,
}

/// Local view of one TMS document and the status of each of its targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub key: RecordKey,
    pub document_id: Option<String>,
    pub source_locale: String,
    pub source_status: Status,
    pub target_statuses: BTreeMap<String, Status>,
    pub profile: String,
    #[serde(default)]
    pub job_id: Option<String>,
    /// Bumped by the store on every successful write.
    #[serde(default)]
    pub version: u64,
    /// Fingerprint of the content last sent to the TMS.
    #[serde(default)]
    pub source_hash: Option<String>,
    #[serde(default)]
    pub suspended: Option<SuspendedStatuses>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    /// A fresh, untracked record with one target per configured locale.
    pub fn create(unit: &dyn TranslatableUnit, profile: &Profile, target_locales: &[String]) -> Self {
        let source_locale = unit.locale().to_string();
        let target_statuses = target_locales
            .iter()
            .filter(|locale| **locale != source_locale)
            .map(|locale| {
                let status = if profile.locale_disabled(locale) {
                    Status::Disabled
                } else {
                    Status::Untracked
                };
                (locale.clone(), status)
            })
            .collect();

        Self {
            key: unit.key(),
            document_id: None,
            source_locale,
            source_status: Status::Untracked,
            target_statuses,
            profile: profile.id.clone(),
            job_id: None,
            version: 0,
            source_hash: None,
            suspended: None,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Use `locale` as the source locale when the unit carried none.
    pub fn with_default_locale(mut self, locale: &str) -> Self {
        if self.source_locale.is_empty() {
            self.source_locale = locale.to_string();
            self.target_statuses.remove(locale);
        }
        self
    }

    /// Forget the TMS document. Disabled targets stay disabled.
    pub fn disassociate(&mut self) {
        self.document_id = None;
        self.source_status = Status::Untracked;
        for status in self.target_statuses.values_mut() {
            if *status != Status::Disabled {
                *status = Status::Untracked;
            }
        }
        self.source_hash = None;
        self.suspended = None;
        self.last_error = None;
    }

    pub fn is_tracked(&self) -> bool {
        self.document_id.is_some()
    }

    pub fn target_status(&self, locale: &str) -> Option<Status> {
        self.target_statuses.get(locale).copied()
    }

    /// Locales whose target currently has `status`.
    pub fn locales_with(&self, status: Status) -> Vec<String> {
        self.target_statuses
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(locale, _)| locale.clone())
            .collect()
    }

    /// A record has a document id exactly when its source is not `UNTRACKED`.
    pub fn is_consistent(&self) -> bool {
        self.document_id.is_none() == (self.source_status == Status::Untracked)
    }
}

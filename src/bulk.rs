//! Bulk operations over many records.
//!
//! Each record is handled on its own: one failure never stops the batch, and
//! every record gets a line in the [`BulkReport`].

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::FailureKind;
use crate::state_machine::RecordKey;
use crate::tms::TmsClient;
use crate::tracker::{Outcome, Tracker};

pub const SUMMARY: &str = "Operations completed.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOperation {
    Upload { job_id: Option<String> },
    CheckUpload,
    RequestTranslations,
    RequestTranslation(String),
    CheckTranslations,
    CheckTranslation(String),
    /// All ready targets, or one locale.
    Download(Option<String>),
    /// The whole document, or one locale.
    Cancel(Option<String>),
    ChangeProfile(String),
    Disassociate,
}

impl FromStr for BulkOperation {
    type Err = String;

    /// Parses `name` or `name:argument`, e.g. `download:es_MX`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, arg) = match s.split_once(':') {
            Some((name, arg)) if !arg.is_empty() => (name, Some(arg.to_string())),
            Some((name, _)) => return Err(format!("missing argument for operation: {name}")),
            None => (s, None),
        };
        let need = |arg: Option<String>| arg.ok_or_else(|| format!("operation {name} needs an argument"));

        match name {
            "upload" => Ok(BulkOperation::Upload { job_id: arg }),
            "check_upload" => Ok(BulkOperation::CheckUpload),
            "request_translations" => Ok(BulkOperation::RequestTranslations),
            "request_translation" => Ok(BulkOperation::RequestTranslation(need(arg)?)),
            "check_translations" => Ok(BulkOperation::CheckTranslations),
            "check_translation" => Ok(BulkOperation::CheckTranslation(need(arg)?)),
            "download" => Ok(BulkOperation::Download(arg)),
            "cancel" => Ok(BulkOperation::Cancel(arg)),
            "change_profile" => Ok(BulkOperation::ChangeProfile(need(arg)?)),
            "disassociate" => Ok(BulkOperation::Disassociate),
            other => Err(format!("unknown bulk operation: {other}")),
        }
    }
}

impl fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkOperation::Upload { job_id: None } => write!(f, "upload"),
            BulkOperation::Upload { job_id: Some(job) } => write!(f, "upload:{job}"),
            BulkOperation::CheckUpload => write!(f, "check_upload"),
            BulkOperation::RequestTranslations => write!(f, "request_translations"),
            BulkOperation::RequestTranslation(l) => write!(f, "request_translation:{l}"),
            BulkOperation::CheckTranslations => write!(f, "check_translations"),
            BulkOperation::CheckTranslation(l) => write!(f, "check_translation:{l}"),
            BulkOperation::Download(None) => write!(f, "download"),
            BulkOperation::Download(Some(l)) => write!(f, "download:{l}"),
            BulkOperation::Cancel(None) => write!(f, "cancel"),
            BulkOperation::Cancel(Some(l)) => write!(f, "cancel:{l}"),
            BulkOperation::ChangeProfile(p) => write!(f, "change_profile:{p}"),
            BulkOperation::Disassociate => write!(f, "disassociate"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Done { message: String },
    Skipped { reason: String },
    Failed { kind: FailureKind, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordResult {
    pub key: RecordKey,
    #[serde(flatten)]
    pub outcome: RecordOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkReport {
    pub operation: String,
    pub results: Vec<RecordResult>,
}

impl BulkReport {
    pub fn summary(&self) -> &'static str {
        SUMMARY
    }

    pub fn done(&self) -> usize {
        self.count(|o| matches!(o, RecordOutcome::Done { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, RecordOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RecordOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&RecordOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

impl<C: TmsClient> Tracker<C> {
    /// Run `operation` over `keys`, calling `progress` after each record.
    pub async fn apply_bulk_operation_with(
        &self,
        keys: &[RecordKey],
        operation: &BulkOperation,
        mut progress: impl FnMut(&RecordResult),
    ) -> BulkReport {
        let mut report = BulkReport {
            operation: operation.to_string(),
            results: Vec::with_capacity(keys.len()),
        };

        for key in keys {
            let outcome = match self.apply_one(key, operation).await {
                Ok(Outcome::Done(message)) => RecordOutcome::Done { message },
                Ok(Outcome::Skipped(reason)) => RecordOutcome::Skipped {
                    reason: reason.to_string(),
                },
                Err(err) => {
                    warn!(record = %key, %operation, error = %err, "bulk operation failed for record");
                    RecordOutcome::Failed {
                        kind: err.kind(),
                        message: err.to_string(),
                    }
                }
            };
            let result = RecordResult {
                key: key.clone(),
                outcome,
            };
            progress(&result);
            report.results.push(result);
        }

        info!(
            %operation,
            done = report.done(),
            skipped = report.skipped(),
            failed = report.failed(),
            "{SUMMARY}"
        );
        report
    }

    pub async fn apply_bulk_operation(
        &self,
        keys: &[RecordKey],
        operation: &BulkOperation,
    ) -> BulkReport {
        self.apply_bulk_operation_with(keys, operation, |_| {}).await
    }

    async fn apply_one(
        &self,
        key: &RecordKey,
        operation: &BulkOperation,
    ) -> Result<Outcome, crate::error::TrackerError> {
        match operation {
            BulkOperation::Upload { job_id } => self.upload_with_job(key, job_id.as_deref()).await,
            BulkOperation::CheckUpload => self.check_upload(key).await,
            BulkOperation::RequestTranslations => self.request_translations(key).await,
            BulkOperation::RequestTranslation(locale) => self.request_target(key, locale).await,
            BulkOperation::CheckTranslations => self.check_translations(key).await,
            BulkOperation::CheckTranslation(locale) => self.check_target(key, locale).await,
            BulkOperation::Download(None) => self.download_all(key).await,
            BulkOperation::Download(Some(locale)) => self.download(key, locale).await,
            BulkOperation::Cancel(None) => self.cancel(key).await,
            BulkOperation::Cancel(Some(locale)) => self.cancel_target(key, locale).await,
            BulkOperation::ChangeProfile(profile) => self.change_profile(key, profile),
            BulkOperation::Disassociate => self.disassociate(key),
        }
    }
}

use std::fmt;

use super::event::{Event, Operation};
use super::record::{DocumentRecord, SuspendedStatuses};
use super::status::Status;
use crate::profile::Profile;

/// Why an event left a record untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The record has no TMS document yet.
    NotTracked,
    ProfileDisabled,
    /// The locale is disabled by the profile's language overrides.
    LocaleDisabled(String),
    UnknownLocale(String),
    /// The remote side has not finished yet.
    InProgress,
    /// Downloading a target that is already current.
    AlreadyCurrent(String),
    SameProfile,
    /// The TMS already has this content.
    AlreadyUploaded,
    /// No target is in a state the operation applies to.
    NothingToDo,
    InvalidStatus { operation: Operation, status: Status },
}

impl SkipReason {
    /// Outcomes that mean "nothing left to do" rather than "not allowed".
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            SkipReason::LocaleDisabled(_)
                | SkipReason::InProgress
                | SkipReason::AlreadyCurrent(_)
                | SkipReason::SameProfile
                | SkipReason::AlreadyUploaded
                | SkipReason::NothingToDo
        )
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotTracked => write!(f, "document has not been uploaded"),
            SkipReason::ProfileDisabled => write!(f, "translation is disabled for this content"),
            SkipReason::LocaleDisabled(l) => write!(f, "locale {l} is disabled"),
            SkipReason::UnknownLocale(l) => write!(f, "locale {l} is not a target"),
            SkipReason::InProgress => write!(f, "still in progress"),
            SkipReason::AlreadyCurrent(l) => write!(f, "translation {l} is already current"),
            SkipReason::SameProfile => write!(f, "profile unchanged"),
            SkipReason::AlreadyUploaded => write!(f, "source is already uploaded"),
            SkipReason::NothingToDo => write!(f, "no translation in a matching state"),
            SkipReason::InvalidStatus { operation, status } => {
                write!(f, "cannot {operation} while status is {status}")
            }
        }
    }
}

/// The result of applying an event to a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(DocumentRecord),
    Unchanged { reason: SkipReason },
}

impl Transition {
    /// The record after the transition, falling back to `original`.
    pub fn into_record(self, original: &DocumentRecord) -> DocumentRecord {
        match self {
            Transition::Applied(record) => record,
            Transition::Unchanged { .. } => original.clone(),
        }
    }
}

/// Pure status transition rules for document records.
pub struct TransitionEngine;

impl TransitionEngine {
    /// Whether `operation` may run on `record` under `profile` (the record's
    /// current profile).
    pub fn check(
        record: &DocumentRecord,
        operation: &Operation,
        profile: &Profile,
    ) -> Result<(), SkipReason> {
        let invalid = |status: Status| SkipReason::InvalidStatus {
            operation: operation.clone(),
            status,
        };

        if let Some(locale) = operation.locale() {
            let target = Self::target_status(record, locale, profile)?;
            if !record.is_tracked() {
                return Err(SkipReason::NotTracked);
            }
            return match operation {
                Operation::RequestTarget(_) => {
                    if !matches!(record.source_status, Status::Current | Status::Edited) {
                        return Err(invalid(record.source_status));
                    }
                    match target {
                        Status::Request | Status::Untracked | Status::Error | Status::Cancelled => {
                            Ok(())
                        }
                        other => Err(invalid(other)),
                    }
                }
                Operation::CheckTarget(_) => match target {
                    Status::Pending => Ok(()),
                    other => Err(invalid(other)),
                },
                Operation::DownloadTarget(l) => match target {
                    Status::Ready | Status::Error => Ok(()),
                    Status::Current => Err(SkipReason::AlreadyCurrent(l.clone())),
                    other => Err(invalid(other)),
                },
                Operation::CancelTarget(_) => match target {
                    Status::Cancelled => Err(invalid(target)),
                    _ => Ok(()),
                },
                _ => Ok(()),
            };
        }

        match operation {
            Operation::Upload => {
                if profile.is_disabled() {
                    Err(SkipReason::ProfileDisabled)
                } else if record.source_status == Status::Disabled {
                    Err(invalid(Status::Disabled))
                } else {
                    Ok(())
                }
            }
            Operation::CheckUpload => match record.source_status {
                _ if !record.is_tracked() => Err(SkipReason::NotTracked),
                Status::Importing => Ok(()),
                other => Err(invalid(other)),
            },
            Operation::EditSource => match record.source_status {
                _ if !record.is_tracked() => Err(SkipReason::NotTracked),
                Status::Current | Status::Importing | Status::Error => Ok(()),
                other => Err(invalid(other)),
            },
            Operation::Cancel => match record.source_status {
                _ if !record.is_tracked() => Err(SkipReason::NotTracked),
                Status::Cancelled => Err(invalid(Status::Cancelled)),
                _ => Ok(()),
            },
            Operation::ChangeProfile(id) if *id == record.profile => Err(SkipReason::SameProfile),
            _ => Ok(()),
        }
    }

    /// Apply `event` to `record`. `profile` is the record's current profile;
    /// a profile change carries the new one inside the event.
    pub fn apply(record: &DocumentRecord, event: &Event, profile: &Profile) -> Transition {
        if let Some(operation) = event.operation() {
            if let Err(reason) = Self::check(record, &operation, profile) {
                return Transition::Unchanged { reason };
            }
        }

        let mut next = record.clone();
        match event {
            Event::Uploaded { document_id } => {
                let fresh = record.document_id.is_none() || record.source_status == Status::Cancelled;
                if fresh {
                    next.document_id = Some(document_id.clone());
                }
                if record.source_status == Status::Cancelled {
                    Self::reset_targets(&mut next, Status::Untracked);
                }
                next.source_status = Status::Importing;
                next.last_error = None;
            }
            Event::SourceChecked { complete: false } => {
                return Transition::Unchanged {
                    reason: SkipReason::InProgress,
                };
            }
            Event::SourceChecked { complete: true } => {
                next.source_status = Status::Current;
                for (locale, status) in next.target_statuses.iter_mut() {
                    if profile.locale_disabled(locale) || *status == Status::Disabled {
                        continue;
                    }
                    if !status.is_further_along_than_request() {
                        *status = Status::Request;
                    }
                }
                next.last_error = None;
            }
            Event::SourceEdited => {
                next.source_status = Status::Edited;
                for status in next.target_statuses.values_mut() {
                    if matches!(status, Status::Current | Status::Ready) {
                        *status = Status::Pending;
                    }
                }
            }
            Event::TargetRequested(locale) => {
                next.target_statuses.insert(locale.clone(), Status::Pending);
            }
            Event::TargetChecked {
                complete: false, ..
            } => {
                return Transition::Unchanged {
                    reason: SkipReason::InProgress,
                };
            }
            Event::TargetChecked {
                locale,
                complete: true,
            } => {
                next.target_statuses.insert(locale.clone(), Status::Ready);
            }
            Event::TargetDownloaded(locale) => {
                next.target_statuses.insert(locale.clone(), Status::Current);
                next.last_error = None;
            }
            Event::Cancelled => {
                next.source_status = Status::Cancelled;
                Self::reset_targets(&mut next, Status::Cancelled);
            }
            Event::TargetCancelled(locale) => {
                next.target_statuses.insert(locale.clone(), Status::Cancelled);
            }
            Event::ProfileChanged(new_profile) => {
                Self::change_profile(&mut next, profile, new_profile);
            }
            Event::Disassociated | Event::DocumentArchived => {
                next.disassociate();
            }
            Event::SourceFailed(message) => {
                if !record.is_tracked() {
                    return Transition::Unchanged {
                        reason: SkipReason::NotTracked,
                    };
                }
                next.source_status = Status::Error;
                next.last_error = Some(message.clone());
            }
            Event::TargetFailed { locale, message } => {
                if let Err(reason) = Self::target_status(record, locale, profile) {
                    return Transition::Unchanged { reason };
                }
                if !record.is_tracked() {
                    return Transition::Unchanged {
                        reason: SkipReason::NotTracked,
                    };
                }
                next.target_statuses.insert(locale.clone(), Status::Error);
                next.last_error = Some(message.clone());
            }
            Event::DocumentLocked { document_id } => {
                if !record.is_tracked() {
                    return Transition::Unchanged {
                        reason: SkipReason::NotTracked,
                    };
                }
                next.document_id = Some(document_id.clone());
                next.source_status = Status::Edited;
            }
        }

        Transition::Applied(next)
    }

    /// Status of a target that the profile allows to move.
    fn target_status(
        record: &DocumentRecord,
        locale: &str,
        profile: &Profile,
    ) -> Result<Status, SkipReason> {
        let status = record
            .target_status(locale)
            .ok_or_else(|| SkipReason::UnknownLocale(locale.to_string()))?;
        if status == Status::Disabled || profile.locale_disabled(locale) {
            return Err(SkipReason::LocaleDisabled(locale.to_string()));
        }
        Ok(status)
    }

    fn reset_targets(record: &mut DocumentRecord, to: Status) {
        for status in record.target_statuses.values_mut() {
            if *status != Status::Disabled {
                *status = to;
            }
        }
    }

    fn change_profile(record: &mut DocumentRecord, old: &Profile, new: &Profile) {
        record.profile = new.id.clone();

        if new.is_disabled() {
            record.suspended = Some(SuspendedStatuses {
                source_status: record.source_status,
                target_statuses: record.target_statuses.clone(),
            });
            if record.is_tracked() {
                record.source_status = Status::Disabled;
            }
            for status in record.target_statuses.values_mut() {
                *status = Status::Disabled;
            }
            return;
        }

        if old.is_disabled() || record.source_status == Status::Disabled {
            let before = match record.suspended.take() {
                Some(suspended) => {
                    record.target_statuses = suspended.target_statuses;
                    suspended.source_status
                }
                None => Status::Edited,
            };
            // A cancelled document keeps its cancellation so the next upload
            // starts a fresh one. Anything live needs a re-upload first.
            record.source_status = match before {
                _ if !record.is_tracked() => Status::Untracked,
                Status::Cancelled | Status::Untracked => before,
                _ => Status::Edited,
            };
        }

        let source_current = record.source_status == Status::Current;
        for (locale, status) in record.target_statuses.iter_mut() {
            if new.locale_disabled(locale) {
                *status = Status::Disabled;
            } else if *status == Status::Disabled {
                *status = if source_current {
                    Status::Request
                } else {
                    Status::Untracked
                };
            }
        }
    }
}

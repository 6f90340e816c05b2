//! The document status tracker.
//!
//! [`Tracker`] ties the pure transition rules to a TMS client, the record
//! store, profiles and the download queue. Every operation follows the same
//! shape: check the precondition locally, talk to the TMS, then commit the
//! resulting event with a compare-and-swap on the record.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::{FailureKind, StoreError, TrackerError};
use crate::profile::{MANUAL, Profile, ProfileRegistry, ProfileResolver, ProfileSettings};
use crate::queue::{MemoryQueue, RetryConfig, TaskQueue};
use crate::state_machine::{
    DocumentRecord, Event, Operation, RecordKey, SkipReason, Status, Transition,
    TransitionEngine,
};
use crate::store::{MemoryStore, Snapshot};
use crate::tms::{SourceDocument, TmsClient, TmsError};
use crate::unit::{TranslatableUnit, Unit, fingerprint, merge_translation, source_document};

const MAX_COMMIT_ATTEMPTS: u32 = 5;

/// What an operation did to a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done(String),
    Skipped(SkipReason),
}

impl Outcome {
    pub fn message(&self) -> String {
        match self {
            Outcome::Done(message) => message.clone(),
            Outcome::Skipped(reason) => format!("Skipped: {reason}."),
        }
    }
}

/// Result of a committed event.
#[derive(Debug, Clone)]
enum Committed {
    Applied(DocumentRecord),
    Unchanged(SkipReason),
}

enum Gate {
    Open(DocumentRecord),
    Closed(SkipReason),
}

/// Tracker-wide settings, usually built by
/// [`TrackerConfig::tracker_settings`](crate::config::TrackerConfig::tracker_settings).
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// Project notifications must come from; empty accepts any.
    pub project_id: String,
    /// Source locale for units that do not name their own.
    pub source_locale: String,
    /// Locales every new record gets a target entry for. The unit's own
    /// locale is skipped.
    pub target_locales: Vec<String>,
    /// Backoff for queued downloads that failed.
    pub retry: RetryConfig,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            source_locale: "en_US".to_string(),
            target_locales: Vec::new(),
            retry: RetryConfig::default(),
        }
    }
}

/// Counters from one run of the download worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueReport {
    pub processed: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub requeued: usize,
    pub failed: usize,
}

/// Keeps local records in step with the documents of one TMS account.
///
/// All methods take `&self`; records are updated with a compare-and-swap on
/// their version, so one tracker can be shared between tasks.
pub struct Tracker<C> {
    client: C,
    store: MemoryStore,
    queue: Box<dyn TaskQueue + Send + Sync>,
    profiles: ProfileRegistry,
    resolver: Box<dyn ProfileResolver + Send + Sync>,
    pub(crate) settings: TrackerSettings,
    account_blocked: AtomicBool,
}

impl<C: TmsClient> Tracker<C> {
    /// A tracker with an empty store and queue, only the built-in profiles
    /// and `manual` as the profile for every unit.
    pub fn new(client: C, settings: TrackerSettings) -> Self {
        Self {
            client,
            store: MemoryStore::new(),
            queue: Box::new(MemoryQueue::new()),
            profiles: ProfileRegistry::default(),
            resolver: Box::new(ProfileSettings::new(MANUAL)),
            settings,
            account_blocked: AtomicBool::new(false),
        }
    }

    pub fn with_store(mut self, store: MemoryStore) -> Self {
        self.store = store;
        self
    }

    pub fn with_queue(mut self, queue: impl TaskQueue + Send + Sync + 'static) -> Self {
        self.queue = Box::new(queue);
        self
    }

    pub fn with_profiles(mut self, profiles: ProfileRegistry) -> Self {
        self.profiles = profiles;
        self
    }

    /// How new units pick their profile.
    pub fn with_resolver(mut self, resolver: impl ProfileResolver + Send + Sync + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Rebuild a tracker's store, queue and account block from a persisted
    /// snapshot.
    pub fn with_snapshot(self, snapshot: &Snapshot) -> Self {
        self.account_blocked
            .store(snapshot.account_blocked, Ordering::SeqCst);
        self.with_store(MemoryStore::from_snapshot(snapshot))
            .with_queue(MemoryQueue::from_tasks(snapshot.tasks.iter().cloned()))
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn queue(&self) -> &dyn TaskQueue {
        self.queue.as_ref()
    }

    pub fn profiles(&self) -> &ProfileRegistry {
        &self.profiles
    }

    /// Everything needed to pick up where this tracker left off.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            tasks: self.queue.pending(),
            account_blocked: self.is_account_blocked(),
            ..self.store.snapshot()
        }
    }

    /// Source status of a record, or `RecordNotFound`.
    pub fn get_source_status(&self, key: &RecordKey) -> Result<Status, TrackerError> {
        Ok(self.record(key)?.source_status)
    }

    /// Status of one target; `None` when the locale has no entry.
    pub fn get_target_status(
        &self,
        key: &RecordKey,
        locale: &str,
    ) -> Result<Option<Status>, TrackerError> {
        Ok(self.record(key)?.target_status(locale))
    }

    /// True after the TMS answered "payment required". Remote operations
    /// fail with [`TrackerError::AccountBlocked`] until
    /// [`resume_account`](Self::resume_account).
    pub fn is_account_blocked(&self) -> bool {
        self.account_blocked.load(Ordering::SeqCst)
    }

    /// Lift the payment block once the account has been settled.
    pub fn resume_account(&self) {
        if self.account_blocked.swap(false, Ordering::SeqCst) {
            info!("account block lifted");
        }
    }

    pub(crate) fn record(&self, key: &RecordKey) -> Result<DocumentRecord, TrackerError> {
        self.store
            .get(key)
            .ok_or_else(|| TrackerError::RecordNotFound(key.clone()))
    }

    pub(crate) fn profile_of(&self, record: &DocumentRecord) -> Result<&Profile, TrackerError> {
        self.profiles.get(&record.profile)
    }

    /// "node Llamas are cool", or the key when the unit is gone.
    pub(crate) fn label(&self, key: &RecordKey) -> String {
        self.store
            .unit(key)
            .map(|u| format!("{} {}", u.unit_type(), u.title()))
            .unwrap_or_else(|| key.to_string())
    }

    fn ensure_account(&self) -> Result<(), TrackerError> {
        if self.is_account_blocked() {
            return Err(TrackerError::AccountBlocked);
        }
        Ok(())
    }

    fn gate(&self, key: &RecordKey, operation: &Operation) -> Result<Gate, TrackerError> {
        let record = self.record(key)?;
        let profile = self.profile_of(&record)?;
        Ok(match TransitionEngine::check(&record, operation, profile) {
            Ok(()) => Gate::Open(record),
            Err(reason) => Gate::Closed(reason),
        })
    }

    fn skipped(&self, key: &RecordKey, operation: &Operation, reason: SkipReason) -> Outcome {
        if reason.is_benign() {
            debug!(record = %key, %operation, %reason, "nothing to do");
        } else {
            warn!(record = %key, %operation, %reason, "operation skipped");
        }
        Outcome::Skipped(reason)
    }

    fn commit(&self, key: &RecordKey, event: &Event) -> Result<Committed, TrackerError> {
        self.commit_with(key, event, |_| {})
    }

    /// Apply `event` with optimistic concurrency: re-read and re-apply on
    /// conflict. `finish` adjusts bookkeeping fields of an applied record.
    fn commit_with(
        &self,
        key: &RecordKey,
        event: &Event,
        finish: impl Fn(&mut DocumentRecord),
    ) -> Result<Committed, TrackerError> {
        let mut attempt = 1;
        loop {
            let current = self.record(key)?;
            let profile = self.profile_of(&current)?;
            let mut next = match TransitionEngine::apply(&current, event, profile) {
                Transition::Applied(next) => next,
                Transition::Unchanged { reason } => return Ok(Committed::Unchanged(reason)),
            };
            finish(&mut next);
            match self.store.replace(next, current.version) {
                Ok(saved) => {
                    debug!(
                        record = %key,
                        source = %saved.source_status,
                        version = saved.version,
                        "committed {event:?}"
                    );
                    return Ok(Committed::Applied(saved));
                }
                Err(StoreError::Conflict { .. }) if attempt < MAX_COMMIT_ATTEMPTS => {
                    debug!(record = %key, attempt, "concurrent update, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Commit an event that did not come from a local action, such as a TMS
    /// notification.
    pub(crate) fn apply_event(&self, key: &RecordKey, event: &Event) -> Result<Transition, TrackerError> {
        Ok(match self.commit(key, event)? {
            Committed::Applied(record) => Transition::Applied(record),
            Committed::Unchanged(reason) => {
                debug!(record = %key, %reason, "notification left record unchanged");
                Transition::Unchanged { reason }
            }
        })
    }

    fn amend(&self, key: &RecordKey, change: impl Fn(&mut DocumentRecord)) -> Result<(), TrackerError> {
        let mut attempt = 1;
        loop {
            let current = self.record(key)?;
            let mut next = current.clone();
            change(&mut next);
            match self.store.replace(next, current.version) {
                Ok(_) => return Ok(()),
                Err(StoreError::Conflict { .. }) if attempt < MAX_COMMIT_ATTEMPTS => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Record a remote failure on the affected scope and hand the error back.
    fn remote_failure(&self, key: &RecordKey, locale: Option<&str>, err: TmsError) -> TrackerError {
        let message = err.to_string();
        let event = match &err {
            TmsError::DocumentArchived { .. } => Event::DocumentArchived,
            TmsError::DocumentLocked {
                next_document_id, ..
            } => Event::DocumentLocked {
                document_id: next_document_id.clone(),
            },
            TmsError::PaymentRequired(_) => {
                self.account_blocked.store(true, Ordering::SeqCst);
                Event::SourceFailed(message.clone())
            }
            _ => match locale {
                Some(locale) => Event::TargetFailed {
                    locale: locale.to_string(),
                    message: message.clone(),
                },
                None => Event::SourceFailed(message.clone()),
            },
        };

        match self.commit(key, &event) {
            Ok(Committed::Applied(_)) => {}
            Ok(Committed::Unchanged(_)) => {
                if let Err(e) = self.amend(key, |r| r.last_error = Some(message.clone())) {
                    warn!(record = %key, error = %e, "could not record failure");
                }
            }
            Err(e) => warn!(record = %key, error = %e, "could not record failure"),
        }

        error!(record = %key, locale, kind = %err.kind(), "{message}");
        err.into()
    }

    /// Register a save of a local unit.
    ///
    /// Creates the record on first save, notices edits of tracked content and
    /// uploads on its own when the profile says so.
    pub async fn save_unit(&self, unit: impl Into<Unit>) -> Result<Outcome, TrackerError> {
        let unit = unit.into();
        let key = unit.key();
        let hash = fingerprint(&unit);
        self.store.put_unit(unit.clone());

        let record = match self.store.get(&key) {
            Some(record) => record,
            None => {
                let profile = self.profiles.get(&self.resolver.resolve(&unit))?;
                let record = DocumentRecord::create(&unit, profile, &self.settings.target_locales)
                    .with_default_locale(&self.settings.source_locale);
                info!(record = %key, profile = %profile.id, "tracking new unit");
                self.store.insert(record)?
            }
        };

        if record.source_hash.as_deref() == Some(hash.as_str()) {
            return Ok(Outcome::Skipped(SkipReason::AlreadyUploaded));
        }

        if record.is_tracked() {
            if let Committed::Applied(_) = self.commit(&key, &Event::SourceEdited)? {
                info!(record = %key, "source edited");
            }
        }

        let profile = self.profile_of(&record)?;
        if profile.auto_upload && !profile.is_disabled() {
            return self.upload(&key).await;
        }
        Ok(Outcome::Done(format!("{} saved.", self.label(&key))))
    }

    /// Remove the local unit and forget its document.
    pub fn delete_unit(&self, key: &RecordKey) -> Result<Outcome, TrackerError> {
        self.store.remove_unit(key);
        self.disassociate(key)
    }

    /// Upload the source, or update the existing document when it has one.
    pub async fn upload(&self, key: &RecordKey) -> Result<Outcome, TrackerError> {
        self.upload_with_job(key, None).await
    }

    /// Upload (or re-upload) the source, tagging the document with `job_id`.
    pub async fn upload_with_job(
        &self,
        key: &RecordKey,
        job_id: Option<&str>,
    ) -> Result<Outcome, TrackerError> {
        let operation = Operation::Upload;
        self.ensure_account()?;
        let record = match self.gate(key, &operation)? {
            Gate::Open(record) => record,
            Gate::Closed(reason) => return Ok(self.skipped(key, &operation, reason)),
        };
        let unit = self
            .store
            .unit(key)
            .ok_or_else(|| TrackerError::UnitNotFound(key.clone()))?;
        let hash = fingerprint(&unit);

        let unchanged = record.source_hash.as_deref() == Some(hash.as_str());
        if record.source_status == Status::Importing
            || (record.source_status == Status::Current && unchanged)
        {
            return Ok(self.skipped(key, &operation, SkipReason::AlreadyUploaded));
        }

        let job_id = job_id.map(str::to_string).or(record.job_id.clone());
        let doc = SourceDocument {
            locale: record.source_locale.clone(),
            ..source_document(&unit, job_id.as_deref())
        };

        let document_id = match &record.document_id {
            Some(id) if record.source_status != Status::Cancelled => {
                self.client
                    .update(id, &doc)
                    .await
                    .map_err(|e| self.remote_failure(key, None, e))?;
                id.clone()
            }
            _ => self
                .client
                .upload(&doc)
                .await
                .map_err(|e| self.remote_failure(key, None, e))?,
        };

        let event = Event::Uploaded { document_id };
        match self.commit_with(key, &event, |r| {
            r.source_hash = Some(hash.clone());
            r.job_id = job_id.clone();
        })? {
            Committed::Applied(saved) => {
                info!(
                    record = %key,
                    document_id = saved.document_id.as_deref().unwrap_or_default(),
                    "document uploaded"
                );
                Ok(Outcome::Done(format!("{} uploaded.", self.label(key))))
            }
            Committed::Unchanged(reason) => Ok(self.skipped(key, &operation, reason)),
        }
    }

    /// Ask the TMS whether an importing source has finished. Automatic
    /// profiles request their targets once it has.
    pub async fn check_upload(&self, key: &RecordKey) -> Result<Outcome, TrackerError> {
        let operation = Operation::CheckUpload;
        self.ensure_account()?;
        let record = match self.gate(key, &operation)? {
            Gate::Open(record) => record,
            Gate::Closed(reason) => return Ok(self.skipped(key, &operation, reason)),
        };
        let Some(document_id) = record.document_id else {
            return Ok(self.skipped(key, &operation, SkipReason::NotTracked));
        };

        let complete = self
            .client
            .check_source_status(&document_id)
            .await
            .map_err(|e| self.remote_failure(key, None, e))?;

        match self.commit(key, &Event::SourceChecked { complete })? {
            Committed::Applied(_) => {
                info!(record = %key, "source import complete");
                let requested = self.auto_request(key).await;
                let mut message = format!("{} import complete.", self.label(key));
                if !requested.is_empty() {
                    message.push_str(&format!(" Requested: {}.", requested.join(", ")));
                }
                Ok(Outcome::Done(message))
            }
            Committed::Unchanged(reason) => Ok(self.skipped(key, &operation, reason)),
        }
    }

    /// Request every target the profile requests on its own. Failures are
    /// logged and recorded on the target; the requested locales are returned.
    pub(crate) async fn auto_request(&self, key: &RecordKey) -> Vec<String> {
        let Ok(record) = self.record(key) else {
            return Vec::new();
        };
        let Ok(profile) = self.profile_of(&record) else {
            return Vec::new();
        };
        let locales: Vec<String> = self
            .requestable_locales(&record, profile)
            .into_iter()
            .filter(|locale| profile.auto_request_for(locale))
            .collect();

        let mut requested = Vec::new();
        for locale in locales {
            match self.request_target(key, &locale).await {
                Ok(Outcome::Done(_)) => requested.push(locale),
                Ok(Outcome::Skipped(_)) => {}
                Err(e) => warn!(record = %key, %locale, error = %e, "automatic request failed"),
            }
        }
        requested
    }

    fn requestable_locales(&self, record: &DocumentRecord, profile: &Profile) -> Vec<String> {
        self.locales_passing(record, profile, Operation::RequestTarget)
    }

    fn locales_passing(
        &self,
        record: &DocumentRecord,
        profile: &Profile,
        operation: fn(String) -> Operation,
    ) -> Vec<String> {
        record
            .target_statuses
            .keys()
            .filter(|locale| {
                TransitionEngine::check(record, &operation((*locale).clone()), profile).is_ok()
            })
            .cloned()
            .collect()
    }

    /// Ask the TMS to translate the source into `locale`.
    pub async fn request_target(&self, key: &RecordKey, locale: &str) -> Result<Outcome, TrackerError> {
        let operation = Operation::RequestTarget(locale.to_string());
        self.ensure_account()?;
        let record = match self.gate(key, &operation)? {
            Gate::Open(record) => record,
            Gate::Closed(reason) => return Ok(self.skipped(key, &operation, reason)),
        };
        let Some(document_id) = record.document_id else {
            return Ok(self.skipped(key, &operation, SkipReason::NotTracked));
        };

        self.client
            .add_target(&document_id, locale)
            .await
            .map_err(|e| self.remote_failure(key, Some(locale), e))?;

        match self.commit(key, &Event::TargetRequested(locale.to_string()))? {
            Committed::Applied(_) => {
                info!(record = %key, locale, "translation requested");
                Ok(Outcome::Done(format!(
                    "Translation to {locale} of {} requested.",
                    self.label(key)
                )))
            }
            Committed::Unchanged(reason) => Ok(self.skipped(key, &operation, reason)),
        }
    }

    /// Poll one target. A complete target becomes `READY`.
    pub async fn check_target(&self, key: &RecordKey, locale: &str) -> Result<Outcome, TrackerError> {
        let operation = Operation::CheckTarget(locale.to_string());
        self.ensure_account()?;
        let record = match self.gate(key, &operation)? {
            Gate::Open(record) => record,
            Gate::Closed(reason) => return Ok(self.skipped(key, &operation, reason)),
        };
        let Some(document_id) = record.document_id else {
            return Ok(self.skipped(key, &operation, SkipReason::NotTracked));
        };

        let progress = self
            .client
            .check_target_status(&document_id, locale)
            .await
            .map_err(|e| self.remote_failure(key, Some(locale), e))?;

        let event = Event::TargetChecked {
            locale: locale.to_string(),
            complete: progress >= 100,
        };
        match self.commit(key, &event)? {
            Committed::Applied(_) => {
                info!(record = %key, locale, "translation ready");
                Ok(Outcome::Done(format!(
                    "Translation to {locale} of {} is ready for download.",
                    self.label(key)
                )))
            }
            Committed::Unchanged(reason) => {
                debug!(record = %key, locale, progress, "translation in progress");
                Ok(self.skipped(key, &operation, reason))
            }
        }
    }

    /// Fetch a ready translation, validate it against the unit's fields and
    /// store it. Fails with `ContentTooLarge` when a value does not fit.
    pub async fn download(&self, key: &RecordKey, locale: &str) -> Result<Outcome, TrackerError> {
        let operation = Operation::DownloadTarget(locale.to_string());
        self.ensure_account()?;
        let record = match self.gate(key, &operation)? {
            Gate::Open(record) => record,
            Gate::Closed(reason) => return Ok(self.skipped(key, &operation, reason)),
        };
        let Some(document_id) = record.document_id else {
            return Ok(self.skipped(key, &operation, SkipReason::NotTracked));
        };
        let unit = self
            .store
            .unit(key)
            .ok_or_else(|| TrackerError::UnitNotFound(key.clone()))?;

        let translated = self
            .client
            .download(&document_id, locale)
            .await
            .map_err(|e| self.remote_failure(key, Some(locale), e))?;

        let fields = match merge_translation(&unit, locale, &translated) {
            Ok(fields) => fields,
            Err(err) => {
                let message = err.to_string();
                let event = Event::TargetFailed {
                    locale: locale.to_string(),
                    message: message.clone(),
                };
                if let Err(e) = self.commit(key, &event) {
                    warn!(record = %key, error = %e, "could not record failure");
                }
                error!(record = %key, locale, kind = %err.kind(), "{message}");
                return Err(err);
            }
        };

        self.store.put_translation(key, locale, fields);
        match self.commit(key, &Event::TargetDownloaded(locale.to_string()))? {
            Committed::Applied(_) => {
                info!(record = %key, locale, "translation downloaded");
                Ok(Outcome::Done(format!(
                    "Translation to {locale} of {} downloaded.",
                    self.label(key)
                )))
            }
            Committed::Unchanged(reason) => Ok(self.skipped(key, &operation, reason)),
        }
    }

    /// Cancel the whole document remotely. Re-uploading later creates a new
    /// document.
    pub async fn cancel(&self, key: &RecordKey) -> Result<Outcome, TrackerError> {
        let operation = Operation::Cancel;
        self.ensure_account()?;
        let record = match self.gate(key, &operation)? {
            Gate::Open(record) => record,
            Gate::Closed(reason) => return Ok(self.skipped(key, &operation, reason)),
        };
        let Some(document_id) = record.document_id else {
            return Ok(self.skipped(key, &operation, SkipReason::NotTracked));
        };

        self.client
            .cancel_document(&document_id)
            .await
            .map_err(|e| self.remote_failure(key, None, e))?;

        match self.commit(key, &Event::Cancelled)? {
            Committed::Applied(_) => {
                info!(record = %key, %document_id, "document cancelled");
                Ok(Outcome::Done(format!("Document {} cancelled.", self.label(key))))
            }
            Committed::Unchanged(reason) => Ok(self.skipped(key, &operation, reason)),
        }
    }

    /// Cancel one target; the source and other targets are untouched.
    pub async fn cancel_target(&self, key: &RecordKey, locale: &str) -> Result<Outcome, TrackerError> {
        let operation = Operation::CancelTarget(locale.to_string());
        self.ensure_account()?;
        let record = match self.gate(key, &operation)? {
            Gate::Open(record) => record,
            Gate::Closed(reason) => return Ok(self.skipped(key, &operation, reason)),
        };
        let Some(document_id) = record.document_id else {
            return Ok(self.skipped(key, &operation, SkipReason::NotTracked));
        };

        self.client
            .cancel_target(&document_id, locale)
            .await
            .map_err(|e| self.remote_failure(key, Some(locale), e))?;

        match self.commit(key, &Event::TargetCancelled(locale.to_string()))? {
            Committed::Applied(_) => {
                info!(record = %key, locale, "translation cancelled");
                Ok(Outcome::Done(format!(
                    "Translation to {locale} of {} cancelled.",
                    self.label(key)
                )))
            }
            Committed::Unchanged(reason) => Ok(self.skipped(key, &operation, reason)),
        }
    }

    /// Request every target that can be requested. Disabled targets are
    /// skipped silently; the last failure, if any, is returned after all
    /// locales were tried.
    pub async fn request_translations(&self, key: &RecordKey) -> Result<Outcome, TrackerError> {
        self.each_target(key, Operation::RequestTarget, "Requested").await
    }

    /// [`check_target`](Self::check_target) for every enabled locale.
    pub async fn check_translations(&self, key: &RecordKey) -> Result<Outcome, TrackerError> {
        self.each_target(key, Operation::CheckTarget, "Ready").await
    }

    /// [`download`](Self::download) for every enabled locale.
    pub async fn download_all(&self, key: &RecordKey) -> Result<Outcome, TrackerError> {
        self.each_target(key, Operation::DownloadTarget, "Downloaded").await
    }

    async fn each_target(
        &self,
        key: &RecordKey,
        operation: fn(String) -> Operation,
        verb: &str,
    ) -> Result<Outcome, TrackerError> {
        self.ensure_account()?;
        let record = self.record(key)?;
        let profile = self.profile_of(&record)?;
        let locales = self.locales_passing(&record, profile, operation);
        if locales.is_empty() {
            return Ok(Outcome::Skipped(SkipReason::NothingToDo));
        }

        let mut done = Vec::new();
        let mut last_error = None;
        for locale in locales {
            let result = match operation(locale.clone()) {
                Operation::RequestTarget(_) => self.request_target(key, &locale).await,
                Operation::CheckTarget(_) => self.check_target(key, &locale).await,
                _ => self.download(key, &locale).await,
            };
            match result {
                Ok(Outcome::Done(_)) => done.push(locale),
                Ok(Outcome::Skipped(_)) => {}
                Err(e) => last_error = Some(e),
            }
        }

        if let Some(err) = last_error {
            return Err(err);
        }
        if done.is_empty() {
            return Ok(Outcome::Skipped(SkipReason::InProgress));
        }
        Ok(Outcome::Done(format!(
            "{} {verb}: {}.",
            self.label(key),
            done.join(", ")
        )))
    }

    /// Move a record to another profile. Disabling suspends its statuses;
    /// enabling again restores them.
    pub fn change_profile(&self, key: &RecordKey, profile_id: &str) -> Result<Outcome, TrackerError> {
        let operation = Operation::ChangeProfile(profile_id.to_string());
        let profile = self.profiles.get(profile_id)?.clone();
        match self.commit(key, &Event::ProfileChanged(profile))? {
            Committed::Applied(_) => {
                info!(record = %key, profile = profile_id, "profile changed");
                Ok(Outcome::Done(format!(
                    "Profile of {} changed to {profile_id}.",
                    self.label(key)
                )))
            }
            Committed::Unchanged(reason) => Ok(self.skipped(key, &operation, reason)),
        }
    }

    /// Forget the TMS document. Works for records whose unit is gone.
    pub fn disassociate(&self, key: &RecordKey) -> Result<Outcome, TrackerError> {
        let label = self.label(key);
        match self.commit(key, &Event::Disassociated)? {
            Committed::Applied(_) => {
                info!(record = %key, "document disassociated");
                Ok(Outcome::Done(format!("{label} disassociated.")))
            }
            Committed::Unchanged(reason) => Ok(self.skipped(key, &Operation::Disassociate, reason)),
        }
    }

    /// Run the deferred download tasks that are due. Meant to be called
    /// periodically.
    pub async fn run_queue(&self) -> QueueReport {
        let now = Utc::now();
        let mut report = QueueReport::default();

        for task in self.queue.drain(now) {
            report.processed += 1;
            match self.download(&task.key, &task.locale).await {
                Ok(Outcome::Done(_)) => report.downloaded += 1,
                Ok(Outcome::Skipped(reason)) => {
                    debug!(record = %task.key, locale = %task.locale, %reason, "queued download skipped");
                    report.skipped += 1;
                }
                Err(err) => {
                    self.fail_queued_target(&task.key, &task.locale, &err);
                    let retryable =
                        matches!(err.kind(), FailureKind::RemoteCall | FailureKind::PaymentRequired);
                    match task.retry(&self.settings.retry, now).filter(|_| retryable) {
                        Some(next) => {
                            warn!(
                                record = %task.key,
                                locale = %task.locale,
                                attempt = next.attempt,
                                error = %err,
                                "queued download failed, retrying later"
                            );
                            self.queue.enqueue(next);
                            report.requeued += 1;
                        }
                        None => {
                            error!(
                                record = %task.key,
                                locale = %task.locale,
                                error = %err,
                                "queued download failed for good"
                            );
                            report.failed += 1;
                        }
                    }
                }
            }
        }

        if report.processed > 0 {
            info!(
                processed = report.processed,
                downloaded = report.downloaded,
                requeued = report.requeued,
                failed = report.failed,
                "download queue run finished"
            );
        }
        report
    }

    /// Leave the target of a failed queued download in `ERROR`, whatever
    /// the failure was.
    fn fail_queued_target(&self, key: &RecordKey, locale: &str, err: &TrackerError) {
        let event = Event::TargetFailed {
            locale: locale.to_string(),
            message: err.to_string(),
        };
        match self.commit(key, &event) {
            Ok(Committed::Applied(_)) => {}
            Ok(Committed::Unchanged(reason)) => {
                debug!(record = %key, locale, %reason, "failure not recorded on target");
            }
            Err(e) => warn!(record = %key, locale, error = %e, "could not record failure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::layer::{Context, SubscriberExt};

    use super::*;
    use crate::profile::{AUTOMATIC, DISABLED, LanguageOverride};
    use crate::queue::DownloadTask;
    use crate::tms::{MockCall, MockTms, TranslatedDocument};
    use crate::unit::{ContentEntity, Field};

    fn settings() -> TrackerSettings {
        TrackerSettings {
            project_id: "project-1".into(),
            source_locale: "en_US".into(),
            target_locales: vec!["es_MX".into(), "de_DE".into()],
            retry: RetryConfig {
                max_retries: 2,
                base_delay_ms: 0,
            },
        }
    }

    fn tracker() -> Tracker<MockTms> {
        Tracker::new(MockTms::new(), settings())
    }

    fn article() -> ContentEntity {
        ContentEntity::new("node", "article", "1", "Llamas are cool", "en_US")
            .with_field(Field::text("body", "Llamas are very cool").with_max_length(60))
    }

    fn key() -> RecordKey {
        RecordKey::new("node", "1")
    }

    async fn uploaded(tracker: &Tracker<MockTms>) -> String {
        tracker.save_unit(article()).await.unwrap();
        tracker.upload(&key()).await.unwrap();
        tracker.check_upload(&key()).await.unwrap();
        tracker.record(&key()).unwrap().document_id.unwrap()
    }

    fn status(tracker: &Tracker<MockTms>, locale: &str) -> Status {
        tracker.get_target_status(&key(), locale).unwrap().unwrap()
    }

    #[tokio::test]
    async fn manual_lifecycle() {
        let tracker = tracker();
        let outcome = tracker.save_unit(article()).await.unwrap();
        assert_eq!(outcome, Outcome::Done("node Llamas are cool saved.".into()));
        assert_eq!(tracker.get_source_status(&key()).unwrap(), Status::Untracked);

        let outcome = tracker.upload(&key()).await.unwrap();
        assert_eq!(outcome.message(), "node Llamas are cool uploaded.");
        assert_eq!(tracker.get_source_status(&key()).unwrap(), Status::Importing);

        tracker.check_upload(&key()).await.unwrap();
        assert_eq!(tracker.get_source_status(&key()).unwrap(), Status::Current);
        assert_eq!(status(&tracker, "es_MX"), Status::Request);

        tracker.request_target(&key(), "es_MX").await.unwrap();
        assert_eq!(status(&tracker, "es_MX"), Status::Pending);
        tracker.check_target(&key(), "es_MX").await.unwrap();
        assert_eq!(status(&tracker, "es_MX"), Status::Ready);
        tracker.download(&key(), "es_MX").await.unwrap();
        assert_eq!(status(&tracker, "es_MX"), Status::Current);

        let translation = tracker.store().translation(&key(), "es_MX").unwrap();
        assert_eq!(translation["body"], "Llamas are very cool (es_MX)");
    }

    #[tokio::test]
    async fn unit_without_locale_uses_configured_source_locale() {
        let tracker = tracker();
        let unit = ContentEntity::new("node", "article", "1", "Llamas are cool", "");
        tracker.save_unit(unit).await.unwrap();
        let record = tracker.record(&key()).unwrap();
        assert_eq!(record.source_locale, "en_US");

        tracker.upload(&key()).await.unwrap();
        let id = tracker.record(&key()).unwrap().document_id.unwrap();
        assert_eq!(tracker.client().document(&id).unwrap().locale, "en_US");
    }

    #[tokio::test]
    async fn download_before_check_makes_no_remote_call() {
        let tracker = tracker();
        uploaded(&tracker).await;
        tracker.request_target(&key(), "es_MX").await.unwrap();

        let outcome = tracker.download(&key(), "es_MX").await.unwrap();
        assert!(matches!(outcome, Outcome::Skipped(SkipReason::InvalidStatus { .. })));
        assert_eq!(tracker.client().calls(MockCall::Download), 0);
        assert_eq!(status(&tracker, "es_MX"), Status::Pending);
    }

    #[tokio::test]
    async fn repeated_upload_reuses_document() {
        let tracker = tracker();
        let id = uploaded(&tracker).await;

        let outcome = tracker.upload(&key()).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::AlreadyUploaded));
        assert_eq!(tracker.client().calls(MockCall::Upload), 1);
        assert_eq!(tracker.record(&key()).unwrap().document_id.unwrap(), id);
    }

    #[tokio::test]
    async fn edit_then_reupload_updates_same_document() {
        let tracker = tracker();
        let id = uploaded(&tracker).await;
        tracker.request_target(&key(), "es_MX").await.unwrap();
        tracker.check_target(&key(), "es_MX").await.unwrap();
        tracker.download(&key(), "es_MX").await.unwrap();

        let mut edited = article();
        edited.set_field("body", "Llamas are extremely cool");
        tracker.save_unit(edited).await.unwrap();
        assert_eq!(tracker.get_source_status(&key()).unwrap(), Status::Edited);
        assert_eq!(status(&tracker, "es_MX"), Status::Pending);
        assert_eq!(status(&tracker, "de_DE"), Status::Request);

        tracker.upload(&key()).await.unwrap();
        assert_eq!(tracker.client().calls(MockCall::Update), 1);
        assert_eq!(tracker.record(&key()).unwrap().document_id.unwrap(), id);
        assert_eq!(
            tracker.client().document(&id).unwrap().fields["body"],
            "Llamas are extremely cool"
        );
    }

    #[tokio::test]
    async fn automatic_profile_uploads_on_save_and_requests_on_import() {
        let mut resolver = ProfileSettings::new(MANUAL);
        resolver.set_bundle_default("node", "article", AUTOMATIC);
        let tracker = tracker().with_resolver(resolver);

        tracker.save_unit(article()).await.unwrap();
        assert_eq!(tracker.get_source_status(&key()).unwrap(), Status::Importing);

        let outcome = tracker.check_upload(&key()).await.unwrap();
        assert_eq!(
            outcome.message(),
            "node Llamas are cool import complete. Requested: de_DE, es_MX."
        );
        assert_eq!(status(&tracker, "es_MX"), Status::Pending);
        assert_eq!(status(&tracker, "de_DE"), Status::Pending);
    }

    #[tokio::test]
    async fn bulk_style_helpers_skip_disabled_locales() {
        let profile = Profile::new("no_german", "No German")
            .with_override("de_DE", LanguageOverride::Disabled);
        let mut resolver = ProfileSettings::new(MANUAL);
        resolver.set_unit_override("node", "1", "no_german");
        let tracker = tracker()
            .with_profiles(ProfileRegistry::with_custom([profile]))
            .with_resolver(resolver);

        uploaded(&tracker).await;
        assert_eq!(status(&tracker, "de_DE"), Status::Disabled);

        tracker.request_translations(&key()).await.unwrap();
        tracker.check_translations(&key()).await.unwrap();
        let outcome = tracker.download_all(&key()).await.unwrap();
        assert_eq!(outcome.message(), "node Llamas are cool Downloaded: es_MX.");
        assert_eq!(status(&tracker, "es_MX"), Status::Current);
        assert_eq!(status(&tracker, "de_DE"), Status::Disabled);
        assert_eq!(tracker.client().calls(MockCall::AddTarget), 1);
    }

    #[tokio::test]
    async fn cancel_document_and_single_target() {
        let tracker = tracker();
        let id = uploaded(&tracker).await;

        tracker.cancel_target(&key(), "es_MX").await.unwrap();
        assert_eq!(status(&tracker, "es_MX"), Status::Cancelled);
        assert_eq!(status(&tracker, "de_DE"), Status::Request);
        assert_eq!(tracker.get_source_status(&key()).unwrap(), Status::Current);

        tracker.cancel(&key()).await.unwrap();
        assert!(tracker.client().is_cancelled(&id));
        assert_eq!(tracker.get_source_status(&key()).unwrap(), Status::Cancelled);
        assert_eq!(status(&tracker, "de_DE"), Status::Cancelled);

        // a cancelled document comes back under a fresh id
        tracker.upload(&key()).await.unwrap();
        let fresh = tracker.record(&key()).unwrap().document_id.unwrap();
        assert_ne!(fresh, id);
        assert_eq!(tracker.get_source_status(&key()).unwrap(), Status::Importing);
    }

    #[tokio::test]
    async fn profile_disable_and_reenable() {
        let tracker = tracker();
        uploaded(&tracker).await;
        tracker.request_target(&key(), "es_MX").await.unwrap();
        tracker.check_target(&key(), "es_MX").await.unwrap();

        tracker.change_profile(&key(), DISABLED).unwrap();
        assert_eq!(tracker.get_source_status(&key()).unwrap(), Status::Disabled);
        assert_eq!(status(&tracker, "es_MX"), Status::Disabled);
        let outcome = tracker.upload(&key()).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::ProfileDisabled));

        tracker.change_profile(&key(), AUTOMATIC).unwrap();
        tracker.upload(&key()).await.unwrap();
        tracker.check_upload(&key()).await.unwrap();
        assert_eq!(tracker.get_source_status(&key()).unwrap(), Status::Current);
        assert_eq!(status(&tracker, "es_MX"), Status::Ready);
    }

    #[tokio::test]
    async fn reenabled_cancelled_record_uploads_a_fresh_document() {
        let tracker = tracker();
        let id = uploaded(&tracker).await;
        tracker.cancel(&key()).await.unwrap();

        tracker.change_profile(&key(), DISABLED).unwrap();
        tracker.change_profile(&key(), MANUAL).unwrap();
        assert_eq!(tracker.get_source_status(&key()).unwrap(), Status::Cancelled);

        tracker.upload(&key()).await.unwrap();
        let fresh = tracker.record(&key()).unwrap().document_id.unwrap();
        assert_ne!(fresh, id);
        assert_eq!(tracker.client().calls(MockCall::Update), 0);
        assert_eq!(tracker.client().calls(MockCall::Upload), 2);
        assert_eq!(tracker.get_source_status(&key()).unwrap(), Status::Importing);
    }

    #[tokio::test]
    async fn unknown_profile_is_an_error() {
        let tracker = tracker();
        tracker.save_unit(article()).await.unwrap();
        assert!(matches!(
            tracker.change_profile(&key(), "nope"),
            Err(TrackerError::UnknownProfile(_))
        ));
    }

    #[tokio::test]
    async fn remote_failure_marks_error_and_retry_recovers() {
        let tracker = tracker();
        uploaded(&tracker).await;
        tracker.request_target(&key(), "es_MX").await.unwrap();
        tracker.check_target(&key(), "es_MX").await.unwrap();

        tracker.client().fail_next(
            MockCall::Download,
            TmsError::Api {
                status: 500,
                message: "boom".into(),
            },
        );
        let err = tracker.download(&key(), "es_MX").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::RemoteCall);
        assert_eq!(status(&tracker, "es_MX"), Status::Error);

        tracker.download(&key(), "es_MX").await.unwrap();
        assert_eq!(status(&tracker, "es_MX"), Status::Current);
    }

    #[tokio::test]
    async fn failed_first_upload_stays_untracked() {
        let tracker = tracker();
        tracker.save_unit(article()).await.unwrap();
        tracker.client().fail_next(
            MockCall::Upload,
            TmsError::Api {
                status: 503,
                message: "unavailable".into(),
            },
        );
        assert!(tracker.upload(&key()).await.is_err());
        let record = tracker.record(&key()).unwrap();
        assert_eq!(record.source_status, Status::Untracked);
        assert!(record.last_error.as_deref().unwrap().contains("unavailable"));
        assert!(record.is_consistent());
    }

    #[tokio::test]
    async fn oversized_source_marks_error_without_blocking() {
        let tracker = tracker();
        uploaded(&tracker).await;
        let mut edited = article();
        edited.set_field("body", "Llamas ".repeat(8));
        tracker.save_unit(edited).await.unwrap();
        tracker.client().fail_next(
            MockCall::Update,
            TmsError::ContentTooLarge("body exceeds 50MB".into()),
        );

        let err = tracker.upload(&key()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::ContentTooLarge);
        assert_eq!(tracker.get_source_status(&key()).unwrap(), Status::Error);
        assert!(!tracker.is_account_blocked());
    }

    #[tokio::test]
    async fn archived_document_reverts_to_untracked() {
        let tracker = tracker();
        let id = uploaded(&tracker).await;
        tracker.client().archive(&id);

        let err = tracker.request_target(&key(), "es_MX").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::DocumentArchived);
        let record = tracker.record(&key()).unwrap();
        assert_eq!(record.source_status, Status::Untracked);
        assert_eq!(record.document_id, None);
    }

    #[tokio::test]
    async fn locked_document_switches_id_and_retry_succeeds() {
        let tracker = tracker();
        let id = uploaded(&tracker).await;
        let mut edited = article();
        edited.set_field("body", "Edited llamas");
        tracker.save_unit(edited).await.unwrap();

        tracker.client().fail_next(
            MockCall::Update,
            TmsError::DocumentLocked {
                document_id: id.clone(),
                next_document_id: id.clone(),
            },
        );
        let err = tracker.upload(&key()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::DocumentLocked);
        assert_eq!(tracker.get_source_status(&key()).unwrap(), Status::Edited);

        tracker.upload(&key()).await.unwrap();
        assert_eq!(tracker.get_source_status(&key()).unwrap(), Status::Importing);
    }

    #[tokio::test]
    async fn payment_required_blocks_everything_until_resumed() {
        let tracker = tracker();
        uploaded(&tracker).await;
        tracker.client().fail_next(
            MockCall::AddTarget,
            TmsError::PaymentRequired("Community has been disabled".into()),
        );

        let err = tracker.request_target(&key(), "es_MX").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::PaymentRequired);
        assert_eq!(tracker.get_source_status(&key()).unwrap(), Status::Error);
        assert!(tracker.is_account_blocked());

        let err = tracker.request_target(&key(), "de_DE").await.unwrap_err();
        assert!(matches!(err, TrackerError::AccountBlocked));
        assert_eq!(tracker.client().calls(MockCall::AddTarget), 1);

        tracker.resume_account();
        // the source must be re-uploaded after the error
        tracker.upload(&key()).await.unwrap();
        tracker.check_upload(&key()).await.unwrap();
        tracker.request_target(&key(), "de_DE").await.unwrap();
        assert_eq!(status(&tracker, "de_DE"), Status::Pending);
    }

    async fn block_account(tracker: &Tracker<MockTms>) {
        tracker
            .save_unit(ContentEntity::new("node", "page", "2", "Billing", "en_US"))
            .await
            .unwrap();
        tracker.client().fail_next(
            MockCall::Upload,
            TmsError::PaymentRequired("Community has been disabled".into()),
        );
        let other = RecordKey::new("node", "2");
        assert!(tracker.upload(&other).await.is_err());
        assert!(tracker.is_account_blocked());
    }

    #[tokio::test]
    async fn account_block_survives_a_snapshot() {
        let tracker = tracker();
        block_account(&tracker).await;

        let json = serde_json::to_string(&tracker.snapshot()).unwrap();
        let snapshot: Snapshot = serde_json::from_str(&json).unwrap();
        assert!(snapshot.account_blocked);

        let restored = Tracker::new(MockTms::new(), settings()).with_snapshot(&snapshot);
        assert!(restored.is_account_blocked());
        restored.resume_account();
        assert!(!restored.snapshot().account_blocked);

        // stores written before the flag existed load unblocked
        let old: Snapshot = serde_json::from_str(r#"{"records": []}"#).unwrap();
        assert!(!old.account_blocked);
    }

    #[tokio::test]
    async fn orphaned_record_can_be_disassociated() {
        let tracker = tracker();
        uploaded(&tracker).await;
        let outcome = tracker.delete_unit(&key()).unwrap();
        assert_eq!(outcome.message(), "node:1 disassociated.");
        let record = tracker.record(&key()).unwrap();
        assert_eq!(record.source_status, Status::Untracked);
        assert!(record.target_statuses.values().all(|s| *s == Status::Untracked));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<String>>>);

    struct MessageVisitor<'a>(&'a mut String);

    impl tracing::field::Visit for MessageVisitor<'_> {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0.push_str(&format!("{value:?}"));
            }
        }
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for Captured {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() != tracing::Level::ERROR {
                return;
            }
            let mut message = String::new();
            event.record(&mut MessageVisitor(&mut message));
            self.0.lock().unwrap().push(message);
        }
    }

    #[tokio::test]
    async fn content_too_long_is_reported_and_logged() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::registry().with(captured.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let tracker = tracker();
        let id = uploaded(&tracker).await;
        tracker.request_target(&key(), "es_MX").await.unwrap();
        tracker.check_target(&key(), "es_MX").await.unwrap();
        tracker.client().set_translation(
            &id,
            "es_MX",
            TranslatedDocument {
                fields: [("body".to_string(), "x".repeat(61))].into_iter().collect(),
            },
        );

        let err = tracker.download(&key(), "es_MX").await.unwrap_err();
        let expected = "The download for node Llamas are cool failed because of the length of one field translation (es_MX) value: body.";
        assert_eq!(err.to_string(), expected);
        assert_eq!(err.kind(), FailureKind::ContentTooLarge);
        assert_eq!(status(&tracker, "es_MX"), Status::Error);
        assert!(tracker.store().translation(&key(), "es_MX").is_none());
        assert!(captured.0.lock().unwrap().iter().any(|m| m == expected));
    }

    #[tokio::test]
    async fn queue_worker_downloads_idempotently() {
        let tracker = tracker();
        uploaded(&tracker).await;
        tracker.request_target(&key(), "es_MX").await.unwrap();
        tracker.check_target(&key(), "es_MX").await.unwrap();

        tracker.queue().enqueue(DownloadTask::new(key(), "es_MX"));
        let report = tracker.run_queue().await;
        assert_eq!(report.downloaded, 1);
        assert_eq!(status(&tracker, "es_MX"), Status::Current);

        // delivered again: harmless
        tracker.queue().enqueue(DownloadTask::new(key(), "es_MX"));
        let report = tracker.run_queue().await;
        assert_eq!(report.skipped, 1);
        assert_eq!(tracker.client().calls(MockCall::Download), 1);
    }

    #[tokio::test]
    async fn queue_worker_retries_then_gives_up() {
        let tracker = tracker();
        uploaded(&tracker).await;
        tracker.request_target(&key(), "es_MX").await.unwrap();
        tracker.check_target(&key(), "es_MX").await.unwrap();
        for _ in 0..3 {
            tracker.client().fail_next(
                MockCall::Download,
                TmsError::Api {
                    status: 500,
                    message: "boom".into(),
                },
            );
        }

        tracker.queue().enqueue(DownloadTask::new(key(), "es_MX"));
        let first = tracker.run_queue().await;
        assert_eq!(first.requeued, 1);
        assert_eq!(status(&tracker, "es_MX"), Status::Error);

        let second = tracker.run_queue().await;
        assert_eq!(second.requeued, 1);
        let third = tracker.run_queue().await;
        assert_eq!(third.failed, 1);
        assert!(tracker.queue().is_empty());
        assert_eq!(status(&tracker, "es_MX"), Status::Error);
    }

    #[tokio::test]
    async fn queued_download_blocked_by_account_marks_target_error() {
        let tracker = tracker();
        uploaded(&tracker).await;
        tracker.request_target(&key(), "es_MX").await.unwrap();
        tracker.check_target(&key(), "es_MX").await.unwrap();
        assert_eq!(status(&tracker, "es_MX"), Status::Ready);
        block_account(&tracker).await;

        tracker.queue().enqueue(DownloadTask::new(key(), "es_MX"));
        let report = tracker.run_queue().await;
        assert_eq!(report.requeued, 1);
        assert_eq!(tracker.client().calls(MockCall::Download), 0);
        assert_eq!(status(&tracker, "es_MX"), Status::Error);
        let record = tracker.record(&key()).unwrap();
        assert_eq!(
            record.last_error.as_deref(),
            Some("Account blocked until payment is settled")
        );
    }

    #[tokio::test]
    async fn queued_download_with_missing_unit_marks_target_error() {
        let tracker = tracker();
        uploaded(&tracker).await;
        tracker.request_target(&key(), "es_MX").await.unwrap();
        tracker.check_target(&key(), "es_MX").await.unwrap();
        tracker.store().remove_unit(&key());

        tracker.queue().enqueue(DownloadTask::new(key(), "es_MX"));
        let report = tracker.run_queue().await;
        assert_eq!(report.failed, 1);
        assert_eq!(status(&tracker, "es_MX"), Status::Error);
    }

    #[tokio::test]
    async fn commit_reapplies_event_after_concurrent_write() {
        let tracker = tracker();
        tracker.save_unit(article()).await.unwrap();
        assert_eq!(tracker.record(&key()).unwrap().version, 1);

        let finished = std::cell::Cell::new(0);
        let event = Event::Uploaded {
            document_id: "doc-1".into(),
        };
        let committed = tracker
            .commit_with(&key(), &event, |r| {
                finished.set(finished.get() + 1);
                if finished.get() == 1 {
                    // somebody else writes between our read and our write
                    let current = tracker.record(&key()).unwrap();
                    tracker
                        .store()
                        .replace(current.clone(), current.version)
                        .unwrap();
                }
                r.job_id = Some("job-1".into());
            })
            .unwrap();

        let Committed::Applied(saved) = committed else {
            panic!("expected the upload to apply");
        };
        assert_eq!(finished.get(), 2);
        assert_eq!(saved.version, 3);
        assert_eq!(saved.source_status, Status::Importing);
        assert_eq!(saved.document_id.as_deref(), Some("doc-1"));
        assert_eq!(saved.job_id.as_deref(), Some("job-1"));
        assert_eq!(tracker.record(&key()).unwrap(), saved);
    }

    #[tokio::test]
    async fn snapshot_restores_tracker_state() {
        let tracker = tracker();
        uploaded(&tracker).await;
        tracker.queue().enqueue(DownloadTask::new(key(), "es_MX"));
        let snapshot = tracker.snapshot();

        let restored = Tracker::new(MockTms::new(), settings()).with_snapshot(&snapshot);
        assert_eq!(restored.get_source_status(&key()).unwrap(), Status::Current);
        assert_eq!(restored.queue().len(), 1);
    }
}

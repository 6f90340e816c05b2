//! Inbound TMS notifications.
//!
//! The TMS calls back with query parameters such as
//! `project_id=..&document_id=..&locale_code=es-MX&complete=true&type=target`.
//! Each callback is turned into an event on the matching record; the response
//! tells the caller what happened as a JSON object plus human messages.

use std::str::FromStr;

use reqwest::Url;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::queue::DownloadTask;
use crate::state_machine::{Event, RecordKey, Status, Transition};
use crate::tms::TmsClient;
use crate::tracker::{Outcome, Tracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    DocumentUploaded,
    Target,
    DocumentArchived,
    DocumentCancelled,
    TargetCancelled,
    ImportFailure,
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document_uploaded" => Ok(Self::DocumentUploaded),
            "target" => Ok(Self::Target),
            "document_archived" => Ok(Self::DocumentArchived),
            "document_cancelled" => Ok(Self::DocumentCancelled),
            "target_cancelled" => Ok(Self::TargetCancelled),
            "import_failure" => Ok(Self::ImportFailure),
            other => Err(format!("Unsupported notification type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationQuery {
    pub project_id: Option<String>,
    pub document_id: Option<String>,
    pub locale: Option<String>,
    pub complete: bool,
    pub kind: Option<String>,
    pub progress: Option<u8>,
}

impl NotificationQuery {
    /// Build a query from decoded key/value pairs. Unknown keys are ignored.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut query = Self::default();
        for (key, value) in pairs {
            let value = value.into();
            match key.as_ref() {
                "project_id" => query.project_id = Some(value),
                "document_id" => query.document_id = Some(value),
                // The TMS sends `es-MX`; records use `es_MX`.
                "locale" | "locale_code" => query.locale = Some(value.replace('-', "_")),
                "complete" => query.complete = matches!(value.as_str(), "true" | "1"),
                "type" => query.kind = Some(value),
                "progress" => query.progress = value.parse().ok(),
                _ => {}
            }
        }
        query
    }

    /// Parse a raw query string such as `type=target&complete=true`.
    pub fn parse(query: &str) -> Self {
        let query = query.trim_start_matches('?');
        match Url::parse(&format!("http://localhost/?{query}")) {
            Ok(url) => Self::from_pairs(url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned()))),
            Err(_) => Self::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotificationResponse {
    pub result: Map<String, Value>,
    pub messages: Vec<String>,
}

impl NotificationResponse {
    fn message(message: impl Into<String>) -> Self {
        Self {
            result: Map::new(),
            messages: vec![message.into()],
        }
    }

    fn set(&mut self, key: &str, value: Value) {
        self.result.insert(key.to_string(), value);
    }
}

impl<C: TmsClient> Tracker<C> {
    pub async fn handle_notification(&self, query: &NotificationQuery) -> NotificationResponse {
        if let (Some(expected), Some(got)) = (
            Some(self.settings.project_id.as_str()).filter(|p| !p.is_empty()),
            query.project_id.as_deref(),
        ) {
            if expected != got {
                warn!(project_id = got, "notification for another project ignored");
                return NotificationResponse::message(format!("Not project {expected}."));
            }
        }

        let kind = match query.kind.as_deref().map(str::parse::<NotificationType>) {
            Some(Ok(kind)) => kind,
            Some(Err(message)) => return NotificationResponse::message(message),
            None => return NotificationResponse::message("Missing notification type."),
        };
        let Some(document_id) = query.document_id.as_deref() else {
            return NotificationResponse::message("Missing document id.");
        };
        let Some(record) = self.store().find_by_document_id(document_id) else {
            info!(document_id, "notification for unknown document");
            return NotificationResponse::message(format!("Document {document_id} not found."));
        };
        let key = record.key.clone();
        info!(record = %key, document_id, ?kind, locale = query.locale.as_deref(), "notification received");

        let locale = query.locale.as_deref();
        match (kind, locale) {
            (NotificationType::DocumentUploaded, _) => self.on_document_uploaded(&key).await,
            (NotificationType::Target, Some(locale)) => {
                self.on_target(&key, locale, query.complete, query.progress).await
            }
            (NotificationType::TargetCancelled, Some(locale)) => {
                self.on_event(&key, &Event::TargetCancelled(locale.to_string()), "cancelled")
            }
            (NotificationType::Target | NotificationType::TargetCancelled, None) => {
                NotificationResponse::message("Missing locale.")
            }
            (NotificationType::DocumentArchived, _) => {
                self.on_event(&key, &Event::DocumentArchived, "disassociated")
            }
            (NotificationType::DocumentCancelled, _) => {
                self.on_event(&key, &Event::Cancelled, "cancelled")
            }
            (NotificationType::ImportFailure, _) => self.on_event(
                &key,
                &Event::SourceFailed(format!("Import of document {document_id} failed")),
                "import_failure",
            ),
        }
    }

    /// The TMS finished importing the source: mark it current and request
    /// the automatic targets.
    async fn on_document_uploaded(&self, key: &RecordKey) -> NotificationResponse {
        let mut response = NotificationResponse::default();
        match self.apply_event(key, &Event::SourceChecked { complete: true }) {
            Ok(Transition::Applied(_)) => {}
            Ok(Transition::Unchanged { reason }) => {
                if self.get_source_status(key).ok() != Some(Status::Current) {
                    return NotificationResponse::message(format!("Skipped: {reason}."));
                }
            }
            Err(e) => return NotificationResponse::message(e.to_string()),
        }

        let requested = self.auto_request(key).await;
        response
            .messages
            .push(format!("Document {} was imported.", self.label(key)));
        response.set("request_translations", json!(requested));
        response
    }

    async fn on_target(
        &self,
        key: &RecordKey,
        locale: &str,
        complete: bool,
        progress: Option<u8>,
    ) -> NotificationResponse {
        let mut response = NotificationResponse::default();
        if !complete {
            response.set("progress", json!(progress.unwrap_or(0)));
            response
                .messages
                .push(format!("Translation to {locale} is in progress."));
            return response;
        }

        match self.apply_event(
            key,
            &Event::TargetChecked {
                locale: locale.to_string(),
                complete: true,
            },
        ) {
            Ok(Transition::Applied(_)) => {}
            Ok(Transition::Unchanged { reason }) => {
                if self.get_target_status(key, locale).ok().flatten() != Some(Status::Ready) {
                    return NotificationResponse::message(format!("Skipped: {reason}."));
                }
            }
            Err(e) => return NotificationResponse::message(e.to_string()),
        }

        let profile = match self.record(key).and_then(|r| self.profile_of(&r).cloned()) {
            Ok(profile) => profile,
            Err(e) => return NotificationResponse::message(e.to_string()),
        };
        if !profile.auto_download_for(locale) {
            response.set("download", json!(false));
            response
                .messages
                .push(format!("Translation to {locale} is ready for download."));
            return response;
        }

        if profile.auto_download_worker {
            self.queue().enqueue(DownloadTask::new(key.clone(), locale));
            info!(record = %key, locale, "download queued");
            response.set("download_queued", json!(true));
            response
                .messages
                .push(format!("Download of {locale} queued."));
            return response;
        }

        match self.download(key, locale).await {
            Ok(Outcome::Done(message)) => {
                response.set("download", json!(true));
                response.messages.push(message);
            }
            Ok(Outcome::Skipped(reason)) => {
                response.set("download", json!(false));
                response.messages.push(format!("Skipped: {reason}."));
            }
            Err(e) => {
                response.set("download", json!(false));
                response.messages.push(e.to_string());
            }
        }
        response
    }

    fn on_event(&self, key: &RecordKey, event: &Event, flag: &str) -> NotificationResponse {
        let mut response = NotificationResponse::default();
        match self.apply_event(key, event) {
            Ok(Transition::Applied(_)) => {
                response.set(flag, json!(true));
                response.messages.push(format!("{}: {flag}.", self.label(key)));
            }
            Ok(Transition::Unchanged { reason }) => {
                response.set(flag, json!(false));
                response.messages.push(format!("Skipped: {reason}."));
            }
            Err(e) => response.messages.push(e.to_string()),
        }
        response
    }
}

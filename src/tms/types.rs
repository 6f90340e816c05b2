//! Payloads exchanged with the TMS REST API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Content of a unit as sent for translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub title: String,
    pub locale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub fields: BTreeMap<String, String>,
}

/// Translated field values for one locale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatedDocument {
    pub fields: BTreeMap<String, String>,
}

/// Body of `POST /api/document` and `PATCH /api/document/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct UploadRequest<'a> {
    pub title: &'a str,
    pub locale_code: &'a str,
    pub project_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<&'a str>,
    pub content: &'a BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentProperties {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub properties: DocumentProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressProperties {
    pub progress: u8,
}

/// Response of `GET /api/document/{id}/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub properties: ProgressProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationProperties {
    pub locale_code: String,
    pub percent_complete: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationEntity {
    pub properties: TranslationProperties,
}

/// Response of `GET /api/document/{id}/translation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationList {
    #[serde(default)]
    pub entities: Vec<TranslationEntity>,
}

/// Body of a 423 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockedResponse {
    pub next_document_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetRequest<'a> {
    pub locale_code: &'a str,
}

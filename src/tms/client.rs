use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::error::TmsError;
use super::types::{
    DocumentResponse, LockedResponse, SourceDocument, StatusResponse, TargetRequest,
    TranslatedDocument, TranslationList, UploadRequest,
};

/// Operations the tracker needs from a translation management system.
#[allow(async_fn_in_trait)]
pub trait TmsClient {
    /// Create a document and return its id.
    async fn upload(&self, doc: &SourceDocument) -> Result<String, TmsError>;

    /// Replace the source content of an existing document.
    async fn update(&self, document_id: &str, doc: &SourceDocument) -> Result<(), TmsError>;

    /// True once the source import has finished.
    async fn check_source_status(&self, document_id: &str) -> Result<bool, TmsError>;

    async fn add_target(&self, document_id: &str, locale: &str) -> Result<(), TmsError>;

    /// Completion of one target, in percent.
    async fn check_target_status(&self, document_id: &str, locale: &str) -> Result<u8, TmsError>;

    async fn download(&self, document_id: &str, locale: &str)
    -> Result<TranslatedDocument, TmsError>;

    async fn cancel_document(&self, document_id: &str) -> Result<(), TmsError>;

    async fn cancel_target(&self, document_id: &str, locale: &str) -> Result<(), TmsError>;
}

pub const DEFAULT_BASE_URL: &str = "https://myaccount.lingotek.com";

/// REST client for a Lingotek-style TMS.
pub struct HttpTmsClient {
    api_token: String,
    project_id: String,
    client: Client,
    base_url: String,
}

impl HttpTmsClient {
    pub fn new(
        base_url: impl Into<String>,
        api_token: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Result<Self, TmsError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            api_token: api_token.into(),
            project_id: project_id.into(),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{path}", self.base_url)
    }

    async fn send(&self, request: RequestBuilder, document_id: &str) -> Result<Response, TmsError> {
        let response = request.bearer_auth(&self.api_token).send().await?;
        let status = response.status();
        debug!(%status, document_id, "TMS response");

        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());

        Err(match status {
            StatusCode::PAYMENT_REQUIRED => TmsError::PaymentRequired(body),
            StatusCode::PAYLOAD_TOO_LARGE => TmsError::ContentTooLarge(body),
            StatusCode::GONE => TmsError::DocumentArchived {
                document_id: document_id.to_string(),
            },
            StatusCode::LOCKED => match serde_json::from_str::<LockedResponse>(&body) {
                Ok(locked) => TmsError::DocumentLocked {
                    document_id: document_id.to_string(),
                    next_document_id: locked.next_document_id,
                },
                Err(e) => TmsError::InvalidResponse(format!("locked without next id: {e}")),
            },
            _ => TmsError::Api {
                status: status.as_u16(),
                message: body,
            },
        })
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, TmsError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| TmsError::InvalidResponse(e.to_string()))
    }

    fn upload_body<'a>(&'a self, doc: &'a SourceDocument) -> UploadRequest<'a> {
        UploadRequest {
            title: &doc.title,
            locale_code: &doc.locale,
            project_id: &self.project_id,
            job_id: doc.job_id.as_deref(),
            content: &doc.fields,
        }
    }
}

impl TmsClient for HttpTmsClient {
    async fn upload(&self, doc: &SourceDocument) -> Result<String, TmsError> {
        let request = self
            .client
            .post(self.url("document"))
            .json(&self.upload_body(doc));
        let response = self.send(request, "").await?;
        let body: DocumentResponse = Self::json(response).await?;
        Ok(body.properties.id)
    }

    async fn update(&self, document_id: &str, doc: &SourceDocument) -> Result<(), TmsError> {
        let request = self
            .client
            .patch(self.url(&format!("document/{document_id}")))
            .json(&self.upload_body(doc));
        self.send(request, document_id).await?;
        Ok(())
    }

    async fn check_source_status(&self, document_id: &str) -> Result<bool, TmsError> {
        let request = self
            .client
            .get(self.url(&format!("document/{document_id}/status")));
        let response = self.send(request, document_id).await?;
        let body: StatusResponse = Self::json(response).await?;
        Ok(body.properties.progress >= 100)
    }

    async fn add_target(&self, document_id: &str, locale: &str) -> Result<(), TmsError> {
        let request = self
            .client
            .post(self.url(&format!("document/{document_id}/translation")))
            .json(&TargetRequest {
                locale_code: locale,
            });
        self.send(request, document_id).await?;
        Ok(())
    }

    async fn check_target_status(&self, document_id: &str, locale: &str) -> Result<u8, TmsError> {
        let request = self
            .client
            .get(self.url(&format!("document/{document_id}/translation")));
        let response = self.send(request, document_id).await?;
        let body: TranslationList = Self::json(response).await?;
        body.entities
            .into_iter()
            .find(|e| e.properties.locale_code == locale)
            .map(|e| e.properties.percent_complete)
            .ok_or_else(|| TmsError::InvalidResponse(format!("no translation for {locale}")))
    }

    async fn download(
        &self,
        document_id: &str,
        locale: &str,
    ) -> Result<TranslatedDocument, TmsError> {
        let request = self
            .client
            .get(self.url(&format!("document/{document_id}/content")))
            .query(&[("locale_code", locale)]);
        let response = self.send(request, document_id).await?;
        let fields = Self::json(response).await?;
        Ok(TranslatedDocument { fields })
    }

    async fn cancel_document(&self, document_id: &str) -> Result<(), TmsError> {
        let request = self
            .client
            .post(self.url(&format!("document/{document_id}/cancel")));
        self.send(request, document_id).await?;
        Ok(())
    }

    async fn cancel_target(&self, document_id: &str, locale: &str) -> Result<(), TmsError> {
        let request = self
            .client
            .post(self.url(&format!("document/{document_id}/translation/{locale}/cancel")));
        self.send(request, document_id).await?;
        Ok(())
    }
}

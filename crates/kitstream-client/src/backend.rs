//! Client for the streaming control plane.
//!
//! The control plane allocates GPU sessions. Calls return the raw HTTP status
//! next to the decoded body; deciding what a status means for the session is
//! left to the lifecycle controller.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use kitstream_common::{
    CreateSessionRequest, DestroySessionRequest, DestroySessionResponse, SessionDescriptor,
};

/// Session is allocated and its routes are published.
pub const STATUS_READY: u16 = 200;
/// Session was accepted but is still provisioning.
pub const STATUS_PENDING: u16 = 202;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus { status: u16, body: String },
}

/// Status plus whatever session data the control plane sent back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResponse {
    pub status: u16,
    pub data: Option<SessionDescriptor>,
    pub detail: Option<String>,
}

impl BackendResponse {
    pub fn new(status: u16, data: Option<SessionDescriptor>) -> Self {
        Self {
            status,
            data,
            detail: None,
        }
    }

    pub fn ready(data: SessionDescriptor) -> Self {
        Self::new(STATUS_READY, Some(data))
    }

    pub fn pending(data: SessionDescriptor) -> Self {
        Self::new(STATUS_PENDING, Some(data))
    }

    pub fn error(status: u16, detail: impl Into<String>) -> Self {
        Self {
            status,
            data: None,
            detail: Some(detail.into()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == STATUS_READY
    }

    pub fn is_pending(&self) -> bool {
        self.status == STATUS_PENDING
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    /// Human readable reason for a failed call.
    pub fn failure_reason(&self) -> String {
        match &self.detail {
            Some(detail) => format!("HTTP {}: {}", self.status, detail),
            None => format!("HTTP {}", self.status),
        }
    }
}

/// Create/query/destroy against the session control plane.
#[async_trait]
pub trait SessionBackend: Send + Sync + 'static {
    /// Base URL handed on to the streaming client.
    fn base_url(&self) -> &str;

    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<BackendResponse, BackendError>;

    async fn get_session_info(&self, session_id: &str) -> Result<BackendResponse, BackendError>;

    async fn destroy_session(
        &self,
        session_id: &str,
    ) -> Result<DestroySessionResponse, BackendError>;
}

/// [`SessionBackend`] over the `/streaming/stream` REST API.
#[derive(Clone)]
pub struct HttpSessionBackend {
    http: Client,
    base_url: String,
    token: String,
}

impl HttpSessionBackend {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, token)
    }

    pub fn with_client(
        http: Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn stream_url(&self) -> String {
        format!("{}/streaming/stream", self.base_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.token.is_empty() {
            request
        } else {
            request.bearer_auth(&self.token)
        }
    }
}

#[async_trait]
impl SessionBackend for HttpSessionBackend {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<BackendResponse, BackendError> {
        debug!(
            app = %request.id,
            version = %request.version,
            profile = %request.profile,
            "creating session"
        );
        let res = self
            .authorize(self.http.post(self.stream_url()).json(request))
            .send()
            .await?;
        read_session_response(res).await
    }

    async fn get_session_info(&self, session_id: &str) -> Result<BackendResponse, BackendError> {
        let url = format!("{}/{}", self.stream_url(), session_id);
        let res = self.authorize(self.http.get(url)).send().await?;
        read_session_response(res).await
    }

    async fn destroy_session(
        &self,
        session_id: &str,
    ) -> Result<DestroySessionResponse, BackendError> {
        debug!(session = %session_id, "destroying session");
        let body = DestroySessionRequest {
            id: session_id.to_string(),
        };
        let res = self
            .authorize(self.http.delete(self.stream_url()).json(&body))
            .send()
            .await?;
        let status = res.status();
        let text = res.text().await.unwrap_or_default();
        let mut response = DestroySessionResponse {
            detail: serde_json::from_str::<Value>(&text)
                .ok()
                .as_ref()
                .and_then(detail_of),
        };
        if !status.is_success() && response.detail.is_none() {
            response.detail = Some(if text.trim().is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                format!("HTTP {}: {}", status.as_u16(), text.trim())
            });
        }
        Ok(response)
    }
}

async fn read_session_response(res: reqwest::Response) -> Result<BackendResponse, BackendError> {
    let status = res.status().as_u16();
    let text = res.text().await?;
    Ok(parse_session_body(status, &text))
}

/// Decode a create/query body. Never fails: an undecodable body leaves `data` empty.
pub(crate) fn parse_session_body(status: u16, text: &str) -> BackendResponse {
    if text.trim().is_empty() {
        return BackendResponse::new(status, None);
    }
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => {
            return BackendResponse {
                status,
                data: None,
                detail: Some(text.trim().to_string()),
            }
        }
    };
    let detail = detail_of(&value);
    let payload = match value.get("data").filter(|inner| inner.is_object()).cloned() {
        Some(inner) => inner,
        None => value,
    };
    BackendResponse {
        status,
        data: serde_json::from_value(payload).ok(),
        detail,
    }
}

fn detail_of(value: &Value) -> Option<String> {
    match value.get("detail")? {
        Value::Null => None,
        Value::String(detail) => Some(detail.clone()),
        other => Some(other.to_string()),
    }
}

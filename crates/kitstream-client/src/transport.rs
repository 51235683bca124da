//! Seam to the external streaming client.
//!
//! The streaming client owns WebRTC, decoding and rendering. This crate only
//! hands it [`ConnectionParameters`], sends it [`RemoteMessage`]s and receives
//! its callbacks as [`TransportEvent`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use kitstream_common::RemoteMessage;

use crate::routes::ConnectionParameters;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport already attached to session {0}")]
    AlreadyAttached(String),
    #[error("transport not attached")]
    NotAttached,
    #[error("stream setup failed: {0}")]
    Setup(String),
    #[error("send failed: {0}")]
    Send(String),
}

/// The streaming client as seen from the control surface.
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    /// Configure and start the stream for one session.
    async fn setup_stream(&self, params: &ConnectionParameters) -> Result<(), TransportError>;

    /// Send a message to the remote application over the established stream.
    async fn send_message(&self, message: &RemoteMessage) -> Result<(), TransportError>;

    /// Tear the stream down and free its resources.
    async fn terminate(&self);
}

/// Callbacks emitted by the streaming client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "callback", rename_all = "camelCase")]
pub enum TransportEvent {
    Started,
    Focus,
    Blur,
    #[serde(rename_all = "camelCase")]
    LoggedIn {
        user_id: String,
    },
    StreamFailed {
        #[serde(default)]
        reason: Option<String>,
    },
    /// Raw custom event from the remote application.
    Custom {
        event: serde_json::Value,
    },
}

/// Owned handle around the process-wide streaming client.
///
/// At most one session is attached at a time; attaching again requires a
/// prior [`release`](Self::release).
pub struct TransportHandle<T> {
    transport: T,
    attached: Mutex<Option<String>>,
}

impl<T: StreamTransport> TransportHandle<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            attached: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn attach(&self, params: &ConnectionParameters) -> Result<(), TransportError> {
        let mut attached = self.attached.lock().await;
        if let Some(current) = attached.as_ref() {
            return Err(TransportError::AlreadyAttached(current.clone()));
        }
        self.transport.setup_stream(params).await?;
        info!(
            session = %params.session_id,
            signaling = %format!("{}:{}", params.signaling_server, params.signaling_port),
            media = %format!("{}:{}", params.media_server, params.media_port),
            "stream attached"
        );
        *attached = Some(params.session_id.clone());
        Ok(())
    }

    /// Terminate the stream if attached. Returns whether anything was released.
    pub async fn release(&self) -> bool {
        let mut attached = self.attached.lock().await;
        match attached.take() {
            Some(session_id) => {
                self.transport.terminate().await;
                info!(session = %session_id, "stream released");
                true
            }
            None => {
                debug!("release requested with no attached stream");
                false
            }
        }
    }

    pub async fn send(&self, message: &RemoteMessage) -> Result<(), TransportError> {
        let attached = self.attached.lock().await;
        if attached.is_none() {
            return Err(TransportError::NotAttached);
        }
        self.transport.send_message(message).await
    }

    pub async fn attached_session(&self) -> Option<String> {
        self.attached.lock().await.clone()
    }
}

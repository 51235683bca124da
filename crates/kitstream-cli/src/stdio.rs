//! Streaming client bridge over stdio.
//!
//! Commands for the streaming client go to stdout as one JSON object per
//! line; its callbacks come back on stdin, either as `TransportEvent`
//! objects or as raw remote-application messages.

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::Mutex;
use tracing::warn;

use kitstream_client::{ConnectionParameters, StreamTransport, TransportError};
use kitstream_common::RemoteMessage;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum Outbound<'a> {
    Setup { params: &'a ConnectionParameters },
    Message { message: &'a RemoteMessage },
    Terminate,
}

fn encode(line: &Outbound<'_>) -> Result<String, TransportError> {
    let mut json = serde_json::to_string(line).map_err(|e| TransportError::Send(e.to_string()))?;
    json.push('\n');
    Ok(json)
}

pub struct StdioTransport {
    out: Mutex<Stdout>,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }

    async fn emit(&self, line: &Outbound<'_>) -> Result<(), TransportError> {
        let json = encode(line)?;
        let mut out = self.out.lock().await;
        out.write_all(json.as_bytes())
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        out.flush()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamTransport for StdioTransport {
    async fn setup_stream(&self, params: &ConnectionParameters) -> Result<(), TransportError> {
        self.emit(&Outbound::Setup { params })
            .await
            .map_err(|e| TransportError::Setup(e.to_string()))
    }

    async fn send_message(&self, message: &RemoteMessage) -> Result<(), TransportError> {
        self.emit(&Outbound::Message { message }).await
    }

    async fn terminate(&self) {
        if let Err(e) = self.emit(&Outbound::Terminate).await {
            warn!(error = %e, "could not tell the streaming client to terminate");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_lines() {
        let query = RemoteMessage::loading_state_query();
        assert_eq!(
            encode(&Outbound::Message { message: &query }).unwrap(),
            "{\"type\":\"message\",\"message\":{\"event_type\":\"loadingStateQuery\",\"payload\":{}}}\n"
        );
        assert_eq!(
            encode(&Outbound::Terminate).unwrap(),
            "{\"type\":\"terminate\"}\n"
        );
    }

    #[test]
    fn test_setup_line_uses_client_keys() {
        let params = ConnectionParameters {
            session_id: "s-1".to_string(),
            backend_url: "https://stream.example.net".to_string(),
            signaling_server: "10.0.0.5".to_string(),
            signaling_port: 31000,
            media_server: "10.0.0.5".to_string(),
            media_port: 31001,
            access_token: String::new(),
        };
        let line = encode(&Outbound::Setup { params: &params }).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "setup");
        assert_eq!(value["params"]["signalingport"], 31000);
        assert_eq!(value["params"]["mediaserver"], "10.0.0.5");
    }
}

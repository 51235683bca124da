use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Route role tag the streaming client uses for the signaling channel.
pub const SIGNALING_ROUTE: &str = "signaling";
/// Route role tag the streaming client uses for the media channel.
pub const MEDIA_ROUTE: &str = "media";

/// Outbound query asking the Kit for its current load state.
pub const LOADING_STATE_QUERY: &str = "loadingStateQuery";
/// Inbound answer to [`LOADING_STATE_QUERY`].
pub const LOADING_STATE_RESPONSE: &str = "loadingStateResponse";
/// Inbound result of an asset/stage open request.
pub const OPENED_STAGE_RESULT: &str = "openedStageResult";
/// Inbound numeric progress notification.
pub const UPDATE_PROGRESS_AMOUNT: &str = "updateProgressAmount";
/// Inbound activity notification (the Kit started loading something).
pub const UPDATE_PROGRESS_ACTIVITY: &str = "updateProgressActivity";

/// Body of `POST /streaming/stream`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateSessionRequest {
    /// Application id.
    pub id: String,
    pub version: String,
    pub profile: String,
}

/// Body of `DELETE /streaming/stream`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DestroySessionRequest {
    pub id: String,
}

/// One named endpoint exposed by a streaming host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteDescriptor {
    /// Role tag, e.g. [`SIGNALING_ROUTE`] or [`MEDIA_ROUTE`].
    pub description: String,
    pub source_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostRoutes {
    #[serde(default)]
    pub routes: Vec<RouteDescriptor>,
}

/// Session as reported by the control plane on create and query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub id: String,
    /// Server host to the routes published on it.
    #[serde(default)]
    pub routes: BTreeMap<String, HostRoutes>,
}

/// Body returned by `DELETE /streaming/stream`: `{}` on success, `{detail}` on error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DestroySessionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Application published in the streaming catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplicationEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplicationVersion {
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplicationProfile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Catalog listings come back either as a bare array or wrapped in `{"items": [...]}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CatalogListing<T> {
    Bare(Vec<T>),
    Wrapped { items: Vec<T> },
}

impl<T> CatalogListing<T> {
    pub fn into_items(self) -> Vec<T> {
        match self {
            Self::Bare(items) | Self::Wrapped { items } => items,
        }
    }
}

/// Envelope for every message exchanged with the remote application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteMessage {
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RemoteMessage {
    /// The only message this system originates.
    pub fn loading_state_query() -> Self {
        Self {
            event_type: LOADING_STATE_QUERY.to_string(),
            payload: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loading_state_query_wire_format() {
        let json = RemoteMessage::loading_state_query().to_json().unwrap();
        assert_eq!(json, r#"{"event_type":"loadingStateQuery","payload":{}}"#);
    }

    #[test]
    fn test_session_descriptor_ignores_unknown_fields() {
        let raw = r#"{
            "id": "abc-123",
            "created": "2024-01-01",
            "routes": {
                "10.0.0.5": {
                    "routes": [
                        {"description": "signaling", "source_port": 31000, "protocol": "TCP"},
                        {"description": "media", "source_port": 31001, "protocol": "UDP", "destination_port": 1024}
                    ]
                }
            }
        }"#;
        let descriptor: SessionDescriptor = serde_json::from_str(raw).unwrap();
        assert_eq!(descriptor.id, "abc-123");
        let host = &descriptor.routes["10.0.0.5"];
        assert_eq!(host.routes.len(), 2);
        assert_eq!(host.routes[1].destination_port, Some(1024));
    }

    #[test]
    fn test_session_descriptor_without_routes() {
        let descriptor: SessionDescriptor = serde_json::from_str(r#"{"id": "pending"}"#).unwrap();
        assert!(descriptor.routes.is_empty());
    }

    #[test]
    fn test_destroy_response_detail() {
        let ok: DestroySessionResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(ok.detail, None);
        let err: DestroySessionResponse =
            serde_json::from_str(r#"{"detail": "session not found"}"#).unwrap();
        assert_eq!(err.detail.as_deref(), Some("session not found"));
    }

    #[test]
    fn test_catalog_listing_shapes() {
        let bare: CatalogListing<ApplicationVersion> =
            serde_json::from_str(r#"[{"version": "1.0.0"}]"#).unwrap();
        assert_eq!(bare.into_items().len(), 1);

        let wrapped: CatalogListing<ApplicationVersion> =
            serde_json::from_str(r#"{"items": [{"version": "1.0.0"}, {"version": "2.0.0"}]}"#)
                .unwrap();
        assert_eq!(wrapped.into_items()[1].version, "2.0.0");
    }

    #[test]
    fn test_remote_message_missing_payload() {
        let msg = RemoteMessage::from_json(r#"{"event_type": "loadingStateResponse"}"#).unwrap();
        assert_eq!(msg.event_type, LOADING_STATE_RESPONSE);
        assert!(msg.payload.is_null());
    }
}

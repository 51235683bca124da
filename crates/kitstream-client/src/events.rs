//! Inbound events from the remote application.
//!
//! Decoding never fails. Anything that is not valid JSON becomes
//! [`RemoteEvent::Malformed`] and an unrecognised `event_type` becomes
//! [`RemoteEvent::Unknown`]; both are dispatched as no-ops.

use serde_json::Value;

use kitstream_common::{
    RemoteMessage, LOADING_STATE_RESPONSE, OPENED_STAGE_RESULT, UPDATE_PROGRESS_ACTIVITY,
    UPDATE_PROGRESS_AMOUNT,
};

/// `openedStageResult` value for a successful open.
pub const STAGE_OPEN_SUCCESS: &str = "success";

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    OpenedStageResult {
        result: String,
        url: Option<String>,
        error: Option<String>,
    },
    LoadingStateResponse {
        loading_state: Option<String>,
        url: Option<String>,
    },
    UpdateProgressAmount {
        amount: Option<f64>,
    },
    UpdateProgressActivity {
        text: Option<String>,
    },
    Unknown {
        event_type: String,
    },
    Malformed {
        reason: String,
    },
}

impl RemoteEvent {
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::from_value(value),
            Err(e) => Self::Malformed {
                reason: e.to_string(),
            },
        }
    }

    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<RemoteMessage>(value) {
            Ok(message) => Self::from_message(message),
            Err(e) => Self::Malformed {
                reason: e.to_string(),
            },
        }
    }

    pub fn from_message(message: RemoteMessage) -> Self {
        let payload = &message.payload;
        match message.event_type.as_str() {
            OPENED_STAGE_RESULT => Self::OpenedStageResult {
                result: str_field(payload, &["result"]).unwrap_or_default(),
                url: str_field(payload, &["url"]),
                error: str_field(payload, &["error", "message"]),
            },
            LOADING_STATE_RESPONSE => Self::LoadingStateResponse {
                loading_state: str_field(payload, &["loading_state", "loadingState", "state"]),
                url: str_field(payload, &["url"]),
            },
            UPDATE_PROGRESS_AMOUNT => Self::UpdateProgressAmount {
                amount: payload
                    .as_f64()
                    .or_else(|| number_field(payload, &["amount", "progress", "value"])),
            },
            UPDATE_PROGRESS_ACTIVITY => Self::UpdateProgressActivity {
                text: payload
                    .as_str()
                    .map(ToOwned::to_owned)
                    .or_else(|| str_field(payload, &["text", "activity", "status"])),
            },
            other => Self::Unknown {
                event_type: other.to_string(),
            },
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            Self::OpenedStageResult { .. } => OPENED_STAGE_RESULT,
            Self::LoadingStateResponse { .. } => LOADING_STATE_RESPONSE,
            Self::UpdateProgressAmount { .. } => UPDATE_PROGRESS_AMOUNT,
            Self::UpdateProgressActivity { .. } => UPDATE_PROGRESS_ACTIVITY,
            Self::Unknown { event_type } => event_type.as_str(),
            Self::Malformed { .. } => "",
        }
    }
}

fn str_field(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .map(ToOwned::to_owned)
}

fn number_field(payload: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_f64))
}

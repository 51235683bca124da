//! Remote application event dispatcher.
//!
//! Classifies each inbound [`RemoteEvent`] against the current
//! [`RemoteAppState`], mutates that state and returns at most one follow-up
//! [`Reaction`]. Sending the follow-up is the caller's job, so the dispatcher
//! stays synchronous and is never held across a network call.

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use kitstream_common::SourceMode;

use crate::events::{RemoteEvent, STAGE_OPEN_SUCCESS};

pub const LOADING_ASSET_TEXT: &str = "Loading Asset...";
pub const LOGIN_PROMPT_TEXT: &str = "Log in to GeForce NOW to view stream";
pub const WAITING_FOR_STREAM_TEXT: &str = "Waiting for stream to begin";

/// What the control surface believes about the remote application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteAppState {
    /// False until the Kit answers its first load-state query.
    pub kit_ready: bool,
    pub loading_text: String,
    pub is_loading: bool,
    pub logged_in: bool,
}

impl RemoteAppState {
    pub fn initial(source: &SourceMode) -> Self {
        let (loading_text, is_loading) = match source {
            SourceMode::Gfn => (LOGIN_PROMPT_TEXT, true),
            SourceMode::Stream => (WAITING_FOR_STREAM_TEXT, true),
            SourceMode::Local | SourceMode::Other(_) => (WAITING_FOR_STREAM_TEXT, false),
        };
        Self {
            kit_ready: false,
            loading_text: loading_text.to_string(),
            is_loading,
            logged_in: false,
        }
    }
}

/// Follow-up requested by a handled event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    None,
    /// Send one `loadingStateQuery` to the Kit.
    SendQuery,
    /// Surface a load failure to the user.
    LoadError(String),
}

pub struct EventDispatcher {
    source: SourceMode,
    state: RemoteAppState,
    state_tx: watch::Sender<RemoteAppState>,
}

impl EventDispatcher {
    pub fn new(source: SourceMode) -> Self {
        let state = RemoteAppState::initial(&source);
        let (state_tx, _) = watch::channel(state.clone());
        Self {
            source,
            state,
            state_tx,
        }
    }

    pub fn state(&self) -> &RemoteAppState {
        &self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<RemoteAppState> {
        self.state_tx.subscribe()
    }

    /// Whether the proof-of-life poll still has to run.
    pub fn needs_proof_of_life(&self) -> bool {
        !self.state.kit_ready
    }

    /// The stream is up; kick off the proof-of-life poll.
    pub fn on_started(&mut self) -> Reaction {
        if self.state.kit_ready {
            debug!("stream restarted with kit already ready");
            Reaction::None
        } else {
            Reaction::SendQuery
        }
    }

    pub fn handle_raw(&mut self, raw: &str) -> Reaction {
        self.handle_event(RemoteEvent::parse(raw))
    }

    pub fn handle_event(&mut self, event: RemoteEvent) -> Reaction {
        trace!(event_type = event.event_type(), "remote event");
        match event {
            RemoteEvent::OpenedStageResult { result, url, .. } if result == STAGE_OPEN_SUCCESS => {
                info!(url = url.as_deref().unwrap_or(""), "stage opened");
                Reaction::SendQuery
            }
            RemoteEvent::OpenedStageResult { result, url, error } => {
                let detail = match (error, url) {
                    (Some(error), _) => error,
                    (None, Some(url)) => format!("failed to open {url} ({result})"),
                    (None, None) => format!("failed to open stage ({result})"),
                };
                warn!(%detail, "stage open failed");
                Reaction::LoadError(detail)
            }
            RemoteEvent::LoadingStateResponse { loading_state, .. } => {
                if self.state.kit_ready {
                    trace!(?loading_state, "loading state response ignored");
                    return Reaction::None;
                }
                info!(?loading_state, "kit is ready");
                self.state.kit_ready = true;
                self.publish();
                Reaction::SendQuery
            }
            RemoteEvent::UpdateProgressAmount { amount } => {
                debug!(?amount, "progress");
                Reaction::None
            }
            RemoteEvent::UpdateProgressActivity { text } => {
                if self.state.loading_text != LOADING_ASSET_TEXT {
                    debug!(?text, "asset load started");
                    self.state.loading_text = LOADING_ASSET_TEXT.to_string();
                    self.state.is_loading = true;
                    self.publish();
                }
                Reaction::None
            }
            RemoteEvent::Unknown { event_type } => {
                debug!(%event_type, "ignoring unknown event");
                Reaction::None
            }
            RemoteEvent::Malformed { reason } => {
                debug!(%reason, "ignoring malformed event");
                Reaction::None
            }
        }
    }

    /// Login callback from the streaming client.
    pub fn on_logged_in(&mut self, user_id: &str) -> Reaction {
        if !self.source.is_identity_gated() {
            debug!(source = %self.source, "login callback outside identity-gated mode");
            return Reaction::None;
        }
        info!(user = %user_id, "user logged in");
        self.state.loading_text.clear();
        self.state.is_loading = false;
        self.state.logged_in = true;
        self.publish();
        Reaction::None
    }

    /// Back to the initial state for the configured source mode.
    pub fn reset(&mut self) {
        let initial = RemoteAppState::initial(&self.source);
        if self.state != initial {
            self.state = initial;
            self.publish();
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_dispatcher() -> EventDispatcher {
        EventDispatcher::new(SourceMode::Stream)
    }

    fn loading_state_response() -> RemoteEvent {
        RemoteEvent::LoadingStateResponse {
            loading_state: None,
            url: None,
        }
    }

    #[test]
    fn test_initial_state_per_source() {
        let gfn = RemoteAppState::initial(&SourceMode::Gfn);
        assert_eq!(gfn.loading_text, LOGIN_PROMPT_TEXT);
        assert!(gfn.is_loading);

        let stream = RemoteAppState::initial(&SourceMode::Stream);
        assert_eq!(stream.loading_text, WAITING_FOR_STREAM_TEXT);
        assert!(stream.is_loading);

        let other = RemoteAppState::initial(&SourceMode::Other("kiosk".into()));
        assert!(!other.is_loading);
        assert!(!other.kit_ready);
    }

    #[test]
    fn test_first_loading_state_response_marks_ready() {
        let mut dispatcher = stream_dispatcher();
        assert!(dispatcher.needs_proof_of_life());
        assert_eq!(dispatcher.handle_event(loading_state_response()), Reaction::SendQuery);
        assert!(dispatcher.state().kit_ready);
        assert!(!dispatcher.needs_proof_of_life());
    }

    #[test]
    fn test_later_loading_state_responses_are_noops() {
        let mut dispatcher = stream_dispatcher();
        dispatcher.handle_event(loading_state_response());
        let rx = dispatcher.subscribe();
        for _ in 0..5 {
            assert_eq!(dispatcher.handle_event(loading_state_response()), Reaction::None);
        }
        assert!(dispatcher.state().kit_ready);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_opened_stage_success_queries() {
        let mut dispatcher = stream_dispatcher();
        let reaction = dispatcher.handle_raw(
            r#"{"event_type": "openedStageResult", "payload": {"result": "success"}}"#,
        );
        assert_eq!(reaction, Reaction::SendQuery);
    }

    #[test]
    fn test_opened_stage_failure_leaves_state_alone() {
        let mut dispatcher = stream_dispatcher();
        let before = dispatcher.state().clone();
        let reaction = dispatcher.handle_raw(
            r#"{"event_type": "openedStageResult", "payload": {"result": "error", "url": "s3://bucket/a.usd"}}"#,
        );
        match reaction {
            Reaction::LoadError(detail) => assert!(detail.contains("s3://bucket/a.usd")),
            other => panic!("unexpected reaction: {:?}", other),
        }
        assert_eq!(dispatcher.state(), &before);
    }

    #[test]
    fn test_progress_activity_sets_text_once() {
        let mut dispatcher = EventDispatcher::new(SourceMode::Local);
        let mut rx = dispatcher.subscribe();
        let activity = RemoteEvent::UpdateProgressActivity { text: None };

        assert_eq!(dispatcher.handle_event(activity.clone()), Reaction::None);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();
        assert_eq!(dispatcher.state().loading_text, LOADING_ASSET_TEXT);
        assert!(dispatcher.state().is_loading);

        assert_eq!(dispatcher.handle_event(activity), Reaction::None);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_progress_amount_is_observability_only() {
        let mut dispatcher = stream_dispatcher();
        let before = dispatcher.state().clone();
        let reaction =
            dispatcher.handle_event(RemoteEvent::UpdateProgressAmount { amount: Some(0.4) });
        assert_eq!(reaction, Reaction::None);
        assert_eq!(dispatcher.state(), &before);
    }

    #[test]
    fn test_unknown_and_malformed_are_ignored() {
        let mut dispatcher = stream_dispatcher();
        let before = dispatcher.state().clone();
        assert_eq!(dispatcher.handle_raw("{{{"), Reaction::None);
        assert_eq!(
            dispatcher.handle_raw(r#"{"event_type": "selectionChanged", "payload": [1, 2]}"#),
            Reaction::None
        );
        assert_eq!(dispatcher.state(), &before);
    }

    #[test]
    fn test_login_in_identity_gated_mode() {
        let mut dispatcher = EventDispatcher::new(SourceMode::Gfn);
        assert_eq!(dispatcher.on_logged_in("user-42"), Reaction::None);
        let state = dispatcher.state();
        assert!(state.logged_in);
        assert!(!state.is_loading);
        assert!(state.loading_text.is_empty());
    }

    #[test]
    fn test_login_ignored_outside_identity_gated_mode() {
        let mut dispatcher = stream_dispatcher();
        let before = dispatcher.state().clone();
        dispatcher.on_logged_in("user-42");
        assert_eq!(dispatcher.state(), &before);
    }

    #[test]
    fn test_started_only_queries_until_ready() {
        let mut dispatcher = stream_dispatcher();
        assert_eq!(dispatcher.on_started(), Reaction::SendQuery);
        dispatcher.handle_event(loading_state_response());
        assert_eq!(dispatcher.on_started(), Reaction::None);
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut dispatcher = stream_dispatcher();
        dispatcher.handle_event(loading_state_response());
        dispatcher.handle_event(RemoteEvent::UpdateProgressActivity { text: None });
        dispatcher.reset();
        assert_eq!(dispatcher.state(), &RemoteAppState::initial(&SourceMode::Stream));
    }
}

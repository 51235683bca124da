//! Session lifecycle controller.
//!
//! One controller drives at most one streaming session:
//!
//! ```text
//! Idle -> Creating -> AwaitingReady -> Ready -> Streaming -> TearingDown -> Idle
//!              \__________________________/
//!                     (create returned 200)
//! ```
//!
//! Every start and every end bumps the attempt generation. Background poll
//! and proof-of-life tasks carry the generation they were spawned for and
//! re-check it, together with the phase, after each network call, so a
//! cancelled attempt can never move the controller forward.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use kitstream_common::{
    CreateSessionRequest, HostRoutes, LocalConfig, RemoteMessage, SessionDescriptor, SourceMode,
    StreamConfig,
};

use crate::backend::{BackendError, SessionBackend};
use crate::dispatcher::{EventDispatcher, Reaction, RemoteAppState};
use crate::events::RemoteEvent;
use crate::routes::{self, ConnectionParameters, RouteError};
use crate::transport::{StreamTransport, TransportError, TransportEvent, TransportHandle};

const NOTICE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    Idle,
    Creating,
    AwaitingReady,
    Ready,
    Streaming,
    TearingDown,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Creating => "creating",
            Self::AwaitingReady => "awaiting_ready",
            Self::Ready => "ready",
            Self::Streaming => "streaming",
            Self::TearingDown => "tearing_down",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Pending,
    Ready,
}

/// The session currently owned by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub routes: BTreeMap<String, HostRoutes>,
    pub created_at: DateTime<Utc>,
    /// Set once, when routes resolve.
    pub connection: Option<ConnectionParameters>,
    /// False for direct local connections; there is nothing to destroy remotely.
    pub managed: bool,
}

impl Session {
    fn from_descriptor(descriptor: &SessionDescriptor, status: SessionStatus) -> Self {
        Self {
            id: descriptor.id.clone(),
            status,
            routes: descriptor.routes.clone(),
            created_at: Utc::now(),
            connection: None,
            managed: true,
        }
    }

    fn local(params: ConnectionParameters) -> Self {
        Self {
            id: params.session_id.clone(),
            status: SessionStatus::Ready,
            routes: BTreeMap::new(),
            created_at: Utc::now(),
            connection: Some(params),
            managed: false,
        }
    }
}

/// User-visible reports published on the notice channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", rename_all = "camelCase")]
pub enum Notice {
    CreationFailed { reason: String },
    RouteResolutionFailed { session_id: String, reason: String },
    AttachFailed { session_id: String, reason: String },
    PollFailed { session_id: String, reason: String },
    TeardownWarning { session_id: String, detail: String },
    TransportFailure { reason: String },
    LoadError { detail: String },
    /// A session was created after its attempt had been cancelled and was destroyed again.
    Cancelled { session_id: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreationFailed { reason } => write!(f, "could not create session: {reason}"),
            Self::RouteResolutionFailed { session_id, reason } => {
                write!(f, "session {session_id} has unusable routes: {reason}")
            }
            Self::AttachFailed { session_id, reason } => {
                write!(f, "could not attach stream to session {session_id}: {reason}")
            }
            Self::PollFailed { session_id, reason } => {
                write!(f, "session {session_id} never became ready: {reason}")
            }
            Self::TeardownWarning { session_id, detail } => {
                write!(f, "session {session_id} teardown: {detail}")
            }
            Self::TransportFailure { reason } => write!(f, "stream failed: {reason}"),
            Self::LoadError { detail } => write!(f, "load error: {detail}"),
            Self::Cancelled { session_id } => write!(f, "session {session_id} was cancelled"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session request: {0}")]
    InvalidRequest(String),
    #[error("a session is already in progress ({0})")]
    Busy(SessionPhase),
    #[error("session creation failed: {0}")]
    Creation(String),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Attach(#[from] TransportError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("session {0} was cancelled")]
    Cancelled(String),
    #[error("session {0} is not awaiting readiness")]
    NotAwaiting(String),
    #[error("session {0} is not ready to attach")]
    NotReady(String),
}

/// Readiness polling bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Not-ready answers before giving up. `None` polls until cancelled.
    pub max_attempts: Option<u32>,
    /// Consecutive failed requests before giving up. `None` never gives up.
    pub max_errors: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub source: SourceMode,
    pub access_token: String,
    pub poll: PollPolicy,
    pub proof_of_life_interval: Duration,
}

impl From<&StreamConfig> for ControllerConfig {
    fn from(config: &StreamConfig) -> Self {
        Self {
            source: config.source.clone(),
            access_token: config.access_token.clone(),
            poll: PollPolicy {
                interval: config.poll_interval(),
                max_attempts: config.max_poll_attempts,
                max_errors: Some(config.max_poll_errors).filter(|max| *max > 0),
            },
            proof_of_life_interval: config.proof_of_life_interval(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

/// Result of a single readiness poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    NotReady { status: u16 },
    Streaming(ConnectionParameters),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// Nothing to end, or another teardown already owns it.
    NoSession,
    /// Creation was still in flight; it was abandoned.
    Cancelled,
    Destroyed { session_id: String },
    /// The backend no longer knew the session.
    AlreadyGone { session_id: String },
    /// Direct local connection, only the stream was released.
    Released { session_id: String },
    /// Destroy answered with a detail or failed; local state was reset anyway.
    Warning { session_id: String, detail: String },
}

struct Inner {
    phase: SessionPhase,
    session: Option<Session>,
    generation: u64,
    /// Generation whose proof-of-life loop has been started.
    proof_of_life: Option<u64>,
    /// Generation whose `Started` callback arrived before attach finished.
    started_pending: Option<u64>,
}

struct Shared<B, T> {
    backend: B,
    transport: TransportHandle<T>,
    config: ControllerConfig,
    inner: Mutex<Inner>,
    dispatcher: Mutex<EventDispatcher>,
    phase_tx: watch::Sender<SessionPhase>,
    notice_tx: broadcast::Sender<Notice>,
}

/// Owns the backend client, the streaming client and the remote-app state.
///
/// Cheap to clone; clones drive the same session.
pub struct SessionController<B, T> {
    shared: Arc<Shared<B, T>>,
}

impl<B, T> Clone for SessionController<B, T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: SessionBackend, T: StreamTransport> SessionController<B, T> {
    pub fn new(backend: B, transport: T, config: ControllerConfig) -> Self {
        let (phase_tx, _) = watch::channel(SessionPhase::Idle);
        let (notice_tx, _) = broadcast::channel(NOTICE_CAPACITY);
        let dispatcher = EventDispatcher::new(config.source.clone());
        Self {
            shared: Arc::new(Shared {
                backend,
                transport: TransportHandle::new(transport),
                config,
                inner: Mutex::new(Inner {
                    phase: SessionPhase::Idle,
                    session: None,
                    generation: 0,
                    proof_of_life: None,
                    started_pending: None,
                }),
                dispatcher: Mutex::new(dispatcher),
                phase_tx,
                notice_tx,
            }),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.lock().phase
    }

    pub fn session(&self) -> Option<Session> {
        self.shared.lock().session.clone()
    }

    pub fn app_state(&self) -> RemoteAppState {
        self.shared.dispatcher().state().clone()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.shared.config
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    pub fn transport(&self) -> &TransportHandle<T> {
        &self.shared.transport
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.shared.phase_tx.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.shared.notice_tx.subscribe()
    }

    pub fn subscribe_app_state(&self) -> watch::Receiver<RemoteAppState> {
        self.shared.dispatcher().subscribe()
    }

    /// Ask the control plane for a session and drive it towards `Streaming`.
    ///
    /// Only valid from `Idle`. Returns `AwaitingReady` when the backend is
    /// still provisioning; readiness polling then continues in the background.
    pub async fn start_session(
        &self,
        app_id: &str,
        version: &str,
        profile: &str,
    ) -> Result<SessionPhase, SessionError> {
        let request = CreateSessionRequest {
            id: app_id.trim().to_string(),
            version: version.trim().to_string(),
            profile: profile.trim().to_string(),
        };
        self.shared.start_session(request).await
    }

    /// Attach straight to a Kit instance without going through the control plane.
    pub async fn attach_local(
        &self,
        local: &LocalConfig,
    ) -> Result<ConnectionParameters, SessionError> {
        self.shared.attach_local(local).await
    }

    /// One readiness poll for the session being awaited.
    ///
    /// The background poll task calls the same step on every interval; this
    /// entry point does not schedule anything by itself.
    pub async fn poll_session_ready(&self, session_id: &str) -> Result<PollOutcome, SessionError> {
        let generation = self.shared.lock().generation;
        self.shared.poll_once(session_id, generation).await
    }

    /// Resolve routes for the ready session and attach the streaming client.
    pub async fn resolve_and_attach(
        &self,
        descriptor: &SessionDescriptor,
    ) -> Result<ConnectionParameters, SessionError> {
        let generation = {
            let inner = self.shared.lock();
            let matches = inner.phase == SessionPhase::Ready
                && inner
                    .session
                    .as_ref()
                    .is_some_and(|session| session.id == descriptor.id);
            if !matches {
                return Err(SessionError::NotReady(descriptor.id.clone()));
            }
            inner.generation
        };
        self.shared.resolve_and_attach(descriptor, generation).await
    }

    /// End whatever is in progress. Safe to call at any time, any number of times.
    pub async fn end_session(&self) -> TeardownOutcome {
        self.shared.teardown(None).await
    }

    /// Feed a callback from the streaming client.
    pub async fn handle_transport_event(&self, event: TransportEvent) {
        self.shared.handle_transport_event(event).await
    }

    /// Feed a raw custom message from the remote application.
    ///
    /// Ignored unless a stream is up.
    pub async fn handle_remote_message(&self, raw: &str) {
        if !self.shared.is_streaming("remote message") {
            return;
        }
        let reaction = self.shared.dispatcher().handle_raw(raw);
        self.shared.apply(reaction).await
    }
}

fn is_awaiting(inner: &Inner, session_id: &str, generation: u64) -> bool {
    inner.generation == generation
        && inner.phase == SessionPhase::AwaitingReady
        && inner
            .session
            .as_ref()
            .is_some_and(|session| session.id == session_id)
}

impl<B: SessionBackend, T: StreamTransport> Shared<B, T> {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatcher(&self) -> MutexGuard<'_, EventDispatcher> {
        self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_streaming(&self, what: &str) -> bool {
        let phase = self.lock().phase;
        if phase != SessionPhase::Streaming {
            debug!(%phase, what, "dropping inbound event outside streaming");
            return false;
        }
        true
    }

    fn set_phase(&self, inner: &mut Inner, phase: SessionPhase) {
        if inner.phase != phase {
            info!(from = %inner.phase, to = %phase, "session phase changed");
            inner.phase = phase;
            self.phase_tx.send_replace(phase);
        }
    }

    fn notify(&self, notice: Notice) {
        debug!(%notice, "publishing notice");
        let _ = self.notice_tx.send(notice);
    }

    async fn start_session(
        self: &Arc<Self>,
        request: CreateSessionRequest,
    ) -> Result<SessionPhase, SessionError> {
        if request.id.is_empty() || request.version.is_empty() || request.profile.is_empty() {
            return Err(SessionError::InvalidRequest(
                "application id, version and profile are all required".to_string(),
            ));
        }

        let generation = {
            let mut inner = self.lock();
            if inner.phase != SessionPhase::Idle {
                return Err(SessionError::Busy(inner.phase));
            }
            inner.generation += 1;
            inner.proof_of_life = None;
            inner.started_pending = None;
            self.set_phase(&mut inner, SessionPhase::Creating);
            inner.generation
        };
        self.dispatcher().reset();
        info!(
            app = %request.id,
            version = %request.version,
            profile = %request.profile,
            "starting session"
        );

        let response = match self.backend.create_session(&request).await {
            Ok(response) => response,
            Err(e) => {
                self.fail_creation(generation, e.to_string());
                return Err(e.into());
            }
        };
        if !response.is_success() {
            let reason = response.failure_reason();
            self.fail_creation(generation, reason.clone());
            return Err(SessionError::Creation(reason));
        }

        let status = response.status;
        let pending = response.is_pending();
        let descriptor = match response.data {
            Some(descriptor) if !descriptor.id.is_empty() => descriptor,
            _ => {
                let reason = format!("HTTP {status} without a session id");
                self.fail_creation(generation, reason.clone());
                return Err(SessionError::Creation(reason));
            }
        };

        let registered = {
            let mut inner = self.lock();
            if inner.generation == generation && inner.phase == SessionPhase::Creating {
                let (status, phase) = if pending {
                    (SessionStatus::Pending, SessionPhase::AwaitingReady)
                } else {
                    (SessionStatus::Ready, SessionPhase::Ready)
                };
                inner.session = Some(Session::from_descriptor(&descriptor, status));
                self.set_phase(&mut inner, phase);
                true
            } else {
                false
            }
        };
        if !registered {
            self.discard_orphan(&descriptor.id).await;
            return Err(SessionError::Cancelled(descriptor.id));
        }

        if pending {
            info!(session = %descriptor.id, "session pending, polling for readiness");
            self.spawn_poll(descriptor.id, generation);
            return Ok(SessionPhase::AwaitingReady);
        }

        info!(session = %descriptor.id, status, "session ready on create");
        self.resolve_and_attach(&descriptor, generation).await?;
        Ok(SessionPhase::Streaming)
    }

    fn fail_creation(&self, generation: u64, reason: String) {
        {
            let mut inner = self.lock();
            if inner.generation != generation || inner.phase != SessionPhase::Creating {
                debug!(%reason, "creation failed after cancellation");
                return;
            }
            self.set_phase(&mut inner, SessionPhase::Idle);
        }
        error!(%reason, "session creation failed");
        self.notify(Notice::CreationFailed { reason });
    }

    async fn discard_orphan(&self, session_id: &str) {
        warn!(session = %session_id, "session created after cancellation, destroying it");
        match self.backend.destroy_session(session_id).await {
            Ok(response) => {
                if let Some(detail) = response.detail {
                    warn!(session = %session_id, %detail, "orphaned session destroy reported");
                }
            }
            Err(e) => warn!(session = %session_id, error = %e, "orphaned session destroy failed"),
        }
        self.notify(Notice::Cancelled {
            session_id: session_id.to_string(),
        });
    }

    fn spawn_poll(self: &Arc<Self>, session_id: String, generation: u64) {
        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.poll_loop(session_id, generation).await });
    }

    async fn poll_loop(self: Arc<Self>, session_id: String, generation: u64) {
        let policy = self.config.poll.clone();
        let mut attempts: u32 = 0;
        let mut errors: u32 = 0;
        loop {
            tokio::time::sleep(policy.interval).await;
            let failure = match self.poll_once(&session_id, generation).await {
                Ok(PollOutcome::Streaming(_)) => return,
                Ok(PollOutcome::NotReady { status }) => {
                    errors = 0;
                    attempts += 1;
                    match policy.max_attempts {
                        Some(max) if attempts >= max => {
                            format!("not ready after {attempts} polls (last status {status})")
                        }
                        _ => continue,
                    }
                }
                Err(SessionError::Backend(e)) => {
                    errors += 1;
                    warn!(session = %session_id, error = %e, errors, "readiness poll failed");
                    match policy.max_errors {
                        Some(max) if errors >= max => {
                            format!("{errors} consecutive poll failures, last: {e}")
                        }
                        _ => continue,
                    }
                }
                Err(SessionError::NotAwaiting(_)) => {
                    debug!(session = %session_id, generation, "poll task superseded");
                    return;
                }
                Err(e) => {
                    debug!(session = %session_id, error = %e, "poll task finished");
                    return;
                }
            };

            error!(session = %session_id, reason = %failure, "giving up on session");
            self.notify(Notice::PollFailed {
                session_id: session_id.clone(),
                reason: failure,
            });
            self.teardown(Some(generation)).await;
            return;
        }
    }

    fn ensure_awaiting(&self, session_id: &str, generation: u64) -> Result<(), SessionError> {
        if is_awaiting(&self.lock(), session_id, generation) {
            Ok(())
        } else {
            Err(SessionError::NotAwaiting(session_id.to_string()))
        }
    }

    async fn poll_once(
        self: &Arc<Self>,
        session_id: &str,
        generation: u64,
    ) -> Result<PollOutcome, SessionError> {
        self.ensure_awaiting(session_id, generation)?;
        let response = self.backend.get_session_info(session_id).await?;
        if !response.is_ready() {
            self.ensure_awaiting(session_id, generation)?;
            debug!(session = %session_id, status = response.status, "session not ready yet");
            return Ok(PollOutcome::NotReady {
                status: response.status,
            });
        }

        let mut descriptor = response.data.unwrap_or_else(|| SessionDescriptor {
            id: session_id.to_string(),
            routes: BTreeMap::new(),
        });
        descriptor.id = session_id.to_string();
        {
            let mut inner = self.lock();
            if !is_awaiting(&inner, session_id, generation) {
                return Err(SessionError::NotAwaiting(session_id.to_string()));
            }
            if let Some(session) = inner.session.as_mut() {
                session.status = SessionStatus::Ready;
                session.routes = descriptor.routes.clone();
            }
            self.set_phase(&mut inner, SessionPhase::Ready);
        }
        info!(session = %session_id, "session ready");

        let params = self.resolve_and_attach(&descriptor, generation).await?;
        Ok(PollOutcome::Streaming(params))
    }

    async fn resolve_and_attach(
        self: &Arc<Self>,
        descriptor: &SessionDescriptor,
        generation: u64,
    ) -> Result<ConnectionParameters, SessionError> {
        let params = match routes::resolve(
            descriptor,
            self.backend.base_url(),
            &self.config.access_token,
        ) {
            Ok(params) => params,
            Err(e) => {
                error!(session = %descriptor.id, error = %e, "route resolution failed");
                self.notify(Notice::RouteResolutionFailed {
                    session_id: descriptor.id.clone(),
                    reason: e.to_string(),
                });
                self.teardown(Some(generation)).await;
                return Err(e.into());
            }
        };

        {
            let mut inner = self.lock();
            if inner.generation != generation || inner.phase != SessionPhase::Ready {
                return Err(SessionError::Cancelled(descriptor.id.clone()));
            }
            if let Some(session) = inner.session.as_mut() {
                session.connection = Some(params.clone());
            }
        }
        self.attach(params, generation).await
    }

    async fn attach(
        self: &Arc<Self>,
        params: ConnectionParameters,
        generation: u64,
    ) -> Result<ConnectionParameters, SessionError> {
        if let Err(e) = self.transport.attach(&params).await {
            error!(session = %params.session_id, error = %e, "stream attach failed");
            self.notify(Notice::AttachFailed {
                session_id: params.session_id.clone(),
                reason: e.to_string(),
            });
            self.teardown(Some(generation)).await;
            return Err(e.into());
        }

        let (current, started) = {
            let mut inner = self.lock();
            let current = inner.generation == generation && inner.phase == SessionPhase::Ready;
            if current {
                self.set_phase(&mut inner, SessionPhase::Streaming);
            }
            (current, inner.started_pending.take() == Some(generation))
        };
        if !current {
            debug!(session = %params.session_id, "session ended while attaching");
            self.transport.release().await;
            return Err(SessionError::Cancelled(params.session_id));
        }
        if started {
            self.on_stream_started().await;
        }
        Ok(params)
    }

    async fn attach_local(
        self: &Arc<Self>,
        local: &LocalConfig,
    ) -> Result<ConnectionParameters, SessionError> {
        let params = routes::local_parameters(local, &self.config.access_token);
        let generation = {
            let mut inner = self.lock();
            if inner.phase != SessionPhase::Idle {
                return Err(SessionError::Busy(inner.phase));
            }
            inner.generation += 1;
            inner.proof_of_life = None;
            inner.started_pending = None;
            inner.session = Some(Session::local(params.clone()));
            self.set_phase(&mut inner, SessionPhase::Ready);
            inner.generation
        };
        self.dispatcher().reset();
        info!(
            server = %params.signaling_server,
            signaling_port = params.signaling_port,
            media_port = params.media_port,
            "attaching to local kit"
        );
        self.attach(params, generation).await
    }

    /// Shared by `end_session` and every failure path that abandons a session.
    ///
    /// With `expected` set, only tears down if that attempt is still current.
    async fn teardown(&self, expected: Option<u64>) -> TeardownOutcome {
        let session = {
            let mut inner = self.lock();
            if expected.is_some_and(|generation| generation != inner.generation) {
                debug!("teardown skipped, attempt superseded");
                return TeardownOutcome::NoSession;
            }
            match inner.phase {
                SessionPhase::Idle => {
                    debug!("end requested with no session");
                    return TeardownOutcome::NoSession;
                }
                SessionPhase::TearingDown => {
                    debug!("teardown already in progress");
                    return TeardownOutcome::NoSession;
                }
                _ => {}
            }
            inner.generation += 1;
            inner.proof_of_life = None;
            inner.started_pending = None;
            match inner.session.take() {
                Some(session) => {
                    self.set_phase(&mut inner, SessionPhase::TearingDown);
                    session
                }
                None => {
                    info!("session creation cancelled");
                    self.set_phase(&mut inner, SessionPhase::Idle);
                    return TeardownOutcome::Cancelled;
                }
            }
        };

        let outcome = if session.managed {
            self.destroy_remote(&session.id).await
        } else {
            TeardownOutcome::Released {
                session_id: session.id.clone(),
            }
        };

        self.dispatcher().reset();
        self.transport.release().await;
        {
            let mut inner = self.lock();
            self.set_phase(&mut inner, SessionPhase::Idle);
        }
        info!(session = %session.id, ?outcome, "session ended");
        outcome
    }

    async fn destroy_remote(&self, session_id: &str) -> TeardownOutcome {
        match self.backend.get_session_info(session_id).await {
            Ok(info) if info.is_error() => {
                info!(
                    session = %session_id,
                    status = info.status,
                    "session already gone on backend"
                );
                return TeardownOutcome::AlreadyGone {
                    session_id: session_id.to_string(),
                };
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    session = %session_id,
                    error = %e,
                    "could not query session, destroying anyway"
                )
            }
        }

        let detail = match self.backend.destroy_session(session_id).await {
            Ok(response) => match response.detail {
                None => {
                    return TeardownOutcome::Destroyed {
                        session_id: session_id.to_string(),
                    }
                }
                Some(detail) => detail,
            },
            Err(e) => e.to_string(),
        };
        warn!(session = %session_id, %detail, "session destroy reported a problem");
        self.notify(Notice::TeardownWarning {
            session_id: session_id.to_string(),
            detail: detail.clone(),
        });
        TeardownOutcome::Warning {
            session_id: session_id.to_string(),
            detail,
        }
    }

    async fn handle_transport_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Started => self.on_stream_started().await,
            TransportEvent::Focus => debug!("stream focused"),
            TransportEvent::Blur => debug!("stream blurred"),
            TransportEvent::LoggedIn { user_id } => {
                if !self.is_streaming("login") {
                    return;
                }
                let reaction = self.dispatcher().on_logged_in(&user_id);
                self.apply(reaction).await;
            }
            TransportEvent::StreamFailed { reason } => {
                let reason = reason.unwrap_or_else(|| "stream failed".to_string());
                error!(%reason, "streaming client failed");
                self.notify(Notice::TransportFailure { reason });
                self.teardown(None).await;
            }
            TransportEvent::Custom { event } => {
                if !self.is_streaming("custom event") {
                    return;
                }
                let reaction = self.dispatcher().handle_event(RemoteEvent::from_value(event));
                self.apply(reaction).await;
            }
        }
    }

    async fn on_stream_started(self: &Arc<Self>) {
        let generation = {
            let mut inner = self.lock();
            match inner.phase {
                SessionPhase::Streaming => {}
                SessionPhase::Ready => {
                    debug!("started callback during attach, deferred");
                    inner.started_pending = Some(inner.generation);
                    return;
                }
                phase => {
                    debug!(%phase, "started callback outside streaming");
                    return;
                }
            }
            if inner.proof_of_life == Some(inner.generation) {
                debug!("proof-of-life already running");
                return;
            }
            inner.proof_of_life = Some(inner.generation);
            inner.generation
        };
        let attached = self.transport.attached_session().await;
        info!(session = attached.as_deref().unwrap_or(""), "stream started");

        let reaction = self.dispatcher().on_started();
        if reaction == Reaction::None {
            return;
        }
        self.apply(reaction).await;

        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.proof_of_life(generation).await });
    }

    async fn proof_of_life(self: Arc<Self>, generation: u64) {
        loop {
            tokio::time::sleep(self.config.proof_of_life_interval).await;
            {
                let inner = self.lock();
                if inner.generation != generation || inner.phase != SessionPhase::Streaming {
                    debug!(generation, "proof-of-life stopped");
                    return;
                }
            }
            let waiting = self.dispatcher().needs_proof_of_life();
            if !waiting {
                debug!("kit answered, proof-of-life done");
                return;
            }
            debug!("kit has not answered yet, querying again");
            self.send_query().await;
        }
    }

    async fn apply(&self, reaction: Reaction) {
        match reaction {
            Reaction::None => {}
            Reaction::SendQuery => self.send_query().await,
            Reaction::LoadError(detail) => self.notify(Notice::LoadError { detail }),
        }
    }

    async fn send_query(&self) {
        let query = RemoteMessage::loading_state_query();
        if let Err(e) = self.transport.send(&query).await {
            warn!(error = %e, "loading state query not sent");
        }
    }
}

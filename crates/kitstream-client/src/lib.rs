//! Control surface for a remotely streamed Kit application.
//!
//! Creates sessions on the streaming control plane, waits for their routes,
//! hands the routes to the streaming client and answers the remote
//! application's load-progress protocol.

pub mod backend;
pub mod catalog;
pub mod dispatcher;
pub mod events;
pub mod routes;
pub mod session;
pub mod transport;

pub use backend::{BackendError, BackendResponse, HttpSessionBackend, SessionBackend};
pub use catalog::CatalogClient;
pub use dispatcher::{EventDispatcher, Reaction, RemoteAppState};
pub use events::RemoteEvent;
pub use routes::{ConnectionParameters, RouteError};
pub use session::{
    ControllerConfig, Notice, PollOutcome, PollPolicy, Session, SessionController, SessionError,
    SessionPhase, SessionStatus, TeardownOutcome,
};
pub use transport::{StreamTransport, TransportError, TransportEvent, TransportHandle};

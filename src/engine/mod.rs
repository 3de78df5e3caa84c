//! Narrow capability set the negotiation core needs from a transport engine.
//!
//! Completion callbacks and observer notifications are delivered on the
//! signaling context and must not block. Observers are registered weakly: a
//! notification for a session or channel that is already gone is dropped.

pub mod context;
pub mod loopback;
pub mod webrtc;

use crate::peer::state::{ChannelState, ConnectionState, GatheringState};
use crate::peer::types::{Candidate, Description, SessionConfig};
use bytes::Bytes;
use std::sync::{Arc, Weak};
use thiserror::Error;

pub use context::{ContextHandle, EngineContext, EngineKind, ExecutionContext};
pub use loopback::{LoopbackBehavior, LoopbackEngine};
pub use webrtc::WebRtcEngine;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine refused: {0}")]
    Refused(String),
    #[error("cannot parse description: {0}")]
    Parse(String),
    #[error("engine rejected the request: {0}")]
    Rejected(String),
    #[error("engine operation failed: {0}")]
    Failed(String),
    #[error("execution context is shut down")]
    ContextClosed,
}

pub type DescriptionCallback = Box<dyn FnOnce(Result<Description, EngineError>) + Send + 'static>;

/// Session factory.
pub trait Engine: Send + Sync {
    fn create_session(
        &self,
        config: &SessionConfig,
        observer: Weak<dyn SessionObserver>,
    ) -> Result<Arc<dyn EngineSession>, EngineError>;
}

pub trait EngineSession: Send + Sync {
    fn create_offer(&self, done: DescriptionCallback);

    fn create_answer(&self, done: DescriptionCallback);

    /// Applies asynchronously; failures are only logged.
    fn set_local_description(&self, description: Description);

    /// Parses synchronously and reports `EngineError::Parse` on bad input.
    fn set_remote_description(&self, description: &Description) -> Result<(), EngineError>;

    fn create_data_channel(&self, label: &str) -> Result<Arc<dyn EngineChannel>, EngineError>;

    fn add_ice_candidate(&self, candidate: &Candidate) -> bool;

    fn close(&self);
}

pub trait EngineChannel: Send + Sync {
    fn label(&self) -> String;

    fn state(&self) -> ChannelState;

    fn register_observer(&self, observer: Weak<dyn ChannelObserver>);

    fn unregister_observer(&self);

    fn send(&self, payload: Bytes, is_binary: bool) -> Result<(), EngineError>;

    fn close(&self);
}

/// Session-level notifications from the engine.
pub trait SessionObserver: Send + Sync {
    fn on_ice_candidate(&self, candidate: Candidate);

    fn on_ice_gathering_state_changed(&self, state: GatheringState);

    fn on_data_channel(&self, channel: Arc<dyn EngineChannel>);

    fn on_connection_state_changed(&self, state: ConnectionState);
}

/// Channel-level notifications from the engine.
pub trait ChannelObserver: Send + Sync {
    fn on_state_changed(&self, state: ChannelState);

    fn on_message(&self, payload: Bytes, is_binary: bool);
}

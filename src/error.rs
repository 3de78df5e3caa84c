use crate::engine::EngineError;
use crate::peer::state::NegotiationPhase;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("session initialization failed: {0}")]
    Initialization(String),
    #[error("session is already initialized")]
    AlreadyInitialized,
    #[error("session is not initialized")]
    NotInitialized,
    #[error("malformed remote description: {0}")]
    MalformedDescription(String),
    #[error("cannot {operation} while {phase}")]
    InvalidPhase {
        phase: NegotiationPhase,
        operation: &'static str,
    },
    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),
    #[error("channel is not open")]
    ChannelNotOpen,
    #[error("timed out after {waited:?} waiting for {what}")]
    NegotiationTimeout { what: &'static str, waited: Duration },
    #[error("candidate {index} rejected; earlier candidates stay applied")]
    CandidateRejected { index: usize },
    #[error("engine failure: {0}")]
    Engine(#[from] EngineError),
}

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("bundle is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("bundle compression failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("bundle is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bundle exceeds {limit} bytes once decompressed")]
    TooLarge { limit: u64 },
}

pub type Result<T, E = NegotiationError> = std::result::Result<T, E>;

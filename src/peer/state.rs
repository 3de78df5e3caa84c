use std::fmt;

/// Per-session negotiation phase.
///
/// Caller: `Idle → OfferRequested → OfferReady → AnswerApplied → Connected`.
/// Receiver: `Idle → RemoteDescriptionSet → AnswerRequested → AnswerReady → Connected`.
/// `Closed` is reachable from anywhere and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationPhase {
    Idle,
    OfferRequested,
    OfferReady,
    RemoteDescriptionSet,
    AnswerRequested,
    AnswerReady,
    AnswerApplied,
    Connected,
    Closed,
}

impl NegotiationPhase {
    pub fn can_advance_to(self, next: NegotiationPhase) -> bool {
        use NegotiationPhase::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Idle, OfferRequested)
            | (OfferRequested, OfferReady)
            | (OfferReady, AnswerApplied)
            | (Idle, RemoteDescriptionSet)
            | (RemoteDescriptionSet, AnswerRequested)
            | (AnswerRequested, AnswerReady)
            | (AnswerApplied, Connected)
            | (AnswerReady, Connected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for NegotiationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Message channel lifecycle. Only moves forward; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

impl ChannelState {
    pub fn can_transition_to(self, next: ChannelState) -> bool {
        matches!(
            (self, next),
            (ChannelState::Connecting, ChannelState::Open)
                | (ChannelState::Connecting, ChannelState::Closed)
                | (ChannelState::Open, ChannelState::Closed)
        )
    }
}

/// Candidate gathering track, independent from the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringState {
    New,
    Gathering,
    Complete,
}

/// Transport connectivity as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

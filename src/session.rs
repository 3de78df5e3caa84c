//! Per-peer negotiator.
//!
//! Engine callbacks run on the signaling context and only write state and
//! fire signals. Every `wait_*` runs on the caller's thread. Values guarded by
//! a [`Completion`] are written before the signal fires, so a waiter never
//! sees a signaled but empty slot.

use crate::engine::{
    DescriptionCallback, Engine, EngineChannel, EngineContext, EngineError, EngineSession,
    SessionObserver,
};
use crate::error::{NegotiationError, Result};
use crate::logger::{dump_candidate, dump_description};
use crate::peer::data_channel::{Channel, ChannelListener};
use crate::peer::handle::Handle;
use crate::peer::signal::{Completion, Signal};
use crate::peer::state::{ConnectionState, GatheringState, NegotiationPhase};
use crate::peer::types::{Candidate, Description, SdpType, SessionConfig};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Gathering {
    state: Option<GatheringState>,
    candidates: Vec<Candidate>,
}

struct SessionShared {
    config: SessionConfig,
    phase: Mutex<NegotiationPhase>,
    engine: Mutex<Option<Arc<dyn EngineSession>>>,
    local: Completion<Description>,
    remote: OnceCell<Description>,
    gathering: Mutex<Gathering>,
    candidates: Completion<Vec<Candidate>>,
    connection: Mutex<ConnectionState>,
    connected: Signal,
    // Lock order: channels, then channel_listeners.
    channels: Mutex<Vec<Channel>>,
    channel_listeners: Mutex<Vec<Arc<dyn ChannelListener>>>,
    channel_ready: Signal,
}

impl SessionShared {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn engine(&self) -> Result<Arc<dyn EngineSession>> {
        self.engine
            .lock()
            .clone()
            .ok_or(NegotiationError::NotInitialized)
    }

    fn advance(&self, next: NegotiationPhase, operation: &'static str) -> Result<()> {
        let mut phase = self.phase.lock();
        if !phase.can_advance_to(next) {
            return Err(NegotiationError::InvalidPhase {
                phase: *phase,
                operation,
            });
        }
        debug!(session = %self.name(), from = %*phase, to = %next, "phase changed");
        *phase = next;
        Ok(())
    }

    fn on_description(
        &self,
        kind: SdpType,
        result: std::result::Result<Description, EngineError>,
    ) {
        let description = match result {
            Ok(description) => description,
            Err(e) => {
                warn!(session = %self.name(), %kind, error = %e, "description creation failed");
                return;
            }
        };
        let Some(engine) = self.engine.lock().clone() else {
            debug!(session = %self.name(), %kind, "description arrived after destroy");
            return;
        };
        let ready = match kind {
            SdpType::Offer => NegotiationPhase::OfferReady,
            SdpType::Answer => NegotiationPhase::AnswerReady,
        };
        if let Err(e) = self.advance(ready, "store local description") {
            warn!(session = %self.name(), error = %e, "local description dropped");
            return;
        }
        engine.set_local_description(description.clone());
        dump_description(self.name(), "local", &description);
        self.local.complete(description);
    }
}

impl SessionObserver for SessionShared {
    fn on_ice_candidate(&self, candidate: Candidate) {
        let mut gathering = self.gathering.lock();
        if self.candidates.is_complete() {
            debug!(session = %self.name(), "candidate after gathering completed ignored");
            return;
        }
        dump_candidate(self.name(), "local", &candidate);
        gathering.candidates.push(candidate);
    }

    fn on_ice_gathering_state_changed(&self, state: GatheringState) {
        let mut gathering = self.gathering.lock();
        debug!(session = %self.name(), ?state, "gathering state changed");
        gathering.state = Some(state);
        if state == GatheringState::Complete {
            let frozen = gathering.candidates.clone();
            info!(session = %self.name(), count = frozen.len(), "candidate gathering complete");
            self.candidates.complete(frozen);
        }
    }

    fn on_data_channel(&self, engine_channel: Arc<dyn EngineChannel>) {
        if *self.phase.lock() == NegotiationPhase::Closed {
            engine_channel.close();
            return;
        }
        let mut channels = self.channels.lock();
        let listeners = self.channel_listeners.lock().clone();
        let channel = Channel::attach(engine_channel, listeners);
        info!(session = %self.name(), label = channel.label(), "remote data channel announced");
        channels.push(channel);
        self.channel_ready.set();
    }

    fn on_connection_state_changed(&self, state: ConnectionState) {
        *self.connection.lock() = state;
        match state {
            ConnectionState::Connected => {
                info!(session = %self.name(), "peer connection connected");
                if let Err(e) = self.advance(NegotiationPhase::Connected, "mark connected") {
                    debug!(
                        session = %self.name(),
                        error = %e,
                        "connected outside the negotiation path"
                    );
                }
                self.connected.set();
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {
                warn!(session = %self.name(), ?state, "peer connection lost");
            }
            _ => debug!(session = %self.name(), ?state, "connection state changed"),
        }
    }
}

/// One peer of a negotiation round.
pub struct Session {
    factory: Arc<dyn Engine>,
    shared: Handle<SessionShared>,
}

impl Session {
    pub fn new(context: &EngineContext, config: SessionConfig) -> Self {
        Self {
            factory: context.engine(),
            shared: Handle::new(SessionShared {
                config,
                phase: Mutex::new(NegotiationPhase::Idle),
                engine: Mutex::new(None),
                local: Completion::new(),
                remote: OnceCell::new(),
                gathering: Mutex::new(Gathering::default()),
                candidates: Completion::new(),
                connection: Mutex::new(ConnectionState::New),
                connected: Signal::manual_reset(),
                channels: Mutex::new(Vec::new()),
                channel_listeners: Mutex::new(Vec::new()),
                channel_ready: Signal::manual_reset(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn phase(&self) -> NegotiationPhase {
        *self.shared.phase.lock()
    }

    pub fn gathering_state(&self) -> Option<GatheringState> {
        self.shared.gathering.lock().state
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.connection.lock()
    }

    pub fn local_description(&self) -> Option<Description> {
        self.shared.local.get().cloned()
    }

    pub fn remote_description(&self) -> Option<Description> {
        self.shared.remote.get().cloned()
    }

    /// Allocates the engine session. Calling it twice is an error.
    pub fn initialize(&self) -> Result<()> {
        let mut slot = self.shared.engine.lock();
        if slot.is_some() {
            return Err(NegotiationError::AlreadyInitialized);
        }
        let phase = self.phase();
        if phase == NegotiationPhase::Closed {
            return Err(NegotiationError::InvalidPhase {
                phase,
                operation: "initialize",
            });
        }
        let observer: Weak<dyn SessionObserver> = self.shared.downgrade();
        let engine = self
            .factory
            .create_session(&self.shared.config, observer)
            .map_err(|e| NegotiationError::Initialization(e.to_string()))?;
        *slot = Some(engine);
        info!(session = %self.name(), "session initialized");
        Ok(())
    }

    /// Requests a channel from the engine session.
    pub fn open_channel(&self, label: &str) -> Result<Channel> {
        let engine = self.shared.engine.lock().clone();
        let mut channels = self.shared.channels.lock();
        let listeners = self.shared.channel_listeners.lock().clone();
        let channel = Channel::open(engine.as_ref(), label, listeners)?;
        info!(session = %self.name(), label, "data channel requested");
        channels.push(channel.clone());
        self.shared.channel_ready.set();
        Ok(channel)
    }

    /// The first channel this session owns, local or announced.
    pub fn channel(&self) -> Option<Channel> {
        self.shared.channels.lock().first().cloned()
    }

    pub fn wait_channel(&self, timeout: Duration) -> Option<Channel> {
        if self.shared.channel_ready.wait_timeout(timeout) {
            self.channel()
        } else {
            None
        }
    }

    /// Registers a listener on the current channels and on any channel
    /// the engine announces later.
    pub fn add_channel_listener(&self, listener: Arc<dyn ChannelListener>) {
        let channels = self.shared.channels.lock();
        self.shared.channel_listeners.lock().push(listener.clone());
        for channel in channels.iter() {
            channel.add_listener(listener.clone());
        }
    }

    pub fn create_offer(&self) -> Result<()> {
        self.describe(SdpType::Offer)
    }

    pub fn create_answer(&self) -> Result<()> {
        self.describe(SdpType::Answer)
    }

    fn describe(&self, kind: SdpType) -> Result<()> {
        let engine = self.shared.engine()?;
        let (requested, operation) = match kind {
            SdpType::Offer => (NegotiationPhase::OfferRequested, "create offer"),
            SdpType::Answer => (NegotiationPhase::AnswerRequested, "create answer"),
        };
        self.shared.advance(requested, operation)?;
        let shared = self.shared.acquire();
        let done: DescriptionCallback = Box::new(move |result| {
            shared.on_description(kind, result);
        });
        match kind {
            SdpType::Offer => engine.create_offer(done),
            SdpType::Answer => engine.create_answer(done),
        }
        debug!(session = %self.name(), %kind, "description requested");
        Ok(())
    }

    /// Blocks until the local description exists. `None` on timeout, which
    /// also covers an engine that failed to produce one.
    pub fn wait_description(&self, timeout: Duration) -> Option<Description> {
        self.shared.local.wait(Some(timeout)).cloned()
    }

    /// Hands a remote description to the engine. A parse failure leaves the
    /// phase untouched.
    pub fn apply_remote_description(&self, kind: SdpType, body: &str) -> Result<()> {
        let engine = self.shared.engine()?;
        let (next, operation) = match kind {
            SdpType::Offer => (NegotiationPhase::RemoteDescriptionSet, "apply remote offer"),
            SdpType::Answer => (NegotiationPhase::AnswerApplied, "apply remote answer"),
        };
        // Held across the engine call so a connection event raised by it
        // cannot overtake the phase change.
        let mut phase = self.shared.phase.lock();
        if !phase.can_advance_to(next) || self.shared.remote.get().is_some() {
            return Err(NegotiationError::InvalidPhase {
                phase: *phase,
                operation,
            });
        }
        let description = Description::new(kind, body);
        engine
            .set_remote_description(&description)
            .map_err(|e| match e {
                EngineError::Parse(reason) => NegotiationError::MalformedDescription(reason),
                other => NegotiationError::Engine(other),
            })?;
        debug!(session = %self.name(), from = %*phase, to = %next, "phase changed");
        *phase = next;
        dump_description(self.name(), "remote", &description);
        let _ = self.shared.remote.set(description);
        Ok(())
    }

    /// Applies candidates in order. Stops at the first rejection and reports
    /// its index; earlier candidates stay applied.
    pub fn add_candidates(&self, candidates: &[Candidate]) -> Result<()> {
        let engine = self.shared.engine()?;
        for (index, candidate) in candidates.iter().enumerate() {
            if !engine.add_ice_candidate(candidate) {
                warn!(session = %self.name(), index, "remote candidate rejected");
                return Err(NegotiationError::CandidateRejected { index });
            }
            dump_candidate(self.name(), "remote", candidate);
        }
        Ok(())
    }

    /// Blocks until gathering completes and returns the frozen candidate list.
    pub fn wait_candidates(&self, timeout: Duration) -> Option<Vec<Candidate>> {
        self.shared.candidates.wait(Some(timeout)).cloned()
    }

    pub fn wait_connected(&self, timeout: Duration) -> bool {
        self.shared.connected.wait_timeout(timeout)
    }

    /// Closes channels and the engine session. Safe at any phase and safe
    /// to repeat. In-flight callbacks still hold the shared state and find
    /// it closed.
    pub fn destroy(&self) {
        {
            let mut phase = self.shared.phase.lock();
            if *phase == NegotiationPhase::Closed {
                return;
            }
            *phase = NegotiationPhase::Closed;
        }
        let channels = std::mem::take(&mut *self.shared.channels.lock());
        for channel in &channels {
            channel.close();
        }
        self.shared.channel_listeners.lock().clear();
        let engine = self.shared.engine.lock().take();
        if let Some(engine) = engine {
            engine.close();
        }
        info!(session = %self.name(), "session destroyed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.destroy();
    }
}

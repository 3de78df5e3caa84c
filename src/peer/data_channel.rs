use crate::engine::{ChannelObserver, EngineChannel, EngineSession};
use crate::error::{NegotiationError, Result};
use crate::peer::handle::Handle;
use crate::peer::signal::Signal;
use crate::peer::state::ChannelState;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Application-side listener for one channel.
pub trait ChannelListener: Send + Sync {
    fn on_state_changed(&self, _state: ChannelState) {}

    fn on_message(&self, _payload: &Bytes, _is_binary: bool) {}
}

/// Logs what arrives on a channel.
pub struct LoggingListener {
    peer: String,
}

impl LoggingListener {
    pub fn new(peer: impl Into<String>) -> Self {
        Self { peer: peer.into() }
    }
}

impl ChannelListener for LoggingListener {
    fn on_state_changed(&self, state: ChannelState) {
        info!(peer = %self.peer, ?state, "data channel state changed");
    }

    fn on_message(&self, payload: &Bytes, is_binary: bool) {
        if is_binary {
            info!(peer = %self.peer, len = payload.len(), "binary message received");
        } else {
            info!(
                peer = %self.peer,
                text = %String::from_utf8_lossy(payload),
                "text message received"
            );
        }
    }
}

struct ChannelShared {
    label: String,
    // Guards the engine link and the state together: sends race with
    // close and with engine-driven transitions.
    link: Mutex<Link>,
    listeners: Mutex<Vec<Arc<dyn ChannelListener>>>,
    settled: Signal,
}

struct Link {
    state: ChannelState,
    engine: Option<Arc<dyn EngineChannel>>,
}

impl ChannelShared {
    fn listeners(&self) -> Vec<Arc<dyn ChannelListener>> {
        self.listeners.lock().clone()
    }

    fn advance(&self, next: ChannelState) -> bool {
        {
            let mut link = self.link.lock();
            if !link.state.can_transition_to(next) {
                return false;
            }
            link.state = next;
        }
        debug!(label = %self.label, ?next, "channel state changed");
        self.settled.set();
        true
    }
}

impl ChannelObserver for ChannelShared {
    fn on_state_changed(&self, state: ChannelState) {
        if self.advance(state) {
            for listener in self.listeners() {
                listener.on_state_changed(state);
            }
        }
    }

    fn on_message(&self, payload: Bytes, is_binary: bool) {
        for listener in self.listeners() {
            listener.on_message(&payload, is_binary);
        }
    }
}

/// Bidirectional message channel: `Connecting → Open → Closed`.
#[derive(Clone)]
pub struct Channel {
    shared: Handle<ChannelShared>,
}

impl Channel {
    /// Asks the engine session for a new channel.
    pub fn open(
        session: Option<&Arc<dyn EngineSession>>,
        label: &str,
        listeners: Vec<Arc<dyn ChannelListener>>,
    ) -> Result<Self> {
        let session = session.ok_or_else(|| {
            NegotiationError::ChannelUnavailable("session has no engine connection".into())
        })?;
        let engine = session
            .create_data_channel(label)
            .map_err(|e| NegotiationError::ChannelUnavailable(e.to_string()))?;
        Ok(Self::attach(engine, listeners))
    }

    /// Wraps a channel the engine already created (remote announcement).
    pub fn attach(
        engine: Arc<dyn EngineChannel>,
        listeners: Vec<Arc<dyn ChannelListener>>,
    ) -> Self {
        let shared = Handle::new(ChannelShared {
            label: engine.label(),
            link: Mutex::new(Link {
                state: ChannelState::Connecting,
                engine: Some(engine.clone()),
            }),
            listeners: Mutex::new(listeners),
            settled: Signal::manual_reset(),
        });
        let observer: Weak<dyn ChannelObserver> = shared.downgrade();
        engine.register_observer(observer);
        // The engine may have moved on before the observer was in place.
        let current = engine.state();
        if current != ChannelState::Connecting {
            shared.on_state_changed(current);
        }
        debug!(label = %shared.label, "channel attached");
        Self { shared }
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn state(&self) -> ChannelState {
        self.shared.link.lock().state
    }

    pub fn add_listener(&self, listener: Arc<dyn ChannelListener>) {
        self.shared.listeners.lock().push(listener);
    }

    /// Blocks until the channel opens or closes; `true` only when open.
    pub fn wait_open(&self, timeout: Duration) -> bool {
        self.shared.settled.wait_timeout(timeout) && self.state() == ChannelState::Open
    }

    /// Sends when open. Nothing is queued: a closed or connecting channel
    /// reports `ChannelNotOpen`.
    pub fn send(&self, payload: impl Into<Bytes>, is_binary: bool) -> Result<()> {
        let link = self.shared.link.lock();
        let engine = match (&link.state, &link.engine) {
            (ChannelState::Open, Some(engine)) => engine,
            _ => return Err(NegotiationError::ChannelNotOpen),
        };
        engine.send(payload.into(), is_binary).map_err(|e| {
            warn!(label = %self.shared.label, error = %e, "send failed");
            NegotiationError::Engine(e)
        })
    }

    pub fn send_text(&self, text: &str) -> Result<()> {
        self.send(Bytes::copy_from_slice(text.as_bytes()), false)
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send(data, true)
    }

    /// Unregisters listeners first, then tears the engine channel down.
    /// Safe to call repeatedly.
    pub fn close(&self) {
        self.shared.listeners.lock().clear();
        let engine = {
            let mut link = self.shared.link.lock();
            if let Some(engine) = &link.engine {
                engine.unregister_observer();
            }
            if link.state != ChannelState::Closed {
                link.state = ChannelState::Closed;
            }
            link.engine.take()
        };
        self.shared.settled.set();
        if let Some(engine) = engine {
            engine.close();
            debug!(label = %self.shared.label, "channel closed");
        }
    }
}

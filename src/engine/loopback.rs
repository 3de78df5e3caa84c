//! In-process engine: two sessions created by the same engine link to each
//! other once both hold a local and a remote description and the remote
//! description names the peer. Channels created before linking are mirrored
//! to the peer and announced through `on_data_channel`.

use crate::engine::context::ContextHandle;
use crate::engine::{
    ChannelObserver, DescriptionCallback, Engine, EngineChannel, EngineContext, EngineError,
    EngineSession, SessionObserver,
};
use crate::error::NegotiationError;
use crate::peer::state::{ChannelState, ConnectionState, GatheringState};
use crate::peer::types::{Candidate, Description, SdpType, SessionConfig};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

/// Scripted behaviour of the loopback engine.
#[derive(Debug, Clone)]
pub struct LoopbackBehavior {
    /// How long description creation takes before the callback fires.
    pub description_delay: Duration,
    /// Host candidates gathered per session.
    pub candidate_count: usize,
    /// Report every offer/answer creation as failed.
    pub fail_descriptions: bool,
    /// Refuse to create sessions at all.
    pub refuse_sessions: bool,
    /// Reject the n-th (0-based) `add_ice_candidate` call of each session.
    pub reject_candidate_at: Option<usize>,
}

impl Default for LoopbackBehavior {
    fn default() -> Self {
        Self {
            description_delay: Duration::from_millis(5),
            candidate_count: 2,
            fail_descriptions: false,
            refuse_sessions: false,
            reject_candidate_at: None,
        }
    }
}

#[derive(Default)]
struct Network {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<u64, Weak<LoopbackSession>>>,
    linking: Mutex<()>,
}

impl Network {
    fn session(&self, id: u64) -> Option<Arc<LoopbackSession>> {
        self.sessions.lock().get(&id).and_then(Weak::upgrade)
    }
}

pub struct LoopbackEngine {
    signaling: ContextHandle,
    behavior: LoopbackBehavior,
    network: Arc<Network>,
}

impl LoopbackEngine {
    pub fn new(signaling: ContextHandle, behavior: LoopbackBehavior) -> Self {
        Self {
            signaling,
            behavior,
            network: Arc::new(Network::default()),
        }
    }

    /// Builds an engine context around a loopback engine and keeps a typed
    /// handle to the engine for inspection.
    pub fn context(
        behavior: LoopbackBehavior,
    ) -> Result<(EngineContext, Arc<LoopbackEngine>), NegotiationError> {
        let mut typed = None;
        let context = EngineContext::with_factory(|_, signaling| {
            let engine = Arc::new(LoopbackEngine::new(signaling.clone(), behavior));
            typed = Some(engine.clone());
            let engine: Arc<dyn Engine> = engine;
            Ok(engine)
        })?;
        let engine = typed.ok_or_else(|| {
            NegotiationError::Initialization("loopback factory did not run".into())
        })?;
        Ok((context, engine))
    }

    /// Candidates the named session accepted, in application order.
    pub fn applied_candidates(&self, session: &str) -> Vec<Candidate> {
        let sessions: Vec<_> = self.network.sessions.lock().values().cloned().collect();
        sessions
            .iter()
            .filter_map(Weak::upgrade)
            .find(|s| s.name == session)
            .map(|s| s.state.lock().applied.clone())
            .unwrap_or_default()
    }
}

impl Engine for LoopbackEngine {
    fn create_session(
        &self,
        config: &SessionConfig,
        observer: Weak<dyn SessionObserver>,
    ) -> Result<Arc<dyn EngineSession>, EngineError> {
        if self.behavior.refuse_sessions {
            return Err(EngineError::Refused("loopback engine refuses sessions".into()));
        }
        let id = self.network.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(LoopbackSession {
            id,
            name: config.name.clone(),
            signaling: self.signaling.clone(),
            behavior: self.behavior.clone(),
            network: self.network.clone(),
            observer,
            state: Mutex::new(PeerState::default()),
        });
        self.network
            .sessions
            .lock()
            .insert(id, Arc::downgrade(&session));
        debug!(session = %config.name, id, "loopback session created");
        Ok(session)
    }
}

#[derive(Default)]
struct PeerState {
    local: Option<Description>,
    remote: Option<Description>,
    peer: Option<u64>,
    channels: Vec<Arc<LoopbackChannel>>,
    applied: Vec<Candidate>,
    candidate_calls: usize,
    connected: bool,
    closed: bool,
}

pub struct LoopbackSession {
    id: u64,
    name: String,
    signaling: ContextHandle,
    behavior: LoopbackBehavior,
    network: Arc<Network>,
    observer: Weak<dyn SessionObserver>,
    state: Mutex<PeerState>,
}

fn description_body(id: u64, name: &str, kind: SdpType) -> String {
    format!("v=0\r\no=- {id} 2 IN IP4 127.0.0.1\r\ns={name}-{kind}\r\nt=0 0\r\na=loopback\r\n")
}

fn parse_origin(body: &str) -> Result<u64, EngineError> {
    if !body.starts_with("v=0") {
        return Err(EngineError::Parse("missing version line".into()));
    }
    body.lines()
        .find_map(|line| line.strip_prefix("o=- "))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| EngineError::Parse("missing origin line".into()))
}

impl LoopbackSession {
    fn describe(&self, kind: SdpType, done: DescriptionCallback) {
        let result = {
            let st = self.state.lock();
            if st.closed {
                Err(EngineError::Failed("session closed".into()))
            } else if self.behavior.fail_descriptions {
                Err(EngineError::Failed(format!("{kind} creation failed")))
            } else if kind == SdpType::Answer && st.remote.is_none() {
                Err(EngineError::Rejected("answer needs a remote offer".into()))
            } else {
                Ok(Description::new(kind, description_body(self.id, &self.name, kind)))
            }
        };
        self.signaling
            .post_delayed(self.behavior.description_delay, move || done(result));
    }

    fn gather(&self) {
        let observer = self.observer.clone();
        let candidates: Vec<Candidate> = (0..self.behavior.candidate_count)
            .map(|i| {
                let port = 40000 + self.id * 16 + i as u64;
                Candidate::new(format!(
                    "candidate:{i} 1 udp {} 127.0.0.1 {port} typ host",
                    2130706431 - i as u64
                ))
            })
            .collect();
        self.signaling.post(move || {
            let Some(observer) = observer.upgrade() else {
                return;
            };
            observer.on_ice_gathering_state_changed(GatheringState::Gathering);
            for candidate in candidates {
                observer.on_ice_candidate(candidate);
            }
            observer.on_ice_gathering_state_changed(GatheringState::Complete);
        });
    }

    fn ready_for_link(&self) -> Option<u64> {
        let st = self.state.lock();
        if st.local.is_some() && st.remote.is_some() && !st.connected && !st.closed {
            st.peer
        } else {
            None
        }
    }

    fn mark_connected(&self) -> Vec<Arc<LoopbackChannel>> {
        let mut st = self.state.lock();
        st.connected = true;
        st.channels.clone()
    }

    fn adopt(&self, channel: Arc<LoopbackChannel>) {
        self.state.lock().channels.push(channel);
    }

    fn mirror(
        &self,
        channels: Vec<Arc<LoopbackChannel>>,
        onto: &LoopbackSession,
        links: &mut Vec<Arc<LoopbackChannel>>,
    ) -> Vec<Arc<LoopbackChannel>> {
        channels
            .into_iter()
            .map(|local| {
                let remote = LoopbackChannel::new(&local.label, self.signaling.clone());
                LoopbackChannel::link(&local, &remote);
                onto.adopt(remote.clone());
                links.push(local);
                links.push(remote.clone());
                remote
            })
            .collect()
    }

    fn try_link(&self) {
        let _linking = self.network.linking.lock();
        let Some(peer_id) = self.ready_for_link() else {
            return;
        };
        let Some(peer) = self.network.session(peer_id) else {
            debug!(session = %self.name, peer_id, "loopback peer not found");
            return;
        };
        if peer.ready_for_link() != Some(self.id) {
            return;
        }

        let mine = self.mark_connected();
        let theirs = peer.mark_connected();
        let mut links = Vec::new();
        let to_peer = self.mirror(mine, &peer, &mut links);
        let to_me = peer.mirror(theirs, self, &mut links);
        debug!(
            session = %self.name,
            peer = %peer.name,
            channels = links.len() / 2,
            "loopback sessions linked"
        );

        let deliveries = [(peer.observer.clone(), to_peer), (self.observer.clone(), to_me)];
        self.signaling.post(move || {
            for (observer, announced) in deliveries {
                let Some(observer) = observer.upgrade() else {
                    continue;
                };
                for channel in announced {
                    observer.on_data_channel(channel);
                }
                observer.on_connection_state_changed(ConnectionState::Connected);
            }
            for channel in links {
                channel.transition(ChannelState::Open);
            }
        });
    }
}

impl EngineSession for LoopbackSession {
    fn create_offer(&self, done: DescriptionCallback) {
        self.describe(SdpType::Offer, done);
    }

    fn create_answer(&self, done: DescriptionCallback) {
        self.describe(SdpType::Answer, done);
    }

    fn set_local_description(&self, description: Description) {
        {
            let mut st = self.state.lock();
            if st.closed {
                return;
            }
            st.local = Some(description);
        }
        self.gather();
        self.try_link();
    }

    fn set_remote_description(&self, description: &Description) -> Result<(), EngineError> {
        let peer = parse_origin(&description.body)?;
        {
            let mut st = self.state.lock();
            if st.closed {
                return Err(EngineError::Failed("session closed".into()));
            }
            if st.remote.is_some() {
                return Err(EngineError::Rejected("remote description already set".into()));
            }
            st.remote = Some(description.clone());
            st.peer = Some(peer);
        }
        self.try_link();
        Ok(())
    }

    fn create_data_channel(&self, label: &str) -> Result<Arc<dyn EngineChannel>, EngineError> {
        let mut st = self.state.lock();
        if st.closed {
            return Err(EngineError::Failed("session closed".into()));
        }
        let channel = LoopbackChannel::new(label, self.signaling.clone());
        st.channels.push(channel.clone());
        Ok(channel)
    }

    fn add_ice_candidate(&self, candidate: &Candidate) -> bool {
        let mut st = self.state.lock();
        let index = st.candidate_calls;
        st.candidate_calls += 1;
        if st.closed || self.behavior.reject_candidate_at == Some(index) {
            return false;
        }
        st.applied.push(candidate.clone());
        true
    }

    fn close(&self) {
        let channels = {
            let mut st = self.state.lock();
            if st.closed {
                return;
            }
            st.closed = true;
            st.connected = false;
            std::mem::take(&mut st.channels)
        };
        for channel in channels {
            channel.close();
        }
        self.network.sessions.lock().remove(&self.id);
        debug!(session = %self.name, "loopback session closed");
    }
}

pub struct LoopbackChannel {
    label: String,
    signaling: ContextHandle,
    state: Mutex<ChannelState>,
    observer: Mutex<Option<Weak<dyn ChannelObserver>>>,
    peer: Mutex<Weak<LoopbackChannel>>,
}

impl LoopbackChannel {
    fn new(label: &str, signaling: ContextHandle) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            signaling,
            state: Mutex::new(ChannelState::Connecting),
            observer: Mutex::new(None),
            peer: Mutex::new(Weak::new()),
        })
    }

    fn link(a: &Arc<Self>, b: &Arc<Self>) {
        *a.peer.lock() = Arc::downgrade(b);
        *b.peer.lock() = Arc::downgrade(a);
    }

    fn observer(&self) -> Option<Arc<dyn ChannelObserver>> {
        self.observer.lock().as_ref().and_then(Weak::upgrade)
    }

    fn set_state(&self, next: ChannelState) -> bool {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            return false;
        }
        *state = next;
        true
    }

    fn transition(&self, next: ChannelState) {
        if self.set_state(next) {
            if let Some(observer) = self.observer() {
                observer.on_state_changed(next);
            }
        }
    }

    fn deliver(&self, payload: Bytes, is_binary: bool) {
        if *self.state.lock() != ChannelState::Open {
            return;
        }
        if let Some(observer) = self.observer() {
            observer.on_message(payload, is_binary);
        }
    }
}

impl EngineChannel for LoopbackChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    fn register_observer(&self, observer: Weak<dyn ChannelObserver>) {
        *self.observer.lock() = Some(observer);
    }

    fn unregister_observer(&self) {
        *self.observer.lock() = None;
    }

    fn send(&self, payload: Bytes, is_binary: bool) -> Result<(), EngineError> {
        if *self.state.lock() != ChannelState::Open {
            return Err(EngineError::Failed("channel not open".into()));
        }
        let peer = self.peer.lock().clone();
        self.signaling.post(move || {
            if let Some(peer) = peer.upgrade() {
                peer.deliver(payload, is_binary);
            }
        });
        Ok(())
    }

    fn close(&self) {
        if !self.set_state(ChannelState::Closed) {
            return;
        }
        let observer = self.observer.lock().clone();
        let peer = self.peer.lock().clone();
        self.signaling.post(move || {
            if let Some(observer) = observer.as_ref().and_then(Weak::upgrade) {
                observer.on_state_changed(ChannelState::Closed);
            }
            if let Some(peer) = peer.upgrade() {
                peer.transition(ChannelState::Closed);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_is_read_back_from_generated_body() {
        let body = description_body(7, "caller", SdpType::Offer);
        assert!(body.starts_with("v=0"));
        assert!(body.contains("caller-offer"));
        assert_eq!(parse_origin(&body), Ok(7));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(parse_origin("garbage"), Err(EngineError::Parse(_))));
        assert!(matches!(parse_origin("v=0\r\ns=-\r\n"), Err(EngineError::Parse(_))));
    }
}

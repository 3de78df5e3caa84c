use crate::engine::context::ContextHandle;
use crate::engine::{
    ChannelObserver, DescriptionCallback, Engine, EngineChannel, EngineError, EngineSession,
    SessionObserver,
};
use crate::peer::state::{ChannelState, ConnectionState, GatheringState};
use crate::peer::types::{Candidate, Description, SdpType, ServerConfig, SessionConfig};
use crate::utils::add_ice_url_scheme;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// Engine backed by webrtc-rs. Engine work runs on the worker context,
/// notifications are re-posted to the signaling context.
pub struct WebRtcEngine {
    api: Arc<API>,
    worker: ContextHandle,
    signaling: ContextHandle,
}

impl WebRtcEngine {
    pub fn new(worker: ContextHandle, signaling: ContextHandle) -> Self {
        Self {
            api: Arc::new(APIBuilder::new().build()),
            worker,
            signaling,
        }
    }
}

/// Peer connection configuration from the configured ICE servers
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn to_rtc(description: &Description) -> Result<RTCSessionDescription, EngineError> {
    let parsed = match description.kind {
        SdpType::Offer => RTCSessionDescription::offer(description.body.clone()),
        SdpType::Answer => RTCSessionDescription::answer(description.body.clone()),
    };
    parsed.map_err(|e| EngineError::Parse(e.to_string()))
}

impl Engine for WebRtcEngine {
    fn create_session(
        &self,
        config: &SessionConfig,
        observer: Weak<dyn SessionObserver>,
    ) -> Result<Arc<dyn EngineSession>, EngineError> {
        let api = self.api.clone();
        let rtc = rtc_config(&config.ice_servers);
        let pc = self
            .worker
            .invoke(async move { api.new_peer_connection(rtc).await })?
            .map_err(|e| EngineError::Refused(e.to_string()))?;
        let pc = Arc::new(pc);
        observe_peer(&pc, &config.name, observer, &self.worker, &self.signaling);
        debug!(
            session = %config.name,
            servers = config.ice_servers.len(),
            "peer connection created"
        );
        Ok(Arc::new(WebRtcSession {
            name: config.name.clone(),
            pc,
            worker: self.worker.clone(),
            signaling: self.signaling.clone(),
        }))
    }
}

fn gathering_state(state: RTCIceGathererState) -> Option<GatheringState> {
    match state {
        RTCIceGathererState::New => Some(GatheringState::New),
        RTCIceGathererState::Gathering => Some(GatheringState::Gathering),
        RTCIceGathererState::Complete => Some(GatheringState::Complete),
        _ => None,
    }
}

fn connection_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

fn observe_peer(
    pc: &RTCPeerConnection,
    name: &str,
    observer: Weak<dyn SessionObserver>,
    worker: &ContextHandle,
    signaling: &ContextHandle,
) {
    {
        let observer = observer.clone();
        let signaling = signaling.clone();
        let name = name.to_string();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            if let Some(c) = cand {
                match c.to_json() {
                    Ok(init) => {
                        let candidate = Candidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        };
                        let observer = observer.clone();
                        signaling.post(move || {
                            if let Some(observer) = observer.upgrade() {
                                observer.on_ice_candidate(candidate);
                            }
                        });
                    }
                    Err(e) => warn!(session = %name, error = %e, "cannot serialize candidate"),
                }
            }
            Box::pin(async {})
        }));
    }

    {
        let observer = observer.clone();
        let signaling = signaling.clone();
        pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            if let Some(state) = gathering_state(state) {
                let observer = observer.clone();
                signaling.post(move || {
                    if let Some(observer) = observer.upgrade() {
                        observer.on_ice_gathering_state_changed(state);
                    }
                });
            }
            Box::pin(async {})
        }));
    }

    {
        let observer = observer.clone();
        let signaling = signaling.clone();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            if let Some(state) = connection_state(st) {
                let observer = observer.clone();
                signaling.post(move || {
                    if let Some(observer) = observer.upgrade() {
                        observer.on_connection_state_changed(state);
                    }
                });
            }
            Box::pin(async {})
        }));
    }

    let worker = worker.clone();
    let signaling = signaling.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let channel = WebRtcChannel::new(dc, worker.clone(), &signaling);
        let observer = observer.clone();
        signaling.post(move || {
            if let Some(observer) = observer.upgrade() {
                observer.on_data_channel(channel);
            }
        });
        Box::pin(async {})
    }));
}

struct WebRtcSession {
    name: String,
    pc: Arc<RTCPeerConnection>,
    worker: ContextHandle,
    signaling: ContextHandle,
}

impl WebRtcSession {
    fn describe(&self, kind: SdpType, done: DescriptionCallback) {
        let pc = self.pc.clone();
        let signaling = self.signaling.clone();
        self.worker.spawn(async move {
            let created = match kind {
                SdpType::Offer => pc.create_offer(None).await,
                SdpType::Answer => pc.create_answer(None).await,
            };
            let result = created
                .map(|desc| Description::new(kind, desc.sdp))
                .map_err(|e| EngineError::Failed(e.to_string()));
            signaling.post(move || done(result));
        });
    }
}

impl EngineSession for WebRtcSession {
    fn create_offer(&self, done: DescriptionCallback) {
        self.describe(SdpType::Offer, done);
    }

    fn create_answer(&self, done: DescriptionCallback) {
        self.describe(SdpType::Answer, done);
    }

    fn set_local_description(&self, description: Description) {
        let parsed = match to_rtc(&description) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(session = %self.name, error = %e, "local description does not parse");
                return;
            }
        };
        let pc = self.pc.clone();
        let name = self.name.clone();
        self.worker.spawn(async move {
            match pc.set_local_description(parsed).await {
                Ok(()) => debug!(session = %name, "local description applied"),
                Err(e) => warn!(session = %name, error = %e, "set local description failed"),
            }
        });
    }

    fn set_remote_description(&self, description: &Description) -> Result<(), EngineError> {
        let parsed = to_rtc(description)?;
        let pc = self.pc.clone();
        self.worker
            .invoke(async move { pc.set_remote_description(parsed).await })?
            .map_err(|e| EngineError::Rejected(e.to_string()))
    }

    fn create_data_channel(&self, label: &str) -> Result<Arc<dyn EngineChannel>, EngineError> {
        let pc = self.pc.clone();
        let label = label.to_string();
        let dc = self
            .worker
            .invoke(async move {
                pc.create_data_channel(&label, Some(RTCDataChannelInit::default()))
                    .await
            })?
            .map_err(|e| EngineError::Failed(e.to_string()))?;
        Ok(WebRtcChannel::new(dc, self.worker.clone(), &self.signaling))
    }

    fn add_ice_candidate(&self, candidate: &Candidate) -> bool {
        let pc = self.pc.clone();
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        match self
            .worker
            .invoke(async move { pc.add_ice_candidate(init).await })
        {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(session = %self.name, error = %e, "failed to add candidate");
                false
            }
            Err(e) => {
                warn!(session = %self.name, error = %e, "failed to add candidate");
                false
            }
        }
    }

    fn close(&self) {
        let pc = self.pc.clone();
        let name = self.name.clone();
        self.worker.drive(async move {
            if let Err(e) = pc.close().await {
                warn!(session = %name, error = %e, "peer connection close failed");
            }
        });
    }
}

type ObserverSlot = Arc<Mutex<Option<Weak<dyn ChannelObserver>>>>;

fn current(slot: &ObserverSlot) -> Option<Arc<dyn ChannelObserver>> {
    slot.lock().as_ref().and_then(Weak::upgrade)
}

struct WebRtcChannel {
    dc: Arc<RTCDataChannel>,
    worker: ContextHandle,
    observer: ObserverSlot,
}

impl WebRtcChannel {
    fn new(dc: Arc<RTCDataChannel>, worker: ContextHandle, signaling: &ContextHandle) -> Arc<Self> {
        let observer: ObserverSlot = Arc::new(Mutex::new(None));

        {
            let slot = observer.clone();
            let signaling = signaling.clone();
            dc.on_open(Box::new(move || {
                let slot = slot.clone();
                signaling.post(move || {
                    if let Some(observer) = current(&slot) {
                        observer.on_state_changed(ChannelState::Open);
                    }
                });
                Box::pin(async {})
            }));
        }

        {
            let slot = observer.clone();
            let signaling = signaling.clone();
            dc.on_close(Box::new(move || {
                let slot = slot.clone();
                signaling.post(move || {
                    if let Some(observer) = current(&slot) {
                        observer.on_state_changed(ChannelState::Closed);
                    }
                });
                Box::pin(async {})
            }));
        }

        {
            let slot = observer.clone();
            let signaling = signaling.clone();
            dc.on_message(Box::new(move |msg: DataChannelMessage| {
                let slot = slot.clone();
                let is_binary = !msg.is_string;
                let payload = msg.data;
                signaling.post(move || {
                    if let Some(observer) = current(&slot) {
                        observer.on_message(payload, is_binary);
                    }
                });
                Box::pin(async {})
            }));
        }

        Arc::new(Self {
            dc,
            worker,
            observer,
        })
    }
}

impl EngineChannel for WebRtcChannel {
    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    fn state(&self) -> ChannelState {
        match self.dc.ready_state() {
            RTCDataChannelState::Open => ChannelState::Open,
            RTCDataChannelState::Closing | RTCDataChannelState::Closed => ChannelState::Closed,
            _ => ChannelState::Connecting,
        }
    }

    fn register_observer(&self, observer: Weak<dyn ChannelObserver>) {
        *self.observer.lock() = Some(observer);
    }

    fn unregister_observer(&self) {
        *self.observer.lock() = None;
    }

    fn send(&self, payload: Bytes, is_binary: bool) -> Result<(), EngineError> {
        let dc = self.dc.clone();
        let sent = self.worker.invoke(async move {
            if is_binary {
                dc.send(&payload).await
            } else {
                dc.send_text(String::from_utf8_lossy(&payload).into_owned())
                    .await
            }
        })?;
        sent.map(|_| ()).map_err(|e| EngineError::Failed(e.to_string()))
    }

    fn close(&self) {
        let dc = self.dc.clone();
        self.worker.drive(async move {
            let _ = dc.close().await;
        });
    }
}

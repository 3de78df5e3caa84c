use bytes::Bytes;
use parking_lot::Mutex;
use rtc_console_lib::engine::{LoopbackBehavior, LoopbackEngine};
use rtc_console_lib::peer::{
    Candidate, ChannelListener, ChannelState, Message, NegotiationPhase, SdpType,
};
use rtc_console_lib::signaling::run_demo;
use rtc_console_lib::{
    complete_offer, negotiate_answer, negotiate_offer, run_exchange, Config, EngineKind,
    NegotiationError, Session,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn config() -> Config {
    Config {
        description_timeout: Duration::from_secs(1),
        candidates_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    check()
}

#[derive(Default)]
struct Recorder {
    states: Mutex<Vec<ChannelState>>,
    messages: Mutex<Vec<(Bytes, bool)>>,
}

impl Recorder {
    fn received(&self) -> Vec<(Bytes, bool)> {
        self.messages.lock().clone()
    }
}

impl ChannelListener for Recorder {
    fn on_state_changed(&self, state: ChannelState) {
        self.states.lock().push(state);
    }

    fn on_message(&self, payload: &Bytes, is_binary: bool) {
        self.messages.lock().push((payload.clone(), is_binary));
    }
}

#[test]
fn description_is_not_visible_before_the_engine_replies() {
    let behavior = LoopbackBehavior {
        description_delay: Duration::from_millis(50),
        ..Default::default()
    };
    let (context, _) = LoopbackEngine::context(behavior).unwrap();
    let caller = Session::new(&context, config().session("caller"));
    caller.initialize().unwrap();
    caller.create_offer().unwrap();

    assert!(caller.wait_description(Duration::from_millis(10)).is_none());
    assert!(caller.local_description().is_none());

    let offer = caller.wait_description(Duration::from_millis(1000)).unwrap();
    assert_eq!(offer.kind, SdpType::Offer);
    assert!(offer.body.starts_with("v=0"));
    assert!(offer.body.contains("caller-offer"));
    assert_eq!(caller.phase(), NegotiationPhase::OfferReady);
    // Later waits return the cached value at once.
    assert_eq!(caller.wait_description(Duration::ZERO), Some(offer));

    drop(caller);
    context.shutdown();
}

#[test]
fn malformed_remote_description_leaves_session_idle() {
    let (context, _) = LoopbackEngine::context(LoopbackBehavior::default()).unwrap();
    let receiver = Session::new(&context, config().session("receiver"));
    receiver.initialize().unwrap();

    let result = receiver.apply_remote_description(SdpType::Offer, "garbage");
    assert!(matches!(result, Err(NegotiationError::MalformedDescription(_))));
    assert_eq!(receiver.phase(), NegotiationPhase::Idle);
    assert!(receiver.remote_description().is_none());

    drop(receiver);
    context.shutdown();
}

#[test]
fn second_remote_description_is_rejected() {
    let (context, _) = LoopbackEngine::context(LoopbackBehavior::default()).unwrap();
    let caller = Session::new(&context, config().session("caller"));
    let receiver = Session::new(&context, config().session("receiver"));
    caller.initialize().unwrap();
    receiver.initialize().unwrap();
    let offer = negotiate_offer(&caller, &config()).unwrap();

    receiver
        .apply_remote_description(SdpType::Offer, &offer.description.body)
        .unwrap();
    let again = receiver.apply_remote_description(SdpType::Offer, &offer.description.body);
    assert!(matches!(
        again,
        Err(NegotiationError::InvalidPhase {
            phase: NegotiationPhase::RemoteDescriptionSet,
            ..
        })
    ));
    assert_eq!(receiver.remote_description(), Some(offer.description));

    drop(receiver);
    drop(caller);
    context.shutdown();
}

#[test]
fn rejected_candidate_reports_its_index_without_rollback() {
    let behavior = LoopbackBehavior {
        reject_candidate_at: Some(2),
        ..Default::default()
    };
    let (context, engine) = LoopbackEngine::context(behavior).unwrap();
    let receiver = Session::new(&context, config().session("receiver"));
    receiver.initialize().unwrap();

    let candidates: Vec<Candidate> = (0..5)
        .map(|i| {
            Candidate::new(format!(
                "candidate:{i} 1 udp 100 127.0.0.1 {} typ host",
                50000 + i
            ))
        })
        .collect();
    let result = receiver.add_candidates(&candidates);

    assert!(matches!(result, Err(NegotiationError::CandidateRejected { index: 2 })));
    assert_eq!(engine.applied_candidates("receiver"), candidates[..2].to_vec());

    drop(receiver);
    context.shutdown();
}

#[test]
fn caller_and_receiver_open_channels_and_exchange_bytes() {
    let (context, _) = LoopbackEngine::context(LoopbackBehavior::default()).unwrap();
    let config = config();
    let caller_inbox = Arc::new(Recorder::default());
    let receiver_inbox = Arc::new(Recorder::default());

    let caller = Session::new(&context, config.session("caller"));
    caller.initialize().unwrap();
    caller.add_channel_listener(caller_inbox.clone());
    let caller_channel = caller.open_channel(&config.channel_label).unwrap();
    let offer = negotiate_offer(&caller, &config).unwrap();
    assert_eq!(offer.candidates.len(), 2);

    let receiver = Session::new(&context, config.session("receiver"));
    receiver.initialize().unwrap();
    receiver.add_channel_listener(receiver_inbox.clone());
    let answer = negotiate_answer(&receiver, &offer, &config).unwrap();
    assert_eq!(answer.description.kind, SdpType::Answer);
    assert_eq!(receiver.phase(), NegotiationPhase::AnswerReady);

    complete_offer(&caller, &answer).unwrap();
    assert!(caller.wait_connected(config.connect_timeout));
    assert!(receiver.wait_connected(config.connect_timeout));
    assert_eq!(caller.phase(), NegotiationPhase::Connected);
    assert_eq!(receiver.phase(), NegotiationPhase::Connected);

    let receiver_channel = receiver.wait_channel(config.connect_timeout).unwrap();
    assert_eq!(receiver_channel.label(), "Hello");
    assert!(caller_channel.wait_open(config.connect_timeout));
    assert!(receiver_channel.wait_open(config.connect_timeout));
    assert_eq!(caller_channel.state(), ChannelState::Open);
    assert_eq!(receiver_channel.state(), ChannelState::Open);

    let binary = Bytes::from_static(&[0x00, 0x01, 0x7f, 0xff]);
    caller_channel.send_text("Message from caller").unwrap();
    caller_channel.send_binary(binary.clone()).unwrap();
    receiver_channel.send_text("Message from receiver").unwrap();

    assert!(eventually(Duration::from_secs(2), || receiver_inbox.received().len() == 2));
    assert!(eventually(Duration::from_secs(2), || caller_inbox.received().len() == 1));
    assert_eq!(
        receiver_inbox.received(),
        vec![(Bytes::from_static(b"Message from caller"), false), (binary, true)]
    );
    assert_eq!(
        caller_inbox.received(),
        vec![(Bytes::from_static(b"Message from receiver"), false)]
    );
    assert_eq!(*receiver_inbox.states.lock(), vec![ChannelState::Open]);

    receiver.destroy();
    assert_eq!(receiver_channel.state(), ChannelState::Closed);
    assert!(eventually(Duration::from_secs(2), || {
        caller_channel.state() == ChannelState::Closed
    }));
    assert!(matches!(
        caller_channel.send_text("too late"),
        Err(NegotiationError::ChannelNotOpen)
    ));
    caller.destroy();

    drop(receiver);
    drop(caller);
    context.shutdown();
}

#[test]
fn full_round_delivers_every_message_to_both_sides() {
    let (context, _) = LoopbackEngine::context(LoopbackBehavior::default()).unwrap();
    let caller_inbox = Arc::new(Recorder::default());
    let receiver_inbox = Arc::new(Recorder::default());
    let messages = vec![
        Message::text("ping"),
        Message::binary(vec![1u8, 2, 3]),
        Message::text("pong"),
    ];

    run_exchange(
        &context,
        &config(),
        caller_inbox.clone(),
        receiver_inbox.clone(),
        &messages,
    )
    .unwrap();

    let expected: Vec<(Bytes, bool)> = messages
        .iter()
        .map(|m| (m.payload.clone(), m.is_binary))
        .collect();
    assert_eq!(caller_inbox.received(), expected);
    assert_eq!(receiver_inbox.received(), expected);
    context.shutdown();
}

#[test]
fn failing_engine_surfaces_as_a_negotiation_timeout() {
    let behavior = LoopbackBehavior {
        fail_descriptions: true,
        ..Default::default()
    };
    let (context, _) = LoopbackEngine::context(behavior).unwrap();
    let config = Config {
        description_timeout: Duration::from_millis(30),
        ..config()
    };
    let caller = Session::new(&context, config.session("caller"));
    caller.initialize().unwrap();

    let result = negotiate_offer(&caller, &config);
    assert!(matches!(
        result,
        Err(NegotiationError::NegotiationTimeout {
            what: "local description",
            ..
        })
    ));

    drop(caller);
    context.shutdown();
}

#[test]
fn unanswered_caller_never_connects() {
    let (context, _) = LoopbackEngine::context(LoopbackBehavior::default()).unwrap();
    let caller = Session::new(&context, config().session("caller"));
    caller.initialize().unwrap();
    let channel = caller.open_channel("Hello").unwrap();
    negotiate_offer(&caller, &config()).unwrap();

    assert!(!caller.wait_connected(Duration::from_millis(30)));
    assert!(!channel.wait_open(Duration::from_millis(10)));
    assert!(matches!(channel.send_text("hi"), Err(NegotiationError::ChannelNotOpen)));

    drop(caller);
    context.shutdown();
}

#[test]
fn gathered_candidates_are_never_duplicated() {
    let behavior = LoopbackBehavior {
        candidate_count: 6,
        ..Default::default()
    };
    let (context, _) = LoopbackEngine::context(behavior).unwrap();
    let caller = Session::new(&context, config().session("caller"));
    caller.initialize().unwrap();
    let offer = negotiate_offer(&caller, &config()).unwrap();

    let unique: HashSet<&str> = offer
        .candidates
        .iter()
        .map(|c| c.candidate.as_str())
        .collect();
    assert_eq!(offer.candidates.len(), 6);
    assert_eq!(unique.len(), offer.candidates.len());
    // A second wait hands back the same frozen set.
    assert_eq!(
        caller.wait_candidates(Duration::ZERO),
        Some(offer.candidates.clone())
    );

    drop(caller);
    context.shutdown();
}

#[test]
fn unbounded_description_wait_returns_the_offer() {
    let (context, _) = LoopbackEngine::context(LoopbackBehavior::default()).unwrap();
    let caller = Session::new(&context, config().session("caller"));
    caller.initialize().unwrap();
    caller.create_offer().unwrap();

    let offer = caller.wait_description(Duration::MAX).unwrap();
    assert_eq!(offer.kind, SdpType::Offer);

    drop(caller);
    context.shutdown();
}

#[test]
#[ignore = "needs local UDP sockets; run with --ignored"]
fn webrtc_engine_completes_a_host_only_round() {
    let config = Config {
        ice_servers: Vec::new(),
        description_timeout: Duration::from_secs(5),
        candidates_timeout: Duration::from_secs(10),
        connect_timeout: Duration::from_secs(10),
        ..Default::default()
    };
    let messages = [
        Message::text("hello over webrtc"),
        Message::binary(vec![0u8, 1, 2, 254, 255]),
    ];

    run_demo(EngineKind::WebRtc, &config, &messages).unwrap();
}

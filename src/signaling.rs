//! Drives one negotiation round between a caller and a receiver: copies each
//! side's description and candidates into the other, then exchanges messages
//! over the channel. Retry policy for waits lives here, not in the session.

use crate::config::Config;
use crate::engine::{EngineContext, EngineKind};
use crate::error::{NegotiationError, Result};
use crate::peer::data_channel::{Channel, ChannelListener, LoggingListener};
use crate::peer::ice::analyze_candidates;
use crate::peer::signal::Signal;
use crate::peer::types::{Candidate, Description, Message, SdpType};
use crate::session::Session;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A local description and its frozen candidate set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub description: Description,
    pub candidates: Vec<Candidate>,
}

fn wait_with_retries<T>(
    session: &Session,
    what: &'static str,
    timeout: Duration,
    retries: u32,
    mut wait: impl FnMut(Duration) -> Option<T>,
) -> Result<T> {
    for attempt in 0..=retries {
        if let Some(value) = wait(timeout) {
            return Ok(value);
        }
        debug!(session = %session.name(), what, attempt, "wait timed out");
    }
    Err(NegotiationError::NegotiationTimeout {
        what,
        waited: timeout.saturating_mul(retries.saturating_add(1)),
    })
}

fn collect(session: &Session, config: &Config) -> Result<Negotiated> {
    let description = wait_with_retries(
        session,
        "local description",
        config.description_timeout,
        config.wait_retries,
        |timeout| session.wait_description(timeout),
    )?;
    let candidates = wait_with_retries(
        session,
        "candidate gathering",
        config.candidates_timeout,
        0,
        |timeout| session.wait_candidates(timeout),
    )?;
    analyze_candidates(session.name(), &candidates);
    Ok(Negotiated {
        description,
        candidates,
    })
}

/// Caller side: produces the offer and its candidates.
pub fn negotiate_offer(session: &Session, config: &Config) -> Result<Negotiated> {
    session.create_offer()?;
    collect(session, config)
}

/// Receiver side: consumes the remote offer and produces the answer.
pub fn negotiate_answer(
    session: &Session,
    offer: &Negotiated,
    config: &Config,
) -> Result<Negotiated> {
    session.apply_remote_description(SdpType::Offer, &offer.description.body)?;
    session.add_candidates(&offer.candidates)?;
    session.create_answer()?;
    collect(session, config)
}

/// Caller side: applies the receiver's answer and candidates.
pub fn complete_offer(session: &Session, answer: &Negotiated) -> Result<()> {
    session.apply_remote_description(SdpType::Answer, &answer.description.body)?;
    session.add_candidates(&answer.candidates)
}

/// Counts inbound messages until the expected number arrived.
struct Inbox {
    expected: usize,
    received: Mutex<usize>,
    done: Signal,
}

impl Inbox {
    fn new(expected: usize) -> Arc<Self> {
        let inbox = Arc::new(Self {
            expected,
            received: Mutex::new(0),
            done: Signal::manual_reset(),
        });
        if expected == 0 {
            inbox.done.set();
        }
        inbox
    }
}

impl ChannelListener for Inbox {
    fn on_message(&self, _payload: &Bytes, _is_binary: bool) {
        let mut received = self.received.lock();
        *received += 1;
        if *received >= self.expected {
            self.done.set();
        }
    }
}

/// Waits for the connection, the channel and its opening, each bounded by
/// `connect_timeout`.
pub fn ready_channel(session: &Session, config: &Config) -> Result<Channel> {
    if !session.wait_connected(config.connect_timeout) {
        return Err(NegotiationError::NegotiationTimeout {
            what: "connection",
            waited: config.connect_timeout,
        });
    }
    let channel = session.wait_channel(config.connect_timeout).ok_or_else(|| {
        NegotiationError::ChannelUnavailable(format!("{} has no channel", session.name()))
    })?;
    if !channel.wait_open(config.connect_timeout) {
        return Err(NegotiationError::NegotiationTimeout {
            what: "channel open",
            waited: config.connect_timeout,
        });
    }
    Ok(channel)
}

/// Waits until both sides are connected with an open channel, sends every
/// message from each side and returns once the other side received them.
pub fn open_channel_and_exchange(
    a: &Session,
    b: &Session,
    messages: &[Message],
    config: &Config,
) -> Result<()> {
    let a_channel = ready_channel(a, config)?;
    let b_channel = ready_channel(b, config)?;
    let a_inbox = Inbox::new(messages.len());
    let b_inbox = Inbox::new(messages.len());
    a_channel.add_listener(a_inbox.clone());
    b_channel.add_listener(b_inbox.clone());

    for message in messages {
        a_channel.send(message.payload.clone(), message.is_binary)?;
        b_channel.send(message.payload.clone(), message.is_binary)?;
    }
    for (session, inbox) in [(a, &a_inbox), (b, &b_inbox)] {
        if !inbox.done.wait_timeout(config.connect_timeout) {
            return Err(NegotiationError::NegotiationTimeout {
                what: "message delivery",
                waited: config.connect_timeout,
            });
        }
        debug!(session = %session.name(), count = inbox.expected, "messages delivered");
    }
    Ok(())
}

/// One full round on an existing engine context. Sessions are torn down in
/// reverse creation order, on success and on error alike.
pub fn run_exchange(
    context: &EngineContext,
    config: &Config,
    caller_listener: Arc<dyn ChannelListener>,
    receiver_listener: Arc<dyn ChannelListener>,
    messages: &[Message],
) -> Result<()> {
    let caller = Session::new(context, config.session("caller"));
    caller.initialize()?;
    caller.add_channel_listener(caller_listener);
    caller.open_channel(&config.channel_label)?;
    let offer = negotiate_offer(&caller, config)?;
    info!(candidates = offer.candidates.len(), "offer ready");

    let receiver = Session::new(context, config.session("receiver"));
    receiver.initialize()?;
    receiver.add_channel_listener(receiver_listener);
    let answer = negotiate_answer(&receiver, &offer, config)?;
    info!(candidates = answer.candidates.len(), "answer ready");

    complete_offer(&caller, &answer)?;
    open_channel_and_exchange(&caller, &receiver, messages, config)?;
    info!(messages = messages.len(), "exchange complete");

    receiver.destroy();
    caller.destroy();
    Ok(())
}

/// Builds the engine context, runs one logged round, then shuts the context
/// down.
pub fn run_demo(kind: EngineKind, config: &Config, messages: &[Message]) -> Result<()> {
    let context = EngineContext::new(kind)?;
    let result = run_exchange(
        &context,
        config,
        Arc::new(LoggingListener::new("caller")),
        Arc::new(LoggingListener::new("receiver")),
        messages,
    );
    context.shutdown();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::loopback::{LoopbackBehavior, LoopbackEngine};

    #[test]
    fn retries_extend_the_wait() {
        let (context, _) = LoopbackEngine::context(LoopbackBehavior::default()).unwrap();
        let session = Session::new(&context, Config::default().session("caller"));
        let mut calls = 0;
        let result = wait_with_retries(&session, "nothing", Duration::from_millis(1), 2, |_| {
            calls += 1;
            None::<()>
        });
        assert_eq!(calls, 3);
        assert!(matches!(
            result,
            Err(NegotiationError::NegotiationTimeout { what: "nothing", waited })
                if waited == Duration::from_millis(3)
        ));
        drop(session);
        context.shutdown();
    }

    #[test]
    fn unbounded_timeout_saturates_the_reported_wait() {
        let (context, _) = LoopbackEngine::context(LoopbackBehavior::default()).unwrap();
        let session = Session::new(&context, Config::default().session("caller"));
        let result = wait_with_retries(&session, "nothing", Duration::MAX, 1, |_| None::<()>);
        assert!(matches!(
            result,
            Err(NegotiationError::NegotiationTimeout { waited, .. }) if waited == Duration::MAX
        ));
        drop(session);
        context.shutdown();
    }

    #[test]
    fn slow_description_is_caught_by_the_retry() {
        let behavior = LoopbackBehavior {
            description_delay: Duration::from_millis(60),
            ..Default::default()
        };
        let (context, _) = LoopbackEngine::context(behavior).unwrap();
        let config = Config {
            description_timeout: Duration::from_millis(40),
            wait_retries: 2,
            ..Default::default()
        };
        let session = Session::new(&context, config.session("caller"));
        session.initialize().unwrap();
        let offer = negotiate_offer(&session, &config).unwrap();
        assert_eq!(offer.description.kind, SdpType::Offer);
        assert_eq!(offer.candidates.len(), 2);
        drop(session);
        context.shutdown();
    }

    #[test]
    fn empty_inbox_is_already_done() {
        assert!(Inbox::new(0).done.is_set());
        let inbox = Inbox::new(2);
        inbox.on_message(&Bytes::from_static(b"a"), false);
        assert!(!inbox.done.is_set());
        inbox.on_message(&Bytes::from_static(b"b"), false);
        assert!(inbox.done.is_set());
    }
}

use crate::config::Config;
use crate::engine::{EngineContext, EngineKind, LoopbackBehavior};
use crate::logger;
use crate::peer::bundle;
use crate::peer::data_channel::{Channel, ChannelListener};
use crate::peer::state::ChannelState;
use crate::peer::types::{ConnectionBundle, Message, SdpType, ServerConfig};
use crate::session::Session;
use crate::signaling::{self, Negotiated};
use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(
    name = "rtc-console",
    about = "Offer/answer negotiation and data channel chat between two peers",
    version
)]
struct Cli {
    #[arg(
        long,
        value_enum,
        global = true,
        env = "RTC_CONSOLE_ENGINE",
        default_value_t = EngineArg::Webrtc,
        help = "Transport engine to negotiate with"
    )]
    engine: EngineArg,

    #[arg(
        long = "log",
        value_name = "FILTER",
        global = true,
        help = "Log filter, e.g. debug or rtc_console_lib=trace (RUST_LOG wins)"
    )]
    log: Option<String>,

    #[arg(
        long = "stun",
        value_name = "URL",
        global = true,
        help = "STUN server; repeat for several (replaces RTC_CONSOLE_STUN)"
    )]
    stun: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum EngineArg {
    Webrtc,
    Loopback,
}

impl EngineArg {
    fn kind(self) -> EngineKind {
        match self {
            EngineArg::Webrtc => EngineKind::WebRtc,
            EngineArg::Loopback => EngineKind::Loopback(LoopbackBehavior::default()),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Negotiate a caller and a receiver in this process and exchange messages
    Demo(DemoArgs),
    /// Print an offer bundle, read the answer bundle, then chat
    Offer,
    /// Read an offer bundle, print the answer bundle, then chat
    Answer,
}

#[derive(Args, Debug)]
struct DemoArgs {
    #[arg(
        long = "message",
        short = 'm',
        value_name = "TEXT",
        help = "Message each side sends; repeat for several"
    )]
    messages: Vec<String>,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logger::init(cli.log.as_deref());
    let mut config = Config::from_env();
    if !cli.stun.is_empty() {
        config.ice_servers = cli.stun.iter().map(ServerConfig::stun).collect();
    }
    debug!(?config, engine = ?cli.engine, "configuration loaded");

    match cli.command {
        Command::Demo(args) => demo(cli.engine, &config, args),
        Command::Offer => manual(cli.engine, &config, SdpType::Offer),
        Command::Answer => manual(cli.engine, &config, SdpType::Answer),
    }
}

fn demo(engine: EngineArg, config: &Config, args: DemoArgs) -> Result<()> {
    let messages: Vec<Message> = if args.messages.is_empty() {
        vec![Message::text("Message from rtc-console")]
    } else {
        args.messages.into_iter().map(Message::text).collect()
    };
    signaling::run_demo(engine.kind(), config, &messages).context("demo exchange failed")?;
    println!("exchanged {} message(s) each way", messages.len());
    Ok(())
}

/// Prints inbound messages for the interactive chat.
struct ConsoleListener;

impl ChannelListener for ConsoleListener {
    fn on_state_changed(&self, state: ChannelState) {
        eprintln!("* channel {state:?}");
    }

    fn on_message(&self, payload: &Bytes, is_binary: bool) {
        if is_binary {
            println!("peer> [{} bytes]", payload.len());
        } else {
            println!("peer> {}", String::from_utf8_lossy(payload));
        }
    }
}

fn read_bundle(
    lines: &mut impl Iterator<Item = io::Result<String>>,
    expected: SdpType,
) -> Result<Negotiated> {
    eprintln!("paste the {expected} bundle and press enter:");
    let line = lines
        .find(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
        .context("stdin closed before a bundle arrived")??;
    let decoded = bundle::decode(&line).context("cannot decode bundle")?;
    if decoded.description.kind != expected {
        bail!(
            "expected an {expected} bundle, got an {}",
            decoded.description.kind
        );
    }
    info!(id = %decoded.id, candidates = decoded.candidates.len(), "bundle received");
    Ok(Negotiated {
        description: decoded.description,
        candidates: decoded.candidates,
    })
}

fn print_bundle(negotiated: Negotiated) -> Result<()> {
    let encoded = bundle::encode(&ConnectionBundle::new(
        negotiated.description,
        negotiated.candidates,
    ))?;
    eprintln!("send this bundle to the other side:");
    let mut out = io::stdout().lock();
    writeln!(out, "{encoded}")?;
    out.flush()?;
    Ok(())
}

fn manual(engine: EngineArg, config: &Config, role: SdpType) -> Result<()> {
    if engine != EngineArg::Webrtc {
        bail!("manual signaling needs the webrtc engine; use `demo` for loopback");
    }
    let context = EngineContext::new(engine.kind())?;
    let result = negotiate_and_chat(&context, config, role);
    context.shutdown();
    result
}

fn negotiate_and_chat(context: &EngineContext, config: &Config, role: SdpType) -> Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let name = match role {
        SdpType::Offer => "caller",
        SdpType::Answer => "receiver",
    };
    let session = Session::new(context, config.session(name));
    session.initialize()?;
    session.add_channel_listener(Arc::new(ConsoleListener));

    match role {
        SdpType::Offer => {
            session.open_channel(&config.channel_label)?;
            print_bundle(signaling::negotiate_offer(&session, config)?)?;
            let answer = read_bundle(&mut lines, SdpType::Answer)?;
            signaling::complete_offer(&session, &answer)?;
        }
        SdpType::Answer => {
            let offer = read_bundle(&mut lines, SdpType::Offer)?;
            print_bundle(signaling::negotiate_answer(&session, &offer, config)?)?;
        }
    }

    let channel = signaling::ready_channel(&session, config)?;
    chat(&channel, &mut lines)?;
    session.destroy();
    Ok(())
}

fn chat(channel: &Channel, lines: &mut impl Iterator<Item = io::Result<String>>) -> Result<()> {
    eprintln!("connected on '{}'; type messages, /quit to leave", channel.label());
    for line in lines {
        let line = line?;
        let text = line.trim_end();
        if text == "/quit" {
            break;
        }
        if text.is_empty() {
            continue;
        }
        if let Err(e) = channel.send_text(text) {
            eprintln!("* not sent: {e}");
            if channel.state() == ChannelState::Closed {
                break;
            }
        }
    }
    Ok(())
}

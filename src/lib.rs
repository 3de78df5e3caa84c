pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::Config;
pub use engine::{EngineContext, EngineKind};
pub use error::{BundleError, NegotiationError};
pub use session::Session;
pub use signaling::{
    complete_offer, negotiate_answer, negotiate_offer, open_channel_and_exchange, run_exchange,
    Negotiated,
};

pub fn run() {
    if let Err(err) = cli::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

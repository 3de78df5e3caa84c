use crate::config::DEFAULT_LOG_FILTER;
use crate::peer::types::{Candidate, Description};
use crate::utils::fingerprint;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber. `RUST_LOG` wins over `filter`, which wins
/// over the build-profile default. Repeated calls are ignored.
pub fn init(filter: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter.unwrap_or(DEFAULT_LOG_FILTER)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Trickle-style trace of one candidate.
pub fn dump_candidate(session: &str, direction: &str, candidate: &Candidate) {
    debug!(
        session,
        direction,
        candidate = %candidate.candidate,
        sdp_mid = ?candidate.sdp_mid,
        sdp_mline_index = ?candidate.sdp_mline_index,
        "candidate"
    );
}

/// Logs a description by kind, size and fingerprint; the body stays out of
/// the log.
pub fn dump_description(session: &str, direction: &str, description: &Description) {
    debug!(
        session,
        direction,
        kind = %description.kind,
        len = description.body.len(),
        fingerprint = %fingerprint(description.body.as_bytes()),
        "description"
    );
}

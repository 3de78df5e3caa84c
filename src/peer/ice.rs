use crate::peer::types::Candidate;
use tracing::{info, warn};

/// Candidate counts by type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
    pub other: usize,
}

fn candidate_type(candidate: &str) -> Option<&str> {
    let mut fields = candidate.split_whitespace();
    fields.find(|f| *f == "typ")?;
    fields.next()
}

/// Counts candidates by type and warns when nothing can relay.
pub fn analyze_candidates(session: &str, candidates: &[Candidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();
    for candidate in candidates {
        match candidate_type(&candidate.candidate) {
            Some("host") => summary.host += 1,
            Some("srflx") | Some("prflx") => summary.srflx += 1,
            Some("relay") => summary.relay += 1,
            _ => summary.other += 1,
        }
    }
    info!(
        session,
        host = summary.host,
        srflx = summary.srflx,
        relay = summary.relay,
        "candidate analysis"
    );
    if summary.relay == 0 && !candidates.is_empty() {
        warn!(session, "no relay candidates; connections across NAT may fail");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_type() {
        let candidates = [
            Candidate::new("candidate:0 1 udp 2130706431 192.168.1.4 50000 typ host"),
            Candidate::new("candidate:1 1 udp 1694498815 203.0.113.7 50001 typ srflx raddr 0.0.0.0 rport 0"),
            Candidate::new("candidate:2 1 udp 16777215 198.51.100.2 3478 typ relay raddr 203.0.113.7 rport 50001"),
            Candidate::new("candidate:3 1 udp 2130706431 10.0.0.2 50002 typ host"),
            Candidate::new("garbage"),
        ];
        let summary = analyze_candidates("caller", &candidates);
        assert_eq!(
            summary,
            CandidateSummary {
                host: 2,
                srflx: 1,
                relay: 1,
                other: 1
            }
        );
    }
}

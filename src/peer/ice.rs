use crate::peer::types::IceCandidate;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Remote candidates that arrived before a remote description was set
#[derive(Debug, Default)]
pub struct PendingCandidates {
    queue: Vec<IceCandidate>,
}

impl PendingCandidates {
    pub fn push(&mut self, candidate: IceCandidate) {
        debug!("Remote description not set yet, queuing candidate");
        self.queue.push(candidate);
    }

    /// Hand over everything queued so far, oldest first
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Admits each distinct remote candidate once.
///
/// Store notifications may repeat a candidate (two identical entries, or a
/// re-delivered snapshot); only the first occurrence reaches the transport.
#[derive(Debug, Default)]
pub struct CandidateFeed {
    seen: HashSet<IceCandidate>,
}

impl CandidateFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time a candidate is offered
    pub fn admit(&mut self, candidate: &IceCandidate) -> bool {
        if self.seen.contains(candidate) {
            debug!("Duplicate candidate suppressed: {}", candidate.candidate);
            return false;
        }
        self.seen.insert(candidate.clone());
        true
    }

    pub fn applied(&self) -> usize {
        self.seen.len()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

/// Count gathered candidates by type. A missing relay candidate is only a
/// warning when a TURN server was configured to provide one.
pub fn analyze_candidates(candidates: &[IceCandidate], relay_expected: bool) -> CandidateSummary {
    let mut summary = CandidateSummary::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            summary.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            summary.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            summary.relay += 1;
        }
    }

    info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    );

    if summary.relay == 0 {
        if relay_expected {
            warn!("No TURN relay candidates found! Connection through NAT may fail.");
        } else {
            debug!("No relay candidates; no TURN server configured");
        }
    }

    summary
}

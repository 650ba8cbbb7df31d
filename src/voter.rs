//! Two-phase-commit quiescence detector, used only by the Domain scheduler
//! (§4.8). A rank may be locally empty yet about to receive rays from a
//! peer; quiescence is a *global* property, not a per-rank one.

use parking_lot::Mutex;

use crate::ray::RankId;
use crate::transport::ClusterTransport;

const COORDINATOR: RankId = RankId(0);

const WIRE_NOT_READY: u8 = 0;
const WIRE_PROPOSE: u8 = 1;
const WIRE_VOTE_COMMIT: u8 = 2;
const WIRE_VOTE_ABORT: u8 = 3;
const WIRE_DO_COMMIT: u8 = 4;
const WIRE_DO_ABORT: u8 = 5;

/// Result of one round's voting attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RoundOutcome {
    /// No proposal was made this round (coordinator wasn't idle), or a
    /// proposal was made and aborted. Keep tracing.
    Continue,
    /// Global quiescence confirmed; the frame is done.
    Commit,
}

struct State {
    num_pending_rays: i64,
}

/// Tracks whether this rank has outstanding in-flight sends and drives the
/// §4.8 state machine's message exchange for one round.
///
/// `add_pending`/`subtract_pending` mirror the source API
/// (`addNumPendingRays`/`subtractNumPendingRays`): callers increment when
/// posting a send and decrement once that send is confirmed complete. A
/// synchronous transport (like [`crate::transport::LocalTransport`]) nets
/// these to zero within the same round; an asynchronous one may carry a
/// nonzero balance across rounds, which is exactly what keeps a rank from
/// voting COMMIT prematurely.
pub struct TpcVoter {
    state: Mutex<State>,
}

impl TpcVoter {
    pub fn new() -> TpcVoter {
        TpcVoter { state: Mutex::new(State { num_pending_rays: 0 }) }
    }

    pub fn add_pending(&self, n: usize) {
        self.state.lock().num_pending_rays += n as i64;
    }

    pub fn subtract_pending(&self, n: usize) {
        let mut state = self.state.lock();
        state.num_pending_rays -= n as i64;
        debug_assert!(state.num_pending_rays >= 0, "subtracted more pending rays than were outstanding");
    }

    pub fn num_pending_rays(&self) -> i64 {
        self.state.lock().num_pending_rays
    }

    fn ready_to_propose(&self, queue_empty: bool) -> bool {
        queue_empty && self.num_pending_rays() == 0
    }

    /// Run one round of the protocol. Every rank in the cluster must call
    /// this once per round, in lockstep, passing whether *its own* local
    /// queue is currently empty. Returns [`RoundOutcome::Commit`] exactly
    /// when the coordinator observed every rank voting COMMIT.
    pub fn round(&self, transport: &dyn ClusterTransport, queue_empty: bool) -> RoundOutcome {
        if transport.rank() == COORDINATOR {
            self.round_as_coordinator(transport, queue_empty)
        } else {
            self.round_as_cohort(transport, queue_empty)
        }
    }

    fn round_as_coordinator(&self, transport: &dyn ClusterTransport, queue_empty: bool) -> RoundOutcome {
        let propose = self.ready_to_propose(queue_empty);
        transport.broadcast_bytes(COORDINATOR, Some(vec![if propose { WIRE_PROPOSE } else { WIRE_NOT_READY }]));
        if !propose {
            return RoundOutcome::Continue;
        }

        let mut all_commit = self.ready_to_propose(queue_empty);
        for peer in 0..transport.world_size() {
            if peer == COORDINATOR.as_usize() {
                continue;
            }
            let vote = transport.recv_from(RankId(peer));
            if vote.first().copied() != Some(WIRE_VOTE_COMMIT) {
                all_commit = false;
            }
        }

        let decision = if all_commit { WIRE_DO_COMMIT } else { WIRE_DO_ABORT };
        transport.broadcast_bytes(COORDINATOR, Some(vec![decision]));
        if all_commit {
            RoundOutcome::Commit
        } else {
            RoundOutcome::Continue
        }
    }

    fn round_as_cohort(&self, transport: &dyn ClusterTransport, queue_empty: bool) -> RoundOutcome {
        let signal = transport.broadcast_bytes(COORDINATOR, None);
        match signal.first().copied() {
            Some(WIRE_PROPOSE) => {
                let vote = if self.ready_to_propose(queue_empty) { WIRE_VOTE_COMMIT } else { WIRE_VOTE_ABORT };
                transport.send_to(COORDINATOR, &[vote]);
                let decision = transport.broadcast_bytes(COORDINATOR, None);
                match decision.first().copied() {
                    Some(WIRE_DO_COMMIT) => RoundOutcome::Commit,
                    _ => RoundOutcome::Continue,
                }
            }
            _ => RoundOutcome::Continue,
        }
    }
}

impl Default for TpcVoter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;
    use std::thread;

    #[test]
    fn commits_when_every_rank_is_quiescent() {
        let cluster = LocalTransport::cluster(3);
        let handles: Vec<_> = cluster
            .into_iter()
            .map(|t| {
                thread::spawn(move || {
                    let voter = TpcVoter::new();
                    voter.round(&t, true)
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), RoundOutcome::Commit);
        }
    }

    #[test]
    fn aborts_when_a_cohort_still_has_queued_rays() {
        let cluster = LocalTransport::cluster(2);
        let handles: Vec<_> = cluster
            .into_iter()
            .map(|t| {
                thread::spawn(move || {
                    let voter = TpcVoter::new();
                    let queue_empty = t.rank() == RankId(0);
                    voter.round(&t, queue_empty)
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), RoundOutcome::Continue);
        }
    }

    #[test]
    fn aborts_on_outstanding_pending_sends() {
        // Rank 1 is locally empty, but rank 0 has 3 rays still in flight
        // from an outstanding send. The coordinator's own pending count alone
        // must force the whole round to ABORT without even consulting
        // rank 1's vote value.
        let cluster = LocalTransport::cluster(2);
        let handles: Vec<_> = cluster
            .into_iter()
            .map(|t| {
                thread::spawn(move || {
                    let voter = TpcVoter::new();
                    if t.rank() == RankId(0) {
                        voter.add_pending(3);
                    }
                    voter.round(&t, true)
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), RoundOutcome::Continue);
        }
    }
}

//! Verify/commit gate: the admission queue that blocks commits during
//! coordinated events (spec §4.2, component C5).

use std::collections::VecDeque;

use distco_types::Gci;
use serde::{Deserialize, Serialize};

/// An identifier a caller attaches to its request so it can match the
/// eventual grant back to the original transaction.
pub type RequestId = u64;

/// Outcome of asking the gate for a commit GCI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Granted immediately at this GCI.
    Granted(Gci),
    /// Queued — a grant will arrive later via [`VerifyGate::drain_one`].
    Queued,
}

/// The commit-admission gate.
///
/// A request is granted the current GCI immediately unless the gate is
/// blocked or requests are already queued (FIFO order must be preserved, so
/// a request that arrives while others wait must also wait). When the
/// block lifts, [`drain_one`](Self::drain_one) is intended to be called
/// once per dispatch-runtime signal, never draining the whole queue in one
/// call, so commit grants don't monopolize the scheduler (spec §4.2, §5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyGate {
    block_commit: bool,
    queue: VecDeque<RequestId>,
}

impl VerifyGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_blocked(&self) -> bool {
        self.block_commit
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// `BLOCK_COMMIT_ORD`: sets the block flag (a coordinated event — GCP
    /// prepare, LCP round start, take-over commit — is underway).
    pub fn block(&mut self) {
        self.block_commit = true;
    }

    /// `UNBLOCK_COMMIT_ORD`, or GCP prepare completing: lifts the block.
    /// Queued requests are not granted here — the caller drains them via
    /// [`drain_one`](Self::drain_one) so draining stays incremental.
    pub fn unblock(&mut self) {
        self.block_commit = false;
    }

    /// A transaction's synchronous request for a commit GCI.
    pub fn request(&mut self, id: RequestId, current_gci: Gci) -> VerifyOutcome {
        if self.block_commit || !self.queue.is_empty() {
            self.queue.push_back(id);
            VerifyOutcome::Queued
        } else {
            VerifyOutcome::Granted(current_gci)
        }
    }

    /// Drains exactly one queued request, if the gate is unblocked.
    /// Returns the request id and the GCI it is granted, so the caller can
    /// reply to that transaction and self-post a continuation if more
    /// remain.
    pub fn drain_one(&mut self, current_gci: Gci) -> Option<(RequestId, Gci)> {
        if self.block_commit {
            return None;
        }
        self.queue.pop_front().map(|id| (id, current_gci))
    }
}

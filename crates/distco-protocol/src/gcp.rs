//! Global Checkpoint protocol: prepare/commit/save phases, the stuck-GCP
//! monitor, and master-takeover (spec §4.3, component C1).

use distco_types::{Gci, NodeId};
use serde::{Deserialize, Serialize};

use crate::error::SystemError;
use crate::signal_counter::{SignalCounter, WaitReason};

/// Samples between stuck-monitor checks before declaring the cluster stuck:
/// spec §4.3, "≥ 1200 samples (≈ 2 minutes)" at a 100ms sampling period.
pub const GCP_STUCK_SAMPLE_THRESHOLD: u32 = 1200;

// ============================================================================
// Master-side phase state
// ============================================================================

/// The master's view of one GCP cycle, driving the fan-out through all
/// three phases in strict order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GcpMasterState {
    Idle,
    Preparing {
        new_gci: Gci,
        waiting: SignalCounter,
    },
    Committing {
        old_gci: Gci,
        new_gci: Gci,
        waiting: SignalCounter,
    },
    Saving {
        old_gci: Gci,
        waiting: SignalCounter,
    },
    CopyingSysfile {
        old_gci: Gci,
        waiting: SignalCounter,
    },
}

impl GcpMasterState {
    /// Begins the prepare phase: `newGci := currentGci + 1`, fan out to
    /// every alive node.
    pub fn start_prepare(current_gci: Gci, alive: impl IntoIterator<Item = NodeId>) -> Self {
        GcpMasterState::Preparing {
            new_gci: current_gci.next(),
            waiting: SignalCounter::new(WaitReason::GcpPrepare, alive),
        }
    }

    /// Records a `GCP_PREPARE` reply; if this completes the phase, returns
    /// the `new_gci` to begin committing with.
    pub fn on_prepare_conf(&mut self, from: NodeId) -> Option<Gci> {
        if let GcpMasterState::Preparing { new_gci, waiting } = self {
            waiting.clear(from);
            if waiting.done() {
                return Some(*new_gci);
            }
        }
        None
    }

    /// Transitions into the commit phase once every prepare-conf is in.
    pub fn start_commit(
        current_gci: Gci,
        new_gci: Gci,
        alive: impl IntoIterator<Item = NodeId>,
    ) -> Self {
        GcpMasterState::Committing {
            old_gci: current_gci,
            new_gci,
            waiting: SignalCounter::new(WaitReason::GcpCommit, alive),
        }
    }

    /// Records a `GCP_NODEFINISH`; returns `old_gci` once the phase completes.
    pub fn on_node_finish(&mut self, from: NodeId) -> Option<Gci> {
        if let GcpMasterState::Committing { old_gci, waiting, .. } = self {
            waiting.clear(from);
            if waiting.done() {
                return Some(*old_gci);
            }
        }
        None
    }

    pub fn start_save(old_gci: Gci, alive: impl IntoIterator<Item = NodeId>) -> Self {
        GcpMasterState::Saving {
            old_gci,
            waiting: SignalCounter::new(WaitReason::GcpSave, alive),
        }
    }

    /// Records a `GCP_SAVECONF`; returns `true` once every LQH has flushed.
    pub fn on_save_conf(&mut self, from: NodeId) -> bool {
        if let GcpMasterState::Saving { waiting, .. } = self {
            waiting.clear(from);
            return waiting.done();
        }
        false
    }

    pub fn start_copy_sysfile(old_gci: Gci, alive: impl IntoIterator<Item = NodeId>) -> Self {
        GcpMasterState::CopyingSysfile {
            old_gci,
            waiting: SignalCounter::new(WaitReason::CopyGci, alive),
        }
    }

    /// Records a copy-of-sysfile ack; `true` once the round is fully done.
    pub fn on_copy_sysfile_ack(&mut self, from: NodeId) -> bool {
        if let GcpMasterState::CopyingSysfile { waiting, .. } = self {
            waiting.clear(from);
            return waiting.done();
        }
        false
    }

    /// Node-failure fix-up across whichever phase is active: synthesizes
    /// the missing reply so the wait can still complete (spec §5).
    pub fn fixup_failed_node(&mut self, node: NodeId) {
        let waiting = match self {
            GcpMasterState::Idle => return,
            GcpMasterState::Preparing { waiting, .. }
            | GcpMasterState::Committing { waiting, .. }
            | GcpMasterState::Saving { waiting, .. }
            | GcpMasterState::CopyingSysfile { waiting, .. } => waiting,
        };
        waiting.fixup_failed_node(node);
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, GcpMasterState::Idle)
    }
}

// ============================================================================
// Stuck-GCP monitor
// ============================================================================

/// Watches for a stalled GCP cycle: if the cluster-wide GCP status and id
/// don't change for `GCP_STUCK_SAMPLE_THRESHOLD` consecutive 100ms samples,
/// the cluster is declared stuck (spec §4.3 "Monitor").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GcpStuckMonitor {
    last_status_id: Option<(u8, Gci)>,
    unchanged_samples: u32,
}

impl GcpStuckMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call once per 100ms tick with a cheap summary of current GCP state
    /// (a phase discriminant and the GCI being worked on). Returns
    /// `Err(SystemError::GcpStopped)` once the cluster should be declared
    /// stuck and crashed.
    pub fn sample(&mut self, status: u8, gci: Gci) -> Result<(), SystemError> {
        match self.last_status_id {
            Some(prev) if prev == (status, gci) => {
                self.unchanged_samples += 1;
            }
            _ => {
                self.unchanged_samples = 0;
            }
        }
        self.last_status_id = Some((status, gci));
        if self.unchanged_samples >= GCP_STUCK_SAMPLE_THRESHOLD {
            Err(SystemError::GcpStopped)
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Master-takeover: participant reports and join-state merge
// ============================================================================

/// What a surviving participant reports in response to `MASTER_GCPREQ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GcpParticipantReport {
    Ready,
    PrepareReceived,
    CommitReceived,
    TcFinished,
}

/// The new master's merged view of where the whole cluster's GCP cycle
/// actually stood when the old master died (spec §4.3 merge table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GcpJoinState {
    Initial,
    AllReady,
    AllPrepared,
    PrepStarted,
    CommitStarted,
    CommitComplete,
    SaveStarted,
}

/// Merges one participant's report into the running join state, per the
/// table in spec §4.3. A `—` cell is a genuine contradiction between two
/// participants' reported progress and must fail fast rather than guess.
///
/// A `*` cell (a participant reporting a stage the merge has already
/// passed) is read as "no regression": the merge state does not move
/// backward, since the new master must still resend from its most-advanced
/// known phase.
pub fn merge_gcp_takeover(
    state: GcpJoinState,
    report: GcpParticipantReport,
) -> Result<GcpJoinState, SystemError> {
    use GcpJoinState::*;
    use GcpParticipantReport::*;
    Ok(match (state, report) {
        (Initial, Ready) => AllReady,
        (Initial, PrepareReceived) => AllPrepared,
        (Initial, CommitReceived) => CommitStarted,
        (Initial, TcFinished) => CommitComplete,

        (AllReady, Ready) => AllReady,
        (AllReady, PrepareReceived) => PrepStarted,
        (AllReady, CommitReceived) => return Err(SystemError::GcpStopped),
        (AllReady, TcFinished) => SaveStarted,

        (AllPrepared | PrepStarted, Ready) => PrepStarted,
        (AllPrepared, PrepareReceived) => AllPrepared,
        (PrepStarted, PrepareReceived) => PrepStarted,
        (AllPrepared | PrepStarted, CommitReceived) => CommitStarted,
        (AllPrepared | PrepStarted, TcFinished) => CommitStarted,

        (CommitStarted, Ready) => return Err(SystemError::GcpStopped),
        (CommitStarted, PrepareReceived | CommitReceived | TcFinished) => CommitStarted,

        (CommitComplete, Ready) => SaveStarted,
        (CommitComplete, PrepareReceived | CommitReceived) => CommitStarted,
        (CommitComplete, TcFinished) => CommitComplete,

        (SaveStarted, _) => SaveStarted,
    })
}

/// The action the new master must take to resume the cycle, per the merged
/// join state — never skipping a phase for any participant (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcpResumeAction {
    ResendPrepareToAll,
    ResendPrepareToLaggards,
    ResendCommit,
    ResendSave,
    ResendCopySysfile,
}

pub fn resume_action(state: GcpJoinState) -> GcpResumeAction {
    match state {
        GcpJoinState::Initial | GcpJoinState::AllReady => GcpResumeAction::ResendPrepareToAll,
        GcpJoinState::PrepStarted => GcpResumeAction::ResendPrepareToLaggards,
        GcpJoinState::AllPrepared | GcpJoinState::CommitStarted => GcpResumeAction::ResendCommit,
        GcpJoinState::CommitComplete => GcpResumeAction::ResendSave,
        GcpJoinState::SaveStarted => GcpResumeAction::ResendCopySysfile,
    }
}

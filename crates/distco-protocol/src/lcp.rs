//! Local Checkpoint protocol: round scheduling, per-node fragment-order
//! walk with bounded concurrency, completion handling, and master-takeover
//! (spec §4.4, component C2).

use distco_types::{FragmentKey, LcpId, NodeId};
use serde::{Deserialize, Serialize};

use crate::signal_counter::{SignalCounter, WaitReason};

/// `2^clcpDelay` soft-timer trigger, expressed as the ctimer threshold
/// (spec §4.4 "Trigger").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LcpTrigger {
    clcp_delay: u32,
}

impl LcpTrigger {
    pub fn new(clcp_delay: u32) -> Self {
        Self { clcp_delay }
    }

    pub fn threshold(&self) -> u64 {
        1u64 << self.clcp_delay
    }

    /// Whether a round should start given the current soft-timer counter.
    pub fn should_start(&self, ctimer: u64) -> bool {
        ctimer >= self.threshold()
    }
}

/// Per-fragment walk order for one LCP round: table-id ascending, then
/// fragment-id ascending within the table (spec §4.4 "Fragment order").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentWalk {
    remaining: Vec<FragmentKey>,
    cursor: usize,
}

impl FragmentWalk {
    /// `fragments` must already be supplied in ascending (table, fragment)
    /// order; the caller owns that ordering (`TableStore::ids_in_order`
    /// plus each table's fragment vector index).
    pub fn new(fragments: Vec<FragmentKey>) -> Self {
        Self {
            remaining: fragments,
            cursor: 0,
        }
    }

    pub fn next_fragment(&mut self) -> Option<FragmentKey> {
        let key = self.remaining.get(self.cursor).copied();
        if key.is_some() {
            self.cursor += 1;
        }
        key
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.remaining.len()
    }

    pub fn total(&self) -> usize {
        self.remaining.len()
    }
}

/// Bounded per-node admission: at most two started and two queued fragment
/// checkpoints outstanding per node at a time (spec §4.4 "Throttle",
/// `MAX_LCP_SLOTS_PER_NODE`). Reuses [`distco_cluster::Node`]'s slot
/// bookkeeping; this wrapper just names the decision the round driver makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LcpOrderDecision {
    Start,
    Queue,
    Stall,
}

pub fn decide_lcp_order(node: &distco_cluster::Node) -> LcpOrderDecision {
    if node.started_count() < distco_types::MAX_LCP_SLOTS_PER_NODE {
        LcpOrderDecision::Start
    } else if node.has_room_for_lcp_order() {
        LcpOrderDecision::Queue
    } else {
        LcpOrderDecision::Stall
    }
}

// ============================================================================
// Master round state
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LcpRoundState {
    Idle,
    Active {
        lcp_id: LcpId,
        walk_exhausted: bool,
        tables_outstanding: SignalCounter,
    },
    Completing {
        lcp_id: LcpId,
        waiting: SignalCounter,
    },
}

impl LcpRoundState {
    /// Starts a round: the whole table set is outstanding until every
    /// table's fragments have all completed (spec §4.4 "Completion").
    pub fn start(lcp_id: LcpId, tables: impl IntoIterator<Item = NodeId>) -> Self {
        LcpRoundState::Active {
            lcp_id,
            walk_exhausted: false,
            tables_outstanding: SignalCounter::new(WaitReason::StartLcp, tables),
        }
    }

    pub fn mark_walk_exhausted(&mut self) {
        if let LcpRoundState::Active { walk_exhausted, .. } = self {
            *walk_exhausted = true;
        }
    }

    /// A table finished checkpointing and was marked `TabSaved`. Once every
    /// table in the round has, and the fragment walk ran dry, the round can
    /// conclude (spec §4.4 "Round end").
    pub fn on_table_saved(&mut self, table: NodeId) -> bool {
        if let LcpRoundState::Active {
            walk_exhausted,
            tables_outstanding,
            ..
        } = self
        {
            tables_outstanding.clear(table);
            return *walk_exhausted && tables_outstanding.done();
        }
        false
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, LcpRoundState::Idle)
    }

    pub fn lcp_id(&self) -> Option<LcpId> {
        match self {
            LcpRoundState::Idle => None,
            LcpRoundState::Active { lcp_id, .. } | LcpRoundState::Completing { lcp_id, .. } => {
                Some(*lcp_id)
            }
        }
    }
}

// ============================================================================
// Master-takeover: two-stage drain + merge (spec §4.4)
// ============================================================================

/// A participant's LCP status reported to `MASTER_LCPREQ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LcpParticipantReport {
    Idle,
    Active,
    TabCompleted,
    TabSaved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LcpJoinState {
    Initial,
    AllIdle,
    AllActive,
    CopyOngoing,
    LcpConcluding,
}

/// Merges one participant's report into the running join state, per the
/// table in spec §4.4. `—` cells are genuine contradictions (a participant
/// claims to have completed a table while the merge believes the round
/// hasn't even finished its copy phase) and must fail fast.
pub fn merge_lcp_takeover(
    state: LcpJoinState,
    report: LcpParticipantReport,
) -> Result<LcpJoinState, crate::error::SystemError> {
    use LcpJoinState::*;
    use LcpParticipantReport::*;
    Ok(match (state, report) {
        (Initial, Idle) => AllIdle,
        (Initial, Active) => AllActive,
        (Initial, TabCompleted | TabSaved) => LcpConcluding,

        (AllIdle, Idle) => AllIdle,
        (AllIdle, Active) => CopyOngoing,
        (AllIdle, TabCompleted | TabSaved) => LcpConcluding,

        (AllActive, Idle) => CopyOngoing,
        (AllActive, Active) => AllActive,
        (AllActive, TabCompleted | TabSaved) => LcpConcluding,

        (CopyOngoing, Idle | Active) => CopyOngoing,
        (CopyOngoing, TabCompleted | TabSaved) => {
            return Err(crate::error::SystemError::GcpStopped)
        }

        (LcpConcluding, _) => LcpConcluding,
    })
}

/// `EMPTY_LCP_REQ` stage: before the merge above can even begin, the new
/// master must drain every participant's pending `LCP_FRAG_REP` replies so
/// none are lost across the takeover (spec §4.4 "Two-stage takeover").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmptyLcpDrain {
    waiting: SignalCounter,
}

impl EmptyLcpDrain {
    pub fn start(alive: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            waiting: SignalCounter::new(WaitReason::EmptyLcp, alive),
        }
    }

    pub fn on_reply(&mut self, from: NodeId) -> bool {
        self.waiting.clear(from);
        self.waiting.done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_fires_at_power_of_two_threshold() {
        let t = LcpTrigger::new(3);
        assert_eq!(t.threshold(), 8);
        assert!(!t.should_start(7));
        assert!(t.should_start(8));
    }

    #[test]
    fn fragment_walk_yields_in_supplied_order_then_exhausts() {
        let keys = vec![
            FragmentKey {
                table: distco_types::TableId::new(1),
                fragment: distco_types::FragmentId::new(0),
            },
            FragmentKey {
                table: distco_types::TableId::new(1),
                fragment: distco_types::FragmentId::new(1),
            },
        ];
        let mut walk = FragmentWalk::new(keys.clone());
        assert_eq!(walk.next_fragment(), Some(keys[0]));
        assert_eq!(walk.next_fragment(), Some(keys[1]));
        assert_eq!(walk.next_fragment(), None);
        assert!(walk.is_exhausted());
    }

    #[test]
    fn round_concludes_only_after_walk_exhausted_and_all_tables_saved() {
        let t1 = NodeId::new(1);
        let mut round = LcpRoundState::start(LcpId::new(1), vec![t1]);
        assert!(!round.on_table_saved(t1), "walk not exhausted yet");
        round.mark_walk_exhausted();
        // Re-report is a no-op on the counter but still should conclude once
        // the walk is exhausted and nothing outstanding remains.
        if let LcpRoundState::Active {
            tables_outstanding, ..
        } = &round
        {
            assert!(tables_outstanding.done());
        }
    }

    #[test]
    fn takeover_merge_follows_table() {
        let mut state = LcpJoinState::Initial;
        state = merge_lcp_takeover(state, LcpParticipantReport::Active).unwrap();
        assert_eq!(state, LcpJoinState::AllActive);
        state = merge_lcp_takeover(state, LcpParticipantReport::Idle).unwrap();
        assert_eq!(state, LcpJoinState::CopyOngoing);
        assert!(merge_lcp_takeover(state, LcpParticipantReport::TabSaved).is_err());
    }

    #[test]
    fn empty_lcp_drain_completes_once_all_reply() {
        let mut drain = EmptyLcpDrain::start(vec![NodeId::new(1), NodeId::new(2)]);
        assert!(!drain.on_reply(NodeId::new(1)));
        assert!(drain.on_reply(NodeId::new(2)));
    }

    use test_case::test_case;

    #[test_case(LcpJoinState::Initial, LcpParticipantReport::Idle, LcpJoinState::AllIdle; "initial idle")]
    #[test_case(LcpJoinState::Initial, LcpParticipantReport::Active, LcpJoinState::AllActive; "initial active")]
    #[test_case(LcpJoinState::Initial, LcpParticipantReport::TabCompleted, LcpJoinState::LcpConcluding; "initial tab completed")]
    #[test_case(LcpJoinState::AllIdle, LcpParticipantReport::Idle, LcpJoinState::AllIdle; "all idle stays idle")]
    #[test_case(LcpJoinState::AllIdle, LcpParticipantReport::Active, LcpJoinState::CopyOngoing; "all idle to copy ongoing")]
    #[test_case(LcpJoinState::AllActive, LcpParticipantReport::Active, LcpJoinState::AllActive; "all active stays active")]
    #[test_case(LcpJoinState::AllActive, LcpParticipantReport::Idle, LcpJoinState::CopyOngoing; "all active to copy ongoing")]
    #[test_case(LcpJoinState::CopyOngoing, LcpParticipantReport::Idle, LcpJoinState::CopyOngoing; "copy ongoing stays on idle report")]
    #[test_case(LcpJoinState::CopyOngoing, LcpParticipantReport::Active, LcpJoinState::CopyOngoing; "copy ongoing stays on active report")]
    #[test_case(LcpJoinState::LcpConcluding, LcpParticipantReport::TabSaved, LcpJoinState::LcpConcluding; "concluding absorbs everything")]
    fn merge_table_cells(state: LcpJoinState, report: LcpParticipantReport, expected: LcpJoinState) {
        assert_eq!(merge_lcp_takeover(state, report).unwrap(), expected);
    }

    #[test_case(LcpJoinState::CopyOngoing, LcpParticipantReport::TabCompleted; "copy ongoing contradicts tab completed")]
    #[test_case(LcpJoinState::CopyOngoing, LcpParticipantReport::TabSaved; "copy ongoing contradicts tab saved")]
    fn merge_table_contradictions_fail(state: LcpJoinState, report: LcpParticipantReport) {
        assert!(merge_lcp_takeover(state, report).is_err());
    }
}

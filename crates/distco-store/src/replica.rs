//! Per-fragment replica records: LCP history and crashed-replica bookkeeping
//! (spec §3 "Replica", §4.6, §6).

use distco_types::{Gci, LcpId, LcpSlot, NodeId, MAX_CRASHED_REPLICAS, MAX_LCP_STORED};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Validity of one LCP history slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LcpStatus {
    Valid,
    Invalid,
}

/// One entry of a replica's cyclic LCP history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LcpEntry {
    pub lcp_id: LcpId,
    pub status: LcpStatus,
    pub max_gci_started: Gci,
    pub max_gci_completed: Gci,
}

impl Default for LcpEntry {
    fn default() -> Self {
        Self {
            lcp_id: LcpId::new(0),
            status: LcpStatus::Invalid,
            max_gci_started: Gci::ZERO,
            max_gci_completed: Gci::ZERO,
        }
    }
}

/// A crashed-replica interval: the replica existed from `create_gci` and,
/// if it has since crashed, stopped being current as of `last_gci`.
/// `last_gci == None` encodes "currently alive" (spec: `replicaLastGci = ∞`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashInterval {
    pub create_gci: Gci,
    pub last_gci: Option<Gci>,
}

impl CrashInterval {
    pub fn is_alive(&self) -> bool {
        self.last_gci.is_none()
    }
}

/// A single replica of a fragment, living on one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaRecord {
    pub node: NodeId,
    pub initial_gci: Gci,
    /// Cyclic cursor into `lcp_history` for the next LCP to be written.
    pub next_lcp: LcpSlot,
    pub lcp_history: [LcpEntry; MAX_LCP_STORED],
    /// Crash/restart interval history, oldest first, at most
    /// `MAX_CRASHED_REPLICAS` entries; `is_alive()` is true only for the
    /// last entry.
    crash_intervals: Vec<CrashInterval>,
    /// True while a fragment checkpoint is in flight on this replica.
    pub lcp_ongoing: bool,
    /// The LCP id this replica started checkpointing (guards against
    /// re-issuing `LCP_FRAG_ORD` for work already begun, spec §4.4).
    pub lcp_id_started: Option<LcpId>,
}

impl ReplicaRecord {
    /// Creates a freshly-created replica (fragment create, or take-over commit).
    pub fn new(node: NodeId, initial_gci: Gci) -> Self {
        Self {
            node,
            initial_gci,
            next_lcp: LcpSlot::new(0),
            lcp_history: [LcpEntry::default(); MAX_LCP_STORED],
            crash_intervals: vec![CrashInterval {
                create_gci: initial_gci,
                last_gci: None,
            }],
            lcp_ongoing: false,
            lcp_id_started: None,
        }
    }

    /// Rebuilds a replica record from its persisted fields (table file page
    /// decode, spec §6). In-flight checkpoint state (`lcp_ongoing`,
    /// `lcp_id_started`) is not part of the on-disk record and always comes
    /// back cleared, same as a real restart would find it.
    pub(crate) fn from_raw_parts(
        node: NodeId,
        initial_gci: Gci,
        next_lcp: LcpSlot,
        lcp_history: [LcpEntry; MAX_LCP_STORED],
        crash_intervals: Vec<CrashInterval>,
    ) -> Self {
        Self {
            node,
            initial_gci,
            next_lcp,
            lcp_history,
            crash_intervals,
            lcp_ongoing: false,
            lcp_id_started: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.crash_intervals
            .last()
            .is_some_and(CrashInterval::is_alive)
    }

    pub fn crash_intervals(&self) -> &[CrashInterval] {
        &self.crash_intervals
    }

    pub fn no_crashed_replicas(&self) -> usize {
        self.crash_intervals.len()
    }

    /// Records that the owning node died at `gci`, closing the current
    /// interval and opening a new one. Fails with
    /// [`Error::MaxCrashedReplicas`] past the configured bound (spec §6
    /// `EXIT_MAX_CRASHED_REPLICAS`).
    pub fn record_crash(&mut self, gci: Gci) -> Result<()> {
        if let Some(last) = self.crash_intervals.last_mut() {
            debug_assert!(last.is_alive());
            last.last_gci = Some(gci);
        }
        Ok(())
    }

    /// Records the node restarting and the replica becoming live again from `gci`.
    pub fn record_restart(&mut self, gci: Gci) -> Result<()> {
        if self.crash_intervals.len() >= MAX_CRASHED_REPLICAS {
            return Err(Error::MaxCrashedReplicas(self.node));
        }
        let create_gci = self
            .crash_intervals
            .last()
            .map(|i| i.last_gci.unwrap_or(gci))
            .unwrap_or(gci);
        debug_assert!(create_gci <= gci || self.crash_intervals.is_empty());
        self.crash_intervals.push(CrashInterval {
            create_gci: gci,
            last_gci: None,
        });
        Ok(())
    }

    /// Records an LCP completion into the cyclic history, advances the
    /// cursor (spec §4.4 "Completion").
    pub fn record_lcp_completion(
        &mut self,
        lcp_id: LcpId,
        max_gci_started: Gci,
        max_gci_completed: Gci,
    ) {
        let slot = self.next_lcp;
        self.lcp_history[slot.get()] = LcpEntry {
            lcp_id,
            status: LcpStatus::Valid,
            max_gci_started,
            max_gci_completed,
        };
        self.next_lcp = slot.advance();
        self.lcp_ongoing = false;
    }

    /// The most recent *valid* LCP whose `max_gci_started <= newest_restorable`,
    /// used to pick a restart start-GCI (spec §4.6 step 1).
    pub fn best_restorable_lcp(&self, newest_restorable: Gci) -> Option<&LcpEntry> {
        self.lcp_history
            .iter()
            .filter(|e| e.status == LcpStatus::Valid && e.max_gci_started <= newest_restorable)
            .max_by_key(|e| e.max_gci_started)
    }

    /// Garbage-collects the oldest crash interval once it is no longer
    /// needed: `replicaLastGci[0] < oldestRestorableGCI` (spec §4.6).
    pub fn gc_oldest_interval(&mut self, oldest_restorable: Gci) {
        while self.crash_intervals.len() > 1 {
            let Some(first) = self.crash_intervals.first() else {
                break;
            };
            match first.last_gci {
                Some(last) if last < oldest_restorable => {
                    self.crash_intervals.remove(0);
                }
                _ => break,
            }
        }
    }

    /// Advances a stale interval's `create_gci` up to `keep_gci` — logs
    /// older than `keep_gci` are not available (spec §4.6).
    pub fn bump_create_gci_to_keep(&mut self, keep_gci: Gci) {
        if let Some(first) = self.crash_intervals.first_mut() {
            if first.create_gci < keep_gci {
                first.create_gci = keep_gci;
            }
        }
    }

    /// Discards any crash-interval entries whose `create_gci` is past a
    /// rolled-back `newest_restorable_gci` (spec §4.6, multi-failed restart).
    pub fn discard_tail_past(&mut self, newest_restorable: Gci) {
        self.crash_intervals
            .retain(|i| i.create_gci <= newest_restorable);
        if let Some(last) = self.crash_intervals.last_mut() {
            if last.last_gci.is_some_and(|g| g > newest_restorable) {
                last.last_gci = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u32) -> NodeId {
        NodeId::new(n)
    }

    #[test]
    fn crash_and_restart_opens_new_interval() {
        let mut r = ReplicaRecord::new(node(1), Gci::new(1));
        assert!(r.is_alive());
        r.record_crash(Gci::new(10)).unwrap();
        assert!(!r.is_alive());
        r.record_restart(Gci::new(12)).unwrap();
        assert!(r.is_alive());
        assert_eq!(r.no_crashed_replicas(), 2);
    }

    #[test]
    fn max_crashed_replicas_overflow() {
        let mut r = ReplicaRecord::new(node(1), Gci::new(1));
        // Starts with 1 interval; each crash+restart pair adds one more.
        for gci in 1..MAX_CRASHED_REPLICAS as u32 {
            r.record_crash(Gci::new(gci * 10)).unwrap();
            r.record_restart(Gci::new(gci * 10 + 1)).unwrap();
        }
        assert_eq!(r.no_crashed_replicas(), MAX_CRASHED_REPLICAS);
        r.record_crash(Gci::new(1000)).unwrap();
        let res = r.record_restart(Gci::new(1001));
        assert!(matches!(res, Err(Error::MaxCrashedReplicas(_))));
    }

    #[test]
    fn lcp_history_cycles_and_selects_best() {
        let mut r = ReplicaRecord::new(node(1), Gci::ZERO);
        r.record_lcp_completion(LcpId::new(1), Gci::new(5), Gci::new(5));
        r.record_lcp_completion(LcpId::new(2), Gci::new(9), Gci::new(9));
        let best = r.best_restorable_lcp(Gci::new(8)).unwrap();
        assert_eq!(best.lcp_id, LcpId::new(1));
        let best = r.best_restorable_lcp(Gci::new(20)).unwrap();
        assert_eq!(best.lcp_id, LcpId::new(2));
    }

    #[test]
    fn gc_oldest_interval_respects_oldest_restorable() {
        let mut r = ReplicaRecord::new(node(1), Gci::ZERO);
        r.record_crash(Gci::new(5)).unwrap();
        r.record_restart(Gci::new(6)).unwrap();
        r.gc_oldest_interval(Gci::new(5));
        assert_eq!(r.no_crashed_replicas(), 2);
        r.gc_oldest_interval(Gci::new(6));
        assert_eq!(r.no_crashed_replicas(), 1);
    }
}

//! Replica recovery selection at system restart: choosing the
//! `(replica, LCP, log chain)` triple used to restore each fragment
//! (spec §4.6).

use distco_types::{FragmentKey, Gci, LcpId, MAX_LOG_CHAIN};
use distco_store::replica::{CrashInterval, ReplicaRecord};
use serde::{Deserialize, Serialize};

use crate::error::SystemError;

/// One crash-interval segment of redo log that must be replayed to bring a
/// replica forward from its chosen LCP to `newest_restorable_gci`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogChainLink {
    pub create_gci: Gci,
    pub last_gci: Option<Gci>,
}

/// The plan chosen to restore one fragment replica: start from `lcp_id`'s
/// on-disk image at `start_gci`, then replay `log_chain` in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub node: distco_types::NodeId,
    pub lcp_id: LcpId,
    pub start_gci: Gci,
    pub log_chain: Vec<LogChainLink>,
}

/// Assembles the chain of crash intervals needed to cover `[start_gci,
/// newest_restorable]`. Fails if the chain would need more than
/// `MAX_LOG_CHAIN` links — the log is considered unavailable past that
/// many restarts (spec §4.6 "Log chain bound").
fn assemble_log_chain(
    intervals: &[CrashInterval],
    start_gci: Gci,
    newest_restorable: Gci,
) -> Option<Vec<LogChainLink>> {
    let chain: Vec<LogChainLink> = intervals
        .iter()
        .filter(|i| i.last_gci.is_none_or(|last| last >= start_gci))
        .filter(|i| i.create_gci <= newest_restorable)
        .map(|i| LogChainLink {
            create_gci: i.create_gci,
            last_gci: i.last_gci,
        })
        .collect();
    if chain.is_empty() || chain.len() > MAX_LOG_CHAIN {
        None
    } else {
        Some(chain)
    }
}

/// Picks the best restorable `(replica, LCP, log chain)` for one fragment:
/// among every candidate replica, the one whose LCP starts latest (least
/// log to replay) while still producing an assemblable chain wins (spec
/// §4.6 steps 1-3). Fails with [`SystemError::NoRestorableReplica`] if no
/// replica can be restored at all — the `EXIT_NO_RESTORABLE_REPLICA` path.
pub fn select_recovery(
    fragment: FragmentKey,
    replicas: &[ReplicaRecord],
    newest_restorable: Gci,
) -> Result<RecoveryPlan, SystemError> {
    let mut best: Option<RecoveryPlan> = None;
    for replica in replicas {
        let Some(lcp) = replica.best_restorable_lcp(newest_restorable) else {
            continue;
        };
        let Some(chain) =
            assemble_log_chain(replica.crash_intervals(), lcp.max_gci_started, newest_restorable)
        else {
            continue;
        };
        let candidate = RecoveryPlan {
            node: replica.node,
            lcp_id: lcp.lcp_id,
            start_gci: lcp.max_gci_started,
            log_chain: chain,
        };
        if best.as_ref().is_none_or(|b| candidate.start_gci > b.start_gci) {
            best = Some(candidate);
        }
    }
    best.ok_or(SystemError::NoRestorableReplica(fragment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use distco_types::NodeId;

    fn fragment() -> FragmentKey {
        FragmentKey {
            table: distco_types::TableId::new(1),
            fragment: distco_types::FragmentId::new(0),
        }
    }

    #[test]
    fn picks_the_replica_with_the_latest_restorable_lcp() {
        let mut a = ReplicaRecord::new(NodeId::new(1), Gci::ZERO);
        a.record_lcp_completion(LcpId::new(1), Gci::new(5), Gci::new(5));

        let mut b = ReplicaRecord::new(NodeId::new(2), Gci::ZERO);
        b.record_lcp_completion(LcpId::new(1), Gci::new(5), Gci::new(5));
        b.record_lcp_completion(LcpId::new(2), Gci::new(9), Gci::new(9));

        let plan = select_recovery(fragment(), &[a, b], Gci::new(20)).unwrap();
        assert_eq!(plan.node, NodeId::new(2));
        assert_eq!(plan.start_gci, Gci::new(9));
    }

    #[test]
    fn no_restorable_replica_when_no_lcp_covers_the_window() {
        let a = ReplicaRecord::new(NodeId::new(1), Gci::new(50));
        let err = select_recovery(fragment(), &[a], Gci::new(10)).unwrap_err();
        assert!(matches!(err, SystemError::NoRestorableReplica(_)));
    }

    #[test]
    fn chain_across_a_crash_and_restart_is_assembled() {
        let mut a = ReplicaRecord::new(NodeId::new(1), Gci::ZERO);
        a.record_lcp_completion(LcpId::new(1), Gci::new(5), Gci::new(5));
        a.record_crash(Gci::new(10)).unwrap();
        a.record_restart(Gci::new(11)).unwrap();

        let plan = select_recovery(fragment(), &[a], Gci::new(20)).unwrap();
        assert_eq!(plan.log_chain.len(), 2);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use distco_types::NodeId;
    use proptest::prelude::*;

    fn fragment() -> FragmentKey {
        FragmentKey {
            table: distco_types::TableId::new(1),
            fragment: distco_types::FragmentId::new(0),
        }
    }

    fn arb_replica() -> impl Strategy<Value = ReplicaRecord> {
        (
            proptest::collection::vec(1u32..40, 0..3),
            proptest::collection::vec(1u32..40, 0..4),
        )
            .prop_map(|(lcp_gcis, crash_gcis)| {
                let mut r = ReplicaRecord::new(NodeId::new(1), Gci::ZERO);
                let mut gci = 0u32;
                for (next_lcp_id, g) in (1u32..).zip(lcp_gcis) {
                    gci += g;
                    r.record_lcp_completion(LcpId::new(next_lcp_id), Gci::new(gci), Gci::new(gci));
                }
                for (i, g) in crash_gcis.into_iter().enumerate() {
                    let crash_at = gci + g + 1;
                    let restart_at = crash_at + 1;
                    if r.record_crash(Gci::new(crash_at)).is_ok()
                        && r.record_restart(Gci::new(restart_at)).is_ok()
                    {
                        gci = restart_at;
                    }
                    let _ = i;
                }
                r
            })
    }

    proptest! {
        /// Spec §8 property 10: any chosen recovery plan's start GCI, and
        /// every log-chain link feeding it, stays within the window ending
        /// at `newest_restorable`.
        #[test]
        fn chosen_plan_never_exceeds_the_restorable_window(
            replica in arb_replica(),
            newest_restorable in 0u32..80,
        ) {
            let newest_restorable = Gci::new(newest_restorable);
            if let Ok(plan) = select_recovery(fragment(), &[replica], newest_restorable) {
                prop_assert!(plan.start_gci <= newest_restorable);
                prop_assert!(plan.log_chain.len() <= MAX_LOG_CHAIN);
                for link in &plan.log_chain {
                    prop_assert!(link.create_gci <= newest_restorable);
                }
            }
        }
    }
}

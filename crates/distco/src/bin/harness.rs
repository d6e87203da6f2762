//! In-process multi-node harness: runs a small cluster's coordinators in
//! one process, wiring each `Outbound` message to the peer coordinator's
//! `dispatch` call directly rather than over a real network transport
//! (spec §9 Non-goals: network transport, process supervision).

use std::collections::{BTreeMap, VecDeque};

use distco::{ClusterConfig, Coordinator, Outbound, Signal};
use distco_store::fragment::Fragment;
use distco_store::replica::ReplicaRecord;
use distco_store::table::Table;
use distco_types::{FragmentId, FragmentKey, Gci, NodeId, TableId};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let dir = std::env::temp_dir().join(format!("distco-harness-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create scratch dir for sysfiles");
    // A third node beyond the replica count becomes a hot spare (spec
    // §4.1), so the takeover path below has a starting node to pick.
    let config = ClusterConfig {
        nodes: distco::config::NodesConfig {
            ids: vec![1, 2, 3],
            replica_count: 2,
        },
        ..ClusterConfig::default()
    };
    let node_ids: Vec<NodeId> = config.nodes.ids.iter().map(|&id| NodeId::new(id)).collect();

    let mut coordinators: BTreeMap<NodeId, Coordinator> = BTreeMap::new();
    for &id in &node_ids {
        let path0 = dir.join(format!("node{}.sysfile0", id));
        let path1 = dir.join(format!("node{}.sysfile1", id));
        let coordinator =
            Coordinator::new(&config, path0, path1).expect("build coordinator for node");
        coordinators.insert(id, coordinator);
    }

    let master = *node_ids.iter().min().expect("at least one node configured");

    // Give the master one stored table/fragment so a later node failure has
    // something to take over.
    if let Some(coordinator) = coordinators.get_mut(&master) {
        let backup = node_ids.get(1).copied();
        let mut replicas = vec![ReplicaRecord::new(master, Gci::ZERO)];
        if let Some(backup) = backup {
            replicas.push(ReplicaRecord::new(backup, Gci::ZERO));
        }
        let fragment = Fragment::new(master, 0, replicas);
        let table = Table::new(TableId::new(1), 1, vec![fragment]);
        coordinator.tables.insert(table);
    }

    let mut inbox: VecDeque<(NodeId, Signal)> = VecDeque::new();
    inbox.push_back((master, Signal::Tick));

    let mut rounds_completed = 0u32;
    let mut last_gci = coordinators[&master].current_gci;
    let mut failure_injected = false;
    let mut fatal = false;

    while let Some((target, signal)) = inbox.pop_front() {
        let Some(coordinator) = coordinators.get_mut(&target) else {
            continue;
        };
        let out = coordinator.dispatch(signal);
        for message in out {
            if matches!(message, Outbound::SystemError { .. }) {
                if let Outbound::SystemError { reason } = message {
                    tracing::error!(reason, "system error, cluster halting");
                }
                fatal = true;
                inbox.clear();
                break;
            }
            route(&master, &mut inbox, message);
        }
        if fatal {
            break;
        }

        let current = coordinators[&master].current_gci;
        if current > last_gci {
            rounds_completed += 1;
            last_gci = current;
            tracing::info!(rounds_completed, current_gci = %last_gci, "gcp round observed");
        }

        // Once one GCP round has landed, fail the fragment's backup node
        // (if any) so the takeover path gets exercised end to end.
        if !failure_injected && rounds_completed >= 1 {
            failure_injected = true;
            if let Some(&backup) = node_ids.get(1) {
                inbox.push_back((master, Signal::NodeFailed { node: backup }));
            }
        }
        if rounds_completed >= 3 {
            break;
        }
    }

    if !fatal {
        coordinators
            .get_mut(&master)
            .expect("master coordinator present")
            .persist_sysfile()
            .expect("persist sysfile");
    }

    let takeover_fragment = FragmentKey::new(TableId::new(1), FragmentId::new(0));
    let takeover_settled = !coordinators[&master].takeovers.contains_key(&takeover_fragment);

    println!(
        "harness: {} nodes, {} gcp rounds, final gci {}, takeover settled: {}",
        node_ids.len(),
        rounds_completed,
        last_gci,
        takeover_settled
    );
}

/// Delivers one outbound message by translating it into the signal its
/// target node's coordinator would receive in response, and, where the
/// real protocol expects a reply, immediately queuing that reply back to
/// the master — standing in for the network round trip the Non-goals
/// exclude.
fn route(master: &NodeId, inbox: &mut VecDeque<(NodeId, Signal)>, message: Outbound) {
    match message {
        Outbound::SendGcpPrepareReq { to, .. } => {
            inbox.push_back((*master, Signal::GcpPrepareConf { from: to }));
        }
        Outbound::SendGcpCommitReq { to, .. } => {
            inbox.push_back((*master, Signal::GcpNodeFinish { from: to }));
        }
        Outbound::SendGcpSaveReq { to, .. } => {
            inbox.push_back((*master, Signal::GcpSaveConf { from: to }));
        }
        Outbound::SendCreateFragReq { to, fragment } => {
            inbox.push_back((
                *master,
                Signal::TakeoverCreateFragConf { fragment, from: to },
            ));
        }
        Outbound::SendPrepareCopyFragReq { to, fragment } => {
            inbox.push_back((*master, Signal::TakeoverCopyFragConf { fragment, from: to }));
        }
        Outbound::SendCommitCreateReq { to, fragment } => {
            inbox.push_back((
                *master,
                Signal::TakeoverCommitCreateConf { fragment, from: to },
            ));
        }
        Outbound::VerifyGranted { .. } => {}
        Outbound::SystemError { .. } => {}
    }
    inbox.push_back((*master, Signal::Tick));
}

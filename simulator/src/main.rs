use models::telemetry;
use simulator::config::DrainOptions;
use simulator::nodeinfo::NodeInfoIndex;
use simulator::predicates::BasicPredicateChecker;
use simulator::removal::{
    find_empty_nodes_to_remove, EvaluationMode, RemovalRequest, RemovalSimulator,
};
use simulator::report::Report;
use simulator::snapshot::ClusterSnapshot;
use simulator::tracker::UsageTracker;
use simulator::utilization::calculate_utilization;

use argh::FromArgs;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use snafu::ResultExt;
use tracing::{event, Level};

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// The module-wide result type.
type Result<T> = std::result::Result<T, error::Error>;

/// Simulates removing nodes from a cluster snapshot and prints which ones could go.
#[derive(FromArgs, Debug)]
struct Arguments {
    /// path to a YAML cluster snapshot
    #[argh(option)]
    snapshot: PathBuf,

    /// stop once this many nodes were found removable
    #[argh(option)]
    max_count: Option<usize>,

    /// trust controller references instead of looking them up
    #[argh(switch)]
    fast: bool,

    /// seed for the destination shuffle, for reproducible runs
    #[argh(option)]
    seed: Option<u64>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    telemetry::init_telemetry_from_env().context(error::TelemetryInitSnafu)?;
    let args: Arguments = argh::from_env();
    let options = DrainOptions::from_environment().context(error::ConfigSnafu)?;

    let cluster = ClusterSnapshot::load(&args.snapshot)
        .and_then(ClusterSnapshot::into_cluster)
        .context(error::SnapshotSnafu)?;
    event!(
        Level::INFO,
        nodes = cluster.nodes.len(),
        pods = cluster.pods.len(),
        candidates = cluster.candidates.len(),
        "Loaded cluster snapshot."
    );

    let empty_nodes = find_empty_nodes_to_remove(
        &cluster.candidates,
        &cluster.pods,
        &options,
        cluster.timestamp,
    );
    let empty_names: HashSet<String> = empty_nodes.iter().map(|node| node.name_any()).collect();
    let candidates: Vec<Arc<Node>> = cluster
        .candidates
        .iter()
        .filter(|node| !empty_names.contains(&node.name_any()))
        .cloned()
        .collect();

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let checker = BasicPredicateChecker::new();
    let simulator = RemovalSimulator::new(&checker, &cluster.listers, &options);
    let mut tracker = UsageTracker::new();
    let request = RemovalRequest {
        candidates: &candidates,
        destination_nodes: &cluster.nodes,
        pods: &cluster.pods,
        pod_disruption_budgets: &cluster.pod_disruption_budgets,
        max_count: args.max_count,
        mode: if args.fast {
            EvaluationMode::Fast
        } else {
            EvaluationMode::Detailed
        },
        hints: &cluster.hints,
        timestamp: cluster.timestamp,
    };
    let result = simulator.find_nodes_to_remove(&request, &mut tracker, &mut rng);

    let node_infos = NodeInfoIndex::build(&cluster.pods, &cluster.nodes);
    let mut utilization = BTreeMap::new();
    for node in &cluster.candidates {
        let name = node.name_any();
        let Some(info) = node_infos.get(&name) else {
            continue;
        };
        match calculate_utilization(node, info, true, true) {
            Ok(info) => {
                utilization.insert(name, info);
            }
            Err(err) => {
                event!(Level::WARN, node = %name, %err, "Unable to calculate utilization.");
            }
        }
    }

    let report = Report::new(&empty_nodes, &result, utilization);
    let output = serde_json::to_string_pretty(&report).context(error::SerializeReportSnafu)?;
    println!("{}", output);
    Ok(())
}

pub mod error {
    use models::telemetry;
    use simulator::config::config_error;
    use simulator::snapshot;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum Error {
        #[snafu(display("Unable to initialize telemetry: '{}'", source))]
        TelemetryInit {
            source: telemetry::error::TelemetryConfigError,
        },

        #[snafu(display("Unable to load drain options: '{}'", source))]
        Config { source: config_error::Error },

        #[snafu(display("Unable to load cluster snapshot: '{}'", source))]
        Snapshot {
            source: snapshot::error::SnapshotError,
        },

        #[snafu(display("Unable to serialize report: '{}'", source))]
        SerializeReport { source: serde_json::Error },
    }
}

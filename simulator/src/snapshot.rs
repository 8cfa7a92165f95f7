//! Static cluster state read from a YAML file, for running a simulation outside of a live cluster.
use crate::listers::StoreListers;
use crate::placement::Hints;

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::{DaemonSet, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Node, Pod, ReplicationController};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::ResourceExt;
use serde::Deserialize;
use snafu::{OptionExt, ResultExt};

use std::fs;
use std::path::Path;
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, error::SnapshotError>;

/// Everything a simulation reads, as stored on disk.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterSnapshot {
    pub nodes: Vec<Node>,
    pub pods: Vec<Pod>,
    pub pod_disruption_budgets: Vec<PodDisruptionBudget>,
    pub replication_controllers: Vec<ReplicationController>,
    pub replica_sets: Vec<ReplicaSet>,
    pub jobs: Vec<Job>,
    pub daemon_sets: Vec<DaemonSet>,
    pub stateful_sets: Vec<StatefulSet>,
    /// Names of the nodes to consider for removal, in order of preference. Every node when empty.
    pub candidates: Vec<String>,
    /// Placement decisions from a previous run.
    pub hints: Hints,
    /// The time the snapshot was taken. The current time when absent.
    pub timestamp: Option<DateTime<Utc>>,
}

/// A snapshot ready to be simulated against.
pub struct Cluster {
    pub nodes: Vec<Arc<Node>>,
    pub pods: Vec<Arc<Pod>>,
    pub pod_disruption_budgets: Vec<PodDisruptionBudget>,
    pub listers: StoreListers,
    pub candidates: Vec<Arc<Node>>,
    pub hints: Hints,
    pub timestamp: DateTime<Utc>,
}

impl ClusterSnapshot {
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).context(error::ParseSnafu)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).context(error::ReadSnafu { path })?;
        Self::from_yaml(&contents)
    }

    /// Indexes the snapshot for simulation. Every candidate must name a node in the snapshot.
    pub fn into_cluster(self) -> Result<Cluster> {
        let nodes: Vec<Arc<Node>> = self.nodes.into_iter().map(Arc::new).collect();
        let candidates = if self.candidates.is_empty() {
            nodes.clone()
        } else {
            self.candidates
                .iter()
                .map(|name| {
                    nodes
                        .iter()
                        .find(|node| node.name_any() == *name)
                        .cloned()
                        .context(error::UnknownCandidateSnafu { name })
                })
                .collect::<Result<Vec<_>>>()?
        };

        Ok(Cluster {
            candidates,
            nodes,
            pods: self.pods.into_iter().map(Arc::new).collect(),
            pod_disruption_budgets: self.pod_disruption_budgets,
            listers: StoreListers::from_objects(
                self.replication_controllers,
                self.replica_sets,
                self.jobs,
                self.daemon_sets,
                self.stateful_sets,
            ),
            hints: self.hints,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

pub mod error {
    use snafu::Snafu;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum SnapshotError {
        #[snafu(display("Unable to read snapshot '{}': '{}'", path.display(), source))]
        Read {
            path: PathBuf,
            source: std::io::Error,
        },

        #[snafu(display("Unable to parse snapshot: '{}'", source))]
        Parse { source: serde_yaml::Error },

        #[snafu(display("Candidate node '{}' is not part of the snapshot", name))]
        UnknownCandidate { name: String },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::listers::ListerRegistry;

    const SNAPSHOT: &str = r#"
nodes:
  - apiVersion: v1
    kind: Node
    metadata:
      name: node-a
  - apiVersion: v1
    kind: Node
    metadata:
      name: node-b
pods:
  - apiVersion: v1
    kind: Pod
    metadata:
      name: web-1
      namespace: default
    spec:
      nodeName: node-a
      containers:
        - name: web
          image: web:latest
replicaSets:
  - apiVersion: apps/v1
    kind: ReplicaSet
    metadata:
      name: web
      namespace: default
    spec:
      replicas: 2
      selector:
        matchLabels:
          app: web
candidates:
  - node-b
hints:
  default/web-1: node-b
timestamp: 2024-03-01T12:00:00Z
"#;

    #[test]
    fn test_parse_snapshot() {
        let cluster = ClusterSnapshot::from_yaml(SNAPSHOT)
            .unwrap()
            .into_cluster()
            .unwrap();
        assert_eq!(cluster.nodes.len(), 2);
        assert_eq!(cluster.pods.len(), 1);
        assert_eq!(cluster.candidates.len(), 1);
        assert_eq!(cluster.candidates[0].name_any(), "node-b");
        assert_eq!(cluster.hints["default/web-1"], "node-b");
        assert_eq!(cluster.timestamp, *crate::test_util::NOW);
        assert!(cluster.listers.replica_set("default", "web").is_ok());
    }

    #[test]
    fn test_unknown_candidate() {
        let snapshot = ClusterSnapshot {
            candidates: vec!["missing".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            snapshot.into_cluster(),
            Err(error::SnapshotError::UnknownCandidate { .. })
        ));
    }

    #[test]
    fn test_empty_candidates_means_all_nodes() {
        let mut snapshot = ClusterSnapshot::from_yaml(SNAPSHOT).unwrap();
        snapshot.candidates.clear();
        let cluster = snapshot.into_cluster().unwrap();
        assert_eq!(cluster.candidates.len(), 2);
    }
}

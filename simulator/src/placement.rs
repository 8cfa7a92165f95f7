//! Simulates rescheduling the pods of a node which is about to be removed onto the remaining nodes.
use crate::nodeinfo::NodeInfoIndex;
use crate::predicates::{PredicateChecker, PredicateMetadata};
use crate::tracker::UsageRecorder;
use models::pod;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;
use rand::seq::SliceRandom;
use rand::Rng;
use snafu::Snafu;
use tracing::{event, instrument, Level};

use std::collections::BTreeMap;
use std::sync::Arc;

/// Previous placement decisions, from pod key (`namespace/name`) to node name.
pub type Hints = BTreeMap<String, String>;

pub type Result<T> = std::result::Result<T, PlacementError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PlacementError {
    #[snafu(display("Failed to find place for pod '{}'", pod))]
    NoPlaceForPod { pod: String },

    #[snafu(display("Unable to compute scheduling metadata for pod '{}': '{}'", pod, source))]
    PredicateMetadata {
        pod: String,
        source: crate::predicates::error::PredicateError,
    },
}

/// Places pods onto destination nodes, preferring the nodes they were placed on last time.
pub struct PlacementSolver<'a> {
    checker: &'a dyn PredicateChecker,
    destination_nodes: &'a [Arc<Node>],
    hints: &'a Hints,
}

impl<'a> PlacementSolver<'a> {
    pub fn new(
        checker: &'a dyn PredicateChecker,
        destination_nodes: &'a [Arc<Node>],
        hints: &'a Hints,
    ) -> Self {
        PlacementSolver {
            checker,
            destination_nodes,
            hints,
        }
    }

    /// Finds a node for every pod, evaluating them in order and accounting for the pods already
    /// placed in this call. Returns the chosen node per pod key only if every pod found a place.
    ///
    /// `node_infos` is left untouched; placements are simulated on a private copy. Each successful
    /// placement is reported to `usage`.
    #[instrument(skip_all, fields(removed_node = removed_node, pods = pods.len()))]
    pub fn find_placement<R: Rng + ?Sized>(
        &self,
        removed_node: &str,
        pods: &[Arc<Pod>],
        node_infos: &NodeInfoIndex,
        usage: &mut dyn UsageRecorder,
        timestamp: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Hints> {
        let mut working = node_infos.clone();
        let mut new_hints = Hints::new();

        let mut destinations: Vec<&Arc<Node>> = self.destination_nodes.iter().collect();
        destinations.shuffle(rng);

        for original in pods {
            let pod = pod::detached_copy(original);
            let pod_key = pod::pod_key(&pod);
            let metadata = self
                .checker
                .predicate_metadata(&pod, &working)
                .map_err(|source| PlacementError::PredicateMetadata {
                    pod: pod_key.clone(),
                    source,
                })?;
            event!(Level::TRACE, pod = %pod_key, "Looking for place for pod.");

            let hinted = self
                .hints
                .get(&pod_key)
                .filter(|hinted| hinted.as_str() != removed_node)
                .filter(|hinted| try_node(self.checker, &mut working, hinted, &pod, &metadata));
            let target = match hinted {
                Some(hinted) => hinted.clone(),
                None => destinations
                    .iter()
                    .map(|node| node.name_any())
                    .filter(|name| name != removed_node)
                    .find(|name| try_node(self.checker, &mut working, name, &pod, &metadata))
                    .ok_or_else(|| PlacementError::NoPlaceForPod {
                        pod: pod_key.clone(),
                    })?,
            };

            usage.register_usage(removed_node, &target, timestamp);
            new_hints.insert(pod_key, target);
        }
        Ok(new_hints)
    }
}

/// Checks the pod against the node's working state, and on success records it there.
fn try_node(
    checker: &dyn PredicateChecker,
    working: &mut NodeInfoIndex,
    node_name: &str,
    pod: &Pod,
    metadata: &PredicateMetadata,
) -> bool {
    let Some(info) = working.get(node_name) else {
        return false;
    };
    if info.node().is_none() {
        // Pods can outlive their node object for a short while.
        event!(Level::WARN, node = node_name, "No node object for node info.");
        return false;
    }
    if let Err(err) = checker.check_predicates(pod, metadata, info) {
        event!(
            Level::TRACE,
            node = node_name,
            pod = %pod::pod_key(pod),
            %err,
            "Pod does not fit."
        );
        return false;
    }
    let info = info.with_pod(Arc::new(pod.clone()));
    working.replace(node_name, info);
    true
}

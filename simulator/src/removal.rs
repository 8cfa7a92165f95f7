//! Decides which candidate nodes could be removed from the cluster, by draining each one in
//! simulation and rescheduling its pods onto the remaining nodes.
use crate::config::DrainOptions;
use crate::drain::{BlockingPod, DrainBlocked, DrainChecker};
use crate::listers::ListerRegistry;
use crate::nodeinfo::NodeInfoIndex;
use crate::pdb;
use crate::placement::{Hints, PlacementSolver};
use crate::predicates::PredicateChecker;
use crate::tracker::UsageRecorder;
use models::reasons::{BlockingPodReason, UnremovableReason};

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::ResourceExt;
use rand::Rng;
use tracing::{event, instrument, Level};

use std::fmt;
use std::sync::Arc;

/// How much a drain simulation trusts pods' controller references.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EvaluationMode {
    /// Controller references are assumed to be valid.
    Fast,
    /// Every controller reference is looked up.
    Detailed,
}

impl fmt::Display for EvaluationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationMode::Fast => write!(f, "Fast evaluation"),
            EvaluationMode::Detailed => write!(f, "Detailed evaluation"),
        }
    }
}

/// A node which can be removed, and the pods which would have to be rescheduled.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeToBeRemoved {
    pub node: Arc<Node>,
    pub pods_to_reschedule: Vec<Arc<Pod>>,
    pub daemon_set_pods: Vec<Arc<Pod>>,
}

/// A node which cannot be removed.
#[derive(Clone, Debug, PartialEq)]
pub struct UnremovableNode {
    pub node: Arc<Node>,
    pub reason: UnremovableReason,
    /// Set when the node is kept because of a particular pod.
    pub blocking_pod: Option<BlockingPod>,
}

/// The cluster state and limits for a single removal simulation.
#[derive(Clone, Copy, Debug)]
pub struct RemovalRequest<'a> {
    /// Nodes to evaluate, in order of preference.
    pub candidates: &'a [Arc<Node>],
    /// Nodes which pods may be moved to.
    pub destination_nodes: &'a [Arc<Node>],
    pub pods: &'a [Arc<Pod>],
    pub pod_disruption_budgets: &'a [PodDisruptionBudget],
    /// Stop once this many nodes were found removable. `None` evaluates every candidate.
    pub max_count: Option<usize>,
    pub mode: EvaluationMode,
    /// Placement decisions from the previous simulation.
    pub hints: &'a Hints,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RemovalResult {
    pub removable: Vec<NodeToBeRemoved>,
    pub unremovable: Vec<UnremovableNode>,
    /// Placement decisions made for every removable node.
    pub hints: Hints,
}

/// Runs removal simulations against a predicate checker and, for detailed evaluations, controller
/// listers.
pub struct RemovalSimulator<'a> {
    predicate_checker: &'a dyn PredicateChecker,
    listers: &'a dyn ListerRegistry,
    options: &'a DrainOptions,
}

impl<'a> RemovalSimulator<'a> {
    pub fn new(
        predicate_checker: &'a dyn PredicateChecker,
        listers: &'a dyn ListerRegistry,
        options: &'a DrainOptions,
    ) -> Self {
        RemovalSimulator {
            predicate_checker,
            listers,
            options,
        }
    }

    /// Evaluates candidates in order. A candidate which cannot be removed is recorded and the next
    /// one is evaluated; nothing about one candidate stops the evaluation of another.
    #[instrument(
        skip_all,
        fields(candidates = request.candidates.len(), mode = %request.mode)
    )]
    pub fn find_nodes_to_remove<R: Rng + ?Sized>(
        &self,
        request: &RemovalRequest<'_>,
        usage: &mut dyn UsageRecorder,
        rng: &mut R,
    ) -> RemovalResult {
        let node_infos = NodeInfoIndex::build(request.pods, request.destination_nodes);
        let solver = PlacementSolver::new(
            self.predicate_checker,
            request.destination_nodes,
            request.hints,
        );
        let mut checker = DrainChecker::new(
            self.options,
            request.pod_disruption_budgets,
            request.timestamp,
        );
        if request.mode == EvaluationMode::Detailed {
            checker = checker.with_listers(self.listers);
        }

        let mut result = RemovalResult::default();
        for candidate in request.candidates {
            if request
                .max_count
                .map_or(false, |max_count| result.removable.len() >= max_count)
            {
                break;
            }
            let node_name = candidate.name_any();

            let Some(info) = node_infos.get(&node_name) else {
                event!(Level::ERROR, node = %node_name, "Node not found in the cluster snapshot.");
                result.unremovable.push(UnremovableNode {
                    node: Arc::clone(candidate),
                    reason: UnremovableReason::UnexpectedError,
                    blocking_pod: None,
                });
                continue;
            };

            let pods = match checker.pods_for_deletion(info.pods()) {
                Ok(pods) => pods,
                Err(DrainBlocked {
                    blocking_pod,
                    cause,
                    ..
                }) => {
                    event!(
                        Level::DEBUG,
                        node = %node_name,
                        mode = %request.mode,
                        %cause,
                        "Node cannot be drained."
                    );
                    result.unremovable.push(UnremovableNode {
                        node: Arc::clone(candidate),
                        reason: UnremovableReason::BlockedByPod,
                        blocking_pod: Some(blocking_pod),
                    });
                    continue;
                }
            };

            if let Err(err) = pdb::check_pdbs(&pods.movable, request.pod_disruption_budgets) {
                event!(
                    Level::DEBUG,
                    node = %node_name,
                    mode = %request.mode,
                    %err,
                    "Node cannot be drained without violating a disruption budget."
                );
                let unremovable = match err.blocking_pod() {
                    Some(pod) => UnremovableNode {
                        node: Arc::clone(candidate),
                        reason: UnremovableReason::BlockedByPod,
                        blocking_pod: Some(BlockingPod {
                            pod: Arc::clone(pod),
                            reason: BlockingPodReason::NotEnoughPdb,
                        }),
                    },
                    None => UnremovableNode {
                        node: Arc::clone(candidate),
                        reason: UnremovableReason::UnexpectedError,
                        blocking_pod: None,
                    },
                };
                result.unremovable.push(unremovable);
                continue;
            }

            match solver.find_placement(
                &node_name,
                &pods.movable,
                &node_infos,
                usage,
                request.timestamp,
                rng,
            ) {
                Ok(hints) => {
                    event!(
                        Level::DEBUG,
                        node = %node_name,
                        mode = %request.mode,
                        pods = pods.movable.len(),
                        "Node may be removed."
                    );
                    result.hints.extend(hints);
                    result.removable.push(NodeToBeRemoved {
                        node: Arc::clone(candidate),
                        pods_to_reschedule: pods.movable,
                        daemon_set_pods: pods.daemon_set_pods,
                    });
                }
                Err(err) => {
                    event!(
                        Level::DEBUG,
                        node = %node_name,
                        mode = %request.mode,
                        %err,
                        "Node is not suitable for removal."
                    );
                    result.unremovable.push(UnremovableNode {
                        node: Arc::clone(candidate),
                        reason: UnremovableReason::NoPlaceToMovePods,
                        blocking_pod: None,
                    });
                }
            }
        }
        result
    }
}

/// Returns the candidates which have nothing a drain would need to move.
///
/// No placement is simulated and no controller is looked up. A candidate with no pods at all in the
/// snapshot is always empty.
#[instrument(skip_all, fields(candidates = candidates.len()))]
pub fn find_empty_nodes_to_remove(
    candidates: &[Arc<Node>],
    pods: &[Arc<Pod>],
    options: &DrainOptions,
    now: DateTime<Utc>,
) -> Vec<Arc<Node>> {
    let node_infos = NodeInfoIndex::build(pods, candidates);
    let checker = DrainChecker::new(options, &[], now).delete_all();
    candidates
        .iter()
        .filter(|candidate| {
            let Some(info) = node_infos.get(&candidate.name_any()) else {
                return true;
            };
            checker
                .pods_for_deletion(info.pods())
                .map_or(false, |pods| pods.movable.is_empty())
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::listers::MockListerRegistry;
    use crate::predicates::{BasicPredicateChecker, MockPredicateChecker};
    use crate::test_util::{
        annotate, bare_pod, daemon_set_pod, node, on_node, owned_pod, pdb, replica_set,
        with_labels, with_requests, NOW,
    };
    use crate::tracker::UsageTracker;
    use models::constants::{MIRROR_POD_ANNOTATION, SAFE_TO_EVICT_ANNOTATION};

    use maplit::btreemap;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const GIB: i64 = 1024 * 1024 * 1024;

    fn arc_nodes(names: &[&str]) -> Vec<Arc<Node>> {
        names
            .iter()
            .map(|name| Arc::new(node(name, 1000, 4 * GIB)))
            .collect()
    }

    fn replicated(name: &str, node: &str, milli_cpu: i64) -> Arc<Pod> {
        Arc::new(on_node(
            with_requests(owned_pod(name, "ReplicaSet", "rs"), milli_cpu, GIB),
            node,
        ))
    }

    fn request<'a>(
        candidates: &'a [Arc<Node>],
        destinations: &'a [Arc<Node>],
        pods: &'a [Arc<Pod>],
        budgets: &'a [PodDisruptionBudget],
        hints: &'a Hints,
    ) -> RemovalRequest<'a> {
        RemovalRequest {
            candidates,
            destination_nodes: destinations,
            pods,
            pod_disruption_budgets: budgets,
            max_count: None,
            mode: EvaluationMode::Fast,
            hints,
            timestamp: *NOW,
        }
    }

    fn names(nodes: impl IntoIterator<Item = Arc<Node>>) -> Vec<String> {
        nodes.into_iter().map(|node| node.name_any()).collect()
    }

    #[test]
    fn test_evaluation_mode_display() {
        assert_eq!(EvaluationMode::Fast.to_string(), "Fast evaluation");
        assert_eq!(EvaluationMode::Detailed.to_string(), "Detailed evaluation");
    }

    #[test]
    fn test_single_pod_moves_to_destination() {
        let nodes = arc_nodes(&["n", "dest"]);
        let pods = vec![replicated("pod", "n", 200)];
        let hints = Hints::new();
        let checker = BasicPredicateChecker::new();
        let listers = MockListerRegistry::new();
        let options = DrainOptions::default();

        let simulator = RemovalSimulator::new(&checker, &listers, &options);
        let result = simulator.find_nodes_to_remove(
            &request(&nodes[..1], &nodes, &pods, &[], &hints),
            &mut UsageTracker::new(),
            &mut StdRng::seed_from_u64(1),
        );

        assert!(result.unremovable.is_empty());
        assert_eq!(result.removable.len(), 1);
        assert_eq!(result.removable[0].node.name_any(), "n");
        assert_eq!(result.removable[0].pods_to_reschedule, pods);
        assert_eq!(
            result.hints,
            btreemap! {"default/pod".to_string() => "dest".to_string()}
        );
    }

    #[test]
    fn test_max_count_stops_evaluation() {
        let nodes = arc_nodes(&["c1", "c2", "c3", "c4", "c5", "dest"]);
        let pods: Vec<Arc<Pod>> = ["c1", "c2", "c3", "c4", "c5"]
            .iter()
            .map(|node| replicated(&format!("pod-{}", node), node, 100))
            .collect();
        let hints = Hints::new();
        let checker = BasicPredicateChecker::new();
        let listers = MockListerRegistry::new();
        let options = DrainOptions::default();

        let simulator = RemovalSimulator::new(&checker, &listers, &options);
        let mut request = request(&nodes[..5], &nodes, &pods, &[], &hints);
        request.max_count = Some(2);
        let result = simulator.find_nodes_to_remove(
            &request,
            &mut UsageTracker::new(),
            &mut StdRng::seed_from_u64(1),
        );

        assert_eq!(
            names(result.removable.into_iter().map(|removable| removable.node)),
            vec!["c1", "c2"]
        );
        assert!(result.unremovable.is_empty());
        assert_eq!(result.hints.len(), 2);
    }

    #[test]
    fn test_blocked_node_never_reaches_placement() {
        let nodes = arc_nodes(&["n", "dest"]);
        let pods = vec![
            Arc::new(on_node(daemon_set_pod("pod1", "ds"), "n")),
            replicated("pod2", "n", 100),
            Arc::new(on_node(
                annotate(
                    owned_pod("pod3", "ReplicaSet", "rs"),
                    SAFE_TO_EVICT_ANNOTATION,
                    "false",
                ),
                "n",
            )),
        ];
        let hints = Hints::new();
        // No expectations: any predicate call panics.
        let checker = MockPredicateChecker::new();
        let mut listers = MockListerRegistry::new();
        listers
            .expect_daemon_set()
            .returning(|_, _| Ok(Arc::new(Default::default())));
        listers
            .expect_replica_set()
            .returning(|_, _| Ok(Arc::new(replica_set("default", "rs", 3))));
        let options = DrainOptions::default();

        let simulator = RemovalSimulator::new(&checker, &listers, &options);
        let mut request = request(&nodes[..1], &nodes, &pods, &[], &hints);
        request.mode = EvaluationMode::Detailed;
        let result = simulator.find_nodes_to_remove(
            &request,
            &mut UsageTracker::new(),
            &mut StdRng::seed_from_u64(1),
        );

        assert!(result.removable.is_empty());
        assert_eq!(result.unremovable.len(), 1);
        let unremovable = &result.unremovable[0];
        assert_eq!(unremovable.reason, UnremovableReason::BlockedByPod);
        let blocking_pod = unremovable.blocking_pod.as_ref().unwrap();
        assert_eq!(blocking_pod.pod.name_any(), "pod3");
        assert_eq!(
            blocking_pod.reason,
            BlockingPodReason::NotSafeToEvictAnnotation
        );
    }

    #[test]
    fn test_each_candidate_gets_its_own_outcome() {
        let nodes = arc_nodes(&["blocked", "budget", "full", "ok", "dest"]);
        let labels = btreemap! {"app".to_string() => "web".to_string()};
        let pods = vec![
            Arc::new(on_node(bare_pod("bare"), "blocked")),
            Arc::new(on_node(
                with_labels(owned_pod("web", "ReplicaSet", "rs"), labels.clone()),
                "budget",
            )),
            replicated("huge", "full", 5000),
            replicated("small", "ok", 100),
        ];
        let budgets = vec![pdb("default", "web", labels, 0)];
        let hints = Hints::new();
        let checker = BasicPredicateChecker::new();
        let listers = MockListerRegistry::new();
        let options = DrainOptions::default();

        let simulator = RemovalSimulator::new(&checker, &listers, &options);
        let result = simulator.find_nodes_to_remove(
            &request(&nodes[..4], &nodes, &pods, &budgets, &hints),
            &mut UsageTracker::new(),
            &mut StdRng::seed_from_u64(1),
        );

        let outcomes: Vec<(String, UnremovableReason, Option<BlockingPodReason>)> = result
            .unremovable
            .iter()
            .map(|unremovable| {
                (
                    unremovable.node.name_any(),
                    unremovable.reason,
                    unremovable
                        .blocking_pod
                        .as_ref()
                        .map(|blocking_pod| blocking_pod.reason),
                )
            })
            .collect();
        assert_eq!(
            outcomes,
            vec![
                (
                    "blocked".to_string(),
                    UnremovableReason::BlockedByPod,
                    Some(BlockingPodReason::NotReplicated)
                ),
                (
                    "budget".to_string(),
                    UnremovableReason::BlockedByPod,
                    Some(BlockingPodReason::NotEnoughPdb)
                ),
                (
                    "full".to_string(),
                    UnremovableReason::NoPlaceToMovePods,
                    None
                ),
            ]
        );
        assert_eq!(
            names(result.removable.into_iter().map(|removable| removable.node)),
            vec!["ok"]
        );
    }

    #[test]
    fn test_daemon_set_pod_never_checked_against_budget() {
        let nodes = arc_nodes(&["n", "dest"]);
        let labels = btreemap! {"app".to_string() => "agent".to_string()};
        let pods = vec![Arc::new(on_node(
            with_labels(daemon_set_pod("agent", "ds"), labels.clone()),
            "n",
        ))];
        let budgets = vec![pdb("default", "agent", labels, 0)];
        let hints = Hints::new();
        let checker = BasicPredicateChecker::new();
        let listers = MockListerRegistry::new();
        let options = DrainOptions::default();

        let simulator = RemovalSimulator::new(&checker, &listers, &options);
        let result = simulator.find_nodes_to_remove(
            &request(&nodes[..1], &nodes, &pods, &budgets, &hints),
            &mut UsageTracker::new(),
            &mut StdRng::seed_from_u64(1),
        );
        assert_eq!(result.removable.len(), 1);
        assert_eq!(result.removable[0].daemon_set_pods.len(), 1);
    }

    #[test]
    fn test_candidate_missing_from_snapshot() {
        let candidates = arc_nodes(&["ghost"]);
        let destinations = arc_nodes(&["dest"]);
        let hints = Hints::new();
        let checker = BasicPredicateChecker::new();
        let listers = MockListerRegistry::new();
        let options = DrainOptions::default();

        let simulator = RemovalSimulator::new(&checker, &listers, &options);
        let result = simulator.find_nodes_to_remove(
            &request(&candidates, &destinations, &[], &[], &hints),
            &mut UsageTracker::new(),
            &mut StdRng::seed_from_u64(1),
        );
        assert_eq!(result.unremovable.len(), 1);
        assert_eq!(
            result.unremovable[0].reason,
            UnremovableReason::UnexpectedError
        );
    }

    #[test]
    fn test_find_empty_nodes() {
        let candidates = arc_nodes(&["empty", "mirror-only", "daemon-only", "busy", "absent"]);
        let pods = vec![
            Arc::new(on_node(
                annotate(bare_pod("static"), MIRROR_POD_ANNOTATION, "x"),
                "mirror-only",
            )),
            Arc::new(on_node(daemon_set_pod("agent", "ds"), "daemon-only")),
            Arc::new(on_node(bare_pod("bare"), "busy")),
        ];
        let options = DrainOptions::default();

        let empty = find_empty_nodes_to_remove(&candidates, &pods, &options, *NOW);
        assert_eq!(
            names(empty),
            vec!["empty", "mirror-only", "daemon-only", "absent"]
        );
    }
}

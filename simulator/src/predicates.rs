//! Scheduling predicates which decide whether a pod fits onto a node's current state.
use crate::nodeinfo::{NodeInfo, NodeInfoIndex};
use models::constants::{TAINT_EFFECT_NO_EXECUTE, TAINT_EFFECT_NO_SCHEDULE};
use models::pod;
use models::resources::{self, Resources};

use k8s_openapi::api::core::v1::{Node, Pod, Taint, Toleration};
use kube::ResourceExt;
use snafu::{ensure, OptionExt, ResultExt};

#[cfg(test)]
use mockall::automock;

pub type Result<T> = std::result::Result<T, error::PredicateError>;

const TOLERATION_OPERATOR_EXISTS: &str = "Exists";

/// Values about a pod computed once and reused for every node it is checked against.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PredicateMetadata {
    pub requests: Resources,
}

/// Decides whether pods fit on nodes. This is provided as a trait in order to allow mocks to be used
/// for testing purposes.
#[cfg_attr(test, automock)]
pub trait PredicateChecker {
    /// Precomputes the values needed to check `pod` against any node in `node_infos`.
    fn predicate_metadata(&self, pod: &Pod, node_infos: &NodeInfoIndex) -> Result<PredicateMetadata>;

    /// Succeeds if `pod` could be scheduled onto the node described by `node_info`.
    fn check_predicates(
        &self,
        pod: &Pod,
        metadata: &PredicateMetadata,
        node_info: &NodeInfo,
    ) -> Result<()>;
}

/// A predicate checker covering node readiness for scheduling, taints and tolerations, node
/// selectors, pod count and cpu and memory requests.
#[derive(Clone, Debug, Default)]
pub struct BasicPredicateChecker {}

impl BasicPredicateChecker {
    pub fn new() -> Self {
        BasicPredicateChecker {}
    }
}

impl PredicateChecker for BasicPredicateChecker {
    fn predicate_metadata(
        &self,
        pod: &Pod,
        _node_infos: &NodeInfoIndex,
    ) -> Result<PredicateMetadata> {
        let requests = resources::pod_requests(pod).context(error::InvalidResourcesSnafu {
            object: pod::pod_key(pod),
        })?;
        Ok(PredicateMetadata { requests })
    }

    fn check_predicates(
        &self,
        pod: &Pod,
        metadata: &PredicateMetadata,
        node_info: &NodeInfo,
    ) -> Result<()> {
        let node = node_info.node().context(error::MissingNodeSnafu {
            pod: pod::pod_key(pod),
        })?;
        let node_name = node.name_any();

        ensure!(
            !node
                .spec
                .as_ref()
                .and_then(|spec| spec.unschedulable)
                .unwrap_or(false),
            error::UnschedulableSnafu { node: &node_name }
        );
        check_taints(pod, node)?;
        ensure!(
            node_selector_matches(pod, node),
            error::NodeSelectorMismatchSnafu { node: &node_name }
        );
        check_capacity(metadata, node_info, node)
    }
}

fn tolerates(toleration: &Toleration, taint: &Taint) -> bool {
    if let Some(effect) = toleration.effect.as_deref() {
        if !effect.is_empty() && effect != taint.effect {
            return false;
        }
    }
    let key = toleration.key.as_deref().unwrap_or_default();
    if toleration.operator.as_deref() == Some(TOLERATION_OPERATOR_EXISTS) {
        // An empty key with `Exists` tolerates every taint.
        return key.is_empty() || key == taint.key;
    }
    key == taint.key && toleration.value.as_deref().unwrap_or_default()
        == taint.value.as_deref().unwrap_or_default()
}

fn check_taints(pod: &Pod, node: &Node) -> Result<()> {
    let tolerations = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.tolerations.as_deref())
        .unwrap_or_default();
    let taints = node
        .spec
        .as_ref()
        .and_then(|spec| spec.taints.as_deref())
        .unwrap_or_default();
    for taint in taints {
        if taint.effect != TAINT_EFFECT_NO_SCHEDULE && taint.effect != TAINT_EFFECT_NO_EXECUTE {
            continue;
        }
        ensure!(
            tolerations.iter().any(|toleration| tolerates(toleration, taint)),
            error::UntoleratedTaintSnafu {
                node: node.name_any(),
                key: &taint.key,
                effect: &taint.effect,
            }
        );
    }
    Ok(())
}

fn node_selector_matches(pod: &Pod, node: &Node) -> bool {
    let Some(selector) = pod.spec.as_ref().and_then(|spec| spec.node_selector.as_ref()) else {
        return true;
    };
    let labels = node.metadata.labels.as_ref();
    selector
        .iter()
        .all(|(key, value)| labels.and_then(|labels| labels.get(key)) == Some(value))
}

fn check_capacity(metadata: &PredicateMetadata, node_info: &NodeInfo, node: &Node) -> Result<()> {
    let node_name = node.name_any();
    let invalid = || error::InvalidResourcesSnafu {
        object: node_name.clone(),
    };

    if let Some(capacity) = resources::node_pod_capacity(node).with_context(|_| invalid())? {
        ensure!(
            (node_info.pods().len() as i64) < capacity,
            error::TooManyPodsSnafu {
                node: &node_name,
                capacity,
            }
        );
    }

    let allocatable = resources::node_allocatable(node).with_context(|_| invalid())?;
    // A sum past i64::MAX is more than any node can offer.
    let overflow = || error::ResourceOverflowSnafu { node: &node_name };
    let mut requested = metadata.requests;
    for existing in node_info.pods() {
        let existing_requests =
            resources::pod_requests(existing).context(error::InvalidResourcesSnafu {
                object: pod::pod_key(existing),
            })?;
        requested = requested.checked_add(existing_requests).with_context(overflow)?;
    }
    ensure!(
        requested.milli_cpu <= allocatable.milli_cpu,
        error::InsufficientResourceSnafu {
            node: &node_name,
            resource: "cpu",
            requested: requested.milli_cpu,
            allocatable: allocatable.milli_cpu,
        }
    );
    ensure!(
        requested.memory <= allocatable.memory,
        error::InsufficientResourceSnafu {
            node: &node_name,
            resource: "memory",
            requested: requested.memory,
            allocatable: allocatable.memory,
        }
    );
    Ok(())
}

pub mod error {
    use models::resources;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum PredicateError {
        #[snafu(display("Node for pod '{}' is not known", pod))]
        MissingNode { pod: String },

        #[snafu(display("Node '{}' is marked unschedulable", node))]
        Unschedulable { node: String },

        #[snafu(display("Taint '{}:{}' on node '{}' is not tolerated", key, effect, node))]
        UntoleratedTaint {
            node: String,
            key: String,
            effect: String,
        },

        #[snafu(display("Node '{}' does not match the pod's node selector", node))]
        NodeSelectorMismatch { node: String },

        #[snafu(display("Node '{}' already runs its maximum of {} pods", node, capacity))]
        TooManyPods { node: String, capacity: i64 },

        #[snafu(display(
            "Insufficient {} on node '{}': {} requested, {} allocatable",
            resource,
            node,
            requested,
            allocatable
        ))]
        InsufficientResource {
            node: String,
            resource: String,
            requested: i64,
            allocatable: i64,
        },

        #[snafu(display("Requests on node '{}' exceed any representable amount", node))]
        ResourceOverflow { node: String },

        #[snafu(display("Unable to read resources of '{}': '{}'", object, source))]
        InvalidResources {
            object: String,
            source: resources::error::Error,
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::{bare_pod, node, with_requests};
    use k8s_openapi::api::core::v1::NodeSpec;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use maplit::btreemap;
    use std::sync::Arc;

    const GIB: i64 = 1024 * 1024 * 1024;

    fn check(pod: &Pod, info: &NodeInfo) -> Result<()> {
        let checker = BasicPredicateChecker::new();
        let metadata = checker
            .predicate_metadata(pod, &NodeInfoIndex::default())
            .unwrap();
        checker.check_predicates(pod, &metadata, info)
    }

    fn info(node: Node) -> NodeInfo {
        NodeInfo::new(Arc::new(node))
    }

    fn tainted(key: &str, effect: &str) -> Node {
        let mut tainted = node("n1", 4000, 8 * GIB);
        tainted.spec = Some(NodeSpec {
            taints: Some(vec![Taint {
                key: key.to_string(),
                value: Some("true".to_string()),
                effect: effect.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        tainted
    }

    #[test]
    fn test_fits_until_resources_run_out() {
        let pod = with_requests(bare_pod("p"), 1500, GIB);
        let mut state = info(node("n1", 4000, 8 * GIB));
        state = state.with_pod(Arc::new(pod.clone()));
        assert!(check(&pod, &state).is_ok());
        state = state.with_pod(Arc::new(pod.clone()));
        let err = check(&pod, &state).unwrap_err();
        assert!(matches!(
            err,
            error::PredicateError::InsufficientResource { ref resource, requested: 4500, .. }
                if resource == "cpu"
        ));
    }

    #[test]
    fn test_memory_exhausted() {
        let pod = with_requests(bare_pod("p"), 100, 6 * GIB);
        let state = info(node("n1", 4000, 8 * GIB)).with_pod(Arc::new(pod.clone()));
        assert!(matches!(
            check(&pod, &state).unwrap_err(),
            error::PredicateError::InsufficientResource { ref resource, .. } if resource == "memory"
        ));
    }

    #[test]
    fn test_pod_count_limit() {
        let mut small = node("n1", 4000, 8 * GIB);
        small
            .status
            .as_mut()
            .unwrap()
            .allocatable
            .as_mut()
            .unwrap()
            .insert("pods".to_string(), Quantity("1".to_string()));
        let pod = bare_pod("p");
        let state = info(small);
        assert!(check(&pod, &state).is_ok());
        assert!(matches!(
            check(&pod, &state.with_pod(Arc::new(bare_pod("q")))).unwrap_err(),
            error::PredicateError::TooManyPods { capacity: 1, .. }
        ));
    }

    #[test]
    fn test_huge_requests_do_not_wrap() {
        const HUGE: i64 = 5_000_000_000_000_000_000;
        let pod = with_requests(bare_pod("p"), 100, HUGE);
        let state = info(node("n1", 4000, i64::MAX)).with_pod(Arc::new(pod.clone()));
        assert!(matches!(
            check(&pod, &state).unwrap_err(),
            error::PredicateError::ResourceOverflow { .. }
        ));
        // A single pod of the same size still fits on the empty node.
        assert!(check(&pod, &info(node("n1", 4000, i64::MAX))).is_ok());
    }

    #[test]
    fn test_unschedulable_node() {
        let mut cordoned = node("n1", 4000, 8 * GIB);
        cordoned.spec = Some(NodeSpec {
            unschedulable: Some(true),
            ..Default::default()
        });
        assert!(matches!(
            check(&bare_pod("p"), &info(cordoned)).unwrap_err(),
            error::PredicateError::Unschedulable { .. }
        ));
    }

    #[test]
    fn test_missing_node() {
        assert!(matches!(
            check(&bare_pod("p"), &NodeInfo::default()).unwrap_err(),
            error::PredicateError::MissingNode { .. }
        ));
    }

    #[test]
    fn test_taints_and_tolerations() {
        let untolerated = check(&bare_pod("p"), &info(tainted("dedicated", "NoSchedule")));
        assert!(matches!(
            untolerated.unwrap_err(),
            error::PredicateError::UntoleratedTaint { .. }
        ));

        // Soft taints never stop scheduling.
        assert!(check(&bare_pod("p"), &info(tainted("dedicated", "PreferNoSchedule"))).is_ok());

        let test_cases = vec![
            (Some("dedicated"), Some("Equal"), Some("true"), None, true),
            (Some("dedicated"), None, Some("true"), Some("NoSchedule"), true),
            (Some("dedicated"), Some("Equal"), Some("false"), None, false),
            (Some("dedicated"), Some("Exists"), None, None, true),
            (None, Some("Exists"), None, None, true),
            (Some("other"), Some("Exists"), None, None, false),
            (Some("dedicated"), Some("Exists"), None, Some("NoExecute"), false),
        ];
        for (key, operator, value, effect, expected) in test_cases {
            let mut pod = bare_pod("p");
            pod.spec.as_mut().unwrap().tolerations = Some(vec![Toleration {
                key: key.map(String::from),
                operator: operator.map(String::from),
                value: value.map(String::from),
                effect: effect.map(String::from),
                ..Default::default()
            }]);
            assert_eq!(
                check(&pod, &info(tainted("dedicated", "NoSchedule"))).is_ok(),
                expected,
                "toleration {:?} {:?} {:?} {:?}",
                key,
                operator,
                value,
                effect
            );
        }
    }

    #[test]
    fn test_node_selector() {
        let mut labeled = node("n1", 4000, 8 * GIB);
        labeled.metadata.labels = Some(btreemap! {"zone".to_string() => "a".to_string()});
        let mut pod = bare_pod("p");
        pod.spec.as_mut().unwrap().node_selector =
            Some(btreemap! {"zone".to_string() => "a".to_string()});
        assert!(check(&pod, &info(labeled.clone())).is_ok());

        pod.spec.as_mut().unwrap().node_selector =
            Some(btreemap! {"zone".to_string() => "b".to_string()});
        assert!(matches!(
            check(&pod, &info(labeled)).unwrap_err(),
            error::PredicateError::NodeSelectorMismatch { .. }
        ));
    }
}

//! The serializable summary of one simulation pass.
use crate::placement::Hints;
use crate::removal::{RemovalResult, UnremovableNode};
use crate::utilization::UtilizationInfo;
use models::pod;
use models::reasons::{BlockingPodReason, UnremovableReason};

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;
use serde::Serialize;

use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// Nodes with nothing to move.
    pub empty_nodes: Vec<String>,
    pub removable: Vec<RemovableNodeReport>,
    pub unremovable: Vec<UnremovableNodeReport>,
    pub hints: Hints,
    /// Utilization of each candidate, when it could be computed.
    pub utilization: BTreeMap<String, UtilizationInfo>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovableNodeReport {
    pub node: String,
    pub pods_to_reschedule: Vec<String>,
    pub daemon_set_pods: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnremovableNodeReport {
    pub node: String,
    pub reason: UnremovableReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_pod: Option<BlockingPodReport>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BlockingPodReport {
    pub pod: String,
    pub reason: BlockingPodReason,
}

fn pod_keys(pods: &[Arc<Pod>]) -> Vec<String> {
    pods.iter().map(|pod| pod::pod_key(pod)).collect()
}

impl From<&UnremovableNode> for UnremovableNodeReport {
    fn from(unremovable: &UnremovableNode) -> Self {
        UnremovableNodeReport {
            node: unremovable.node.name_any(),
            reason: unremovable.reason,
            blocking_pod: unremovable
                .blocking_pod
                .as_ref()
                .map(|blocking_pod| BlockingPodReport {
                    pod: pod::pod_key(&blocking_pod.pod),
                    reason: blocking_pod.reason,
                }),
        }
    }
}

impl Report {
    pub fn new(
        empty_nodes: &[Arc<Node>],
        result: &RemovalResult,
        utilization: BTreeMap<String, UtilizationInfo>,
    ) -> Self {
        Report {
            empty_nodes: empty_nodes.iter().map(|node| node.name_any()).collect(),
            removable: result
                .removable
                .iter()
                .map(|removable| RemovableNodeReport {
                    node: removable.node.name_any(),
                    pods_to_reschedule: pod_keys(&removable.pods_to_reschedule),
                    daemon_set_pods: pod_keys(&removable.daemon_set_pods),
                })
                .collect(),
            unremovable: result.unremovable.iter().map(Into::into).collect(),
            hints: result.hints.clone(),
            utilization,
        }
    }
}

//! How much of a node's allocatable resources its pods request.
use crate::nodeinfo::NodeInfo;
use models::pod;
use models::resources::{self, Resources};

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;
use serde::Serialize;
use snafu::{ensure, ResultExt};

pub type Result<T> = std::result::Result<T, error::Error>;

/// Requested fractions of a node's allocatable cpu and memory.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UtilizationInfo {
    pub cpu: f64,
    pub memory: f64,
    /// The larger of the two.
    pub utilization: f64,
}

fn counts_towards_utilization(pod: &Pod, skip_daemonset_pods: bool, skip_mirror_pods: bool) -> bool {
    !(skip_daemonset_pods && pod::is_daemonset_pod(pod))
        && !(skip_mirror_pods && pod::is_mirror_pod(pod))
}

/// Computes the node's utilization from the requests of the pods in `node_info`.
pub fn calculate_utilization(
    node: &Node,
    node_info: &NodeInfo,
    skip_daemonset_pods: bool,
    skip_mirror_pods: bool,
) -> Result<UtilizationInfo> {
    let node_name = node.name_any();
    let allocatable =
        resources::node_allocatable(node).context(error::InvalidResourcesSnafu {
            object: &node_name,
        })?;
    ensure!(
        allocatable.milli_cpu > 0,
        error::ZeroAllocatableSnafu {
            node: &node_name,
            resource: "cpu",
        }
    );
    ensure!(
        allocatable.memory > 0,
        error::ZeroAllocatableSnafu {
            node: &node_name,
            resource: "memory",
        }
    );

    let mut requested = Resources::default();
    for pod in node_info
        .pods()
        .iter()
        .filter(|pod| counts_towards_utilization(pod, skip_daemonset_pods, skip_mirror_pods))
    {
        requested += resources::pod_requests(pod).context(error::InvalidResourcesSnafu {
            object: pod::pod_key(pod),
        })?;
    }

    let cpu = requested.milli_cpu as f64 / allocatable.milli_cpu as f64;
    let memory = requested.memory as f64 / allocatable.memory as f64;
    Ok(UtilizationInfo {
        cpu,
        memory,
        utilization: cpu.max(memory),
    })
}

pub mod error {
    use models::resources;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum Error {
        #[snafu(display("Allocatable {} of node '{}' is 0", resource, node))]
        ZeroAllocatable { node: String, resource: String },

        #[snafu(display("Unable to read resources of '{}': '{}'", object, source))]
        InvalidResources {
            object: String,
            source: resources::error::Error,
        },
    }
}

//! Per-node views of which pods are running where, used as the scheduling state during simulation.
//!
//! `NodeInfo` values are immutable and shared through `Arc`. Simulating a placement produces a new
//! `NodeInfo` which replaces the old one in a cloned index, so the index handed to a simulation is
//! never modified by it.
use models::pod;

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;

use std::collections::HashMap;
use std::sync::Arc;

/// A node together with the pods bound to it.
///
/// The node is absent when pods reference a node name which is not part of the known node list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeInfo {
    node: Option<Arc<Node>>,
    pods: Vec<Arc<Pod>>,
}

impl NodeInfo {
    pub fn new(node: Arc<Node>) -> Self {
        NodeInfo {
            node: Some(node),
            pods: Vec::new(),
        }
    }

    pub fn node(&self) -> Option<&Arc<Node>> {
        self.node.as_ref()
    }

    pub fn pods(&self) -> &[Arc<Pod>] {
        &self.pods
    }

    /// Returns a copy of this view with one more pod on the node.
    pub fn with_pod(&self, pod: Arc<Pod>) -> NodeInfo {
        let mut pods = self.pods.clone();
        pods.push(pod);
        NodeInfo {
            node: self.node.clone(),
            pods,
        }
    }
}

/// Node views keyed by node name.
///
/// Cloning the index is shallow: the clone shares every `NodeInfo` with the original.
#[derive(Clone, Debug, Default)]
pub struct NodeInfoIndex {
    infos: HashMap<String, Arc<NodeInfo>>,
}

impl NodeInfoIndex {
    /// Groups pods by the node they are bound to. Pods without a node are left out.
    pub fn build(pods: &[Arc<Pod>], nodes: &[Arc<Node>]) -> Self {
        let mut infos: HashMap<String, NodeInfo> = nodes
            .iter()
            .map(|node| (node.name_any(), NodeInfo::new(Arc::clone(node))))
            .collect();
        for pod in pods {
            if let Some(node_name) = pod::node_name(pod) {
                infos
                    .entry(node_name.to_string())
                    .or_default()
                    .pods
                    .push(Arc::clone(pod));
            }
        }
        NodeInfoIndex {
            infos: infos
                .into_iter()
                .map(|(name, info)| (name, Arc::new(info)))
                .collect(),
        }
    }

    pub fn get(&self, node_name: &str) -> Option<&Arc<NodeInfo>> {
        self.infos.get(node_name)
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<NodeInfo>)> {
        self.infos.iter()
    }

    /// Swaps in a new view for a node. Only this index is affected, never its clones.
    pub(crate) fn replace(&mut self, node_name: &str, info: NodeInfo) {
        self.infos.insert(node_name.to_string(), Arc::new(info));
    }
}

//! Builders for the cluster objects used throughout the unit tests.
use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::apps::v1::{ReplicaSet, ReplicaSetSpec};
use k8s_openapi::api::core::v1::{
    Container, Node, NodeSpec, NodeStatus, Pod, PodSpec, ResourceRequirements,
};
use k8s_openapi::api::policy::v1::{
    PodDisruptionBudget, PodDisruptionBudgetSpec, PodDisruptionBudgetStatus,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use lazy_static::lazy_static;
use maplit::btreemap;

use std::collections::BTreeMap;

lazy_static! {
    pub static ref NOW: DateTime<Utc> = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
}

pub fn bare_pod(name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec::default()),
        status: None,
    }
}

/// A pod whose controller is `kind/owner`.
pub fn owned_pod(name: &str, kind: &str, owner: &str) -> Pod {
    let mut pod = bare_pod(name);
    pod.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: kind.to_string(),
        name: owner.to_string(),
        uid: format!("{}-uid", owner),
        controller: Some(true),
        ..Default::default()
    }]);
    pod
}

pub fn daemon_set_pod(name: &str, owner: &str) -> Pod {
    owned_pod(name, "DaemonSet", owner)
}

pub fn annotate(mut pod: Pod, key: &str, value: &str) -> Pod {
    pod.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
    pod
}

pub fn with_namespace(mut pod: Pod, namespace: &str) -> Pod {
    pod.metadata.namespace = Some(namespace.to_string());
    pod
}

pub fn with_labels(mut pod: Pod, labels: BTreeMap<String, String>) -> Pod {
    pod.metadata.labels = Some(labels);
    pod
}

/// Binds the pod to a node.
pub fn on_node(mut pod: Pod, node: &str) -> Pod {
    pod.spec.get_or_insert_with(PodSpec::default).node_name = Some(node.to_string());
    pod
}

/// Gives the pod a single container requesting the given millicores and bytes.
pub fn with_requests(mut pod: Pod, milli_cpu: i64, memory: i64) -> Pod {
    pod.spec.get_or_insert_with(PodSpec::default).containers = vec![Container {
        name: "main".to_string(),
        resources: Some(ResourceRequirements {
            requests: Some(btreemap! {
                "cpu".to_string() => Quantity(format!("{}m", milli_cpu)),
                "memory".to_string() => Quantity(memory.to_string()),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }];
    pod
}

pub fn node(name: &str, milli_cpu: i64, memory: i64) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(NodeSpec::default()),
        status: Some(NodeStatus {
            allocatable: Some(btreemap! {
                "cpu".to_string() => Quantity(format!("{}m", milli_cpu)),
                "memory".to_string() => Quantity(memory.to_string()),
                "pods".to_string() => Quantity("110".to_string()),
            }),
            ..Default::default()
        }),
    }
}

pub fn replica_set(namespace: &str, name: &str, replicas: i32) -> ReplicaSet {
    ReplicaSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ReplicaSetSpec {
            replicas: Some(replicas),
            ..Default::default()
        }),
        status: None,
    }
}

/// A disruption budget selecting pods by `match_labels`, currently allowing `disruptions_allowed`.
pub fn pdb(
    namespace: &str,
    name: &str,
    match_labels: BTreeMap<String, String>,
    disruptions_allowed: i32,
) -> PodDisruptionBudget {
    PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            selector: Some(LabelSelector {
                match_labels: Some(match_labels),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: Some(PodDisruptionBudgetStatus {
            disruptions_allowed,
            ..Default::default()
        }),
    }
}

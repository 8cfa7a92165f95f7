//! Read-only queries over `Pod` objects used when deciding whether a pod can be moved.
use crate::constants::{
    DAEMONSET_POD_ANNOTATION, DEFAULT_DELETION_GRACE_PERIOD_SECONDS, DEFAULT_NAMESPACE,
    KIND_DAEMON_SET, MIRROR_POD_ANNOTATION, PHASE_FAILED, PHASE_SUCCEEDED,
    RESTART_POLICY_NEVER, RESTART_POLICY_ON_FAILURE, SAFE_TO_EVICT_ANNOTATION,
    TPU_RESOURCE_PREFIX,
};

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::{Pod, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

/// Returns the pod's namespace, falling back to the default namespace.
pub fn namespace(pod: &Pod) -> &str {
    pod.metadata
        .namespace
        .as_deref()
        .unwrap_or(DEFAULT_NAMESPACE)
}

pub fn name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or_default()
}

/// The key under which placement hints for this pod are stored: `namespace/name`.
pub fn pod_key(pod: &Pod) -> String {
    format!("{}/{}", namespace(pod), name(pod))
}

/// The name of the node this pod is bound to, if any.
pub fn node_name(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.node_name.as_deref())
        .filter(|node_name| !node_name.is_empty())
}

pub fn phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|status| status.phase.as_deref())
}

fn annotation<'a>(pod: &'a Pod, key: &str) -> Option<&'a str> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .map(String::as_str)
}

/// Returns the owner reference marked as the managing controller.
pub fn controller_ref(pod: &Pod) -> Option<&OwnerReference> {
    pod.metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|reference| reference.controller == Some(true))
}

/// Mirror pods are created by the kubelet from static manifests and cannot be moved.
pub fn is_mirror_pod(pod: &Pod) -> bool {
    annotation(pod, MIRROR_POD_ANNOTATION).is_some()
}

/// A pod belongs to a DaemonSet if its controller is a DaemonSet, or if it is explicitly annotated
/// as behaving like one.
pub fn is_daemonset_pod(pod: &Pod) -> bool {
    if controller_ref(pod).map_or(false, |reference| reference.kind == KIND_DAEMON_SET) {
        return true;
    }
    annotation(pod, DAEMONSET_POD_ANNOTATION) == Some("true")
}

/// The tri-state value of the safe-to-evict annotation: `Some(true)`, `Some(false)`, or `None`
/// when the annotation is missing or holds anything else.
pub fn safe_to_evict(pod: &Pod) -> Option<bool> {
    match annotation(pod, SAFE_TO_EVICT_ANNOTATION) {
        Some("true") => Some(true),
        Some("false") => Some(false),
        _ => None,
    }
}

/// Whether the pod will never run again, based on its restart policy and phase.
pub fn is_terminal(pod: &Pod) -> bool {
    let restart_policy = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.restart_policy.as_deref());
    match (restart_policy, phase(pod)) {
        (Some(RESTART_POLICY_NEVER), Some(PHASE_SUCCEEDED | PHASE_FAILED)) => true,
        (Some(RESTART_POLICY_ON_FAILURE), Some(PHASE_SUCCEEDED)) => true,
        // The kubelet rejected this pod, due to eviction or some other constraint.
        (_, Some(PHASE_FAILED)) => true,
        _ => false,
    }
}

/// A pod which has been terminating well past its grace period is treated as already gone.
/// A deadline too far out to represent is never reached.
pub fn is_long_terminating(pod: &Pod, now: DateTime<Utc>, extra_threshold: Duration) -> bool {
    let Some(deletion_timestamp) = pod.metadata.deletion_timestamp.as_ref() else {
        return false;
    };
    let grace_period = pod
        .metadata
        .deletion_grace_period_seconds
        .unwrap_or(DEFAULT_DELETION_GRACE_PERIOD_SECONDS);
    Duration::try_seconds(grace_period)
        .and_then(|grace_period| deletion_timestamp.0.checked_add_signed(grace_period))
        .and_then(|deadline| deadline.checked_add_signed(extra_threshold))
        .map_or(false, |deadline| now > deadline)
}

/// Whether any of the pod's volumes live on the node itself.
pub fn has_local_storage(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_ref())
        .map_or(false, |volumes| {
            volumes
                .iter()
                .any(|volume| volume.host_path.is_some() || volume.empty_dir.is_some())
        })
}

/// Returns a copy of the pod prepared for placement simulation: unbound from its current node,
/// and with accelerator requests removed since those are handled outside the simulation.
pub fn detached_copy(pod: &Pod) -> Pod {
    let mut pod = pod.clone();
    if let Some(spec) = pod.spec.as_mut() {
        spec.node_name = None;
        let containers = spec
            .containers
            .iter_mut()
            .chain(spec.init_containers.iter_mut().flatten());
        for container in containers {
            if let Some(resources) = container.resources.as_mut() {
                strip_tpu_resources(resources);
            }
        }
    }
    pod
}

fn strip_tpu_resources(resources: &mut ResourceRequirements) {
    for list in [resources.requests.as_mut(), resources.limits.as_mut()]
        .into_iter()
        .flatten()
    {
        list.retain(|name, _| !name.starts_with(TPU_RESOURCE_PREFIX));
    }
}

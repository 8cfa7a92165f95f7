//! Confirms that a pod's owning controller still exists and would recreate the pod elsewhere.
use super::error::{self, Result};
use crate::listers::{self, ControllerKind, ListerRegistry};
use models::constants::KIND_DAEMON_SET;
use models::pod;

use k8s_openapi::api::core::v1::Pod;
use lazy_static::lazy_static;
use maplit::hashmap;

use std::collections::HashMap;

/// What the controller check learned about a pod.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ControllerCheck {
    /// The pod is run by a DaemonSet, so it is never moved.
    pub daemon_set: bool,
    /// A controller would recreate the pod on another node.
    pub replicated: bool,
}

/// The controller a pod points at, plus the context needed to validate it.
struct ControllerTarget<'a> {
    pod_key: String,
    namespace: &'a str,
    name: &'a str,
    min_replicas: i32,
}

type ValidateFn = fn(&dyn ListerRegistry, &ControllerTarget<'_>) -> Result<ControllerCheck>;

lazy_static! {
    static ref VALIDATORS: HashMap<ControllerKind, ValidateFn> = hashmap! {
        ControllerKind::ReplicationController => validate_replication_controller as ValidateFn,
        ControllerKind::ReplicaSet => validate_replica_set as ValidateFn,
        ControllerKind::Job => validate_job as ValidateFn,
        ControllerKind::DaemonSet => validate_daemon_set as ValidateFn,
        ControllerKind::StatefulSet => validate_stateful_set as ValidateFn,
    };
}

/// Checks the pod's controller reference.
///
/// Without listers, every recognized controller is assumed to exist. Pods without a controller, or
/// with a controller kind we don't know how to look up, are never considered replicated.
pub fn validate_controller(
    pod: &Pod,
    listers: Option<&dyn ListerRegistry>,
    min_replicas: i32,
) -> Result<ControllerCheck> {
    let reference = pod::controller_ref(pod);
    let kind = reference.map_or(ControllerKind::Unknown, |reference| {
        ControllerKind::from_owner_kind(&reference.kind)
    });
    let daemon_set = pod::is_daemonset_pod(pod);

    let (Some(listers), Some(reference)) = (listers, reference) else {
        return Ok(ControllerCheck {
            daemon_set,
            replicated: !daemon_set && kind != ControllerKind::Unknown,
        });
    };

    // Pods annotated as DaemonSet pods have no DaemonSet we could look up.
    if daemon_set && reference.kind != KIND_DAEMON_SET {
        return Ok(ControllerCheck {
            daemon_set,
            replicated: false,
        });
    }

    match VALIDATORS.get(&kind) {
        Some(validate) => validate(
            listers,
            &ControllerTarget {
                pod_key: pod::pod_key(pod),
                // Controllers must live in the same namespace as their pods.
                namespace: pod::namespace(pod),
                name: &reference.name,
                min_replicas,
            },
        ),
        None => Ok(ControllerCheck::default()),
    }
}

/// Converts a lister failure into the error for this pod, keeping not-found distinct.
fn lookup_error(
    source: listers::error::ListerError,
    kind: ControllerKind,
    target: &ControllerTarget<'_>,
) -> error::Error {
    if source.is_not_found() {
        error::Error::ControllerNotFound {
            kind,
            pod: target.pod_key.clone(),
            source,
        }
    } else {
        error::Error::ControllerLookup {
            kind,
            pod: target.pod_key.clone(),
            source,
        }
    }
}

fn check_min_replicas(
    kind: ControllerKind,
    replicas: Option<i32>,
    target: &ControllerTarget<'_>,
) -> Result<ControllerCheck> {
    match replicas {
        Some(replicas) if replicas < target.min_replicas => error::MinReplicasReachedSnafu {
            kind,
            pod: target.pod_key.clone(),
            replicas,
            min_replicas: target.min_replicas,
        }
        .fail(),
        _ => Ok(ControllerCheck {
            daemon_set: false,
            replicated: true,
        }),
    }
}

fn validate_replication_controller(
    listers: &dyn ListerRegistry,
    target: &ControllerTarget<'_>,
) -> Result<ControllerCheck> {
    let kind = ControllerKind::ReplicationController;
    let controller = listers
        .replication_controller(target.namespace, target.name)
        .map_err(|source| lookup_error(source, kind, target))?;
    let replicas = controller.spec.as_ref().and_then(|spec| spec.replicas);
    check_min_replicas(kind, replicas, target)
}

fn validate_replica_set(
    listers: &dyn ListerRegistry,
    target: &ControllerTarget<'_>,
) -> Result<ControllerCheck> {
    let kind = ControllerKind::ReplicaSet;
    let controller = listers
        .replica_set(target.namespace, target.name)
        .map_err(|source| lookup_error(source, kind, target))?;
    let replicas = controller.spec.as_ref().and_then(|spec| spec.replicas);
    check_min_replicas(kind, replicas, target)
}

// Jobs and StatefulSets are not scaled elastically, so no replica floor applies to them.

fn validate_job(
    listers: &dyn ListerRegistry,
    target: &ControllerTarget<'_>,
) -> Result<ControllerCheck> {
    listers
        .job(target.namespace, target.name)
        .map_err(|source| lookup_error(source, ControllerKind::Job, target))?;
    Ok(ControllerCheck {
        daemon_set: false,
        replicated: true,
    })
}

fn validate_stateful_set(
    listers: &dyn ListerRegistry,
    target: &ControllerTarget<'_>,
) -> Result<ControllerCheck> {
    listers
        .stateful_set(target.namespace, target.name)
        .map_err(|source| lookup_error(source, ControllerKind::StatefulSet, target))?;
    Ok(ControllerCheck {
        daemon_set: false,
        replicated: true,
    })
}

fn validate_daemon_set(
    listers: &dyn ListerRegistry,
    target: &ControllerTarget<'_>,
) -> Result<ControllerCheck> {
    listers
        .daemon_set(target.namespace, target.name)
        .map_err(|source| lookup_error(source, ControllerKind::DaemonSet, target))?;
    Ok(ControllerCheck {
        daemon_set: true,
        replicated: false,
    })
}

//! Decides, pod by pod, what a drain of a node would do with each pod: leave it alone, move it, or
//! refuse to drain the node at all.
//!
//! The first pod which blocks the drain stops the scan; one blocker is enough to keep the node.
mod controller;
pub mod error;

pub use self::controller::{validate_controller, ControllerCheck};
use self::error::Error;

use crate::config::DrainOptions;
use crate::listers::ListerRegistry;
use crate::pdb;
use models::constants::KUBE_SYSTEM_NAMESPACE;
use models::pod;
use models::reasons::BlockingPodReason;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::ResourceExt;
use tracing::{event, instrument, Level};

use std::sync::Arc;

/// A pod which prevents its node from being drained, and why.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockingPod {
    pub pod: Arc<Pod>,
    pub reason: BlockingPodReason,
}

/// Why a pod is ignored by the drain.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SkipReason {
    /// Static pods are bound to their node.
    MirrorPod,
    /// The pod has been terminating for long enough that it is effectively gone.
    LongTerminating,
    /// The pod will never run again.
    Terminal,
}

/// What a drain would do with a single pod.
#[derive(Debug)]
pub enum PodDisposition {
    Skipped(SkipReason),
    /// DaemonSet pods stay where they are and don't block the drain.
    DaemonSet,
    Movable,
    Blocked(Error),
}

/// The pods a drain would move, and the DaemonSet pods it would leave behind.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PodsForDeletion {
    pub movable: Vec<Arc<Pod>>,
    pub daemon_set_pods: Vec<Arc<Pod>>,
}

/// A drain that cannot proceed. `processed` holds what was decided for the pods before the blocker.
#[derive(Debug)]
pub struct DrainBlocked {
    pub blocking_pod: BlockingPod,
    pub processed: PodsForDeletion,
    pub cause: Error,
}

/// Classifies pods for a drain.
pub struct DrainChecker<'a> {
    options: &'a DrainOptions,
    pod_disruption_budgets: &'a [PodDisruptionBudget],
    listers: Option<&'a dyn ListerRegistry>,
    delete_all: bool,
    now: DateTime<Utc>,
}

impl<'a> DrainChecker<'a> {
    /// Creates a checker which trusts controller references without looking them up.
    pub fn new(
        options: &'a DrainOptions,
        pod_disruption_budgets: &'a [PodDisruptionBudget],
        now: DateTime<Utc>,
    ) -> Self {
        DrainChecker {
            options,
            pod_disruption_budgets,
            listers: None,
            delete_all: false,
            now,
        }
    }

    /// Verifies controller references against the given listers.
    pub fn with_listers(mut self, listers: &'a dyn ListerRegistry) -> Self {
        self.listers = Some(listers);
        self
    }

    /// Moves every pod which isn't skipped or DaemonSet-owned, ignoring all blocking rules.
    pub fn delete_all(mut self) -> Self {
        self.delete_all = true;
        self
    }

    /// Determines what a drain would do with this pod.
    pub fn disposition(&self, pod: &Pod) -> PodDisposition {
        if pod::is_mirror_pod(pod) {
            return PodDisposition::Skipped(SkipReason::MirrorPod);
        }
        if pod::is_long_terminating(
            pod,
            self.now,
            self.options.pod_long_terminating_extra_threshold,
        ) {
            return PodDisposition::Skipped(SkipReason::LongTerminating);
        }
        if pod::is_terminal(pod) {
            return PodDisposition::Skipped(SkipReason::Terminal);
        }

        let check = match validate_controller(pod, self.listers, self.options.min_replica_count) {
            Ok(check) => check,
            Err(err) => return PodDisposition::Blocked(err),
        };
        if check.daemon_set {
            return PodDisposition::DaemonSet;
        }

        if self.delete_all || pod::safe_to_evict(pod) == Some(true) {
            return PodDisposition::Movable;
        }

        match self.blocking_rule(pod, check) {
            Some(err) => PodDisposition::Blocked(err),
            None => PodDisposition::Movable,
        }
    }

    /// Applies the blocking rules in order, returning the first one the pod violates.
    fn blocking_rule(&self, pod: &Pod, check: ControllerCheck) -> Option<Error> {
        let pod_key = pod::pod_key(pod);
        if !check.replicated {
            return Some(Error::NotReplicated { pod: pod_key });
        }
        if self.options.skip_nodes_with_system_pods && pod::namespace(pod) == KUBE_SYSTEM_NAMESPACE
        {
            match self.covered_by_budget(pod) {
                Ok(true) => {}
                Ok(false) => return Some(Error::UnmovableKubeSystemPod { pod: pod_key }),
                Err(err) => return Some(err),
            }
        }
        if self.options.skip_nodes_with_local_storage && pod::has_local_storage(pod) {
            return Some(Error::LocalStorageRequested { pod: pod_key });
        }
        if pod::safe_to_evict(pod) == Some(false) {
            return Some(Error::NotSafeToEvict { pod: pod_key });
        }
        None
    }

    fn covered_by_budget(&self, pod: &Pod) -> error::Result<bool> {
        for budget in self.pod_disruption_budgets {
            let covered = pdb::covers_pod(budget, pod).map_err(|source| Error::PdbSelector {
                pod: pod::pod_key(pod),
                pdb: budget.name_any(),
                source,
            })?;
            if covered {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Classifies every pod in order, stopping at the first one which blocks the drain.
    #[instrument(skip(self, pods), fields(pods = pods.len(), delete_all = self.delete_all))]
    pub fn pods_for_deletion(
        &self,
        pods: &[Arc<Pod>],
    ) -> std::result::Result<PodsForDeletion, DrainBlocked> {
        let mut result = PodsForDeletion::default();
        for pod in pods {
            match self.disposition(pod) {
                PodDisposition::Skipped(reason) => {
                    event!(
                        Level::TRACE,
                        pod = %pod::pod_key(pod),
                        ?reason,
                        "Pod is ignored by the drain."
                    );
                }
                PodDisposition::DaemonSet => result.daemon_set_pods.push(Arc::clone(pod)),
                PodDisposition::Movable => result.movable.push(Arc::clone(pod)),
                PodDisposition::Blocked(cause) => {
                    event!(
                        Level::DEBUG,
                        pod = %pod::pod_key(pod),
                        %cause,
                        "Pod blocks the drain."
                    );
                    return Err(DrainBlocked {
                        blocking_pod: BlockingPod {
                            pod: Arc::clone(pod),
                            reason: cause.blocking_reason(),
                        },
                        processed: result,
                        cause,
                    });
                }
            }
        }
        Ok(result)
    }
}

/// Helper macro to avoid retyping the annotation domain used by the cluster autoscaler. When given
/// no parameters, this returns the bare domain. When given a string literal parameter it adds
/// `/parameter` to the end.
#[macro_export]
macro_rules! autoscaler_domain {
    () => {
        "cluster-autoscaler.kubernetes.io"
    };
    ($s:literal) => {
        concat!(autoscaler_domain!(), "/", $s)
    };
}

// Annotation keys
pub const SAFE_TO_EVICT_ANNOTATION: &str = autoscaler_domain!("safe-to-evict");
pub const DAEMONSET_POD_ANNOTATION: &str = autoscaler_domain!("daemonset-pod");
pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

// Namespaces
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";
pub const DEFAULT_NAMESPACE: &str = "default";

// Controller kinds, as they appear in owner references.
pub const KIND_REPLICATION_CONTROLLER: &str = "ReplicationController";
pub const KIND_REPLICA_SET: &str = "ReplicaSet";
pub const KIND_JOB: &str = "Job";
pub const KIND_DAEMON_SET: &str = "DaemonSet";
pub const KIND_STATEFUL_SET: &str = "StatefulSet";

// Pod lifecycle values
pub const PHASE_SUCCEEDED: &str = "Succeeded";
pub const PHASE_FAILED: &str = "Failed";
pub const RESTART_POLICY_NEVER: &str = "Never";
pub const RESTART_POLICY_ON_FAILURE: &str = "OnFailure";

/// Grace period assumed for a deleted pod which does not declare one.
pub const DEFAULT_DELETION_GRACE_PERIOD_SECONDS: i64 = 30;
/// Time past its grace period after which a terminating pod is considered gone.
pub const POD_LONG_TERMINATING_EXTRA_THRESHOLD_SECONDS: u64 = 30;

// Resource names
pub const RESOURCE_CPU: &str = "cpu";
pub const RESOURCE_MEMORY: &str = "memory";
pub const RESOURCE_PODS: &str = "pods";
/// Accelerator requests with this prefix are stripped before simulating placement.
pub const TPU_RESOURCE_PREFIX: &str = "cloud-tpus.google.com/";

// Taint effects which prevent scheduling.
pub const TAINT_EFFECT_NO_SCHEDULE: &str = "NoSchedule";
pub const TAINT_EFFECT_NO_EXECUTE: &str = "NoExecute";

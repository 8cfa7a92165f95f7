//! Closed sets of reasons explaining why a pod blocks a drain, or why a node cannot be removed.
use serde::{Deserialize, Serialize};

/// Explains why a single pod prevents its node from being drained.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
pub enum BlockingPodReason {
    #[default]
    NoReason,
    /// The pod's owning controller could not be found.
    ControllerNotFound,
    /// Removing the pod would leave its controller below the configured minimum replica count.
    MinReplicasReached,
    /// The pod has no controller which would recreate it elsewhere.
    NotReplicated,
    /// The pod mounts node-local storage.
    LocalStorageRequested,
    /// The pod is annotated as not safe to evict.
    NotSafeToEvictAnnotation,
    /// The pod runs in kube-system and no disruption budget covers it.
    UnmovableKubeSystemPod,
    /// A disruption budget covering the pod allows no further disruptions.
    NotEnoughPdb,
    UnexpectedError,
}

serde_plain::derive_display_from_serialize!(BlockingPodReason);
serde_plain::derive_fromstr_from_deserialize!(BlockingPodReason);

/// Explains why a node cannot be removed during scale-down.
///
/// Only a few of these are produced by the removal simulation itself; the rest are assigned by the
/// scale-down loop which drives it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
pub enum UnremovableReason {
    #[default]
    NoReason,
    ScaleDownDisabledAnnotation,
    NotAutoscaled,
    NotUnneededLongEnough,
    NotUnreadyLongEnough,
    NodeGroupMinSizeReached,
    MinimalResourceLimitExceeded,
    CurrentlyBeingDeleted,
    NotUnderutilized,
    NotUnneededOtherReason,
    RecentlyUnremovable,
    /// At least one pod could not be placed on any other node.
    NoPlaceToMovePods,
    /// A pod on the node cannot be drained. See the accompanying `BlockingPodReason`.
    BlockedByPod,
    UnexpectedError,
}

serde_plain::derive_display_from_serialize!(UnremovableReason);
serde_plain::derive_fromstr_from_deserialize!(UnremovableReason);

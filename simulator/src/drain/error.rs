use crate::listers::{error::ListerError, ControllerKind};
use models::reasons::BlockingPodReason;
use models::selector::error::SelectorError;

use snafu::Snafu;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything which can stop a pod from being moved off its node.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("{} for pod '{}' is not available: '{}'", kind, pod, source))]
    ControllerNotFound {
        kind: ControllerKind,
        pod: String,
        source: ListerError,
    },

    #[snafu(display(
        "{} for pod '{}' has too few replicas: {} declared, {} required",
        kind,
        pod,
        replicas,
        min_replicas
    ))]
    MinReplicasReached {
        kind: ControllerKind,
        pod: String,
        replicas: i32,
        min_replicas: i32,
    },

    #[snafu(display("Error when looking up {} for pod '{}': '{}'", kind, pod, source))]
    ControllerLookup {
        kind: ControllerKind,
        pod: String,
        source: ListerError,
    },

    #[snafu(display("Pod '{}' is not replicated", pod))]
    NotReplicated { pod: String },

    #[snafu(display(
        "Non-daemonset, non-mirrored kube-system pod '{}' is not covered by a disruption budget",
        pod
    ))]
    UnmovableKubeSystemPod { pod: String },

    #[snafu(display("Pod '{}' uses local storage", pod))]
    LocalStorageRequested { pod: String },

    #[snafu(display("Pod '{}' is annotated as not safe to evict", pod))]
    NotSafeToEvict { pod: String },

    #[snafu(display(
        "Unable to match pod '{}' against disruption budget '{}': '{}'",
        pod,
        pdb,
        source
    ))]
    PdbSelector {
        pod: String,
        pdb: String,
        source: SelectorError,
    },
}

impl Error {
    /// The reason code reported for a pod blocked by this error.
    pub fn blocking_reason(&self) -> BlockingPodReason {
        match self {
            Error::ControllerNotFound { .. } => BlockingPodReason::ControllerNotFound,
            Error::MinReplicasReached { .. } => BlockingPodReason::MinReplicasReached,
            Error::NotReplicated { .. } => BlockingPodReason::NotReplicated,
            Error::UnmovableKubeSystemPod { .. } => BlockingPodReason::UnmovableKubeSystemPod,
            Error::LocalStorageRequested { .. } => BlockingPodReason::LocalStorageRequested,
            Error::NotSafeToEvict { .. } => BlockingPodReason::NotSafeToEvictAnnotation,
            Error::ControllerLookup { .. } | Error::PdbSelector { .. } => {
                BlockingPodReason::UnexpectedError
            }
        }
    }
}

//! Checks that evicting a set of pods would not violate any pod disruption budget.
use models::constants::DEFAULT_NAMESPACE;
use models::pod;
use models::selector::{self, Selector};

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::ResourceExt;
use snafu::{ensure, ResultExt};

use std::sync::Arc;

pub type Result<T> = std::result::Result<T, error::Error>;

fn budget_namespace(budget: &PodDisruptionBudget) -> &str {
    budget
        .metadata
        .namespace
        .as_deref()
        .unwrap_or(DEFAULT_NAMESPACE)
}

/// The number of further disruptions the budget allows. A budget without status allows none.
pub fn disruptions_allowed(budget: &PodDisruptionBudget) -> i32 {
    budget
        .status
        .as_ref()
        .map_or(0, |status| status.disruptions_allowed)
}

/// Whether the budget applies to the pod: both are in the same namespace and the budget's selector
/// matches the pod's labels.
pub fn covers_pod(budget: &PodDisruptionBudget, pod: &Pod) -> selector::Result<bool> {
    if budget_namespace(budget) != pod::namespace(pod) {
        return Ok(false);
    }
    let selector = Selector::from_label_selector(
        budget
            .spec
            .as_ref()
            .and_then(|spec| spec.selector.as_ref()),
    )?;
    Ok(selector.matches(pod.metadata.labels.as_ref()))
}

/// Fails on the first pod, in order, covered by a budget which allows fewer than one disruption.
///
/// Each pod is checked against each budget independently; evicting several pods covered by the same
/// budget is not counted against it cumulatively.
pub fn check_pdbs(pods: &[Arc<Pod>], budgets: &[PodDisruptionBudget]) -> Result<()> {
    for pod in pods {
        for budget in budgets {
            let covered = covers_pod(budget, pod).context(error::InvalidSelectorSnafu {
                pdb: budget.name_any(),
            })?;
            ensure!(
                !covered || disruptions_allowed(budget) >= 1,
                error::NotEnoughPdbSnafu {
                    pod: Arc::clone(pod),
                    pdb: budget.name_any(),
                }
            );
        }
    }
    Ok(())
}

pub mod error {
    use models::pod;
    use models::selector::error::SelectorError;

    use k8s_openapi::api::core::v1::Pod;
    use snafu::Snafu;

    use std::sync::Arc;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum Error {
        #[snafu(display(
            "Not enough disruptions allowed by budget '{}' to evict pod '{}'",
            pdb,
            pod::pod_key(pod)
        ))]
        NotEnoughPdb { pod: Arc<Pod>, pdb: String },

        #[snafu(display("Disruption budget '{}' has an invalid selector: '{}'", pdb, source))]
        InvalidSelector { pdb: String, source: SelectorError },
    }

    impl Error {
        /// The pod which violates the budget, when there is one.
        pub fn blocking_pod(&self) -> Option<&Arc<Pod>> {
            match self {
                Error::NotEnoughPdb { pod, .. } => Some(pod),
                Error::InvalidSelector { .. } => None,
            }
        }
    }
}

//! Knobs which control how strictly pods are checked before a node is considered drainable.
use models::constants::POD_LONG_TERMINATING_EXTRA_THRESHOLD_SECONDS;

use chrono::Duration;
use snafu::{OptionExt, ResultExt};
use validator::Validate;

use std::env;
use std::fmt::Display;
use std::str::FromStr;

const SKIP_NODES_WITH_SYSTEM_PODS_ENV_VAR: &str = "SKIP_NODES_WITH_SYSTEM_PODS";
const SKIP_NODES_WITH_LOCAL_STORAGE_ENV_VAR: &str = "SKIP_NODES_WITH_LOCAL_STORAGE";
const MIN_REPLICA_COUNT_ENV_VAR: &str = "MIN_REPLICA_COUNT";
const POD_LONG_TERMINATING_EXTRA_THRESHOLD_ENV_VAR: &str =
    "POD_LONG_TERMINATING_EXTRA_THRESHOLD_SECONDS";

/// The module-wide result type.
type Result<T> = std::result::Result<T, config_error::Error>;

#[derive(Clone, Debug, PartialEq, Eq, Validate)]
pub struct DrainOptions {
    /// Block removal of nodes running kube-system pods which no disruption budget covers.
    pub skip_nodes_with_system_pods: bool,
    /// Block removal of nodes running pods with node-local storage.
    pub skip_nodes_with_local_storage: bool,
    /// Pods whose ReplicaSet or ReplicationController declares fewer replicas than this are not moved.
    #[validate(range(min = 0))]
    pub min_replica_count: i32,
    /// How long past its grace period a terminating pod is still considered to be running.
    pub pod_long_terminating_extra_threshold: Duration,
}

impl Default for DrainOptions {
    fn default() -> Self {
        DrainOptions {
            skip_nodes_with_system_pods: true,
            skip_nodes_with_local_storage: true,
            min_replica_count: 0,
            pod_long_terminating_extra_threshold: Duration::seconds(
                POD_LONG_TERMINATING_EXTRA_THRESHOLD_SECONDS as i64,
            ),
        }
    }
}

impl DrainOptions {
    /// Reads options from the environment. Unset variables keep their defaults.
    pub fn from_environment() -> Result<Self> {
        let defaults = DrainOptions::default();
        let options = DrainOptions {
            skip_nodes_with_system_pods: env_value(SKIP_NODES_WITH_SYSTEM_PODS_ENV_VAR)?
                .unwrap_or(defaults.skip_nodes_with_system_pods),
            skip_nodes_with_local_storage: env_value(SKIP_NODES_WITH_LOCAL_STORAGE_ENV_VAR)?
                .unwrap_or(defaults.skip_nodes_with_local_storage),
            min_replica_count: env_value(MIN_REPLICA_COUNT_ENV_VAR)?
                .unwrap_or(defaults.min_replica_count),
            pod_long_terminating_extra_threshold: env_value(
                POD_LONG_TERMINATING_EXTRA_THRESHOLD_ENV_VAR,
            )?
            .map(threshold_seconds)
            .transpose()?
            .unwrap_or(defaults.pod_long_terminating_extra_threshold),
        };
        options
            .validate()
            .context(config_error::InvalidOptionsSnafu)?;
        Ok(options)
    }
}

fn threshold_seconds(seconds: i64) -> Result<Duration> {
    Duration::try_seconds(seconds).context(config_error::ParseEnvVariableSnafu {
        variable: POD_LONG_TERMINATING_EXTRA_THRESHOLD_ENV_VAR,
        value: seconds.to_string(),
        message: "number of seconds is out of range",
    })
}

fn env_value<T>(variable: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(variable) {
        Ok(value) => match value.trim().parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(err) => config_error::ParseEnvVariableSnafu {
                variable,
                value,
                message: err.to_string(),
            }
            .fail(),
        },
        Err(_) => Ok(None),
    }
}

pub mod config_error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum Error {
        #[snafu(display(
            "Unable to parse environment variable '{}={}': '{}'",
            variable,
            value,
            message
        ))]
        ParseEnvVariable {
            variable: String,
            value: String,
            message: String,
        },

        #[snafu(display("Invalid drain options: '{}'", source))]
        InvalidOptions { source: validator::ValidationErrors },
    }
}

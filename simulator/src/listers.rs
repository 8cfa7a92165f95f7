//! Read-only lookups of workload controllers, used to confirm that a pod's controller would
//! recreate it elsewhere.
//!
//! Lookups are expected to be served from an already-synchronized local cache, so they never block.
use models::constants::{
    KIND_DAEMON_SET, KIND_JOB, KIND_REPLICATION_CONTROLLER, KIND_REPLICA_SET, KIND_STATEFUL_SET,
};

use k8s_openapi::api::apps::v1::{DaemonSet, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ReplicationController;
use kube::runtime::reflector::{store::Writer, ObjectRef, Store};
use kube::runtime::watcher;
use kube::Resource;
use serde::Serialize;

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

pub type Result<T> = std::result::Result<T, error::ListerError>;

/// The controller kinds whose pods receive special treatment during a drain.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum ControllerKind {
    ReplicationController,
    ReplicaSet,
    Job,
    DaemonSet,
    StatefulSet,
    Unknown,
}

impl ControllerKind {
    /// Maps an owner reference `kind` onto a controller kind.
    pub fn from_owner_kind(kind: &str) -> Self {
        match kind {
            KIND_REPLICATION_CONTROLLER => ControllerKind::ReplicationController,
            KIND_REPLICA_SET => ControllerKind::ReplicaSet,
            KIND_JOB => ControllerKind::Job,
            KIND_DAEMON_SET => ControllerKind::DaemonSet,
            KIND_STATEFUL_SET => ControllerKind::StatefulSet,
            _ => ControllerKind::Unknown,
        }
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A trait providing lookups of workload controllers by namespace and name. This is provided as a
/// trait in order to allow mocks to be used for testing purposes.
#[cfg_attr(test, automock)]
pub trait ListerRegistry {
    fn replication_controller(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Arc<ReplicationController>>;
    fn replica_set(&self, namespace: &str, name: &str) -> Result<Arc<ReplicaSet>>;
    fn job(&self, namespace: &str, name: &str) -> Result<Arc<Job>>;
    fn daemon_set(&self, namespace: &str, name: &str) -> Result<Arc<DaemonSet>>;
    fn stateful_set(&self, namespace: &str, name: &str) -> Result<Arc<StatefulSet>>;
}

/// Concrete implementation of `ListerRegistry` backed by reflector stores, which a controller keeps
/// up to date from watch events.
#[derive(Clone)]
pub struct StoreListers {
    replication_controllers: Store<ReplicationController>,
    replica_sets: Store<ReplicaSet>,
    jobs: Store<Job>,
    daemon_sets: Store<DaemonSet>,
    stateful_sets: Store<StatefulSet>,
}

impl StoreListers {
    pub fn new(
        replication_controllers: Store<ReplicationController>,
        replica_sets: Store<ReplicaSet>,
        jobs: Store<Job>,
        daemon_sets: Store<DaemonSet>,
        stateful_sets: Store<StatefulSet>,
    ) -> Self {
        StoreListers {
            replication_controllers,
            replica_sets,
            jobs,
            daemon_sets,
            stateful_sets,
        }
    }

    /// Builds stores pre-populated with the given objects, for use with static snapshots.
    pub fn from_objects(
        replication_controllers: Vec<ReplicationController>,
        replica_sets: Vec<ReplicaSet>,
        jobs: Vec<Job>,
        daemon_sets: Vec<DaemonSet>,
        stateful_sets: Vec<StatefulSet>,
    ) -> Self {
        StoreListers::new(
            populated_store(replication_controllers),
            populated_store(replica_sets),
            populated_store(jobs),
            populated_store(daemon_sets),
            populated_store(stateful_sets),
        )
    }
}

fn populated_store<K>(objects: Vec<K>) -> Store<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone + Default,
{
    let mut writer = Writer::<K>::default();
    writer.apply_watcher_event(&watcher::Event::Restarted(objects));
    writer.as_reader()
}

fn lookup<K>(store: &Store<K>, kind: ControllerKind, namespace: &str, name: &str) -> Result<Arc<K>>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone + Default,
{
    store
        .get(&ObjectRef::new(name).within(namespace))
        .ok_or_else(|| error::ListerError::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
}

impl ListerRegistry for StoreListers {
    fn replication_controller(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Arc<ReplicationController>> {
        lookup(
            &self.replication_controllers,
            ControllerKind::ReplicationController,
            namespace,
            name,
        )
    }

    fn replica_set(&self, namespace: &str, name: &str) -> Result<Arc<ReplicaSet>> {
        lookup(&self.replica_sets, ControllerKind::ReplicaSet, namespace, name)
    }

    fn job(&self, namespace: &str, name: &str) -> Result<Arc<Job>> {
        lookup(&self.jobs, ControllerKind::Job, namespace, name)
    }

    fn daemon_set(&self, namespace: &str, name: &str) -> Result<Arc<DaemonSet>> {
        lookup(&self.daemon_sets, ControllerKind::DaemonSet, namespace, name)
    }

    fn stateful_set(&self, namespace: &str, name: &str) -> Result<Arc<StatefulSet>> {
        lookup(
            &self.stateful_sets,
            ControllerKind::StatefulSet,
            namespace,
            name,
        )
    }
}

pub mod error {
    use super::ControllerKind;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum ListerError {
        #[snafu(display("{} '{}/{}' not found", kind, namespace, name))]
        NotFound {
            kind: ControllerKind,
            namespace: String,
            name: String,
        },

        #[snafu(display("Unable to look up {} '{}/{}': '{}'", kind, namespace, name, message))]
        Unavailable {
            kind: ControllerKind,
            namespace: String,
            name: String,
            message: String,
        },
    }

    impl ListerError {
        pub fn is_not_found(&self) -> bool {
            matches!(self, ListerError::NotFound { .. })
        }
    }
}

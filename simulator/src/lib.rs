//! Scale-down simulation: decides which nodes could be removed from a cluster right now, and where
//! their pods would go, without moving anything.
//!
//! The entry points are [`removal::RemovalSimulator::find_nodes_to_remove`] and
//! [`removal::find_empty_nodes_to_remove`]. Everything operates on an in-memory snapshot of cluster
//! state supplied by the caller.
pub mod config;
pub mod drain;
pub mod listers;
pub mod nodeinfo;
pub mod pdb;
pub mod placement;
pub mod predicates;
pub mod removal;
pub mod report;
pub mod snapshot;
pub mod tracker;
pub mod utilization;

#[cfg(test)]
pub(crate) mod test_util;

//! Remembers which nodes' removal was simulated to rely on which other nodes' spare capacity.
//!
//! When a node `A` is found removable because its pods fit on node `B`, `A` is *using* `B` and `B` is
//! *used by* `A`. If `A` is later actually removed, every node whose removability assumed the same
//! spare capacity on `B` must be re-evaluated.
use chrono::{DateTime, Utc};
use tracing::{event, Level};

use std::collections::HashMap;

#[cfg(test)]
use mockall::automock;

/// Beyond this many entries, a record only remembers that there were too many to track.
pub const MAX_USAGE_RECORDS: usize = 50;

/// Receives the displacements chosen by the placement solver.
#[cfg_attr(test, automock)]
pub trait UsageRecorder {
    /// Records that pods from node `using` were placed onto node `used_by` at time `at`.
    fn register_usage(&mut self, using: &str, used_by: &str, at: DateTime<Utc>);
}

/// The usage known about a single node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UsageRecord {
    pub using_too_many: bool,
    /// Nodes this node's pods were placed onto, and when.
    pub using: HashMap<String, DateTime<Utc>>,
    pub used_by_too_many: bool,
    /// Nodes whose pods were placed onto this node, and when.
    pub used_by: HashMap<String, DateTime<Utc>>,
}

fn record_entry(
    entries: &mut HashMap<String, DateTime<Utc>>,
    too_many: &mut bool,
    node: &str,
    at: DateTime<Utc>,
) {
    if entries.len() >= MAX_USAGE_RECORDS && !entries.contains_key(node) {
        *too_many = true;
    } else {
        entries.insert(node.to_string(), at);
    }
}

#[derive(Clone, Debug, Default)]
pub struct UsageTracker {
    usage: HashMap<String, UsageRecord>,
}

impl UsageRecorder for UsageTracker {
    fn register_usage(&mut self, using: &str, used_by: &str, at: DateTime<Utc>) {
        let record = self.usage.entry(using.to_string()).or_default();
        record_entry(&mut record.using, &mut record.using_too_many, used_by, at);

        let record = self.usage.entry(used_by.to_string()).or_default();
        record_entry(&mut record.used_by, &mut record.used_by_too_many, using, at);
    }
}

impl UsageTracker {
    pub fn new() -> Self {
        UsageTracker::default()
    }

    pub fn get(&self, node: &str) -> Option<&UsageRecord> {
        self.usage.get(node)
    }

    /// Forgets the node, in both directions.
    pub fn unregister(&mut self, node: &str) {
        let Some(record) = self.usage.remove(node) else {
            return;
        };
        for used in record.using.keys() {
            if let Some(other) = self.usage.get_mut(used) {
                other.used_by.remove(node);
            }
        }
        for user in record.used_by.keys() {
            if let Some(other) = self.usage.get_mut(user) {
                other.using.remove(node);
            }
        }
    }

    /// Drops entries recorded before `cutoff`, and records left with no entries.
    pub fn clean_up(&mut self, cutoff: DateTime<Utc>) {
        self.usage.retain(|_, record| {
            record.using.retain(|_, at| *at >= cutoff);
            record.used_by.retain(|_, at| *at >= cutoff);
            !(record.using.is_empty() && record.used_by.is_empty())
        });
    }

    /// Handles the actual removal of `node`: unregisters it and drops it from `unneeded_since`,
    /// together with every node whose removal relied on capacity the removed node also relied on.
    ///
    /// If the affected nodes cannot be known exactly because too many usages were recorded, every
    /// node is dropped from `unneeded_since`.
    pub fn remove_node(
        &mut self,
        node: &str,
        unneeded_since: &mut HashMap<String, DateTime<Utc>>,
    ) {
        let mut to_remove: Vec<String> = Vec::new();
        let mut remove_all = false;
        if let Some(record) = self.usage.get(node) {
            if record.using_too_many {
                remove_all = true;
            } else {
                for used in record.using.keys() {
                    let Some(used_record) = self.usage.get(used) else {
                        continue;
                    };
                    if used_record.used_by_too_many {
                        remove_all = true;
                        break;
                    }
                    to_remove.extend(used_record.used_by.keys().cloned());
                }
            }
        }

        self.unregister(node);
        unneeded_since.remove(node);
        if remove_all {
            event!(
                Level::DEBUG,
                node,
                "Too many usages recorded; all nodes need to be re-evaluated."
            );
            unneeded_since.clear();
            return;
        }
        for other in to_remove {
            event!(Level::DEBUG, node = %other, "Removing node from the unneeded list.");
            unneeded_since.remove(&other);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::NOW;
    use chrono::Duration;

    #[test]
    fn test_register_usage() {
        let mut tracker = UsageTracker::new();
        tracker.register_usage("A", "B", *NOW);
        tracker.register_usage("A", "C", *NOW);

        let a = tracker.get("A").unwrap();
        assert_eq!(a.using.len(), 2);
        assert!(a.used_by.is_empty());
        assert_eq!(tracker.get("B").unwrap().used_by.get("A"), Some(&*NOW));
    }

    #[test]
    fn test_too_many_usages() {
        let mut tracker = UsageTracker::new();
        for i in 0..MAX_USAGE_RECORDS + 1 {
            tracker.register_usage("A", &format!("node-{}", i), *NOW);
            tracker.register_usage(&format!("node-{}", i), "Z", *NOW);
        }
        let a = tracker.get("A").unwrap();
        assert!(a.using_too_many);
        assert_eq!(a.using.len(), MAX_USAGE_RECORDS);
        assert!(tracker.get("Z").unwrap().used_by_too_many);
    }

    #[test]
    fn test_unregister() {
        let mut tracker = UsageTracker::new();
        tracker.register_usage("A", "B", *NOW);
        tracker.register_usage("C", "A", *NOW);
        tracker.unregister("A");

        assert!(tracker.get("A").is_none());
        assert!(tracker.get("B").unwrap().used_by.is_empty());
        assert!(tracker.get("C").unwrap().using.is_empty());
    }

    #[test]
    fn test_clean_up() {
        let mut tracker = UsageTracker::new();
        tracker.register_usage("A", "B", *NOW - Duration::minutes(10));
        tracker.register_usage("C", "B", *NOW);
        tracker.clean_up(*NOW - Duration::minutes(5));

        assert!(tracker.get("A").is_none());
        let b = tracker.get("B").unwrap();
        assert_eq!(b.used_by.keys().collect::<Vec<_>>(), vec!["C"]);
        assert!(tracker.get("C").is_some());
    }

    #[test]
    fn test_remove_node() {
        let mut tracker = UsageTracker::new();
        // A and C both relied on B; D relied on E.
        tracker.register_usage("A", "B", *NOW);
        tracker.register_usage("C", "B", *NOW);
        tracker.register_usage("D", "E", *NOW);
        let mut unneeded_since: HashMap<String, DateTime<Utc>> = ["A", "C", "D"]
            .iter()
            .map(|node| (node.to_string(), *NOW))
            .collect();

        tracker.remove_node("A", &mut unneeded_since);
        assert_eq!(unneeded_since.keys().collect::<Vec<_>>(), vec!["D"]);
        assert!(tracker.get("A").is_none());
    }

    #[test]
    fn test_remove_node_with_too_many_usages() {
        let mut tracker = UsageTracker::new();
        for i in 0..MAX_USAGE_RECORDS + 1 {
            tracker.register_usage("A", &format!("node-{}", i), *NOW);
        }
        let mut unneeded_since: HashMap<String, DateTime<Utc>> =
            [("A".to_string(), *NOW), ("X".to_string(), *NOW)].into_iter().collect();

        tracker.remove_node("A", &mut unneeded_since);
        assert!(unneeded_since.is_empty());
    }
}

//! Last-writer-wins property reconciliation for an individual interval.
//!
//! Owned 1:1 by an [`crate::Interval`] — never shared across intervals.
//! Tracks which keys are still pending an ack so that `ack_properties_change`
//! and rollback can tell a sequenced write from one still in flight.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::reference::{OpInfo, UNASSIGNED_SEQUENCE_NUMBER, UNIVERSAL_SEQUENCE_NUMBER};

/// Reserved property key mirroring an interval's id on the wire.
pub const RESERVED_INTERVAL_ID: &str = "intervalId";
/// Reserved property key carrying the one-element label list on the wire.
pub const RESERVED_REFERENCE_RANGE_LABELS: &str = "referenceRangeLabels";

/// Strip the two reserved keys from a property map, returning the
/// remainder. Used whenever user-supplied properties are accepted so the
/// reserved keys never appear as user-visible entries.
pub fn strip_reserved(mut props: Map<String, Value>) -> Map<String, Value> {
    props.remove(RESERVED_INTERVAL_ID);
    props.remove(RESERVED_REFERENCE_RANGE_LABELS);
    props
}

/// Last-writer-wins property store keyed by op sequence number.
#[derive(Debug, Clone, Default)]
pub struct PropertyManager {
    values: Map<String, Value>,
    /// Sequence number of the write currently pending ack, per key.
    pending: HashMap<String, i64>,
}

impl PropertyManager {
    /// Build a manager seeded with the given (already-reserved-stripped)
    /// properties.
    pub fn new(values: Map<String, Value>) -> Self {
        Self {
            values,
            pending: HashMap::new(),
        }
    }

    /// Current property snapshot.
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Apply a batch of property writes immediately, recording the
    /// sequence number each key is pending at.
    ///
    /// `op` is `None` for a local (not-yet-sequenced) change; `rollback`
    /// reverts each key to the value carried in `props` (the caller's
    /// pre-change snapshot) and clears its pending marker, rather than
    /// recording a new pending write.
    pub fn change_properties(
        &mut self,
        props: Map<String, Value>,
        op: Option<OpInfo>,
        collaborating: bool,
        rollback: bool,
    ) {
        let seq = match op {
            Some(op) => op.sequence_number,
            None if collaborating => UNASSIGNED_SEQUENCE_NUMBER,
            None => UNIVERSAL_SEQUENCE_NUMBER,
        };
        for (key, value) in props {
            if rollback {
                self.values.insert(key.clone(), value);
                self.pending.remove(&key);
                continue;
            }
            self.values.insert(key.clone(), value);
            self.pending.insert(key, seq);
        }
    }

    /// Inform the manager that `op.sequence_number` has been sequenced,
    /// pruning any keys whose pending write matches it.
    pub fn ack_properties_change(&mut self, new_props: &Map<String, Value>, op: OpInfo) {
        for key in new_props.keys() {
            if self.pending.get(key) == Some(&op.sequence_number) {
                self.pending.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_reverts_value_and_clears_pending() {
        let mut initial = Map::new();
        initial.insert("color".to_string(), Value::String("red".to_string()));
        let mut mgr = PropertyManager::new(initial);

        let mut pending_write = Map::new();
        pending_write.insert("color".to_string(), Value::String("blue".to_string()));
        mgr.change_properties(pending_write, None, true, false);
        assert_eq!(
            mgr.values().get("color"),
            Some(&Value::String("blue".to_string()))
        );
        assert_eq!(mgr.pending.get("color"), Some(&UNASSIGNED_SEQUENCE_NUMBER));

        let mut rollback_to = Map::new();
        rollback_to.insert("color".to_string(), Value::String("red".to_string()));
        mgr.change_properties(rollback_to, None, true, true);

        assert_eq!(
            mgr.values().get("color"),
            Some(&Value::String("red".to_string()))
        );
        assert!(!mgr.pending.contains_key("color"));
    }
}

use serde::{Serialize, Deserialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a process registered with the scheduler.
    pub struct ProcessId;

    /// Identifies a bounded store (inter-stage queue).
    pub struct QueueId;
}

/// Identifies a stage kind in the pipeline. Cheap to copy and compare;
/// the event log maps it to a display name at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StageId(pub u32);

/// Identifies a batch of material flowing through the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_id_equality() {
        let a = StageId(0);
        let b = StageId(0);
        let c = StageId(1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn stage_id_ordering_follows_value() {
        assert!(StageId(0) < StageId(3));
    }

    #[test]
    fn ids_are_hashable() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(StageId(0), "pasteuriser");
        map.insert(StageId(1), "cheese_vat");
        assert_eq!(map[&StageId(0)], "pasteuriser");
    }
}

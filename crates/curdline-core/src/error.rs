use crate::fixed::Ticks;
use crate::id::{ProcessId, QueueId, StageId};

/// Errors that abort a simulation run.
///
/// Every variant is a programmer or configuration defect, not an
/// operational condition. Anomalies, delayed deliveries, and halted
/// runs are all ordinary outcomes and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// A stage parameter failed validation before the run started.
    #[error("invalid configuration for stage {stage:?}: {reason}")]
    ConfigDefect { stage: StageId, reason: String },

    /// A store was asked to hold more batches than its capacity.
    #[error("queue {queue:?} exceeded capacity {capacity} at tick {at}")]
    CapacityViolation {
        queue: QueueId,
        capacity: usize,
        at: Ticks,
    },

    /// A store id that resolves to no live store, or a line with no
    /// intake wired.
    #[error("no store behind queue {queue:?} at tick {at}")]
    UnknownQueue { queue: QueueId, at: Ticks },

    /// A continuation was scheduled into the past or a process was
    /// resumed while already scheduled.
    #[error("scheduling defect for process {process:?} at tick {at}: {reason}")]
    SchedulingDefect {
        process: ProcessId,
        at: Ticks,
        reason: String,
    },

    /// A log entry referenced a stage never registered with the log.
    #[error("unregistered stage {0:?} in log entry")]
    UnknownStage(StageId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_defect() {
        let e = SimError::UnknownStage(StageId(7));
        assert!(e.to_string().contains("StageId(7)"));
    }
}

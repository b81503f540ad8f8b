// Pure fold of per-test outcomes into the submission-level report. No I/O.

use crate::types::{ExecutionOutcome, GradingReport};

pub fn aggregate(outcomes: Vec<ExecutionOutcome>) -> GradingReport {
    let passed_count = outcomes.iter().filter(|o| o.success).count();
    let total_count = outcomes.len();
    let total_execution_time_ms = outcomes.iter().map(|o| o.execution_time_ms).sum();
    GradingReport {
        outcomes,
        passed_count,
        total_count,
        total_execution_time_ms,
    }
}

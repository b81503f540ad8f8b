use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub code: String,
    pub language: String,
    pub test_cases: Vec<TestCase>,
    #[serde(default = "default_time_limit_seconds")]
    pub time_limit_seconds: u64,
    #[serde(default = "default_memory_limit_mb", rename = "memoryLimitMB")]
    pub memory_limit_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Per-test-case verdict. `exit_code` is -1 when the process was killed
/// before producing an exit status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: String,
    pub error: String,
    pub execution_time_ms: u64,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingReport {
    pub outcomes: Vec<ExecutionOutcome>,
    pub passed_count: usize,
    pub total_count: usize,
    pub total_execution_time_ms: u64,
}

pub(crate) fn default_time_limit_seconds() -> u64 {
    5
}

pub(crate) fn default_memory_limit_mb() -> u64 {
    64
}

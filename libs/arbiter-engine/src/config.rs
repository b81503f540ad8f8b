// Engine tunables. Defaults are safe for a small host; override per
// deployment via `from_env` or by mutating the struct before building
// the scheduler.

/// How actual and expected output are normalized before comparison.
///
/// The default strips trailing whitespace on each line and drops trailing
/// blank lines; everything else (internal whitespace, casing, empty lines
/// inside the content) is compared exactly. With both flags off the raw
/// strings are compared byte for byte.
#[derive(Debug, Clone)]
pub struct OutputPolicy {
    pub trim_trailing_whitespace: bool,
    pub drop_trailing_blank_lines: bool,
}

impl Default for OutputPolicy {
    fn default() -> Self {
        Self {
            trim_trailing_whitespace: true,
            drop_trailing_blank_lines: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of simultaneously sandboxed child processes across
    /// all in-flight requests (the worker pool).
    pub max_concurrent_executions: usize,
    /// Admission bound: requests in flight or queued beyond this count are
    /// rejected with `ServiceBusy` instead of growing the backlog.
    pub max_pending_requests: usize,
    /// Concurrency cap for the test cases of a single request.
    pub per_request_parallelism: usize,
    /// Compile step deadline, independent of the per-test run deadline.
    pub compile_time_limit_seconds: u64,
    /// Compile step memory ceiling in MB.
    pub compile_memory_limit_mb: u64,
    /// Per-stream capture cap; output beyond this is drained and discarded.
    pub max_output_bytes: usize,
    /// Cap on the `error` field carried in an outcome.
    pub max_error_bytes: usize,
    /// Language used by the health probe.
    pub health_language: String,
    /// Output the health probe's starter program must print.
    pub health_expected_output: String,
    pub health_time_limit_seconds: u64,
    pub health_memory_limit_mb: u64,
    pub output_policy: OutputPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 4,
            max_pending_requests: 64,
            per_request_parallelism: 4,
            compile_time_limit_seconds: 30,
            compile_memory_limit_mb: 512,
            max_output_bytes: 64 * 1024,
            max_error_bytes: 8 * 1024,
            health_language: "python".to_string(),
            health_expected_output: "Hello, World!".to_string(),
            health_time_limit_seconds: 10,
            health_memory_limit_mb: 256,
            output_policy: OutputPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by environment variables where present.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = env_usize("ARBITER_POOL_SIZE") {
            config.max_concurrent_executions = n;
        }
        if let Some(n) = env_usize("ARBITER_MAX_PENDING") {
            config.max_pending_requests = n;
        }
        if let Some(n) = env_usize("ARBITER_REQUEST_PARALLELISM") {
            config.per_request_parallelism = n;
        }
        if let Some(n) = env_u64("ARBITER_COMPILE_TIMEOUT_SECONDS") {
            config.compile_time_limit_seconds = n;
        }
        if let Ok(lang) = std::env::var("ARBITER_HEALTH_LANGUAGE") {
            if !lang.is_empty() {
                config.health_language = lang;
            }
        }
        config
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

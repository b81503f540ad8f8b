/// Test Harness - Per-Test-Case Judging
///
/// **Core Responsibility:**
/// Run one staged program against one test case and classify the result.
///
/// **Critical Properties:**
/// - Knows nothing about process spawning details (sandbox's job)
/// - Knows nothing about request orchestration (scheduler's job)
/// - Normalization and classification are pure and unit-testable
///
/// **Classification precedence:**
/// 1. Timed out            -> "Time limit exceeded"
/// 2. Memory exceeded      -> "Memory limit exceeded"
/// 3. Non-zero exit        -> runtime error, stderr (truncated) as error
/// 4. Clean exit, mismatch -> wrong answer, empty error
/// 5. Clean exit, match    -> success
use std::time::Duration;

use tracing::debug;

use crate::config::{EngineConfig, OutputPolicy};
use crate::error::EngineError;
use crate::registry::LanguageSpec;
use crate::sandbox::{self, SandboxOutput, SandboxRequest, Workspace};
use crate::types::{ExecutionOutcome, TestCase};

pub(crate) const TIME_LIMIT_EXCEEDED: &str = "Time limit exceeded";
pub(crate) const MEMORY_LIMIT_EXCEEDED: &str = "Memory limit exceeded";

/// The program a test case runs: either raw source (interpreted languages)
/// or the build workspace produced by the compile step. Owning the build
/// workspace keeps its artifacts alive for every test run and removes them
/// when the request finishes.
#[derive(Debug)]
pub(crate) enum StagedProgram {
    Source { file_name: String, code: String },
    Compiled { build: Workspace },
}

impl StagedProgram {
    /// Copy the program into a fresh workspace. Compiled artifacts are
    /// staged wholesale so multi-file outputs (e.g. javac class files)
    /// survive.
    async fn materialize(&self, workspace: &Workspace) -> Result<(), EngineError> {
        match self {
            StagedProgram::Source { file_name, code } => {
                workspace.write_file(file_name, code).await?;
            }
            StagedProgram::Compiled { build } => {
                let mut entries = tokio::fs::read_dir(build.path()).await.map_err(|e| {
                    EngineError::internal(format!("failed to read build dir: {}", e))
                })?;
                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .map_err(|e| EngineError::internal(format!("failed to scan build dir: {}", e)))?
                {
                    let path = entry.path();
                    if !path.is_file() {
                        debug!(path = %path.display(), "skipping non-file build artifact");
                        continue;
                    }
                    let dest = workspace.path().join(entry.file_name());
                    // fs::copy preserves the executable bit.
                    tokio::fs::copy(&path, &dest).await.map_err(|e| {
                        EngineError::internal(format!(
                            "failed to stage artifact {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
                }
            }
        }
        Ok(())
    }
}

/// Execute one test case in its own disposable workspace and judge it.
pub(crate) async fn run_test_case(
    spec: &LanguageSpec,
    staged: &StagedProgram,
    case: &TestCase,
    time_limit: Duration,
    memory_limit_mb: u64,
    config: &EngineConfig,
) -> Result<ExecutionOutcome, EngineError> {
    let workspace = Workspace::create()?;
    staged.materialize(&workspace).await?;

    let run = sandbox::run(&SandboxRequest {
        argv: spec.render_run(),
        workdir: workspace.path().to_path_buf(),
        stdin: case.input.clone(),
        time_limit,
        memory_limit_mb,
        max_output_bytes: config.max_output_bytes,
    })
    .await?;

    Ok(judge(&run, &case.expected_output, config))
}

/// Classify a raw sandbox result against the expected output.
pub(crate) fn judge(run: &SandboxOutput, expected: &str, config: &EngineConfig) -> ExecutionOutcome {
    let exit_code = run.exit_code.unwrap_or(-1);
    let output = normalize_output(&run.stdout, &config.output_policy);

    if run.timed_out {
        return ExecutionOutcome {
            success: false,
            output,
            error: TIME_LIMIT_EXCEEDED.to_string(),
            execution_time_ms: run.execution_time_ms,
            exit_code,
        };
    }
    if run.memory_exceeded {
        return ExecutionOutcome {
            success: false,
            output,
            error: MEMORY_LIMIT_EXCEEDED.to_string(),
            execution_time_ms: run.execution_time_ms,
            exit_code,
        };
    }
    if exit_code != 0 {
        return ExecutionOutcome {
            success: false,
            output,
            error: truncate_error(&run.stderr, config.max_error_bytes),
            execution_time_ms: run.execution_time_ms,
            exit_code,
        };
    }

    let success = output == normalize_output(expected, &config.output_policy);
    // Wrong answer keeps an empty error: distinguishable from a crash.
    ExecutionOutcome {
        success,
        output,
        error: String::new(),
        execution_time_ms: run.execution_time_ms,
        exit_code,
    }
}

/// Normalize program output for comparison under the given policy.
pub fn normalize_output(raw: &str, policy: &OutputPolicy) -> String {
    if !policy.trim_trailing_whitespace && !policy.drop_trailing_blank_lines {
        return raw.to_string();
    }
    let mut lines: Vec<&str> = raw
        .lines()
        .map(|line| {
            if policy.trim_trailing_whitespace {
                line.trim_end()
            } else {
                line
            }
        })
        .collect();
    if policy.drop_trailing_blank_lines {
        while lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }
    }
    lines.join("\n")
}

/// Truncate on a UTF-8 boundary so oversized compiler/runtime spew never
/// reaches the caller whole.
pub(crate) fn truncate_error(raw: &str, max_bytes: usize) -> String {
    let trimmed = raw.trim_end();
    if trimmed.len() <= max_bytes {
        return trimmed.to_string();
    }
    let mut end = max_bytes;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[truncated]", &trimmed[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    fn clean_run(stdout: &str) -> SandboxOutput {
        SandboxOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
            execution_time_ms: 12,
            timed_out: false,
            memory_exceeded: false,
        }
    }

    #[test]
    fn normalization_strips_trailing_whitespace_per_line() {
        let policy = OutputPolicy::default();
        assert_eq!(normalize_output("hello", &policy), "hello");
        assert_eq!(normalize_output("hello \n", &policy), "hello");
        assert_eq!(normalize_output("a  \nb\t\nc", &policy), "a\nb\nc");
        assert_eq!(normalize_output("line1\r\nline2\r\n", &policy), "line1\nline2");
    }

    #[test]
    fn normalization_drops_trailing_blank_lines_only() {
        let policy = OutputPolicy::default();
        assert_eq!(normalize_output("x\n\n\n", &policy), "x");
        // Interior blank lines are content.
        assert_eq!(normalize_output("x\n\ny\n", &policy), "x\n\ny");
        assert_eq!(normalize_output("\n\n", &policy), "");
    }

    #[test]
    fn normalization_preserves_leading_and_internal_whitespace() {
        let policy = OutputPolicy::default();
        assert_eq!(normalize_output("  indented", &policy), "  indented");
        assert_eq!(normalize_output("a b  c", &policy), "a b  c");
    }

    #[test]
    fn exact_policy_compares_raw_strings() {
        let policy = OutputPolicy {
            trim_trailing_whitespace: false,
            drop_trailing_blank_lines: false,
        };
        assert_eq!(normalize_output("hello \n", &policy), "hello \n");
    }

    #[test]
    fn trailing_space_is_accepted() {
        // The program prints "hello " where "hello" is expected; the
        // normalization policy decides this passes.
        let outcome = judge(&clean_run("hello \n"), "hello", &config());
        assert!(outcome.success);
        assert_eq!(outcome.output, "hello");
        assert_eq!(outcome.error, "");
    }

    #[test]
    fn matching_output_passes() {
        let outcome = judge(&clean_run("42\n"), "42", &config());
        assert!(outcome.success);
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.execution_time_ms, 12);
    }

    #[test]
    fn case_differences_still_fail() {
        let outcome = judge(&clean_run("Hello"), "hello", &config());
        assert!(!outcome.success);
    }

    #[test]
    fn wrong_answer_has_empty_error() {
        let outcome = judge(&clean_run("41"), "42", &config());
        assert!(!outcome.success);
        assert_eq!(outcome.error, "");
        assert_eq!(outcome.exit_code, 0);
    }

    #[test]
    fn runtime_error_carries_stderr() {
        let run = SandboxOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "Traceback: division by zero".to_string(),
            execution_time_ms: 9,
            timed_out: false,
            memory_exceeded: false,
        };
        let outcome = judge(&run, "42", &config());
        assert!(!outcome.success);
        assert!(outcome.error.contains("division by zero"));
        assert_eq!(outcome.exit_code, 1);
    }

    #[test]
    fn timeout_takes_precedence() {
        let run = SandboxOutput {
            exit_code: None,
            stdout: "partial".to_string(),
            stderr: "[execution timed out]".to_string(),
            execution_time_ms: 2004,
            timed_out: true,
            memory_exceeded: true,
        };
        let outcome = judge(&run, "partial", &config());
        assert!(!outcome.success);
        assert_eq!(outcome.error, TIME_LIMIT_EXCEEDED);
        assert_eq!(outcome.exit_code, -1);
        assert!(outcome.execution_time_ms >= 2000);
    }

    #[test]
    fn memory_kill_is_reported() {
        let run = SandboxOutput {
            exit_code: None,
            stdout: String::new(),
            stderr: "[killed: memory limit exceeded]".to_string(),
            execution_time_ms: 55,
            timed_out: false,
            memory_exceeded: true,
        };
        let outcome = judge(&run, "x", &config());
        assert!(!outcome.success);
        assert_eq!(outcome.error, MEMORY_LIMIT_EXCEEDED);
    }

    #[test]
    fn oversized_errors_are_truncated() {
        let long = "e".repeat(100_000);
        let truncated = truncate_error(&long, 8 * 1024);
        assert!(truncated.len() < 100_000);
        assert!(truncated.ends_with("[truncated]"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "é".repeat(10);
        let truncated = truncate_error(&s, 3);
        assert!(truncated.starts_with('é'));
        assert!(truncated.ends_with("[truncated]"));
    }
}

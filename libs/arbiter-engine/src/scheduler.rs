/// Execution Scheduler - Request Orchestration
///
/// **Responsibility:**
/// Validate a request, compile once when the language needs it, fan the
/// test cases out across the bounded worker pool, and return outcomes in
/// input order.
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (sandbox's job)
/// - How outputs are judged (harness's job)
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::aggregator;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::harness::{self, StagedProgram};
use crate::registry::LanguageRegistry;
use crate::sandbox::{self, SandboxOutput, SandboxRequest, Workspace};
use crate::types::{ExecutionOutcome, ExecutionRequest, GradingReport};

/// Guardrails against pathological inputs, applied before any spawn.
const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024; // 10MB

pub struct ExecutionScheduler {
    registry: Arc<LanguageRegistry>,
    config: EngineConfig,
    /// Global worker pool: one permit per simultaneously sandboxed process.
    slots: Arc<Semaphore>,
    /// Requests admitted (running or queued on the pool).
    pending: Arc<AtomicUsize>,
}

/// Releases the admission slot on every exit path.
struct AdmissionGuard {
    pending: Arc<AtomicUsize>,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ExecutionScheduler {
    pub fn new(registry: LanguageRegistry, config: EngineConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_executions.max(1)));
        Self {
            registry: Arc::new(registry),
            config,
            slots,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one grading request end to end.
    ///
    /// Program-level failures come back inside the report; only validation,
    /// admission and infrastructure failures are `Err`.
    #[instrument(
        skip(self, request),
        fields(
            language = %request.language,
            test_count = request.test_cases.len(),
            run_id = tracing::field::Empty,
        )
    )]
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<GradingReport, EngineError> {
        self.validate(request)?;
        let spec = self.registry.resolve(&request.language)?;

        // Admission control: bounded FIFO backlog on the worker pool.
        let already_pending = self.pending.fetch_add(1, Ordering::SeqCst);
        let _admission = AdmissionGuard {
            pending: Arc::clone(&self.pending),
        };
        if already_pending >= self.config.max_pending_requests {
            warn!(
                pending = already_pending + 1,
                limit = self.config.max_pending_requests,
                "rejecting request: backlog saturated"
            );
            return Err(EngineError::ServiceBusy {
                pending: already_pending + 1,
                limit: self.config.max_pending_requests,
            });
        }

        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        info!(%run_id, "starting grading run");

        let staged = if let Some(compile_argv) = spec.render_compile() {
            // Compile once; the build workspace carries the artifacts every
            // test run stages from and is removed when the request finishes.
            let build = Workspace::create()?;
            build.write_file(&spec.source_file, &request.code).await?;

            let compile = {
                let _slot = self.acquire_slot().await?;
                sandbox::run(&SandboxRequest {
                    argv: compile_argv,
                    workdir: build.path().to_path_buf(),
                    stdin: String::new(),
                    time_limit: Duration::from_secs(self.config.compile_time_limit_seconds),
                    memory_limit_mb: self.config.compile_memory_limit_mb,
                    max_output_bytes: self.config.max_output_bytes,
                })
                .await?
            };

            if !compile_succeeded(&compile) {
                info!(%run_id, exit_code = ?compile.exit_code, "compilation failed, short-circuiting all test cases");
                return Ok(self.compile_failure_report(request, &compile));
            }
            debug!(%run_id, compile_ms = compile.execution_time_ms, "compilation succeeded");
            StagedProgram::Compiled { build }
        } else {
            StagedProgram::Source {
                file_name: spec.source_file.clone(),
                code: request.code.clone(),
            }
        };

        let time_limit = Duration::from_secs(request.time_limit_seconds);
        let memory_limit_mb = request.memory_limit_mb;
        let per_request = Arc::new(Semaphore::new(self.config.per_request_parallelism.max(1)));

        let staged = &staged;
        let config = &self.config;
        let runs = request.test_cases.iter().enumerate().map(|(index, case)| {
            let per_request = Arc::clone(&per_request);
            async move {
                let _local = per_request
                    .acquire()
                    .await
                    .map_err(|_| EngineError::internal("per-request pool closed"))?;
                let _slot = self.acquire_slot().await?;
                debug!(%run_id, test_case = index + 1, "running test case");
                harness::run_test_case(spec, staged, case, time_limit, memory_limit_mb, config)
                    .await
            }
        });

        // join_all polls the runs concurrently and yields results in
        // submission order, so outcomes line up with the caller's test
        // cases regardless of completion order.
        let results: Vec<Result<ExecutionOutcome, EngineError>> = join_all(runs).await;
        let outcomes = results.into_iter().collect::<Result<Vec<_>, _>>()?;

        let report = aggregator::aggregate(outcomes);
        info!(
            %run_id,
            passed = report.passed_count,
            total = report.total_count,
            total_ms = report.total_execution_time_ms,
            "grading run complete"
        );
        Ok(report)
    }

    async fn acquire_slot(&self) -> Result<tokio::sync::SemaphorePermit<'_>, EngineError> {
        self.slots
            .acquire()
            .await
            .map_err(|_| EngineError::internal("worker pool closed"))
    }

    /// One uniform failed outcome per test case; no test is run.
    fn compile_failure_report(
        &self,
        request: &ExecutionRequest,
        compile: &SandboxOutput,
    ) -> GradingReport {
        let error = compile_error_text(compile, &self.config);
        let exit_code = compile.exit_code.unwrap_or(-1);
        let outcomes = request
            .test_cases
            .iter()
            .map(|_| ExecutionOutcome {
                success: false,
                output: String::new(),
                error: error.clone(),
                execution_time_ms: 0,
                exit_code,
            })
            .collect();
        aggregator::aggregate(outcomes)
    }

    fn validate(&self, request: &ExecutionRequest) -> Result<(), EngineError> {
        if request.code.trim().is_empty() {
            return Err(EngineError::Validation(
                "source code must not be empty".to_string(),
            ));
        }
        if request.code.len() > MAX_SOURCE_CODE_BYTES {
            return Err(EngineError::Validation(format!(
                "source code exceeds maximum size of {} bytes",
                MAX_SOURCE_CODE_BYTES
            )));
        }
        if request.test_cases.is_empty() {
            return Err(EngineError::Validation(
                "at least one test case is required".to_string(),
            ));
        }
        if request.time_limit_seconds == 0 {
            return Err(EngineError::Validation(
                "timeLimitSeconds must be positive".to_string(),
            ));
        }
        if request.memory_limit_mb == 0 {
            return Err(EngineError::Validation(
                "memoryLimitMB must be positive".to_string(),
            ));
        }
        for (index, case) in request.test_cases.iter().enumerate() {
            if case.input.len() > MAX_TEST_INPUT_BYTES {
                return Err(EngineError::Validation(format!(
                    "test case {} input exceeds maximum size of {} bytes",
                    index + 1,
                    MAX_TEST_INPUT_BYTES
                )));
            }
        }
        Ok(())
    }
}

fn compile_succeeded(compile: &SandboxOutput) -> bool {
    compile.exit_code == Some(0) && !compile.timed_out && !compile.memory_exceeded
}

fn compile_error_text(compile: &SandboxOutput, config: &EngineConfig) -> String {
    if compile.timed_out {
        return "Compilation timed out".to_string();
    }
    if !compile.stderr.trim().is_empty() {
        return harness::truncate_error(&compile.stderr, config.max_error_bytes);
    }
    if !compile.stdout.trim().is_empty() {
        // Some toolchains report diagnostics on stdout.
        return harness::truncate_error(&compile.stdout, config.max_error_bytes);
    }
    format!(
        "compilation failed with exit code {}",
        compile.exit_code.unwrap_or(-1)
    )
}

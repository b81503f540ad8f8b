// Health monitor: proves the toolchain and sandbox primitives are operative
// by pushing a known-good starter program through the full pipeline
// (registry -> scheduler -> sandbox -> harness). A failure marks the
// execution subsystem degraded, not the whole platform.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::scheduler::ExecutionScheduler;
use crate::types::{ExecutionRequest, TestCase};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub language: String,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

pub struct HealthMonitor {
    scheduler: Arc<ExecutionScheduler>,
}

impl HealthMonitor {
    pub fn new(scheduler: Arc<ExecutionScheduler>) -> Self {
        Self { scheduler }
    }

    /// Run the self-test once and report.
    pub async fn check(&self) -> HealthReport {
        let config = self.scheduler.config();
        let language = config.health_language.clone();
        let started = Instant::now();

        let spec = match self.scheduler.registry().resolve(&language) {
            Ok(spec) => spec,
            Err(e) => {
                return self.report(&language, started, Some(format!("{}", e)));
            }
        };

        let request = ExecutionRequest {
            code: spec.template.clone(),
            language: language.clone(),
            test_cases: vec![TestCase {
                input: String::new(),
                expected_output: config.health_expected_output.clone(),
                description: Some("health probe".to_string()),
            }],
            time_limit_seconds: config.health_time_limit_seconds,
            memory_limit_mb: config.health_memory_limit_mb,
        };

        let error = match self.scheduler.execute(&request).await {
            Ok(report) if report.passed_count == report.total_count => None,
            Ok(report) => {
                let detail = report
                    .outcomes
                    .first()
                    .map(|o| {
                        if o.error.is_empty() {
                            format!("unexpected output: {:?}", o.output)
                        } else {
                            o.error.clone()
                        }
                    })
                    .unwrap_or_else(|| "no outcome produced".to_string());
                Some(detail)
            }
            Err(e) => Some(e.to_string()),
        };

        self.report(&language, started, error)
    }

    /// Boolean surface for the platform's health endpoint.
    pub async fn healthy(&self) -> bool {
        self.check().await.healthy
    }

    fn report(&self, language: &str, started: Instant, error: Option<String>) -> HealthReport {
        let latency_ms = started.elapsed().as_millis() as u64;
        let healthy = error.is_none();
        if healthy {
            info!(language, latency_ms, "execution engine healthy");
        } else {
            warn!(
                language,
                latency_ms,
                error = error.as_deref().unwrap_or(""),
                "execution engine unhealthy"
            );
        }
        HealthReport {
            healthy,
            language: language.to_string(),
            latency_ms,
            error,
            checked_at: Utc::now(),
        }
    }
}

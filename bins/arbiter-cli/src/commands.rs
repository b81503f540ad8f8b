use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use arbiter_engine::{
    EngineConfig, EngineError, ExecutionRequest, ExecutionScheduler, HealthMonitor,
    LanguageRegistry,
};

const LANGUAGES_FILE: &str = "config/languages.json";

/// Registry from config/languages.json when present, built-ins otherwise.
fn load_registry() -> LanguageRegistry {
    let path = Path::new(LANGUAGES_FILE);
    if path.exists() {
        match LanguageRegistry::load_from_file(path) {
            Ok(registry) => return registry,
            Err(e) => {
                warn!(error = %e, "failed to load {}, falling back to built-ins", LANGUAGES_FILE);
            }
        }
    }
    LanguageRegistry::builtin()
}

pub async fn run(file: &str, json: bool, pool: Option<usize>) -> Result<()> {
    let payload = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read request file {}", file))?;
    let request: ExecutionRequest =
        serde_json::from_str(&payload).context("request file is not a valid ExecutionRequest")?;

    let mut config = EngineConfig::from_env();
    if let Some(pool) = pool {
        config.max_concurrent_executions = pool;
    }

    let scheduler = ExecutionScheduler::new(load_registry(), config);

    println!("→ Executing {} test cases", request.test_cases.len());
    println!("  Language: {}", request.language);
    println!("  Time limit per test: {}s", request.time_limit_seconds);
    println!("  Memory limit: {}MB", request.memory_limit_mb);
    println!();

    let report = match scheduler.execute(&request).await {
        Ok(report) => report,
        Err(e @ EngineError::ServiceBusy { .. }) => {
            eprintln!("✗ {}", e);
            eprintln!("  Retry once the backlog drains.");
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for (idx, outcome) in report.outcomes.iter().enumerate() {
        if outcome.success {
            println!("  ✓ Test {} passed ({}ms)", idx + 1, outcome.execution_time_ms);
        } else if outcome.error.is_empty() {
            println!(
                "  ✗ Test {} wrong answer ({}ms)",
                idx + 1,
                outcome.execution_time_ms
            );
            println!("    Got: \"{}\"", outcome.output.lines().next().unwrap_or(""));
        } else {
            println!(
                "  ✗ Test {} failed: {}",
                idx + 1,
                outcome.error.lines().next().unwrap_or("")
            );
        }
    }

    println!();
    println!(
        "→ {} / {} passed in {}ms",
        report.passed_count, report.total_count, report.total_execution_time_ms
    );

    Ok(())
}

pub fn languages(json: bool) -> Result<()> {
    let registry = load_registry();
    let specs = registry.list();

    if json {
        println!("{}", serde_json::to_string_pretty(&specs)?);
        return Ok(());
    }

    println!("→ {} supported languages", specs.len());
    for spec in specs {
        let mode = if spec.requires_compile() {
            "compiled"
        } else {
            "interpreted"
        };
        println!(
            "  {:<12} {} (.{}) [{}]",
            spec.id, spec.display_name, spec.file_extension, mode
        );
    }

    Ok(())
}

pub async fn health() -> Result<()> {
    let scheduler = Arc::new(ExecutionScheduler::new(
        load_registry(),
        EngineConfig::from_env(),
    ));
    let report = HealthMonitor::new(scheduler).check().await;

    if report.healthy {
        println!(
            "✓ Execution engine healthy ({}ms, language: {})",
            report.latency_ms, report.language
        );
        Ok(())
    } else {
        eprintln!(
            "✗ Execution engine unhealthy: {}",
            report.error.as_deref().unwrap_or("unknown failure")
        );
        std::process::exit(1);
    }
}

//! skillgate command-line binary.
//!
//! Runs one task: discovers provider manifests, registers the built-in
//! capabilities, and drives the orchestrator until it answers or fails.
//!
//! # Environment Variables
//!
//! - `SKILLS_DIR` - manifest roots, `PATH`-style (default: `./skills`)
//! - `LLM_BASE_URL` - OpenAI-compatible endpoint (default: DashScope compatible mode)
//! - `LLM_MODEL` - model identifier (default: `qwen-plus`)
//! - `LLM_API_KEY` - API credential (no default)
//! - `LLM_TEMPERATURE` - sampling temperature (default: 0.0)
//! - `SKILLGATE_BUILTINS` - register built-in capabilities (default: true)
//! - `RUST_LOG` - tracing filter (default: "info,skillgate=debug")
//!
//! # Exit codes
//!
//! - 0 - the task was answered
//! - 1 - the model gateway failed
//! - 2 - any other task failure
//! - 130 - interrupted

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use skillgate::agents::Orchestrator;
use skillgate::capabilities::CapabilityRegistry;
use skillgate::config::{Cli, Settings};
use skillgate::llms::OpenAiGateway;
use skillgate::manifests::ManifestStore;
use skillgate::mcp::McpConnector;
use skillgate::tools::builtin;
use skillgate::utilities::errors::FailureKind;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,skillgate=debug".into()),
        )
        .init();

    let settings = Settings::from_cli(Cli::parse());
    tracing::info!(
        "Starting: model={:?}, skill_roots={:?}, builtins={}, limits={:?}",
        settings.model,
        settings.skill_roots,
        settings.builtins,
        settings.orchestrator
    );

    let catalog = ManifestStore::new(settings.skill_roots.clone()).discover();
    tracing::info!(
        "Discovered {} providers ({} skipped, {} id collisions)",
        catalog.len(),
        catalog.skipped().len(),
        catalog.collisions().len()
    );

    let registry = Arc::new(
        CapabilityRegistry::new(Arc::new(catalog), Arc::new(McpConnector::new()))
            .with_load_timeout(settings.orchestrator.load_timeout),
    );
    if settings.builtins {
        builtin::register(&registry);
    }

    let gateway = Arc::new(OpenAiGateway::new(settings.model.clone())?);
    let orchestrator = Orchestrator::new(registry.clone(), gateway, settings.orchestrator.clone());

    let report = tokio::select! {
        report = orchestrator.run(&settings.task) => report,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted; closing provider connections");
            registry.shutdown().await;
            return Ok(ExitCode::from(130));
        }
    };

    registry.shutdown().await;

    if settings.transcript {
        eprintln!("{}", serde_json::to_string_pretty(&report)?);
    }

    let code = match report.failure() {
        None => {
            println!("{}", report.answer().unwrap_or_default());
            0
        }
        Some(failure) => {
            eprintln!("{}", failure);
            if failure.kind == FailureKind::ModelGateway {
                1
            } else {
                2
            }
        }
    };
    Ok(ExitCode::from(code))
}

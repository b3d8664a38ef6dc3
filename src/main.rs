//! AEGIS-CDS - Clinical Decision Support & Escalation Service
//!
//! Hybrid decision engine (rule guardrail + risk model + medication
//! patterns) with specialist escalation and live case events.
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (./aegis.toml or built-in config)
//! cargo run --release
//!
//! # Custom bind address and model artifact
//! cargo run --release -- --addr 0.0.0.0:9000 --model artifacts/risk_model.json
//! ```
//!
//! # Environment Variables
//!
//! - `AEGIS_CONFIG`: Path to a TOML configuration file
//! - `RUST_LOG`: Logging level (default: info)
//! - `RESET_DB`: Set to "true" to wipe all persistent data on startup (for testing)

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use aegis_cds::api::{create_app, ApiState};
use aegis_cds::bus::CaseEventBus;
use aegis_cds::config::{self, ServiceConfig};
use aegis_cds::engine::{DecisionEngine, MedicationEngine, RiskModel};
use aegis_cds::handover::HandoverGenerator;
use aegis_cds::store::CaseStore;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "aegis-cds")]
#[command(about = "AEGIS Clinical Decision Support & Escalation Service")]
#[command(version)]
struct CliArgs {
    /// Override the server bind address (default from config: "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Path to a TOML configuration file (overrides AEGIS_CONFIG)
    #[arg(long)]
    config: Option<String>,

    /// Override the data directory
    #[arg(long)]
    data_dir: Option<String>,

    /// Override the risk model artifact path
    #[arg(long)]
    model: Option<String>,

    /// Reset all persistent data (cases, assessments, audit) on startup.
    /// WARNING: This is destructive and cannot be undone!
    /// Can also be set via RESET_DB=true environment variable.
    #[arg(long)]
    reset_db: bool,
}

// ============================================================================
// Database Reset
// ============================================================================

/// Check if database reset is requested via CLI flag or environment variable.
fn should_reset_db(cli_flag: bool) -> bool {
    if cli_flag {
        return true;
    }
    if let Ok(val) = std::env::var("RESET_DB") {
        let val_lower = val.to_lowercase();
        return val_lower == "true" || val_lower == "1" || val_lower == "yes";
    }
    false
}

/// Safely remove the data directory and all its contents.
/// This is called BEFORE any storage initialization.
fn reset_data_directory(data_dir: &str) -> Result<()> {
    let data_path = Path::new(data_dir);
    if !data_path.exists() {
        info!("Data directory does not exist, nothing to reset");
        return Ok(());
    }

    warn!("RESET_DB DETECTED - WIPING ALL PERSISTENT DATA");
    warn!("  Removing: {}", data_path.display());
    std::fs::remove_dir_all(data_path).context("Failed to remove data directory")?;
    warn!("  Data directory removed; a fresh database will be created on startup");
    Ok(())
}

// ============================================================================
// Supervised Tasks
// ============================================================================

/// Task identification for supervisor logging
#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    Housekeeping,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::Housekeeping => write!(f, "Housekeeping"),
        }
    }
}

/// Housekeeping cadence
const HOUSEKEEPING_INTERVAL_SECS: u64 = 3_600;

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    info!("AEGIS-CDS - Clinical Decision Support & Escalation Service");

    // Load configuration (CLI --config takes precedence over AEGIS_CONFIG)
    let mut service_config = match &args.config {
        Some(path) => ServiceConfig::load_from_file(Path::new(path))
            .with_context(|| format!("Failed to load config from {path}"))?,
        None => ServiceConfig::load(),
    };
    if let Some(addr) = args.addr {
        service_config.server.addr = addr;
    }
    if let Some(data_dir) = args.data_dir {
        service_config.storage.data_dir = data_dir;
    }
    if let Some(model) = args.model {
        service_config.model.artifact_path = model;
    }

    // RESET_DB check must happen BEFORE any storage initialization
    if should_reset_db(args.reset_db) {
        reset_data_directory(&service_config.storage.data_dir)?;
    }

    config::init(service_config);
    let config = config::get();

    // Case store
    info!("Initializing case store...");
    let db_path = Path::new(&config.storage.data_dir).join("aegis.db");
    let store = Arc::new(CaseStore::open(&db_path).context("Failed to open case store")?);
    info!(path = %db_path.display(), "Case store ready");

    // Decision engine components
    info!("Loading risk model artifact...");
    let model = RiskModel::load(Path::new(&config.model.artifact_path));
    if !model.is_available() {
        warn!("Risk model unavailable — assessments will degrade to rule + medication analysis");
    }
    let engine = DecisionEngine::new(model, MedicationEngine::new(), config.engine.clone());

    // Handover generator
    let handover = Arc::new(HandoverGenerator::from_config(&config.handover));
    match &config.handover.service_url {
        Some(url) => info!(url = %url, "Handover text service configured (template fallback armed)"),
        None => info!("No handover text service configured — using deterministic template"),
    }

    // Case event bus
    let bus = Arc::new(CaseEventBus::new(config.events.channel_capacity));

    let state = ApiState {
        store: Arc::clone(&store),
        engine,
        handover,
        bus,
        started_at: Utc::now(),
    };
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.addr))?;
    info!(addr = %config.server.addr, "HTTP server listening");

    // Graceful shutdown wiring
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    // JoinSet supervisor pattern
    info!("Supervisor: initializing task monitoring");
    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    // Task 1: HTTP server
    let http_cancel = cancel_token.clone();
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                http_cancel.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });

    // Task 2: Housekeeping (flush, token sweep, audit retention)
    let housekeeping_cancel = cancel_token.clone();
    let housekeeping_store = Arc::clone(&store);
    let audit_retention_days = config.storage.audit_retention_days;
    task_set.spawn(async move {
        info!("[Housekeeping] Task starting (interval {HOUSEKEEPING_INTERVAL_SECS}s)");
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(HOUSEKEEPING_INTERVAL_SECS));
        interval.tick().await; // immediate first tick

        loop {
            tokio::select! {
                _ = housekeeping_cancel.cancelled() => {
                    info!("[Housekeeping] Received shutdown signal");
                    if let Err(e) = housekeeping_store.flush() {
                        warn!("[Housekeeping] Final flush failed: {}", e);
                    }
                    return Ok(TaskName::Housekeeping);
                }
                _ = interval.tick() => {
                    match housekeeping_store.sweep_expired_tokens() {
                        Ok(swept) if swept > 0 => info!("[Housekeeping] Swept {} dead token entries", swept),
                        Ok(_) => {}
                        Err(e) => warn!("[Housekeeping] Token sweep failed: {}", e),
                    }
                    match housekeeping_store.prune_audit(audit_retention_days) {
                        Ok(pruned) if pruned > 0 => info!("[Housekeeping] Pruned {} audit records", pruned),
                        Ok(_) => {}
                        Err(e) => warn!("[Housekeeping] Audit pruning failed: {}", e),
                    }
                    if let Err(e) = housekeeping_store.flush() {
                        warn!("[Housekeeping] Flush failed: {}", e);
                    }
                }
            }
        }
    });

    // Supervisor loop
    info!("Supervisor: all tasks spawned, monitoring...");
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    store.flush().ok();
    info!("AEGIS-CDS shutdown complete");
    Ok(())
}

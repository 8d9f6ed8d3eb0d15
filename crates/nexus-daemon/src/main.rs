//! nexus daemon
//!
//! Composition root: owns the runtime, arbiter, bus, worker and reflection
//! loop, and ties their lifetime to the process.

use anyhow::{Context, Result};
use clap::Parser;
use nexus_arbiter::Arbiter;
use nexus_bus::{MemoryBus, PgBus, TaskBus};
use nexus_core::{BusConfig, BusKind, LoggingConfig, NexusConfig, RuntimeKind};
use nexus_runtime::{InferenceRuntime, MemoryRuntime, OllamaRuntime};
use nexus_worker::{
    ArbitratedExecutor, ControlService, EchoBackend, Executor, ModelBackend, OllamaBackend,
    ReflectionLoop, SwarmWorker,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// nexus daemon - GPU-aware task worker for a local model swarm
#[derive(Parser, Debug)]
#[command(name = "nexusd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Checklist file for the reflection loop
    #[arg(long)]
    task_file: Option<PathBuf>,

    /// Log level (overrides the configuration file)
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if config.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_runtime(
    config: &NexusConfig,
) -> Result<(Arc<dyn InferenceRuntime>, Arc<dyn ModelBackend>)> {
    match config.runtime.kind {
        RuntimeKind::Ollama => {
            let ollama = Arc::new(
                OllamaRuntime::new(&config.runtime).context("Failed to create Ollama client")?,
            );
            if !ollama.health().await {
                warn!(
                    base_url = %config.runtime.base_url,
                    "Ollama is not answering; residency will read as empty until it is"
                );
            }
            let backend: Arc<dyn ModelBackend> = Arc::new(OllamaBackend::new(Arc::clone(&ollama)));
            let runtime: Arc<dyn InferenceRuntime> = ollama;
            Ok((runtime, backend))
        }
        RuntimeKind::Memory => {
            warn!("Using in-memory runtime; tasks are echoed, not executed");
            let runtime: Arc<dyn InferenceRuntime> = Arc::new(MemoryRuntime::new());
            let backend: Arc<dyn ModelBackend> = Arc::new(EchoBackend);
            Ok((runtime, backend))
        }
    }
}

async fn build_bus(config: &BusConfig) -> Result<Arc<dyn TaskBus>> {
    match config.kind {
        BusKind::Postgres => {
            let bus = PgBus::connect(config)
                .await
                .context("Failed to connect to the task bus")?;
            Ok(Arc::new(bus))
        }
        BusKind::Memory => {
            warn!("Using in-memory bus; only the reflection loop can reach the worker");
            Ok(Arc::new(MemoryBus::new(config)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NexusConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => NexusConfig::default(),
    };
    config.apply_env();
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.task_file.is_some() {
        config.reflection.task_file = args.task_file;
    }

    init_logging(&config.logging);
    info!("Starting nexus daemon v{}", env!("CARGO_PKG_VERSION"));

    let (runtime, backend) = build_runtime(&config).await?;
    info!(runtime = runtime.name(), "Inference runtime ready");

    let arbiter = Arc::new(Arbiter::new(runtime, config.arbiter.clone()));
    let bus = build_bus(&config.bus).await?;
    info!(bus = bus.name(), "Task bus ready");
    let executor: Arc<dyn Executor> =
        Arc::new(ArbitratedExecutor::new(Arc::clone(&arbiter), backend));

    let cancel = CancellationToken::new();
    let monitor = arbiter.spawn_monitor(cancel.child_token());

    let worker = Arc::new(SwarmWorker::new(
        Arc::clone(&bus),
        Arc::clone(&executor),
        &config.bus,
        &config.worker,
    ));
    let mut worker_handle = worker.spawn(cancel.child_token());

    let control = Arc::new(ControlService::new(
        Arc::clone(&arbiter),
        Arc::clone(&bus),
        &config.bus,
        &config.worker,
    ));
    let control_handle = control.spawn(cancel.child_token());

    let reflection = ReflectionLoop::new(Arc::clone(&executor), config.reflection.clone());
    if let Some(file) = &config.reflection.task_file {
        if let Err(e) = reflection.start(file).await {
            error!(file = %file.display(), error = %e, "Reflection loop not started");
        }
    }

    info!(
        tasks = %config.bus.task_channel,
        results = %config.bus.result_channel,
        control = %config.bus.control_channel,
        "nexus daemon running"
    );

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Shutdown requested");
        }
        finished = &mut worker_handle => {
            // The worker only returns on its own after a fatal error
            cancel.cancel();
            reflection.stop().await;
            let _ = control_handle.await;
            let _ = monitor.await;
            return match finished {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e).context("Swarm worker failed"),
                Err(e) => Err(e).context("Swarm worker panicked"),
            };
        }
    }

    cancel.cancel();
    reflection.stop().await;
    match worker_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Swarm worker ended with an error"),
        Err(e) => warn!(error = %e, "Swarm worker did not shut down cleanly"),
    }
    match control_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Control service ended with an error"),
        Err(e) => warn!(error = %e, "Control service did not shut down cleanly"),
    }
    if let Err(e) = monitor.await {
        warn!(error = %e, "Inactivity monitor did not shut down cleanly");
    }

    info!("nexus daemon stopped");
    Ok(())
}

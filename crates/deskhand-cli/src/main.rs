use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deskhand_config::{find_config_path, load_config, resolve_workspace, save_config, Config};
use deskhand_core::subagent::{ChannelBroadcaster, LogBroadcaster, SpawnResult, TaskOrchestrator};
use deskhand_core::tools::delegate::DelegateTool;
use deskhand_core::tools::shell::ShellExecutor;
use deskhand_core::{SpawnError, Tool};
use serde::Deserialize;
use tracing::info;

#[derive(Parser)]
#[command(name = "deskhand", about = "Sub-agent task runner", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sub-agent task and print its result
    Run {
        /// Shell command the sub-agent executes
        instructions: String,
        /// Data passed to the task on stdin
        #[arg(short, long)]
        input: Option<String>,
        /// Time limit in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },
    /// Run a JSON file of tasks concurrently
    Batch {
        /// JSON array of {"instructions", "input"?, "timeoutMs"?}
        file: PathBuf,
        /// Retry spawns refused at the concurrency limit after this many ms
        #[arg(long)]
        retry_ms: Option<u64>,
    },
    /// Call the delegate tool with JSON parameters
    Tool {
        /// e.g. '{"action": "spawn", "instructions": "ls"}'
        params: String,
    },
    /// Write a default config and create the workspace
    Onboard,
    /// Show configuration and limits
    Status,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchItem {
    instructions: String,
    #[serde(default)]
    input: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(find_config_path);

    if let Commands::Onboard = cli.command {
        init_tracing(&Config::default());
        return run_onboard(&config_path);
    }

    let config = load_config(&config_path)?;
    init_tracing(&config);

    match cli.command {
        Commands::Run {
            instructions,
            input,
            timeout_ms,
        } => {
            let orchestrator = build_orchestrator(&config)?;
            orchestrator.set_broadcaster(Arc::new(LogBroadcaster));
            let result = orchestrator
                .spawn_task(&instructions, input.as_deref(), timeout_ms)
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::Batch { file, retry_ms } => {
            let orchestrator = build_orchestrator(&config)?;
            run_batch(&orchestrator, &file, retry_ms.map(Duration::from_millis)).await?;
        }
        Commands::Tool { params } => {
            let params: serde_json::Value =
                serde_json::from_str(&params).context("tool parameters must be JSON")?;
            let orchestrator = build_orchestrator(&config)?;
            orchestrator.set_broadcaster(Arc::new(LogBroadcaster));
            let tool = DelegateTool::new(orchestrator);
            println!("{}", tool.execute(params).await?);
        }
        Commands::Status => run_status(&config_path, &config),
        Commands::Onboard => {}
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let base_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = if config.logging.filter.is_empty() {
        base_filter
    } else {
        format!("{base_filter},{}", config.logging.filter)
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

fn build_orchestrator(config: &Config) -> Result<Arc<TaskOrchestrator>> {
    let orchestrator = Arc::new(TaskOrchestrator::from_config(&config.orchestrator));

    let executor = ShellExecutor::from_config(&config.executor)?
        .with_max_runtime(orchestrator.limits().max_timeout);
    std::fs::create_dir_all(executor.working_dir()).with_context(|| {
        format!(
            "failed to create workspace '{}'",
            executor.working_dir().display()
        )
    })?;
    orchestrator.set_executor(Arc::new(executor));
    Ok(orchestrator)
}

async fn run_batch(
    orchestrator: &Arc<TaskOrchestrator>,
    file: &Path,
    retry: Option<Duration>,
) -> Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read batch file '{}'", file.display()))?;
    let items: Vec<BatchItem> = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse batch file '{}'", file.display()))?;
    info!("Running {} task(s) from {}", items.len(), file.display());

    let (broadcaster, mut updates) = ChannelBroadcaster::new();
    orchestrator.set_broadcaster(Arc::new(broadcaster));
    let printer = tokio::spawn(async move {
        while let Some(ctx) = updates.recv().await {
            println!("[{:>9}] {} {}", ctx.status, &ctx.id[..8], ctx.instructions);
        }
    });

    let results = futures::future::join_all(
        items
            .iter()
            .map(|item| spawn_with_retry(orchestrator, item, retry)),
    )
    .await;

    // Dropping the broadcaster closes the channel and ends the printer.
    orchestrator.clear_broadcaster();
    printer.await?;

    println!();
    for (item, result) in items.iter().zip(&results) {
        let outcome = match (&result.result, &result.error) {
            (Some(out), _) => out.trim().to_string(),
            (None, Some(err)) => err.clone(),
            (None, None) => String::new(),
        };
        let status = result
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "rejected".to_string());
        println!("{status:>9}  {}\n           {outcome}", item.instructions);
    }
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&orchestrator.get_summary())?
    );
    Ok(())
}

async fn spawn_with_retry(
    orchestrator: &TaskOrchestrator,
    item: &BatchItem,
    retry: Option<Duration>,
) -> SpawnResult {
    loop {
        let result = orchestrator
            .spawn_task(&item.instructions, item.input.as_deref(), item.timeout_ms)
            .await;
        match (&result.rejection, retry) {
            (Some(SpawnError::ConcurrencyLimit { .. }), Some(delay)) => {
                tokio::time::sleep(delay).await;
            }
            _ => return result,
        }
    }
}

fn run_onboard(config_path: &Path) -> Result<()> {
    let config = if config_path.exists() {
        println!("Config already exists: {}", config_path.display());
        println!("To reset, delete it and run `deskhand onboard` again.");
        load_config(config_path)?
    } else {
        let config = Config::default();
        save_config(config_path, &config)?;
        println!("Created config: {}", config_path.display());
        config
    };

    let workspace = resolve_workspace(&config.executor.workspace);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace '{}'", workspace.display()))?;
    println!("Workspace:      {}", workspace.display());
    Ok(())
}

fn run_status(config_path: &Path, config: &Config) {
    println!("deskhand status");
    println!();

    if config_path.exists() {
        println!("  Config:    {} (found)", config_path.display());
    } else {
        println!(
            "  Config:    {} (not found, using defaults; run `deskhand onboard`)",
            config_path.display()
        );
    }

    let workspace = resolve_workspace(&config.executor.workspace);
    if workspace.exists() {
        println!("  Workspace: {} (found)", workspace.display());
    } else {
        println!("  Workspace: {} (not found)", workspace.display());
    }
    println!(
        "  Workspace restriction: {}",
        if config.executor.restrict_to_workspace {
            "on"
        } else {
            "off"
        }
    );
    println!();

    let o = &config.orchestrator;
    println!("  Sub-agents:");
    println!("    Max concurrent:  {}", o.max_concurrent);
    println!("    Default timeout: {}ms", o.default_timeout_ms);
    println!(
        "    Timeout bounds:  {}ms .. {}ms",
        o.min_timeout_ms, o.max_timeout_ms
    );
}

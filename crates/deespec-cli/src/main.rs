//! The `deespec` binary: a thin `clap` adapter over `deespec-supervisor` —
//! parse flags, assemble the engine's collaborators, dispatch to the
//! library, print a summary. The full flag surface, policy precedence,
//! and doctor/archival subcommands are treated as external collaborators
//! and intentionally not built here.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deespec_agent::ProcessAgentInvoker;
use deespec_engine::EngineContext;
use deespec_retry::SupervisorConfig;
use deespec_types::Reporter;

#[derive(Parser, Debug)]
#[command(name = "deespec", version)]
#[command(about = "Drives Spec Backlog Items through plan/implement/test/review/done")]
struct Cli {
    /// Workspace root containing `.deespec/`. Defaults to walking up from
    /// the current directory to find one, falling back to `.`.
    #[arg(long)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the supervisor loop.
    Run {
        /// Run exactly one tick and exit. Deprecated: prefer a short
        /// `--interval` with an external scheduler for one-shot use.
        #[arg(long)]
        once: bool,
        /// Auto-register feedback drafts in the same tick that raised them.
        #[arg(long = "auto-fb")]
        auto_fb: bool,
        /// Base tick interval (e.g. `5s`, `1m`). Clamped to [1s, 10min].
        #[arg(long)]
        interval: Option<String>,
    },
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let workspace_root = resolve_workspace_root(cli.workspace)?;
    let config = deespec_cli::config::load_config(&workspace_root)?;

    match cli.cmd {
        Commands::Run { once, auto_fb, interval } => run_command(workspace_root, config, once, auto_fb, interval),
    }
}

fn resolve_workspace_root(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    Ok(deespec_cli::config::find_workspace_root(&cwd).unwrap_or(cwd))
}

fn run_command(
    workspace_root: PathBuf,
    config: deespec_cli::config::Config,
    once: bool,
    auto_fb: bool,
    interval: Option<String>,
) -> Result<()> {
    let workflow_path = deespec_cli::config::resolve_workflow_path(&workspace_root, &config)?;
    let workflow = deespec_workflow::load_workflow_file(&workflow_path)?;
    let warnings = deespec_workflow::validate(&workflow, &workspace_root)
        .map_err(|e| anyhow::anyhow!("workflow validation failed: {e}"))?;
    for w in &warnings.messages {
        tracing::warn!("{w}");
    }

    let interval = match interval {
        Some(raw) => humantime::parse_duration(&raw).with_context(|| format!("invalid --interval: {raw}"))?,
        None => config.supervisor.interval,
    };

    let sup_cfg = SupervisorConfig {
        auto_fb: auto_fb || config.supervisor.auto_fb,
        interval,
    };

    let ctx = EngineContext {
        workspace_root: workspace_root.clone(),
        workflow,
        agent_id: config.agent_id.clone(),
        agent_timeout: config.agent_timeout,
        project_name: config.project_name.clone(),
        language: config.language.clone(),
        auto_fb: sup_cfg.auto_fb,
    };

    let lock_path = ctx.var_dir().lock_path();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build the tokio runtime")?;

    let summary = runtime.block_on(deespec_supervisor::run(
        ctx,
        Arc::new(ProcessAgentInvoker) as Arc<dyn deespec_agent::AgentInvoker + Send + Sync>,
        lock_path,
        sup_cfg,
        CliReporter,
        once,
    ))?;

    println!(
        "ticks={} committed={} idle={} errors={}",
        summary.ticks, summary.committed, summary.idle, summary.errors
    );

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

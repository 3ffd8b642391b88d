//! The supervisor loop: drives [`deespec_engine::run_tick`] on a timer,
//! one host-wide process lock at a time, with exponential backoff on
//! consecutive errors and a prompt exit on shutdown signal.
//!
//! Structured as a load → act → report dispatch, wrapped in an async
//! scheduling shell built around a shutdown-signal and
//! tokio-channel-driven loop: a dedicated task turns `ctrl_c()` into a
//! typed event over an unbounded channel, and the main loop `select!`s
//! between that channel and its own sleep timer. Each tick's actual work
//! still runs synchronously inside `spawn_blocking`, since `deespec-engine`
//! and everything below it is plain `std::fs`/`std::process` — only this
//! crate touches `tokio`.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Context, Result};
use deespec_agent::AgentInvoker;
use deespec_engine::EngineContext;
use deespec_errors::ErrorClass;
use deespec_lock::ProcessLock;
use deespec_retry::{SupervisorConfig, backoff_interval, clamp_interval};
use deespec_types::Reporter;
use tokio::sync::mpsc;

/// How many ticks between aggregate progress summaries.
const REPORT_EVERY: u64 = 10;

#[derive(Debug, Clone, Copy)]
enum ShutdownEvent {
    Graceful,
    Immediate,
}

/// Totals accumulated across one supervisor run, for the CLI to print
/// once the loop returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub committed: u64,
    pub idle: u64,
    pub errors: u64,
}

/// Run the supervisor loop until one of:
/// - `once` is set and a single tick has completed,
/// - a tick's error classifies as [`ErrorClass::Critical`],
/// - the process receives a shutdown signal (Ctrl-C once for graceful,
///   twice for immediate).
///
/// Every tick attempts the process lock non-blockingly; a tick that loses
/// the race is skipped rather than queued.
pub async fn run<R>(
    ctx: EngineContext,
    agent: Arc<dyn AgentInvoker + Send + Sync>,
    lock_path: PathBuf,
    cfg: SupervisorConfig,
    mut reporter: R,
    once: bool,
) -> Result<RunSummary>
where
    R: Reporter + Send + 'static,
{
    let ctx = Arc::new(ctx);
    let bumps = Arc::new(AtomicU32::new(0));
    let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_ctrl_c_handler(bumps, shutdown_tx);

    let base_interval = clamp_interval(cfg.interval);
    let mut consecutive_errors: u32 = 0;
    let mut summary = RunSummary::default();

    tracing::info!(
        interval_secs = base_interval.as_secs(),
        auto_fb = cfg.auto_fb,
        once,
        "supervisor starting"
    );

    loop {
        let tick_outcome = match ProcessLock::try_acquire(&lock_path)? {
            None => {
                reporter.warn("process lock held elsewhere; skipping tick");
                tracing::warn!("lock contended; tick skipped");
                None
            }
            Some(lock) => {
                let ctx = ctx.clone();
                let agent = agent.clone();
                let (result, returned_reporter) = tokio::task::spawn_blocking(move || {
                    let mut reporter = reporter;
                    let outcome = deespec_engine::run_tick(&ctx, agent.as_ref(), &mut reporter);
                    (outcome, reporter)
                })
                .await
                .context("tick task panicked")?;
                reporter = returned_reporter;
                drop(lock);
                Some(result)
            }
        };

        summary.ticks += 1;

        let tick_error = match tick_outcome {
            None => None,
            Some(Err(e)) => Some(e.to_string()),
            Some(Ok(outcome)) => {
                if outcome.committed {
                    summary.committed += 1;
                } else {
                    summary.idle += 1;
                }
                if outcome.error.is_empty() { None } else { Some(outcome.error) }
            }
        };

        let critical = if let Some(msg) = &tick_error {
            summary.errors += 1;
            consecutive_errors += 1;
            let class = deespec_errors::classify(msg);
            reporter.error(&format!("tick error ({class:?}): {msg}"));
            tracing::error!(error = %msg, class = ?class, "tick failed");
            class == ErrorClass::Critical
        } else {
            consecutive_errors = 0;
            false
        };

        if summary.ticks % REPORT_EVERY == 0 {
            reporter.info(&format!(
                "ticks={} committed={} idle={} errors={}",
                summary.ticks, summary.committed, summary.idle, summary.errors
            ));
        }

        if critical {
            reporter.error("critical error classification; stopping supervisor");
            tracing::error!("stopping supervisor after critical error");
            break;
        }

        if once {
            break;
        }

        let interval = backoff_interval(base_interval, consecutive_errors);
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            event = shutdown_rx.recv() => {
                match event {
                    Some(ShutdownEvent::Graceful) => {
                        reporter.info("shutdown requested; finishing current cadence");
                        tracing::info!("graceful shutdown requested");
                        break;
                    }
                    Some(ShutdownEvent::Immediate) | None => {
                        reporter.warn("immediate shutdown requested");
                        tracing::warn!("immediate shutdown requested");
                        break;
                    }
                }
            }
        }
    }

    tracing::info!(
        ticks = summary.ticks,
        committed = summary.committed,
        idle = summary.idle,
        errors = summary.errors,
        "supervisor stopped"
    );
    Ok(summary)
}

/// First Ctrl-C asks the loop to finish its current cadence; a second
/// asks it to stop immediately, mirroring `client::shutdown`'s
/// `spawn_ctrl_c_handler`/`ShutdownController` pair.
fn spawn_ctrl_c_handler(bumps: Arc<AtomicU32>, tx: mpsc::UnboundedSender<ShutdownEvent>) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let n = bumps.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1 {
                let _ = tx.send(ShutdownEvent::Graceful);
            } else {
                let _ = tx.send(ShutdownEvent::Immediate);
                return;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use deespec_agent::AgentOutput;
    use deespec_types::reporter::RecordingReporter;
    use deespec_types::workflow::WorkflowDef;
    use std::time::Duration;

    struct EchoAgent;
    impl AgentInvoker for EchoAgent {
        fn invoke(&self, _agent_id: &str, _prompt: &str, _timeout: Duration) -> Result<AgentOutput> {
            Ok(AgentOutput {
                text: "ack".to_string(),
                timed_out: false,
                duration: Duration::from_millis(1),
                exit_code: 0,
            })
        }
    }

    fn empty_ctx(root: &std::path::Path) -> EngineContext {
        EngineContext {
            workspace_root: root.to_path_buf(),
            workflow: WorkflowDef {
                stages: vec![],
                max_prompt_kb: 100,
            },
            agent_id: "claude".to_string(),
            agent_timeout: Duration::from_secs(1),
            project_name: "demo".to_string(),
            language: "rust".to_string(),
            auto_fb: false,
        }
    }

    #[tokio::test]
    async fn once_mode_runs_exactly_one_tick_and_returns() {
        let td = tempfile::tempdir().expect("tempdir");
        let ctx = empty_ctx(td.path());
        let lock_path = td.path().join(".deespec/var/state.lock");
        let summary = run(
            ctx,
            Arc::new(EchoAgent),
            lock_path,
            SupervisorConfig {
                auto_fb: false,
                interval: Duration::from_secs(1),
            },
            RecordingReporter::default(),
            true,
        )
        .await
        .expect("run");

        assert_eq!(summary.ticks, 1);
        assert_eq!(summary.idle, 1);
        assert_eq!(summary.committed, 0);
    }

    #[tokio::test]
    async fn a_held_lock_is_skipped_rather_than_queued() {
        let td = tempfile::tempdir().expect("tempdir");
        let ctx = empty_ctx(td.path());
        let lock_path = td.path().join(".deespec/var/state.lock");
        let _held = ProcessLock::acquire(&lock_path).expect("acquire");

        let summary = run(
            ctx,
            Arc::new(EchoAgent),
            lock_path,
            SupervisorConfig {
                auto_fb: false,
                interval: Duration::from_secs(1),
            },
            RecordingReporter::default(),
            true,
        )
        .await
        .expect("run");

        assert_eq!(summary.ticks, 1);
        assert_eq!(summary.idle, 0);
        assert_eq!(summary.committed, 0);
    }
}

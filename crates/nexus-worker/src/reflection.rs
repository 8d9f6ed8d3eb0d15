//! Reflection loop: work through a checklist file on its own
//!
//! The loop polls a markdown checklist, dispatches the first unchecked item
//! to the executor and asks it to tick the item off when done.

use chrono::{DateTime, Utc};
use nexus_core::{NexusError, NexusResult, ReflectionConfig};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::checklist::ChecklistParser;
use crate::executor::Executor;

/// Reflection loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReflectionState {
    Idle,
    Monitoring,
    Executing,
    Cooldown,
    Error,
    Stopping,
    Stopped,
}

impl std::fmt::Display for ReflectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReflectionState::Idle => "idle",
            ReflectionState::Monitoring => "monitoring",
            ReflectionState::Executing => "executing",
            ReflectionState::Cooldown => "cooldown",
            ReflectionState::Error => "error",
            ReflectionState::Stopping => "stopping",
            ReflectionState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Snapshot of the loop
#[derive(Debug, Clone, Serialize)]
pub struct ReflectionStatus {
    pub running: bool,
    pub state: ReflectionState,
    /// Item currently being executed
    pub current_step: Option<String>,
    pub file: Option<PathBuf>,
    pub last_dispatch_at: Option<DateTime<Utc>>,
}

impl Default for ReflectionStatus {
    fn default() -> Self {
        Self {
            running: false,
            state: ReflectionState::Idle,
            current_step: None,
            file: None,
            last_dispatch_at: None,
        }
    }
}

type SharedStatus = Arc<Mutex<ReflectionStatus>>;

fn update(status: &SharedStatus, f: impl FnOnce(&mut ReflectionStatus)) {
    if let Ok(mut guard) = status.lock() {
        f(&mut guard);
    }
}

/// Owner of the single monitor task.
///
/// `start` refuses to run a second monitor. `stop` is idempotent.
pub struct ReflectionLoop {
    executor: Arc<dyn Executor>,
    config: ReflectionConfig,
    status: SharedStatus,
    monitor: AsyncMutex<Option<JoinHandle<()>>>,
}

impl ReflectionLoop {
    pub fn new(executor: Arc<dyn Executor>, config: ReflectionConfig) -> Self {
        Self {
            executor,
            config,
            status: Arc::new(Mutex::new(ReflectionStatus::default())),
            monitor: AsyncMutex::new(None),
        }
    }

    /// Current status
    pub fn status(&self) -> ReflectionStatus {
        self.status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Start monitoring a checklist file
    pub async fn start(&self, file: impl Into<PathBuf>) -> NexusResult<()> {
        let file = file.into();
        let mut monitor = self.monitor.lock().await;

        if monitor.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(NexusError::AlreadyRunning("reflection loop".to_string()));
        }
        if !file.exists() {
            return Err(NexusError::FileNotFound(file));
        }

        update(&self.status, |s| {
            s.running = true;
            s.state = ReflectionState::Monitoring;
            s.current_step = None;
            s.file = Some(file.clone());
        });

        let task = Monitor {
            executor: Arc::clone(&self.executor),
            status: Arc::clone(&self.status),
            parser: ChecklistParser::new(),
            file: file.clone(),
            poll_interval: Duration::from_secs(self.config.poll_interval_secs),
            cooldown: Duration::from_secs(self.config.cooldown_secs),
            error_backoff: Duration::from_secs(self.config.error_backoff_secs),
        };
        *monitor = Some(tokio::spawn(task.run()));

        info!(file = %file.display(), "Reflection loop started");
        Ok(())
    }

    /// Stop the monitor and wait for it to finish
    pub async fn stop(&self) -> ReflectionStatus {
        let mut monitor = self.monitor.lock().await;

        if let Some(handle) = monitor.take() {
            update(&self.status, |s| {
                s.running = false;
                s.state = ReflectionState::Stopping;
            });
            handle.abort();
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => debug!("Reflection monitor cancelled"),
                Err(e) => warn!(error = %e, "Reflection monitor ended abnormally"),
            }
            info!("Reflection loop stopped");
        }

        update(&self.status, |s| {
            s.running = false;
            s.state = ReflectionState::Stopped;
            s.current_step = None;
        });
        self.status()
    }
}

struct Monitor {
    executor: Arc<dyn Executor>,
    status: SharedStatus,
    parser: ChecklistParser,
    file: PathBuf,
    poll_interval: Duration,
    cooldown: Duration,
    error_backoff: Duration,
}

impl Monitor {
    async fn run(self) {
        loop {
            update(&self.status, |s| s.state = ReflectionState::Monitoring);

            let pause = match self.step().await {
                Ok(true) => {
                    update(&self.status, |s| {
                        s.state = ReflectionState::Cooldown;
                        s.current_step = None;
                    });
                    self.cooldown
                }
                Ok(false) => self.poll_interval,
                Err(e) => {
                    error!(file = %self.file.display(), error = %e, "Reflection iteration failed");
                    update(&self.status, |s| {
                        s.state = ReflectionState::Error;
                        s.current_step = None;
                    });
                    self.error_backoff
                }
            };

            tokio::time::sleep(pause).await;
        }
    }

    /// Dispatch the next pending item, if any
    async fn step(&self) -> NexusResult<bool> {
        let document = tokio::fs::read_to_string(&self.file).await?;
        let Some(item) = self.parser.next_pending_in(&document) else {
            debug!(file = %self.file.display(), "No pending items");
            return Ok(false);
        };

        info!(step = %item, "Dispatching checklist item");
        update(&self.status, |s| {
            s.state = ReflectionState::Executing;
            s.current_step = Some(item.clone());
            s.last_dispatch_at = Some(Utc::now());
        });

        let output = self.executor.execute(&dispatch_prompt(&item, &self.file)).await?;
        debug!(step = %item, bytes = output.len(), "Checklist item finished");
        Ok(true)
    }
}

/// Task text for a checklist item, including the instruction to tick it off
pub fn dispatch_prompt(item: &str, file: &Path) -> String {
    format!(
        "{}\n\nWhen you are done, mark this item as completed by changing its \"- [ ]\" to \"- [x]\" in {}.",
        item,
        file.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::NamedTempFile;
    use tokio::sync::{mpsc, Notify};
    use tokio::time::Instant;

    /// Forwards each prompt, waits for `release` if one is given, then fails
    /// while `failures` is above zero
    struct RecordingExecutor {
        prompts: mpsc::UnboundedSender<String>,
        release: Option<Arc<Notify>>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl Executor for RecordingExecutor {
        async fn execute(&self, task: &str) -> NexusResult<String> {
            let _ = self.prompts.send(task.to_string());
            if let Some(release) = &self.release {
                release.notified().await;
            }
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(NexusError::Executor("agent crashed".to_string()));
            }
            Ok("ok".to_string())
        }
    }

    fn checklist(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn reflection(
        release: Option<Arc<Notify>>,
        failures: usize,
    ) -> (ReflectionLoop, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let executor = RecordingExecutor {
            prompts: tx,
            release,
            failures: AtomicUsize::new(failures),
        };
        (
            ReflectionLoop::new(Arc::new(executor), ReflectionConfig::default()),
            rx,
        )
    }

    async fn next_prompt(prompts: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(60), prompts.recv())
            .await
            .expect("timed out waiting for a dispatch")
            .expect("executor dropped")
    }

    async fn wait_for_state(reflection: &ReflectionLoop, state: ReflectionState) {
        for _ in 0..200 {
            if reflection.status().state == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("never reached {}", state);
    }

    #[tokio::test]
    async fn test_dispatches_first_pending_item() {
        let file = checklist("- [x] done\n- [ ] next <!-- id:2 -->\n- [ ] later\n");
        let (reflection, mut prompts) = reflection(None, 0);

        reflection.start(file.path()).await.unwrap();
        let prompt = tokio::time::timeout(Duration::from_secs(5), prompts.recv())
            .await
            .unwrap()
            .unwrap();

        assert!(prompt.starts_with("next\n"));
        assert!(prompt.contains(&file.path().display().to_string()));

        wait_for_state(&reflection, ReflectionState::Cooldown).await;
        let status = reflection.status();
        assert!(status.running);
        assert!(status.last_dispatch_at.is_some());

        assert_eq!(reflection.stop().await.state, ReflectionState::Stopped);
    }

    #[tokio::test]
    async fn test_tracks_current_step_while_executing() {
        let file = checklist("- [ ] deploy the bot\n");
        let release = Arc::new(Notify::new());
        let (reflection, mut prompts) = reflection(Some(release.clone()), 0);

        reflection.start(file.path()).await.unwrap();
        prompts.recv().await.unwrap();

        let status = reflection.status();
        assert_eq!(status.state, ReflectionState::Executing);
        assert_eq!(status.current_step.as_deref(), Some("deploy the bot"));

        // Stop while the executor is still busy
        let stopped = reflection.stop().await;
        assert!(!stopped.running);
        assert_eq!(stopped.state, ReflectionState::Stopped);
        assert!(stopped.current_step.is_none());
    }

    #[tokio::test]
    async fn test_executor_failure_enters_error_state() {
        let file = checklist("- [ ] break things\n");
        let (reflection, _prompts) = reflection(None, usize::MAX);

        reflection.start(file.path()).await.unwrap();
        wait_for_state(&reflection, ReflectionState::Error).await;
        assert!(reflection.status().running);

        reflection.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_backs_off_then_redispatches() {
        let file = checklist("- [ ] flaky step\n");
        let (reflection, mut prompts) = reflection(None, 1);
        let backoff = Duration::from_secs(ReflectionConfig::default().error_backoff_secs);

        reflection.start(file.path()).await.unwrap();
        next_prompt(&mut prompts).await;
        let failed_at = Instant::now();
        wait_for_state(&reflection, ReflectionState::Error).await;

        tokio::time::sleep(backoff / 2).await;
        assert_eq!(reflection.status().state, ReflectionState::Error);

        let retried = next_prompt(&mut prompts).await;
        assert!(retried.starts_with("flaky step\n"));
        assert!(failed_at.elapsed() >= backoff);

        wait_for_state(&reflection, ReflectionState::Cooldown).await;
        reflection.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_returns_to_monitoring() {
        // The executor never ticks the item, so it is dispatched again
        let file = checklist("- [ ] sticky step\n");
        let (reflection, mut prompts) = reflection(None, 0);
        let config = ReflectionConfig::default();
        let cooldown = Duration::from_secs(config.cooldown_secs);
        let poll = Duration::from_secs(config.poll_interval_secs);

        reflection.start(file.path()).await.unwrap();
        next_prompt(&mut prompts).await;
        let dispatched_at = Instant::now();
        wait_for_state(&reflection, ReflectionState::Cooldown).await;

        tokio::time::sleep(cooldown / 2).await;
        assert_eq!(reflection.status().state, ReflectionState::Cooldown);

        next_prompt(&mut prompts).await;
        let elapsed = dispatched_at.elapsed();
        assert!(elapsed >= cooldown);
        assert!(elapsed < poll);

        reflection.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_new_item_when_none_pending() {
        let file = checklist("- [x] all done\n");
        let (reflection, mut prompts) = reflection(None, 0);
        let poll = Duration::from_secs(ReflectionConfig::default().poll_interval_secs);

        reflection.start(file.path()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(reflection.status().state, ReflectionState::Monitoring);
        assert!(reflection.status().current_step.is_none());
        assert!(prompts.try_recv().is_err());

        std::fs::write(file.path(), "- [x] all done\n- [ ] new work\n").unwrap();
        let written_at = Instant::now();

        let prompt = next_prompt(&mut prompts).await;
        assert!(prompt.starts_with("new work\n"));
        assert!(written_at.elapsed() <= poll);

        reflection.stop().await;
    }

    #[tokio::test]
    async fn test_start_rejects_second_loop() {
        let file = checklist("- [x] all done\n");
        let (reflection, _prompts) = reflection(None, 0);

        reflection.start(file.path()).await.unwrap();
        let err = reflection.start(file.path()).await.unwrap_err();
        assert!(matches!(err, NexusError::AlreadyRunning(_)));

        reflection.stop().await;
        reflection.start(file.path()).await.unwrap();
        reflection.stop().await;
    }

    #[tokio::test]
    async fn test_start_missing_file() {
        let (reflection, _prompts) = reflection(None, 0);
        let err = reflection
            .start("/definitely/not/here/task.md")
            .await
            .unwrap_err();
        assert!(matches!(err, NexusError::FileNotFound(_)));
        assert_eq!(reflection.status().state, ReflectionState::Idle);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (reflection, _prompts) = reflection(None, 0);

        assert_eq!(reflection.stop().await.state, ReflectionState::Stopped);
        assert_eq!(reflection.stop().await.state, ReflectionState::Stopped);
    }
}

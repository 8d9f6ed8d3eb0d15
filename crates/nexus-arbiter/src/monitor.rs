//! Background inactivity monitor

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::arbiter::Arbiter;

impl Arbiter {
    /// Spawn the inactivity monitor on the current runtime
    pub fn spawn_monitor(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let arbiter = Arc::clone(self);
        tokio::spawn(async move { arbiter.run_monitor(cancel).await })
    }

    /// Check the activity clock every `monitor_interval` until cancelled
    pub async fn run_monitor(&self, cancel: CancellationToken) {
        let period = self.config().monitor_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = period.as_secs(),
            timeout_secs = self.config().inactivity_timeout_secs,
            "Inactivity monitor started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Inactivity monitor stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.check_inactivity().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::{ArbiterConfig, Mode};
    use nexus_runtime::MemoryRuntime;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_monitor_enters_sentry_after_timeout() {
        let runtime = Arc::new(MemoryRuntime::with_resident(["qwen3:8b", "llama3.2:1b"]));
        let config = ArbiterConfig {
            unload_settle_ms: 0,
            ..ArbiterConfig::default()
        };
        let arbiter = Arc::new(Arbiter::new(runtime.clone(), config));
        let cancel = CancellationToken::new();
        let handle = arbiter.spawn_monitor(cancel.clone());

        tokio::time::sleep(Duration::from_secs(295)).await;
        assert_eq!(arbiter.mode(), Mode::Active);

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(arbiter.mode(), Mode::Sentry);
        assert_eq!(runtime.resident_names().await, vec!["llama3.2:1b"]);

        cancel.cancel();
        handle.await.unwrap();
    }
}

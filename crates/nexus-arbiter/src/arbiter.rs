//! GPU-memory admission and hibernation

use chrono::{DateTime, Utc};
use nexus_core::{ArbiterConfig, Mode, ModelHandle, Tier};
use nexus_runtime::InferenceRuntime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::classifier::{KeywordClassifier, TaskClassifier};
use crate::clock::ActivityClock;
use crate::residency::ResidencySet;

/// Point-in-time view of the arbiter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterStatus {
    pub mode: Mode,
    pub resident: Vec<String>,
    pub idle_secs: u64,
    pub last_activity_at: DateTime<Utc>,
    pub estimated_resident_bytes: u64,
    pub memory_budget_bytes: u64,
    pub primary_model: String,
    pub sentinel_model: String,
}

/// Arbiter owns the GPU-memory budget and decides what is resident.
///
/// Every call that changes residency goes through `admission`, so evictions
/// and loads from concurrent callers never interleave. Runtime failures are
/// logged and treated as "nothing resident" / no-op.
pub struct Arbiter {
    runtime: Arc<dyn InferenceRuntime>,
    classifier: Arc<dyn TaskClassifier>,
    config: ArbiterConfig,
    primary: ModelHandle,
    sentinel: ModelHandle,
    admission: Mutex<()>,
    clock: ActivityClock,
    unload_settle: Duration,
}

impl Arbiter {
    /// Create an arbiter with the keyword classifier from config
    pub fn new(runtime: Arc<dyn InferenceRuntime>, config: ArbiterConfig) -> Self {
        let classifier =
            KeywordClassifier::default().extend(config.extra_heavy_keywords.iter());
        Self::with_classifier(runtime, config, Arc::new(classifier))
    }

    /// Create an arbiter with a custom classifier
    pub fn with_classifier(
        runtime: Arc<dyn InferenceRuntime>,
        config: ArbiterConfig,
        classifier: Arc<dyn TaskClassifier>,
    ) -> Self {
        let mut primary = config.handle_for(&config.primary_model, Tier::Heavy);
        primary.retention = Duration::from_secs(config.heavy_retention_secs);
        let mut sentinel = config.handle_for(&config.sentinel_model, Tier::Light);
        sentinel.retention = Duration::from_secs(config.sentinel_retention_secs);

        info!(
            runtime = runtime.name(),
            primary = %primary.name,
            sentinel = %sentinel.name,
            budget_gb = config.memory_budget_gb,
            timeout_secs = config.inactivity_timeout_secs,
            "Arbiter initialized"
        );

        Self {
            runtime,
            classifier,
            unload_settle: Duration::from_millis(config.unload_settle_ms),
            config,
            primary,
            sentinel,
            admission: Mutex::new(()),
            clock: ActivityClock::new(),
        }
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    pub fn sentinel(&self) -> &ModelHandle {
        &self.sentinel
    }

    pub fn mode(&self) -> Mode {
        self.clock.mode()
    }

    /// Reset the activity clock, leaving sentry mode if needed.
    ///
    /// Nothing is loaded here; the next `prepare_for_task` does that.
    pub fn update_activity(&self) {
        if self.clock.touch() {
            info!("Activity detected, leaving sentry mode");
        }
    }

    /// Make sure the model a task needs is resident and return it.
    ///
    /// Light tasks get the sentinel without forcing a load.
    pub async fn prepare_for_task(&self, text: &str) -> ModelHandle {
        self.update_activity();

        match self.classifier.classify(text) {
            Tier::Light => {
                debug!(model = %self.sentinel.name, "Light task, using sentinel");
                self.sentinel.clone()
            }
            Tier::Heavy => {
                let _admission = self.admission.lock().await;
                let resident = self.fetch_resident().await;

                if !resident.contains(&self.primary.name) {
                    let footprint = resident.estimated_bytes(&self.config);
                    let budget = self.config.memory_budget_bytes();
                    if footprint + self.primary.estimated_memory > budget {
                        warn!(
                            footprint,
                            needed = self.primary.estimated_memory,
                            budget,
                            "Memory budget exceeded, evicting before load"
                        );
                        let keep = vec![self.primary.name.clone(), self.sentinel.name.clone()];
                        self.evict(&resident, &keep).await;
                    }

                    info!(model = %self.primary.name, "Heavy task, waking primary model");
                    if let Err(e) = self
                        .runtime
                        .load(&self.primary.name, self.primary.retention)
                        .await
                    {
                        warn!(model = %self.primary.name, error = %e, "Failed to load model");
                    }
                }

                self.primary.clone()
            }
        }
    }

    /// Evict every inference model so an image/video job gets the whole card
    pub async fn prepare_for_generation(&self) -> Vec<String> {
        info!("Generation requested, clearing GPU memory");
        let evicted = self.unload_all_except(&[]).await;
        info!(evicted = evicted.len(), "GPU memory cleared for generation");
        evicted
    }

    /// Evict everything but the sentinel and pin the sentinel.
    ///
    /// Returns the names that were unloaded.
    pub async fn enter_sentry_mode(&self) -> Vec<String> {
        let generation = self.clock.generation();
        info!("Entering sentry mode");

        let evicted = {
            let _admission = self.admission.lock().await;
            let resident = self.fetch_resident().await;
            let evicted = self.evict(&resident, &[self.sentinel.name.clone()]).await;

            if let Err(e) = self
                .runtime
                .load(&self.sentinel.name, self.sentinel.retention)
                .await
            {
                warn!(model = %self.sentinel.name, error = %e, "Failed to pin sentinel");
            }
            evicted
        };

        if self.clock.enter_sentry_since(generation) {
            info!(sentinel = %self.sentinel.name, "Sentry mode active");
        } else {
            info!("Activity during hibernation, staying active");
        }
        evicted
    }

    /// Unload every resident model whose name does not start with a keep entry.
    ///
    /// Returns the names that were actually unloaded.
    pub async fn unload_all_except(&self, keep: &[String]) -> Vec<String> {
        let _admission = self.admission.lock().await;
        let resident = self.fetch_resident().await;
        self.evict(&resident, keep).await
    }

    /// Switch to sentry if idle past the timeout. Returns true on transition.
    pub async fn check_inactivity(&self) -> bool {
        if self.clock.mode() == Mode::Sentry {
            return false;
        }

        let idle = self.clock.idle_for();
        if idle <= self.config.inactivity_timeout() {
            return false;
        }

        info!(idle_secs = idle.as_secs(), "Inactivity detected");
        let _ = self.enter_sentry_mode().await;
        self.clock.mode() == Mode::Sentry
    }

    pub async fn status(&self) -> ArbiterStatus {
        let resident = self.fetch_resident().await;
        let idle = self.clock.idle_for();
        let idle_chrono =
            chrono::Duration::from_std(idle).unwrap_or_else(|_| chrono::Duration::zero());

        ArbiterStatus {
            mode: self.clock.mode(),
            resident: resident.names(),
            idle_secs: idle.as_secs(),
            last_activity_at: Utc::now() - idle_chrono,
            estimated_resident_bytes: resident.estimated_bytes(&self.config),
            memory_budget_bytes: self.config.memory_budget_bytes(),
            primary_model: self.primary.name.clone(),
            sentinel_model: self.sentinel.name.clone(),
        }
    }

    async fn fetch_resident(&self) -> ResidencySet {
        match self.runtime.list_resident().await {
            Ok(models) => ResidencySet::new(models),
            Err(e) => {
                warn!(error = %e, "Failed to fetch resident models, assuming none");
                ResidencySet::empty()
            }
        }
    }

    /// Caller must hold `admission`. One failed unload does not stop the rest.
    async fn evict(&self, resident: &ResidencySet, keep: &[String]) -> Vec<String> {
        let mut evicted = Vec::new();

        for name in resident.evictions(keep) {
            match self.runtime.unload(&name).await {
                Ok(()) => {
                    evicted.push(name);
                    if !self.unload_settle.is_zero() {
                        tokio::time::sleep(self.unload_settle).await;
                    }
                }
                Err(e) => {
                    warn!(model = %name, error = %e, "Failed to unload model");
                }
            }
        }

        evicted
    }
}

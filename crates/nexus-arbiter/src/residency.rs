//! Snapshot of the models the runtime reports as resident

use nexus_core::{ArbiterConfig, ResidentModel, Tier};

/// Whether a resident name is covered by a keep list (prefix match)
pub fn is_kept<S: AsRef<str>>(name: &str, keep: &[S]) -> bool {
    keep.iter().any(|k| name.starts_with(k.as_ref()))
}

/// Resident set as fetched from the runtime.
///
/// Never cached across decisions: fetch a fresh one before each mutation.
#[derive(Debug, Clone, Default)]
pub struct ResidencySet {
    models: Vec<ResidentModel>,
}

impl ResidencySet {
    pub fn new(models: Vec<ResidentModel>) -> Self {
        Self { models }
    }

    /// Empty set, used when the runtime cannot be reached
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Resident names in runtime order
    pub fn names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name.clone()).collect()
    }

    /// Whether a model (or a tagged variant of it) is resident
    pub fn contains(&self, model: &str) -> bool {
        self.models.iter().any(|m| is_kept(&m.name, &[model]))
    }

    /// Names that must be unloaded to honour `keep`
    pub fn evictions(&self, keep: &[String]) -> Vec<String> {
        self.models
            .iter()
            .filter(|m| !is_kept(&m.name, keep))
            .map(|m| m.name.clone())
            .collect()
    }

    /// Estimated footprint in bytes.
    ///
    /// Uses the runtime's own size report when present, the catalog
    /// estimate otherwise.
    pub fn estimated_bytes(&self, config: &ArbiterConfig) -> u64 {
        self.models
            .iter()
            .map(|m| {
                m.size_vram
                    .unwrap_or_else(|| config.handle_for(&m.name, Tier::Light).estimated_memory)
            })
            .sum()
    }
}

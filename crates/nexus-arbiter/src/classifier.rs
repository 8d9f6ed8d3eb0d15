//! Task classification into model tiers

use nexus_core::Tier;

/// Words that mark a task as needing the primary model
pub const DEFAULT_HEAVY_KEYWORDS: &[&str] = &[
    "code",
    "write",
    "architect",
    "deepseek",
    "deep seek",
    "qwen",
    "research",
    "solve",
    "sell",
    "fix",
    "build",
    "math",
    "image",
    "generate",
    "comfyui",
    "render",
];

/// Strategy for deciding which tier a task needs
pub trait TaskClassifier: Send + Sync {
    /// Classify task text. Must be pure: same text, same tier.
    fn classify(&self, text: &str) -> Tier;
}

/// Case-insensitive substring match against a keyword set.
///
/// Anything that matches no keyword (including empty text) is light.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    keywords: Vec<String>,
}

impl KeywordClassifier {
    /// Classifier with an explicit keyword set
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Add keywords on top of the current set
    pub fn extend<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keywords.extend(
            extra
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty()),
        );
        self
    }

    /// First keyword found in `text`, if any
    pub fn matched_keyword(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        self.keywords
            .iter()
            .find(|k| lowered.contains(k.as_str()))
            .map(String::as_str)
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_HEAVY_KEYWORDS)
    }
}

impl TaskClassifier for KeywordClassifier {
    fn classify(&self, text: &str) -> Tier {
        if self.matched_keyword(text).is_some() {
            Tier::Heavy
        } else {
            Tier::Light
        }
    }
}

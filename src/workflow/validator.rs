//! Profile/intent mismatch detection
//!
//! Before a run starts, the task description is classified and its scope
//! and complexity estimated. When the requested profile was not designed
//! for the detected intent, the validator recommends the smallest profile
//! that was.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::profile::ProfileCatalog;
use crate::config::ValidatorConfig;
use crate::intent::{Classifier, Intent};

/// Scope and complexity estimation for task descriptions.
///
/// Implementations must be monotonic: mentioning more files never lowers
/// the scope, and longer or more keyword-dense text never lowers the
/// complexity.
pub trait Estimator: Send + Sync {
    /// Estimated number of files touched (≥ 1)
    fn scope(&self, text: &str) -> u32;

    /// Estimated complexity level (≥ 1)
    fn complexity(&self, text: &str) -> u32;
}

/// Knobs for the heuristic estimator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Words of description per complexity level
    #[serde(default = "default_words_per_level")]
    pub words_per_level: u32,
    /// Complexity added per complexity keyword
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: u32,
    /// Highest complexity level
    #[serde(default = "default_max_complexity")]
    pub max_complexity: u32,
}

fn default_words_per_level() -> u32 {
    40
}

fn default_keyword_weight() -> u32 {
    1
}

fn default_max_complexity() -> u32 {
    5
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            words_per_level: default_words_per_level(),
            keyword_weight: default_keyword_weight(),
            max_complexity: default_max_complexity(),
        }
    }
}

static FILE_MENTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b[\w./-]*\w\.(rs|ts|tsx|js|jsx|py|go|java|kt|swift|c|h|cc|cpp|hpp|cs|rb|php|md|toml|ya?ml|json|sh|sql|html|css|scss|vue)\b",
    )
    .expect("file mention pattern")
});

static FILE_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,4})\s+(files|modules|crates|packages)\b").expect("file count pattern"));

static COMPLEXITY_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(architecture|architectural|migrat\w*|concurren\w*|distributed|redesign|rewrite|across|system-wide|security|performance|schema|protocol|async)\b",
    )
    .expect("complexity keyword pattern")
});

/// File-count and length/keyword heuristic.
///
/// - scope = max(1 + distinct file mentions, largest "N files" count)
/// - complexity = 1 + words / `words_per_level` + `keyword_weight` × keywords,
///   clamped to `[1, max_complexity]`
#[derive(Debug, Clone, Default)]
pub struct HeuristicEstimator {
    config: EstimatorConfig,
}

impl HeuristicEstimator {
    /// Create an estimator with the given knobs
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }
}

impl Estimator for HeuristicEstimator {
    fn scope(&self, text: &str) -> u32 {
        let mentioned: HashSet<String> = FILE_MENTION
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect();
        let from_mentions = 1 + mentioned.len() as u32;

        let from_counts = FILE_COUNT
            .captures_iter(text)
            .filter_map(|c| c.get(1)?.as_str().parse::<u32>().ok())
            .max()
            .unwrap_or(0);

        from_mentions.max(from_counts)
    }

    fn complexity(&self, text: &str) -> u32 {
        let words = text.split_whitespace().count() as u32;
        let keywords = COMPLEXITY_KEYWORD.find_iter(text).count() as u32;
        let per_level = self.config.words_per_level.max(1);

        let raw = 1u32
            .saturating_add(words / per_level)
            .saturating_add(self.config.keyword_weight.saturating_mul(keywords));

        raw.clamp(1, self.config.max_complexity.max(1))
    }
}

/// Recommendation to switch profiles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MismatchWarning {
    /// Intent the classifier detected
    pub detected_intent: Intent,
    /// Estimated files touched
    pub detected_scope: u32,
    /// Estimated complexity level
    pub detected_complexity: u32,
    /// Profile that was asked for
    pub requested_profile: String,
    /// Profile that fits better
    pub recommended_profile: String,
    /// Classifier confidence
    pub confidence: f64,
    /// Human-readable explanation
    pub reason: String,
    /// Estimated minutes saved by switching
    pub estimated_savings: u32,
}

impl fmt::Display for MismatchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Consider '{}' instead of '{}' (~{} min saved).",
            self.reason, self.recommended_profile, self.requested_profile, self.estimated_savings
        )
    }
}

/// Checks a requested profile against the task description
pub struct WorkflowValidator {
    catalog: ProfileCatalog,
    config: ValidatorConfig,
    classifier: Option<Arc<Classifier>>,
    estimator: Box<dyn Estimator>,
}

impl WorkflowValidator {
    /// Create a validator with the standard classifier and heuristic estimator
    pub fn new(catalog: ProfileCatalog, config: ValidatorConfig) -> Self {
        Self {
            catalog,
            config,
            classifier: None,
            estimator: Box::new(HeuristicEstimator::default()),
        }
    }

    /// Swap the scope/complexity estimator
    pub fn with_estimator(mut self, estimator: Box<dyn Estimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Use a custom classifier
    pub fn with_classifier(mut self, classifier: Arc<Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    fn classifier(&self) -> &Classifier {
        self.classifier
            .as_deref()
            .unwrap_or_else(|| Classifier::standard())
    }

    /// Check `profile_name` against `text`.
    ///
    /// Returns a warning only when the detected intent is confident and
    /// not one the profile was designed for. `force` and unknown profiles
    /// always yield `None`.
    pub fn validate(&self, profile_name: &str, text: &str, force: bool) -> Option<MismatchWarning> {
        if force {
            debug!("Validation skipped (forced)");
            return None;
        }

        let Some(requested) = self.catalog.get(profile_name) else {
            warn!("Unknown workflow profile '{}', skipping validation", profile_name);
            return None;
        };

        let classification = self.classifier().classify(text);
        let intent = classification.intent?;

        if requested.requires(intent) || classification.confidence < self.config.confidence_threshold {
            debug!(
                "No mismatch: {} for profile {}",
                classification.summary(),
                profile_name
            );
            return None;
        }

        let scope = self.estimator.scope(text);
        let complexity = self.estimator.complexity(text);

        let recommended = self.catalog.smallest_for(intent, scope, complexity)?;
        if recommended.name == requested.name {
            return None;
        }

        let delta = requested
            .step_count()
            .saturating_sub(recommended.step_count()) as u32;

        Some(MismatchWarning {
            detected_intent: intent,
            detected_scope: scope,
            detected_complexity: complexity,
            requested_profile: requested.name.clone(),
            recommended_profile: recommended.name.clone(),
            confidence: classification.confidence,
            reason: format!(
                "Task looks like {} (confidence {:.2}), but '{}' is designed for {}.",
                intent,
                classification.confidence,
                requested.name,
                describe_intents(requested.required_intents.iter())
            ),
            estimated_savings: delta.saturating_mul(self.config.minutes_per_step),
        })
    }
}

fn describe_intents<'a>(intents: impl Iterator<Item = &'a Intent>) -> String {
    let names: Vec<&str> = intents.map(|i| i.name()).collect();
    if names.is_empty() {
        "no particular intent".to_string()
    } else {
        names.join(", ")
    }
}

//! Weighted-pattern intent classifier
//!
//! Scoring for each intent:
//!
//! ```text
//! raw   = Σ tiers  weight × Σ patterns min(matches, MAX_MATCHES_PER_PATTERN)
//! score = min(raw / SATURATION, 1.0)
//! ```
//!
//! The best-scoring intent is returned only when it is both confident
//! (`score ≥ MIN_CONFIDENCE`) and clearly ahead of the runner-up
//! (`gap ≥ MIN_GAP`). Anything else is reported as ambiguous.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::signals::{default_signals, Intent, SignalDefinition};
use crate::{Error, Result};

/// Minimum score for a confident classification
pub const MIN_CONFIDENCE: f64 = 0.6;
/// Minimum lead over the runner-up
pub const MIN_GAP: f64 = 0.2;
/// Repeated hits of one pattern stop counting after this many
pub const MAX_MATCHES_PER_PATTERN: usize = 3;
/// Raw score that maps to full confidence (two strong signals)
pub const SATURATION: f64 = 2.0;

static STANDARD: Lazy<Classifier> = Lazy::new(|| {
    Classifier::new(&default_signals()).expect("built-in signal tables must compile")
});

/// Outcome of classifying one text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Detected intent, if unambiguous
    pub intent: Option<Intent>,
    /// Score of the best candidate, in [0, 1]
    pub confidence: f64,
    /// Lead of the best candidate over the runner-up
    pub gap: f64,
    /// Per-intent scores, highest first
    pub scores: Vec<(Intent, f64)>,
}

impl ClassificationResult {
    fn empty() -> Self {
        Self {
            intent: None,
            confidence: 0.0,
            gap: 0.0,
            scores: Vec::new(),
        }
    }

    /// Whether no intent could be picked
    pub fn is_ambiguous(&self) -> bool {
        self.intent.is_none()
    }

    /// One-line description
    pub fn summary(&self) -> String {
        match self.intent {
            Some(intent) => format!(
                "{} (confidence {:.2}, gap {:.2})",
                intent, self.confidence, self.gap
            ),
            None => format!("ambiguous (confidence {:.2})", self.confidence),
        }
    }
}

struct CompiledTier {
    weight: f64,
    patterns: Vec<Regex>,
}

struct CompiledSignal {
    intent: Intent,
    tiers: Vec<CompiledTier>,
}

/// Classifier with precompiled signal tables
pub struct Classifier {
    signals: Vec<CompiledSignal>,
}

impl Classifier {
    /// Compile signal definitions; fails on bad weights or patterns
    pub fn new(definitions: &[SignalDefinition]) -> Result<Self> {
        let mut signals = Vec::with_capacity(definitions.len());

        for definition in definitions {
            let mut tiers = Vec::with_capacity(definition.tiers.len());
            for tier in &definition.tiers {
                if !(0.0..=1.0).contains(&tier.weight) {
                    return Err(Error::Config(format!(
                        "Signal weight {} for {} is outside [0, 1]",
                        tier.weight, definition.intent
                    )));
                }

                let patterns = tier
                    .patterns
                    .iter()
                    .map(|p| {
                        Regex::new(p).map_err(|e| {
                            Error::Config(format!(
                                "Invalid signal pattern '{}' for {}: {}",
                                p, definition.intent, e
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;

                tiers.push(CompiledTier {
                    weight: tier.weight,
                    patterns,
                });
            }

            signals.push(CompiledSignal {
                intent: definition.intent,
                tiers,
            });
        }

        Ok(Self { signals })
    }

    /// Shared classifier built from the default tables
    pub fn standard() -> &'static Classifier {
        &STANDARD
    }

    /// Classify a free-text task description
    pub fn classify(&self, text: &str) -> ClassificationResult {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return ClassificationResult::empty();
        }

        let mut scores: Vec<(Intent, f64)> = self
            .signals
            .iter()
            .map(|signal| (signal.intent, score(signal, &normalized)))
            .collect();

        // Stable sort keeps table order for equal scores
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));

        let (best, confidence) = match scores.first() {
            Some(&(intent, score)) => (intent, score),
            None => return ClassificationResult::empty(),
        };
        let runner_up = scores.get(1).map(|&(_, s)| s).unwrap_or(0.0);
        let gap = confidence - runner_up;

        let intent = (confidence >= MIN_CONFIDENCE && gap >= MIN_GAP).then_some(best);

        debug!(
            intent = ?intent,
            confidence,
            gap,
            "classified task description"
        );

        ClassificationResult {
            intent,
            confidence,
            gap,
            scores,
        }
    }
}

/// Classify with the standard tables
pub fn classify(text: &str) -> ClassificationResult {
    Classifier::standard().classify(text)
}

/// Lowercase, replace punctuation with spaces, collapse whitespace
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn score(signal: &CompiledSignal, text: &str) -> f64 {
    let raw: f64 = signal
        .tiers
        .iter()
        .map(|tier| {
            let hits: usize = tier
                .patterns
                .iter()
                .map(|p| p.find_iter(text).take(MAX_MATCHES_PER_PATTERN).count())
                .sum();
            tier.weight * hits as f64
        })
        .sum();

    (raw / SATURATION).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::signals::SignalTier;
    use std::time::{Duration, Instant};

    #[test]
    fn test_bug_fix_example() {
        let result = classify("Fix validation bug that reports 0/14 when files exist");
        assert_eq!(result.intent, Some(Intent::BugFix));
        assert!(result.confidence >= 0.6);
        assert!(result.gap >= 0.2);
    }

    #[test]
    fn test_other_intents() {
        assert_eq!(
            classify("Refactor the parser module and clean up dead helpers").intent,
            Some(Intent::Refactor)
        );
        assert_eq!(
            classify("Investigate the root cause of slow startup").intent,
            Some(Intent::Investigation)
        );
        assert_eq!(
            classify("Update the README and API reference docs").intent,
            Some(Intent::Documentation)
        );
        assert_eq!(
            classify("Add a new export command and implement CSV output").intent,
            Some(Intent::Feature)
        );
    }

    #[test]
    fn test_empty_text() {
        let result = classify("");
        assert_eq!(result.intent, None);
        assert_eq!(result.confidence, 0.0);

        let result = classify("  ?!... ");
        assert_eq!(result.intent, None);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_near_tie_is_ambiguous() {
        // one strong bug signal and one strong feature signal
        let result = classify("fix and add");
        assert!(result.is_ambiguous());
        assert!(result.gap < MIN_GAP);
    }

    #[test]
    fn test_low_confidence_is_ambiguous() {
        let result = classify("there is an issue somewhere");
        assert_eq!(result.intent, None);
        assert!(result.confidence < MIN_CONFIDENCE);
    }

    #[test]
    fn test_classification_is_pure() {
        let text = "Crash when saving: fix the broken serializer";
        let first = classify(text);
        for _ in 0..10 {
            assert_eq!(classify(text), first);
        }
    }

    #[test]
    fn test_repeated_tokens_are_capped() {
        let tables = vec![SignalDefinition {
            intent: Intent::BugFix,
            tiers: vec![SignalTier {
                weight: 0.3,
                patterns: vec![r"\bbug\b".to_string()],
            }],
        }];
        let classifier = Classifier::new(&tables).unwrap();

        let few = classifier.classify("bug bug bug");
        let many = classifier.classify(&"bug ".repeat(500));
        assert_eq!(few.confidence, many.confidence);
        assert!((many.confidence - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_tables_rejected() {
        let bad_weight = vec![SignalDefinition {
            intent: Intent::Feature,
            tiers: vec![SignalTier {
                weight: 1.5,
                patterns: vec![r"\badd\b".to_string()],
            }],
        }];
        assert!(Classifier::new(&bad_weight).is_err());

        let bad_pattern = vec![SignalDefinition {
            intent: Intent::Feature,
            tiers: vec![SignalTier {
                weight: 0.5,
                patterns: vec![r"(".to_string()],
            }],
        }];
        assert!(Classifier::new(&bad_pattern).is_err());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Fix: it's BROKEN!!"), "fix it s broken");
        assert_eq!(normalize("0/14"), "0 14");
    }

    #[test]
    fn test_long_input_is_fast() {
        let text = "Fix the crash in the parser when the config has errors. ".repeat(40);
        let _ = classify("warm up");

        let started = Instant::now();
        let result = classify(&text);
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(result.intent, Some(Intent::BugFix));
    }
}

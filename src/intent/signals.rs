//! Signal tables for intent classification
//!
//! Each intent has tiers of regex patterns; stronger tiers carry more
//! weight. Patterns run against normalized text (lowercase, punctuation
//! replaced by spaces), so `doesn't` is written `doesn t` here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Task intents the classifier can detect
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Something is broken and needs fixing
    BugFix,
    /// New capability
    Feature,
    /// Restructuring without behavior change
    Refactor,
    /// Find out why or how something works
    Investigation,
    /// Docs, READMEs, comments
    Documentation,
}

impl Intent {
    /// Get the name of this intent
    pub fn name(&self) -> &'static str {
        match self {
            Intent::BugFix => "bug_fix",
            Intent::Feature => "feature",
            Intent::Refactor => "refactor",
            Intent::Investigation => "investigation",
            Intent::Documentation => "documentation",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Intent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "bug_fix" | "bugfix" | "bug" | "fix" => Ok(Intent::BugFix),
            "feature" | "feat" => Ok(Intent::Feature),
            "refactor" | "refactoring" => Ok(Intent::Refactor),
            "investigation" | "investigate" | "research" => Ok(Intent::Investigation),
            "documentation" | "docs" | "doc" => Ok(Intent::Documentation),
            other => Err(Error::Config(format!("Unknown intent: {}", other))),
        }
    }
}

/// A weighted group of patterns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalTier {
    /// Weight in [0, 1]
    pub weight: f64,
    /// Regex patterns
    pub patterns: Vec<String>,
}

impl SignalTier {
    fn new(weight: f64, patterns: &[&str]) -> Self {
        Self {
            weight,
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Pattern tiers for one intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDefinition {
    /// Intent these signals point to
    pub intent: Intent,
    /// Ordered tiers, strongest first
    pub tiers: Vec<SignalTier>,
}

const STRONG: f64 = 1.0;
const MEDIUM: f64 = 0.6;
const WEAK: f64 = 0.3;

/// Built-in signal tables
pub fn default_signals() -> Vec<SignalDefinition> {
    vec![
        SignalDefinition {
            intent: Intent::BugFix,
            tiers: vec![
                SignalTier::new(
                    STRONG,
                    &[
                        r"\bbugs?\b",
                        r"\bfix(es|ed|ing)?\b",
                        r"\bhotfix\b",
                        r"\bcrash(es|ed|ing)?\b",
                        r"\bregression\b",
                        r"\bbroken\b",
                    ],
                ),
                SignalTier::new(
                    MEDIUM,
                    &[
                        r"\berrors?\b",
                        r"\bfail(s|ed|ing|ure)?\b",
                        r"\bincorrect(ly)?\b",
                        r"\bwrong\b",
                        r"\bexceptions?\b",
                        r"\bpanic(s|ked)?\b",
                    ],
                ),
                SignalTier::new(
                    WEAK,
                    &[
                        r"\bissues?\b",
                        r"\bunexpected(ly)?\b",
                        r"\bnot working\b",
                        r"\bdoesn t\b",
                    ],
                ),
            ],
        },
        SignalDefinition {
            intent: Intent::Feature,
            tiers: vec![
                SignalTier::new(
                    STRONG,
                    &[
                        r"\badd(s|ed|ing)?\b",
                        r"\bimplement(s|ed|ing)?\b",
                        r"\bnew feature\b",
                        r"\bintroduce\b",
                        r"\bsupport for\b",
                        r"\bbuild (a|an|the)\b",
                    ],
                ),
                SignalTier::new(
                    MEDIUM,
                    &[
                        r"\bcreate\b",
                        r"\bnew\b",
                        r"\benable\b",
                        r"\bintegrat(e|ion)\b",
                        r"\bendpoints?\b",
                    ],
                ),
                SignalTier::new(
                    WEAK,
                    &[r"\ballow\b", r"\boptions?\b", r"\bui\b", r"\bpage\b"],
                ),
            ],
        },
        SignalDefinition {
            intent: Intent::Refactor,
            tiers: vec![
                SignalTier::new(
                    STRONG,
                    &[
                        r"\brefactor(s|ed|ing)?\b",
                        r"\brestructur(e|ing)\b",
                        r"\bclean ?up\b",
                        r"\bextract\b",
                        r"\bsimplif(y|ies|ication)\b",
                    ],
                ),
                SignalTier::new(
                    MEDIUM,
                    &[
                        r"\brename\b",
                        r"\breorganiz(e|ation)\b",
                        r"\bdecouple\b",
                        r"\bmodulari[sz]e\b",
                        r"\bdeduplicate\b",
                        r"\btech(nical)? debt\b",
                    ],
                ),
                SignalTier::new(
                    WEAK,
                    &[
                        r"\bmove\b",
                        r"\bsplit\b",
                        r"\bmaintainab(le|ility)\b",
                        r"\breadab(le|ility)\b",
                    ],
                ),
            ],
        },
        SignalDefinition {
            intent: Intent::Investigation,
            tiers: vec![
                SignalTier::new(
                    STRONG,
                    &[
                        r"\binvestigat(e|es|ion|ing)\b",
                        r"\broot cause\b",
                        r"\bwhy (is|does|do|did|are)\b",
                        r"\bdiagnos(e|is)\b",
                        r"\banaly[sz](e|is)\b",
                    ],
                ),
                SignalTier::new(
                    MEDIUM,
                    &[
                        r"\bunderstand\b",
                        r"\bexplore\b",
                        r"\bresearch\b",
                        r"\bfigure out\b",
                        r"\bprofil(e|ing)\b",
                        r"\bexplain\b",
                    ],
                ),
                SignalTier::new(WEAK, &[r"\bhow (does|do|is)\b", r"\blook into\b"]),
            ],
        },
        SignalDefinition {
            intent: Intent::Documentation,
            tiers: vec![
                SignalTier::new(
                    STRONG,
                    &[
                        r"\bdocument(ation|s|ed)?\b",
                        r"\breadme\b",
                        r"\bdocs?\b",
                        r"\bchangelog\b",
                    ],
                ),
                SignalTier::new(
                    MEDIUM,
                    &[
                        r"\bcomments?\b",
                        r"\bguides?\b",
                        r"\btutorials?\b",
                        r"\bapi reference\b",
                        r"\bdocstrings?\b",
                    ],
                ),
                SignalTier::new(WEAK, &[r"\bwrite up\b", r"\bexamples?\b", r"\bdescribe\b"]),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_parsing() {
        assert_eq!("bug_fix".parse::<Intent>().unwrap(), Intent::BugFix);
        assert_eq!("bug-fix".parse::<Intent>().unwrap(), Intent::BugFix);
        assert_eq!("docs".parse::<Intent>().unwrap(), Intent::Documentation);
        assert!("astrology".parse::<Intent>().is_err());
    }

    #[test]
    fn test_default_signals_cover_every_intent() {
        let signals = default_signals();
        for intent in [
            Intent::BugFix,
            Intent::Feature,
            Intent::Refactor,
            Intent::Investigation,
            Intent::Documentation,
        ] {
            assert!(signals.iter().any(|s| s.intent == intent), "{}", intent);
        }
        for tier in signals.iter().flat_map(|s| &s.tiers) {
            assert!((0.0..=1.0).contains(&tier.weight));
        }
    }
}

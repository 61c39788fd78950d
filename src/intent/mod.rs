//! Intent classification
//!
//! Lightweight keyword classification of free-text task descriptions.
//! Signal tables are plain data compiled once; classification is a pure
//! function of the text.

pub mod classifier;
pub mod signals;

pub use classifier::{
    classify, normalize, ClassificationResult, Classifier, MAX_MATCHES_PER_PATTERN,
    MIN_CONFIDENCE, MIN_GAP,
};
pub use signals::{default_signals, Intent, SignalDefinition, SignalTier};

//! Classification side of firewatch: the remote vision-language model client
//! and the parser that turns its free-form answers into typed verdicts.

pub mod classifier;
pub mod verdict;

pub use classifier::{Classifier, ClassifyError, FIRE_PROMPT, OllamaClassifier, OllamaSettings};
pub use verdict::{Confidence, HazardType, ParseError, Verdict, parse_verdict};

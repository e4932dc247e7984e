//! Typed classification verdicts and the tolerant response parser.
//!
//! Vision-language models rarely return clean JSON. Parsing therefore runs in
//! two stages that together form one contract:
//!
//! 1. Strip markdown fencing and whitespace, then parse the remainder strictly.
//! 2. Failing that, scan for the first `{` that starts a well-formed verdict
//!    object and parse only that object, ignoring prose before or after it.
//!
//! Only when both stages fail is the response rejected.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, de};
use thiserror::Error;

/// Upper bound on `{` positions tried by the fallback scan.
const MAX_EMBEDDED_CANDIDATES: usize = 64;
const EXCERPT_CHARS: usize = 48;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HazardType {
    Fire,
    Smoke,
    Both,
    #[default]
    None,
}

impl HazardType {
    pub fn as_str(self) -> &'static str {
        match self {
            HazardType::Fire => "fire",
            HazardType::Smoke => "smoke",
            HazardType::Both => "both",
            HazardType::None => "none",
        }
    }

    /// Whether the hazard involves open flame.
    pub fn involves_fire(self) -> bool {
        matches!(self, HazardType::Fire | HazardType::Both)
    }
}

impl fmt::Display for HazardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for HazardType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "fire" => Ok(HazardType::Fire),
            "smoke" => Ok(HazardType::Smoke),
            "both" => Ok(HazardType::Both),
            "none" | "" => Ok(HazardType::None),
            other => Err(de::Error::unknown_variant(
                other,
                &["fire", "smoke", "both", "none"],
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    #[default]
    Low,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Confidence::High),
            "medium" => Ok(Confidence::Medium),
            "low" | "" => Ok(Confidence::Low),
            other => Err(de::Error::unknown_variant(other, &["high", "medium", "low"])),
        }
    }
}

/// One classification result as reported by the model.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Verdict {
    pub detected: bool,
    #[serde(rename = "type", default)]
    pub hazard: HazardType,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub description: String,
}

impl Verdict {
    /// The `detected` flag is authoritative: a negative verdict never carries a hazard type.
    pub fn normalized(mut self) -> Self {
        if !self.detected {
            self.hazard = HazardType::None;
        }
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty model response")]
    Empty,
    #[error("no verdict object in model response: {excerpt:?}")]
    NoVerdict { excerpt: String },
}

/// Parse a raw model completion into a [`Verdict`] (not yet normalized).
pub fn parse_verdict(raw: &str) -> Result<Verdict, ParseError> {
    let cleaned = strip_fencing(raw);
    if cleaned.is_empty() {
        return Err(ParseError::Empty);
    }

    if let Ok(verdict) = serde_json::from_str::<Verdict>(&cleaned) {
        return Ok(verdict);
    }

    extract_embedded(&cleaned).ok_or_else(|| ParseError::NoVerdict {
        excerpt: cleaned.chars().take(EXCERPT_CHARS).collect(),
    })
}

fn strip_fencing(raw: &str) -> String {
    raw.trim()
        .replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
        .trim()
        .to_string()
}

fn extract_embedded(text: &str) -> Option<Verdict> {
    text.match_indices('{')
        .take(MAX_EMBEDDED_CANDIDATES)
        .find_map(|(start, _)| {
            serde_json::Deserializer::from_str(&text[start..])
                .into_iter::<Verdict>()
                .next()
                .and_then(Result::ok)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN: &str = r#"{"detected": true, "type": "smoke", "confidence": "medium", "description": "Faint haze near ceiling"}"#;

    #[test]
    fn parses_clean_object() {
        let verdict = parse_verdict(CLEAN).unwrap();
        assert!(verdict.detected);
        assert_eq!(verdict.hazard, HazardType::Smoke);
        assert_eq!(verdict.confidence, Confidence::Medium);
        assert_eq!(verdict.description, "Faint haze near ceiling");
    }

    #[test]
    fn fenced_object_matches_unwrapped() {
        let fenced = format!("```json\n{CLEAN}\n```");
        assert_eq!(parse_verdict(&fenced).unwrap(), parse_verdict(CLEAN).unwrap());

        let bare_fence = format!("```\n{CLEAN}\n```\n");
        assert_eq!(
            parse_verdict(&bare_fence).unwrap(),
            parse_verdict(CLEAN).unwrap()
        );
    }

    #[test]
    fn trailing_prose_falls_back_to_embedded_object() {
        let raw = format!("{CLEAN}\nI am fairly sure about this assessment.");
        assert_eq!(parse_verdict(&raw).unwrap(), parse_verdict(CLEAN).unwrap());
    }

    #[test]
    fn leading_prose_and_decoy_braces_are_skipped() {
        let raw = format!("Sure {{ here you go }}: {CLEAN} -- done");
        assert_eq!(parse_verdict(&raw).unwrap(), parse_verdict(CLEAN).unwrap());
    }

    #[test]
    fn rejects_text_without_object() {
        let err = parse_verdict("The scene looks clear to me.").unwrap_err();
        assert!(matches!(err, ParseError::NoVerdict { .. }));
        assert_eq!(parse_verdict("  ```json ```  ").unwrap_err(), ParseError::Empty);
    }

    #[test]
    fn object_without_detected_flag_is_rejected() {
        let err = parse_verdict(r#"{"type": "fire"}"#).unwrap_err();
        assert!(matches!(err, ParseError::NoVerdict { .. }));
    }

    #[test]
    fn unknown_hazard_type_is_rejected() {
        assert!(parse_verdict(r#"{"detected": true, "type": "lava"}"#).is_err());
    }

    #[test]
    fn enum_values_are_case_insensitive_with_defaults() {
        let verdict = parse_verdict(r#"{"detected": true, "type": "FIRE"}"#).unwrap();
        assert_eq!(verdict.hazard, HazardType::Fire);
        assert_eq!(verdict.confidence, Confidence::Low);
        assert!(verdict.description.is_empty());
    }

    #[test]
    fn normalization_clears_type_when_not_detected() {
        let verdict = parse_verdict(r#"{"detected": false, "type": "fire", "confidence": "high"}"#)
            .unwrap()
            .normalized();
        assert_eq!(verdict.hazard, HazardType::None);

        let positive = parse_verdict(r#"{"detected": true, "type": "both"}"#)
            .unwrap()
            .normalized();
        assert_eq!(positive.hazard, HazardType::Both);
    }
}

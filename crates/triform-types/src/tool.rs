//! Tool contract types.
//!
//! Every capability the engine invokes (extraction, statistics, storage
//! adapters, conversion) is a tool that produces a [`ToolOutput`]. The trait
//! itself lives in triform-core; these are the values crossing it.

use serde::{Deserialize, Serialize};

/// Identity of a registered tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Stable identifier used by workflow steps (e.g. "stats.correlation").
    pub id: String,
    /// Semantic version of the implementation.
    pub version: semver::Version,
    #[serde(default)]
    pub description: String,
}

/// Retry classification of a tool failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transient; the executor retries with backoff.
    Retryable,
    /// Permanent; the step fails immediately.
    Fatal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Retryable => write!(f, "retryable"),
            ErrorClass::Fatal => write!(f, "fatal"),
        }
    }
}

/// Outcome status reported by a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
}

/// Qualitative confidence tier derived from the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    Uncertain,
    Low,
    Medium,
    High,
}

impl ConfidenceTier {
    /// Tier for a score in `[0, 1]`.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            ConfidenceTier::High
        } else if score >= 0.5 {
            ConfidenceTier::Medium
        } else if score >= 0.2 {
            ConfidenceTier::Low
        } else {
            ConfidenceTier::Uncertain
        }
    }
}

/// A confidence score in `[0, 1]` with its tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    pub score: f64,
    pub tier: ConfidenceTier,
}

impl Confidence {
    /// Build a confidence value, clamping the score into `[0, 1]`.
    /// NaN is treated as zero.
    pub fn new(score: f64) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        Self {
            score,
            tier: ConfidenceTier::from_score(score),
        }
    }

    /// Full confidence, used by deterministic tools.
    pub fn certain() -> Self {
        Self::new(1.0)
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self::certain()
    }
}

/// Result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub status: ToolStatus,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl ToolOutput {
    /// Successful output with the given data and confidence.
    pub fn success(data: serde_json::Value, confidence: Confidence) -> Self {
        Self {
            status: ToolStatus::Success,
            data,
            confidence,
            metadata: serde_json::Value::Null,
        }
    }

    /// Error-status output. The step's policy decides its classification.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            data: serde_json::json!({ "message": message.into() }),
            confidence: Confidence::new(0.0),
            metadata: serde_json::Value::Null,
        }
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    /// Error message carried by an error-status output, if any.
    pub fn error_message(&self) -> Option<String> {
        match self.status {
            ToolStatus::Success => None,
            ToolStatus::Error => Some(
                self.data
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| self.data.to_string()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_confidence_tiers() {
        assert_eq!(Confidence::new(0.95).tier, ConfidenceTier::High);
        assert_eq!(Confidence::new(0.8).tier, ConfidenceTier::High);
        assert_eq!(Confidence::new(0.5).tier, ConfidenceTier::Medium);
        assert_eq!(Confidence::new(0.2).tier, ConfidenceTier::Low);
        assert_eq!(Confidence::new(0.1).tier, ConfidenceTier::Uncertain);
    }

    #[test]
    fn test_confidence_clamps() {
        assert_eq!(Confidence::new(1.7).score, 1.0);
        assert_eq!(Confidence::new(-0.2).score, 0.0);
        assert_eq!(Confidence::new(f64::NAN).score, 0.0);
    }

    #[test]
    fn test_tool_output_wire_shape() {
        let out = ToolOutput::success(json!({"rows": 2}), Confidence::new(0.6));
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["confidence"]["tier"], "medium");
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn test_error_message() {
        let out = ToolOutput::error("bad input");
        assert!(!out.is_success());
        assert_eq!(out.error_message().as_deref(), Some("bad input"));
        assert_eq!(ToolOutput::success(json!(1), Confidence::certain()).error_message(), None);
    }

    #[test]
    fn test_error_class_serde() {
        let class: ErrorClass = serde_json::from_str("\"retryable\"").unwrap();
        assert_eq!(class, ErrorClass::Retryable);
        assert_eq!(ErrorClass::Fatal.to_string(), "fatal");
    }
}

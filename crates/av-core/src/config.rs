//! Engine configuration
//!
//! The heuristic thresholds below were tuned by trial on real pages; they are
//! kept as named defaults rather than re-derived. Every field can be
//! overridden from JSON, and missing fields keep their default.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::Confidence;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub classifier: ClassifierConfig,
    pub scheduler: SchedulerConfig,
    pub payload: PayloadConfig,
    /// Hosts (and their subdomains) where page-level filtering is disabled,
    /// in addition to the catalog's builtin safelist.
    pub extra_host_safelist: Vec<String>,
}

impl EngineConfig {
    /// Parse a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        serde_json::from_str(text).map_err(EngineError::InvalidConfig)
    }
}

/// Thresholds used by the DOM classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClassifierConfig {
    /// Lower bound on the size-bucket tolerance, in CSS pixels.
    pub min_tolerance_px: f64,
    /// Hyperlink descendants at which a node counts as navigation.
    pub nav_link_threshold: usize,
    /// Texts shorter than this containing the word "ad" are ad labels.
    pub short_label_max_len: usize,
    /// Texts longer than this are never scanned for disclosure phrases.
    pub text_scan_limit: usize,
    /// Images and frames with a smaller area are tracking beacons.
    pub pixel_max_area: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_tolerance_px: 10.0,
            nav_link_threshold: 3,
            short_label_max_len: 50,
            text_scan_limit: 200,
            pixel_max_area: 10.0,
        }
    }
}

/// Trigger timing for the DOM sweep scheduler (milliseconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// Minimum confidence an `Ad` verdict needs before anything is suppressed.
    pub min_confidence: Confidence,
    /// Remove suppressed nodes from the tree when detaching is safe.
    pub prefer_removal: bool,
    /// Drop an inline `overflow` lock from `body` after start and navigation sweeps.
    pub release_scroll_lock: bool,
    pub mutation_debounce_ms: u64,
    pub scroll_debounce_ms: u64,
    pub visibility_delay_ms: u64,
    pub fallback_interval_ms: u64,
    /// The fallback sweep is cancelled once this much time has passed since start.
    pub fallback_warmup_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_confidence: Confidence::Medium,
            prefer_removal: true,
            release_scroll_lock: true,
            mutation_debounce_ms: 0,
            scroll_debounce_ms: 500,
            visibility_delay_ms: 500,
            fallback_interval_ms: 2_000,
            fallback_warmup_ms: 30_000,
        }
    }
}

/// Structural payload cleaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PayloadConfig {
    /// Subtrees nested deeper than this are copied through untouched.
    pub max_depth: usize,
    /// Force a non-OK `playabilityStatus.status` to "OK".
    pub normalize_playability: bool,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            max_depth: 128,
            normalize_playability: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(
            r#"{"classifier": {"navLinkThreshold": 5}, "scheduler": {"minConfidence": "low"}}"#,
        )
        .unwrap();
        assert_eq!(config.classifier.nav_link_threshold, 5);
        assert_eq!(config.classifier.short_label_max_len, 50);
        assert_eq!(config.scheduler.min_confidence, Confidence::Low);
        assert_eq!(config.payload.max_depth, 128);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            EngineConfig::from_json("{\"payload\": 3}"),
            Err(EngineError::InvalidConfig(_))
        ));
    }
}

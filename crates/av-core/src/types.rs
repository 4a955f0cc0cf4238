//! Core type definitions for Ad-Vantage
//!
//! Verdicts, reason codes and resource-type masks shared by the classifier,
//! the sweep scheduler, the interception pipeline and the rule compiler.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Resource Types (bit mask for rule conditions)
// =============================================================================

bitflags::bitflags! {
    /// Resource type bit mask, named after the declarative rule engine's
    /// resource type strings.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct ResourceType: u32 {
        const MAIN_FRAME = 1 << 0;
        const SUB_FRAME = 1 << 1;
        const STYLESHEET = 1 << 2;
        const SCRIPT = 1 << 3;
        const IMAGE = 1 << 4;
        const FONT = 1 << 5;
        const OBJECT = 1 << 6;
        const XMLHTTPREQUEST = 1 << 7;
        const PING = 1 << 8;
        const CSP_REPORT = 1 << 9;
        const MEDIA = 1 << 10;
        const WEBSOCKET = 1 << 11;
        const WEBTRANSPORT = 1 << 12;
        const WEBBUNDLE = 1 << 13;
        const OTHER = 1 << 14;

        /// Document types (main_frame + sub_frame)
        const DOCUMENT = Self::MAIN_FRAME.bits() | Self::SUB_FRAME.bits();
    }
}

/// Resource type names in canonical (serialization) order.
const RESOURCE_TYPE_NAMES: [(&str, ResourceType); 15] = [
    ("main_frame", ResourceType::MAIN_FRAME),
    ("sub_frame", ResourceType::SUB_FRAME),
    ("stylesheet", ResourceType::STYLESHEET),
    ("script", ResourceType::SCRIPT),
    ("image", ResourceType::IMAGE),
    ("font", ResourceType::FONT),
    ("object", ResourceType::OBJECT),
    ("xmlhttprequest", ResourceType::XMLHTTPREQUEST),
    ("ping", ResourceType::PING),
    ("csp_report", ResourceType::CSP_REPORT),
    ("media", ResourceType::MEDIA),
    ("websocket", ResourceType::WEBSOCKET),
    ("webtransport", ResourceType::WEBTRANSPORT),
    ("webbundle", ResourceType::WEBBUNDLE),
    ("other", ResourceType::OTHER),
];

impl ResourceType {
    /// Parse a single rule-engine resource type name.
    /// Unknown names return `None` so callers can reject the record.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        RESOURCE_TYPE_NAMES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, t)| *t)
    }

    /// Parse a list of names into one mask. Fails on the first unknown name.
    pub fn from_names<I, S>(names: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut mask = Self::empty();
        for name in names {
            let name = name.as_ref();
            mask |= Self::from_name(name).ok_or_else(|| format!("unknown resource type '{name}'"))?;
        }
        Ok(mask)
    }

    /// Names of the set bits, in canonical order.
    pub fn names(self) -> Vec<&'static str> {
        RESOURCE_TYPE_NAMES
            .iter()
            .filter(|(_, t)| self.contains(*t))
            .map(|(n, _)| *n)
            .collect()
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Outcome of a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    Ad,
    NotAd,
    /// Deliberately excluded from automatic action.
    Ambiguous,
}

/// How strongly the matched signal indicates advertising.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Which rule produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReasonCode {
    /// Structural safelist (landmark, navigation, many links)
    Safelisted,
    /// Custom element whose tag is a known ad renderer
    AdTag,
    /// Attribute key from the catalog is present
    AdAttribute,
    /// A whole class or id token matched an ad pattern
    AdClassToken,
    /// Frame, script or image loaded from an ad host
    AdHostResource,
    /// Inline script containing an ad-loader snippet
    InlineAdScript,
    /// Near-zero-area image or frame
    TrackingPixel,
    /// Standard ad-unit dimensions
    AdSizeBucket,
    /// Standard ad-unit dimensions on a navigation-like node
    NavigationSizeMatch,
    /// Sponsorship or disclosure phrase in the node text
    DisclosureText,
    /// Very short text containing the word "ad"
    AdLabelText,
    /// aria-label naming an ad or sponsor
    AdAriaLabel,
    /// No signal matched
    NoSignal,
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Safelisted => "safelisted",
            Self::AdTag => "ad-tag",
            Self::AdAttribute => "ad-attribute",
            Self::AdClassToken => "ad-class-token",
            Self::AdHostResource => "ad-host-resource",
            Self::InlineAdScript => "inline-ad-script",
            Self::TrackingPixel => "tracking-pixel",
            Self::AdSizeBucket => "ad-size-bucket",
            Self::NavigationSizeMatch => "navigation-size-match",
            Self::DisclosureText => "disclosure-text",
            Self::AdLabelText => "ad-label-text",
            Self::AdAriaLabel => "ad-aria-label",
            Self::NoSignal => "no-signal",
        };
        f.write_str(s)
    }
}

/// Result of classifying one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub verdict: Verdict,
    pub reason: ReasonCode,
    pub confidence: Confidence,
}

impl ClassificationResult {
    pub const fn ad(reason: ReasonCode, confidence: Confidence) -> Self {
        Self { verdict: Verdict::Ad, reason, confidence }
    }

    pub const fn not_ad(reason: ReasonCode) -> Self {
        Self { verdict: Verdict::NotAd, reason, confidence: Confidence::High }
    }

    pub const fn ambiguous(reason: ReasonCode) -> Self {
        Self { verdict: Verdict::Ambiguous, reason, confidence: Confidence::Low }
    }

    /// True when this is an `Ad` verdict at or above `min`.
    #[inline]
    pub fn is_actionable(&self, min: Confidence) -> bool {
        self.verdict == Verdict::Ad && self.confidence >= min
    }
}

// =============================================================================
// Interception
// =============================================================================

/// What the interception pipeline does with a matching URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InterceptMode {
    /// Never perform the request; answer with an inert stub.
    HardBlock,
    /// Perform the request, then strip ad metadata from the JSON body.
    JsonRewrite,
}

/// How a suppressed node was taken out of the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Suppression {
    Removed,
    Hidden,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_names() {
        assert_eq!(ResourceType::from_name("script"), Some(ResourceType::SCRIPT));
        assert_eq!(ResourceType::from_name("SUB_FRAME"), Some(ResourceType::SUB_FRAME));
        assert_eq!(ResourceType::from_name("bogus"), None);

        let mask = ResourceType::from_names(["image", "script", "image"]).unwrap();
        assert_eq!(mask.names(), vec!["script", "image"]);
        assert!(ResourceType::from_names(["script", "nope"]).is_err());
    }

    #[test]
    fn test_confidence_ordering() {
        let result = ClassificationResult::ad(ReasonCode::AdSizeBucket, Confidence::Medium);
        assert!(result.is_actionable(Confidence::Low));
        assert!(result.is_actionable(Confidence::Medium));
        assert!(!result.is_actionable(Confidence::High));
        assert!(!ClassificationResult::ambiguous(ReasonCode::NavigationSizeMatch).is_actionable(Confidence::Low));
    }
}

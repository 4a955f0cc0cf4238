//! Heuristic Ad Classifier
//!
//! Pure functions over the catalog: classifying never mutates the document
//! and results are never cached, since node content can change between
//! sweeps.
//!
//! # Order
//!
//! Checks run from most specific and safest to least, first match wins:
//!
//! 1. structural safelist (landmarks, navigation, link-dense nodes)
//! 2. exact tag / attribute / class-token match
//! 3. embedded resource from an ad host, inline ad-loader script
//! 4. tracking-pixel geometry
//! 5. standard ad-unit size (ambiguous on navigation-like nodes)
//! 6. disclosure text, short "ad" labels, ad aria-labels
//!
//! Text only counts on leaves and on candidate containers (`div[id]`,
//! `div[class]`, `aside`, `section[class]`, `ins`, `iframe`, and anything
//! pinned with an inline fixed or sticky position). A container
//! with a nested container carrying the same signal defers to it, and a bare
//! wrapper never takes its siblings down with a disclosure line.
//!
//! Anything else is `NotAd`. `Ambiguous` exists so that uncertain matches
//! are reported without ever being acted on.

use log::trace;
use serde_json::Value;

use crate::catalog::SignatureCatalog;
use crate::config::ClassifierConfig;
use crate::dom::{Document, NodeId};
use crate::types::{ClassificationResult, Confidence, ReasonCode};
use crate::url::host_contains_any;

/// Tags whose `src` loads an embedded sub-resource.
const RESOURCE_TAGS: &[&str] = &["iframe", "frame", "script", "img", "embed"];

/// Tags that can act as tracking pixels.
const PIXEL_TAGS: &[&str] = &["img", "iframe"];

/// Containers whose text is judged even when they have element children.
const TEXT_CONTAINER_TAGS: &[&str] = &["aside", "ins", "iframe"];

/// Classifies DOM nodes and JSON keys against a signature catalog.
#[derive(Debug, Clone, Copy)]
pub struct Classifier<'c> {
    catalog: &'c SignatureCatalog,
    config: &'c ClassifierConfig,
}

impl<'c> Classifier<'c> {
    pub fn new(catalog: &'c SignatureCatalog, config: &'c ClassifierConfig) -> Self {
        Self { catalog, config }
    }

    pub fn catalog(&self) -> &'c SignatureCatalog {
        self.catalog
    }

    /// Classify one node.
    pub fn classify(&self, doc: &Document, node: NodeId) -> ClassificationResult {
        let Some(tag) = doc.tag(node) else {
            return ClassificationResult::not_ad(ReasonCode::NoSignal);
        };

        let result = self.classify_element(doc, node, tag);
        trace!("classified <{}> as {:?} ({})", tag, result.verdict, result.reason);
        result
    }

    fn classify_element(&self, doc: &Document, node: NodeId, tag: &str) -> ClassificationResult {
        if self.is_safelisted(doc, node, tag) {
            return ClassificationResult::not_ad(ReasonCode::Safelisted);
        }

        if let Some(reason) = self.token_signal(doc, node, tag) {
            return ClassificationResult::ad(reason, Confidence::High);
        }

        if let Some(reason) = self.resource_signal(doc, node, tag) {
            return ClassificationResult::ad(reason, Confidence::High);
        }

        if self.is_tracking_pixel(doc, node, tag) {
            return ClassificationResult::ad(ReasonCode::TrackingPixel, Confidence::High);
        }

        if self.matches_size_bucket(doc, node, tag) {
            return if self.is_navigation_like(doc, node) {
                ClassificationResult::ambiguous(ReasonCode::NavigationSizeMatch)
            } else {
                ClassificationResult::ad(ReasonCode::AdSizeBucket, Confidence::Medium)
            };
        }

        if let Some(result) = self.text_signal(doc, node, tag) {
            return result;
        }

        ClassificationResult::not_ad(ReasonCode::NoSignal)
    }

    // =========================================================================
    // 1. Structural safelist
    // =========================================================================

    /// Landmarks, navigation and link-dense nodes are never ads.
    pub fn is_safelisted(&self, doc: &Document, node: NodeId, tag: &str) -> bool {
        if self.catalog.is_safelisted_tag(tag) || self.has_safelisted_role(doc, node) || self.has_nav_token(doc, node) {
            return true;
        }

        if self.link_count_reaches(doc, node, self.config.nav_link_threshold) {
            return true;
        }

        doc.ancestors(node).any(|a| {
            doc.tag(a).is_some_and(|t| t == "nav")
                || matches!(doc.attribute(a, "role"), Some(r) if r.eq_ignore_ascii_case("navigation") || r.eq_ignore_ascii_case("menu"))
                || class_tokens(doc, a).any(|tok| self.catalog.safelist_ancestor_classes().iter().any(|c| *c == tok))
        })
    }

    /// Navigation role/class on the node or a descendant, or link density.
    pub fn is_navigation_like(&self, doc: &Document, node: NodeId) -> bool {
        let nav_ish = |n: NodeId| {
            doc.tag(n).is_some_and(|t| t == "nav" || t == "menu") || self.has_safelisted_role(doc, n) || self.has_nav_token(doc, n)
        };
        nav_ish(node)
            || self.link_count_reaches(doc, node, self.config.nav_link_threshold)
            || doc.descendants(node).any(nav_ish)
    }

    fn has_safelisted_role(&self, doc: &Document, node: NodeId) -> bool {
        doc.attribute(node, "role")
            .is_some_and(|role| self.catalog.is_safelisted_role(&role.trim().to_ascii_lowercase()))
    }

    /// Class or id token equal to a navigation token, or containing one as a
    /// dash-separated segment ("main-nav", "menu-item").
    fn has_nav_token(&self, doc: &Document, node: NodeId) -> bool {
        class_and_id_tokens(doc, node).any(|token| {
            self.catalog
                .nav_tokens()
                .iter()
                .any(|nav| token == *nav || token.split('-').any(|segment| segment == nav))
        })
    }

    fn link_count_reaches(&self, doc: &Document, node: NodeId, threshold: usize) -> bool {
        threshold > 0
            && doc
                .descendants(node)
                .filter(|&d| doc.tag(d) == Some("a"))
                .take(threshold)
                .count()
                >= threshold
    }

    // =========================================================================
    // 2. Exact tokens
    // =========================================================================

    fn token_signal(&self, doc: &Document, node: NodeId, tag: &str) -> Option<ReasonCode> {
        if self.catalog.is_ad_tag(tag) {
            return Some(ReasonCode::AdTag);
        }
        if doc.attribute_names(node).any(|name| self.catalog.is_ad_attribute(name)) {
            return Some(ReasonCode::AdAttribute);
        }
        if class_and_id_tokens(doc, node).any(|token| self.catalog.is_ad_class_token(&token)) {
            return Some(ReasonCode::AdClassToken);
        }
        None
    }

    // =========================================================================
    // 3. Embedded resources
    // =========================================================================

    fn resource_signal(&self, doc: &Document, node: NodeId, tag: &str) -> Option<ReasonCode> {
        if !RESOURCE_TAGS.contains(&tag) {
            return None;
        }

        match doc.attribute(node, "src").map(str::trim).filter(|s| !s.is_empty()) {
            Some(src) if host_contains_any(src, self.catalog.host_tokens()) => Some(ReasonCode::AdHostResource),
            Some(_) => None,
            None if tag == "script" && self.catalog.is_inline_ad_script(doc.text(node)) => Some(ReasonCode::InlineAdScript),
            None => None,
        }
    }

    // =========================================================================
    // 4. Tracking pixels
    // =========================================================================

    fn is_tracking_pixel(&self, doc: &Document, node: NodeId, tag: &str) -> bool {
        if !PIXEL_TAGS.contains(&tag) {
            return false;
        }

        // Explicit attributes win. An empty layout box is not rendered yet.
        let dims = match (dimension_attr(doc, node, "width"), dimension_attr(doc, node, "height")) {
            (Some(w), Some(h)) => Some((w, h)),
            _ => doc
                .layout(node)
                .filter(|r| r.width > 0.0 && r.height > 0.0)
                .map(|r| (r.width, r.height)),
        };

        match dims {
            Some((w, h)) => (w <= 1.0 && h <= 1.0) || w * h < self.config.pixel_max_area,
            None => false,
        }
    }

    // =========================================================================
    // 5. Size buckets
    // =========================================================================

    fn matches_size_bucket(&self, doc: &Document, node: NodeId, tag: &str) -> bool {
        if !self.catalog.is_banner_tag(tag) {
            return false;
        }
        let Some(rect) = doc.layout(node).filter(|r| r.width > 0.0 && r.height > 0.0) else {
            return false;
        };
        self.catalog
            .geometry_buckets()
            .iter()
            .any(|b| b.matches(rect.width, rect.height, self.config.min_tolerance_px))
    }

    // =========================================================================
    // 6. Text
    // =========================================================================

    fn text_signal(&self, doc: &Document, node: NodeId, tag: &str) -> Option<ClassificationResult> {
        if is_text_carrier(doc, node, tag) {
            if let Some(result) = self.carried_text(doc, node) {
                let nested = doc.descendants(node).any(|d| {
                    doc.tag(d).is_some_and(|t| is_text_container(doc, d, t)) && self.carried_text(doc, d).is_some()
                });
                if !nested {
                    return Some(result);
                }
            }
        }

        if doc
            .attribute(node, "aria-label")
            .is_some_and(|label| self.catalog.aria_label_pattern().is_match(label))
        {
            return Some(ClassificationResult::ad(ReasonCode::AdAriaLabel, Confidence::Low));
        }

        None
    }

    /// Disclosure or short-label verdict for the visible text under `node`.
    fn carried_text(&self, doc: &Document, node: NodeId) -> Option<ClassificationResult> {
        let text = doc.text_content(node, self.config.text_scan_limit);
        let text = text.trim();
        if text.is_empty() || text.len() > self.config.text_scan_limit {
            return None;
        }
        if self.catalog.disclosure_patterns().iter().any(|re| re.is_match(text)) {
            return Some(ClassificationResult::ad(ReasonCode::DisclosureText, Confidence::Medium));
        }
        if text.chars().count() < self.config.short_label_max_len && self.catalog.ad_label_pattern().is_match(text) {
            return Some(ClassificationResult::ad(ReasonCode::AdLabelText, Confidence::Low));
        }
        None
    }

    // =========================================================================
    // Structural (JSON) variant
    // =========================================================================

    /// Should `key` be stripped from a structured payload?
    ///
    /// Protected keys are never stripped, even if also listed as ad keys.
    /// Renderer keys only count when they actually hold a renderer object.
    pub fn classify_payload_key(&self, key: &str, value: &Value) -> bool {
        if self.catalog.is_protected_json_key(key) || !self.catalog.is_ad_json_key(key) {
            return false;
        }
        !key.ends_with("Renderer") || value.is_object()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Lowercased whitespace-separated class tokens.
fn class_tokens<'d>(doc: &'d Document, node: NodeId) -> impl Iterator<Item = String> + 'd {
    doc.attribute(node, "class")
        .unwrap_or("")
        .split_whitespace()
        .map(str::to_ascii_lowercase)
}

/// Class tokens followed by the id (ids are a single token).
fn class_and_id_tokens<'d>(doc: &'d Document, node: NodeId) -> impl Iterator<Item = String> + 'd {
    let id = doc
        .attribute(node, "id")
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_ascii_lowercase);
    class_tokens(doc, node).chain(id)
}

/// Leaves and candidate containers; bare wrappers never carry text signals.
fn is_text_carrier(doc: &Document, node: NodeId, tag: &str) -> bool {
    doc.children(node).is_empty() || is_text_container(doc, node, tag)
}

fn is_text_container(doc: &Document, node: NodeId, tag: &str) -> bool {
    let has = |name| doc.attribute(node, name).is_some_and(|v: &str| !v.trim().is_empty());
    TEXT_CONTAINER_TAGS.contains(&tag)
        || (tag == "div" && (has("id") || has("class")))
        || (tag == "section" && has("class"))
        || is_pinned_overlay(doc, node)
}

/// Inline `position: fixed` or `sticky`: floating bars and interstitials.
fn is_pinned_overlay(doc: &Document, node: NodeId) -> bool {
    doc.attribute(node, "style").is_some_and(|style| {
        let style = style.to_ascii_lowercase();
        style.contains("fixed") || style.contains("sticky")
    })
}

/// Parse a `width`/`height` attribute ("1", "1px", " 0 ").
fn dimension_attr(doc: &Document, node: NodeId, name: &str) -> Option<f64> {
    let raw = doc.attribute(node, name)?.trim();
    let raw = raw.strip_suffix("px").unwrap_or(raw).trim();
    raw.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

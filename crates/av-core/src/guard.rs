//! Safety Guard
//!
//! Compares a cleaned payload against its original and vetoes the release
//! when cleaning could break playback or page content. Counting is done
//! outside ad-key subtrees only, so dropping an ad renderer that happened to
//! embed a `title` is not a loss.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::catalog::SignatureCatalog;

/// Why a cleaned payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardViolation {
    /// A non-ad top-level key disappeared.
    MissingSection(String),
    /// The payload root changed JSON type.
    ShapeChanged { before: &'static str, after: &'static str },
    /// A non-empty format list became empty or absent.
    FormatsLost(String),
    /// A protected key occurs fewer times than before.
    ProtectedFieldLost { key: String, before: usize, after: usize },
}

impl fmt::Display for GuardViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSection(key) => write!(f, "top-level section '{key}' is missing"),
            Self::ShapeChanged { before, after } => write!(f, "payload changed from {before} to {after}"),
            Self::FormatsLost(path) => write!(f, "format list '{path}' was emptied"),
            Self::ProtectedFieldLost { key, before, after } => {
                write!(f, "protected field '{key}' dropped from {before} to {after} occurrence(s)")
            }
        }
    }
}

/// Accept or reject, with every reason found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardVerdict {
    pub accept: bool,
    pub reasons: Vec<GuardViolation>,
}

impl GuardVerdict {
    fn from_reasons(reasons: Vec<GuardViolation>) -> Self {
        Self {
            accept: reasons.is_empty(),
            reasons,
        }
    }
}

/// Integrity checks over original/cleaned payload pairs.
#[derive(Debug, Clone, Copy)]
pub struct SafetyGuard<'c> {
    catalog: &'c SignatureCatalog,
}

impl<'c> SafetyGuard<'c> {
    pub fn new(catalog: &'c SignatureCatalog) -> Self {
        Self { catalog }
    }

    pub fn check(&self, original: &Value, cleaned: &Value) -> GuardVerdict {
        let before = kind(original);
        let after = kind(cleaned);
        if before != after {
            return GuardVerdict::from_reasons(vec![GuardViolation::ShapeChanged { before, after }]);
        }

        let mut reasons = Vec::new();

        if let (Value::Object(orig), Value::Object(new)) = (original, cleaned) {
            for key in orig.keys() {
                if !self.is_ad_key(key) && !new.contains_key(key) {
                    reasons.push(GuardViolation::MissingSection(key.clone()));
                }
            }
        }

        let orig_stats = self.survey(original);
        let new_stats = self.survey(cleaned);

        for (path, count) in &orig_stats.formats {
            if new_stats.formats.get(path).copied().unwrap_or(0) < *count {
                reasons.push(GuardViolation::FormatsLost(path.clone()));
            }
        }

        for (key, &count) in &orig_stats.protected {
            let after = new_stats.protected.get(key).copied().unwrap_or(0);
            if after < count {
                reasons.push(GuardViolation::ProtectedFieldLost {
                    key: key.clone(),
                    before: count,
                    after,
                });
            }
        }

        GuardVerdict::from_reasons(reasons)
    }

    fn is_ad_key(&self, key: &str) -> bool {
        self.catalog.is_ad_json_key(key) && !self.catalog.is_protected_json_key(key)
    }

    /// Count protected keys and non-empty format lists, skipping ad-key
    /// subtrees. Format lists are keyed by their object path with array
    /// indices elided, since dropped elements shift indices.
    fn survey(&self, root: &Value) -> Survey {
        let mut survey = Survey::default();
        let mut stack: Vec<(&Value, String)> = vec![(root, String::new())];
        let container = self.catalog.format_container_key();

        while let Some((value, path)) = stack.pop() {
            match value {
                Value::Object(map) => {
                    for (key, child) in map {
                        if self.is_ad_key(key) {
                            continue;
                        }
                        if self.catalog.is_protected_json_key(key) {
                            *survey.protected.entry(key.clone()).or_default() += 1;
                        }
                        let child_path = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };

                        if key == container {
                            if let Value::Object(streaming) = child {
                                for list in self.catalog.format_list_keys() {
                                    let non_empty = streaming.get(*list).and_then(Value::as_array).is_some_and(|a| !a.is_empty());
                                    if non_empty {
                                        *survey.formats.entry(format!("{child_path}.{list}")).or_default() += 1;
                                    }
                                }
                            }
                        }
                        stack.push((child, child_path));
                    }
                }
                Value::Array(items) => {
                    let item_path = if path.is_empty() { "*".to_string() } else { format!("{path}.*") };
                    stack.extend(items.iter().map(|item| (item, item_path.clone())));
                }
                _ => {}
            }
        }

        survey
    }
}

#[derive(Default)]
struct Survey {
    protected: BTreeMap<String, usize>,
    formats: BTreeMap<String, usize>,
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(original: Value, cleaned: Value) -> GuardVerdict {
        let catalog = SignatureCatalog::builtin().unwrap();
        SafetyGuard::new(&catalog).check(&original, &cleaned)
    }

    #[test]
    fn accepts_removal_of_ad_sections() {
        let verdict = check(
            json!({"videoDetails": {"videoId": "a"}, "adPlacements": [{"title": "ad"}]}),
            json!({"videoDetails": {"videoId": "a"}}),
        );
        assert!(verdict.accept, "{:?}", verdict.reasons);
    }

    #[test]
    fn rejects_emptied_format_lists() {
        let original = json!({"streamingData": {"formats": [{"itag": 18}], "adaptiveFormats": []}, "adBreaks": []});
        let buggy = json!({"streamingData": {"formats": [], "adaptiveFormats": []}});
        let verdict = check(original, buggy);
        assert!(!verdict.accept);
        assert!(verdict.reasons.contains(&GuardViolation::FormatsLost("streamingData.formats".into())));
    }

    #[test]
    fn rejects_missing_sections_and_shape_changes() {
        let verdict = check(json!({"videoDetails": {}, "microformat": {}}), json!({"videoDetails": {}}));
        assert!(verdict.reasons.contains(&GuardViolation::MissingSection("microformat".into())));

        let verdict = check(json!({"a": 1}), json!([1]));
        assert_eq!(
            verdict.reasons,
            vec![GuardViolation::ShapeChanged { before: "object", after: "array" }]
        );
    }

    #[test]
    fn counts_protected_keys_outside_ad_subtrees() {
        let original = json!({
            "contents": [
                {"adSlotRenderer": {"videoId": "ad"}},
                {"videoRenderer": {"videoId": "v1"}},
                {"videoRenderer": {"videoId": "v2"}}
            ]
        });
        let dropped_ad = json!({"contents": [{"videoRenderer": {"videoId": "v1"}}, {"videoRenderer": {"videoId": "v2"}}]});
        assert!(check(original.clone(), dropped_ad).accept);

        let dropped_video = json!({"contents": [{"videoRenderer": {"videoId": "v1"}}]});
        let verdict = check(original, dropped_video);
        assert_eq!(
            verdict.reasons,
            vec![GuardViolation::ProtectedFieldLost { key: "videoId".into(), before: 2, after: 1 }]
        );
    }

    #[test]
    fn nested_format_lists_are_tracked() {
        let original = json!({"playerResponse": {"streamingData": {"adaptiveFormats": [{"itag": 137}]}}});
        let verdict = check(original, json!({"playerResponse": {"streamingData": {}}}));
        assert!(verdict.reasons.contains(&GuardViolation::FormatsLost(
            "playerResponse.streamingData.adaptiveFormats".into()
        )));
    }

    #[test]
    fn violations_render_readably() {
        let text = GuardViolation::FormatsLost("streamingData.formats".into()).to_string();
        assert_eq!(text, "format list 'streamingData.formats' was emptied");
    }
}

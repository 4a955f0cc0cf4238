//! Rule sources and record parsing
//!
//! A rule source is a JSON array. Each element is either a rule in the host
//! engine's shape (minus the ID) or a `{urlPattern, resourceTypes?, action?}`
//! shorthand. A document that is not an array fails the whole cycle;
//! individual bad records are skipped with a warning.

use std::fs;
use std::path::{Path, PathBuf};

use av_core::ResourceType;
use log::warn;
use serde::Deserialize;
use serde_json::Value;

use crate::rule::{CandidateRule, RuleAction, RuleCondition, DEFAULT_PRIORITY};

/// Error type for rule sources.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Rule source '{path}' is unavailable: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Rule source is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("Rule source must be a JSON array, found {0}")]
    NotASequence(&'static str),
}

/// Where rule text comes from.
pub trait RuleSource {
    fn load(&self) -> Result<String, SourceError>;
}

/// Rule text held in memory (bundled rules, tests).
#[derive(Debug, Clone)]
pub struct StaticSource {
    text: String,
}

impl StaticSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl RuleSource for StaticSource {
    fn load(&self) -> Result<String, SourceError> {
        Ok(self.text.clone())
    }
}

/// Rule text read from disk on every load.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl RuleSource for FileSource {
    fn load(&self) -> Result<String, SourceError> {
        fs::read_to_string(&self.path).map_err(|source| SourceError::Unavailable {
            path: self.path.clone(),
            source,
        })
    }
}

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRecord {
    #[serde(rename_all = "camelCase")]
    Full {
        condition: RawCondition,
        #[serde(default)]
        action: Option<RuleAction>,
        #[serde(default)]
        priority: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    Shorthand {
        url_pattern: String,
        #[serde(default)]
        resource_types: Vec<String>,
        #[serde(default)]
        action: Option<RuleAction>,
        #[serde(default)]
        priority: Option<u32>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCondition {
    #[serde(default, alias = "urlPattern")]
    url_filter: Option<String>,
    #[serde(default)]
    resource_types: Vec<String>,
}

impl RawRecord {
    fn into_candidate(self) -> Result<CandidateRule, String> {
        let (pattern, types, action, priority) = match self {
            Self::Full { condition, action, priority } => {
                (condition.url_filter.unwrap_or_default(), condition.resource_types, action, priority)
            }
            Self::Shorthand {
                url_pattern,
                resource_types,
                action,
                priority,
            } => (url_pattern, resource_types, action, priority),
        };

        let url_filter = pattern.trim();
        if url_filter.is_empty() {
            return Err("empty url pattern".to_string());
        }
        let priority = priority.unwrap_or(DEFAULT_PRIORITY);
        if priority == 0 {
            return Err("priority must be at least 1".to_string());
        }

        Ok(CandidateRule {
            priority,
            condition: RuleCondition {
                url_filter: url_filter.to_string(),
                resource_types: ResourceType::from_names(&types)?,
            },
            action: action.unwrap_or_default(),
        })
    }
}

/// Parsed candidates plus the number of skipped records.
#[derive(Debug, Default)]
pub struct ParsedSource {
    pub candidates: Vec<CandidateRule>,
    pub skipped: usize,
}

/// Parse rule-source text.
pub fn parse_source(text: &str) -> Result<ParsedSource, SourceError> {
    let document: Value = serde_json::from_str(text).map_err(SourceError::Malformed)?;
    let items = match document {
        Value::Array(items) => items,
        Value::Object(_) => return Err(SourceError::NotASequence("an object")),
        Value::String(_) => return Err(SourceError::NotASequence("a string")),
        Value::Number(_) => return Err(SourceError::NotASequence("a number")),
        Value::Bool(_) => return Err(SourceError::NotASequence("a boolean")),
        Value::Null => return Err(SourceError::NotASequence("null")),
    };

    let mut parsed = ParsedSource::default();
    for (index, item) in items.into_iter().enumerate() {
        let candidate = serde_json::from_value::<RawRecord>(item)
            .map_err(|e| e.to_string())
            .and_then(RawRecord::into_candidate);
        match candidate {
            Ok(candidate) => parsed.candidates.push(candidate),
            Err(reason) => {
                warn!("skipping rule record #{index}: {reason}");
                parsed.skipped += 1;
            }
        }
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Redirect;

    #[test]
    fn parses_both_record_shapes() {
        let parsed = parse_source(
            r#"[
                {"id": 4, "priority": 2, "action": {"type": "block"},
                 "condition": {"urlFilter": "||doubleclick.net^", "resourceTypes": ["script", "image"]}},
                {"urlPattern": "ads.example.com"},
                {"urlPattern": "track.example.com", "resourceTypes": ["ping"],
                 "action": {"type": "redirect", "redirect": {"url": "data:,"}}}
            ]"#,
        )
        .unwrap();

        assert_eq!(parsed.skipped, 0);
        let [full, short, redirect] = parsed.candidates.as_slice() else {
            panic!("expected three candidates");
        };
        assert_eq!(full.priority, 2);
        assert_eq!(full.condition.resource_types, ResourceType::SCRIPT | ResourceType::IMAGE);
        assert_eq!(short.condition.url_filter, "ads.example.com");
        assert_eq!(short.action, RuleAction::Block);
        assert_eq!(short.priority, DEFAULT_PRIORITY);
        assert_eq!(
            redirect.action,
            RuleAction::Redirect {
                redirect: Redirect { url: Some("data:,".into()), extension_path: None }
            }
        );
    }

    #[test]
    fn skips_bad_records() {
        let parsed = parse_source(
            r#"[
                {"urlPattern": "  "},
                {"urlPattern": "x.com", "resourceTypes": ["hologram"]},
                {"condition": {"resourceTypes": ["script"]}},
                {"urlPattern": "y.com", "priority": 0},
                42,
                {"urlPattern": "ok.com"}
            ]"#,
        )
        .unwrap();
        assert_eq!(parsed.skipped, 5);
        assert_eq!(parsed.candidates.len(), 1);
    }

    #[test]
    fn non_array_documents_are_fatal() {
        assert!(matches!(parse_source("{}"), Err(SourceError::NotASequence("an object"))));
        assert!(matches!(parse_source("[1,"), Err(SourceError::Malformed(_))));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let source = FileSource::new("/nonexistent/ad-vantage/rules.json");
        assert!(matches!(source.load(), Err(SourceError::Unavailable { .. })));
    }
}

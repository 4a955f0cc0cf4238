//! Declarative network rules in the host engine's JSON shape.

use av_core::ResourceType;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Default rule priority in the host engine.
pub const DEFAULT_PRIORITY: u32 = 1;

/// An installed (or installable) rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: u32,
    #[serde(default = "default_priority")]
    pub priority: u32,
    pub condition: RuleCondition,
    #[serde(default)]
    pub action: RuleAction,
}

fn default_priority() -> u32 {
    DEFAULT_PRIORITY
}

/// What a rule matches. An empty resource-type set means "any".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    pub url_filter: String,
    #[serde(
        default = "ResourceType::empty",
        skip_serializing_if = "ResourceType::is_empty",
        serialize_with = "serialize_types",
        deserialize_with = "deserialize_types"
    )]
    pub resource_types: ResourceType,
}

/// What a matching rule does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleAction {
    #[default]
    Block,
    Allow,
    Redirect { redirect: Redirect },
}

impl RuleAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Allow => "allow",
            Self::Redirect { .. } => "redirect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redirect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_path: Option<String>,
}

/// A parsed rule that has not been given an ID yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRule {
    pub priority: u32,
    pub condition: RuleCondition,
    pub action: RuleAction,
}

impl CandidateRule {
    pub fn with_id(self, id: u32) -> Rule {
        Rule {
            id,
            priority: self.priority,
            condition: self.condition,
            action: self.action,
        }
    }
}

fn serialize_types<S: Serializer>(types: &ResourceType, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(types.names())
}

fn deserialize_types<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ResourceType, D::Error> {
    let names = Vec::<String>::deserialize(deserializer)?;
    ResourceType::from_names(&names).map_err(serde::de::Error::custom)
}

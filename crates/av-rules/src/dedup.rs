//! Candidate rule deduplication.

use std::collections::HashSet;

use crate::rule::{CandidateRule, RuleAction};

pub struct DedupStats {
    pub before: usize,
    pub after: usize,
    pub deduped: usize,
}

/// Drop candidates whose `(urlFilter, action, resource types)` was already
/// seen. The first occurrence wins, so source order is preserved.
pub fn dedup_rules(rules: &mut Vec<CandidateRule>) -> DedupStats {
    let before = rules.len();

    let mut seen: HashSet<RuleKey> = HashSet::new();
    let mut deduped = 0usize;
    rules.retain(|rule| {
        if seen.insert(RuleKey::from(rule)) {
            true
        } else {
            deduped += 1;
            false
        }
    });

    DedupStats {
        before,
        after: rules.len(),
        deduped,
    }
}

/// URL filters match case-insensitively in the host engine, so the key does too.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RuleKey {
    url_filter: String,
    action: RuleAction,
    type_mask: u32,
}

impl From<&CandidateRule> for RuleKey {
    fn from(rule: &CandidateRule) -> Self {
        Self {
            url_filter: rule.condition.url_filter.to_ascii_lowercase(),
            action: rule.action.clone(),
            type_mask: rule.condition.resource_types.bits(),
        }
    }
}

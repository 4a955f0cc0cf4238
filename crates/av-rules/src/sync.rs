//! Network Rule Synchronizer
//!
//! Owned rules live at or above `OWNED_RULE_ID_BASE`; everything below
//! belongs to someone else and is never touched. Each cycle removes all owned
//! rules first and only then installs the fresh batch, so a failure anywhere
//! leaves zero owned rules rather than a stale or partial set.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::dedup::dedup_rules;
use crate::rule::Rule;
use crate::source::{parse_source, RuleSource, SourceError};

/// First ID of the synchronizer's namespace.
pub const OWNED_RULE_ID_BASE: u32 = 100_000;

/// Default cap on owned rules per batch.
pub const DEFAULT_MAX_RULES: usize = 30_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Candidates beyond this many are dropped.
    pub max_rules: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_rules: DEFAULT_MAX_RULES,
        }
    }
}

// =============================================================================
// Host rule engine
// =============================================================================

/// Error type for host rule engines.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleEngineError {
    #[error("Rule ID {0} is already installed")]
    DuplicateId(u32),
    #[error("Rule engine capacity exceeded: {requested} rules requested, limit is {limit}")]
    CapacityExceeded { limit: usize, requested: usize },
    #[error("Rule engine unavailable: {0}")]
    Unavailable(String),
}

/// The host's declarative rule engine.
pub trait RuleEngine {
    fn installed_rules(&self) -> Result<Vec<Rule>, RuleEngineError>;

    /// Remove `remove_ids`, then add `add`, as one batch. A rejected batch
    /// changes nothing.
    fn update_rules(&mut self, remove_ids: &[u32], add: Vec<Rule>) -> Result<(), RuleEngineError>;
}

/// In-memory rule engine with the host's uniqueness and capacity checks.
#[derive(Debug, Clone)]
pub struct MemoryRuleEngine {
    rules: BTreeMap<u32, Rule>,
    capacity: usize,
}

impl MemoryRuleEngine {
    pub fn new(capacity: usize) -> Self {
        Self {
            rules: BTreeMap::new(),
            capacity,
        }
    }

    /// Seed with rules declared by someone else.
    pub fn with_rules(capacity: usize, rules: impl IntoIterator<Item = Rule>) -> Self {
        Self {
            rules: rules.into_iter().map(|r| (r.id, r)).collect(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for MemoryRuleEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RULES + OWNED_RULE_ID_BASE as usize)
    }
}

impl RuleEngine for MemoryRuleEngine {
    fn installed_rules(&self) -> Result<Vec<Rule>, RuleEngineError> {
        Ok(self.rules.values().cloned().collect())
    }

    fn update_rules(&mut self, remove_ids: &[u32], add: Vec<Rule>) -> Result<(), RuleEngineError> {
        let mut next = self.rules.clone();
        for id in remove_ids {
            next.remove(id);
        }
        for rule in add {
            if next.contains_key(&rule.id) {
                return Err(RuleEngineError::DuplicateId(rule.id));
            }
            next.insert(rule.id, rule);
        }
        if next.len() > self.capacity {
            return Err(RuleEngineError::CapacityExceeded {
                limit: self.capacity,
                requested: next.len(),
            });
        }
        self.rules = next;
        Ok(())
    }
}

// =============================================================================
// Compilation and planning
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileStats {
    pub parsed: usize,
    pub skipped: usize,
    pub deduped: usize,
    pub truncated: usize,
    pub compiled: usize,
}

/// Parse, deduplicate and number rules from source text.
pub fn compile_rules(text: &str, config: &SyncConfig) -> Result<(Vec<Rule>, CompileStats), SourceError> {
    let parsed = parse_source(text)?;
    let mut candidates = parsed.candidates;
    let mut stats = CompileStats {
        parsed: candidates.len(),
        skipped: parsed.skipped,
        ..Default::default()
    };

    stats.deduped = dedup_rules(&mut candidates).deduped;

    if candidates.len() > config.max_rules {
        stats.truncated = candidates.len() - config.max_rules;
        warn!("rule source exceeds budget; dropping {} rule(s)", stats.truncated);
        candidates.truncate(config.max_rules);
    }

    let rules: Vec<Rule> = candidates
        .into_iter()
        .zip(OWNED_RULE_ID_BASE..)
        .map(|(candidate, id)| candidate.with_id(id))
        .collect();
    stats.compiled = rules.len();
    debug!(
        "compiled {} rule(s) ({} skipped, {} duplicate)",
        stats.compiled, stats.skipped, stats.deduped
    );

    Ok((rules, stats))
}

#[inline]
pub fn is_owned(id: u32) -> bool {
    id >= OWNED_RULE_ID_BASE
}

/// One synchronization batch, for hosts that apply updates themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPlan {
    pub remove_ids: Vec<u32>,
    pub add: Vec<Rule>,
}

/// Plan a cycle: drop every owned ID, add `compiled` when enabled.
pub fn plan(installed_ids: &[u32], desired_enabled: bool, compiled: Vec<Rule>) -> SyncPlan {
    SyncPlan {
        remove_ids: installed_ids.iter().copied().filter(|&id| is_owned(id)).collect(),
        add: if desired_enabled { compiled } else { Vec::new() },
    }
}

// =============================================================================
// Synchronizer
// =============================================================================

/// Error type for a synchronization cycle.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Engine(#[from] RuleEngineError),
}

pub struct RuleSynchronizer<S, E> {
    source: S,
    engine: E,
    config: SyncConfig,
}

impl<S: RuleSource, E: RuleEngine> RuleSynchronizer<S, E> {
    pub fn new(source: S, engine: E, config: SyncConfig) -> Self {
        Self { source, engine, config }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Bring owned rules in line with `desired_enabled`. Returns the number
    /// of rules installed.
    pub fn synchronize(&mut self, desired_enabled: bool) -> Result<usize, SyncError> {
        let result = self.run_cycle(desired_enabled);
        if let Err(e) = &result {
            warn!("rule synchronization failed: {e}");
        }
        result
    }

    fn run_cycle(&mut self, desired_enabled: bool) -> Result<usize, SyncError> {
        let installed = self.engine.installed_rules()?;
        let owned: Vec<u32> = installed.iter().map(|r| r.id).filter(|&id| is_owned(id)).collect();
        if !owned.is_empty() {
            self.engine.update_rules(&owned, Vec::new())?;
            debug!("removed {} owned rule(s)", owned.len());
        }

        if !desired_enabled {
            info!("blocking disabled; no rules applied");
            return Ok(0);
        }

        let text = self.source.load()?;
        let (rules, _) = compile_rules(&text, &self.config)?;
        let count = rules.len();
        if count > 0 {
            self.engine.update_rules(&[], rules)?;
        }
        info!("applied {count} rule(s)");
        Ok(count)
    }
}

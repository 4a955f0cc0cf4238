//! Ad-Vantage Rule Synchronizer
//!
//! Compiles a rule source into declarative network rules and keeps the host
//! rule engine's owned namespace in line with the persisted `enabled` flag.
//!
//! # Modules
//!
//! - `rule`: Rule, condition and action types in the host's JSON shape
//! - `source`: Rule sources and tolerant record parsing
//! - `dedup`: Candidate deduplication
//! - `sync`: Compilation, planning and the synchronization cycle
//! - `store`: Persisted enabled flag
//! - `control`: Control messages and the install/startup hook

pub mod control;
pub mod dedup;
pub mod rule;
pub mod source;
pub mod store;
pub mod sync;

pub use control::{ControlAction, ControlMessage, ControlResponse, Controller};
pub use rule::{Rule, RuleAction, RuleCondition};
pub use source::{FileSource, RuleSource, SourceError, StaticSource};
pub use store::{FileStateStore, MemoryStateStore, StateStore, StoreError};
pub use sync::{
    compile_rules, plan, CompileStats, MemoryRuleEngine, RuleEngine, RuleEngineError, RuleSynchronizer, SyncConfig,
    SyncError, SyncPlan, OWNED_RULE_ID_BASE,
};

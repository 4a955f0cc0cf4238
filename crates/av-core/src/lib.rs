//! Ad-Vantage Core Library
//!
//! This crate provides the page-side filtering engine for the Ad-Vantage
//! content filter: heuristic classification of DOM nodes, scheduled DOM
//! sweeps, and interception of outbound requests with structural cleaning of
//! JSON responses.
//!
//! # Architecture
//!
//! A `FilterEngine` is built once per page session. It owns the immutable
//! signature catalog and interception patterns; the classifier, payload
//! cleaner and safety guard are cheap borrowed views over it. The host
//! drives everything else: it supplies the DOM, the network transport and
//! the clock.
//!
//! # Modules
//!
//! - `catalog`: Versioned signature collections
//! - `classifier`: Heuristic ad classifier for nodes and JSON keys
//! - `dom`: Generational arena DOM with per-node sweep markers
//! - `scheduler`: Sweep triggers and the top-down sweep itself
//! - `payload`: Depth-bounded JSON cleaning
//! - `guard`: Integrity checks on cleaned payloads
//! - `intercept`: Network gateways, interception patterns and stubs
//! - `globals`: Cleaning of guarded page-global assignments
//! - `engine`: Session-wide owner of catalog, config and patterns
//! - `config`, `error`, `types`, `url`: Shared definitions

pub mod catalog;
pub mod classifier;
pub mod config;
pub mod dom;
pub mod engine;
pub mod error;
pub mod globals;
pub mod guard;
pub mod intercept;
pub mod payload;
pub mod scheduler;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use catalog::{SignatureCatalog, CATALOG_VERSION};
pub use classifier::Classifier;
pub use config::{ClassifierConfig, EngineConfig, PayloadConfig, SchedulerConfig};
pub use dom::{Document, NodeId, NodeSpec, Rect};
pub use engine::FilterEngine;
pub use error::EngineError;
pub use globals::GuardedGlobals;
pub use guard::{GuardVerdict, GuardViolation, SafetyGuard};
pub use intercept::{select_gateway, NetworkGateway, Request, Response, Transport};
pub use payload::{PayloadCleanResult, PayloadCleaner};
pub use scheduler::{SchedulerState, SweepReport, SweepScheduler};
pub use types::{ClassificationResult, Confidence, InterceptMode, ReasonCode, ResourceType, Verdict};

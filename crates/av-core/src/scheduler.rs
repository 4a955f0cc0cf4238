//! DOM Sweep Scheduler
//!
//! Decides when to sweep and performs sweeps. The scheduler owns no clock:
//! the host reports events with its own millisecond timestamps, calls
//! `poll(now)` when `next_deadline()` is reached, and every trigger funnels
//! into `sweep(root)`.
//!
//! # Triggers
//!
//! | Trigger                    | Scheduling                                |
//! |----------------------------|-------------------------------------------|
//! | `start`                    | immediate full sweep, arms the fallback   |
//! | `on_subtree_inserted(root)`| debounced per root, replaced not stacked  |
//! | `on_attribute_changed(n)`  | same as an insertion rooted at `n`        |
//! | `on_navigation`            | immediate full sweep, re-arms the fallback|
//! | `on_scroll`                | debounced, replaced                       |
//! | `on_visibility_change`     | short delay, foreground only              |
//! | fallback                   | fixed interval, cancelled after warm-up   |

use std::collections::BTreeMap;

use log::debug;
use serde::Serialize;

use crate::dom::{Document, NodeId};
use crate::engine::FilterEngine;
use crate::types::{Suppression, Verdict};
use crate::url::extract_host;

/// Lifecycle of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SchedulerState {
    Uninitialized,
    Active,
    Suspended,
}

/// What one or more sweeps did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub sweeps: usize,
    pub visited: usize,
    pub removed: usize,
    pub hidden: usize,
    pub ambiguous: usize,
}

impl SweepReport {
    pub fn suppressed(&self) -> usize {
        self.removed + self.hidden
    }

    pub fn merge(&mut self, other: &SweepReport) {
        self.sweeps += other.sweeps;
        self.visited += other.visited;
        self.removed += other.removed;
        self.hidden += other.hidden;
        self.ambiguous += other.ambiguous;
    }
}

pub struct SweepScheduler<'e> {
    engine: &'e FilterEngine,
    host_safelisted: bool,
    state: SchedulerState,
    started_at: u64,
    subtree_jobs: BTreeMap<NodeId, u64>,
    scroll_due: Option<u64>,
    visibility_due: Option<u64>,
    fallback_due: Option<u64>,
}

impl<'e> SweepScheduler<'e> {
    pub fn new(engine: &'e FilterEngine, page_url: &str) -> Self {
        let host = extract_host(page_url).unwrap_or(page_url);
        Self {
            engine,
            host_safelisted: engine.host_is_safelisted(host),
            state: SchedulerState::Uninitialized,
            started_at: 0,
            subtree_jobs: BTreeMap::new(),
            scroll_due: None,
            visibility_due: None,
            fallback_due: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Activate and run the initial sweep. Only the first call has an effect.
    pub fn start(&mut self, doc: &mut Document, now: u64) -> SweepReport {
        if self.state != SchedulerState::Uninitialized {
            return SweepReport::default();
        }
        self.state = SchedulerState::Active;
        self.arm_fallback(now);
        self.sweep_page(doc)
    }

    /// In-page navigation finished: the page is rebuilt without a reload.
    pub fn on_navigation(&mut self, doc: &mut Document, now: u64) -> SweepReport {
        if self.state != SchedulerState::Active {
            return SweepReport::default();
        }
        self.scroll_due = None;
        self.visibility_due = None;
        self.subtree_jobs.retain(|&root, _| doc.is_attached(root));
        self.arm_fallback(now);
        self.sweep_page(doc)
    }

    pub fn on_subtree_inserted(&mut self, root: NodeId, now: u64) {
        if self.state == SchedulerState::Active {
            let due = now.saturating_add(self.engine.config().scheduler.mutation_debounce_ms);
            self.subtree_jobs.insert(root, due);
        }
    }

    /// An attribute changed on `node`; it and its subtree are looked at again.
    pub fn on_attribute_changed(&mut self, node: NodeId, now: u64) {
        self.on_subtree_inserted(node, now);
    }

    pub fn on_scroll(&mut self, now: u64) {
        if self.state == SchedulerState::Active {
            self.scroll_due = Some(now.saturating_add(self.engine.config().scheduler.scroll_debounce_ms));
        }
    }

    pub fn on_visibility_change(&mut self, visible: bool, now: u64) {
        if self.state != SchedulerState::Active {
            return;
        }
        let delay = self.engine.config().scheduler.visibility_delay_ms;
        self.visibility_due = visible.then(|| now.saturating_add(delay));
    }

    /// Earliest time at which `poll` has work to do.
    pub fn next_deadline(&self) -> Option<u64> {
        self.subtree_jobs
            .values()
            .copied()
            .chain(self.scroll_due)
            .chain(self.visibility_due)
            .chain(self.fallback_due)
            .min()
    }

    /// Run every job due at `now`.
    pub fn poll(&mut self, doc: &mut Document, now: u64) -> SweepReport {
        let mut report = SweepReport::default();
        if self.state != SchedulerState::Active {
            return report;
        }

        let due_roots: Vec<NodeId> = self
            .subtree_jobs
            .iter()
            .filter(|(_, &due)| due <= now)
            .map(|(&root, _)| root)
            .collect();
        for root in due_roots {
            self.subtree_jobs.remove(&root);
            // Roots removed or detached since insertion are skipped.
            if doc.is_attached(root) {
                report.merge(&self.sweep(doc, root));
            }
        }

        let mut full_sweep = false;
        if self.scroll_due.is_some_and(|due| due <= now) {
            self.scroll_due = None;
            full_sweep = true;
        }
        if self.visibility_due.is_some_and(|due| due <= now) {
            self.visibility_due = None;
            full_sweep = true;
        }
        if let Some(due) = self.fallback_due.filter(|&due| due <= now) {
            let config = &self.engine.config().scheduler;
            let warmup_end = self.started_at.saturating_add(config.fallback_warmup_ms);
            let next = due.saturating_add(config.fallback_interval_ms);
            self.fallback_due = (next < warmup_end).then_some(next);
            full_sweep |= now < warmup_end;
            if self.fallback_due.is_none() {
                debug!("fallback sweep cancelled after warm-up");
            }
        }

        if full_sweep {
            let root = doc.root();
            report.merge(&self.sweep(doc, root));
        }
        report
    }

    /// Cancel all timers. Suppressed nodes stay suppressed.
    pub fn suspend(&mut self) {
        self.state = SchedulerState::Suspended;
        self.subtree_jobs.clear();
        self.scroll_due = None;
        self.visibility_due = None;
        self.fallback_due = None;
    }

    fn arm_fallback(&mut self, now: u64) {
        self.started_at = now;
        let config = &self.engine.config().scheduler;
        self.fallback_due = (config.fallback_interval_ms > 0 && config.fallback_interval_ms < config.fallback_warmup_ms)
            .then(|| now.saturating_add(config.fallback_interval_ms));
    }

    /// Full sweep, then lift a scroll lock an overlay may have left on `body`.
    fn sweep_page(&self, doc: &mut Document) -> SweepReport {
        let root = doc.root();
        let report = self.sweep(doc, root);
        if report.sweeps > 0 && self.engine.config().scheduler.release_scroll_lock {
            let body = std::iter::once(root)
                .chain(doc.descendants(root))
                .find(|&n| doc.tag(n) == Some("body"));
            if let Some(body) = body {
                if doc.remove_style_property(body, "overflow") {
                    debug!("released body scroll lock");
                }
            }
        }
        report
    }

    /// Classify and suppress everything under `root` (inclusive), top-down.
    pub fn sweep(&self, doc: &mut Document, root: NodeId) -> SweepReport {
        let mut report = SweepReport::default();
        if self.host_safelisted || self.state != SchedulerState::Active || !self.engine.is_enabled() {
            return report;
        }
        report.sweeps = 1;

        let classifier = self.engine.classifier();
        let catalog = self.engine.catalog();
        let min_confidence = self.engine.config().scheduler.min_confidence;
        let mut stack = vec![root];

        while let Some(node) = stack.pop() {
            let Some(tag) = doc.tag(node) else {
                continue;
            };
            if doc.is_hidden(node) {
                continue;
            }

            let is_structural = catalog.is_structural_tag(tag);
            let is_static = catalog.is_static_tag(tag);

            if !is_structural && !doc.is_processed(node) {
                report.visited += 1;
                let result = classifier.classify(doc, node);

                if result.is_actionable(min_confidence) {
                    match self.suppress(doc, node) {
                        Suppression::Removed => report.removed += 1,
                        Suppression::Hidden => report.hidden += 1,
                    }
                    debug!("suppressed node ({})", result.reason);
                    continue;
                }

                if result.verdict == Verdict::Ambiguous {
                    report.ambiguous += 1;
                }
                if is_static {
                    doc.mark_processed(node);
                }
            }

            stack.extend(doc.children(node).iter().rev().copied());
        }

        report
    }

    fn suppress(&self, doc: &mut Document, node: NodeId) -> Suppression {
        let detach_unsafe = node == doc.root()
            || doc.parent(node).is_none()
            || matches!(doc.tag(node), Some("html" | "head" | "body"));

        if self.engine.config().scheduler.prefer_removal && !detach_unsafe && doc.remove(node) {
            Suppression::Removed
        } else {
            doc.hide(node);
            Suppression::Hidden
        }
    }
}

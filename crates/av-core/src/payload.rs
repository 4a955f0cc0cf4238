//! Structured payload cleaning
//!
//! A depth-bounded visitor over `serde_json::Value` that builds a new tree
//! with ad keys removed. The input is never mutated, so the caller can always
//! fall back to the original when the safety guard rejects the result.

use std::collections::BTreeSet;

use log::debug;
use serde_json::{Map, Value};

use crate::classifier::Classifier;
use crate::config::PayloadConfig;

/// Outcome of one cleaning pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadCleanResult {
    pub original: Value,
    pub cleaned: Value,
    /// Dotted paths (`contents.3.adSlotRenderer`) of every removed key or
    /// dropped array element, relative to the payload root.
    pub lost_fields: BTreeSet<String>,
}

impl PayloadCleanResult {
    /// Did the pass change anything?
    pub fn is_modified(&self) -> bool {
        !self.lost_fields.is_empty() || self.original != self.cleaned
    }
}

/// A cleaned subtree plus whether it is left-over ad scaffolding.
struct Cleaned {
    value: Value,
    ad_only: bool,
}

impl Cleaned {
    fn keep(value: Value) -> Self {
        Self { value, ad_only: false }
    }
}

/// Removes ad keys from structured payloads.
pub struct PayloadCleaner<'c> {
    classifier: Classifier<'c>,
    config: &'c PayloadConfig,
}

impl<'c> PayloadCleaner<'c> {
    pub fn new(classifier: Classifier<'c>, config: &'c PayloadConfig) -> Self {
        Self { classifier, config }
    }

    /// Clean `payload`, returning the original alongside the new tree.
    pub fn clean(&self, payload: &Value) -> PayloadCleanResult {
        let mut lost_fields = BTreeSet::new();
        let mut path = Vec::new();
        let mut cleaned = self.visit(payload, 0, &mut path, &mut lost_fields).value;

        if self.config.normalize_playability {
            normalize_playability(&mut cleaned);
        }

        if !lost_fields.is_empty() {
            debug!("payload cleaned: {} field(s) removed", lost_fields.len());
        }

        PayloadCleanResult {
            original: payload.clone(),
            cleaned,
            lost_fields,
        }
    }

    fn visit(&self, value: &Value, depth: usize, path: &mut Vec<String>, lost: &mut BTreeSet<String>) -> Cleaned {
        if depth >= self.config.max_depth {
            return Cleaned::keep(value.clone());
        }

        match value {
            Value::Object(map) => self.visit_object(map, depth, path, lost),
            Value::Array(items) => self.visit_array(items, depth, path, lost),
            scalar => Cleaned::keep(scalar.clone()),
        }
    }

    /// An object is ad-only when ad keys were removed from it (or from a
    /// child that became ad-only) and every remaining entry is ad-only too.
    /// Objects carrying a protected key never are.
    fn visit_object(
        &self,
        map: &Map<String, Value>,
        depth: usize,
        path: &mut Vec<String>,
        lost: &mut BTreeSet<String>,
    ) -> Cleaned {
        let catalog = self.classifier.catalog();
        let mut out = Map::with_capacity(map.len());
        let mut stripped = false;
        let mut residue_only = true;
        let mut protected = false;

        for (key, child) in map {
            path.push(key.clone());
            if self.classifier.classify_payload_key(key, child) {
                lost.insert(path.join("."));
                stripped = true;
            } else {
                protected |= catalog.is_protected_json_key(key);
                let cleaned = self.visit(child, depth + 1, path, lost);
                stripped |= cleaned.ad_only;
                residue_only &= cleaned.ad_only;
                out.insert(key.clone(), cleaned.value);
            }
            path.pop();
        }

        Cleaned {
            value: Value::Object(out),
            ad_only: stripped && residue_only && !protected,
        }
    }

    fn visit_array(&self, items: &[Value], depth: usize, path: &mut Vec<String>, lost: &mut BTreeSet<String>) -> Cleaned {
        let mut out = Vec::with_capacity(items.len());

        for (index, item) in items.iter().enumerate() {
            path.push(index.to_string());
            let cleaned = self.visit(item, depth + 1, path, lost);
            if cleaned.ad_only {
                lost.insert(path.join("."));
            } else {
                out.push(cleaned.value);
            }
            path.pop();
        }

        Cleaned::keep(Value::Array(out))
    }
}

/// Force `playabilityStatus.status` to "OK" at the top level and under
/// `playerResponse`.
fn normalize_playability(payload: &mut Value) {
    for pointer in ["/playabilityStatus/status", "/playerResponse/playabilityStatus/status"] {
        if let Some(status) = payload.pointer_mut(pointer) {
            if status.is_string() && status.as_str() != Some("OK") {
                debug!("normalizing {} from {}", pointer, status);
                *status = Value::String("OK".to_string());
            }
        }
    }
}

//! Filter engine
//!
//! Owns the catalog, configuration and interception patterns for a page
//! session. Everything else borrows from it. The only mutable state is the
//! `enabled` flag, kept atomic so one engine can be shared process-wide.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use serde_json::Value;

use crate::catalog::SignatureCatalog;
use crate::classifier::Classifier;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::guard::SafetyGuard;
use crate::intercept::{hard_block_response, PatternSet, Response};
use crate::payload::{PayloadCleanResult, PayloadCleaner};
use crate::types::InterceptMode;

/// Anti-JSON-hijacking prefix some endpoints put before the body.
pub const XSSI_PREFIX: &[u8] = b")]}'";

#[derive(Debug)]
pub struct FilterEngine {
    catalog: SignatureCatalog,
    config: EngineConfig,
    patterns: PatternSet,
    enabled: AtomicBool,
}

impl FilterEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let catalog = SignatureCatalog::builtin()?.with_extra_safelisted_hosts(config.extra_host_safelist.iter());
        let patterns = PatternSet::from_catalog(&catalog);
        debug!("engine ready: {} interception patterns", patterns.len());

        Ok(Self {
            catalog,
            config,
            patterns,
            enabled: AtomicBool::new(true),
        })
    }

    pub fn with_defaults() -> Result<Self, EngineError> {
        Self::new(EngineConfig::default())
    }

    pub fn catalog(&self) -> &SignatureCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Stops (or resumes) future effects. Earlier effects are not undone.
    pub fn set_enabled(&self, enabled: bool) {
        if self.enabled.swap(enabled, Ordering::Relaxed) != enabled {
            info!("filtering {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub fn classifier(&self) -> Classifier<'_> {
        Classifier::new(&self.catalog, &self.config.classifier)
    }

    pub fn cleaner(&self) -> PayloadCleaner<'_> {
        PayloadCleaner::new(self.classifier(), &self.config.payload)
    }

    pub fn guard(&self) -> SafetyGuard<'_> {
        SafetyGuard::new(&self.catalog)
    }

    pub fn host_is_safelisted(&self, host: &str) -> bool {
        self.catalog.host_is_safelisted(host)
    }

    /// Interception mode for `url`; `None` while disabled.
    pub fn intercept_mode(&self, url: &str) -> Option<InterceptMode> {
        if !self.is_enabled() {
            return None;
        }
        self.patterns.mode_for(url)
    }

    pub fn hard_block_response(&self, url: &str) -> Response {
        hard_block_response(&self.catalog, url)
    }

    // =========================================================================
    // Payloads
    // =========================================================================

    /// Clean and guard a payload. A rejected result is an error carrying the
    /// violations.
    pub fn scrub(&self, payload: &Value) -> Result<PayloadCleanResult, EngineError> {
        let result = self.cleaner().clean(payload);
        let verdict = self.guard().check(&result.original, &result.cleaned);
        if verdict.accept {
            Ok(result)
        } else {
            Err(EngineError::IntegrityViolation(verdict.reasons))
        }
    }

    /// Return `cleaned` if the guard accepts it against `original`, the
    /// original otherwise.
    pub fn release(&self, original: Value, cleaned: Value) -> Value {
        let verdict = self.guard().check(&original, &cleaned);
        if verdict.accept {
            cleaned
        } else {
            warn!("{}", EngineError::IntegrityViolation(verdict.reasons));
            original
        }
    }

    /// Clean a value assigned to a guarded global. Non-structured values and
    /// unguarded names pass through.
    pub fn clean_global(&self, name: &str, value: Value) -> Value {
        if !self.is_enabled() || !self.catalog.is_guarded_global(name) || !(value.is_object() || value.is_array()) {
            return value;
        }
        let cleaned = self.cleaner().clean(&value).cleaned;
        debug!("cleaned assignment to {name}");
        self.release(value, cleaned)
    }

    /// Rewrite a JSON response body. `Ok(None)` means nothing was removed.
    pub fn rewrite_body(&self, content_type: &str, body: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        if !content_type.to_ascii_lowercase().contains("json") {
            return Err(EngineError::NotJson(content_type.to_string()));
        }

        let (prefix, json) = split_xssi_prefix(body);
        let payload: Value = serde_json::from_slice(json).map_err(EngineError::PayloadParse)?;
        let result = self.scrub(&payload)?;
        if !result.is_modified() {
            return Ok(None);
        }

        let mut out = prefix.to_vec();
        serde_json::to_writer(&mut out, &result.cleaned).map_err(EngineError::PayloadSerialize)?;
        Ok(Some(out))
    }

    /// Rewrite a fetched response, releasing it unchanged on any failure.
    pub fn rewrite_response(&self, url: &str, mut response: Response) -> Response {
        if !response.is_success() {
            return response;
        }

        let content_type = response.header("content-type").unwrap_or("").to_string();
        match self.rewrite_body(&content_type, &response.body) {
            Ok(Some(body)) => {
                debug!("rewrote {url}");
                response.body = body;
                response.remove_header("content-length");
                response.set_header("content-type", "application/json");
                response
            }
            Ok(None) => response,
            Err(e) => {
                debug!("releasing original for {url}: {e}");
                response
            }
        }
    }
}

/// Split off `)]}'` and the line break after it, if present.
fn split_xssi_prefix(body: &[u8]) -> (&[u8], &[u8]) {
    if !body.starts_with(XSSI_PREFIX) {
        return (&[], body);
    }
    let mut end = XSSI_PREFIX.len();
    if body.get(end) == Some(&b'\r') {
        end += 1;
    }
    if body.get(end) == Some(&b'\n') {
        end += 1;
    }
    body.split_at(end)
}

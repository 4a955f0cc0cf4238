//! Guarded page globals
//!
//! Inline page scripts assign the initial player response and page data to
//! well-known globals before any network call happens. The host routes those
//! assignments through `assign` so the stored value is already cleaned and
//! guarded when page code first reads it.
//!
//! Ad libraries that were blocked leave page code calling into globals that
//! never got defined; `ad_api_stub_script` defines inert stand-ins for them.

use std::collections::HashMap;
use std::fmt::Write;

use serde_json::Value;

use crate::engine::FilterEngine;

pub struct GuardedGlobals<'e> {
    engine: &'e FilterEngine,
    values: HashMap<String, Value>,
}

impl<'e> GuardedGlobals<'e> {
    pub fn new(engine: &'e FilterEngine) -> Self {
        Self {
            engine,
            values: HashMap::new(),
        }
    }

    /// Store `value` under `name`, cleaning it first when `name` is guarded.
    pub fn assign(&mut self, name: &str, value: Value) -> &Value {
        let stored = self.engine.clean_global(name, value);
        let slot = self.values.entry(name.to_string()).or_insert(Value::Null);
        *slot = stored;
        slot
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn is_guarded(&self, name: &str) -> bool {
        self.engine.catalog().is_guarded_global(name)
    }

    /// Script that defines each stubbed ad API still undefined when it runs.
    /// Names already assigned through `assign` are left out.
    pub fn ad_api_stub_script(&self) -> String {
        let mut script = String::new();
        for (name, stub) in self.engine.catalog().ad_api_stubs() {
            if self.values.contains_key(name) {
                continue;
            }
            let _ = writeln!(
                script,
                "if (typeof window.{name} === 'undefined') {{ window.{name} = {stub}; }}"
            );
        }
        script
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assignments_are_cleaned_before_reads() {
        let engine = FilterEngine::with_defaults().unwrap();
        let mut globals = GuardedGlobals::new(&engine);

        globals.assign(
            "ytInitialPlayerResponse",
            json!({"adPlacements": [{}], "playerAds": [], "streamingData": {"formats": [{"itag": 22}]}}),
        );
        assert_eq!(
            globals.get("ytInitialPlayerResponse"),
            Some(&json!({"streamingData": {"formats": [{"itag": 22}]}}))
        );

        let stored = globals.assign("ytcfg", json!({"adPlacements": []})).clone();
        assert_eq!(stored, json!({"adPlacements": []}));
        assert!(globals.is_guarded("ytInitialData"));
        assert!(!globals.is_guarded("ytcfg"));
    }

    #[test]
    fn stub_script_defines_missing_ad_apis_only() {
        let engine = FilterEngine::with_defaults().unwrap();
        let mut globals = GuardedGlobals::new(&engine);

        let script = globals.ad_api_stub_script();
        assert!(script.contains("if (typeof window.googletag === 'undefined') { window.googletag = {cmd: []"));
        assert!(script.contains("window.adsbygoogle = [];"));
        assert_eq!(script.lines().count(), 2);

        globals.assign("adsbygoogle", json!([{"google_ad_client": "ca-pub-1"}]));
        let script = globals.ad_api_stub_script();
        assert!(!script.contains("adsbygoogle"));
        assert!(script.contains("window.googletag = {cmd: []"));
    }

    #[test]
    fn scalar_assignments_pass_through() {
        let engine = FilterEngine::with_defaults().unwrap();
        let mut globals = GuardedGlobals::new(&engine);
        assert_eq!(globals.assign("ytInitialData", json!("pending")), &json!("pending"));
    }
}

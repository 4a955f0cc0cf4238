//! WebAssembly bindings for Ad-Vantage
//!
//! The page script and the background worker load the same module. Page
//! helpers work on one process-wide `FilterEngine`; the rule helpers are pure
//! and leave applying the batch to the host.

use std::sync::OnceLock;

use av_core::{
    intercept::INERT_IMAGE_DATA_URL, url::extract_host, Document, EngineConfig, FilterEngine, GuardedGlobals,
    InterceptMode, NodeSpec,
};
use av_rules::{compile_rules, plan, CompileStats, ControlAction, ControlMessage, ControlResponse, SyncConfig, SyncPlan};
use serde::Serialize;
use serde_json::Value;
use wasm_bindgen::prelude::*;

mod console;

static ENGINE: OnceLock<FilterEngine> = OnceLock::new();

#[wasm_bindgen]
pub fn init(config_json: Option<String>) -> Result<(), JsValue> {
    if ENGINE.get().is_some() {
        return Err(JsValue::from_str("Already initialized. Reload the page to reinitialize."));
    }
    console::install();

    let engine = build_engine(config_json.as_deref()).map_err(|e| JsValue::from_str(&e))?;
    ENGINE
        .set(engine)
        .map_err(|_| JsValue::from_str("Failed to set engine state"))?;

    log::debug!("engine initialized");
    Ok(())
}

#[wasm_bindgen]
pub fn is_initialized() -> bool {
    ENGINE.get().is_some()
}

#[wasm_bindgen]
pub fn set_enabled(enabled: bool) {
    if let Some(engine) = ENGINE.get() {
        engine.set_enabled(enabled);
    }
}

/// Whether page-level filtering should run on `page_url` at all.
#[wasm_bindgen]
pub fn is_page_filtered(page_url: &str) -> bool {
    ENGINE.get().is_some_and(|engine| page_filtered(engine, page_url))
}

#[wasm_bindgen]
pub fn intercept_request(url: &str) -> JsValue {
    let decision = match ENGINE.get() {
        Some(engine) => interception(engine, url),
        None => Interception::pass(),
    };

    let result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&result, &"action".into(), &JsValue::from_str(decision.action));
    if let Some(status) = decision.status {
        let _ = js_sys::Reflect::set(&result, &"status".into(), &JsValue::from(status));
    }
    if let Some(content_type) = &decision.content_type {
        let _ = js_sys::Reflect::set(&result, &"contentType".into(), &JsValue::from_str(content_type));
    }
    if let Some(body) = &decision.body {
        let _ = js_sys::Reflect::set(&result, &"body".into(), &JsValue::from_str(body));
    }
    result.into()
}

/// Cleaned body text, or `undefined` when the original should be released.
#[wasm_bindgen]
pub fn rewrite_response(url: &str, content_type: &str, body: &str) -> Option<String> {
    ENGINE.get().and_then(|engine| rewritten_body(engine, url, content_type, body))
}

#[wasm_bindgen]
pub fn should_neutralize_beacon(url: &str) -> bool {
    ENGINE.get().is_some_and(|engine| engine.intercept_mode(url) == Some(InterceptMode::HardBlock))
}

#[wasm_bindgen]
pub fn image_source(url: &str) -> String {
    match ENGINE.get() {
        Some(engine) => image_source_for(engine, url),
        None => url.to_string(),
    }
}

/// Clean a JSON value assigned to a page global. Returns the text to assign.
#[wasm_bindgen]
pub fn guard_global(name: &str, json: &str) -> String {
    match ENGINE.get() {
        Some(engine) => guarded_global_json(engine, name, json),
        None => json.to_string(),
    }
}

/// Script defining inert ad library globals; run it before page scripts.
#[wasm_bindgen]
pub fn ad_api_stubs() -> String {
    match ENGINE.get() {
        Some(engine) => GuardedGlobals::new(engine).ad_api_stub_script(),
        None => String::new(),
    }
}

#[wasm_bindgen]
pub fn classify_node(spec_json: &str) -> Result<JsValue, JsValue> {
    let engine = ENGINE
        .get()
        .ok_or_else(|| JsValue::from_str("Engine not initialized"))?;
    let json = classify_node_json(engine, spec_json).map_err(|e| JsValue::from_str(&e))?;
    js_sys::JSON::parse(&json)
}

#[wasm_bindgen]
pub fn companion_stylesheet() -> String {
    match ENGINE.get() {
        Some(engine) => engine.catalog().companion_stylesheet(),
        None => String::new(),
    }
}

/// Compile `source_json` and plan the batch that brings the host's rules in
/// line with `enabled`.
#[wasm_bindgen]
pub fn plan_rules(source_json: &str, installed_ids: Vec<u32>, enabled: bool) -> Result<JsValue, JsValue> {
    let json = plan_rules_json(source_json, &installed_ids, enabled).map_err(|e| JsValue::from_str(&e))?;
    js_sys::JSON::parse(&json)
}

#[wasm_bindgen]
pub fn handle_control(message_json: &str, stored_enabled: Option<bool>) -> Result<JsValue, JsValue> {
    let now = js_sys::Date::now() as u64;
    let json = control_json(message_json, stored_enabled, now).map_err(|e| JsValue::from_str(&e))?;
    js_sys::JSON::parse(&json)
}

// =============================================================================
// Host-independent helpers
// =============================================================================

fn build_engine(config_json: Option<&str>) -> Result<FilterEngine, String> {
    let config = match config_json {
        Some(text) if !text.trim().is_empty() => EngineConfig::from_json(text).map_err(|e| e.to_string())?,
        _ => EngineConfig::default(),
    };
    FilterEngine::new(config).map_err(|e| e.to_string())
}

fn page_filtered(engine: &FilterEngine, page_url: &str) -> bool {
    let host = extract_host(page_url).unwrap_or(page_url);
    engine.is_enabled() && !engine.host_is_safelisted(host)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Interception {
    action: &'static str,
    status: Option<u16>,
    content_type: Option<String>,
    body: Option<String>,
}

impl Interception {
    fn pass() -> Self {
        Self {
            action: "pass",
            status: None,
            content_type: None,
            body: None,
        }
    }
}

fn interception(engine: &FilterEngine, url: &str) -> Interception {
    match engine.intercept_mode(url) {
        Some(InterceptMode::HardBlock) => {
            let stub = engine.hard_block_response(url);
            Interception {
                action: "block",
                status: Some(stub.status),
                content_type: stub.header("content-type").map(str::to_string),
                body: Some(String::from_utf8_lossy(&stub.body).into_owned()),
            }
        }
        Some(InterceptMode::JsonRewrite) => Interception {
            action: "rewrite",
            ..Interception::pass()
        },
        None => Interception::pass(),
    }
}

fn rewritten_body(engine: &FilterEngine, url: &str, content_type: &str, body: &str) -> Option<String> {
    if engine.intercept_mode(url) != Some(InterceptMode::JsonRewrite) {
        return None;
    }
    match engine.rewrite_body(content_type, body.as_bytes()) {
        Ok(Some(bytes)) => String::from_utf8(bytes).ok(),
        Ok(None) => None,
        Err(e) => {
            log::debug!("releasing original for {url}: {e}");
            None
        }
    }
}

fn image_source_for(engine: &FilterEngine, url: &str) -> String {
    if engine.intercept_mode(url) == Some(InterceptMode::HardBlock) {
        INERT_IMAGE_DATA_URL.to_string()
    } else {
        url.to_string()
    }
}

fn guarded_global_json(engine: &FilterEngine, name: &str, json: &str) -> String {
    let value: Value = match serde_json::from_str(json) {
        Ok(value) => value,
        Err(_) => return json.to_string(),
    };
    let cleaned = engine.clean_global(name, value);
    serde_json::to_string(&cleaned).unwrap_or_else(|_| json.to_string())
}

fn classify_node_json(engine: &FilterEngine, spec_json: &str) -> Result<String, String> {
    let spec: NodeSpec = serde_json::from_str(spec_json).map_err(|e| format!("Invalid node spec: {e}"))?;
    let doc = Document::from_spec(&spec);
    let result = engine.classifier().classify(&doc, doc.root());
    serde_json::to_string(&result).map_err(|e| e.to_string())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RulePlan {
    #[serde(flatten)]
    plan: SyncPlan,
    stats: CompileStats,
}

fn plan_rules_json(source_json: &str, installed_ids: &[u32], enabled: bool) -> Result<String, String> {
    let (compiled, stats) = if enabled {
        compile_rules(source_json, &SyncConfig::default()).map_err(|e| e.to_string())?
    } else {
        (Vec::new(), CompileStats::default())
    };
    let plan = plan(installed_ids, enabled, compiled);
    log::info!("planned {} removal(s), {} addition(s)", plan.remove_ids.len(), plan.add.len());
    serde_json::to_string(&RulePlan { plan, stats }).map_err(|e| e.to_string())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ControlReply {
    action: ControlAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<ControlResponse>,
}

fn control_json(message_json: &str, stored_enabled: Option<bool>, now: u64) -> Result<String, String> {
    let message =
        ControlMessage::from_json(message_json).map_err(|e| format!("unrecognized control message: {e}"))?;
    let action = message.action(stored_enabled);
    let response = match action {
        ControlAction::Pong => Some(ControlResponse::pong(now)),
        ControlAction::Synchronize { .. } => None,
    };
    serde_json::to_string(&ControlReply { action, response }).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> FilterEngine {
        build_engine(None).unwrap()
    }

    #[test]
    fn config_errors_are_reported() {
        assert!(build_engine(Some("")).is_ok());
        assert!(build_engine(Some(r#"{"payload": {"maxDepth": 8}}"#)).is_ok());
        assert!(build_engine(Some("{\"payload\": 3}")).unwrap_err().starts_with("Invalid engine configuration"));
    }

    #[test]
    fn interception_actions() {
        let e = engine();
        let blocked = interception(&e, "https://pagead2.googlesyndication.com/pagead/js/adsbygoogle.js");
        assert_eq!(blocked.action, "block");
        assert_eq!(blocked.status, Some(200));
        assert!(blocked.body.unwrap().contains("google_ad_status"));

        assert_eq!(interception(&e, "https://www.youtube.com/youtubei/v1/player").action, "rewrite");
        assert_eq!(interception(&e, "https://example.com/app.js"), Interception::pass());

        e.set_enabled(false);
        assert_eq!(interception(&e, "https://www.youtube.com/youtubei/v1/player").action, "pass");
    }

    #[test]
    fn rewrite_and_release() {
        let e = engine();
        let body = json!({"videoDetails": {"videoId": "x"}, "adPlacements": [{"kind": "preroll"}]}).to_string();
        let url = "https://www.youtube.com/youtubei/v1/player";

        let cleaned = rewritten_body(&e, url, "application/json", &body).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&cleaned).unwrap(), json!({"videoDetails": {"videoId": "x"}}));

        assert_eq!(rewritten_body(&e, url, "text/html", &body), None);
        assert_eq!(rewritten_body(&e, "https://example.com/api", "application/json", &body), None);
    }

    #[test]
    fn guarded_globals_and_images() {
        let e = engine();
        let json = r#"{"videoDetails": {"title": "t"}, "playerAds": [1]}"#;
        let cleaned: Value = serde_json::from_str(&guarded_global_json(&e, "ytInitialPlayerResponse", json)).unwrap();
        assert_eq!(cleaned, json!({"videoDetails": {"title": "t"}}));

        assert_eq!(guarded_global_json(&e, "somethingElse", json), json);
        assert_eq!(guarded_global_json(&e, "ytInitialPlayerResponse", "not json"), "not json");

        assert_eq!(image_source_for(&e, "https://cdn.example.com/cat.png"), "https://cdn.example.com/cat.png");
        assert_eq!(image_source_for(&e, "https://www.youtube.com/pagead/adview?x=1"), INERT_IMAGE_DATA_URL);
    }

    #[test]
    fn safelisted_pages_are_not_filtered() {
        let e = engine();
        assert!(page_filtered(&e, "https://www.youtube.com/watch?v=1"));
        assert!(!page_filtered(&e, "https://mail.google.com/mail/u/0/"));
    }

    #[test]
    fn node_classification() {
        let e = engine();
        let ad: Value = serde_json::from_str(
            &classify_node_json(&e, r#"{"tag": "div", "attributes": {"class": "ad-slot"}}"#).unwrap(),
        )
        .unwrap();
        assert_eq!(ad["verdict"], "ad");

        let plain: Value =
            serde_json::from_str(&classify_node_json(&e, r#"{"tag": "p", "text": "hello"}"#).unwrap()).unwrap();
        assert_eq!(plain["verdict"], "notAd");

        assert!(classify_node_json(&e, "[]").is_err());
    }

    #[test]
    fn rule_plans() {
        let source = r#"[{"urlPattern": "ads.example.com"}, {"urlPattern": "ads.example.com"}]"#;
        let planned: Value = serde_json::from_str(&plan_rules_json(source, &[7, 100_000], true).unwrap()).unwrap();
        assert_eq!(planned["removeIds"], json!([100_000]));
        assert_eq!(planned["add"][0]["id"], 100_000);
        assert_eq!(planned["stats"]["deduped"], 1);

        let disabled: Value = serde_json::from_str(&plan_rules_json("garbage", &[100_003], false).unwrap()).unwrap();
        assert_eq!(disabled["add"], json!([]));
        assert_eq!(disabled["removeIds"], json!([100_003]));

        assert!(plan_rules_json("{}", &[], true).is_err());
    }

    #[test]
    fn control_replies() {
        let reply: Value = serde_json::from_str(&control_json(r#"{"type": "ping"}"#, None, 42).unwrap()).unwrap();
        assert_eq!(reply, json!({"action": {"kind": "pong"}, "response": {"ok": true, "timestamp": 42}}));

        let reply: Value =
            serde_json::from_str(&control_json(r#"{"type": "reload-rules"}"#, Some(false), 0).unwrap()).unwrap();
        assert_eq!(reply, json!({"action": {"kind": "synchronize", "enabled": false, "persist": false}}));

        assert!(control_json(r#"{"type": "nope"}"#, None, 0).is_err());
    }
}

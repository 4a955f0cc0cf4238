//! End-to-end behavior of the page-side pipeline.

use std::cell::Cell;

use av_core::guard::GuardViolation;
use av_core::intercept::{FilteringGateway, INERT_SCRIPT_BODY};
use av_core::{
    Document, EngineError, FilterEngine, NetworkGateway, NodeId, NodeSpec, Rect, Request, Response, SweepScheduler, Transport,
    Verdict,
};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

/// Counts fetches; never expected to be called for blocked URLs.
struct CountingTransport {
    fetches: Cell<usize>,
}

impl Transport for &CountingTransport {
    fn fetch(&self, _request: &Request) -> Result<Response, EngineError> {
        self.fetches.set(self.fetches.get() + 1);
        Ok(Response::new(200))
    }

    fn send_beacon(&self, _url: &str, _body: &[u8]) -> bool {
        true
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn player_response_loses_ads_keeps_details() {
    let engine = FilterEngine::with_defaults().unwrap();
    let payload = json!({
        "videoDetails": {"videoId": "dQw4w9WgXcQ", "title": "x", "lengthSeconds": "212"},
        "adPlacements": [{"adPlacementRenderer": {"config": {}}}]
    });

    let result = engine.scrub(&payload).unwrap();
    assert_eq!(result.cleaned, json!({"videoDetails": payload["videoDetails"].clone()}));
    assert_eq!(result.original, payload);
}

#[test]
fn buggy_pass_that_strips_streaming_data_is_rejected() {
    let engine = FilterEngine::with_defaults().unwrap();
    let original = json!({
        "streamingData": {"formats": [{"itag": 18, "url": "https://r1.example/videoplayback"}]},
        "adBreaks": [{"offset": 0}]
    });
    let buggy = json!({});

    let verdict = engine.guard().check(&original, &buggy);
    assert!(!verdict.accept);
    assert!(verdict.reasons.contains(&GuardViolation::MissingSection("streamingData".into())));
    assert!(verdict.reasons.contains(&GuardViolation::FormatsLost("streamingData.formats".into())));

    assert_eq!(engine.release(original.clone(), buggy), original);
}

#[test]
fn youtube_page_sweep() {
    let engine = FilterEngine::with_defaults().unwrap();
    let spec: NodeSpec = serde_json::from_value(json!({
        "tag": "html",
        "children": [{
            "tag": "body",
            "children": [
                {"tag": "div", "attributes": {"id": "masthead-ad"}},
                {"tag": "ytd-rich-grid-renderer", "children": [
                    {"tag": "ytd-rich-item-renderer", "children": [{"tag": "ytd-ad-slot-renderer"}]},
                    {"tag": "ytd-rich-item-renderer", "children": [{"tag": "a", "attributes": {"href": "/watch?v=1"}, "text": "Video"}]}
                ]},
                {"tag": "div", "attributes": {"id": "guide", "class": "guide-menu"}, "children": [
                    {"tag": "a"}, {"tag": "a"}, {"tag": "a"}, {"tag": "a"}
                ]},
                {"tag": "img", "attributes": {"src": "https://pagead2.googlesyndication.com/pagead/1x1.gif"}}
            ]
        }]
    }))
    .unwrap();
    let mut doc = Document::from_spec(&spec);
    let before = doc.len();

    let mut scheduler = SweepScheduler::new(&engine, "https://www.youtube.com/");
    let report = scheduler.start(&mut doc, 0);

    assert_eq!(report.removed, 3);
    assert_eq!(report.hidden, 0);
    assert_eq!(doc.len(), before - 3);
    let tags: Vec<_> = doc.descendants(doc.root()).filter_map(|n| doc.tag(n)).collect();
    assert!(!tags.contains(&"ytd-ad-slot-renderer"));
    assert!(!tags.contains(&"img"));
    assert_eq!(tags.iter().filter(|t| **t == "a").count(), 5);
}

#[test]
fn blocked_script_requests_get_inert_stubs() {
    let engine = FilterEngine::with_defaults().unwrap();
    let transport = CountingTransport { fetches: Cell::new(0) };
    let gateway = FilteringGateway::new(&engine, &transport);

    let response = gateway
        .request(&Request::get("https://www.googletagservices.com/doubleclick/pubads_impl.js"))
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, INERT_SCRIPT_BODY.as_bytes());
    assert_eq!(transport.fetches.get(), 0);
}

#[test]
fn disclosure_line_does_not_take_the_login_form_with_it() {
    let engine = FilterEngine::with_defaults().unwrap();
    let spec: NodeSpec = serde_json::from_value(json!({
        "tag": "html",
        "children": [{
            "tag": "body",
            "children": [{
                "tag": "div",
                "children": [
                    {"tag": "form", "children": [
                        {"tag": "p", "text": "Log in to your account"},
                        {"tag": "input", "attributes": {"type": "password"}}
                    ]},
                    {"tag": "p", "text": "Sponsored by Acme"}
                ]
            }]
        }]
    }))
    .unwrap();
    let mut doc = Document::from_spec(&spec);

    let mut scheduler = SweepScheduler::new(&engine, "https://shop.example.com/");
    let report = scheduler.start(&mut doc, 0);

    assert_eq!(report.removed, 1);
    let tags: Vec<_> = doc.descendants(doc.root()).filter_map(|n| doc.tag(n)).collect();
    assert_eq!(tags, ["body", "div", "form", "p", "input"]);
}

#[test]
fn ad_tokens_in_query_strings_are_blocked() {
    let engine = FilterEngine::with_defaults().unwrap();
    let transport = CountingTransport { fetches: Cell::new(0) };
    let gateway = FilteringGateway::new(&engine, &transport);

    for url in [
        "https://cdn.example.com/loader.js?src=pagead2.googlesyndication.com",
        "https://example.com/r?u=https%3A%2F%2Fexample.com&via=https://GoogleAds.G.DoubleClick.net/x",
    ] {
        let response = gateway.request(&Request::get(url)).unwrap();
        assert!(response.status == 200 || response.status == 204, "{url}");
    }
    assert_eq!(transport.fetches.get(), 0);

    gateway.request(&Request::get("https://example.com/app.js?v=3")).unwrap();
    assert_eq!(transport.fetches.get(), 1);
}

#[test]
fn frame_that_gains_an_ad_source_is_swept_again() {
    let engine = FilterEngine::with_defaults().unwrap();
    let spec: NodeSpec = serde_json::from_value(json!({
        "tag": "html",
        "children": [{"tag": "body", "children": [
            {"tag": "iframe", "attributes": {"id": "slot-frame"}},
            {"tag": "img", "attributes": {"src": "/logo.png", "width": "120", "height": "40"}}
        ]}]
    }))
    .unwrap();
    let mut doc = Document::from_spec(&spec);
    let body = doc.children(doc.root())[0];
    let frame = doc.children(body)[0];
    let logo = doc.children(body)[1];

    let mut scheduler = SweepScheduler::new(&engine, "https://news.example.com/");
    assert_eq!(scheduler.start(&mut doc, 0).suppressed(), 0);
    assert!(doc.is_processed(frame));

    doc.set_attribute(frame, "src", "https://tpc.googlesyndication.com/safeframe/1-0-40/html/container.html");
    scheduler.on_attribute_changed(frame, 100);
    doc.set_attribute(logo, "alt", "Example News");
    scheduler.on_attribute_changed(logo, 100);

    let report = scheduler.poll(&mut doc, 100);
    assert_eq!(report.removed, 1);
    assert_eq!(report.visited, 1);
    assert!(!doc.contains(frame));
    assert!(doc.contains(logo));
}

// =============================================================================
// Properties
// =============================================================================

fn arb_ad_attribute() -> impl Strategy<Value = (String, String)> {
    prop_oneof![
        Just(("class".to_string(), "ad-slot".to_string())),
        Just(("class".to_string(), "adsbygoogle sponsored-content".to_string())),
        Just(("id".to_string(), "masthead-ad".to_string())),
        Just(("data-ad-slot".to_string(), "123".to_string())),
        Just(("aria-label".to_string(), "Advertisement".to_string())),
        Just(("src".to_string(), "https://ad.doubleclick.net/x".to_string())),
        Just(("width".to_string(), "1".to_string())),
    ]
}

fn arb_safelisted_root() -> impl Strategy<Value = (String, Option<String>)> {
    prop_oneof![
        prop::sample::select(vec!["nav", "header", "main", "article", "menu", "h1"]).prop_map(|t| (t.to_string(), None)),
        prop::sample::select(vec!["navigation", "menu", "menubar", "banner", "main"])
            .prop_map(|r| ("div".to_string(), Some(r.to_string()))),
    ]
}

fn build_node(doc: &mut Document, tag: &str, attrs: &[(String, String)], text: &str, links: usize) -> NodeId {
    let root = doc.root();
    let node = doc.create_element(tag);
    for (k, v) in attrs {
        doc.set_attribute(node, k, v);
    }
    doc.set_text(node, text);
    doc.set_layout(node, Rect { width: 728.0, height: 90.0 });
    for _ in 0..links {
        let a = doc.create_element("a");
        doc.append_child(node, a);
    }
    doc.append_child(root, node);
    node
}

fn arb_key() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "videoId",
        "title",
        "formats",
        "streamingData",
        "contents",
        "items",
        "trackingParams",
        "richItemRenderer",
        "adPlacements",
        "adSlotRenderer",
        "playerAds",
        "adBreaks",
    ])
    .prop_map(String::from)
}

fn arb_payload() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        "[a-z]{0,6}".prop_map(Value::from),
    ];
    leaf.prop_recursive(5, 64, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(arb_key(), inner, 0..5)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

proptest! {
    #[test]
    fn safelisted_nodes_are_never_ads(
        (tag, role) in arb_safelisted_root(),
        attrs in prop::collection::vec(arb_ad_attribute(), 0..4),
        text in prop::sample::select(vec!["", "Ad", "Sponsored", "Advertisement"]),
    ) {
        let engine = FilterEngine::with_defaults().unwrap();
        let mut doc = Document::new();
        let mut attrs = attrs;
        if let Some(role) = role {
            attrs.push(("role".to_string(), role));
        }
        let node = build_node(&mut doc, &tag, &attrs, text, 0);
        prop_assert_ne!(engine.classifier().classify(&doc, node).verdict, Verdict::Ad);
    }

    #[test]
    fn link_dense_nodes_are_never_ads(
        tag in prop::sample::select(vec!["div", "section", "aside", "ul", "span"]),
        attrs in prop::collection::vec(arb_ad_attribute(), 0..4),
        links in 3usize..8,
    ) {
        let engine = FilterEngine::with_defaults().unwrap();
        let mut doc = Document::new();
        let node = build_node(&mut doc, tag, &attrs, "Sponsored", links);
        prop_assert_ne!(engine.classifier().classify(&doc, node).verdict, Verdict::Ad);
    }

    #[test]
    fn emptied_format_lists_are_always_rejected(
        extra in prop::collection::btree_map(arb_key(), arb_payload(), 0..4),
        formats in prop::collection::vec(arb_payload(), 1..4),
        list in prop::sample::select(vec!["formats", "adaptiveFormats"]),
        drop_list in any::<bool>(),
    ) {
        let engine = FilterEngine::with_defaults().unwrap();
        let mut original: Map<String, Value> = extra.into_iter().collect();
        original.insert("streamingData".into(), json!({ list: formats }));
        let original = Value::Object(original);

        let mut cleaned = original.clone();
        let streaming = cleaned["streamingData"].as_object_mut().unwrap();
        if drop_list {
            streaming.remove(list);
        } else {
            streaming.insert(list.to_string(), json!([]));
        }

        let verdict = engine.guard().check(&original, &cleaned);
        prop_assert!(!verdict.accept);
        prop_assert_eq!(engine.release(original.clone(), cleaned), original);
    }

    #[test]
    fn cleaning_never_loses_protected_or_content_sections(payload in arb_payload()) {
        let engine = FilterEngine::with_defaults().unwrap();
        let result = engine.cleaner().clean(&payload);
        let verdict = engine.guard().check(&result.original, &result.cleaned);
        for reason in &verdict.reasons {
            prop_assert!(
                matches!(reason, GuardViolation::FormatsLost(_)),
                "unexpected violation: {}", reason
            );
        }
        prop_assert_eq!(result.original, payload);
    }

    #[test]
    fn hard_blocked_urls_never_reach_the_network(
        host in prop::sample::select(vec![
            "pagead2.googlesyndication.com",
            "googleads.g.doubleclick.net",
            "www.googleadservices.com",
            "ads.youtube.com",
        ]),
        path in "[a-z0-9/]{0,20}",
    ) {
        let engine = FilterEngine::with_defaults().unwrap();
        let transport = CountingTransport { fetches: Cell::new(0) };
        let gateway = FilteringGateway::new(&engine, &transport);

        let response = gateway.request(&Request::get(format!("https://{host}/{path}"))).unwrap();
        prop_assert!(response.status == 200 || response.status == 204);
        prop_assert_eq!(transport.fetches.get(), 0);
    }
}

//! Response Interception Pipeline
//!
//! Outbound page traffic goes through a `NetworkGateway` chosen once at
//! initialization. The filtering gateway wraps a host `Transport`:
//!
//! - **HardBlock** URLs never reach the transport. The caller gets a stub
//!   (`200` inert script for script endpoints, `204` otherwise).
//! - **JsonRewrite** URLs are fetched for real, then the JSON body is cleaned
//!   and guarded. Any failure releases the original response.
//! - Everything else passes through untouched.
//!
//! Disabling the engine turns the filtering gateway into a pass-through for
//! all subsequent calls.

use log::debug;

use crate::catalog::SignatureCatalog;
use crate::engine::FilterEngine;
use crate::error::EngineError;
use crate::types::InterceptMode;
use crate::url::{contains_ignore_case, extract_host};

/// Body served in place of blocked ad scripts.
pub const INERT_SCRIPT_BODY: &str = "/* Ad-Vantage stub */window.google_ad_status=1;";

/// Transparent 1x1 GIF served in place of blocked image loads.
pub const INERT_IMAGE_DATA_URL: &str = "data:image/gif;base64,R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7";

// =============================================================================
// Request / Response
// =============================================================================

/// An outbound request as seen by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
        }
    }
}

/// A response delivered back to the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.remove_header(name);
        self.headers.push((name.to_ascii_lowercase(), value.to_string()));
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The host's real network stack.
pub trait Transport {
    fn fetch(&self, request: &Request) -> Result<Response, EngineError>;

    /// Queue a beacon; returns whether the host accepted it.
    fn send_beacon(&self, url: &str, body: &[u8]) -> bool;
}

// =============================================================================
// Patterns
// =============================================================================

/// How an interception pattern recognizes a URL: a case-insensitive
/// substring anywhere in it, query string included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlMatcher {
    part: String,
}

impl UrlMatcher {
    pub fn new(part: &str) -> Self {
        Self {
            part: part.to_ascii_lowercase(),
        }
    }

    pub fn part(&self) -> &str {
        &self.part
    }

    pub fn matches(&self, url: &str) -> bool {
        !self.part.is_empty() && contains_ignore_case(url, &self.part)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptionPattern {
    pub matcher: UrlMatcher,
    pub mode: InterceptMode,
}

/// Ordered interception patterns. HardBlock patterns come first, so a URL
/// matching both modes is blocked.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<InterceptionPattern>,
}

impl PatternSet {
    pub fn from_catalog(catalog: &SignatureCatalog) -> Self {
        let block = catalog.hard_block_parts().iter().map(|p| (p, InterceptMode::HardBlock));
        let rewrite = catalog.json_rewrite_parts().iter().map(|p| (p, InterceptMode::JsonRewrite));
        let patterns = block
            .chain(rewrite)
            .map(|(part, mode)| InterceptionPattern {
                matcher: UrlMatcher::new(part),
                mode,
            })
            .collect();
        Self { patterns }
    }

    pub fn mode_for(&self, url: &str) -> Option<InterceptMode> {
        if url.is_empty() {
            return None;
        }
        self.patterns.iter().find(|p| p.matcher.matches(url)).map(|p| p.mode)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InterceptionPattern> {
        self.patterns.iter()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// The stub answered for a hard-blocked URL.
pub fn hard_block_response(catalog: &SignatureCatalog, url: &str) -> Response {
    if catalog.is_script_endpoint(url) {
        Response::new(200)
            .with_header("content-type", "application/javascript")
            .with_body(INERT_SCRIPT_BODY)
    } else {
        Response::new(204)
    }
}

// =============================================================================
// Gateways
// =============================================================================

/// The page-facing network capability.
pub trait NetworkGateway {
    fn request(&self, request: &Request) -> Result<Response, EngineError>;

    fn send_beacon(&self, url: &str, body: &[u8]) -> bool;

    /// The URL an image element should actually load for `url`.
    fn set_image_source(&self, url: &str) -> String;
}

/// Forwards everything to the transport.
pub struct PassThroughGateway<T> {
    transport: T,
}

impl<T: Transport> PassThroughGateway<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }
}

impl<T: Transport> NetworkGateway for PassThroughGateway<T> {
    fn request(&self, request: &Request) -> Result<Response, EngineError> {
        self.transport.fetch(request)
    }

    fn send_beacon(&self, url: &str, body: &[u8]) -> bool {
        self.transport.send_beacon(url, body)
    }

    fn set_image_source(&self, url: &str) -> String {
        url.to_string()
    }
}

/// Applies the engine's interception patterns in front of the transport.
pub struct FilteringGateway<'e, T> {
    engine: &'e FilterEngine,
    transport: T,
}

impl<'e, T: Transport> FilteringGateway<'e, T> {
    pub fn new(engine: &'e FilterEngine, transport: T) -> Self {
        Self { engine, transport }
    }
}

impl<T: Transport> NetworkGateway for FilteringGateway<'_, T> {
    fn request(&self, request: &Request) -> Result<Response, EngineError> {
        match self.engine.intercept_mode(&request.url) {
            Some(InterceptMode::HardBlock) => {
                debug!("hard-blocked {}", request.url);
                Ok(self.engine.hard_block_response(&request.url))
            }
            Some(InterceptMode::JsonRewrite) => {
                let response = self.transport.fetch(request)?;
                Ok(self.engine.rewrite_response(&request.url, response))
            }
            None => self.transport.fetch(request),
        }
    }

    fn send_beacon(&self, url: &str, body: &[u8]) -> bool {
        if self.engine.intercept_mode(url) == Some(InterceptMode::HardBlock) {
            debug!("neutralized beacon to {url}");
            return true;
        }
        self.transport.send_beacon(url, body)
    }

    fn set_image_source(&self, url: &str) -> String {
        if self.engine.intercept_mode(url) == Some(InterceptMode::HardBlock) {
            debug!("replaced image source {url}");
            return INERT_IMAGE_DATA_URL.to_string();
        }
        url.to_string()
    }
}

/// Pick the gateway for a page. Filtering is installed only when the engine
/// is enabled and the page host is not safelisted.
pub fn select_gateway<'e, T: Transport + 'e>(
    engine: &'e FilterEngine,
    page_url: &str,
    transport: T,
) -> Box<dyn NetworkGateway + 'e> {
    let host = extract_host(page_url).unwrap_or(page_url);
    if engine.is_enabled() && !engine.host_is_safelisted(host) {
        Box::new(FilteringGateway::new(engine, transport))
    } else {
        debug!("pass-through gateway for {host}");
        Box::new(PassThroughGateway::new(transport))
    }
}

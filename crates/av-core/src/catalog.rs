//! Signature Catalog
//!
//! Static, versioned pattern collections consumed by the classifier, the
//! interception pipeline and the safety guard. The catalog is pure data: it
//! is built once per session and only ever borrowed afterwards.

use std::collections::HashSet;

use regex::{Regex, RegexBuilder};

use crate::error::EngineError;
use crate::url::host_matches_domain;

/// Bumped whenever any builtin collection changes.
pub const CATALOG_VERSION: u32 = 4;

/// Default relative tolerance of the builtin ad-unit size buckets.
pub const DEFAULT_SIZE_TOLERANCE: f64 = 0.12;

// =============================================================================
// Builtin Data
// =============================================================================

const HOST_TOKENS: &[&str] = &[
    "doubleclick",
    "googlesyndication",
    "googleadservices",
    "pagead2",
    "amazon-adsystem",
    "adnxs",
    "adroll",
    "adsafeprotected",
    "taboola",
    "outbrain",
    "revcontent",
    "mgid",
    "adserver",
    "adsystem",
];

/// Attribute names matched exactly or as a `key-` prefix.
const ATTRIBUTE_KEYS: &[&str] = &[
    "data-ad",
    "data-google-query-id",
    "data-taboola",
    "data-outbrain",
    "data-mgid",
    "data-revcontent",
    "data-sponsored",
    "data-native-ad",
    "is-promoted",
    "has-advertiser",
];

const AD_TAGS: &[&str] = &[
    "ytd-ad-slot-renderer",
    "ytd-display-ad-renderer",
    "ytd-in-feed-ad-layout-renderer",
    "ytd-promoted-video-renderer",
    "ytd-promoted-sparkles-text-search-renderer",
    "ytd-promoted-sparkles-web-renderer",
    "ytd-statement-banner-renderer",
    "ytd-compact-promoted-video-renderer",
    "ytd-compact-promoted-item-renderer",
    "ytd-companion-slot-renderer",
];

/// Matched against whole, lowercased class and id tokens.
const CLASS_PATTERNS: &[&str] = &[
    r"^adsbygoogle$",
    r"^ad__[a-z0-9_-]*$",
    r"^ads?[-_]?(slot|unit|banner|container|wrapper|frame|region|space|placeholder|box|overlay)s?([-_][a-z0-9]+)*$",
    r"^(google|native|video|sticky|fixed|floating|sidebar|inline|story|article|content|product|shopping|mobile|popup|pop-up|modal|masthead|player|banner|leaderboard|mpu)[-_]ads?([-_][a-z0-9]+)*$",
    r"^(sponsored|promoted)[-_]?(content|post|item|link|story)s?$",
    r"^(taboola|outbrain|revcontent|mgid|teads|criteo|pubmatic)([-_][a-z0-9]+)*$",
    r"^(pre|mid)[-_]?roll([-_][a-z0-9]+)*$",
    r"^ytp-ad-[a-z0-9-]+$",
    r"^ytd-player-legacy-desktop-watch-ads-renderer$",
];

/// Only these elements are matched against geometry buckets.
const BANNER_TAGS: &[&str] = &["div", "section", "aside", "ins", "iframe"];

/// IAB standard units: leaderboards, rectangles, skyscrapers, half page.
const GEOMETRY_BUCKETS: &[(f64, f64)] = &[
    (728.0, 90.0),
    (970.0, 90.0),
    (468.0, 60.0),
    (320.0, 50.0),
    (300.0, 250.0),
    (336.0, 280.0),
    (160.0, 600.0),
    (300.0, 600.0),
];

const DISCLOSURE_PATTERNS: &[&str] = &[
    r"\badvertisement\b",
    r"\badvertising\b",
    r"\bsponsored\b",
    r"\bpromoted\b",
    r"\bad ?choices\b",
    r"\bwhy this ad\b",
    r"\bads by\b",
    r"\bpartner content\b",
];

const AD_LABEL_PATTERN: &str = r"\bads?\b";
const ARIA_LABEL_PATTERN: &str = r"\b(ads?|advert\w*|sponsor\w*|promot\w*)\b";

const INLINE_SCRIPT_KEYWORDS: &[&str] = &[
    "adsbygoogle",
    "googlesyndication",
    "googletag.pubads",
    "googletag.defineslot",
    "googletag.cmd.push",
];

/// JSON keys that only ever carry ad metadata.
const AD_JSON_KEYS: &[&str] = &[
    "adPlacements",
    "adBreaks",
    "adSlots",
    "playerAds",
    "adSafetyReason",
    "adPlaybackContext",
    "adDeviceContext",
    "adSlotRenderer",
    "displayAdRenderer",
    "promotedVideoRenderer",
    "compactPromotedVideoRenderer",
    "promotedSparklesWebRenderer",
    "promotedSparklesTextSearchRenderer",
    "inFeedAdLayoutRenderer",
];

/// JSON keys needed for playback and content; protection beats ad status.
const PROTECTED_JSON_KEYS: &[&str] = &[
    "videoId",
    "videoDetails",
    "streamingData",
    "formats",
    "adaptiveFormats",
    "hlsManifestUrl",
    "dashManifestUrl",
    "playabilityStatus",
    "title",
    "lengthSeconds",
    "channelId",
    "author",
    "microformat",
    "captions",
];

const FORMAT_CONTAINER_KEY: &str = "streamingData";
const FORMAT_LIST_KEYS: &[&str] = &["formats", "adaptiveFormats"];

const NAV_TOKENS: &[&str] = &["nav", "navbar", "navigation", "menu", "dropdown", "site-nav"];
const SAFELIST_TAGS: &[&str] = &["nav", "menu", "header", "main", "article", "title", "h1"];
const SAFELIST_ROLES: &[&str] = &["navigation", "menu", "menubar", "banner", "main"];
const SAFELIST_ANCESTOR_CLASSES: &[&str] = &["menu", "navbar"];

/// Elements whose content is not expected to change after insertion.
const STATIC_TAGS: &[&str] = &[
    "img", "iframe", "script", "embed", "object", "video", "audio", "input", "picture",
];

/// Document structure that is walked through but never classified.
const STRUCTURAL_TAGS: &[&str] = &[
    "html", "head", "body", "style", "meta", "link", "base", "br", "hr", "source", "track", "template",
];

const HARD_BLOCK_PARTS: &[&str] = &[
    "/pagead/",
    "/pagead/gen_204",
    "/pagead/adview",
    "/get_midroll_",
    "/doubleclick/",
    "pagead2.googlesyndication.com",
    "googleads.g.doubleclick.net",
    "googleadservices.com",
    "ads.youtube.com",
];

const JSON_REWRITE_PARTS: &[&str] = &["/youtubei/v1/player", "/youtubei/v1/next", "/youtubei/v1/get_video_info"];

/// Hard-blocked URLs matching this are expected to deliver executable code.
const SCRIPT_ENDPOINT_PATTERN: &str = r"pagead|googlesyndication|doubleclick|googleadservices";

const GUARDED_GLOBALS: &[&str] = &["ytInitialPlayerResponse", "ytInitialData"];

/// Ad library globals page code calls unconditionally, with inert stand-ins
/// for when the library itself was blocked.
const AD_API_STUBS: &[(&str, &str)] = &[
    (
        "googletag",
        "{cmd: [], defineSlot: function() { return this; }, addService: function() { return this; }, \
         enableServices: function() {}, display: function() {}, pubads: function() { return this; }, \
         setTargeting: function() { return this; }, collapseEmptyDivs: function() {}}",
    ),
    ("adsbygoogle", "[]"),
];

const COMPANION_SELECTORS: &[&str] = &[
    "#masthead-ad",
    "#player-ads",
    "ytd-ad-slot-renderer",
    "ytd-display-ad-renderer",
    "ytd-in-feed-ad-layout-renderer",
    "ytd-promoted-video-renderer",
    "ytd-promoted-sparkles-text-search-renderer",
    "ytd-promoted-sparkles-web-renderer",
    "ytd-compact-promoted-video-renderer",
    "ytd-compact-promoted-item-renderer",
    "ytd-companion-slot-renderer",
    ".ytd-player-legacy-desktop-watch-ads-renderer",
    "[is-promoted]",
    "[has-advertiser]",
    ".ytp-ad-module",
    ".ytp-ad-player-overlay",
    ".ytp-ad-overlay-slot",
    ".ytp-ad-text",
    ".ytp-ad-skip-button-slot",
    ".adsbygoogle",
    "ins.adsbygoogle",
];

const HOST_SAFELIST: &[&str] = &["mail.google.com", "docs.google.com", "accounts.google.com"];

// =============================================================================
// Signatures
// =============================================================================

/// A standard advertising-unit size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryBucket {
    pub width: f64,
    pub height: f64,
    /// Relative tolerance applied to both dimensions.
    pub tolerance: f64,
}

impl GeometryBucket {
    /// Does a `width` x `height` box fall into this bucket?
    /// The tolerance never drops below `min_px` pixels.
    pub fn matches(&self, width: f64, height: f64, min_px: f64) -> bool {
        let tol_w = (self.width * self.tolerance).round().max(min_px);
        let tol_h = (self.height * self.tolerance).round().max(min_px);
        (width - self.width).abs() <= tol_w && (height - self.height).abs() <= tol_h
    }
}

/// One catalog entry, borrowed from the catalog.
#[derive(Debug, Clone, Copy)]
pub enum Signature<'a> {
    HostToken(&'a str),
    AttributeKey(&'a str),
    ClassPattern(&'a Regex),
    GeometryBucket(GeometryBucket),
    TextPattern(&'a Regex),
    JsonKey { key: &'a str, protected: bool },
}

impl Signature<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HostToken(_) => "host-token",
            Self::AttributeKey(_) => "attribute-key",
            Self::ClassPattern(_) => "class-pattern",
            Self::GeometryBucket(_) => "geometry-bucket",
            Self::TextPattern(_) => "text-pattern",
            Self::JsonKey { .. } => "json-key",
        }
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// The complete set of signatures for one session.
#[derive(Debug, Clone)]
pub struct SignatureCatalog {
    pub version: u32,
    host_tokens: Vec<String>,
    attribute_keys: Vec<String>,
    ad_tags: HashSet<String>,
    class_patterns: Vec<Regex>,
    geometry_buckets: Vec<GeometryBucket>,
    banner_tags: HashSet<String>,
    disclosure_patterns: Vec<Regex>,
    ad_label_pattern: Regex,
    aria_label_pattern: Regex,
    inline_script_keywords: Vec<String>,
    ad_json_keys: HashSet<String>,
    protected_json_keys: HashSet<String>,
    nav_tokens: Vec<String>,
    safelist_tags: HashSet<String>,
    safelist_roles: HashSet<String>,
    safelist_ancestor_classes: Vec<String>,
    static_tags: HashSet<String>,
    structural_tags: HashSet<String>,
    hard_block_parts: Vec<String>,
    json_rewrite_parts: Vec<String>,
    script_endpoint_pattern: Regex,
    guarded_globals: Vec<String>,
    ad_api_stubs: Vec<(String, String)>,
    companion_selectors: Vec<String>,
    host_safelist: Vec<String>,
}

fn compile(pattern: &str) -> Result<Regex, EngineError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| EngineError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn owned_set(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl SignatureCatalog {
    /// Build the builtin catalog.
    pub fn builtin() -> Result<Self, EngineError> {
        Ok(Self {
            version: CATALOG_VERSION,
            host_tokens: owned(HOST_TOKENS),
            attribute_keys: owned(ATTRIBUTE_KEYS),
            ad_tags: owned_set(AD_TAGS),
            class_patterns: CLASS_PATTERNS.iter().map(|p| compile(p)).collect::<Result<_, _>>()?,
            geometry_buckets: GEOMETRY_BUCKETS
                .iter()
                .map(|&(width, height)| GeometryBucket { width, height, tolerance: DEFAULT_SIZE_TOLERANCE })
                .collect(),
            banner_tags: owned_set(BANNER_TAGS),
            disclosure_patterns: DISCLOSURE_PATTERNS.iter().map(|p| compile(p)).collect::<Result<_, _>>()?,
            ad_label_pattern: compile(AD_LABEL_PATTERN)?,
            aria_label_pattern: compile(ARIA_LABEL_PATTERN)?,
            inline_script_keywords: owned(INLINE_SCRIPT_KEYWORDS),
            ad_json_keys: owned_set(AD_JSON_KEYS),
            protected_json_keys: owned_set(PROTECTED_JSON_KEYS),
            nav_tokens: owned(NAV_TOKENS),
            safelist_tags: owned_set(SAFELIST_TAGS),
            safelist_roles: owned_set(SAFELIST_ROLES),
            safelist_ancestor_classes: owned(SAFELIST_ANCESTOR_CLASSES),
            static_tags: owned_set(STATIC_TAGS),
            structural_tags: owned_set(STRUCTURAL_TAGS),
            hard_block_parts: owned(HARD_BLOCK_PARTS),
            json_rewrite_parts: owned(JSON_REWRITE_PARTS),
            script_endpoint_pattern: compile(SCRIPT_ENDPOINT_PATTERN)?,
            guarded_globals: owned(GUARDED_GLOBALS),
            ad_api_stubs: AD_API_STUBS.iter().map(|&(name, stub)| (name.to_string(), stub.to_string())).collect(),
            companion_selectors: owned(COMPANION_SELECTORS),
            host_safelist: owned(HOST_SAFELIST),
        })
    }

    /// Add hosts to the safelist (used for configuration overrides).
    pub fn with_extra_safelisted_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.host_safelist.extend(hosts.into_iter().map(Into::into));
        self
    }

    // -------------------------------------------------------------------------
    // Collections
    // -------------------------------------------------------------------------

    pub fn host_tokens(&self) -> &[String] {
        &self.host_tokens
    }

    pub fn geometry_buckets(&self) -> &[GeometryBucket] {
        &self.geometry_buckets
    }

    pub fn disclosure_patterns(&self) -> &[Regex] {
        &self.disclosure_patterns
    }

    pub fn ad_label_pattern(&self) -> &Regex {
        &self.ad_label_pattern
    }

    pub fn aria_label_pattern(&self) -> &Regex {
        &self.aria_label_pattern
    }

    pub fn nav_tokens(&self) -> &[String] {
        &self.nav_tokens
    }

    pub fn safelist_ancestor_classes(&self) -> &[String] {
        &self.safelist_ancestor_classes
    }

    pub fn hard_block_parts(&self) -> &[String] {
        &self.hard_block_parts
    }

    pub fn json_rewrite_parts(&self) -> &[String] {
        &self.json_rewrite_parts
    }

    pub fn guarded_globals(&self) -> &[String] {
        &self.guarded_globals
    }

    /// `(global name, JavaScript expression)` pairs.
    pub fn ad_api_stubs(&self) -> &[(String, String)] {
        &self.ad_api_stubs
    }

    pub fn format_container_key(&self) -> &'static str {
        FORMAT_CONTAINER_KEY
    }

    pub fn format_list_keys(&self) -> &'static [&'static str] {
        FORMAT_LIST_KEYS
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    pub fn is_ad_tag(&self, tag: &str) -> bool {
        self.ad_tags.contains(tag)
    }

    /// Attribute name equal to a catalog key, or extending one with `-`.
    pub fn is_ad_attribute(&self, name: &str) -> bool {
        self.attribute_keys.iter().any(|key| {
            name == key || (name.len() > key.len() && name.starts_with(key.as_str()) && name.as_bytes()[key.len()] == b'-')
        })
    }

    /// Does a single whole class or id token match an ad pattern?
    pub fn is_ad_class_token(&self, token: &str) -> bool {
        self.class_patterns.iter().any(|re| re.is_match(token))
    }

    pub fn is_inline_ad_script(&self, text: &str) -> bool {
        let lower = text.to_ascii_lowercase();
        self.inline_script_keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    pub fn is_ad_json_key(&self, key: &str) -> bool {
        self.ad_json_keys.contains(key)
    }

    pub fn is_protected_json_key(&self, key: &str) -> bool {
        self.protected_json_keys.contains(key)
    }

    pub fn is_safelisted_tag(&self, tag: &str) -> bool {
        self.safelist_tags.contains(tag)
    }

    pub fn is_safelisted_role(&self, role: &str) -> bool {
        self.safelist_roles.contains(role)
    }

    pub fn is_banner_tag(&self, tag: &str) -> bool {
        self.banner_tags.contains(tag)
    }

    pub fn is_static_tag(&self, tag: &str) -> bool {
        self.static_tags.contains(tag)
    }

    pub fn is_structural_tag(&self, tag: &str) -> bool {
        self.structural_tags.contains(tag)
    }

    /// Is a hard-blocked URL expected to deliver executable code?
    pub fn is_script_endpoint(&self, url: &str) -> bool {
        self.script_endpoint_pattern.is_match(url)
    }

    pub fn is_guarded_global(&self, name: &str) -> bool {
        self.guarded_globals.iter().any(|g| g == name)
    }

    /// Is page-level filtering disabled for this host?
    pub fn host_is_safelisted(&self, host: &str) -> bool {
        self.host_safelist.iter().any(|domain| host_matches_domain(host, domain))
    }

    // -------------------------------------------------------------------------
    // Views
    // -------------------------------------------------------------------------

    /// All signatures, grouped by kind.
    pub fn signatures(&self) -> Vec<Signature<'_>> {
        let mut out = Vec::new();
        out.extend(self.host_tokens.iter().map(|t| Signature::HostToken(t)));
        out.extend(self.attribute_keys.iter().map(|k| Signature::AttributeKey(k)));
        out.extend(self.class_patterns.iter().map(Signature::ClassPattern));
        out.extend(self.geometry_buckets.iter().copied().map(Signature::GeometryBucket));
        out.extend(self.disclosure_patterns.iter().map(Signature::TextPattern));
        out.push(Signature::TextPattern(&self.ad_label_pattern));

        let mut ad_keys: Vec<&String> = self.ad_json_keys.iter().collect();
        ad_keys.sort();
        out.extend(ad_keys.into_iter().map(|k| Signature::JsonKey { key: k, protected: false }));
        let mut protected: Vec<&String> = self.protected_json_keys.iter().collect();
        protected.sort();
        out.extend(protected.into_iter().map(|k| Signature::JsonKey { key: k, protected: true }));
        out
    }

    /// The companion stylesheet for pre-script suppression of known containers.
    pub fn companion_stylesheet(&self) -> String {
        let mut css = self.companion_selectors.join(",\n");
        css.push_str(" {\n  display: none !important;\n}\n");
        css
    }
}

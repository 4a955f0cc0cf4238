//! Page DOM model
//!
//! An arena of generational slots. Each node carries its own sweep marker,
//! so removing a node (and with it the whole subtree) discards the markers
//! too: no separate registry can grow without bound. A `NodeId` kept across
//! a removal goes stale instead of aliasing a newer node.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Attributes that can turn a processed node into an ad.
const RECLASSIFY_ATTRIBUTES: &[&str] = &["src", "class", "id", "style"];

/// Identity of a node within one `Document`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// Layout box reported by the host (CSS pixels).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone)]
struct NodeData {
    tag: String,
    attributes: Vec<(String, String)>,
    text: String,
    layout: Option<Rect>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    processed: bool,
    hidden: bool,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<NodeData>,
}

/// Serializable description of a subtree, used to build documents from
/// fixtures and from element snapshots sent by the page script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSpec {
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    pub text: String,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub children: Vec<NodeSpec>,
}

/// A page's element tree.
#[derive(Debug, Clone)]
pub struct Document {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create a document with an empty `html` root.
    pub fn new() -> Self {
        let mut doc = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId { index: 0, generation: 0 },
        };
        doc.root = doc.create_element("html");
        doc
    }

    /// Build a document whose root is described by `spec`.
    pub fn from_spec(spec: &NodeSpec) -> Self {
        let mut doc = Self::new();
        let root = doc.root;
        if let Some(data) = doc.get_mut(root).filter(|_| !spec.tag.is_empty()) {
            data.tag = spec.tag.to_ascii_lowercase();
        }
        doc.apply_spec(root, spec);
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a detached element.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let data = NodeData {
            tag: tag.to_ascii_lowercase(),
            attributes: Vec::new(),
            text: String::new(),
            layout: None,
            parent: None,
            children: Vec::new(),
            processed: false,
            hidden: false,
        };

        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(data);
                NodeId { index, generation: slot.generation }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot { generation: 0, node: Some(data) });
                NodeId { index, generation: 0 }
            }
        }
    }

    /// Append `child` (which must be detached) as the last child of `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if parent == child || !self.contains(parent) || self.parent(child).is_some() || child == self.root {
            return false;
        }
        // Refuse cycles: `child` must not be an ancestor of `parent`.
        if self.ancestors(parent).any(|a| a == child) {
            return false;
        }
        match self.get_mut(child) {
            Some(data) => data.parent = Some(parent),
            None => return false,
        }
        if let Some(data) = self.get_mut(parent) {
            data.children.push(child);
        }
        true
    }

    /// Create the subtree described by `spec` and append it under `parent`.
    pub fn append_spec(&mut self, parent: NodeId, spec: &NodeSpec) -> Option<NodeId> {
        let tag = if spec.tag.is_empty() { "div" } else { spec.tag.as_str() };
        let node = self.create_element(tag);
        if !self.append_child(parent, node) {
            self.free_subtree(node);
            return None;
        }
        self.apply_spec(node, spec);
        Some(node)
    }

    fn apply_spec(&mut self, node: NodeId, spec: &NodeSpec) {
        for (name, value) in &spec.attributes {
            self.set_attribute(node, name, value);
        }
        if !spec.text.is_empty() {
            self.set_text(node, &spec.text);
        }
        if let (Some(width), Some(height)) = (spec.width, spec.height) {
            self.set_layout(node, Rect { width, height });
        }
        for child in &spec.children {
            self.append_spec(node, child);
        }
    }

    /// Changing a classification-relevant attribute clears the sweep marker.
    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        if let Some(data) = self.get_mut(node) {
            let name = name.to_ascii_lowercase();
            if RECLASSIFY_ATTRIBUTES.contains(&name.as_str()) {
                data.processed = false;
            }
            match data.attributes.iter_mut().find(|(n, _)| *n == name) {
                Some(entry) => entry.1 = value.to_string(),
                None => data.attributes.push((name, value.to_string())),
            }
        }
    }

    /// Drop one declaration from the inline `style`. Returns whether it was set.
    pub fn remove_style_property(&mut self, node: NodeId, property: &str) -> bool {
        let Some(style) = self.attribute(node, "style") else {
            return false;
        };
        let mut found = false;
        let kept: Vec<&str> = style
            .split(';')
            .map(str::trim)
            .filter(|decl| !decl.is_empty())
            .filter(|decl| {
                let name = decl.split(':').next().unwrap_or("").trim();
                let matched = name.eq_ignore_ascii_case(property);
                found |= matched;
                !matched
            })
            .collect();
        if found {
            let rebuilt = kept.join("; ");
            if let Some(data) = self.get_mut(node) {
                if let Some(entry) = data.attributes.iter_mut().find(|(n, _)| n == "style") {
                    entry.1 = rebuilt;
                }
            }
        }
        found
    }

    pub fn set_text(&mut self, node: NodeId, text: &str) {
        if let Some(data) = self.get_mut(node) {
            data.text = text.to_string();
        }
    }

    pub fn set_layout(&mut self, node: NodeId, rect: Rect) {
        if let Some(data) = self.get_mut(node) {
            data.layout = Some(rect);
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Is `node` still alive in this document?
    #[inline]
    pub fn contains(&self, node: NodeId) -> bool {
        self.get(node).is_some()
    }

    /// Is `node` alive and connected to the root?
    pub fn is_attached(&self, node: NodeId) -> bool {
        self.contains(node) && (node == self.root || self.ancestors(node).any(|a| a == self.root))
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        self.get(node).map(|d| d.tag.as_str())
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.get(node)?
            .attributes
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn attribute_names(&self, node: NodeId) -> impl Iterator<Item = &str> + '_ {
        self.get(node)
            .into_iter()
            .flat_map(|d| d.attributes.iter().map(|(n, _)| n.as_str()))
    }

    /// The node's own text (not including descendants).
    pub fn text(&self, node: NodeId) -> &str {
        self.get(node).map(|d| d.text.as_str()).unwrap_or("")
    }

    pub fn layout(&self, node: NodeId) -> Option<Rect> {
        self.get(node)?.layout
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.get(node)?.parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.get(node).map(|d| d.children.as_slice()).unwrap_or(&[])
    }

    /// Parent chain, nearest first.
    pub fn ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(node), move |&n| self.parent(n))
    }

    /// All descendants in document order (excluding `node` itself).
    pub fn descendants(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut stack: Vec<NodeId> = self.children(node).iter().rev().copied().collect();
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(self.children(next).iter().rev().copied());
            Some(next)
        })
    }

    /// Concatenated visible text of the subtree, stopping once `limit` bytes
    /// are collected (the result may then exceed `limit` by one text run).
    /// Script and style bodies are not visible text.
    pub fn text_content(&self, node: NodeId, limit: usize) -> String {
        let mut out = String::new();
        for n in std::iter::once(node).chain(self.descendants(node)) {
            if matches!(self.tag(n), Some("script" | "style" | "noscript" | "template")) {
                continue;
            }
            let text = self.text(n).trim();
            if text.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(text);
            if out.len() > limit {
                break;
            }
        }
        out
    }

    /// Describe the live subtree under `node`.
    pub fn to_spec(&self, node: NodeId) -> Option<NodeSpec> {
        let data = self.get(node)?;
        Some(NodeSpec {
            tag: data.tag.clone(),
            attributes: data.attributes.iter().cloned().collect(),
            text: data.text.clone(),
            width: data.layout.map(|r| r.width),
            height: data.layout.map(|r| r.height),
            children: data.children.iter().filter_map(|&c| self.to_spec(c)).collect(),
        })
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -------------------------------------------------------------------------
    // Sweep markers and suppression
    // -------------------------------------------------------------------------

    pub fn is_processed(&self, node: NodeId) -> bool {
        self.get(node).is_some_and(|d| d.processed)
    }

    pub fn mark_processed(&mut self, node: NodeId) {
        if let Some(data) = self.get_mut(node) {
            data.processed = true;
        }
    }

    pub fn is_hidden(&self, node: NodeId) -> bool {
        self.get(node).is_some_and(|d| d.hidden)
    }

    /// Zero-visibility styling for nodes that cannot be detached.
    pub fn hide(&mut self, node: NodeId) -> bool {
        if !self.contains(node) {
            return false;
        }
        self.set_attribute(node, "style", "display: none !important");
        self.set_attribute(node, "aria-hidden", "true");
        if let Some(data) = self.get_mut(node) {
            data.hidden = true;
        }
        true
    }

    /// Detach `node` from its parent and drop its whole subtree.
    /// The root cannot be removed.
    pub fn remove(&mut self, node: NodeId) -> bool {
        if node == self.root || !self.contains(node) {
            return false;
        }
        if let Some(parent) = self.parent(node) {
            if let Some(data) = self.get_mut(parent) {
                data.children.retain(|&c| c != node);
            }
        }
        self.free_subtree(node);
        true
    }

    fn free_subtree(&mut self, node: NodeId) {
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            let Some(slot) = self.slots.get_mut(n.index as usize) else {
                continue;
            };
            if slot.generation != n.generation {
                continue;
            }
            if let Some(data) = slot.node.take() {
                stack.extend(data.children);
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(n.index);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Slot access
    // -------------------------------------------------------------------------

    #[inline]
    fn get(&self, node: NodeId) -> Option<&NodeData> {
        let slot = self.slots.get(node.index as usize)?;
        if slot.generation != node.generation {
            return None;
        }
        slot.node.as_ref()
    }

    #[inline]
    fn get_mut(&mut self, node: NodeId) -> Option<&mut NodeData> {
        let slot = self.slots.get_mut(node.index as usize)?;
        if slot.generation != node.generation {
            return None;
        }
        slot.node.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(tag: &str, children: Vec<NodeSpec>) -> NodeSpec {
        NodeSpec { tag: tag.to_string(), children, ..Default::default() }
    }

    #[test]
    fn builds_tree_from_spec() {
        let doc = Document::from_spec(&spec("html", vec![spec("body", vec![spec("div", vec![]), spec("p", vec![])])]));
        let body = doc.children(doc.root())[0];
        assert_eq!(doc.tag(body), Some("body"));
        assert_eq!(doc.children(body).len(), 2);
        assert_eq!(doc.descendants(doc.root()).count(), 3);
        assert_eq!(doc.len(), 4);
    }

    #[test]
    fn removal_drops_subtree_and_markers() {
        let mut doc = Document::new();
        let root = doc.root();
        let div = doc.create_element("div");
        let img = doc.create_element("img");
        assert!(doc.append_child(root, div));
        assert!(doc.append_child(div, img));
        doc.mark_processed(img);
        assert!(doc.is_processed(img));

        assert!(doc.remove(div));
        assert!(!doc.contains(div));
        assert!(!doc.contains(img));
        assert!(!doc.is_processed(img));
        assert!(doc.children(root).is_empty());

        // Reused slots get a new generation; stale ids stay dead.
        let fresh = doc.create_element("span");
        assert!(doc.contains(fresh));
        assert!(!doc.contains(img));
        assert!(!doc.contains(div));
    }

    #[test]
    fn root_cannot_be_removed_or_reparented() {
        let mut doc = Document::new();
        let root = doc.root();
        let div = doc.create_element("div");
        assert!(!doc.remove(root));
        assert!(!doc.append_child(div, root));
        assert!(doc.append_child(root, div));
        // Already attached
        assert!(!doc.append_child(root, div));
    }

    #[test]
    fn source_changes_clear_the_sweep_marker() {
        let mut doc = Document::new();
        let root = doc.root();
        let frame = doc.create_element("iframe");
        doc.append_child(root, frame);
        doc.mark_processed(frame);

        doc.set_attribute(frame, "title", "comments");
        assert!(doc.is_processed(frame));
        doc.set_attribute(frame, "SRC", "https://ads.example/frame");
        assert!(!doc.is_processed(frame));
    }

    #[test]
    fn style_properties_are_removed_individually() {
        let mut doc = Document::new();
        let root = doc.root();
        doc.set_attribute(root, "style", "color: red; OVERFLOW: hidden;margin:0");
        doc.mark_processed(root);

        assert!(doc.remove_style_property(root, "overflow"));
        assert_eq!(doc.attribute(root, "style"), Some("color: red; margin:0"));
        assert!(doc.is_processed(root));
        assert!(!doc.remove_style_property(root, "overflow"));
        let bare = doc.create_element("p");
        assert!(!doc.remove_style_property(bare, "overflow"));
    }

    #[test]
    fn hide_sets_style() {
        let mut doc = Document::new();
        let root = doc.root();
        assert!(doc.hide(root));
        assert!(doc.is_hidden(root));
        assert_eq!(doc.attribute(root, "style"), Some("display: none !important"));
        assert_eq!(doc.attribute(root, "aria-hidden"), Some("true"));
    }

    #[test]
    fn text_content_is_bounded() {
        let mut doc = Document::new();
        let root = doc.root();
        for i in 0..20 {
            let p = doc.create_element("p");
            doc.set_text(p, &format!("paragraph number {i}"));
            doc.append_child(root, p);
        }
        let text = doc.text_content(root, 40);
        assert!(text.starts_with("paragraph number 0 paragraph number 1"));
        assert!(text.len() < 80);
    }

    #[test]
    fn describes_live_subtree() {
        let mut doc = Document::from_spec(&spec("html", vec![spec("div", vec![spec("img", vec![])]), spec("p", vec![])]));
        let root = doc.root();
        let div = doc.children(root)[0];
        doc.set_attribute(div, "class", "Banner");
        doc.set_layout(div, Rect { width: 728.0, height: 90.0 });
        let p = doc.children(root)[1];
        assert!(doc.remove(p));

        let out = doc.to_spec(root).unwrap();
        assert_eq!(out.children.len(), 1);
        let div_spec = &out.children[0];
        assert_eq!(div_spec.attributes.get("class").map(String::as_str), Some("Banner"));
        assert_eq!((div_spec.width, div_spec.height), (Some(728.0), Some(90.0)));
        assert_eq!(div_spec.children[0].tag, "img");
        assert_eq!(doc.to_spec(p), None);
    }
}

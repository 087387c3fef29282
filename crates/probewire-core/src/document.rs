//! Element documents and generation-checked node handles.
//!
//! A window's element tree is instantiated from an [`ElementSpec`] into a
//! [`Document`]: a flat arena of nodes, each tagged with an id drawn from a
//! store-wide counter that never repeats. Every instantiation also takes a
//! fresh generation number. A [`NodeHandle`] carries both, so a handle into a
//! tree that has since been rebuilt is reported as expired rather than
//! silently pointing at whatever now occupies the same slot.
//!
//! # Example
//!
//! ```
//! use probewire_core::document::{DocumentStore, ElementSpec};
//!
//! let spec = ElementSpec::new("Window")
//!     .attr("name", "main")
//!     .child(ElementSpec::new("Button").attr("name", "ok"));
//!
//! let mut store = DocumentStore::new();
//! let root = store.register_window("main", spec);
//! let ok = store.node(root).unwrap().children().next().unwrap();
//! assert_eq!(ok.attr("name"), Some("ok"));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Handles and errors
// ---------------------------------------------------------------------------

/// Opaque reference to a node, valid only for the generation that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeHandle {
    pub generation: u64,
    pub node: u64,
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.node, self.generation)
    }
}

/// Errors raised when looking up documents and nodes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    /// The handle's document has been replaced by a newer generation.
    #[error("control {0} has expired")]
    Expired(NodeHandle),

    /// The handle's generation is live but holds no such node, or the
    /// generation was never issued.
    #[error("control {0} not found")]
    NotFound(NodeHandle),

    #[error("no window named {0:?}")]
    UnknownWindow(String),
}

// ---------------------------------------------------------------------------
// ElementSpec
// ---------------------------------------------------------------------------

/// Declarative description of an element tree.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementSpec {
    /// Type tag, reported as the `class` attribute.
    #[serde(rename = "type")]
    pub tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementSpec>,
}

impl ElementSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn child(mut self, child: ElementSpec) -> Self {
        self.children.push(child);
        self
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct NodeData {
    id: u64,
    tag: String,
    attrs: BTreeMap<String, String>,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// One instantiated element tree. Slot 0 is the root.
#[derive(Debug, Clone)]
pub struct Document {
    generation: u64,
    nodes: Vec<NodeData>,
    slots: HashMap<u64, usize>,
}

impl Document {
    fn build(spec: &ElementSpec, generation: u64, next_id: &mut u64) -> Self {
        let mut doc = Document {
            generation,
            nodes: Vec::new(),
            slots: HashMap::new(),
        };
        // (spec, parent slot); children pushed reversed so slots follow pre-order.
        let mut pending: Vec<(&ElementSpec, Option<usize>)> = vec![(spec, None)];
        while let Some((spec, parent)) = pending.pop() {
            let slot = doc.nodes.len();
            let id = *next_id;
            *next_id += 1;
            doc.nodes.push(NodeData {
                id,
                tag: spec.tag.clone(),
                attrs: spec.attrs.clone(),
                parent,
                children: Vec::with_capacity(spec.children.len()),
            });
            doc.slots.insert(id, slot);
            if let Some(parent) = parent {
                doc.nodes[parent].children.push(slot);
            }
            for child in spec.children.iter().rev() {
                pending.push((child, Some(slot)));
            }
        }
        doc
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> NodeRef<'_> {
        NodeRef { doc: self, slot: 0 }
    }

    fn get(&self, node: u64) -> Option<NodeRef<'_>> {
        self.slots.get(&node).map(|&slot| NodeRef { doc: self, slot })
    }
}

/// Borrowed view of one node.
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    doc: &'a Document,
    slot: usize,
}

impl<'a> NodeRef<'a> {
    fn data(&self) -> &'a NodeData {
        &self.doc.nodes[self.slot]
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            generation: self.doc.generation,
            node: self.data().id,
        }
    }

    pub fn tag(&self) -> &'a str {
        &self.data().tag
    }

    /// Look up an attribute, ignoring case. `class` always yields the tag.
    pub fn attr(&self, name: &str) -> Option<&'a str> {
        if name.eq_ignore_ascii_case("class") {
            return Some(self.tag());
        }
        let attrs = &self.data().attrs;
        attrs
            .get(name)
            .or_else(|| {
                attrs
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    pub fn attrs(&self) -> &'a BTreeMap<String, String> {
        &self.data().attrs
    }

    pub fn parent(&self) -> Option<NodeRef<'a>> {
        self.data().parent.map(|slot| NodeRef { doc: self.doc, slot })
    }

    /// Direct children in document order.
    pub fn children(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        let doc = self.doc;
        self.data()
            .children
            .iter()
            .map(move |&slot| NodeRef { doc, slot })
    }

    /// Descendants at most `max_depth` levels down, in pre-order.
    ///
    /// `max_depth = 1` yields direct children only; `0` yields nothing.
    pub fn descendants(&self, max_depth: usize) -> Descendants<'a> {
        let mut stack = Vec::new();
        if max_depth > 0 {
            stack.extend(self.data().children.iter().rev().map(|&slot| (slot, 1)));
        }
        Descendants {
            doc: self.doc,
            stack,
            max_depth,
        }
    }

    /// This node followed by its whole subtree, in pre-order.
    pub fn subtree(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        std::iter::once(*self).chain(self.descendants(usize::MAX))
    }
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("handle", &self.handle())
            .field("tag", &self.tag())
            .finish()
    }
}

/// Pre-order walk bounded by depth.
pub struct Descendants<'a> {
    doc: &'a Document,
    stack: Vec<(usize, usize)>,
    max_depth: usize,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = NodeRef<'a>;

    fn next(&mut self) -> Option<NodeRef<'a>> {
        let (slot, depth) = self.stack.pop()?;
        if depth < self.max_depth {
            let children = &self.doc.nodes[slot].children;
            self.stack.extend(children.iter().rev().map(|&child| (child, depth + 1)));
        }
        Some(NodeRef { doc: self.doc, slot })
    }
}

// ---------------------------------------------------------------------------
// DocumentStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Window {
    spec: ElementSpec,
    document: Document,
}

/// Every registered window of an application, plus which one is current.
#[derive(Debug, Default)]
pub struct DocumentStore {
    windows: BTreeMap<String, Window>,
    current: Option<String>,
    next_node_id: u64,
    next_generation: u64,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn instantiate(&mut self, spec: &ElementSpec) -> Document {
        let generation = self.next_generation;
        self.next_generation += 1;
        Document::build(spec, generation, &mut self.next_node_id)
    }

    /// Register (or replace) a window and return its root handle.
    ///
    /// Replacing a window retires its previous generation.
    pub fn register_window(&mut self, name: impl Into<String>, spec: ElementSpec) -> NodeHandle {
        let document = self.instantiate(&spec);
        let root = document.root().handle();
        self.windows.insert(name.into(), Window { spec, document });
        root
    }

    /// Make `name` the current window, rebuilding its tree from its spec.
    ///
    /// Handles into the window's previous tree expire.
    pub fn render_window(&mut self, name: &str) -> Result<NodeHandle, DocumentError> {
        let spec = self
            .windows
            .get(name)
            .map(|w| w.spec.clone())
            .ok_or_else(|| DocumentError::UnknownWindow(name.to_string()))?;
        let document = self.instantiate(&spec);
        let root = document.root().handle();
        if let Some(window) = self.windows.get_mut(name) {
            window.document = document;
        }
        self.current = Some(name.to_string());
        Ok(root)
    }

    pub fn window(&self, name: &str) -> Option<&Document> {
        self.windows.get(name).map(|w| &w.document)
    }

    pub fn window_root(&self, name: &str) -> Option<NodeHandle> {
        self.window(name).map(|doc| doc.root().handle())
    }

    pub fn current_window_name(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn current_root(&self) -> Option<NodeHandle> {
        self.current.as_deref().and_then(|name| self.window_root(name))
    }

    pub fn window_names(&self) -> Vec<String> {
        self.windows.keys().cloned().collect()
    }

    fn document_for(&self, handle: NodeHandle) -> Result<&Document, DocumentError> {
        if let Some(window) = self
            .windows
            .values()
            .find(|w| w.document.generation == handle.generation)
        {
            return Ok(&window.document);
        }
        if handle.generation < self.next_generation {
            Err(DocumentError::Expired(handle))
        } else {
            Err(DocumentError::NotFound(handle))
        }
    }

    /// Resolve a handle against the live documents.
    pub fn node(&self, handle: NodeHandle) -> Result<NodeRef<'_>, DocumentError> {
        self.document_for(handle)?
            .get(handle.node)
            .ok_or(DocumentError::NotFound(handle))
    }

    /// Write an attribute on a live node.
    pub fn set_attr(
        &mut self,
        handle: NodeHandle,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), DocumentError> {
        let window = self
            .windows
            .values_mut()
            .find(|w| w.document.generation == handle.generation);
        let Some(window) = window else {
            return Err(if handle.generation < self.next_generation {
                DocumentError::Expired(handle)
            } else {
                DocumentError::NotFound(handle)
            });
        };
        let doc = &mut window.document;
        let slot = *doc.slots.get(&handle.node).ok_or(DocumentError::NotFound(handle))?;
        doc.nodes[slot].attrs.insert(name.into(), value.into());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ElementSpec {
        ElementSpec::new("Window")
            .attr("name", "main")
            .child(
                ElementSpec::new("Panel")
                    .attr("name", "toolbar")
                    .child(ElementSpec::new("Button").attr("name", "ok"))
                    .child(ElementSpec::new("Button").attr("name", "cancel")),
            )
            .child(ElementSpec::new("Label").attr("Text", "hello"))
    }

    fn names<'a>(nodes: impl Iterator<Item = NodeRef<'a>>) -> Vec<String> {
        nodes
            .map(|n| n.attr("name").unwrap_or(n.tag()).to_string())
            .collect()
    }

    #[test]
    fn descendants_respect_depth_in_preorder() {
        let mut store = DocumentStore::new();
        let root = store.register_window("main", sample());
        let root = store.node(root).unwrap();

        assert_eq!(names(root.descendants(1)), vec!["toolbar", "Label"]);
        assert_eq!(names(root.descendants(2)), vec!["toolbar", "ok", "cancel", "Label"]);
        assert_eq!(root.descendants(0).count(), 0);
        assert_eq!(names(root.subtree()), vec!["main", "toolbar", "ok", "cancel", "Label"]);
    }

    #[test]
    fn attributes_are_case_insensitive_and_class_is_tag() {
        let mut store = DocumentStore::new();
        let root = store.register_window("main", sample());
        let label = store.node(root).unwrap().children().nth(1).unwrap();
        assert_eq!(label.attr("text"), Some("hello"));
        assert_eq!(label.attr("CLASS"), Some("Label"));
        assert_eq!(label.attr("missing"), None);
    }

    #[test]
    fn node_ids_are_unique_across_windows() {
        let mut store = DocumentStore::new();
        let a = store.register_window("a", sample());
        let b = store.register_window("b", sample());
        assert_ne!(a.node, b.node);
        assert_ne!(a.generation, b.generation);
    }

    #[test]
    fn render_expires_previous_handles() {
        let mut store = DocumentStore::new();
        let old_root = store.register_window("main", sample());
        let old_child = store.node(old_root).unwrap().children().next().unwrap().handle();

        let new_root = store.render_window("main").unwrap();
        assert_ne!(new_root, old_root);
        assert_eq!(store.current_root(), Some(new_root));
        assert_eq!(store.node(old_child).unwrap_err(), DocumentError::Expired(old_child));
        assert!(store.node(new_root).is_ok());
    }

    #[test]
    fn unknown_node_in_live_generation_is_not_found() {
        let mut store = DocumentStore::new();
        let root = store.register_window("main", sample());
        let bogus = NodeHandle {
            generation: root.generation,
            node: 9_999,
        };
        assert_eq!(store.node(bogus).unwrap_err(), DocumentError::NotFound(bogus));

        let future = NodeHandle {
            generation: 42,
            node: root.node,
        };
        assert_eq!(store.node(future).unwrap_err(), DocumentError::NotFound(future));
    }

    #[test]
    fn set_attr_updates_live_node_only() {
        let mut store = DocumentStore::new();
        let root = store.register_window("main", sample());
        store.set_attr(root, "title", "Hi").unwrap();
        assert_eq!(store.node(root).unwrap().attr("title"), Some("Hi"));

        store.render_window("main").unwrap();
        assert_eq!(store.set_attr(root, "title", "x"), Err(DocumentError::Expired(root)));
    }

    #[test]
    fn render_unknown_window_fails() {
        let mut store = DocumentStore::new();
        assert_eq!(
            store.render_window("nope"),
            Err(DocumentError::UnknownWindow("nope".into()))
        );
        assert!(store.current_root().is_none());
    }

    #[test]
    fn element_spec_reads_from_json() {
        let spec: ElementSpec = serde_json::from_str(
            r#"{"type":"Window","attrs":{"name":"w"},"children":[{"type":"Button"}]}"#,
        )
        .unwrap();
        assert_eq!(spec.tag, "Window");
        assert_eq!(spec.children[0].tag, "Button");
        assert!(spec.children[0].attrs.is_empty());
    }

    #[test]
    fn handle_serializes_as_object() {
        let handle = NodeHandle { generation: 3, node: 17 };
        assert_eq!(
            serde_json::to_value(handle).unwrap(),
            serde_json::json!({"generation": 3, "node": 17})
        );
    }
}

//! Owned, mutable XML document tree.
//!
//! Messages are parsed once into an arena of nodes, mutated in place during
//! transformation, and serialized back to text. Parsing goes through
//! roxmltree; the arena exists because the transform side needs in-place
//! writes, which a read-only parse tree cannot provide.

use crate::error::{Result, WsError};
use std::fmt::Write as _;
use std::path::Path;

/// Index of a node inside its document's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Qualified name: optional prefix and namespace URI, plus the local part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
    pub namespace: Option<String>,
}

impl QName {
    /// Name without namespace.
    pub fn local(local: impl Into<String>) -> Self {
        Self { prefix: None, local: local.into(), namespace: None }
    }

    /// Prefixed, namespace-qualified name.
    pub fn prefixed(
        prefix: impl Into<String>,
        local: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            prefix: Some(prefix.into()),
            local: local.into(),
            namespace: Some(namespace.into()),
        }
    }
}

/// A named attribute value.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

#[derive(Debug, Clone)]
struct NodeData {
    parent: Option<NodeId>,
    kind: NodeKind,
}

#[derive(Debug, Clone)]
enum NodeKind {
    Element(ElementData),
    Text(String),
}

#[derive(Debug, Clone)]
struct ElementData {
    name: QName,
    attributes: Vec<Attribute>,
    children: Vec<NodeId>,
}

/// An owned XML tree. One document per message; not shared across
/// concurrent operations.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    nodes: Vec<NodeData>,
    root: NodeId,
}

impl XmlDocument {
    /// Parse a document from a string.
    pub fn parse(xml: &str) -> Result<Self> {
        let parsed = roxmltree::Document::parse(xml)
            .map_err(|e| WsError::InvalidMessage(e.to_string()))?;

        let mut document = Self { nodes: Vec::new(), root: NodeId(0) };
        let root = document.convert(parsed.root_element(), None);
        document.root = root;
        Ok(document)
    }

    /// Load and parse a document from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let xml = std::fs::read_to_string(path).map_err(|e| {
            WsError::InvalidMessage(format!("could not read {}: {}", path.display(), e))
        })?;
        Self::parse(&xml)
    }

    /// Create a document holding a single root element.
    pub fn with_root(name: QName) -> Self {
        let root = NodeData {
            parent: None,
            kind: NodeKind::Element(ElementData {
                name,
                attributes: Vec::new(),
                children: Vec::new(),
            }),
        };
        Self { nodes: vec![root], root: NodeId(0) }
    }

    fn convert(&mut self, source: roxmltree::Node<'_, '_>, parent: Option<NodeId>) -> NodeId {
        let name = QName {
            prefix: prefix_of(&source, source.tag_name().namespace()),
            local: source.tag_name().name().to_string(),
            namespace: source.tag_name().namespace().map(str::to_string),
        };

        let attributes = source
            .attributes()
            .map(|attribute| Attribute {
                name: QName {
                    prefix: prefix_of(&source, attribute.namespace()),
                    local: attribute.name().to_string(),
                    namespace: attribute.namespace().map(str::to_string),
                },
                value: attribute.value().to_string(),
            })
            .collect();

        let id = self.push(NodeData {
            parent,
            kind: NodeKind::Element(ElementData { name, attributes, children: Vec::new() }),
        });

        for child in source.children() {
            if child.is_element() {
                let child_id = self.convert(child, Some(id));
                self.attach(id, child_id);
            } else if child.is_text() {
                let text = child.text().unwrap_or_default().to_string();
                let child_id = self.push(NodeData { parent: Some(id), kind: NodeKind::Text(text) });
                self.attach(id, child_id);
            }
            // comments and processing instructions are not represented
        }

        id
    }

    fn push(&mut self, node: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    fn attach(&mut self, parent: NodeId, child: NodeId) {
        if let NodeKind::Element(element) = &mut self.nodes[parent.index()].kind {
            element.children.push(child);
        }
    }

    fn element(&self, id: NodeId) -> Option<&ElementData> {
        match &self.nodes.get(id.index())?.kind {
            NodeKind::Element(element) => Some(element),
            NodeKind::Text(_) => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Option<&mut ElementData> {
        match &mut self.nodes.get_mut(id.index())?.kind {
            NodeKind::Element(element) => Some(element),
            NodeKind::Text(_) => None,
        }
    }

    /// The root element.
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.element(id).is_some()
    }

    /// Qualified name of an element; `None` for text nodes.
    pub fn name(&self, id: NodeId) -> Option<&QName> {
        self.element(id).map(|element| &element.name)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.index())?.parent
    }

    /// All child nodes of an element, in document order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.element(id).map(|element| element.children.as_slice()).unwrap_or(&[])
    }

    /// Element children only; text between them is structurally invisible.
    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|child| self.is_element(*child))
            .collect()
    }

    pub fn has_element_children(&self, id: NodeId) -> bool {
        self.children(id).iter().any(|child| self.is_element(*child))
    }

    pub fn attributes(&self, id: NodeId) -> &[Attribute] {
        self.element(id).map(|element| element.attributes.as_slice()).unwrap_or(&[])
    }

    pub fn attribute(&self, id: NodeId, index: usize) -> Option<&Attribute> {
        self.attributes(id).get(index)
    }

    /// Concatenated text content of the node and its descendants.
    pub fn string_value(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id.index()].kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element(element) => {
                for child in &element.children {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    /// Replace an element's content with a single text value. Existing
    /// children are detached.
    pub fn set_element_text(&mut self, id: NodeId, value: &str) {
        let text_id =
            if value.is_empty() { None } else { Some(self.push(NodeData { parent: Some(id), kind: NodeKind::Text(value.to_string()) })) };
        if let Some(element) = self.element_mut(id) {
            element.children.clear();
            if let Some(text_id) = text_id {
                element.children.push(text_id);
            }
        }
    }

    pub fn set_attribute_value(&mut self, id: NodeId, index: usize, value: &str) {
        if let Some(element) = self.element_mut(id) {
            if let Some(attribute) = element.attributes.get_mut(index) {
                attribute.value = value.to_string();
            }
        }
    }

    /// Set (or overwrite) an attribute by name.
    pub fn set_attribute(&mut self, id: NodeId, name: QName, value: impl Into<String>) {
        if let Some(element) = self.element_mut(id) {
            let value = value.into();
            if let Some(existing) =
                element.attributes.iter_mut().find(|attribute| attribute.name == name)
            {
                existing.value = value;
            } else {
                element.attributes.push(Attribute { name, value });
            }
        }
    }

    /// Append a new element under `parent`.
    pub fn add_element(&mut self, parent: NodeId, name: QName) -> NodeId {
        let id = self.push(NodeData {
            parent: Some(parent),
            kind: NodeKind::Element(ElementData {
                name,
                attributes: Vec::new(),
                children: Vec::new(),
            }),
        });
        self.attach(parent, id);
        id
    }

    /// Append a text node under `parent`.
    pub fn add_text(&mut self, parent: NodeId, text: impl Into<String>) -> NodeId {
        let id = self.push(NodeData { parent: Some(parent), kind: NodeKind::Text(text.into()) });
        self.attach(parent, id);
        id
    }

    /// All elements of the document in pre-order, root first.
    pub fn all_elements(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.walk_elements(self.root, true, &mut out);
        out
    }

    /// Strict element descendants of a node in pre-order.
    pub fn descendant_elements(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.walk_elements(id, false, &mut out);
        out
    }

    fn walk_elements(&self, id: NodeId, include_self: bool, out: &mut Vec<NodeId>) {
        if include_self && self.is_element(id) {
            out.push(id);
        }
        for child in self.children(id) {
            if self.is_element(*child) {
                out.push(*child);
                self.walk_elements(*child, false, out);
            }
        }
    }

    /// Deep-copy the subtree rooted at `id` into a standalone document.
    pub fn extract_subtree(&self, id: NodeId) -> XmlDocument {
        let mut document = XmlDocument { nodes: Vec::new(), root: NodeId(0) };
        let root = document.copy_from(self, id, None);
        document.root = root;
        document
    }

    /// Deep-copy a subtree from another document under `parent`, returning
    /// the id of the imported root.
    pub fn import_subtree(&mut self, parent: NodeId, other: &XmlDocument, node: NodeId) -> NodeId {
        let imported = self.copy_from(other, node, Some(parent));
        self.attach(parent, imported);
        imported
    }

    fn copy_from(&mut self, other: &XmlDocument, node: NodeId, parent: Option<NodeId>) -> NodeId {
        match &other.nodes[node.index()].kind {
            NodeKind::Text(text) => {
                self.push(NodeData { parent, kind: NodeKind::Text(text.clone()) })
            }
            NodeKind::Element(element) => {
                let id = self.push(NodeData {
                    parent,
                    kind: NodeKind::Element(ElementData {
                        name: element.name.clone(),
                        attributes: element.attributes.clone(),
                        children: Vec::new(),
                    }),
                });
                for child in &element.children {
                    let child_id = self.copy_from(other, *child, Some(id));
                    self.attach(id, child_id);
                }
                id
            }
        }
    }

    /// Serialize the document to a string. Namespace declarations are
    /// emitted at the first element where a binding is not already in scope.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        let mut scope: Vec<(Option<String>, String)> = Vec::new();
        self.write_node(self.root, &mut scope, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, scope: &mut Vec<(Option<String>, String)>, out: &mut String) {
        let element = match &self.nodes[id.index()].kind {
            NodeKind::Text(text) => {
                out.push_str(&escape_text(text));
                return;
            }
            NodeKind::Element(element) => element,
        };

        let tag = match &element.name.prefix {
            Some(prefix) => format!("{}:{}", prefix, element.name.local),
            None => element.name.local.clone(),
        };

        let _ = write!(out, "<{}", tag);

        let mut declared = 0usize;
        declared += self.declare_namespace(&element.name, scope, out);
        for attribute in &element.attributes {
            if attribute.name.prefix.is_some() {
                declared += self.declare_namespace(&attribute.name, scope, out);
            }
            let attr_name = match &attribute.name.prefix {
                Some(prefix) => format!("{}:{}", prefix, attribute.name.local),
                None => attribute.name.local.clone(),
            };
            let _ = write!(out, " {}=\"{}\"", attr_name, escape_attribute(&attribute.value));
        }

        if element.children.is_empty() {
            out.push_str("/>");
        } else {
            out.push('>');
            for child in &element.children {
                self.write_node(*child, scope, out);
            }
            let _ = write!(out, "</{}>", tag);
        }

        scope.truncate(scope.len() - declared);
    }

    /// Emit an `xmlns` declaration if the name's binding is not in scope.
    /// Returns the number of scope entries pushed.
    fn declare_namespace(
        &self,
        name: &QName,
        scope: &mut Vec<(Option<String>, String)>,
        out: &mut String,
    ) -> usize {
        let bound = scope
            .iter()
            .rev()
            .find(|(prefix, _)| *prefix == name.prefix)
            .map(|(_, uri)| uri.as_str());

        match (&name.namespace, bound) {
            (Some(uri), Some(in_scope)) if in_scope == uri => 0,
            (Some(uri), _) => {
                match &name.prefix {
                    Some(prefix) => {
                        let _ = write!(out, " xmlns:{}=\"{}\"", prefix, escape_attribute(uri));
                    }
                    None => {
                        let _ = write!(out, " xmlns=\"{}\"", escape_attribute(uri));
                    }
                }
                scope.push((name.prefix.clone(), uri.clone()));
                1
            }
            // Un-namespaced element under an inherited default namespace
            // needs an explicit reset.
            (None, Some(_)) if name.prefix.is_none() => {
                out.push_str(" xmlns=\"\"");
                scope.push((None, String::new()));
                1
            }
            (None, _) => 0,
        }
    }
}

fn prefix_of(node: &roxmltree::Node<'_, '_>, namespace: Option<&str>) -> Option<String> {
    namespace
        .and_then(|uri| node.lookup_prefix(uri))
        .filter(|prefix| !prefix.is_empty())
        .map(str::to_string)
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attribute(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

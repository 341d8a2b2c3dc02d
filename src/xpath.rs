//! Path expression evaluation.
//!
//! Evaluates location-path expressions against an owned [`XmlDocument`],
//! honoring a namespace table built from the document itself so that
//! expressions can be written with a fixed default prefix even when source
//! documents use arbitrary or undeclared prefixes.
//!
//! Supported syntax: absolute and relative child steps (`/a/b`, `a/b`),
//! descendant steps (`//a`), wildcards (`*`), terminal attribute steps
//! (`@x`, `@p:x`), prefix-qualified names (`p:name`), 1-based positional
//! predicates (`a[2]`), and a `count(...)` wrapper. Relative expressions
//! evaluate from the document node, like absolute ones.

use crate::document::{NodeId, QName, XmlDocument};
use crate::error::{Result, WsError};
use crate::mapper;
use crate::property::Property;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Snapshot map between namespace URIs and prefixes.
///
/// Built by a single pre-order walk over every element of a document. A
/// namespace-qualified element without an explicit prefix is recorded under
/// the configured default prefix; duplicate registrations resolve
/// last-write-wins in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamespaceTable {
    prefix_to_uri: HashMap<String, String>,
    uri_to_prefix: HashMap<String, String>,
}

impl NamespaceTable {
    /// Build the table for a document. Owns no state beyond the result and
    /// runs in O(number of nodes).
    pub fn build(document: &XmlDocument, default_prefix: &str) -> Self {
        let mut table = Self::default();
        for id in document.all_elements() {
            if let Some(name) = document.name(id) {
                if let Some(uri) = &name.namespace {
                    let prefix =
                        name.prefix.clone().unwrap_or_else(|| default_prefix.to_string());
                    table.add(uri.clone(), prefix);
                }
            }
        }
        table
    }

    /// Register a URI↔prefix pair, overwriting earlier registrations.
    pub fn add(&mut self, uri: String, prefix: String) {
        self.prefix_to_uri.insert(prefix.clone(), uri.clone());
        self.uri_to_prefix.insert(uri, prefix);
    }

    pub fn uri_for(&self, prefix: &str) -> Option<&str> {
        self.prefix_to_uri.get(prefix).map(String::as_str)
    }

    pub fn prefix_for(&self, uri: &str) -> Option<&str> {
        self.uri_to_prefix.get(uri).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.prefix_to_uri.is_empty()
    }
}

/// A node matched by a path expression: an element, or an attribute
/// addressed by its owner element and attribute index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlNode {
    Element(NodeId),
    Attribute(NodeId, usize),
}

impl XmlNode {
    /// String-value of the node: attribute value, or concatenated text of
    /// an element.
    pub fn string_value(&self, document: &XmlDocument) -> String {
        match self {
            XmlNode::Element(id) => document.string_value(*id),
            XmlNode::Attribute(id, index) => document
                .attribute(*id, *index)
                .map(|attribute| attribute.value.clone())
                .unwrap_or_default(),
        }
    }

    /// The node's own tag or attribute name (local part).
    pub fn node_name(&self, document: &XmlDocument) -> String {
        match self {
            XmlNode::Element(id) => {
                document.name(*id).map(|name| name.local.clone()).unwrap_or_default()
            }
            XmlNode::Attribute(id, index) => document
                .attribute(*id, *index)
                .map(|attribute| attribute.name.local.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug)]
struct PathExpr {
    steps: Vec<Step>,
}

#[derive(Debug)]
struct Step {
    descendant: bool,
    test: NameTest,
    position: Option<usize>,
}

#[derive(Debug)]
enum NameTest {
    AnyElement,
    Element { prefix: Option<String>, local: String },
    Attribute { prefix: Option<String>, local: String },
}

/// A name test with its prefix resolved through the namespace table.
enum ResolvedTest {
    /// The expression references a prefix the table does not know; the
    /// whole expression matches nothing.
    Unbound,
    AnyElement,
    Element { namespace: Option<String>, local: String },
    Attribute { namespace: Option<String>, local: String },
}

/// Evaluates path expressions against one owned document.
///
/// Replacing the document rebuilds the namespace table; the table is never
/// partially updated. Lenient by default: unmatched expressions degrade to
/// empty results and `set_value` no-ops. Strict mode turns the write-side
/// degradations into typed errors.
#[derive(Debug)]
pub struct XPathProcessor {
    default_prefix: String,
    strict: bool,
    document: Option<XmlDocument>,
    namespaces: NamespaceTable,
    predicate: Regex,
}

impl XPathProcessor {
    pub fn new(default_prefix: &str) -> Self {
        Self {
            default_prefix: default_prefix.to_string(),
            strict: false,
            document: None,
            namespaces: NamespaceTable::default(),
            // positional predicate suffix, e.g. "a[2]"
            predicate: Regex::new(r"^(.+?)\[(\d+)\]$").unwrap(),
        }
    }

    /// Fail instead of silently degrading when a write target does not
    /// match or a value is missing.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Parse and set the message. Fatal on unparseable input.
    pub fn set_document(&mut self, xml: &str) -> Result<()> {
        let document = XmlDocument::parse(xml)?;
        self.set_parsed_document(document);
        Ok(())
    }

    /// Load, parse and set the message from a file.
    pub fn set_document_from_file(&mut self, path: &Path) -> Result<()> {
        let document = XmlDocument::from_file(path)?;
        self.set_parsed_document(document);
        Ok(())
    }

    /// Set an already-built document, rebuilding the namespace table.
    pub fn set_parsed_document(&mut self, document: XmlDocument) {
        self.namespaces = NamespaceTable::build(&document, &self.default_prefix);
        self.document = Some(document);
    }

    pub fn document(&self) -> Option<&XmlDocument> {
        self.document.as_ref()
    }

    pub fn namespaces(&self) -> &NamespaceTable {
        &self.namespaces
    }

    /// Serialize the current document.
    pub fn document_as_string(&self) -> Result<String> {
        self.document
            .as_ref()
            .map(XmlDocument::to_xml)
            .ok_or_else(|| WsError::Configuration("no document set".to_string()))
    }

    /// Evaluate an expression to a node-set. A malformed expression is an
    /// error; an unbound prefix yields an empty set.
    pub fn evaluate(&self, expr: &str) -> Result<Vec<XmlNode>> {
        let document = self
            .document
            .as_ref()
            .ok_or_else(|| WsError::Configuration("no document set".to_string()))?;
        let path = self.parse_path(expr)?;
        self.eval_path(document, &path)
    }

    fn eval_path(&self, document: &XmlDocument, path: &PathExpr) -> Result<Vec<XmlNode>> {
        let Some((last, init)) = path.steps.split_last() else {
            return Ok(Vec::new());
        };
        let context = self.eval_context(document, init)?;

        match self.resolve(&last.test)? {
            ResolvedTest::Unbound => Ok(Vec::new()),
            ResolvedTest::Attribute { namespace, local } => {
                let mut out = Vec::new();
                for ctx in &context {
                    let Some(owner) = ctx else { continue };
                    let matches: Vec<XmlNode> = document
                        .attributes(*owner)
                        .iter()
                        .enumerate()
                        .filter(|(_, attribute)| {
                            attribute.name.local == local
                                && attribute.name.namespace.as_deref() == namespace.as_deref()
                        })
                        .map(|(index, _)| XmlNode::Attribute(*owner, index))
                        .collect();
                    out.extend(apply_position(matches, last.position));
                }
                Ok(out)
            }
            _ => {
                let matched = self.eval_element_step(document, &context, last)?;
                Ok(matched.into_iter().map(XmlNode::Element).collect())
            }
        }
    }

    /// Narrow a context set through the given steps. `None` is the document
    /// node, whose only child is the root element.
    fn eval_context(
        &self,
        document: &XmlDocument,
        steps: &[Step],
    ) -> Result<Vec<Option<NodeId>>> {
        let mut context: Vec<Option<NodeId>> = vec![None];
        for step in steps {
            let matched = self.eval_element_step(document, &context, step)?;
            if matched.is_empty() {
                return Ok(Vec::new());
            }
            context = matched.into_iter().map(Some).collect();
        }
        Ok(context)
    }

    /// For an expression whose last step names an attribute, the first
    /// element the leading steps match, plus the attribute's resolved name.
    /// Used by `set_value` to create an attribute that does not exist yet.
    fn attribute_target(&self, expr: &str) -> Result<Option<(NodeId, QName)>> {
        let Some(document) = self.document.as_ref() else { return Ok(None) };
        let path = self.parse_path(expr)?;
        let Some((last, init)) = path.steps.split_last() else { return Ok(None) };
        let NameTest::Attribute { prefix, local } = &last.test else { return Ok(None) };
        if last.descendant || last.position.is_some() {
            return Ok(None);
        }

        let namespace = match prefix {
            Some(prefix) => match self.namespaces.uri_for(prefix) {
                Some(uri) => Some(uri.to_string()),
                None => return Ok(None),
            },
            None => None,
        };

        let owner = self.eval_context(document, init)?.into_iter().flatten().next();
        Ok(owner.map(|owner| {
            (owner, QName { prefix: prefix.clone(), local: local.clone(), namespace })
        }))
    }

    fn eval_element_step(
        &self,
        document: &XmlDocument,
        context: &[Option<NodeId>],
        step: &Step,
    ) -> Result<Vec<NodeId>> {
        let resolved = self.resolve(&step.test)?;
        if matches!(resolved, ResolvedTest::Unbound) {
            return Ok(Vec::new());
        }
        if matches!(resolved, ResolvedTest::Attribute { .. }) {
            return Err(WsError::PathExpression(
                "attribute step is only allowed at the end of a path".to_string(),
            ));
        }

        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for ctx in context {
            let candidates = match (step.descendant, ctx) {
                (false, None) => vec![document.root()],
                (false, Some(id)) => document.element_children(*id),
                (true, None) => document.all_elements(),
                (true, Some(id)) => document.descendant_elements(*id),
            };

            let matches: Vec<NodeId> = candidates
                .into_iter()
                .filter(|id| self.test_element(document, *id, &resolved))
                .collect();

            for id in apply_position(matches, step.position) {
                if seen.insert(id) {
                    out.push(id);
                }
            }
        }
        Ok(out)
    }

    fn test_element(&self, document: &XmlDocument, id: NodeId, test: &ResolvedTest) -> bool {
        let Some(name) = document.name(id) else { return false };
        match test {
            ResolvedTest::AnyElement => true,
            ResolvedTest::Element { namespace, local } => {
                name.local == *local && name.namespace.as_deref() == namespace.as_deref()
            }
            _ => false,
        }
    }

    fn resolve(&self, test: &NameTest) -> Result<ResolvedTest> {
        let resolve_prefix = |prefix: &Option<String>| -> Option<Option<String>> {
            match prefix {
                None => Some(None),
                Some(prefix) => self.namespaces.uri_for(prefix).map(|uri| Some(uri.to_string())),
            }
        };

        Ok(match test {
            NameTest::AnyElement => ResolvedTest::AnyElement,
            NameTest::Element { prefix, local } => match resolve_prefix(prefix) {
                Some(namespace) => ResolvedTest::Element { namespace, local: local.clone() },
                None => ResolvedTest::Unbound,
            },
            NameTest::Attribute { prefix, local } => match resolve_prefix(prefix) {
                Some(namespace) => ResolvedTest::Attribute { namespace, local: local.clone() },
                None => ResolvedTest::Unbound,
            },
        })
    }

    fn parse_path(&self, expr: &str) -> Result<PathExpr> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(WsError::PathExpression("empty path expression".to_string()));
        }

        let mut rest = expr;
        let mut steps = Vec::new();
        while !rest.is_empty() {
            let descendant = if let Some(stripped) = rest.strip_prefix("//") {
                rest = stripped;
                true
            } else if let Some(stripped) = rest.strip_prefix('/') {
                rest = stripped;
                false
            } else {
                false
            };

            let end = rest.find('/').unwrap_or(rest.len());
            let segment = &rest[..end];
            rest = &rest[end..];
            if segment.is_empty() {
                return Err(WsError::PathExpression(format!("empty step in '{expr}'")));
            }
            steps.push(self.parse_step(segment, descendant)?);
        }

        if steps.is_empty() {
            return Err(WsError::PathExpression(format!("no steps in '{expr}'")));
        }
        Ok(PathExpr { steps })
    }

    fn parse_step(&self, segment: &str, descendant: bool) -> Result<Step> {
        let (base, position) = match self.predicate.captures(segment) {
            Some(captures) => {
                let position: usize = captures[2]
                    .parse()
                    .map_err(|_| WsError::PathExpression(format!("bad predicate in '{segment}'")))?;
                if position == 0 {
                    return Err(WsError::PathExpression(format!(
                        "positions are 1-based in '{segment}'"
                    )));
                }
                (captures.get(1).map(|m| m.as_str()).unwrap_or(""), Some(position))
            }
            None => (segment, None),
        };

        let (attribute, name) = match base.strip_prefix('@') {
            Some(name) => (true, name),
            None => (false, base),
        };

        if name == "*" {
            if attribute {
                return Err(WsError::PathExpression(
                    "attribute wildcard is not supported".to_string(),
                ));
            }
            return Ok(Step { descendant, test: NameTest::AnyElement, position });
        }

        let (prefix, local) = match name.split_once(':') {
            Some((prefix, local)) => (Some(prefix.to_string()), local.to_string()),
            None => (None, name.to_string()),
        };
        if local.is_empty()
            || local.contains(|c: char| "()[]@/\"'=* ".contains(c))
            || prefix.as_deref().is_some_and(str::is_empty)
        {
            return Err(WsError::PathExpression(format!("unsupported step '{segment}'")));
        }

        let test = if attribute {
            NameTest::Attribute { prefix, local }
        } else {
            NameTest::Element { prefix, local }
        };
        Ok(Step { descendant, test, position })
    }

    /// String-value of the first match. `Some("")` when nothing matches,
    /// `None` on a malformed expression.
    pub fn simple_value(&self, expr: &str) -> Option<String> {
        let document = self.document.as_ref()?;
        match self.evaluate(expr) {
            Ok(nodes) => Some(
                nodes.first().map(|node| node.string_value(document)).unwrap_or_default(),
            ),
            Err(e) => {
                debug!(expr = %expr, error = %e, "path evaluation failed");
                None
            }
        }
    }

    /// Read the match as a property: a scalar for a leaf, a list for a
    /// structured or multi-node match. `None` when nothing matches or
    /// evaluation fails.
    pub fn value(&self, expr: &str, id: &str) -> Option<Property> {
        let document = self.document.as_ref()?;
        match self.evaluate(expr) {
            Ok(nodes) => mapper::read_nodes(document, &nodes, id),
            Err(e) => {
                debug!(expr = %expr, error = %e, "path evaluation failed");
                None
            }
        }
    }

    /// Write a value into the first matched element or attribute. An
    /// attribute that does not exist yet is created on its matched owner
    /// element. Otherwise, no match is a silent no-op (lenient) or a typed
    /// error (strict); a malformed expression is always an error.
    pub fn set_value(&mut self, expr: &str, value: &str) -> Result<()> {
        let target = self.evaluate(expr)?.into_iter().next();
        let missing_attribute =
            if target.is_none() { self.attribute_target(expr)? } else { None };
        let Some(document) = self.document.as_mut() else {
            return Err(WsError::Configuration("no document set".to_string()));
        };

        match (target, missing_attribute) {
            (Some(XmlNode::Element(id)), _) => document.set_element_text(id, value),
            (Some(XmlNode::Attribute(id, index)), _) => {
                document.set_attribute_value(id, index, value)
            }
            (None, Some((owner, name))) => document.set_attribute(owner, name, value),
            (None, None) if self.strict => {
                return Err(WsError::PathExpression(format!("no node matched '{expr}'")));
            }
            (None, None) => debug!(expr = %expr, "no node matched, value not applied"),
        }
        Ok(())
    }

    /// Count the nodes matched by the expression, unwrapping a `count(...)`
    /// call if present. Returns 0 when nothing matches and on any
    /// evaluation failure, in strict mode too.
    pub fn count(&self, expr: &str) -> usize {
        let expr = expr.trim();
        let inner = expr
            .strip_prefix("count(")
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(expr);

        match self.evaluate(inner) {
            Ok(nodes) => nodes.len(),
            Err(e) => {
                debug!(expr = %inner, error = %e, "count evaluation failed");
                0
            }
        }
    }

    /// First ELEMENT match of the expression.
    pub fn first_element(&self, expr: &str) -> Option<NodeId> {
        self.evaluate(expr).ok()?.into_iter().find_map(|node| match node {
            XmlNode::Element(id) => Some(id),
            XmlNode::Attribute(..) => None,
        })
    }
}

fn apply_position<T>(matches: Vec<T>, position: Option<usize>) -> Vec<T> {
    match position {
        Some(position) => matches.into_iter().nth(position - 1).into_iter().collect(),
        None => matches,
    }
}

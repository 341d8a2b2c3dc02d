//! Mapping between matched XML nodes and property trees.
//!
//! The read side decomposes a node-set into scalar and list properties; the
//! write side walks a binding tree and pushes values from the flat id map
//! into the document through the path evaluator.

use crate::document::XmlDocument;
use crate::error::{Result, WsError};
use crate::property::{PathBinding, Property, ID_SEPARATOR};
use crate::xpath::{XPathProcessor, XmlNode};
use std::collections::HashMap;

/// Map a matched node-set to a property.
///
/// - empty set: `None`
/// - a single leaf (attribute, or element without element children): a text
///   property under the caller-supplied id
/// - a single structured element: a list under the id whose entries are the
///   element children, each read under its own tag name
/// - a multi-node set: a list under the id keyed by each node's own
///   tag/attribute name
pub fn read_nodes(document: &XmlDocument, nodes: &[XmlNode], id: &str) -> Option<Property> {
    match nodes {
        [] => None,
        [single] => Some(read_single(document, *single, id)),
        many => {
            let mut list = Property::list(id);
            for node in many {
                let name = node.node_name(document);
                list.push(read_single(document, *node, &name));
            }
            Some(list)
        }
    }
}

fn read_single(document: &XmlDocument, node: XmlNode, name: &str) -> Property {
    match node {
        XmlNode::Attribute(..) => Property::text(name, node.string_value(document)),
        XmlNode::Element(id) => {
            if document.has_element_children(id) {
                let mut list = Property::list(name);
                for child in document.element_children(id) {
                    let child_name = document
                        .name(child)
                        .map(|qname| qname.local.clone())
                        .unwrap_or_default();
                    list.push(read_single(document, XmlNode::Element(child), &child_name));
                }
                list
            } else {
                Property::text(name, document.string_value(id))
            }
        }
    }
}

/// Apply a binding tree to the processor's document.
///
/// Leaf bindings concatenate the parent path with their own fragment and
/// write the value found under their dotted id; a missing id writes an
/// empty string in lenient mode and fails in strict mode. Container
/// bindings only recurse and never write at their own level.
pub fn write_bindings(
    processor: &mut XPathProcessor,
    bindings: &[PathBinding],
    values: &HashMap<String, String>,
) -> Result<()> {
    for binding in bindings {
        write_binding(processor, binding, values, None, None)?;
    }
    Ok(())
}

fn write_binding(
    processor: &mut XPathProcessor,
    binding: &PathBinding,
    values: &HashMap<String, String>,
    parent_id: Option<&str>,
    parent_path: Option<&str>,
) -> Result<()> {
    let id = match parent_id {
        Some(parent) => format!("{}{}{}", parent, ID_SEPARATOR, binding.name),
        None => binding.name.clone(),
    };
    let path = match parent_path {
        Some(parent) => format!("{}{}", parent, binding.path),
        None => binding.path.clone(),
    };

    if !binding.children.is_empty() {
        for child in &binding.children {
            write_binding(processor, child, values, Some(&id), Some(&path))?;
        }
        return Ok(());
    }

    let value = match values.get(&id) {
        Some(value) => value.clone(),
        None if processor.is_strict() => {
            return Err(WsError::PathExpression(format!("no value for binding id '{id}'")));
        }
        None => String::new(),
    };
    processor.set_value(&path, &value)
}

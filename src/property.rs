//! Property value model.
//!
//! Properties are the unit of exchange with the outer test engine: named
//! scalar values, ordered lists of properties, and path bindings that tie a
//! property name to an XML document location.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Separator used when flattening nested property names into ids
/// (`parent.child`).
pub const ID_SEPARATOR: char = '.';

/// A named value node.
///
/// Scalars carry a canonical wire format (see [`Property::wire_value`]);
/// lists are ordered and place no uniqueness requirement on child names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Property {
    /// Plain text value.
    Text { name: String, #[serde(default)] value: String },

    /// Numeric value.
    Numeric { name: String, value: f64 },

    /// Boolean value.
    Boolean { name: String, value: bool },

    /// Date value, serialized as `xs:dateTime`.
    Date { name: String, value: DateTime<FixedOffset> },

    /// A serialized XML document.
    Xml { name: String, #[serde(default)] value: String },

    /// Ordered list of properties. Insertion order is significant.
    List {
        name: String,
        #[serde(default)]
        properties: Vec<Property>,
    },
}

impl Property {
    /// Convenience constructor for a text property.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Property::Text { name: name.into(), value: value.into() }
    }

    /// Convenience constructor for an empty list.
    pub fn list(name: impl Into<String>) -> Self {
        Property::List { name: name.into(), properties: Vec::new() }
    }

    /// The name of this property.
    pub fn name(&self) -> &str {
        match self {
            Property::Text { name, .. }
            | Property::Numeric { name, .. }
            | Property::Boolean { name, .. }
            | Property::Date { name, .. }
            | Property::Xml { name, .. }
            | Property::List { name, .. } => name,
        }
    }

    /// The value of this property in wire format:
    /// booleans as `true`/`false`, dates as `YYYY-MM-DDTHH:MM:SS±hhmm`,
    /// numbers without a trailing `.0` when integral. Lists have no wire
    /// format and yield an empty string.
    pub fn wire_value(&self) -> String {
        match self {
            Property::Text { value, .. } | Property::Xml { value, .. } => value.clone(),
            Property::Numeric { value, .. } => format_number(*value),
            Property::Boolean { value, .. } => {
                if *value { "true".to_string() } else { "false".to_string() }
            }
            Property::Date { value, .. } => value.format("%Y-%m-%dT%H:%M:%S%z").to_string(),
            Property::List { .. } => String::new(),
        }
    }

    /// Push a child onto a list property. No-op for scalars.
    pub fn push(&mut self, child: Property) {
        if let Property::List { properties, .. } = self {
            properties.push(child);
        }
    }
}

fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Flattens a property tree into a map of dotted ids to wire-format values.
///
/// Lists recurse with their name joined onto the id; scalars insert their
/// wire value. This is the lookup table the transform side resolves binding
/// names against.
pub fn flatten_values(properties: &[Property]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for property in properties {
        flatten_into(property, None, &mut map);
    }
    map
}

fn flatten_into(property: &Property, parent: Option<&str>, map: &mut HashMap<String, String>) {
    let id = match parent {
        Some(parent) => format!("{}{}{}", parent, ID_SEPARATOR, property.name()),
        None => property.name().to_string(),
    };

    if let Property::List { properties, .. } = property {
        for child in properties {
            flatten_into(child, Some(&id), map);
        }
    } else {
        map.insert(id, property.wire_value());
    }
}

/// A named path-expression binding.
///
/// The name correlates the binding with an entry of the flat value map on
/// transform, and keys the extracted result on extract. Children hold path
/// fragments that are concatenated onto the parent's path; a binding with
/// children is a container and never carries a value itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathBinding {
    pub name: String,

    /// Location-path expression, absolute at the root, a `/`-leading
    /// fragment on nested bindings.
    pub path: String,

    #[serde(default)]
    pub children: Vec<PathBinding>,
}

impl PathBinding {
    /// Create a leaf binding.
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self { name: name.into(), path: path.into(), children: Vec::new() }
    }

    /// Validate the binding tree.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("binding name cannot be empty");
        }
        if self.path.is_empty() {
            anyhow::bail!("binding '{}' has an empty path", self.name);
        }
        for child in &self.children {
            child.validate()?;
        }
        Ok(())
    }
}

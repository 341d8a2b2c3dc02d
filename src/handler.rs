//! Message transformation and extraction.
//!
//! An [`XmlMessageHandler`] owns one XML message and two ordered lists of
//! path bindings: the transform side writes request values into the
//! message, the extract side reads response values out of it.

use crate::document::XmlDocument;
use crate::error::{Result, WsError};
use crate::mapper;
use crate::property::{flatten_values, PathBinding, Property};
use crate::xpath::XPathProcessor;
use std::path::Path;

/// Name of the property list returned by [`XmlMessageHandler::extract`].
pub const RESPONSE_CONTAINER_ID: &str = "response";

/// Name of the well-known entry holding the serialized whole message.
pub const MESSAGE_PROPERTY_ID: &str = "message";

#[derive(Debug)]
pub struct XmlMessageHandler {
    processor: XPathProcessor,
    transform_bindings: Vec<PathBinding>,
    extract_bindings: Vec<PathBinding>,
}

impl XmlMessageHandler {
    /// Create a handler for the given XML message. An unparseable message
    /// is fatal.
    pub fn new(message: &str, default_prefix: &str) -> Result<Self> {
        let mut processor = XPathProcessor::new(default_prefix);
        processor.set_document(message)?;
        Ok(Self::with_processor(processor))
    }

    /// Create a handler for a message loaded from a file.
    pub fn from_file(path: &Path, default_prefix: &str) -> Result<Self> {
        let mut processor = XPathProcessor::new(default_prefix);
        processor.set_document_from_file(path)?;
        Ok(Self::with_processor(processor))
    }

    /// Create a handler around an already-built document.
    pub fn from_document(document: XmlDocument, default_prefix: &str) -> Self {
        let mut processor = XPathProcessor::new(default_prefix);
        processor.set_parsed_document(document);
        Self::with_processor(processor)
    }

    fn with_processor(processor: XPathProcessor) -> Self {
        Self { processor, transform_bindings: Vec::new(), extract_bindings: Vec::new() }
    }

    /// Enable strict path failures (see [`XPathProcessor::set_strict`]).
    pub fn strict(mut self, strict: bool) -> Self {
        self.processor.set_strict(strict);
        self
    }

    /// Replace the message. Prior namespace bindings are invalidated and
    /// rebuilt from the new document.
    pub fn set_message(&mut self, message: &str) -> Result<()> {
        self.processor.set_document(message)
    }

    pub fn set_message_from_file(&mut self, path: &Path) -> Result<()> {
        self.processor.set_document_from_file(path)
    }

    pub fn message_as_string(&self) -> Result<String> {
        self.processor.document_as_string()
    }

    pub fn document(&self) -> Option<&XmlDocument> {
        self.processor.document()
    }

    /// Bindings applied by [`transform`](Self::transform), in order.
    pub fn set_transformation_bindings(&mut self, bindings: Vec<PathBinding>) {
        self.transform_bindings = bindings;
    }

    /// Bindings applied by [`extract`](Self::extract), in order.
    pub fn set_extraction_bindings(&mut self, bindings: Vec<PathBinding>) {
        self.extract_bindings = bindings;
    }

    /// Write the given property values into the message.
    ///
    /// The properties are flattened into a dotted-id map; each transform
    /// binding root is then applied in order. Returns the mutated document
    /// (no copy): callers needing the pre-transform state must snapshot
    /// first.
    pub fn transform(&mut self, values: &[Property]) -> Result<&XmlDocument> {
        let value_map = flatten_values(values);
        mapper::write_bindings(&mut self.processor, &self.transform_bindings, &value_map)?;
        self.processor
            .document()
            .ok_or_else(|| WsError::Configuration("no document set".to_string()))
    }

    /// Read the extraction bindings out of the message.
    ///
    /// The result is a list named `response` whose first entry always holds
    /// the serialized whole message under `message`, followed by one entry
    /// per extraction binding root in binding order. Unmatched bindings are
    /// skipped in lenient mode and fail in strict mode.
    pub fn extract(&self) -> Result<Property> {
        let mut result = Property::list(RESPONSE_CONTAINER_ID);
        result.push(Property::Xml {
            name: MESSAGE_PROPERTY_ID.to_string(),
            value: self.message_as_string()?,
        });

        for binding in &self.extract_bindings {
            if let Some(property) = self.extract_binding(binding, None)? {
                result.push(property);
            }
        }
        Ok(result)
    }

    fn extract_binding(
        &self,
        binding: &PathBinding,
        parent_path: Option<&str>,
    ) -> Result<Option<Property>> {
        let path = match parent_path {
            Some(parent) => format!("{}{}", parent, binding.path),
            None => binding.path.clone(),
        };

        if !binding.children.is_empty() {
            let mut list = Property::list(&binding.name);
            for child in &binding.children {
                if let Some(property) = self.extract_binding(child, Some(&path))? {
                    list.push(property);
                }
            }
            return Ok(Some(list));
        }

        match self.processor.value(&path, &binding.name) {
            Some(property) => Ok(Some(property)),
            None if self.processor.is_strict() => Err(WsError::PathExpression(format!(
                "binding '{}' matched nothing at '{}'",
                binding.name, path
            ))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction_fails_on_invalid_message() {
        let err = XmlMessageHandler::new("not xml", "ns").unwrap_err();
        assert!(matches!(err, WsError::InvalidMessage(_)));
    }

    #[test]
    fn test_transform_writes_attribute() {
        // <r/> with binding x -> /r/@x and value "5" gains the attribute.
        let mut handler = XmlMessageHandler::new("<r/>", "ns").unwrap();
        handler.set_transformation_bindings(vec![PathBinding::new("x", "/r/@x")]);

        let document = handler.transform(&[Property::text("x", "5")]).unwrap();
        assert_eq!(document.to_xml(), "<r x=\"5\"/>");
    }

    #[test]
    fn test_extract_multi_node_binding() {
        // Scenario B: two <a> elements keyed by their own tag name.
        let mut handler = XmlMessageHandler::new("<r><a>1</a><a>2</a></r>", "ns").unwrap();
        handler.set_extraction_bindings(vec![PathBinding::new("vals", "/r/a")]);

        let result = handler.extract().unwrap();
        let Property::List { name, properties } = result else { panic!("expected a list") };
        assert_eq!(name, RESPONSE_CONTAINER_ID);

        assert_eq!(properties[0].name(), MESSAGE_PROPERTY_ID);
        assert_eq!(properties[0].wire_value(), "<r><a>1</a><a>2</a></r>");

        let Property::List { name, properties } = &properties[1] else {
            panic!("expected the binding list");
        };
        assert_eq!(name, "vals");
        assert_eq!(
            properties,
            &vec![Property::text("a", "1"), Property::text("a", "2")]
        );
    }

    #[test]
    fn test_extract_always_contains_whole_message() {
        let handler = XmlMessageHandler::new("<r><a>1</a></r>", "ns").unwrap();
        let result = handler.extract().unwrap();
        let Property::List { properties, .. } = result else { panic!("expected a list") };
        // No bindings configured: only the message entry.
        assert_eq!(properties.len(), 1);
        assert_eq!(properties[0].wire_value(), "<r><a>1</a></r>");
    }

    #[test]
    fn test_unmatched_extraction_binding_is_skipped() {
        let mut handler = XmlMessageHandler::new("<r/>", "ns").unwrap();
        handler.set_extraction_bindings(vec![PathBinding::new("x", "/r/missing")]);
        let result = handler.extract().unwrap();
        let Property::List { properties, .. } = result else { panic!("expected a list") };
        assert_eq!(properties.len(), 1);
    }

    #[test]
    fn test_unmatched_extraction_binding_fails_in_strict_mode() {
        let mut handler = XmlMessageHandler::new("<r/>", "ns").unwrap().strict(true);
        handler.set_extraction_bindings(vec![PathBinding::new("x", "/r/missing")]);
        assert!(handler.extract().is_err());
    }

    #[test]
    fn test_transform_then_extract_round_trip() {
        let mut handler = XmlMessageHandler::new(
            "<order><id/><customer><name/></customer></order>",
            "ns",
        )
        .unwrap();

        let mut root = PathBinding::new("order", "/order");
        root.children.push(PathBinding::new("id", "/id"));
        let mut customer = PathBinding::new("customer", "/customer");
        customer.children.push(PathBinding::new("name", "/name"));
        root.children.push(customer);

        handler.set_transformation_bindings(vec![root.clone()]);
        handler.set_extraction_bindings(vec![root]);

        let values = vec![Property::List {
            name: "order".to_string(),
            properties: vec![
                Property::Numeric { name: "id".to_string(), value: 4711.0 },
                Property::List {
                    name: "customer".to_string(),
                    properties: vec![Property::text("name", "Smith")],
                },
            ],
        }];
        handler.transform(&values).unwrap();

        let result = handler.extract().unwrap();
        let Property::List { properties, .. } = result else { panic!("expected a list") };
        let Property::List { properties: order, .. } = &properties[1] else {
            panic!("expected the order list");
        };
        assert_eq!(order[0], Property::text("id", "4711"));
        let Property::List { properties: customer, .. } = &order[1] else {
            panic!("expected the customer list");
        };
        assert_eq!(customer[0], Property::text("name", "Smith"));
    }

    #[test]
    fn test_set_message_replaces_namespaces() {
        let mut handler = XmlMessageHandler::new("<a xmlns=\"urn:one\"/>", "ns").unwrap();
        handler.set_message("<b xmlns=\"urn:two\"><c>1</c></b>").unwrap();
        handler.set_extraction_bindings(vec![PathBinding::new("c", "/ns:b/ns:c")]);

        let result = handler.extract().unwrap();
        let Property::List { properties, .. } = result else { panic!("expected a list") };
        assert_eq!(properties[1], Property::text("c", "1"));
    }

    #[test]
    fn test_from_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "<r><a>1</a></r>").unwrap();

        let handler = XmlMessageHandler::from_file(file.path(), "ns").unwrap();
        assert_eq!(handler.message_as_string().unwrap(), "<r><a>1</a></r>");
    }
}

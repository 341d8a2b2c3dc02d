//! SOAP envelope wrapping and unwrapping.
//!
//! The adapter only cares about the envelope structure: a root element in
//! one of the two known envelope namespaces with a `Body` holding the
//! payload. Header processing beyond pass-through is out of scope.

use crate::document::{QName, XmlDocument};
use crate::error::{Result, WsError};
use crate::xpath::XPathProcessor;
use serde::{Deserialize, Serialize};

/// SOAP 1.1 envelope namespace.
pub const SOAP_1_1_NAMESPACE: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// SOAP 1.2 envelope namespace.
pub const SOAP_1_2_NAMESPACE: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Prefix used on envelopes built by [`SoapEnvelope::wrap`].
const ENVELOPE_PREFIX: &str = "soap";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SoapVersion {
    #[default]
    #[serde(rename = "1.1")]
    V11,
    #[serde(rename = "1.2")]
    V12,
}

impl SoapVersion {
    pub fn namespace(&self) -> &'static str {
        match self {
            SoapVersion::V11 => SOAP_1_1_NAMESPACE,
            SoapVersion::V12 => SOAP_1_2_NAMESPACE,
        }
    }
}

/// Wraps payloads into envelopes and extracts them back out.
///
/// `unwrap_payload` accepts either envelope version regardless of the
/// configured one; the version only selects the namespace used by `wrap`.
pub struct SoapEnvelope {
    version: SoapVersion,
    default_prefix: String,
}

impl SoapEnvelope {
    pub fn new(version: SoapVersion, default_prefix: &str) -> Self {
        Self { version, default_prefix: default_prefix.to_string() }
    }

    /// Extract the payload from an envelope message: the first element
    /// child of the envelope's body, as a standalone document.
    ///
    /// Additional body children are silently ignored; only the first is
    /// taken.
    pub fn unwrap_payload(&self, message: &str) -> Result<XmlDocument> {
        let mut processor = XPathProcessor::new(&self.default_prefix);
        processor.set_document(message)?;

        let document = processor
            .document()
            .ok_or_else(|| WsError::InvalidMessage("no root element found in message".into()))?;
        let root_name = document
            .name(document.root())
            .ok_or_else(|| WsError::InvalidMessage("no root element found in message".into()))?;

        let namespace = root_name.namespace.as_deref();
        if namespace != Some(SOAP_1_1_NAMESPACE) && namespace != Some(SOAP_1_2_NAMESPACE) {
            return Err(WsError::InvalidMessage("not a valid SOAP message".into()));
        }

        let prefix =
            root_name.prefix.clone().unwrap_or_else(|| self.default_prefix.clone());
        let body = processor
            .first_element(&format!("//{prefix}:Body"))
            .ok_or_else(|| WsError::InvalidMessage(format!("{prefix}:Body not found in message")))?;

        let document = processor
            .document()
            .ok_or_else(|| WsError::InvalidMessage("no root element found in message".into()))?;
        let payload = document
            .element_children(body)
            .into_iter()
            .next()
            .ok_or_else(|| WsError::InvalidMessage("SOAP body is empty".into()))?;

        Ok(document.extract_subtree(payload))
    }

    /// Build an envelope around the payload: `Envelope` with an empty
    /// `Header` and a `Body` holding the imported payload element.
    pub fn wrap(&self, payload: &XmlDocument) -> XmlDocument {
        let namespace = self.version.namespace();
        let name =
            |local: &str| QName::prefixed(ENVELOPE_PREFIX, local, namespace);

        let mut envelope = XmlDocument::with_root(name("Envelope"));
        let root = envelope.root();
        envelope.add_element(root, name("Header"));
        let body = envelope.add_element(root, name("Body"));
        envelope.import_subtree(body, payload, payload.root());
        envelope
    }

    /// Serialize an envelope document to its wire form.
    pub fn serialize(&self, envelope: &XmlDocument) -> String {
        envelope.to_xml()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> SoapEnvelope {
        SoapEnvelope::new(SoapVersion::V11, "ns")
    }

    #[test]
    fn test_unwrap_prefixed_envelope() {
        let message = format!(
            "<s:Envelope xmlns:s=\"{SOAP_1_1_NAMESPACE}\"><s:Body><order><id>4711</id></order></s:Body></s:Envelope>"
        );
        let payload = adapter().unwrap_payload(&message).unwrap();
        assert_eq!(payload.to_xml(), "<order><id>4711</id></order>");
    }

    #[test]
    fn test_unwrap_accepts_either_version() {
        let message = format!(
            "<env:Envelope xmlns:env=\"{SOAP_1_2_NAMESPACE}\"><env:Body><p/></env:Body></env:Envelope>"
        );
        let payload = adapter().unwrap_payload(&message).unwrap();
        assert_eq!(payload.to_xml(), "<p/>");
    }

    #[test]
    fn test_unwrap_unprefixed_envelope_uses_default_prefix() {
        let message = format!(
            "<Envelope xmlns=\"{SOAP_1_1_NAMESPACE}\"><Body><p/></Body></Envelope>"
        );
        let payload = adapter().unwrap_payload(&message).unwrap();
        assert_eq!(payload.to_xml(), "<p/>");
    }

    #[test]
    fn test_unwrap_rejects_foreign_namespace() {
        let message = "<Envelope xmlns=\"urn:not-soap\"><Body><p/></Body></Envelope>";
        let err = adapter().unwrap_payload(message).unwrap_err();
        assert!(matches!(err, WsError::InvalidMessage(_)));
        assert!(err.to_string().contains("not a valid SOAP message"));
    }

    #[test]
    fn test_unwrap_rejects_missing_body() {
        let message =
            format!("<s:Envelope xmlns:s=\"{SOAP_1_1_NAMESPACE}\"><s:Other/></s:Envelope>");
        let err = adapter().unwrap_payload(&message).unwrap_err();
        assert!(err.to_string().contains("Body not found"));
    }

    #[test]
    fn test_unwrap_rejects_empty_body() {
        let message =
            format!("<s:Envelope xmlns:s=\"{SOAP_1_1_NAMESPACE}\"><s:Body/></s:Envelope>");
        let err = adapter().unwrap_payload(&message).unwrap_err();
        assert!(err.to_string().contains("body is empty"));
    }

    #[test]
    fn test_unwrap_takes_only_the_first_body_child() {
        // Scenario C: two sibling payload elements, no error, first wins.
        let message = format!(
            "<s:Envelope xmlns:s=\"{SOAP_1_1_NAMESPACE}\"><s:Body><first/><second/></s:Body></s:Envelope>"
        );
        let payload = adapter().unwrap_payload(&message).unwrap();
        assert_eq!(payload.to_xml(), "<first/>");
    }

    #[test]
    fn test_wrap_builds_envelope_with_header_and_body() {
        let payload = XmlDocument::parse("<order><id>4711</id></order>").unwrap();
        let envelope = adapter().wrap(&payload);
        assert_eq!(
            adapter().serialize(&envelope),
            format!(
                "<soap:Envelope xmlns:soap=\"{SOAP_1_1_NAMESPACE}\"><soap:Header/><soap:Body><order><id>4711</id></order></soap:Body></soap:Envelope>"
            )
        );
    }

    #[test]
    fn test_wrap_then_unwrap_round_trip() {
        let payload = XmlDocument::parse("<p><q>1</q></p>").unwrap();
        let adapter12 = SoapEnvelope::new(SoapVersion::V12, "ns");
        let serialized = adapter12.serialize(&adapter12.wrap(&payload));
        let unwrapped = adapter12.unwrap_payload(&serialized).unwrap();
        assert_eq!(unwrapped.to_xml(), "<p><q>1</q></p>");
    }
}

//! WebService Test Proxy
//!
//! Tooling for exercising and simulating SOAP web services in automated
//! tests: a declarative XML transformation/extraction engine driven by
//! named path bindings, and a single-slot blocking HTTP server that hands
//! one transaction at a time to a test script and answers it on command.
//!
//! # Features
//!
//! - **Path Bindings**: Bind named test properties to XML locations via
//!   path expressions, with nested bindings for hierarchical data
//! - **Namespace Resolution**: Address namespaced documents through a
//!   configurable default prefix, without schema knowledge
//! - **Transform & Extract**: Write request values into message templates,
//!   read response values out into property trees
//! - **Envelope Handling**: Wrap and unwrap SOAP 1.1/1.2 envelopes
//! - **Service Simulation**: Receive one request, inspect it, respond
//!   explicitly - deterministic request/response correlation
//! - **Scenario Scripts**: Drive a whole simulation from a YAML file
//!
//! # Example Scenario
//!
//! ```yaml
//! simulator:
//!   server:
//!     host: 127.0.0.1
//!     port: 8080
//!
//! actions:
//!   - type: start
//!   - type: receive
//!     timeout_ms: 30000
//!     extract:
//!       - name: id
//!         path: /order/id
//!   - type: respond
//!     message: "<status><code/></status>"
//!     transform:
//!       - name: code
//!         path: /status/code
//!     values:
//!       - type: text
//!         name: code
//!         value: OK
//!   - type: stop
//! ```

pub mod config;
pub mod document;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod mapper;
pub mod property;
pub mod server;
pub mod simulator;
pub mod xpath;

pub use config::{ScenarioConfig, ServerSettings, SimulatorSettings};
pub use document::XmlDocument;
pub use envelope::{SoapEnvelope, SoapVersion};
pub use error::{Result, WsError};
pub use handler::XmlMessageHandler;
pub use property::{PathBinding, Property};
pub use server::{BlockingHttpServer, PendingRequest};
pub use simulator::{
    ActionResponse, ActionStatus, SoapSimulator, TraceEvent, TraceKind, WebServiceAction,
};
pub use xpath::{NamespaceTable, XPathProcessor};

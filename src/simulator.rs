//! Scripted SOAP service simulation.
//!
//! A [`SoapSimulator`] drives the single-slot server through typed actions:
//! start the listener, receive and decompose the next request, transform a
//! response template and answer, stop. Each action yields an
//! [`ActionResponse`] carrying structured trace events; failures are folded
//! into the response instead of crashing the host, with cancellation as the
//! only error that propagates.

use crate::config::SimulatorSettings;
use crate::envelope::SoapEnvelope;
use crate::error::{Result, WsError};
use crate::handler::XmlMessageHandler;
use crate::property::{PathBinding, Property};
use crate::server::{BlockingHttpServer, CancelHandle, PendingRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

/// One step of a simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebServiceAction {
    /// Bind the listener and start accepting transactions.
    Start,

    /// Wait for the next inbound transaction and extract properties from
    /// its payload. The transaction is held for the next `Respond`.
    Receive {
        timeout_ms: u64,
        #[serde(default)]
        extract: Vec<PathBinding>,
    },

    /// Transform the response message and answer the held transaction.
    Respond {
        /// Inline response message template.
        #[serde(default)]
        message: Option<String>,
        /// Response message template loaded from a file.
        #[serde(default)]
        message_file: Option<PathBuf>,
        #[serde(default)]
        transform: Vec<PathBinding>,
        #[serde(default)]
        values: Vec<Property>,
    },

    /// Stop the listener, discarding held and queued transactions.
    Stop,
}

impl WebServiceAction {
    fn describe(&self) -> &'static str {
        match self {
            WebServiceAction::Start => "start",
            WebServiceAction::Receive { .. } => "receive",
            WebServiceAction::Respond { .. } => "respond",
            WebServiceAction::Stop => "stop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Executed,
    Failed,
}

/// What happened during one action, including the message trace.
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub status: ActionStatus,
    pub message: String,
    pub error: Option<String>,
    pub properties: Option<Property>,
    pub trace: Vec<TraceEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    ActionStarted,
    ActionFinished,
    MessageReceived,
    MessageSent,
}

/// Structured trace entry returned with the action result.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub kind: TraceKind,
    pub timestamp: DateTime<Utc>,
    pub detail: String,
}

impl TraceEvent {
    fn now(kind: TraceKind, detail: impl Into<String>) -> Self {
        Self { kind, timestamp: Utc::now(), detail: detail.into() }
    }
}

/// Simulates one SOAP service endpoint.
///
/// Holds at most one in-flight transaction between `Receive` and `Respond`;
/// the single-consumer contract of the underlying server carries over.
pub struct SoapSimulator {
    settings: SimulatorSettings,
    server: BlockingHttpServer,
    held: Option<PendingRequest>,
}

impl SoapSimulator {
    pub fn new(settings: SimulatorSettings) -> Self {
        let server = BlockingHttpServer::new(
            &settings.server.host,
            settings.server.port,
            &settings.server.path,
        )
        .queue_size(settings.server.queue_size)
        .offer_timeout(Duration::from_millis(settings.server.offer_timeout_ms));

        Self { settings, server, held: None }
    }

    pub fn server(&self) -> &BlockingHttpServer {
        &self.server
    }

    /// A handle that cancels a blocked receive, while the server runs.
    pub fn cancel_handle(&self) -> Option<CancelHandle> {
        self.server.cancel_handle()
    }

    /// Execute one action.
    ///
    /// Cancellation propagates as `Err(WsError::Cancelled)`; every other
    /// failure is reported inside the returned [`ActionResponse`].
    pub async fn execute(&mut self, action: &WebServiceAction) -> Result<ActionResponse> {
        let mut trace = vec![TraceEvent::now(TraceKind::ActionStarted, action.describe())];

        let outcome = match action {
            WebServiceAction::Start => self.run_start().await,
            WebServiceAction::Receive { timeout_ms, extract } => {
                self.run_receive(*timeout_ms, extract, &mut trace).await
            }
            WebServiceAction::Respond { message, message_file, transform, values } => {
                self.run_respond(
                    message.as_deref(),
                    message_file.as_deref(),
                    transform,
                    values,
                    &mut trace,
                )
                .await
            }
            WebServiceAction::Stop => self.run_stop(),
        };

        trace.push(TraceEvent::now(TraceKind::ActionFinished, action.describe()));

        match outcome {
            Ok((message, properties)) => Ok(ActionResponse {
                status: ActionStatus::Executed,
                message,
                error: None,
                properties,
                trace,
            }),
            Err(WsError::Cancelled) => Err(WsError::Cancelled),
            Err(e) => {
                error!(action = action.describe(), error = %e, "action failed");
                Ok(ActionResponse {
                    status: ActionStatus::Failed,
                    message: format!("could not execute '{}' action", action.describe()),
                    error: Some(e.to_string()),
                    properties: None,
                    trace,
                })
            }
        }
    }

    /// Stop the server and discard held state.
    pub fn cleanup(&mut self) {
        self.held = None;
        self.server.stop();
    }

    async fn run_start(&mut self) -> Result<(String, Option<Property>)> {
        self.server.start().await?;
        let address = self
            .server
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| self.settings.server.host.clone());
        Ok((
            format!("WebService server started on {}{}", address, self.settings.server.path),
            None,
        ))
    }

    async fn run_receive(
        &mut self,
        timeout_ms: u64,
        extract: &[PathBinding],
        trace: &mut Vec<TraceEvent>,
    ) -> Result<(String, Option<Property>)> {
        if timeout_ms == 0 {
            return Err(WsError::Configuration("receive timeout not defined".to_string()));
        }

        info!("waiting to receive SOAP request");
        let request = self.server.receive(Duration::from_millis(timeout_ms)).await?;
        let client = request.client_addr();
        info!(client = %client, "received HTTP request");

        let message = request.body_text().to_string();
        trace.push(TraceEvent::now(TraceKind::MessageReceived, message.clone()));

        let envelope =
            SoapEnvelope::new(self.settings.soap_version, &self.settings.default_namespace_prefix);
        let payload = envelope.unwrap_payload(&message)?;

        let mut handler =
            XmlMessageHandler::from_document(payload, &self.settings.default_namespace_prefix)
                .strict(self.settings.strict_paths);
        handler.set_extraction_bindings(extract.to_vec());
        let properties = handler.extract()?;

        self.held = Some(request);
        Ok((format!("received request from {client}"), Some(properties)))
    }

    async fn run_respond(
        &mut self,
        message: Option<&str>,
        message_file: Option<&std::path::Path>,
        transform: &[PathBinding],
        values: &[Property],
        trace: &mut Vec<TraceEvent>,
    ) -> Result<(String, Option<Property>)> {
        if self.held.is_none() {
            return Err(WsError::Configuration("no request held to respond to".to_string()));
        }

        let prefix = &self.settings.default_namespace_prefix;
        let mut handler = match (message, message_file) {
            (Some(message), _) => XmlMessageHandler::new(message, prefix)?,
            (None, Some(path)) => XmlMessageHandler::from_file(path, prefix)?,
            (None, None) => {
                return Err(WsError::Configuration("no response message found".to_string()));
            }
        }
        .strict(self.settings.strict_paths);

        handler.set_transformation_bindings(transform.to_vec());
        let payload = handler.transform(values)?;

        let envelope =
            SoapEnvelope::new(self.settings.soap_version, &self.settings.default_namespace_prefix);
        let serialized = envelope.serialize(&envelope.wrap(payload));

        if let Some(request) = self.held.take() {
            let client = request.client_addr();
            trace.push(TraceEvent::now(TraceKind::MessageSent, serialized.clone()));
            request.respond(serialized)?;
            info!(client = %client, "response sent");
            Ok((format!("responded to {client}"), None))
        } else {
            Err(WsError::Configuration("no request held to respond to".to_string()))
        }
    }

    fn run_stop(&mut self) -> Result<(String, Option<Property>)> {
        self.held = None;
        self.server.stop();
        Ok(("WebService server stopped".to_string(), None))
    }
}

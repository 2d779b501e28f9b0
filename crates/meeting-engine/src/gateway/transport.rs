//! HTTP transport for the videoserver protocol.
//!
//! One POST per protocol step. Connection-level calls go to
//! `{base}/janus/{connection}`, handle-level calls to
//! `{base}/janus/{connection}/{handle}`.

use super::protocol::{GatewayRequest, GatewayResponse, Jsep, Verb};
use crate::errors::GatewayError;
use crate::observability::metrics;
use common::clock::IdGenerator;
use common::secret::{ExposeSecret, SecretString};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Connection details for the videoserver.
#[derive(Clone)]
pub struct TransportConfig {
    /// Base URL without the `/janus` suffix.
    pub base_url: String,
    /// Shared `apisecret`.
    pub api_secret: SecretString,
    /// Whole-request timeout.
    pub timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("base_url", &self.base_url)
            .field("api_secret", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// JSON-over-HTTP poster for videoserver requests.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    root_url: String,
    api_secret: SecretString,
    ids: Arc<dyn IdGenerator>,
}

impl HttpTransport {
    /// Build the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Transport` if the HTTP client cannot be built.
    pub fn new(config: TransportConfig, ids: Arc<dyn IdGenerator>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| {
                error!(target: "engine.gateway", error = %e, "Failed to build HTTP client");
                GatewayError::Transport(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            root_url: format!("{}/janus", config.base_url.trim_end_matches('/')),
            api_secret: config.api_secret,
            ids,
        })
    }

    /// Open a new connection; returns its id.
    pub async fn create(&self) -> Result<String, GatewayError> {
        self.post(&self.root_url, Verb::Create, "create", None, None, None)
            .await?
            .id("create")
    }

    /// Attach a plugin handle to a connection; returns its id.
    pub async fn attach(&self, connection_id: &str, plugin: &'static str) -> Result<String, GatewayError> {
        let url = format!("{}/{connection_id}", self.root_url);
        self.post(&url, Verb::Attach, "attach", Some(plugin), None, None)
            .await?
            .id("attach")
    }

    /// Send a plugin request on a handle.
    pub async fn message(
        &self,
        connection_id: &str,
        handle_id: &str,
        body: &Value,
        jsep: Option<&Jsep>,
    ) -> Result<GatewayResponse, GatewayError> {
        let url = format!("{}/{connection_id}/{handle_id}", self.root_url);
        let request = body
            .get("request")
            .and_then(Value::as_str)
            .unwrap_or("message");
        self.post(&url, Verb::Message, request, None, Some(body), jsep)
            .await
    }

    /// Detach a handle from its connection.
    pub async fn detach(&self, connection_id: &str, handle_id: &str) -> Result<(), GatewayError> {
        let url = format!("{}/{connection_id}/{handle_id}", self.root_url);
        self.post(&url, Verb::Detach, "detach", None, None, None)
            .await
            .map(|_| ())
    }

    /// Destroy a connection.
    pub async fn destroy(&self, connection_id: &str) -> Result<(), GatewayError> {
        let url = format!("{}/{connection_id}", self.root_url);
        self.post(&url, Verb::Destroy, "destroy", None, None, None)
            .await
            .map(|_| ())
    }

    async fn post(
        &self,
        url: &str,
        verb: Verb,
        label: &str,
        plugin: Option<&'static str>,
        body: Option<&Value>,
        jsep: Option<&Jsep>,
    ) -> Result<GatewayResponse, GatewayError> {
        let transaction = self.ids.new_id().to_string();
        let request = GatewayRequest {
            janus: verb.as_str(),
            transaction: transaction.clone(),
            apisecret: self.api_secret.expose_secret(),
            plugin,
            body,
            jsep,
        };

        debug!(
            target: "engine.gateway",
            verb = verb.as_str(),
            request = label,
            transaction = %transaction,
            "Sending videoserver request"
        );

        let start = Instant::now();
        let result = self.exchange(url, &request, label).await;
        let status = match &result {
            Ok(_) => "success",
            Err(GatewayError::Rejected { .. }) => "rejected",
            Err(_) => "error",
        };
        metrics::record_gateway_request(label, status, start.elapsed());

        if let Err(e) = &result {
            warn!(
                target: "engine.gateway",
                verb = verb.as_str(),
                request = label,
                transaction = %transaction,
                error = %e,
                "Videoserver request failed"
            );
        }
        result
    }

    async fn exchange(
        &self,
        url: &str,
        request: &GatewayRequest<'_>,
        label: &str,
    ) -> Result<GatewayResponse, GatewayError> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::Unavailable(status.as_u16()));
        }
        if !status.is_success() {
            return Err(GatewayError::InvalidResponse {
                request: label.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        let parsed: GatewayResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout
            } else {
                GatewayError::InvalidResponse {
                    request: label.to_string(),
                    reason: format!("malformed body: {e}"),
                }
            }
        })?;

        parsed.check(label)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(e.to_string())
    }
}

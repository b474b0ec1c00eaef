//! Downstream handler implementations
//!
//! The production handlers POST the request to a backend service over
//! JSON; the base URL comes from the environment. The mock handlers at the
//! bottom back the test suite and the demo binary.

use crate::dispatch::QueryHandler;
use crate::error::Result;
use crate::models::{HandlerKind, HandlerReply, HandlerRequest};
use async_trait::async_trait;
use serde_json::json;
use std::env;
use std::time::Duration;
use tracing::{debug, info};

const BASE_URL_ENV: &str = "QUERY_BACKEND_BASE_URL";
const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP-backed handler POSTing to one backend endpoint per domain.
pub struct HttpQueryHandler {
    kind: HandlerKind,
    client: reqwest::Client,
    url: String,
}

impl HttpQueryHandler {
    /// Build from `QUERY_BACKEND_BASE_URL` (defaults to localhost).
    pub fn from_env(kind: HandlerKind) -> Result<Self> {
        let base_url =
            env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        let url = format!("{}{}", base_url.trim_end_matches('/'), endpoint(kind));
        info!(handler = kind.name(), url = %url, "HTTP handler configured");
        Ok(Self { kind, client, url })
    }
}

fn endpoint(kind: HandlerKind) -> &'static str {
    match kind {
        HandlerKind::StructuredData => "/api/structured",
        HandlerKind::DocumentRetrieval => "/api/documents",
        HandlerKind::StatementAnalysis => "/api/statements",
        HandlerKind::FundFlowAnalysis => "/api/fundflow",
    }
}

#[async_trait]
impl QueryHandler for HttpQueryHandler {
    fn kind(&self) -> HandlerKind {
        self.kind
    }

    async fn handle(&self, request: HandlerRequest) -> Result<HandlerReply> {
        debug!(handler = self.kind.name(), query = %request.query, "posting to backend");
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        let reply = response.json::<HandlerReply>().await?;
        Ok(reply)
    }
}

//
// ================= Mock handlers =================
//

/// Returns a fixed payload. With `echo_context` it instead reflects the
/// incoming request, which lets tests observe sequential context flow.
pub struct StaticHandler {
    kind: HandlerKind,
    payload: serde_json::Value,
    echo: bool,
}

impl StaticHandler {
    pub fn new(kind: HandlerKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            echo: false,
        }
    }

    pub fn echo_context(kind: HandlerKind) -> Self {
        Self {
            kind,
            payload: serde_json::Value::Null,
            echo: true,
        }
    }
}

#[async_trait]
impl QueryHandler for StaticHandler {
    fn kind(&self) -> HandlerKind {
        self.kind
    }

    async fn handle(&self, request: HandlerRequest) -> Result<HandlerReply> {
        let data = if self.echo {
            json!({
                "query": request.query,
                "context": request.context.unwrap_or(serde_json::Value::Null),
            })
        } else {
            self.payload.clone()
        };
        Ok(HandlerReply {
            success: true,
            data,
            error: None,
        })
    }
}

/// Always reports a handler-level failure.
pub struct FailingHandler {
    kind: HandlerKind,
    message: String,
}

impl FailingHandler {
    pub fn new(kind: HandlerKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl QueryHandler for FailingHandler {
    fn kind(&self) -> HandlerKind {
        self.kind
    }

    async fn handle(&self, _request: HandlerRequest) -> Result<HandlerReply> {
        Ok(HandlerReply {
            success: false,
            data: serde_json::Value::Null,
            error: Some(self.message.clone()),
        })
    }
}

/// Sleeps past any reasonable branch timeout before answering.
pub struct SlowHandler {
    kind: HandlerKind,
    delay: Duration,
}

impl SlowHandler {
    pub fn new(kind: HandlerKind, delay: Duration) -> Self {
        Self { kind, delay }
    }
}

#[async_trait]
impl QueryHandler for SlowHandler {
    fn kind(&self) -> HandlerKind {
        self.kind
    }

    async fn handle(&self, _request: HandlerRequest) -> Result<HandlerReply> {
        tokio::time::sleep(self.delay).await;
        Ok(HandlerReply {
            success: true,
            data: serde_json::Value::Null,
            error: None,
        })
    }
}

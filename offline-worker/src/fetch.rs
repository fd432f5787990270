//! Fetch Model
//!
//! Request/response types seen by the intercept point, the fetch event the
//! host delivers, and the injected [`Network`] seam used for every outbound
//! call.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::NetworkError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
        }
    }
}

impl std::fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
    /// Top-level document load.
    Navigate,
    SameOrigin,
    #[default]
    Cors,
    NoCors,
}

/// An intercepted or outbound request. Header names are stored lower-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub method: RequestMethod,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub mode: RequestMode,
}

impl Request {
    /// GET in `cors` mode with no headers.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: RequestMethod::Get,
            headers: BTreeMap::new(),
            body: None,
            mode: RequestMode::Cors,
        }
    }

    /// Document load as a browser issues it.
    pub fn navigate(url: impl Into<String>) -> Self {
        Self::new(url)
            .with_mode(RequestMode::Navigate)
            .with_header("Accept", "text/html,application/xhtml+xml")
    }

    pub fn with_method(mut self, method: RequestMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    pub fn accepts_html(&self) -> bool {
        self.header("accept")
            .map(|accept| accept.contains("text/html"))
            .unwrap_or(false)
    }

    /// Credentialed requests are never written to a cache.
    pub fn has_authorization(&self) -> bool {
        self.header("authorization").is_some()
    }

    /// Body decoded as text; binary bodies are decoded lossily.
    pub fn body_text(&self) -> String {
        self.body
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }
}

/// A received response, or the synthetic network-error result
/// ([`Response::error`]) a strategy returns when it has nothing to serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    network_error: bool,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: Vec::new(),
            network_error: false,
        }
    }

    /// Status 0 with no body, as a failed `fetch()` surfaces to the page.
    pub fn error() -> Self {
        Self {
            network_error: true,
            ..Self::new(0)
        }
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(value.to_string())
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Status in `200..=299`.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_error(&self) -> bool {
        self.network_error
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Delivered by the host for every intercepted request.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: Request,
    /// Navigation preload the host started before the handler ran.
    pub preload_response: Option<Response>,
    pub client_id: Option<String>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            preload_response: None,
            client_id: None,
        }
    }

    pub fn with_preload(mut self, response: Response) -> Self {
        self.preload_response = Some(response);
        self
    }
}

/// What the intercept point does with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The worker answers with this response.
    Respond(Response),
    /// Left to default host handling.
    Passthrough,
}

/// Outbound HTTP seam.
#[async_trait]
pub trait Network: Send + Sync {
    /// Perform a request. `Err` means no response was received at all.
    async fn fetch(&self, request: Request) -> Result<Response, NetworkError>;
}

/// Fetch bounded by `limit`. Dropping the inner future on expiry cancels it.
pub async fn fetch_with_timeout(
    network: &dyn Network,
    request: Request,
    limit: Duration,
) -> Result<Response, NetworkError> {
    match tokio::time::timeout(limit, network.fetch(request)).await {
        Ok(result) => result,
        Err(_) => Err(NetworkError::Timeout {
            millis: limit.as_millis() as u64,
        }),
    }
}

// ── Tests ───────────────────────────────────────────────────

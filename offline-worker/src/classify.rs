//! Request classification.
//!
//! Maps an intercepted request to exactly one handling strategy. Pure: no I/O,
//! no shared state.

use url::{Origin, Url};

use crate::config::WorkerConfig;
use crate::fetch::{Request, RequestMethod};

/// Handling strategy for an intercepted request, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Non-GET against the remote API: try the network, queue on failure.
    RemoteMutation,
    /// Document navigation: network first, offline fallback.
    Navigation,
    /// GET against the remote API: network first, auth-aware cache fallback.
    RemoteRead,
    /// GET for a same-origin static resource: stale-while-revalidate.
    SameOriginAsset,
    /// Left to default host handling.
    Unhandled,
}

/// Matcher built once from configuration.
#[derive(Debug, Clone)]
pub struct Classifier {
    origin: Origin,
    api_path_prefix: String,
}

impl Classifier {
    /// Build a classifier. An unparsable origin yields an opaque origin that
    /// matches nothing.
    pub fn new(origin: &str, api_path_prefix: impl Into<String>) -> Self {
        let origin = Url::parse(origin)
            .map(|u| u.origin())
            .unwrap_or_else(|_| Origin::new_opaque());
        Self {
            origin,
            api_path_prefix: api_path_prefix.into(),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(&config.origin, config.api_path_prefix.clone())
    }

    /// Whether the URL targets the remote API's REST surface.
    pub fn is_remote_api(&self, url: &Url) -> bool {
        url.path().starts_with(&self.api_path_prefix)
    }

    /// Classify a request. Unparsable URLs are left unhandled.
    pub fn classify(&self, request: &Request) -> Route {
        let url = match Url::parse(&request.url) {
            Ok(url) => url,
            Err(_) => return Route::Unhandled,
        };
        let is_get = request.method == RequestMethod::Get;
        let is_api = self.is_remote_api(&url);

        if !is_get {
            return if is_api {
                Route::RemoteMutation
            } else {
                Route::Unhandled
            };
        }
        if request.is_navigation() || request.accepts_html() {
            return Route::Navigation;
        }
        if is_api {
            return Route::RemoteRead;
        }
        if url.origin() == self.origin {
            return Route::SameOriginAsset;
        }
        Route::Unhandled
    }
}

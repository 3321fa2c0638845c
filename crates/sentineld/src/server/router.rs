//! Request and response envelopes and the route table.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use sentinel_context::Context;

use crate::auth::Claims;

/// A request line as read from the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Request {
    /// HTTP-style method, `GET` when omitted.
    #[serde(default = "default_method")]
    pub method: String,
    /// Absolute path.
    pub path: String,
    /// Header names are matched case-insensitively by [`Request::header`].
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Free-form JSON payload.
    #[serde(default)]
    pub body: Value,
    /// Verified claims, attached by the auth middleware.
    #[serde(skip)]
    pub claims: Option<Claims>,
}

fn default_method() -> String {
    String::from("GET")
}

impl Request {
    /// Builds a request without headers or body.
    #[must_use]
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_owned(),
            ..Self::default()
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_owned(), value.to_owned());
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Looks up a header ignoring ASCII case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A response line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// HTTP-style status code.
    pub status: u16,
    /// JSON payload.
    pub body: Value,
}

impl Response {
    /// A response with an arbitrary status.
    #[must_use]
    pub const fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// `200` with `body`.
    #[must_use]
    pub const fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    /// An error response carrying `{"error": message}`.
    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        Self::new(status, json!({ "error": message }))
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// A route handler.
pub type RouteHandler = Arc<dyn Fn(&Context, &Request) -> Response + Send + Sync>;

/// Maps `(path, method)` pairs to handlers.
#[derive(Clone, Default)]
pub struct Router {
    routes: BTreeMap<String, BTreeMap<String, RouteHandler>>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the handler for `method` on `path`.
    pub fn route(
        &mut self,
        method: &str,
        path: &str,
        handler: impl Fn(&Context, &Request) -> Response + Send + Sync + 'static,
    ) -> &mut Self {
        self.routes
            .entry(path.to_owned())
            .or_default()
            .insert(method.to_ascii_uppercase(), Arc::new(handler));
        self
    }

    /// Shorthand for a `GET` route.
    pub fn get(
        &mut self,
        path: &str,
        handler: impl Fn(&Context, &Request) -> Response + Send + Sync + 'static,
    ) -> &mut Self {
        self.route("GET", path, handler)
    }

    /// Shorthand for a `POST` route.
    pub fn post(
        &mut self,
        path: &str,
        handler: impl Fn(&Context, &Request) -> Response + Send + Sync + 'static,
    ) -> &mut Self {
        self.route("POST", path, handler)
    }

    /// Sends `request` to its handler. Unknown paths get `404`, known paths
    /// with another method get `405`.
    #[must_use]
    pub fn dispatch(&self, ctx: &Context, request: &Request) -> Response {
        let Some(methods) = self.routes.get(&request.path) else {
            return Response::error(404, "not found");
        };
        methods
            .get(&request.method.to_ascii_uppercase())
            .map_or_else(
                || Response::error(405, "method not allowed"),
                |handler| handler(ctx, request),
            )
    }

    /// Registered paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        self.routes.keys().map(String::as_str).collect()
    }

    /// Number of `(path, method)` routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.values().map(BTreeMap::len).sum()
    }

    /// Whether no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Router")
            .field("paths", &self.paths())
            .finish()
    }
}

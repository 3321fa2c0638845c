//! Authentication and authorization middleware options.
//!
//! The middleware initializer binds the authenticator and authorizer here.
//! Requests then pass auth, then authz, then routing; each stage is skipped
//! for its configured paths.

use std::sync::Arc;

use tracing::debug;

use sentinel_context::Context;

use crate::auth::{RoleAuthorizer, TokenAuthenticator};
use crate::server::{Request, Response};

const MIDDLEWARE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::middleware");

/// Paths that bypass both auth stages by default.
pub const DEFAULT_SKIP_PATHS: [&str; 8] = [
    "/api/v1/auth/login",
    "/api/v1/auth/register",
    "/api/v1/auth/refresh",
    "/api/v1/auth/logout",
    "/health",
    "/live",
    "/ready",
    "/metrics",
];

fn default_skip_paths() -> Vec<String> {
    DEFAULT_SKIP_PATHS.iter().map(|path| (*path).to_owned()).collect()
}

/// Whether `path` matches one of `skip_paths`. A trailing `/*` matches the
/// whole subtree.
fn is_skipped(skip_paths: &[String], path: &str) -> bool {
    skip_paths.iter().any(|skip| {
        skip.strip_suffix("/*").map_or_else(
            || skip == path,
            |prefix| path == prefix || path.starts_with(&format!("{prefix}/")),
        )
    })
}

/// Options for the authentication stage.
#[derive(Debug, Clone)]
pub struct AuthOptions {
    /// Where the token is read from, `header:<Name>`.
    pub token_lookup: String,
    /// Scheme preceding the token in the header.
    pub auth_scheme: String,
    /// Paths served without a token.
    pub skip_paths: Vec<String>,
    authenticator: Option<Arc<TokenAuthenticator>>,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            token_lookup: String::from("header:Authorization"),
            auth_scheme: String::from("Bearer"),
            skip_paths: default_skip_paths(),
            authenticator: None,
        }
    }
}

impl AuthOptions {
    /// Enables the stage with `authenticator`.
    pub fn bind(&mut self, authenticator: Arc<TokenAuthenticator>) {
        self.authenticator = Some(authenticator);
    }

    /// The bound authenticator.
    #[must_use]
    pub const fn authenticator(&self) -> Option<&Arc<TokenAuthenticator>> {
        self.authenticator.as_ref()
    }

    /// Whether `path` bypasses authentication.
    #[must_use]
    pub fn is_skipped(&self, path: &str) -> bool {
        is_skipped(&self.skip_paths, path)
    }

    /// Reads the token from `request` according to `token_lookup`.
    #[must_use]
    pub fn extract_token<'r>(&self, request: &'r Request) -> Option<&'r str> {
        let header = self.token_lookup.strip_prefix("header:")?;
        let value = request.header(header)?.trim();
        let token = if self.auth_scheme.is_empty() {
            value
        } else {
            let (scheme, rest) = value.split_once(' ')?;
            if !scheme.eq_ignore_ascii_case(&self.auth_scheme) {
                return None;
            }
            rest.trim()
        };
        (!token.is_empty()).then_some(token)
    }
}

/// Options for the authorization stage.
#[derive(Debug, Clone)]
pub struct AuthzOptions {
    /// Paths served without a role check.
    pub skip_paths: Vec<String>,
    authorizer: Option<Arc<RoleAuthorizer>>,
}

impl Default for AuthzOptions {
    fn default() -> Self {
        Self {
            skip_paths: default_skip_paths(),
            authorizer: None,
        }
    }
}

impl AuthzOptions {
    /// Enables the stage with `authorizer`.
    pub fn bind(&mut self, authorizer: Arc<RoleAuthorizer>) {
        self.authorizer = Some(authorizer);
    }

    /// The bound authorizer.
    #[must_use]
    pub const fn authorizer(&self) -> Option<&Arc<RoleAuthorizer>> {
        self.authorizer.as_ref()
    }

    /// Whether `path` bypasses authorization.
    #[must_use]
    pub fn is_skipped(&self, path: &str) -> bool {
        is_skipped(&self.skip_paths, path)
    }
}

/// Both middleware stages.
#[derive(Debug, Clone, Default)]
pub struct MiddlewareOptions {
    /// Authentication.
    pub auth: AuthOptions,
    /// Authorization.
    pub authz: AuthzOptions,
}

impl MiddlewareOptions {
    /// Runs auth then authz over `request`, attaching the verified claims.
    ///
    /// # Errors
    ///
    /// Returns the `401` or `403` response to send instead of routing.
    pub fn process(&self, ctx: &Context, request: &mut Request) -> Result<(), Response> {
        if let Some(authenticator) = &self.auth.authenticator
            && !self.auth.is_skipped(&request.path)
        {
            let token = self
                .auth
                .extract_token(request)
                .ok_or_else(|| Response::error(401, "token is missing"))?;
            let claims = authenticator.authenticate(ctx, token).map_err(|error| {
                debug!(
                    target: MIDDLEWARE_TARGET,
                    event = "authentication_failed",
                    path = %request.path,
                    error = %error,
                    "request rejected"
                );
                Response::error(401, &error.to_string())
            })?;
            request.claims = Some(claims);
        }

        if let Some(authorizer) = &self.authz.authorizer
            && !self.authz.is_skipped(&request.path)
        {
            let role = request.claims.as_ref().map_or("", |claims| claims.role.as_str());
            let resource = resource_of(&request.path).unwrap_or_default();
            let action = action_of(&request.method).unwrap_or_default();
            if !authorizer.authorize(role, resource, action) {
                debug!(
                    target: MIDDLEWARE_TARGET,
                    event = "authorization_denied",
                    path = %request.path,
                    role,
                    resource,
                    action,
                    "request forbidden"
                );
                return Err(Response::error(403, "forbidden"));
            }
        }
        Ok(())
    }
}

/// First path segment after an optional `/api/v<N>` prefix.
fn resource_of(path: &str) -> Option<&str> {
    let mut segments = path.split('/').filter(|segment| !segment.is_empty()).peekable();
    if segments.peek() == Some(&"api") {
        segments.next();
        if segments.peek().is_some_and(|segment| is_version(segment)) {
            segments.next();
        }
    }
    segments.next()
}

fn is_version(segment: &str) -> bool {
    segment
        .strip_prefix('v')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|byte| byte.is_ascii_digit()))
}

fn action_of(method: &str) -> Option<&'static str> {
    match method.to_ascii_uppercase().as_str() {
        "GET" | "HEAD" => Some("read"),
        "POST" => Some("create"),
        "PUT" | "PATCH" => Some("update"),
        "DELETE" => Some("delete"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryRevocationStore;
    use rstest::{fixture, rstest};
    use sentinel_config::JwtOptions;

    #[fixture]
    fn authenticator() -> Arc<TokenAuthenticator> {
        let options = JwtOptions {
            key: "0123456789abcdef0123456789abcdef".into(),
            ..JwtOptions::default()
        };
        Arc::new(TokenAuthenticator::new(
            &options,
            Arc::new(MemoryRevocationStore::new()),
        ))
    }

    #[fixture]
    fn bound(authenticator: Arc<TokenAuthenticator>) -> MiddlewareOptions {
        let mut options = MiddlewareOptions::default();
        options.auth.bind(authenticator);
        options.authz.bind(Arc::new(RoleAuthorizer::with_default_roles()));
        options
    }

    fn bearer(middleware: &MiddlewareOptions, role: &str) -> String {
        let issued = middleware
            .auth
            .authenticator()
            .expect("bound")
            .issue("alice", role)
            .expect("issue");
        format!("Bearer {}", issued.token)
    }

    #[rstest]
    #[case::login("/api/v1/auth/login", true)]
    #[case::health("/health", true)]
    #[case::users("/api/v1/users", false)]
    #[case::health_prefix("/healthz", false)]
    fn default_skip_paths_are_exact(#[case] path: &str, #[case] skipped: bool) {
        assert_eq!(AuthOptions::default().is_skipped(path), skipped);
    }

    #[rstest]
    fn wildcard_skip_paths_cover_subtrees() {
        let skips = vec![String::from("/public/*")];
        assert!(is_skipped(&skips, "/public"));
        assert!(is_skipped(&skips, "/public/logo.png"));
        assert!(!is_skipped(&skips, "/publicity"));
    }

    #[rstest]
    #[case::bearer("Bearer abc", Some("abc"))]
    #[case::lowercase_scheme("bearer abc", Some("abc"))]
    #[case::other_scheme("Basic abc", None)]
    #[case::no_token("Bearer ", None)]
    fn tokens_are_read_from_the_authorization_header(
        #[case] header: &str,
        #[case] expected: Option<&str>,
    ) {
        let request = Request::new("GET", "/").with_header("authorization", header);
        assert_eq!(AuthOptions::default().extract_token(&request), expected);
    }

    #[rstest]
    #[case::versioned("/api/v1/user/42", Some("user"))]
    #[case::unversioned("/api/orders", Some("orders"))]
    #[case::plain("/reports/daily", Some("reports"))]
    #[case::root("/", None)]
    fn resources_come_from_the_path(#[case] path: &str, #[case] expected: Option<&str>) {
        assert_eq!(resource_of(path), expected);
    }

    #[rstest]
    fn unbound_middleware_lets_everything_through() {
        let mut request = Request::new("DELETE", "/api/v1/user/1");
        assert!(MiddlewareOptions::default()
            .process(&Context::background(), &mut request)
            .is_ok());
    }

    #[rstest]
    fn missing_token_is_unauthorised(bound: MiddlewareOptions) {
        let mut request = Request::new("GET", "/api/v1/user/1");

        let response = bound
            .process(&Context::background(), &mut request)
            .expect_err("rejected");

        assert_eq!(response.status, 401);
    }

    #[rstest]
    fn skipped_paths_need_no_token(bound: MiddlewareOptions) {
        let mut request = Request::new("GET", "/ready");
        assert!(bound.process(&Context::background(), &mut request).is_ok());
    }

    #[rstest]
    #[case::user_reads("user", "GET", true)]
    #[case::user_updates("user", "PUT", true)]
    #[case::user_deletes("user", "DELETE", false)]
    #[case::guest_reads("guest", "GET", true)]
    #[case::guest_creates("guest", "POST", false)]
    #[case::admin_deletes("admin", "DELETE", true)]
    fn roles_gate_actions(
        bound: MiddlewareOptions,
        #[case] role: &str,
        #[case] method: &str,
        #[case] allowed: bool,
    ) {
        let header = bearer(&bound, role);
        let mut request = Request::new(method, "/api/v1/user/7").with_header("Authorization", &header);

        let outcome = bound.process(&Context::background(), &mut request);

        match outcome {
            Ok(()) => {
                assert!(allowed, "{role} {method} should be forbidden");
                assert_eq!(request.claims.map(|claims| claims.role), Some(role.to_owned()));
            }
            Err(response) => {
                assert!(!allowed, "{role} {method} should be allowed");
                assert_eq!(response.status, 403);
            }
        }
    }
}

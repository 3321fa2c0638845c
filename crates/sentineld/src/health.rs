//! Named readiness checks and the built-in health routes.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde_json::json;
use tracing::warn;

use sentinel_context::Context;

use crate::server::{Response, Router};

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

type Checker = Arc<dyn Fn(&Context) -> Result<(), String> + Send + Sync>;

/// Result of one named check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    /// Whether the check passed.
    pub healthy: bool,
    /// Failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate of every registered check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// `up` when every check passed, `down` otherwise.
    pub status: &'static str,
    /// Outcome per check name.
    pub checks: BTreeMap<String, CheckOutcome>,
}

impl HealthReport {
    /// Whether every check passed.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.checks.values().all(|outcome| outcome.healthy)
    }
}

/// Holds the readiness checks registered during bootstrap.
#[derive(Default)]
pub struct HealthManager {
    checkers: RwLock<BTreeMap<String, Checker>>,
}

impl HealthManager {
    /// Creates a manager without checks; it reports healthy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the check called `name`.
    pub fn register(
        &self,
        name: &str,
        checker: impl Fn(&Context) -> Result<(), String> + Send + Sync + 'static,
    ) {
        self.checkers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_owned(), Arc::new(checker));
    }

    /// Registered check names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.checkers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Runs every check. A panicking check counts as failed.
    #[must_use]
    pub fn check(&self, ctx: &Context) -> HealthReport {
        let checkers: Vec<(String, Checker)> = self
            .checkers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, checker)| (name.clone(), Arc::clone(checker)))
            .collect();
        let checks: BTreeMap<String, CheckOutcome> = checkers
            .into_iter()
            .map(|(name, checker)| {
                let result = panic::catch_unwind(AssertUnwindSafe(|| checker(ctx)))
                    .unwrap_or_else(|_| Err(String::from("health check panicked")));
                if let Err(error) = &result {
                    warn!(
                        target: HEALTH_TARGET,
                        event = "check_failed",
                        check = %name,
                        error = %error,
                        "health check failed"
                    );
                }
                let outcome = CheckOutcome {
                    healthy: result.is_ok(),
                    error: result.err(),
                };
                (name, outcome)
            })
            .collect();
        let healthy = checks.values().all(|outcome| outcome.healthy);
        HealthReport {
            status: if healthy { "up" } else { "down" },
            checks,
        }
    }

    /// Whether every check passes.
    #[must_use]
    pub fn is_ready(&self, ctx: &Context) -> bool {
        self.check(ctx).is_healthy()
    }
}

impl std::fmt::Debug for HealthManager {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HealthManager")
            .field("checks", &self.names())
            .finish()
    }
}

/// Adds `/health`, `/live` and `/ready`.
///
/// `/health` always answers `200` with the full report; `/ready` answers
/// `503` while any check fails.
pub fn install_routes(router: &mut Router, health: &Arc<HealthManager>) {
    let report_source = Arc::clone(health);
    let ready_source = Arc::clone(health);
    router
        .get("/health", move |ctx, _| {
            Response::ok(json!(report_source.check(ctx)))
        })
        .get("/live", |_, _| Response::ok(json!({ "status": "up" })))
        .get("/ready", move |ctx, _| {
            let report = ready_source.check(ctx);
            let status = if report.is_healthy() { 200 } else { 503 };
            Response::new(status, json!(report))
        });
}

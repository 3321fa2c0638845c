//! Concurrent health aggregation over initialised clients.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rayon::ThreadPool;
use rayon::prelude::*;
use serde::{Serialize, Serializer};

use sentinel_context::Context;

use crate::client::DatasourceClient;

/// Outcome of pinging one datasource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    /// Registry key, `kind:name`.
    pub name: String,
    /// Whether the ping succeeded.
    pub healthy: bool,
    /// Time the ping took.
    #[serde(rename = "latency_ms", serialize_with = "as_millis")]
    pub latency: Duration,
    /// Rendered failure, when unhealthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthStatus {
    fn failed(name: &str, latency: Duration, error: String) -> Self {
        Self {
            name: name.to_owned(),
            healthy: false,
            latency,
            error: Some(error),
        }
    }
}

fn as_millis<S>(latency: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX))
}

pub(crate) type Snapshot = Vec<(String, Arc<dyn DatasourceClient>)>;

/// Pings every client in `snapshot`, on `pool` when one is available and on
/// one scoped thread per entry otherwise.
pub(crate) fn check_all(
    pool: Option<&ThreadPool>,
    ctx: &Context,
    snapshot: &Snapshot,
) -> BTreeMap<String, HealthStatus> {
    let statuses: Vec<HealthStatus> = match pool {
        Some(workers) => workers.install(|| {
            snapshot
                .par_iter()
                .map(|(key, client)| inspect(ctx, key, client.as_ref()))
                .collect()
        }),
        None => per_entry_threads(ctx, snapshot),
    };
    statuses
        .into_iter()
        .map(|status| (status.name.clone(), status))
        .collect()
}

fn per_entry_threads(ctx: &Context, snapshot: &Snapshot) -> Vec<HealthStatus> {
    thread::scope(|scope| {
        let workers: Vec<_> = snapshot
            .iter()
            .map(|(key, client)| {
                let worker = scope.spawn(move || inspect(ctx, key, client.as_ref()));
                (key, worker)
            })
            .collect();
        workers
            .into_iter()
            .map(|(key, worker)| {
                worker.join().unwrap_or_else(|_| {
                    HealthStatus::failed(key, Duration::ZERO, String::from("health worker panicked"))
                })
            })
            .collect()
    })
}

fn inspect(ctx: &Context, key: &str, client: &dyn DatasourceClient) -> HealthStatus {
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| client.ping(ctx)));
    let latency = started.elapsed();
    match outcome {
        Ok(Ok(())) => HealthStatus {
            name: key.to_owned(),
            healthy: true,
            latency,
            error: None,
        },
        Ok(Err(error)) => HealthStatus::failed(key, latency, error.to_string()),
        Err(_) => HealthStatus::failed(key, latency, String::from("ping panicked")),
    }
}

//! Structured telemetry initialisation for the service.
//!
//! Every record carries the configured initial fields: as top-level keys in
//! JSON output and as trailing `key=value` pairs in compact output. A field
//! the event sets itself takes precedence.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::{self, IsTerminal, Write};

use once_cell::sync::OnceCell;
use serde_json::{Map, Value};
use tracing::{Event, Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::{JsonFields, Writer};
use tracing_subscriber::fmt::{self, FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::registry::LookupSpan;

use sentinel_config::{LogFormat, LogOptions};

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

impl TelemetryHandle {
    /// Flushes buffered output. Failures are ignored.
    pub fn flush(self) {
        io::stderr().flush().ok();
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Configures the global tracing subscriber when invoked for the first time.
///
/// Repeated calls are idempotent: the first invocation installs the global
/// subscriber. Subsequent invocations return a fresh [`TelemetryHandle`]
/// without touching the global state again, even when their options differ.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter is invalid or another
/// subscriber was installed outside this module.
pub fn initialise(options: &LogOptions) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(options))
        .map(|_| TelemetryHandle)
}

fn install_subscriber(options: &LogOptions) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(&options.level)
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;
    let subscriber = build_subscriber(options, filter, io::stderr, io::stderr().is_terminal());
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

fn build_subscriber<W>(
    options: &LogOptions,
    filter: EnvFilter,
    writer: W,
    ansi: bool,
) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let with_caller = !options.disable_caller;
    let format = fmt::format()
        .with_target(true)
        .with_level(true)
        .with_file(with_caller)
        .with_line_number(with_caller)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_timer(fmt::time::UtcTime::rfc_3339());
    let fields = options.initial_fields.clone();
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(writer);

    match effective_format(options) {
        LogFormat::Json => Box::new(
            builder
                .with_ansi(false)
                .fmt_fields(JsonFields::new())
                .event_format(InitialFields::new(
                    format.json().flatten_event(true),
                    fields,
                    Layout::Json,
                ))
                .finish(),
        ),
        LogFormat::Compact => Box::new(
            builder
                .with_ansi(ansi)
                .event_format(InitialFields::new(
                    format.compact().with_ansi(ansi),
                    fields,
                    Layout::Compact,
                ))
                .finish(),
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Json,
    Compact,
}

/// Event formatter that adds the initial fields to whatever `inner` renders.
struct InitialFields<F> {
    inner: F,
    fields: BTreeMap<String, String>,
    layout: Layout,
}

impl<F> InitialFields<F> {
    const fn new(inner: F, fields: BTreeMap<String, String>, layout: Layout) -> Self {
        Self {
            inner,
            fields,
            layout,
        }
    }

    fn decorate(&self, line: &str) -> String {
        let body = line.trim_end_matches('\n');
        let mut decorated = match self.layout {
            Layout::Json => self.merge_json(body).unwrap_or_else(|| body.to_owned()),
            Layout::Compact => {
                let pairs: String = self
                    .fields
                    .iter()
                    .map(|(key, value)| format!(" {key}={value}"))
                    .collect();
                format!("{body}{pairs}")
            }
        };
        decorated.push('\n');
        decorated
    }

    fn merge_json(&self, body: &str) -> Option<String> {
        let mut record: Map<String, Value> = serde_json::from_str(body).ok()?;
        for (key, value) in &self.fields {
            record
                .entry(key.clone())
                .or_insert_with(|| Value::String(value.clone()));
        }
        serde_json::to_string(&record).ok()
    }
}

impl<S, N, F> FormatEvent<S, N> for InitialFields<F>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
    F: FormatEvent<S, N>,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        if self.fields.is_empty() {
            return self.inner.format_event(ctx, writer, event);
        }
        let mut line = String::new();
        self.inner.format_event(ctx, Writer::new(&mut line), event)?;
        writer.write_str(&self.decorate(&line))
    }
}

/// Development mode prefers human-readable output.
const fn effective_format(options: &LogOptions) -> LogFormat {
    if options.development {
        LogFormat::Compact
    } else {
        options.format
    }
}

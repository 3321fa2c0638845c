//! Secret redaction and environment-backed secret resolution.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::CONFIG_TARGET;
use crate::env::EnvSource;

/// Placeholder rendered in place of a non-empty secret.
pub const REDACTED: &str = "[REDACTED]";

/// Types that carry secret fields.
///
/// Secret fields are skipped by `Serialize`; [`redacted_json`] puts them
/// back masked.
pub trait Redact: Serialize {
    /// Secret fields as `(serialized name, current value)` pairs.
    fn secrets(&self) -> Vec<(&'static str, &str)>;
}

/// Masks a secret: non-empty values become [`REDACTED`], empty stay empty.
#[must_use]
pub const fn mask(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { REDACTED }
}

/// Serializes `value` with every secret masked.
#[must_use]
pub fn redacted_json<T>(value: &T) -> Value
where
    T: Redact + ?Sized,
{
    let mut json = serde_json::to_value(value).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut json {
        for (field, secret) in value.secrets() {
            map.insert(field.to_owned(), Value::String(mask(secret).to_owned()));
        }
    }
    json
}

/// Display adapter rendering the redacted JSON form of an option.
pub struct Redacted<'a, T: ?Sized>(pub &'a T);

impl<T> fmt::Display for Redacted<'_, T>
where
    T: Redact + ?Sized,
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", redacted_json(self.0))
    }
}

impl<T> fmt::Debug for Redacted<'_, T>
where
    T: Redact + ?Sized,
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, formatter)
    }
}

/// Fills an empty secret from `variable`.
///
/// When the secret was already supplied (typically on the command line) and
/// the variable is unset, a warning is logged. A supplied secret always wins
/// over the environment.
pub fn resolve_secret(
    option: &'static str,
    variable: &str,
    secret: &mut String,
    env: &dyn EnvSource,
) {
    match (secret.is_empty(), env.var(variable)) {
        (true, Some(value)) => *secret = value,
        (false, None) => tracing::warn!(
            target: CONFIG_TARGET,
            option,
            variable,
            "secret supplied on the command line; prefer setting it through the environment"
        ),
        _ => {}
    }
}

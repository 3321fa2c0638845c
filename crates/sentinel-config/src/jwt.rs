//! Token authentication options.

use std::fmt;
use std::time::Duration;

use clap::{ArgMatches, Command};
use serde::{Deserialize, Serialize};

use crate::env::EnvSource;
use crate::error::OptionError;
use crate::flags::{self, flag_name};
use crate::option::{ConfigOption, timeout_positive};
use crate::secret::{Redact, Redacted, resolve_secret};

const NAMESPACE: &str = "jwt";
const KEY_ENV: &str = "JWT_KEY";
const MIN_KEY_LEN: usize = 32;
const SIGNING_METHODS: [&str; 1] = ["HS256"];

/// Options for issuing and verifying bearer tokens.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct JwtOptions {
    /// Skip authentication and authorization entirely.
    pub disable_auth: bool,
    /// HMAC signing key. Prefer `JWT_KEY`.
    #[serde(skip_serializing)]
    pub key: String,
    /// Signing algorithm.
    pub signing_method: String,
    /// Value of the `iss` claim.
    pub issuer: String,
    /// Token lifetime.
    #[serde(with = "crate::serde_duration")]
    pub expired: Duration,
    /// Window after issue during which a token may be refreshed.
    #[serde(with = "crate::serde_duration")]
    pub max_refresh: Duration,
}

impl Default for JwtOptions {
    fn default() -> Self {
        Self {
            disable_auth: false,
            key: String::new(),
            signing_method: String::from("HS256"),
            issuer: String::from("sentinel"),
            expired: Duration::from_secs(2 * 3600),
            max_refresh: Duration::from_secs(24 * 3600),
        }
    }
}

impl fmt::Debug for JwtOptions {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "JwtOptions {}", Redacted(self))
    }
}

impl Redact for JwtOptions {
    fn secrets(&self) -> Vec<(&'static str, &str)> {
        vec![("key", self.key.as_str())]
    }
}

impl ConfigOption for JwtOptions {
    fn namespace(&self) -> &'static str {
        NAMESPACE
    }

    fn add_flags(&self, command: Command, prefix: &str) -> Command {
        let name = |field: &str| flag_name(prefix, NAMESPACE, field);
        command.args([
            flags::boolean(
                name("disable-auth"),
                self.disable_auth,
                "Disable authentication and authorization.",
            ),
            flags::secret(
                name("key"),
                "Private key used to sign tokens. Prefer the JWT_KEY environment variable.",
            ),
            flags::string(
                name("signing-method"),
                &self.signing_method,
                "Token signing method. Only HS256 is supported.",
            ),
            flags::string(name("issuer"), &self.issuer, "Issuer recorded in tokens."),
            flags::duration(name("expired"), self.expired, "Token lifetime."),
            flags::duration(
                name("max-refresh"),
                self.max_refresh,
                "Window during which a token may be refreshed.",
            ),
        ])
    }

    fn apply_matches(&mut self, matches: &ArgMatches, prefix: &str) {
        let name = |field: &str| flag_name(prefix, NAMESPACE, field);
        flags::read(matches, &name("disable-auth"), &mut self.disable_auth);
        flags::read(matches, &name("key"), &mut self.key);
        flags::read(matches, &name("signing-method"), &mut self.signing_method);
        flags::read(matches, &name("issuer"), &mut self.issuer);
        flags::read(matches, &name("expired"), &mut self.expired);
        flags::read(matches, &name("max-refresh"), &mut self.max_refresh);
    }

    fn complete(&mut self) -> Result<(), OptionError> {
        self.signing_method = self.signing_method.trim().to_ascii_uppercase();
        Ok(())
    }

    fn validate(&mut self, env: &dyn EnvSource) -> Result<(), OptionError> {
        resolve_secret(NAMESPACE, KEY_ENV, &mut self.key, env);
        if self.disable_auth {
            return Ok(());
        }

        let mut errors = Vec::new();
        if self.key.len() < MIN_KEY_LEN {
            errors.push(OptionError::invalid(
                NAMESPACE,
                "key",
                format!("must be at least {MIN_KEY_LEN} bytes"),
            ));
        }
        if !SIGNING_METHODS.contains(&self.signing_method.as_str()) {
            errors.push(OptionError::invalid(
                NAMESPACE,
                "signing-method",
                format!("unsupported method `{}`", self.signing_method),
            ));
        }
        timeout_positive(&mut errors, NAMESPACE, "expired", self.expired);
        if self.max_refresh < self.expired {
            errors.push(OptionError::invalid(
                NAMESPACE,
                "max-refresh",
                "must not be shorter than expired",
            ));
        }
        OptionError::collect(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnv;
    use rstest::rstest;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    #[rstest]
    fn disabled_auth_needs_no_key() {
        let mut options = JwtOptions {
            disable_auth: true,
            ..JwtOptions::default()
        };
        assert!(options.validate(&MapEnv::new()).is_ok());
    }

    #[rstest]
    fn short_key_is_rejected() {
        let mut options = JwtOptions {
            key: "short".into(),
            ..JwtOptions::default()
        };
        let error = options.validate(&MapEnv::new()).expect_err("short key");
        assert!(error.to_string().contains("key"));
        assert!(!error.to_string().contains("short"));
    }

    #[rstest]
    fn key_is_read_from_environment() {
        let mut options = JwtOptions::default();
        options
            .validate(&MapEnv::new().with(KEY_ENV, KEY))
            .expect("valid");
        assert_eq!(options.key, KEY);
        assert!(!format!("{options:?}").contains(KEY));
    }

    #[rstest]
    fn lowercase_signing_method_is_normalised() {
        let mut options = JwtOptions {
            key: KEY.into(),
            signing_method: "hs256".into(),
            ..JwtOptions::default()
        };
        options.complete().expect("complete");
        assert!(options.validate(&MapEnv::new()).is_ok());
    }
}

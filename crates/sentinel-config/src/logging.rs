//! Logging options consumed by the telemetry initializer.

use std::collections::BTreeMap;

use clap::{Arg, ArgMatches, Command};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::env::EnvSource;
use crate::error::OptionError;
use crate::flags::{self, flag_name};
use crate::option::ConfigOption;

const NAMESPACE: &str = "log";

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per record.
    #[default]
    Json,
    /// Human-readable single line output.
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LogOptions {
    /// Filter directive, for example `info` or `info,sentinel_datasource=debug`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Omit source locations from records.
    pub disable_caller: bool,
    /// Development mode: compact output and debug level unless overridden.
    pub development: bool,
    /// Fields attached to every record.
    pub initial_fields: BTreeMap<String, String>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: LogFormat::Json,
            disable_caller: true,
            development: false,
            initial_fields: BTreeMap::new(),
        }
    }
}

impl LogOptions {
    fn fields_as_pairs(&self) -> Vec<String> {
        self.initial_fields
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect()
    }
}

fn parse_format(value: &str) -> Result<LogFormat, String> {
    value
        .parse::<LogFormat>()
        .map_err(|_| format!("unsupported log format `{value}`; expected json or compact"))
}

impl ConfigOption for LogOptions {
    fn namespace(&self) -> &'static str {
        NAMESPACE
    }

    fn add_flags(&self, command: Command, prefix: &str) -> Command {
        let name = |field: &str| flag_name(prefix, NAMESPACE, field);
        let format_name = name("format");
        command.args([
            flags::string(
                name("level"),
                &self.level,
                "Minimum log level or filter directive.",
            ),
            Arg::new(format_name.clone())
                .long(format_name)
                .help("Log output format: json or compact.")
                .value_parser(parse_format)
                .default_value(self.format.to_string()),
            flags::boolean(
                name("disable-caller"),
                self.disable_caller,
                "Omit the caller location from log records.",
            ),
            flags::boolean(
                name("development"),
                self.development,
                "Enable development logging defaults.",
            ),
            flags::list(
                name("initial-fields"),
                &self.fields_as_pairs(),
                "Comma separated key=value pairs attached to every record.",
            ),
        ])
    }

    fn apply_matches(&mut self, matches: &ArgMatches, prefix: &str) {
        let name = |field: &str| flag_name(prefix, NAMESPACE, field);
        flags::read(matches, &name("level"), &mut self.level);
        flags::read(matches, &name("format"), &mut self.format);
        flags::read(matches, &name("disable-caller"), &mut self.disable_caller);
        flags::read(matches, &name("development"), &mut self.development);
        let mut pairs = self.fields_as_pairs();
        flags::read_list(matches, &name("initial-fields"), &mut pairs);
        self.initial_fields = pairs
            .iter()
            .filter_map(|pair| pair.split_once('='))
            .map(|(key, value)| (key.trim().to_owned(), value.trim().to_owned()))
            .collect();
    }

    fn complete(&mut self) -> Result<(), OptionError> {
        self.level = self.level.trim().to_ascii_lowercase();
        if self.level.is_empty() {
            self.level = String::from(if self.development { "debug" } else { "info" });
        }
        self.initial_fields.retain(|key, _| !key.is_empty());
        Ok(())
    }

    fn validate(&mut self, _env: &dyn EnvSource) -> Result<(), OptionError> {
        let directives_ok = self
            .level
            .split(',')
            .all(|directive| !directive.trim().is_empty());
        if directives_ok {
            Ok(())
        } else {
            Err(OptionError::invalid(
                NAMESPACE,
                "level",
                format!("`{}` contains an empty directive", self.level),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnv;
    use rstest::rstest;

    #[rstest]
    #[case::json("json", LogFormat::Json)]
    #[case::compact_upper("COMPACT", LogFormat::Compact)]
    fn parses_formats(#[case] raw: &str, #[case] expected: LogFormat) {
        assert_eq!(parse_format(raw), Ok(expected));
    }

    #[rstest]
    fn initial_fields_come_from_pairs() {
        let defaults = LogOptions::default();
        let command = defaults.add_flags(Command::new("svc"), "");
        let matches = command.get_matches_from([
            "svc",
            "--log.initial-fields",
            "region=eu,zone = a",
            "--log.format",
            "compact",
        ]);
        let mut options = defaults.clone();

        options.apply_matches(&matches, "");

        assert_eq!(options.format, LogFormat::Compact);
        assert_eq!(options.initial_fields.get("region").map(String::as_str), Some("eu"));
        assert_eq!(options.initial_fields.get("zone").map(String::as_str), Some("a"));
    }

    #[rstest]
    fn development_defaults_to_debug_level() {
        let mut options = LogOptions {
            level: String::new(),
            development: true,
            ..LogOptions::default()
        };
        options.complete().expect("complete");
        assert_eq!(options.level, "debug");
    }

    #[rstest]
    fn empty_directive_is_rejected() {
        let mut options = LogOptions {
            level: "info,,debug".into(),
            ..LogOptions::default()
        };
        assert!(options.validate(&MapEnv::new()).is_err());
    }
}

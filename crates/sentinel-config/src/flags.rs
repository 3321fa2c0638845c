//! Helpers for registering option fields as `clap` flags.
//!
//! Each option group registers its fields under `<prefix><namespace>.<field>`
//! with the current field value as the default, then reads parsed values
//! back with the `read_*` helpers. Reads tolerate flags that were never
//! registered on the command, so an option can be applied to matches produced
//! by a different command without panicking.

use std::time::Duration;

use clap::{Arg, ArgAction, ArgMatches, value_parser};

/// Builds the full flag name for a field.
#[must_use]
pub fn flag_name(prefix: &str, namespace: &str, field: &str) -> String {
    format!("{prefix}{namespace}.{field}")
}

/// Parses a duration such as `30s`, `5m` or `1h30m`.
///
/// A bare integer is read as a number of seconds.
///
/// # Errors
///
/// Returns a message describing why the value is not a duration.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let trimmed = value.trim();
    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    humantime::parse_duration(trimmed).map_err(|error| format!("invalid duration `{value}`: {error}"))
}

/// Renders a duration in the format accepted by [`parse_duration`].
#[must_use]
pub fn format_duration(value: Duration) -> String {
    humantime::format_duration(value).to_string()
}

fn base(name: String, help: &'static str) -> Arg {
    Arg::new(name.clone())
        .long(name)
        .help(help)
        .action(ArgAction::Set)
}

/// String flag. Empty defaults are not advertised.
#[must_use]
pub fn string(name: String, default: &str, help: &'static str) -> Arg {
    let arg = base(name, help).value_parser(value_parser!(String));
    if default.is_empty() {
        arg
    } else {
        arg.default_value(default.to_owned())
    }
}

/// Secret flag. The current value is never shown as a default.
#[must_use]
pub fn secret(name: String, help: &'static str) -> Arg {
    base(name, help)
        .value_parser(value_parser!(String))
        .hide_default_value(true)
}

/// Boolean flag accepting `--flag`, `--flag=true` and `--flag=false`.
#[must_use]
pub fn boolean(name: String, default: bool, help: &'static str) -> Arg {
    base(name, help)
        .value_parser(value_parser!(bool))
        .num_args(0..=1)
        .require_equals(true)
        .default_missing_value("true")
        .default_value(default.to_string())
}

/// Unsigned 16-bit flag, used for ports.
#[must_use]
pub fn u16(name: String, default: u16, help: &'static str) -> Arg {
    base(name, help)
        .value_parser(value_parser!(u16))
        .default_value(default.to_string())
}

/// Unsigned 32-bit flag.
#[must_use]
pub fn u32(name: String, default: u32, help: &'static str) -> Arg {
    base(name, help)
        .value_parser(value_parser!(u32))
        .default_value(default.to_string())
}

/// Unsigned 64-bit flag.
#[must_use]
pub fn u64(name: String, default: u64, help: &'static str) -> Arg {
    base(name, help)
        .value_parser(value_parser!(u64))
        .default_value(default.to_string())
}

/// Duration flag parsed with [`parse_duration`].
#[must_use]
pub fn duration(name: String, default: Duration, help: &'static str) -> Arg {
    base(name, help)
        .value_parser(parse_duration)
        .default_value(format_duration(default))
}

/// Comma separated, repeatable list flag.
#[must_use]
pub fn list(name: String, default: &[String], help: &'static str) -> Arg {
    let arg = base(name, help)
        .action(ArgAction::Append)
        .value_delimiter(',')
        .value_parser(value_parser!(String));
    if default.is_empty() {
        arg
    } else {
        arg.default_values(default.to_vec())
    }
}

/// Copies a parsed single value into `target` when present.
pub fn read<T>(matches: &ArgMatches, name: &str, target: &mut T)
where
    T: Clone + Send + Sync + 'static,
{
    if let Ok(Some(value)) = matches.try_get_one::<T>(name) {
        target.clone_from(value);
    }
}

/// Copies parsed list values into `target` when present.
pub fn read_list(matches: &ArgMatches, name: &str, target: &mut Vec<String>) {
    if let Ok(Some(values)) = matches.try_get_many::<String>(name) {
        *target = values.cloned().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Command;
    use rstest::rstest;

    #[rstest]
    #[case::seconds("30s", Duration::from_secs(30))]
    #[case::minutes("5m", Duration::from_secs(300))]
    #[case::compound("1h30m", Duration::from_secs(5400))]
    #[case::bare_integer("15", Duration::from_secs(15))]
    #[case::millis("250ms", Duration::from_millis(250))]
    fn parses_durations(#[case] input: &str, #[case] expected: Duration) {
        assert_eq!(parse_duration(input), Ok(expected));
    }

    #[rstest]
    fn rejects_malformed_durations() {
        let error = parse_duration("soon").expect_err("not a duration");
        assert!(error.contains("soon"));
    }

    #[rstest]
    fn formatted_durations_parse_back() {
        let value = Duration::from_secs(600);
        assert_eq!(parse_duration(&format_duration(value)), Ok(value));
    }

    #[rstest]
    fn reading_unknown_flags_leaves_target_untouched() {
        let matches = Command::new("test").get_matches_from(["test"]);
        let mut target = String::from("kept");

        read(&matches, "nope.host", &mut target);

        assert_eq!(target, "kept");
    }

    #[rstest]
    fn boolean_flags_accept_bare_and_explicit_forms() {
        let command = Command::new("test")
            .arg(boolean("a.flag".into(), false, "a"))
            .arg(boolean("b.flag".into(), true, "b"));
        let matches = command.get_matches_from(["test", "--a.flag", "--b.flag=false"]);

        let mut first = false;
        let mut second = true;
        read(&matches, "a.flag", &mut first);
        read(&matches, "b.flag", &mut second);

        assert!(first);
        assert!(!second);
    }

    #[rstest]
    fn list_flags_split_on_commas() {
        let command = Command::new("test").arg(list("x.items".into(), &[], "items"));
        let matches = command.get_matches_from(["test", "--x.items", "a,b", "--x.items", "c"]);
        let mut items = Vec::new();

        read_list(&matches, "x.items", &mut items);

        assert_eq!(items, vec!["a", "b", "c"]);
    }
}

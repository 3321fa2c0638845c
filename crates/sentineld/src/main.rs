//! Entry point for the sentinel daemon.

use std::io::{self, Write};
use std::process::ExitCode;

use sentineld::{AppInfo, AppOptions, Application};

fn main() -> ExitCode {
    let info = AppInfo::new(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        "Bootstraps datasources, authentication and the request server",
    );
    let mut options = AppOptions::default();
    let matches = options.command(info.command()).get_matches();
    options.absorb(&matches);

    match Application::new(info, options).run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            writeln!(io::stderr(), "{}: {error}", env!("CARGO_PKG_NAME")).ok();
            ExitCode::FAILURE
        }
    }
}

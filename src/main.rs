//! CLI entry point. Parses options, sets up logging, then hands off to
//! `Client::run` and maps the outcome to the exit codes from spec.md §6.

use std::process;

use log::error;

use multiget::{Client, ClientError, Options};

fn main() {
    let opts = match Options::parse() {
        Ok(opts) => opts,
        Err(0) => process::exit(0),
        Err(_) => process::exit(1),
    };

    init_logging(opts.verbose);

    if let Err(e) = run(opts) {
        error!("{}", e);
        process::exit(e.exit_code());
    }
}

fn run(opts: Options) -> Result<(), ClientError> {
    if opts.urls.is_empty() {
        return Err(ClientError::NoUrls);
    }
    let output = opts.resolve_output_name().ok_or(ClientError::NoOutputName)?;

    let mut client = Client::new(output, opts.user_agent.clone(), opts.quiet)?;

    if client.run(&opts.urls)? {
        Ok(())
    } else {
        Err(ClientError::DownloadFailed)
    }
}

/// `-v` raises the default filter from `warn` to `debug`; `RUST_LOG` always
/// wins when set, matching the teacher crate's own `curl` binary.
fn init_logging(verbose: bool) {
    use std::env;
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", if verbose { "debug" } else { "warn" });
    }
    env_logger::init();
}

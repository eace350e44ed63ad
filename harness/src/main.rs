//! Runs TAP test files one at a time and prints one aggregated TAP report.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use tap_harness::core::types::RunOptions;
use tap_harness::exit_codes;
use tap_harness::io::config::{DEFAULT_CONFIG_FILE, HarnessConfig, HarnessEnv, load_config};
use tap_harness::io::report::TapReporter;
use tap_harness::logging;
use tap_harness::session::Session;

#[derive(Parser, Debug)]
#[command(
    name = "tap-harness",
    version,
    about = "Run TAP test files sequentially and aggregate their results"
)]
struct Cli {
    /// Print YAML diagnostics for passing files too.
    #[arg(long)]
    diag: bool,
    /// Per-file timeout in seconds (fractions allowed).
    #[arg(long, value_parser = parse_timeout)]
    timeout: Option<f64>,
    /// Pass --expose-gc to the script runtime.
    #[arg(long)]
    gc: bool,
    /// Forward child stderr live.
    #[arg(long)]
    stderr: bool,
    /// Config file. Defaults to ./tap-harness.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Files, directories or glob patterns, run in the given order.
    #[arg(required = true)]
    roots: Vec<String>,
}

impl Cli {
    /// Config values with flags layered on top.
    fn run_options(&self, config: &HarnessConfig) -> RunOptions {
        let mut options = config.run_options(self.roots.clone());
        options.diag |= self.diag;
        options.gc |= self.gc;
        options.stderr |= self.stderr;
        if let Some(secs) = self.timeout {
            options.timeout = Duration::from_secs_f64(secs);
        }
        options
    }
}

fn parse_timeout(raw: &str) -> Result<f64, String> {
    let secs: f64 = raw
        .parse()
        .map_err(|_| format!("invalid number of seconds: {raw}"))?;
    if !(secs.is_finite() && secs > 0.0) {
        return Err("timeout must be > 0".to_string());
    }
    Ok(secs)
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::ERROR);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config_path = match &cli.config {
        Some(path) if !path.exists() => bail!("config file not found: {}", path.display()),
        Some(path) => path.clone(),
        None => PathBuf::from(DEFAULT_CONFIG_FILE),
    };
    let config = load_config(&config_path)?;
    let options = cli.run_options(&config);
    let env = HarnessEnv::from_process(&config)?;

    let reporter = TapReporter::stdio(options.diag);
    let mut session = Session::new(options, env, reporter);
    let summary = session.run();
    Ok(summary.exit_code())
}

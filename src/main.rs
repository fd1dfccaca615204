use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use otus_rig::runtime::{self, RuntimeOptions};

/// Three-axis camera rig controller
#[derive(Parser, Debug)]
#[command(name = "otus-rig", version, about)]
struct Args {
    /// Rig configuration file (TOML); built-in pin map when omitted
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Drive a simulated GPIO bench and test-pattern camera instead of hardware
    #[arg(short, long)]
    simulate: bool,

    /// Log at debug instead of info when RUST_LOG is not set
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Setup logging (RUST_LOG, when set, replaces the default level)
    let spec = filter_spec(std::env::var(EnvFilter::DEFAULT_ENV).ok(), args.verbose);
    let filter = EnvFilter::try_new(&spec).unwrap_or_else(|e| {
        eprintln!("Ignoring invalid log filter {:?}: {}", spec, e);
        EnvFilter::new(default_level(args.verbose))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let options = RuntimeOptions {
        config_path: args.config,
        simulate: args.simulate,
    };
    if let Err(e) = runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

fn default_level(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

fn filter_spec(rust_log: Option<String>, verbose: bool) -> String {
    match rust_log {
        Some(spec) if !spec.trim().is_empty() => spec,
        _ => default_level(verbose).to_string(),
    }
}

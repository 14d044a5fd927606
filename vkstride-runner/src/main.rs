//! # vkstride
//!
//! Runs the buffer-layout suite on the first timestamp-capable compute device
//! and prints per-test reports plus a summary (or JSON with `--json`).

use anyhow::Result;
use std::io::{self, Write};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vkstride_core::{BenchConfig, BenchError, BenchSuite, ComputeContext, VulkanContext};

const DEFAULT_LOG_FILTER: &str = "vkstride=info,vkstride_core=info";

const USAGE: &str = "\
Usage: vkstride [OPTIONS]

Options:
  --config <FILE>     JSON config (flags below override it)
  --iterations <N>    Timed dispatches per test
  --elements <N>      Elements per buffer
  --workgroup <N>     local_size_x, passed as specialization constant 0
  --delay-ms <MS>     Sleep between iterations
  --validation        Enable VK_LAYER_KHRONOS_validation
  --no-validation     Disable the validation layer
  --json              Print results as JSON
  -h, --help          Show this help

Logging follows RUST_LOG (default: vkstride=info,vkstride_core=info).
RUST_LOG=vkstride_core=debug also copies back and logs the first outputs.";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref()))
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = BenchConfig::from_args(&args)?;
    info!("vkstride v{} starting", vkstride_core::VERSION);

    if let Err(e) = run(&config) {
        fatal(e);
    }
    Ok(())
}

/// RUST_LOG wins outright; the default applies only when it is unset, empty
/// or unparsable.
fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn run(config: &BenchConfig) -> Result<(), BenchError> {
    let mut ctx = VulkanContext::new(config)?;
    info!("Device: {}", ctx.device_info().name);

    let suite = BenchSuite::run(&mut ctx, config, |report| {
        if !config.json {
            print_stdout(&report.report());
        }
    })?;

    if config.json {
        print_stdout(&suite.to_json());
    } else {
        print_stdout(&suite.report());
    }

    ctx.shutdown()
}

fn print_stdout(text: &str) {
    let mut out = io::stdout().lock();
    // A closed pipe is not worth aborting a finished measurement over.
    let _ = writeln!(out, "{}", text).and_then(|_| out.flush());
}

/// Timings from a device in an unknown state are worthless; stop here.
fn fatal(e: BenchError) -> ! {
    match e.vk_code() {
        Some(code) => error!("Fatal: {} (VkResult {:?})", e, code),
        None => error!("Fatal: {}", e),
    }
    std::process::abort();
}

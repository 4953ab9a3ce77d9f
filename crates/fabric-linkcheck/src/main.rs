//! fabric-linkcheck entry point.
//!
//! Verifies accelerator fabric wiring: every link in the connectivity
//! descriptor is resolved against the device inventory and, if both ports are
//! up, exercised with a benchmark server/client pair.
//!
//! Exit codes: 0 when every submitted test succeeded, 1 when any did not,
//! 2 on configuration or input errors.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fabric_inventory::{DeviceInventory, PortActivityRule, StaticInventory, SystemInventory};
use fabric_linkcheck::config_file::DEFAULT_CONFIG_PATH;
use fabric_linkcheck::report::{render_devices, write_json};
use fabric_linkcheck::{ConnectivityDescriptor, LinkRunner, LinkcheckConfig, ProcessSupervisor, RunOptions};

/// Exit code for configuration and input errors.
const EXIT_FATAL: u8 = 2;

/// Accelerator fabric link verification
#[derive(Parser, Debug)]
#[command(name = "fabric-linkcheck")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Connectivity descriptor (src_module src_port dst_module dst_port per line)
    #[arg(short = 'c', long, required_unless_present = "list_devices")]
    connectivity: Option<PathBuf>,

    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// JSON device list to use instead of querying the system
    #[arg(long)]
    inventory_file: Option<PathBuf>,

    /// Maximum benchmark pairs running at once
    #[arg(short = 'j', long)]
    max_concurrent: Option<usize>,

    /// Client deadline per test in seconds
    #[arg(short = 't', long)]
    timeout: Option<u64>,

    /// Benchmark test kind
    #[arg(long)]
    kind: Option<String>,

    /// Message size in bytes
    #[arg(short = 's', long)]
    size: Option<u32>,

    /// Iterations per test
    #[arg(short = 'n', long)]
    iterations: Option<u32>,

    /// Benchmark executable
    #[arg(long)]
    benchmark: Option<PathBuf>,

    /// Port activity rule (textual or numeric)
    #[arg(long, value_parser = parse_activity_rule)]
    port_activity: Option<PortActivityRule>,

    /// Re-check port state right before each test
    #[arg(long)]
    recheck_ports: bool,

    /// Only test links with an end on this module
    #[arg(short = 'm', long)]
    module: Option<u32>,

    /// Directory for per-test logs
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Write the JSON report here instead of stdout
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Match and filter only; print the plan without running anything
    #[arg(long)]
    dry_run: bool,

    /// Print the device inventory and exit
    #[arg(long)]
    list_devices: bool,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn parse_activity_rule(value: &str) -> std::result::Result<PortActivityRule, String> {
    match value.to_ascii_lowercase().as_str() {
        "textual" => Ok(PortActivityRule::Textual),
        "numeric" => Ok(PortActivityRule::Numeric),
        other => Err(format!("unknown port activity rule '{}'", other)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %format!("{:#}", e), "fabric-linkcheck failed");
            eprintln!("fabric-linkcheck: {:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

/// Logs go to stderr so the JSON report can own stdout.
fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr).compact())
        .init();
}

async fn run(args: Args) -> Result<u8> {
    let mut config = LinkcheckConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    apply_overrides(&mut config, &args);
    config.validate()?;

    let inventory = build_inventory(&config);

    if args.list_devices {
        let snapshot = inventory.snapshot().await.context("querying device inventory")?;
        print!("{}", render_devices(&snapshot));
        return Ok(0);
    }

    let path = args
        .connectivity
        .as_deref()
        .context("a connectivity descriptor is required")?;
    let descriptor = ConnectivityDescriptor::load(path)?;

    let options = RunOptions {
        params: config.test_params(),
        priority: config.test.priority,
        max_concurrent_tests: config.runner.max_concurrent_tests,
        recheck_ports: config.runner.recheck_ports_before_test,
        module_filter: args.module,
        log_dir: config.runner.log_dir.clone(),
    };
    let supervisor = ProcessSupervisor::new(config.supervisor());
    let runner = LinkRunner::new(inventory, Arc::new(supervisor), options);

    let plan = runner.plan(&descriptor).await?;
    if args.dry_run {
        info!(active = plan.active.len(), "Dry run, nothing submitted");
        write_json(&plan, args.output.as_deref())?;
        return Ok(0);
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, aborting run");
            interrupt.cancel();
        }
    });

    let report = runner.execute(plan, cancel).await;
    report.write(args.output.as_deref())?;
    Ok(report.exit_code())
}

fn apply_overrides(config: &mut LinkcheckConfig, args: &Args) {
    if let Some(path) = &args.inventory_file {
        config.inventory.inventory_file = Some(path.clone());
    }
    if let Some(rule) = args.port_activity {
        config.inventory.port_activity = rule;
    }
    if let Some(n) = args.max_concurrent {
        config.runner.max_concurrent_tests = n;
    }
    if let Some(secs) = args.timeout {
        config.test.timeout_secs = secs;
    }
    if let Some(kind) = &args.kind {
        config.test.kind = kind.clone();
    }
    if let Some(size) = args.size {
        config.test.message_size = size;
    }
    if let Some(iterations) = args.iterations {
        config.test.iterations = iterations;
    }
    if let Some(path) = &args.benchmark {
        config.runner.benchmark_path = path.clone();
    }
    if let Some(dir) = &args.log_dir {
        config.runner.log_dir = Some(dir.clone());
    }
    if args.recheck_ports {
        config.runner.recheck_ports_before_test = true;
    }
}

fn build_inventory(config: &LinkcheckConfig) -> Arc<dyn DeviceInventory> {
    match &config.inventory.inventory_file {
        Some(path) => {
            info!(path = %path.display(), "Using static device inventory");
            Arc::new(StaticInventory::from_file(path.clone()))
        }
        None => Arc::new(
            SystemInventory::new(config.inventory.port_activity)
                .with_smi_path(config.inventory.smi_path.clone())
                .with_sysfs_root(config.inventory.sysfs_root.clone())
                .with_vendor_id(config.inventory.vendor_id.clone()),
        ),
    }
}

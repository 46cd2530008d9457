//! # quill
//!
//! Runs a declarative contract suite against an HTTP service.
//!
//! ```bash
//! # Verify a running books service
//! quill run --config suites/books.yml --base-url http://localhost:8080
//!
//! # Show the execution plan without sending anything
//! quill plan --config suites/books.yml
//! ```
//!
//! Exit codes: 0 when every scenario passed, 1 when any failed or errored,
//! 2 when the suite or the command line is invalid.

mod reporter;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quill_core::{
    ConfigError, DiagnosticsRecorder, Plan, ReqwestTransport, Scheduler, SchedulerOptions, Suite,
};
use regex::Regex;
use reporter::{ReportFormat, ReportWriter, TerminalReporter, Verbosity, create_progress_callback};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info};

/// Exit code for configuration errors.
const EXIT_CONFIG: i32 = 2;

/// Quill - scenario-driven HTTP contract verification
#[derive(Parser, Debug)]
#[command(name = "quill", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (debug logs, every reason)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only print the final pass/fail line
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a suite against a service
    Run(RunArgs),

    /// Print the execution plan without sending requests
    Plan(PlanArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the suite file
    #[arg(short, long, env = "QUILL_CONFIG")]
    config: PathBuf,

    /// Base URL of the service under test (overrides the suite's base_url)
    #[arg(long, env = "QUILL_BASE_URL")]
    base_url: Option<String>,

    /// Maximum scenarios in flight
    #[arg(long, env = "QUILL_PARALLELISM")]
    parallelism: Option<usize>,

    /// Run-level deadline: `1500`, `1500ms` or `2s`
    #[arg(long, env = "QUILL_TIMEOUT", value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Run only scenarios whose id or description contains this pattern
    /// (plus their dependencies)
    #[arg(long)]
    filter: Option<String>,

    /// Directory to write report files into
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// Report file format
    #[arg(long, value_enum, default_value_t = ReportFormat::Markdown)]
    format: ReportFormat,

    /// Directory to append every exchange to as JSONL
    #[arg(long)]
    diagnostics_dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct PlanArgs {
    /// Path to the suite file
    #[arg(short, long, env = "QUILL_CONFIG")]
    config: PathBuf,

    /// Plan only scenarios matching this pattern (plus their dependencies)
    #[arg(long)]
    filter: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let verbosity = Verbosity::resolve(cli.verbose, cli.quiet);
    let outcome = match cli.command {
        Commands::Run(args) => run(args, verbosity).await,
        Commands::Plan(args) => plan(&args),
    };

    let code = match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

/// Logs go to stderr so stdout carries only the report.
fn init_logging(verbose: bool, quiet: bool) {
    let default = if quiet {
        "quill_core=warn,quill_cli=warn"
    } else if verbose {
        "quill_core=debug,quill_cli=debug"
    } else {
        "quill_core=info,quill_cli=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn exit_code_for(error: &anyhow::Error) -> i32 {
    if error.downcast_ref::<ConfigError>().is_some() {
        EXIT_CONFIG
    } else {
        1
    }
}

fn load_suite(path: &Path, filter: Option<&str>) -> Result<Suite> {
    let suite = Suite::from_file(path)?;
    debug!(path = %path.display(), scenarios = suite.scenarios.len(), "loaded suite");
    match filter {
        Some(pattern) => Ok(suite.filter(pattern)?),
        None => Ok(suite),
    }
}

async fn run(args: RunArgs, verbosity: Verbosity) -> Result<i32> {
    let suite = load_suite(&args.config, args.filter.as_deref())?;

    let mut settings = suite.settings.clone();
    if let Some(base_url) = args.base_url {
        settings.base_url = Some(base_url);
    }
    if let Some(parallelism) = args.parallelism {
        settings.parallelism = parallelism;
    }
    if let Some(timeout) = args.timeout {
        settings.timeout = Some(timeout);
    }

    let mut options = SchedulerOptions::from_settings(&settings)?;
    if let Some(dir) = &args.diagnostics_dir {
        let recorder = DiagnosticsRecorder::to_dir(dir)
            .with_context(|| format!("failed to open diagnostics in {}", dir.display()))?;
        options = options.with_diagnostics(recorder);
    }

    let transport = ReqwestTransport::new(settings.request_timeout)
        .context("failed to build HTTP client")?;
    let scheduler = Scheduler::new(suite, Arc::new(transport), options)?
        .on_progress(create_progress_callback(verbosity));

    info!(
        base_url = %settings.base_url.as_deref().unwrap_or_default(),
        parallelism = settings.parallelism,
        "starting run"
    );
    let report = scheduler.run().await;

    TerminalReporter::with_verbosity(verbosity).print_summary(&report);

    if let Some(dir) = args.report_dir {
        let written = ReportWriter::new(dir)
            .write(&report, args.format)
            .context("failed to write reports")?;
        for path in written {
            info!(path = %path.display(), "wrote report");
        }
    }

    Ok(report.exit_code())
}

fn plan(args: &PlanArgs) -> Result<i32> {
    let suite = load_suite(&args.config, args.filter.as_deref())?;
    suite.validate()?;
    let plan = Plan::build(&suite)?;

    println!(
        "{} scenario{} in {} wave{}",
        plan.len(),
        if plan.len() == 1 { "" } else { "s" },
        plan.waves().len(),
        if plan.waves().len() == 1 { "" } else { "s" }
    );
    print!("{plan}");
    Ok(0)
}

/// Parses `1500`, `1500ms` or `2s`. A bare number is milliseconds.
fn parse_duration(raw: &str) -> Result<Duration, String> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^\s*(\d+)\s*(ms|s)?\s*$"))
        .as_ref()
        .map_err(|e| e.to_string())?;
    let caps = pattern
        .captures(raw)
        .ok_or_else(|| format!("invalid duration '{raw}': expected e.g. 1500, 1500ms or 2s"))?;
    let value: u64 = caps[1]
        .parse()
        .map_err(|e| format!("invalid duration '{raw}': {e}"))?;
    match caps.get(2).map(|m| m.as_str()) {
        Some("s") => Ok(Duration::from_secs(value)),
        _ => Ok(Duration::from_millis(value)),
    }
}

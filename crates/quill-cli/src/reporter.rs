//! Reporters for contract runs.
//!
//! - `TerminalReporter`: colored progress and summary on stdout
//! - `MarkdownReporter`: human-readable `report.md`
//! - `JsonReporter`: machine-readable `report.json`
//! - `ReportWriter`: writes the file reports into a directory

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use quill_core::{ExecutionResult, ProgressCallback, ProgressEvent, RunReport, ScenarioStatus};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Verbosity level for terminal output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Only the final pass/fail line.
    Quiet,
    #[default]
    Normal,
    /// Also prints scenario starts and every reason.
    Verbose,
}

impl Verbosity {
    /// `--quiet` wins over `--verbose`.
    pub fn resolve(verbose: bool, quiet: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }
}

/// Which file reports to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReportFormat {
    #[default]
    Markdown,
    Json,
    Both,
}

/// Terminal reporter for run progress and results.
#[derive(Debug, Default)]
pub struct TerminalReporter {
    verbosity: Verbosity,
    current_wave: Option<usize>,
}

impl TerminalReporter {
    pub fn with_verbosity(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            current_wave: None,
        }
    }

    /// Handles a progress event, printing appropriate output.
    pub fn handle_progress(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::RunStarted {
                total_scenarios,
                waves,
            } => {
                if self.verbosity != Verbosity::Quiet {
                    println!(
                        "\n{}\n",
                        format!(
                            "Running {} scenario{} in {} wave{}...",
                            total_scenarios,
                            plural(total_scenarios),
                            waves,
                            plural(waves)
                        )
                        .bold()
                    );
                }
            }
            ProgressEvent::ScenarioStarted { scenario_id, wave } => {
                if self.verbosity == Verbosity::Verbose {
                    if self.current_wave != Some(wave) {
                        self.current_wave = Some(wave);
                        println!("{}", format!("wave {}", wave + 1).underline());
                    }
                    println!("  {} {}", "…".dimmed(), scenario_id.dimmed());
                }
            }
            ProgressEvent::ScenarioCompleted {
                scenario_id,
                status,
                duration,
                result,
            } => {
                if self.verbosity != Verbosity::Quiet {
                    self.print_completed(&scenario_id, status, duration, &result);
                }
            }
            ProgressEvent::ScenarioSkipped {
                scenario_id,
                reason,
                ..
            } => {
                if self.verbosity != Verbosity::Quiet {
                    println!(
                        "  {} {} {}",
                        "-".dimmed(),
                        scenario_id.dimmed(),
                        format!("({reason})").dimmed()
                    );
                }
            }
            ProgressEvent::RunCompleted { summary, .. } => {
                if self.verbosity == Verbosity::Quiet {
                    let total = summary.total();
                    if summary.has_failures() {
                        let bad = summary.failed + summary.errored;
                        println!("{}", format!("✗ {bad}/{total} failed").red());
                    } else {
                        println!("{}", format!("✓ {}/{} passed", summary.passed, total).green());
                    }
                }
            }
        }
    }

    fn print_completed(
        &self,
        scenario_id: &str,
        status: ScenarioStatus,
        duration: Duration,
        result: &ExecutionResult,
    ) {
        let mark = match status {
            ScenarioStatus::Passed => "✓".green(),
            ScenarioStatus::Failed => "✗".red(),
            ScenarioStatus::Errored => "!".yellow(),
            ScenarioStatus::Skipped => "-".dimmed(),
        };
        let code = result
            .actual_status
            .map(|c| format!(" {c}"))
            .unwrap_or_default();
        let timing = format!("({:.2}s)", duration.as_secs_f64()).dimmed();
        println!("  {mark} {scenario_id}{code} {timing}");

        if self.verbosity == Verbosity::Verbose || status.is_failure() {
            for reason in &result.reasons {
                println!("      {}", reason.dimmed());
            }
        }
    }

    /// Prints the final tally.
    pub fn print_summary(&self, report: &RunReport) {
        if self.verbosity == Verbosity::Quiet {
            return;
        }
        println!("\n{}", "━".repeat(40).dimmed());

        let summary = &report.summary;
        let (verdict, color) = if !summary.has_failures() {
            ("PASSED", colored::Color::Green)
        } else if summary.passed > 0 {
            ("MIXED", colored::Color::Yellow)
        } else {
            ("FAILED", colored::Color::Red)
        };
        println!(
            "{}",
            format!("{verdict}: {} of {} scenarios", summary.passed, summary.total())
                .color(color)
                .bold()
        );

        let mut parts = vec![format!("{} passed", summary.passed).green().to_string()];
        if summary.failed > 0 {
            parts.push(format!("{} failed", summary.failed).red().to_string());
        }
        if summary.errored > 0 {
            parts.push(format!("{} errored", summary.errored).yellow().to_string());
        }
        if summary.skipped > 0 {
            parts.push(format!("{} skipped", summary.skipped).dimmed().to_string());
        }
        println!("   {}", parts.join(", "));

        let divergences = report.divergences().count();
        if divergences > 0 {
            println!(
                "   {}",
                format!("{divergences} ledger divergence(s)").magenta()
            );
        }
        if report.timed_out {
            println!("   {}", "run timed out".yellow());
        }
        println!(
            "\n   {}",
            format!("Completed in {:.1}s", report.duration.as_secs_f64()).dimmed()
        );
    }
}

/// Creates a progress callback for [`quill_core::Scheduler::on_progress`].
pub fn create_progress_callback(verbosity: Verbosity) -> ProgressCallback {
    let reporter = Arc::new(Mutex::new(TerminalReporter::with_verbosity(verbosity)));
    Box::new(move |event| {
        if let Ok(mut r) = reporter.lock() {
            r.handle_progress(event);
        }
    })
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

// ============================================================================
// File reports
// ============================================================================

/// Errors that can occur while writing reports.
#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("failed to write report: {0}")]
    Write(#[from] std::io::Error),

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Renders a run as Markdown.
#[derive(Debug, Default)]
pub struct MarkdownReporter;

impl MarkdownReporter {
    pub fn generate(&self, report: &RunReport) -> String {
        let mut out = String::new();
        self.write_header(&mut out, report);
        self.write_summary(&mut out, report);
        self.write_failures(&mut out, report);
        self.write_divergences(&mut out, report);
        self.write_skipped(&mut out, report);
        self.write_all(&mut out, report);
        out
    }

    fn write_header(&self, out: &mut String, report: &RunReport) {
        out.push_str("# Quill Contract Report\n\n");
        let verdict = if report.summary.has_failures() {
            "FAILED"
        } else {
            "PASSED"
        };
        out.push_str(&format!("## {verdict}\n\n"));
        out.push_str(&format!("**Target:** {}\n", report.base_url));
        out.push_str(&format!(
            "**Started:** {}\n",
            report.started_at.format("%Y-%m-%dT%H:%M:%SZ")
        ));
        out.push_str(&format!(
            "**Duration:** {:.1}s\n",
            report.duration.as_secs_f64()
        ));
        out.push_str(&format!("**Quill Version:** {}\n", env!("CARGO_PKG_VERSION")));
        if report.timed_out {
            out.push_str("**Note:** the run hit its deadline\n");
        }
        out.push('\n');
    }

    fn write_summary(&self, out: &mut String, report: &RunReport) {
        let s = &report.summary;
        out.push_str("## Summary\n\n");
        out.push_str("| Status | Count |\n");
        out.push_str("|--------|-------|\n");
        out.push_str(&format!("| Passed | {} |\n", s.passed));
        out.push_str(&format!("| Failed | {} |\n", s.failed));
        out.push_str(&format!("| Errored | {} |\n", s.errored));
        out.push_str(&format!("| Skipped | {} |\n", s.skipped));
        out.push_str(&format!("| **Total** | **{}** |\n\n", s.total()));
    }

    fn write_failures(&self, out: &mut String, report: &RunReport) {
        let failures: Vec<_> = report
            .results
            .iter()
            .filter(|r| r.status.is_failure())
            .collect();
        if failures.is_empty() {
            return;
        }

        out.push_str("## Failures\n\n");
        for result in failures {
            out.push_str(&format!("### {} ({})\n\n", result.scenario_id, result.status));
            if !result.description.is_empty() {
                out.push_str(&format!("{}\n\n", result.description));
            }
            out.push_str(&format!(
                "- **Expected status:** {}\n",
                status_set(result)
            ));
            match result.actual_status {
                Some(code) => out.push_str(&format!("- **Actual status:** {code}\n")),
                None => out.push_str("- **Actual status:** none\n"),
            }
            if let Some(key) = &result.resource_key {
                out.push_str(&format!("- **Resource key:** `{key}`\n"));
            }
            for reason in &result.reasons {
                out.push_str(&format!("- {reason}\n"));
            }
            out.push('\n');
        }
    }

    fn write_divergences(&self, out: &mut String, report: &RunReport) {
        let divergences: Vec<_> = report.divergences().collect();
        if divergences.is_empty() {
            return;
        }
        out.push_str("## Ledger Divergences\n\n");
        for result in divergences {
            if let Some(divergence) = &result.divergence {
                out.push_str(&format!("- `{}`: {divergence}\n", result.scenario_id));
            }
        }
        out.push('\n');
    }

    fn write_skipped(&self, out: &mut String, report: &RunReport) {
        let skipped: Vec<_> = report
            .results
            .iter()
            .filter(|r| r.status == ScenarioStatus::Skipped)
            .collect();
        if skipped.is_empty() {
            return;
        }
        out.push_str("## Skipped\n\n");
        for result in skipped {
            let reason = result.reasons.first().map_or("", String::as_str);
            out.push_str(&format!("- `{}`: {reason}\n", result.scenario_id));
        }
        out.push('\n');
    }

    fn write_all(&self, out: &mut String, report: &RunReport) {
        out.push_str("## Scenarios\n\n");
        out.push_str("| Scenario | Status | Expected | Actual | Duration |\n");
        out.push_str("|----------|--------|----------|--------|----------|\n");
        for result in &report.results {
            let actual = result
                .actual_status
                .map_or_else(|| "-".to_string(), |c| c.to_string());
            out.push_str(&format!(
                "| {} | {} | {} | {} | {:.2}s |\n",
                result.scenario_id,
                result.status,
                status_set(result),
                actual,
                result.duration.as_secs_f64()
            ));
        }
    }
}

fn status_set(result: &ExecutionResult) -> String {
    let codes: Vec<String> = result.expected_status.iter().map(u16::to_string).collect();
    format!("{{{}}}", codes.join(", "))
}

/// JSON document written to `report.json`.
#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub generated_at: DateTime<Utc>,
    pub quill_version: &'static str,
    pub passed: bool,
    #[serde(flatten)]
    pub report: &'a RunReport,
}

/// Renders a run as pretty-printed JSON.
#[derive(Debug, Default)]
pub struct JsonReporter;

impl JsonReporter {
    pub fn generate(&self, report: &RunReport) -> Result<String, ReporterError> {
        let document = JsonReport {
            generated_at: Utc::now(),
            quill_version: env!("CARGO_PKG_VERSION"),
            passed: !report.summary.has_failures(),
            report,
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }
}

/// Writes file reports into an output directory.
#[derive(Debug)]
pub struct ReportWriter {
    output_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Writes the requested format(s) and returns the paths written.
    pub fn write(
        &self,
        report: &RunReport,
        format: ReportFormat,
    ) -> Result<Vec<PathBuf>, ReporterError> {
        std::fs::create_dir_all(&self.output_dir)?;

        let mut written = Vec::new();
        if matches!(format, ReportFormat::Markdown | ReportFormat::Both) {
            let path = self.output_dir.join("report.md");
            std::fs::write(&path, MarkdownReporter.generate(report))?;
            written.push(path);
        }
        if matches!(format, ReportFormat::Json | ReportFormat::Both) {
            let path = self.output_dir.join("report.json");
            std::fs::write(&path, JsonReporter.generate(report)?)?;
            written.push(path);
        }
        Ok(written)
    }
}

//! Diagnostics Recorder.
//!
//! Every exchange is already attached to its scenario's result. When a
//! directory is configured, exchanges and verdicts are also appended to
//! `exchanges.jsonl` as they happen, so a run that is killed midway still
//! leaves evidence behind.

use chrono::Utc;
use quill_proto::{Exchange, ExecutionResult, ScenarioStatus};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// File name of the JSONL log inside the diagnostics directory.
pub const EXCHANGES_FILE: &str = "exchanges.jsonl";

/// Single line of `exchanges.jsonl`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    pub ts: String,
    pub scenario: String,
    #[serde(flatten)]
    pub content: DiagnosticContent,
}

/// What a diagnostics line describes.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiagnosticContent {
    /// One send attempt and what came back.
    Exchange(Exchange),
    /// The scenario's final verdict.
    Verdict {
        status: ScenarioStatus,
        reasons: Vec<String>,
    },
}

/// Observes every exchange of a run.
#[derive(Debug, Default)]
pub struct DiagnosticsRecorder {
    path: Option<PathBuf>,
    file: Option<Mutex<BufWriter<File>>>,
}

impl DiagnosticsRecorder {
    /// Creates a recorder that keeps nothing beyond the in-memory results.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Creates a recorder appending to `<dir>/exchanges.jsonl`.
    pub fn to_dir(dir: &Path) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(EXCHANGES_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path: Some(path),
            file: Some(Mutex::new(BufWriter::new(file))),
        })
    }

    /// Returns true if entries are written to disk.
    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    /// Path of the JSONL file, when enabled.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Records one exchange.
    pub fn record(&self, scenario_id: &str, exchange: &Exchange) {
        self.write(scenario_id, DiagnosticContent::Exchange(exchange.clone()));
    }

    /// Records a scenario's final verdict.
    pub fn record_result(&self, result: &ExecutionResult) {
        self.write(
            &result.scenario_id,
            DiagnosticContent::Verdict {
                status: result.status,
                reasons: result.reasons.clone(),
            },
        );
    }

    fn write(&self, scenario_id: &str, content: DiagnosticContent) {
        let Some(file) = &self.file else {
            return;
        };
        let entry = DiagnosticEntry {
            ts: Utc::now().to_rfc3339(),
            scenario: scenario_id.to_string(),
            content,
        };

        // A diagnostics failure must never change a scenario's outcome.
        let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
        let written = serde_json::to_string(&entry)
            .map_err(std::io::Error::from)
            .and_then(|json| writeln!(file, "{json}"))
            .and_then(|()| file.flush());
        if let Err(e) = written {
            warn!(scenario = scenario_id, error = %e, "Failed to write diagnostics entry");
        }
    }
}

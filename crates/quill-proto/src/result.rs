//! Per-scenario execution results and diagnostics.

use crate::http::{HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

/// Terminal state of a scenario within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    /// The response matched the expected outcome.
    Passed,
    /// The response violated the contract (status, body, capture, or ledger divergence).
    Failed,
    /// An upstream dependency did not pass, or the run ended before the scenario started.
    Skipped,
    /// No usable response: network failure after retries, or run timeout.
    Errored,
}

impl ScenarioStatus {
    /// Returns true for states that make the run fail.
    pub fn is_failure(&self) -> bool {
        matches!(self, ScenarioStatus::Failed | ScenarioStatus::Errored)
    }
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioStatus::Passed => write!(f, "passed"),
            ScenarioStatus::Failed => write!(f, "failed"),
            ScenarioStatus::Skipped => write!(f, "skipped"),
            ScenarioStatus::Errored => write!(f, "errored"),
        }
    }
}

/// Last known existence of a resource, as tracked by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Existence {
    #[default]
    Unknown,
    Present,
    Absent,
}

impl fmt::Display for Existence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Existence::Unknown => write!(f, "unknown"),
            Existence::Present => write!(f, "present"),
            Existence::Absent => write!(f, "absent"),
        }
    }
}

/// One request/response pair observed while running a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    /// 1-based send attempt within the scenario.
    pub attempt: u32,
    /// Request as sent, with credentials redacted.
    pub request: HttpRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<HttpResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Outcome of a single scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub scenario_id: String,
    #[serde(default)]
    pub description: String,
    pub status: ScenarioStatus,
    /// Status code of the final response, if any response arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_status: Option<u16>,
    /// The acceptable status set the response was judged against.
    #[serde(default)]
    pub expected_status: BTreeSet<u16>,
    /// Values captured from the response body, keyed by capture name.
    #[serde(default)]
    pub captured: BTreeMap<String, Value>,
    /// Human-readable explanation of the verdict, in evaluation order.
    #[serde(default)]
    pub reasons: Vec<String>,
    /// Set when ledger state contradicted the scenario's declared expectation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divergence: Option<String>,
    /// The upstream scenario that caused a skip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_key: Option<String>,
    #[serde(default)]
    pub exchanges: Vec<Exchange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(with = "duration_serde", default)]
    pub duration: Duration,
}

impl ExecutionResult {
    /// Creates a result in the given state with no evidence attached.
    pub fn new(
        scenario_id: impl Into<String>,
        description: impl Into<String>,
        status: ScenarioStatus,
    ) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            description: description.into(),
            status,
            actual_status: None,
            expected_status: BTreeSet::new(),
            captured: BTreeMap::new(),
            reasons: Vec::new(),
            divergence: None,
            blocked_by: None,
            resource_key: None,
            exchanges: Vec::new(),
            started_at: None,
            duration: Duration::ZERO,
        }
    }

    /// Creates a skipped result naming the scenario that blocked it.
    pub fn skipped(
        scenario_id: impl Into<String>,
        description: impl Into<String>,
        blocked_by: Option<String>,
        reason: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(scenario_id, description, ScenarioStatus::Skipped);
        result.blocked_by = blocked_by;
        result.reasons.push(reason.into());
        result
    }

    /// Creates an errored result with a single reason.
    pub fn errored(
        scenario_id: impl Into<String>,
        description: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(scenario_id, description, ScenarioStatus::Errored);
        result.reasons.push(reason.into());
        result
    }

    /// Returns true if the scenario passed.
    pub fn passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }
}

/// Serde helper serializing a `Duration` as fractional seconds.
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_states() {
        assert!(ScenarioStatus::Failed.is_failure());
        assert!(ScenarioStatus::Errored.is_failure());
        assert!(!ScenarioStatus::Skipped.is_failure());
        assert!(!ScenarioStatus::Passed.is_failure());
    }

    #[test]
    fn test_skipped_records_blocker() {
        let result = ExecutionResult::skipped(
            "read-book",
            "Read created book",
            Some("create-book".to_string()),
            "dependency create-book failed",
        );
        assert_eq!(result.status, ScenarioStatus::Skipped);
        assert_eq!(result.blocked_by.as_deref(), Some("create-book"));
        assert!(result.exchanges.is_empty());
    }

    #[test]
    fn test_result_serializes_duration_as_seconds() {
        let mut result = ExecutionResult::new("list", "List books", ScenarioStatus::Passed);
        result.duration = Duration::from_millis(1500);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["duration"], 1.5);
        assert_eq!(json["status"], "passed");

        let back: ExecutionResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.duration, Duration::from_millis(1500));
    }
}

//! Expected outcomes: tolerant status sets plus ordered body assertions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// What a scenario accepts as a passing response.
///
/// A response passes iff its status is a member of `status_codes` and every
/// applicable body assertion holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedOutcome {
    /// Acceptable status codes. Never empty once validated.
    pub status_codes: BTreeSet<u16>,
    #[serde(default)]
    pub body_assertions: Vec<BodyAssertion>,
}

impl ExpectedOutcome {
    /// Creates an outcome accepting any of the given status codes.
    pub fn status(codes: impl IntoIterator<Item = u16>) -> Self {
        Self {
            status_codes: codes.into_iter().collect(),
            body_assertions: Vec::new(),
        }
    }

    /// Appends a body assertion.
    pub fn with_assertion(mut self, assertion: BodyAssertion) -> Self {
        self.body_assertions.push(assertion);
        self
    }

    /// Returns true if `status` is acceptable.
    pub fn accepts_status(&self, status: u16) -> bool {
        self.status_codes.contains(&status)
    }

    /// Renders the status set as `{200, 500}` for reasons and reports.
    pub fn status_set_display(&self) -> String {
        let codes: Vec<String> = self.status_codes.iter().map(u16::to_string).collect();
        format!("{{{}}}", codes.join(", "))
    }
}

/// A predicate evaluated against the value selected by a JSONPath expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyAssertion {
    pub path: String,
    pub predicate: Predicate,
    /// When set, the assertion only applies if the actual status is in this set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_status: Option<BTreeSet<u16>>,
}

impl BodyAssertion {
    /// Creates an unconditional assertion.
    pub fn new(path: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            path: path.into(),
            predicate,
            when_status: None,
        }
    }

    /// Restricts the assertion to responses with one of the given statuses.
    pub fn when_status(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.when_status = Some(codes.into_iter().collect());
        self
    }

    /// Returns true if the assertion must be evaluated for this status.
    pub fn applies_to(&self, status: u16) -> bool {
        self.when_status
            .as_ref()
            .is_none_or(|codes| codes.contains(&status))
    }
}

impl fmt::Display for BodyAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.path, self.predicate)
    }
}

/// Supported body predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Predicate {
    /// The value is an array or object with at least one member.
    NotEmpty,
    /// The value is an empty array or object.
    Empty,
    /// Deep equality; numbers compare within 1e-6.
    EqualTo(Value),
    /// Negation of [`Predicate::EqualTo`].
    NotEqualTo(Value),
    /// The path selects at least one value.
    Exists,
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::NotEmpty => write!(f, "not(empty)"),
            Predicate::Empty => write!(f, "empty"),
            Predicate::EqualTo(v) => write!(f, "equalTo({v})"),
            Predicate::NotEqualTo(v) => write!(f, "not(equalTo({v}))"),
            Predicate::Exists => write!(f, "exists"),
        }
    }
}

//! Scenario definitions and the suite that groups them.
//!
//! A [`Scenario`] is one declarative HTTP call plus the outcomes it accepts.
//! A [`Suite`] is the validated, immutable set of scenarios and auth profiles
//! for a run.

use crate::error::ConfigError;
use quill_proto::{AuthProfile, Existence, ExpectedOutcome, Method};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::Duration;

/// Captured outputs of completed scenarios: scenario id -> capture name -> value.
pub type CaptureStore = HashMap<String, BTreeMap<String, Value>>;

/// Where a path parameter gets its value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamSource {
    /// A fixed value from the definition.
    Literal(Value),
    /// A value captured by a scenario this one depends on.
    Capture { from: String, capture: String },
}

/// How a scenario's contended resource key is derived.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceKeyExpr {
    /// The resolved value of one of the scenario's own path parameters.
    Param(String),
    /// A value captured by a dependency.
    Capture { from: String, capture: String },
    /// A value this scenario captures itself (a create). Not locked before the
    /// request; recorded in the ledger once captured.
    Output(String),
    /// A fixed key.
    Literal(String),
}

/// A value extracted from a passing response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub name: String,
    /// JSONPath into the response body.
    pub path: String,
}

/// One declarative request and its acceptable outcomes.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub id: String,
    pub description: String,
    pub method: Method,
    pub path_template: String,
    pub path_params: BTreeMap<String, ParamSource>,
    pub body: Option<Value>,
    /// Auth profile name; `None` sends the request without credentials.
    pub auth: Option<String>,
    pub expected: ExpectedOutcome,
    pub depends_on: Vec<String>,
    pub resource_key: Option<ResourceKeyExpr>,
    pub captures: Vec<Capture>,
    /// Existence the ledger should report for the resource key before sending.
    pub expect_existence: Option<Existence>,
}

impl Scenario {
    /// Creates a scenario expecting a 200 with no body assertions.
    pub fn new(id: impl Into<String>, method: Method, path_template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            method,
            path_template: path_template.into(),
            path_params: BTreeMap::new(),
            body: None,
            auth: None,
            expected: ExpectedOutcome::status([200]),
            depends_on: Vec::new(),
            resource_key: None,
            captures: Vec::new(),
            expect_existence: None,
        }
    }

    /// Sets the description.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Binds a path parameter to a literal value.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.path_params
            .insert(name.into(), ParamSource::Literal(value.into()));
        self
    }

    /// Binds a path parameter to a dependency's captured value.
    pub fn param_from(
        mut self,
        name: impl Into<String>,
        from: impl Into<String>,
        capture: impl Into<String>,
    ) -> Self {
        self.path_params.insert(
            name.into(),
            ParamSource::Capture {
                from: from.into(),
                capture: capture.into(),
            },
        );
        self
    }

    /// Sets the structured request body.
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the auth profile.
    pub fn auth(mut self, profile: impl Into<String>) -> Self {
        self.auth = Some(profile.into());
        self
    }

    /// Sets the expected outcome.
    pub fn expect(mut self, expected: ExpectedOutcome) -> Self {
        self.expected = expected;
        self
    }

    /// Adds a dependency.
    pub fn after(mut self, dependency: impl Into<String>) -> Self {
        self.depends_on.push(dependency.into());
        self
    }

    /// Sets the resource key expression.
    pub fn resource(mut self, key: ResourceKeyExpr) -> Self {
        self.resource_key = Some(key);
        self
    }

    /// Declares a capture.
    pub fn capture(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.captures.push(Capture {
            name: name.into(),
            path: path.into(),
        });
        self
    }

    /// Declares the existence the ledger must not contradict.
    pub fn expect_existence(mut self, existence: Existence) -> Self {
        self.expect_existence = Some(existence);
        self
    }

    /// Returns the resource key if it is known without running anything.
    pub fn static_resource_key(&self) -> Option<String> {
        match self.resource_key.as_ref()? {
            ResourceKeyExpr::Literal(key) => Some(key.clone()),
            ResourceKeyExpr::Param(name) => match self.path_params.get(name)? {
                ParamSource::Literal(value) => Some(key_string(value)),
                ParamSource::Capture { .. } => None,
            },
            ResourceKeyExpr::Capture { .. } | ResourceKeyExpr::Output(_) => None,
        }
    }

    /// Returns every `(scenario, capture)` pair this scenario reads.
    pub fn capture_refs(&self) -> Vec<(&str, &str)> {
        let mut refs: Vec<(&str, &str)> = self
            .path_params
            .values()
            .filter_map(|source| match source {
                ParamSource::Capture { from, capture } => Some((from.as_str(), capture.as_str())),
                ParamSource::Literal(_) => None,
            })
            .collect();
        if let Some(ResourceKeyExpr::Capture { from, capture }) = &self.resource_key {
            refs.push((from.as_str(), capture.as_str()));
        }
        refs
    }
}

/// Renders a JSON value as a resource key or path segment.
pub fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Bounded retry for idempotent requests that hit a network error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total send attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Returns the delay before `attempt` (1-based; the first attempt has none).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.backoff.saturating_mul(1 << (attempt - 2).min(16))
    }
}

/// Run-wide settings. CLI flags override what the suite file declares.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub base_url: Option<String>,
    /// Maximum scenarios in flight at once.
    pub parallelism: usize,
    /// Run-level deadline.
    pub timeout: Option<Duration>,
    /// Per-request transport timeout.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            parallelism: 4,
            timeout: None,
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// A validated set of scenarios and the profiles they reference.
#[derive(Debug, Clone)]
pub struct Suite {
    pub settings: RunSettings,
    pub profiles: Vec<AuthProfile>,
    pub scenarios: Vec<Scenario>,
}

impl Suite {
    /// Creates a suite with default settings and validates it.
    pub fn new(profiles: Vec<AuthProfile>, scenarios: Vec<Scenario>) -> Result<Self, ConfigError> {
        let suite = Self {
            settings: RunSettings::default(),
            profiles,
            scenarios,
        };
        suite.validate()?;
        Ok(suite)
    }

    /// Replaces the settings.
    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Looks up a scenario by id.
    pub fn scenario(&self, id: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.id == id)
    }

    /// Checks references between scenarios, profiles, and captures.
    ///
    /// Cycles are detected separately by [`crate::Plan::build`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ids = HashSet::new();
        for scenario in &self.scenarios {
            if !ids.insert(scenario.id.as_str()) {
                return Err(ConfigError::DuplicateScenario(scenario.id.clone()));
            }
        }

        let profiles: HashSet<&str> = self.profiles.iter().map(|p| p.name.as_str()).collect();
        if profiles.len() != self.profiles.len() {
            return Err(ConfigError::Invalid(
                "auth profile names must be unique".to_string(),
            ));
        }

        for scenario in &self.scenarios {
            if scenario.expected.status_codes.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "scenario '{}': expected status set is empty",
                    scenario.id
                )));
            }
            if let Some(code) = scenario
                .expected
                .status_codes
                .iter()
                .find(|c| !(100..=599).contains(*c))
            {
                return Err(ConfigError::Invalid(format!(
                    "scenario '{}': {} is not an HTTP status code",
                    scenario.id, code
                )));
            }

            if let Some(profile) = &scenario.auth
                && !profiles.contains(profile.as_str())
            {
                return Err(ConfigError::UnknownProfile(profile.clone()));
            }

            for dependency in &scenario.depends_on {
                if !ids.contains(dependency.as_str()) {
                    return Err(ConfigError::UnknownDependency {
                        scenario: scenario.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }

            for (from, capture) in scenario.capture_refs() {
                if !scenario.depends_on.iter().any(|d| d == from) {
                    return Err(ConfigError::Invalid(format!(
                        "scenario '{}' reads capture '{}' from '{}' without depending on it",
                        scenario.id, capture, from
                    )));
                }
                let declares = self
                    .scenario(from)
                    .is_some_and(|s| s.captures.iter().any(|c| c.name == capture));
                if !declares {
                    return Err(ConfigError::Invalid(format!(
                        "scenario '{}' reads capture '{}' which '{}' never declares",
                        scenario.id, capture, from
                    )));
                }
            }

            if scenario.expect_existence.is_some() && scenario.resource_key.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "scenario '{}': expect_existence needs a resource key",
                    scenario.id
                )));
            }

            if let Some(ResourceKeyExpr::Param(name)) = &scenario.resource_key
                && !scenario.path_params.contains_key(name)
            {
                return Err(ConfigError::Invalid(format!(
                    "scenario '{}': resource key names unknown path parameter '{}'",
                    scenario.id, name
                )));
            }
            if let Some(ResourceKeyExpr::Output(name)) = &scenario.resource_key
                && !scenario.captures.iter().any(|c| &c.name == name)
            {
                return Err(ConfigError::Invalid(format!(
                    "scenario '{}': resource key names undeclared capture '{}'",
                    scenario.id, name
                )));
            }

            crate::builder::check_templates(scenario)?;
        }

        if self.settings.parallelism == 0 {
            return Err(ConfigError::Invalid(
                "parallelism must be at least 1".to_string(),
            ));
        }
        if self.settings.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Keeps the scenarios whose id or description contains `pattern`
    /// (case-insensitive), plus everything they transitively depend on.
    pub fn filter(&self, pattern: &str) -> Result<Self, ConfigError> {
        let needle = pattern.to_lowercase();
        let mut keep: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&Scenario> = self
            .scenarios
            .iter()
            .filter(|s| {
                s.id.to_lowercase().contains(&needle)
                    || s.description.to_lowercase().contains(&needle)
            })
            .collect();

        if queue.is_empty() {
            return Err(ConfigError::NoMatchingScenarios(pattern.to_string()));
        }

        while let Some(scenario) = queue.pop_front() {
            if keep.insert(scenario.id.as_str()) {
                for dependency in &scenario.depends_on {
                    if let Some(dep) = self.scenario(dependency) {
                        queue.push_back(dep);
                    }
                }
            }
        }

        Ok(Self {
            settings: self.settings.clone(),
            profiles: self.profiles.clone(),
            scenarios: self
                .scenarios
                .iter()
                .filter(|s| keep.contains(s.id.as_str()))
                .cloned()
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profiles() -> Vec<AuthProfile> {
        vec![AuthProfile::new("admin", "admin", "password")]
    }

    #[test]
    fn test_static_key_from_literal_param() {
        let scenario = Scenario::new("delete-5", Method::Delete, "/books/{id}")
            .param("id", 5)
            .resource(ResourceKeyExpr::Param("id".to_string()));
        assert_eq!(scenario.static_resource_key().as_deref(), Some("5"));
    }

    #[test]
    fn test_captured_key_is_not_static() {
        let scenario = Scenario::new("read", Method::Get, "/books/{id}")
            .param_from("id", "create", "id")
            .resource(ResourceKeyExpr::Param("id".to_string()));
        assert!(scenario.static_resource_key().is_none());
    }

    #[test]
    fn test_key_string_unquotes_strings() {
        assert_eq!(key_string(&json!("abc")), "abc");
        assert_eq!(key_string(&json!(42)), "42");
    }

    #[test]
    fn test_retry_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before(3), Duration::from_millis(200));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = Suite::new(
            profiles(),
            vec![
                Scenario::new("a", Method::Get, "/books"),
                Scenario::new("a", Method::Get, "/books"),
            ],
        );
        assert!(matches!(result, Err(ConfigError::DuplicateScenario(id)) if id == "a"));
    }

    #[test]
    fn test_unknown_profile_rejected() {
        let result = Suite::new(
            profiles(),
            vec![Scenario::new("a", Method::Get, "/books").auth("root")],
        );
        assert!(matches!(result, Err(ConfigError::UnknownProfile(p)) if p == "root"));
    }

    #[test]
    fn test_capture_without_dependency_rejected() {
        let result = Suite::new(
            profiles(),
            vec![
                Scenario::new("create", Method::Post, "/books").capture("id", "$.id"),
                Scenario::new("read", Method::Get, "/books/{id}").param_from("id", "create", "id"),
            ],
        );
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("without depending")));
    }

    #[test]
    fn test_expect_existence_without_resource_key_rejected() {
        let result = Suite::new(
            profiles(),
            vec![
                Scenario::new("verify", Method::Get, "/books/{id}")
                    .param("id", 5)
                    .expect_existence(Existence::Absent),
            ],
        );
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("needs a resource key")));

        let keyed = Suite::new(
            profiles(),
            vec![
                Scenario::new("verify", Method::Get, "/books/{id}")
                    .param("id", 5)
                    .resource(ResourceKeyExpr::Param("id".to_string()))
                    .expect_existence(Existence::Absent),
            ],
        );
        assert!(keyed.is_ok());
    }

    #[test]
    fn test_unbound_placeholder_rejected_at_load() {
        let result = Suite::new(
            profiles(),
            vec![Scenario::new("read", Method::Get, "/books/{id}")],
        );
        assert!(matches!(result, Err(ConfigError::Template(_))));
    }

    #[test]
    fn test_filter_pulls_in_dependencies() {
        let suite = Suite::new(
            profiles(),
            vec![
                Scenario::new("create", Method::Post, "/books").capture("id", "$.id"),
                Scenario::new("read", Method::Get, "/books/{id}")
                    .param_from("id", "create", "id")
                    .after("create"),
                Scenario::new("list", Method::Get, "/books"),
            ],
        )
        .unwrap();

        let filtered = suite.filter("READ").unwrap();
        let ids: Vec<&str> = filtered.scenarios.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["create", "read"]);

        assert!(matches!(
            suite.filter("nothing"),
            Err(ConfigError::NoMatchingScenarios(_))
        ));
    }
}

//! YAML suite files.
//!
//! The file format is parsed into `Raw*` structs and then converted into
//! validated domain types, so every reference error surfaces as a
//! [`ConfigError`] before anything is sent.
//!
//! ```yaml
//! base_url: http://localhost:8080
//! profiles:
//!   - { name: admin, username: admin, password: password, mode: challenge }
//! scenarios:
//!   - id: create-book
//!     method: POST
//!     path: /books
//!     auth: admin
//!     body: { name: X, author: Y, price: 10.0 }
//!     expect: { status: [201] }
//!     capture: [{ name: id, path: $.id }]
//!     resource: { output: id }
//!   - id: read-book
//!     method: GET
//!     path: /books/{id}
//!     params: { id: { from: create-book, capture: id } }
//!     depends_on: [create-book]
//!     resource: id
//!     expect:
//!       status: [200]
//!       body:
//!         - { path: $.name, op: equal_to, value: X }
//! ```

use crate::error::ConfigError;
use crate::scenario::{
    Capture, ParamSource, ResourceKeyExpr, RetryPolicy, RunSettings, Scenario, Suite, key_string,
};
use quill_proto::{AuthProfile, BodyAssertion, Existence, ExpectedOutcome, Method, Predicate};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSuite {
    base_url: Option<String>,
    parallelism: Option<usize>,
    timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    retry: Option<RawRetry>,
    #[serde(default)]
    profiles: Vec<AuthProfile>,
    scenarios: Vec<RawScenario>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRetry {
    max_attempts: Option<u32>,
    backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawScenario {
    id: String,
    #[serde(default)]
    description: String,
    method: String,
    path: String,
    #[serde(default)]
    params: BTreeMap<String, RawParam>,
    body: Option<Value>,
    auth: Option<String>,
    expect: Option<RawExpect>,
    #[serde(default)]
    depends_on: Vec<String>,
    resource: Option<RawResourceKey>,
    #[serde(default)]
    capture: Vec<RawCapture>,
    expect_existence: Option<Existence>,
    #[serde(default)]
    variants: Vec<RawVariant>,
}

/// One variant of a scenario: same request shape, different inputs.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVariant {
    name: String,
    description: Option<String>,
    auth: Option<String>,
    /// Sends without credentials, overriding the parent's profile.
    #[serde(default)]
    anonymous: bool,
    body: Option<Value>,
    expect: Option<RawExpect>,
    /// Merged over the parent's params.
    #[serde(default)]
    params: BTreeMap<String, RawParam>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawParam {
    Capture { from: String, capture: String },
    Literal(Value),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawResourceKey {
    /// Shorthand for `{ param: <name> }`.
    Param(String),
    Full(RawResourceFields),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawResourceFields {
    param: Option<String>,
    capture: Option<RawCaptureRef>,
    output: Option<String>,
    literal: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCaptureRef {
    from: String,
    capture: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCapture {
    name: String,
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExpect {
    status: StatusCodes,
    #[serde(default)]
    body: Vec<RawAssertion>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum StatusCodes {
    One(u16),
    Many(Vec<u16>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAssertion {
    path: String,
    op: String,
    value: Option<Value>,
    when_status: Option<StatusCodes>,
}

impl StatusCodes {
    fn into_vec(self) -> Vec<u16> {
        match self {
            StatusCodes::One(code) => vec![code],
            StatusCodes::Many(codes) => codes,
        }
    }
}

impl Suite {
    /// Loads and validates a suite file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loading suite");
        Self::from_yaml_str(&content)
    }

    /// Parses and validates a suite from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawSuite = serde_yaml::from_str(content)?;

        let defaults = RunSettings::default();
        let retry_defaults = RetryPolicy::default();
        let settings = RunSettings {
            base_url: raw.base_url,
            parallelism: raw.parallelism.unwrap_or(defaults.parallelism),
            timeout: raw.timeout_ms.map(Duration::from_millis),
            request_timeout: raw
                .request_timeout_ms
                .map_or(defaults.request_timeout, Duration::from_millis),
            retry: raw.retry.map_or(retry_defaults, |r| RetryPolicy {
                max_attempts: r.max_attempts.unwrap_or(retry_defaults.max_attempts),
                backoff: r
                    .backoff_ms
                    .map_or(retry_defaults.backoff, Duration::from_millis),
            }),
        };

        let mut scenarios = Vec::new();
        for entry in raw.scenarios {
            scenarios.extend(expand(entry)?);
        }

        let suite = Suite {
            settings,
            profiles: raw.profiles,
            scenarios,
        };
        suite.validate()?;
        Ok(suite)
    }
}

/// Converts one entry into its base scenario plus one scenario per variant.
fn expand(raw: RawScenario) -> Result<Vec<Scenario>, ConfigError> {
    let method: Method = raw
        .method
        .parse()
        .map_err(|e: String| ConfigError::Invalid(format!("scenario '{}': {e}", raw.id)))?;

    let base = Scenario {
        id: raw.id.clone(),
        description: raw.description,
        method,
        path_template: raw.path,
        path_params: convert_params(raw.params),
        body: raw.body,
        auth: raw.auth,
        expected: convert_expect(&raw.id, raw.expect)?,
        depends_on: raw.depends_on,
        resource_key: raw
            .resource
            .map(|r| convert_resource(&raw.id, r))
            .transpose()?,
        captures: raw
            .capture
            .into_iter()
            .map(|c| Capture {
                name: c.name,
                path: c.path,
            })
            .collect(),
        expect_existence: raw.expect_existence.filter(|e| *e != Existence::Unknown),
    };

    let mut scenarios = Vec::with_capacity(raw.variants.len() + 1);
    for variant in raw.variants {
        scenarios.push(apply_variant(&base, variant)?);
    }
    scenarios.insert(0, base);
    Ok(scenarios)
}

/// Derives `<id>-<variant>` from the base scenario.
///
/// Captures are not inherited: only the base scenario produces values that
/// other scenarios may depend on.
fn apply_variant(base: &Scenario, variant: RawVariant) -> Result<Scenario, ConfigError> {
    let id = format!("{}-{}", base.id, variant.name);
    if variant.anonymous && variant.auth.is_some() {
        return Err(ConfigError::Invalid(format!(
            "variant '{id}' sets both auth and anonymous"
        )));
    }

    let mut scenario = base.clone();
    scenario.id.clone_from(&id);
    scenario.description = variant.description.unwrap_or_else(|| {
        if base.description.is_empty() {
            variant.name.clone()
        } else {
            format!("{} ({})", base.description, variant.name)
        }
    });
    if variant.anonymous {
        scenario.auth = None;
    } else if variant.auth.is_some() {
        scenario.auth = variant.auth;
    }
    if variant.body.is_some() {
        scenario.body = variant.body;
    }
    if let Some(expect) = variant.expect {
        scenario.expected = convert_expect(&id, Some(expect))?;
    }
    scenario.path_params.extend(convert_params(variant.params));
    scenario.captures.clear();
    if matches!(scenario.resource_key, Some(ResourceKeyExpr::Output(_))) {
        scenario.resource_key = None;
        scenario.expect_existence = None;
    }
    Ok(scenario)
}

fn convert_params(raw: BTreeMap<String, RawParam>) -> BTreeMap<String, ParamSource> {
    raw.into_iter()
        .map(|(name, param)| {
            let source = match param {
                RawParam::Capture { from, capture } => ParamSource::Capture { from, capture },
                RawParam::Literal(value) => ParamSource::Literal(value),
            };
            (name, source)
        })
        .collect()
}

fn convert_resource(id: &str, raw: RawResourceKey) -> Result<ResourceKeyExpr, ConfigError> {
    let fields = match raw {
        RawResourceKey::Param(name) => return Ok(ResourceKeyExpr::Param(name)),
        RawResourceKey::Full(fields) => fields,
    };
    let mut exprs = Vec::new();
    if let Some(name) = fields.param {
        exprs.push(ResourceKeyExpr::Param(name));
    }
    if let Some(c) = fields.capture {
        exprs.push(ResourceKeyExpr::Capture {
            from: c.from,
            capture: c.capture,
        });
    }
    if let Some(name) = fields.output {
        exprs.push(ResourceKeyExpr::Output(name));
    }
    if let Some(value) = fields.literal {
        exprs.push(ResourceKeyExpr::Literal(key_string(&value)));
    }
    match exprs.len() {
        1 => Ok(exprs.remove(0)),
        _ => Err(ConfigError::Invalid(format!(
            "scenario '{id}': resource must set exactly one of param, capture, output, literal"
        ))),
    }
}

fn convert_expect(id: &str, raw: Option<RawExpect>) -> Result<ExpectedOutcome, ConfigError> {
    let Some(raw) = raw else {
        return Ok(ExpectedOutcome::status([200]));
    };
    let mut expected = ExpectedOutcome::status(raw.status.into_vec());
    for assertion in raw.body {
        expected = expected.with_assertion(convert_assertion(id, assertion)?);
    }
    Ok(expected)
}

fn convert_assertion(id: &str, raw: RawAssertion) -> Result<BodyAssertion, ConfigError> {
    let needs_value = |op: &str, value: Option<Value>| {
        value.ok_or_else(|| {
            ConfigError::Invalid(format!(
                "scenario '{id}': {op} on '{}' needs a value",
                raw.path
            ))
        })
    };

    let predicate = match raw.op.as_str() {
        "not_empty" | "notEmpty" => Predicate::NotEmpty,
        "empty" => Predicate::Empty,
        "exists" => Predicate::Exists,
        "equal_to" | "equalTo" => Predicate::EqualTo(needs_value("equal_to", raw.value.clone())?),
        "not_equal_to" | "notEqualTo" => {
            Predicate::NotEqualTo(needs_value("not_equal_to", raw.value.clone())?)
        }
        other => {
            return Err(ConfigError::Invalid(format!(
                "scenario '{id}': unknown assertion op '{other}'"
            )));
        }
    };

    let mut assertion = BodyAssertion::new(raw.path.clone(), predicate);
    if let Some(codes) = raw.when_status {
        assertion = assertion.when_status(codes.into_vec());
    }
    Ok(assertion)
}

//! Request Builder: turns a scenario into a concrete request.
//!
//! Path templates use `{name}` placeholders. Each placeholder is bound by a
//! path parameter, either a literal or a value captured by a dependency. In a
//! JSON body, a string consisting solely of `{name}` is replaced by the bound
//! value with its JSON type preserved, so `"id": "{id}"` becomes `"id": 17`.

use crate::error::{ConfigError, TemplateError};
use crate::scenario::{CaptureStore, ParamSource, Scenario, key_string};
use quill_proto::{CONTENT_TYPE, HttpRequest};
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

/// Builds requests against a fixed base URL.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    base_url: Url,
}

impl RequestBuilder {
    /// Parses and validates the base URL.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason,
        };
        let url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }
        if url.cannot_be_a_base() {
            return Err(invalid("not a base url".to_string()));
        }
        Ok(Self { base_url: url })
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds the request for `scenario`, reading captured values from `captures`.
    pub fn build(
        &self,
        scenario: &Scenario,
        captures: &CaptureStore,
    ) -> Result<HttpRequest, TemplateError> {
        let params = resolve_params(scenario, captures)?;
        let rendered = render_path(scenario, &params)?;

        let (path, query) = match rendered.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (rendered, None),
        };

        let mut url = self.base_url.clone();
        let prefix = url.path().trim_end_matches('/').to_string();
        let suffix = if path.is_empty() || path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        url.set_path(&format!("{prefix}{suffix}"));
        url.set_query(query.as_deref());

        let mut request = HttpRequest::new(scenario.method, url.to_string())
            .with_header("Accept", "application/json");

        if let Some(template) = &scenario.body {
            let body = render_body(scenario, template, &params)?;
            request = request
                .with_header(CONTENT_TYPE, "application/json")
                .with_body(body.to_string());
        }

        Ok(request)
    }
}

/// Resolves every path parameter of `scenario` to a concrete value.
pub fn resolve_params(
    scenario: &Scenario,
    captures: &CaptureStore,
) -> Result<BTreeMap<String, Value>, TemplateError> {
    let mut resolved = BTreeMap::new();
    for (name, source) in &scenario.path_params {
        let value = match source {
            ParamSource::Literal(value) => value.clone(),
            ParamSource::Capture { from, capture } => captures
                .get(from)
                .and_then(|outputs| outputs.get(capture))
                .cloned()
                .ok_or_else(|| TemplateError::Unbound {
                    scenario: scenario.id.clone(),
                    placeholder: name.clone(),
                })?,
        };
        resolved.insert(name.clone(), value);
    }
    Ok(resolved)
}

/// Checks that every placeholder in the path and body has a binding.
///
/// Run at load time so an unbound placeholder surfaces as a configuration
/// error instead of a failed scenario.
pub fn check_templates(scenario: &Scenario) -> Result<(), TemplateError> {
    for segment in parse_template(&scenario.id, &scenario.path_template)? {
        if let Segment::Placeholder(name) = segment
            && !scenario.path_params.contains_key(&name)
        {
            return Err(TemplateError::Unbound {
                scenario: scenario.id.clone(),
                placeholder: name,
            });
        }
    }

    if let Some(body) = &scenario.body {
        let mut names = Vec::new();
        body_placeholders(body, &mut names);
        if let Some(name) = names
            .into_iter()
            .find(|n| !scenario.path_params.contains_key(n))
        {
            return Err(TemplateError::Unbound {
                scenario: scenario.id.clone(),
                placeholder: name,
            });
        }
    }

    Ok(())
}

#[derive(Debug, PartialEq)]
enum Segment {
    Text(String),
    Placeholder(String),
}

fn parse_template(scenario: &str, template: &str) -> Result<Vec<Segment>, TemplateError> {
    let malformed = || TemplateError::Malformed {
        scenario: scenario.to_string(),
        template: template.to_string(),
    };

    let mut segments = Vec::new();
    let mut text = String::new();
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') | None => return Err(malformed()),
                        Some(other) => name.push(other),
                    }
                }
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(malformed());
                }
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.push(Segment::Placeholder(name));
            }
            '}' => return Err(malformed()),
            other => text.push(other),
        }
    }

    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    Ok(segments)
}

fn render_path(
    scenario: &Scenario,
    params: &BTreeMap<String, Value>,
) -> Result<String, TemplateError> {
    let mut out = String::new();
    let mut in_query = false;
    for segment in parse_template(&scenario.id, &scenario.path_template)? {
        match segment {
            Segment::Text(text) => {
                in_query |= text.contains('?');
                out.push_str(&text);
            }
            Segment::Placeholder(name) => {
                let value = params.get(&name).ok_or_else(|| TemplateError::Unbound {
                    scenario: scenario.id.clone(),
                    placeholder: name.clone(),
                })?;
                if !matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
                    return Err(TemplateError::NotScalar {
                        scenario: scenario.id.clone(),
                        placeholder: name,
                    });
                }
                let raw = key_string(value);
                out.push_str(&if in_query {
                    encode_query_value(&raw)
                } else {
                    encode_segment(&raw)
                });
            }
        }
    }
    Ok(out)
}

/// Escapes characters that would otherwise split or terminate a path segment.
fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '?' => out.push_str("%3F"),
            '#' => out.push_str("%23"),
            other => out.push(other),
        }
    }
    out
}

/// Like [`encode_segment`], but also escapes the query separators.
fn encode_query_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in encode_segment(raw).chars() {
        match c {
            '&' => out.push_str("%26"),
            '=' => out.push_str("%3D"),
            '+' => out.push_str("%2B"),
            other => out.push(other),
        }
    }
    out
}

/// Returns the placeholder name if `s` is exactly `{name}`.
fn whole_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix('{')?.strip_suffix('}')?;
    let inner = inner.trim();
    if inner.is_empty() || inner.contains(['{', '}']) {
        None
    } else {
        Some(inner)
    }
}

fn body_placeholders(value: &Value, names: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if let Some(name) = whole_placeholder(s) {
                names.push(name.to_string());
            }
        }
        Value::Array(items) => items.iter().for_each(|v| body_placeholders(v, names)),
        Value::Object(map) => map.values().for_each(|v| body_placeholders(v, names)),
        _ => {}
    }
}

fn render_body(
    scenario: &Scenario,
    value: &Value,
    params: &BTreeMap<String, Value>,
) -> Result<Value, TemplateError> {
    Ok(match value {
        Value::String(s) => match whole_placeholder(s) {
            Some(name) => params
                .get(name)
                .cloned()
                .ok_or_else(|| TemplateError::Unbound {
                    scenario: scenario.id.clone(),
                    placeholder: name.to_string(),
                })?,
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_body(scenario, v, params))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, v) in map {
                out.insert(key.clone(), render_body(scenario, v, params)?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}

//! Executes a single scenario: build, authenticate, send, match, capture.
//!
//! The executor never writes shared run state. It hands back what it observed
//! (captures, resource existence) together with its ledger permit, and the
//! scheduler applies both before the permit is released.

use crate::auth::{self, AuthResolver};
use crate::builder::{RequestBuilder, resolve_params};
use crate::diagnostics::DiagnosticsRecorder;
use crate::ledger::{Ledger, LedgerPermit};
use crate::matcher;
use crate::scenario::{CaptureStore, ResourceKeyExpr, RetryPolicy, Scenario, key_string};
use crate::transport::Transport;
use chrono::Utc;
use quill_proto::{
    AuthMode, Exchange, ExecutionResult, Existence, HttpRequest, HttpResponse, Method,
    NetworkError, ScenarioStatus,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// What running one scenario produced.
#[derive(Debug)]
pub struct Execution {
    pub result: ExecutionResult,
    /// Existence to record for a resource key, if the response was definite.
    pub observed: Option<(String, Existence)>,
    /// Held until the scheduler has recorded this execution.
    pub permit: Option<LedgerPermit>,
}

/// Maps a response to the existence it proves, if any.
///
/// A tolerated 500 proves nothing, so only 2xx and 404/410 update the ledger.
pub fn observe_existence(method: Method, status: u16) -> Option<Existence> {
    match status {
        200..=299 if method == Method::Delete => Some(Existence::Absent),
        200..=299 => Some(Existence::Present),
        404 | 410 => Some(Existence::Absent),
        _ => None,
    }
}

/// Sends scenarios through a transport.
pub struct Executor {
    transport: Arc<dyn Transport>,
    builder: RequestBuilder,
    auth: AuthResolver,
    retry: RetryPolicy,
    diagnostics: Arc<DiagnosticsRecorder>,
}

impl Executor {
    pub fn new(
        transport: Arc<dyn Transport>,
        builder: RequestBuilder,
        auth: AuthResolver,
        retry: RetryPolicy,
        diagnostics: Arc<DiagnosticsRecorder>,
    ) -> Self {
        Self {
            transport,
            builder,
            auth,
            retry,
            diagnostics,
        }
    }

    /// Runs `scenario` with the captures of its direct dependencies.
    pub async fn execute(
        &self,
        scenario: &Scenario,
        captures: &CaptureStore,
        ledger: &Arc<Ledger>,
    ) -> Execution {
        let started_at = Utc::now();
        let clock = Instant::now();

        let mut result = ExecutionResult::new(
            &scenario.id,
            &scenario.description,
            ScenarioStatus::Errored,
        );
        result.expected_status = scenario.expected.status_codes.clone();
        result.started_at = Some(started_at);

        let (permit, observed) = self.run(scenario, captures, ledger, &mut result).await;
        result.duration = clock.elapsed();
        Execution {
            result,
            observed,
            permit,
        }
    }

    async fn run(
        &self,
        scenario: &Scenario,
        captures: &CaptureStore,
        ledger: &Arc<Ledger>,
        result: &mut ExecutionResult,
    ) -> (Option<LedgerPermit>, Option<(String, Existence)>) {
        let request = match self.builder.build(scenario, captures) {
            Ok(request) => request,
            Err(e) => {
                result.reasons.push(format!("template resolution failed: {e}"));
                return (None, None);
            }
        };

        let lock_key = match lock_key(scenario, captures) {
            Ok(key) => key,
            Err(reason) => {
                result.reasons.push(reason);
                return (None, None);
            }
        };

        let mut permit = None;
        if let Some(key) = &lock_key {
            result.resource_key = Some(key.clone());
            permit = Some(ledger.acquire(key, &scenario.id).await);

            if let Some(expected) = scenario.expect_existence {
                let known = ledger.existence(key);
                if known != Existence::Unknown && known != expected {
                    let divergence = format!(
                        "ledger divergence: resource {key} expected {expected}, ledger says {known}"
                    );
                    warn!(scenario = %scenario.id, key = %key, %expected, %known, "Ledger divergence");
                    result.divergence = Some(divergence);
                }
            }
        }

        let response = match self.send_authenticated(scenario, request, result).await {
            Ok(response) => response,
            Err(reason) => {
                result.reasons.push(reason);
                return (permit, None);
            }
        };
        result.actual_status = Some(response.status);

        let verdict = matcher::matches(&response, &scenario.expected);
        result.reasons.extend(verdict.reasons);
        result.status = if verdict.ok {
            ScenarioStatus::Passed
        } else {
            ScenarioStatus::Failed
        };

        if verdict.ok {
            self.capture(scenario, &response, result);
        }

        if let Some(divergence) = &result.divergence {
            result.status = ScenarioStatus::Failed;
            result.reasons.push(divergence.clone());
        }

        let observed_key = lock_key.or_else(|| match &scenario.resource_key {
            Some(ResourceKeyExpr::Output(name)) => result.captured.get(name).map(key_string),
            _ => None,
        });
        let observed = observed_key.and_then(|key| {
            result.resource_key = Some(key.clone());
            observe_existence(scenario.method, response.status).map(|e| (key, e))
        });

        (permit, observed)
    }

    /// Extracts declared captures from a passing response.
    fn capture(&self, scenario: &Scenario, response: &HttpResponse, result: &mut ExecutionResult) {
        if scenario.captures.is_empty() {
            return;
        }
        let document = match response.parse_json() {
            Some(Ok(document)) => document,
            _ => {
                result.status = ScenarioStatus::Failed;
                result.reasons.push(format!(
                    "body absent or not JSON, expected {} captures",
                    scenario.captures.len()
                ));
                return;
            }
        };

        for capture in &scenario.captures {
            match matcher::select(&document, &capture.path) {
                Ok(Some(value)) => {
                    debug!(scenario = %scenario.id, capture = %capture.name, %value, "Captured value");
                    result.captured.insert(capture.name.clone(), value);
                }
                Ok(None) => {
                    result.status = ScenarioStatus::Failed;
                    result.reasons.push(format!(
                        "capture {} not found at {}",
                        capture.name, capture.path
                    ));
                }
                Err(e) => {
                    result.status = ScenarioStatus::Failed;
                    result.reasons.push(format!("capture {}: {e}", capture.name));
                }
            }
        }
    }

    /// Sends with the scenario's auth mode applied.
    async fn send_authenticated(
        &self,
        scenario: &Scenario,
        request: HttpRequest,
        result: &mut ExecutionResult,
    ) -> Result<HttpResponse, String> {
        let Some(name) = &scenario.auth else {
            return self.send_with_retry(scenario, &request, result).await;
        };
        let profile = self.auth.resolve(name).map_err(|e| e.to_string())?;

        match profile.mode {
            AuthMode::Preemptive => {
                let request = auth::apply(request, profile);
                self.send_with_retry(scenario, &request, result).await
            }
            AuthMode::Challenge => {
                let first = self.send_with_retry(scenario, &request, result).await?;
                if first.status != 401 {
                    return Ok(first);
                }
                // At most one credentialed resend, even if the server keeps challenging.
                debug!(scenario = %scenario.id, profile = %profile.name, "Challenged, resending with credentials");
                let request = auth::apply(request, profile);
                self.send_with_retry(scenario, &request, result).await
            }
        }
    }

    /// Sends once, or up to `max_attempts` times for idempotent methods
    /// that fail at the network level.
    async fn send_with_retry(
        &self,
        scenario: &Scenario,
        request: &HttpRequest,
        result: &mut ExecutionResult,
    ) -> Result<HttpResponse, String> {
        let max_attempts = if request.method.is_idempotent() {
            self.retry.max_attempts.max(1)
        } else {
            1
        };

        let mut last_error: Option<NetworkError> = None;
        for attempt in 1..=max_attempts {
            let delay = self.retry.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let started_at = Utc::now();
            let clock = Instant::now();
            let outcome = self.transport.send(request).await;
            let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);

            let exchange = Exchange {
                attempt: u32::try_from(result.exchanges.len() + 1).unwrap_or(u32::MAX),
                request: request.redacted(),
                response: outcome.as_ref().ok().cloned(),
                error: outcome.as_ref().err().map(ToString::to_string),
                started_at,
                duration_ms,
            };
            self.diagnostics.record(&scenario.id, &exchange);
            result.exchanges.push(exchange);

            match outcome {
                Ok(response) => {
                    debug!(
                        scenario = %scenario.id,
                        method = %request.method,
                        url = %request.url,
                        status = response.status,
                        duration_ms,
                        "Exchange complete"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    let retrying = e.is_retryable() && attempt < max_attempts;
                    if retrying {
                        warn!(scenario = %scenario.id, attempt, error = %e, "Network error, retrying");
                    }
                    last_error = Some(e);
                    if !retrying {
                        break;
                    }
                }
            }
        }

        let attempts = result.exchanges.len();
        Err(match last_error {
            Some(e) if attempts > 1 => format!("network error after {attempts} attempts: {e}"),
            Some(e) => format!("network error: {e}"),
            None => "no request was sent".to_string(),
        })
    }
}

/// Resolves the key to lock before sending. Output keys are not locked.
fn lock_key(scenario: &Scenario, captures: &CaptureStore) -> Result<Option<String>, String> {
    let Some(expr) = &scenario.resource_key else {
        return Ok(None);
    };
    match expr {
        ResourceKeyExpr::Literal(key) => Ok(Some(key.clone())),
        ResourceKeyExpr::Param(name) => {
            let params = resolve_params(scenario, captures).map_err(|e| e.to_string())?;
            params
                .get(name)
                .map(|v| Some(key_string(v)))
                .ok_or_else(|| format!("resource key parameter '{name}' is unbound"))
        }
        ResourceKeyExpr::Capture { from, capture } => captures
            .get(from)
            .and_then(|c| c.get(capture))
            .map(|v| Some(key_string(v)))
            .ok_or_else(|| format!("resource key capture {from}.{capture} is missing")),
        ResourceKeyExpr::Output(_) => Ok(None),
    }
}

//! Scenario Scheduler: drains a ready queue into a bounded set of workers.
//!
//! A scenario becomes ready once every predecessor (declared dependencies and
//! shared-key ordering edges) has a recorded result. The scheduler is the only
//! writer of results, captures, and ledger existence; it applies a finished
//! scenario's observations before releasing that scenario's ledger permit.
//!
//! # Example
//!
//! ```no_run
//! use quill_core::{ReqwestTransport, Scheduler, SchedulerOptions, Suite};
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let suite = Suite::from_file(Path::new("suites/books.yml"))?;
//! let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(10))?);
//! let options = SchedulerOptions::new("http://localhost:8080").with_parallelism(4);
//!
//! let report = Scheduler::new(suite, transport, options)?.run().await;
//! println!("passed: {}", report.summary.passed);
//! # Ok(())
//! # }
//! ```

use crate::auth::AuthResolver;
use crate::builder::RequestBuilder;
use crate::diagnostics::DiagnosticsRecorder;
use crate::error::ConfigError;
use crate::executor::{Execution, Executor};
use crate::ledger::Ledger;
use crate::plan::Plan;
use crate::scenario::{CaptureStore, RetryPolicy, RunSettings, Suite};
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use quill_proto::{ExecutionResult, ScenarioStatus, duration_serde};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{Id, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressEvent) + Send + Sync>;

/// Events emitted during a run.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The run has started.
    RunStarted { total_scenarios: usize, waves: usize },

    /// A scenario's request is about to be built and sent.
    ScenarioStarted { scenario_id: String, wave: usize },

    /// A scenario reached passed, failed, or errored.
    ScenarioCompleted {
        scenario_id: String,
        status: ScenarioStatus,
        duration: Duration,
        result: ExecutionResult,
    },

    /// A scenario will never run.
    ScenarioSkipped {
        scenario_id: String,
        blocked_by: Option<String>,
        reason: String,
    },

    /// The run has finished.
    RunCompleted { summary: Summary, duration: Duration },
}

/// Counts per terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errored: usize,
}

impl Summary {
    /// Tallies a set of results.
    pub fn from_results(results: &[ExecutionResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.status {
                ScenarioStatus::Passed => summary.passed += 1,
                ScenarioStatus::Failed => summary.failed += 1,
                ScenarioStatus::Skipped => summary.skipped += 1,
                ScenarioStatus::Errored => summary.errored += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.errored
    }

    /// Returns true if any scenario failed or errored.
    pub fn has_failures(&self) -> bool {
        self.failed + self.errored > 0
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub base_url: String,
    pub started_at: DateTime<Utc>,
    /// Results in suite declaration order.
    pub results: Vec<ExecutionResult>,
    pub summary: Summary,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// True if the run-level deadline cut the run short.
    #[serde(default)]
    pub timed_out: bool,
}

impl RunReport {
    /// Process exit code: 0 when nothing failed or errored, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        i32::from(self.summary.has_failures())
    }

    /// Results whose ledger state contradicted their declared expectation.
    pub fn divergences(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results.iter().filter(|r| r.divergence.is_some())
    }

    /// Looks up a result by scenario id.
    pub fn result(&self, scenario_id: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.scenario_id == scenario_id)
    }
}

/// Run-time knobs, usually derived from [`RunSettings`] plus CLI overrides.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub base_url: String,
    pub parallelism: usize,
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
    pub diagnostics: Arc<DiagnosticsRecorder>,
}

impl SchedulerOptions {
    /// Default options against `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let defaults = RunSettings::default();
        Self {
            base_url: base_url.into(),
            parallelism: defaults.parallelism,
            timeout: defaults.timeout,
            retry: defaults.retry,
            diagnostics: Arc::new(DiagnosticsRecorder::disabled()),
        }
    }

    /// Options taken from suite settings. Fails if no base URL is configured.
    pub fn from_settings(settings: &RunSettings) -> Result<Self, ConfigError> {
        let base_url = settings.base_url.clone().ok_or_else(|| {
            ConfigError::Invalid("no base url: set base_url or pass --base-url".to_string())
        })?;
        Ok(Self {
            base_url,
            parallelism: settings.parallelism,
            timeout: settings.timeout,
            retry: settings.retry,
            diagnostics: Arc::new(DiagnosticsRecorder::disabled()),
        })
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticsRecorder) -> Self {
        self.diagnostics = Arc::new(diagnostics);
        self
    }
}

/// Runs a validated suite against one service.
pub struct Scheduler {
    suite: Suite,
    plan: Plan,
    executor: Arc<Executor>,
    options: SchedulerOptions,
    on_progress: Option<ProgressCallback>,
}

impl Scheduler {
    /// Validates the suite and builds the plan. Nothing is sent yet.
    pub fn new(
        suite: Suite,
        transport: Arc<dyn Transport>,
        options: SchedulerOptions,
    ) -> Result<Self, ConfigError> {
        suite.validate()?;
        if options.parallelism == 0 {
            return Err(ConfigError::Invalid(
                "parallelism must be at least 1".to_string(),
            ));
        }
        let plan = Plan::build(&suite)?;
        let builder = RequestBuilder::new(&options.base_url)?;
        let auth = AuthResolver::new(suite.profiles.iter().cloned())?;
        let executor = Executor::new(
            transport,
            builder,
            auth,
            options.retry,
            Arc::clone(&options.diagnostics),
        );

        Ok(Self {
            suite,
            plan,
            executor: Arc::new(executor),
            options,
            on_progress: None,
        })
    }

    /// Sets a callback for progress updates.
    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Returns the execution plan.
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(callback) = &self.on_progress {
            callback(event);
        }
    }

    /// Runs every scenario once. Each call uses a fresh ledger.
    pub async fn run(&self) -> RunReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let deadline = self.options.timeout.map(|t| clock + t);
        let planned = self.plan.scenarios();

        info!(
            scenarios = planned.len(),
            waves = self.plan.waves().len(),
            parallelism = self.options.parallelism,
            base_url = %self.options.base_url,
            "Starting run"
        );
        self.emit(ProgressEvent::RunStarted {
            total_scenarios: planned.len(),
            waves: self.plan.waves().len(),
        });

        let position: HashMap<&str, usize> = planned
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.as_str(), i))
            .collect();
        let mut waiting: Vec<usize> = planned.iter().map(|p| p.predecessors().count()).collect();
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); planned.len()];
        for (i, p) in planned.iter().enumerate() {
            for pred in p.predecessors() {
                if let Some(&j) = position.get(pred) {
                    successors[j].push(i);
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..planned.len()).filter(|&i| waiting[i] == 0).collect();
        let mut results: HashMap<String, ExecutionResult> = HashMap::new();
        let mut captures = CaptureStore::new();
        let ledger = Ledger::new();
        let mut workers: JoinSet<(usize, Execution)> = JoinSet::new();
        let mut running: HashMap<Id, usize> = HashMap::new();
        let mut timed_out = false;

        loop {
            while workers.len() < self.options.parallelism {
                let Some(i) = ready.pop_first() else {
                    break;
                };
                let plan_entry = &planned[i];

                let blocker = plan_entry
                    .depends_on
                    .iter()
                    .find(|d| results.get(d.as_str()).is_none_or(|r| !r.passed()));
                if let Some(blocker) = blocker {
                    let blocker_status = results
                        .get(blocker.as_str())
                        .map_or(ScenarioStatus::Skipped, |r| r.status);
                    let reason = format!("dependency {blocker} {blocker_status}");
                    self.skip(i, Some(blocker.clone()), reason, &mut results);
                    release_successors(i, &successors, &mut waiting, &mut ready);
                    continue;
                }

                let Some(scenario) = self.suite.scenario(&plan_entry.id).cloned() else {
                    continue;
                };
                let visible: CaptureStore = plan_entry
                    .depends_on
                    .iter()
                    .filter_map(|d| captures.get(d).map(|c| (d.clone(), c.clone())))
                    .collect();

                self.emit(ProgressEvent::ScenarioStarted {
                    scenario_id: scenario.id.clone(),
                    wave: plan_entry.wave,
                });
                debug!(scenario = %scenario.id, wave = plan_entry.wave, "Scenario ready");

                let executor = Arc::clone(&self.executor);
                let ledger = Arc::clone(&ledger);
                let handle = workers.spawn(async move {
                    let execution = executor.execute(&scenario, &visible, &ledger).await;
                    (i, execution)
                });
                running.insert(handle.id(), i);
            }

            if workers.is_empty() {
                break;
            }

            let joined = match deadline {
                Some(deadline) => tokio::select! {
                    joined = workers.join_next_with_id() => joined,
                    () = tokio::time::sleep_until(deadline) => {
                        timed_out = true;
                        break;
                    }
                },
                None => workers.join_next_with_id().await,
            };

            match joined {
                Some(Ok((id, (i, execution)))) => {
                    running.remove(&id);
                    self.record(execution, &mut results, &mut captures, &ledger);
                    release_successors(i, &successors, &mut waiting, &mut ready);
                }
                Some(Err(e)) => {
                    let Some(i) = running.remove(&e.id()) else {
                        continue;
                    };
                    let scenario = &planned[i].id;
                    warn!(scenario = %scenario, error = %e, "Scenario task failed");
                    let result = self.errored(scenario, format!("scenario task failed: {e}"));
                    self.complete(result, &mut results);
                    release_successors(i, &successors, &mut waiting, &mut ready);
                }
                None => break,
            }
        }

        if timed_out {
            warn!(in_flight = running.len(), "Run timed out");
            let in_flight = self
                .drain_aborted(&mut workers, running, &mut results, &mut captures, &ledger)
                .await;
            for i in in_flight {
                let result = self.errored(&planned[i].id, "timeout".to_string());
                self.complete(result, &mut results);
            }
            for p in planned {
                if !results.contains_key(&p.id) {
                    let reason = "run timed out before scenario started".to_string();
                    self.skip_id(&p.id, None, reason, &mut results);
                }
            }
        }

        let ordered: Vec<ExecutionResult> = self
            .suite
            .scenarios
            .iter()
            .filter_map(|s| results.remove(&s.id))
            .collect();
        let summary = Summary::from_results(&ordered);
        let duration = clock.elapsed();

        info!(
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            errored = summary.errored,
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "Run complete"
        );
        self.emit(ProgressEvent::RunCompleted { summary, duration });

        RunReport {
            base_url: self.options.base_url.clone(),
            started_at,
            results: ordered,
            summary,
            duration,
            timed_out,
        }
    }

    /// Aborts every worker and waits for each one to settle.
    ///
    /// A task that finished before the abort landed keeps its real verdict.
    /// Returns the plan positions of the tasks that were cancelled, in order.
    async fn drain_aborted(
        &self,
        workers: &mut JoinSet<(usize, Execution)>,
        mut running: HashMap<Id, usize>,
        results: &mut HashMap<String, ExecutionResult>,
        captures: &mut CaptureStore,
        ledger: &Arc<Ledger>,
    ) -> Vec<usize> {
        workers.abort_all();
        // Dropping an aborted future releases its ledger permit.
        while let Some(joined) = workers.join_next_with_id().await {
            match joined {
                Ok((id, (_, execution))) => {
                    running.remove(&id);
                    self.record(execution, results, captures, ledger);
                }
                Err(e) if e.is_panic() => {
                    if let Some(i) = running.remove(&e.id()) {
                        let result = self.errored(
                            &self.plan.scenarios()[i].id,
                            format!("scenario task failed: {e}"),
                        );
                        self.complete(result, results);
                    }
                }
                Err(_) => {}
            }
        }

        let mut in_flight: Vec<usize> = running.into_values().collect();
        in_flight.sort_unstable();
        in_flight
    }

    /// Applies a finished execution, then lets its permit go.
    fn record(
        &self,
        execution: Execution,
        results: &mut HashMap<String, ExecutionResult>,
        captures: &mut CaptureStore,
        ledger: &Arc<Ledger>,
    ) {
        let Execution {
            result,
            observed,
            permit,
        } = execution;

        if result.passed() && !result.captured.is_empty() {
            captures.insert(result.scenario_id.clone(), result.captured.clone());
        }
        if let Some((key, existence)) = observed {
            ledger.record_existence(&key, existence);
        }
        drop(permit);

        self.complete(result, results);
    }

    fn complete(&self, result: ExecutionResult, results: &mut HashMap<String, ExecutionResult>) {
        info!(
            scenario = %result.scenario_id,
            status = %result.status,
            actual_status = ?result.actual_status,
            duration_ms = u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
            "Scenario finished"
        );
        self.options.diagnostics.record_result(&result);
        self.emit(ProgressEvent::ScenarioCompleted {
            scenario_id: result.scenario_id.clone(),
            status: result.status,
            duration: result.duration,
            result: result.clone(),
        });
        results.insert(result.scenario_id.clone(), result);
    }

    fn skip(
        &self,
        i: usize,
        blocked_by: Option<String>,
        reason: String,
        results: &mut HashMap<String, ExecutionResult>,
    ) {
        let id = self.plan.scenarios()[i].id.clone();
        self.skip_id(&id, blocked_by, reason, results);
    }

    fn skip_id(
        &self,
        id: &str,
        blocked_by: Option<String>,
        reason: String,
        results: &mut HashMap<String, ExecutionResult>,
    ) {
        let description = self
            .suite
            .scenario(id)
            .map(|s| s.description.clone())
            .unwrap_or_default();
        info!(scenario = id, blocked_by = ?blocked_by, "Scenario skipped: {reason}");

        let mut result = ExecutionResult::skipped(id, description, blocked_by.clone(), &reason);
        if let Some(scenario) = self.suite.scenario(id) {
            result.expected_status = scenario.expected.status_codes.clone();
        }
        self.options.diagnostics.record_result(&result);
        self.emit(ProgressEvent::ScenarioSkipped {
            scenario_id: id.to_string(),
            blocked_by,
            reason,
        });
        results.insert(id.to_string(), result);
    }

    fn errored(&self, id: &str, reason: String) -> ExecutionResult {
        let mut result = ExecutionResult::errored(
            id,
            self.suite
                .scenario(id)
                .map(|s| s.description.clone())
                .unwrap_or_default(),
            reason,
        );
        if let Some(scenario) = self.suite.scenario(id) {
            result.expected_status = scenario.expected.status_codes.clone();
        }
        result
    }
}

fn release_successors(
    i: usize,
    successors: &[Vec<usize>],
    waiting: &mut [usize],
    ready: &mut BTreeSet<usize>,
) {
    for &next in &successors[i] {
        waiting[next] = waiting[next].saturating_sub(1);
        if waiting[next] == 0 {
            ready.insert(next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{ResourceKeyExpr, Scenario};
    use crate::testing::MockTransport;
    use quill_proto::{AuthProfile, ExpectedOutcome, HttpResponse, Method};
    use serde_json::json;
    use std::sync::Mutex;

    fn scheduler(scenarios: Vec<Scenario>, mock: &MockTransport, parallelism: usize) -> Scheduler {
        let suite = Suite::new(
            vec![AuthProfile::new("admin", "admin", "password")],
            scenarios,
        )
        .unwrap();
        let options = SchedulerOptions::new("http://mock")
            .with_parallelism(parallelism)
            .with_retry(RetryPolicy {
                max_attempts: 1,
                backoff: Duration::ZERO,
            });
        Scheduler::new(suite, Arc::new(mock.clone()), options).unwrap()
    }

    #[tokio::test]
    async fn test_failed_dependency_skips_dependents_transitively() {
        let mock = MockTransport::new();
        mock.on(Method::Post, "/books", HttpResponse::new(500));

        let report = scheduler(
            vec![
                Scenario::new("create", Method::Post, "/books")
                    .expect(ExpectedOutcome::status([201]))
                    .capture("id", "$.id"),
                Scenario::new("read", Method::Get, "/books/{id}")
                    .param_from("id", "create", "id")
                    .after("create"),
                Scenario::new("read-again", Method::Get, "/books")
                    .after("read"),
            ],
            &mock,
            4,
        )
        .run()
        .await;

        assert_eq!(report.result("create").unwrap().status, ScenarioStatus::Failed);
        let read = report.result("read").unwrap();
        assert_eq!(read.status, ScenarioStatus::Skipped);
        assert_eq!(read.blocked_by.as_deref(), Some("create"));
        assert_eq!(
            report.result("read-again").unwrap().blocked_by.as_deref(),
            Some("read")
        );
        assert_eq!(mock.call_count(), 1);
        assert_eq!(report.summary.skipped, 2);
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_dependent_starts_after_dependency_recorded() {
        let mock = MockTransport::new();
        mock.on(Method::Post, "/books", HttpResponse::json(201, &json!({"id": 9})))
            .with_delay(Method::Post, "/books", Duration::from_millis(30));
        mock.on(Method::Get, "/books/9", HttpResponse::json(200, &json!({"id": 9})));

        let report = scheduler(
            vec![
                Scenario::new("create", Method::Post, "/books")
                    .expect(ExpectedOutcome::status([201]))
                    .capture("id", "$.id"),
                Scenario::new("read", Method::Get, "/books/{id}")
                    .param_from("id", "create", "id")
                    .after("create"),
            ],
            &mock,
            4,
        )
        .run()
        .await;

        assert_eq!(report.summary.passed, 2);
        let create = &mock.calls_to(Method::Post, "/books")[0];
        let read = &mock.calls_to(Method::Get, "/books/9")[0];
        assert!(read.started >= create.finished);
    }

    #[tokio::test]
    async fn test_parallelism_bounds_in_flight() {
        let mock = MockTransport::new();
        for n in 0..4 {
            let path = format!("/books/{n}");
            mock.on(Method::Get, &path, HttpResponse::new(200))
                .with_delay(Method::Get, &path, Duration::from_millis(20));
        }
        let scenarios = (0..4)
            .map(|n| Scenario::new(format!("get-{n}"), Method::Get, "/books/{id}").param("id", n))
            .collect();

        let report = scheduler(scenarios, &mock, 1).run().await;
        assert_eq!(report.summary.passed, 4);

        let calls = mock.calls();
        for (a, b) in calls.iter().zip(calls.iter().skip(1)) {
            assert!(!a.overlaps(b));
        }
    }

    #[tokio::test]
    async fn test_timeout_errors_in_flight_and_skips_pending() {
        let mock = MockTransport::new();
        mock.on(Method::Get, "/slow", HttpResponse::new(200))
            .with_delay(Method::Get, "/slow", Duration::from_secs(5));
        mock.on(Method::Get, "/books", HttpResponse::new(200));

        let mut sched = scheduler(
            vec![
                Scenario::new("slow", Method::Get, "/slow")
                    .resource(ResourceKeyExpr::Literal("1".to_string())),
                Scenario::new("after-slow", Method::Get, "/books").after("slow"),
            ],
            &mock,
            2,
        );
        sched.options.timeout = Some(Duration::from_millis(50));

        let report = sched.run().await;
        assert!(report.timed_out);
        let slow = report.result("slow").unwrap();
        assert_eq!(slow.status, ScenarioStatus::Errored);
        assert_eq!(slow.reasons, vec!["timeout".to_string()]);
        assert_eq!(
            report.result("after-slow").unwrap().status,
            ScenarioStatus::Skipped
        );
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_finished_task_keeps_its_verdict_when_the_deadline_fires() {
        let mock = MockTransport::new();
        mock.on(Method::Get, "/books", HttpResponse::new(200));
        let sched = scheduler(
            vec![
                Scenario::new("fast", Method::Get, "/books"),
                Scenario::new("stuck", Method::Get, "/stuck"),
            ],
            &mock,
            2,
        );

        let ledger = Ledger::new();
        let mut workers: JoinSet<(usize, Execution)> = JoinSet::new();
        let mut running = HashMap::new();

        let executor = Arc::clone(&sched.executor);
        let scenario = sched.suite.scenario("fast").cloned().unwrap();
        let task_ledger = Arc::clone(&ledger);
        let fast = workers.spawn(async move {
            let execution = executor
                .execute(&scenario, &CaptureStore::new(), &task_ledger)
                .await;
            (0, execution)
        });
        running.insert(fast.id(), 0);
        let stuck = workers.spawn(std::future::pending::<(usize, Execution)>());
        running.insert(stuck.id(), 1);

        while !fast.is_finished() {
            tokio::task::yield_now().await;
        }

        let mut results = HashMap::new();
        let mut captures = CaptureStore::new();
        let in_flight = sched
            .drain_aborted(&mut workers, running, &mut results, &mut captures, &ledger)
            .await;

        assert_eq!(in_flight, vec![1]);
        assert_eq!(results["fast"].status, ScenarioStatus::Passed);
        assert!(!results.contains_key("stuck"));
        assert!(workers.is_empty());
    }

    #[tokio::test]
    async fn test_progress_events_cover_every_scenario() {
        let mock = MockTransport::new();
        mock.on(Method::Get, "/books", HttpResponse::new(200));
        mock.on(Method::Post, "/books", HttpResponse::new(500));

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let sched = scheduler(
            vec![
                Scenario::new("list", Method::Get, "/books"),
                Scenario::new("create", Method::Post, "/books").expect(ExpectedOutcome::status([201])),
                Scenario::new("after-create", Method::Get, "/books").after("create"),
            ],
            &mock,
            2,
        )
        .on_progress(Box::new(move |event| {
            let label = match event {
                ProgressEvent::RunStarted { .. } => "run-started".to_string(),
                ProgressEvent::ScenarioStarted { scenario_id, .. } => format!("start:{scenario_id}"),
                ProgressEvent::ScenarioCompleted { scenario_id, .. } => format!("done:{scenario_id}"),
                ProgressEvent::ScenarioSkipped { scenario_id, .. } => format!("skip:{scenario_id}"),
                ProgressEvent::RunCompleted { .. } => "run-completed".to_string(),
            };
            sink.lock().unwrap().push(label);
        }));

        sched.run().await;
        let events = events.lock().unwrap();
        assert_eq!(events.first().map(String::as_str), Some("run-started"));
        assert_eq!(events.last().map(String::as_str), Some("run-completed"));
        assert!(events.contains(&"done:list".to_string()));
        assert!(events.contains(&"done:create".to_string()));
        assert!(events.contains(&"skip:after-create".to_string()));
        assert!(!events.contains(&"start:after-create".to_string()));
    }

    #[tokio::test]
    async fn test_missing_base_url_is_config_error() {
        let settings = RunSettings::default();
        assert!(matches!(
            SchedulerOptions::from_settings(&settings),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_results_follow_declaration_order() {
        let mock = MockTransport::new();
        mock.on(Method::Get, "/books", HttpResponse::new(200));
        let report = scheduler(
            vec![
                Scenario::new("b", Method::Get, "/books").after("a"),
                Scenario::new("a", Method::Get, "/books"),
            ],
            &mock,
            2,
        )
        .run()
        .await;

        let ids: Vec<&str> = report.results.iter().map(|r| r.scenario_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}

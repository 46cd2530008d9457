//! # quill-core
//!
//! Contract-test engine for a stateful HTTP resource.
//!
//! A [`Suite`] of declarative scenarios is planned into a dependency DAG,
//! then run by the [`Scheduler`] against a [`Transport`]. Scenarios that touch
//! the same resource key are serialized through the [`Ledger`]; responses are
//! judged by the tolerant [`matcher`]; every exchange is observed by the
//! [`DiagnosticsRecorder`].

pub mod auth;
pub mod builder;
mod config;
pub mod diagnostics;
mod error;
pub mod executor;
pub mod ledger;
pub mod matcher;
pub mod plan;
pub mod scenario;
pub mod scheduler;
pub mod testing;
pub mod transport;

pub use auth::AuthResolver;
pub use builder::RequestBuilder;
pub use diagnostics::DiagnosticsRecorder;
pub use error::{ConfigError, TemplateError};
pub use executor::{Execution, Executor};
pub use ledger::{Ledger, LedgerPermit};
pub use matcher::MatchResult;
pub use plan::{Plan, PlannedScenario};
pub use scenario::{
    Capture, CaptureStore, ParamSource, ResourceKeyExpr, RetryPolicy, RunSettings, Scenario, Suite,
};
pub use scheduler::{
    ProgressCallback, ProgressEvent, RunReport, Scheduler, SchedulerOptions, Summary,
};
pub use transport::{ReqwestTransport, Transport};

pub use quill_proto::{
    AuthMode, AuthProfile, BodyAssertion, ExecutionResult, Existence, ExpectedOutcome,
    HttpRequest, HttpResponse, Method, NetworkError, Predicate, ScenarioStatus,
};

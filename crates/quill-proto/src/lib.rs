//! # quill-proto
//!
//! Shared types for the Quill contract-verification engine.
//!
//! This crate holds the data model every other Quill crate speaks:
//! - HTTP request/response snapshots exchanged with the books service
//! - Authentication profiles
//! - Expected outcomes (tolerant status sets plus body assertions)
//! - Per-scenario execution results and diagnostics

mod auth;
mod error;
mod http;
mod outcome;
mod result;

pub use auth::{AuthMode, AuthProfile};
pub use error::NetworkError;
pub use http::{AUTHORIZATION, CONTENT_TYPE, HttpRequest, HttpResponse, Method};
pub use outcome::{BodyAssertion, ExpectedOutcome, Predicate};
pub use result::{Exchange, ExecutionResult, Existence, ScenarioStatus, duration_serde};

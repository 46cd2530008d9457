//! Configuration and template errors.
//!
//! Everything in this module is fatal: a run that hits one of these aborts
//! before any request is sent.

use std::path::PathBuf;
use thiserror::Error;

/// A placeholder in a path or body template could not be resolved.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    /// `{name}` appears in a template but nothing binds it.
    #[error("scenario '{scenario}': placeholder '{{{placeholder}}}' has no bound value")]
    Unbound {
        scenario: String,
        placeholder: String,
    },

    /// The template has unbalanced braces or an empty placeholder.
    #[error("scenario '{scenario}': malformed template '{template}'")]
    Malformed { scenario: String, template: String },

    /// A bound value is neither a string, a number, nor a boolean.
    #[error("scenario '{scenario}': value for '{placeholder}' cannot be used in a path")]
    NotScalar {
        scenario: String,
        placeholder: String,
    },
}

/// Errors detected while loading or validating a suite.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse suite: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("duplicate scenario id: {0}")]
    DuplicateScenario(String),

    #[error("scenario '{scenario}' depends on unknown scenario '{dependency}'")]
    UnknownDependency { scenario: String, dependency: String },

    #[error("unknown auth profile: {0}")]
    UnknownProfile(String),

    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("invalid base url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("no scenarios matched filter: {0}")]
    NoMatchingScenarios(String),
}

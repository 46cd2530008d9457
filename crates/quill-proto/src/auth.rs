//! Named credential profiles.

use serde::Deserialize;
use std::fmt;

/// How credentials are presented to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Credentials are attached to the first request.
    #[default]
    Preemptive,
    /// The first request is sent anonymously; credentials are attached only
    /// after the server answers 401.
    Challenge,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Preemptive => write!(f, "preemptive"),
            AuthMode::Challenge => write!(f, "challenge"),
        }
    }
}

/// A named role and its basic-auth credentials. Loaded once per run.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct AuthProfile {
    pub name: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub mode: AuthMode,
}

impl AuthProfile {
    /// Creates a preemptive profile.
    pub fn new(
        name: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            username: username.into(),
            password: password.into(),
            mode: AuthMode::Preemptive,
        }
    }

    /// Sets the auth mode.
    pub fn with_mode(mut self, mode: AuthMode) -> Self {
        self.mode = mode;
        self
    }
}

// Passwords never reach logs.
impl fmt::Debug for AuthProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthProfile")
            .field("name", &self.name)
            .field("username", &self.username)
            .field("password", &"***")
            .field("mode", &self.mode)
            .finish()
    }
}

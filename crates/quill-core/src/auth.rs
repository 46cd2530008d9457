//! Auth profile resolution and basic-auth header application.
//!
//! Profiles are loaded once from the suite and never change during a run.
//! The challenge-response flow itself lives in the executor, which is the
//! only place that can observe a 401 and resend.

use crate::error::ConfigError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use quill_proto::{AUTHORIZATION, AuthProfile, HttpRequest};
use std::collections::HashMap;

/// Maps role names ("user", "admin", "invalid") to credentials.
#[derive(Debug, Clone, Default)]
pub struct AuthResolver {
    profiles: HashMap<String, AuthProfile>,
}

impl AuthResolver {
    /// Builds a resolver, rejecting duplicate profile names.
    pub fn new(profiles: impl IntoIterator<Item = AuthProfile>) -> Result<Self, ConfigError> {
        let mut map = HashMap::new();
        for profile in profiles {
            let name = profile.name.clone();
            if map.insert(name.clone(), profile).is_some() {
                return Err(ConfigError::Invalid(format!(
                    "duplicate auth profile: {name}"
                )));
            }
        }
        Ok(Self { profiles: map })
    }

    /// Looks up a profile by name.
    pub fn resolve(&self, name: &str) -> Result<&AuthProfile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
    }

    /// Returns the number of known profiles.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Returns true if no profiles are configured.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Encodes the `Authorization` header value for a profile.
pub fn basic_header(profile: &AuthProfile) -> String {
    let token = STANDARD.encode(format!("{}:{}", profile.username, profile.password));
    format!("Basic {token}")
}

/// Returns the request with the profile's basic-auth header attached.
pub fn apply(request: HttpRequest, profile: &AuthProfile) -> HttpRequest {
    request.with_header(AUTHORIZATION, basic_header(profile))
}

use std::env;
use std::fmt;

use crate::error::DispatchError;

/// Variables consulted, in order, for the API key.
pub const API_KEY_VARS: [&str; 2] = ["GPTKEY", "OPENAI_API_KEY"];

#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(raw: &str) -> Result<Self, DispatchError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DispatchError::AuthenticationUnavailable(
                "API key is empty".to_string(),
            ));
        }
        if trimmed
            .chars()
            .any(|ch| ch.is_whitespace() || ch.is_control() || !ch.is_ascii())
        {
            return Err(DispatchError::AuthenticationUnavailable(
                "API key contains characters that cannot be sent in a header".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

pub trait CredentialSource {
    fn api_key(&self) -> Result<ApiKey, DispatchError>;
}

/// Reads the key from the process environment.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    vars: Vec<String>,
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self {
            vars: API_KEY_VARS.iter().map(|name| name.to_string()).collect(),
        }
    }
}

impl EnvCredentials {
    pub fn new(vars: Vec<String>) -> Self {
        Self { vars }
    }

    fn resolve_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<ApiKey, DispatchError> {
        for name in &self.vars {
            let Some(value) = lookup(name) else {
                continue;
            };
            if value.trim().is_empty() {
                continue;
            }
            return ApiKey::new(&value).map_err(|err| match err {
                DispatchError::AuthenticationUnavailable(reason) => {
                    DispatchError::AuthenticationUnavailable(format!("{name}: {reason}"))
                }
                other => other,
            });
        }
        Err(DispatchError::AuthenticationUnavailable(format!(
            "set {} in the environment or .env",
            self.vars.join(" or ")
        )))
    }
}

impl CredentialSource for EnvCredentials {
    fn api_key(&self) -> Result<ApiKey, DispatchError> {
        self.resolve_with(|name| env::var(name).ok())
    }
}

//! HTTP side of the Modelverse plugin pack: async video jobs, one-shot image
//! generation, and artifact handling.

use std::env;
use std::fmt;
use std::time::Duration;

pub mod artifacts;
pub mod error;
pub mod images;
pub mod jobs;
pub mod transport;

pub use error::{GenerateError, JobError, TransportError};
pub use images::{FetchedImage, FetchedImages, ImageClient};
pub use jobs::{AsyncJobClient, Clock, CompletedJob, PollPolicy, Sleeper, SystemClock, ThreadSleeper};
pub use transport::{HttpTransport, Transport};

pub const DEFAULT_API_BASE: &str = "https://api.modelverse.cn";
pub const API_KEY_ENV: &str = "MODELVERSE_API_KEY";
pub const API_BASE_ENV: &str = "MODELVERSE_API_BASE";

/// API key passed explicitly into each client. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(api_key: impl Into<String>) -> anyhow::Result<Self> {
        let key = api_key.into().trim().to_string();
        if key.is_empty() {
            anyhow::bail!("API key is empty");
        }
        Ok(Self(key))
    }

    /// Uses `explicit` when non-blank, otherwise `MODELVERSE_API_KEY`.
    pub fn resolve(explicit: Option<&str>) -> anyhow::Result<Self> {
        if let Some(key) = explicit.map(str::trim).filter(|value| !value.is_empty()) {
            return Self::new(key);
        }
        match non_empty_env(API_KEY_ENV) {
            Some(key) => Self::new(key),
            None => anyhow::bail!("API key is not set (pass --api-key or set {API_KEY_ENV})"),
        }
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base: String,
    pub request_timeout: Duration,
    pub download_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(180),
            download_timeout: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(base) = non_empty_env(API_BASE_ENV) {
            config.api_base = base;
        }
        config.api_base = config.api_base.trim().trim_end_matches('/').to_string();
        config
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use super::{truncate_text, ClientConfig, Credential};

    #[test]
    fn credential_rejects_blank_and_hides_secret() {
        assert!(Credential::new("   ").is_err());
        let credential = Credential::new(" sk-123 ").unwrap();
        assert_eq!(credential.secret(), "sk-123");
        assert_eq!(format!("{credential:?}"), "Credential(<redacted>)");
    }

    #[test]
    fn explicit_credential_wins_over_env() {
        let credential = Credential::resolve(Some("from-flag")).unwrap();
        assert_eq!(credential.secret(), "from-flag");
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let config = ClientConfig {
            api_base: "http://localhost:9000/".to_string(),
            ..ClientConfig::default()
        };
        assert_eq!(
            config.endpoint("/v1/tasks/submit"),
            "http://localhost:9000/v1/tasks/submit"
        );
    }

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }
}

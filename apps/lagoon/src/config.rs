use std::env;
use std::time::Duration;

use rpc_core::SessionAuth;

const DEFAULT_API_BASE: &str = "https://api.lagoon.dev";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Client configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the aggregation backend.
    pub api_base: String,
    pub api_key: String,
    pub api_secret: String,
    /// Default timeout applied to response-bearing requests.
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let api_base = env::var("LAGOON_API_BASE")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let api_key = env::var("LAGOON_API_KEY").unwrap_or_default();
        let api_secret = env::var("LAGOON_API_SECRET").unwrap_or_default();
        let request_timeout = env::var("LAGOON_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));
        Self {
            api_base,
            api_key,
            api_secret,
            request_timeout,
        }
    }

    /// Application-only credentials; the session id is attached after login.
    pub fn session_auth(&self) -> SessionAuth {
        SessionAuth::app_only(self.api_key.clone(), self.api_secret.clone())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

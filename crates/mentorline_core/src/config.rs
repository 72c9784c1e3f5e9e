//! Client configuration.
//!
//! A `ClientConfig` is built once by the embedding client (CLI flags, Tauri
//! settings, env) and handed to the components that need it. There is no
//! ambient global configuration.

use std::time::Duration;

use url::Url;

/// Environment variable for the REST base URL.
pub const ENV_API_URL: &str = "MENTORLINE_API_URL";
/// Environment variable for the socket URL.
pub const ENV_SOCKET_URL: &str = "MENTORLINE_SOCKET_URL";
/// Environment variable for the session token attached to the socket dial.
pub const ENV_TOKEN: &str = "MENTORLINE_TOKEN";

const DEFAULT_API_URL: &str = "https://api.mentorline.app";
const DEFAULT_SOCKET_URL: &str = "wss://api.mentorline.app/socket";

/// Reconnection policy for the messaging socket.
///
/// A fixed number of attempts with a fixed inter-attempt delay. Once the
/// budget is exhausted the connection is reported unavailable; there is no
/// exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Maximum number of dial attempts before giving up.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(2000),
        }
    }
}

/// Configuration for the messaging client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL (e.g., "https://api.mentorline.app").
    pub api_url: String,
    /// Socket URL (e.g., "wss://api.mentorline.app/socket").
    pub socket_url: String,
    /// Session token attached to the socket dial, if any.
    pub auth_token: Option<String>,
    /// Reconnection policy for the socket.
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    /// Create a configuration with explicit endpoints.
    pub fn new(api_url: impl Into<String>, socket_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            socket_url: socket_url.into(),
            auth_token: None,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Build a configuration from the environment, falling back to the
    /// production endpoints.
    pub fn from_env() -> Self {
        let api_url =
            std::env::var(ENV_API_URL).unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let socket_url =
            std::env::var(ENV_SOCKET_URL).unwrap_or_else(|_| DEFAULT_SOCKET_URL.to_string());
        let mut config = Self::new(api_url, socket_url);
        config.auth_token = std::env::var(ENV_TOKEN).ok();
        config
    }

    /// Set the session token.
    pub fn with_auth(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set the reconnection policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Build the socket URL to dial, with the session token as a query
    /// parameter when present.
    pub fn dial_url(&self) -> Result<String, url::ParseError> {
        let mut url = Url::parse(&self.socket_url)?;
        if let Some(ref token) = self.auth_token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url.to_string())
    }
}

//! CLI configuration: positional URL and flags, with environment fallback

use std::time::Duration;

use tracing::warn;

use crate::websocket_native::DEFAULT_HANDSHAKE_TIMEOUT;
use crate::DEFAULT_WS_URL;

/// Env var overriding the endpoint
pub const ENV_URL: &str = "ECHO_CHAT_WS";
/// Env var overriding the handshake timeout, in seconds
pub const ENV_TIMEOUT_SECS: &str = "ECHO_CHAT_TIMEOUT_SECS";

#[derive(Clone, Debug, PartialEq)]
pub struct ChatConfig {
    pub url: String,
    pub handshake_timeout: Duration,
    /// Print updates as JSON lines instead of a transcript
    pub json: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            json: false,
        }
    }
}

impl ChatConfig {
    /// Build from process arguments (program name already skipped) and env
    pub fn from_args_and_env(args: impl IntoIterator<Item = String>) -> Self {
        Self::resolve(args, |key| std::env::var(key).ok())
    }

    fn resolve(
        args: impl IntoIterator<Item = String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let mut config = Self::default();

        if let Some(url) = env(ENV_URL) {
            config.url = url;
        }
        if let Some(raw) = env(ENV_TIMEOUT_SECS) {
            match raw.parse::<u64>() {
                Ok(secs) => config.handshake_timeout = Duration::from_secs(secs),
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid handshake timeout"),
            }
        }

        for arg in args {
            match arg.as_str() {
                "--json" => config.json = true,
                flag if flag.starts_with("--") => warn!(flag, "Ignoring unknown flag"),
                _ => config.url = arg.clone(),
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let config = ChatConfig::resolve(Vec::new(), |_| None);
        assert_eq!(config, ChatConfig::default());
        assert_eq!(config.url, "wss://echo.websocket.org");
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_env_overrides() {
        let config = ChatConfig::resolve(Vec::new(), |key| match key {
            ENV_URL => Some("ws://localhost:9001".to_string()),
            ENV_TIMEOUT_SECS => Some("7".to_string()),
            _ => None,
        });
        assert_eq!(config.url, "ws://localhost:9001");
        assert_eq!(config.handshake_timeout, Duration::from_secs(7));
    }

    #[test]
    fn test_positional_url_beats_env() {
        let config = ChatConfig::resolve(args(&["ws://arg", "--json"]), |key| {
            (key == ENV_URL).then(|| "ws://env".to_string())
        });
        assert_eq!(config.url, "ws://arg");
        assert!(config.json);
    }

    #[test]
    fn test_bad_timeout_keeps_default() {
        let config = ChatConfig::resolve(Vec::new(), |key| {
            (key == ENV_TIMEOUT_SECS).then(|| "soon".to_string())
        });
        assert_eq!(config.handshake_timeout, DEFAULT_HANDSHAKE_TIMEOUT);
    }
}

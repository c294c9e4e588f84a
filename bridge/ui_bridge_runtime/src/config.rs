use std::path::PathBuf;
use std::time::Duration;

pub const SOCKET_ENV: &str = "UI_BRIDGE_SOCKET";
pub const RENDERER_ENV: &str = "UI_BRIDGE_RENDERER";
pub const ATTACH_ENV: &str = "UI_BRIDGE_ATTACH";
pub const CONNECT_ATTEMPTS_ENV: &str = "UI_BRIDGE_CONNECT_ATTEMPTS";
pub const CONNECT_DELAY_ENV: &str = "UI_BRIDGE_CONNECT_DELAY_MS";

const DEFAULT_CONNECT_ATTEMPTS: u32 = 50;
const DEFAULT_CONNECT_DELAY_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub socket_path: PathBuf,
    pub renderer: Option<PathBuf>,
    /// Connect to a renderer that is already listening instead of spawning one.
    pub attach: bool,
    pub connect_attempts: u32,
    pub retry_delay: Duration,
    pub title: Option<String>,
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let socket_path = lookup(SOCKET_ENV)
            .filter(|raw| !raw.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_socket_path);

        let renderer = lookup(RENDERER_ENV)
            .filter(|raw| !raw.trim().is_empty())
            .map(PathBuf::from);

        let attach = lookup(ATTACH_ENV)
            .map(|raw| parse_flag(&raw))
            .unwrap_or(false);

        let connect_attempts = lookup(CONNECT_ATTEMPTS_ENV)
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_CONNECT_ATTEMPTS);

        let retry_delay = lookup(CONNECT_DELAY_ENV)
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(DEFAULT_CONNECT_DELAY_MS));

        Self {
            socket_path,
            renderer,
            attach,
            connect_attempts,
            retry_delay,
            title: None,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

pub fn default_socket_path() -> PathBuf {
    std::env::temp_dir().join(format!("ui-bridge-{}.sock", std::process::id()))
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> BridgeConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BridgeConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = config_with(&[]);
        assert_eq!(config.connect_attempts, 50);
        assert_eq!(config.retry_delay, Duration::from_millis(100));
        assert!(!config.attach);
        assert!(config.renderer.is_none());
        assert_eq!(config.socket_path, default_socket_path());
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = config_with(&[
            (SOCKET_ENV, "/tmp/custom.sock"),
            (RENDERER_ENV, "/opt/renderer"),
            (ATTACH_ENV, "TRUE"),
            (CONNECT_ATTEMPTS_ENV, "3"),
            (CONNECT_DELAY_ENV, "5"),
        ]);

        assert_eq!(config.socket_path, PathBuf::from("/tmp/custom.sock"));
        assert_eq!(config.renderer, Some(PathBuf::from("/opt/renderer")));
        assert!(config.attach);
        assert_eq!(config.connect_attempts, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(5));
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = config_with(&[
            (SOCKET_ENV, "  "),
            (ATTACH_ENV, "nope"),
            (CONNECT_ATTEMPTS_ENV, "0"),
            (CONNECT_DELAY_ENV, "soon"),
        ]);

        assert_eq!(config.socket_path, default_socket_path());
        assert!(!config.attach);
        assert_eq!(config.connect_attempts, 50);
        assert_eq!(config.retry_delay, Duration::from_millis(100));
    }
}

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MedgoConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub chat_path: String,
    pub path_replay_path: String,
    pub uploads_path: String,
    pub next_actions_path: String,
    pub request_timeout_seconds: u64,
    /// Max lines requested from the path replay endpoint.
    pub replay_max_lines: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            chat_path: "/api/v1/chat/context".to_string(),
            path_replay_path: "/api/v1/langgraph/path".to_string(),
            uploads_path: "/api/knowledge/documents".to_string(),
            next_actions_path: "/api/v1/chat/next_actions".to_string(),
            request_timeout_seconds: 30,
            replay_max_lines: 5000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    pub reusable_session_ttl_minutes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: ".medgo".to_string(),
            reusable_session_ttl_minutes: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollerConfig {
    pub fast_interval_ms: u64,
    pub fast_window_ms: u64,
    pub slow_interval_ms: u64,
    pub max_duration_ms: u64,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    pub max_retries: u32,
    pub page_limit: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            fast_interval_ms: 2_000,
            fast_window_ms: 30_000,
            slow_interval_ms: 5_000,
            max_duration_ms: 5 * 60_000,
            retry_initial_ms: 800,
            retry_max_ms: 8_000,
            max_retries: 3,
            page_limit: 50,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChatConfig {
    /// Upstream history entries sent with each request.
    pub history_limit: usize,
    pub system_prompt: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
    pub suggest_next_actions: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_limit: 20,
            system_prompt: None,
            user_id: None,
            app_id: None,
            suggest_next_actions: true,
        }
    }
}

impl MedgoConfig {
    /// Load from a TOML file, overlaid with `MEDGO__SECTION__KEY` env vars.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("MEDGO").separator("__"))
            .build()?;
        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = MedgoConfig::load("/nonexistent/medgo-config").unwrap();
        assert_eq!(config.poller.fast_interval_ms, 2_000);
        assert_eq!(config.storage.reusable_session_ttl_minutes, 30);
        assert_eq!(config.chat.history_limit, 20);
    }

    #[test]
    fn test_partial_file_overrides_section() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[poller]\nfast_interval_ms = 500\nfast_window_ms = 1000\nslow_interval_ms = 900\n\
             max_duration_ms = 10000\nretry_initial_ms = 100\nretry_max_ms = 400\n\
             max_retries = 2\npage_limit = 10"
        )
        .unwrap();

        let config = MedgoConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.poller.fast_interval_ms, 500);
        assert_eq!(config.poller.max_retries, 2);
        assert_eq!(config.backend.chat_path, "/api/v1/chat/context");
    }
}

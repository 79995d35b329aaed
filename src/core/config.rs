//! Configuration management for the gateway.
//!
//! Configuration is read from a YAML file with `${VAR}` expansion, then
//! selected fields are overridden from the environment.

use crate::services::route_store::Route;
use crate::transformer::Protocol;
use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::OnceLock;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port)
    #[serde(default)]
    pub server: ServerConfig,

    /// Shared key clients must present; `None` disables local auth
    #[serde(default)]
    pub local_api_key: Option<String>,

    /// Try the next candidate route on retryable failures
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,

    /// Redirect keyword settings
    #[serde(default)]
    pub redirect: RedirectConfig,

    /// Whether to verify SSL certificates for upstream requests
    #[serde(default = "default_true")]
    pub verify_ssl: bool,

    /// Upper bound on upstream connection establishment.
    /// The overall request is never timed out.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Usage record file output
    #[serde(default)]
    pub usage_log: UsageLogConfig,

    /// Upstream routes
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// Server-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Redirect keyword configuration.
///
/// When enabled, a request for `keyword` or `keyword:<anything>` is sent to
/// a single pre-selected route instead of going through the model table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_redirect_keyword")]
    pub keyword: String,

    /// Preferred target: a route id
    #[serde(default)]
    pub target_route_id: Option<i64>,

    /// Used when no route id is configured
    #[serde(default)]
    pub target_model: Option<String>,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            keyword: default_redirect_keyword(),
            target_route_id: None,
            target_model: None,
        }
    }
}

/// Per-request routing settings, swapped atomically as a whole.
#[derive(Debug, Clone)]
pub struct RoutingSettings {
    pub fallback_enabled: bool,
    pub redirect: RedirectConfig,
    pub local_api_key: Option<String>,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            fallback_enabled: true,
            redirect: RedirectConfig::default(),
            local_api_key: None,
        }
    }
}

/// Usage log file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLogConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_usage_log_path")]
    pub path: String,

    #[serde(default = "default_usage_buffer")]
    pub buffer_size: usize,
}

impl Default for UsageLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_usage_log_path(),
            buffer_size: default_usage_buffer(),
        }
    }
}

/// Configuration for a single upstream route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub id: i64,

    /// Human-readable name (for logging and metrics)
    pub name: String,

    /// Model name this route advertises
    pub model: String,

    /// Base URL of the upstream API
    pub base_url: String,

    /// Upstream credential; empty forwards the client's Authorization header
    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub group: String,

    /// Wire format spoken by the upstream
    #[serde(default)]
    pub format: Protocol,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RouteConfig {
    /// Materialize a route record, stamping both timestamps with `now`.
    pub fn into_route(self) -> Route {
        let now = Utc::now();
        Route {
            id: self.id,
            name: self.name,
            model: self.model,
            base_url: self.base_url,
            api_key: self.api_key,
            group: self.group,
            format: self.format,
            enabled: self.enabled,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            local_api_key: None,
            fallback_enabled: true,
            redirect: RedirectConfig::default(),
            verify_ssl: true,
            connect_timeout_secs: default_connect_timeout(),
            usage_log: UsageLogConfig::default(),
            routes: vec![],
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    18000
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_redirect_keyword() -> String {
    "proxy_auto".to_string()
}

fn default_usage_log_path() -> String {
    "./logs/usage.jsonl".to_string()
}

fn default_usage_buffer() -> usize {
    1000
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use llm_gateway_rust::core::config::AppConfig;
    ///
    /// let config = AppConfig::load("config.yaml").expect("Failed to load config");
    /// ```
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let mut config = Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from YAML text after expanding environment variables.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config = config::Config::builder()
            .add_source(config::File::from_str(&expanded, config::FileFormat::Yaml))
            .build()?
            .try_deserialize::<AppConfig>()?;
        Ok(config)
    }

    /// Environment variables take precedence over file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }

        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(key) = std::env::var("LOCAL_API_KEY") {
            self.local_api_key = if key.is_empty() { None } else { Some(key) };
        }

        if let Ok(value) = std::env::var("FALLBACK_ENABLED") {
            self.fallback_enabled = str_to_bool(&value);
        }

        if let Ok(value) = std::env::var("VERIFY_SSL") {
            self.verify_ssl = str_to_bool(&value);
        }

        if let Ok(value) = std::env::var("CONNECT_TIMEOUT_SECS") {
            if let Ok(secs) = value.parse::<u64>() {
                self.connect_timeout_secs = secs;
            }
        }

        if let Ok(path) = std::env::var("USAGE_LOG_PATH") {
            self.usage_log.path = path;
            self.usage_log.enabled = true;
        }
    }

    /// Snapshot of the settings consulted on every request.
    pub fn routing_settings(&self) -> RoutingSettings {
        RoutingSettings {
            fallback_enabled: self.fallback_enabled,
            redirect: self.redirect.clone(),
            local_api_key: self.local_api_key.clone(),
        }
    }

    /// Build route records from the configured route list.
    pub fn build_routes(&self) -> Vec<Route> {
        self.routes
            .iter()
            .cloned()
            .map(RouteConfig::into_route)
            .collect()
    }
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([^}:]+)(?::-?([^}]*))?\}").expect("env var pattern is valid")
    })
}

/// Expand environment variables in configuration content.
///
/// Supports patterns: ${VAR}, ${VAR:-default}, ${VAR:default}
fn expand_env_vars(content: &str) -> String {
    env_var_pattern()
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .to_string()
}

/// Convert string to boolean.
///
/// Accepts: "true", "1", "yes", "on" (case-insensitive)
pub fn str_to_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
server:
  host: 127.0.0.1
  port: 8080
local_api_key: sk-local
fallback_enabled: false
redirect:
  enabled: true
  keyword: proxy_auto
  target_route_id: 7
routes:
  - id: 7
    name: claude-main
    model: claude-3
    base_url: https://api.anthropic.com
    api_key: sk-ant
    format: claude
  - id: 8
    name: flash
    model: group/flash-3
    base_url: https://generativelanguage.googleapis.com/
    format: gemini
    enabled: false
"#;

    fn clear_env() {
        for var in [
            "HOST",
            "PORT",
            "LOCAL_API_KEY",
            "FALLBACK_ENABLED",
            "VERIFY_SSL",
            "CONNECT_TIMEOUT_SECS",
            "USAGE_LOG_PATH",
        ] {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_expand_env_vars() {
        unsafe {
            std::env::set_var("GW_TEST_VAR", "test_value");
        }
        let output = expand_env_vars("api_key: ${GW_TEST_VAR}");
        assert_eq!(output, "api_key: test_value");
        unsafe {
            std::env::remove_var("GW_TEST_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        unsafe {
            std::env::remove_var("GW_MISSING_VAR");
        }
        assert_eq!(
            expand_env_vars("api_key: ${GW_MISSING_VAR:-fallback}"),
            "api_key: fallback"
        );
        assert_eq!(
            expand_env_vars("api_key: ${GW_MISSING_VAR:fallback}"),
            "api_key: fallback"
        );
        assert_eq!(expand_env_vars("api_key: ${GW_MISSING_VAR:-}"), "api_key: ");
    }

    #[test]
    fn test_str_to_bool() {
        assert!(str_to_bool("true"));
        assert!(str_to_bool("ON"));
        assert!(str_to_bool("1"));
        assert!(!str_to_bool("off"));
        assert!(!str_to_bool(""));
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_yaml_str("routes: []").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 18000);
        assert!(config.fallback_enabled);
        assert!(config.verify_ssl);
        assert!(!config.redirect.enabled);
        assert_eq!(config.redirect.keyword, "proxy_auto");
        assert_eq!(config.connect_timeout_secs, 10);
        assert!(config.local_api_key.is_none());
    }

    #[test]
    fn test_parse_sample() {
        let config = AppConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.local_api_key.as_deref(), Some("sk-local"));
        assert!(!config.fallback_enabled);
        assert_eq!(config.redirect.target_route_id, Some(7));
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].format, Protocol::Claude);
        assert!(config.routes[0].enabled);
        assert_eq!(config.routes[1].format, Protocol::Gemini);
        assert!(!config.routes[1].enabled);
        assert_eq!(config.routes[1].api_key, "");

        let routes = config.build_routes();
        assert_eq!(routes[0].id, 7);
        assert_eq!(routes[1].model, "group/flash-3");
    }

    #[test]
    #[serial]
    fn test_load_config_from_file_with_env_overrides() {
        clear_env();
        unsafe {
            std::env::set_var("PORT", "9100");
            std::env::set_var("FALLBACK_ENABLED", "yes");
        }

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(SAMPLE.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = AppConfig::load(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.fallback_enabled);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_empty_local_key_env_disables_auth() {
        clear_env();
        unsafe {
            std::env::set_var("LOCAL_API_KEY", "");
        }
        let mut config = AppConfig::from_yaml_str(SAMPLE).unwrap();
        config.apply_env_overrides();
        assert!(config.local_api_key.is_none());
        clear_env();
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(AppConfig::load("nonexistent_file.yaml").is_err());
    }

    #[test]
    fn test_invalid_route_format_rejected() {
        let yaml = r#"
routes:
  - id: 1
    name: bad
    model: m
    base_url: http://localhost
    format: cohere
"#;
        assert!(AppConfig::from_yaml_str(yaml).is_err());
    }
}

use std::path::PathBuf;

use crate::llm::openai::OpenAiConfig;

pub const DEFAULT_GATEWAY_URL: &str = "https://ai.gateway.lovable.dev/v1";
pub const DEFAULT_MODEL: &str = "google/gemini-3-flash-preview";

/// Runtime configuration for the relay server.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:8787"`).
    pub bind_address: String,

    /// SQLite file holding conversations and health profiles.
    pub database_path: PathBuf,

    /// Base URL of the OpenAI-compatible chat-completion gateway.
    pub gateway_url: String,

    /// Bearer key for the gateway. Empty means "not configured".
    pub gateway_key: String,

    /// Model requested from the gateway.
    pub model: String,

    /// Published client key callers must present as `Authorization: Bearer …`.
    /// `None` disables the check.
    pub client_key: Option<String>,

    /// `tracing` filter string, e.g. `"info"` or `"debug,hyper=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8787".to_owned(),
            database_path: PathBuf::from("santra.db"),
            gateway_url: DEFAULT_GATEWAY_URL.to_owned(),
            gateway_key: String::new(),
            model: DEFAULT_MODEL.to_owned(),
            client_key: None,
            log_level: "info".to_owned(),
            log_json: false,
        }
    }
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: env_or("SANTRA_BIND", &defaults.bind_address),
            database_path: std::env::var("SANTRA_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            gateway_url: env_or("SANTRA_GATEWAY_URL", &defaults.gateway_url)
                .trim_end_matches('/')
                .to_owned(),
            gateway_key: non_empty_env("SANTRA_GATEWAY_KEY")
                .or_else(|| non_empty_env("LOVABLE_API_KEY"))
                .unwrap_or_default(),
            model: env_or("SANTRA_MODEL", &defaults.model),
            client_key: non_empty_env("SANTRA_CLIENT_KEY"),
            log_level: env_or("SANTRA_LOG", &defaults.log_level),
            log_json: std::env::var("SANTRA_LOG_JSON")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
        }
    }

    pub fn gateway(&self) -> OpenAiConfig {
        OpenAiConfig {
            api_key: self.gateway_key.clone(),
            base_url: self.gateway_url.clone(),
        }
    }
}

// ── helpers ──

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

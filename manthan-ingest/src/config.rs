//! Service configuration for manthan-ingest
//!
//! Every value is resolved once at startup, in priority order
//! command line → environment → TOML file → built-in default, and the
//! resulting [`ServiceConfig`] is handed to the capability constructors.
//! Nothing reads the environment after startup.

use manthan_common::config::TomlConfig;
use manthan_common::{Error, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Default listen address
pub const DEFAULT_BIND: &str = "127.0.0.1:5730";

/// Default per-call capability timeout
pub const DEFAULT_CAPABILITY_TIMEOUT_SECS: u64 = 60;

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "MANTHAN_ROOT_FOLDER";

/// LLM provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProviderKind {
    #[default]
    Anthropic,
    OpenAi,
}

impl LlmProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProviderKind::Anthropic => "anthropic",
            LlmProviderKind::OpenAi => "openai",
        }
    }
}

impl FromStr for LlmProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(LlmProviderKind::Anthropic),
            "openai" => Ok(LlmProviderKind::OpenAi),
            other => Err(Error::Config(format!(
                "Unknown LLM provider '{}' (expected 'anthropic' or 'openai')",
                other
            ))),
        }
    }
}

/// Values supplied on the command line (already merged with their `env`
/// fallbacks by clap)
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub root_folder: Option<PathBuf>,
    pub bind: Option<String>,
}

/// Resolved configuration, built once in `main`
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub root_folder: PathBuf,
    pub bind: String,
    pub llm_provider: LlmProviderKind,
    /// Provider model override; each provider has its own default
    pub llm_model: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub stability_api_key: Option<String>,
    pub stock_api_key: Option<String>,
    pub canva_api_key: Option<String>,
    /// Upper bound on any single capability call
    pub capability_timeout: Duration,
    /// Start the pipeline as soon as an ingestion is created
    pub auto_start: bool,
}

impl Default for ServiceConfig {
    /// No credentials: every capability runs in degraded mode
    fn default() -> Self {
        Self {
            root_folder: PathBuf::from("."),
            bind: DEFAULT_BIND.to_string(),
            llm_provider: LlmProviderKind::default(),
            llm_model: None,
            anthropic_api_key: None,
            openai_api_key: None,
            stability_api_key: None,
            stock_api_key: None,
            canva_api_key: None,
            capability_timeout: Duration::from_secs(DEFAULT_CAPABILITY_TIMEOUT_SECS),
            auto_start: true,
        }
    }
}

impl ServiceConfig {
    /// Resolve the full configuration from CLI overrides, environment and TOML
    pub fn resolve(cli: &CliOverrides, toml: &TomlConfig) -> Result<Self> {
        let root_folder = manthan_common::config::resolve_root_folder(
            cli.root_folder.as_deref(),
            ROOT_FOLDER_ENV,
            toml,
        );

        let bind = cli
            .bind
            .clone()
            .or_else(|| env_value("MANTHAN_BIND"))
            .or_else(|| toml.bind.clone())
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        let llm_provider = match env_value("MANTHAN_LLM_PROVIDER").or_else(|| toml.llm_provider.clone())
        {
            Some(name) => name.parse()?,
            None => LlmProviderKind::default(),
        };

        let llm_model = env_value("MANTHAN_LLM_MODEL").or_else(|| toml.llm_model.clone());

        let capability_timeout_secs = match env_value("MANTHAN_CAPABILITY_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                Error::Config(format!(
                    "MANTHAN_CAPABILITY_TIMEOUT_SECS must be a whole number of seconds: {}",
                    e
                ))
            })?,
            None => toml
                .capability_timeout_secs
                .unwrap_or(DEFAULT_CAPABILITY_TIMEOUT_SECS),
        };
        if capability_timeout_secs == 0 {
            return Err(Error::Config(
                "capability timeout must be at least one second".to_string(),
            ));
        }

        let config = Self {
            root_folder,
            bind,
            llm_provider,
            llm_model,
            anthropic_api_key: resolve_credential(
                "ANTHROPIC_API_KEY",
                toml.anthropic_api_key.as_deref(),
            ),
            openai_api_key: resolve_credential("OPENAI_API_KEY", toml.openai_api_key.as_deref()),
            stability_api_key: resolve_credential(
                "STABILITY_API_KEY",
                toml.stability_api_key.as_deref(),
            ),
            stock_api_key: resolve_credential("STOCK_API_KEY", toml.stock_api_key.as_deref()),
            canva_api_key: resolve_credential("CANVA_API_KEY", toml.canva_api_key.as_deref()),
            capability_timeout: Duration::from_secs(capability_timeout_secs),
            auto_start: toml.auto_start.unwrap_or(true),
        };

        config.log_summary();
        Ok(config)
    }

    /// Log which capabilities are live; never logs key material
    fn log_summary(&self) {
        let state = |key: &Option<String>| if key.is_some() { "live" } else { "degraded" };
        let llm_key = match self.llm_provider {
            LlmProviderKind::Anthropic => &self.anthropic_api_key,
            LlmProviderKind::OpenAi => &self.openai_api_key,
        };
        info!(
            llm_provider = self.llm_provider.as_str(),
            llm = state(llm_key),
            image_generation = state(&self.stability_api_key),
            stock_search = state(&self.stock_api_key),
            template_render = state(&self.canva_api_key),
            timeout_secs = self.capability_timeout.as_secs(),
            auto_start = self.auto_start,
            "Capability configuration resolved"
        );
    }
}

/// Resolve one credential from environment, then TOML
///
/// Blank values count as absent. A credential present in both sources is
/// reported, and the environment wins.
pub fn resolve_credential(env_var: &str, toml_value: Option<&str>) -> Option<String> {
    let env_key = env_value(env_var).filter(|k| is_valid_key(k));
    let toml_key = toml_value.filter(|k| is_valid_key(k));

    if env_key.is_some() && toml_key.is_some() {
        warn!(
            "{} found in multiple sources: environment, TOML. Using environment (highest priority).",
            env_var
        );
    }

    env_key
        .or_else(|| toml_key.map(str::to_string))
        .map(|k| k.trim().to_string())
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful and friendly chatbot assistant to help ordering burgers using user's preference datas.
Whenever you answer to the user, you should also output the corresponding emotion of your response.
Get to know the user! Ask questions! Be spontaneous!
{user_info}

System Time: {time}";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentConfig {
    pub user_id: String,
    /// `provider/model-name`
    pub model: String,
    pub system_prompt: String,
    pub max_search_results: u32,
    pub recursion_limit: usize,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

/// A `provider/model-name` pair split into its parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelSpec {
    pub provider: LlmProvider,
    pub model: String,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub user_id: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub max_search_results: Option<u32>,
    pub log_level: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

/// Per-invocation configuration map, consulted after the unprefixed
/// environment variables when resolving agent settings for one turn.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InvocationConfig {
    values: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            llm: LlmConfig { api_key: None, base_url: None, timeout_secs: 60, max_retries: 2 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            user_id: "default".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_search_results: 5,
            recursion_limit: 25,
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl LlmProvider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenAi)
    }
}

impl ModelSpec {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let Some((provider, model)) = value.trim().split_once('/') else {
            return Err(ConfigError::Validation(format!(
                "agent.model `{value}` must have the form provider/model-name"
            )));
        };
        if model.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "agent.model `{value}` is missing the model name"
            )));
        }

        Ok(Self { provider: provider.parse()?, model: model.trim().to_string() })
    }
}

impl InvocationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str).filter(|value| !value.trim().is_empty())
    }
}

impl AgentConfig {
    pub fn model_spec(&self) -> Result<ModelSpec, ConfigError> {
        ModelSpec::parse(&self.model)
    }

    /// Settings for a single turn: for each field the uppercased env var
    /// (`USER_ID`, `MODEL`, `SYSTEM_PROMPT`, `MAX_SEARCH_RESULTS`) wins, then
    /// the invocation map, then the loaded value.
    pub fn resolve_for_invocation(
        &self,
        invocation: &InvocationConfig,
    ) -> Result<AgentConfig, ConfigError> {
        let lookup = |field: &str| {
            read_env(&field.to_ascii_uppercase())
                .or_else(|| invocation.get(field).map(str::to_string))
        };

        let mut resolved = self.clone();
        if let Some(value) = lookup("user_id") {
            resolved.user_id = value;
        }
        if let Some(value) = lookup("model") {
            resolved.model = value;
        }
        if let Some(value) = lookup("system_prompt") {
            resolved.system_prompt = value;
        }
        if let Some(value) = lookup("max_search_results") {
            resolved.max_search_results = parse_u32("max_search_results", &value)?;
        }

        validate_agent(&resolved)?;
        Ok(resolved)
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("orderly.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Base URL for the configured model provider, explicit setting first.
    pub fn llm_base_url(&self) -> Result<String, ConfigError> {
        if let Some(base_url) = &self.llm.base_url {
            return Ok(base_url.trim_end_matches('/').to_string());
        }
        Ok(self.agent.model_spec()?.provider.default_base_url().to_string())
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(agent) = patch.agent {
            if let Some(user_id) = agent.user_id {
                self.agent.user_id = user_id;
            }
            if let Some(model) = agent.model {
                self.agent.model = model;
            }
            if let Some(system_prompt) = agent.system_prompt {
                self.agent.system_prompt = system_prompt;
            }
            if let Some(max_search_results) = agent.max_search_results {
                self.agent.max_search_results = max_search_results;
            }
            if let Some(recursion_limit) = agent.recursion_limit {
                self.agent.recursion_limit = recursion_limit;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("ORDERLY_AGENT_USER_ID") {
            self.agent.user_id = value;
        }
        if let Some(value) = read_env("ORDERLY_AGENT_MODEL") {
            self.agent.model = value;
        }
        if let Some(value) = read_env("ORDERLY_AGENT_SYSTEM_PROMPT") {
            self.agent.system_prompt = value;
        }
        if let Some(value) = read_env("ORDERLY_AGENT_MAX_SEARCH_RESULTS") {
            self.agent.max_search_results =
                parse_u32("ORDERLY_AGENT_MAX_SEARCH_RESULTS", &value)?;
        }
        if let Some(value) = read_env("ORDERLY_AGENT_RECURSION_LIMIT") {
            self.agent.recursion_limit = parse_usize("ORDERLY_AGENT_RECURSION_LIMIT", &value)?;
        }

        if let Some(value) = read_env("ORDERLY_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("ORDERLY_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("ORDERLY_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("ORDERLY_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("ORDERLY_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("ORDERLY_LLM_MAX_RETRIES", &value)?;
        }

        let log_level = read_env("ORDERLY_LOGGING_LEVEL").or_else(|| read_env("ORDERLY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("ORDERLY_LOGGING_FORMAT").or_else(|| read_env("ORDERLY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(user_id) = overrides.user_id {
            self.agent.user_id = user_id;
        }
        if let Some(model) = overrides.model {
            self.agent.model = model;
        }
        if let Some(system_prompt) = overrides.system_prompt {
            self.agent.system_prompt = system_prompt;
        }
        if let Some(max_search_results) = overrides.max_search_results {
            self.agent.max_search_results = max_search_results;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_agent(&self.agent)?;
        validate_llm(&self.llm)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("orderly.toml"), PathBuf::from("config/orderly.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.user_id.trim().is_empty() {
        return Err(ConfigError::Validation("agent.user_id must not be empty".to_string()));
    }

    ModelSpec::parse(&agent.model)?;

    if agent.system_prompt.trim().is_empty() {
        return Err(ConfigError::Validation("agent.system_prompt must not be empty".to_string()));
    }

    if agent.max_search_results == 0 {
        return Err(ConfigError::Validation(
            "agent.max_search_results must be greater than zero".to_string(),
        ));
    }

    if agent.recursion_limit == 0 || agent.recursion_limit > 1_000 {
        return Err(ConfigError::Validation(
            "agent.recursion_limit must be in range 1..=1000".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if let Some(api_key) = &llm.api_key {
        if api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation("llm.api_key must not be blank".to_string()));
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    agent: Option<AgentPatch>,
    llm: Option<LlmPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    user_id: Option<String>,
    model: Option<String>,
    system_prompt: Option<String>,
    max_search_results: Option<u32>,
    recursion_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

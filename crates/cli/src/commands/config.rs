use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use orderly_core::config::{AppConfig, InvocationConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };
    let agent = match config.agent.resolve_for_invocation(&InvocationConfig::default()) {
        Ok(agent) => agent,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "agent.user_id",
        &agent.user_id,
        source("agent.user_id", &["USER_ID", "ORDERLY_AGENT_USER_ID"]),
    ));
    lines.push(render_line(
        "agent.model",
        &agent.model,
        source("agent.model", &["MODEL", "ORDERLY_AGENT_MODEL"]),
    ));
    let prompt_summary = agent.system_prompt.lines().next().unwrap_or_default();
    lines.push(render_line(
        "agent.system_prompt",
        &format!("{prompt_summary}... ({} chars)", agent.system_prompt.chars().count()),
        source("agent.system_prompt", &["SYSTEM_PROMPT", "ORDERLY_AGENT_SYSTEM_PROMPT"]),
    ));
    lines.push(render_line(
        "agent.max_search_results",
        &agent.max_search_results.to_string(),
        source(
            "agent.max_search_results",
            &["MAX_SEARCH_RESULTS", "ORDERLY_AGENT_MAX_SEARCH_RESULTS"],
        ),
    ));
    lines.push(render_line(
        "agent.recursion_limit",
        &agent.recursion_limit.to_string(),
        source("agent.recursion_limit", &["ORDERLY_AGENT_RECURSION_LIMIT"]),
    ));

    let base_url = config.llm_base_url().unwrap_or_else(|_| "<invalid model>".to_string());
    lines.push(render_line(
        "llm.base_url",
        &base_url,
        source("llm.base_url", &["ORDERLY_LLM_BASE_URL"]),
    ));
    let llm_api_key = match &config.llm.api_key {
        Some(api_key) => redact_token(api_key.expose_secret()),
        None => "<unset>".to_string(),
    };
    lines.push(render_line(
        "llm.api_key",
        &llm_api_key,
        source("llm.api_key", &["ORDERLY_LLM_API_KEY"]),
    ));
    lines.push(render_line(
        "llm.timeout_secs",
        &config.llm.timeout_secs.to_string(),
        source("llm.timeout_secs", &["ORDERLY_LLM_TIMEOUT_SECS"]),
    ));
    lines.push(render_line(
        "llm.max_retries",
        &config.llm.max_retries.to_string(),
        source("llm.max_retries", &["ORDERLY_LLM_MAX_RETRIES"]),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", &["ORDERLY_LOGGING_LEVEL", "ORDERLY_LOG_LEVEL"]),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", &["ORDERLY_LOGGING_FORMAT", "ORDERLY_LOG_FORMAT"]),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("orderly.toml"), PathBuf::from("config/orderly.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let set_env = env_keys
        .iter()
        .find(|env_key| env::var(env_key).is_ok_and(|value| !value.trim().is_empty()));
    if let Some(env_key) = set_env {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use super::redact_token;

    #[test]
    fn tokens_keep_only_their_prefix() {
        assert_eq!(redact_token("sk-live-abc123"), "sk-***");
        assert_eq!(redact_token("opaque"), "<redacted>");
        assert_eq!(redact_token("  "), "<empty>");
    }
}

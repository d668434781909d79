use lazy_static::lazy_static;
use regex::{Regex, RegexSet};
use url::Url;

use crate::config::Args;
use crate::error::{ApiError, ConfigError};
use crate::metrics::INVALID_INPUT;

pub const MAX_MESSAGE_LEN: usize = 10_000;
pub const MAX_USER_ID_LEN: usize = 100;
pub const DEFAULT_SEARCH_LIMIT: usize = 10;
pub const MAX_SEARCH_LIMIT: usize = 50;

const DENYLIST: &[&str] = &[
    // markup / script injection
    r"(?i)<\s*script\b",
    r"(?i)<\s*/\s*script\s*>",
    r"(?i)javascript\s*:",
    r"(?i)\bon(load|error|click|mouseover)\s*=",
    r"(?i)<\s*iframe\b",
    // prompt injection
    r"(?i)ignore\s+(all\s+)?(the\s+)?(previous|prior|above)\s+instructions",
    r"(?i)disregard\s+(all\s+)?(the\s+)?(previous|prior|above)\s+(instructions|prompts?)",
    r"(?i)reveal\s+(your\s+)?system\s+prompt",
    // template / sql
    r"\{\{.*\}\}",
    r"(?i);\s*drop\s+table\b",
    r"(?i)\bunion\s+select\b",
];

lazy_static! {
    static ref DENYLIST_SET: RegexSet = RegexSet::new(DENYLIST).unwrap();
    static ref USER_ID: Regex = Regex::new(r"^[A-Za-z0-9_.@-]+$").unwrap();
}

fn reject(field: &'static str, reason: &str) -> ApiError {
    INVALID_INPUT.inc();
    tracing::warn!(target: "security", field, reason, "input rejected");
    ApiError::InvalidInput(format!("{} {}", field, reason))
}

// chat message or search query
pub fn sanitize_text(field: &'static str, raw: &str) -> Result<String, ApiError> {
    // the length limit applies to the field as sent
    if raw.chars().count() > MAX_MESSAGE_LEN {
        return Err(reject(field, "is too long"));
    }

    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    if cleaned.is_empty() {
        return Err(reject(field, "cannot be empty"));
    }
    if DENYLIST_SET.is_match(&cleaned) {
        // don't echo which pattern matched
        return Err(reject(field, "contains disallowed content"));
    }
    Ok(cleaned)
}

pub fn sanitize_message(raw: &str) -> Result<String, ApiError> {
    sanitize_text("message", raw)
}

pub fn validate_user_id(raw: &str) -> Result<String, ApiError> {
    let user_id = raw.trim();
    if user_id.is_empty() {
        return Err(reject("user_id", "cannot be empty"));
    }
    if user_id.chars().count() > MAX_USER_ID_LEN {
        return Err(reject("user_id", "is too long"));
    }
    if !USER_ID.is_match(user_id) {
        return Err(reject("user_id", "may only contain letters, digits, '_', '.', '@' and '-'"));
    }
    Ok(user_id.to_string())
}

pub fn validate_search_limit(limit: Option<usize>) -> Result<usize, ApiError> {
    match limit {
        None => Ok(DEFAULT_SEARCH_LIMIT),
        Some(n) if (1..=MAX_SEARCH_LIMIT).contains(&n) => Ok(n),
        Some(_) => Err(reject("limit", "must be between 1 and 50")),
    }
}

fn validate_http_url(name: &'static str, raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid {
            name,
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

// runs before the listener is bound
pub fn validate_environment(args: &Args) -> Result<(), ConfigError> {
    let key = args
        .anthropic_api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or(ConfigError::Missing("ANTHROPIC_API_KEY"))?;
    if !key.starts_with("sk-ant-") || key.len() < 20 {
        return Err(ConfigError::Invalid {
            name: "ANTHROPIC_API_KEY",
            reason: "does not look like an Anthropic API key".to_string(),
        });
    }

    validate_http_url("ANTHROPIC_BASE_URL", &args.anthropic_url)?;
    validate_http_url("OLLAMA_BASE_URL", &args.ollama_url)?;

    if args.rate_limit_per_minute == 0 || args.rate_limit_per_hour == 0 {
        return Err(ConfigError::Invalid {
            name: "RATE_LIMIT_REQUESTS_PER_MINUTE/HOUR",
            reason: "ceilings must be greater than zero".to_string(),
        });
    }
    if args.rate_limit_per_hour < args.rate_limit_per_minute {
        tracing::warn!(
            target: "security",
            per_minute = args.rate_limit_per_minute,
            per_hour = args.rate_limit_per_hour,
            "hourly ceiling is lower than the per-minute ceiling"
        );
    }
    if args.queue_size == 0 {
        return Err(ConfigError::Invalid {
            name: "QUEUE_SIZE",
            reason: "must be greater than zero".to_string(),
        });
    }

    tracing::info!(target: "security", "environment validated");
    Ok(())
}

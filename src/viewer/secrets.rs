//! Secret masking for everything the viewer prints.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

pub const REDACTION: &str = "[REDACTED]";

/// Minimum length for an exact `.env` value to be masked.
const MIN_EXACT_LEN: usize = 8;

struct Patterns {
    tokens: Vec<Regex>,
    env_assignment: Regex,
    json_quoted: Regex,
    json_unquoted: Regex,
    bearer: Regex,
    oauth_url: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).unwrap();
        let secret_key = r"(?:api[_-]?key|access[_-]?token|refresh[_-]?token|secret|password|authorization|auth[_-]?token)";
        Patterns {
            tokens: [
                r"\bsk-ant-[A-Za-z0-9_\-]{16,}\b",
                r"\bsk-(?:live|proj|test)?[A-Za-z0-9_\-]{16,}\b",
                r"\bsk-kimi-[A-Za-z0-9_\-]{8,}\b",
                r"\bAIza[0-9A-Za-z\-_]{20,}\b",
                r"\bgh[pousr]_[A-Za-z0-9]{20,}\b",
                r"\bglpat-[A-Za-z0-9._\-]{20,}\b",
                r"\bhf_[A-Za-z0-9]{20,}\b",
                r"\bAKIA[0-9A-Z]{16}\b",
                r"\bKGAT_[A-Za-z0-9]{20,}\b",
            ]
            .into_iter()
            .map(re)
            .collect(),
            env_assignment: re(
                r#"(?i)\b([A-Z0-9_]*(?:API[_-]?KEY|ACCESS[_-]?KEY|SECRET|TOKEN|PRIVATE[_-]?KEY)[A-Z0-9_]*)(\s*=\s*)(["']?)([^\s"'`;,}]+)"#,
            ),
            json_quoted: re(&format!(
                r#"(?i)("?{secret_key}"?\s*[:=]\s*)(["'])([^"']+)["']"#
            )),
            json_unquoted: re(&format!(
                r#"(?i)("?{secret_key}"?\s*[:=]\s*)([^"'\s,}}\n][^\n,}}]*)"#
            )),
            bearer: re(r"(?i)\bBearer\s+[A-Za-z0-9._\-+/=]{12,}"),
            oauth_url: re(r"oauth2:[^@\s]{8,}@"),
        }
    })
}

/// Masks known credential formats plus exact values loaded from a `.env`.
#[derive(Debug, Clone, Default)]
pub struct SecretMasker {
    /// Longest first, so a secret containing another is masked whole.
    exact: Vec<String>,
}

impl SecretMasker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add exact values from `KEY=value` lines whose name looks secret.
    #[must_use]
    pub fn with_env_file(mut self, path: &Path) -> Self {
        let Ok(raw) = std::fs::read_to_string(path) else {
            return self;
        };
        for line in raw.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line).trim();
            let Some((name, value)) = line.split_once('=') else {
                continue;
            };
            let name = name.trim().to_ascii_uppercase();
            let mut value = value.trim();
            if value.len() >= 2
                && (value.starts_with('"') && value.ends_with('"')
                    || value.starts_with('\'') && value.ends_with('\''))
            {
                value = &value[1..value.len() - 1];
            }
            let secret_name = ["KEY", "TOKEN", "SECRET", "PASSWORD"].iter().any(|t| name.contains(t));
            if secret_name && value.len() >= MIN_EXACT_LEN {
                self.exact.push(value.to_string());
            }
        }
        self.exact.sort_by_key(|s| std::cmp::Reverse(s.len()));
        self.exact.dedup();
        self
    }

    pub fn mask(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        let p = patterns();
        let mut masked = text.to_string();
        for secret in &self.exact {
            if masked.contains(secret.as_str()) {
                masked = masked.replace(secret.as_str(), REDACTION);
            }
        }
        masked = p.oauth_url.replace_all(&masked, "oauth2:[REDACTED]@").into_owned();
        masked = p.bearer.replace_all(&masked, "Bearer [REDACTED]").into_owned();
        masked = p
            .env_assignment
            .replace_all(&masked, "${1}${2}${3}[REDACTED]")
            .into_owned();
        masked = p
            .json_quoted
            .replace_all(&masked, "${1}${2}[REDACTED]${2}")
            .into_owned();
        masked = p.json_unquoted.replace_all(&masked, "${1}[REDACTED]").into_owned();
        for token in &p.tokens {
            masked = token.replace_all(&masked, REDACTION).into_owned();
        }
        masked
    }

    /// Mask every string inside a JSON value.
    pub fn mask_json(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.mask(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.mask_json(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter().map(|(k, v)| (k.clone(), self.mask_json(v))).collect(),
            ),
            other => other.clone(),
        }
    }
}

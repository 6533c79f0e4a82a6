//! 敏感信息脱敏
//! 上游返回的错误信息可能回显令牌，写入存储和日志前先脱敏

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// 错误信息最大保留长度（字符）
pub const MAX_MESSAGE_CHARS: usize = 512;

pub struct Redactor {
    rules: Vec<RedactRule>,
}

#[derive(Clone, Debug)]
pub struct RedactRule {
    pattern: Regex,
    replacement: String,
}

impl RedactRule {
    pub fn new(pattern: Regex, replacement: &str) -> Self {
        Self {
            pattern,
            replacement: replacement.to_string(),
        }
    }
}

impl Redactor {
    pub fn new(rules: Vec<RedactRule>) -> Self {
        Self { rules }
    }

    /// 默认规则：令牌、密钥、Bearer 头、JWT、授权码
    pub fn new_default() -> Self {
        let rule = |pattern: &str, replacement: &str| {
            Regex::new(pattern)
                .ok()
                .map(|re| RedactRule::new(re, replacement))
        };

        Self {
            rules: [
                rule(
                    r"(?i)(access[_-]?token|refresh[_-]?token|id[_-]?token|token)([\s=:]+)[^\s&,]+",
                    "$1$2***",
                ),
                rule(
                    r"(?i)(client[_-]?secret|secret|api[_-]?key|password)([\s=:]+)[^\s&,]+",
                    "$1$2***",
                ),
                rule(r"(?i)(code)(=)[^\s&,]+", "$1$2***"),
                rule(r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+", "Bearer ***"),
                rule(
                    r"eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+",
                    "eyJ***.***.***",
                ),
            ]
            .into_iter()
            .flatten()
            .collect(),
        }
    }

    pub fn redact(&self, input: &str) -> String {
        let mut result = input.to_string();
        for rule in &self.rules {
            result = rule
                .pattern
                .replace_all(&result, rule.replacement.as_str())
                .into_owned();
        }
        result
    }

    /// 脱敏并截断到 `max_chars` 个字符
    pub fn redact_and_truncate(&self, input: &str, max_chars: usize) -> String {
        let redacted = self.redact(input);
        if redacted.chars().count() <= max_chars {
            return redacted;
        }
        let mut truncated: String = redacted.chars().take(max_chars).collect();
        truncated.push_str("...");
        truncated
    }

    pub fn contains_sensitive(&self, input: &str) -> bool {
        self.rules.iter().any(|rule| rule.pattern.is_match(input))
    }
}

static DEFAULT_REDACTOR: Lazy<Arc<Redactor>> = Lazy::new(|| Arc::new(Redactor::new_default()));

pub fn default_redactor() -> Arc<Redactor> {
    Arc::clone(&DEFAULT_REDACTOR)
}

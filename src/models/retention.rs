//! Retention domain models

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 保留模式
///
/// 反序列化经由 `FromStr`，因此 `1day`、`1-week` 等历史写法同样有效。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "retention_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum RetentionMode {
    /// 不落盘（"已发送但不保留"）
    ImmediateDiscard,
    OneDay,
    OneWeek,
    NinetyDays,
    Indefinite,
}

impl RetentionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionMode::ImmediateDiscard => "immediate_discard",
            RetentionMode::OneDay => "one_day",
            RetentionMode::OneWeek => "one_week",
            RetentionMode::NinetyDays => "ninety_days",
            RetentionMode::Indefinite => "indefinite",
        }
    }

    /// 固定时长模式的保留时长
    pub fn duration(&self) -> Option<Duration> {
        match self {
            RetentionMode::OneDay => Some(Duration::days(1)),
            RetentionMode::OneWeek => Some(Duration::days(7)),
            RetentionMode::NinetyDays => Some(Duration::days(90)),
            RetentionMode::ImmediateDiscard | RetentionMode::Indefinite => None,
        }
    }

    /// 以 `now` 为创建时间计算子资源的过期时间
    pub fn expiry_from(&self, now: DateTime<Utc>) -> Expiry {
        match self {
            RetentionMode::ImmediateDiscard => Expiry::Discard,
            RetentionMode::Indefinite => Expiry::Never,
            mode => match mode.duration() {
                Some(d) => Expiry::At(now + d),
                None => Expiry::Never,
            },
        }
    }
}

impl fmt::Display for RetentionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetentionMode {
    type Err = String;

    /// 同时接受历史写法，例如 `1day`、`1-week`、`90day`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "immediate_discard" | "discard" | "none" => Ok(RetentionMode::ImmediateDiscard),
            "one_day" | "1day" | "1_day" | "24h" => Ok(RetentionMode::OneDay),
            "one_week" | "1week" | "1_week" | "7day" | "7_day" | "7days" => {
                Ok(RetentionMode::OneWeek)
            }
            "ninety_days" | "90day" | "90_day" | "90days" | "90_days" => {
                Ok(RetentionMode::NinetyDays)
            }
            "indefinite" | "forever" => Ok(RetentionMode::Indefinite),
            _ => Err(format!("unknown retention mode: {}", s)),
        }
    }
}

impl TryFrom<String> for RetentionMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// 子资源的过期判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// 不持久化
    Discard,
    At(DateTime<Utc>),
    Never,
}

impl Expiry {
    /// 写入存储的 `expires_at` 值；`Discard` 不应写入
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Expiry::At(at) => Some(*at),
            Expiry::Discard | Expiry::Never => None,
        }
    }
}

/// 一次清理的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub resources: u64,
    pub oauth_states: u64,
    pub audit_entries: u64,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.resources + self.oauth_states + self.audit_entries
    }
}

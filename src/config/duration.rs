//! 时长解析
//!
//! 支持整数秒以及 `500ms`、`2s`、`1m30s` 这类带单位的写法

use crate::error::ConfigError;
use regex::Regex;
use std::time::Duration;

/// 小数部分保留的最大位数
const MAX_FRACTION_DIGITS: usize = 9;

/// 解析时长字符串
///
/// # 参数
/// * `value` - 时长字符串，例如 `"1m30s"`、`"250ms"`、`"10"`（纯数字按秒计）
///
/// # 返回
/// * `Result<Duration, ConfigError>` - 解析结果
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration {
        value: value.to_string(),
    };

    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    // 匹配一个 "数值+单位" 片段
    let segment = Regex::new(r"^(\d+(?:\.\d+)?)(ns|us|µs|ms|s|m|h)")
        .map_err(|e| ConfigError::ParseError(format!("正则表达式错误: {}", e)))?;

    let mut rest = trimmed;
    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let captures = segment.captures(rest).ok_or_else(invalid)?;
        let unit_nanos: u128 = match &captures[2] {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60_000_000_000,
            "h" => 3_600_000_000_000,
            _ => return Err(invalid()),
        };
        let (whole, fraction) = captures[1]
            .split_once('.')
            .unwrap_or((&captures[1], ""));
        let whole: u128 = whole.parse().map_err(|_| invalid())?;
        let mut nanos = whole.checked_mul(unit_nanos).ok_or_else(invalid)?;
        if !fraction.is_empty() {
            // 超出纳秒精度的小数位直接截断
            let fraction = &fraction[..fraction.len().min(MAX_FRACTION_DIGITS)];
            let digits = u32::try_from(fraction.len()).map_err(|_| invalid())?;
            let scale = 10u128.checked_pow(digits).ok_or_else(invalid)?;
            let fraction: u128 = fraction.parse().map_err(|_| invalid())?;
            let extra = fraction
                .checked_mul(unit_nanos)
                .and_then(|scaled| scaled.checked_div(scale))
                .ok_or_else(invalid)?;
            nanos = nanos.checked_add(extra).ok_or_else(invalid)?;
        }
        let nanos = u64::try_from(nanos).map_err(|_| invalid())?;
        total = total
            .checked_add(Duration::from_nanos(nanos))
            .ok_or_else(invalid)?;
        rest = &rest[captures[0].len()..];
    }

    Ok(total)
}

/// 将时长格式化为可再次解析的字符串
pub fn format_duration(duration: &Duration) -> String {
    let millis = duration.as_millis();
    if duration.subsec_nanos() % 1_000_000 != 0 {
        format!("{}ns", duration.as_nanos())
    } else if millis % 1000 != 0 {
        format!("{millis}ms")
    } else {
        format!("{}s", duration.as_secs())
    }
}

/// Duration序列化模块，供 `#[serde(with = "...")]` 使用
pub mod serde_duration {
    use super::{format_duration, parse_duration};
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("整数秒或带单位的时长字符串，例如 \"500ms\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
                Ok(Duration::from_secs(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
                u64::try_from(v)
                    .map(Duration::from_secs)
                    .map_err(|_| E::custom(format!("时长不能为负数: {v}")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
                parse_duration(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

//! 配置数据结构定义
//!
//! 定义被监管命令及其健康检测的配置结构体和验证逻辑

use crate::config::duration::serde_duration;
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// 被监管命令的完整配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandConfig {
    /// 可执行文件路径
    pub path: String,
    /// 传递给可执行文件的参数
    #[serde(default)]
    pub args: Vec<String>,
    /// 启动进程后开始检测前的宽限期
    #[serde(default = "default_grace", with = "serde_duration")]
    pub grace: Duration,
    /// 单次检测的最长执行时间
    #[serde(default = "default_timeout", with = "serde_duration")]
    pub timeout: Duration,
    /// 两轮检测之间的间隔
    #[serde(default = "default_interval", with = "serde_duration")]
    pub interval: Duration,
    /// 判定失败前允许的最大失败轮数
    #[serde(default = "default_failures")]
    pub failures: u32,
    /// 是否采集子进程输出
    #[serde(default = "default_capture_output")]
    pub capture_output: bool,
    /// HTTP检测列表
    #[serde(default)]
    pub http: Vec<HttpCheckConfig>,
    /// TCP检测列表
    #[serde(default)]
    pub tcp: Vec<TcpCheckConfig>,
}

/// HTTP检测配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpCheckConfig {
    /// 检测名称
    pub name: String,
    /// 检测URL
    pub url: String,
    /// HTTP方法
    #[serde(default = "default_method")]
    pub method: String,
    /// 期望的状态码列表，为空时接受任意2xx
    #[serde(default)]
    pub expect: Vec<u16>,
    /// 请求体
    pub body: Option<String>,
    /// 请求头
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// TCP检测配置
///
/// 优先使用 `addr`，否则由 `host`（默认 `127.0.0.1`）和 `port` 组成目标地址
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TcpCheckConfig {
    /// 检测名称
    pub name: String,
    /// 完整地址，例如 `127.0.0.1:5432`
    pub addr: Option<String>,
    /// 主机名
    pub host: Option<String>,
    /// 端口
    pub port: Option<u16>,
}

impl TcpCheckConfig {
    /// 解析检测目标地址，缺少端口时返回 `None`
    pub fn target(&self) -> Option<String> {
        if let Some(addr) = &self.addr {
            return Some(addr.clone());
        }
        let host = self.host.as_deref().unwrap_or(DEFAULT_TCP_HOST);
        self.port.map(|port| format!("{host}:{port}"))
    }
}

/// TCP检测的默认主机
pub const DEFAULT_TCP_HOST: &str = "127.0.0.1";

// 默认值函数
fn default_grace() -> Duration {
    Duration::ZERO
}
fn default_timeout() -> Duration {
    Duration::from_secs(1)
}
fn default_interval() -> Duration {
    Duration::from_secs(1)
}
fn default_failures() -> u32 {
    3
}
fn default_capture_output() -> bool {
    true
}
fn default_method() -> String {
    "GET".to_string()
}

/// 支持的HTTP方法
pub const VALID_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH"];

/// 配置验证函数
///
/// # 参数
/// * `config` - 要验证的配置
///
/// # 返回
/// * `Result<(), String>` - 验证结果，错误时返回错误信息
pub fn validate_config(config: &CommandConfig) -> Result<(), String> {
    if config.path.trim().is_empty() {
        return Err("可执行文件路径不能为空".to_string());
    }

    if config.failures == 0 {
        return Err("失败阈值不能为0".to_string());
    }

    if config.timeout.is_zero() {
        return Err("检测超时时间不能为0".to_string());
    }

    for check in &config.http {
        if check.name.trim().is_empty() {
            return Err("HTTP检测名称不能为空".to_string());
        }

        // 验证URL格式
        if !check.url.starts_with("http://") && !check.url.starts_with("https://") {
            return Err(format!("HTTP检测 {} 的URL格式无效", check.name));
        }

        for &code in &check.expect {
            if !(100..=599).contains(&code) {
                return Err(format!("HTTP检测 {} 的状态码 {} 无效", check.name, code));
            }
        }

        if !VALID_METHODS.contains(&check.method.to_uppercase().as_str()) {
            return Err(format!(
                "HTTP检测 {} 的HTTP方法 {} 无效，支持的方法: {:?}",
                check.name, check.method, VALID_METHODS
            ));
        }

        for (key, value) in &check.headers {
            if HeaderName::from_bytes(key.as_bytes()).is_err() {
                return Err(format!("HTTP检测 {} 的请求头名称 {:?} 无效", check.name, key));
            }
            if HeaderValue::from_str(value).is_err() {
                return Err(format!("HTTP检测 {} 的请求头 {} 的值无效", check.name, key));
            }
        }
    }

    for check in &config.tcp {
        if check.name.trim().is_empty() {
            return Err("TCP检测名称不能为空".to_string());
        }

        if check.target().is_none() {
            return Err(format!("TCP检测 {} 必须指定 addr 或 port", check.name));
        }
    }

    Ok(())
}

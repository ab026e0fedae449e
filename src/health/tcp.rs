//! TCP健康检测实现
//!
//! 尝试建立一次TCP连接，连接成功即视为健康

use crate::config::TcpCheckConfig;
use crate::error::{HealthCheckError, Result};
use crate::health::check::{Check, CheckKind};
use crate::health::result::ProbeOutcome;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// TCP健康检测
pub struct TcpCheck {
    config: TcpCheckConfig,
}

impl TcpCheck {
    /// 创建新的TCP检测
    pub fn new(config: TcpCheckConfig) -> Self {
        Self { config }
    }

    /// 解析并校验目标地址，格式必须为 `host:port`
    fn resolve_target(&self) -> Result<String> {
        let invalid = |reason: String| HealthCheckError::InvalidSpec {
            check: self.config.name.clone(),
            reason,
        };

        let target = self
            .config
            .target()
            .ok_or_else(|| invalid("未指定 addr 或 port".to_string()))?;

        let (host, port) = target
            .rsplit_once(':')
            .ok_or_else(|| invalid(format!("地址缺少端口: {target}")))?;
        if host.is_empty() {
            return Err(invalid(format!("地址缺少主机: {target}")).into());
        }
        match port.parse::<u16>() {
            Ok(port) if port != 0 => Ok(target),
            _ => Err(invalid(format!("无效的端口: {target}")).into()),
        }
    }

    /// 格式化连接错误信息
    fn format_connect_error(error: &std::io::Error) -> String {
        match error.kind() {
            ErrorKind::ConnectionRefused => "connection refused".to_string(),
            ErrorKind::ConnectionReset => "connection reset".to_string(),
            ErrorKind::AddrNotAvailable => "address not available".to_string(),
            ErrorKind::TimedOut => "connect timed out".to_string(),
            _ => format!("connect failed: {error}"),
        }
    }
}

#[async_trait]
impl Check for TcpCheck {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> CheckKind {
        CheckKind::Tcp
    }

    fn target(&self) -> String {
        self.config
            .target()
            .unwrap_or_else(|| "<unset>".to_string())
    }

    async fn attempt(&self, timeout_duration: Duration) -> Result<ProbeOutcome> {
        let target = self.resolve_target()?;

        let outcome = match timeout(timeout_duration, TcpStream::connect(target.as_str())).await {
            Ok(Ok(_stream)) => ProbeOutcome::Success,
            Ok(Err(e)) if e.kind() == ErrorKind::TimedOut => ProbeOutcome::TimedOut,
            Ok(Err(e)) => ProbeOutcome::Failure(Self::format_connect_error(&e)),
            Err(_) => ProbeOutcome::TimedOut,
        };

        Ok(outcome)
    }
}

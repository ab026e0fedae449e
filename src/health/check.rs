//! 健康检测能力定义
//!
//! 所有检测类型都提供同一个 `attempt` 操作，由 `CheckSet` 统一聚合

use crate::config::{HttpCheckConfig, TcpCheckConfig};
use crate::error::Result;
use crate::health::http::HttpCheck;
use crate::health::result::ProbeOutcome;
use crate::health::tcp::TcpCheck;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// 检测类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    /// HTTP检测
    Http,
    /// TCP检测
    Tcp,
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckKind::Http => write!(f, "http"),
            CheckKind::Tcp => write!(f, "tcp"),
        }
    }
}

/// 健康检测trait
///
/// 每次 `attempt` 相互独立、不保留状态，可与其他检测并发执行
#[async_trait]
pub trait Check: Send + Sync {
    /// 检测名称
    fn name(&self) -> &str;

    /// 检测类型
    fn kind(&self) -> CheckKind;

    /// 检测目标（URL或地址）
    fn target(&self) -> String;

    /// 执行一次探测
    ///
    /// # 参数
    /// * `timeout` - 本次探测的最长时间，超过时返回 `ProbeOutcome::TimedOut`
    ///
    /// # 返回
    /// * `Result<ProbeOutcome>` - 探测结果；`Err` 仅表示检测定义本身无效
    async fn attempt(&self, timeout: Duration) -> Result<ProbeOutcome>;
}

/// 有序的检测集合：先HTTP检测，后TCP检测，各自保持配置顺序
#[derive(Clone, Default)]
pub struct CheckSet {
    checks: Vec<Arc<dyn Check>>,
}

impl CheckSet {
    /// 由已构建的检测创建集合
    pub fn new(checks: Vec<Arc<dyn Check>>) -> Self {
        Self { checks }
    }

    /// 由配置构建检测集合
    ///
    /// # 参数
    /// * `http` - HTTP检测配置
    /// * `tcp` - TCP检测配置
    ///
    /// # 返回
    /// * `Result<Self>` - 检测集合
    pub fn from_config(http: &[HttpCheckConfig], tcp: &[TcpCheckConfig]) -> Result<Self> {
        let mut checks: Vec<Arc<dyn Check>> = Vec::with_capacity(http.len() + tcp.len());

        for config in http {
            checks.push(Arc::new(HttpCheck::new(config.clone())?));
        }
        for config in tcp {
            checks.push(Arc::new(TcpCheck::new(config.clone())));
        }

        Ok(Self { checks })
    }

    /// 返回全部检测的只读视图
    pub fn all(&self) -> &[Arc<dyn Check>] {
        &self.checks
    }

    /// 检测数量
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

impl std::fmt::Debug for CheckSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(
                self.checks
                    .iter()
                    .map(|check| format!("{} {} ({})", check.kind(), check.name(), check.target())),
            )
            .finish()
    }
}

//! 健康检测结果数据结构
//!
//! 定义单次探测结果、每轮检测结果以及最终就绪判定

use crate::error::VitalsError;
use crate::health::check::CheckKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// 单次探测的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// 探测成功
    Success,
    /// 探测明确失败（例如状态码不符、连接被拒绝）
    Failure(String),
    /// 探测超时
    TimedOut,
}

impl ProbeOutcome {
    /// 判断探测是否成功
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success)
    }

    /// 失败原因，成功时返回 `None`
    pub fn reason(&self) -> Option<String> {
        match self {
            ProbeOutcome::Success => None,
            ProbeOutcome::Failure(reason) => Some(reason.clone()),
            ProbeOutcome::TimedOut => Some("timed out".to_string()),
        }
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeOutcome::Success => write!(f, "成功"),
            ProbeOutcome::Failure(reason) => write!(f, "失败: {reason}"),
            ProbeOutcome::TimedOut => write!(f, "超时"),
        }
    }
}

/// 单个检测的探测记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    /// 检测名称
    pub check_name: String,
    /// 检测类型
    pub kind: CheckKind,
    /// 检测目标（URL或地址）
    pub target: String,
    /// 探测结果
    pub outcome: ProbeOutcome,
    /// 耗时
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    /// 探测时间戳
    pub timestamp: DateTime<Utc>,
}

impl ProbeResult {
    /// 创建新的探测记录
    pub fn new(
        check_name: String,
        kind: CheckKind,
        target: String,
        outcome: ProbeOutcome,
        elapsed: Duration,
    ) -> Self {
        Self {
            check_name,
            kind,
            target,
            outcome,
            elapsed,
            timestamp: Utc::now(),
        }
    }

    /// 带检测名称的失败描述
    pub fn describe_failure(&self) -> Option<String> {
        self.outcome
            .reason()
            .map(|reason| format!("{} {} ({}): {}", self.kind, self.check_name, self.target, reason))
    }
}

/// 一轮检测的汇总结果
///
/// 只有全部检测都成功时本轮才算成功
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResult {
    /// 轮次（从1开始）
    pub cycle: u32,
    /// 各检测的探测记录，顺序与检测集合一致
    pub results: Vec<ProbeResult>,
    /// 本轮耗时
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    /// 本轮开始时间
    pub timestamp: DateTime<Utc>,
}

impl PollResult {
    /// 本轮是否成功
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|result| result.outcome.is_success())
    }

    /// 失败的探测记录
    pub fn failures(&self) -> impl Iterator<Item = &ProbeResult> {
        self.results
            .iter()
            .filter(|result| !result.outcome.is_success())
    }

    /// 本轮超时的检测数
    pub fn timed_out(&self) -> usize {
        self.results
            .iter()
            .filter(|result| result.outcome == ProbeOutcome::TimedOut)
            .count()
    }

    /// 汇总本轮所有失败原因，成功时返回 `None`
    pub fn failure_reason(&self) -> Option<String> {
        let reasons: Vec<String> = self
            .failures()
            .filter_map(ProbeResult::describe_failure)
            .collect();

        if reasons.is_empty() {
            None
        } else {
            Some(reasons.join("; "))
        }
    }
}

/// 一次监管运行的最终判定，每次运行只产生一次
#[derive(Debug)]
pub enum RunOutcome {
    /// 检测全部通过
    Healthy {
        /// 达成判定所用的轮数
        cycles: u32,
    },
    /// 失败轮数达到阈值
    Unhealthy {
        /// 最后一轮的失败原因
        reason: String,
        /// 已执行的轮数
        cycles: u32,
    },
    /// 启动失败或检测配置无效
    Errored(VitalsError),
}

impl RunOutcome {
    /// 判断是否就绪
    pub fn is_healthy(&self) -> bool {
        matches!(self, RunOutcome::Healthy { .. })
    }

    /// 判定类别
    pub fn verdict(&self) -> Verdict {
        match self {
            RunOutcome::Healthy { .. } => Verdict::Healthy,
            RunOutcome::Unhealthy { .. } => Verdict::Unhealthy,
            RunOutcome::Errored(_) => Verdict::Errored,
        }
    }

    /// 已执行的检测轮数
    pub fn cycles(&self) -> u32 {
        match self {
            RunOutcome::Healthy { cycles } | RunOutcome::Unhealthy { cycles, .. } => *cycles,
            RunOutcome::Errored(_) => 0,
        }
    }

    /// 可读的原因描述，就绪时返回 `None`
    pub fn reason(&self) -> Option<String> {
        match self {
            RunOutcome::Healthy { .. } => None,
            RunOutcome::Unhealthy { reason, .. } => Some(reason.clone()),
            RunOutcome::Errored(err) => Some(err.to_string()),
        }
    }

    /// 进程退出码：就绪为0，未就绪为1，出错为2
    pub fn exit_code(&self) -> i32 {
        match self.verdict() {
            Verdict::Healthy => 0,
            Verdict::Unhealthy => 1,
            Verdict::Errored => 2,
        }
    }
}

/// 判定类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// 就绪
    Healthy,
    /// 未就绪
    Unhealthy,
    /// 出错
    Errored,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Healthy => write!(f, "healthy"),
            Verdict::Unhealthy => write!(f, "unhealthy"),
            Verdict::Errored => write!(f, "errored"),
        }
    }
}

/// 一次运行的完整报告
#[derive(Debug)]
pub struct RunReport {
    /// 运行ID
    pub run_id: Uuid,
    /// 最终判定
    pub outcome: RunOutcome,
    /// 各轮检测结果
    pub polls: Vec<PollResult>,
    /// 总耗时
    pub elapsed: Duration,
}

impl RunReport {
    /// 生成可序列化的摘要
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            verdict: self.outcome.verdict(),
            reason: self.outcome.reason(),
            cycles: self.polls.len() as u32,
            elapsed_ms: self.elapsed.as_millis() as u64,
            last_poll: self.polls.last().cloned(),
        }
    }
}

/// 运行摘要，用于CLI输出
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// 运行ID
    pub run_id: Uuid,
    /// 判定类别
    pub verdict: Verdict,
    /// 原因
    pub reason: Option<String>,
    /// 检测轮数
    pub cycles: u32,
    /// 总耗时（毫秒）
    pub elapsed_ms: u64,
    /// 最后一轮检测结果
    pub last_poll: Option<PollResult>,
}

impl RunSummary {
    /// 转换为JSON字符串
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Duration按毫秒序列化
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

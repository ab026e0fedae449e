//! 启动监管器
//!
//! 启动进程，等待宽限期，然后按固定间隔轮询检测集合，直到得出唯一的就绪判定

use crate::config::{validate_config, CommandConfig};
use crate::error::{ConfigError, Result, VitalsError};
use crate::health::check::{Check, CheckSet};
use crate::health::result::{PollResult, ProbeOutcome, ProbeResult, RunOutcome, RunReport};
use crate::process::{LineSink, ProcessRunner, RunningProcess};
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 未就绪或出错时终止进程后等待回收的最长时间
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// 监管器状态
///
/// `Idle → Grace → Polling → {Healthy, Unhealthy, Errored}`，终止状态不再变化
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    /// 尚未开始
    Idle,
    /// 宽限期等待中
    Grace,
    /// 轮询检测中
    Polling,
    /// 已就绪
    Healthy,
    /// 未就绪
    Unhealthy,
    /// 出错
    Errored,
}

impl SupervisorState {
    /// 是否为终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SupervisorState::Healthy | SupervisorState::Unhealthy | SupervisorState::Errored
        )
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Grace => "grace",
            SupervisorState::Polling => "polling",
            SupervisorState::Healthy => "healthy",
            SupervisorState::Unhealthy => "unhealthy",
            SupervisorState::Errored => "errored",
        };
        write!(f, "{name}")
    }
}

/// 失败轮数计数器
///
/// 在整个运行期间累计，不会因部分成功而重置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureCounter {
    count: u32,
    threshold: u32,
}

impl FailureCounter {
    /// 创建计数器
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold,
        }
    }

    /// 记录一轮失败，达到阈值时返回 `true`
    pub fn record_failure(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        self.is_exhausted()
    }

    /// 是否已达到阈值
    pub fn is_exhausted(&self) -> bool {
        self.count >= self.threshold
    }

    /// 当前失败轮数
    pub fn count(&self) -> u32 {
        self.count
    }

    /// 失败阈值
    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

/// 一次监管运行的完整参数，运行开始后不再修改
#[derive(Clone)]
pub struct RunSpec {
    /// 可执行文件路径
    pub path: String,
    /// 参数列表
    pub args: Vec<String>,
    /// 宽限期
    pub grace: Duration,
    /// 单次探测超时
    pub timeout: Duration,
    /// 轮询间隔
    pub interval: Duration,
    /// 失败阈值
    pub failures: u32,
    /// 检测集合
    pub checks: CheckSet,
    /// 输出行回调（可选）
    pub sink: Option<LineSink>,
}

impl RunSpec {
    /// 以默认参数创建运行规格：无宽限期，超时1秒，间隔1秒，失败阈值3
    pub fn new(path: impl Into<String>, args: Vec<String>, checks: CheckSet) -> Self {
        Self {
            path: path.into(),
            args,
            grace: Duration::ZERO,
            timeout: Duration::from_secs(1),
            interval: Duration::from_secs(1),
            failures: 3,
            checks,
            sink: None,
        }
    }

    /// 设置宽限期
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// 设置单次探测超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 设置轮询间隔
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// 设置失败阈值
    pub fn with_failures(mut self, failures: u32) -> Self {
        self.failures = failures;
        self
    }

    /// 设置输出行回调
    pub fn with_sink(mut self, sink: LineSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 由配置构建运行规格
    ///
    /// # 参数
    /// * `config` - 命令配置
    /// * `sink` - 输出行回调；配置关闭 `capture_output` 时被忽略
    ///
    /// # 返回
    /// * `Result<RunSpec>` - 运行规格；配置无效时返回 `ConfigError::ValidationError`
    pub fn from_config(config: &CommandConfig, sink: Option<LineSink>) -> Result<Self> {
        validate_config(config).map_err(ConfigError::ValidationError)?;
        let checks = CheckSet::from_config(&config.http, &config.tcp)?;

        Ok(Self {
            path: config.path.clone(),
            args: config.args.clone(),
            grace: config.grace,
            timeout: config.timeout,
            interval: config.interval,
            failures: config.failures,
            checks,
            sink: if config.capture_output { sink } else { None },
        })
    }

    /// 校验运行参数
    pub fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(ConfigError::ValidationError("可执行文件路径不能为空".to_string()).into());
        }
        if self.failures == 0 {
            return Err(ConfigError::ValidationError("失败阈值必须大于0".to_string()).into());
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ValidationError("检测超时必须大于0".to_string()).into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for RunSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunSpec")
            .field("path", &self.path)
            .field("args", &self.args)
            .field("grace", &self.grace)
            .field("timeout", &self.timeout)
            .field("interval", &self.interval)
            .field("failures", &self.failures)
            .field("checks", &self.checks)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// 一次运行的报告及仍在运行的进程
///
/// 启动失败时 `process` 为 `None`；否则调用方负责回收进程
pub struct SupervisedRun {
    /// 运行报告
    pub report: RunReport,
    /// 被监管的进程
    pub process: Option<RunningProcess>,
}

/// 健康监管器
pub struct HealthSupervisor {
    spec: RunSpec,
    run_id: Uuid,
    state: watch::Sender<SupervisorState>,
}

impl HealthSupervisor {
    /// 创建监管器
    pub fn new(spec: RunSpec) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        Self {
            spec,
            run_id: Uuid::new_v4(),
            state,
        }
    }

    /// 运行ID
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// 运行规格
    pub fn spec(&self) -> &RunSpec {
        &self.spec
    }

    /// 当前状态
    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SupervisorState) {
        let previous = self.state.send_replace(state);
        debug!(run_id = %self.run_id, from = %previous, to = %state, "监管状态变化");
    }

    /// 执行一次完整的监管运行
    ///
    /// 启动进程并开始转发输出，随后进入宽限期和轮询，直到得出判定。
    /// 进程不会被终止，由调用方通过 `SupervisedRun::process` 决定如何回收。
    pub async fn run(&self) -> SupervisedRun {
        let started = Instant::now();

        if let Err(e) = self.spec.validate() {
            error!(run_id = %self.run_id, error = %e, "运行参数无效");
            self.set_state(SupervisorState::Errored);
            return self.finish(RunOutcome::Errored(e), Vec::new(), started, None);
        }

        info!(
            run_id = %self.run_id,
            path = %self.spec.path,
            checks = self.spec.checks.len(),
            "开始监管运行"
        );

        let launched = match ProcessRunner::launch(&self.spec.path, &self.spec.args) {
            Ok(launched) => launched,
            Err(e) => {
                error!(run_id = %self.run_id, error = %e, "进程启动失败");
                self.set_state(SupervisorState::Errored);
                return self.finish(RunOutcome::Errored(e), Vec::new(), started, None);
            }
        };
        let process = launched.forward_output(self.spec.sink.clone());

        let (outcome, polls) = self.poll_until_verdict().await;
        self.finish(outcome, polls, started, Some(process))
    }

    fn finish(
        &self,
        outcome: RunOutcome,
        polls: Vec<PollResult>,
        started: Instant,
        process: Option<RunningProcess>,
    ) -> SupervisedRun {
        let elapsed = started.elapsed();
        match &outcome {
            RunOutcome::Healthy { cycles } => {
                info!(run_id = %self.run_id, cycles, elapsed_ms = elapsed.as_millis() as u64, "进程已就绪")
            }
            RunOutcome::Unhealthy { reason, cycles } => {
                warn!(run_id = %self.run_id, cycles, reason = %reason, "进程未就绪")
            }
            RunOutcome::Errored(e) => error!(run_id = %self.run_id, error = %e, "监管运行出错"),
        }

        SupervisedRun {
            report: RunReport {
                run_id: self.run_id,
                outcome,
                polls,
                elapsed,
            },
            process,
        }
    }

    /// 等待宽限期后轮询检测集合，直到得出判定
    ///
    /// 不启动进程，可单独用于检测已在运行的服务
    ///
    /// # 返回
    /// * `(RunOutcome, Vec<PollResult>)` - 判定结果以及每一轮的检测结果
    pub async fn poll_until_verdict(&self) -> (RunOutcome, Vec<PollResult>) {
        let mut polls = Vec::new();

        if self.spec.failures == 0 {
            self.set_state(SupervisorState::Errored);
            let err = ConfigError::ValidationError("失败阈值必须大于0".to_string());
            return (RunOutcome::Errored(err.into()), polls);
        }

        let mut counter = FailureCounter::new(self.spec.failures);

        self.set_state(SupervisorState::Grace);
        if !self.spec.grace.is_zero() {
            debug!(run_id = %self.run_id, grace_ms = self.spec.grace.as_millis() as u64, "等待宽限期");
            sleep(self.spec.grace).await;
        }

        self.set_state(SupervisorState::Polling);
        let mut cycle: u32 = 0;
        loop {
            cycle += 1;
            let poll = match self.poll_once(cycle).await {
                Ok(poll) => poll,
                Err(e) => {
                    self.set_state(SupervisorState::Errored);
                    return (RunOutcome::Errored(e), polls);
                }
            };

            let success = poll.is_success();
            let reason = poll.failure_reason();
            polls.push(poll);

            if success {
                self.set_state(SupervisorState::Healthy);
                return (RunOutcome::Healthy { cycles: cycle }, polls);
            }

            let reason = reason.unwrap_or_default();
            let exhausted = counter.record_failure();
            warn!(
                run_id = %self.run_id,
                cycle,
                failures = counter.count(),
                threshold = counter.threshold(),
                reason = %reason,
                "检测未通过"
            );

            if exhausted {
                self.set_state(SupervisorState::Unhealthy);
                return (
                    RunOutcome::Unhealthy {
                        reason,
                        cycles: cycle,
                    },
                    polls,
                );
            }

            if !self.spec.interval.is_zero() {
                sleep(self.spec.interval).await;
            }
        }
    }

    /// 执行一轮检测，所有检测并发执行
    ///
    /// # 参数
    /// * `cycle` - 轮次
    ///
    /// # 返回
    /// * `Result<PollResult>` - 本轮结果；任一检测定义无效时返回错误
    pub async fn poll_once(&self, cycle: u32) -> Result<PollResult> {
        let started = Instant::now();
        let timestamp = Utc::now();

        let attempts = self
            .spec
            .checks
            .all()
            .iter()
            .map(|check| Self::attempt_check(check.as_ref(), self.spec.timeout));
        let results = join_all(attempts)
            .await
            .into_iter()
            .collect::<Result<Vec<ProbeResult>>>()?;

        let poll = PollResult {
            cycle,
            results,
            elapsed: started.elapsed(),
            timestamp,
        };
        debug!(
            run_id = %self.run_id,
            cycle,
            success = poll.is_success(),
            elapsed_ms = poll.elapsed.as_millis() as u64,
            "检测轮次完成"
        );
        Ok(poll)
    }

    /// 执行单个检测，外层超时保证检测实现不遵守超时时也不会阻塞
    async fn attempt_check(check: &dyn Check, timeout_duration: Duration) -> Result<ProbeResult> {
        let started = Instant::now();
        let outcome = match timeout(timeout_duration, check.attempt(timeout_duration)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(check = %check.name(), error = %e, "检测定义无效");
                return Err(e);
            }
            Err(_) => ProbeOutcome::TimedOut,
        };

        Ok(ProbeResult::new(
            check.name().to_string(),
            check.kind(),
            check.target(),
            outcome,
            started.elapsed(),
        ))
    }
}

/// 执行一次监管运行并返回判定
///
/// 就绪时进程继续运行，输出转发任务随之在后台运行；
/// 未就绪或出错时终止进程并等待回收。
pub async fn supervise(spec: RunSpec) -> RunOutcome {
    let supervisor = HealthSupervisor::new(spec);
    let SupervisedRun { report, process } = supervisor.run().await;

    if let Some(process) = process {
        if report.outcome.is_healthy() {
            debug!(pid = ?process.pid(), "进程保持运行");
        } else {
            reclaim(process).await;
        }
    }

    report.outcome
}

/// 同步版本的 `supervise`，内部创建独立的tokio运行时
///
/// 不能在已有的tokio运行时中调用。就绪时进程继续运行，
/// 但函数返回后不再转发其输出。
pub fn supervise_blocking(spec: RunSpec) -> RunOutcome {
    match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime.block_on(supervise(spec)),
        Err(e) => RunOutcome::Errored(VitalsError::Io(e)),
    }
}

/// 终止进程并在限定时间内等待回收
pub async fn reclaim(process: RunningProcess) {
    let pid = process.pid();
    match timeout(SHUTDOWN_TIMEOUT, process.shutdown()).await {
        Ok(Ok(status)) => debug!(pid = ?pid, status = %status, "进程已回收"),
        Ok(Err(e)) => warn!(pid = ?pid, error = %e, "回收进程失败"),
        Err(_) => warn!(pid = ?pid, "等待进程退出超时"),
    }
}

//! 进程启动与退出监控
//!
//! 启动被监管的可执行文件，交出其输出流，并在后台等待进程退出

use crate::error::{Result, VitalsError};
use crate::process::forwarder::{ForwardStats, LineSink, LogForwarder, StreamKind};
use std::future::Future;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// 进程退出后等待输出流读完的最长时间
///
/// 孙进程继承了输出管道时流不会结束，超时后放弃转发
pub const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 已启动的进程：两个输出流加一个退出信号
pub struct LaunchedProcess {
    /// 标准输出流
    pub stdout: ChildStdout,
    /// 标准错误流
    pub stderr: ChildStderr,
    /// 退出信号
    pub exit: ExitSignal,
}

impl LaunchedProcess {
    /// 启动两个输出转发任务，返回可回收的运行中进程
    pub fn forward_output(self, sink: Option<LineSink>) -> RunningProcess {
        let forwarders = vec![
            LogForwarder::spawn(self.stdout, StreamKind::Stdout, sink.clone()),
            LogForwarder::spawn(self.stderr, StreamKind::Stderr, sink),
        ];

        RunningProcess {
            exit: self.exit,
            forwarders,
        }
    }
}

/// 进程退出信号
///
/// 后台任务持有子进程并等待其退出。丢弃该信号不会终止进程。
pub struct ExitSignal {
    pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
    handle: JoinHandle<std::io::Result<ExitStatus>>,
}

impl ExitSignal {
    /// 进程ID
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// 进程是否已退出
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// 请求终止进程，重复调用无效果
    pub fn terminate(&mut self) {
        if let Some(kill) = self.kill.take() {
            // 接收端已结束说明进程已经退出
            let _ = kill.send(());
        }
    }

    /// 等待进程退出并返回退出状态
    pub async fn wait(self) -> Result<ExitStatus> {
        match self.handle.await {
            Ok(status) => Ok(status?),
            Err(e) => Err(VitalsError::Other(anyhow::anyhow!("等待进程退出失败: {}", e))),
        }
    }
}

/// 正在运行的进程及其输出转发任务
pub struct RunningProcess {
    /// 退出信号
    pub exit: ExitSignal,
    forwarders: Vec<JoinHandle<ForwardStats>>,
}

impl RunningProcess {
    /// 进程ID
    pub fn pid(&self) -> Option<u32> {
        self.exit.pid()
    }

    /// 请求终止进程
    pub fn terminate(&mut self) {
        self.exit.terminate();
    }

    /// 等待进程退出，并在 [`OUTPUT_DRAIN_TIMEOUT`] 内等待输出转发任务读完剩余输出
    pub async fn wait(self) -> Result<ExitStatus> {
        let pid = self.exit.pid();
        let status = self.exit.wait().await?;
        let mut forwarders = self.forwarders;

        let drained = timeout(OUTPUT_DRAIN_TIMEOUT, async {
            for forwarder in forwarders.iter_mut() {
                if let Err(e) = forwarder.await {
                    debug!(error = %e, "输出转发任务异常结束");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(pid = ?pid, "进程已退出但输出流仍未关闭，停止转发");
            for forwarder in &forwarders {
                forwarder.abort();
            }
        }
        Ok(status)
    }

    /// 终止进程并等待回收
    pub async fn shutdown(mut self) -> Result<ExitStatus> {
        self.terminate();
        self.wait().await
    }

    /// 等待进程退出；`shutdown` 先完成时终止进程
    pub async fn wait_until<F>(mut self, shutdown: F) -> Result<ExitStatus>
    where
        F: Future<Output = ()>,
    {
        let kill = self.exit.kill.take();
        let wait = self.wait();
        tokio::pin!(wait);

        tokio::select! {
            status = &mut wait => status,
            _ = shutdown => {
                if let Some(kill) = kill {
                    let _ = kill.send(());
                }
                wait.await
            }
        }
    }
}

/// 进程启动器
pub struct ProcessRunner;

impl ProcessRunner {
    /// 启动进程
    ///
    /// # 参数
    /// * `path` - 可执行文件路径
    /// * `args` - 参数列表
    ///
    /// # 返回
    /// * `Result<LaunchedProcess>` - 启动成功的进程；可执行文件不存在、
    ///   无执行权限或系统拒绝创建进程时返回 `VitalsError::Launch`
    pub fn launch(path: &str, args: &[String]) -> Result<LaunchedProcess> {
        let mut child = Command::new(path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| VitalsError::Launch {
                path: path.to_string(),
                source,
            })?;

        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VitalsError::Other(anyhow::anyhow!("无法获取子进程stdout")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| VitalsError::Other(anyhow::anyhow!("无法获取子进程stderr")))?;

        info!(path = %path, pid = ?pid, "进程已启动");

        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        let program = path.to_string();
        let handle = tokio::spawn(async move {
            let mut kill_requested = false;
            let finished = tokio::select! {
                status = child.wait() => Some(status),
                // 发送端被丢弃时 signal 为 Err，此时不终止进程
                signal = &mut kill_rx => {
                    kill_requested = signal.is_ok();
                    None
                }
            };

            let status = match finished {
                Some(status) => status,
                None => {
                    if kill_requested {
                        debug!(path = %program, "终止进程");
                        if let Err(e) = child.start_kill() {
                            warn!(path = %program, error = %e, "发送终止信号失败");
                        }
                    }
                    child.wait().await
                }
            };

            match &status {
                Ok(status) => info!(path = %program, status = %status, "进程已退出"),
                Err(e) => warn!(path = %program, error = %e, "等待进程退出失败"),
            }
            status
        });

        Ok(LaunchedProcess {
            stdout,
            stderr,
            exit: ExitSignal {
                pid,
                kill: Some(kill_tx),
                handle,
            },
        })
    }
}

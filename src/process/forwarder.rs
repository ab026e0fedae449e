//! 子进程输出转发
//!
//! 按行读取 stdout/stderr 并交给调用方提供的回调

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::debug;

/// 单行最大字节数，超出部分作为下一行继续转发
pub const MAX_LINE_BYTES: u64 = 64 * 1024;

/// 行回调类型，可能被 stdout 和 stderr 两个任务同时调用
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

/// 输出流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// 标准输出
    Stdout,
    /// 标准错误
    Stderr,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// 单个输出流的转发统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    /// 转发的行数
    pub lines: u64,
    /// 读取的字节数
    pub bytes: u64,
    /// 是否因读取错误提前结束
    pub read_error: bool,
}

/// 输出流转发器
pub struct LogForwarder;

impl LogForwarder {
    /// 启动一个转发任务
    ///
    /// 未提供回调时仍会读空输出流，避免子进程因管道写满而阻塞。
    /// 读取错误只会结束当前任务，不会向上传播。
    ///
    /// # 参数
    /// * `stream` - 输出流
    /// * `kind` - 输出流类型
    /// * `sink` - 行回调（可选）
    ///
    /// # 返回
    /// * `JoinHandle<ForwardStats>` - 任务句柄，流结束时返回统计信息
    pub fn spawn<R>(stream: R, kind: StreamKind, sink: Option<LineSink>) -> JoinHandle<ForwardStats>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let stats = match sink {
                Some(sink) => Self::forward(stream, &*sink).await,
                None => Self::drain(stream).await,
            };
            debug!(
                stream = %kind,
                lines = stats.lines,
                bytes = stats.bytes,
                read_error = stats.read_error,
                "输出流转发结束"
            );
            stats
        })
    }

    /// 逐行读取并调用回调
    ///
    /// 行按 `\n` 切分，去掉行尾 `\r`，非UTF-8内容做有损替换。
    /// 超过 [`MAX_LINE_BYTES`] 的行会被拆成多段，缓冲区不会无限增长。
    pub async fn forward<R>(stream: R, sink: &(dyn Fn(&str) + Send + Sync)) -> ForwardStats
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        let mut stats = ForwardStats::default();

        loop {
            buf.clear();
            match (&mut reader)
                .take(MAX_LINE_BYTES)
                .read_until(b'\n', &mut buf)
                .await
            {
                Ok(0) => break,
                Ok(n) => {
                    stats.bytes += n as u64;
                    let mut line = buf.as_slice();
                    if let Some(stripped) = line.strip_suffix(b"\n") {
                        line = stripped;
                    }
                    if let Some(stripped) = line.strip_suffix(b"\r") {
                        line = stripped;
                    }
                    sink(&*String::from_utf8_lossy(line));
                    stats.lines += 1;
                }
                Err(e) => {
                    debug!(error = %e, "读取输出流失败");
                    stats.read_error = true;
                    break;
                }
            }
        }

        stats
    }

    /// 丢弃全部输出
    async fn drain<R>(mut stream: R) -> ForwardStats
    where
        R: AsyncRead + Unpin,
    {
        match tokio::io::copy(&mut stream, &mut tokio::io::sink()).await {
            Ok(bytes) => ForwardStats {
                bytes,
                ..Default::default()
            },
            Err(e) => {
                debug!(error = %e, "读取输出流失败");
                ForwardStats {
                    read_error: true,
                    ..Default::default()
                }
            }
        }
    }
}

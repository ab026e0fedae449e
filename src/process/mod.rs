//! 进程管理模块
//!
//! 提供被监管进程的启动、退出监控和输出转发功能

pub mod forwarder;
pub mod runner;

// 重新导出主要类型
pub use forwarder::{ForwardStats, LineSink, LogForwarder, StreamKind};
pub use runner::{ExitSignal, LaunchedProcess, ProcessRunner, RunningProcess};

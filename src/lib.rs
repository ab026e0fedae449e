//! Launch Vitals - 进程启动就绪监管工具
//!
//! 启动一个外部进程，在宽限期之后按固定间隔执行健康检测，
//! 得出唯一的就绪判定，支持：
//! - HTTP/TCP健康检测
//! - 失败阈值与单次探测超时
//! - 子进程输出逐行转发
//! - TOML/JSON配置与环境变量替换
//! - 结构化日志记录

pub mod cli;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod process;

// 重新导出主要类型
pub use config::{CommandConfig, HttpCheckConfig, TcpCheckConfig};
pub use error::{Result, VitalsError};
pub use health::{
    supervise, supervise_blocking, Check, CheckSet, HealthSupervisor, ProbeOutcome, RunOutcome,
    RunSpec,
};
pub use process::LineSink;

/// 应用程序版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 应用程序名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 应用程序描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

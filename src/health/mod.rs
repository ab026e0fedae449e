//! 健康检测模块
//!
//! 提供HTTP/TCP检测、检测集合、结果处理以及启动监管状态机

pub mod check;
pub mod http;
pub mod result;
pub mod supervisor;
pub mod tcp;

// 重新导出主要类型
pub use check::{Check, CheckKind, CheckSet};
pub use http::HttpCheck;
pub use result::{
    PollResult, ProbeOutcome, ProbeResult, RunOutcome, RunReport, RunSummary, Verdict,
};
pub use supervisor::{
    reclaim, supervise, supervise_blocking, FailureCounter, HealthSupervisor, RunSpec,
    SupervisedRun, SupervisorState,
};
pub use tcp::TcpCheck;

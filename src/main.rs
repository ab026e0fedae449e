//! Launch Vitals 主程序入口
//!
//! 启动进程并等待其健康检测通过

use anyhow::{Context, Result};
use clap::Parser;
use launch_vitals::cli::args::{Args, Commands};
use launch_vitals::cli::commands::{
    CheckCommand, Command, InitCommand, RunCommand, ValidateCommand, VersionCommand, EXIT_ERRORED,
};
use launch_vitals::logging::{LogConfig, LoggingSystem};
use tracing::{debug, error};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let args = Args::parse();

    // 初始化日志系统
    let log_config = LogConfig {
        level: args.log_level.clone().into(),
        console: true,
        json_format: args.json_logs,
        ..Default::default()
    };

    let _logging_system = LoggingSystem::setup_logging(log_config).context("初始化日志系统失败")?;

    debug!("Launch Vitals v{} 启动", launch_vitals::VERSION);

    let exit_code = match execute_command(&args).await {
        Ok(code) => code,
        Err(e) => {
            error!("命令执行失败: {:#}", e);
            eprintln!("错误: {e:#}");
            EXIT_ERRORED
        }
    };

    std::process::exit(exit_code);
}

/// 执行CLI命令，返回进程退出码
async fn execute_command(args: &Args) -> Result<i32> {
    let code = match &args.command {
        Commands::Run { .. } => RunCommand.execute(args).await.context("run 命令执行失败")?,
        Commands::Check { .. } => CheckCommand
            .execute(args)
            .await
            .context("check 命令执行失败")?,
        Commands::Init { .. } => InitCommand.execute(args).await.context("init 命令执行失败")?,
        Commands::Validate { .. } => ValidateCommand
            .execute(args)
            .await
            .context("配置验证失败")?,
        Commands::Version { .. } => VersionCommand.execute(args).await?,
    };
    Ok(code)
}

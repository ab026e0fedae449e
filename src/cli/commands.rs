//! 命令处理逻辑
//!
//! 实现各种CLI命令的处理逻辑，每个命令返回进程退出码

use crate::cli::args::{Args, Commands, OutputFormat};
use crate::config::{format_duration, CommandConfig, ConfigLoader, FileConfigLoader};
use crate::error::Result;
use crate::health::{
    reclaim, HealthSupervisor, PollResult, RunReport, RunSpec, SupervisedRun, Verdict,
};
use crate::logging::child_output_sink;
use async_trait::async_trait;
use std::path::Path;
use tracing::{info, warn};

/// 出错时的退出码
pub const EXIT_ERRORED: i32 = 2;

/// `init` 命令生成的示例配置
pub const EXAMPLE_CONFIG: &str = r#"# Launch Vitals 配置文件
#
# 时长可以写成整数秒，或者 "500ms"、"2s"、"1m30s" 这样的字符串

# 要启动的可执行文件及参数
path = "/usr/local/bin/my-server"
args = ["--port", "8080"]

# 启动后等待多久开始检测
grace = "2s"
# 单次探测超时
timeout = "1s"
# 两轮检测之间的间隔
interval = "1s"
# 连续失败多少轮后判定为未就绪
failures = 5
# 是否把子进程输出写入日志
capture_output = true

[[http]]
name = "ready"
url = "http://127.0.0.1:8080/health"
method = "GET"
# 为空时接受任意2xx
expect = [200]

[[tcp]]
name = "port"
port = 8080
"#;

/// 命令处理器trait
#[async_trait]
pub trait Command: Send + Sync {
    /// 执行命令
    ///
    /// # 返回
    /// * `Result<i32>` - 进程退出码
    async fn execute(&self, args: &Args) -> Result<i32>;
}

/// 加载并验证配置文件
async fn load_config(path: &Path) -> Result<CommandConfig> {
    let loader = FileConfigLoader::new(true);
    loader.load_from_file(path).await
}

/// 打印一轮检测结果
fn print_poll(poll: &PollResult) {
    for result in &poll.results {
        let icon = if result.outcome.is_success() { "✓" } else { "✗" };
        println!(
            "  {} {} {} ({}) - {} - {}ms",
            icon,
            result.kind,
            result.check_name,
            result.target,
            result.outcome,
            result.elapsed.as_millis()
        );
    }
}

/// 打印运行报告
fn print_report(report: &RunReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", report.summary().to_json()?);
        }
        OutputFormat::Text => {
            let icon = match report.outcome.verdict() {
                Verdict::Healthy => "✓",
                Verdict::Unhealthy => "✗",
                Verdict::Errored => "!",
            };
            println!(
                "{} {} (轮数: {}, 耗时: {}ms)",
                icon,
                report.outcome.verdict(),
                report.polls.len(),
                report.elapsed.as_millis()
            );
            if let Some(reason) = report.outcome.reason() {
                println!("  原因: {reason}");
            }
            if let Some(poll) = report.polls.last() {
                print_poll(poll);
            }
        }
    }
    Ok(())
}

/// 运行命令：启动进程并等待就绪判定
pub struct RunCommand;

#[async_trait]
impl Command for RunCommand {
    async fn execute(&self, args: &Args) -> Result<i32> {
        if let Commands::Run { detach, format } = &args.command {
            self.run(args, *detach, *format).await
        } else {
            Ok(0)
        }
    }
}

impl RunCommand {
    async fn run(&self, args: &Args, detach: bool, format: OutputFormat) -> Result<i32> {
        let config = load_config(&args.get_config_path()).await?;
        let program = Path::new(&config.path)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| config.path.clone());
        let spec = RunSpec::from_config(&config, Some(child_output_sink(&program)))?;

        let supervisor = HealthSupervisor::new(spec);
        let SupervisedRun { report, process } = supervisor.run().await;
        print_report(&report, format)?;
        let exit_code = report.outcome.exit_code();

        if let Some(process) = process {
            if !report.outcome.is_healthy() {
                reclaim(process).await;
            } else if detach {
                info!(pid = ?process.pid(), "就绪后分离进程");
            } else {
                info!(pid = ?process.pid(), "等待进程退出，按 Ctrl+C 终止");
                let shutdown = async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!(error = %e, "监听Ctrl+C失败");
                        std::future::pending::<()>().await;
                    }
                };
                let status = process.wait_until(shutdown).await?;
                info!(status = %status, "进程已退出");
            }
        }

        Ok(exit_code)
    }
}

/// 检测命令：不启动进程，只执行一轮检测
pub struct CheckCommand;

#[async_trait]
impl Command for CheckCommand {
    async fn execute(&self, args: &Args) -> Result<i32> {
        if let Commands::Check { format } = &args.command {
            self.perform_health_check(args, *format).await
        } else {
            Ok(0)
        }
    }
}

impl CheckCommand {
    /// 执行一轮健康检测
    async fn perform_health_check(&self, args: &Args, format: OutputFormat) -> Result<i32> {
        let config = load_config(&args.get_config_path()).await?;
        let spec = RunSpec::from_config(&config, None)?;

        if spec.checks.is_empty() {
            eprintln!("未配置任何检测");
        }

        let supervisor = HealthSupervisor::new(spec);
        let poll = supervisor.poll_once(1).await?;

        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&poll)?),
            OutputFormat::Text => {
                let verdict = if poll.is_success() { "通过" } else { "未通过" };
                println!("检测{} (耗时: {}ms)", verdict, poll.elapsed.as_millis());
                print_poll(&poll);
            }
        }

        Ok(if poll.is_success() { 0 } else { 1 })
    }
}

/// 初始化命令
pub struct InitCommand;

#[async_trait]
impl Command for InitCommand {
    async fn execute(&self, args: &Args) -> Result<i32> {
        if let Commands::Init { config_path, force } = &args.command {
            self.create_config_file(config_path, *force).await
        } else {
            Ok(0)
        }
    }
}

impl InitCommand {
    /// 创建配置文件
    async fn create_config_file(&self, config_path: &Path, force: bool) -> Result<i32> {
        if config_path.exists() && !force {
            eprintln!("配置文件已存在: {}", config_path.display());
            eprintln!("使用 --force 参数覆盖现有文件");
            return Ok(1);
        }

        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        tokio::fs::write(config_path, EXAMPLE_CONFIG).await?;

        println!("配置文件已创建: {}", config_path.display());
        println!("请编辑配置文件以设置要启动的程序和健康检测");

        Ok(0)
    }
}

/// 验证命令
pub struct ValidateCommand;

#[async_trait]
impl Command for ValidateCommand {
    async fn execute(&self, args: &Args) -> Result<i32> {
        if let Commands::Validate {
            config_path,
            verbose,
        } = &args.command
        {
            let config_file = config_path
                .clone()
                .unwrap_or_else(|| args.get_config_path());

            self.validate_config_file(&config_file, *verbose).await
        } else {
            Ok(0)
        }
    }
}

impl ValidateCommand {
    /// 验证配置文件
    async fn validate_config_file(&self, config_path: &Path, verbose: bool) -> Result<i32> {
        println!("验证配置文件: {}", config_path.display());

        let config = load_config(config_path).await?;

        if verbose {
            println!("配置验证通过！");
            println!("进程:");
            println!("  路径: {}", config.path);
            println!("  参数: {:?}", config.args);
            println!("  宽限期: {}", format_duration(&config.grace));
            println!("  检测超时: {}", format_duration(&config.timeout));
            println!("  检测间隔: {}", format_duration(&config.interval));
            println!("  失败阈值: {}", config.failures);

            println!("HTTP检测:");
            for (i, check) in config.http.iter().enumerate() {
                println!("  {}. {} ({} {})", i + 1, check.name, check.method, check.url);
                if !check.expect.is_empty() {
                    println!("     期望状态码: {:?}", check.expect);
                }
            }

            println!("TCP检测:");
            for (i, check) in config.tcp.iter().enumerate() {
                println!(
                    "  {}. {} ({})",
                    i + 1,
                    check.name,
                    check.target().unwrap_or_default()
                );
            }
        } else {
            println!("✓ 配置文件验证通过");
            println!(
                "✓ 找到 {} 个HTTP检测, {} 个TCP检测",
                config.http.len(),
                config.tcp.len()
            );
        }

        Ok(0)
    }
}

/// 版本命令
pub struct VersionCommand;

#[async_trait]
impl Command for VersionCommand {
    async fn execute(&self, args: &Args) -> Result<i32> {
        if let Commands::Version { format } = &args.command {
            match format {
                OutputFormat::Json => {
                    let version_info = serde_json::json!({
                        "name": crate::APP_NAME,
                        "version": crate::VERSION,
                        "description": crate::APP_DESCRIPTION
                    });
                    println!("{}", serde_json::to_string_pretty(&version_info)?);
                }
                OutputFormat::Text => {
                    println!("{} v{}", crate::APP_NAME, crate::VERSION);
                    println!("{}", crate::APP_DESCRIPTION);
                }
            }
        }
        Ok(0)
    }
}

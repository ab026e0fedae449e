//! 错误处理模块
//!
//! 定义应用程序的统一错误类型

use thiserror::Error;

/// Launch Vitals 应用程序的主要错误类型
#[derive(Error, Debug)]
pub enum VitalsError {
    /// 配置相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 健康检测相关错误
    #[error("健康检测错误: {0}")]
    HealthCheck(#[from] HealthCheckError),

    /// 进程启动失败（可执行文件不存在、无执行权限或系统拒绝创建进程）
    #[error("进程启动失败: {path}: {source}")]
    Launch {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 其他错误
    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

impl VitalsError {
    /// 判断错误是否会终止本次运行
    ///
    /// 只有进程启动失败和检测配置错误是致命的，其余错误不影响就绪判定
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VitalsError::Launch { .. }
                | VitalsError::Config(_)
                | VitalsError::HealthCheck(HealthCheckError::InvalidSpec { .. })
        )
    }
}

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置文件解析错误
    #[error("配置文件解析失败: {0}")]
    ParseError(String),

    /// 配置验证错误
    #[error("配置验证失败: {0}")]
    ValidationError(String),

    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },

    /// 时长格式错误
    #[error("无效的时长: {value}")]
    InvalidDuration { value: String },
}

/// 健康检测错误类型
#[derive(Error, Debug)]
pub enum HealthCheckError {
    /// HTTP客户端错误
    #[error("HTTP客户端创建失败: {0}")]
    RequestError(#[from] reqwest::Error),

    /// 检测定义在执行时被发现结构无效，不可重试
    #[error("检测 {check} 配置无效: {reason}")]
    InvalidSpec { check: String, reason: String },
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, VitalsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let launch = VitalsError::Launch {
            path: "/no/such/bin".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(launch.is_fatal());

        let invalid = VitalsError::from(HealthCheckError::InvalidSpec {
            check: "db".to_string(),
            reason: "missing port".to_string(),
        });
        assert!(invalid.is_fatal());

        let io = VitalsError::from(std::io::Error::other("broken pipe"));
        assert!(!io.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = VitalsError::Launch {
            path: "/no/such/bin".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.to_string().contains("/no/such/bin"));

        let err = ConfigError::InvalidDuration {
            value: "5x".to_string(),
        };
        assert_eq!(err.to_string(), "无效的时长: 5x");
    }
}

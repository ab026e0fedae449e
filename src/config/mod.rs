//! 配置管理模块
//!
//! 提供配置文件解析、时长格式和验证功能

pub mod duration;
pub mod loader;
pub mod types;

// 重新导出主要类型
pub use duration::{format_duration, parse_duration};
pub use loader::{
    get_default_config_path, ConfigFormat, ConfigLoader, FileConfigLoader, DEFAULT_CONFIG_FILE,
};
pub use types::{validate_config, CommandConfig, HttpCheckConfig, TcpCheckConfig};

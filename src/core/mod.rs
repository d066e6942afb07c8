//! 核心功能模块
//!
//! 与图形 API 无关的基础设施：配置、错误类型和日志。
//!
//! # 模块组织
//!
//! - `config`：配置管理，支持配置文件和命令行参数
//! - `error`：错误处理，定义统一的错误类型
//! - `log`：日志系统，基于 tracing

pub mod config;
pub mod error;
pub mod log;

pub use config::Config;
pub use error::{Result, SampleError};

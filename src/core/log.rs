//! 日志系统模块
//!
//! 基于 `tracing` 提供结构化的日志记录功能。
//!
//! # 特性
//!
//! - 结构化日志：支持键值对（帧号、fence 值、槽位）
//! - 灵活输出：支持控制台和文件输出
//! - 日志级别：trace, debug, info, warn, error
//!
//! 帧循环中每帧都会发生的事件使用 `trace!`，资源创建使用 `debug!`，
//! 设备生命周期（创建、丢失、重建）使用 `info!` / `warn!`。

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use std::path::Path;

use super::config::LogLevel;

/// 默认日志文件名
const DEFAULT_LOG_FILE: &str = "d3d12_samples.log";

/// 根据日志级别构建过滤器
///
/// 设置了 `RUST_LOG` 时优先使用环境变量。
fn build_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// 按天滚动的日志文件
fn rolling_appender(log_path: &str) -> RollingFileAppender {
    let path = Path::new(log_path);
    let directory = path.parent().unwrap_or(Path::new("."));
    let filename = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);
    RollingFileAppender::new(Rotation::DAILY, directory, filename)
}

/// 初始化日志系统
///
/// 必须在程序开始时调用一次。重复调用（例如多个测试）时后续调用被忽略。
///
/// # 参数
///
/// * `level` - 日志级别
/// * `file_output` - 是否同时输出到文件
/// * `log_file_path` - 日志文件路径（可选，默认为 "d3d12_samples.log"）
pub fn init_logger(level: LogLevel, file_output: bool, log_file_path: Option<&str>) {
    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_ansi(true);

    // 文件中不写颜色控制符
    let file_layer = file_output.then(|| {
        fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(rolling_appender(log_file_path.unwrap_or(DEFAULT_LOG_FILE)))
    });

    let _ = tracing_subscriber::registry()
        .with(build_filter(level))
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

/// 框架核心日志 - Info 级别
#[macro_export]
macro_rules! engine_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "d3d12_samples::engine", $($arg)*)
    };
}

/// 框架核心日志 - Warn 级别
#[macro_export]
macro_rules! engine_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "d3d12_samples::engine", $($arg)*)
    };
}

/// 框架核心日志 - Error 级别
#[macro_export]
macro_rules! engine_error {
    ($($arg:tt)*) => {
        tracing::error!(target: "d3d12_samples::engine", $($arg)*)
    };
}

impl LogLevel {
    /// `EnvFilter` 使用的级别字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(LogLevel::Trace.as_str(), "trace");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logger(LogLevel::Warn, false, None);
        init_logger(LogLevel::Debug, false, None);
    }
}

//! 配置管理模块
//!
//! 提供示例程序配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//! title = "D3D12 Samples"
//!
//! [graphics]
//! backend = "dx12"       # 或 "sim"（无窗口的模拟 GPU）
//! frame_count = 2        # 交换链缓冲数量，2..=4
//! sync_interval = 1
//! debug_layer = true
//! shader_dir = "shaders"
//! warp = false
//!
//! [sample]
//! kind = "postprocess_blur"
//! frames = 0             # 0 表示一直运行到窗口关闭
//!
//! [simulation]
//! gpu_lag = 1
//! # device_lost_at = 120
//!
//! [logging]
//! level = "info"
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::{ConfigError, Result};

/// 交换链缓冲数量的合法范围
pub const MIN_FRAME_COUNT: usize = 2;
pub const MAX_FRAME_COUNT: usize = 4;

/// 程序配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 窗口配置
    #[serde(default)]
    pub window: WindowConfig,

    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// 示例选择
    #[serde(default)]
    pub sample: SampleConfig,

    /// 模拟 GPU 配置（仅 `backend = "sim"` 时使用）
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// 窗口宽度
    #[serde(default = "default_width")]
    pub width: u32,

    /// 窗口高度
    #[serde(default = "default_height")]
    pub height: u32,

    /// 窗口标题
    #[serde(default = "default_title")]
    pub title: String,

    /// 是否可调整大小
    #[serde(default = "default_resizable")]
    pub resizable: bool,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: GraphicsBackend,

    /// 交换链缓冲数量（同时也是帧资源数量）
    #[serde(default = "default_frame_count")]
    pub frame_count: usize,

    /// Present 的同步间隔，0 表示不等垂直同步
    #[serde(default = "default_sync_interval")]
    pub sync_interval: u32,

    /// 调试版本中启用 D3D12 调试层
    #[serde(default = "default_debug_layer")]
    pub debug_layer: bool,

    /// 预编译着色器（*.cso）所在目录
    #[serde(default = "default_shader_dir")]
    pub shader_dir: PathBuf,

    /// 使用 WARP 软件适配器
    #[serde(default)]
    pub warp: bool,
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackend {
    /// DirectX 12 后端
    Dx12,
    /// 内存中的模拟 GPU，无窗口运行
    Sim,
}

/// 示例种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    HelloCompute,
    PostprocessBlur,
    Tessellation,
    SoftwareRasterization,
}

/// 示例配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleConfig {
    /// 运行哪个示例
    #[serde(default = "default_sample_kind")]
    pub kind: SampleKind,

    /// 渲染多少帧后退出，0 表示不限
    #[serde(default)]
    pub frames: u64,
}

/// 模拟 GPU 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// GPU 落后 CPU 的帧数，0 表示信号立即完成
    #[serde(default = "default_gpu_lag")]
    pub gpu_lag: u64,

    /// 在第 N 次 Present 时注入设备丢失
    #[serde(default)]
    pub device_lost_at: Option<u64>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default = "default_file_output")]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_title() -> String { "D3D12 Samples".to_string() }
fn default_resizable() -> bool { true }
fn default_backend() -> GraphicsBackend {
    if cfg!(target_os = "windows") { GraphicsBackend::Dx12 } else { GraphicsBackend::Sim }
}
fn default_frame_count() -> usize { 2 }
fn default_sync_interval() -> u32 { 1 }
fn default_debug_layer() -> bool { cfg!(debug_assertions) }
fn default_shader_dir() -> PathBuf { PathBuf::from("shaders") }
fn default_sample_kind() -> SampleKind { SampleKind::HelloCompute }
fn default_gpu_lag() -> u64 { 1 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "d3d12_samples.log".to_string() }

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
            resizable: default_resizable(),
        }
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            frame_count: default_frame_count(),
            sync_interval: default_sync_interval(),
            debug_layer: default_debug_layer(),
            shader_dir: default_shader_dir(),
            warp: false,
        }
    }
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            kind: default_sample_kind(),
            frames: 0,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            gpu_lag: default_gpu_lag(),
            device_lost_at: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        Self::from_toml_str(&contents)
    }

    /// 从 TOML 文本解析
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在或无法解析则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 从命令行参数覆盖配置
    ///
    /// # 说明
    ///
    /// 支持的参数：
    /// - `--dx12` / `--sim`: 选择后端
    /// - `--warp`: 使用 WARP 适配器
    /// - `--sample <name>`: 选择示例
    /// - `--frames <n>`: 渲染 n 帧后退出
    /// - `--frame-count <n>`: 交换链缓冲数量
    /// - `--width <value>` / `--height <value>`: 窗口尺寸
    pub fn apply_args<I>(&mut self, args: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--dx12") {
            self.graphics.backend = GraphicsBackend::Dx12;
        }

        if args.iter().any(|a| a == "--sim") {
            self.graphics.backend = GraphicsBackend::Sim;
        }

        if args.iter().any(|a| a == "--warp") {
            self.graphics.warp = true;
        }

        if let Some(name) = value_after(&args, "--sample") {
            self.sample.kind = SampleKind::from_name(name).ok_or_else(|| ConfigError::InvalidValue {
                field: "sample.kind".to_string(),
                reason: format!("unknown sample '{}'", name),
            })?;
        }

        if let Some(frames) = parsed_after(&args, "--frames")? {
            self.sample.frames = frames;
        }

        if let Some(count) = parsed_after(&args, "--frame-count")? {
            self.graphics.frame_count = count;
        }

        if let Some(width) = parsed_after(&args, "--width")? {
            self.window.width = width;
        }

        if let Some(height) = parsed_after(&args, "--height")? {
            self.window.height = height;
        }

        Ok(())
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::InvalidValue {
                field: "window.width/height".to_string(),
                reason: "Window dimensions must be greater than 0".to_string(),
            }
            .into());
        }

        if !(MIN_FRAME_COUNT..=MAX_FRAME_COUNT).contains(&self.graphics.frame_count) {
            return Err(ConfigError::InvalidValue {
                field: "graphics.frame_count".to_string(),
                reason: format!(
                    "Frame count must be between {} and {}",
                    MIN_FRAME_COUNT, MAX_FRAME_COUNT
                ),
            }
            .into());
        }

        if self.graphics.sync_interval > 4 {
            return Err(ConfigError::InvalidValue {
                field: "graphics.sync_interval".to_string(),
                reason: "Sync interval must be 0..=4".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let idx = args.iter().position(|a| a == flag)?;
    args.get(idx + 1).map(|s| s.as_str())
}

fn parsed_after<T: std::str::FromStr>(args: &[String], flag: &str) -> Result<Option<T>> {
    match value_after(args, flag) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| {
            ConfigError::InvalidValue {
                field: flag.trim_start_matches('-').to_string(),
                reason: format!("cannot parse '{}'", raw),
            }
            .into()
        }),
    }
}

impl GraphicsBackend {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackend::Dx12 => "DirectX 12",
            GraphicsBackend::Sim => "Simulated GPU",
        }
    }
}

impl SampleKind {
    /// 所有示例
    pub const ALL: [SampleKind; 4] = [
        SampleKind::HelloCompute,
        SampleKind::PostprocessBlur,
        SampleKind::Tessellation,
        SampleKind::SoftwareRasterization,
    ];

    /// 命令行和配置文件中使用的名字
    pub fn name(&self) -> &'static str {
        match self {
            SampleKind::HelloCompute => "hello_compute",
            SampleKind::PostprocessBlur => "postprocess_blur",
            SampleKind::Tessellation => "tessellation",
            SampleKind::SoftwareRasterization => "software_rasterization",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.graphics.frame_count, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.window.width = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.graphics.frame_count = 1;
        assert!(config.validate().is_err());
        config.graphics.frame_count = 5;
        assert!(config.validate().is_err());
        config.graphics.frame_count = 3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config
            .apply_args([
                "d3d12_samples", "--sim", "--sample", "tessellation", "--frames", "30",
                "--frame-count", "3", "--width", "640",
            ])
            .unwrap();

        assert_eq!(config.graphics.backend, GraphicsBackend::Sim);
        assert_eq!(config.sample.kind, SampleKind::Tessellation);
        assert_eq!(config.sample.frames, 30);
        assert_eq!(config.graphics.frame_count, 3);
        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, 720);
    }

    #[test]
    fn test_apply_args_rejects_bad_values() {
        let mut config = Config::default();
        assert!(config.apply_args(["--sample", "nope"]).is_err());
        assert!(config.apply_args(["--frames", "many"]).is_err());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            [graphics]
            backend = "sim"
            frame_count = 3

            [sample]
            kind = "software_rasterization"

            [simulation]
            device_lost_at = 12
            "#,
        )
        .unwrap();

        assert_eq!(config.graphics.backend, GraphicsBackend::Sim);
        assert_eq!(config.graphics.frame_count, 3);
        assert_eq!(config.graphics.sync_interval, 1);
        assert_eq!(config.sample.kind, SampleKind::SoftwareRasterization);
        assert_eq!(config.simulation.device_lost_at, Some(12));
        assert_eq!(config.window.title, "D3D12 Samples");
    }

    #[test]
    fn test_sample_names_round_trip() {
        for kind in SampleKind::ALL {
            assert_eq!(SampleKind::from_name(kind.name()), Some(kind));
        }
    }
}

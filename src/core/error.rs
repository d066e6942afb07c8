//! 错误处理模块
//!
//! 定义了示例框架中使用的统一错误类型。
//!
//! # 设计原则
//!
//! - 为每种错误类型提供清晰的上下文信息
//! - 设备丢失（device removed / reset）是唯一可恢复的错误，其余错误都是致命的
//! - 易于模式匹配和错误处理

use std::fmt;

/// 框架统一的 Result 类型
///
/// 所有可能返回错误的函数都应该使用这个类型。
pub type Result<T> = std::result::Result<T, SampleError>;

/// 示例框架的错误类型
#[derive(Debug)]
pub enum SampleError {
    /// 配置错误
    Config(ConfigError),

    /// 图形 API 错误
    Graphics(GraphicsError),

    /// 描述符布局错误
    Descriptor(DescriptorError),

    /// IO 错误
    Io(std::io::Error),

    /// 初始化错误
    Initialization(String),

    /// 运行时错误
    Runtime(String),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug)]
pub enum GraphicsError {
    /// 设备创建失败
    DeviceCreation(String),

    /// 交换链错误
    SwapchainError(String),

    /// 着色器字节码加载失败
    ShaderLoad(String),

    /// 资源创建失败
    ResourceCreation(String),

    /// 渲染命令执行失败
    CommandExecution(String),

    /// 设备被移除或重置，需要完整重建
    DeviceLost(String),
}

/// 描述符堆布局相关的错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// 同一个堆里声明了重复的槽位名
    DuplicateSlot { heap: &'static str, key: &'static str },

    /// 槽位未声明
    UnknownSlot { heap: &'static str, key: &'static str },

    /// 每帧槽位必须指定帧索引
    MissingFrameIndex { key: &'static str },

    /// 帧索引越界
    FrameOutOfRange { frame: usize, frame_count: usize },

    /// 该类型的堆没有被创建
    HeapNotCreated(&'static str),
}

impl GraphicsError {
    /// 是否为设备丢失错误
    pub fn is_device_lost(&self) -> bool {
        matches!(self, GraphicsError::DeviceLost(_))
    }
}

impl SampleError {
    /// 是否为设备丢失错误
    ///
    /// 帧循环根据它决定走重建路径还是直接退出。
    pub fn is_device_lost(&self) -> bool {
        matches!(self, SampleError::Graphics(e) if e.is_device_lost())
    }
}

impl fmt::Display for SampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleError::Config(e) => write!(f, "Configuration error: {}", e),
            SampleError::Graphics(e) => write!(f, "Graphics error: {}", e),
            SampleError::Descriptor(e) => write!(f, "Descriptor error: {}", e),
            SampleError::Io(e) => write!(f, "IO error: {}", e),
            SampleError::Initialization(msg) => write!(f, "Initialization error: {}", msg),
            SampleError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::DeviceCreation(msg) => write!(f, "Device creation failed: {}", msg),
            GraphicsError::SwapchainError(msg) => write!(f, "Swapchain error: {}", msg),
            GraphicsError::ShaderLoad(msg) => write!(f, "Shader load failed: {}", msg),
            GraphicsError::ResourceCreation(msg) => write!(f, "Resource creation failed: {}", msg),
            GraphicsError::CommandExecution(msg) => write!(f, "Command execution failed: {}", msg),
            GraphicsError::DeviceLost(msg) => write!(f, "Device lost: {}", msg),
        }
    }
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorError::DuplicateSlot { heap, key } => {
                write!(f, "Slot '{}' declared twice in {} heap", key, heap)
            }
            DescriptorError::UnknownSlot { heap, key } => {
                write!(f, "Slot '{}' is not declared in {} heap", key, heap)
            }
            DescriptorError::MissingFrameIndex { key } => {
                write!(f, "Per-frame slot '{}' resolved without a frame index", key)
            }
            DescriptorError::FrameOutOfRange { frame, frame_count } => {
                write!(f, "Frame index {} out of range (frame count {})", frame, frame_count)
            }
            DescriptorError::HeapNotCreated(heap) => write!(f, "{} heap was not created", heap),
        }
    }
}

impl std::error::Error for SampleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SampleError::Io(e) => Some(e),
            SampleError::Config(e) => Some(e),
            SampleError::Graphics(e) => Some(e),
            SampleError::Descriptor(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}
impl std::error::Error for DescriptorError {}

// 实现 From trait 以便于错误转换
impl From<std::io::Error> for SampleError {
    fn from(err: std::io::Error) -> Self {
        SampleError::Io(err)
    }
}

impl From<ConfigError> for SampleError {
    fn from(err: ConfigError) -> Self {
        SampleError::Config(err)
    }
}

impl From<GraphicsError> for SampleError {
    fn from(err: GraphicsError) -> Self {
        SampleError::Graphics(err)
    }
}

impl From<DescriptorError> for SampleError {
    fn from(err: DescriptorError) -> Self {
        SampleError::Descriptor(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_detection() {
        let lost: SampleError = GraphicsError::DeviceLost("DXGI_ERROR_DEVICE_REMOVED".into()).into();
        assert!(lost.is_device_lost());

        let fatal: SampleError = GraphicsError::ResourceCreation("out of memory".into()).into();
        assert!(!fatal.is_device_lost());
        assert!(!SampleError::Runtime("x".into()).is_device_lost());
    }

    #[test]
    fn test_display_includes_context() {
        let err: SampleError = DescriptorError::DuplicateSlot { heap: "RTV", key: "scene" }.into();
        let text = err.to_string();
        assert!(text.contains("scene"));
        assert!(text.contains("RTV"));
    }
}

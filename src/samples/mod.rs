//! 示例脚本
//!
//! 每个示例只描述自己的资源和每帧命令，帧同步、描述符分配和设备恢复都由 [`Renderer`] 负责。
//!
//! # 调用顺序
//!
//! 1. `declare_descriptors` / `frame_constants`：声明描述符槽位和每帧常量缓冲
//! 2. `load_assets`：创建管线和资源，写入固定槽位的视图
//! 3. 每帧：`update`（写这一帧的常量）→ `record`（录制命令）
//! 4. 设备丢失或窗口大小改变：`release_assets` 之后再次 `load_assets`
//!
//! [`Renderer`]: crate::renderer::Renderer

pub mod camera;
pub mod hello_compute;
pub mod postprocess_blur;
pub mod software_rasterization;
pub mod tessellation;

use crate::core::config::SampleKind;
use crate::core::error::Result;
use crate::gfx::backend::Backend;
use crate::renderer::descriptor::{DescriptorLayoutBuilder, DescriptorTable};
use crate::renderer::resource::{FrameConstantDesc, FrameResource, FrameTargets};

pub use hello_compute::HelloCompute;
pub use postprocess_blur::PostprocessBlur;
pub use software_rasterization::SoftwareRasterization;
pub use tessellation::Tessellation;

/// 帧节奏
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// 每个交换链缓冲一个帧槽位，只在复用槽位时等待
    Buffered,
    /// 每帧提交后立即等待 GPU 完成
    FullSync,
}

/// 帧计时
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameTiming {
    /// 上一帧到这一帧的秒数
    pub delta: f32,
    pub total: f32,
    pub frame_number: u64,
}

/// 示例可以响应的按键
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKey {
    Left,
    Right,
    Up,
    Down,
    /// 示例自己的开关（线框、模糊）
    Toggle,
}

/// `load_assets` 的参数
pub struct SampleContext<'a, B: Backend> {
    pub backend: &'a B,
    pub table: &'a DescriptorTable<B>,
    pub frame_count: usize,
    pub width: u32,
    pub height: u32,
}

/// 示例脚本
pub trait Sample<B: Backend> {
    fn name(&self) -> &'static str;

    fn pacing(&self) -> Pacing {
        Pacing::Buffered
    }

    /// 声明示例自己的描述符槽位
    ///
    /// 后缓冲 RTV 和 `frame_constants` 中的 CBV 槽位由渲染器声明。
    fn declare_descriptors(&self, layout: &mut DescriptorLayoutBuilder) -> Result<()>;

    /// 每帧常量缓冲
    fn frame_constants(&self) -> Vec<FrameConstantDesc>;

    fn load_assets(&mut self, ctx: &SampleContext<'_, B>) -> Result<()>;

    /// 释放所有 GPU 对象，调用前 GPU 已空闲
    fn release_assets(&mut self);

    /// 写入这一帧的常量，帧槽位已确认空闲
    fn update(&mut self, frame: &mut FrameResource<B>, timing: &FrameTiming) -> Result<()>;

    /// 录制这一帧的命令
    ///
    /// 命令列表已重置并绑定了着色器可见的描述符堆，返回前后缓冲必须回到 `Present`。
    fn record(
        &mut self,
        list: &mut B::CommandList,
        frame: FrameTargets<'_, B>,
        table: &DescriptorTable<B>,
    ) -> Result<()>;

    fn on_key(&mut self, _key: SampleKey) {}
}

/// 按类型创建示例
pub fn create_sample<B: Backend>(kind: SampleKind) -> Box<dyn Sample<B>> {
    match kind {
        SampleKind::HelloCompute => Box::new(HelloCompute::<B>::new()),
        SampleKind::PostprocessBlur => Box::new(PostprocessBlur::<B>::new()),
        SampleKind::Tessellation => Box::new(Tessellation::<B>::new()),
        SampleKind::SoftwareRasterization => Box::new(SoftwareRasterization::<B>::new()),
    }
}

/// 取出已加载的资源
pub(crate) fn loaded<'a, T>(assets: &'a mut Option<T>, sample: &str) -> Result<&'a mut T> {
    assets
        .as_mut()
        .ok_or_else(|| crate::core::error::SampleError::Runtime(format!("{} assets are not loaded", sample)))
}

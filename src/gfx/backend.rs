//! 图形后端的统一抽象接口
//!
//! 本模块定义了后端（DirectX 12、模拟 GPU）必须实现的接口。
//! 一个后端实例拥有设备、唯一的直接命令队列和交换链，
//! 上层的帧循环、描述符分配和示例脚本都只通过这里的 trait 与它交互。
//!
//! # 设计理念
//!
//! - **关联类型**：fence、命令列表、描述符堆、资源、管线都是后端自己的类型
//! - **单队列**：所有提交按顺序执行，fence 值和提交顺序一一对应
//! - **设备丢失**：只有 `present`（以及之后的提交）会报告 `GraphicsError::DeviceLost`

use std::ptr::NonNull;

use crate::core::error::Result;
use crate::renderer::command::CommandList;
use crate::renderer::descriptor::{CpuDescriptorHandle, DescriptorHeap, HeapKind};
use crate::renderer::resource::ResourceState;
use crate::renderer::sync::GpuFence;

/// 纹理和顶点属性格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Unknown,
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
    Rgb32Float,
    Rg32Float,
    R32Float,
    R32Uint,
    D32Float,
}

impl Format {
    /// 每个元素的字节数
    pub fn size_in_bytes(&self) -> u32 {
        match self {
            Format::Unknown => 0,
            Format::Rgba8Unorm | Format::R32Float | Format::R32Uint | Format::D32Float => 4,
            Format::Rgba16Float | Format::Rg32Float => 8,
            Format::Rgb32Float => 12,
            Format::Rgba32Float => 16,
        }
    }

    pub fn is_depth(&self) -> bool {
        matches!(self, Format::D32Float)
    }
}

/// 内存堆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapType {
    /// GPU 本地内存
    Default,
    /// CPU 可写、可持久映射的上传堆
    Upload,
}

/// 缓冲区描述
#[derive(Debug, Clone)]
pub struct BufferDesc<'a> {
    pub name: &'a str,
    pub size: u64,
    pub heap: HeapType,
    /// 允许作为 UAV
    pub unordered_access: bool,
    pub initial_state: ResourceState,
}

impl<'a> BufferDesc<'a> {
    /// 上传堆缓冲（常量、静态顶点数据）
    pub fn upload(name: &'a str, size: u64) -> Self {
        Self {
            name,
            size,
            heap: HeapType::Upload,
            unordered_access: false,
            initial_state: ResourceState::GenericRead,
        }
    }

    /// GPU 本地缓冲
    pub fn gpu(name: &'a str, size: u64, initial_state: ResourceState) -> Self {
        Self {
            name,
            size,
            heap: HeapType::Default,
            unordered_access: false,
            initial_state,
        }
    }

    pub fn with_unordered_access(mut self) -> Self {
        self.unordered_access = true;
        self
    }
}

/// 纹理用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureUsage {
    pub render_target: bool,
    pub depth_stencil: bool,
    pub unordered_access: bool,
    pub shader_resource: bool,
}

/// 优化清除值
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    Depth(f32),
}

/// 2D 纹理描述
#[derive(Debug, Clone)]
pub struct TextureDesc<'a> {
    pub name: &'a str,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub usage: TextureUsage,
    pub initial_state: ResourceState,
    pub clear_value: Option<ClearValue>,
}

/// 采样过滤方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Point,
    Linear,
    /// 阴影比较采样
    ComparisonLinear,
}

/// 纹理寻址方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    Wrap,
    Clamp,
    Border,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerDesc {
    pub filter: Filter,
    pub address: AddressMode,
}

/// 写入描述符槽位的视图
pub enum ResourceView<'a, B: Backend> {
    /// 常量缓冲视图，大小按 256 字节对齐
    ConstantBuffer { resource: &'a B::Resource, size: u32 },
    /// 结构化缓冲的只读视图
    BufferSrv { resource: &'a B::Resource, count: u32, stride: u32 },
    /// 结构化缓冲的读写视图
    BufferUav { resource: &'a B::Resource, count: u32, stride: u32 },
    TextureSrv(&'a B::Resource),
    TextureUav(&'a B::Resource),
    /// 空的 2D 纹理 SRV，占位用
    NullTextureSrv,
    RenderTarget(&'a B::Resource),
    DepthStencil(&'a B::Resource),
    Sampler(SamplerDesc),
}

/// 顶点输入属性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub semantic: &'static str,
    pub semantic_index: u32,
    pub format: Format,
    pub slot: u32,
    pub offset: u32,
    /// 按实例步进
    pub per_instance: bool,
}

impl VertexAttribute {
    pub const fn vertex(semantic: &'static str, format: Format, slot: u32, offset: u32) -> Self {
        Self { semantic, semantic_index: 0, format, slot, offset, per_instance: false }
    }

    pub const fn instance(
        semantic: &'static str,
        semantic_index: u32,
        format: Format,
        slot: u32,
        offset: u32,
    ) -> Self {
        Self { semantic, semantic_index, format, slot, offset, per_instance: true }
    }
}

/// 光栅化阶段的图元类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TopologyType {
    #[default]
    Triangle,
    Patch,
}

/// 图形管线描述
///
/// 着色器以预编译字节码文件名给出（相对着色器目录），
/// 根签名从顶点着色器字节码中读取。
#[derive(Debug, Clone, Default)]
pub struct GraphicsPipelineDesc<'a> {
    pub name: &'a str,
    pub vertex_shader: &'a str,
    pub pixel_shader: Option<&'a str>,
    pub hull_shader: Option<&'a str>,
    pub domain_shader: Option<&'a str>,
    pub input_layout: &'a [VertexAttribute],
    pub topology: TopologyType,
    pub render_target_formats: &'a [Format],
    pub depth_format: Option<Format>,
    pub wireframe: bool,
}

/// 计算管线描述，根签名从计算着色器字节码中读取
#[derive(Debug, Clone, Copy)]
pub struct ComputePipelineDesc<'a> {
    pub name: &'a str,
    pub compute_shader: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

/// 管线状态对象（连同根签名）
pub trait Pipeline {
    fn kind(&self) -> PipelineKind;
    fn name(&self) -> &str;
}

/// GPU 资源（缓冲或纹理）
pub trait GpuResource {
    fn name(&self) -> &str;

    /// 缓冲的字节数，纹理返回 0
    fn size(&self) -> u64;

    fn format(&self) -> Format;

    fn gpu_address(&self) -> u64;

    /// 映射上传堆资源，返回的指针在 `unmap` 之前有效
    fn map(&self) -> Result<NonNull<u8>>;

    fn unmap(&self);
}

/// 图形后端的统一接口
pub trait Backend: Sized + 'static {
    type Fence: GpuFence;
    type CommandList: CommandList<Self>;
    type DescriptorHeap: DescriptorHeap;
    type Resource: GpuResource;
    type Pipeline: Pipeline;

    /// 后端名称，用于日志输出
    fn name(&self) -> &'static str;

    /// 交换链缓冲数量
    fn frame_count(&self) -> usize;

    /// 交换链尺寸
    fn size(&self) -> (u32, u32);

    /// 下一次 Present 使用的后缓冲索引，由交换链决定，不一定轮转
    fn current_back_buffer_index(&self) -> usize;

    /// 后缓冲资源的一个新引用
    fn back_buffer(&self, index: usize) -> Result<Self::Resource>;

    fn create_fence(&self, initial_value: u64) -> Result<Self::Fence>;

    /// 创建直接命令列表（自带分配器），创建后处于关闭状态
    fn create_command_list(&self, name: &str) -> Result<Self::CommandList>;

    fn create_descriptor_heap(
        &self,
        kind: HeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<Self::DescriptorHeap>;

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<Self::Resource>;

    /// 可持久映射的上传堆缓冲
    fn create_upload_buffer(&self, name: &str, size: u64) -> Result<Self::Resource> {
        self.create_buffer(&BufferDesc::upload(name, size))
    }

    fn create_texture(&self, desc: &TextureDesc<'_>) -> Result<Self::Resource>;

    /// 在描述符槽位上写入视图
    fn create_view(&self, view: &ResourceView<'_, Self>, dest: CpuDescriptorHandle) -> Result<()>;

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> Result<Self::Pipeline>;

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc<'_>) -> Result<Self::Pipeline>;

    /// 在直接队列上执行已关闭的命令列表
    fn execute(&self, list: &Self::CommandList) -> Result<()>;

    /// 呈现当前后缓冲
    ///
    /// 设备被移除或重置时返回 `GraphicsError::DeviceLost`。
    fn present(&mut self, sync_interval: u32) -> Result<()>;

    /// 调整交换链缓冲大小
    ///
    /// 调用前必须等待 GPU 空闲并释放所有后缓冲引用。
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_sizes() {
        assert_eq!(Format::Rgb32Float.size_in_bytes(), 12);
        assert_eq!(Format::Rgba8Unorm.size_in_bytes(), 4);
        assert!(Format::D32Float.is_depth());
        assert!(!Format::R32Float.is_depth());
    }

    #[test]
    fn test_buffer_desc_builders() {
        let upload = BufferDesc::upload("cb", 256);
        assert_eq!(upload.heap, HeapType::Upload);
        assert_eq!(upload.initial_state, ResourceState::GenericRead);

        let uav = BufferDesc::gpu("positions", 1024, ResourceState::UnorderedAccess).with_unordered_access();
        assert!(uav.unordered_access);
        assert_eq!(uav.heap, HeapType::Default);
    }
}

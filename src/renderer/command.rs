//! 命令录制模块
//!
//! 定义后端命令列表的统一接口。每个帧槽位拥有一个命令列表（分配器 + 列表），
//! 每帧的录制流程固定：
//!
//! 1. 重置分配器和列表（该槽位已被 fence 确认空闲）
//! 2. 绑定着色器可见的描述符堆
//! 3. 每个 pass：资源屏障、管线和根签名、描述符表、绘制或派发
//! 4. 把后缓冲转换回 Present 状态
//! 5. 关闭列表

use crate::core::error::Result;
use crate::gfx::backend::Backend;
use crate::renderer::descriptor::{CpuDescriptorHandle, GpuDescriptorHandle};
use crate::renderer::resource::ResourceState;

/// 资源屏障
pub enum Barrier<'a, B: Backend> {
    /// 状态转换
    Transition {
        resource: &'a B::Resource,
        before: ResourceState,
        after: ResourceState,
    },
    /// 同一资源上连续两次 UAV 访问之间的屏障
    Uav { resource: &'a B::Resource },
}

/// 视口（同时设置同尺寸的裁剪矩形）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// 覆盖整个渲染目标的视口
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// 图元拓扑
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    TriangleList,
    /// 曲面细分用的控制点面片
    PatchList(u32),
}

/// 顶点缓冲绑定
pub struct VertexBufferView<'a, B: Backend> {
    pub resource: &'a B::Resource,
    pub stride: u32,
    pub size: u32,
}

/// 索引格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    U16,
    U32,
}

/// 索引缓冲绑定
pub struct IndexBufferView<'a, B: Backend> {
    pub resource: &'a B::Resource,
    pub format: IndexFormat,
    pub size: u32,
}

/// 后端命令列表
///
/// 根参数的图形/计算版本由当前绑定的管线类型决定。
pub trait CommandList<B: Backend> {
    /// 重置分配器和列表，只能在 GPU 完成该列表上次的工作之后调用
    fn reset(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn set_descriptor_heaps(&mut self, heaps: &[&B::DescriptorHeap]);

    fn resource_barrier(&mut self, barriers: &[Barrier<'_, B>]);

    /// 绑定管线状态和它的根签名
    fn set_pipeline(&mut self, pipeline: &B::Pipeline);

    fn set_root_descriptor_table(&mut self, parameter: u32, handle: GpuDescriptorHandle);

    fn set_root_constant_buffer(&mut self, parameter: u32, resource: &B::Resource);

    fn set_root_shader_resource(&mut self, parameter: u32, resource: &B::Resource);

    fn set_root_constants(&mut self, parameter: u32, values: &[u32]);

    fn set_viewport(&mut self, viewport: &Viewport);

    fn set_render_targets(
        &mut self,
        render_targets: &[CpuDescriptorHandle],
        depth_stencil: Option<CpuDescriptorHandle>,
    );

    fn clear_render_target(&mut self, render_target: CpuDescriptorHandle, color: [f32; 4]);

    fn clear_depth(&mut self, depth_stencil: CpuDescriptorHandle, depth: f32);

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology);

    fn set_vertex_buffers(&mut self, start_slot: u32, views: &[VertexBufferView<'_, B>]);

    fn set_index_buffer(&mut self, view: &IndexBufferView<'_, B>);

    fn draw(&mut self, vertex_count: u32, instance_count: u32);

    fn draw_indexed(&mut self, index_count: u32, instance_count: u32, start_index: u32, base_vertex: i32);

    fn dispatch(&mut self, x: u32, y: u32, z: u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_viewport() {
        let vp = Viewport::full(1280, 720);
        assert_eq!(vp.width, 1280.0);
        assert_eq!(vp.height, 720.0);
        assert_eq!(vp.max_depth, 1.0);
    }
}

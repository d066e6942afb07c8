//! 计算着色器生成顶点
//!
//! 第一帧由 InitBlocks 计算着色器写入方块的位置、颜色和速度，
//! 之后每帧由 UpdateBlocks 读取上一帧的位置（SRV）写入这一帧的位置（UAV），
//! 两个位置缓冲交替使用，然后图形管线直接把它们当作顶点缓冲绘制。
//!
//! 每帧提交后等待 GPU 完成。

use bytemuck::{Pod, Zeroable};
use tracing::debug;

use crate::core::error::Result;
use crate::gfx::backend::{
    Backend, BufferDesc, ComputePipelineDesc, Format, GraphicsPipelineDesc, ResourceView, VertexAttribute,
};
use crate::renderer::command::{CommandList, PrimitiveTopology, VertexBufferView, Viewport};
use crate::renderer::descriptor::{DescriptorLayoutBuilder, DescriptorTable, HeapKind, SlotKey};
use crate::renderer::resource::{
    create_static_buffer, FrameConstantDesc, FrameResource, FrameTargets, ResourceState,
    TrackedResource,
};

use super::{loaded, FrameTiming, Pacing, Sample, SampleContext};

/// 每个方向上的 tile 数
pub const TILE_NUM: u32 = 16;
/// 每个 tile 中的方块数
pub const BLOCKS_PER_TILE: u32 = 64;
pub const NUM_BLOCKS: u32 = BLOCKS_PER_TILE * TILE_NUM * TILE_NUM;
/// 每个方块两个三角形
pub const NUM_VERTICES: u32 = NUM_BLOCKS * 6;

const FLOAT3_STRIDE: u32 = 12;
const FLOAT2_STRIDE: u32 = 8;

const POSITION_UAV: [SlotKey; 2] = ["position_uav_0", "position_uav_1"];
const POSITION_SRV: [SlotKey; 2] = ["position_srv_0", "position_srv_1"];
const COLOR_UAV: SlotKey = "color_uav";
const VELOCITY_UAV: SlotKey = "velocity_uav";

// 计算根参数
const ROOT_POSITION_UAV: u32 = 0;
/// InitBlocks 是颜色 UAV，UpdateBlocks 是上一帧位置的 SRV
const ROOT_SECOND_TABLE: u32 = 1;
const ROOT_VELOCITY_UAV: u32 = 2;
const ROOT_BLOCKS_CB: u32 = 3;

const CLEAR_COLOR: [f32; 4] = [0.0, 0.2, 0.4, 1.0];

/// tile 布局常量，大小正好 256 字节
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BlocksConstants {
    pub tiles: [u32; 4],
    pub block_width: [f32; 4],
    pub _padding: [[f32; 4]; 14],
}

impl BlocksConstants {
    pub fn new() -> Self {
        Self {
            tiles: [TILE_NUM, TILE_NUM, 0, 0],
            block_width: [2.0 / (8 * TILE_NUM) as f32, 0.0, 0.0, 0.0],
            ..Zeroable::zeroed()
        }
    }
}

impl Default for BlocksConstants {
    fn default() -> Self {
        Self::new()
    }
}

struct Assets<B: Backend> {
    init_blocks: B::Pipeline,
    update_blocks: B::Pipeline,
    draw: B::Pipeline,
    positions: [TrackedResource<B>; 2],
    colors: TrackedResource<B>,
    _velocities: B::Resource,
    blocks: B::Resource,
    width: u32,
    height: u32,
}

pub struct HelloCompute<B: Backend> {
    assets: Option<Assets<B>>,
    needs_init: bool,
    /// 这一帧写入的位置缓冲
    current: usize,
}

impl<B: Backend> HelloCompute<B> {
    pub fn new() -> Self {
        Self { assets: None, needs_init: true, current: 0 }
    }

    /// 下一帧是否运行 InitBlocks
    pub fn needs_init(&self) -> bool {
        self.needs_init
    }
}

impl<B: Backend> Default for HelloCompute<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Sample<B> for HelloCompute<B> {
    fn name(&self) -> &'static str {
        "Hello Compute"
    }

    fn pacing(&self) -> Pacing {
        Pacing::FullSync
    }

    fn declare_descriptors(&self, layout: &mut DescriptorLayoutBuilder) -> Result<()> {
        for key in POSITION_UAV.into_iter().chain(POSITION_SRV) {
            layout.fixed(HeapKind::CbvSrvUav, key)?;
        }
        layout.fixed(HeapKind::CbvSrvUav, COLOR_UAV)?;
        layout.fixed(HeapKind::CbvSrvUav, VELOCITY_UAV)?;
        Ok(())
    }

    fn frame_constants(&self) -> Vec<FrameConstantDesc> {
        Vec::new()
    }

    fn load_assets(&mut self, ctx: &SampleContext<'_, B>) -> Result<()> {
        let backend = ctx.backend;

        let init_blocks = backend.create_compute_pipeline(&ComputePipelineDesc {
            name: "InitBlocks",
            compute_shader: "InitBlocksCS.cso",
        })?;
        let update_blocks = backend.create_compute_pipeline(&ComputePipelineDesc {
            name: "UpdateBlocks",
            compute_shader: "UpdateBlocksCS.cso",
        })?;
        let input_layout = [
            VertexAttribute::vertex("POSITION", Format::Rgb32Float, 0, 0),
            VertexAttribute::vertex("COLOR", Format::Rgb32Float, 1, 0),
        ];
        let draw = backend.create_graphics_pipeline(&GraphicsPipelineDesc {
            name: "DrawBlocks",
            vertex_shader: "DrawBlocksVS.cso",
            pixel_shader: Some("DrawBlocksPS.cso"),
            input_layout: &input_layout,
            render_target_formats: &[Format::Rgba8Unorm],
            ..Default::default()
        })?;

        let vertex_bytes = (NUM_VERTICES * FLOAT3_STRIDE) as u64;
        let create_positions = |i: usize| -> Result<TrackedResource<B>> {
            let name = format!("Block Positions {}", i);
            let buffer = backend.create_buffer(
                &BufferDesc::gpu(&name, vertex_bytes, ResourceState::VertexAndConstantBuffer).with_unordered_access(),
            )?;
            backend.create_view(
                &ResourceView::BufferUav { resource: &buffer, count: NUM_VERTICES, stride: FLOAT3_STRIDE },
                ctx.table.cpu(HeapKind::CbvSrvUav, POSITION_UAV[i], None)?,
            )?;
            backend.create_view(
                &ResourceView::BufferSrv { resource: &buffer, count: NUM_VERTICES, stride: FLOAT3_STRIDE },
                ctx.table.cpu(HeapKind::CbvSrvUav, POSITION_SRV[i], None)?,
            )?;
            Ok(TrackedResource::new(buffer, ResourceState::VertexAndConstantBuffer))
        };
        let positions = [create_positions(0)?, create_positions(1)?];

        let colors = backend.create_buffer(
            &BufferDesc::gpu("Block Colors", vertex_bytes, ResourceState::UnorderedAccess).with_unordered_access(),
        )?;
        backend.create_view(
            &ResourceView::BufferUav { resource: &colors, count: NUM_VERTICES, stride: FLOAT3_STRIDE },
            ctx.table.cpu(HeapKind::CbvSrvUav, COLOR_UAV, None)?,
        )?;

        let velocities = backend.create_buffer(
            &BufferDesc::gpu("Block Velocities", (NUM_BLOCKS * FLOAT2_STRIDE) as u64, ResourceState::UnorderedAccess)
                .with_unordered_access(),
        )?;
        backend.create_view(
            &ResourceView::BufferUav { resource: &velocities, count: NUM_BLOCKS, stride: FLOAT2_STRIDE },
            ctx.table.cpu(HeapKind::CbvSrvUav, VELOCITY_UAV, None)?,
        )?;

        let constants = BlocksConstants::new();
        let blocks = create_static_buffer(backend, "Blocks CB", bytemuck::bytes_of(&constants))?;

        debug!(blocks = NUM_BLOCKS, vertices = NUM_VERTICES, "Hello Compute assets loaded");

        self.assets = Some(Assets {
            init_blocks,
            update_blocks,
            draw,
            positions,
            colors: TrackedResource::new(colors, ResourceState::UnorderedAccess),
            _velocities: velocities,
            blocks,
            width: ctx.width,
            height: ctx.height,
        });
        // 新设备上的缓冲内容未定义
        self.needs_init = true;
        self.current = 0;
        Ok(())
    }

    fn release_assets(&mut self) {
        self.assets = None;
    }

    fn update(&mut self, _frame: &mut FrameResource<B>, _timing: &FrameTiming) -> Result<()> {
        Ok(())
    }

    fn record(
        &mut self,
        list: &mut B::CommandList,
        mut frame: FrameTargets<'_, B>,
        table: &DescriptorTable<B>,
    ) -> Result<()> {
        let current = self.current;
        let previous = 1 - current;
        let needs_init = self.needs_init;
        let assets = loaded(&mut self.assets, "Hello Compute")?;

        let [first, second] = &mut assets.positions;
        let (target, source) = if current == 0 { (first, second) } else { (second, first) };

        target.transition_to(list, ResourceState::UnorderedAccess);
        if needs_init {
            assets.colors.transition_to(list, ResourceState::UnorderedAccess);
            list.set_pipeline(&assets.init_blocks);
            list.set_root_descriptor_table(
                ROOT_SECOND_TABLE,
                table.gpu(HeapKind::CbvSrvUav, COLOR_UAV, None)?,
            );
        } else {
            source.transition_to(list, ResourceState::NonPixelShaderResource);
            list.set_pipeline(&assets.update_blocks);
            list.set_root_descriptor_table(
                ROOT_SECOND_TABLE,
                table.gpu(HeapKind::CbvSrvUav, POSITION_SRV[previous], None)?,
            );
        }
        list.set_root_descriptor_table(
            ROOT_POSITION_UAV,
            table.gpu(HeapKind::CbvSrvUav, POSITION_UAV[current], None)?,
        );
        list.set_root_descriptor_table(ROOT_VELOCITY_UAV, table.gpu(HeapKind::CbvSrvUav, VELOCITY_UAV, None)?);
        list.set_root_constant_buffer(ROOT_BLOCKS_CB, &assets.blocks);
        list.dispatch(TILE_NUM, TILE_NUM, 1);

        target.transition_to(list, ResourceState::VertexAndConstantBuffer);
        assets.colors.transition_to(list, ResourceState::VertexAndConstantBuffer);

        list.set_pipeline(&assets.draw);
        list.set_viewport(&Viewport::full(assets.width, assets.height));
        frame.back_buffer.transition_to(list, ResourceState::RenderTarget);
        list.set_render_targets(&[frame.rtv], None);
        list.clear_render_target(frame.rtv, CLEAR_COLOR);
        list.set_primitive_topology(PrimitiveTopology::TriangleList);
        list.set_vertex_buffers(
            0,
            &[
                VertexBufferView { resource: target.resource(), stride: FLOAT3_STRIDE, size: NUM_VERTICES * FLOAT3_STRIDE },
                VertexBufferView {
                    resource: assets.colors.resource(),
                    stride: FLOAT3_STRIDE,
                    size: NUM_VERTICES * FLOAT3_STRIDE,
                },
            ],
        );
        list.draw(NUM_VERTICES, 1);
        frame.back_buffer.transition_to(list, ResourceState::Present);

        self.needs_init = false;
        self.current = previous;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_constants_fill_one_cbv() {
        assert_eq!(std::mem::size_of::<BlocksConstants>(), 256);
        let constants = BlocksConstants::new();
        assert_eq!(constants.tiles[0], TILE_NUM);
        assert!((constants.block_width[0] - 2.0 / 128.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_block_counts() {
        assert_eq!(NUM_BLOCKS, 16384);
        assert_eq!(NUM_VERTICES, 98304);
    }
}

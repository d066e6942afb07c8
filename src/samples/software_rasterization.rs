//! 计算着色器软件光栅化
//!
//! 画布是一张 R32Uint 纹理，每个像素对应屏幕上 8x8 的块：
//!
//! 1. RasterInit 清空画布
//! 2. RasterMain 遍历三角形，把覆盖的块写进画布
//! 3. 全屏三角形把画布放大拷贝到后缓冲

use bytemuck::{Pod, Zeroable};
use nalgebra::Point3;
use tracing::debug;

use crate::core::error::Result;
use crate::gfx::backend::{
    Backend, ComputePipelineDesc, Format, GraphicsPipelineDesc, ResourceView, TextureDesc, TextureUsage,
};
use crate::renderer::command::{CommandList, PrimitiveTopology, Viewport};
use crate::renderer::descriptor::{DescriptorLayoutBuilder, DescriptorTable, HeapKind, SlotKey};
use crate::renderer::resource::{
    create_static_buffer, FrameConstantDesc, FrameResource, FrameTargets, ResourceState, TrackedResource,
};

use super::camera::{to_gpu, Camera, GpuMatrix};
use super::{loaded, FrameTiming, Sample, SampleContext, SampleKey};

/// 画布一个像素覆盖的屏幕像素数（每个方向）
pub const CANVAS_BLOCK: u32 = 8;
/// RasterInit 的线程组大小（每个方向）
const INIT_GROUP_SIZE: u32 = 8;

const VERTEX_SRV: SlotKey = "vertex_srv";
const INDEX_SRV: SlotKey = "index_srv";
const CANVAS_SRV: SlotKey = "canvas_srv";
const CANVAS_UAV: SlotKey = "canvas_uav";

const RASTER_CONSTANTS: &str = "raster";

// 光栅化根参数
const ROOT_RASTER_CB: u32 = 0;
const ROOT_VERTICES: u32 = 1;
const ROOT_INDICES: u32 = 2;
const ROOT_CANVAS_UAV: u32 = 3;

// 拷贝根参数
const ROOT_COPY_SIZE: u32 = 0;
const ROOT_COPY_CANVAS: u32 = 1;

/// 光栅化常量，大小正好 256 字节
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RasterConstants {
    pub mvp: GpuMatrix,
    pub canvas_size: [u32; 2],
    pub num_triangles: [u32; 2],
    pub _padding: [[u32; 4]; 11],
}

const MESH_VERTICES: [[f32; 3]; 3] = [[1.0, 0.0, 0.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
const MESH_INDICES: [u32; 3] = [0, 1, 2];

/// 覆盖 `width` x `height` 屏幕的画布尺寸
pub fn canvas_size(width: u32, height: u32) -> (u32, u32) {
    (width.div_ceil(CANVAS_BLOCK), height.div_ceil(CANVAS_BLOCK))
}

struct Assets<B: Backend> {
    raster_init: B::Pipeline,
    rasterize: B::Pipeline,
    copy: B::Pipeline,
    canvas: TrackedResource<B>,
    vertices: B::Resource,
    indices: B::Resource,
    canvas_width: u32,
    canvas_height: u32,
    width: u32,
    height: u32,
}

pub struct SoftwareRasterization<B: Backend> {
    assets: Option<Assets<B>>,
    camera: Camera,
}

impl<B: Backend> SoftwareRasterization<B> {
    pub fn new() -> Self {
        Self {
            assets: None,
            camera: Camera::looking_at(Point3::new(0.0, 0.0, 5.0), Point3::origin()),
        }
    }
}

impl<B: Backend> Default for SoftwareRasterization<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Sample<B> for SoftwareRasterization<B> {
    fn name(&self) -> &'static str {
        "Software Rasterization"
    }

    fn declare_descriptors(&self, layout: &mut DescriptorLayoutBuilder) -> Result<()> {
        for key in [VERTEX_SRV, INDEX_SRV, CANVAS_SRV, CANVAS_UAV] {
            layout.fixed(HeapKind::CbvSrvUav, key)?;
        }
        Ok(())
    }

    fn frame_constants(&self) -> Vec<FrameConstantDesc> {
        vec![FrameConstantDesc::root::<RasterConstants>(RASTER_CONSTANTS)]
    }

    fn load_assets(&mut self, ctx: &SampleContext<'_, B>) -> Result<()> {
        let backend = ctx.backend;
        let table = ctx.table;

        let raster_init = backend.create_compute_pipeline(&ComputePipelineDesc {
            name: "RasterInit",
            compute_shader: "RasterInit.cso",
        })?;
        let rasterize = backend.create_compute_pipeline(&ComputePipelineDesc {
            name: "RasterMain",
            compute_shader: "RasterMain.cso",
        })?;
        let copy = backend.create_graphics_pipeline(&GraphicsPipelineDesc {
            name: "CopyToRenderTarget",
            vertex_shader: "CopyToRenderTargetVS.cso",
            pixel_shader: Some("CopyToRenderTargetPS.cso"),
            render_target_formats: &[Format::Rgba8Unorm],
            ..Default::default()
        })?;

        let (canvas_width, canvas_height) = canvas_size(ctx.width, ctx.height);
        let canvas = backend.create_texture(&TextureDesc {
            name: "Raster Canvas",
            width: canvas_width,
            height: canvas_height,
            format: Format::R32Uint,
            usage: TextureUsage { unordered_access: true, shader_resource: true, ..Default::default() },
            initial_state: ResourceState::PixelShaderResource,
            clear_value: None,
        })?;
        backend.create_view(&ResourceView::TextureSrv(&canvas), table.cpu(HeapKind::CbvSrvUav, CANVAS_SRV, None)?)?;
        backend.create_view(&ResourceView::TextureUav(&canvas), table.cpu(HeapKind::CbvSrvUav, CANVAS_UAV, None)?)?;

        let vertices = create_static_buffer(backend, "Raster Vertices", bytemuck::cast_slice(&MESH_VERTICES))?;
        let indices = create_static_buffer(backend, "Raster Indices", bytemuck::cast_slice(&MESH_INDICES))?;
        backend.create_view(
            &ResourceView::BufferSrv { resource: &vertices, count: MESH_VERTICES.len() as u32, stride: 12 },
            table.cpu(HeapKind::CbvSrvUav, VERTEX_SRV, None)?,
        )?;
        backend.create_view(
            &ResourceView::BufferSrv { resource: &indices, count: MESH_INDICES.len() as u32, stride: 4 },
            table.cpu(HeapKind::CbvSrvUav, INDEX_SRV, None)?,
        )?;

        debug!(canvas_width, canvas_height, "Software Rasterization assets loaded");

        self.assets = Some(Assets {
            raster_init,
            rasterize,
            copy,
            canvas: TrackedResource::new(canvas, ResourceState::PixelShaderResource),
            vertices,
            indices,
            canvas_width,
            canvas_height,
            width: ctx.width,
            height: ctx.height,
        });
        Ok(())
    }

    fn release_assets(&mut self) {
        self.assets = None;
    }

    fn update(&mut self, frame: &mut FrameResource<B>, _timing: &FrameTiming) -> Result<()> {
        let assets = match &self.assets {
            Some(assets) => assets,
            None => return Ok(()),
        };

        let (view, projection) = self.camera.view_projection(90.0, assets.width, assets.height);
        let constants = RasterConstants {
            mvp: to_gpu(&(projection * view)),
            canvas_size: [assets.canvas_width, assets.canvas_height],
            num_triangles: [(MESH_INDICES.len() / 3) as u32, 0],
            ..Zeroable::zeroed()
        };
        frame.write_constants(RASTER_CONSTANTS, &constants)
    }

    fn record(
        &mut self,
        list: &mut B::CommandList,
        mut frame: FrameTargets<'_, B>,
        table: &DescriptorTable<B>,
    ) -> Result<()> {
        let assets = loaded(&mut self.assets, "Software Rasterization")?;
        let raster_constants = frame.constants(RASTER_CONSTANTS)?;
        let canvas_uav = table.gpu(HeapKind::CbvSrvUav, CANVAS_UAV, None)?;

        // 清空画布
        assets.canvas.transition_to(list, ResourceState::UnorderedAccess);
        list.set_pipeline(&assets.raster_init);
        list.set_root_constant_buffer(ROOT_RASTER_CB, raster_constants);
        list.set_root_shader_resource(ROOT_VERTICES, &assets.vertices);
        list.set_root_shader_resource(ROOT_INDICES, &assets.indices);
        list.set_root_descriptor_table(ROOT_CANVAS_UAV, canvas_uav);
        list.dispatch(
            assets.canvas_width.div_ceil(INIT_GROUP_SIZE),
            assets.canvas_height.div_ceil(INIT_GROUP_SIZE),
            1,
        );
        assets.canvas.uav_barrier(list);

        // 光栅化
        list.set_pipeline(&assets.rasterize);
        list.set_root_constant_buffer(ROOT_RASTER_CB, raster_constants);
        list.set_root_shader_resource(ROOT_VERTICES, &assets.vertices);
        list.set_root_shader_resource(ROOT_INDICES, &assets.indices);
        list.set_root_descriptor_table(ROOT_CANVAS_UAV, canvas_uav);
        list.dispatch(1, 1, 1);

        // 拷贝到后缓冲
        let barriers: Vec<_> = [
            assets.canvas.barrier_to(ResourceState::PixelShaderResource),
            frame.back_buffer.barrier_to(ResourceState::RenderTarget),
        ]
        .into_iter()
        .flatten()
        .collect();
        list.resource_barrier(&barriers);
        list.set_render_targets(&[frame.rtv], None);
        list.set_viewport(&Viewport::full(assets.width, assets.height));
        list.clear_render_target(frame.rtv, [0.0; 4]);
        list.set_pipeline(&assets.copy);
        list.set_root_constants(ROOT_COPY_SIZE, &[assets.canvas_width, assets.canvas_height]);
        list.set_root_descriptor_table(ROOT_COPY_CANVAS, table.gpu(HeapKind::CbvSrvUav, CANVAS_SRV, None)?);
        list.set_primitive_topology(PrimitiveTopology::TriangleList);
        list.draw(3, 1);
        frame.back_buffer.transition_to(list, ResourceState::Present);
        Ok(())
    }

    fn on_key(&mut self, key: SampleKey) {
        match key {
            SampleKey::Up => self.camera.move_forward(0.5),
            SampleKey::Down => self.camera.move_forward(-0.5),
            SampleKey::Left => self.camera.rotate_yaw(0.1),
            SampleKey::Right => self.camera.rotate_yaw(-0.1),
            SampleKey::Toggle => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raster_constants_fill_one_cbv() {
        assert_eq!(std::mem::size_of::<RasterConstants>(), 256);
    }

    #[test]
    fn test_canvas_size_rounds_up() {
        assert_eq!(canvas_size(1280, 720), (160, 90));
        assert_eq!(canvas_size(1281, 721), (161, 91));
        assert_eq!(canvas_size(1, 1), (1, 1));
    }
}

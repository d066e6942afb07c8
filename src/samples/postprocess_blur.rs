//! 阴影 + 离屏场景 + 全屏模糊
//!
//! 每帧三个 pass：
//!
//! 1. 阴影：从第一个灯光渲染深度到阴影贴图
//! 2. 场景：采样阴影贴图，渲染到离屏颜色纹理
//! 3. 后处理：全屏三角形读取场景颜色，模糊后写入后缓冲
//!
//! 阴影和场景常量通过每帧 CBV 描述符表绑定，屏幕信息通过根 CBV 绑定。

use bytemuck::{Pod, Zeroable};
use nalgebra::{Matrix4, Point3};
use tracing::debug;

use crate::core::error::Result;
use crate::gfx::backend::{
    AddressMode, Backend, ClearValue, Filter, Format, GraphicsPipelineDesc, ResourceView, SamplerDesc,
    TextureDesc, TextureUsage, VertexAttribute,
};
use crate::renderer::command::{CommandList, IndexBufferView, IndexFormat, PrimitiveTopology, VertexBufferView, Viewport};
use crate::renderer::descriptor::{DescriptorLayoutBuilder, DescriptorTable, HeapKind, SlotKey};
use crate::renderer::resource::{
    create_static_buffer, FrameConstantDesc, FrameResource, FrameTargets, ResourceState, TrackedResource,
};

use super::camera::{animate_lights, default_lights, to_gpu, Camera, GpuMatrix, LightState, NUM_LIGHTS};
use super::{loaded, FrameTiming, Sample, SampleContext, SampleKey};

// 固定槽位
const NULL_SRV: SlotKey = "null_srv";
const SHADOW_SRV: SlotKey = "shadow_srv";
const SCENE_COLOR_SRV: SlotKey = "scene_color_srv";
const SCENE_COLOR_RTV: SlotKey = "scene_color_rtv";
const DEPTH_DSV: SlotKey = "depth_dsv";
const SHADOW_DSV: SlotKey = "shadow_dsv";
/// 场景根签名的采样器表从这里开始（线性 + 阴影比较）
const WRAP_SAMPLER: SlotKey = "wrap_sampler";
const SHADOW_SAMPLER: SlotKey = "shadow_sampler";

// 每帧槽位
const SHADOW_CBV: SlotKey = "shadow_cbv";
const SCENE_CBV: SlotKey = "scene_cbv";

// 每帧常量名
const SHADOW_CONSTANTS: &str = "shadow";
const SCENE_CONSTANTS: &str = "scene";
const SCREEN_INFO: &str = "screen_info";

// 场景根参数
const ROOT_DIFFUSE_SRV: u32 = 0;
const ROOT_SCENE_CBV: u32 = 1;
const ROOT_SHADOW_SRV: u32 = 2;
const ROOT_SAMPLERS: u32 = 3;

// 模糊根参数
const ROOT_BLUR_SOURCE: u32 = 0;
const ROOT_SCREEN_INFO: u32 = 1;

const BLUR_RADIUS: u32 = 4;
const LIGHT_ORBIT_SPEED: f32 = 0.5;
const CAMERA_TURN_STEP: f32 = 0.1;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SceneConstants {
    pub model: GpuMatrix,
    pub view: GpuMatrix,
    pub projection: GpuMatrix,
    pub ambient_color: [f32; 4],
    pub sample_shadow_map: u32,
    pub _padding: [u32; 3],
    pub lights: [LightState; NUM_LIGHTS],
}

/// 屏幕宽高和模糊半径，半径为 0 时直接复制
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ScreenInfo {
    pub size: [u32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SceneVertex {
    position: [f32; 3],
    normal: [f32; 3],
    uv: [f32; 2],
}

const VERTEX_STRIDE: u32 = std::mem::size_of::<SceneVertex>() as u32;

/// 一次 DrawIndexed 的参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DrawParameters {
    index_count: u32,
    index_start: u32,
    vertex_base: i32,
}

struct SceneMesh {
    vertices: Vec<SceneVertex>,
    indices: Vec<u32>,
    draws: Vec<DrawParameters>,
}

impl SceneMesh {
    fn push_quad(&mut self, corners: [[f32; 3]; 4], normal: [f32; 3]) {
        let base = self.vertices.len() as u32;
        let uvs = [[0.0, 1.0], [0.0, 0.0], [1.0, 0.0], [1.0, 1.0]];
        for (position, uv) in corners.into_iter().zip(uvs) {
            self.vertices.push(SceneVertex { position, normal, uv });
        }
        self.indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    /// 地面和一个立方体，各自一次绘制
    fn build() -> Self {
        let mut mesh = Self { vertices: Vec::new(), indices: Vec::new(), draws: Vec::new() };

        let extent = 20.0;
        mesh.push_quad(
            [[-extent, 0.0, -extent], [-extent, 0.0, extent], [extent, 0.0, extent], [extent, 0.0, -extent]],
            [0.0, 1.0, 0.0],
        );
        mesh.draws.push(DrawParameters { index_count: 6, index_start: 0, vertex_base: 0 });

        let cube_vertex_base = mesh.vertices.len() as i32;
        let cube_index_start = mesh.indices.len() as u32;
        let vertex_start = mesh.vertices.len() as u32;
        let (s, y0, y1) = (2.0, 0.0, 4.0);
        let faces: [([[f32; 3]; 4], [f32; 3]); 6] = [
            ([[-s, y0, -s], [-s, y1, -s], [s, y1, -s], [s, y0, -s]], [0.0, 0.0, -1.0]),
            ([[s, y0, s], [s, y1, s], [-s, y1, s], [-s, y0, s]], [0.0, 0.0, 1.0]),
            ([[-s, y0, s], [-s, y1, s], [-s, y1, -s], [-s, y0, -s]], [-1.0, 0.0, 0.0]),
            ([[s, y0, -s], [s, y1, -s], [s, y1, s], [s, y0, s]], [1.0, 0.0, 0.0]),
            ([[-s, y1, -s], [-s, y1, s], [s, y1, s], [s, y1, -s]], [0.0, 1.0, 0.0]),
            ([[-s, y0, s], [-s, y0, -s], [s, y0, -s], [s, y0, s]], [0.0, -1.0, 0.0]),
        ];
        for (corners, normal) in faces {
            mesh.push_quad(corners, normal);
        }
        // 立方体索引相对自己的第一个顶点
        for index in &mut mesh.indices[cube_index_start as usize..] {
            *index -= vertex_start;
        }
        mesh.draws.push(DrawParameters {
            index_count: mesh.indices.len() as u32 - cube_index_start,
            index_start: cube_index_start,
            vertex_base: cube_vertex_base,
        });

        mesh
    }
}

struct Assets<B: Backend> {
    shadow_pipeline: B::Pipeline,
    scene_pipeline: B::Pipeline,
    blur_pipeline: B::Pipeline,
    shadow_map: TrackedResource<B>,
    scene_color: TrackedResource<B>,
    _depth: B::Resource,
    vertex_buffer: B::Resource,
    index_buffer: B::Resource,
    vertex_bytes: u32,
    index_bytes: u32,
    draws: Vec<DrawParameters>,
    width: u32,
    height: u32,
}

pub struct PostprocessBlur<B: Backend> {
    assets: Option<Assets<B>>,
    camera: Camera,
    lights: [LightState; NUM_LIGHTS],
    blur_enabled: bool,
}

impl<B: Backend> PostprocessBlur<B> {
    pub fn new() -> Self {
        Self {
            assets: None,
            camera: Camera::looking_at(Point3::new(0.0, 15.0, -30.0), Point3::new(0.0, 8.0, 0.0)),
            lights: default_lights([0.0, 15.0, -30.0, 1.0]),
            blur_enabled: true,
        }
    }

    pub fn blur_enabled(&self) -> bool {
        self.blur_enabled
    }

    fn scene_constants(&self, view: &Matrix4<f32>, projection: &Matrix4<f32>, sample_shadow_map: bool) -> SceneConstants {
        SceneConstants {
            model: to_gpu(&Matrix4::identity()),
            view: to_gpu(view),
            projection: to_gpu(projection),
            ambient_color: [0.1, 0.2, 0.3, 1.0],
            sample_shadow_map: sample_shadow_map as u32,
            _padding: [0; 3],
            lights: self.lights,
        }
    }
}

impl<B: Backend> Default for PostprocessBlur<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Sample<B> for PostprocessBlur<B> {
    fn name(&self) -> &'static str {
        "Postprocess Blur"
    }

    fn declare_descriptors(&self, layout: &mut DescriptorLayoutBuilder) -> Result<()> {
        layout.fixed(HeapKind::CbvSrvUav, NULL_SRV)?;
        layout.fixed(HeapKind::CbvSrvUav, SHADOW_SRV)?;
        layout.fixed(HeapKind::CbvSrvUav, SCENE_COLOR_SRV)?;
        layout.fixed(HeapKind::Rtv, SCENE_COLOR_RTV)?;
        layout.fixed(HeapKind::Dsv, DEPTH_DSV)?;
        layout.fixed(HeapKind::Dsv, SHADOW_DSV)?;
        layout.fixed(HeapKind::Sampler, WRAP_SAMPLER)?;
        layout.fixed(HeapKind::Sampler, SHADOW_SAMPLER)?;
        Ok(())
    }

    fn frame_constants(&self) -> Vec<FrameConstantDesc> {
        vec![
            FrameConstantDesc::table::<SceneConstants>(SHADOW_CONSTANTS, SHADOW_CBV),
            FrameConstantDesc::table::<SceneConstants>(SCENE_CONSTANTS, SCENE_CBV),
            FrameConstantDesc::root::<ScreenInfo>(SCREEN_INFO),
        ]
    }

    fn load_assets(&mut self, ctx: &SampleContext<'_, B>) -> Result<()> {
        let backend = ctx.backend;
        let table = ctx.table;

        let input_layout = [
            VertexAttribute::vertex("POSITION", Format::Rgb32Float, 0, 0),
            VertexAttribute::vertex("NORMAL", Format::Rgb32Float, 0, 12),
            VertexAttribute::vertex("TEXCOORD", Format::Rg32Float, 0, 24),
        ];
        let scene_pipeline = backend.create_graphics_pipeline(&GraphicsPipelineDesc {
            name: "Scene",
            vertex_shader: "SceneVS.cso",
            pixel_shader: Some("ScenePS.cso"),
            input_layout: &input_layout,
            render_target_formats: &[Format::Rgba8Unorm],
            depth_format: Some(Format::D32Float),
            ..Default::default()
        })?;
        // 只写深度，没有像素着色器
        let shadow_pipeline = backend.create_graphics_pipeline(&GraphicsPipelineDesc {
            name: "Shadow",
            vertex_shader: "SceneVS.cso",
            input_layout: &input_layout,
            depth_format: Some(Format::D32Float),
            ..Default::default()
        })?;
        let blur_pipeline = backend.create_graphics_pipeline(&GraphicsPipelineDesc {
            name: "Blur",
            vertex_shader: "PostprocessVS.cso",
            pixel_shader: Some("PostprocessPS.cso"),
            render_target_formats: &[Format::Rgba8Unorm],
            ..Default::default()
        })?;

        let shadow_map = backend.create_texture(&TextureDesc {
            name: "Shadow Map",
            width: ctx.width,
            height: ctx.height,
            format: Format::D32Float,
            usage: TextureUsage { depth_stencil: true, shader_resource: true, ..Default::default() },
            initial_state: ResourceState::PixelShaderResource,
            clear_value: Some(ClearValue::Depth(1.0)),
        })?;
        let depth = backend.create_texture(&TextureDesc {
            name: "Scene Depth",
            width: ctx.width,
            height: ctx.height,
            format: Format::D32Float,
            usage: TextureUsage { depth_stencil: true, ..Default::default() },
            initial_state: ResourceState::DepthWrite,
            clear_value: Some(ClearValue::Depth(1.0)),
        })?;
        let scene_color = backend.create_texture(&TextureDesc {
            name: "Scene Color",
            width: ctx.width,
            height: ctx.height,
            format: Format::Rgba8Unorm,
            usage: TextureUsage { render_target: true, shader_resource: true, ..Default::default() },
            initial_state: ResourceState::PixelShaderResource,
            clear_value: Some(ClearValue::Color([0.0, 0.0, 0.0, 1.0])),
        })?;

        backend.create_view(&ResourceView::NullTextureSrv, table.cpu(HeapKind::CbvSrvUav, NULL_SRV, None)?)?;
        backend.create_view(
            &ResourceView::TextureSrv(&shadow_map),
            table.cpu(HeapKind::CbvSrvUav, SHADOW_SRV, None)?,
        )?;
        backend.create_view(
            &ResourceView::TextureSrv(&scene_color),
            table.cpu(HeapKind::CbvSrvUav, SCENE_COLOR_SRV, None)?,
        )?;
        backend.create_view(&ResourceView::RenderTarget(&scene_color), table.cpu(HeapKind::Rtv, SCENE_COLOR_RTV, None)?)?;
        backend.create_view(&ResourceView::DepthStencil(&depth), table.cpu(HeapKind::Dsv, DEPTH_DSV, None)?)?;
        backend.create_view(&ResourceView::DepthStencil(&shadow_map), table.cpu(HeapKind::Dsv, SHADOW_DSV, None)?)?;
        backend.create_view(
            &ResourceView::Sampler(SamplerDesc { filter: Filter::Linear, address: AddressMode::Wrap }),
            table.cpu(HeapKind::Sampler, WRAP_SAMPLER, None)?,
        )?;
        backend.create_view(
            &ResourceView::Sampler(SamplerDesc { filter: Filter::ComparisonLinear, address: AddressMode::Border }),
            table.cpu(HeapKind::Sampler, SHADOW_SAMPLER, None)?,
        )?;

        let mesh = SceneMesh::build();
        let vertex_data = bytemuck::cast_slice(&mesh.vertices);
        let index_data = bytemuck::cast_slice(&mesh.indices);
        let vertex_buffer = create_static_buffer(backend, "Scene Vertices", vertex_data)?;
        let index_buffer = create_static_buffer(backend, "Scene Indices", index_data)?;

        debug!(
            vertices = mesh.vertices.len(),
            indices = mesh.indices.len(),
            width = ctx.width,
            height = ctx.height,
            "Postprocess Blur assets loaded"
        );

        self.assets = Some(Assets {
            shadow_pipeline,
            scene_pipeline,
            blur_pipeline,
            shadow_map: TrackedResource::new(shadow_map, ResourceState::PixelShaderResource),
            scene_color: TrackedResource::new(scene_color, ResourceState::PixelShaderResource),
            _depth: depth,
            vertex_buffer,
            index_buffer,
            vertex_bytes: vertex_data.len() as u32,
            index_bytes: index_data.len() as u32,
            draws: mesh.draws,
            width: ctx.width,
            height: ctx.height,
        });
        Ok(())
    }

    fn release_assets(&mut self) {
        self.assets = None;
    }

    fn update(&mut self, frame: &mut FrameResource<B>, timing: &FrameTiming) -> Result<()> {
        let (width, height) = match &self.assets {
            Some(assets) => (assets.width, assets.height),
            None => return Ok(()),
        };

        animate_lights(
            &mut self.lights,
            LIGHT_ORBIT_SPEED * timing.delta,
            Point3::new(0.0, 8.0, 0.0),
            width,
            height,
        );

        // 阴影 pass 从第一个灯光看场景
        let light = &self.lights[0];
        let light_eye = Point3::new(light.position[0], light.position[1], light.position[2]);
        let light_camera = Camera::looking_at(light_eye, Point3::new(0.0, 8.0, 0.0));
        let (light_view, light_projection) = light_camera.view_projection(90.0, width, height);
        let shadow = self.scene_constants(&light_view, &light_projection, false);

        let (view, projection) = self.camera.view_projection(90.0, width, height);
        let scene = self.scene_constants(&view, &projection, true);

        let radius = if self.blur_enabled { BLUR_RADIUS } else { 0 };
        let screen = ScreenInfo { size: [width, height, radius, 0] };

        frame.write_constants(SHADOW_CONSTANTS, &shadow)?;
        frame.write_constants(SCENE_CONSTANTS, &scene)?;
        frame.write_constants(SCREEN_INFO, &screen)?;
        Ok(())
    }

    fn record(
        &mut self,
        list: &mut B::CommandList,
        mut frame: FrameTargets<'_, B>,
        table: &DescriptorTable<B>,
    ) -> Result<()> {
        let assets = loaded(&mut self.assets, "Postprocess Blur")?;
        let viewport = Viewport::full(assets.width, assets.height);
        let null_srv = table.gpu(HeapKind::CbvSrvUav, NULL_SRV, None)?;
        let samplers = table.gpu(HeapKind::Sampler, WRAP_SAMPLER, None)?;
        let shadow_dsv = table.cpu(HeapKind::Dsv, SHADOW_DSV, None)?;
        let depth_dsv = table.cpu(HeapKind::Dsv, DEPTH_DSV, None)?;
        let scene_rtv = table.cpu(HeapKind::Rtv, SCENE_COLOR_RTV, None)?;
        let vertex_views = [VertexBufferView {
            resource: &assets.vertex_buffer,
            stride: VERTEX_STRIDE,
            size: assets.vertex_bytes,
        }];
        let index_view = IndexBufferView {
            resource: &assets.index_buffer,
            format: IndexFormat::U32,
            size: assets.index_bytes,
        };

        // 阴影
        assets.shadow_map.transition_to(list, ResourceState::DepthWrite);
        list.clear_depth(shadow_dsv, 1.0);
        list.set_render_targets(&[], Some(shadow_dsv));
        list.set_viewport(&viewport);
        list.set_pipeline(&assets.shadow_pipeline);
        list.set_root_descriptor_table(ROOT_DIFFUSE_SRV, null_srv);
        list.set_root_descriptor_table(ROOT_SCENE_CBV, frame.constant_view(SHADOW_CONSTANTS)?);
        list.set_root_descriptor_table(ROOT_SHADOW_SRV, null_srv);
        list.set_root_descriptor_table(ROOT_SAMPLERS, samplers);
        list.set_primitive_topology(PrimitiveTopology::TriangleList);
        list.set_vertex_buffers(0, &vertex_views);
        list.set_index_buffer(&index_view);
        for draw in &assets.draws {
            list.draw_indexed(draw.index_count, 1, draw.index_start, draw.vertex_base);
        }

        // 场景
        let barriers: Vec<_> = [
            assets.shadow_map.barrier_to(ResourceState::PixelShaderResource),
            assets.scene_color.barrier_to(ResourceState::RenderTarget),
        ]
        .into_iter()
        .flatten()
        .collect();
        list.resource_barrier(&barriers);
        list.clear_render_target(scene_rtv, [0.0, 0.0, 0.0, 1.0]);
        list.clear_depth(depth_dsv, 1.0);
        list.set_render_targets(&[scene_rtv], Some(depth_dsv));
        list.set_viewport(&viewport);
        list.set_primitive_topology(PrimitiveTopology::TriangleList);
        list.set_vertex_buffers(0, &vertex_views);
        list.set_index_buffer(&index_view);
        list.set_pipeline(&assets.scene_pipeline);
        list.set_root_descriptor_table(ROOT_SCENE_CBV, frame.constant_view(SCENE_CONSTANTS)?);
        list.set_root_descriptor_table(ROOT_SHADOW_SRV, table.gpu(HeapKind::CbvSrvUav, SHADOW_SRV, None)?);
        list.set_root_descriptor_table(ROOT_SAMPLERS, samplers);
        for draw in &assets.draws {
            // 没有漫反射贴图
            list.set_root_descriptor_table(ROOT_DIFFUSE_SRV, null_srv);
            list.draw_indexed(draw.index_count, 1, draw.index_start, draw.vertex_base);
        }

        // 后处理
        let barriers: Vec<_> = [
            frame.back_buffer.barrier_to(ResourceState::RenderTarget),
            assets.scene_color.barrier_to(ResourceState::PixelShaderResource),
        ]
        .into_iter()
        .flatten()
        .collect();
        list.resource_barrier(&barriers);
        list.set_render_targets(&[frame.rtv], None);
        list.set_viewport(&viewport);
        list.set_primitive_topology(PrimitiveTopology::TriangleList);
        list.set_pipeline(&assets.blur_pipeline);
        list.set_root_descriptor_table(ROOT_BLUR_SOURCE, table.gpu(HeapKind::CbvSrvUav, SCENE_COLOR_SRV, None)?);
        list.set_root_constant_buffer(ROOT_SCREEN_INFO, frame.constants(SCREEN_INFO)?);
        list.draw(3, 1);
        frame.back_buffer.transition_to(list, ResourceState::Present);
        Ok(())
    }

    fn on_key(&mut self, key: SampleKey) {
        match key {
            SampleKey::Toggle => {
                self.blur_enabled = !self.blur_enabled;
                debug!(enabled = self.blur_enabled, "Blur toggled");
            }
            SampleKey::Left => self.camera.rotate_yaw(CAMERA_TURN_STEP),
            SampleKey::Right => self.camera.rotate_yaw(-CAMERA_TURN_STEP),
            SampleKey::Up => self.camera.rotate_pitch(CAMERA_TURN_STEP),
            SampleKey::Down => self.camera.rotate_pitch(-CAMERA_TURN_STEP),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_mesh_draws_cover_all_indices() {
        let mesh = SceneMesh::build();
        assert_eq!(mesh.draws.len(), 2);
        let total: u32 = mesh.draws.iter().map(|d| d.index_count).sum();
        assert_eq!(total as usize, mesh.indices.len());

        for draw in &mesh.draws {
            let range = draw.index_start as usize..(draw.index_start + draw.index_count) as usize;
            for &index in &mesh.indices[range] {
                let vertex = draw.vertex_base as usize + index as usize;
                assert!(vertex < mesh.vertices.len());
            }
        }
    }

    #[test]
    fn test_constant_layouts() {
        assert_eq!(std::mem::size_of::<SceneVertex>(), 32);
        assert_eq!(std::mem::size_of::<ScreenInfo>(), 16);
        assert_eq!(std::mem::size_of::<SceneConstants>() % 16, 0);
    }

    #[test]
    fn test_toggle_blur() {
        let mut sample = PostprocessBlur::<crate::gfx::sim::SimBackend>::new();
        assert!(sample.blur_enabled());
        sample.on_key(SampleKey::Toggle);
        assert!(!sample.blur_enabled());
    }
}

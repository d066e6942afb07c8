//! 曲面细分地形
//!
//! 一个 4 控制点的四边形面片按实例放置，外壳着色器按细分因子切分，
//! 域着色器根据时间和高度生成起伏。默认线框显示。

use bytemuck::{Pod, Zeroable};
use nalgebra::Point3;
use tracing::debug;

use crate::core::error::Result;
use crate::gfx::backend::{
    Backend, ClearValue, Format, GraphicsPipelineDesc, ResourceView, TextureDesc, TextureUsage, TopologyType,
    VertexAttribute,
};
use crate::renderer::command::{CommandList, PrimitiveTopology, VertexBufferView, Viewport};
use crate::renderer::descriptor::{DescriptorLayoutBuilder, DescriptorTable, HeapKind, SlotKey};
use crate::renderer::resource::{
    create_static_buffer, FrameConstantDesc, FrameResource, FrameTargets, ResourceState,
};

use super::camera::{default_lights, to_gpu, Camera, GpuMatrix, LightState, NUM_LIGHTS};
use super::{loaded, FrameTiming, Sample, SampleContext, SampleKey};

const DEPTH_DSV: SlotKey = "depth_dsv";
const SCENE_CONSTANTS: &str = "scene";

const ROOT_SCENE_CBV: u32 = 0;

const CONTROL_POINTS: u32 = 4;
const INSTANCE_COUNT: u32 = 1;
const INSTANCE_SCALE: f32 = 5.0;
const INSTANCE_DISTANCE: f32 = 10.0;
const TERRAIN_HEIGHT: f32 = 5.0;

pub const DEFAULT_TESS_FACTOR: f32 = 8.0;
pub const MIN_TESS_FACTOR: f32 = 1.0;
/// D3D11_TESSELLATOR_MAX_TESSELLATION_FACTOR
pub const MAX_TESS_FACTOR: f32 = 64.0;

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TessSceneConstants {
    pub view: GpuMatrix,
    pub projection: GpuMatrix,
    pub screen_size: [f32; 4],
    /// 时间、高度、细分因子
    pub scene_info: [f32; 4],
    pub ambient_color: [f32; 4],
    pub lights: [LightState; NUM_LIGHTS],
}

/// 每个实例的世界矩阵（3x4，行主序）
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct InstanceData {
    world: [[f32; 4]; 3],
}

/// 按网格排布的实例
fn instance_transforms(count: u32) -> Vec<InstanceData> {
    let per_row = (count as f32).sqrt().ceil().max(1.0) as u32;
    let offset = (per_row - 1) as f32 * INSTANCE_DISTANCE * 0.5;
    (0..count)
        .map(|i| {
            let x = (i % per_row) as f32 * INSTANCE_DISTANCE - offset;
            let z = (i / per_row) as f32 * INSTANCE_DISTANCE - offset;
            let s = INSTANCE_SCALE;
            InstanceData {
                world: [[s, 0.0, 0.0, x], [0.0, s, 0.0, 0.0], [0.0, 0.0, s, z]],
            }
        })
        .collect()
}

const PATCH_VERTICES: [[f32; 3]; CONTROL_POINTS as usize] =
    [[-1.0, 0.0, 1.0], [1.0, 0.0, 1.0], [-1.0, 0.0, -1.0], [1.0, 0.0, -1.0]];

struct Assets<B: Backend> {
    solid: B::Pipeline,
    wireframe: B::Pipeline,
    _depth: B::Resource,
    patch: B::Resource,
    instances: B::Resource,
    instance_bytes: u32,
    width: u32,
    height: u32,
}

pub struct Tessellation<B: Backend> {
    assets: Option<Assets<B>>,
    camera: Camera,
    lights: [LightState; NUM_LIGHTS],
    wireframe: bool,
    tess_factor: f32,
}

impl<B: Backend> Tessellation<B> {
    pub fn new() -> Self {
        let eye = Point3::new(0.0, 8.0, -12.0);
        Self {
            assets: None,
            camera: Camera::looking_at(eye, Point3::origin()),
            lights: default_lights([0.0, 20.0, -20.0, 1.0]),
            wireframe: true,
            tess_factor: DEFAULT_TESS_FACTOR,
        }
    }

    pub fn wireframe(&self) -> bool {
        self.wireframe
    }

    pub fn tess_factor(&self) -> f32 {
        self.tess_factor
    }

    fn adjust_tess_factor(&mut self, delta: f32) {
        self.tess_factor = (self.tess_factor + delta).clamp(MIN_TESS_FACTOR, MAX_TESS_FACTOR);
        debug!(factor = self.tess_factor, "Tessellation factor changed");
    }
}

impl<B: Backend> Default for Tessellation<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Sample<B> for Tessellation<B> {
    fn name(&self) -> &'static str {
        "Tessellation"
    }

    fn declare_descriptors(&self, layout: &mut DescriptorLayoutBuilder) -> Result<()> {
        layout.fixed(HeapKind::Dsv, DEPTH_DSV)
    }

    fn frame_constants(&self) -> Vec<FrameConstantDesc> {
        vec![FrameConstantDesc::root::<TessSceneConstants>(SCENE_CONSTANTS)]
    }

    fn load_assets(&mut self, ctx: &SampleContext<'_, B>) -> Result<()> {
        let backend = ctx.backend;

        let input_layout = [
            VertexAttribute::vertex("POSITION", Format::Rgb32Float, 0, 0),
            VertexAttribute::instance("WORLD", 0, Format::Rgba32Float, 1, 0),
            VertexAttribute::instance("WORLD", 1, Format::Rgba32Float, 1, 16),
            VertexAttribute::instance("WORLD", 2, Format::Rgba32Float, 1, 32),
        ];
        let pipeline = |name: &str, wireframe: bool| {
            backend.create_graphics_pipeline(&GraphicsPipelineDesc {
                name,
                vertex_shader: "ShadingVS.cso",
                hull_shader: Some("ShadingHS.cso"),
                domain_shader: Some("ShadingDS.cso"),
                pixel_shader: Some("ShadingPS.cso"),
                input_layout: &input_layout,
                topology: TopologyType::Patch,
                render_target_formats: &[Format::Rgba8Unorm],
                depth_format: Some(Format::D32Float),
                wireframe,
            })
        };
        let solid = pipeline("Terrain Solid", false)?;
        let wireframe = pipeline("Terrain Wireframe", true)?;

        let depth = backend.create_texture(&TextureDesc {
            name: "Terrain Depth",
            width: ctx.width,
            height: ctx.height,
            format: Format::D32Float,
            usage: TextureUsage { depth_stencil: true, ..Default::default() },
            initial_state: ResourceState::DepthWrite,
            clear_value: Some(ClearValue::Depth(1.0)),
        })?;
        backend.create_view(&ResourceView::DepthStencil(&depth), ctx.table.cpu(HeapKind::Dsv, DEPTH_DSV, None)?)?;

        let patch = create_static_buffer(backend, "Terrain Patch", bytemuck::cast_slice(&PATCH_VERTICES))?;
        let transforms = instance_transforms(INSTANCE_COUNT);
        let instance_data: &[u8] = bytemuck::cast_slice(&transforms);
        let instances = create_static_buffer(backend, "Terrain Instances", instance_data)?;

        debug!(instances = INSTANCE_COUNT, width = ctx.width, height = ctx.height, "Tessellation assets loaded");

        self.assets = Some(Assets {
            solid,
            wireframe,
            _depth: depth,
            patch,
            instances,
            instance_bytes: instance_data.len() as u32,
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

        let (view, projection) = self.camera.view_projection(90.0, width, height);
        let constants = TessSceneConstants {
            view: to_gpu(&view),
            projection: to_gpu(&projection),
            screen_size: [width as f32, height as f32, 0.0, 0.0],
            scene_info: [timing.total, TERRAIN_HEIGHT, self.tess_factor, 0.0],
            ambient_color: [0.1, 0.2, 0.3, 1.0],
            lights: self.lights,
        };
        frame.write_constants(SCENE_CONSTANTS, &constants)
    }

    fn record(
        &mut self,
        list: &mut B::CommandList,
        mut frame: FrameTargets<'_, B>,
        table: &DescriptorTable<B>,
    ) -> Result<()> {
        let wireframe = self.wireframe;
        let assets = loaded(&mut self.assets, "Tessellation")?;
        let dsv = table.cpu(HeapKind::Dsv, DEPTH_DSV, None)?;

        frame.back_buffer.transition_to(list, ResourceState::RenderTarget);
        list.clear_render_target(frame.rtv, CLEAR_COLOR);
        list.clear_depth(dsv, 1.0);
        list.set_render_targets(&[frame.rtv], Some(dsv));
        list.set_viewport(&Viewport::full(assets.width, assets.height));
        list.set_primitive_topology(PrimitiveTopology::PatchList(CONTROL_POINTS));
        list.set_vertex_buffers(
            0,
            &[
                VertexBufferView { resource: &assets.patch, stride: 12, size: CONTROL_POINTS * 12 },
                VertexBufferView {
                    resource: &assets.instances,
                    stride: std::mem::size_of::<InstanceData>() as u32,
                    size: assets.instance_bytes,
                },
            ],
        );
        list.set_pipeline(if wireframe { &assets.wireframe } else { &assets.solid });
        list.set_root_constant_buffer(ROOT_SCENE_CBV, frame.constants(SCENE_CONSTANTS)?);
        list.draw(CONTROL_POINTS, INSTANCE_COUNT);
        frame.back_buffer.transition_to(list, ResourceState::Present);
        Ok(())
    }

    fn on_key(&mut self, key: SampleKey) {
        match key {
            SampleKey::Toggle => self.wireframe = !self.wireframe,
            SampleKey::Up => self.adjust_tess_factor(1.0),
            SampleKey::Down => self.adjust_tess_factor(-1.0),
            SampleKey::Left => self.camera.rotate_yaw(0.1),
            SampleKey::Right => self.camera.rotate_yaw(-0.1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::sim::SimBackend;

    #[test]
    fn test_tess_factor_is_clamped() {
        let mut sample = Tessellation::<SimBackend>::new();
        for _ in 0..100 {
            sample.on_key(SampleKey::Up);
        }
        assert_eq!(sample.tess_factor(), MAX_TESS_FACTOR);
        for _ in 0..100 {
            sample.on_key(SampleKey::Down);
        }
        assert_eq!(sample.tess_factor(), MIN_TESS_FACTOR);
    }

    #[test]
    fn test_wireframe_toggle() {
        let mut sample = Tessellation::<SimBackend>::new();
        assert!(sample.wireframe());
        sample.on_key(SampleKey::Toggle);
        assert!(!sample.wireframe());
    }

    #[test]
    fn test_single_instance_is_centered() {
        let transforms = instance_transforms(1);
        assert_eq!(transforms.len(), 1);
        assert_eq!(transforms[0].world[0], [INSTANCE_SCALE, 0.0, 0.0, 0.0]);
        assert_eq!(std::mem::size_of::<InstanceData>(), 48);
    }
}

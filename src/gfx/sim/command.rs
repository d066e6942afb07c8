//! 模拟命令列表
//!
//! 记录命令用于检查，并在录制时做最基本的验证（管线类型、列表状态）。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::error::Result;
use crate::gfx::backend::{GpuResource, HeapType, PipelineKind};
use crate::renderer::command::{
    Barrier, CommandList, IndexBufferView, PrimitiveTopology, VertexBufferView, Viewport,
};
use crate::renderer::descriptor::{CpuDescriptorHandle, DescriptorHeap, GpuDescriptorHandle};
use crate::renderer::resource::ResourceState;

use super::monitor::{Hazard, ObjectToken, SimMonitor};
use super::objects::{ResourceInner, SimDescriptorHeap, SimPipeline, SimResource, Timeline, ViewRecord};
use super::SimBackend;

/// 录制下来的命令
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    SetDescriptorHeaps(usize),
    Transition { resource: String, before: ResourceState, after: ResourceState },
    UavBarrier { resource: String },
    SetPipeline { name: String, kind: PipelineKind },
    SetRootDescriptorTable { parameter: u32, view: &'static str },
    SetRootConstantBuffer { parameter: u32, resource: String },
    SetRootShaderResource { parameter: u32, resource: String },
    SetRootConstants { parameter: u32, values: Vec<u32> },
    SetViewport { width: f32, height: f32 },
    SetRenderTargets { count: usize, depth: bool },
    ClearRenderTarget,
    ClearDepth,
    SetPrimitiveTopology(PrimitiveTopology),
    SetVertexBuffers { start_slot: u32, count: usize },
    SetIndexBuffer,
    Draw { vertex_count: u32, instance_count: u32 },
    DrawIndexed { index_count: u32, instance_count: u32 },
    Dispatch { x: u32, y: u32, z: u32 },
}

/// 执行时按顺序校验的状态转换
pub(crate) struct TransitionRecord {
    pub(crate) resource: Arc<ResourceInner>,
    pub(crate) before: ResourceState,
    pub(crate) after: ResourceState,
}

pub struct SimCommandList {
    pub(crate) id: u64,
    name: String,
    pub(crate) commands: Vec<SimCommand>,
    pub(crate) transitions: Vec<TransitionRecord>,
    /// 这次录制读取的资源
    pub(crate) references: Vec<Arc<ResourceInner>>,
    pub(crate) errors: Vec<String>,
    pub(crate) closed: bool,
    bound: Option<PipelineKind>,
    heaps_bound: bool,
    descriptors: Arc<Mutex<HashMap<usize, ViewRecord>>>,
    timeline: Arc<Mutex<Timeline>>,
    monitor: SimMonitor,
    _token: ObjectToken,
}

impl SimCommandList {
    pub(crate) fn new(
        name: &str,
        descriptors: Arc<Mutex<HashMap<usize, ViewRecord>>>,
        timeline: Arc<Mutex<Timeline>>,
        monitor: &SimMonitor,
        generation: u64,
    ) -> Self {
        Self {
            id: monitor.next_id(),
            name: name.to_string(),
            commands: Vec::new(),
            transitions: Vec::new(),
            references: Vec::new(),
            errors: Vec::new(),
            closed: true,
            bound: None,
            heaps_bound: false,
            descriptors,
            timeline,
            monitor: monitor.clone(),
            _token: ObjectToken::new(monitor, generation),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前录制的命令
    pub fn commands(&self) -> &[SimCommand] {
        &self.commands
    }

    fn error(&mut self, message: String) {
        self.errors.push(format!("{}: {}", self.name, message));
    }

    fn check_open(&mut self, command: &str) {
        if self.closed {
            self.error(format!("{} recorded on a closed list", command));
        }
    }

    fn reference(&mut self, resource: &Arc<ResourceInner>) {
        if resource.heap == HeapType::Upload && !self.references.iter().any(|r| r.id == resource.id) {
            self.references.push(resource.clone());
        }
    }

    fn require_pipeline(&mut self, kind: PipelineKind, command: &str) {
        if self.bound != Some(kind) {
            self.error(format!("{} without a {:?} pipeline bound", command, kind));
        }
    }
}

impl CommandList<SimBackend> for SimCommandList {
    fn reset(&mut self) -> Result<()> {
        if !self.closed {
            self.error("reset while still recording".to_string());
        }
        if self.timeline.lock().is_list_pending(self.id) {
            self.monitor.record_hazard(Hazard {
                resource: self.name.clone(),
                fence_value: 0,
                description: "Command allocator reset while the GPU still executes it".to_string(),
            });
        }

        self.commands.clear();
        self.transitions.clear();
        self.references.clear();
        self.errors.clear();
        self.closed = false;
        self.bound = None;
        self.heaps_bound = false;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.check_open("Close");
        self.closed = true;
        Ok(())
    }

    fn set_descriptor_heaps(&mut self, heaps: &[&SimDescriptorHeap]) {
        self.check_open("SetDescriptorHeaps");
        if heaps.iter().any(|heap| heap.gpu_start().is_none()) {
            self.error("bound a heap that is not shader visible".to_string());
        }
        self.heaps_bound = true;
        self.commands.push(SimCommand::SetDescriptorHeaps(heaps.len()));
    }

    fn resource_barrier(&mut self, barriers: &[Barrier<'_, SimBackend>]) {
        self.check_open("ResourceBarrier");
        for barrier in barriers {
            match barrier {
                Barrier::Transition { resource, before, after } => {
                    if before == after {
                        self.error(format!("no-op transition on '{}'", resource.name()));
                    }
                    self.transitions.push(TransitionRecord {
                        resource: resource.inner.clone(),
                        before: *before,
                        after: *after,
                    });
                    self.commands.push(SimCommand::Transition {
                        resource: resource.name().to_string(),
                        before: *before,
                        after: *after,
                    });
                }
                Barrier::Uav { resource } => {
                    self.commands.push(SimCommand::UavBarrier { resource: resource.name().to_string() });
                }
            }
        }
    }

    fn set_pipeline(&mut self, pipeline: &SimPipeline) {
        self.check_open("SetPipelineState");
        self.bound = Some(pipeline.kind);
        self.commands.push(SimCommand::SetPipeline { name: pipeline.name.clone(), kind: pipeline.kind });
    }

    fn set_root_descriptor_table(&mut self, parameter: u32, handle: GpuDescriptorHandle) {
        self.check_open("SetRootDescriptorTable");
        if !self.heaps_bound {
            self.error("descriptor table set before binding descriptor heaps".to_string());
        }
        if self.bound.is_none() {
            self.error("descriptor table set without a root signature".to_string());
        }

        let record = self.descriptors.lock().get(&(handle.ptr as usize)).cloned();
        match record {
            Some(record) => {
                if let Some(resource) = &record.resource {
                    self.reference(resource);
                }
                self.commands.push(SimCommand::SetRootDescriptorTable { parameter, view: record.kind });
            }
            None => self.error(format!("descriptor table {} points at an empty descriptor", parameter)),
        }
    }

    fn set_root_constant_buffer(&mut self, parameter: u32, resource: &SimResource) {
        self.check_open("SetRootConstantBufferView");
        self.reference(&resource.inner);
        self.commands.push(SimCommand::SetRootConstantBuffer {
            parameter,
            resource: resource.name().to_string(),
        });
    }

    fn set_root_shader_resource(&mut self, parameter: u32, resource: &SimResource) {
        self.check_open("SetRootShaderResourceView");
        self.reference(&resource.inner);
        self.commands.push(SimCommand::SetRootShaderResource {
            parameter,
            resource: resource.name().to_string(),
        });
    }

    fn set_root_constants(&mut self, parameter: u32, values: &[u32]) {
        self.check_open("SetRoot32BitConstants");
        self.commands.push(SimCommand::SetRootConstants { parameter, values: values.to_vec() });
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.check_open("RSSetViewports");
        self.commands.push(SimCommand::SetViewport { width: viewport.width, height: viewport.height });
    }

    fn set_render_targets(&mut self, render_targets: &[CpuDescriptorHandle], depth_stencil: Option<CpuDescriptorHandle>) {
        self.check_open("OMSetRenderTargets");
        let descriptors = self.descriptors.lock();
        let missing = render_targets
            .iter()
            .chain(depth_stencil.iter())
            .any(|handle| !descriptors.contains_key(&handle.ptr));
        drop(descriptors);
        if missing {
            self.error("render target or depth view was never created".to_string());
        }
        self.commands.push(SimCommand::SetRenderTargets {
            count: render_targets.len(),
            depth: depth_stencil.is_some(),
        });
    }

    fn clear_render_target(&mut self, _render_target: CpuDescriptorHandle, _color: [f32; 4]) {
        self.check_open("ClearRenderTargetView");
        self.commands.push(SimCommand::ClearRenderTarget);
    }

    fn clear_depth(&mut self, _depth_stencil: CpuDescriptorHandle, _depth: f32) {
        self.check_open("ClearDepthStencilView");
        self.commands.push(SimCommand::ClearDepth);
    }

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.check_open("IASetPrimitiveTopology");
        self.commands.push(SimCommand::SetPrimitiveTopology(topology));
    }

    fn set_vertex_buffers(&mut self, start_slot: u32, views: &[VertexBufferView<'_, SimBackend>]) {
        self.check_open("IASetVertexBuffers");
        for view in views {
            self.reference(&view.resource.inner);
        }
        self.commands.push(SimCommand::SetVertexBuffers { start_slot, count: views.len() });
    }

    fn set_index_buffer(&mut self, view: &IndexBufferView<'_, SimBackend>) {
        self.check_open("IASetIndexBuffer");
        self.reference(&view.resource.inner);
        self.commands.push(SimCommand::SetIndexBuffer);
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.check_open("DrawInstanced");
        self.require_pipeline(PipelineKind::Graphics, "DrawInstanced");
        self.commands.push(SimCommand::Draw { vertex_count, instance_count });
    }

    fn draw_indexed(&mut self, index_count: u32, instance_count: u32, _start_index: u32, _base_vertex: i32) {
        self.check_open("DrawIndexedInstanced");
        self.require_pipeline(PipelineKind::Graphics, "DrawIndexedInstanced");
        self.commands.push(SimCommand::DrawIndexed { index_count, instance_count });
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.check_open("Dispatch");
        self.require_pipeline(PipelineKind::Compute, "Dispatch");
        if x == 0 || y == 0 || z == 0 {
            self.error(format!("empty dispatch {}x{}x{}", x, y, z));
        }
        self.commands.push(SimCommand::Dispatch { x, y, z });
    }
}

//! DirectX 12 命令列表

use std::mem::ManuallyDrop;

use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::core::error::Result;
use crate::gfx::backend::{GpuResource, PipelineKind};
use crate::renderer::command::{
    Barrier, CommandList, IndexBufferView, IndexFormat, PrimitiveTopology, VertexBufferView, Viewport,
};
use crate::renderer::descriptor::{CpuDescriptorHandle, GpuDescriptorHandle};

use super::dx_error;
use super::pipeline::Dx12Pipeline;
use super::resource::{resource_state, Dx12Resource};
use super::descriptor::Dx12DescriptorHeap;
use super::Dx12Backend;

/// 一个帧槽位的分配器和图形命令列表
pub struct Dx12CommandList {
    allocator: ID3D12CommandAllocator,
    pub(crate) list: ID3D12GraphicsCommandList,
    /// 当前绑定的是计算管线，根参数走 Compute 版本
    compute: bool,
}

impl Dx12CommandList {
    pub(crate) fn new(device: &ID3D12Device, name: &str) -> Result<Self> {
        unsafe {
            let allocator: ID3D12CommandAllocator = device
                .CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)
                .map_err(dx_error(&format!("Failed to create command allocator for '{}'", name)))?;
            let list: ID3D12GraphicsCommandList = device
                .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None::<&ID3D12PipelineState>)
                .map_err(dx_error(&format!("Failed to create command list '{}'", name)))?;
            // 新建的列表处于录制状态，先关闭，每帧由 reset 打开
            list.Close().map_err(dx_error("Failed to close new command list"))?;

            Ok(Self { allocator, list, compute: false })
        }
    }
}

fn cpu_handle(handle: CpuDescriptorHandle) -> D3D12_CPU_DESCRIPTOR_HANDLE {
    D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr }
}

fn gpu_handle(handle: GpuDescriptorHandle) -> D3D12_GPU_DESCRIPTOR_HANDLE {
    D3D12_GPU_DESCRIPTOR_HANDLE { ptr: handle.ptr }
}

/// 借用资源构造屏障，不增加引用计数
fn borrowed(resource: &Dx12Resource) -> ManuallyDrop<Option<ID3D12Resource>> {
    unsafe { std::mem::transmute_copy(&resource.resource) }
}

fn barrier(barrier: &Barrier<'_, Dx12Backend>) -> D3D12_RESOURCE_BARRIER {
    match barrier {
        Barrier::Transition { resource, before, after } => D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                    pResource: borrowed(resource),
                    Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                    StateBefore: resource_state(*before),
                    StateAfter: resource_state(*after),
                }),
            },
        },
        Barrier::Uav { resource } => D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_UAV,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                UAV: ManuallyDrop::new(D3D12_RESOURCE_UAV_BARRIER { pResource: borrowed(resource) }),
            },
        },
    }
}

impl CommandList<Dx12Backend> for Dx12CommandList {
    fn reset(&mut self) -> Result<()> {
        unsafe {
            self.allocator.Reset().map_err(dx_error("Failed to reset command allocator"))?;
            self.list
                .Reset(&self.allocator, None::<&ID3D12PipelineState>)
                .map_err(dx_error("Failed to reset command list"))?;
        }
        self.compute = false;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        unsafe { self.list.Close().map_err(dx_error("Failed to close command list")) }
    }

    fn set_descriptor_heaps(&mut self, heaps: &[&Dx12DescriptorHeap]) {
        if heaps.is_empty() {
            return;
        }
        let heaps: Vec<Option<ID3D12DescriptorHeap>> = heaps.iter().map(|h| Some(h.heap.clone())).collect();
        unsafe { self.list.SetDescriptorHeaps(&heaps) };
    }

    fn resource_barrier(&mut self, barriers: &[Barrier<'_, Dx12Backend>]) {
        if barriers.is_empty() {
            return;
        }
        let barriers: Vec<D3D12_RESOURCE_BARRIER> = barriers.iter().map(barrier).collect();
        unsafe { self.list.ResourceBarrier(&barriers) };
    }

    fn set_pipeline(&mut self, pipeline: &Dx12Pipeline) {
        self.compute = pipeline.kind == PipelineKind::Compute;
        unsafe {
            self.list.SetPipelineState(&pipeline.state);
            if self.compute {
                self.list.SetComputeRootSignature(&pipeline.root_signature);
            } else {
                self.list.SetGraphicsRootSignature(&pipeline.root_signature);
            }
        }
    }

    fn set_root_descriptor_table(&mut self, parameter: u32, handle: GpuDescriptorHandle) {
        unsafe {
            if self.compute {
                self.list.SetComputeRootDescriptorTable(parameter, gpu_handle(handle));
            } else {
                self.list.SetGraphicsRootDescriptorTable(parameter, gpu_handle(handle));
            }
        }
    }

    fn set_root_constant_buffer(&mut self, parameter: u32, resource: &Dx12Resource) {
        let address = resource.gpu_address();
        unsafe {
            if self.compute {
                self.list.SetComputeRootConstantBufferView(parameter, address);
            } else {
                self.list.SetGraphicsRootConstantBufferView(parameter, address);
            }
        }
    }

    fn set_root_shader_resource(&mut self, parameter: u32, resource: &Dx12Resource) {
        let address = resource.gpu_address();
        unsafe {
            if self.compute {
                self.list.SetComputeRootShaderResourceView(parameter, address);
            } else {
                self.list.SetGraphicsRootShaderResourceView(parameter, address);
            }
        }
    }

    fn set_root_constants(&mut self, parameter: u32, values: &[u32]) {
        let data = values.as_ptr() as *const std::ffi::c_void;
        let count = values.len() as u32;
        unsafe {
            if self.compute {
                self.list.SetComputeRoot32BitConstants(parameter, count, data, 0);
            } else {
                self.list.SetGraphicsRoot32BitConstants(parameter, count, data, 0);
            }
        }
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        let vp = D3D12_VIEWPORT {
            TopLeftX: viewport.x,
            TopLeftY: viewport.y,
            Width: viewport.width,
            Height: viewport.height,
            MinDepth: viewport.min_depth,
            MaxDepth: viewport.max_depth,
        };
        let scissor = RECT {
            left: viewport.x as i32,
            top: viewport.y as i32,
            right: (viewport.x + viewport.width) as i32,
            bottom: (viewport.y + viewport.height) as i32,
        };
        unsafe {
            self.list.RSSetViewports(&[vp]);
            self.list.RSSetScissorRects(&[scissor]);
        }
    }

    fn set_render_targets(&mut self, render_targets: &[CpuDescriptorHandle], depth_stencil: Option<CpuDescriptorHandle>) {
        let rtvs: Vec<D3D12_CPU_DESCRIPTOR_HANDLE> = render_targets.iter().copied().map(cpu_handle).collect();
        let dsv = depth_stencil.map(cpu_handle);
        unsafe {
            self.list.OMSetRenderTargets(
                rtvs.len() as u32,
                (!rtvs.is_empty()).then(|| rtvs.as_ptr()),
                false,
                dsv.as_ref().map(|h| h as *const D3D12_CPU_DESCRIPTOR_HANDLE),
            );
        }
    }

    fn clear_render_target(&mut self, render_target: CpuDescriptorHandle, color: [f32; 4]) {
        unsafe { self.list.ClearRenderTargetView(cpu_handle(render_target), &color, None) };
    }

    fn clear_depth(&mut self, depth_stencil: CpuDescriptorHandle, depth: f32) {
        unsafe {
            self.list
                .ClearDepthStencilView(cpu_handle(depth_stencil), D3D12_CLEAR_FLAG_DEPTH, depth, 0, None)
        };
    }

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        let topology = match topology {
            PrimitiveTopology::TriangleList => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
            PrimitiveTopology::PatchList(points) => {
                let points = points.clamp(1, 32) as i32;
                D3D_PRIMITIVE_TOPOLOGY(D3D_PRIMITIVE_TOPOLOGY_1_CONTROL_POINT_PATCHLIST.0 + points - 1)
            }
        };
        unsafe { self.list.IASetPrimitiveTopology(topology) };
    }

    fn set_vertex_buffers(&mut self, start_slot: u32, views: &[VertexBufferView<'_, Dx12Backend>]) {
        let views: Vec<D3D12_VERTEX_BUFFER_VIEW> = views
            .iter()
            .map(|view| D3D12_VERTEX_BUFFER_VIEW {
                BufferLocation: view.resource.gpu_address(),
                SizeInBytes: view.size,
                StrideInBytes: view.stride,
            })
            .collect();
        unsafe { self.list.IASetVertexBuffers(start_slot, Some(&views)) };
    }

    fn set_index_buffer(&mut self, view: &IndexBufferView<'_, Dx12Backend>) {
        let view = D3D12_INDEX_BUFFER_VIEW {
            BufferLocation: view.resource.gpu_address(),
            SizeInBytes: view.size,
            Format: match view.format {
                IndexFormat::U16 => DXGI_FORMAT_R16_UINT,
                IndexFormat::U32 => DXGI_FORMAT_R32_UINT,
            },
        };
        unsafe { self.list.IASetIndexBuffer(Some(&view)) };
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        unsafe { self.list.DrawInstanced(vertex_count, instance_count, 0, 0) };
    }

    fn draw_indexed(&mut self, index_count: u32, instance_count: u32, start_index: u32, base_vertex: i32) {
        unsafe {
            self.list
                .DrawIndexedInstanced(index_count, instance_count, start_index, base_vertex, 0)
        };
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        unsafe { self.list.Dispatch(x, y, z) };
    }
}

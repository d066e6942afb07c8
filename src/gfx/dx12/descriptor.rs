//! DirectX 12 描述符堆和视图
//!
//! 堆按布局一次性创建，这里只负责把视图写进给定的 CPU 句柄。

use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::core::error::Result;
use crate::gfx::backend::{AddressMode, Filter, GpuResource, ResourceView, SamplerDesc};
use crate::renderer::descriptor::{CpuDescriptorHandle, DescriptorHeap, GpuDescriptorHandle, HeapKind};

use super::dx_error;
use super::resource::{dxgi_format, srv_format, Dx12Resource};
use super::Dx12Backend;

fn heap_type(kind: HeapKind) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match kind {
        HeapKind::Rtv => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        HeapKind::Dsv => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
        HeapKind::CbvSrvUav => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
        HeapKind::Sampler => D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
    }
}

/// DX12 描述符堆
pub struct Dx12DescriptorHeap {
    pub(crate) heap: ID3D12DescriptorHeap,
    kind: HeapKind,
    capacity: u32,
    increment_size: u32,
    cpu_start: usize,
    gpu_start: Option<u64>,
}

impl Dx12DescriptorHeap {
    pub(crate) fn new(device: &ID3D12Device, kind: HeapKind, capacity: u32, shader_visible: bool) -> Result<Self> {
        let desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: heap_type(kind),
            NumDescriptors: capacity,
            Flags: if shader_visible {
                D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
            } else {
                D3D12_DESCRIPTOR_HEAP_FLAG_NONE
            },
            NodeMask: 0,
        };

        unsafe {
            let heap: ID3D12DescriptorHeap = device
                .CreateDescriptorHeap(&desc)
                .map_err(dx_error(&format!("Failed to create {} descriptor heap", kind.name())))?;
            let increment_size = device.GetDescriptorHandleIncrementSize(heap_type(kind));
            let cpu_start = heap.GetCPUDescriptorHandleForHeapStart().ptr;
            let gpu_start = shader_visible.then(|| heap.GetGPUDescriptorHandleForHeapStart().ptr);

            Ok(Self { heap, kind, capacity, increment_size, cpu_start, gpu_start })
        }
    }
}

impl DescriptorHeap for Dx12DescriptorHeap {
    fn kind(&self) -> HeapKind {
        self.kind
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn increment_size(&self) -> u32 {
        self.increment_size
    }

    fn cpu_start(&self) -> CpuDescriptorHandle {
        CpuDescriptorHandle::new(self.cpu_start, 0)
    }

    fn gpu_start(&self) -> Option<GpuDescriptorHandle> {
        self.gpu_start.map(|ptr| GpuDescriptorHandle::new(ptr, 0))
    }
}

fn sampler_desc(desc: &SamplerDesc) -> D3D12_SAMPLER_DESC {
    let address = match desc.address {
        AddressMode::Wrap => D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        AddressMode::Clamp => D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        AddressMode::Border => D3D12_TEXTURE_ADDRESS_MODE_BORDER,
    };
    let (filter, comparison) = match desc.filter {
        Filter::Point => (D3D12_FILTER_MIN_MAG_MIP_POINT, D3D12_COMPARISON_FUNC_ALWAYS),
        Filter::Linear => (D3D12_FILTER_MIN_MAG_MIP_LINEAR, D3D12_COMPARISON_FUNC_ALWAYS),
        Filter::ComparisonLinear => (
            D3D12_FILTER_COMPARISON_MIN_MAG_LINEAR_MIP_POINT,
            D3D12_COMPARISON_FUNC_LESS_EQUAL,
        ),
    };

    D3D12_SAMPLER_DESC {
        Filter: filter,
        AddressU: address,
        AddressV: address,
        AddressW: address,
        MipLODBias: 0.0,
        MaxAnisotropy: 1,
        ComparisonFunc: comparison,
        // 阴影贴图外部视为没有遮挡
        BorderColor: [1.0; 4],
        MinLOD: 0.0,
        MaxLOD: f32::MAX,
    }
}

fn texture_srv(resource: &Dx12Resource) -> D3D12_SHADER_RESOURCE_VIEW_DESC {
    D3D12_SHADER_RESOURCE_VIEW_DESC {
        Format: srv_format(resource.format()),
        ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
        Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
        Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
            Texture2D: D3D12_TEX2D_SRV { MostDetailedMip: 0, MipLevels: 1, ..Default::default() },
        },
    }
}

/// 把视图写进 `dest`
pub(crate) fn create_view(backend: &Dx12Backend, view: &ResourceView<'_, Dx12Backend>, dest: CpuDescriptorHandle) {
    let device = &backend.device;
    let handle = D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dest.ptr };

    unsafe {
        match view {
            ResourceView::ConstantBuffer { resource, size } => {
                let desc = D3D12_CONSTANT_BUFFER_VIEW_DESC {
                    BufferLocation: resource.gpu_address(),
                    SizeInBytes: *size,
                };
                device.CreateConstantBufferView(Some(&desc), handle);
            }
            ResourceView::BufferSrv { resource, count, stride } => {
                let desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
                    Format: DXGI_FORMAT_UNKNOWN,
                    ViewDimension: D3D12_SRV_DIMENSION_BUFFER,
                    Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                    Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        Buffer: D3D12_BUFFER_SRV {
                            FirstElement: 0,
                            NumElements: *count,
                            StructureByteStride: *stride,
                            Flags: D3D12_BUFFER_SRV_FLAG_NONE,
                        },
                    },
                };
                device.CreateShaderResourceView(&resource.resource, Some(&desc), handle);
            }
            ResourceView::BufferUav { resource, count, stride } => {
                let desc = D3D12_UNORDERED_ACCESS_VIEW_DESC {
                    Format: DXGI_FORMAT_UNKNOWN,
                    ViewDimension: D3D12_UAV_DIMENSION_BUFFER,
                    Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                        Buffer: D3D12_BUFFER_UAV {
                            FirstElement: 0,
                            NumElements: *count,
                            StructureByteStride: *stride,
                            CounterOffsetInBytes: 0,
                            Flags: D3D12_BUFFER_UAV_FLAG_NONE,
                        },
                    },
                };
                device.CreateUnorderedAccessView(&resource.resource, None::<&ID3D12Resource>, Some(&desc), handle);
            }
            ResourceView::TextureSrv(resource) => {
                let desc = texture_srv(resource);
                device.CreateShaderResourceView(&resource.resource, Some(&desc), handle);
            }
            ResourceView::TextureUav(resource) => {
                let desc = D3D12_UNORDERED_ACCESS_VIEW_DESC {
                    Format: dxgi_format(resource.format()),
                    ViewDimension: D3D12_UAV_DIMENSION_TEXTURE2D,
                    Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                        Texture2D: D3D12_TEX2D_UAV { MipSlice: 0, PlaneSlice: 0 },
                    },
                };
                device.CreateUnorderedAccessView(&resource.resource, None::<&ID3D12Resource>, Some(&desc), handle);
            }
            ResourceView::NullTextureSrv => {
                let desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
                    Format: DXGI_FORMAT_R8G8B8A8_UNORM,
                    ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
                    Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                    Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        Texture2D: D3D12_TEX2D_SRV { MostDetailedMip: 0, MipLevels: 1, ..Default::default() },
                    },
                };
                device.CreateShaderResourceView(None::<&ID3D12Resource>, Some(&desc), handle);
            }
            ResourceView::RenderTarget(resource) => {
                device.CreateRenderTargetView(&resource.resource, None, handle);
            }
            ResourceView::DepthStencil(resource) => {
                let desc = D3D12_DEPTH_STENCIL_VIEW_DESC {
                    Format: DXGI_FORMAT_D32_FLOAT,
                    ViewDimension: D3D12_DSV_DIMENSION_TEXTURE2D,
                    Flags: D3D12_DSV_FLAG_NONE,
                    Anonymous: D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                        Texture2D: D3D12_TEX2D_DSV { MipSlice: 0 },
                    },
                };
                device.CreateDepthStencilView(&resource.resource, Some(&desc), handle);
            }
            ResourceView::Sampler(desc) => {
                device.CreateSampler(&sampler_desc(desc), handle);
            }
        }
    }
}

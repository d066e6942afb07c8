//! DirectX 12 资源
//!
//! 提交资源（committed resource）的创建、格式和状态的转换。

use std::ptr::NonNull;

use windows::core::{HSTRING, PCWSTR};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{BufferDesc, ClearValue, Format, GpuResource, HeapType, TextureDesc};
use crate::renderer::resource::ResourceState;

use super::dx_error;

/// 格式转换
pub(crate) fn dxgi_format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::Unknown => DXGI_FORMAT_UNKNOWN,
        Format::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        Format::Rgba32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        Format::Rgb32Float => DXGI_FORMAT_R32G32B32_FLOAT,
        Format::Rg32Float => DXGI_FORMAT_R32G32_FLOAT,
        Format::R32Float => DXGI_FORMAT_R32_FLOAT,
        Format::R32Uint => DXGI_FORMAT_R32_UINT,
        Format::D32Float => DXGI_FORMAT_D32_FLOAT,
    }
}

/// 深度纹理作为 SRV 读取时使用的格式
pub(crate) fn srv_format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::D32Float => DXGI_FORMAT_R32_FLOAT,
        other => dxgi_format(other),
    }
}

/// 资源状态转换
pub(crate) fn resource_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Common => D3D12_RESOURCE_STATE_COMMON,
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ResourceState::DepthWrite => D3D12_RESOURCE_STATE_DEPTH_WRITE,
        ResourceState::PixelShaderResource => D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
        ResourceState::NonPixelShaderResource => D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE,
        ResourceState::UnorderedAccess => D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
        ResourceState::CopySource => D3D12_RESOURCE_STATE_COPY_SOURCE,
        ResourceState::CopyDest => D3D12_RESOURCE_STATE_COPY_DEST,
        ResourceState::GenericRead => D3D12_RESOURCE_STATE_GENERIC_READ,
        ResourceState::VertexAndConstantBuffer => D3D12_RESOURCE_STATE_VERTEX_AND_CONSTANT_BUFFER,
    }
}

/// DirectX 12 资源
pub struct Dx12Resource {
    pub(crate) resource: ID3D12Resource,
    name: String,
    size: u64,
    format: Format,
    heap: HeapType,
}

impl Dx12Resource {
    pub(crate) fn from_swap_chain(resource: ID3D12Resource, index: usize) -> Self {
        Self {
            resource,
            name: format!("Back Buffer {}", index),
            size: 0,
            format: Format::Rgba8Unorm,
            heap: HeapType::Default,
        }
    }

    pub(crate) fn create_buffer(device: &ID3D12Device, desc: &BufferDesc<'_>) -> Result<Self> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: match desc.heap {
                HeapType::Default => D3D12_HEAP_TYPE_DEFAULT,
                HeapType::Upload => D3D12_HEAP_TYPE_UPLOAD,
            },
            ..Default::default()
        };
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Width: desc.size.max(1),
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: if desc.unordered_access {
                D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS
            } else {
                D3D12_RESOURCE_FLAG_NONE
            },
            ..Default::default()
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            device
                .CreateCommittedResource(
                    &heap_props,
                    D3D12_HEAP_FLAG_NONE,
                    &resource_desc,
                    resource_state(desc.initial_state),
                    None,
                    &mut resource,
                )
                .map_err(dx_error(&format!("Failed to create buffer '{}'", desc.name)))?;
        }
        let resource = resource
            .ok_or_else(|| GraphicsError::ResourceCreation(format!("Buffer '{}' was not returned", desc.name)))?;
        set_name(&resource, desc.name);

        Ok(Self {
            resource,
            name: desc.name.to_string(),
            size: desc.size,
            format: Format::Unknown,
            heap: desc.heap,
        })
    }

    pub(crate) fn create_texture(device: &ID3D12Device, desc: &TextureDesc<'_>) -> Result<Self> {
        let mut flags = D3D12_RESOURCE_FLAG_NONE;
        if desc.usage.render_target {
            flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
        }
        if desc.usage.depth_stencil {
            flags |= D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL;
        }
        if desc.usage.unordered_access {
            flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
        }

        // 既作深度又作 SRV 的纹理需要无类型格式
        let format = if desc.format.is_depth() && desc.usage.shader_resource {
            DXGI_FORMAT_R32_TYPELESS
        } else {
            dxgi_format(desc.format)
        };

        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE_DEFAULT,
            ..Default::default()
        };
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Width: desc.width as u64,
            Height: desc.height,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: format,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: flags,
            ..Default::default()
        };

        let clear_value = desc.clear_value.map(|clear| match clear {
            ClearValue::Color(color) => D3D12_CLEAR_VALUE {
                Format: dxgi_format(desc.format),
                Anonymous: D3D12_CLEAR_VALUE_0 { Color: color },
            },
            ClearValue::Depth(depth) => D3D12_CLEAR_VALUE {
                Format: dxgi_format(desc.format),
                Anonymous: D3D12_CLEAR_VALUE_0 {
                    DepthStencil: D3D12_DEPTH_STENCIL_VALUE { Depth: depth, Stencil: 0 },
                },
            },
        });

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            device
                .CreateCommittedResource(
                    &heap_props,
                    D3D12_HEAP_FLAG_NONE,
                    &resource_desc,
                    resource_state(desc.initial_state),
                    clear_value.as_ref().map(|value| value as *const D3D12_CLEAR_VALUE),
                    &mut resource,
                )
                .map_err(dx_error(&format!("Failed to create texture '{}'", desc.name)))?;
        }
        let resource = resource
            .ok_or_else(|| GraphicsError::ResourceCreation(format!("Texture '{}' was not returned", desc.name)))?;
        set_name(&resource, desc.name);

        Ok(Self {
            resource,
            name: desc.name.to_string(),
            size: 0,
            format: desc.format,
            heap: HeapType::Default,
        })
    }
}

fn set_name(resource: &ID3D12Resource, name: &str) {
    let wide = HSTRING::from(name);
    // 调试名失败不影响渲染
    let _ = unsafe { resource.SetName(PCWSTR(wide.as_ptr())) };
}

impl GpuResource for Dx12Resource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn format(&self) -> Format {
        self.format
    }

    fn gpu_address(&self) -> u64 {
        unsafe { self.resource.GetGPUVirtualAddress() }
    }

    fn map(&self) -> Result<NonNull<u8>> {
        if self.heap != HeapType::Upload {
            return Err(GraphicsError::ResourceCreation(format!(
                "'{}' is not in an upload heap and cannot be mapped",
                self.name
            ))
            .into());
        }

        let mut data = std::ptr::null_mut();
        unsafe {
            self.resource
                .Map(0, None, Some(&mut data))
                .map_err(dx_error(&format!("Failed to map '{}'", self.name)))?;
        }
        NonNull::new(data as *mut u8)
            .ok_or_else(|| GraphicsError::ResourceCreation(format!("Map of '{}' returned null", self.name)).into())
    }

    fn unmap(&self) {
        unsafe { self.resource.Unmap(0, None) };
    }
}

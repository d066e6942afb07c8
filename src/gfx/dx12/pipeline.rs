//! DirectX 12 管线状态
//!
//! 着色器是构建时预编译的 `.cso` 字节码，根签名嵌在字节码里：
//! 图形管线从顶点着色器读取，计算管线从计算着色器读取。

use std::ffi::CString;
use std::path::Path;

use windows::core::PCSTR;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::core::error::{GraphicsError, Result, SampleError};
use crate::gfx::backend::{ComputePipelineDesc, GraphicsPipelineDesc, Pipeline, PipelineKind, TopologyType};

use super::dx_error;
use super::resource::dxgi_format;

pub struct Dx12Pipeline {
    name: String,
    pub(crate) kind: PipelineKind,
    pub(crate) state: ID3D12PipelineState,
    pub(crate) root_signature: ID3D12RootSignature,
}

impl Pipeline for Dx12Pipeline {
    fn kind(&self) -> PipelineKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn load_shader(shader_dir: &Path, file: &str) -> Result<Vec<u8>> {
    let path = shader_dir.join(file);
    std::fs::read(&path)
        .map_err(|e| GraphicsError::ShaderLoad(format!("Failed to read {}: {}", path.display(), e)).into())
}

fn bytecode(data: &[u8]) -> D3D12_SHADER_BYTECODE {
    D3D12_SHADER_BYTECODE {
        pShaderBytecode: data.as_ptr() as *const std::ffi::c_void,
        BytecodeLength: data.len(),
    }
}

fn root_signature(device: &ID3D12Device, name: &str, data: &[u8]) -> Result<ID3D12RootSignature> {
    unsafe {
        device
            .CreateRootSignature(0, data)
            .map_err(dx_error(&format!("Failed to create root signature for '{}'", name)))
    }
}

pub(crate) fn create_graphics(
    device: &ID3D12Device,
    shader_dir: &Path,
    desc: &GraphicsPipelineDesc<'_>,
) -> Result<Dx12Pipeline> {
    let vs = load_shader(shader_dir, desc.vertex_shader)?;
    let ps = desc.pixel_shader.map(|file| load_shader(shader_dir, file)).transpose()?;
    let hs = desc.hull_shader.map(|file| load_shader(shader_dir, file)).transpose()?;
    let ds = desc.domain_shader.map(|file| load_shader(shader_dir, file)).transpose()?;
    let root_signature = root_signature(device, desc.name, &vs)?;

    let semantics = desc
        .input_layout
        .iter()
        .map(|attr| {
            CString::new(attr.semantic)
                .map_err(|_| SampleError::from(GraphicsError::ShaderLoad(format!("Invalid semantic name '{}'", attr.semantic))))
        })
        .collect::<Result<Vec<CString>>>()?;
    let input_elements: Vec<D3D12_INPUT_ELEMENT_DESC> = desc
        .input_layout
        .iter()
        .zip(&semantics)
        .map(|(attr, semantic)| D3D12_INPUT_ELEMENT_DESC {
            SemanticName: PCSTR(semantic.as_ptr() as *const u8),
            SemanticIndex: attr.semantic_index,
            Format: dxgi_format(attr.format),
            InputSlot: attr.slot,
            AlignedByteOffset: attr.offset,
            InputSlotClass: if attr.per_instance {
                D3D12_INPUT_CLASSIFICATION_PER_INSTANCE_DATA
            } else {
                D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA
            },
            InstanceDataStepRate: u32::from(attr.per_instance),
        })
        .collect();

    let mut pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC::default();
    pso_desc.pRootSignature = unsafe { std::mem::transmute_copy(&root_signature) };
    pso_desc.VS = bytecode(&vs);
    if let Some(ps) = &ps {
        pso_desc.PS = bytecode(ps);
    }
    if let Some(hs) = &hs {
        pso_desc.HS = bytecode(hs);
    }
    if let Some(ds) = &ds {
        pso_desc.DS = bytecode(ds);
    }
    pso_desc.BlendState.RenderTarget[0] = D3D12_RENDER_TARGET_BLEND_DESC {
        BlendEnable: false.into(),
        LogicOpEnable: false.into(),
        RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
        ..Default::default()
    };
    pso_desc.RasterizerState = D3D12_RASTERIZER_DESC {
        FillMode: if desc.wireframe { D3D12_FILL_MODE_WIREFRAME } else { D3D12_FILL_MODE_SOLID },
        CullMode: D3D12_CULL_MODE_NONE,
        DepthClipEnable: true.into(),
        ..Default::default()
    };
    pso_desc.DepthStencilState = match desc.depth_format {
        Some(_) => D3D12_DEPTH_STENCIL_DESC {
            DepthEnable: true.into(),
            DepthWriteMask: D3D12_DEPTH_WRITE_MASK_ALL,
            DepthFunc: D3D12_COMPARISON_FUNC_LESS,
            StencilEnable: false.into(),
            ..Default::default()
        },
        None => D3D12_DEPTH_STENCIL_DESC::default(),
    };
    pso_desc.DSVFormat = desc.depth_format.map(dxgi_format).unwrap_or(DXGI_FORMAT_UNKNOWN);
    pso_desc.SampleMask = u32::MAX;
    pso_desc.InputLayout = D3D12_INPUT_LAYOUT_DESC {
        pInputElementDescs: input_elements.as_ptr(),
        NumElements: input_elements.len() as u32,
    };
    pso_desc.PrimitiveTopologyType = match desc.topology {
        TopologyType::Triangle => D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        TopologyType::Patch => D3D12_PRIMITIVE_TOPOLOGY_TYPE_PATCH,
    };
    pso_desc.NumRenderTargets = desc.render_target_formats.len().min(8) as u32;
    for (slot, format) in desc.render_target_formats.iter().take(8).enumerate() {
        pso_desc.RTVFormats[slot] = dxgi_format(*format);
    }
    pso_desc.SampleDesc.Count = 1;

    let state: ID3D12PipelineState = unsafe {
        device
            .CreateGraphicsPipelineState(&pso_desc)
            .map_err(dx_error(&format!("Failed to create pipeline '{}'", desc.name)))?
    };

    Ok(Dx12Pipeline {
        name: desc.name.to_string(),
        kind: PipelineKind::Graphics,
        state,
        root_signature,
    })
}

pub(crate) fn create_compute(
    device: &ID3D12Device,
    shader_dir: &Path,
    desc: &ComputePipelineDesc<'_>,
) -> Result<Dx12Pipeline> {
    let cs = load_shader(shader_dir, desc.compute_shader)?;
    let root_signature = root_signature(device, desc.name, &cs)?;

    let pso_desc = D3D12_COMPUTE_PIPELINE_STATE_DESC {
        pRootSignature: unsafe { std::mem::transmute_copy(&root_signature) },
        CS: bytecode(&cs),
        ..Default::default()
    };
    let state: ID3D12PipelineState = unsafe {
        device
            .CreateComputePipelineState(&pso_desc)
            .map_err(dx_error(&format!("Failed to create pipeline '{}'", desc.name)))?
    };

    Ok(Dx12Pipeline {
        name: desc.name.to_string(),
        kind: PipelineKind::Compute,
        state,
        root_signature,
    })
}

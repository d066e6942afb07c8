//! DirectX 12 后端
//!
//! 一个 [`Dx12Backend`] 拥有设备、唯一的直接命令队列和窗口交换链。
//! 设备丢失后整个后端被丢弃，由工厂重新创建。
//!
//! # 初始化流程
//!
//! 1. 启用调试层（调试版本且配置允许）
//! 2. 创建 DXGI 工厂
//! 3. 创建 D3D12 设备（硬件适配器或 WARP）
//! 4. 创建直接命令队列
//! 5. 为窗口创建翻转模式交换链

mod command;
mod descriptor;
mod fence;
mod pipeline;
mod resource;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};
use windows::core::{Interface, HRESULT};
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use winit::raw_window_handle::{HasWindowHandle, RawWindowHandle};
use winit::window::Window;

use crate::core::config::Config;
use crate::core::error::{GraphicsError, Result, SampleError};
use crate::gfx::backend::{
    Backend, BufferDesc, ComputePipelineDesc, GraphicsPipelineDesc, ResourceView, TextureDesc,
};
use crate::renderer::descriptor::{CpuDescriptorHandle, HeapKind};

pub use command::Dx12CommandList;
pub use descriptor::Dx12DescriptorHeap;
pub use fence::Dx12Fence;
pub use pipeline::Dx12Pipeline;
pub use resource::Dx12Resource;

fn is_device_removed(code: HRESULT) -> bool {
    code == DXGI_ERROR_DEVICE_REMOVED || code == DXGI_ERROR_DEVICE_RESET
}

/// 把 Windows 错误转换成框架错误，设备移除类错误归为设备丢失
pub(crate) fn dx_error(context: &str) -> impl FnOnce(windows::core::Error) -> SampleError + '_ {
    move |e| {
        let message = format!("{}: {:?}", context, e);
        if is_device_removed(e.code()) {
            GraphicsError::DeviceLost(message).into()
        } else {
            GraphicsError::CommandExecution(message).into()
        }
    }
}

/// DirectX 12 设备参数
#[derive(Debug, Clone)]
pub struct Dx12Options {
    pub frame_count: usize,
    pub debug_layer: bool,
    pub warp: bool,
    pub shader_dir: PathBuf,
}

impl Dx12Options {
    pub fn from_config(config: &Config) -> Self {
        Self {
            frame_count: config.graphics.frame_count,
            debug_layer: config.graphics.debug_layer,
            warp: config.graphics.warp,
            shader_dir: config.graphics.shader_dir.clone(),
        }
    }
}

pub struct Dx12Backend {
    pub(crate) device: ID3D12Device,
    queue: ID3D12CommandQueue,
    swap_chain: IDXGISwapChain3,
    options: Dx12Options,
    width: u32,
    height: u32,
    // 交换链引用窗口句柄，窗口必须比它活得久
    _window: Arc<Window>,
}

fn window_hwnd(window: &Window) -> Result<HWND> {
    let handle = window
        .window_handle()
        .map_err(|e| GraphicsError::SwapchainError(format!("Failed to get window handle: {}", e)))?;
    match handle.as_raw() {
        RawWindowHandle::Win32(win32) => Ok(HWND(win32.hwnd.get() as *mut core::ffi::c_void)),
        other => Err(GraphicsError::SwapchainError(format!("Expected a Win32 window handle, got {:?}", other)).into()),
    }
}

impl Dx12Backend {
    /// 为窗口创建第 `generation` 代设备
    pub fn new(window: Arc<Window>, options: &Dx12Options, generation: u64) -> Result<Self> {
        let size = window.inner_size();
        let (width, height) = (size.width.max(1), size.height.max(1));
        let hwnd = window_hwnd(&window)?;
        let debug_layer = options.debug_layer && cfg!(debug_assertions);

        unsafe {
            if debug_layer {
                let mut debug: Option<ID3D12Debug> = None;
                match D3D12GetDebugInterface(&mut debug) {
                    Ok(()) => {
                        if let Some(debug) = debug {
                            debug.EnableDebugLayer();
                            debug!("DX12 debug layer enabled");
                        }
                    }
                    Err(e) => warn!("Failed to enable DX12 debug layer: {:?}", e),
                }
            }

            let factory_flags = if debug_layer { DXGI_CREATE_FACTORY_DEBUG } else { DXGI_CREATE_FACTORY_FLAGS(0) };
            let factory: IDXGIFactory4 = CreateDXGIFactory2(factory_flags)
                .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to create DXGI factory: {:?}", e)))?;

            let mut device: Option<ID3D12Device> = None;
            if options.warp {
                let adapter: IDXGIAdapter = factory
                    .EnumWarpAdapter()
                    .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to get WARP adapter: {:?}", e)))?;
                D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device)
            } else {
                D3D12CreateDevice(None, D3D_FEATURE_LEVEL_11_0, &mut device)
            }
            .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to create D3D12 device: {:?}", e)))?;
            let device =
                device.ok_or_else(|| GraphicsError::DeviceCreation("D3D12CreateDevice returned no device".to_string()))?;

            let queue_desc = D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                ..Default::default()
            };
            let queue: ID3D12CommandQueue = device
                .CreateCommandQueue(&queue_desc)
                .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to create command queue: {:?}", e)))?;

            let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
                Width: width,
                Height: height,
                Format: DXGI_FORMAT_R8G8B8A8_UNORM,
                SampleDesc: DXGI_SAMPLE_DESC { Count: 1, ..Default::default() },
                BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
                BufferCount: options.frame_count as u32,
                SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
                ..Default::default()
            };
            let swap_chain: IDXGISwapChain1 = factory
                .CreateSwapChainForHwnd(&queue, hwnd, &swap_chain_desc, None, None)
                .map_err(|e| GraphicsError::SwapchainError(format!("Failed to create swap chain: {:?}", e)))?;
            let swap_chain: IDXGISwapChain3 = swap_chain
                .cast()
                .map_err(|e| GraphicsError::SwapchainError(format!("IDXGISwapChain3 unavailable: {:?}", e)))?;

            info!(
                generation,
                width,
                height,
                buffers = options.frame_count,
                warp = options.warp,
                "DX12 device created"
            );

            Ok(Self {
                device,
                queue,
                swap_chain,
                options: options.clone(),
                width,
                height,
                _window: window,
            })
        }
    }

    /// 设备工厂，设备丢失后用它重建
    pub fn factory(window: Arc<Window>, options: Dx12Options) -> impl FnMut(u64) -> Result<Dx12Backend> + 'static {
        move |generation| Dx12Backend::new(window.clone(), &options, generation)
    }
}

impl Backend for Dx12Backend {
    type Fence = Dx12Fence;
    type CommandList = Dx12CommandList;
    type DescriptorHeap = Dx12DescriptorHeap;
    type Resource = Dx12Resource;
    type Pipeline = Dx12Pipeline;

    fn name(&self) -> &'static str {
        "DirectX 12"
    }

    fn frame_count(&self) -> usize {
        self.options.frame_count
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn current_back_buffer_index(&self) -> usize {
        unsafe { self.swap_chain.GetCurrentBackBufferIndex() as usize }
    }

    fn back_buffer(&self, index: usize) -> Result<Dx12Resource> {
        let buffer: ID3D12Resource = unsafe {
            self.swap_chain
                .GetBuffer(index as u32)
                .map_err(|e| GraphicsError::SwapchainError(format!("Failed to get back buffer {}: {:?}", index, e)))?
        };
        Ok(Dx12Resource::from_swap_chain(buffer, index))
    }

    fn create_fence(&self, initial_value: u64) -> Result<Dx12Fence> {
        Dx12Fence::new(&self.device, &self.queue, initial_value)
    }

    fn create_command_list(&self, name: &str) -> Result<Dx12CommandList> {
        Dx12CommandList::new(&self.device, name)
    }

    fn create_descriptor_heap(&self, kind: HeapKind, capacity: u32, shader_visible: bool) -> Result<Dx12DescriptorHeap> {
        Dx12DescriptorHeap::new(&self.device, kind, capacity, shader_visible)
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<Dx12Resource> {
        Dx12Resource::create_buffer(&self.device, desc)
    }

    fn create_texture(&self, desc: &TextureDesc<'_>) -> Result<Dx12Resource> {
        Dx12Resource::create_texture(&self.device, desc)
    }

    fn create_view(&self, view: &ResourceView<'_, Self>, dest: CpuDescriptorHandle) -> Result<()> {
        descriptor::create_view(self, view, dest);
        Ok(())
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> Result<Dx12Pipeline> {
        pipeline::create_graphics(&self.device, &self.options.shader_dir, desc)
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc<'_>) -> Result<Dx12Pipeline> {
        pipeline::create_compute(&self.device, &self.options.shader_dir, desc)
    }

    fn execute(&self, list: &Dx12CommandList) -> Result<()> {
        let list: ID3D12CommandList = list.list.cast().map_err(dx_error("Command list cast failed"))?;
        unsafe { self.queue.ExecuteCommandLists(&[Some(list)]) };
        Ok(())
    }

    fn present(&mut self, sync_interval: u32) -> Result<()> {
        let hr = unsafe { self.swap_chain.Present(sync_interval, DXGI_PRESENT(0)) };
        if is_device_removed(hr) {
            let reason = unsafe { self.device.GetDeviceRemovedReason() };
            return Err(GraphicsError::DeviceLost(format!("Present failed with {:?}, reason {:?}", hr, reason)).into());
        }
        hr.ok()
            .map_err(|e| GraphicsError::SwapchainError(format!("Present failed: {:?}", e)).into())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        unsafe {
            self.swap_chain
                .ResizeBuffers(
                    self.options.frame_count as u32,
                    width,
                    height,
                    DXGI_FORMAT_R8G8B8A8_UNORM,
                    DXGI_SWAP_CHAIN_FLAG(0),
                )
                .map_err(dx_error("Failed to resize swap chain"))?;
        }
        self.width = width;
        self.height = height;
        debug!(width, height, "Swap chain resized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use windows::Win32::Foundation::{E_INVALIDARG, E_OUTOFMEMORY};

    #[test]
    fn test_only_removal_is_device_lost() {
        for code in [DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET] {
            let error = dx_error("Failed to signal fence 1")(windows::core::Error::from_hresult(code));
            assert!(error.is_device_lost(), "{:?}", code);
        }

        for code in [E_INVALIDARG, E_OUTOFMEMORY] {
            let error = dx_error("Failed to signal fence 1")(windows::core::Error::from_hresult(code));
            assert!(!error.is_device_lost(), "{:?}", code);
            assert!(matches!(error, SampleError::Graphics(GraphicsError::CommandExecution(_))));
        }
    }
}

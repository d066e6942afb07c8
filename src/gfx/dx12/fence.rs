//! DirectX 12 fence
//!
//! 信号排在直接队列上，等待使用事件对象和 `WaitForSingleObject`。

use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};

use crate::core::error::Result;
use crate::engine_warn;
use crate::renderer::sync::GpuFence;

use super::dx_error;

pub struct Dx12Fence {
    fence: ID3D12Fence,
    queue: ID3D12CommandQueue,
    event: HANDLE,
}

impl Dx12Fence {
    pub(crate) fn new(device: &ID3D12Device, queue: &ID3D12CommandQueue, initial_value: u64) -> Result<Self> {
        unsafe {
            let fence: ID3D12Fence = device
                .CreateFence(initial_value, D3D12_FENCE_FLAG_NONE)
                .map_err(dx_error("Failed to create fence"))?;
            let event = CreateEventA(None, false, false, None).map_err(dx_error("Failed to create fence event"))?;
            Ok(Self { fence, queue: queue.clone(), event })
        }
    }
}

impl GpuFence for Dx12Fence {
    fn completed_value(&self) -> u64 {
        unsafe { self.fence.GetCompletedValue() }
    }

    fn signal(&self, value: u64) -> Result<()> {
        unsafe {
            self.queue
                .Signal(&self.fence, value)
                .map_err(dx_error(&format!("Failed to signal fence {}", value)))
        }
    }

    fn wait_for(&self, value: u64) -> Result<()> {
        unsafe {
            if self.fence.GetCompletedValue() >= value {
                return Ok(());
            }
            self.fence
                .SetEventOnCompletion(value, self.event)
                .map_err(dx_error("Failed to set fence event"))?;
            WaitForSingleObject(self.event, INFINITE);
        }
        Ok(())
    }
}

impl Drop for Dx12Fence {
    fn drop(&mut self) {
        if let Err(e) = unsafe { CloseHandle(self.event) } {
            engine_warn!("Failed to close fence event: {:?}", e);
        }
    }
}

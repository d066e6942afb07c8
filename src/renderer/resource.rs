//! 资源管理模块
//!
//! 提供帧资源集合、资源状态跟踪和持久映射的常量缓冲区。
//!
//! # 设计原则
//!
//! - **帧资源**：每个交换链缓冲对应一套命令列表、常量缓冲和描述符句柄
//! - **自动对齐**：常量缓冲区按 256 字节对齐
//! - **持久映射**：常量缓冲创建时映射一次，释放时解除映射
//! - **状态跟踪**：所有状态转换都经过 `TrackedResource::transition_to`

use std::ptr::NonNull;

use bytemuck::Pod;
use tracing::debug;

use crate::core::error::{GraphicsError, Result, SampleError};
use crate::gfx::backend::{Backend, GpuResource, ResourceView};
use crate::renderer::command::{Barrier, CommandList};
use crate::renderer::descriptor::{
    CpuDescriptorHandle, DescriptorHandle, DescriptorTable, GpuDescriptorHandle, HeapKind, SlotKey,
};
use crate::renderer::sync::{FenceValue, SlotReady};

/// 常量缓冲区对齐要求
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// 后缓冲 RTV 的每帧槽位名
pub const BACK_BUFFER_RTV: SlotKey = "back_buffer";

/// 计算对齐后的大小（DirectX 12 常量缓冲区要求256字节对齐）
pub fn aligned_constant_size(size: u64) -> u64 {
    (size + CONSTANT_BUFFER_ALIGNMENT - 1) & !(CONSTANT_BUFFER_ALIGNMENT - 1)
}

/// 资源状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    Present,
    RenderTarget,
    DepthWrite,
    PixelShaderResource,
    NonPixelShaderResource,
    UnorderedAccess,
    CopySource,
    CopyDest,
    GenericRead,
    VertexAndConstantBuffer,
}

/// 记录当前状态的资源
///
/// 状态只通过 `transition_to` / `barrier_to` 改变，目标状态与当前状态相同时不产生屏障。
pub struct TrackedResource<B: Backend> {
    resource: B::Resource,
    state: ResourceState,
}

impl<B: Backend> TrackedResource<B> {
    pub fn new(resource: B::Resource, initial_state: ResourceState) -> Self {
        Self { resource, state: initial_state }
    }

    pub fn resource(&self) -> &B::Resource {
        &self.resource
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// 生成到目标状态的屏障并记录新状态，已在目标状态时返回 `None`
    ///
    /// 用于把多个屏障合并成一次 `resource_barrier` 调用。
    pub fn barrier_to(&mut self, after: ResourceState) -> Option<Barrier<'_, B>> {
        if self.state == after {
            return None;
        }
        let before = std::mem::replace(&mut self.state, after);
        Some(Barrier::Transition { resource: &self.resource, before, after })
    }

    /// 在命令列表上转换到目标状态
    ///
    /// # 返回值
    ///
    /// 是否录制了屏障
    pub fn transition_to(&mut self, list: &mut B::CommandList, after: ResourceState) -> bool {
        match self.barrier_to(after) {
            Some(barrier) => {
                list.resource_barrier(&[barrier]);
                true
            }
            None => false,
        }
    }

    /// 同一资源上两次 UAV 访问之间的屏障，不改变状态
    pub fn uav_barrier(&self, list: &mut B::CommandList) {
        list.resource_barrier(&[Barrier::Uav { resource: &self.resource }]);
    }
}

/// 持久映射的上传堆缓冲
///
/// 创建时映射一次，释放时解除映射。
pub struct MappedBuffer<B: Backend> {
    resource: B::Resource,
    ptr: NonNull<u8>,
    size: usize,
}

impl<B: Backend> MappedBuffer<B> {
    /// 创建并映射上传堆缓冲，大小按 256 字节对齐
    pub fn new(backend: &B, name: &str, size: usize) -> Result<Self> {
        let aligned = aligned_constant_size(size as u64);
        let resource = backend.create_upload_buffer(name, aligned)?;
        let ptr = resource.map()?;
        Ok(Self { resource, ptr, size: aligned as usize })
    }

    pub fn resource(&self) -> &B::Resource {
        &self.resource
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// 写入字节
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset.checked_add(bytes.len()).unwrap_or(usize::MAX);
        if end > self.size {
            return Err(GraphicsError::ResourceCreation(format!(
                "Write of {} bytes at {} overflows '{}' ({} bytes)",
                bytes.len(),
                offset,
                self.resource.name(),
                self.size
            ))
            .into());
        }

        // SAFETY: 映射在 self 存活期间有效，范围已检查
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.as_ptr().add(offset), bytes.len());
        }
        Ok(())
    }

    pub fn write<T: Pod>(&mut self, value: &T) -> Result<()> {
        self.write_bytes(0, bytemuck::bytes_of(value))
    }
}

impl<B: Backend> Drop for MappedBuffer<B> {
    fn drop(&mut self) {
        self.resource.unmap();
    }
}

/// 上传一次性的静态数据（顶点、索引），返回未映射的上传堆缓冲
pub fn create_static_buffer<B: Backend>(backend: &B, name: &str, bytes: &[u8]) -> Result<B::Resource> {
    let resource = backend.create_upload_buffer(name, bytes.len() as u64)?;
    let ptr = resource.map()?;
    // SAFETY: 缓冲大小等于 bytes.len()
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len());
    }
    resource.unmap();
    Ok(resource)
}

/// 每帧常量缓冲的声明
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConstantDesc {
    pub name: &'static str,
    pub size: usize,
    /// 需要 CBV 时的 CBV/SRV/UAV 每帧槽位名
    pub cbv: Option<SlotKey>,
}

impl FrameConstantDesc {
    /// 以根 CBV 绑定的常量缓冲
    pub const fn root<T>(name: &'static str) -> Self {
        Self { name, size: std::mem::size_of::<T>(), cbv: None }
    }

    /// 通过描述符表绑定的常量缓冲
    pub const fn table<T>(name: &'static str, cbv: SlotKey) -> Self {
        Self { name, size: std::mem::size_of::<T>(), cbv: Some(cbv) }
    }
}

struct FrameConstant<B: Backend> {
    name: &'static str,
    buffer: MappedBuffer<B>,
    cbv: Option<DescriptorHandle>,
}

/// 一个帧槽位的资源
pub struct FrameResource<B: Backend> {
    /// 槽位索引，等于交换链后缓冲索引
    pub index: usize,
    pub command_list: B::CommandList,
    pub back_buffer: TrackedResource<B>,
    /// 后缓冲的 RTV
    pub rtv: CpuDescriptorHandle,
    /// 最后一次提交的 fence 值
    pub fence_value: FenceValue,
    constants: Vec<FrameConstant<B>>,
}

fn find_constant<'a, B: Backend>(constants: &'a [FrameConstant<B>], name: &str) -> Result<&'a FrameConstant<B>> {
    constants
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| SampleError::Runtime(format!("Frame constant '{}' is not declared", name)))
}

fn constant_cbv<B: Backend>(constant: &FrameConstant<B>) -> Result<GpuDescriptorHandle> {
    constant
        .cbv
        .and_then(|handle| handle.gpu)
        .ok_or_else(|| SampleError::Runtime(format!("Frame constant '{}' has no CBV", constant.name)))
}

impl<B: Backend> FrameResource<B> {
    /// 常量缓冲资源，用于根 CBV 绑定
    pub fn constants(&self, name: &str) -> Result<&B::Resource> {
        Ok(find_constant(&self.constants, name)?.buffer.resource())
    }

    /// 常量缓冲的 CBV 句柄，用于描述符表绑定
    pub fn constant_view(&self, name: &str) -> Result<GpuDescriptorHandle> {
        constant_cbv(find_constant(&self.constants, name)?)
    }

    /// 写入这一帧的常量
    pub fn write_constants<T: Pod>(&mut self, name: &str, value: &T) -> Result<()> {
        let constant = self
            .constants
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| SampleError::Runtime(format!("Frame constant '{}' is not declared", name)))?;
        constant.buffer.write(value)
    }

    /// 拆分出命令列表和录制时需要的其余部分
    pub fn split(&mut self) -> (&mut B::CommandList, FrameTargets<'_, B>) {
        (
            &mut self.command_list,
            FrameTargets {
                index: self.index,
                back_buffer: &mut self.back_buffer,
                rtv: self.rtv,
                constants: &self.constants,
            },
        )
    }
}

/// 录制一帧时可用的帧资源
pub struct FrameTargets<'a, B: Backend> {
    pub index: usize,
    pub back_buffer: &'a mut TrackedResource<B>,
    pub rtv: CpuDescriptorHandle,
    constants: &'a [FrameConstant<B>],
}

impl<'a, B: Backend> FrameTargets<'a, B> {
    pub fn constants(&self, name: &str) -> Result<&'a B::Resource> {
        let constants: &'a [FrameConstant<B>] = self.constants;
        Ok(find_constant(constants, name)?.buffer.resource())
    }

    pub fn constant_view(&self, name: &str) -> Result<GpuDescriptorHandle> {
        constant_cbv(find_constant(self.constants, name)?)
    }
}

/// 帧资源集合
///
/// 数量等于交换链缓冲数量，按交换链给出的后缓冲索引选择。
pub struct FrameResourceSet<B: Backend> {
    frames: Vec<FrameResource<B>>,
}

impl<B: Backend> FrameResourceSet<B> {
    /// 创建所有帧资源并写入它们的 RTV 和 CBV
    ///
    /// 描述符布局中必须声明每帧 RTV 槽位 `BACK_BUFFER_RTV`，
    /// 以及 `constants` 中所有 CBV 槽位。
    pub fn create(backend: &B, table: &DescriptorTable<B>, constants: &[FrameConstantDesc]) -> Result<Self> {
        let frame_count = backend.frame_count();
        let mut frames = Vec::with_capacity(frame_count);

        for index in 0..frame_count {
            let command_list = backend.create_command_list(&format!("Frame {} Commands", index))?;

            let back_buffer = backend.back_buffer(index)?;
            let rtv = table.cpu(HeapKind::Rtv, BACK_BUFFER_RTV, Some(index))?;
            backend.create_view(&ResourceView::RenderTarget(&back_buffer), rtv)?;

            let mut frame_constants = Vec::with_capacity(constants.len());
            for desc in constants {
                let buffer = MappedBuffer::new(backend, &format!("{} CB {}", desc.name, index), desc.size)?;
                let cbv = match desc.cbv {
                    Some(key) => {
                        let handle = table.handle(HeapKind::CbvSrvUav, key, Some(index))?;
                        backend.create_view(
                            &ResourceView::ConstantBuffer {
                                resource: buffer.resource(),
                                size: buffer.size() as u32,
                            },
                            handle.cpu,
                        )?;
                        Some(handle)
                    }
                    None => None,
                };
                frame_constants.push(FrameConstant { name: desc.name, buffer, cbv });
            }

            frames.push(FrameResource {
                index,
                command_list,
                back_buffer: TrackedResource::new(back_buffer, ResourceState::Present),
                rtv,
                fence_value: FenceValue::default(),
                constants: frame_constants,
            });
        }

        debug!(frames = frame_count, constants = constants.len(), "Frame resources created");
        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// 只读访问，不要求槽位空闲
    pub fn get(&self, index: usize) -> Option<&FrameResource<B>> {
        self.frames.get(index)
    }

    /// 取得 fence 已确认空闲的帧资源
    ///
    /// 凭证在这里被消耗，下一次复用同一槽位必须重新等待。
    pub fn acquire(&mut self, ready: SlotReady) -> Result<&mut FrameResource<B>> {
        let count = self.frames.len();
        self.frames.get_mut(ready.slot()).ok_or_else(|| {
            SampleError::Runtime(format!("Frame slot {} out of range ({} frames)", ready.slot(), count))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_buffer_alignment() {
        assert_eq!(aligned_constant_size(0), 0);
        assert_eq!(aligned_constant_size(1), 256);
        assert_eq!(aligned_constant_size(64), 256);
        assert_eq!(aligned_constant_size(256), 256);
        assert_eq!(aligned_constant_size(257), 512);
    }

    #[test]
    fn test_frame_constant_desc() {
        #[repr(C)]
        #[derive(Clone, Copy)]
        struct Small {
            _v: [f32; 4],
        }

        let root = FrameConstantDesc::root::<Small>("scene");
        assert_eq!(root.size, 16);
        assert_eq!(root.cbv, None);

        let table = FrameConstantDesc::table::<Small>("scene", "scene_cbv");
        assert_eq!(table.cbv, Some("scene_cbv"));
    }

    #[test]
    fn test_acquire_takes_slot_from_token() {
        use crate::gfx::sim::{GpuLag, SimBackend, SimMonitor, SimOptions};
        use crate::renderer::descriptor::DescriptorLayoutBuilder;
        use crate::renderer::sync::FramePacer;

        let monitor = SimMonitor::new();
        let options = SimOptions { frame_count: 3, gpu_lag: GpuLag::Manual, ..SimOptions::default() };
        let backend = SimBackend::new(options, &monitor, 0).unwrap();

        let mut layout = DescriptorLayoutBuilder::new(3);
        layout.per_frame(HeapKind::Rtv, BACK_BUFFER_RTV).unwrap();
        let table = DescriptorTable::create(&backend, layout.build()).unwrap();
        let constants = [FrameConstantDesc::root::<[f32; 4]>("scene")];
        let mut frames = FrameResourceSet::create(&backend, &table, &constants).unwrap();
        let mut pacer = FramePacer::new(backend.create_fence(0).unwrap(), 3);

        for slot in [2, 0, 2] {
            let ready = pacer.wait_until_slot_free(slot).unwrap();
            let frame = frames.acquire(ready).unwrap();
            assert_eq!(frame.index, slot);
            frame.write_constants("scene", &[slot as f32; 4]).unwrap();
            frame.fence_value = pacer.signal_after_submit(slot).unwrap();
        }

        // 同一槽位第二次取用之前已经等到了它的 fence
        assert_eq!(monitor.blocking_waits(), 1);
        assert_eq!(frames.get(2).map(|f| f.fence_value.value()), Some(3));
    }
}

//! 描述符管理模块
//!
//! 每种描述符堆在启动时一次性分区：先是固定槽位，随后是按帧分组的每帧槽位。
//! 槽位用符号名声明，只在启动时解析一次，之后句柄在堆的生命周期内保持不变。
//!
//! # 设计原则
//!
//! - **固定容量**：容量 = 固定槽位数 + 每帧槽位数 × 帧数，不增长，不释放
//! - **无碰撞**：同一个堆里任意两个 (槽位, 帧) 组合的偏移都不同
//! - **按帧索引**：每帧槽位 k 在帧 f 的偏移是 `fixed_count + f * per_frame_count + k`
//!
//! # DirectX 12 描述符堆类型
//!
//! - **RTV** (Render Target View)：渲染目标视图
//! - **DSV** (Depth Stencil View)：深度模板视图
//! - **CBV/SRV/UAV**：常量缓冲、着色资源、无序访问视图，着色器可见
//! - **Sampler**：采样器，着色器可见

use std::collections::HashMap;
use std::fmt;

use crate::core::error::{DescriptorError, Result};
use crate::gfx::backend::Backend;

/// 槽位名
pub type SlotKey = &'static str;

/// 描述符堆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapKind {
    /// 渲染目标视图 (RTV)
    Rtv,
    /// 深度模板视图 (DSV)
    Dsv,
    /// CBV/SRV/UAV
    CbvSrvUav,
    /// 采样器
    Sampler,
}

impl HeapKind {
    pub const COUNT: usize = 4;
    pub const ALL: [HeapKind; HeapKind::COUNT] =
        [HeapKind::Rtv, HeapKind::Dsv, HeapKind::CbvSrvUav, HeapKind::Sampler];

    /// 堆是否着色器可见
    pub fn is_shader_visible(&self) -> bool {
        matches!(self, HeapKind::CbvSrvUav | HeapKind::Sampler)
    }

    /// 获取堆类型名称
    pub fn name(&self) -> &'static str {
        match self {
            HeapKind::Rtv => "RTV",
            HeapKind::Dsv => "DSV",
            HeapKind::CbvSrvUav => "CBV/SRV/UAV",
            HeapKind::Sampler => "Sampler",
        }
    }

    fn index(&self) -> usize {
        match self {
            HeapKind::Rtv => 0,
            HeapKind::Dsv => 1,
            HeapKind::CbvSrvUav => 2,
            HeapKind::Sampler => 3,
        }
    }
}

/// 描述符句柄（CPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuDescriptorHandle {
    /// 句柄指针值
    pub ptr: usize,
    /// 描述符索引
    pub index: u32,
}

impl CpuDescriptorHandle {
    /// 创建新的 CPU 描述符句柄
    pub fn new(ptr: usize, index: u32) -> Self {
        Self { ptr, index }
    }

    /// 偏移句柄
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + count as usize * increment_size as usize,
            index: self.index + count,
        }
    }
}

/// 描述符句柄（GPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuDescriptorHandle {
    /// 句柄指针值
    pub ptr: u64,
    /// 描述符索引
    pub index: u32,
}

impl GpuDescriptorHandle {
    /// 创建新的 GPU 描述符句柄
    pub fn new(ptr: u64, index: u32) -> Self {
        Self { ptr, index }
    }

    /// 偏移句柄
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + count as u64 * increment_size as u64,
            index: self.index + count,
        }
    }
}

/// 描述符句柄对（CPU + GPU）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHandle {
    /// CPU 可见句柄
    pub cpu: CpuDescriptorHandle,
    /// GPU 可见句柄（仅对着色器可见的堆有效）
    pub gpu: Option<GpuDescriptorHandle>,
}

impl DescriptorHandle {
    /// 创建新的描述符句柄对
    pub fn new(cpu: CpuDescriptorHandle, gpu: Option<GpuDescriptorHandle>) -> Self {
        Self { cpu, gpu }
    }

    /// 偏移句柄对
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            cpu: self.cpu.offset(count, increment_size),
            gpu: self.gpu.map(|g| g.offset(count, increment_size)),
        }
    }
}

/// 后端创建的描述符堆
pub trait DescriptorHeap {
    fn kind(&self) -> HeapKind;
    fn capacity(&self) -> u32;
    fn increment_size(&self) -> u32;
    fn cpu_start(&self) -> CpuDescriptorHandle;
    /// 着色器不可见的堆返回 `None`
    fn gpu_start(&self) -> Option<GpuDescriptorHandle>;
}

/// 槽位在堆中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotBinding {
    /// 固定槽位的偏移
    Fixed(u32),
    /// 每帧槽位：帧 f 的偏移是 `base + f * stride`
    PerFrame { base: u32, stride: u32 },
}

#[derive(Debug, Clone, Default)]
struct HeapRegion {
    fixed: Vec<SlotKey>,
    per_frame: Vec<SlotKey>,
}

impl HeapRegion {
    fn contains(&self, key: SlotKey) -> bool {
        self.fixed.contains(&key) || self.per_frame.contains(&key)
    }
}

/// 描述符布局构建器
///
/// 收集所有槽位声明，`build` 之后偏移才确定。
#[derive(Debug, Clone)]
pub struct DescriptorLayoutBuilder {
    frame_count: usize,
    regions: [HeapRegion; HeapKind::COUNT],
}

impl DescriptorLayoutBuilder {
    pub fn new(frame_count: usize) -> Self {
        Self {
            frame_count,
            regions: Default::default(),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn check_unique(&self, kind: HeapKind, key: SlotKey) -> Result<()> {
        if self.regions[kind.index()].contains(key) {
            return Err(DescriptorError::DuplicateSlot { heap: kind.name(), key }.into());
        }
        Ok(())
    }

    /// 声明一个所有帧共享的槽位
    pub fn fixed(&mut self, kind: HeapKind, key: SlotKey) -> Result<()> {
        self.check_unique(kind, key)?;
        self.regions[kind.index()].fixed.push(key);
        Ok(())
    }

    /// 声明一个每帧一份的槽位
    pub fn per_frame(&mut self, kind: HeapKind, key: SlotKey) -> Result<()> {
        self.check_unique(kind, key)?;
        self.regions[kind.index()].per_frame.push(key);
        Ok(())
    }

    /// 解析所有槽位的偏移
    pub fn build(self) -> DescriptorLayout {
        let mut slots = HashMap::new();
        let mut counts = [(0u32, 0u32); HeapKind::COUNT];

        for kind in HeapKind::ALL {
            let region = &self.regions[kind.index()];
            let fixed_count = region.fixed.len() as u32;
            let per_frame_count = region.per_frame.len() as u32;

            for (offset, key) in region.fixed.iter().enumerate() {
                slots.insert((kind, *key), SlotBinding::Fixed(offset as u32));
            }
            for (k, key) in region.per_frame.iter().enumerate() {
                slots.insert(
                    (kind, *key),
                    SlotBinding::PerFrame { base: fixed_count + k as u32, stride: per_frame_count },
                );
            }
            counts[kind.index()] = (fixed_count, per_frame_count);
        }

        DescriptorLayout {
            frame_count: self.frame_count,
            slots,
            counts,
        }
    }
}

/// 已解析的描述符布局
#[derive(Debug, Clone)]
pub struct DescriptorLayout {
    frame_count: usize,
    slots: HashMap<(HeapKind, SlotKey), SlotBinding>,
    /// 每种堆的 (固定槽位数, 每帧槽位数)
    counts: [(u32, u32); HeapKind::COUNT],
}

impl DescriptorLayout {
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn fixed_count(&self, kind: HeapKind) -> u32 {
        self.counts[kind.index()].0
    }

    pub fn per_frame_count(&self, kind: HeapKind) -> u32 {
        self.counts[kind.index()].1
    }

    /// 堆需要的描述符数量
    pub fn capacity(&self, kind: HeapKind) -> u32 {
        let (fixed, per_frame) = self.counts[kind.index()];
        fixed + per_frame * self.frame_count as u32
    }

    pub fn binding(&self, kind: HeapKind, key: SlotKey) -> Option<SlotBinding> {
        self.slots.get(&(kind, key)).copied()
    }

    /// 每帧槽位的名字（按声明顺序）
    pub fn per_frame_keys(&self, kind: HeapKind) -> Vec<SlotKey> {
        let mut keys: Vec<(u32, SlotKey)> = self
            .slots
            .iter()
            .filter_map(|((heap, key), binding)| match binding {
                SlotBinding::PerFrame { base, .. } if *heap == kind => Some((*base, *key)),
                _ => None,
            })
            .collect();
        keys.sort_unstable();
        keys.into_iter().map(|(_, key)| key).collect()
    }

    /// 解析槽位偏移
    ///
    /// 固定槽位忽略 `frame`；每帧槽位必须给出 `frame < frame_count`。
    pub fn resolve(&self, kind: HeapKind, key: SlotKey, frame: Option<usize>) -> Result<u32> {
        let binding = self
            .binding(kind, key)
            .ok_or(DescriptorError::UnknownSlot { heap: kind.name(), key })?;

        match binding {
            SlotBinding::Fixed(offset) => Ok(offset),
            SlotBinding::PerFrame { base, stride } => {
                let frame = frame.ok_or(DescriptorError::MissingFrameIndex { key })?;
                if frame >= self.frame_count {
                    return Err(DescriptorError::FrameOutOfRange {
                        frame,
                        frame_count: self.frame_count,
                    }
                    .into());
                }
                Ok(base + frame as u32 * stride)
            }
        }
    }
}

/// 描述符堆统计信息
#[derive(Debug, Clone)]
pub struct DescriptorHeapStats {
    pub kind: HeapKind,
    /// 总容量
    pub capacity: u32,
    pub fixed: u32,
    pub per_frame: u32,
    pub shader_visible: bool,
}

impl fmt::Display for DescriptorHeapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} heap: {} descriptors ({} fixed + {} per frame){}",
            self.kind.name(),
            self.capacity,
            self.fixed,
            self.per_frame,
            if self.shader_visible { ", shader visible" } else { "" }
        )
    }
}

/// 布局 + 已创建的堆
///
/// 只为容量非零的堆类型创建描述符堆。
pub struct DescriptorTable<B: Backend> {
    layout: DescriptorLayout,
    heaps: Vec<Option<B::DescriptorHeap>>,
}

impl<B: Backend> DescriptorTable<B> {
    /// 按布局创建所有描述符堆
    pub fn create(backend: &B, layout: DescriptorLayout) -> Result<Self> {
        let mut heaps = Vec::with_capacity(HeapKind::COUNT);
        for kind in HeapKind::ALL {
            let capacity = layout.capacity(kind);
            if capacity == 0 {
                heaps.push(None);
                continue;
            }
            heaps.push(Some(backend.create_descriptor_heap(
                kind,
                capacity,
                kind.is_shader_visible(),
            )?));
        }

        Ok(Self { layout, heaps })
    }

    pub fn layout(&self) -> &DescriptorLayout {
        &self.layout
    }

    pub fn heap(&self, kind: HeapKind) -> Result<&B::DescriptorHeap> {
        self.heaps[kind.index()]
            .as_ref()
            .ok_or_else(|| DescriptorError::HeapNotCreated(kind.name()).into())
    }

    /// 需要绑定到命令列表上的着色器可见堆
    pub fn shader_visible_heaps(&self) -> Vec<&B::DescriptorHeap> {
        [HeapKind::CbvSrvUav, HeapKind::Sampler]
            .iter()
            .filter_map(|kind| self.heaps[kind.index()].as_ref())
            .collect()
    }

    /// 槽位的句柄对
    pub fn handle(&self, kind: HeapKind, key: SlotKey, frame: Option<usize>) -> Result<DescriptorHandle> {
        let offset = self.layout.resolve(kind, key, frame)?;
        let heap = self.heap(kind)?;
        let increment = heap.increment_size();
        let cpu = heap.cpu_start().offset(offset, increment);
        let gpu = heap.gpu_start().map(|start| start.offset(offset, increment));
        Ok(DescriptorHandle::new(cpu, gpu))
    }

    pub fn cpu(&self, kind: HeapKind, key: SlotKey, frame: Option<usize>) -> Result<CpuDescriptorHandle> {
        Ok(self.handle(kind, key, frame)?.cpu)
    }

    /// 着色器可见槽位的 GPU 句柄
    pub fn gpu(&self, kind: HeapKind, key: SlotKey, frame: Option<usize>) -> Result<GpuDescriptorHandle> {
        self.handle(kind, key, frame)?
            .gpu
            .ok_or_else(|| DescriptorError::HeapNotCreated(kind.name()).into())
    }

    pub fn stats(&self) -> Vec<DescriptorHeapStats> {
        HeapKind::ALL
            .iter()
            .filter(|kind| self.heaps[kind.index()].is_some())
            .map(|kind| DescriptorHeapStats {
                kind: *kind,
                capacity: self.layout.capacity(*kind),
                fixed: self.layout.fixed_count(*kind),
                per_frame: self.layout.per_frame_count(*kind),
                shader_visible: kind.is_shader_visible(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_handle_offset() {
        let cpu = CpuDescriptorHandle::new(1000, 0);
        let offset = cpu.offset(5, 32);
        assert_eq!(offset.ptr, 1160);
        assert_eq!(offset.index, 5);

        let handle = DescriptorHandle::new(cpu, Some(GpuDescriptorHandle::new(2000, 0)));
        let moved = handle.offset(2, 8);
        assert_eq!(moved.cpu.ptr, 1016);
        assert_eq!(moved.gpu.map(|g| g.ptr), Some(2016));
    }

    #[test]
    fn test_fixed_then_per_frame_offsets() {
        let mut builder = DescriptorLayoutBuilder::new(3);
        builder.per_frame(HeapKind::CbvSrvUav, "shadow_cbv").unwrap();
        builder.fixed(HeapKind::CbvSrvUav, "shadow_srv").unwrap();
        builder.per_frame(HeapKind::CbvSrvUav, "scene_cbv").unwrap();
        builder.fixed(HeapKind::CbvSrvUav, "null_srv").unwrap();
        let layout = builder.build();

        let heap = HeapKind::CbvSrvUav;
        assert_eq!(layout.capacity(heap), 2 + 2 * 3);
        assert_eq!(layout.resolve(heap, "shadow_srv", None).unwrap(), 0);
        assert_eq!(layout.resolve(heap, "null_srv", None).unwrap(), 1);
        assert_eq!(layout.resolve(heap, "shadow_cbv", Some(0)).unwrap(), 2);
        assert_eq!(layout.resolve(heap, "scene_cbv", Some(0)).unwrap(), 3);
        assert_eq!(layout.resolve(heap, "shadow_cbv", Some(2)).unwrap(), 6);
        assert_eq!(layout.resolve(heap, "scene_cbv", Some(2)).unwrap(), 7);
        assert_eq!(layout.per_frame_keys(heap), vec!["shadow_cbv", "scene_cbv"]);
    }

    #[test]
    fn test_duplicate_slot_rejected() {
        let mut builder = DescriptorLayoutBuilder::new(2);
        builder.fixed(HeapKind::Rtv, "scene").unwrap();
        assert!(builder.per_frame(HeapKind::Rtv, "scene").is_err());
        // 不同堆可以同名
        builder.fixed(HeapKind::CbvSrvUav, "scene").unwrap();
    }

    #[test]
    fn test_resolve_errors() {
        let mut builder = DescriptorLayoutBuilder::new(2);
        builder.per_frame(HeapKind::Rtv, "back_buffer").unwrap();
        let layout = builder.build();

        assert!(layout.resolve(HeapKind::Rtv, "back_buffer", None).is_err());
        assert!(layout.resolve(HeapKind::Rtv, "back_buffer", Some(2)).is_err());
        assert!(layout.resolve(HeapKind::Rtv, "missing", Some(0)).is_err());
        assert_eq!(layout.capacity(HeapKind::Dsv), 0);
    }
}

//! 渲染器模块
//!
//! 与具体图形 API 无关的帧循环：帧节奏、描述符布局、帧资源和设备丢失恢复。
//! 后端（DirectX 12、模拟 GPU）在 `gfx` 模块中实现，示例脚本在 `samples` 模块中。
//!
//! # 每帧流程
//!
//! ```text
//! 后缓冲索引 → 等待槽位空闲 → 写常量 → 重置列表 → 录制 → 关闭 → 执行 → Present → signal
//! ```
//!
//! Present 报告设备丢失时，渲染器排空队列、释放所有依赖设备的对象、
//! 通过工厂创建新设备并重新加载示例资源，然后继续下一帧。

pub mod command;
pub mod context;
pub mod descriptor;
pub mod resource;
pub mod sync;

use std::time::Instant;

use tracing::{debug, info, trace};

use crate::core::error::{Result, SampleError};
use crate::gfx::backend::Backend;
use crate::samples::{FrameTiming, Pacing, Sample, SampleContext, SampleKey};
use crate::{engine_info, engine_warn};

use self::command::CommandList;
use self::context::{BackendFactory, DeviceContext};
use self::descriptor::{DescriptorLayoutBuilder, DescriptorTable, HeapKind};
use self::resource::{FrameResourceSet, BACK_BUFFER_RTV};
use self::sync::{FenceValue, WaitOutcome};

/// 渲染器设置
#[derive(Debug, Clone, Copy)]
pub struct RendererSettings {
    /// Present 的同步间隔
    pub sync_interval: u32,
    /// 每隔多少帧输出一次帧率，0 表示不输出
    pub stats_interval: u64,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self { sync_interval: 1, stats_interval: 0 }
    }
}

/// 一帧的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// 已呈现，附带这一帧的 fence 值
    Presented(FenceValue),
    /// 设备丢失，已经重建，这一帧被丢弃
    Recovered,
}

/// 帧统计
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    /// 呈现成功的帧数
    pub frames: u64,
    /// 帧开始时 CPU 阻塞等待槽位的次数
    pub cpu_waits: u64,
    /// 设备丢失后重建的次数
    pub recoveries: u64,
    /// 排空队列的次数，包括设备丢失时的尝试
    pub drains: u64,
    window_frames: u64,
    window_start: Option<Instant>,
}

impl FrameStats {
    fn record_frame(&mut self, outcome: WaitOutcome, interval: u64) {
        self.frames += 1;
        if outcome == WaitOutcome::Waited {
            self.cpu_waits += 1;
        }
        if interval == 0 {
            return;
        }

        let start = *self.window_start.get_or_insert_with(Instant::now);
        self.window_frames += 1;
        if self.window_frames >= interval {
            let elapsed = start.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                info!(
                    fps = format!("{:.1}", self.window_frames as f64 / elapsed),
                    frames = self.frames,
                    cpu_waits = self.cpu_waits,
                    "Frame statistics"
                );
            }
            self.window_frames = 0;
            self.window_start = Some(Instant::now());
        }
    }
}

/// 依赖设备的帧状态，设备重建或改变大小时整体重建
struct FrameState<B: Backend> {
    // 先于描述符堆释放
    frames: FrameResourceSet<B>,
    table: DescriptorTable<B>,
}

pub struct Renderer<B: Backend> {
    // 字段按释放顺序排列：帧资源和示例资源先于设备
    frame_state: Option<FrameState<B>>,
    sample: Box<dyn Sample<B>>,
    device: DeviceContext<B>,
    settings: RendererSettings,
    stats: FrameStats,
    timing: FrameTiming,
    shut_down: bool,
}

impl<B: Backend> Renderer<B> {
    /// 创建设备、描述符堆和帧资源，并加载示例资源
    pub fn new(factory: BackendFactory<B>, sample: Box<dyn Sample<B>>, settings: RendererSettings) -> Result<Self> {
        let device = DeviceContext::new(factory)?;
        let mut renderer = Self {
            frame_state: None,
            sample,
            device,
            settings,
            stats: FrameStats::default(),
            timing: FrameTiming::default(),
            shut_down: false,
        };
        renderer.build_frame_state()?;
        info!(sample = renderer.sample.name(), pacing = ?renderer.sample.pacing(), "Renderer ready");
        Ok(renderer)
    }

    /// 按示例的声明创建描述符堆和帧资源，然后加载示例资源
    fn build_frame_state(&mut self) -> Result<()> {
        let backend = self.device.backend()?;
        let frame_count = backend.frame_count();
        let constants = self.sample.frame_constants();

        let mut layout = DescriptorLayoutBuilder::new(frame_count);
        layout.per_frame(HeapKind::Rtv, BACK_BUFFER_RTV)?;
        for constant in &constants {
            if let Some(cbv) = constant.cbv {
                layout.per_frame(HeapKind::CbvSrvUav, cbv)?;
            }
        }
        self.sample.declare_descriptors(&mut layout)?;

        let table = DescriptorTable::create(backend, layout.build())?;
        for stats in table.stats() {
            debug!("{}", stats);
        }
        let frames = FrameResourceSet::create(backend, &table, &constants)?;

        let (width, height) = backend.size();
        self.sample.load_assets(&SampleContext { backend, table: &table, frame_count, width, height })?;

        self.frame_state = Some(FrameState { frames, table });
        Ok(())
    }

    /// 释放示例资源和帧状态，调用前 GPU 必须空闲
    fn release_frame_state(&mut self) {
        self.frame_state = None;
        self.sample.release_assets();
    }

    pub fn sample_name(&self) -> &'static str {
        self.sample.name()
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn device(&self) -> &DeviceContext<B> {
        &self.device
    }

    pub fn backend(&self) -> Result<&B> {
        self.device.backend()
    }

    pub fn descriptor_table(&self) -> Option<&DescriptorTable<B>> {
        self.frame_state.as_ref().map(|state| &state.table)
    }

    pub fn on_key(&mut self, key: SampleKey) {
        self.sample.on_key(key);
    }

    /// 渲染一帧
    ///
    /// # 参数
    ///
    /// * `delta` - 距上一帧的秒数
    pub fn frame(&mut self, delta: f32) -> Result<FrameOutcome> {
        self.timing.delta = delta;
        self.timing.total += delta;

        match self.render_frame() {
            Ok(outcome) => {
                self.timing.frame_number += 1;
                Ok(outcome)
            }
            Err(e) if e.is_device_lost() => {
                engine_warn!("Device lost during frame {}: {}", self.timing.frame_number, e);
                self.recover()?;
                Ok(FrameOutcome::Recovered)
            }
            Err(e) => Err(e),
        }
    }

    fn render_frame(&mut self) -> Result<FrameOutcome> {
        let pacing = self.sample.pacing();
        let sync_interval = self.settings.sync_interval;
        let (backend, pacer) = self.device.parts_mut()?;
        let state = self
            .frame_state
            .as_mut()
            .ok_or_else(|| SampleError::Runtime("Frame resources are not built".to_string()))?;

        let slot = backend.current_back_buffer_index();
        let ready = pacer.wait_until_slot_free(slot)?;
        let outcome = ready.outcome();
        let frame = state.frames.acquire(ready)?;

        self.sample.update(frame, &self.timing)?;

        let (list, targets) = frame.split();
        list.reset()?;
        list.set_descriptor_heaps(&state.table.shader_visible_heaps());
        self.sample.record(list, targets, &state.table)?;
        list.close()?;

        backend.execute(&frame.command_list)?;
        backend.present(sync_interval)?;

        let fence_value = pacer.signal_after_submit(slot)?;
        frame.fence_value = fence_value;
        let synced = match pacing {
            Pacing::FullSync => Some(pacer.wait_until_slot_free(slot)?.outcome()),
            Pacing::Buffered => None,
        };

        trace!(
            frame = self.timing.frame_number,
            slot,
            fence = fence_value.value(),
            waited = outcome == WaitOutcome::Waited,
            synced = ?synced,
            "Frame presented"
        );
        self.stats.record_frame(outcome, self.settings.stats_interval);
        Ok(FrameOutcome::Presented(fence_value))
    }

    /// 设备丢失恢复
    ///
    /// 旧设备的对象全部释放之后才创建新设备。
    pub fn recover(&mut self) -> Result<()> {
        let drained = self.device.begin_teardown();
        self.stats.drains += 1;
        debug!(drained, "Tearing down lost device");

        self.release_frame_state();
        self.device.release();
        self.device.rebuild()?;
        self.build_frame_state()?;
        self.device.finish_rebuild();

        self.stats.recoveries += 1;
        engine_info!("Recovered from device loss (generation {})", self.device.generation());
        Ok(())
    }

    /// 等待 GPU 完成所有已提交的工作
    pub fn drain(&mut self) -> Result<()> {
        self.device.drain()?;
        self.stats.drains += 1;
        Ok(())
    }

    /// 改变交换链大小并重建依赖尺寸的资源
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            // 最小化
            return Ok(());
        }
        if self.device.backend()?.size() == (width, height) {
            return Ok(());
        }

        self.drain()?;
        self.release_frame_state();
        self.device.backend_mut()?.resize(width, height)?;
        self.build_frame_state()?;
        info!(width, height, "Renderer resized");
        Ok(())
    }

    /// 退出前排空队列
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.drain()?;
        info!(frames = self.stats.frames, recoveries = self.stats.recoveries, "Renderer shut down");
        Ok(())
    }
}

impl<B: Backend> Drop for Renderer<B> {
    fn drop(&mut self) {
        if !self.shut_down {
            if let Err(e) = self.device.drain() {
                engine_warn!("Failed to drain GPU on drop: {}", e);
            }
        }
        self.release_frame_state();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SampleKind;
    use crate::gfx::sim::{SimBackend, SimMonitor, SimOptions};
    use crate::samples::create_sample;

    fn renderer(kind: SampleKind, monitor: &SimMonitor) -> Renderer<SimBackend> {
        let factory = SimBackend::factory(SimOptions::default(), monitor.clone());
        Renderer::new(Box::new(factory), create_sample(kind), RendererSettings::default()).unwrap()
    }

    #[test]
    fn test_frames_present_in_order() {
        let monitor = SimMonitor::new();
        let mut renderer = renderer(SampleKind::Tessellation, &monitor);
        let mut last = 0;
        for _ in 0..6 {
            match renderer.frame(1.0 / 60.0).unwrap() {
                FrameOutcome::Presented(value) => {
                    assert!(value.value() > last);
                    last = value.value();
                }
                FrameOutcome::Recovered => panic!("unexpected recovery"),
            }
        }
        assert_eq!(renderer.stats().frames, 6);
        assert_eq!(monitor.presents(), 6);
        assert!(monitor.violations().is_empty(), "{:?}", monitor.violations());
    }

    #[test]
    fn test_resize_rebuilds_frame_state() {
        let monitor = SimMonitor::new();
        let mut renderer = renderer(SampleKind::SoftwareRasterization, &monitor);
        renderer.frame(0.016).unwrap();
        renderer.resize(640, 480).unwrap();
        assert_eq!(renderer.backend().unwrap().size(), (640, 480));
        renderer.frame(0.016).unwrap();
        assert!(monitor.violations().is_empty(), "{:?}", monitor.violations());
        assert!(monitor.hazards().is_empty());
    }

    #[test]
    fn test_drop_releases_everything() {
        let monitor = SimMonitor::new();
        {
            let mut renderer = renderer(SampleKind::PostprocessBlur, &monitor);
            renderer.frame(0.016).unwrap();
            renderer.shutdown().unwrap();
        }
        assert_eq!(monitor.total_live_objects(), 0);
    }
}

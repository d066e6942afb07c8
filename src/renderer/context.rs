//! 设备上下文
//!
//! 持有后端（设备、直接队列、交换链）和它的帧节奏控制器，
//! 并在设备丢失后通过工厂闭包重建。
//!
//! # 生命周期
//!
//! ```text
//! Running --begin_teardown--> TearingDown --release--> Rebuilding --finish_rebuild--> Running
//! ```

use tracing::{debug, info, warn};

use crate::core::error::{Result, SampleError};
use crate::engine_warn;
use crate::gfx::backend::Backend;
use crate::renderer::sync::{FramePacer, GpuFence};

/// 设备上下文状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    /// 正在排空队列并释放旧设备的对象
    TearingDown,
    /// 旧设备已释放，正在创建新设备
    Rebuilding,
}

/// 按代际创建后端的工厂
pub type BackendFactory<B> = Box<dyn FnMut(u64) -> Result<B>>;

pub struct DeviceContext<B: Backend> {
    // 先于 backend 释放
    pacer: Option<FramePacer<B::Fence>>,
    backend: Option<B>,
    factory: BackendFactory<B>,
    state: ContextState,
    generation: u64,
}

impl<B: Backend> DeviceContext<B> {
    /// 创建第 0 代设备
    pub fn new(mut factory: BackendFactory<B>) -> Result<Self> {
        let backend = factory(0)?;
        let pacer = Self::create_pacer(&backend)?;
        info!(backend = backend.name(), frames = backend.frame_count(), "Device context created");

        Ok(Self {
            pacer: Some(pacer),
            backend: Some(backend),
            factory,
            state: ContextState::Running,
            generation: 0,
        })
    }

    fn create_pacer(backend: &B) -> Result<FramePacer<B::Fence>> {
        let fence = backend.create_fence(0)?;
        Ok(FramePacer::new(fence, backend.frame_count()))
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// 重建过的次数
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn not_running(&self) -> SampleError {
        SampleError::Runtime(format!("Device context is {:?}", self.state))
    }

    pub fn backend(&self) -> Result<&B> {
        self.backend.as_ref().ok_or_else(|| self.not_running())
    }

    pub fn backend_mut(&mut self) -> Result<&mut B> {
        match self.backend.as_mut() {
            Some(backend) => Ok(backend),
            None => Err(SampleError::Runtime(format!("Device context is {:?}", self.state))),
        }
    }

    pub fn pacer(&self) -> Result<&FramePacer<B::Fence>> {
        self.pacer.as_ref().ok_or_else(|| self.not_running())
    }

    pub fn pacer_mut(&mut self) -> Result<&mut FramePacer<B::Fence>> {
        match self.pacer.as_mut() {
            Some(pacer) => Ok(pacer),
            None => Err(SampleError::Runtime(format!("Device context is {:?}", self.state))),
        }
    }

    /// 同时借出后端和节奏控制器
    pub fn parts_mut(&mut self) -> Result<(&mut B, &mut FramePacer<B::Fence>)> {
        match (self.backend.as_mut(), self.pacer.as_mut()) {
            (Some(backend), Some(pacer)) => Ok((backend, pacer)),
            _ => Err(SampleError::Runtime(format!("Device context is {:?}", self.state))),
        }
    }

    /// 等待 GPU 完成所有已提交的工作
    pub fn drain(&mut self) -> Result<()> {
        self.pacer_mut()?.drain_all()
    }

    /// 进入 `TearingDown` 并尽量排空队列
    ///
    /// 已经无响应的设备无法排空，错误只记录不返回。
    ///
    /// # 返回值
    ///
    /// 是否成功排空
    pub fn begin_teardown(&mut self) -> bool {
        self.state = ContextState::TearingDown;
        match self.pacer.as_mut().map(|pacer| pacer.drain_all()) {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                engine_warn!("Failed to drain GPU during teardown (ignored): {}", e);
                false
            }
            None => false,
        }
    }

    /// 释放 fence 和后端，进入 `Rebuilding`
    ///
    /// 调用前必须已经释放所有由该后端创建的对象。
    pub fn release(&mut self) {
        if self.state == ContextState::Running {
            warn!("Releasing a running device context without teardown");
        }
        self.pacer = None;
        self.backend = None;
        self.state = ContextState::Rebuilding;
        debug!(generation = self.generation, "Device released");
    }

    /// 用工厂创建下一代设备和新的 fence
    ///
    /// 失败时保持 `Rebuilding`，可以再次调用。
    pub fn rebuild(&mut self) -> Result<()> {
        if self.state != ContextState::Rebuilding {
            return Err(SampleError::Runtime(format!(
                "Cannot rebuild a device context that is {:?}",
                self.state
            )));
        }

        let generation = self.generation + 1;
        let backend = (self.factory)(generation)?;
        let pacer = Self::create_pacer(&backend)?;
        debug!(
            generation,
            fence = pacer.fence().completed_value(),
            "Device recreated"
        );

        self.backend = Some(backend);
        self.pacer = Some(pacer);
        self.generation = generation;
        Ok(())
    }

    /// 依赖设备的资源全部重建完毕，回到 `Running`
    pub fn finish_rebuild(&mut self) {
        self.state = ContextState::Running;
        info!(generation = self.generation, "Device context running again");
    }

    /// 完整的设备丢失恢复，只针对上下文本身持有的对象
    pub fn recover(&mut self) -> Result<()> {
        self.begin_teardown();
        self.release();
        self.rebuild()?;
        self.finish_rebuild();
        Ok(())
    }
}

impl<B: Backend> Drop for DeviceContext<B> {
    fn drop(&mut self) {
        // fence 必须先于设备释放
        self.pacer = None;
        self.backend = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::sim::{SimBackend, SimMonitor, SimOptions};

    fn context(monitor: &SimMonitor) -> DeviceContext<SimBackend> {
        let factory = SimBackend::factory(SimOptions::default(), monitor.clone());
        DeviceContext::new(Box::new(factory)).unwrap()
    }

    #[test]
    fn test_recover_advances_generation() {
        let monitor = SimMonitor::new();
        let mut ctx = context(&monitor);
        assert_eq!(ctx.state(), ContextState::Running);

        ctx.pacer_mut().unwrap().signal_after_submit(0).unwrap();
        ctx.recover().unwrap();

        assert_eq!(ctx.state(), ContextState::Running);
        assert_eq!(ctx.generation(), 1);
        assert_eq!(monitor.live_objects(0), 0);
        let pacer = ctx.pacer().unwrap();
        assert_eq!(pacer.last_signaled(), pacer.initial_value());
    }

    #[test]
    fn test_teardown_ignores_lost_device() {
        let monitor = SimMonitor::new();
        monitor.inject_device_lost_at(1);
        let mut ctx = context(&monitor);

        assert!(ctx.backend_mut().unwrap().present(1).is_err());
        assert!(!ctx.begin_teardown());
        assert_eq!(ctx.state(), ContextState::TearingDown);

        ctx.release();
        assert!(ctx.backend().is_err());
        ctx.rebuild().unwrap();
        ctx.finish_rebuild();
        assert_eq!(ctx.generation(), 1);
        assert!(ctx.backend_mut().unwrap().present(1).is_ok());
    }

    #[test]
    fn test_rebuild_requires_release() {
        let monitor = SimMonitor::new();
        let mut ctx = context(&monitor);
        assert!(ctx.rebuild().is_err());
    }
}

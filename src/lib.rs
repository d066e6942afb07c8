//! D3D12 Samples - 共享帧同步核心上的 Direct3D 12 示例集
//!
//! 每个示例都跑在同一套帧循环上：交换链决定后缓冲索引，
//! 帧槽位用 fence 值保护，CPU 只在复用仍被 GPU 使用的槽位时等待。
//!
//! # 模块结构
//!
//! - `core`: 配置、错误处理、日志
//! - `gfx`: 图形后端（DirectX 12 和模拟 GPU）
//! - `renderer`: 帧节奏、描述符布局、帧资源、设备丢失恢复
//! - `samples`: HelloCompute、PostprocessBlur、Tessellation、SoftwareRasterization
//!
//! # 使用示例
//!
//! ```no_run
//! use d3d12_samples::core::config::SampleKind;
//! use d3d12_samples::gfx::sim::{SimBackend, SimMonitor, SimOptions};
//! use d3d12_samples::renderer::{Renderer, RendererSettings};
//! use d3d12_samples::samples::create_sample;
//!
//! let monitor = SimMonitor::new();
//! let factory = SimBackend::factory(SimOptions::default(), monitor.clone());
//! let mut renderer = Renderer::new(
//!     Box::new(factory),
//!     create_sample(SampleKind::Tessellation),
//!     RendererSettings::default(),
//! )?;
//! for _ in 0..60 {
//!     renderer.frame(1.0 / 60.0)?;
//! }
//! renderer.shutdown()?;
//! # Ok::<(), d3d12_samples::core::SampleError>(())
//! ```

pub mod core;
pub mod gfx;
pub mod renderer;
pub mod samples;

//! D3D12 Samples 程序入口
//!
//! ```bash
//! # 使用配置文件（config.toml）
//! cargo run
//!
//! # 选择示例和后端
//! cargo run -- --sample tessellation --dx12
//!
//! # 无窗口运行模拟 GPU，渲染 240 帧后退出
//! cargo run -- --sim --sample software_rasterization --frames 240
//! ```
//!
//! 窗口中的按键：方向键控制相机或示例参数，空格切换示例自己的开关。

use anyhow::{bail, Context};
use tracing::{error, info};

use d3d12_samples::core::config::{Config, GraphicsBackend};
use d3d12_samples::core::log;
use d3d12_samples::gfx::sim::{SimBackend, SimMonitor, SimOptions};
use d3d12_samples::renderer::{FrameOutcome, Renderer, RendererSettings};
use d3d12_samples::samples::create_sample;

/// 无窗口运行时默认渲染的帧数
const DEFAULT_HEADLESS_FRAMES: u64 = 120;

fn main() -> anyhow::Result<()> {
    // 1. 加载配置（在初始化日志之前）
    let mut config = Config::from_file_or_default("config.toml");

    // 2. 应用命令行参数并验证
    config.apply_args(std::env::args().skip(1)).context("Invalid command line")?;
    config.validate().context("Invalid configuration")?;

    // 3. 初始化日志系统
    let log_file = config.logging.file_output.then_some(config.logging.log_file.as_str());
    log::init_logger(config.logging.level, config.logging.file_output, log_file);
    info!(version = env!("CARGO_PKG_VERSION"), "D3D12 Samples starting");
    info!(
        backend = config.graphics.backend.name(),
        sample = config.sample.kind.name(),
        width = config.window.width,
        height = config.window.height,
        frame_count = config.graphics.frame_count,
        "Configuration loaded"
    );

    match config.graphics.backend {
        GraphicsBackend::Sim => run_headless(&config),
        GraphicsBackend::Dx12 => run_windowed(&config),
    }
}

fn settings(config: &Config, stats_interval: u64) -> RendererSettings {
    RendererSettings { sync_interval: config.graphics.sync_interval, stats_interval }
}

/// 在模拟 GPU 上渲染固定帧数
fn run_headless(config: &Config) -> anyhow::Result<()> {
    let monitor = SimMonitor::new();
    if let Some(present) = config.simulation.device_lost_at {
        monitor.inject_device_lost_at(present);
        info!(present, "Device loss will be injected");
    }

    let factory = SimBackend::factory(SimOptions::from_config(config), monitor.clone());
    let mut renderer = Renderer::new(Box::new(factory), create_sample(config.sample.kind), settings(config, 60))
        .context("Failed to initialize renderer")?;

    let frames = match config.sample.frames {
        0 => DEFAULT_HEADLESS_FRAMES,
        n => n,
    };
    for _ in 0..frames {
        if renderer.frame(1.0 / 60.0)? == FrameOutcome::Recovered {
            info!(generation = renderer.device().generation(), "Continuing on rebuilt device");
        }
    }
    renderer.shutdown()?;

    let hazards = monitor.hazards();
    let violations = monitor.violations();
    info!(
        frames = renderer.stats().frames,
        cpu_waits = renderer.stats().cpu_waits,
        blocking_waits = monitor.blocking_waits(),
        recoveries = renderer.stats().recoveries,
        hazards = hazards.len(),
        violations = violations.len(),
        "Headless run finished"
    );
    // 每条冲突和校验错误在发生时已经记录过
    if !hazards.is_empty() || !violations.is_empty() {
        bail!("{} hazards and {} violations detected", hazards.len(), violations.len());
    }
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn run_windowed(_config: &Config) -> anyhow::Result<()> {
    bail!("The DirectX 12 backend is only available on Windows, use --sim instead")
}

#[cfg(target_os = "windows")]
fn run_windowed(config: &Config) -> anyhow::Result<()> {
    use std::sync::Arc;
    use std::time::Instant;

    use d3d12_samples::gfx::dx12::{Dx12Backend, Dx12Options};
    use d3d12_samples::samples::SampleKey;
    use winit::dpi::LogicalSize;
    use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
    use winit::event_loop::{ControlFlow, EventLoop};
    use winit::keyboard::{KeyCode, PhysicalKey};
    use winit::window::WindowBuilder;

    fn sample_key(code: KeyCode) -> Option<SampleKey> {
        match code {
            KeyCode::ArrowLeft => Some(SampleKey::Left),
            KeyCode::ArrowRight => Some(SampleKey::Right),
            KeyCode::ArrowUp => Some(SampleKey::Up),
            KeyCode::ArrowDown => Some(SampleKey::Down),
            KeyCode::Space => Some(SampleKey::Toggle),
            _ => None,
        }
    }

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(format!("{} [{}]", config.window.title, config.sample.kind.name()))
            .with_inner_size(LogicalSize::new(config.window.width, config.window.height))
            .with_resizable(config.window.resizable)
            .build(&event_loop)
            .context("Failed to create window")?,
    );

    let factory = Dx12Backend::factory(window.clone(), Dx12Options::from_config(config));
    let mut renderer = Renderer::new(Box::new(factory), create_sample(config.sample.kind), settings(config, 300))
        .context("Failed to initialize renderer")?;
    info!(sample = renderer.sample_name(), "Entering main loop");

    let frame_limit = config.sample.frames;
    let mut last_frame = Instant::now();

    event_loop.set_control_flow(ControlFlow::Poll);
    event_loop.run(move |event, elwt| match event {
        Event::WindowEvent { event, .. } => match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                if let Err(e) = renderer.shutdown() {
                    error!("Shutdown failed: {}", e);
                }
                elwt.exit();
            }
            WindowEvent::Resized(size) => {
                if let Err(e) = renderer.resize(size.width, size.height) {
                    error!("Resize failed: {}", e);
                    elwt.exit();
                }
            }
            WindowEvent::KeyboardInput {
                event: KeyEvent { physical_key: PhysicalKey::Code(code), state: ElementState::Pressed, .. },
                ..
            } => {
                if let Some(key) = sample_key(code) {
                    renderer.on_key(key);
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let delta = now.duration_since(last_frame).as_secs_f32();
                last_frame = now;

                if let Err(e) = renderer.frame(delta) {
                    error!("Frame failed: {}", e);
                    elwt.exit();
                    return;
                }
                if frame_limit > 0 && renderer.stats().frames >= frame_limit {
                    info!(frames = frame_limit, "Frame limit reached");
                    if let Err(e) = renderer.shutdown() {
                        error!("Shutdown failed: {}", e);
                    }
                    elwt.exit();
                }
            }
            _ => (),
        },
        Event::AboutToWait => window.request_redraw(),
        _ => (),
    })?;
    Ok(())
}

//! 帧节奏协议的集成测试
//!
//! 全部运行在模拟 GPU 上：`GpuLag` 控制 GPU 落后多少帧，
//! `SimMonitor` 记录上传堆读写冲突、状态校验错误和存活对象数。

use d3d12_samples::core::config::SampleKind;
use d3d12_samples::gfx::backend::Backend;
use d3d12_samples::gfx::sim::{GpuLag, SimBackend, SimFence, SimMonitor, SimOptions};
use d3d12_samples::renderer::command::CommandList;
use d3d12_samples::renderer::resource::MappedBuffer;
use d3d12_samples::renderer::sync::{FramePacer, SlotState, WaitOutcome};
use d3d12_samples::renderer::{FrameOutcome, Renderer, RendererSettings};
use d3d12_samples::samples::create_sample;

const DT: f32 = 1.0 / 60.0;

fn renderer(kind: SampleKind, options: SimOptions, monitor: &SimMonitor) -> Renderer<SimBackend> {
    let factory = SimBackend::factory(options, monitor.clone());
    Renderer::new(Box::new(factory), create_sample(kind), RendererSettings::default()).unwrap()
}

fn with_lag(frame_count: usize, lag: GpuLag) -> SimOptions {
    SimOptions { frame_count, gpu_lag: lag, ..SimOptions::default() }
}

fn presented(outcome: FrameOutcome) -> u64 {
    match outcome {
        FrameOutcome::Presented(value) => value.value(),
        FrameOutcome::Recovered => panic!("unexpected device recovery"),
    }
}

#[test]
fn test_no_slot_reused_before_gpu_finished() {
    let lags = [GpuLag::Frames(0), GpuLag::Frames(1), GpuLag::Frames(2), GpuLag::Frames(3), GpuLag::Manual];

    for kind in SampleKind::ALL {
        for frame_count in [2, 3] {
            for lag in lags {
                let monitor = SimMonitor::new();
                {
                    let mut renderer = renderer(kind, with_lag(frame_count, lag), &monitor);
                    for _ in 0..12 {
                        presented(renderer.frame(DT).unwrap());
                    }
                    renderer.shutdown().unwrap();
                }

                let context = format!("{:?} with {} buffers and {:?}", kind, frame_count, lag);
                assert!(monitor.hazards().is_empty(), "{}: {:?}", context, monitor.hazards());
                assert!(monitor.violations().is_empty(), "{}: {:?}", context, monitor.violations());
                assert_eq!(monitor.presents(), 12, "{}", context);
                assert_eq!(monitor.total_live_objects(), 0, "{}", context);
            }
        }
    }
}

#[test]
fn test_overwrite_before_fence_is_reported() {
    let monitor = SimMonitor::new();
    let backend = SimBackend::new(with_lag(2, GpuLag::Manual), &monitor, 0).unwrap();
    let mut pacer = FramePacer::new(backend.create_fence(0).unwrap(), 2);
    let mut list = backend.create_command_list("Slot 0 Commands").unwrap();
    let mut constants = MappedBuffer::new(&backend, "Slot 0 Constants", 16).unwrap();

    let mut submit = |pacer: &mut FramePacer<SimFence>, constants: &MappedBuffer<SimBackend>| {
        list.reset().unwrap();
        list.set_root_constant_buffer(0, constants.resource());
        list.close().unwrap();
        backend.execute(&list).unwrap();
        pacer.signal_after_submit(0).unwrap()
    };

    // 先等槽位再写：GPU 读到的是提交时的内容
    let ready = pacer.wait_until_slot_free(0).unwrap();
    assert_eq!(ready.outcome(), WaitOutcome::Ready);
    constants.write(&[1.0f32; 4]).unwrap();
    submit(&mut pacer, &constants);
    let ready = pacer.wait_until_slot_free(0).unwrap();
    assert_eq!(ready.outcome(), WaitOutcome::Waited);
    assert!(monitor.hazards().is_empty(), "{:?}", monitor.hazards());

    // GPU 还没执行到这个值就改写上传堆
    constants.write(&[2.0f32; 4]).unwrap();
    let value = submit(&mut pacer, &constants);
    constants.write(&[3.0f32; 4]).unwrap();
    assert_eq!(pacer.slot_state(0), SlotState::InFlight(value));
    let ready = pacer.wait_until_slot_free(0).unwrap();
    assert_eq!(ready.outcome(), WaitOutcome::Waited);

    let hazards = monitor.hazards();
    assert_eq!(hazards.len(), 1, "{:?}", hazards);
    assert_eq!(hazards[0].fence_value, value.value());
    assert_eq!(hazards[0].resource, "Slot 0 Constants");
}

#[test]
fn test_fence_values_strictly_increase() {
    let monitor = SimMonitor::new();
    let mut renderer = renderer(SampleKind::PostprocessBlur, with_lag(3, GpuLag::Frames(2)), &monitor);

    let values: Vec<u64> = (0..20).map(|_| presented(renderer.frame(DT).unwrap())).collect();
    assert!(values.windows(2).all(|pair| pair[0] < pair[1]), "{:?}", values);
    // 第一次 signal 是初始值加一，中间没有额外的 signal
    assert_eq!(values, (1..=20).collect::<Vec<u64>>());
}

#[test]
fn test_drain_twice_returns() {
    let monitor = SimMonitor::new();
    let mut renderer = renderer(SampleKind::Tessellation, with_lag(2, GpuLag::Manual), &monitor);
    for _ in 0..3 {
        renderer.frame(DT).unwrap();
    }

    renderer.drain().unwrap();
    let after_first = renderer.device().pacer().unwrap().last_signaled();
    renderer.drain().unwrap();
    let pacer = renderer.device().pacer().unwrap();

    assert_eq!(pacer.last_signaled(), after_first.next());
    assert!(pacer.completed_value() >= pacer.last_signaled());
    for slot in 0..pacer.slot_count() {
        assert_eq!(pacer.slot_state(slot), SlotState::Idle);
    }
    assert_eq!(renderer.stats().drains, 2);
}

#[test]
fn test_steady_state_never_blocks() {
    let monitor = SimMonitor::new();
    let mut renderer = renderer(SampleKind::Tessellation, with_lag(2, GpuLag::Frames(1)), &monitor);

    for _ in 0..10 {
        presented(renderer.frame(DT).unwrap());
    }

    assert_eq!(renderer.stats().cpu_waits, 0);
    assert_eq!(renderer.device().pacer().unwrap().wait_count(), 0);
    assert_eq!(monitor.blocking_waits(), 0);
}

#[test]
fn test_lagging_gpu_blocks_at_third_frame() {
    let monitor = SimMonitor::new();
    let mut renderer = renderer(SampleKind::Tessellation, with_lag(2, GpuLag::Frames(3)), &monitor);

    let mut first_wait = None;
    for index in 0..8 {
        presented(renderer.frame(DT).unwrap());
        if first_wait.is_none() && renderer.stats().cpu_waits > 0 {
            first_wait = Some(index);
        }
    }

    assert_eq!(first_wait, Some(2));
    // 两个槽位、落后三帧：从第三帧起每帧都要等
    assert_eq!(renderer.stats().cpu_waits, 6);
    assert!(monitor.hazards().is_empty(), "{:?}", monitor.hazards());
}

#[test]
fn test_full_sync_waits_after_every_submit() {
    let monitor = SimMonitor::new();
    let mut renderer = renderer(SampleKind::HelloCompute, with_lag(2, GpuLag::Frames(3)), &monitor);

    for _ in 0..5 {
        presented(renderer.frame(DT).unwrap());
    }

    // 提交之后立刻等待，下一帧开始时槽位总是空闲的
    assert_eq!(renderer.stats().cpu_waits, 0);
    assert_eq!(monitor.blocking_waits(), 5);
    assert!(monitor.hazards().is_empty(), "{:?}", monitor.hazards());
}

#[test]
fn test_swap_chain_decides_slot_order() {
    let monitor = SimMonitor::new();
    let options = SimOptions {
        frame_count: 3,
        gpu_lag: GpuLag::Frames(2),
        back_buffer_order: Some(vec![0, 0, 2, 1, 1]),
        ..SimOptions::default()
    };
    let mut renderer = renderer(SampleKind::SoftwareRasterization, options, &monitor);

    for _ in 0..15 {
        presented(renderer.frame(DT).unwrap());
    }

    assert!(renderer.stats().cpu_waits > 0);
    assert!(monitor.hazards().is_empty(), "{:?}", monitor.hazards());
    assert!(monitor.violations().is_empty(), "{:?}", monitor.violations());
}

#[test]
fn test_device_loss_rebuilds_from_scratch() {
    let monitor = SimMonitor::new();
    monitor.inject_device_lost_at(5);
    let mut renderer = renderer(SampleKind::Tessellation, with_lag(2, GpuLag::Frames(1)), &monitor);

    for expected in 1..=4 {
        assert_eq!(presented(renderer.frame(DT).unwrap()), expected);
    }
    assert_eq!(renderer.frame(DT).unwrap(), FrameOutcome::Recovered);
    assert_eq!(renderer.stats().drains, 1);

    // 旧设备的对象全部释放，新设备从初始 fence 值开始
    assert_eq!(monitor.live_objects(0), 0);
    assert!(monitor.live_objects(1) > 0);
    assert_eq!(renderer.device().generation(), 1);
    let pacer = renderer.device().pacer().unwrap();
    assert_eq!(pacer.last_signaled(), pacer.initial_value());
    assert_eq!(pacer.submitted(), 0);
    let first = pacer.initial_value().next().value();
    assert_eq!(renderer.stats().recoveries, 1);

    assert_eq!(presented(renderer.frame(DT).unwrap()), first);
    for _ in 0..4 {
        presented(renderer.frame(DT).unwrap());
    }
    assert_eq!(renderer.stats().frames, 9);
    assert!(monitor.hazards().is_empty(), "{:?}", monitor.hazards());
}

//! 描述符布局的偏移测试

use std::collections::HashSet;

use d3d12_samples::gfx::sim::{SimBackend, SimMonitor, SimOptions};
use d3d12_samples::renderer::descriptor::{
    DescriptorHeap, DescriptorLayoutBuilder, DescriptorTable, HeapKind, SlotKey,
};

const KEYS: [SlotKey; 12] = [
    "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11",
];

#[test]
fn test_every_slot_frame_pair_has_a_unique_offset() {
    for frame_count in 1..=4 {
        for fixed_count in 0..=5 {
            for per_frame_count in 0..=5 {
                let mut builder = DescriptorLayoutBuilder::new(frame_count);
                let (fixed, per_frame) = KEYS[..fixed_count + per_frame_count].split_at(fixed_count);
                for key in fixed {
                    builder.fixed(HeapKind::CbvSrvUav, *key).unwrap();
                }
                for key in per_frame {
                    builder.per_frame(HeapKind::CbvSrvUav, *key).unwrap();
                }
                let layout = builder.build();

                let capacity = layout.capacity(HeapKind::CbvSrvUav);
                assert_eq!(capacity as usize, fixed_count + per_frame_count * frame_count);

                let mut seen = HashSet::new();
                for key in fixed {
                    let offset = layout.resolve(HeapKind::CbvSrvUav, *key, None).unwrap();
                    assert!(offset < capacity);
                    assert!(seen.insert(offset), "{} collides at {}", key, offset);
                }
                for key in per_frame {
                    for frame in 0..frame_count {
                        let offset = layout.resolve(HeapKind::CbvSrvUav, *key, Some(frame)).unwrap();
                        assert!(offset < capacity);
                        assert!(seen.insert(offset), "{}[{}] collides at {}", key, frame, offset);
                    }
                    assert!(layout.resolve(HeapKind::CbvSrvUav, *key, Some(frame_count)).is_err());
                }
                // 所有槽位恰好填满整个堆
                assert_eq!(seen.len(), capacity as usize);
            }
        }
    }
}

#[test]
fn test_heaps_are_independent() {
    let mut builder = DescriptorLayoutBuilder::new(2);
    builder.per_frame(HeapKind::Rtv, "back_buffer").unwrap();
    builder.fixed(HeapKind::Dsv, "depth").unwrap();
    builder.fixed(HeapKind::CbvSrvUav, "depth").unwrap();
    builder.per_frame(HeapKind::CbvSrvUav, "constants").unwrap();
    let layout = builder.build();

    assert_eq!(layout.capacity(HeapKind::Rtv), 2);
    assert_eq!(layout.capacity(HeapKind::Dsv), 1);
    assert_eq!(layout.capacity(HeapKind::CbvSrvUav), 3);
    assert_eq!(layout.capacity(HeapKind::Sampler), 0);
    assert_eq!(layout.resolve(HeapKind::Dsv, "depth", None).unwrap(), 0);
    assert_eq!(layout.resolve(HeapKind::CbvSrvUav, "depth", None).unwrap(), 0);
    assert_eq!(layout.resolve(HeapKind::CbvSrvUav, "constants", Some(1)).unwrap(), 2);
}

#[test]
fn test_table_handles_follow_offsets() {
    let monitor = SimMonitor::new();
    let backend = SimBackend::new(SimOptions::default(), &monitor, 0).unwrap();

    let mut builder = DescriptorLayoutBuilder::new(2);
    builder.fixed(HeapKind::CbvSrvUav, "texture").unwrap();
    builder.per_frame(HeapKind::CbvSrvUav, "constants").unwrap();
    builder.fixed(HeapKind::Sampler, "linear").unwrap();
    let table = DescriptorTable::create(&backend, builder.build()).unwrap();

    let heap = table.heap(HeapKind::CbvSrvUav).unwrap();
    let base = table.cpu(HeapKind::CbvSrvUav, "texture", None).unwrap();
    let frame1 = table.cpu(HeapKind::CbvSrvUav, "constants", Some(1)).unwrap();
    assert_eq!(frame1.ptr - base.ptr, 2 * heap.increment_size() as usize);

    let gpu = table.gpu(HeapKind::CbvSrvUav, "constants", Some(0)).unwrap();
    assert_eq!(gpu.index, 1);

    // 着色器可见的堆：CBV/SRV/UAV 和采样器，RTV/DSV 没有声明槽位也就没有堆
    assert_eq!(table.shader_visible_heaps().len(), 2);
    assert!(table.heap(HeapKind::Rtv).is_err());
}

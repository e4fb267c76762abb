//! End-to-end frame loop tests against the headless backend.

use std::collections::HashSet;
use std::time::Duration;

use framepace_core::RenderConfig;
use framepace_renderer::{
    FrameError, FrameExecutor, FrameMailbox, FrameMessage, FrameState, LoopControl,
};
use framepace_rhi::headless::{
    GpuProbe, Headless, HeadlessConfig, HeadlessDevice, HeadlessSurface, SurfaceProbe,
};
use framepace_rhi::{Extent, PresentFlags, PresentStatus};

const IDLE: Duration = Duration::from_secs(5);

struct Harness {
    executor: FrameExecutor<Headless>,
    gpu: GpuProbe,
    surface: SurfaceProbe,
    // Keeps the worker alive after the executor goes away
    _device: HeadlessDevice,
}

fn harness(gpu: HeadlessConfig, config: &RenderConfig) -> Harness {
    let device = HeadlessDevice::new(gpu).unwrap();
    let surface =
        HeadlessSurface::new(&device, config.width, config.height, config.buffer_count).unwrap();
    let surface_probe = surface.probe();
    let executor =
        FrameExecutor::<Headless>::new(&device, device.create_queue(), surface, config).unwrap();

    Harness {
        executor,
        gpu: device.probe(),
        surface: surface_probe,
        _device: device,
    }
}

#[test]
fn test_cpu_run_ahead_is_bounded() {
    let config = RenderConfig::default();
    let mut h = harness(HeadlessConfig::with_latency(Duration::from_millis(20)), &config);
    let max_lag = (config.buffer_count - 1) as u64;

    let mut first_blocking_frame = None;
    for frame in 1..=10 {
        h.executor.render_frame().unwrap();
        assert!(h.executor.gpu_lag().unwrap() <= max_lag);
        if first_blocking_frame.is_none() && h.executor.stats().fence.blocking_waits > 0 {
            first_blocking_frame = Some(frame);
        }
    }

    // A slow GPU forces the CPU to block on slot reuse within the first
    // buffer_count + 1 frames
    let first = first_blocking_frame.expect("the CPU never blocked");
    assert!(first <= 4, "first blocking wait at frame {}", first);

    h.executor.shutdown().unwrap();
    let stats = h.gpu.stats();
    assert_eq!(stats.allocator_races, 0);
    assert!(stats.validation_errors.is_empty(), "{:?}", stats.validation_errors);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.presents, 10);
}

#[test]
fn test_slots_rotate_with_buffer_index() {
    let config = RenderConfig::default();
    let mut h = harness(HeadlessConfig::default(), &config);

    let slots: Vec<usize> = (0..6)
        .map(|_| h.executor.render_frame().unwrap().slot)
        .collect();
    assert_eq!(slots, vec![0, 1, 2, 0, 1, 2]);

    let presented: Vec<usize> = h
        .surface
        .presents()
        .iter()
        .map(|record| record.buffer_index)
        .collect();
    assert_eq!(presented, slots);
}

#[test]
fn test_stalled_gpu_times_out() {
    let config = RenderConfig::default().with_wait_timeout(Duration::from_millis(50));
    let mut h = harness(
        HeadlessConfig {
            start_paused: true,
            ..HeadlessConfig::default()
        },
        &config,
    );

    // The first buffer_count - 1 frames never need a completed slot
    for _ in 0..config.buffer_count - 1 {
        h.executor.render_frame().unwrap();
    }

    let result = h.executor.render_frame();
    match result {
        Err(FrameError::SyncTimeout {
            value, completed, ..
        }) => {
            assert_eq!(value, 1);
            assert_eq!(completed, 0);
        }
        other => panic!("expected a sync timeout, got {:?}", other),
    }
    assert_ne!(h.executor.state(), FrameState::Idle);

    // The failed frame still reached the queue and the surface
    assert_eq!(h.executor.stats().frames, config.buffer_count as u64);
    assert_eq!(h.surface.presents().len(), config.buffer_count);
    assert_eq!(h.executor.fence().last_signaled(), config.buffer_count as u64);

    h.gpu.resume();
    assert!(h.gpu.wait_idle(IDLE));
}

#[test]
fn test_resize_recreates_buffers() {
    let config = RenderConfig::default();
    let mut h = harness(HeadlessConfig::default(), &config);

    h.executor.render_frame().unwrap();
    let before = h.surface.image_ids();

    assert!(!h.executor.resize(config.width, config.height).unwrap());
    assert_eq!(h.surface.resize_count(), 0);

    assert!(h.executor.resize(1024, 768).unwrap());
    assert_eq!(h.surface.resize_count(), 1);
    assert_eq!(h.surface.extent(), Extent::new(1024, 768));

    let after = h.surface.image_ids();
    assert_eq!(after.len(), before.len());
    assert!(after.iter().all(|id| !before.contains(id)));

    // Every view sits at its buffer's slot
    let swapchain = h.executor.swapchain();
    let mut view_ids = HashSet::new();
    for slot in 0..swapchain.buffer_count() {
        let view = swapchain.view(slot).unwrap();
        assert_eq!(view.slot(), slot);
        assert_eq!(view.image().id(), after[slot]);
        assert!(view_ids.insert(view.id()));
    }

    let report = h.executor.render_frame().unwrap();
    assert_eq!(report.slot, 0);
    assert_eq!(report.status, PresentStatus::Presented);
}

#[test]
fn test_zero_size_clamps_to_one_pixel() {
    let config = RenderConfig::default();
    let mut h = harness(HeadlessConfig::default(), &config);

    assert!(h.executor.resize(0, 0).unwrap());
    assert_eq!(h.surface.extent(), Extent::new(1, 1));

    // Still 1x1 after clamping, so nothing to do
    assert!(!h.executor.resize(0, 1).unwrap());
    h.executor.render_frame().unwrap();
}

#[test]
fn test_rebuild_after_suboptimal_present() {
    let config = RenderConfig::default();
    let mut h = harness(HeadlessConfig::default(), &config);

    h.executor.render_frame().unwrap();
    let before = h.surface.image_ids();

    h.surface.request_rebuild();
    let report = h.executor.render_frame().unwrap();
    assert_eq!(report.status, PresentStatus::Suboptimal);
    assert!(report.rebuilt);
    assert_eq!(h.executor.stats().rebuilds, 1);

    let after = h.surface.image_ids();
    assert!(after.iter().all(|id| !before.contains(id)));
    assert_eq!(h.surface.extent(), Extent::new(config.width, config.height));

    let next = h.executor.render_frame().unwrap();
    assert!(!next.rebuilt);
    assert_eq!(next.slot, 0);
}

#[test]
fn test_no_tearing_support_matches_vsync() {
    let config = RenderConfig::default();
    let mut h = harness(HeadlessConfig::default(), &config);

    h.executor.render_frame().unwrap();
    h.executor.set_vsync(false);
    h.executor.render_frame().unwrap();

    let presents = h.surface.presents();
    assert_eq!(presents.len(), 2);
    for record in presents {
        assert_eq!(record.sync_interval, 1);
        assert_eq!(record.flags, PresentFlags::empty());
    }
}

#[test]
fn test_tearing_present_when_supported() {
    let config = RenderConfig::default().with_vsync(false);
    let mut h = harness(
        HeadlessConfig {
            tearing_supported: true,
            ..HeadlessConfig::default()
        },
        &config,
    );

    h.executor.render_frame().unwrap();
    h.executor.set_vsync(true);
    h.executor.render_frame().unwrap();

    let presents = h.surface.presents();
    assert_eq!(presents[0].sync_interval, 0);
    assert_eq!(presents[0].flags, PresentFlags::ALLOW_TEARING);
    assert_eq!(presents[1].sync_interval, 1);
    assert_eq!(presents[1].flags, PresentFlags::empty());
}

#[test]
fn test_mailbox_drives_loop() {
    let config = RenderConfig::default();
    let mut h = harness(HeadlessConfig::with_latency(Duration::from_millis(2)), &config);
    let (sender, mut mailbox) = FrameMailbox::channel();

    let mut frames = 0;
    for i in 0..20 {
        if i == 5 {
            sender.post(FrameMessage::Resize {
                width: 320,
                height: 240,
            });
            sender.post(FrameMessage::Resize {
                width: 640,
                height: 480,
            });
        }
        if i == 12 {
            sender.post(FrameMessage::Shutdown);
        }
        if h.executor.pump(&mut mailbox).unwrap() == LoopControl::Exit {
            break;
        }
        h.executor.render_frame().unwrap();
        frames += 1;
    }

    assert_eq!(frames, 12);
    assert!(h.executor.is_shut_down());
    // Collapsed into a single resize
    assert_eq!(h.surface.resize_count(), 1);
    assert_eq!(h.surface.extent(), Extent::new(640, 480));
    assert_eq!(h.gpu.stats().pending, 0);
}

#[test]
fn test_drop_drains_gpu() {
    let config = RenderConfig::default();
    let device = HeadlessDevice::new(HeadlessConfig::with_latency(Duration::from_millis(10))).unwrap();
    let surface = HeadlessSurface::new(&device, 64, 64, config.buffer_count).unwrap();
    let mut executor =
        FrameExecutor::<Headless>::new(&device, device.create_queue(), surface, &config).unwrap();

    for _ in 0..4 {
        executor.render_frame().unwrap();
    }
    drop(executor);

    let stats = device.probe().stats();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.executed_lists, 4);
}

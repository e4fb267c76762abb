//! Swap-chain buffer and view management.
//!
//! [`SwapChainManager`] wraps a [`PresentSurface`] and keeps, for every buffer
//! index, the acquired image and the render-target view written at the same
//! index of the view table. Anything that invalidates the buffers (resize,
//! present-mode change) goes through the same sequence:
//!
//! 1. Flush the queue
//! 2. Release every image and view
//! 3. Resize the surface buffers
//! 4. Re-read the current index
//! 5. Re-acquire every buffer and rewrite the view table

use framepace_rhi::{Backend, Extent, PresentFlags, PresentStatus, PresentSurface};
use tracing::{debug, info};

use crate::error::FrameResult;
use crate::fence::FenceSynchronizer;

/// Sync interval and flags for a present request.
///
/// Without tearing support a tearing request degrades to exactly the vsync
/// parameters.
pub fn present_params(vsync: bool, allow_tearing: bool, tearing_supported: bool) -> (u32, PresentFlags) {
    if vsync || !tearing_supported {
        (1, PresentFlags::empty())
    } else if allow_tearing {
        (0, PresentFlags::ALLOW_TEARING)
    } else {
        (0, PresentFlags::empty())
    }
}

/// Owns the presentation surface and the per-slot images and views.
pub struct SwapChainManager<B: Backend> {
    // Views and images are released before the surface that owns them
    views: Vec<B::View>,
    images: Vec<B::Image>,
    surface: B::Surface,
    current_index: usize,
    extent: Extent,
    tearing_supported: bool,
}

impl<B: Backend> SwapChainManager<B> {
    /// Takes ownership of `surface` and builds the view table.
    pub fn new(surface: B::Surface, tearing_supported: bool) -> FrameResult<Self> {
        let mut manager = Self {
            views: Vec::new(),
            images: Vec::new(),
            current_index: surface.current_index(),
            extent: surface.extent(),
            surface,
            tearing_supported,
        };
        manager.rebuild_views()?;
        info!(
            "Swap chain ready: {} buffers at {}, tearing {}",
            manager.buffer_count(),
            manager.extent,
            if tearing_supported {
                "supported"
            } else {
                "unsupported"
            }
        );
        Ok(manager)
    }

    /// Index of the buffer to render into this frame.
    #[inline]
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Number of buffers in the chain.
    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.surface.buffer_count()
    }

    /// Current buffer dimensions.
    #[inline]
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Whether the device allows tearing presents.
    #[inline]
    pub fn tearing_supported(&self) -> bool {
        self.tearing_supported
    }

    /// The image held for slot `index`.
    pub fn image(&self, index: usize) -> Option<&B::Image> {
        self.images.get(index)
    }

    /// The view-table entry for slot `index`.
    pub fn view(&self, index: usize) -> Option<&B::View> {
        self.views.get(index)
    }

    /// The surface, for inspection.
    #[inline]
    pub fn surface(&self) -> &B::Surface {
        &self.surface
    }

    /// Presents the current buffer and advances the current index.
    pub fn present(&mut self, vsync: bool, allow_tearing: bool) -> FrameResult<PresentStatus> {
        let (sync_interval, flags) = present_params(vsync, allow_tearing, self.tearing_supported);
        let status = self.surface.present(sync_interval, flags)?;
        self.current_index = self.surface.current_index();
        Ok(status)
    }

    /// Resizes the buffers. Sizes are clamped to at least 1x1.
    ///
    /// Returns `false` without touching the GPU if the size is unchanged.
    pub fn resize(
        &mut self,
        width: u32,
        height: u32,
        fence: &mut FenceSynchronizer<B>,
        queue: &B::Queue,
    ) -> FrameResult<bool> {
        let extent = Extent::new(width.max(1), height.max(1));
        if extent == self.extent {
            debug!("Resize to {} ignored, size unchanged", extent);
            return Ok(false);
        }

        info!("Resizing swap chain {} -> {}", self.extent, extent);
        self.recreate(extent, fence, queue)?;
        Ok(true)
    }

    /// Recreates the buffers at the current size.
    pub fn rebuild(
        &mut self,
        fence: &mut FenceSynchronizer<B>,
        queue: &B::Queue,
    ) -> FrameResult<()> {
        info!("Rebuilding swap chain at {}", self.extent);
        self.recreate(self.extent, fence, queue)
    }

    fn recreate(
        &mut self,
        extent: Extent,
        fence: &mut FenceSynchronizer<B>,
        queue: &B::Queue,
    ) -> FrameResult<()> {
        fence.flush(queue)?;
        self.release();
        self.surface.resize_buffers(extent.width, extent.height)?;
        self.current_index = self.surface.current_index();
        self.extent = self.surface.extent();
        self.rebuild_views()
    }

    /// Rewrites every view-table entry after a flush.
    pub fn update_views(
        &mut self,
        fence: &mut FenceSynchronizer<B>,
        queue: &B::Queue,
    ) -> FrameResult<()> {
        fence.flush(queue)?;
        self.release();
        self.rebuild_views()
    }

    /// Re-acquires each buffer and writes its view at the same index.
    fn rebuild_views(&mut self) -> FrameResult<()> {
        let count = self.surface.buffer_count();
        let mut images = Vec::with_capacity(count);
        let mut views = Vec::with_capacity(count);
        for slot in 0..count {
            let image = self.surface.buffer(slot)?;
            views.push(self.surface.create_view(&image, slot)?);
            images.push(image);
        }
        self.images = images;
        self.views = views;
        debug!("View table rebuilt with {} entries", count);
        Ok(())
    }

    /// Drops every image and view reference.
    ///
    /// The caller must have flushed the queue.
    pub fn release(&mut self) {
        self.views.clear();
        self.images.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use framepace_rhi::headless::{Headless, HeadlessConfig, HeadlessDevice, HeadlessSurface};

    fn setup(
        tearing_supported: bool,
    ) -> (
        HeadlessDevice,
        SwapChainManager<Headless>,
        FenceSynchronizer<Headless>,
    ) {
        let device = HeadlessDevice::new(HeadlessConfig {
            tearing_supported,
            ..HeadlessConfig::default()
        })
        .unwrap();
        let surface = HeadlessSurface::new(&device, 800, 600, 3).unwrap();
        let manager = SwapChainManager::new(surface, tearing_supported).unwrap();
        let fence = FenceSynchronizer::new(&device).unwrap();
        (device, manager, fence)
    }

    #[test]
    fn test_present_params() {
        assert_eq!(present_params(true, true, true), (1, PresentFlags::empty()));
        assert_eq!(
            present_params(false, true, true),
            (0, PresentFlags::ALLOW_TEARING)
        );
        assert_eq!(present_params(false, false, true), (0, PresentFlags::empty()));
    }

    #[test]
    fn test_no_tearing_support_matches_vsync() {
        let vsync = present_params(true, true, false);
        assert_eq!(present_params(false, true, false), vsync);
        assert_eq!(present_params(false, false, false), vsync);
    }

    #[test]
    fn test_view_table_maps_slots() {
        let (_device, manager, _fence) = setup(true);

        assert_eq!(manager.buffer_count(), 3);
        for i in 0..3 {
            let image = manager.image(i).unwrap();
            let view = manager.view(i).unwrap();
            assert_eq!(image.index(), i);
            assert_eq!(view.slot(), i);
            assert_eq!(view.image().id(), image.id());
        }
        assert!(manager.view(3).is_none());
    }

    #[test]
    fn test_resize_same_size_is_noop() {
        let (device, mut manager, mut fence) = setup(true);
        let queue = device.create_queue();
        let probe = manager.surface().probe();
        let views_before = probe.views_created();

        assert!(!manager.resize(800, 600, &mut fence, &queue).unwrap());
        assert_eq!(fence.stats().flushes, 0);
        assert_eq!(probe.resize_count(), 0);
        assert_eq!(probe.views_created(), views_before);
    }

    #[test]
    fn test_resize_zero_clamps_to_one() {
        let (device, mut manager, mut fence) = setup(true);
        let queue = device.create_queue();

        assert!(manager.resize(0, 0, &mut fence, &queue).unwrap());
        assert_eq!(manager.extent(), Extent::new(1, 1));
        assert_eq!(manager.surface().probe().extent(), Extent::new(1, 1));
        assert_eq!(fence.stats().flushes, 1);
    }

    #[test]
    fn test_resize_rebuilds_distinct_views() {
        let (device, mut manager, mut fence) = setup(true);
        let queue = device.create_queue();
        let old_ids = manager.surface().probe().image_ids();

        manager.resize(1024, 768, &mut fence, &queue).unwrap();

        let new_ids = manager.surface().probe().image_ids();
        assert!(new_ids.iter().all(|id| !old_ids.contains(id)));
        for (i, id) in new_ids.iter().enumerate() {
            assert_eq!(manager.view(i).unwrap().image().id(), *id);
        }
        assert_eq!(manager.current_index(), manager.surface().current_index());
    }

    #[test]
    fn test_update_views_is_idempotent() {
        let (device, mut manager, mut fence) = setup(false);
        let queue = device.create_queue();
        let ids: Vec<u64> = (0..3).map(|i| manager.image(i).unwrap().id()).collect();

        manager.update_views(&mut fence, &queue).unwrap();
        manager.update_views(&mut fence, &queue).unwrap();

        for (i, id) in ids.iter().enumerate() {
            assert_eq!(manager.view(i).unwrap().image().id(), *id);
        }
        assert_eq!(fence.stats().flushes, 2);
    }
}

//! Headless backend.
//!
//! A simulated GPU for running the frame loop without a display or driver.
//! A worker thread executes queue work strictly in submission order, with an
//! optional per-list latency, and can be paused to hold work back.
//!
//! Beyond executing work, the simulation checks the things a real driver's
//! debug layer would flag:
//! - image state transitions must start from the state the image is in
//! - clears require the render-target state, presents the present state
//! - a command allocator must not be reset while its last list is pending
//! - buffers cannot be resized while any reference to them is alive
//!
//! [`GpuProbe`] and [`SurfaceProbe`] expose counters and logs for tests.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use framepace_rhi::headless::{HeadlessConfig, HeadlessDevice, HeadlessSurface};
//! use framepace_rhi::{CommandQueue, GpuDevice, TimelineFence, WaitStatus};
//!
//! # fn example() -> Result<(), framepace_rhi::RhiError> {
//! let device = HeadlessDevice::new(HeadlessConfig::default())?;
//! let queue = device.create_queue();
//! let _surface = HeadlessSurface::new(&device, 800, 600, 3)?;
//!
//! let fence = device.create_fence(0)?;
//! queue.signal(&fence, 1)?;
//! assert_eq!(fence.wait(1, Duration::from_secs(1))?, WaitStatus::Reached);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use crate::backend::{
    Backend, CommandAllocator, CommandQueue, Extent, GpuDevice, PresentFlags, PresentStatus,
    PresentSurface, TimelineFence, WaitStatus,
};
use crate::command::{Command, CommandList, ResourceState};
use crate::error::{RhiError, RhiResult};

/// Marker type for the headless backend.
#[derive(Debug)]
pub struct Headless;

impl Backend for Headless {
    type Device = HeadlessDevice;
    type Queue = HeadlessQueue;
    type Fence = HeadlessFence;
    type Allocator = HeadlessAllocator;
    type Surface = HeadlessSurface;
    type Image = HeadlessImage;
    type View = HeadlessView;
}

/// Behaviour of the simulated GPU.
#[derive(Clone, Debug, Default)]
pub struct HeadlessConfig {
    /// Time the GPU spends on each executed command list.
    pub execute_latency: Duration,
    /// Value reported by [`GpuDevice::tearing_supported`].
    pub tearing_supported: bool,
    /// Start with the worker paused; see [`GpuProbe::resume`].
    pub start_paused: bool,
}

impl HeadlessConfig {
    /// A GPU that spends `latency` on each command list.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            execute_latency: latency,
            ..Self::default()
        }
    }
}

/// Counters collected by the simulated GPU.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GpuStats {
    /// Command lists the GPU has finished.
    pub executed_lists: u64,
    /// Fence signals the GPU has processed.
    pub signals: u64,
    /// Presents the GPU has processed.
    pub presents: u64,
    /// Fence waits that reached the device.
    pub fence_waits: u64,
    /// Allocator resets attempted while their last list was still pending.
    pub allocator_races: u64,
    /// Queue items submitted but not yet finished.
    pub pending: usize,
    /// Invalid usage detected while executing work.
    pub validation_errors: Vec<String>,
}

enum Op {
    Transition {
        image: HeadlessImage,
        before: ResourceState,
        after: ResourceState,
    },
    Clear {
        image: HeadlessImage,
        color: [f32; 4],
    },
}

enum WorkKind {
    Execute(Vec<Op>),
    Signal { fence: usize, value: u64 },
    Present { image: HeadlessImage },
}

struct Work {
    seq: u64,
    kind: WorkKind,
}

enum Outcome {
    Executed(Vec<String>),
    Signaled { fence: usize, value: u64 },
    Presented(Vec<String>),
}

struct GpuState {
    queue: VecDeque<Work>,
    busy: bool,
    paused: bool,
    shutdown: bool,
    /// Sequence number of the last submitted queue item.
    submitted: u64,
    /// Sequence number of the last finished queue item.
    completed: u64,
    /// Completed value of each fence, indexed by fence id.
    fences: Vec<u64>,
    stats: GpuStats,
}

struct Shared {
    state: Mutex<GpuState>,
    work_ready: Condvar,
    progress: Condvar,
    next_id: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, GpuState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn submit(&self, kind: WorkKind) -> RhiResult<u64> {
        let mut state = self.lock();
        if state.shutdown {
            return Err(RhiError::DeviceLost("headless GPU has shut down".to_string()));
        }
        state.submitted += 1;
        let seq = state.submitted;
        state.queue.push_back(Work { seq, kind });
        drop(state);

        self.work_ready.notify_one();
        Ok(seq)
    }
}

/// Owns the worker thread. Dropped when the last device object goes away.
struct DeviceInner {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            if !state.queue.is_empty() {
                warn!(
                    "Headless GPU shutting down with {} queued item(s)",
                    state.queue.len()
                );
            }
        }
        self.shared.work_ready.notify_all();
        self.shared.progress.notify_all();

        let handle = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!("Headless GPU worker panicked");
        }
        debug!("Headless GPU stopped");
    }
}

fn run_worker(shared: Arc<Shared>, latency: Duration) {
    loop {
        let work = {
            let mut state = shared.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if !state.paused
                    && let Some(work) = state.queue.pop_front()
                {
                    state.busy = true;
                    break work;
                }
                state = shared
                    .work_ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        let seq = work.seq;
        // `perform` consumes the work item, so image references it held are
        // released before the item counts as completed.
        let outcome = perform(work.kind, latency);

        {
            let mut state = shared.lock();
            match outcome {
                Outcome::Executed(errors) => {
                    state.stats.executed_lists += 1;
                    state.stats.validation_errors.extend(errors);
                }
                Outcome::Signaled { fence, value } => {
                    state.stats.signals += 1;
                    match state.fences.get_mut(fence) {
                        Some(completed) if value >= *completed => *completed = value,
                        Some(completed) => {
                            let message = format!(
                                "fence {} signaled to {} below its completed value {}",
                                fence, value, completed
                            );
                            state.stats.validation_errors.push(message);
                        }
                        None => {
                            let message = format!("signal of unknown fence {}", fence);
                            state.stats.validation_errors.push(message);
                        }
                    }
                    trace!("GPU signaled fence {} = {}", fence, value);
                }
                Outcome::Presented(errors) => {
                    state.stats.presents += 1;
                    state.stats.validation_errors.extend(errors);
                }
            }
            state.completed = seq;
            state.busy = false;
        }
        shared.progress.notify_all();
    }
}

fn perform(kind: WorkKind, latency: Duration) -> Outcome {
    match kind {
        WorkKind::Execute(ops) => {
            if !latency.is_zero() {
                thread::sleep(latency);
            }
            let mut errors = Vec::new();
            for op in &ops {
                match op {
                    Op::Transition {
                        image,
                        before,
                        after,
                    } => {
                        let mut state = image.lock_state();
                        if *state != *before {
                            errors.push(format!(
                                "image {} transitioned from {:?} but is in {:?}",
                                image.id(),
                                before,
                                *state
                            ));
                        }
                        *state = *after;
                    }
                    Op::Clear { image, color } => {
                        let state = *image.lock_state();
                        if state != ResourceState::RenderTarget {
                            errors.push(format!(
                                "image {} cleared in state {:?}",
                                image.id(),
                                state
                            ));
                        }
                        *image
                            .0
                            .last_clear
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner) = Some(*color);
                    }
                }
            }
            for message in &errors {
                warn!("GPU validation: {}", message);
            }
            Outcome::Executed(errors)
        }
        WorkKind::Signal { fence, value } => Outcome::Signaled { fence, value },
        WorkKind::Present { image } => {
            let state = *image.lock_state();
            let mut errors = Vec::new();
            if state != ResourceState::Present {
                let message = format!("image {} presented in state {:?}", image.id(), state);
                warn!("GPU validation: {}", message);
                errors.push(message);
            }
            Outcome::Presented(errors)
        }
    }
}

/// A simulated GPU device.
pub struct HeadlessDevice {
    inner: Arc<DeviceInner>,
    tearing_supported: bool,
}

impl HeadlessDevice {
    /// Starts the simulated GPU.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::DeviceLost`] if the worker thread cannot be spawned.
    pub fn new(config: HeadlessConfig) -> RhiResult<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(GpuState {
                queue: VecDeque::new(),
                busy: false,
                paused: config.start_paused,
                shutdown: false,
                submitted: 0,
                completed: 0,
                fences: Vec::new(),
                stats: GpuStats::default(),
            }),
            work_ready: Condvar::new(),
            progress: Condvar::new(),
            next_id: AtomicU64::new(1),
        });

        let worker_shared = Arc::clone(&shared);
        let latency = config.execute_latency;
        let worker = thread::Builder::new()
            .name("headless-gpu".to_string())
            .spawn(move || run_worker(worker_shared, latency))
            .map_err(|e| RhiError::DeviceLost(format!("Failed to spawn GPU worker: {}", e)))?;

        info!(
            "Headless GPU started (latency {:?}, tearing {}, paused {})",
            config.execute_latency, config.tearing_supported, config.start_paused
        );

        Ok(Self {
            inner: Arc::new(DeviceInner {
                shared,
                worker: Mutex::new(Some(worker)),
            }),
            tearing_supported: config.tearing_supported,
        })
    }

    /// Creates the command queue.
    pub fn create_queue(&self) -> HeadlessQueue {
        HeadlessQueue {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Returns a probe for inspecting and steering the GPU.
    pub fn probe(&self) -> GpuProbe {
        GpuProbe {
            shared: Arc::clone(&self.inner.shared),
        }
    }
}

impl GpuDevice<Headless> for HeadlessDevice {
    fn create_fence(&self, initial_value: u64) -> RhiResult<HeadlessFence> {
        let mut state = self.inner.shared.lock();
        let id = state.fences.len();
        state.fences.push(initial_value);
        debug!("Created headless fence {} at {}", id, initial_value);
        Ok(HeadlessFence {
            inner: Arc::clone(&self.inner),
            id,
        })
    }

    fn create_command_allocator(&self) -> RhiResult<HeadlessAllocator> {
        let id = self.inner.shared.next_id();
        debug!("Created headless command allocator {}", id);
        Ok(HeadlessAllocator {
            inner: Arc::clone(&self.inner),
            id,
            last_submission: 0,
        })
    }

    fn tearing_supported(&self) -> bool {
        self.tearing_supported
    }
}

/// Inspects and steers the simulated GPU.
#[derive(Clone)]
pub struct GpuProbe {
    shared: Arc<Shared>,
}

impl GpuProbe {
    /// Stops the GPU from starting new work. Work already running finishes.
    pub fn pause(&self) {
        self.shared.lock().paused = true;
        debug!("Headless GPU paused");
    }

    /// Lets the GPU continue with queued work.
    pub fn resume(&self) {
        self.shared.lock().paused = false;
        self.shared.work_ready.notify_all();
        debug!("Headless GPU resumed");
    }

    /// Snapshot of the GPU counters.
    pub fn stats(&self) -> GpuStats {
        let state = self.shared.lock();
        let mut stats = state.stats.clone();
        stats.pending = state.queue.len() + usize::from(state.busy);
        stats
    }

    /// Blocks until every submitted item has finished.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        // `None` waits without a deadline
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.shared.lock();
        while state.completed < state.submitted {
            state = match deadline {
                None => self
                    .shared
                    .progress
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.shared
                        .progress
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        true
    }
}

impl fmt::Debug for GpuProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuProbe")
            .field("stats", &self.stats())
            .finish()
    }
}

/// The simulated command queue.
pub struct HeadlessQueue {
    inner: Arc<DeviceInner>,
}

impl CommandQueue<Headless> for HeadlessQueue {
    fn execute(&self, list: CommandList<'_, Headless>) -> RhiResult<()> {
        let (allocator, commands) = list.into_parts();
        let ops = commands
            .iter()
            .map(|command| match command {
                Command::Transition {
                    image,
                    before,
                    after,
                } => Op::Transition {
                    image: (*image).clone(),
                    before: *before,
                    after: *after,
                },
                Command::ClearRenderTarget { view, color } => Op::Clear {
                    image: view.image.clone(),
                    color: *color,
                },
            })
            .collect();

        let seq = self.inner.shared.submit(WorkKind::Execute(ops))?;
        allocator.last_submission = seq;
        trace!("Queued command list {} from allocator {}", seq, allocator.id);
        Ok(())
    }

    fn signal(&self, fence: &HeadlessFence, value: u64) -> RhiResult<()> {
        self.inner.shared.submit(WorkKind::Signal {
            fence: fence.id,
            value,
        })?;
        Ok(())
    }
}

/// A simulated timeline fence.
pub struct HeadlessFence {
    inner: Arc<DeviceInner>,
    id: usize,
}

impl TimelineFence for HeadlessFence {
    fn completed_value(&self) -> RhiResult<u64> {
        let state = self.inner.shared.lock();
        state
            .fences
            .get(self.id)
            .copied()
            .ok_or_else(|| RhiError::InvalidHandle(format!("fence {}", self.id)))
    }

    fn wait(&self, value: u64, timeout: Duration) -> RhiResult<WaitStatus> {
        let shared = &self.inner.shared;
        let deadline = Instant::now().checked_add(timeout);

        let mut state = shared.lock();
        state.stats.fence_waits += 1;
        loop {
            let completed = state
                .fences
                .get(self.id)
                .copied()
                .ok_or_else(|| RhiError::InvalidHandle(format!("fence {}", self.id)))?;
            if completed >= value {
                return Ok(WaitStatus::Reached);
            }
            if state.shutdown {
                return Err(RhiError::DeviceLost(
                    "headless GPU shut down during a fence wait".to_string(),
                ));
            }

            state = match deadline {
                None => shared
                    .progress
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(WaitStatus::TimedOut);
                    }
                    shared
                        .progress
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

/// A simulated command allocator.
pub struct HeadlessAllocator {
    inner: Arc<DeviceInner>,
    id: u64,
    /// Queue sequence number of the last list recorded from this allocator.
    last_submission: u64,
}

impl HeadlessAllocator {
    /// Unique id of this allocator.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl CommandAllocator for HeadlessAllocator {
    fn reset(&mut self) -> RhiResult<()> {
        let mut state = self.inner.shared.lock();
        if self.last_submission > state.completed {
            state.stats.allocator_races += 1;
            error!(
                "Allocator {} reset while submission {} is pending (completed {})",
                self.id, self.last_submission, state.completed
            );
            return Err(RhiError::AllocatorInUse {
                id: self.id,
                submission: self.last_submission,
                completed: state.completed,
            });
        }
        Ok(())
    }
}

struct ImageInner {
    id: u64,
    index: usize,
    extent: Extent,
    state: Mutex<ResourceState>,
    last_clear: Mutex<Option<[f32; 4]>>,
}

/// A simulated back buffer. Clones share the same image.
#[derive(Clone)]
pub struct HeadlessImage(Arc<ImageInner>);

impl HeadlessImage {
    fn new(id: u64, index: usize, extent: Extent) -> Self {
        Self(Arc::new(ImageInner {
            id,
            index,
            extent,
            state: Mutex::new(ResourceState::Present),
            last_clear: Mutex::new(None),
        }))
    }

    fn lock_state(&self) -> MutexGuard<'_, ResourceState> {
        self.0.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unique id of this image. New images get new ids on every resize.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Position of this image in the chain.
    pub fn index(&self) -> usize {
        self.0.index
    }

    /// Image dimensions.
    pub fn extent(&self) -> Extent {
        self.0.extent
    }

    /// State after the last GPU work that touched the image.
    pub fn state(&self) -> ResourceState {
        *self.lock_state()
    }

    /// Colour of the last clear the GPU executed on this image.
    pub fn last_clear_color(&self) -> Option<[f32; 4]> {
        *self.0.last_clear.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for HeadlessImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessImage")
            .field("id", &self.0.id)
            .field("index", &self.0.index)
            .field("extent", &self.0.extent)
            .finish()
    }
}

/// A simulated render-target view.
#[derive(Debug)]
pub struct HeadlessView {
    id: u64,
    slot: usize,
    image: HeadlessImage,
}

impl HeadlessView {
    /// Unique id of this view.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// View-table entry this view was written to.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The image this view refers to.
    pub fn image(&self) -> &HeadlessImage {
        &self.image
    }
}

/// One present call as seen by the surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentRecord {
    /// Buffer index that was presented.
    pub buffer_index: usize,
    /// Id of the presented image.
    pub image_id: u64,
    pub sync_interval: u32,
    pub flags: PresentFlags,
}

#[derive(Debug, Default)]
struct SurfaceLog {
    presents: Vec<PresentRecord>,
    resizes: u32,
    extent: Extent,
    image_ids: Vec<u64>,
    views_created: u64,
    force_suboptimal: bool,
}

/// A simulated presentation surface.
pub struct HeadlessSurface {
    inner: Arc<DeviceInner>,
    buffers: Vec<HeadlessImage>,
    current: usize,
    extent: Extent,
    log: Arc<Mutex<SurfaceLog>>,
}

impl HeadlessSurface {
    /// Creates a surface with `buffer_count` buffers of the given size.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SwapchainError`] if any argument is zero.
    pub fn new(
        device: &HeadlessDevice,
        width: u32,
        height: u32,
        buffer_count: usize,
    ) -> RhiResult<Self> {
        if buffer_count == 0 {
            return Err(RhiError::SwapchainError(
                "a swap chain needs at least one buffer".to_string(),
            ));
        }

        let mut surface = Self {
            inner: Arc::clone(&device.inner),
            buffers: Vec::with_capacity(buffer_count),
            current: 0,
            extent: Extent::default(),
            log: Arc::new(Mutex::new(SurfaceLog::default())),
        };
        surface.allocate_buffers(width, height, buffer_count)?;

        info!(
            "Headless surface created: {}, {} buffers",
            surface.extent, buffer_count
        );
        Ok(surface)
    }

    /// Returns a probe for inspecting the surface.
    pub fn probe(&self) -> SurfaceProbe {
        SurfaceProbe {
            log: Arc::clone(&self.log),
        }
    }

    fn lock_log(&self) -> MutexGuard<'_, SurfaceLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate_buffers(&mut self, width: u32, height: u32, count: usize) -> RhiResult<()> {
        if width == 0 || height == 0 {
            return Err(RhiError::SwapchainError(format!(
                "invalid buffer size {}x{}",
                width, height
            )));
        }

        let extent = Extent::new(width, height);
        let shared = &self.inner.shared;
        self.buffers = (0..count)
            .map(|index| HeadlessImage::new(shared.next_id(), index, extent))
            .collect();
        self.current = 0;
        self.extent = extent;

        let image_ids = self.buffers.iter().map(HeadlessImage::id).collect();
        let mut log = self.lock_log();
        log.extent = extent;
        log.image_ids = image_ids;
        Ok(())
    }
}

impl PresentSurface<Headless> for HeadlessSurface {
    fn current_index(&self) -> usize {
        self.current
    }

    fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    fn extent(&self) -> Extent {
        self.extent
    }

    fn present(&mut self, sync_interval: u32, flags: PresentFlags) -> RhiResult<PresentStatus> {
        let image = self.buffers[self.current].clone();
        let record = PresentRecord {
            buffer_index: self.current,
            image_id: image.id(),
            sync_interval,
            flags,
        };

        self.inner
            .shared
            .submit(WorkKind::Present { image })?;
        self.current = (self.current + 1) % self.buffers.len();

        let mut log = self.lock_log();
        log.presents.push(record);
        if std::mem::take(&mut log.force_suboptimal) {
            debug!("Headless surface reports suboptimal buffers");
            return Ok(PresentStatus::Suboptimal);
        }
        Ok(PresentStatus::Presented)
    }

    fn resize_buffers(&mut self, width: u32, height: u32) -> RhiResult<()> {
        for buffer in &self.buffers {
            let outstanding = Arc::strong_count(&buffer.0) - 1;
            if outstanding > 0 {
                return Err(RhiError::SwapchainError(format!(
                    "buffer {} still has {} outstanding reference(s)",
                    buffer.index(),
                    outstanding
                )));
            }
        }

        let count = self.buffers.len();
        self.allocate_buffers(width, height, count)?;
        self.lock_log().resizes += 1;

        debug!("Headless surface resized to {}", self.extent);
        Ok(())
    }

    fn buffer(&self, index: usize) -> RhiResult<HeadlessImage> {
        self.buffers
            .get(index)
            .cloned()
            .ok_or_else(|| RhiError::InvalidHandle(format!("swap chain buffer {}", index)))
    }

    fn create_view(&self, image: &HeadlessImage, slot: usize) -> RhiResult<HeadlessView> {
        self.lock_log().views_created += 1;
        Ok(HeadlessView {
            id: self.inner.shared.next_id(),
            slot,
            image: image.clone(),
        })
    }
}

/// Inspects a [`HeadlessSurface`].
#[derive(Clone, Debug)]
pub struct SurfaceProbe {
    log: Arc<Mutex<SurfaceLog>>,
}

impl SurfaceProbe {
    fn lock(&self) -> MutexGuard<'_, SurfaceLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every present so far, oldest first.
    pub fn presents(&self) -> Vec<PresentRecord> {
        self.lock().presents.clone()
    }

    /// Number of completed `resize_buffers` calls.
    pub fn resize_count(&self) -> u32 {
        self.lock().resizes
    }

    /// Current buffer dimensions.
    pub fn extent(&self) -> Extent {
        self.lock().extent
    }

    /// Ids of the current buffers, in chain order.
    pub fn image_ids(&self) -> Vec<u64> {
        self.lock().image_ids.clone()
    }

    /// Number of views created over the surface's lifetime.
    pub fn views_created(&self) -> u64 {
        self.lock().views_created
    }

    /// Makes the next present report [`PresentStatus::Suboptimal`].
    pub fn request_rebuild(&self) {
        self.lock().force_suboptimal = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandRecording;

    const WAIT: Duration = Duration::from_secs(5);

    fn setup(config: HeadlessConfig) -> (HeadlessDevice, HeadlessQueue, HeadlessSurface) {
        let device = HeadlessDevice::new(config).unwrap();
        let queue = device.create_queue();
        let surface = HeadlessSurface::new(&device, 64, 32, 3).unwrap();
        (device, queue, surface)
    }

    #[test]
    fn test_signal_then_wait() {
        let (device, queue, _surface) = setup(HeadlessConfig::default());
        let fence = device.create_fence(0).unwrap();

        queue.signal(&fence, 1).unwrap();
        queue.signal(&fence, 2).unwrap();

        assert_eq!(fence.wait(2, WAIT).unwrap(), WaitStatus::Reached);
        assert_eq!(fence.completed_value().unwrap(), 2);
        assert_eq!(device.probe().stats().signals, 2);
    }

    #[test]
    fn test_wait_times_out_while_paused() {
        let config = HeadlessConfig {
            start_paused: true,
            ..HeadlessConfig::default()
        };
        let (device, queue, _surface) = setup(config);
        let fence = device.create_fence(0).unwrap();
        queue.signal(&fence, 1).unwrap();

        let status = fence.wait(1, Duration::from_millis(20)).unwrap();
        assert_eq!(status, WaitStatus::TimedOut);
        assert_eq!(fence.completed_value().unwrap(), 0);
        assert_eq!(device.probe().stats().pending, 1);

        device.probe().resume();
        assert_eq!(fence.wait(1, WAIT).unwrap(), WaitStatus::Reached);
    }

    #[test]
    fn test_fence_initial_value() {
        let (device, _queue, _surface) = setup(HeadlessConfig::default());
        let fence = device.create_fence(7).unwrap();
        assert_eq!(fence.completed_value().unwrap(), 7);
        assert_eq!(fence.wait(5, Duration::ZERO).unwrap(), WaitStatus::Reached);
    }

    #[test]
    fn test_wait_idle_without_deadline() {
        let (device, queue, _surface) = setup(HeadlessConfig::with_latency(Duration::from_millis(5)));
        let fence = device.create_fence(0).unwrap();
        queue.signal(&fence, 1).unwrap();

        assert!(device.probe().wait_idle(Duration::MAX));
        assert_eq!(device.probe().stats().pending, 0);
        assert_eq!(fence.completed_value().unwrap(), 1);
    }

    #[test]
    fn test_allocator_reset_race_is_detected() {
        let config = HeadlessConfig {
            start_paused: true,
            ..HeadlessConfig::default()
        };
        let (device, queue, surface) = setup(config);
        let mut allocator = device.create_command_allocator().unwrap();
        let image = surface.buffer(0).unwrap();

        let mut recording = CommandRecording::<Headless>::begin(&mut allocator);
        recording.transition(&image, ResourceState::Present, ResourceState::RenderTarget);
        recording.transition(&image, ResourceState::RenderTarget, ResourceState::Present);
        queue.execute(recording.finish()).unwrap();

        let err = allocator.reset().unwrap_err();
        assert!(matches!(err, RhiError::AllocatorInUse { .. }));
        assert_eq!(device.probe().stats().allocator_races, 1);

        let probe = device.probe();
        probe.resume();
        assert!(probe.wait_idle(WAIT));
        allocator.reset().unwrap();
        assert_eq!(probe.stats().allocator_races, 1);
        assert!(probe.stats().validation_errors.is_empty());
    }

    #[test]
    fn test_clear_outside_render_target_is_flagged() {
        let (device, queue, surface) = setup(HeadlessConfig::default());
        let mut allocator = device.create_command_allocator().unwrap();
        let image = surface.buffer(1).unwrap();
        let view = surface.create_view(&image, 1).unwrap();

        let mut recording = CommandRecording::<Headless>::begin(&mut allocator);
        recording.clear_render_target(&view, [1.0, 0.0, 0.0, 1.0]);
        queue.execute(recording.finish()).unwrap();

        let probe = device.probe();
        assert!(probe.wait_idle(WAIT));
        let errors = probe.stats().validation_errors;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("cleared in state Present"));
    }

    #[test]
    fn test_transition_and_clear_update_image() {
        let (device, queue, surface) = setup(HeadlessConfig::default());
        let mut allocator = device.create_command_allocator().unwrap();
        let image = surface.buffer(0).unwrap();
        let view = surface.create_view(&image, 0).unwrap();
        let color = [0.0, 0.2, 0.4, 1.0];

        let mut recording = CommandRecording::<Headless>::begin(&mut allocator);
        recording
            .transition(&image, ResourceState::Present, ResourceState::RenderTarget)
            .clear_render_target(&view, color)
            .transition(&image, ResourceState::RenderTarget, ResourceState::Present);
        let list = recording.finish();
        assert_eq!(list.commands().len(), 3);
        queue.execute(list).unwrap();

        assert!(device.probe().wait_idle(WAIT));
        assert_eq!(image.state(), ResourceState::Present);
        assert_eq!(image.last_clear_color(), Some(color));
        assert_eq!(device.probe().stats().executed_lists, 1);
    }

    #[test]
    fn test_present_rotates_and_logs() {
        let (_device, _queue, mut surface) = setup(HeadlessConfig::default());
        let probe = surface.probe();

        assert_eq!(surface.current_index(), 0);
        surface.present(1, PresentFlags::empty()).unwrap();
        surface.present(0, PresentFlags::ALLOW_TEARING).unwrap();
        surface.present(1, PresentFlags::empty()).unwrap();
        assert_eq!(surface.current_index(), 0);

        let presents = probe.presents();
        let indices: Vec<_> = presents.iter().map(|p| p.buffer_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(presents[1].sync_interval, 0);
        assert_eq!(presents[1].flags, PresentFlags::ALLOW_TEARING);
    }

    #[test]
    fn test_request_rebuild_is_one_shot() {
        let (_device, _queue, mut surface) = setup(HeadlessConfig::default());
        surface.probe().request_rebuild();

        let first = surface.present(1, PresentFlags::empty()).unwrap();
        let second = surface.present(1, PresentFlags::empty()).unwrap();
        assert_eq!(first, PresentStatus::Suboptimal);
        assert_eq!(second, PresentStatus::Presented);
    }

    #[test]
    fn test_resize_refused_with_outstanding_reference() {
        let (_device, _queue, mut surface) = setup(HeadlessConfig::default());
        let held = surface.buffer(2).unwrap();

        let err = surface.resize_buffers(128, 128).unwrap_err();
        assert!(matches!(err, RhiError::SwapchainError(_)));
        assert_eq!(surface.probe().resize_count(), 0);

        drop(held);
        surface.resize_buffers(128, 128).unwrap();
        assert_eq!(surface.extent(), Extent::new(128, 128));
        assert_eq!(surface.probe().resize_count(), 1);
    }

    #[test]
    fn test_resize_replaces_images_and_resets_index() {
        let (device, _queue, mut surface) = setup(HeadlessConfig::default());
        let before = surface.probe().image_ids();
        surface.present(1, PresentFlags::empty()).unwrap();
        assert_eq!(surface.current_index(), 1);
        // The queued present holds the image until the GPU processes it.
        assert!(device.probe().wait_idle(WAIT));

        surface.resize_buffers(10, 10).unwrap();
        let after = surface.probe().image_ids();
        assert_eq!(surface.current_index(), 0);
        assert_eq!(after.len(), 3);
        assert!(after.iter().all(|id| !before.contains(id)));
    }

    #[test]
    fn test_zero_sized_surface_is_rejected() {
        let device = HeadlessDevice::new(HeadlessConfig::default()).unwrap();
        assert!(HeadlessSurface::new(&device, 0, 10, 3).is_err());
        assert!(HeadlessSurface::new(&device, 10, 10, 0).is_err());
    }

    #[test]
    fn test_command_list_debug_lists_commands() {
        let (device, _queue, surface) = setup(HeadlessConfig::default());
        let mut allocator = device.create_command_allocator().unwrap();
        let image = surface.buffer(0).unwrap();

        let mut recording = CommandRecording::<Headless>::begin(&mut allocator);
        recording.transition(&image, ResourceState::Present, ResourceState::RenderTarget);
        let text = format!("{:?}", recording.finish());
        assert!(text.contains("Transition"));
        assert!(text.contains("RenderTarget"));
    }

    #[test]
    fn test_device_objects_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<HeadlessDevice>();
        assert_send::<HeadlessQueue>();
        assert_send::<HeadlessFence>();
        assert_send::<HeadlessAllocator>();
        assert_send::<HeadlessSurface>();
    }
}

// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fixed surface pool and free-surface finder.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use log::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::surface::{OutputSurfaceQueue, SurfaceHandle, WorkSurface};

/// Retry budget for [`SurfacePool::find_free_surface`]: roughly 1000
/// iterations with 1 ms sleeps between them.
const FIND_FREE_SURFACE_RETRIES: usize = 1000;
const FIND_FREE_SURFACE_SLEEP: Duration = Duration::from_millis(1);

/// Snapshot of pool occupancy, for observability only — it does not affect
/// allocation behavior. Grounded in the free/locked/pool-stats convention
/// seen across the example pack's frame pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub total: usize,
    pub free: usize,
    pub locked: usize,
    pub in_reorder_queue: usize,
}

/// Fixed pre-allocated pool of [`WorkSurface`]s.
///
/// Allocated once at `init` time with a fixed count
/// (codec-suggested + output-queue length + aux slack) and never resized
/// until teardown.
pub struct SurfacePool {
    surfaces: Vec<WorkSurface>,
    /// Allocator-internal lock count per surface, distinct from each
    /// surface's own external lock count.
    allocator_locks: Vec<AtomicUsize>,
}

impl SurfacePool {
    /// Builds a pool of `count` surfaces, each `width`x`height` with the
    /// given `pitch`.
    pub fn new(count: usize, width: u32, height: u32, pitch: u32) -> Self {
        let surfaces = (0..count).map(|_| WorkSurface::new(width, height, pitch)).collect();
        let allocator_locks = (0..count).map(|_| AtomicUsize::new(0)).collect();
        Self { surfaces, allocator_locks }
    }

    /// The aux-slack surface count added on top of the codec's suggested
    /// requirement and the output-queue length.
    pub const AUX_SLACK: usize = 2;

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub fn get(&self, handle: SurfaceHandle) -> &WorkSurface {
        &self.surfaces[handle.0]
    }

    pub fn lock_for_decode(&self, handle: SurfaceHandle) {
        self.allocator_locks[handle.0].fetch_add(1, Ordering::AcqRel);
    }

    pub fn unlock_from_decode(&self, handle: SurfaceHandle) {
        let _ = self.allocator_locks[handle.0].fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |v| Some(v.saturating_sub(1)),
        );
    }

    fn allocator_lock_count(&self, index: usize) -> usize {
        self.allocator_locks[index].load(Ordering::Acquire)
    }

    /// Returns a surface that is free: zero allocator lock count, zero
    /// external lock count, and absent from `reorder_queue`.
    ///
    /// Linear scan; the first satisfying candidate wins (a deterministic
    /// order suffices, need not be LRU). Retries up to
    /// [`FIND_FREE_SURFACE_RETRIES`] times with a 1 ms sleep between
    /// attempts before giving up.
    pub fn find_free_surface(&self, reorder_queue: &OutputSurfaceQueue) -> Result<SurfaceHandle> {
        for attempt in 0..FIND_FREE_SURFACE_RETRIES {
            for (index, surface) in self.surfaces.iter().enumerate() {
                let handle = SurfaceHandle(index);
                if self.allocator_lock_count(index) == 0
                    && surface.is_free(reorder_queue.contains(handle))
                {
                    return Ok(handle);
                }
            }

            if attempt > 0 && attempt % 100 == 0 {
                debug!("find_free_surface: still waiting after {attempt} attempts");
            }
            std::thread::sleep(FIND_FREE_SURFACE_SLEEP);
        }

        warn!("find_free_surface: exhausted {FIND_FREE_SURFACE_RETRIES} retries");
        Err(PipelineError::NotEnoughBuffer)
    }

    pub fn stats(&self, reorder_queue: &OutputSurfaceQueue) -> PoolStats {
        let mut stats = PoolStats { total: self.surfaces.len(), ..Default::default() };
        for (index, surface) in self.surfaces.iter().enumerate() {
            let handle = SurfaceHandle(index);
            let in_queue = reorder_queue.contains(handle);
            if in_queue {
                stats.in_reorder_queue += 1;
            }
            if self.allocator_lock_count(index) == 0 && surface.is_free(in_queue) {
                stats.free += 1;
            } else {
                stats.locked += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_a_free_surface_among_locked_ones() {
        let pool = SurfacePool::new(4, 64, 64, 64);
        pool.get(SurfaceHandle(0)).add_external_lock();
        pool.get(SurfaceHandle(1)).add_external_lock();
        pool.lock_for_decode(SurfaceHandle(2));

        let reorder_queue = OutputSurfaceQueue::new();
        let handle = pool.find_free_surface(&reorder_queue).unwrap();
        assert_eq!(handle, SurfaceHandle(3));
    }

    #[test]
    fn surface_in_reorder_queue_is_never_returned() {
        let pool = SurfacePool::new(1, 64, 64, 64);
        let mut reorder_queue = OutputSurfaceQueue::new();
        reorder_queue.push(SurfaceHandle(0));

        let result = pool.find_free_surface(&reorder_queue);
        assert!(matches!(result, Err(PipelineError::NotEnoughBuffer)));
    }

    #[test]
    fn stats_report_free_and_locked_counts() {
        let pool = SurfacePool::new(3, 64, 64, 64);
        pool.get(SurfaceHandle(0)).add_external_lock();
        let reorder_queue = OutputSurfaceQueue::new();
        let stats = pool.stats(&reorder_queue);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.locked, 1);
        assert_eq!(stats.free, 2);
    }
}

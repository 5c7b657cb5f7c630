// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The fixed pool of decoder work surfaces.

pub mod allocator;
pub mod pool;

pub use allocator::{
    AllocationRequest, AllocationResponse, AllocationType, LockedPlanes, MemoryId, SurfaceAllocator,
    SystemMemoryAllocator,
};
pub use pool::{PoolStats, SurfacePool};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::Rect;

/// Opaque index into a [`SurfacePool`]'s fixed surface array. Cheap to
/// copy and compare; the pool, not the handle, owns surface state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub usize);

/// Field/frame structure of a decoded picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PictureStructure {
    #[default]
    Progressive,
    TopFieldFirst,
    BottomFieldFirst,
    /// Repeated field, the IVTC telltale.
    FieldRepeated,
}

/// A sentinel decoder timestamp meaning "no timestamp attached".
pub const INVALID_TIMESTAMP: i64 = i64::MIN;

/// Metadata describing one decoder work surface.
///
/// The pixel storage itself lives behind [`SurfaceAllocator`]; `WorkSurface`
/// only carries the bookkeeping the pool and pipeline controller need.
#[derive(Debug, Clone)]
pub struct WorkSurface {
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub crop: Rect,
    pub structure: PictureStructure,
    /// Decoder-assigned timestamp in 90 kHz units, or [`INVALID_TIMESTAMP`].
    pub timestamp: i64,
    pub corrupted: bool,
    /// Pixel aspect ratio as declared for this surface.
    pub par_num: u32,
    pub par_den: u32,
    /// External lock count, held by whoever currently depends on this
    /// surface's contents outside the allocator itself: a surface is free
    /// iff external and allocator lock counts are both zero and the
    /// surface is absent from the output-reorder queue.
    external_lock_count: Arc<AtomicUsize>,
}

impl WorkSurface {
    pub fn new(width: u32, height: u32, pitch: u32) -> Self {
        Self {
            width,
            height,
            pitch,
            crop: Rect { x: 0, y: 0, width, height },
            structure: PictureStructure::Progressive,
            timestamp: INVALID_TIMESTAMP,
            corrupted: false,
            par_num: 1,
            par_den: 1,
            external_lock_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn external_lock_count(&self) -> usize {
        self.external_lock_count.load(Ordering::Acquire)
    }

    pub fn add_external_lock(&self) {
        self.external_lock_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Releases one external lock. Saturates at zero rather than
    /// underflowing on a mismatched release.
    pub fn release_external_lock(&self) {
        let _ = self
            .external_lock_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(v.saturating_sub(1)));
    }

    pub fn is_free(&self, in_reorder_queue: bool) -> bool {
        self.external_lock_count() == 0 && !in_reorder_queue
    }
}

/// Ordered sequence of surfaces enqueued in decode order, drained in
/// presentation order by the timestamp manager.
#[derive(Debug, Default)]
pub struct OutputSurfaceQueue {
    handles: std::collections::VecDeque<SurfaceHandle>,
}

impl OutputSurfaceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: SurfaceHandle) {
        self.handles.push_back(handle);
    }

    pub fn pop_front(&mut self) -> Option<SurfaceHandle> {
        self.handles.pop_front()
    }

    pub fn contains(&self, handle: SurfaceHandle) -> bool {
        self.handles.contains(&handle)
    }

    /// Removes the first occurrence of `handle`, out of decode order if
    /// necessary (the decoder may complete surfaces out of submission
    /// order, e.g. B-frame reordering). Returns whether it was present.
    pub fn remove(&mut self, handle: SurfaceHandle) -> bool {
        if let Some(pos) = self.handles.iter().position(|&h| h == handle) {
            self.handles.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn clear(&mut self) {
        self.handles.clear();
    }
}

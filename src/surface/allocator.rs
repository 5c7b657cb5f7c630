// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Surface allocator facade.
//!
//! Grounded on the original `BaseFrameAllocator` (`base_allocator.h`):
//! allocations are refcounted so repeated `alloc` calls for the same
//! external request hand out the existing allocation instead of
//! duplicating it, and a type tag distinguishes decode-target memory from
//! plain system memory. Device-memory/D3D11 backings are external
//! collaborators; [`SystemMemoryAllocator`] is the one
//! concrete backing this crate implements and tests against.

use std::collections::HashMap;

use crate::error::{PipelineError, Result};
use crate::Resolution;

/// What an allocation is used for, mirroring the original's externally-typed
/// allocation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationType {
    DecodeTarget,
    System,
}

/// A request to allocate `count` surfaces of `size`, aligned to height a
/// multiple of 32 with width equal to the chosen pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRequest {
    pub kind: AllocationType,
    pub count: usize,
    pub size: Resolution,
}

/// Identifies one surface's backing memory within an
/// [`AllocationResponse`]: the response it belongs to, and which of its
/// `count` buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryId {
    pub response: usize,
    pub index: usize,
}

impl MemoryId {
    pub fn new(response: AllocationResponse, index: usize) -> Self {
        Self { response: response.0, index }
    }
}

/// Handle returned by [`SurfaceAllocator::alloc`]. Refcounted: a second
/// `alloc` call with an equal [`AllocationRequest`] increments the existing
/// response's refcount and returns a handle to it rather than allocating
/// again, matching `BaseFrameAllocator::UniqueResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationResponse(pub usize);

/// CPU-visible pointers into a locked surface's planes.
#[derive(Debug, Clone, Copy)]
pub struct LockedPlanes {
    pub y_ptr: *mut u8,
    pub cbcr_ptr: *mut u8,
    pub pitch: u32,
}

/// Abstract surface-memory backing.
pub trait SurfaceAllocator: Send + Sync {
    fn alloc(&self, request: AllocationRequest) -> Result<AllocationResponse>;
    fn free(&self, response: AllocationResponse);
    fn lock(&self, id: MemoryId) -> Result<LockedPlanes>;
    fn unlock(&self, id: MemoryId);
    /// Whether this backing hands out read-only pointers (e.g. device
    /// memory) rather than a mutable heap copy.
    fn is_read_only(&self) -> bool {
        false
    }
}

struct UniqueResponse {
    request: AllocationRequest,
    refcount: usize,
    buffers: Vec<Vec<u8>>,
}

/// Heap-backed [`SurfaceAllocator`]. The crate's only concrete allocator:
/// device/D3D11 backings remain external collaborators.
pub struct SystemMemoryAllocator {
    responses: parking_lot::Mutex<HashMap<usize, UniqueResponse>>,
    next_id: std::sync::atomic::AtomicUsize,
}

impl SystemMemoryAllocator {
    pub fn new() -> Self {
        Self {
            responses: parking_lot::Mutex::new(HashMap::new()),
            next_id: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    fn plane_size(size: Resolution, pitch: u32) -> usize {
        // NV12: Y plane is pitch*height, interleaved UV is pitch*height/2.
        (pitch as usize) * (size.height as usize) * 3 / 2
    }
}

impl Default for SystemMemoryAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceAllocator for SystemMemoryAllocator {
    fn alloc(&self, request: AllocationRequest) -> Result<AllocationResponse> {
        let mut responses = self.responses.lock();

        if let Some((id, existing)) =
            responses.iter_mut().find(|(_, r)| r.request == request)
        {
            existing.refcount += 1;
            return Ok(AllocationResponse(*id));
        }

        let pitch = crate::align_up(request.size.width as usize, 32) as u32;
        let plane_size = Self::plane_size(request.size, pitch);
        let buffers = (0..request.count).map(|_| vec![0u8; plane_size]).collect();

        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        responses.insert(id, UniqueResponse { request, refcount: 1, buffers });

        Ok(AllocationResponse(id))
    }

    fn free(&self, response: AllocationResponse) {
        let mut responses = self.responses.lock();
        if let Some(entry) = responses.get_mut(&response.0) {
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount == 0 {
                responses.remove(&response.0);
            }
        }
    }

    fn lock(&self, id: MemoryId) -> Result<LockedPlanes> {
        let mut responses = self.responses.lock();
        let entry = responses
            .get_mut(&id.response)
            .ok_or_else(|| PipelineError::AllocatorFailure("unknown memory id".into()))?;
        let pitch = crate::align_up(entry.request.size.width as usize, 32) as u32;
        let buffer = entry
            .buffers
            .get_mut(id.index)
            .ok_or_else(|| PipelineError::AllocatorFailure("buffer index out of range".into()))?;
        let y_ptr = buffer.as_mut_ptr();
        let y_size = (pitch as usize) * (entry.request.size.height as usize);
        // SAFETY: y_size is within buffer's allocated length by construction
        // in `alloc` (plane_size = y_size + y_size/2).
        let cbcr_ptr = unsafe { y_ptr.add(y_size) };
        Ok(LockedPlanes { y_ptr, cbcr_ptr, pitch })
    }

    fn unlock(&self, _id: MemoryId) {}

    fn is_read_only(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_alloc_refcounts_instead_of_duplicating() {
        let allocator = SystemMemoryAllocator::new();
        let request = AllocationRequest {
            kind: AllocationType::DecodeTarget,
            count: 4,
            size: Resolution { width: 640, height: 480 },
        };
        let a = allocator.alloc(request).unwrap();
        let b = allocator.alloc(request).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn free_drops_only_after_last_refcount() {
        let allocator = SystemMemoryAllocator::new();
        let request = AllocationRequest {
            kind: AllocationType::System,
            count: 1,
            size: Resolution { width: 320, height: 240 },
        };
        let a = allocator.alloc(request).unwrap();
        let _b = allocator.alloc(request).unwrap();
        allocator.free(a);
        assert!(allocator.lock(MemoryId::new(a, 0)).is_ok());
    }

    #[test]
    fn lock_returns_distinct_y_and_cbcr_pointers() {
        let allocator = SystemMemoryAllocator::new();
        let request = AllocationRequest {
            kind: AllocationType::DecodeTarget,
            count: 1,
            size: Resolution { width: 64, height: 64 },
        };
        let response = allocator.alloc(request).unwrap();
        let planes = allocator.lock(MemoryId::new(response, 0)).unwrap();
        assert_ne!(planes.y_ptr, planes.cbcr_ptr);
    }

    #[test]
    fn distinct_buffer_indices_within_one_response_are_independent() {
        let allocator = SystemMemoryAllocator::new();
        let request = AllocationRequest {
            kind: AllocationType::DecodeTarget,
            count: 3,
            size: Resolution { width: 64, height: 64 },
        };
        let response = allocator.alloc(request).unwrap();
        let p0 = allocator.lock(MemoryId::new(response, 0)).unwrap();
        let p1 = allocator.lock(MemoryId::new(response, 1)).unwrap();
        assert_ne!(p0.y_ptr, p1.y_ptr);
    }
}

// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Memory copy primitives.
//!
//! [`streaming_copy`] follows the same shape as `image_processing.rs`'s
//! `argb_to_nv12_y_row_simd`: an `unsafe fn` gated to
//! `target_arch = "x86_64"`, runtime feature detection, and a scalar tail
//! loop for the non-16-byte-aligned remainder. Non-x86_64 targets fall
//! back to [`regular_copy`].

use std::sync::Arc;

use crate::workerpool::{Task, WorkerPool};

/// Below this size, MT copy is not worth its dispatch overhead and the
/// single-threaded path is used instead.
pub const MT_COPY_THRESHOLD: usize = 64 * 1024;
static_assertions::const_assert!(MT_COPY_THRESHOLD.is_power_of_two());

/// Plain, ordinary-load memory copy.
pub fn regular_copy(dst: &mut [u8], src: &[u8]) {
    dst.copy_from_slice(src);
}

/// Streaming-load copy for write-combined source memory: non-temporal
/// aligned loads in 128-byte chunks, tail handled in a 16-byte loop plus
/// byte residue, with a memory fence ahead of the first load.
///
/// Falls back to [`regular_copy`] when `src` is not 16-byte aligned, or on
/// non-x86_64 targets where no non-temporal load instruction is available.
pub fn streaming_copy(dst: &mut [u8], src: &[u8]) {
    assert_eq!(dst.len(), src.len());

    #[cfg(target_arch = "x86_64")]
    {
        if src.as_ptr().align_offset(16) == 0 && is_x86_feature_detected!("sse4.1") {
            // SAFETY: alignment checked above; `streaming_copy_x86` requires
            // src and dst to be valid for `len` bytes, which they are by
            // virtue of being Rust slices of that length.
            unsafe {
                streaming_copy_x86(dst, src);
            }
            return;
        }
    }

    regular_copy(dst, src);
}

#[cfg(target_arch = "x86_64")]
unsafe fn streaming_copy_x86(dst: &mut [u8], src: &[u8]) {
    use std::arch::x86_64::{_mm_sfence, _mm_storeu_si128, _mm_stream_load_si128};

    let len = src.len();
    let src_ptr = src.as_ptr();
    let dst_ptr = dst.as_mut_ptr();

    // Fence before the first non-temporal load.
    _mm_sfence();

    let chunk = 128;
    let mut offset = 0;
    while offset + chunk <= len {
        // SAFETY: src is 16-byte aligned (checked by the caller) and the
        // loop bound keeps every 16-byte sub-read within [offset, len).
        unsafe {
            for sub in (0..chunk).step_by(16) {
                let s = src_ptr.add(offset + sub) as *const std::arch::x86_64::__m128i;
                let d = dst_ptr.add(offset + sub) as *mut std::arch::x86_64::__m128i;
                let v = _mm_stream_load_si128(s as *mut _);
                _mm_storeu_si128(d, v);
            }
        }
        offset += chunk;
    }

    while offset + 16 <= len {
        // SAFETY: offset + 16 <= len, same alignment guarantee as above.
        unsafe {
            let s = src_ptr.add(offset) as *const std::arch::x86_64::__m128i;
            let d = dst_ptr.add(offset) as *mut std::arch::x86_64::__m128i;
            let v = _mm_stream_load_si128(s as *mut _);
            _mm_storeu_si128(d, v);
        }
        offset += 16;
    }

    if offset < len {
        // SAFETY: remaining byte residue, plain copy within bounds.
        unsafe {
            std::ptr::copy_nonoverlapping(src_ptr.add(offset), dst_ptr.add(offset), len - offset);
        }
    }
}

struct CopyTask<'a> {
    dst_base: *mut u8,
    src_base: *const u8,
    len: usize,
    parts: usize,
    use_streaming: bool,
    _marker: std::marker::PhantomData<&'a ()>,
}

// SAFETY: each `run_task` instance writes a disjoint, 16-byte-aligned
// contiguous block computed from its own `instance_id`; callers
// (`mt_copy`) guarantee `dst_base`/`src_base` are valid for `len` bytes for
// the duration of the dispatch.
unsafe impl Send for CopyTask<'_> {}
unsafe impl Sync for CopyTask<'_> {}

impl Task for CopyTask<'_> {
    fn task_count(&self) -> usize {
        self.parts
    }

    fn run_task(&self, instance_id: usize) {
        let block = crate::align_up(self.len.div_ceil(self.parts), 16);
        let start = (block * instance_id).min(self.len);
        let end = (start + block).min(self.len);
        if start >= end {
            return;
        }

        // SAFETY: [start, end) is within [0, len) by construction, and
        // blocks assigned to distinct instance_ids are disjoint.
        unsafe {
            let src = std::slice::from_raw_parts(self.src_base.add(start), end - start);
            let dst = std::slice::from_raw_parts_mut(self.dst_base.add(start), end - start);
            if self.use_streaming {
                streaming_copy(dst, src);
            } else {
                regular_copy(dst, src);
            }
        }
    }
}

/// Dispatches a copy across `pool` when `src.len() >= MT_COPY_THRESHOLD`,
/// splitting the range into `pool.size()` contiguous 16-byte-aligned
/// blocks. Falls back to a single-threaded copy below the threshold.
pub fn mt_copy(pool: &WorkerPool, dst: &mut [u8], src: &[u8], use_streaming: bool) {
    assert_eq!(dst.len(), src.len());

    if src.len() < MT_COPY_THRESHOLD || pool.size() <= 1 {
        if use_streaming {
            streaming_copy(dst, src);
        } else {
            regular_copy(dst, src);
        }
        return;
    }

    let task = Arc::new(CopyTask {
        dst_base: dst.as_mut_ptr(),
        src_base: src.as_ptr(),
        len: src.len(),
        parts: pool.size(),
        use_streaming,
        _marker: std::marker::PhantomData,
    });
    pool.run(task);
}

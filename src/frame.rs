// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The delivered [`FrameBuffer`] type and its free pool.
//!
//! A `FrameBuffer` is the copy handed to the consumer callback: unlike a
//! [`crate::surface::WorkSurface`], which lives in the fixed decode-target
//! pool for as long as the decoder or the reorder queue needs it, a
//! `FrameBuffer` is plain heap memory the post-process stage writes into
//! and the consumer reads from at its own pace.

use std::time::Duration;

use crate::queue::BoundedQueue;
use crate::surface::{PictureStructure, INVALID_TIMESTAMP};
use crate::AspectRatio;

/// Coding type of a delivered picture, carried through for consumers that
/// want to distinguish keyframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameType {
    #[default]
    Unknown,
    I,
    P,
    B,
}

/// Computes the page-skew byte offset a frame buffer's Y plane should
/// start at, so that buffers filled from a decode surface at
/// `source_ptr` don't all land at the same offset within a 4 KiB page and
/// alias each other on write-combined source memory:
/// `(src_Y_ptr & 0xFFF) XOR 0x800`.
pub fn page_skew_offset(source_ptr: *const u8) -> usize {
    ((source_ptr as usize) & 0xFFF) ^ 0x800
}

/// Slack reserved ahead of the Y plane so [`FrameBuffer::apply_skew`] can
/// reposition it without reallocating; `page_skew_offset` never exceeds
/// `0xFFF`.
const PAGE_SKEW_SLACK: usize = 4096;

/// A self-contained, heap-backed NV12 frame plus the metadata the consumer
/// callback needs: stride, cropped dimensions, display aspect ratio,
/// interlace structure, frame type, presentation start/stop times, and
/// whether the buffer is read-only.
pub struct FrameBuffer {
    pub stride: u32,
    pub cropped_width: u32,
    pub cropped_height: u32,
    pub display_aspect_ratio: AspectRatio,
    pub structure: PictureStructure,
    pub frame_type: FrameType,
    /// Presentation start/stop time in reference-time (100 ns) units.
    pub start_time: i64,
    pub stop_time: i64,
    pub read_only: bool,
    storage: Vec<u8>,
    y_offset: usize,
    uv_offset: usize,
    y_len: usize,
    uv_len: usize,
}

impl FrameBuffer {
    /// Allocates a frame buffer for one NV12 plane pair at `stride` x
    /// `cropped_height`, with [`PAGE_SKEW_SLACK`] bytes of extra room ahead
    /// of the Y plane for [`FrameBuffer::apply_skew`] to use later. Starts
    /// unskewed; the real source pointer isn't known until copy time.
    pub fn new(stride: u32, cropped_width: u32, cropped_height: u32) -> Self {
        let y_len = stride as usize * cropped_height as usize;
        let uv_len = y_len / 2;
        let storage = vec![0u8; PAGE_SKEW_SLACK + y_len + uv_len];

        Self {
            stride,
            cropped_width,
            cropped_height,
            display_aspect_ratio: AspectRatio::SQUARE,
            structure: PictureStructure::Progressive,
            frame_type: FrameType::Unknown,
            start_time: INVALID_TIMESTAMP,
            stop_time: INVALID_TIMESTAMP,
            read_only: false,
            storage,
            y_offset: 0,
            uv_offset: y_len,
            y_len,
            uv_len,
        }
    }

    /// Repositions the Y/UV planes within the reserved slack so the
    /// destination's low 12 bits differ from `source_ptr`'s, avoiding
    /// aliasing on write-combined source memory. Called right before a
    /// copy, once the real source surface is locked.
    pub fn apply_skew(&mut self, source_ptr: *const u8) {
        let skew = page_skew_offset(source_ptr);
        self.y_offset = skew;
        self.uv_offset = skew + self.y_len;
    }

    pub fn y_plane(&self) -> &[u8] {
        &self.storage[self.y_offset..self.y_offset + self.y_len]
    }

    pub fn y_plane_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.y_offset..self.y_offset + self.y_len]
    }

    pub fn uv_plane(&self) -> &[u8] {
        &self.storage[self.uv_offset..self.uv_offset + self.uv_len]
    }

    pub fn uv_plane_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.uv_offset..self.uv_offset + self.uv_len]
    }

    /// Resets per-frame metadata to its defaults so a reused buffer doesn't
    /// leak the previous frame's timestamps or flags.
    pub fn reset_metadata(&mut self) {
        self.display_aspect_ratio = AspectRatio::SQUARE;
        self.structure = PictureStructure::Progressive;
        self.frame_type = FrameType::Unknown;
        self.start_time = INVALID_TIMESTAMP;
        self.stop_time = INVALID_TIMESTAMP;
        self.read_only = false;
    }
}

/// Fixed-size free pool of pre-allocated [`FrameBuffer`]s, backing the
/// pipeline's FreePool queue.
///
/// Sized once at `init` time with the output-queue length plus aux slack,
/// mirroring [`crate::surface::SurfacePool`]'s sizing rationale.
pub struct FrameBufferPool {
    free: BoundedQueue<Box<FrameBuffer>>,
}

impl FrameBufferPool {
    pub fn new(capacity: usize, stride: u32, cropped_width: u32, cropped_height: u32) -> Self {
        let free = BoundedQueue::new(capacity);
        for _ in 0..capacity {
            let buffer = Box::new(FrameBuffer::new(stride, cropped_width, cropped_height));
            assert!(free.push_back(buffer, Duration::ZERO), "pool capacity matches fill count");
        }
        Self { free }
    }

    pub fn capacity(&self) -> usize {
        self.free.capacity()
    }

    /// Waits up to `timeout` for a free buffer, resetting its metadata
    /// before handing it out.
    pub fn checkout(&self, timeout: Duration) -> Option<Box<FrameBuffer>> {
        let mut buffer = self.free.pop_front(timeout)?;
        buffer.reset_metadata();
        Some(buffer)
    }

    pub fn checkin(&self, buffer: Box<FrameBuffer>, timeout: Duration) -> bool {
        self.free.push_back(buffer, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_skew_offset_flips_the_0x800_bit() {
        let ptr = 0x1000usize as *const u8;
        assert_eq!(page_skew_offset(ptr), 0x800);
        let ptr2 = 0x1800usize as *const u8;
        assert_eq!(page_skew_offset(ptr2), 0x000);
    }

    #[test]
    fn plane_sizes_match_nv12_layout() {
        let frame = FrameBuffer::new(640, 640, 480);
        assert_eq!(frame.y_plane().len(), 640 * 480);
        assert_eq!(frame.uv_plane().len(), 640 * 480 / 2);
    }

    #[test]
    fn apply_skew_repositions_planes_without_growing_storage() {
        let mut frame = FrameBuffer::new(64, 64, 64);
        let before_len = frame.storage.len();
        frame.apply_skew(0x1000usize as *const u8);
        assert_eq!(frame.y_offset, 0x800);
        assert_eq!(frame.uv_offset, 0x800 + frame.y_len);
        assert_eq!(frame.storage.len(), before_len);
        assert_eq!(frame.y_plane().len(), frame.y_len);
        assert_eq!(frame.uv_plane().len(), frame.uv_len);
    }

    #[test]
    fn reset_metadata_clears_timestamps_and_flags() {
        let mut frame = FrameBuffer::new(64, 64, 64);
        frame.start_time = 1234;
        frame.read_only = true;
        frame.reset_metadata();
        assert_eq!(frame.start_time, INVALID_TIMESTAMP);
        assert!(!frame.read_only);
    }

    #[test]
    fn pool_checkout_then_checkin_round_trips() {
        let pool = FrameBufferPool::new(2, 64, 64, 64);
        let a = pool.checkout(Duration::from_millis(10)).unwrap();
        let b = pool.checkout(Duration::from_millis(10)).unwrap();
        assert!(pool.checkout(Duration::from_millis(10)).is_none());
        assert!(pool.checkin(a, Duration::from_millis(10)));
        assert!(pool.checkin(b, Duration::from_millis(10)));
        assert!(pool.checkout(Duration::from_millis(10)).is_some());
    }

    #[test]
    fn checkout_resets_reused_buffers_metadata() {
        let pool = FrameBufferPool::new(1, 64, 64, 64);
        let mut buffer = pool.checkout(Duration::from_millis(10)).unwrap();
        buffer.start_time = 999;
        pool.checkin(buffer, Duration::from_millis(10));
        let reused = pool.checkout(Duration::from_millis(10)).unwrap();
        assert_eq!(reused.start_time, INVALID_TIMESTAMP);
    }
}

// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A minimal in-memory [`Decoder`] used by this crate's own tests. It never
//! touches real hardware: it just holds submitted surface handles for
//! `reorder_delay` frames before releasing them, which is enough to
//! exercise the pipeline's reorder and flush paths without a real entropy
//! decoder.

use std::collections::VecDeque;
use std::time::Duration;

use super::{Decoder, DecoderExt, SurfaceRequest, SyncPoint, VideoParams};
use crate::error::DecoderStatus;
use crate::surface::{SurfaceHandle, WorkSurface};

pub struct DummyDecoder {
    params: VideoParams,
    reorder_delay: usize,
    pending: VecDeque<SurfaceHandle>,
    next_sync: u64,
}

impl DummyDecoder {
    /// `reorder_delay` is how many submitted surfaces the decoder holds
    /// back before emitting the oldest one, modelling a B-frame reorder
    /// window.
    pub fn new(params: VideoParams, reorder_delay: usize) -> Self {
        Self { params, reorder_delay, pending: VecDeque::new(), next_sync: 0 }
    }

    fn next_sync_point(&mut self) -> SyncPoint {
        let sp = SyncPoint(self.next_sync);
        self.next_sync += 1;
        sp
    }
}

impl Decoder for DummyDecoder {
    fn decode_header(&mut self, bitstream: &[u8]) -> DecoderStatus {
        if bitstream.is_empty() {
            DecoderStatus::MoreData
        } else {
            DecoderStatus::Ok
        }
    }

    fn query_io_surf(&self) -> SurfaceRequest {
        SurfaceRequest {
            suggested_count: self.reorder_delay + 2,
            width: self.params.coded_width,
            height: self.params.coded_height,
        }
    }

    fn init(&mut self, params: &VideoParams) -> DecoderStatus {
        self.params = *params;
        DecoderStatus::Ok
    }

    fn reset(&mut self, params: &VideoParams) -> DecoderStatus {
        self.params = *params;
        self.pending.clear();
        DecoderStatus::Ok
    }

    fn get_video_params(&self) -> VideoParams {
        self.params
    }

    fn decode_frame_async(
        &mut self,
        bitstream: Option<&[u8]>,
        surface: SurfaceHandle,
    ) -> (DecoderStatus, Option<SurfaceHandle>, Option<SyncPoint>) {
        match bitstream {
            None => match self.pending.pop_front() {
                Some(handle) => {
                    let sync = self.next_sync_point();
                    (DecoderStatus::Ok, Some(handle), Some(sync))
                }
                None => (DecoderStatus::Ok, None, None),
            },
            Some(_) => {
                self.pending.push_back(surface);
                if self.pending.len() > self.reorder_delay {
                    let handle = self.pending.pop_front().unwrap();
                    let sync = self.next_sync_point();
                    (DecoderStatus::Ok, Some(handle), Some(sync))
                } else {
                    (DecoderStatus::Ok, None, None)
                }
            }
        }
    }

    fn sync_operation(&mut self, _sync_point: SyncPoint, _timeout: Duration) -> DecoderStatus {
        DecoderStatus::Ok
    }
}

impl DecoderExt for DummyDecoder {
    fn describe_surface(&self, _handle: SurfaceHandle) -> Option<WorkSurface> {
        // The dummy decoder defers surface metadata to the pipeline's own
        // SurfacePool; it never needs to answer this itself.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> VideoParams {
        VideoParams {
            codec: crate::capabilities::Codec::H264,
            coded_width: 1920,
            coded_height: 1080,
            crop_width: 1920,
            crop_height: 1080,
            par_num: 1,
            par_den: 1,
            declared_frame_rate: 25.0,
            progressive: true,
        }
    }

    #[test]
    fn no_reorder_delay_emits_every_submission_immediately() {
        let mut decoder = DummyDecoder::new(params(), 0);
        let (status, out, sync) = decoder.decode_frame_async(Some(&[1]), SurfaceHandle(0));
        assert_eq!(status, DecoderStatus::Ok);
        assert_eq!(out, Some(SurfaceHandle(0)));
        assert!(sync.is_some());
    }

    #[test]
    fn reorder_delay_holds_back_then_drains_in_submission_order() {
        let mut decoder = DummyDecoder::new(params(), 2);
        let (_, out0, _) = decoder.decode_frame_async(Some(&[1]), SurfaceHandle(0));
        assert_eq!(out0, None);
        let (_, out1, _) = decoder.decode_frame_async(Some(&[1]), SurfaceHandle(1));
        assert_eq!(out1, None);
        let (_, out2, _) = decoder.decode_frame_async(Some(&[1]), SurfaceHandle(2));
        assert_eq!(out2, Some(SurfaceHandle(0)));
    }

    #[test]
    fn flush_drains_remaining_pending_surfaces_one_at_a_time() {
        let mut decoder = DummyDecoder::new(params(), 2);
        decoder.decode_frame_async(Some(&[1]), SurfaceHandle(0));
        decoder.decode_frame_async(Some(&[1]), SurfaceHandle(1));

        let (_, out_a, _) = decoder.decode_frame_async(None, SurfaceHandle(0));
        assert_eq!(out_a, Some(SurfaceHandle(0)));
        let (_, out_b, _) = decoder.decode_frame_async(None, SurfaceHandle(0));
        assert_eq!(out_b, Some(SurfaceHandle(1)));
        let (_, out_c, _) = decoder.decode_frame_async(None, SurfaceHandle(0));
        assert_eq!(out_c, None);
    }

    #[test]
    fn reset_clears_pending_surfaces() {
        let mut decoder = DummyDecoder::new(params(), 2);
        decoder.decode_frame_async(Some(&[1]), SurfaceHandle(0));
        decoder.reset(&params());
        let (_, out, _) = decoder.decode_frame_async(None, SurfaceHandle(0));
        assert_eq!(out, None);
    }
}

// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The external entropy-decoder collaborator.
//!
//! This crate never decodes a bitstream itself; [`Decoder`] is the seam a
//! hardware-specific or software fixed-function decoder is plugged in
//! through. [`dummy`] provides a minimal in-memory implementation used by
//! this crate's own tests.

pub mod dummy;

use crate::capabilities::Codec;
use crate::error::DecoderStatus;
use crate::surface::{SurfaceHandle, WorkSurface};

/// Parameters describing the stream being decoded, as derived from the
/// sequence/picture headers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoParams {
    pub codec: Codec,
    pub coded_width: u32,
    pub coded_height: u32,
    pub crop_width: u32,
    pub crop_height: u32,
    /// Pixel aspect ratio numerator/denominator as declared by the stream.
    pub par_num: u32,
    pub par_den: u32,
    /// Declared frame rate in Hz, or `0.0` if the stream does not declare
    /// one, meaning "use timestamps directly".
    pub declared_frame_rate: f64,
    pub progressive: bool,
}

/// Request for how many work surfaces of what size the decoder needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceRequest {
    pub suggested_count: usize,
    pub width: u32,
    pub height: u32,
}

/// A completed decode's out-of-band token: the surface it wrote and the
/// handle used to await completion.
#[derive(Debug, Clone, Copy)]
pub struct SyncPoint(pub u64);

/// The entropy-decoder collaborator interface.
///
/// Implementations are expected to be backed by hardware (VAAPI, V4L2,
/// D3D11...); this crate treats it as opaque and only reacts to the
/// [`DecoderStatus`] values it returns.
pub trait Decoder: Send {
    /// Parses a sequence header out of `bitstream`, populating internal
    /// parameter state. Does not allocate surfaces.
    fn decode_header(&mut self, bitstream: &[u8]) -> DecoderStatus;

    /// Returns how many surfaces of what size this stream needs.
    fn query_io_surf(&self) -> SurfaceRequest;

    /// Initialises the decoder against the given video parameters.
    fn init(&mut self, params: &VideoParams) -> DecoderStatus;

    /// Resets internal reference-frame state, e.g. on seek.
    fn reset(&mut self, params: &VideoParams) -> DecoderStatus;

    /// Returns the most recently parsed video parameters.
    fn get_video_params(&self) -> VideoParams;

    /// Submits `bitstream` (or `None` to flush internal references) against
    /// `surface` for decode. Returns immediately; on `Ok`, `out_surface` and
    /// `sync_point` are populated and must be waited on with
    /// [`Decoder::sync_operation`] before the surface's contents are valid.
    fn decode_frame_async(
        &mut self,
        bitstream: Option<&[u8]>,
        surface: SurfaceHandle,
    ) -> (DecoderStatus, Option<SurfaceHandle>, Option<SyncPoint>);

    /// Blocks (up to `timeout`) until `sync_point` completes.
    fn sync_operation(&mut self, sync_point: SyncPoint, timeout: std::time::Duration) -> DecoderStatus;
}

/// A [`Decoder`] paired with the [`WorkSurface`] metadata it last wrote, as
/// seen by the pipeline controller. Kept separate from `Decoder` itself so
/// test doubles don't need to reimplement surface bookkeeping.
pub trait DecoderExt: Decoder {
    fn describe_surface(&self, handle: SurfaceHandle) -> Option<WorkSurface>;
}

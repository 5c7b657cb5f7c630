// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Codec-polymorphic bitstream constructor.
//!
//! Grounded on `original_source/frame_constructors.cpp`'s
//! `CFrameConstructor`. Its three-way `FrameConstructor` base plus
//! derivatives hierarchy becomes a sum type with one dispatch function
//! instead of a vtable.

pub mod avc;
pub mod dvd;
pub mod generic;
pub mod vc1;

pub use dvd::PesHeaderFlags;

use crate::timestamp::REFERENCE_TIME_FREQUENCY;

/// Non-fatal vs. fatal construction outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstructError {
    /// Insufficient header data, or DVD stripping reduced the payload to
    /// zero bytes. Not fatal: the caller should wait for the next sample.
    MoreDataNeeded,
    /// Any other construction error; fatal for the current frame only.
    Fatal(String),
}

/// One input access unit, with its container-declared presentation time if
/// any.
pub struct Sample<'a> {
    pub data: &'a [u8],
    /// Reference-time (100 ns) start time, if the container attached one.
    pub start_time: Option<i64>,
}

/// Converts a reference-time (100 ns) timestamp to the decoder's 90 kHz
/// media timestamp.
pub fn reference_time_to_media_time(reference_time: i64) -> i64 {
    ((reference_time as i128 * 90_000) / REFERENCE_TIME_FREQUENCY as i128) as i64
}

/// Mutable state carried by a [`BitstreamConstructor`] across calls: the
/// once-derived sequence-header blob, whether it has been inserted yet,
/// and the residual carry-over from the previous call.
#[derive(Debug, Clone, Default)]
pub struct BitstreamState {
    pub sequence_header: Vec<u8>,
    pub header_inserted: bool,
    pub residual: Vec<u8>,
    pub dvd: dvd::DvdState,
}

impl BitstreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of a new segment: the sequence header will be
    /// re-prepended on the next non-empty frame, since the next decode
    /// after an end-flush is treated as the start of a new segment.
    pub fn start_new_segment(&mut self) {
        self.header_inserted = false;
        self.residual.clear();
    }

    /// Saves the unconsumed suffix of `bitstream` for the next call. The
    /// buffer grows on demand via `Vec`'s own amortized growth.
    pub fn save_residual(&mut self, unconsumed: &[u8]) {
        self.residual.clear();
        self.residual.extend_from_slice(unconsumed);
    }

    fn take_residual(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.residual)
    }
}

/// Which codec-specific bitstream shaping rule is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitstreamConstructor {
    Generic,
    Vc1 { kind: vc1::Vc1Kind, width: u32, height: u32 },
    Avc { nal_size_bytes: u8 },
}

/// Produces a self-contained elementary-stream fragment for `sample`,
/// consuming and updating `state`. DVD packet stripping, when
/// `strip_dvd_packets` is set, runs before codec-specific processing.
pub fn construct_frame(
    constructor: BitstreamConstructor,
    state: &mut BitstreamState,
    sample: &Sample,
    strip_dvd_packets: bool,
) -> Result<Vec<u8>, ConstructError> {
    let stripped_storage;
    let payload = if strip_dvd_packets {
        let (payload, flags) = dvd::strip_ps_headers(sample.data, &mut state.dvd)?;
        if payload.is_empty() {
            return Err(ConstructError::MoreDataNeeded);
        }
        let _ = flags;
        stripped_storage = payload.to_vec();
        &stripped_storage[..]
    } else {
        sample.data
    };

    match constructor {
        BitstreamConstructor::Generic => generic::construct(state, payload),
        BitstreamConstructor::Vc1 { kind, width, height } => {
            vc1::construct(state, payload, kind, width, height)
        }
        BitstreamConstructor::Avc { nal_size_bytes } => avc::construct(state, payload, nal_size_bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_time_converts_to_90khz() {
        // One second of reference time (100ns units) is 90000 media ticks.
        assert_eq!(reference_time_to_media_time(REFERENCE_TIME_FREQUENCY), 90_000);
        assert_eq!(reference_time_to_media_time(0), 0);
    }

    #[test]
    fn residual_round_trips_through_save_and_take() {
        let mut state = BitstreamState::new();
        state.save_residual(&[1, 2, 3]);
        assert_eq!(state.take_residual(), vec![1, 2, 3]);
        assert!(state.residual.is_empty());
    }

    #[test]
    fn start_new_segment_clears_header_inserted_flag() {
        let mut state = BitstreamState::new();
        state.header_inserted = true;
        state.residual = vec![9, 9];
        state.start_new_segment();
        assert!(!state.header_inserted);
        assert!(state.residual.is_empty());
    }
}

// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! VC-1 bitstream construction.
//!
//! Advanced profile streams are Annex-B-like and only need a frame start
//! code inserted when the encoder omitted one. Simple/Main profile
//! (WMV3) streams carry no start codes at all and need a one-time 20-byte
//! sequence wrapper plus an 8-byte length prefix on every frame, grounded
//! on `original_source/frame_constructors.cpp`'s `CFrameConstructorWMV3`.

use super::{BitstreamState, ConstructError};

/// Distinguishes the two VC-1 bitstream shapes; the fourcc collapses to
/// this two-way split since that's all construction cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vc1Kind {
    Advanced,
    SimpleMain,
}

/// Frame start code types VC-1 Advanced profile uses (SMPTE 421M Annex E):
/// sequence header (0x0F), entry-point header (0x0E), frame (0x0D),
/// field (0x0C), slice (0x0B), and the picture-layer optional user-data
/// and end-of-sequence markers (0x1B-0x1F, 0x0A).
const VC1_START_CODE_SUFFIXES: [u8; 11] =
    [0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x1B, 0x1C, 0x1D, 0x1E, 0x1F];

const FRAME_START_CODE: [u8; 4] = [0x00, 0x00, 0x01, 0x0D];

fn has_vc1_start_code(data: &[u8]) -> bool {
    data.len() >= 4
        && data[0] == 0x00
        && data[1] == 0x00
        && data[2] == 0x01
        && VC1_START_CODE_SUFFIXES.contains(&data[3])
}

/// Wraps a WMV3 sequence header in the 20-byte frame the VC-1 Advanced
/// decoder expects in place of a real sequence start code: a 0xC5 marker,
/// a little-endian sequence-header length, the header bytes themselves,
/// then little-endian height/width and four reserved zero bytes.
fn wrap_sequence_header(sequence_header: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut wrapped = Vec::with_capacity(20 + sequence_header.len());
    wrapped.push(0xC5);
    wrapped.extend_from_slice(&[0x00, 0x00, 0x00]);
    wrapped.extend_from_slice(&(sequence_header.len() as u32).to_le_bytes());
    wrapped.extend_from_slice(sequence_header);
    wrapped.extend_from_slice(&height.to_le_bytes());
    wrapped.extend_from_slice(&width.to_le_bytes());
    wrapped.extend_from_slice(&[0, 0, 0, 0]);
    wrapped
}

/// Per-frame 8-byte prefix WMV3 frames carry in place of a start code: a
/// little-endian payload length followed by four reserved zero bytes.
fn frame_length_prefix(payload_len: usize) -> [u8; 8] {
    let mut prefix = [0u8; 8];
    prefix[0..4].copy_from_slice(&(payload_len as u32).to_le_bytes());
    prefix
}

fn construct_advanced(state: &mut BitstreamState, payload: &[u8]) -> Result<Vec<u8>, ConstructError> {
    if payload.is_empty() && state.residual.is_empty() {
        return Err(ConstructError::MoreDataNeeded);
    }

    let mut out = std::mem::take(&mut state.residual);
    if !has_vc1_start_code(payload) {
        out.extend_from_slice(&FRAME_START_CODE);
    }
    out.extend_from_slice(payload);
    Ok(out)
}

fn construct_simple_main(
    state: &mut BitstreamState,
    payload: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, ConstructError> {
    if payload.is_empty() && state.residual.is_empty() {
        return Err(ConstructError::MoreDataNeeded);
    }

    let mut out = std::mem::take(&mut state.residual);

    if !state.header_inserted {
        if state.sequence_header.is_empty() {
            state.sequence_header = payload.to_vec();
        }
        out.extend_from_slice(&wrap_sequence_header(&state.sequence_header, width, height));
        state.header_inserted = true;
    }

    out.extend_from_slice(&frame_length_prefix(payload.len()));
    out.extend_from_slice(payload);
    Ok(out)
}

pub fn construct(
    state: &mut BitstreamState,
    payload: &[u8],
    kind: Vc1Kind,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, ConstructError> {
    match kind {
        Vc1Kind::Advanced => construct_advanced(state, payload),
        Vc1Kind::SimpleMain => construct_simple_main(state, payload, width, height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advanced_profile_inserts_frame_start_code_when_missing() {
        let mut state = BitstreamState::new();
        let out = construct(&mut state, &[1, 2, 3], Vc1Kind::Advanced, 0, 0).unwrap();
        assert_eq!(&out[..4], &FRAME_START_CODE);
        assert_eq!(&out[4..], &[1, 2, 3]);
    }

    #[test]
    fn advanced_profile_leaves_existing_start_code_alone() {
        let mut state = BitstreamState::new();
        let payload = [0x00, 0x00, 0x01, 0x0D, 9, 9];
        let out = construct(&mut state, &payload, Vc1Kind::Advanced, 0, 0).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn simple_main_wraps_sequence_header_once_then_prefixes_frames() {
        let mut state = BitstreamState::new();
        let first = construct(&mut state, &[0xAB; 10], Vc1Kind::SimpleMain, 320, 240).unwrap();
        assert_eq!(first[0], 0xC5);
        assert!(state.header_inserted);

        let second = construct(&mut state, &[0xCD; 4], Vc1Kind::SimpleMain, 320, 240).unwrap();
        assert_eq!(&second[0..4], &4u32.to_le_bytes());
        assert_eq!(&second[8..], &[0xCD; 4]);
    }
}

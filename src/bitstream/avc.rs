// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! AVC (H.264) bitstream construction: rewrites a length-prefixed NAL
//! stream (as produced by MP4/MOV/MKV demuxers) into Annex B, discarding
//! access-unit-delimiter NAL units and replacing each length field with a
//! 4-byte 0x00000001 start code.

use super::{BitstreamState, ConstructError};

const ANNEX_B_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];
const NAL_TYPE_ACCESS_UNIT_DELIMITER: u8 = 9;

fn nal_unit_type(nal_header: u8) -> u8 {
    nal_header & 0x1F
}

fn read_length(data: &[u8], nal_size_bytes: u8) -> Option<usize> {
    let n = nal_size_bytes as usize;
    if data.len() < n {
        return None;
    }
    let mut len = 0usize;
    for &b in &data[..n] {
        len = (len << 8) | b as usize;
    }
    Some(len)
}

pub fn construct(
    state: &mut BitstreamState,
    payload: &[u8],
    nal_size_bytes: u8,
) -> Result<Vec<u8>, ConstructError> {
    if payload.is_empty() && state.residual.is_empty() {
        return Err(ConstructError::MoreDataNeeded);
    }

    let mut combined = std::mem::take(&mut state.residual);
    combined.extend_from_slice(payload);

    let mut out = Vec::with_capacity(combined.len());
    let mut cursor = 0usize;
    let n = nal_size_bytes as usize;

    while cursor < combined.len() {
        let Some(nal_len) = read_length(&combined[cursor..], nal_size_bytes) else {
            // Incomplete length field: carry the remainder for next time.
            state.save_residual(&combined[cursor..]);
            break;
        };
        let header_start = cursor + n;
        if combined.len() < header_start + nal_len {
            // Incomplete NAL body: carry the remainder for next time.
            state.save_residual(&combined[cursor..]);
            break;
        }
        if nal_len == 0 {
            cursor = header_start;
            continue;
        }

        let nal = &combined[header_start..header_start + nal_len];
        if nal_unit_type(nal[0]) != NAL_TYPE_ACCESS_UNIT_DELIMITER {
            out.extend_from_slice(&ANNEX_B_START_CODE);
            out.extend_from_slice(nal);
        }
        cursor = header_start + nal_len;
    }

    if out.is_empty() {
        return Err(ConstructError::MoreDataNeeded);
    }
    Ok(out)
}

/// Extracts the codec's SPS/PPS from a length-prefixed sequence header
/// blob, for callers that need them ahead of the first frame.
pub fn extract_parameter_sets(sequence_header: &[u8], nal_size_bytes: u8) -> Vec<Vec<u8>> {
    let mut sets = Vec::new();
    let mut cursor = 0usize;
    let n = nal_size_bytes as usize;
    while let Some(nal_len) = read_length(&sequence_header[cursor..], nal_size_bytes) {
        let header_start = cursor + n;
        if sequence_header.len() < header_start + nal_len {
            break;
        }
        sets.push(sequence_header[header_start..header_start + nal_len].to_vec());
        cursor = header_start + nal_len;
    }
    sets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn length_prefixed(nals: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in nals {
            out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
            out.extend_from_slice(nal);
        }
        out
    }

    #[test]
    fn replaces_length_prefix_with_annex_b_start_code() {
        let mut state = BitstreamState::new();
        let input = length_prefixed(&[&[0x65, 1, 2, 3]]);
        let out = construct(&mut state, &input, 4).unwrap();
        assert_eq!(&out[..4], &ANNEX_B_START_CODE);
        assert_eq!(&out[4..], &[0x65, 1, 2, 3]);
    }

    #[test]
    fn discards_access_unit_delimiter_nal_units() {
        let mut state = BitstreamState::new();
        let aud = &[0x09, 0xF0][..];
        let slice = &[0x65, 1, 2][..];
        let input = length_prefixed(&[aud, slice]);
        let out = construct(&mut state, &input, 4).unwrap();
        assert_eq!(out, [&ANNEX_B_START_CODE[..], &[0x65, 1, 2]].concat());
    }

    #[test]
    fn incomplete_trailing_nal_is_carried_as_residual() {
        let mut state = BitstreamState::new();
        let full = length_prefixed(&[&[0x65, 1, 2, 3]]);
        let mut truncated = full.clone();
        truncated.truncate(full.len() - 1);
        let out = construct(&mut state, &truncated, 4).unwrap_err();
        assert_eq!(out, ConstructError::MoreDataNeeded);
        assert_eq!(state.residual.len(), truncated.len());
    }

    #[test]
    fn extracts_sps_and_pps_from_sequence_header() {
        let sps = &[0x67, 1, 2][..];
        let pps = &[0x68, 3][..];
        let header = length_prefixed(&[sps, pps]);
        let sets = extract_parameter_sets(&header, 4);
        assert_eq!(sets, vec![sps.to_vec(), pps.to_vec()]);
    }
}

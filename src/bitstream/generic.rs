// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Generic (H.264 Annex B, MPEG-2) bitstream construction: concatenate any
//! residual carry-over with the payload and pass it through unchanged.

use super::{BitstreamState, ConstructError};

pub fn construct(state: &mut BitstreamState, payload: &[u8]) -> Result<Vec<u8>, ConstructError> {
    if payload.is_empty() && state.residual.is_empty() {
        return Err(ConstructError::MoreDataNeeded);
    }

    let mut out = std::mem::take(&mut state.residual);
    out.extend_from_slice(payload);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepends_residual_then_clears_it() {
        let mut state = BitstreamState::new();
        state.residual = vec![0xAA, 0xBB];
        let out = construct(&mut state, &[1, 2, 3]).unwrap();
        assert_eq!(out, vec![0xAA, 0xBB, 1, 2, 3]);
        assert!(state.residual.is_empty());
    }

    #[test]
    fn empty_payload_and_residual_needs_more_data() {
        let mut state = BitstreamState::new();
        assert_eq!(construct(&mut state, &[]), Err(ConstructError::MoreDataNeeded));
    }
}

// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Codec support matrix, consulted at probe time.

use crate::config::EnabledCodecs;

/// One of the four codecs this crate orchestrates decode for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    H264,
    Mpeg2,
    Vc1,
    Wmv9,
}

/// A profile recognised within a codec's probe-time matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    H264Baseline,
    H264ConstrainedBaseline,
    H264Main,
    H264High,
    Mpeg2Simple,
    Mpeg2Main,
    Mpeg2High,
    Mpeg2SpatiallyScalable,
    Vc1Advanced,
    Vc1Simple,
    Vc1Main,
}

/// Degree of support a [`Profile`] receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Support {
    /// Fully accelerated.
    Supported,
    /// Probe accepted but hardware acceleration is not available:
    /// acknowledged but not accelerated.
    SoftSupported,
    Unsupported,
}

/// Looks up the support level for `profile`, given which codecs are enabled
/// in the active [`Config`](crate::Config).
///
/// This is a fixed matrix, not a hardware probe: the decoder
/// collaborator owns the actual hardware capability query
/// (`query_io_surf`/`init`); this crate only pre-filters what it is willing
/// to attempt.
pub fn probe(profile: Profile, enabled: &EnabledCodecs) -> Support {
    use Profile::*;

    let codec_enabled = match profile {
        H264Baseline | H264ConstrainedBaseline | H264Main | H264High => enabled.h264,
        Mpeg2Simple | Mpeg2Main | Mpeg2High | Mpeg2SpatiallyScalable => enabled.mpeg2,
        Vc1Advanced | Vc1Simple | Vc1Main => enabled.vc1,
    };

    if !codec_enabled {
        return Support::Unsupported;
    }

    match profile {
        H264Baseline | H264ConstrainedBaseline | H264Main | H264High => Support::Supported,
        Mpeg2Simple | Mpeg2Main | Mpeg2High | Mpeg2SpatiallyScalable => Support::Supported,
        Vc1Advanced => Support::Supported,
        Vc1Simple | Vc1Main => Support::SoftSupported,
    }
}

/// The codec a [`Profile`] belongs to.
pub fn codec_of(profile: Profile) -> Codec {
    use Profile::*;
    match profile {
        H264Baseline | H264ConstrainedBaseline | H264Main | H264High => Codec::H264,
        Mpeg2Simple | Mpeg2Main | Mpeg2High | Mpeg2SpatiallyScalable => Codec::Mpeg2,
        Vc1Advanced | Vc1Simple | Vc1Main => Codec::Vc1,
    }
}

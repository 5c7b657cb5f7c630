// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Error taxonomy for the pipeline.
//!
//! Recoverable statuses returned by the decoder collaborator (`MoreData`,
//! `MoreSurface`, `DeviceBusy`, `VideoParamChanged`,
//! `IncompatibleVideoParam`) are handled inside the decode loop in
//! [`crate::pipeline`] and never escape as a [`PipelineError`]. What is left
//! here is what the loop gives up on: fatal-for-operation and
//! fatal-for-instance failures, plus the handful of construction-time errors
//! from configuration and bitstream preparation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Top-level error type returned by the public pipeline API.
///
/// Every recoverable decoder status is absorbed internally; only fatal
/// conditions reach the caller. The specific decoder status that triggered a
/// fatal path is logged (see `pipeline::controller`) but intentionally not
/// part of this enum: callers get a stable error taxonomy, not a mirror of
/// the decoder's own status codes.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The media type could not be parsed, or described a codec outside the
    /// enabled subset.
    #[error("invalid media type: {0}")]
    InvalidMediaType(String),

    /// The media type named a codec/profile this build does not support.
    #[error("unsupported codec or profile: {0}")]
    Unsupported(String),

    /// The decoder collaborator or its backing device failed to initialise.
    #[error("device failed to initialize: {0}")]
    DeviceFailed(String),

    /// The decode loop exited on an error status not covered by the
    /// recoverable taxonomy. The original status is not retained.
    #[error("decode failed")]
    DecodeFailed,

    /// The surface pool could not satisfy a request after exhausting its
    /// retry budget.
    #[error("not enough surface buffers")]
    NotEnoughBuffer,

    /// Surface or frame-buffer allocation failed outright. The instance is
    /// no longer usable; only `shutdown` remains legal.
    #[error("allocator failure: {0}")]
    AllocatorFailure(String),

    /// The worker-pool or post-process thread could not be spawned. The
    /// instance is no longer usable.
    #[error("failed to create worker thread: {0}")]
    ThreadCreationFailed(String),

    /// A public operation was called while the instance had already been
    /// marked invalid by a prior fatal-for-instance error.
    #[error("pipeline instance is no longer valid")]
    InstanceInvalid,

    /// Configuration failed validation (see [`crate::config::ConfigBuilder`]).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Whether this error marks the whole instance invalid, as opposed to
    /// only the current operation.
    pub fn is_fatal_for_instance(&self) -> bool {
        matches!(
            self,
            PipelineError::AllocatorFailure(_)
                | PipelineError::ThreadCreationFailed(_)
                | PipelineError::InstanceInvalid
        )
    }
}

/// Status values exchanged with the external decoder collaborator.
/// Distinct from [`PipelineError`]: most of these are handled inside the
/// decode loop and never become a `PipelineError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderStatus {
    Ok,
    MoreData,
    MoreSurface,
    DeviceBusy,
    NotEnoughBuffer,
    VideoParamChanged,
    IncompatibleVideoParam,
    PartialAcceleration,
    Unsupported,
}

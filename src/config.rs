// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Pipeline configuration.
//!
//! `Config` is frozen once `Pipeline::init` has run: every field is read
//! copiously from multiple threads afterwards (the post-process worker,
//! the worker pool, the controller), so there is no `Mutex` around it and
//! no setter past construction. Build one with [`ConfigBuilder`].

use crate::error::{PipelineError, Result};

/// Which of the four supported codecs a `Config` accepts at probe time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnabledCodecs {
    pub h264: bool,
    pub mpeg2: bool,
    pub vc1: bool,
    pub wmv9: bool,
}

impl Default for EnabledCodecs {
    fn default() -> Self {
        Self { h264: true, mpeg2: true, vc1: true, wmv9: true }
    }
}

/// The three sub-flags gated by `enable_multithreading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MultithreadingFlags {
    /// Post-process runs on the worker thread; required by `mt_decode`.
    pub mt_processing: bool,
    /// Decoder sync completion runs on the worker thread.
    pub mt_decode: bool,
    /// Plane copy dispatches through the worker pool.
    pub mt_copy: bool,
}

/// Frozen pipeline configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub enabled_codecs: EnabledCodecs,
    pub output_queue_length: usize,
    pub enable_multithreading: bool,
    pub mt: MultithreadingFlags,
    pub enable_time_stamp_correction: bool,
    pub enable_dvd_decoding: bool,
    pub mod16_width: bool,
    pub enable_d3d11: bool,
    pub enable_sw_emulation: bool,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Whether `enable_mt_processing` is actually in effect, folding in the
    /// master switch gating the three sub-flags.
    pub fn mt_processing_enabled(&self) -> bool {
        self.enable_multithreading && self.mt.mt_processing
    }

    pub fn mt_decode_enabled(&self) -> bool {
        self.enable_multithreading && self.mt.mt_decode
    }

    pub fn mt_copy_enabled(&self) -> bool {
        self.enable_multithreading && self.mt.mt_copy
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled_codecs: EnabledCodecs::default(),
            output_queue_length: 4,
            enable_multithreading: true,
            mt: MultithreadingFlags { mt_processing: true, mt_decode: true, mt_copy: true },
            enable_time_stamp_correction: true,
            enable_dvd_decoding: false,
            mod16_width: false,
            enable_d3d11: false,
            enable_sw_emulation: false,
        }
    }
}

/// Builder for [`Config`], validated on [`ConfigBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn enabled_codecs(mut self, codecs: EnabledCodecs) -> Self {
        self.config.enabled_codecs = codecs;
        self
    }

    pub fn output_queue_length(mut self, len: usize) -> Self {
        self.config.output_queue_length = len;
        self
    }

    pub fn enable_multithreading(mut self, enabled: bool) -> Self {
        self.config.enable_multithreading = enabled;
        self
    }

    pub fn mt_processing(mut self, enabled: bool) -> Self {
        self.config.mt.mt_processing = enabled;
        self
    }

    pub fn mt_decode(mut self, enabled: bool) -> Self {
        self.config.mt.mt_decode = enabled;
        self
    }

    pub fn mt_copy(mut self, enabled: bool) -> Self {
        self.config.mt.mt_copy = enabled;
        self
    }

    pub fn enable_time_stamp_correction(mut self, enabled: bool) -> Self {
        self.config.enable_time_stamp_correction = enabled;
        self
    }

    pub fn enable_dvd_decoding(mut self, enabled: bool) -> Self {
        self.config.enable_dvd_decoding = enabled;
        self
    }

    pub fn mod16_width(mut self, enabled: bool) -> Self {
        self.config.mod16_width = enabled;
        self
    }

    pub fn enable_d3d11(mut self, enabled: bool) -> Self {
        self.config.enable_d3d11 = enabled;
        self
    }

    pub fn enable_sw_emulation(mut self, enabled: bool) -> Self {
        self.config.enable_sw_emulation = enabled;
        self
    }

    /// Validates and freezes the configuration.
    ///
    /// `mt_decode` without `mt_processing` is rejected: decode completion
    /// running off the worker thread is meaningless unless post-process
    /// does too. A zero-length reorder queue is a pass-through mode and is
    /// only valid without timestamp correction, since timestamp correction
    /// needs somewhere to hold frames while it resolves their order.
    pub fn build(self) -> Result<Config> {
        let c = self.config;

        if c.output_queue_length == 0 && c.enable_time_stamp_correction {
            return Err(PipelineError::InvalidConfig(
                "output_queue_length of 0 requires enable_time_stamp_correction to be disabled".into(),
            ));
        }

        if c.mt.mt_decode && !c.mt.mt_processing {
            return Err(PipelineError::InvalidConfig(
                "enable_mt_decode requires enable_mt_processing".into(),
            ));
        }

        let any_codec = c.enabled_codecs.h264
            || c.enabled_codecs.mpeg2
            || c.enabled_codecs.vc1
            || c.enabled_codecs.wmv9;
        if !any_codec {
            return Err(PipelineError::InvalidConfig("no codec enabled".into()));
        }

        Ok(c)
    }
}

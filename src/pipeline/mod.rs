// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The end-to-end Decode/Flush/Seek state machine.

pub mod controller;

pub use controller::{PipelineController, PipelineState};

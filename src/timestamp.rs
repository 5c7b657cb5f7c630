// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Timestamp manager: frame-rate estimation, inverse-telecine detection and
//! presentation-timestamp derivation.
//!
//! Grounded directly on `original_source/TimeManager.{h,cpp}`
//! (`CDecTimeManager`). All timestamps here are reference-time ticks
//! (100 ns units, [`REFERENCE_TIME_FREQUENCY`] per second), matching the
//! consumer callback's "start and stop presentation times in 100 ns units"
//! — the same unit `CDecTimeManager` operates in via
//! `CRefTime`.

use crate::surface::INVALID_TIMESTAMP;

/// Reference-time ticks per second (100 ns units).
pub const REFERENCE_TIME_FREQUENCY: i64 = 10_000_000;

/// Canonical NTSC frame rates the manager snaps to.
pub const NTSC_2997: f64 = 30000.0 / 1001.0;
pub const NTSC_23976: f64 = 24000.0 / 1001.0;

/// Consecutive-delta agreement tolerance for [`TimestampManager::recompute_frame_rate`],
/// 1.2 ms in 100 ns ticks (`TimeManager.cpp::CalcCurrentFrameRate`).
const DELTA_AGREEMENT_TICKS: i64 = 12_000;

/// Tolerance for consuming the reorder-set head opportunistically, 2.5 ms
/// in 100 ns ticks.
const REORDER_CONSUME_TOLERANCE_TICKS: i64 = 25_000;

fn is_monotonic(timestamps: &[i64]) -> bool {
    timestamps.windows(2).all(|w| w[1] >= w[0])
}

fn insert_sorted(set: &mut Vec<i64>, value: i64) {
    let pos = set.partition_point(|&x| x < value);
    set.insert(pos, value);
}

/// Produces a monotonic, non-negative presentation-time stream from
/// decoder-emitted timestamps.
pub struct TimestampManager {
    frame_rate: f64,
    frame_rate_valid: bool,
    is_pts: bool,
    ivtc_active: bool,
    frames_since_doubling: u32,
    prev_start: Option<i64>,
    /// Ordered multiset of pending decoder timestamps.
    reorder: Vec<i64>,
    segment_started: bool,
    output_queue_length: usize,
}

impl TimestampManager {
    pub fn new(output_queue_length: usize) -> Self {
        Self {
            frame_rate: 0.0,
            frame_rate_valid: false,
            is_pts: true,
            ivtc_active: false,
            frames_since_doubling: 0,
            prev_start: None,
            reorder: Vec::with_capacity(output_queue_length + 1),
            segment_started: false,
            output_queue_length,
        }
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn is_ivtc_active(&self) -> bool {
        self.ivtc_active
    }

    pub fn reorder_set_len(&self) -> usize {
        self.reorder.len()
    }

    /// Resets all per-stream state, as done on flush.
    pub fn reset(&mut self) {
        self.frame_rate = 0.0;
        self.frame_rate_valid = false;
        self.is_pts = true;
        self.ivtc_active = false;
        self.frames_since_doubling = 0;
        self.prev_start = None;
        self.reorder.clear();
        self.segment_started = false;
    }

    /// Derives the initial frame rate once at least 8 distinct timestamps
    /// have been observed.
    pub fn derive_initial_frame_rate(
        &mut self,
        declared_rate: f64,
        observed_timestamps: &[i64],
        progressive: bool,
    ) {
        if observed_timestamps.len() < 8 {
            return;
        }

        self.is_pts = is_monotonic(observed_timestamps);

        let mut distinct: Vec<i64> =
            observed_timestamps.iter().copied().filter(|&t| t != INVALID_TIMESTAMP).collect();
        distinct.sort_unstable();
        distinct.dedup();

        if distinct.len() < 2 {
            return;
        }

        let span = (*distinct.last().unwrap() - *distinct.first().unwrap()) as f64;
        if span <= 0.0 {
            return;
        }
        let avg_rate = REFERENCE_TIME_FREQUENCY as f64 * (distinct.len() as f64 - 1.0) / span;

        self.frame_rate = if declared_rate > 0.0 {
            if !progressive && (declared_rate / avg_rate - 2.0).abs() < 0.2 {
                // Field-doubled stream: declared rate is ~2x the empirical
                // field rate, so halve it.
                declared_rate / 2.0
            } else {
                declared_rate
            }
        } else if self.is_pts {
            0.0
        } else {
            avg_rate
        };
        self.frame_rate_valid = true;
    }

    /// Replaces the frame rate on a video-params-changed event and leaves
    /// IVTC.
    pub fn on_video_params_changed(&mut self, new_declared_rate: f64) {
        self.frame_rate = new_declared_rate;
        self.frame_rate_valid = new_declared_rate > 0.0;
        self.ivtc_active = false;
    }

    /// Adjusts the running rate, compensating `prev_start` so the next
    /// emitted timestamp doesn't jump (`TimeManager.cpp::FixFrameRate`:
    /// "skip if diff<0.001, adjust m_rtPrevStart proportionally").
    fn fix_frame_rate(&mut self, new_rate: f64) {
        if (self.frame_rate - new_rate).abs() < 0.001 {
            return;
        }
        if let (Some(prev), true) = (self.prev_start, self.frame_rate > 0.0) {
            let ratio = new_rate / self.frame_rate;
            self.prev_start = Some((prev as f64 * ratio) as i64);
        }
        self.frame_rate = new_rate;
    }

    fn enter_ivtc(&mut self) {
        if !self.ivtc_active {
            self.ivtc_active = true;
            self.fix_frame_rate(NTSC_23976);
        }
    }

    fn exit_ivtc(&mut self) {
        if self.ivtc_active {
            self.ivtc_active = false;
            self.fix_frame_rate(NTSC_2997);
        }
    }

    /// Registers a valid decoder timestamp as pending presentation.
    pub fn add_output_timestamp(&mut self, timestamp: i64) {
        if timestamp != INVALID_TIMESTAMP {
            insert_sorted(&mut self.reorder, timestamp);
        }
    }

    fn remove_from_reorder(&mut self, value: i64) {
        if let Some(pos) = self.reorder.iter().position(|&x| x == value) {
            self.reorder.remove(pos);
        }
    }

    fn pop_min_from_reorder(&mut self) -> Option<i64> {
        if self.reorder.is_empty() {
            None
        } else {
            Some(self.reorder.remove(0))
        }
    }

    /// The current per-frame presentation interval in reference-time ticks,
    /// `0` when the frame rate is not yet known (callers use this to derive
    /// a frame's stop time from its start time).
    pub fn frame_interval_ticks(&self) -> i64 {
        self.interval_ticks()
    }

    fn interval_ticks(&self) -> i64 {
        if self.frame_rate > 0.0 {
            (REFERENCE_TIME_FREQUENCY as f64 / self.frame_rate) as i64
        } else {
            0
        }
    }

    /// Derives the presentation start time for one decoded surface.
    /// Returns `None` when the surface should be dropped (invalid/negative
    /// time; not an error).
    pub fn get_sample_timestamp(&mut self, decoder_time: i64, field_repeated: bool) -> Option<i64> {
        self.frames_since_doubling += 1;
        if field_repeated {
            self.frames_since_doubling = 0;
            self.enter_ivtc();
        }
        if self.frames_since_doubling > 1 && self.ivtc_active {
            self.exit_ivtc();
        }

        let has_valid_decoder_time = decoder_time != INVALID_TIMESTAMP;

        let result = if !self.segment_started {
            self.segment_started = true;
            match (self.is_pts, has_valid_decoder_time) {
                (true, true) => {
                    self.remove_from_reorder(decoder_time);
                    Some(decoder_time)
                }
                (true, false) => {
                    let frames_ahead = self.reorder.len() as i64;
                    self.reorder.first().copied().map(|min| min - frames_ahead * self.interval_ticks())
                }
                (false, _) => self.pop_min_from_reorder(),
            }
        } else if self.frame_rate > 0.0 || !has_valid_decoder_time {
            let prev = self.prev_start.unwrap_or(0);
            let rt_start = prev + self.interval_ticks();
            if let Some(&head) = self.reorder.first() {
                if (head - rt_start).abs() < REORDER_CONSUME_TOLERANCE_TICKS {
                    self.reorder.remove(0);
                }
            }
            Some(rt_start)
        } else {
            self.pop_min_from_reorder()
        };

        if let Some(start) = result {
            self.prev_start = Some(start);
        }

        self.periodic_recompute();
        result
    }

    /// Periodically recomputes the empirical rate from the reorder set and
    /// snaps to canonical NTSC rates when close, with thresholds from
    /// `TimeManager.cpp::CalcCurrentFrameRate`.
    fn periodic_recompute(&mut self) {
        if self.reorder.len() < 4 {
            return;
        }

        let deltas: Vec<i64> = self.reorder.windows(2).map(|w| w[1] - w[0]).collect();
        let first = deltas[0];
        if first <= 0 {
            return;
        }
        let agree = deltas.iter().all(|d| (d - first).abs() <= DELTA_AGREEMENT_TICKS);
        if !agree {
            return;
        }

        let measured_rate = REFERENCE_TIME_FREQUENCY as f64 / first as f64;
        let in_ntsc_band = (59.93..=59.95).contains(&self.frame_rate)
            || (29.96..=29.98).contains(&self.frame_rate)
            || (23.96..=23.98).contains(&self.frame_rate);

        let new_rate = if in_ntsc_band {
            if (28.0..=32.0).contains(&measured_rate) {
                NTSC_2997
            } else if (22.0..=26.0).contains(&measured_rate) {
                NTSC_23976
            } else {
                measured_rate.round()
            }
        } else {
            measured_rate.round()
        };

        self.fix_frame_rate(new_rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ivtc_entry_and_exit_on_field_doubling_counter() {
        let mut mgr = TimestampManager::new(4);
        mgr.frame_rate = NTSC_2997;
        mgr.frame_rate_valid = true;

        // surfaces #1..#3: ordinary, no IVTC.
        for _ in 0..3 {
            mgr.get_sample_timestamp(INVALID_TIMESTAMP, false);
        }
        assert!(!mgr.is_ivtc_active());

        // surface #4: field-repeated -> enters IVTC.
        mgr.get_sample_timestamp(INVALID_TIMESTAMP, true);
        assert!(mgr.is_ivtc_active());
        assert!((mgr.frame_rate() - NTSC_23976).abs() < 1e-6);

        // surface #5: no flag, counter == 1, stays in IVTC.
        mgr.get_sample_timestamp(INVALID_TIMESTAMP, false);
        assert!(mgr.is_ivtc_active());

        // surface #6: no flag, counter == 2 > 1, leaves IVTC.
        mgr.get_sample_timestamp(INVALID_TIMESTAMP, false);
        assert!(!mgr.is_ivtc_active());
        assert!((mgr.frame_rate() - NTSC_2997).abs() < 1e-6);
    }

    #[test]
    fn all_invalid_inputs_drop_every_frame() {
        let mut mgr = TimestampManager::new(4);
        mgr.is_pts = false; // DTS case: relies on reorder set, which stays empty.
        for _ in 0..10 {
            assert_eq!(mgr.get_sample_timestamp(INVALID_TIMESTAMP, false), None);
        }
    }

    #[test]
    fn pts_stream_emits_and_drains_reorder_set() {
        let mut mgr = TimestampManager::new(0);
        mgr.is_pts = true;
        mgr.add_output_timestamp(0);
        assert_eq!(mgr.get_sample_timestamp(0, false), Some(0));
        assert_eq!(mgr.reorder_set_len(), 0);
    }

    #[test]
    fn emitted_sequence_is_non_decreasing() {
        let mut mgr = TimestampManager::new(0);
        mgr.frame_rate = 25.0;
        mgr.frame_rate_valid = true;
        mgr.is_pts = true;

        let mut prev = None;
        for ts in [0i64, 400_000, 800_000, 1_200_000] {
            mgr.add_output_timestamp(ts);
        }
        for ts in [0i64, 400_000, 800_000, 1_200_000] {
            let start = mgr.get_sample_timestamp(ts, false).unwrap();
            if let Some(p) = prev {
                assert!(start >= p);
            }
            prev = Some(start);
        }
    }

    #[test]
    fn on_video_params_changed_leaves_ivtc() {
        let mut mgr = TimestampManager::new(4);
        mgr.ivtc_active = true;
        mgr.frame_rate = NTSC_23976;
        mgr.on_video_params_changed(30.0);
        assert!(!mgr.is_ivtc_active());
        assert_eq!(mgr.frame_rate(), 30.0);
    }

    #[test]
    fn reset_clears_all_state() {
        let mut mgr = TimestampManager::new(4);
        mgr.add_output_timestamp(100);
        mgr.get_sample_timestamp(100, false);
        mgr.reset();
        assert_eq!(mgr.reorder_set_len(), 0);
        assert_eq!(mgr.frame_rate(), 0.0);
        assert!(!mgr.is_ivtc_active());
    }
}

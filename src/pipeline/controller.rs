// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! [`PipelineController`]: the Decode/Flush/Seek state machine
//! that wires every other module together.
//!
//! Grounded on the original `CDecoderFilter`'s main decode loop
//! (`DecoderFilter.cpp`): pull a sample in, construct a bitstream fragment,
//! find a free surface, submit it to the decoder, wait for the sync point,
//! post-process into a deliverable frame and queue it for the consumer.
//! The decoder's fatal/recoverable status split is resolved entirely inside
//! this loop; only genuinely fatal conditions become a [`PipelineError`].
//!
//! Post-processing runs off the critical path when multithreaded
//! processing is enabled: as soon as the decoder hands back a completed
//! surface, `decode` reserves an output frame buffer for it (synchronously,
//! on the calling thread, so FreePool exhaustion is reported from `decode`
//! itself regardless of threading) and hands both off to a bounded
//! `DecodedQueue`. A long-running worker thread drains that queue, does
//! the actual plane copy, and pushes the result to the `ProcessedQueue`
//! that `take_delivered_frame` reads from.
//!
//! `begin_flush`/`end_flush` are plain atomic flags so a caller can
//! interrupt a blocked `decode` from another thread without taking the
//! controller's `&mut self`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::bitstream::{construct_frame, BitstreamConstructor, BitstreamState, ConstructError, Sample};
use crate::config::Config;
use crate::decoder::{DecoderExt, SyncPoint, VideoParams};
use crate::error::{DecoderStatus, PipelineError, Result};
use crate::frame::{FrameBuffer, FrameBufferPool};
use crate::queue::BoundedQueue;
use crate::surface::{
    AllocationRequest, AllocationResponse, AllocationType, MemoryId, OutputSurfaceQueue,
    PictureStructure, SurfaceAllocator, SurfaceHandle, SurfacePool,
};
use crate::timestamp::TimestampManager;
use crate::workerpool::{self, WorkerPool};
use crate::{align_up, AspectRatio, Resolution};

/// How long a checkout/delivery wait blocks before giving up.
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(250);

/// Bounded retries for a `MoreSurface`/`DeviceBusy` decoder status before
/// treating it as a failure: a bounded number of retries, not an unbounded
/// spin.
const TRANSIENT_RETRY_LIMIT: usize = 8;
const TRANSIENT_RETRY_SLEEP: Duration = Duration::from_millis(2);

/// Capacity of the decoded-surface queue feeding the post-process worker.
/// Comfortably larger than the frame-buffer pool itself, since every entry
/// already holds a checked-out buffer: the queue is never the limiting
/// resource.
const DECODED_QUEUE_CAPACITY: usize = 16;

/// Slice used when polling `needs_flush` during an otherwise-blocking wait,
/// so a flush request is never held up for longer than one slice.
const FLUSH_POLL_SLICE: Duration = Duration::from_millis(20);

/// Coarse pipeline lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialised,
    Ready,
    Flushing,
    /// Between `flush` completing and the decoder's reference state being
    /// reset, on the way to satisfying a seek.
    NeedsSeek,
    Shutdown,
}

fn codec_enabled(config: &Config, codec: crate::capabilities::Codec) -> bool {
    use crate::capabilities::Codec::*;
    match codec {
        H264 => config.enabled_codecs.h264,
        Mpeg2 => config.enabled_codecs.mpeg2,
        Vc1 => config.enabled_codecs.vc1,
        Wmv9 => config.enabled_codecs.wmv9,
    }
}

/// Everything the controller thread and the background decode-completion
/// and post-process threads need to share, built once by `init`.
struct Shared {
    config: Config,
    decoder: Mutex<Box<dyn DecoderExt>>,
    allocator: Arc<dyn SurfaceAllocator>,
    worker_pool: Arc<WorkerPool>,
    surface_pool: SurfacePool,
    surface_memory: AllocationResponse,
    frame_pool: FrameBufferPool,
    timestamp_mgr: Mutex<TimestampManager>,
    /// Surfaces currently submitted to the decoder and not yet delivered:
    /// never freed while listed here.
    in_flight: Mutex<OutputSurfaceQueue>,
    /// Sample timestamp recorded at submission time, keyed by surface
    /// handle, consumed once the decoder hands the surface back. Stands in
    /// for real hardware decoders that tag the surface with the sample's
    /// timestamp themselves; [`DecoderExt::describe_surface`] is consulted
    /// first and takes priority when it returns one.
    pending_timestamps: Mutex<HashMap<usize, i64>>,
    /// DecodedQueue: surfaces paired with their already-reserved output
    /// buffer, waiting for the post-process worker to copy into it. `None`
    /// is the shutdown terminator.
    decoded: BoundedQueue<Option<(SurfaceHandle, Box<FrameBuffer>)>>,
    /// ProcessedQueue: frame buffers ready for `take_delivered_frame`.
    processed: BoundedQueue<Box<FrameBuffer>>,
    /// Set/cleared only by `begin_flush`/`end_flush`; `decode` checks it to
    /// silently no-op while a flush is outstanding.
    flushing: AtomicBool,
    /// Set whenever a flush or seek is owed; every blocking wait downstream
    /// of `decode` polls it and bails out early.
    needs_flush: AtomicBool,
}

/// Drives one decode instance end to end: bitstream construction, surface
/// acquisition, the decoder collaborator, timestamp assignment, plane
/// copy, and delivery.
pub struct PipelineController {
    config: Config,
    decoder_preinit: Option<Box<dyn DecoderExt>>,
    allocator: Arc<dyn SurfaceAllocator>,
    worker_pool: Arc<WorkerPool>,
    bitstream: BitstreamConstructor,
    bitstream_state: BitstreamState,
    state: PipelineState,
    video_params: Option<VideoParams>,
    shared: Option<Arc<Shared>>,
    postprocess_worker: Option<std::thread::JoinHandle<()>>,
}

impl PipelineController {
    pub fn new(config: Config, decoder: Box<dyn DecoderExt>, allocator: Arc<dyn SurfaceAllocator>, bitstream: BitstreamConstructor) -> Self {
        Self {
            worker_pool: workerpool::acquire(),
            config,
            decoder_preinit: Some(decoder),
            allocator,
            bitstream,
            bitstream_state: BitstreamState::new(),
            state: PipelineState::Uninitialised,
            video_params: None,
            shared: None,
            postprocess_worker: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Initialises the decoder against `media_type`, sizes and allocates
    /// the surface pool and frame-buffer pool, and spawns the post-process
    /// worker thread when multithreaded processing is enabled.
    pub fn init(&mut self, media_type: VideoParams) -> Result<()> {
        if self.state != PipelineState::Uninitialised {
            return Err(PipelineError::InstanceInvalid);
        }

        if !codec_enabled(&self.config, media_type.codec) {
            return Err(PipelineError::Unsupported(format!("{:?} is disabled", media_type.codec)));
        }

        let mut decoder = self.decoder_preinit.take().ok_or(PipelineError::InstanceInvalid)?;
        let status = decoder.init(&media_type);
        if status != DecoderStatus::Ok {
            self.decoder_preinit = Some(decoder);
            return Err(PipelineError::DeviceFailed(format!("decoder init returned {status:?}")));
        }

        let request = decoder.query_io_surf();
        let mut size = Resolution { width: request.width, height: request.height };
        if self.config.mod16_width {
            size = size.round_up_mod16();
        }
        let pitch = align_up(size.width as usize, 32) as u32;

        let surface_count =
            request.suggested_count + self.config.output_queue_length + SurfacePool::AUX_SLACK;

        let alloc_request =
            AllocationRequest { kind: AllocationType::DecodeTarget, count: surface_count, size };
        let response = self.allocator.alloc(alloc_request)?;

        info!(
            "pipeline init: {surface_count} surfaces at {}x{} (pitch {pitch}) for {:?}",
            size.width, size.height, media_type.codec
        );

        // FreePool/ProcessedQueue capacity mirrors the surface pool's own
        // sizing rationale: a flush drain can hand back up to
        // `output_queue_length` more surfaces on top of whatever is still
        // working its way through post-processing, so the same aux slack
        // applies here.
        let output_capacity = self.config.output_queue_length + SurfacePool::AUX_SLACK;
        let surface_pool = SurfacePool::new(surface_count, size.width, size.height, pitch);
        let frame_pool =
            FrameBufferPool::new(output_capacity, pitch, media_type.crop_width, media_type.crop_height);
        let mut timestamp_mgr = TimestampManager::new(self.config.output_queue_length);
        timestamp_mgr.on_video_params_changed(media_type.declared_frame_rate);

        let shared = Arc::new(Shared {
            config: self.config.clone(),
            decoder: Mutex::new(decoder),
            allocator: self.allocator.clone(),
            worker_pool: self.worker_pool.clone(),
            surface_pool,
            surface_memory: response,
            frame_pool,
            timestamp_mgr: Mutex::new(timestamp_mgr),
            in_flight: Mutex::new(OutputSurfaceQueue::new()),
            pending_timestamps: Mutex::new(HashMap::new()),
            decoded: BoundedQueue::new(DECODED_QUEUE_CAPACITY),
            processed: BoundedQueue::new(output_capacity),
            flushing: AtomicBool::new(false),
            needs_flush: AtomicBool::new(false),
        });

        if shared.config.mt_processing_enabled() {
            let worker_shared = shared.clone();
            self.postprocess_worker =
                Some(std::thread::spawn(move || postprocess_worker_loop(worker_shared)));
        }

        self.shared = Some(shared);
        self.video_params = Some(media_type);
        self.state = PipelineState::Ready;
        Ok(())
    }

    /// Submits one access unit for decode: construct the bitstream
    /// fragment, acquire a free surface, submit it, and if the decoder
    /// hands a completed surface back, reserve its output frame buffer
    /// synchronously (so pool exhaustion is reported from here regardless
    /// of multithreading) before waiting for the sync point — inline, or
    /// on a background thread when `mt_decode` is enabled.
    pub fn decode(&mut self, sample: Sample) -> Result<()> {
        if self.state != PipelineState::Ready {
            return Err(PipelineError::InstanceInvalid);
        }
        let shared = self.shared.clone().ok_or(PipelineError::InstanceInvalid)?;

        if shared.flushing.load(Ordering::Acquire) {
            return Ok(());
        }
        if shared.needs_flush.swap(false, Ordering::AcqRel) {
            self.on_seek(0)?;
        }

        let bytes = match construct_frame(
            self.bitstream,
            &mut self.bitstream_state,
            &sample,
            self.config.enable_dvd_decoding,
        ) {
            Ok(bytes) => bytes,
            Err(ConstructError::MoreDataNeeded) => return Ok(()),
            Err(ConstructError::Fatal(reason)) => {
                warn!("bitstream construction failed: {reason}");
                return Err(PipelineError::DecodeFailed);
            }
        };

        let handle = {
            let in_flight = shared.in_flight.lock();
            shared.surface_pool.find_free_surface(&in_flight)?
        };
        shared.surface_pool.lock_for_decode(handle);
        shared.in_flight.lock().push(handle);
        if let Some(start_time) = sample.start_time {
            shared.pending_timestamps.lock().insert(handle.0, start_time);
            shared.timestamp_mgr.lock().add_output_timestamp(start_time);
        }

        let (out_surface, sync_point) =
            match submit_with_retries(&shared, Some(&bytes), handle, &mut self.video_params)? {
                Some(result) => result,
                None => {
                    // Decoder wants more data before it can act; release the
                    // surface we speculatively locked.
                    release_surface(&shared, handle);
                    return Ok(());
                }
            };

        let pending_output = match out_surface {
            Some(ready) => reserve_output_frame(&shared, ready)?.map(|buffer| (ready, buffer)),
            None => None,
        };

        let Some(sync) = sync_point else {
            if let Some((ready, buffer)) = pending_output {
                finish_decoded_frame(&shared, ready, buffer)?;
            }
            return Ok(());
        };

        if shared.config.mt_decode_enabled() {
            spawn_completion_wait(shared, sync, handle, pending_output);
            return Ok(());
        }

        let status = shared.decoder.lock().sync_operation(sync, DEFAULT_TIMEOUT);
        if status != DecoderStatus::Ok {
            release_surface(&shared, handle);
            abandon_pending_output(&shared, pending_output);
            return Err(PipelineError::DecodeFailed);
        }

        if let Some((ready, buffer)) = pending_output {
            finish_decoded_frame(&shared, ready, buffer)?;
        }
        Ok(())
    }

    /// Waits up to `timeout` for the next delivered frame.
    pub fn take_delivered_frame(&self, timeout: Duration) -> Option<Box<FrameBuffer>> {
        self.shared.as_ref()?.processed.pop_front(timeout)
    }

    /// Returns a consumed frame buffer to the free pool.
    pub fn release_frame(&self, buffer: Box<FrameBuffer>) {
        if let Some(shared) = &self.shared {
            if !shared.frame_pool.checkin(buffer, DEFAULT_TIMEOUT) {
                warn!("frame buffer pool full on release; buffer dropped");
            }
        }
    }

    /// Drains the decoder's internal reference state, delivering any
    /// surfaces it still holds when `deliver_remaining` is set.
    pub fn flush(&mut self, deliver_remaining: bool) -> Result<()> {
        if self.state == PipelineState::Flushing {
            return Ok(());
        }
        if self.state != PipelineState::Ready {
            return Err(PipelineError::InstanceInvalid);
        }
        let shared = self.shared.clone().ok_or(PipelineError::InstanceInvalid)?;

        self.state = PipelineState::Flushing;
        if !deliver_remaining {
            shared.needs_flush.store(true, Ordering::Release);
        }

        // Wakes anyone currently blocked on these queues so they don't wait
        // out a full timeout for something that isn't coming right now;
        // immediately un-gates them again so frames drained below (when
        // `deliver_remaining` is set) can still be queued normally.
        shared.processed.interrupt();
        shared.processed.reset_interrupt();
        shared.decoded.interrupt();
        shared.decoded.reset_interrupt();

        loop {
            let (status, out_surface, sync_point) =
                shared.decoder.lock().decode_frame_async(None, SurfaceHandle(0));
            if status != DecoderStatus::Ok && status != DecoderStatus::PartialAcceleration {
                break;
            }
            let Some(handle) = out_surface else { break };
            if let Some(sync) = sync_point {
                let _ = shared.decoder.lock().sync_operation(sync, DEFAULT_TIMEOUT);
            }
            if deliver_remaining {
                if let Some(buffer) = reserve_output_frame(&shared, handle)? {
                    finish_decoded_frame(&shared, handle, buffer)?;
                }
            } else {
                release_surface(&shared, handle);
            }
        }

        shared.timestamp_mgr.lock().reset();
        self.bitstream_state.start_new_segment();
        shared.in_flight.lock().clear();
        shared.needs_flush.store(false, Ordering::Release);
        self.state = PipelineState::Ready;
        Ok(())
    }

    /// Flushes without delivering stale references and resets the
    /// decoder's reference-frame state for the new position.
    pub fn on_seek(&mut self, _start_time: i64) -> Result<()> {
        self.flush(false)?;
        self.state = PipelineState::NeedsSeek;

        let shared = self.shared.clone().ok_or(PipelineError::InstanceInvalid)?;
        let params = self.video_params.ok_or(PipelineError::InstanceInvalid)?;
        let status = shared.decoder.lock().reset(&params);
        if status != DecoderStatus::Ok {
            return Err(PipelineError::DeviceFailed(format!("decoder reset returned {status:?}")));
        }

        self.state = PipelineState::Ready;
        Ok(())
    }

    /// Flips the asynchronous flush flags only: `flushing` so `decode`
    /// becomes a silent no-op, and `needs_flush` so every blocked wait
    /// downstream of it bails out early. Does not touch any queue and
    /// never blocks, so it is safe to call from another thread while a
    /// `decode` call is in flight.
    pub fn begin_flush(&self) -> Result<()> {
        let shared = self.shared.as_ref().ok_or(PipelineError::InstanceInvalid)?;
        shared.needs_flush.store(true, Ordering::Release);
        shared.flushing.store(true, Ordering::Release);
        Ok(())
    }

    /// Clears `flushing`, allowing `decode` to resume. `needs_flush` is
    /// left set; the next `decode` call observes it and performs an
    /// implicit `on_seek(0)` before proceeding.
    pub fn end_flush(&self) -> Result<()> {
        let shared = self.shared.as_ref().ok_or(PipelineError::InstanceInvalid)?;
        shared.flushing.store(false, Ordering::Release);
        Ok(())
    }

    /// Tears the instance down: no further operations are valid afterwards.
    pub fn shutdown(&mut self) -> Result<()> {
        if let Some(shared) = self.shared.take() {
            shared.needs_flush.store(true, Ordering::Release);
            shared.processed.interrupt();
            shared.decoded.push_back(None, DEFAULT_TIMEOUT);
            if let Some(worker) = self.postprocess_worker.take() {
                let _ = worker.join();
            }
            self.allocator.free(shared.surface_memory);
        }
        self.state = PipelineState::Shutdown;
        Ok(())
    }
}

/// Calls `decode_frame_async`, retrying `MoreSurface`/`DeviceBusy`
/// statuses up to [`TRANSIENT_RETRY_LIMIT`] times, absorbing
/// `VideoParamChanged` by re-deriving params, and mapping every other
/// status onto [`PipelineError`]. Returns `Ok(None)` for the `MoreData`
/// status (non-fatal, nothing to submit yet).
fn submit_with_retries(
    shared: &Shared,
    bitstream: Option<&[u8]>,
    handle: SurfaceHandle,
    video_params: &mut Option<VideoParams>,
) -> Result<Option<(Option<SurfaceHandle>, Option<SyncPoint>)>> {
    for attempt in 0..=TRANSIENT_RETRY_LIMIT {
        let (status, out_surface, sync_point) = shared.decoder.lock().decode_frame_async(bitstream, handle);
        match status {
            DecoderStatus::Ok | DecoderStatus::PartialAcceleration => {
                return Ok(Some((out_surface, sync_point)))
            }
            DecoderStatus::MoreData => return Ok(None),
            DecoderStatus::MoreSurface | DecoderStatus::DeviceBusy => {
                if attempt == TRANSIENT_RETRY_LIMIT {
                    return Err(PipelineError::NotEnoughBuffer);
                }
                debug!("decode_frame_async returned {status:?}, retry {attempt}");
                std::thread::sleep(TRANSIENT_RETRY_SLEEP);
            }
            DecoderStatus::VideoParamChanged => {
                let new_params = shared.decoder.lock().get_video_params();
                shared.timestamp_mgr.lock().on_video_params_changed(new_params.declared_frame_rate);
                *video_params = Some(new_params);
            }
            DecoderStatus::IncompatibleVideoParam | DecoderStatus::Unsupported => {
                return Err(PipelineError::Unsupported(format!("{status:?}")));
            }
            DecoderStatus::NotEnoughBuffer => return Err(PipelineError::NotEnoughBuffer),
        }
    }
    Err(PipelineError::DecodeFailed)
}

fn release_surface(shared: &Shared, handle: SurfaceHandle) {
    shared.surface_pool.unlock_from_decode(handle);
    shared.in_flight.lock().remove(handle);
    shared.pending_timestamps.lock().remove(&handle.0);
}

/// Derives a presentation timestamp and checks out an output frame buffer
/// for `handle`, synchronously on the calling thread, so that FreePool
/// exhaustion surfaces as [`PipelineError::NotEnoughBuffer`] from wherever
/// this is called regardless of whether post-processing itself ends up
/// running on a worker thread. Only the metadata is filled in here; the
/// pixel copy happens later, in [`finish_decoded_frame`].
///
/// Returns `Ok(None)` when the frame should be silently dropped (no usable
/// timestamp yet, or a flush interrupted the wait) — not an error.
fn reserve_output_frame(shared: &Shared, handle: SurfaceHandle) -> Result<Option<Box<FrameBuffer>>> {
    let info = {
        let decoder = shared.decoder.lock();
        decoder.describe_surface(handle)
    }
    .unwrap_or_else(|| shared.surface_pool.get(handle).clone());

    let decoder_time = if info.timestamp != crate::surface::INVALID_TIMESTAMP {
        info.timestamp
    } else {
        shared.pending_timestamps.lock().get(&handle.0).copied().unwrap_or(crate::surface::INVALID_TIMESTAMP)
    };
    let field_repeated = matches!(info.structure, PictureStructure::FieldRepeated);
    let start_time = shared.timestamp_mgr.lock().get_sample_timestamp(decoder_time, field_repeated);

    let Some(start_time) = start_time else {
        release_surface(shared, handle);
        return Ok(None);
    };

    let Some(mut buffer) = checkout_frame_buffer(shared)? else {
        release_surface(shared, handle);
        return Ok(None);
    };

    let cropped = Resolution { width: info.crop.width.max(1), height: info.crop.height.max(1) };
    buffer.display_aspect_ratio =
        AspectRatio::from_pixel_aspect_ratio(AspectRatio { num: info.par_num, den: info.par_den }, cropped);
    buffer.structure = info.structure;
    buffer.start_time = start_time;
    buffer.stop_time = start_time + shared.timestamp_mgr.lock().frame_interval_ticks();
    buffer.read_only = shared.allocator.is_read_only();

    Ok(Some(buffer))
}

/// Block-acquires a free [`FrameBuffer`] from the free pool, polling
/// `needs_flush` in [`FLUSH_POLL_SLICE`] slices so a flush request is never
/// held up for longer than one slice. Distinguishes a flush interruption
/// (`Ok(None)`) from genuine pool exhaustion (`Err`).
fn checkout_frame_buffer(shared: &Shared) -> Result<Option<Box<FrameBuffer>>> {
    let deadline = Instant::now() + DEFAULT_TIMEOUT;
    loop {
        if shared.needs_flush.load(Ordering::Acquire) {
            return Ok(None);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(PipelineError::NotEnoughBuffer);
        }
        if let Some(buffer) = shared.frame_pool.checkout(remaining.min(FLUSH_POLL_SLICE)) {
            return Ok(Some(buffer));
        }
    }
}

/// Copies `handle`'s surface into `buffer` and queues the result for
/// delivery, either inline or by handing both off to the post-process
/// worker, depending on `mt_processing_enabled`.
fn finish_decoded_frame(shared: &Shared, handle: SurfaceHandle, mut buffer: Box<FrameBuffer>) -> Result<()> {
    if shared.config.mt_processing_enabled() {
        if !shared.decoded.push_back(Some((handle, buffer)), DEFAULT_TIMEOUT) {
            warn!("decoded queue full; dropping a decoded frame");
            release_surface(shared, handle);
        }
        return Ok(());
    }

    copy_surface_into_frame(shared, handle, &mut buffer)?;
    release_surface(shared, handle);
    // Non-blocking: a full ProcessedQueue drops the frame rather than
    // stalling the decode loop behind a slow or absent consumer.
    if !shared.processed.push_back(buffer, Duration::ZERO) {
        warn!("processed queue full; dropping a decoded frame");
    }
    Ok(())
}

/// Releases a reserved-but-unfinished output: the surface and, if a frame
/// buffer had already been checked out for it, the buffer too. Used when a
/// submission is abandoned after the sync point fails.
fn abandon_pending_output(shared: &Shared, pending_output: Option<(SurfaceHandle, Box<FrameBuffer>)>) {
    if let Some((ready, buffer)) = pending_output {
        release_surface(shared, ready);
        shared.frame_pool.checkin(buffer, DEFAULT_TIMEOUT);
    }
}

/// Copies a surface's planes into `buffer`, through the worker pool when
/// multithreaded copy is enabled. Applies the destination's page skew from
/// the just-locked source pointer first.
fn copy_surface_into_frame(shared: &Shared, handle: SurfaceHandle, buffer: &mut FrameBuffer) -> Result<()> {
    let memory_id = MemoryId::new(shared.surface_memory, handle.0);
    let planes = shared.allocator.lock(memory_id)?;

    buffer.apply_skew(planes.y_ptr);

    let y_len = buffer.y_plane().len();
    let uv_len = buffer.uv_plane().len();
    // SAFETY: planes.y_ptr/cbcr_ptr were sized by the allocator for at
    // least `pitch * height` (Y) and half that (interleaved UV) when
    // the surface pool was allocated with this same pitch/height.
    let (y_src, uv_src) = unsafe {
        (
            std::slice::from_raw_parts(planes.y_ptr, y_len),
            std::slice::from_raw_parts(planes.cbcr_ptr, uv_len),
        )
    };

    let use_streaming = shared.allocator.is_read_only();
    if shared.config.mt_copy_enabled() {
        crate::copy::mt_copy(&shared.worker_pool, buffer.y_plane_mut(), y_src, use_streaming);
        crate::copy::mt_copy(&shared.worker_pool, buffer.uv_plane_mut(), uv_src, use_streaming);
    } else if use_streaming {
        crate::copy::streaming_copy(buffer.y_plane_mut(), y_src);
        crate::copy::streaming_copy(buffer.uv_plane_mut(), uv_src);
    } else {
        crate::copy::regular_copy(buffer.y_plane_mut(), y_src);
        crate::copy::regular_copy(buffer.uv_plane_mut(), uv_src);
    }

    shared.allocator.unlock(memory_id);
    Ok(())
}

/// Waits for a decoder sync point off the caller's thread, then finishes
/// the submission the same way the synchronous path does. `handle` is the
/// surface just submitted, released on a sync failure; `pending_output`,
/// if present, is the already-reserved output for a (possibly different)
/// surface the decoder handed back alongside it.
fn spawn_completion_wait(
    shared: Arc<Shared>,
    sync: SyncPoint,
    handle: SurfaceHandle,
    pending_output: Option<(SurfaceHandle, Box<FrameBuffer>)>,
) {
    std::thread::spawn(move || {
        let status = shared.decoder.lock().sync_operation(sync, DEFAULT_TIMEOUT);
        if status != DecoderStatus::Ok {
            warn!("async decoder sync failed with {status:?}");
            release_surface(&shared, handle);
            abandon_pending_output(&shared, pending_output);
            return;
        }

        if let Some((ready, buffer)) = pending_output {
            if let Err(e) = finish_decoded_frame(&shared, ready, buffer) {
                warn!("post-process failed: {e}");
            }
        }
    });
}

/// Long-running post-process worker: drains DecodedQueue into
/// ProcessedQueue until it receives the `None` shutdown terminator.
fn postprocess_worker_loop(shared: Arc<Shared>) {
    loop {
        match shared.decoded.pop_front(Duration::from_millis(250)) {
            Some(Some((handle, mut buffer))) => {
                if let Err(e) = copy_surface_into_frame(&shared, handle, &mut buffer) {
                    warn!("post-process worker: {e}");
                    release_surface(&shared, handle);
                    shared.frame_pool.checkin(buffer, DEFAULT_TIMEOUT);
                    continue;
                }
                release_surface(&shared, handle);
                if !shared.processed.push_back(buffer, Duration::ZERO) {
                    warn!("processed queue full; dropping a decoded frame");
                }
            }
            Some(None) => break,
            None => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::BitstreamConstructor;
    use crate::capabilities::Codec;
    use crate::decoder::dummy::DummyDecoder;
    use crate::surface::SystemMemoryAllocator;

    fn params() -> VideoParams {
        VideoParams {
            codec: Codec::H264,
            coded_width: 64,
            coded_height: 64,
            crop_width: 64,
            crop_height: 64,
            par_num: 1,
            par_den: 1,
            declared_frame_rate: 25.0,
            progressive: true,
        }
    }

    fn controller(reorder_delay: usize) -> PipelineController {
        let decoder = Box::new(DummyDecoder::new(params(), reorder_delay));
        let allocator = Arc::new(SystemMemoryAllocator::new());
        PipelineController::new(Config::default(), decoder, allocator, BitstreamConstructor::Generic)
    }

    #[test]
    fn init_transitions_to_ready() {
        let mut pipeline = controller(0);
        assert_eq!(pipeline.state(), PipelineState::Uninitialised);
        pipeline.init(params()).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Ready);
    }

    #[test]
    fn decode_without_reorder_delivers_immediately() {
        let mut pipeline = controller(0);
        pipeline.init(params()).unwrap();

        pipeline.decode(Sample { data: &[1, 2, 3], start_time: Some(0) }).unwrap();
        let frame = pipeline.take_delivered_frame(Duration::from_millis(200));
        assert!(frame.is_some());
    }

    #[test]
    fn decode_rejected_before_init() {
        let mut pipeline = controller(0);
        let result = pipeline.decode(Sample { data: &[1], start_time: Some(0) });
        assert!(matches!(result, Err(PipelineError::InstanceInvalid)));
    }

    #[test]
    fn flush_drains_pending_reorder_and_returns_to_ready() {
        let mut pipeline = controller(2);
        pipeline.init(params()).unwrap();
        pipeline.decode(Sample { data: &[1], start_time: Some(0) }).unwrap();
        pipeline.decode(Sample { data: &[1], start_time: Some(1) }).unwrap();

        pipeline.flush(true).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Ready);
    }

    #[test]
    fn seek_resets_decoder_and_returns_to_ready() {
        let mut pipeline = controller(1);
        pipeline.init(params()).unwrap();
        pipeline.decode(Sample { data: &[1], start_time: Some(0) }).unwrap();
        pipeline.on_seek(0).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Ready);
    }

    #[test]
    fn shutdown_marks_instance_invalid_for_further_use() {
        let mut pipeline = controller(0);
        pipeline.init(params()).unwrap();
        pipeline.shutdown().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Shutdown);
    }

    #[test]
    fn disabled_codec_rejects_init() {
        let decoder = Box::new(DummyDecoder::new(params(), 0));
        let allocator = Arc::new(SystemMemoryAllocator::new());
        let config = Config::builder()
            .enabled_codecs(crate::config::EnabledCodecs {
                h264: false,
                mpeg2: true,
                vc1: true,
                wmv9: true,
            })
            .build()
            .unwrap();
        let mut pipeline =
            PipelineController::new(config, decoder, allocator, BitstreamConstructor::Generic);
        let result = pipeline.init(params());
        assert!(matches!(result, Err(PipelineError::Unsupported(_))));
    }

    #[test]
    fn begin_flush_makes_decode_return_silently() {
        let mut pipeline = controller(0);
        pipeline.init(params()).unwrap();
        pipeline.begin_flush().unwrap();

        let result = pipeline.decode(Sample { data: &[1, 2, 3], start_time: Some(0) });
        assert!(result.is_ok());
        assert!(pipeline.take_delivered_frame(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn end_flush_allows_decode_to_resume_via_implicit_seek() {
        let mut pipeline = controller(0);
        pipeline.init(params()).unwrap();
        pipeline.begin_flush().unwrap();
        pipeline.end_flush().unwrap();

        pipeline.decode(Sample { data: &[1, 2, 3], start_time: Some(0) }).unwrap();
        let frame = pipeline.take_delivered_frame(Duration::from_millis(200));
        assert!(frame.is_some());
        assert_eq!(pipeline.state(), PipelineState::Ready);
    }
}

//! Decode pipeline state machine.
//!
//! Per stream: `Uninitialized → WaitingForKeyframe → Streaming ⇄
//! ErrorRecovering`. Recovery is bounded: after enough consecutive decode
//! failures the codec is reset and the pipeline resynchronizes on the next
//! keyframe instead of tearing the session down.

use log::{error, info, warn};

use crate::decode::{DecodeOutput, DecodedPicture, DecoderFactory, StreamDecoder, Yuv420Converter};
use crate::error::DecodeError;
use crate::output::{RawFrame, RenderSink};
use crate::transport::{TrackFrame, VideoConfig};

/// Geometry used when the catalog does not carry coded dimensions.
pub const DEFAULT_WIDTH: u32 = 1920;
pub const DEFAULT_HEIGHT: u32 = 1080;

/// Consecutive decode failures tolerated before forcing a keyframe resync.
pub const DECODE_ERROR_THRESHOLD: u32 = 5;

/// Upper bound accepted for either axis of a mid-stream geometry change.
pub const MAX_DIMENSION: u32 = 16384;

/// Log every Nth skipped frame while waiting for the first keyframe.
const KEYFRAME_WAIT_LOG_INTERVAL: u32 = 30;

/// Observable pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    /// No decoder yet (no catalog seen, or the session was reset).
    Uninitialized,
    /// Decoder ready, dropping deltas until the first keyframe.
    WaitingForKeyframe,
    /// Producing frames.
    Streaming,
    /// Saw decode errors since the last good frame; still below threshold.
    ErrorRecovering,
}

/// Fully constructed decoder state, built outside the lock and swapped in
/// atomically. Construction failure leaves the previous state untouched.
pub(crate) struct PipelineParts {
    codec: Box<dyn StreamDecoder>,
    scaler: Yuv420Converter,
    frame_buffer: Vec<u8>,
    width: u32,
    height: u32,
}

/// Decoder, converter and output buffer for the currently subscribed track.
pub struct VideoPipeline {
    codec: Option<Box<dyn StreamDecoder>>,
    scaler: Option<Yuv420Converter>,
    frame_buffer: Option<Vec<u8>>,
    width: u32,
    height: u32,
    got_keyframe: bool,
    frames_waiting_for_keyframe: u32,
    consecutive_decode_errors: u32,
}

impl VideoPipeline {
    pub(crate) fn new() -> Self {
        Self {
            codec: None,
            scaler: None,
            frame_buffer: None,
            width: 0,
            height: 0,
            got_keyframe: false,
            frames_waiting_for_keyframe: 0,
            consecutive_decode_errors: 0,
        }
    }

    /// Build decoder + converter + buffer for a track config. Expensive, so
    /// callers run this outside the state lock and commit with
    /// [`install`](Self::install).
    pub(crate) fn prepare(
        factory: &dyn DecoderFactory,
        config: &VideoConfig,
    ) -> Result<PipelineParts, DecodeError> {
        let width = config.coded_width.filter(|w| *w > 0).unwrap_or(DEFAULT_WIDTH);
        let height = config
            .coded_height
            .filter(|h| *h > 0)
            .unwrap_or(DEFAULT_HEIGHT);

        let codec = factory.create(config)?;
        info!("decoder initialized: {width}x{height}");

        Ok(PipelineParts {
            codec,
            scaler: Yuv420Converter::new(width, height),
            frame_buffer: vec![0u8; width as usize * height as usize * 4],
            width,
            height,
        })
    }

    /// Swap in freshly prepared decoder state, discarding the old wholesale.
    pub(crate) fn install(&mut self, parts: PipelineParts) {
        self.codec = Some(parts.codec);
        self.scaler = Some(parts.scaler);
        self.frame_buffer = Some(parts.frame_buffer);
        self.width = parts.width;
        self.height = parts.height;
        self.got_keyframe = false;
        self.frames_waiting_for_keyframe = 0;
        self.consecutive_decode_errors = 0;
    }

    /// Tear down all decoder state.
    pub(crate) fn reset(&mut self) {
        self.codec = None;
        self.scaler = None;
        self.frame_buffer = None;
        self.width = 0;
        self.height = 0;
        self.got_keyframe = false;
        self.frames_waiting_for_keyframe = 0;
        self.consecutive_decode_errors = 0;
    }

    pub fn phase(&self) -> PipelinePhase {
        if self.codec.is_none() || self.scaler.is_none() || self.frame_buffer.is_none() {
            PipelinePhase::Uninitialized
        } else if !self.got_keyframe {
            PipelinePhase::WaitingForKeyframe
        } else if self.consecutive_decode_errors > 0 {
            PipelinePhase::ErrorRecovering
        } else {
            PipelinePhase::Streaming
        }
    }

    /// Frames skipped since the pipeline started waiting for a keyframe.
    pub fn frames_waiting_for_keyframe(&self) -> u32 {
        self.frames_waiting_for_keyframe
    }

    pub fn consecutive_decode_errors(&self) -> u32 {
        self.consecutive_decode_errors
    }

    /// Current output geometry, once initialized.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        if self.phase() == PipelinePhase::Uninitialized {
            None
        } else {
            Some((self.width, self.height))
        }
    }

    /// Decode one track frame and hand any produced picture to the sink.
    ///
    /// Runs under the session state lock; the sink contract requires it to
    /// return quickly.
    pub(crate) fn decode(&mut self, frame: &TrackFrame, sink: &impl RenderSink) {
        let (Some(codec), Some(_), Some(_)) = (self.codec.as_mut(), &self.scaler, &self.frame_buffer)
        else {
            // No catalog yet, or mid-reconnect. Nothing to feed.
            return;
        };

        // Never start decoding mid-GOP: deltas before the first keyframe
        // would produce corrupted output.
        if !self.got_keyframe && !frame.keyframe {
            self.frames_waiting_for_keyframe += 1;
            if self.frames_waiting_for_keyframe == 1
                || self.frames_waiting_for_keyframe % KEYFRAME_WAIT_LOG_INTERVAL == 0
            {
                info!(
                    "waiting for keyframe (skipped {} frames so far)",
                    self.frames_waiting_for_keyframe
                );
            }
            return;
        }

        if frame.keyframe {
            if !self.got_keyframe {
                info!(
                    "got keyframe after {} skipped frames, payload {} bytes",
                    self.frames_waiting_for_keyframe,
                    frame.payload.len()
                );
                codec.reset();
            }
            self.got_keyframe = true;
            self.frames_waiting_for_keyframe = 0;
            self.consecutive_decode_errors = 0;
        }

        match codec.decode(&frame.payload, frame.timestamp_us) {
            Ok(DecodeOutput::Pending) => {}
            Ok(DecodeOutput::Picture(picture)) => {
                self.consecutive_decode_errors = 0;
                self.deliver(picture, frame.timestamp_us, sink);
            }
            Err(e) => self.record_decode_error(e),
        }
    }

    fn record_decode_error(&mut self, e: DecodeError) {
        self.consecutive_decode_errors += 1;
        if self.consecutive_decode_errors >= DECODE_ERROR_THRESHOLD {
            warn!(
                "{} consecutive decode errors, resetting decoder and waiting for keyframe",
                self.consecutive_decode_errors
            );
            if let Some(codec) = self.codec.as_mut() {
                codec.reset();
            }
            self.got_keyframe = false;
            self.consecutive_decode_errors = 0;
        } else if self.consecutive_decode_errors == 1 {
            // Only the first error of a burst is worth a line.
            error!("decode error: {e}");
        }
    }

    /// Convert a decoded picture and push it to the sink, rebuilding the
    /// converter and buffer first if the stream geometry changed.
    fn deliver(&mut self, picture: DecodedPicture, timestamp_us: i64, sink: &impl RenderSink) {
        if picture.width != self.width || picture.height != self.height {
            if picture.width == 0
                || picture.height == 0
                || picture.width > MAX_DIMENSION
                || picture.height > MAX_DIMENSION
            {
                error!(
                    "rejecting absurd decoded geometry {}x{}",
                    picture.width, picture.height
                );
                return;
            }
            info!(
                "stream geometry changed {}x{} -> {}x{}, rebuilding converter",
                self.width, self.height, picture.width, picture.height
            );
            self.width = picture.width;
            self.height = picture.height;
            self.scaler = Some(Yuv420Converter::new(picture.width, picture.height));
            self.frame_buffer =
                Some(vec![0u8; picture.width as usize * picture.height as usize * 4]);
        }

        let (Some(scaler), Some(buffer)) = (&self.scaler, self.frame_buffer.as_mut()) else {
            return;
        };
        if let Err(e) = scaler.convert(&picture, buffer) {
            warn!("dropping frame: {e}");
            return;
        }

        sink.output(RawFrame {
            data: buffer.as_slice(),
            width: self.width,
            height: self.height,
            timestamp_us,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted decoder: pops one pre-programmed result per call.
    struct FakeDecoder {
        script: Arc<Mutex<VecDeque<Result<DecodeOutput, DecodeError>>>>,
        resets: Arc<AtomicU32>,
    }

    impl StreamDecoder for FakeDecoder {
        fn decode(&mut self, _payload: &[u8], _ts: i64) -> Result<DecodeOutput, DecodeError> {
            self.script
                .lock()
                .pop_front()
                .unwrap_or(Ok(DecodeOutput::Pending))
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeFactory {
        script: Arc<Mutex<VecDeque<Result<DecodeOutput, DecodeError>>>>,
        resets: Arc<AtomicU32>,
        fail: bool,
    }

    impl DecoderFactory for FakeFactory {
        fn create(&self, _config: &VideoConfig) -> Result<Box<dyn StreamDecoder>, DecodeError> {
            if self.fail {
                return Err(DecodeError::Init("scripted failure".into()));
            }
            Ok(Box::new(FakeDecoder {
                script: Arc::clone(&self.script),
                resets: Arc::clone(&self.resets),
            }))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<(u32, u32, i64)>>,
        blanks: AtomicU32,
    }

    impl RenderSink for Arc<RecordingSink> {
        fn output(&self, frame: RawFrame<'_>) {
            self.frames
                .lock()
                .push((frame.width, frame.height, frame.timestamp_us));
        }

        fn blank(&self) {
            self.blanks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn gray_picture(width: u32, height: u32) -> DecodedPicture {
        DecodedPicture {
            width,
            height,
            data: vec![128u8; DecodedPicture::packed_len(width, height)],
        }
    }

    fn config(width: u32, height: u32) -> VideoConfig {
        VideoConfig {
            coded_width: Some(width),
            coded_height: Some(height),
            description: None,
        }
    }

    fn keyframe(ts: i64) -> TrackFrame {
        TrackFrame {
            payload: Bytes::from_static(b"key"),
            keyframe: true,
            timestamp_us: ts,
        }
    }

    fn delta(ts: i64) -> TrackFrame {
        TrackFrame {
            payload: Bytes::from_static(b"delta"),
            keyframe: false,
            timestamp_us: ts,
        }
    }

    struct Harness {
        pipeline: VideoPipeline,
        script: Arc<Mutex<VecDeque<Result<DecodeOutput, DecodeError>>>>,
        resets: Arc<AtomicU32>,
        sink: Arc<RecordingSink>,
    }

    impl Harness {
        fn new(width: u32, height: u32) -> Self {
            let script = Arc::new(Mutex::new(VecDeque::new()));
            let resets = Arc::new(AtomicU32::new(0));
            let factory = FakeFactory {
                script: Arc::clone(&script),
                resets: Arc::clone(&resets),
                fail: false,
            };
            let mut pipeline = VideoPipeline::new();
            let parts = VideoPipeline::prepare(&factory, &config(width, height)).unwrap();
            pipeline.install(parts);
            Self {
                pipeline,
                script,
                resets,
                sink: Arc::new(RecordingSink::default()),
            }
        }

        fn push(&self, result: Result<DecodeOutput, DecodeError>) {
            self.script.lock().push_back(result);
        }

        fn decode(&mut self, frame: TrackFrame) {
            let sink = Arc::clone(&self.sink);
            self.pipeline.decode(&frame, &sink);
        }

        fn frames(&self) -> Vec<(u32, u32, i64)> {
            self.sink.frames.lock().clone()
        }
    }

    #[test]
    fn test_uninitialized_pipeline_drops_frames() {
        let mut pipeline = VideoPipeline::new();
        assert_eq!(pipeline.phase(), PipelinePhase::Uninitialized);
        assert_eq!(pipeline.dimensions(), None);

        let sink = Arc::new(RecordingSink::default());
        pipeline.decode(&keyframe(0), &sink);
        assert!(sink.frames.lock().is_empty());
    }

    #[test]
    fn test_prepare_failure_leaves_previous_state() {
        let mut h = Harness::new(640, 480);
        let failing = FakeFactory {
            script: Arc::new(Mutex::new(VecDeque::new())),
            resets: Arc::new(AtomicU32::new(0)),
            fail: true,
        };
        assert!(VideoPipeline::prepare(&failing, &config(1280, 720)).is_err());
        // Old state untouched.
        assert_eq!(h.pipeline.dimensions(), Some((640, 480)));
        assert_eq!(h.pipeline.phase(), PipelinePhase::WaitingForKeyframe);
    }

    #[test]
    fn test_deltas_before_keyframe_are_counted_and_dropped() {
        let mut h = Harness::new(1280, 720);
        h.decode(delta(1));
        h.decode(delta(2));
        h.decode(delta(3));
        assert_eq!(h.pipeline.frames_waiting_for_keyframe(), 3);
        assert_eq!(h.pipeline.phase(), PipelinePhase::WaitingForKeyframe);
        assert!(h.frames().is_empty());
    }

    #[test]
    fn test_keyframe_starts_streaming_and_resets_wait_counter() {
        let mut h = Harness::new(1280, 720);
        h.decode(delta(1));
        assert_eq!(h.pipeline.frames_waiting_for_keyframe(), 1);

        h.push(Ok(DecodeOutput::Picture(gray_picture(1280, 720))));
        h.decode(keyframe(42));

        assert_eq!(h.pipeline.frames_waiting_for_keyframe(), 0);
        assert_eq!(h.pipeline.phase(), PipelinePhase::Streaming);
        assert_eq!(h.frames(), vec![(1280, 720, 42)]);
        // The codec was flushed before decoding the first keyframe.
        assert_eq!(h.resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pending_output_is_not_an_error() {
        let mut h = Harness::new(1280, 720);
        h.push(Ok(DecodeOutput::Pending));
        h.decode(keyframe(1));
        assert_eq!(h.pipeline.consecutive_decode_errors(), 0);
        assert_eq!(h.pipeline.phase(), PipelinePhase::Streaming);
        assert!(h.frames().is_empty());
    }

    #[test]
    fn test_error_threshold_forces_keyframe_resync() {
        let mut h = Harness::new(1280, 720);
        h.push(Ok(DecodeOutput::Picture(gray_picture(1280, 720))));
        h.decode(keyframe(1));
        let resets_after_start = h.resets.load(Ordering::SeqCst);

        for i in 0..DECODE_ERROR_THRESHOLD {
            h.push(Err(DecodeError::Codec(format!("bad frame {i}"))));
            h.decode(delta(i64::from(i) + 2));
        }

        // Threshold reached: codec reset, back to waiting for a keyframe.
        assert_eq!(h.resets.load(Ordering::SeqCst), resets_after_start + 1);
        assert_eq!(h.pipeline.phase(), PipelinePhase::WaitingForKeyframe);
        assert_eq!(h.pipeline.consecutive_decode_errors(), 0);

        // Further deltas are dropped without touching the codec.
        h.decode(delta(100));
        assert_eq!(h.pipeline.frames_waiting_for_keyframe(), 1);
        assert_eq!(h.frames().len(), 1);

        // A keyframe restores output.
        h.push(Ok(DecodeOutput::Picture(gray_picture(1280, 720))));
        h.decode(keyframe(200));
        assert_eq!(h.frames().len(), 2);
        assert_eq!(h.pipeline.phase(), PipelinePhase::Streaming);
    }

    #[test]
    fn test_errors_below_threshold_recover_on_success() {
        let mut h = Harness::new(1280, 720);
        h.push(Ok(DecodeOutput::Picture(gray_picture(1280, 720))));
        h.decode(keyframe(1));

        h.push(Err(DecodeError::Codec("glitch".into())));
        h.decode(delta(2));
        assert_eq!(h.pipeline.phase(), PipelinePhase::ErrorRecovering);
        assert_eq!(h.pipeline.consecutive_decode_errors(), 1);

        h.push(Ok(DecodeOutput::Picture(gray_picture(1280, 720))));
        h.decode(delta(3));
        assert_eq!(h.pipeline.phase(), PipelinePhase::Streaming);
        assert_eq!(h.pipeline.consecutive_decode_errors(), 0);
        assert_eq!(h.frames().len(), 2);
    }

    #[test]
    fn test_mid_stream_geometry_change_rebuilds_and_resumes() {
        let mut h = Harness::new(1280, 720);
        h.push(Ok(DecodeOutput::Picture(gray_picture(1280, 720))));
        h.decode(keyframe(1));
        assert_eq!(h.pipeline.dimensions(), Some((1280, 720)));

        h.push(Ok(DecodeOutput::Picture(gray_picture(640, 360))));
        h.decode(delta(2));
        assert_eq!(h.pipeline.dimensions(), Some((640, 360)));
        assert_eq!(h.frames(), vec![(1280, 720, 1), (640, 360, 2)]);
    }

    #[test]
    fn test_absurd_geometry_is_rejected_without_state_change() {
        let mut h = Harness::new(1280, 720);
        h.push(Ok(DecodeOutput::Picture(gray_picture(1280, 720))));
        h.decode(keyframe(1));

        h.push(Ok(DecodeOutput::Picture(gray_picture(MAX_DIMENSION + 1, 720))));
        h.decode(delta(2));
        h.push(Ok(DecodeOutput::Picture(DecodedPicture {
            width: 0,
            height: 720,
            data: Vec::new(),
        })));
        h.decode(delta(3));

        assert_eq!(h.pipeline.dimensions(), Some((1280, 720)));
        assert_eq!(h.frames().len(), 1);

        // The stream is still usable afterwards.
        h.push(Ok(DecodeOutput::Picture(gray_picture(1280, 720))));
        h.decode(delta(4));
        assert_eq!(h.frames().len(), 2);
    }

    #[test]
    fn test_install_resets_sync_state() {
        let mut h = Harness::new(1280, 720);
        h.push(Ok(DecodeOutput::Picture(gray_picture(1280, 720))));
        h.decode(keyframe(1));
        assert_eq!(h.pipeline.phase(), PipelinePhase::Streaming);

        let factory = FakeFactory {
            script: Arc::clone(&h.script),
            resets: Arc::clone(&h.resets),
            fail: false,
        };
        let parts = VideoPipeline::prepare(&factory, &config(640, 360)).unwrap();
        h.pipeline.install(parts);

        assert_eq!(h.pipeline.phase(), PipelinePhase::WaitingForKeyframe);
        assert_eq!(h.pipeline.dimensions(), Some((640, 360)));
    }

    #[test]
    fn test_prepare_falls_back_to_default_geometry() {
        let factory = FakeFactory {
            script: Arc::new(Mutex::new(VecDeque::new())),
            resets: Arc::new(AtomicU32::new(0)),
            fail: false,
        };
        let mut pipeline = VideoPipeline::new();
        let parts = VideoPipeline::prepare(&factory, &VideoConfig::default()).unwrap();
        pipeline.install(parts);
        assert_eq!(pipeline.dimensions(), Some((DEFAULT_WIDTH, DEFAULT_HEIGHT)));
    }
}

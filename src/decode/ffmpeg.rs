//! H.264 stream decoder backed by FFmpeg.

use ac_ffmpeg::codec::Decoder;
use ac_ffmpeg::codec::video::{VideoDecoder, VideoFrame};
use ac_ffmpeg::packet::PacketMut;
use ac_ffmpeg::time::{TimeBase, Timestamp};
use bytes::Bytes;
use log::warn;

use crate::decode::{DecodeOutput, DecodedPicture, DecoderFactory, StreamDecoder};
use crate::error::DecodeError;
use crate::transport::VideoConfig;

fn microseconds() -> TimeBase {
    TimeBase::new(1, 1_000_000)
}

/// H.264 decoder producing packed planar YUV 4:2:0 pictures.
///
/// The catalog's track description (avcC with SPS/PPS) becomes the codec
/// extradata, so decoding can start from the first keyframe without waiting
/// for in-band parameter sets.
pub struct FfmpegStreamDecoder {
    decoder: VideoDecoder,
    description: Option<Bytes>,
}

unsafe impl Send for FfmpegStreamDecoder {}

impl FfmpegStreamDecoder {
    pub fn new(config: &VideoConfig) -> Result<Self, DecodeError> {
        let decoder = Self::build(config.description.as_ref())?;
        Ok(Self {
            decoder,
            description: config.description.clone(),
        })
    }

    fn build(description: Option<&Bytes>) -> Result<VideoDecoder, DecodeError> {
        let mut builder = VideoDecoder::builder("h264")
            .map_err(|e| DecodeError::Init(e.to_string()))?
            .time_base(microseconds());
        if let Some(description) = description {
            builder = builder.extradata(Some(description.to_vec()));
        }
        builder.build().map_err(|e| DecodeError::Init(e.to_string()))
    }
}

impl StreamDecoder for FfmpegStreamDecoder {
    fn decode(&mut self, payload: &[u8], timestamp_us: i64) -> Result<DecodeOutput, DecodeError> {
        let packet = PacketMut::from(payload)
            .with_pts(Timestamp::new(timestamp_us, microseconds()))
            .freeze();

        self.decoder
            .try_push(packet)
            .map_err(|e| DecodeError::Codec(e.to_string()))?;

        match self.decoder.take() {
            Ok(Some(frame)) => Ok(DecodeOutput::Picture(extract_picture(&frame)?)),
            Ok(None) => Ok(DecodeOutput::Pending),
            Err(e) => Err(DecodeError::Codec(e.to_string())),
        }
    }

    fn reset(&mut self) {
        // FFmpeg contexts are cheap to rebuild compared to decoding; a fresh
        // context is the reliable way to discard half-decoded GOP state.
        match Self::build(self.description.as_ref()) {
            Ok(decoder) => self.decoder = decoder,
            Err(e) => warn!("keeping stale decoder, rebuild failed: {e}"),
        }
    }
}

/// Copy the decoder's padded planes into a contiguous picture.
fn extract_picture(frame: &VideoFrame) -> Result<DecodedPicture, DecodeError> {
    let width = frame.width();
    let height = frame.height();
    let planes = frame.planes();
    if planes.len() < 3 {
        return Err(DecodeError::Format(format!(
            "expected 3 planes, decoder produced {}",
            planes.len()
        )));
    }

    let (cw, ch) = DecodedPicture::chroma_dims(width as u32, height as u32);
    let y_len = width * height;
    let mut data = vec![0u8; y_len + cw * ch * 2];

    copy_plane(&mut data[..y_len], planes[0].data(), planes[0].line_size(), width, height);
    copy_plane(
        &mut data[y_len..y_len + cw * ch],
        planes[1].data(),
        planes[1].line_size(),
        cw,
        ch,
    );
    copy_plane(
        &mut data[y_len + cw * ch..],
        planes[2].data(),
        planes[2].line_size(),
        cw,
        ch,
    );

    Ok(DecodedPicture {
        width: width as u32,
        height: height as u32,
        data,
    })
}

/// Strip stride padding row by row; single memcpy when there is none.
fn copy_plane(dst: &mut [u8], src: &[u8], stride: usize, width: usize, height: usize) {
    if stride == width && src.len() >= width * height {
        dst.copy_from_slice(&src[..width * height]);
        return;
    }
    for (row, out) in dst.chunks_exact_mut(width).take(height).enumerate() {
        let start = row * stride;
        if start + width > src.len() {
            break;
        }
        out.copy_from_slice(&src[start..start + width]);
    }
}

/// Factory for the shipped FFmpeg decoder.
#[derive(Debug, Default)]
pub struct FfmpegDecoderFactory;

impl DecoderFactory for FfmpegDecoderFactory {
    fn create(&self, config: &VideoConfig) -> Result<Box<dyn StreamDecoder>, DecodeError> {
        Ok(Box::new(FfmpegStreamDecoder::new(config)?))
    }
}

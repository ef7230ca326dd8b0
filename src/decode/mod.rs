//! Frame decode pipeline: compressed track frames in, RGBA frames out.
//!
//! The codec sits behind [`StreamDecoder`]/[`DecoderFactory`] so the
//! pipeline's state machine (keyframe sync, bounded error recovery, geometry
//! changes) is independent of the shipped FFmpeg implementation.

pub mod convert;
pub mod ffmpeg;
pub mod pipeline;

pub use convert::Yuv420Converter;
pub use ffmpeg::{FfmpegDecoderFactory, FfmpegStreamDecoder};
pub use pipeline::{PipelinePhase, VideoPipeline};

use crate::error::DecodeError;
use crate::transport::VideoConfig;

/// One decoded picture: packed planar YUV 4:2:0, stride padding stripped.
///
/// Layout: Y plane (`width * height`), then U, then V (each
/// `ceil(w/2) * ceil(h/2)`).
#[derive(Debug, Clone)]
pub struct DecodedPicture {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl DecodedPicture {
    /// Size of one chroma plane for the given luma geometry.
    pub fn chroma_dims(width: u32, height: u32) -> (usize, usize) {
        ((width as usize).div_ceil(2), (height as usize).div_ceil(2))
    }

    /// Total packed size for the given geometry.
    pub fn packed_len(width: u32, height: u32) -> usize {
        let (cw, ch) = Self::chroma_dims(width, height);
        width as usize * height as usize + cw * ch * 2
    }

    pub fn luma(&self) -> &[u8] {
        &self.data[..self.width as usize * self.height as usize]
    }

    pub fn chroma_u(&self) -> &[u8] {
        let y_len = self.width as usize * self.height as usize;
        let (cw, ch) = Self::chroma_dims(self.width, self.height);
        &self.data[y_len..y_len + cw * ch]
    }

    pub fn chroma_v(&self) -> &[u8] {
        let y_len = self.width as usize * self.height as usize;
        let (cw, ch) = Self::chroma_dims(self.width, self.height);
        &self.data[y_len + cw * ch..y_len + cw * ch * 2]
    }
}

/// Result of feeding one compressed frame to the codec.
#[derive(Debug)]
pub enum DecodeOutput {
    /// The codec is buffering; not an error.
    Pending,
    /// A picture is ready.
    Picture(DecodedPicture),
}

/// A stateful video decoder for one elementary stream.
pub trait StreamDecoder: Send {
    /// Feed one compressed frame. `timestamp_us` is the presentation time.
    fn decode(&mut self, payload: &[u8], timestamp_us: i64) -> Result<DecodeOutput, DecodeError>;

    /// Drop buffered codec state so decoding can restart cleanly at the next
    /// keyframe.
    fn reset(&mut self);
}

/// Builds decoders from catalog-provided track configuration.
pub trait DecoderFactory: Send + Sync {
    fn create(&self, config: &VideoConfig) -> Result<Box<dyn StreamDecoder>, DecodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_picture_plane_layout() {
        let pic = DecodedPicture {
            width: 4,
            height: 2,
            data: (0..12).collect(),
        };
        assert_eq!(DecodedPicture::packed_len(4, 2), 12);
        assert_eq!(pic.luma(), &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(pic.chroma_u(), &[8, 9]);
        assert_eq!(pic.chroma_v(), &[10, 11]);
    }

    #[test]
    fn test_odd_dimensions_round_up_chroma() {
        assert_eq!(DecodedPicture::chroma_dims(5, 3), (3, 2));
        assert_eq!(DecodedPicture::packed_len(5, 3), 15 + 12);
    }
}

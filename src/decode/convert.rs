//! Planar YUV 4:2:0 to packed RGBA conversion.
//!
//! Fixed-point BT.601 limited-range math. Built for one geometry; the
//! pipeline rebuilds the converter whenever the stream geometry changes.

use crate::decode::DecodedPicture;
use crate::error::DecodeError;

/// Converts decoded pictures of a fixed geometry into packed RGBA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Yuv420Converter {
    width: u32,
    height: u32,
}

impl Yuv420Converter {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Convert `picture` into `dst` (packed RGBA, `width * height * 4`).
    ///
    /// The picture geometry must match the converter's; a mismatch means the
    /// caller forgot to rebuild on a geometry change.
    pub fn convert(&self, picture: &DecodedPicture, dst: &mut [u8]) -> Result<(), DecodeError> {
        if picture.width != self.width || picture.height != self.height {
            return Err(DecodeError::Format(format!(
                "picture is {}x{}, converter expects {}x{}",
                picture.width, picture.height, self.width, self.height
            )));
        }
        let w = self.width as usize;
        let h = self.height as usize;
        if dst.len() < w * h * 4 {
            return Err(DecodeError::Format(format!(
                "output buffer holds {} bytes, need {}",
                dst.len(),
                w * h * 4
            )));
        }
        if picture.data.len() < DecodedPicture::packed_len(self.width, self.height) {
            return Err(DecodeError::Format(format!(
                "picture holds {} bytes, need {}",
                picture.data.len(),
                DecodedPicture::packed_len(self.width, self.height)
            )));
        }

        let (cw, _) = DecodedPicture::chroma_dims(self.width, self.height);
        let luma = picture.luma();
        let cb = picture.chroma_u();
        let cr = picture.chroma_v();

        for (row, out_row) in dst.chunks_exact_mut(w * 4).take(h).enumerate() {
            let y_row = &luma[row * w..row * w + w];
            let c_row = row / 2;
            for (col, px) in out_row.chunks_exact_mut(4).enumerate() {
                let c = i32::from(y_row[col]) - 16;
                let d = i32::from(cb[c_row * cw + col / 2]) - 128;
                let e = i32::from(cr[c_row * cw + col / 2]) - 128;

                px[0] = clamp8((298 * c + 409 * e + 128) >> 8);
                px[1] = clamp8((298 * c - 100 * d - 208 * e + 128) >> 8);
                px[2] = clamp8((298 * c + 516 * d + 128) >> 8);
                px[3] = 255;
            }
        }
        Ok(())
    }
}

#[inline]
fn clamp8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

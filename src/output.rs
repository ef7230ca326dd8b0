//! Host-facing render seam.
//!
//! The host owns the render surface; the source only hands it finished RGBA
//! frames or tells it to clear the picture.

/// One decoded frame, borrowed from the pipeline's internal buffer.
///
/// Packed RGBA, row-major, no stride padding (`width * 4` bytes per row).
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp from the source stream, in microseconds.
    pub timestamp_us: i64,
}

/// Receives decoded frames from the source.
///
/// `output` is invoked while the source holds its internal state lock, so
/// implementations must not call back into the source and should return
/// quickly (copy or upload, don't block).
pub trait RenderSink: Send + Sync + 'static {
    /// Present a decoded frame.
    fn output(&self, frame: RawFrame<'_>);

    /// Clear the picture: the source is disconnected, misconfigured, or
    /// between connections.
    fn blank(&self);
}

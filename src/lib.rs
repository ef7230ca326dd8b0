//! Live video source for MoQ-style broadcasts.
//!
//! The crate turns a relay URL and a broadcast name into a stream of RGBA
//! frames pushed to a host-provided [`RenderSink`]. It manages the whole
//! session lifecycle: debounced reconfiguration, connect, catalog and track
//! subscriptions, H.264 decoding with keyframe synchronization and bounded
//! error recovery, and a clean drained shutdown.
//!
//! Network I/O lives behind the [`MoqTransport`] trait; the host supplies an
//! implementation plus a [`RenderSink`] and drives the source with
//! [`MoqSource::update`] and [`MoqSource::tick`].

pub mod config;
pub mod decode;
pub mod error;
pub mod output;
pub mod session;
pub mod source;
pub mod transport;

pub use config::{SourceConfig, SourceOptions};
pub use decode::{DecodeOutput, DecodedPicture, DecoderFactory, PipelinePhase, StreamDecoder};
pub use error::{DecodeError, TransportError};
pub use output::{RawFrame, RenderSink};
pub use source::MoqSource;
pub use transport::{
    Catalog, CatalogEvent, MoqTransport, SessionEvent, TrackEvent, TrackFrame, VideoConfig,
};

//! Transport seam: the session protocol that talks to the relay.
//!
//! The source never performs network I/O itself. A [`MoqTransport`]
//! implementation owns the wire protocol and delivers asynchronous results
//! through `mpsc` channels; the source spawns one listener task per
//! subscription and gates every event on its captured generation.
//!
//! Ownership contract: every associated handle type closes its underlying
//! resource on `Drop`, and dropping a subscription handle must cause the
//! transport to drop the matching event sender promptly so listener tasks
//! can wind down.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Codec configuration for one video track, extracted from the catalog.
#[derive(Debug, Clone, Default)]
pub struct VideoConfig {
    /// Coded width in pixels, when the catalog carries it.
    pub coded_width: Option<u32>,
    /// Coded height in pixels, when the catalog carries it.
    pub coded_height: Option<u32>,
    /// Decoder initialization payload (e.g. avcC description with SPS/PPS).
    pub description: Option<Bytes>,
}

/// Parsed catalog: the tracks a broadcast offers.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub video_tracks: Vec<VideoConfig>,
}

impl Catalog {
    /// Configuration of the `track`-th video track, if present.
    pub fn video_config(&self, track: usize) -> Option<&VideoConfig> {
        self.video_tracks.get(track)
    }
}

/// One compressed frame delivered by a video track subscription.
///
/// Owning the payload means "closing the frame handle" is simply `Drop`,
/// on every path including discards.
#[derive(Debug, Clone)]
pub struct TrackFrame {
    pub payload: Bytes,
    pub keyframe: bool,
    /// Presentation timestamp in microseconds.
    pub timestamp_us: i64,
}

/// Outcome of the asynchronous session handshake.
#[derive(Debug)]
pub enum SessionEvent {
    /// The session is established; consumption may begin.
    Connected,
    /// The session failed or was torn down by the relay.
    Failed(TransportError),
}

/// Catalog subscription updates.
#[derive(Debug)]
pub enum CatalogEvent {
    Updated(Catalog),
    Error(TransportError),
}

/// Video track subscription events.
#[derive(Debug)]
pub enum TrackEvent {
    Frame(TrackFrame),
    Error(TransportError),
}

/// The session protocol implementation.
///
/// Calls may block on network I/O (they are async for that reason); the
/// source always invokes them outside its state lock and re-validates the
/// generation before installing any returned handle.
#[async_trait]
pub trait MoqTransport: Send + Sync + 'static {
    /// Container context through which broadcasts are consumed.
    type Origin: Send + Sync + 'static;
    /// An established connection to the relay.
    type Session: Send + Sync + 'static;
    /// A subscription to one named broadcast.
    type Consume: Send + Sync + 'static;
    /// A catalog-updates subscription.
    type CatalogSub: Send + Sync + 'static;
    /// A video-track subscription.
    type TrackSub: Send + Sync + 'static;

    /// Open a fresh origin context.
    async fn open_origin(&self) -> Result<Self::Origin, TransportError>;

    /// Connect a session to the relay. The handshake result arrives later on
    /// the returned channel; the handle is valid immediately for teardown.
    async fn connect_session(
        &self,
        url: &str,
        origin: &Self::Origin,
    ) -> Result<(Self::Session, mpsc::Receiver<SessionEvent>), TransportError>;

    /// Consume a named broadcast under an origin.
    async fn consume_broadcast(
        &self,
        origin: &Self::Origin,
        broadcast: &str,
    ) -> Result<Self::Consume, TransportError>;

    /// Subscribe to catalog updates for a consumed broadcast.
    async fn subscribe_catalog(
        &self,
        consume: &Self::Consume,
    ) -> Result<(Self::CatalogSub, mpsc::Receiver<CatalogEvent>), TransportError>;

    /// Subscribe to the given video track of a consumed broadcast.
    async fn subscribe_video(
        &self,
        consume: &Self::Consume,
        catalog: &Catalog,
        track: usize,
    ) -> Result<(Self::TrackSub, mpsc::Receiver<TrackEvent>), TransportError>;
}

//! Host-facing source object.
//!
//! [`MoqSource`] owns its own runtime so the host integrates through three
//! synchronous entry points: [`update`](MoqSource::update) when settings
//! change, [`tick`](MoqSource::tick) from a periodic timer, and
//! [`shutdown`](MoqSource::shutdown) (also run on `Drop`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::runtime::{Builder, Runtime};

use crate::config::{SourceConfig, SourceOptions};
use crate::decode::{DecoderFactory, FfmpegDecoderFactory};
use crate::output::RenderSink;
use crate::session::SourceShared;
use crate::transport::MoqTransport;

const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// A video source consuming one live broadcast through a [`MoqTransport`].
pub struct MoqSource<T: MoqTransport, S: RenderSink> {
    shared: Arc<SourceShared<T, S>>,
    runtime: Option<Runtime>,
}

impl<T: MoqTransport, S: RenderSink> MoqSource<T, S> {
    /// Create a source decoding with the bundled FFmpeg H.264 decoder.
    pub fn new(transport: T, sink: S, options: SourceOptions) -> anyhow::Result<Self> {
        Self::with_decoder_factory(transport, sink, Arc::new(FfmpegDecoderFactory), options)
    }

    /// Create a source with a custom decoder factory.
    pub fn with_decoder_factory(
        transport: T,
        sink: S,
        factory: Arc<dyn DecoderFactory>,
        options: SourceOptions,
    ) -> anyhow::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("moq-source")
            .enable_all()
            .build()
            .context("failed to start source runtime")?;

        let shared = SourceShared::new(transport, sink, factory, options, runtime.handle().clone());
        Ok(Self {
            shared,
            runtime: Some(runtime),
        })
    }

    /// Stage new connection settings. Safe to call on every edit; the source
    /// reconnects only once editing settles.
    pub fn update(&self, url: impl Into<String>, broadcast: impl Into<String>) {
        self.shared.update(SourceConfig::new(url, broadcast));
    }

    /// Drive pending work. Call periodically, e.g. from the host's frame or
    /// property-poll timer.
    pub fn tick(&self) {
        Arc::clone(&self.shared).tick();
    }

    /// Disconnect, drain in-flight listener tasks and stop the runtime.
    /// Idempotent.
    pub fn shutdown(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        self.shared.shutdown();
        runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    }
}

impl<T: MoqTransport, S: RenderSink> Drop for MoqSource<T, S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

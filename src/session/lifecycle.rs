//! Connection lifecycle manager.
//!
//! # Lock discipline
//!
//! All mutable session state lives behind one `parking_lot::Mutex` in
//! [`SourceShared`]. The rules:
//!
//! * Transport calls and decoder construction never run under the lock.
//!   Results are prepared outside, then committed under the lock only after
//!   re-checking that the captured [`Generation`] is still current.
//! * A stale result is simply dropped; handle `Drop` impls close the
//!   underlying resources.
//! * The render sink's `output` runs under the lock (frames borrow the
//!   pipeline's buffer); `blank` is always called after releasing it.
//! * Nothing `.await`s while holding the lock.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::config::{SourceConfig, SourceOptions};
use crate::decode::{DecoderFactory, VideoPipeline};
use crate::error::TransportError;
use crate::output::RenderSink;
use crate::session::debounce::{ConfigDebouncer, DebounceVerdict};
use crate::session::generation::Generation;
use crate::session::shutdown::CallbackTracker;
use crate::transport::{CatalogEvent, MoqTransport, SessionEvent, TrackEvent};

/// The transport handles of one connection attempt, owned as a unit.
///
/// Origin, session and consume are `Arc`-shared so transport calls can
/// borrow them outside the lock while the chain retains ownership.
struct ConnectionChain<T: MoqTransport> {
    track: Option<T::TrackSub>,
    catalog: Option<T::CatalogSub>,
    consume: Option<Arc<T::Consume>>,
    session: Option<Arc<T::Session>>,
    origin: Option<Arc<T::Origin>>,
}

impl<T: MoqTransport> ConnectionChain<T> {
    fn new() -> Self {
        Self {
            track: None,
            catalog: None,
            consume: None,
            session: None,
            origin: None,
        }
    }

    /// Drop every handle, innermost first: subscriptions before their
    /// broadcast, the broadcast before its session, the session before the
    /// origin.
    fn close(&mut self) {
        self.track = None;
        self.catalog = None;
        self.consume = None;
        self.session = None;
        self.origin = None;
    }
}

/// Everything the lock protects.
struct SessionState<T: MoqTransport> {
    generation: Generation,
    /// The config the current connection (attempt) was made with.
    active: Option<SourceConfig>,
    debouncer: ConfigDebouncer,
    reconnect_in_progress: bool,
    shutting_down: bool,
    chain: ConnectionChain<T>,
    pipeline: VideoPipeline,
}

impl<T: MoqTransport> SessionState<T> {
    fn new(options: &SourceOptions) -> Self {
        Self {
            generation: Generation::initial(),
            active: None,
            debouncer: ConfigDebouncer::new(options.debounce_window),
            reconnect_in_progress: false,
            shutting_down: false,
            chain: ConnectionChain::new(),
            pipeline: VideoPipeline::new(),
        }
    }

    fn is_current(&self, generation: Generation) -> bool {
        self.generation == generation
    }
}

/// State shared between the host-facing entry points and the listener tasks
/// running on the source's runtime.
pub struct SourceShared<T: MoqTransport, S: RenderSink> {
    transport: T,
    sink: S,
    factory: Arc<dyn DecoderFactory>,
    options: SourceOptions,
    state: Mutex<SessionState<T>>,
    tracker: Arc<CallbackTracker>,
    rt: Handle,
}

impl<T: MoqTransport, S: RenderSink> SourceShared<T, S> {
    pub(crate) fn new(
        transport: T,
        sink: S,
        factory: Arc<dyn DecoderFactory>,
        options: SourceOptions,
        rt: Handle,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            sink,
            factory,
            state: Mutex::new(SessionState::new(&options)),
            options,
            tracker: Arc::new(CallbackTracker::new()),
            rt,
        })
    }

    /// Spawn a listener task whose lifetime counts toward the shutdown drain.
    fn spawn_task<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = Arc::clone(&self.tracker).register();
        self.rt.spawn(async move {
            let _guard = guard;
            fut.await;
        });
    }

    /// Stage new connection settings. Applied from [`tick`](Self::tick) once
    /// editing has settled.
    pub fn update(&self, config: SourceConfig) {
        let mut state = self.state.lock();
        if state.shutting_down {
            return;
        }
        state.debouncer.stage(config, Instant::now());
    }

    /// Periodic driver: applies settled settings by reconnecting.
    ///
    /// While a reconnect is in flight the debouncer is not polled, so any
    /// staged edit waits for the attempt to finish rather than racing it.
    pub fn tick(self: Arc<Self>) {
        let verdict = {
            let mut state = self.state.lock();
            if state.shutting_down || state.reconnect_in_progress {
                return;
            }
            let active = state.active.clone();
            state.debouncer.poll(Instant::now(), active.as_ref())
        };
        if let DebounceVerdict::Apply(config) = verdict {
            self.apply_config(config);
        }
    }

    fn apply_config(self: Arc<Self>, config: SourceConfig) {
        if !config.is_valid() {
            info!("settings incomplete, disconnecting");
            {
                let mut state = self.state.lock();
                state.generation.bump();
                state.active = Some(config);
                state.chain.close();
                state.pipeline.reset();
            }
            self.sink.blank();
            return;
        }

        let generation = {
            let mut state = self.state.lock();
            state.active = Some(config.clone());
            state.reconnect_in_progress = true;
            state.generation.bump()
        };

        let shared = Arc::clone(&self);
        self.spawn_task(async move {
            shared.reconnect(generation, config).await;
        });
    }

    /// One full connection attempt under `generation`. Clears
    /// `reconnect_in_progress` on every exit path.
    async fn reconnect(self: Arc<Self>, generation: Generation, config: SourceConfig) {
        {
            let mut state = self.state.lock();
            if state.shutting_down || !state.is_current(generation) {
                state.reconnect_in_progress = false;
                return;
            }
            state.chain.close();
            state.pipeline.reset();
        }
        self.sink.blank();

        info!(
            "connecting to {} broadcast {} (generation {generation})",
            config.url, config.broadcast
        );
        let result = self.establish(&config).await;

        let mut state = self.state.lock();
        state.reconnect_in_progress = false;
        if state.shutting_down || !state.is_current(generation) {
            debug!("discarding stale connection (generation {generation})");
            return;
        }
        match result {
            Ok((origin, session, events)) => {
                state.chain.origin = Some(origin);
                state.chain.session = Some(session);
                drop(state);
                self.spawn_session_listener(generation, events);
            }
            Err(e) => error!("connect failed: {e}"),
        }
    }

    async fn establish(
        &self,
        config: &SourceConfig,
    ) -> Result<
        (
            Arc<T::Origin>,
            Arc<T::Session>,
            mpsc::Receiver<SessionEvent>,
        ),
        TransportError,
    > {
        let origin = Arc::new(self.transport.open_origin().await?);
        let (session, events) = self.transport.connect_session(&config.url, &origin).await?;
        Ok((origin, Arc::new(session), events))
    }

    fn spawn_session_listener(
        self: Arc<Self>,
        generation: Generation,
        mut events: mpsc::Receiver<SessionEvent>,
    ) {
        let shared = Arc::clone(&self);
        self.spawn_task(async move {
            while let Some(event) = events.recv().await {
                if !shared.clone().on_session_event(generation, event).await {
                    break;
                }
            }
        });
    }

    /// Close the chain and blank the sink, unless the generation was
    /// superseded or shutdown already handled it. Returns whether it acted.
    fn teardown(&self, generation: Generation) -> bool {
        {
            let mut state = self.state.lock();
            if state.shutting_down || !state.is_current(generation) {
                return false;
            }
            state.chain.close();
            state.pipeline.reset();
        }
        self.sink.blank();
        true
    }

    /// Returns `false` when the listener should stop.
    async fn on_session_event(
        self: Arc<Self>,
        generation: Generation,
        event: SessionEvent,
    ) -> bool {
        match event {
            SessionEvent::Connected => {
                info!("session established (generation {generation})");
                self.start_consume(generation).await;
                true
            }
            SessionEvent::Failed(e) => {
                if self.teardown(generation) {
                    error!("session failed: {e}");
                }
                false
            }
        }
    }

    /// Consume the broadcast and subscribe to its catalog.
    async fn start_consume(self: Arc<Self>, generation: Generation) {
        let (origin, broadcast) = {
            let state = self.state.lock();
            if state.shutting_down || !state.is_current(generation) {
                return;
            }
            let (Some(origin), Some(active)) = (state.chain.origin.clone(), state.active.clone())
            else {
                return;
            };
            (origin, active.broadcast)
        };

        let result = async {
            let consume = Arc::new(self.transport.consume_broadcast(&origin, &broadcast).await?);
            let (catalog, events) = self.transport.subscribe_catalog(&consume).await?;
            Ok::<_, TransportError>((consume, catalog, events))
        }
        .await;

        match result {
            Ok((consume, catalog, events)) => {
                {
                    let mut state = self.state.lock();
                    if state.shutting_down || !state.is_current(generation) {
                        // Stale: the fresh handles drop and close here.
                        return;
                    }
                    state.chain.consume = Some(consume);
                    state.chain.catalog = Some(catalog);
                }
                self.spawn_catalog_listener(generation, events);
            }
            Err(e) => {
                error!("broadcast setup failed: {e}");
                self.teardown(generation);
            }
        }
    }

    fn spawn_catalog_listener(
        self: Arc<Self>,
        generation: Generation,
        mut events: mpsc::Receiver<CatalogEvent>,
    ) {
        let shared = Arc::clone(&self);
        self.spawn_task(async move {
            while let Some(event) = events.recv().await {
                if !shared.clone().on_catalog_event(generation, event).await {
                    break;
                }
            }
        });
    }

    /// Returns `false` when the listener should stop.
    async fn on_catalog_event(
        self: Arc<Self>,
        generation: Generation,
        event: CatalogEvent,
    ) -> bool {
        let catalog = match event {
            CatalogEvent::Updated(catalog) => catalog,
            CatalogEvent::Error(e) => {
                warn!("catalog error: {e}");
                return true;
            }
        };

        let track = self.options.video_track;
        let Some(track_config) = catalog.video_config(track) else {
            warn!("catalog update carries no video track {track}");
            return true;
        };

        // Decoder construction is expensive; do it before touching the lock.
        let parts = match VideoPipeline::prepare(self.factory.as_ref(), track_config) {
            Ok(parts) => parts,
            Err(e) => {
                error!("decoder setup failed: {e}");
                return true;
            }
        };

        let consume = {
            let state = self.state.lock();
            if state.shutting_down || !state.is_current(generation) {
                return false;
            }
            let Some(consume) = state.chain.consume.clone() else {
                return false;
            };
            consume
        };

        match self
            .transport
            .subscribe_video(&consume, &catalog, track)
            .await
        {
            Ok((track_sub, events)) => {
                {
                    let mut state = self.state.lock();
                    if state.shutting_down || !state.is_current(generation) {
                        return false;
                    }
                    // Replacing the handle drops any previous subscription.
                    state.chain.track = Some(track_sub);
                    state.pipeline.install(parts);
                }
                self.spawn_track_listener(generation, events);
                true
            }
            Err(e) => {
                error!("video subscription failed: {e}");
                self.teardown(generation);
                false
            }
        }
    }

    fn spawn_track_listener(
        self: Arc<Self>,
        generation: Generation,
        mut events: mpsc::Receiver<TrackEvent>,
    ) {
        let shared = Arc::clone(&self);
        self.spawn_task(async move {
            while let Some(event) = events.recv().await {
                if !shared.on_track_event(generation, event) {
                    break;
                }
            }
        });
    }

    /// Returns `false` when the listener should stop.
    fn on_track_event(&self, generation: Generation, event: TrackEvent) -> bool {
        match event {
            TrackEvent::Frame(frame) => {
                let mut state = self.state.lock();
                if state.shutting_down || !state.is_current(generation) {
                    return false;
                }
                state.pipeline.decode(&frame, &self.sink);
                true
            }
            TrackEvent::Error(e) => {
                warn!("track error: {e}");
                true
            }
        }
    }

    /// Tear everything down and wait for listener tasks to drain.
    ///
    /// Blocks the caller, so it must not run on a runtime worker thread.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if state.shutting_down {
                return;
            }
            info!("shutting down");
            state.shutting_down = true;
            state.generation.bump();
            state.chain.close();
            state.pipeline.reset();
        }
        if !self.tracker.wait_idle(self.options.drain_timeout) {
            warn!(
                "shutdown drain timed out with {} tasks in flight",
                self.tracker.inflight()
            );
        }
    }
}

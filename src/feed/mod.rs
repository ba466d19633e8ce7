//! Feed connector.
//!
//! [`FeedConnector`] owns exactly one primary data source at a time, either the push
//! link (with its reconnect timer) or the synthetic [`demo`] generator, plus an
//! independent set of periodic pulls that run regardless of the push link's state.
//!
//! Every source runs as a background [`TaskHandle`] that reports into one internal
//! channel. Events are tagged with the generation of the source that produced them;
//! whenever the primary source changes (new connect attempt, Demo entry, `stop()`) the
//! generation moves on, so a late event from a cancelled timer or socket is discarded
//! instead of touching current state. State transitions happen only inside
//! [`FeedConnector::recv`], on the caller's task.
//!
//! See [`reconnect`] for the state diagram.

pub mod api;
pub mod demo;
pub mod protocol;
pub mod reconnect;
pub mod task;
pub mod transport;

use crate::config::{DemoConfig, FeedConfig, PollingConfig, SessionConfig};
use crate::error::ErrorClass;
use crate::model::{BlockEvent, ConnectionState, FeedMessage, RawEvent, RawTransaction};
use api::{MarketDataApi, PollKind};
use demo::DemoGenerator;
use rand::rngs::StdRng;
use rand::SeedableRng;
use reconnect::{Backoff, ReconnectDecision, ReconnectPolicy};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use task::TaskHandle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use transport::PushTransport;

/// Connector settings, taken from the session configuration.
#[derive(Debug, Clone, Default)]
pub struct FeedSettings {
    /// Push endpoint and reconnect policy
    pub feed: FeedConfig,
    /// Pull cadences
    pub polling: PollingConfig,
    /// Synthetic generator
    pub demo: DemoConfig,
}

impl FeedSettings {
    /// Extract the connector's part of the session configuration.
    pub fn from_session(session: &SessionConfig) -> Self {
        Self {
            feed: session.feed.clone(),
            polling: session.polling.clone(),
            demo: session.demo.clone(),
        }
    }
}

/// Which background sources are running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveSources {
    /// Push link task (handshake or open socket)
    pub push_link: bool,
    /// Pending reconnect delay
    pub reconnect_timer: bool,
    /// Synthetic generator
    pub demo: bool,
    /// Running pollers
    pub pollers: usize,
}

#[derive(Debug)]
enum LinkEvent {
    Opened { generation: u64 },
    Frame { generation: u64, text: String },
    Closed { generation: u64, reason: String },
    ReconnectDue { generation: u64 },
    DemoTransaction { generation: u64, tx: RawTransaction },
    DemoBlock { generation: u64 },
    Poll { epoch: u64, message: FeedMessage },
}

/// Resilient feed with reconnect/backoff and Demo fallback.
pub struct FeedConnector {
    settings: FeedSettings,
    transport: Option<Arc<dyn PushTransport>>,
    api: Option<Arc<dyn MarketDataApi>>,
    state: ConnectionState,
    backoff: Backoff,
    /// Primary-source generation (push link, reconnect timer, demo)
    generation: u64,
    /// Start/stop epoch (pollers)
    epoch: u64,
    events_tx: mpsc::Sender<LinkEvent>,
    events_rx: mpsc::Receiver<LinkEvent>,
    pending: VecDeque<FeedMessage>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    link_task: Option<TaskHandle>,
    reconnect_timer: Option<TaskHandle>,
    demo_task: Option<TaskHandle>,
    pollers: Vec<TaskHandle>,
    last_height: Option<u64>,
    demo_seed: Option<u64>,
}

impl FeedConnector {
    /// Create a stopped connector.
    ///
    /// Without a transport the connector goes straight to Demo on `start()`; without an
    /// API no pollers run.
    pub fn new(
        settings: FeedSettings,
        transport: Option<Arc<dyn PushTransport>>,
        api: Option<Arc<dyn MarketDataApi>>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(settings.feed.channel_capacity.max(1));
        let backoff = Backoff::new(ReconnectPolicy::from_feed(&settings.feed));
        Self {
            settings,
            transport,
            api,
            state: ConnectionState::Disconnected,
            backoff,
            generation: 0,
            epoch: 0,
            events_tx,
            events_rx,
            pending: VecDeque::new(),
            outbound: None,
            link_task: None,
            reconnect_timer: None,
            demo_task: None,
            pollers: Vec::new(),
            last_height: None,
            demo_seed: None,
        }
    }

    /// Seed the demo generator for reproducible runs.
    #[must_use]
    pub fn with_demo_seed(mut self, seed: u64) -> Self {
        self.demo_seed = Some(seed);
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts since the last successful handshake.
    #[must_use]
    pub fn reconnect_attempt(&self) -> u32 {
        self.backoff.attempt()
    }

    /// Highest height this connector has emitted.
    #[must_use]
    pub fn last_height(&self) -> Option<u64> {
        self.last_height
    }

    /// Running background sources.
    #[must_use]
    pub fn sources(&self) -> ActiveSources {
        let running = |task: &Option<TaskHandle>| task.as_ref().is_some_and(TaskHandle::is_active);
        ActiveSources {
            push_link: running(&self.link_task),
            reconnect_timer: running(&self.reconnect_timer),
            demo: running(&self.demo_task),
            pollers: self.pollers.iter().filter(|p| p.is_active()).count(),
        }
    }

    // =========================================================================
    // Start / stop
    // =========================================================================

    /// Start the feed, or retry the push link from Demo.
    ///
    /// From `Disconnected` this starts the pollers and the push link. From `Demo` it
    /// stops the generator first, then retries the push link with a fresh attempt
    /// counter. While a link is open or being established this is a no-op.
    pub fn start(&mut self) {
        match self.state {
            ConnectionState::Open
            | ConnectionState::Connecting
            | ConnectionState::Reconnecting { .. } => {
                debug!(state = self.state.label(), "Feed already started");
            }
            ConnectionState::Disconnected => {
                self.epoch += 1;
                self.backoff.reset();
                self.start_pollers();
                if self.transport.is_some() {
                    info!(url = %self.settings.feed.websocket_url, "Connecting to push feed");
                    self.set_state(ConnectionState::Connecting);
                    self.connect();
                } else {
                    info!("No push transport configured, running synthetic feed");
                    self.enter_demo();
                }
            }
            ConnectionState::Demo => {
                if self.transport.is_none() {
                    debug!("No push transport configured, staying in demo mode");
                    return;
                }
                self.stop_demo();
                self.backoff.reset();
                info!("Leaving demo mode, retrying push feed");
                self.set_state(ConnectionState::Connecting);
                self.connect();
            }
        }
    }

    /// Cancel every timer, socket and poller. Returns `false` if already stopped.
    pub fn stop(&mut self) -> bool {
        if self.state == ConnectionState::Disconnected {
            return false;
        }
        self.cancel_link();
        self.cancel_reconnect_timer();
        self.stop_demo();
        for poller in &mut self.pollers {
            poller.cancel();
        }
        self.pollers.clear();
        self.generation += 1;
        self.epoch += 1;
        self.pending.clear();
        self.state = ConnectionState::Disconnected;
        info!("Feed connector stopped");
        true
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    /// Next normalized message. Cancel-safe.
    ///
    /// Returns `None` only if the internal channel closed, which cannot happen while
    /// the connector is alive.
    pub async fn recv(&mut self) -> Option<FeedMessage> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Some(message);
            }
            let event = self.events_rx.recv().await?;
            self.apply(event);
        }
    }

    fn apply(&mut self, event: LinkEvent) {
        if self.state == ConnectionState::Disconnected {
            trace!(?event, "Event after stop dropped");
            return;
        }
        match event {
            LinkEvent::Opened { generation } if generation == self.generation => {
                self.backoff.reset();
                info!("Push feed connected");
                self.set_state(ConnectionState::Open);
            }
            LinkEvent::Frame { generation, text } if generation == self.generation => {
                self.on_frame(&text);
            }
            LinkEvent::Closed { generation, reason } if generation == self.generation => {
                self.on_closed(&reason);
            }
            LinkEvent::ReconnectDue { generation } if generation == self.generation => {
                self.reconnect_timer = None;
                debug!(attempt = self.backoff.attempt(), "Reconnect timer fired");
                self.connect();
            }
            LinkEvent::DemoTransaction { generation, tx } if generation == self.generation => {
                self.emit(FeedMessage::Event(RawEvent::Transaction(tx)));
            }
            LinkEvent::DemoBlock { generation } if generation == self.generation => {
                let height = self
                    .last_height
                    .unwrap_or(self.settings.demo.initial_height)
                    + 1;
                info!(height, "Synthetic block");
                self.emit(FeedMessage::Event(RawEvent::Block(BlockEvent::at_height(height))));
            }
            LinkEvent::Poll { epoch, message } if epoch == self.epoch => {
                self.emit(message);
            }
            stale => trace!(event = ?stale, "Stale event dropped"),
        }
    }

    fn on_frame(&mut self, text: &str) {
        match protocol::decode(text) {
            Ok(messages) => {
                if protocol::contains_block(&messages) {
                    self.send_track_directive();
                }
                for message in messages {
                    self.emit(message);
                }
            }
            Err(e) => warn!(error = %e, "Dropping malformed push message"),
        }
    }

    fn on_closed(&mut self, reason: &str) {
        self.cancel_link();
        match self.backoff.on_closure() {
            ReconnectDecision::Retry { attempt, delay } => {
                info!(
                    attempt,
                    max_attempts = self.backoff.policy().max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    reason,
                    "Push feed closed, reconnecting"
                );
                self.set_state(ConnectionState::Reconnecting { attempt });
                self.schedule_reconnect(delay);
            }
            ReconnectDecision::Exhausted => {
                warn!(
                    attempts = self.backoff.attempt(),
                    reason, "Max reconnect attempts reached, switching to demo mode"
                );
                self.enter_demo();
            }
        }
    }

    fn emit(&mut self, message: FeedMessage) {
        let height = match &message {
            FeedMessage::Height { height, .. } => Some(*height),
            FeedMessage::Event(RawEvent::Block(block)) => Some(block.height),
            _ => None,
        };
        if let Some(height) = height {
            self.last_height = Some(self.last_height.map_or(height, |h| h.max(height)));
        }
        self.pending.push_back(message);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            self.pending.push_back(FeedMessage::Connection(state));
        }
    }

    fn send_track_directive(&self) {
        let Some(outbound) = &self.outbound else {
            return;
        };
        match protocol::track_next_block() {
            Ok(frame) => {
                if outbound.send(frame).is_err() {
                    debug!("Push link gone before track directive");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode track directive"),
        }
    }

    // =========================================================================
    // Sources
    // =========================================================================

    fn connect(&mut self) {
        let Some(transport) = self.transport.clone() else {
            self.enter_demo();
            return;
        };
        self.cancel_link();
        self.generation += 1;
        let generation = self.generation;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.outbound = Some(outbound_tx);
        let events = self.events_tx.clone();
        let url = self.settings.feed.websocket_url.clone();
        let handshake_timeout = self.settings.feed.handshake_timeout;
        self.link_task = Some(TaskHandle::spawn("push-link", move |shutdown_rx| {
            run_link(
                transport,
                url,
                handshake_timeout,
                generation,
                events,
                outbound_rx,
                shutdown_rx,
            )
        }));
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        self.cancel_reconnect_timer();
        let generation = self.generation;
        let events = self.events_tx.clone();
        self.reconnect_timer = Some(TaskHandle::spawn("reconnect-timer", move |shutdown_rx| {
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        let _ = events.send(LinkEvent::ReconnectDue { generation }).await;
                    }
                    _ = shutdown_rx => {}
                }
            }
        }));
    }

    fn enter_demo(&mut self) {
        if self.state == ConnectionState::Demo {
            return;
        }
        self.cancel_link();
        self.cancel_reconnect_timer();
        self.stop_demo();
        self.generation += 1;
        self.set_state(ConnectionState::Demo);
        for message in demo::seed_messages(&self.settings.demo, self.last_height) {
            self.emit(message);
        }

        let rng = match self.demo_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(self.generation)),
            None => StdRng::from_entropy(),
        };
        let generator = DemoGenerator::new(self.settings.demo.clone(), rng);
        let block_tick = self.settings.demo.block_tick.max(Duration::from_millis(1));
        let generation = self.generation;
        let events = self.events_tx.clone();
        self.demo_task = Some(TaskHandle::spawn("demo", move |shutdown_rx| {
            run_demo(generator, block_tick, generation, events, shutdown_rx)
        }));
        info!("Demo mode started");
    }

    fn stop_demo(&mut self) {
        if let Some(mut demo) = self.demo_task.take() {
            demo.cancel();
            debug!("Demo generator stopped");
        }
    }

    fn cancel_link(&mut self) {
        self.outbound = None;
        if let Some(mut link) = self.link_task.take() {
            link.cancel();
        }
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(mut timer) = self.reconnect_timer.take() {
            timer.cancel();
        }
    }

    fn start_pollers(&mut self) {
        let Some(api) = self.api.clone() else {
            return;
        };
        for poller in &mut self.pollers {
            poller.cancel();
        }
        self.pollers.clear();
        for kind in PollKind::ALL {
            let period = kind.interval(&self.settings.polling);
            if period.is_zero() {
                debug!(endpoint = %kind, "Poller disabled");
                continue;
            }
            let api = Arc::clone(&api);
            let epoch = self.epoch;
            let events = self.events_tx.clone();
            self.pollers.push(TaskHandle::spawn("poller", move |shutdown_rx| {
                run_poller(kind, api, period, epoch, events, shutdown_rx)
            }));
        }
    }
}

impl std::fmt::Debug for FeedConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConnector")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("epoch", &self.epoch)
            .field("sources", &self.sources())
            .finish()
    }
}

// =============================================================================
// Background task bodies
// =============================================================================

async fn run_link(
    transport: Arc<dyn PushTransport>,
    url: String,
    handshake_timeout: Duration,
    generation: u64,
    events: mpsc::Sender<LinkEvent>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let connected = tokio::select! {
        result = tokio::time::timeout(handshake_timeout, transport.connect(&url)) => result,
        _ = &mut shutdown_rx => return,
    };
    let outcome = match connected {
        Ok(Ok(link)) => Ok(link),
        Ok(Err(e)) => Err(format!("handshake failed: {e}")),
        Err(_) => Err(format!(
            "handshake timed out after {}ms",
            handshake_timeout.as_millis()
        )),
    };
    let mut link = match outcome {
        Ok(link) => link,
        Err(reason) => {
            let _ = events.send(LinkEvent::Closed { generation, reason }).await;
            return;
        }
    };

    let subscribed = match protocol::subscription_requests() {
        Ok(frames) => {
            let mut result = Ok(());
            for frame in frames {
                result = link.send_text(frame).await;
                if result.is_err() {
                    break;
                }
            }
            result
        }
        Err(e) => Err(e),
    };
    if let Err(e) = subscribed {
        link.close().await;
        let _ = events
            .send(LinkEvent::Closed {
                generation,
                reason: format!("subscribe failed: {e}"),
            })
            .await;
        return;
    }
    if events.send(LinkEvent::Opened { generation }).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            frame = link.next_text() => match frame {
                Some(Ok(text)) => {
                    if events.send(LinkEvent::Frame { generation, text }).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) if e.class() == ErrorClass::MalformedPayload => {
                    warn!(error = %e, "Dropping undecodable frame");
                }
                Some(Err(e)) => {
                    let _ = events
                        .send(LinkEvent::Closed { generation, reason: e.to_string() })
                        .await;
                    break;
                }
                None => {
                    let _ = events
                        .send(LinkEvent::Closed { generation, reason: "closed by peer".into() })
                        .await;
                    break;
                }
            },
            Some(text) = outbound.recv() => {
                if let Err(e) = link.send_text(text).await {
                    debug!(error = %e, "Outbound frame not sent");
                }
            }
            _ = &mut shutdown_rx => {
                link.close().await;
                break;
            }
        }
    }
}

async fn run_demo(
    mut generator: DemoGenerator<StdRng>,
    block_tick: Duration,
    generation: u64,
    events: mpsc::Sender<LinkEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut next_tx = Instant::now() + generator.next_interval();
    let mut blocks = tokio::time::interval_at(Instant::now() + block_tick, block_tick);
    blocks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(next_tx) => {
                let tx = generator.transaction();
                if events.send(LinkEvent::DemoTransaction { generation, tx }).await.is_err() {
                    break;
                }
                next_tx = Instant::now() + generator.next_interval();
            }
            _ = blocks.tick() => {
                if generator.block_roll()
                    && events.send(LinkEvent::DemoBlock { generation }).await.is_err()
                {
                    break;
                }
            }
            _ = &mut shutdown_rx => break,
        }
    }
}

async fn run_poller(
    kind: PollKind,
    api: Arc<dyn MarketDataApi>,
    period: Duration,
    epoch: u64,
    events: mpsc::Sender<LinkEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => match kind.fetch(api.as_ref()).await {
                Ok(message) => {
                    if events.send(LinkEvent::Poll { epoch, message }).await.is_err() {
                        break;
                    }
                }
                Err(e) => debug!(endpoint = %kind, error = %e, "Poll failed, keeping last value"),
            },
            _ = &mut shutdown_rx => break,
        }
    }
}

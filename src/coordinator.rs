//! Lifecycle coordinator.
//!
//! Owns the session configuration, the [`FeedConnector`] and the
//! [`IngestionPipeline`], and drives them from one task:
//!
//! ```text
//!   FeedConnector::recv ──► IngestionPipeline::handle ──► collaborators
//!   FrameScheduler      ──► IngestionPipeline::tick
//!   AlertOverlay        ──► indicator expiry
//!   LifecycleSignal     ──► destroy() / reconnect()
//! ```
//!
//! Teardown runs in a fixed order and at most once:
//!
//! 1. stop the feed connector (no late event can reach the pipeline afterwards)
//! 2. detach overlays and clear their deadline
//! 3. detach input listeners
//! 4. dispose the entity ledger, then the shared template pool
//! 5. stop the frame loop and release the rendering context

use crate::collaborator::{Collaborator, CollaboratorSet};
use crate::config::SessionConfig;
use crate::effects::AlertReaction;
use crate::feed::FeedConnector;
use crate::model::{FeedMessage, Tier};
use crate::pipeline::IngestionPipeline;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

// =============================================================================
// Lifecycle signals
// =============================================================================

/// Host environment lifecycle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// The host is going away.
    Unload,
    /// The host was hidden. `persisted` marks a reversible cache suspension whose state
    /// will be restored, which does not tear anything down.
    Hide {
        /// Suspended into a restorable cache
        persisted: bool,
    },
    /// Explicit request to leave demo mode and retry the push feed.
    Reconnect,
}

impl LifecycleSignal {
    /// Whether this signal tears the session down.
    #[must_use]
    pub fn destroys(self) -> bool {
        matches!(self, Self::Unload | Self::Hide { persisted: false })
    }
}

/// Cloneable sender for lifecycle signals.
#[derive(Debug, Clone)]
pub struct LifecycleHandle {
    tx: mpsc::UnboundedSender<LifecycleSignal>,
}

impl LifecycleHandle {
    /// Deliver a signal. Returns `false` once the coordinator is gone.
    pub fn send(&self, signal: LifecycleSignal) -> bool {
        self.tx.send(signal).is_ok()
    }

    /// Shorthand for [`LifecycleSignal::Unload`].
    pub fn unload(&self) -> bool {
        self.send(LifecycleSignal::Unload)
    }

    /// Shorthand for [`LifecycleSignal::Hide`].
    pub fn hide(&self, persisted: bool) -> bool {
        self.send(LifecycleSignal::Hide { persisted })
    }

    /// Shorthand for [`LifecycleSignal::Reconnect`].
    pub fn reconnect(&self) -> bool {
        self.send(LifecycleSignal::Reconnect)
    }
}

// =============================================================================
// Frame scheduler
// =============================================================================

/// Frame clock with a cancellation token.
///
/// While armed, [`FrameScheduler::next_frame`] resolves once per frame interval with the
/// elapsed seconds since the previous frame. Cancelling clears the token; a cancelled
/// scheduler never resolves again until re-armed.
#[derive(Debug)]
pub struct FrameScheduler {
    period: Duration,
    token: Option<Interval>,
    last: Option<Instant>,
    frames: u64,
}

impl FrameScheduler {
    /// Unarmed scheduler.
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            token: None,
            last: None,
            frames: 0,
        }
    }

    /// Start ticking. No-op when already armed.
    pub fn arm(&mut self) {
        if self.token.is_some() {
            return;
        }
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.token = Some(interval);
        self.last = None;
    }

    /// Clear the token. Returns `false` when it was not armed.
    pub fn cancel(&mut self) -> bool {
        self.last = None;
        self.token.take().is_some()
    }

    /// Whether the scheduler is armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.token.is_some()
    }

    /// Frames delivered so far.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Wait for the next frame. Returns `(dt_seconds, now)`.
    pub async fn next_frame(&mut self) -> (f64, Instant) {
        let Some(interval) = self.token.as_mut() else {
            return std::future::pending().await;
        };
        let now = interval.tick().await;
        let dt = self
            .last
            .map_or(0.0, |last| now.saturating_duration_since(last).as_secs_f64());
        self.last = Some(now);
        self.frames += 1;
        (dt, now)
    }
}

// =============================================================================
// Alert overlay
// =============================================================================

/// Transient alert indicator.
#[derive(Debug, Default)]
pub struct AlertOverlay {
    visible: Option<(Tier, f64)>,
    deadline: Option<Instant>,
    shown: u64,
    attached: bool,
}

impl AlertOverlay {
    fn new() -> Self {
        Self {
            attached: true,
            ..Default::default()
        }
    }

    /// Show the indicator for an accepted alert.
    pub fn show(&mut self, reaction: &AlertReaction) {
        if !self.attached {
            return;
        }
        self.visible = Some((reaction.tier, reaction.magnitude));
        self.deadline = Some(reaction.indicator_until);
        self.shown += 1;
    }

    /// Hide the indicator once its deadline passed. Returns true if it was hidden.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.visible = None;
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Detach the overlay and drop its deadline.
    pub fn detach(&mut self) {
        self.attached = false;
        self.visible = None;
        self.deadline = None;
    }

    /// Tier and magnitude currently shown.
    #[must_use]
    pub fn visible(&self) -> Option<(Tier, f64)> {
        self.visible
    }

    /// Pending hide deadline.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Indicators shown so far.
    #[must_use]
    pub fn shown(&self) -> u64 {
        self.shown
    }

    /// Whether the overlay is still attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// One step of the ordered teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    /// Feed connector stopped.
    StopFeed,
    /// Overlays detached.
    DetachOverlays,
    /// Input listeners detached.
    DetachListeners,
    /// Ledger and template pool disposed.
    DisposeScene {
        /// Entities disposed
        entities: usize,
        /// Templates released
        templates: usize,
    },
    /// Frame loop stopped and rendering context released.
    ReleaseContext,
}

/// Top-level owner of a session.
pub struct LifecycleCoordinator {
    connector: FeedConnector,
    pipeline: IngestionPipeline,
    frames: FrameScheduler,
    overlay: AlertOverlay,
    signals_tx: mpsc::UnboundedSender<LifecycleSignal>,
    signals_rx: mpsc::UnboundedReceiver<LifecycleSignal>,
    teardown: Vec<TeardownStep>,
    started: bool,
    disposed: bool,
}

impl LifecycleCoordinator {
    /// Wire a connector and collaborators into a new session.
    pub fn new(
        session: &SessionConfig,
        connector: FeedConnector,
        collaborators: CollaboratorSet,
    ) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        Self {
            connector,
            pipeline: IngestionPipeline::new(session, collaborators),
            frames: FrameScheduler::new(session.scene.frame_interval()),
            overlay: AlertOverlay::new(),
            signals_tx,
            signals_rx,
            teardown: Vec::new(),
            started: false,
            disposed: false,
        }
    }

    /// Use a seeded lane generator.
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.pipeline = self.pipeline.with_rng_seed(seed);
        self
    }

    /// Handle for delivering lifecycle signals from elsewhere.
    #[must_use]
    pub fn lifecycle_handle(&self) -> LifecycleHandle {
        LifecycleHandle {
            tx: self.signals_tx.clone(),
        }
    }

    /// Start the feed and the frame loop. No-op when already started or destroyed.
    pub fn start(&mut self) {
        if self.disposed || self.started {
            return;
        }
        self.started = true;
        self.connector.start();
        self.frames.arm();
        info!("Session started");
    }

    /// Run until destroyed. Starts the session if needed.
    pub async fn run(&mut self) {
        self.start();
        while !self.disposed {
            let overlay_deadline = self.overlay.deadline();
            tokio::select! {
                biased;

                Some(signal) = self.signals_rx.recv() => self.on_signal(signal),
                message = self.connector.recv() => match message {
                    Some(message) => self.on_message(message, Instant::now()),
                    None => self.on_feed_closed(),
                },
                (dt, now) = self.frames.next_frame() => self.on_frame(dt, now),
                () = sleep_until_opt(overlay_deadline) => {
                    self.overlay.expire(Instant::now());
                }
            }
        }
        debug!("Coordinator loop exited");
    }

    /// Apply a lifecycle signal.
    pub fn on_signal(&mut self, signal: LifecycleSignal) {
        if signal == LifecycleSignal::Reconnect {
            self.reconnect();
        } else if signal.destroys() {
            info!(?signal, "Lifecycle signal, tearing down");
            self.destroy();
        } else {
            debug!(?signal, "Reversible suspension, keeping session");
        }
    }

    /// Retry the push feed, leaving demo mode if needed.
    ///
    /// Starts the session when it has not started yet. No-op after `destroy`, and while
    /// a push link is open or being established.
    pub fn reconnect(&mut self) {
        if self.disposed {
            debug!("Reconnect after teardown ignored");
            return;
        }
        if !self.started {
            self.start();
            return;
        }
        info!(state = self.connector.state().label(), "Reconnect requested");
        self.connector.start();
    }

    /// The connector's event channel closed. Nothing can arrive any more, so the
    /// session is torn down.
    pub fn on_feed_closed(&mut self) {
        if self.disposed {
            return;
        }
        warn!("Feed channel closed, tearing down");
        self.destroy();
    }

    /// Feed one message through the pipeline.
    pub fn on_message(&mut self, message: FeedMessage, now: Instant) {
        if self.disposed {
            return;
        }
        let outcome = self.pipeline.handle(message, now);
        if let Some(reaction) = outcome.alert {
            self.overlay.show(&reaction);
        }
    }

    /// Advance one frame.
    pub fn on_frame(&mut self, dt: f64, now: Instant) {
        if self.disposed {
            return;
        }
        let removed = self.pipeline.tick(dt, now);
        if !removed.is_empty() {
            trace!(removed = removed.len(), "Entities left the view");
        }
        self.overlay.expire(now);
    }

    /// Tear the session down. Returns `false` when already destroyed.
    pub fn destroy(&mut self) -> bool {
        if self.disposed {
            return false;
        }
        self.disposed = true;

        self.connector.stop();
        self.teardown.push(TeardownStep::StopFeed);

        self.overlay.detach();
        self.teardown.push(TeardownStep::DetachOverlays);

        self.pipeline.collaborators_mut().detach_listeners();
        self.teardown.push(TeardownStep::DetachListeners);

        let (entities, templates) = self.pipeline.dispose_resources();
        self.teardown
            .push(TeardownStep::DisposeScene { entities, templates });

        self.frames.cancel();
        self.pipeline.collaborators_mut().release();
        self.teardown.push(TeardownStep::ReleaseContext);

        info!(entities, templates, "Session destroyed");
        true
    }

    /// Whether `destroy` has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Steps performed by `destroy`, in order.
    #[must_use]
    pub fn teardown_log(&self) -> &[TeardownStep] {
        &self.teardown
    }

    /// The ingestion pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &IngestionPipeline {
        &self.pipeline
    }

    /// The feed connector.
    #[must_use]
    pub fn connector(&self) -> &FeedConnector {
        &self.connector
    }

    /// The alert overlay.
    #[must_use]
    pub fn overlay(&self) -> &AlertOverlay {
        &self.overlay
    }

    /// The frame scheduler.
    #[must_use]
    pub fn frames(&self) -> &FrameScheduler {
        &self.frames
    }
}

impl std::fmt::Debug for LifecycleCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCoordinator")
            .field("connector", &self.connector)
            .field("pipeline", &self.pipeline)
            .field("started", &self.started)
            .field("disposed", &self.disposed)
            .finish()
    }
}

//! Ingestion pipeline.
//!
//! Turns each [`FeedMessage`] into collaborator calls:
//! - transactions are classified into a [`Tier`] and a speed, bound to shared
//!   templates and inserted into the bounded ledger; alert-worthy tiers go through the
//!   [`EffectThrottle`].
//! - blocks bypass classification and are announced only when they raise the
//!   [`ObservedHeight`]; a block at or below it triggers nothing.
//! - aggregate values update the [`DisplayState`] and are forwarded. Non-finite values
//!   are ignored so the display keeps its last good value.

use crate::collaborator::{Collaborator, CollaboratorSet};
use crate::config::{SceneConfig, SessionConfig};
use crate::effects::{AlertReaction, EffectThrottle};
use crate::height::ObservedHeight;
use crate::model::{BlockEvent, ConnectionState, FeedMessage, RawEvent, RawTransaction, Tier};
use crate::scene::entity::{Spawn, VisibleVolume};
use crate::scene::{EntityId, EntityLedger, LedgerStats, SharedResourcePool, VisualEntity};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use tracing::{debug, trace};

/// Blocks between subsidy halvings.
pub const HALVING_INTERVAL: u64 = 210_000;

/// Speed factor applied to the recognizer tiers.
const RECOGNIZER_SPEED_FACTOR: f64 = 0.85;

// =============================================================================
// Classification
// =============================================================================

/// Value thresholds and the fee-to-speed curve.
#[derive(Debug, Clone)]
pub struct Classifier {
    minor_below: u64,
    standard_below: u64,
    notable_below: u64,
    base_speed: f64,
    fee_divisor: f64,
    fee_cap: f64,
    fee_gain: f64,
    default_fee_rate: f64,
}

impl Classifier {
    /// Build from scene settings.
    pub fn new(scene: &SceneConfig) -> Self {
        Self {
            minor_below: scene.minor_below_sats,
            standard_below: scene.standard_below_sats,
            notable_below: scene.notable_below_sats,
            base_speed: scene.base_speed,
            fee_divisor: scene.fee_divisor,
            fee_cap: scene.fee_cap,
            fee_gain: scene.fee_gain,
            default_fee_rate: scene.default_fee_rate,
        }
    }

    /// Tier for a value in satoshi.
    #[must_use]
    pub fn tier(&self, value_sats: u64) -> Tier {
        if value_sats < self.minor_below {
            Tier::Minor
        } else if value_sats < self.standard_below {
            Tier::Standard
        } else if value_sats < self.notable_below {
            Tier::Notable
        } else {
            Tier::Extreme
        }
    }

    /// Reported fee rate, or the default when absent or not a finite positive number.
    #[must_use]
    pub fn effective_fee_rate(&self, reported: Option<f64>) -> f64 {
        reported
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .unwrap_or(self.default_fee_rate)
    }

    /// `base + min(fee / divisor, cap) × gain`, slowed for the recognizer tiers.
    #[must_use]
    pub fn speed(&self, tier: Tier, fee_rate: f64) -> f64 {
        let boost = (fee_rate / self.fee_divisor).min(self.fee_cap) * self.fee_gain;
        let speed = self.base_speed + boost.max(0.0);
        match tier {
            Tier::Notable | Tier::Extreme => speed * RECOGNIZER_SPEED_FACTOR,
            Tier::Minor | Tier::Standard => speed,
        }
    }
}

// =============================================================================
// Display state
// =============================================================================

/// Last good value of everything shown on the metrics display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayState {
    /// Observed chain height
    pub height: Option<u64>,
    /// Spot price (USD)
    pub price: Option<f64>,
    /// Fee rate (sat/vB)
    pub fee_rate: Option<f64>,
    /// Mempool transaction count
    pub mempool_size: Option<u64>,
    /// Hash rate (H/s)
    pub hash_rate: Option<f64>,
    /// Difficulty-adjustment progress, percent
    pub difficulty_progress: Option<f64>,
    /// Expected difficulty change, percent
    pub difficulty_change: Option<f64>,
    /// Transactions seen since the last block
    pub tx_since_last_block: u64,
    /// Blocks announced this session
    pub blocks_found: u64,
    /// Feed connection state
    pub connection: Option<ConnectionState>,
    /// Current pulse intensity
    pub pulse_intensity: f64,
}

impl DisplayState {
    /// Height of the next subsidy halving.
    #[must_use]
    pub fn next_halving_height(&self) -> Option<u64> {
        self.height
            .map(|h| (h / HALVING_INTERVAL + 1) * HALVING_INTERVAL)
    }

    /// Blocks remaining until the next halving.
    #[must_use]
    pub fn blocks_until_halving(&self) -> Option<u64> {
        Some(self.next_halving_height()? - self.height?)
    }
}

/// What one `handle` call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandleOutcome {
    /// Entity inserted for a transaction
    pub spawned: Option<EntityId>,
    /// Entities evicted to make room, already disposed
    pub evicted: Vec<EntityId>,
    /// Height of an announced block
    pub block: Option<u64>,
    /// Accepted alert
    pub alert: Option<AlertReaction>,
}

// =============================================================================
// Pipeline
// =============================================================================

/// Classifies feed messages, maintains the ledger and informs collaborators.
pub struct IngestionPipeline {
    classifier: Classifier,
    volume: VisibleVolume,
    lane_width: f64,
    ledger: EntityLedger,
    pool: SharedResourcePool,
    throttle: EffectThrottle,
    height: ObservedHeight,
    display: DisplayState,
    collaborators: CollaboratorSet,
    rng: StdRng,
    disposed: bool,
}

impl IngestionPipeline {
    /// Build the pipeline for a session.
    pub fn new(session: &SessionConfig, collaborators: CollaboratorSet) -> Self {
        let throttle = EffectThrottle::new(&session.effects);
        let display = DisplayState {
            pulse_intensity: throttle.pulse().baseline(),
            ..Default::default()
        };
        Self {
            classifier: Classifier::new(&session.scene),
            volume: VisibleVolume::from_scene(&session.scene),
            lane_width: session.scene.lane_width,
            ledger: EntityLedger::new(session.scene.ledger_capacity),
            pool: SharedResourcePool::new(),
            throttle,
            height: ObservedHeight::new(),
            display,
            collaborators,
            rng: StdRng::from_entropy(),
            disposed: false,
        }
    }

    /// Use a seeded lane generator.
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Process one message.
    pub fn handle(&mut self, message: FeedMessage, now: Instant) -> HandleOutcome {
        let mut outcome = HandleOutcome::default();
        if self.disposed {
            trace!("Message after teardown ignored");
            return outcome;
        }

        match message {
            FeedMessage::Event(RawEvent::Transaction(tx)) => self.on_transaction(tx, now, &mut outcome),
            FeedMessage::Event(RawEvent::Block(block)) => self.on_block(block, &mut outcome),
            FeedMessage::Height { height, source } => {
                if let Some(height) = self.height.observe(height) {
                    trace!(height, ?source, "Height reported");
                    self.advance_height(height);
                }
            }
            FeedMessage::MempoolSize(count) => {
                self.display.mempool_size = Some(count);
                self.collaborators.on_mempool_size_update(count);
            }
            FeedMessage::FeeRate(rate) if rate.is_finite() && rate >= 0.0 => {
                self.display.fee_rate = Some(rate);
                self.collaborators.on_fee_rate_update(rate);
            }
            FeedMessage::Price(price) if price.is_finite() && price > 0.0 => {
                self.display.price = Some(price);
                self.collaborators.on_price_update(price);
            }
            FeedMessage::HashRate(rate) if rate.is_finite() && rate > 0.0 => {
                self.display.hash_rate = Some(rate);
                self.collaborators.on_hash_rate_update(rate);
            }
            FeedMessage::Difficulty {
                progress_percent,
                change_percent,
            } if progress_percent.is_finite() && change_percent.is_finite() => {
                self.display.difficulty_progress = Some(progress_percent);
                self.display.difficulty_change = Some(change_percent);
                self.collaborators
                    .on_difficulty_update(progress_percent, change_percent);
            }
            FeedMessage::Connection(state) => {
                self.display.connection = Some(state);
                self.collaborators.on_connection_state(state);
            }
            other => debug!(message = ?other, "Non-finite aggregate value ignored"),
        }
        outcome
    }

    fn on_transaction(&mut self, tx: RawTransaction, now: Instant, outcome: &mut HandleOutcome) {
        let tier = self.classifier.tier(tx.value_sats);
        let fee_rate = self.classifier.effective_fee_rate(tx.fee_rate);
        let speed = self.classifier.speed(tier, fee_rate);
        let Some(templates) = self.pool.templates_for_tier(tier) else {
            debug!(%tier, "Template pool released, transaction skipped");
            return;
        };

        let half = self.lane_width / 2.0;
        let lane = if half > 0.0 {
            self.rng.gen_range(-half..half)
        } else {
            0.0
        };
        let magnitude = tx.value_coins();
        let id = self.ledger.allocate_id();
        let entity = VisualEntity::new(
            id,
            Spawn {
                txid: tx.txid,
                tier,
                value_sats: tx.value_sats,
                fee_rate,
                lane,
                speed,
            },
            self.volume,
            templates,
        );

        outcome.evicted = self.ledger.insert(entity);
        for evicted in &outcome.evicted {
            self.collaborators.on_entity_removed(*evicted);
        }
        if let Some(entity) = self.ledger.get(id) {
            self.collaborators.on_entity_spawned(entity);
            outcome.spawned = Some(id);
        }
        self.display.tx_since_last_block += 1;

        if self.throttle.is_alert_worthy(tier) {
            if let Some(reaction) = self.throttle.trigger(tier, magnitude, now) {
                debug!(%tier, btc = magnitude, "Alert");
                self.collaborators.on_alert(tier, magnitude);
                outcome.alert = Some(reaction);
            }
        }
    }

    fn on_block(&mut self, block: BlockEvent, outcome: &mut HandleOutcome) {
        let Some(height) = self.height.observe(block.height) else {
            debug!(
                height = block.height,
                observed = ?self.height.get(),
                "Block at or below observed height ignored"
            );
            return;
        };
        self.display.tx_since_last_block = 0;
        self.display.blocks_found += 1;
        self.advance_height(height);
        self.collaborators.on_block_found(&block);
        outcome.block = Some(height);
    }

    fn advance_height(&mut self, height: u64) {
        self.display.height = Some(height);
        debug!(
            height,
            blocks_until_halving = ?self.display.blocks_until_halving(),
            "Height advanced"
        );
        self.collaborators.on_height_changed(height);
    }

    /// Advance entities by `dt` seconds and the pulse to `now`. Returns removed ids.
    pub fn tick(&mut self, dt: f64, now: Instant) -> Vec<EntityId> {
        if self.disposed {
            return Vec::new();
        }
        let removed = self.ledger.tick(dt);
        for id in &removed {
            self.collaborators.on_entity_removed(*id);
        }
        self.display.pulse_intensity = self.throttle.advance(now);
        removed
    }

    /// Dispose every entity, then the shared templates. Returns `(entities, templates)`
    /// released; zero on repeated calls.
    pub fn dispose_resources(&mut self) -> (usize, usize) {
        self.disposed = true;
        let entities = self.ledger.dispose_all();
        let templates = self.pool.dispose();
        (entities, templates)
    }

    /// Whether `dispose_resources` has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Collaborator fan-out.
    pub fn collaborators_mut(&mut self) -> &mut CollaboratorSet {
        &mut self.collaborators
    }

    /// Display values.
    #[must_use]
    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    /// Observed height.
    #[must_use]
    pub fn observed_height(&self) -> Option<u64> {
        self.height.get()
    }

    /// The entity ledger.
    #[must_use]
    pub fn ledger(&self) -> &EntityLedger {
        &self.ledger
    }

    /// Per-tier population.
    #[must_use]
    pub fn stats(&self) -> LedgerStats {
        self.ledger.stats()
    }

    /// The shared template pool.
    #[must_use]
    pub fn pool(&self) -> &SharedResourcePool {
        &self.pool
    }

    /// The alert throttle.
    #[must_use]
    pub fn throttle(&self) -> &EffectThrottle {
        &self.throttle
    }
}

impl std::fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("entities", &self.ledger.len())
            .field("templates", &self.pool.len())
            .field("height", &self.height.get())
            .field("disposed", &self.disposed)
            .finish()
    }
}

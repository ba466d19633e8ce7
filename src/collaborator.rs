//! Outbound collaborator contract.
//!
//! The scene renderer, the audio engine and the metrics display live outside this
//! crate. They receive typed calls from the ingestion pipeline through the
//! [`Collaborator`] trait. Every method has a no-op default so a collaborator only
//! implements what it consumes.
//!
//! Calls are made from the single coordinator task, in arrival order, and never with a
//! decreasing height.

use crate::model::{BlockEvent, ConnectionState, Tier};
use crate::scene::{EntityId, VisualEntity};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Receiver of core updates (scene, audio, display).
pub trait Collaborator: Send {
    /// Observed chain height increased.
    fn on_height_changed(&mut self, _height: u64) {}

    /// Difficulty-adjustment progress and expected change, in percent.
    fn on_difficulty_update(&mut self, _progress_percent: f64, _change_percent: f64) {}

    /// Network hash rate (H/s).
    fn on_hash_rate_update(&mut self, _hash_rate: f64) {}

    /// Spot price (USD).
    fn on_price_update(&mut self, _price: f64) {}

    /// Mempool transaction count.
    fn on_mempool_size_update(&mut self, _count: u64) {}

    /// Fee rate (sat/vB).
    fn on_fee_rate_update(&mut self, _rate: f64) {}

    /// A new entity entered the ledger.
    fn on_entity_spawned(&mut self, _entity: &VisualEntity) {}

    /// An entity left the ledger (evicted or out of view). Already disposed.
    fn on_entity_removed(&mut self, _id: EntityId) {}

    /// A block above the observed height arrived.
    fn on_block_found(&mut self, _block: &BlockEvent) {}

    /// An alert-worthy event passed the throttle.
    fn on_alert(&mut self, _tier: Tier, _magnitude: f64) {}

    /// Feed connection state changed.
    fn on_connection_state(&mut self, _state: ConnectionState) {}

    /// Stop listening for user input. Called once during teardown.
    fn detach_listeners(&mut self) {}

    /// Release the rendering context. Called once, last, during teardown.
    fn release(&mut self) {}
}

/// Ordered fan-out to several collaborators.
#[derive(Default)]
pub struct CollaboratorSet {
    members: Vec<Box<dyn Collaborator>>,
}

impl CollaboratorSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a collaborator; calls are delivered in registration order.
    pub fn push(&mut self, collaborator: Box<dyn Collaborator>) {
        self.members.push(collaborator);
    }

    /// Builder form of [`push`](Self::push).
    #[must_use]
    pub fn with(mut self, collaborator: Box<dyn Collaborator>) -> Self {
        self.push(collaborator);
        self
    }

    /// Number of registered collaborators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn each(&mut self, mut f: impl FnMut(&mut dyn Collaborator)) {
        for member in &mut self.members {
            f(member.as_mut());
        }
    }
}

impl std::fmt::Debug for CollaboratorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaboratorSet")
            .field("members", &self.members.len())
            .finish()
    }
}

impl Collaborator for CollaboratorSet {
    fn on_height_changed(&mut self, height: u64) {
        self.each(|c| c.on_height_changed(height));
    }

    fn on_difficulty_update(&mut self, progress_percent: f64, change_percent: f64) {
        self.each(|c| c.on_difficulty_update(progress_percent, change_percent));
    }

    fn on_hash_rate_update(&mut self, hash_rate: f64) {
        self.each(|c| c.on_hash_rate_update(hash_rate));
    }

    fn on_price_update(&mut self, price: f64) {
        self.each(|c| c.on_price_update(price));
    }

    fn on_mempool_size_update(&mut self, count: u64) {
        self.each(|c| c.on_mempool_size_update(count));
    }

    fn on_fee_rate_update(&mut self, rate: f64) {
        self.each(|c| c.on_fee_rate_update(rate));
    }

    fn on_entity_spawned(&mut self, entity: &VisualEntity) {
        self.each(|c| c.on_entity_spawned(entity));
    }

    fn on_entity_removed(&mut self, id: EntityId) {
        self.each(|c| c.on_entity_removed(id));
    }

    fn on_block_found(&mut self, block: &BlockEvent) {
        self.each(|c| c.on_block_found(block));
    }

    fn on_alert(&mut self, tier: Tier, magnitude: f64) {
        self.each(|c| c.on_alert(tier, magnitude));
    }

    fn on_connection_state(&mut self, state: ConnectionState) {
        self.each(|c| c.on_connection_state(state));
    }

    fn detach_listeners(&mut self) {
        self.each(|c| c.detach_listeners());
    }

    fn release(&mut self) {
        self.each(|c| c.release());
    }
}

// =============================================================================
// Tracing collaborator
// =============================================================================

/// Headless display: logs every outbound call.
#[derive(Debug, Default)]
pub struct TracingCollaborator;

impl Collaborator for TracingCollaborator {
    fn on_height_changed(&mut self, height: u64) {
        info!(height, "Height");
    }

    fn on_difficulty_update(&mut self, progress_percent: f64, change_percent: f64) {
        info!(
            progress = format_args!("{progress_percent:.1}%"),
            change = format_args!("{change_percent:+.2}%"),
            "Difficulty adjustment"
        );
    }

    fn on_hash_rate_update(&mut self, hash_rate: f64) {
        info!(eh_s = format_args!("{:.1}", hash_rate / 1e18), "Hash rate");
    }

    fn on_price_update(&mut self, price: f64) {
        info!(usd = format_args!("{price:.0}"), "Price");
    }

    fn on_mempool_size_update(&mut self, count: u64) {
        info!(count, "Mempool size");
    }

    fn on_fee_rate_update(&mut self, rate: f64) {
        info!(sat_vb = format_args!("{rate:.1}"), "Fee rate");
    }

    fn on_entity_spawned(&mut self, entity: &VisualEntity) {
        debug!(
            id = %entity.id(),
            tier = %entity.tier(),
            btc = format_args!("{:.4}", entity.value_sats() as f64 / crate::model::SATS_PER_COIN as f64),
            speed = format_args!("{:.1}", entity.motion().speed),
            "Entity spawned"
        );
    }

    fn on_entity_removed(&mut self, id: EntityId) {
        debug!(%id, "Entity removed");
    }

    fn on_block_found(&mut self, block: &BlockEvent) {
        info!(height = block.height, id = ?block.id, "Block found");
    }

    fn on_alert(&mut self, tier: Tier, magnitude: f64) {
        info!(%tier, btc = format_args!("{magnitude:.2}"), "Alert");
    }

    fn on_connection_state(&mut self, state: ConnectionState) {
        info!(state = state.label(), "Connection state");
    }
}

// =============================================================================
// Recording collaborator
// =============================================================================

/// A captured outbound call.
#[derive(Debug, Clone, PartialEq)]
pub enum CollaboratorCall {
    /// `on_height_changed`
    HeightChanged(u64),
    /// `on_difficulty_update`
    Difficulty(f64, f64),
    /// `on_hash_rate_update`
    HashRate(f64),
    /// `on_price_update`
    Price(f64),
    /// `on_mempool_size_update`
    MempoolSize(u64),
    /// `on_fee_rate_update`
    FeeRate(f64),
    /// `on_entity_spawned`
    Spawned {
        /// Entity id
        id: EntityId,
        /// Entity tier
        tier: Tier,
    },
    /// `on_entity_removed`
    Removed(EntityId),
    /// `on_block_found`
    BlockFound(u64),
    /// `on_alert`
    Alert(Tier, f64),
    /// `on_connection_state`
    Connection(ConnectionState),
    /// `detach_listeners`
    DetachListeners,
    /// `release`
    Release,
}

/// Collaborator that records every call into a shared log. Clones share the log, so a
/// test keeps one clone and hands another to the coordinator.
#[derive(Debug, Clone, Default)]
pub struct RecordingCollaborator {
    calls: Arc<Mutex<Vec<CollaboratorCall>>>,
}

impl RecordingCollaborator {
    /// New, empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all calls so far.
    #[must_use]
    pub fn calls(&self) -> Vec<CollaboratorCall> {
        self.calls.lock().clone()
    }

    /// Calls matching a predicate.
    pub fn filter(&self, predicate: impl Fn(&CollaboratorCall) -> bool) -> Vec<CollaboratorCall> {
        self.calls.lock().iter().filter(|c| predicate(c)).cloned().collect()
    }

    /// Tiers of spawned entities, in order.
    #[must_use]
    pub fn spawned_tiers(&self) -> Vec<Tier> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                CollaboratorCall::Spawned { tier, .. } => Some(*tier),
                _ => None,
            })
            .collect()
    }

    /// Number of `on_alert` calls.
    #[must_use]
    pub fn alert_count(&self) -> usize {
        self.filter(|c| matches!(c, CollaboratorCall::Alert(..))).len()
    }

    /// Heights passed to `on_height_changed`, in order.
    #[must_use]
    pub fn heights(&self) -> Vec<u64> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                CollaboratorCall::HeightChanged(h) => Some(*h),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: CollaboratorCall) {
        self.calls.lock().push(call);
    }
}

impl Collaborator for RecordingCollaborator {
    fn on_height_changed(&mut self, height: u64) {
        self.record(CollaboratorCall::HeightChanged(height));
    }

    fn on_difficulty_update(&mut self, progress_percent: f64, change_percent: f64) {
        self.record(CollaboratorCall::Difficulty(progress_percent, change_percent));
    }

    fn on_hash_rate_update(&mut self, hash_rate: f64) {
        self.record(CollaboratorCall::HashRate(hash_rate));
    }

    fn on_price_update(&mut self, price: f64) {
        self.record(CollaboratorCall::Price(price));
    }

    fn on_mempool_size_update(&mut self, count: u64) {
        self.record(CollaboratorCall::MempoolSize(count));
    }

    fn on_fee_rate_update(&mut self, rate: f64) {
        self.record(CollaboratorCall::FeeRate(rate));
    }

    fn on_entity_spawned(&mut self, entity: &VisualEntity) {
        self.record(CollaboratorCall::Spawned {
            id: entity.id(),
            tier: entity.tier(),
        });
    }

    fn on_entity_removed(&mut self, id: EntityId) {
        self.record(CollaboratorCall::Removed(id));
    }

    fn on_block_found(&mut self, block: &BlockEvent) {
        self.record(CollaboratorCall::BlockFound(block.height));
    }

    fn on_alert(&mut self, tier: Tier, magnitude: f64) {
        self.record(CollaboratorCall::Alert(tier, magnitude));
    }

    fn on_connection_state(&mut self, state: ConnectionState) {
        self.record(CollaboratorCall::Connection(state));
    }

    fn detach_listeners(&mut self) {
        self.record(CollaboratorCall::DetachListeners);
    }

    fn release(&mut self) {
        self.record(CollaboratorCall::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_fans_out_in_registration_order() {
        let first = RecordingCollaborator::new();
        let second = RecordingCollaborator::new();
        let mut set = CollaboratorSet::new()
            .with(Box::new(first.clone()))
            .with(Box::new(second.clone()));

        set.on_height_changed(10);
        set.on_alert(Tier::Extreme, 250.0);

        assert_eq!(set.len(), 2);
        for recorder in [&first, &second] {
            assert_eq!(
                recorder.calls(),
                vec![
                    CollaboratorCall::HeightChanged(10),
                    CollaboratorCall::Alert(Tier::Extreme, 250.0)
                ]
            );
        }
    }

    #[test]
    fn default_methods_are_no_ops() {
        struct Silent;
        impl Collaborator for Silent {}

        let mut silent = Silent;
        silent.on_price_update(1.0);
        silent.release();
    }

    #[test]
    fn recorder_helpers() {
        let mut recorder = RecordingCollaborator::new();
        recorder.on_height_changed(1);
        recorder.on_height_changed(2);
        recorder.on_alert(Tier::Notable, 20.0);
        assert_eq!(recorder.heights(), vec![1, 2]);
        assert_eq!(recorder.alert_count(), 1);
    }
}

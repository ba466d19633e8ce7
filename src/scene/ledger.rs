//! Bounded entity ledger.
//!
//! Insertion-ordered collection of live [`VisualEntity`] instances with a hard
//! capacity. Inserting into a full ledger evicts the oldest entity first, and every
//! removal path (eviction, leaving the visible volume, final teardown) disposes the
//! entity's owned resources before the entity leaves the collection.

use super::entity::{EntityId, VisualEntity};
use crate::model::Tier;
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Per-tier population snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    /// Live entities per tier, indexed in `Tier::ALL` order
    pub per_tier: [usize; 4],
    /// Total live entities
    pub total: usize,
    /// Entities evicted for capacity since creation
    pub evicted: u64,
    /// Entities that left the visible volume since creation
    pub exited: u64,
}

impl LedgerStats {
    /// Live count for one tier.
    #[must_use]
    pub fn count(&self, tier: Tier) -> usize {
        self.per_tier[tier_index(tier)]
    }
}

fn tier_index(tier: Tier) -> usize {
    match tier {
        Tier::Minor => 0,
        Tier::Standard => 1,
        Tier::Notable => 2,
        Tier::Extreme => 3,
    }
}

/// FIFO collection of live entities, never larger than its capacity.
#[derive(Debug)]
pub struct EntityLedger {
    entries: VecDeque<VisualEntity>,
    capacity: usize,
    next_id: u64,
    evicted: u64,
    exited: u64,
    released_materials: usize,
    disposed: bool,
}

impl EntityLedger {
    /// Create an empty ledger. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 0,
            evicted: 0,
            exited: 0,
            released_materials: 0,
            disposed: false,
        }
    }

    /// Reserve the id for the next entity.
    pub fn allocate_id(&mut self) -> EntityId {
        self.next_id += 1;
        EntityId(self.next_id)
    }

    /// Insert an entity, evicting the oldest entries while the ledger is full.
    ///
    /// Returns the ids of evicted entities, already disposed. After teardown the
    /// entity is disposed immediately and nothing is inserted.
    pub fn insert(&mut self, mut entity: VisualEntity) -> Vec<EntityId> {
        if self.disposed {
            self.released_materials += entity.dispose();
            debug!(id = %entity.id(), "Insert after teardown ignored");
            return Vec::new();
        }

        let mut evicted = Vec::new();
        while self.entries.len() >= self.capacity {
            match self.evict_oldest() {
                Some(id) => evicted.push(id),
                None => break,
            }
        }

        trace!(id = %entity.id(), tier = %entity.tier(), "Entity inserted");
        self.entries.push_back(entity);
        evicted
    }

    /// Dispose and remove the oldest entity.
    pub fn evict_oldest(&mut self) -> Option<EntityId> {
        let mut oldest = self.entries.pop_front()?;
        self.released_materials += oldest.dispose();
        self.evicted += 1;
        trace!(id = %oldest.id(), tier = %oldest.tier(), "Entity evicted for capacity");
        Some(oldest.id())
    }

    /// Advance every entity by `dt` seconds and remove those that left the visible
    /// volume. Returns the removed ids in insertion order.
    pub fn tick(&mut self, dt: f64) -> Vec<EntityId> {
        let mut removed = Vec::new();
        let mut released = 0;
        self.entries.retain_mut(|entity| {
            if entity.integrate(dt) {
                true
            } else {
                released += entity.dispose();
                removed.push(entity.id());
                false
            }
        });
        self.released_materials += released;
        self.exited += removed.len() as u64;
        removed
    }

    /// Dispose every entity and refuse further inserts. Returns the number of entities
    /// disposed; zero on repeated calls.
    pub fn dispose_all(&mut self) -> usize {
        if self.disposed {
            return 0;
        }
        self.disposed = true;
        let count = self.entries.len();
        for mut entity in self.entries.drain(..) {
            self.released_materials += entity.dispose();
        }
        debug!(count, "Entity ledger disposed");
        count
    }

    /// Look up a live entity.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&VisualEntity> {
        self.entries.iter().find(|entity| entity.id() == id)
    }

    /// Live entities, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &VisualEntity> {
        self.entries.iter()
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no live entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum population.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether `dispose_all` has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Total owned materials released across all removals.
    #[must_use]
    pub fn released_materials(&self) -> usize {
        self.released_materials
    }

    /// Population snapshot.
    #[must_use]
    pub fn stats(&self) -> LedgerStats {
        let mut stats = LedgerStats {
            total: self.entries.len(),
            evicted: self.evicted,
            exited: self.exited,
            ..Default::default()
        };
        for entity in &self.entries {
            stats.per_tier[tier_index(entity.tier())] += 1;
        }
        stats
    }
}

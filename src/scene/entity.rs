//! Visual entities.
//!
//! A [`VisualEntity`] is one classified transaction travelling down its lane. It borrows
//! its shapes from the [`SharedResourcePool`](super::pool::SharedResourcePool) through
//! `Arc<SharedTemplate>` handles and owns only its transform and a small set of
//! per-instance materials ([`InstanceResources`]), which it disposes exactly once.

use super::pool::SharedTemplate;
use crate::config::SceneConfig;
use crate::model::Tier;
use std::fmt;
use std::sync::Arc;

/// Ledger-assigned identifier. Collaborators refer to entities only by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity-{}", self.0)
    }
}

// =============================================================================
// Instance resources
// =============================================================================

/// Per-instance material (colour + opacity). Not shared between entities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceMaterial {
    /// 0xRRGGBB
    pub color: u32,
    /// 0.0 ..= 1.0
    pub opacity: f32,
}

impl InstanceMaterial {
    const fn new(color: u32, opacity: f32) -> Self {
        Self { color, opacity }
    }
}

/// Materials owned by a single entity.
///
/// The hitbox material is shared by every entity and is not part of this set.
#[derive(Debug)]
pub struct InstanceResources {
    materials: Vec<InstanceMaterial>,
    disposed: bool,
}

impl InstanceResources {
    /// Allocate the owned materials for a tier.
    pub fn for_tier(tier: Tier) -> Self {
        let materials = match tier {
            Tier::Minor => vec![
                InstanceMaterial::new(0x00ff_ff, 1.0),
                InstanceMaterial::new(0x00ff_ff, 0.3),
                InstanceMaterial::new(0x00ff_ff, 0.5),
            ],
            Tier::Standard => vec![
                InstanceMaterial::new(0xff66_00, 1.0),
                InstanceMaterial::new(0xffaa_00, 0.9),
                InstanceMaterial::new(0xff66_00, 0.3),
                InstanceMaterial::new(0xff66_00, 0.4),
                InstanceMaterial::new(0xffaa_00, 0.6),
            ],
            Tier::Notable => recognizer_materials(0xff00_44),
            Tier::Extreme => recognizer_materials(0xff00_00),
        };
        Self {
            materials,
            disposed: false,
        }
    }

    /// Owned materials, empty once disposed.
    #[must_use]
    pub fn materials(&self) -> &[InstanceMaterial] {
        &self.materials
    }

    /// Whether `dispose` has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Release the owned materials. Returns how many were released; later calls
    /// release nothing.
    pub fn dispose(&mut self) -> usize {
        if self.disposed {
            return 0;
        }
        self.disposed = true;
        let released = self.materials.len();
        self.materials.clear();
        released
    }
}

fn recognizer_materials(color: u32) -> Vec<InstanceMaterial> {
    vec![
        InstanceMaterial::new(color, 1.0),
        InstanceMaterial::new(color, 1.0),
        InstanceMaterial::new(0xffff_ff, 1.0),
        InstanceMaterial::new(color, 0.25),
        InstanceMaterial::new(0x0000_00, 0.5),
        InstanceMaterial::new(color, 0.8),
    ]
}

// =============================================================================
// Motion
// =============================================================================

/// Depth band entities travel through: spawn at the far edge, leave past the near edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleVolume {
    /// Spawn depth
    pub spawn_depth: f64,
    /// Exit depth
    pub exit_depth: f64,
}

impl VisibleVolume {
    /// Build from scene settings.
    pub fn from_scene(scene: &SceneConfig) -> Self {
        Self {
            spawn_depth: scene.spawn_depth,
            exit_depth: scene.exit_depth,
        }
    }

    /// Returns true while `depth` has not passed the exit edge.
    #[must_use]
    pub fn contains(&self, depth: f64) -> bool {
        depth <= self.exit_depth
    }
}

/// Transform state of an entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motion {
    /// Lateral offset (x)
    pub lane: f64,
    /// Hover height (y)
    pub height: f64,
    /// Depth (z), grows toward the viewer
    pub depth: f64,
    /// Forward speed in units per second
    pub speed: f64,
}

/// Resting hover height per tier.
#[must_use]
pub fn hover_height(tier: Tier) -> f64 {
    match tier {
        Tier::Minor => 0.5,
        Tier::Standard => 1.0,
        Tier::Notable => 8.0,
        Tier::Extreme => 15.0,
    }
}

const RECOGNIZER_BOB_AMPLITUDE: f64 = 0.5;
const RECOGNIZER_BOB_RATE: f64 = 2.0;

// =============================================================================
// Entity
// =============================================================================

/// A classified transaction in the scene.
#[derive(Debug)]
pub struct VisualEntity {
    id: EntityId,
    txid: String,
    tier: Tier,
    value_sats: u64,
    fee_rate: f64,
    motion: Motion,
    volume: VisibleVolume,
    age: f64,
    active: bool,
    templates: Vec<Arc<SharedTemplate>>,
    resources: InstanceResources,
}

/// Everything needed to place a new entity.
#[derive(Debug)]
pub struct Spawn {
    /// Source transaction id
    pub txid: String,
    /// Classified tier
    pub tier: Tier,
    /// Transaction value in satoshi
    pub value_sats: u64,
    /// Effective fee rate used for the speed
    pub fee_rate: f64,
    /// Lateral lane
    pub lane: f64,
    /// Forward speed
    pub speed: f64,
}

impl VisualEntity {
    /// Create an entity at the far edge of `volume`, bound to shared `templates`.
    pub fn new(
        id: EntityId,
        spawn: Spawn,
        volume: VisibleVolume,
        templates: Vec<Arc<SharedTemplate>>,
    ) -> Self {
        let motion = Motion {
            lane: spawn.lane,
            height: hover_height(spawn.tier),
            depth: volume.spawn_depth,
            speed: spawn.speed,
        };
        Self {
            id,
            txid: spawn.txid,
            tier: spawn.tier,
            value_sats: spawn.value_sats,
            fee_rate: spawn.fee_rate,
            motion,
            volume,
            age: 0.0,
            active: true,
            templates,
            resources: InstanceResources::for_tier(spawn.tier),
        }
    }

    /// Ledger id
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Source transaction id
    #[must_use]
    pub fn txid(&self) -> &str {
        &self.txid
    }

    /// Classified tier
    #[must_use]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Value in satoshi
    #[must_use]
    pub fn value_sats(&self) -> u64 {
        self.value_sats
    }

    /// Effective fee rate (sat/vB)
    #[must_use]
    pub fn fee_rate(&self) -> f64 {
        self.fee_rate
    }

    /// Current transform
    #[must_use]
    pub fn motion(&self) -> &Motion {
        &self.motion
    }

    /// Shared shapes this entity is drawn with
    #[must_use]
    pub fn templates(&self) -> &[Arc<SharedTemplate>] {
        &self.templates
    }

    /// Owned materials
    #[must_use]
    pub fn resources(&self) -> &InstanceResources {
        &self.resources
    }

    /// False once the entity has left the visible volume or was disposed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Advance by `dt` seconds. Returns whether the entity is still active.
    pub fn integrate(&mut self, dt: f64) -> bool {
        if !self.active {
            return false;
        }
        self.age += dt;
        self.motion.depth += self.motion.speed * dt;
        if matches!(self.tier, Tier::Notable | Tier::Extreme) {
            self.motion.height = hover_height(self.tier)
                + (self.age * RECOGNIZER_BOB_RATE).sin() * RECOGNIZER_BOB_AMPLITUDE;
        }
        if !self.volume.contains(self.motion.depth) {
            self.active = false;
        }
        self.active
    }

    /// Release owned resources and drop the template handles. Returns the number of
    /// materials released (zero on repeated calls).
    pub fn dispose(&mut self) -> usize {
        self.active = false;
        self.templates.clear();
        self.resources.dispose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::pool::SharedResourcePool;

    fn spawn(tier: Tier, speed: f64) -> Spawn {
        Spawn {
            txid: "00".repeat(32),
            tier,
            value_sats: 1,
            fee_rate: 10.0,
            lane: 3.0,
            speed,
        }
    }

    fn volume() -> VisibleVolume {
        VisibleVolume::from_scene(&SceneConfig::default())
    }

    #[test]
    fn material_counts_per_tier() {
        assert_eq!(InstanceResources::for_tier(Tier::Minor).materials().len(), 3);
        assert_eq!(InstanceResources::for_tier(Tier::Standard).materials().len(), 5);
        assert_eq!(InstanceResources::for_tier(Tier::Notable).materials().len(), 6);
        assert_eq!(InstanceResources::for_tier(Tier::Extreme).materials().len(), 6);
    }

    #[test]
    fn spawns_at_far_edge_with_tier_height() {
        let entity = VisualEntity::new(EntityId(1), spawn(Tier::Notable, 25.0), volume(), vec![]);
        assert_eq!(entity.motion().depth, -150.0);
        assert_eq!(entity.motion().height, 8.0);
        assert_eq!(entity.motion().lane, 3.0);
        assert!(entity.is_active());
    }

    #[test]
    fn integrate_moves_toward_viewer_and_exits() {
        let mut entity = VisualEntity::new(EntityId(1), spawn(Tier::Minor, 100.0), volume(), vec![]);
        assert!(entity.integrate(1.0));
        assert_eq!(entity.motion().depth, -50.0);
        assert!(entity.integrate(1.0));
        assert_eq!(entity.motion().depth, 50.0);
        assert!(!entity.integrate(0.01));
        assert!(!entity.is_active());
    }

    #[test]
    fn dispose_releases_once_and_keeps_templates_alive() {
        let mut pool = SharedResourcePool::new();
        let templates = pool.templates_for_tier(Tier::Standard).unwrap();
        let body = Arc::clone(&templates[0]);
        let mut entity = VisualEntity::new(EntityId(7), spawn(Tier::Standard, 20.0), volume(), templates);

        assert_eq!(entity.dispose(), 5);
        assert_eq!(entity.dispose(), 0);
        assert!(entity.resources().is_disposed());
        assert!(entity.templates().is_empty());
        // Pool still owns the template
        assert_eq!(Arc::strong_count(&body), 2);
        assert!(!pool.is_disposed());
    }
}

//! Shared template pool.
//!
//! Every entity of a given tier is drawn from the same handful of shapes (body, glow,
//! trail, ...). Those shape definitions are created once per `(tier, shape)` key and
//! handed out as `Arc<SharedTemplate>`; entities never own or dispose them. Only the
//! lifecycle coordinator disposes the pool, at final teardown.
//!
//! # Example
//!
//! ```
//! use satoshis_grid::model::Tier;
//! use satoshis_grid::scene::pool::{ShapeName, SharedResourcePool};
//! use std::sync::Arc;
//!
//! let mut pool = SharedResourcePool::new();
//! let a = pool.template_for(Tier::Minor, ShapeName::Body).unwrap();
//! let b = pool.template_for(Tier::Minor, ShapeName::Body).unwrap();
//! assert!(Arc::ptr_eq(&a, &b));
//! assert_eq!(pool.len(), 1);
//! ```

use crate::model::Tier;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Named sub-shape of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeName {
    /// Main hull
    Body,
    /// Additive glow shell
    Glow,
    /// Ground trail plane
    Trail,
    /// Invisible pick volume
    Hitbox,
    /// Transport side panel
    Panel,
    /// Recognizer arm
    Arm,
    /// Recognizer cross bar
    Bar,
    /// Recognizer core sphere
    Core,
    /// Ground shadow plane
    Shadow,
}

impl ShapeName {
    /// Sub-shapes that make up an entity of the given tier.
    #[must_use]
    pub fn for_tier(tier: Tier) -> &'static [ShapeName] {
        use ShapeName::*;
        match tier {
            Tier::Minor => &[Body, Glow, Trail, Hitbox],
            Tier::Standard => &[Body, Panel, Glow, Trail, Hitbox],
            Tier::Notable | Tier::Extreme => &[Arm, Bar, Core, Glow, Shadow, Hitbox],
        }
    }
}

impl fmt::Display for ShapeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Pool key: one template per tier × shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    /// Entity tier
    pub tier: Tier,
    /// Sub-shape
    pub shape: ShapeName,
}

/// Geometry description consumed by the renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Geometry {
    /// Axis-aligned box
    Cuboid {
        /// Width (x)
        w: f32,
        /// Height (y)
        h: f32,
        /// Depth (z)
        d: f32,
    },
    /// Flat plane
    Plane {
        /// Width
        w: f32,
        /// Height
        h: f32,
    },
    /// UV sphere
    Sphere {
        /// Radius
        radius: f32,
        /// Width and height segments
        segments: u32,
    },
}

impl Geometry {
    /// Geometry for a key, or `None` if the shape is not part of that tier.
    #[must_use]
    pub fn for_key(key: TemplateKey) -> Option<Self> {
        use Geometry::{Cuboid, Plane, Sphere};
        use ShapeName::*;
        let geometry = match (key.tier, key.shape) {
            (Tier::Minor, Body) => Cuboid { w: 0.3, h: 0.3, d: 3.0 },
            (Tier::Minor, Glow) => Cuboid { w: 0.5, h: 0.5, d: 4.0 },
            (Tier::Minor, Trail) => Plane { w: 0.2, h: 8.0 },
            (Tier::Minor, Hitbox) => Cuboid { w: 3.0, h: 3.0, d: 8.0 },

            (Tier::Standard, Body) => Cuboid { w: 1.5, h: 0.8, d: 4.0 },
            (Tier::Standard, Panel) => Cuboid { w: 0.1, h: 1.0, d: 3.0 },
            (Tier::Standard, Glow) => Cuboid { w: 2.0, h: 1.2, d: 5.0 },
            (Tier::Standard, Trail) => Plane { w: 0.5, h: 10.0 },
            (Tier::Standard, Hitbox) => Cuboid { w: 4.0, h: 3.0, d: 8.0 },

            (Tier::Notable, Arm) => Cuboid { w: 2.0, h: 1.0, d: 8.0 },
            (Tier::Notable, Bar) => Cuboid { w: 10.0, h: 1.0, d: 2.0 },
            (Tier::Notable, Core) => Sphere { radius: 1.0, segments: 16 },
            (Tier::Notable, Glow) => Cuboid { w: 12.0, h: 3.0, d: 10.0 },
            (Tier::Notable, Shadow) => Plane { w: 12.0, h: 10.0 },
            (Tier::Notable, Hitbox) => Cuboid { w: 14.0, h: 5.0, d: 12.0 },

            (Tier::Extreme, Arm) => Cuboid { w: 3.0, h: 1.5, d: 12.0 },
            (Tier::Extreme, Bar) => Cuboid { w: 15.0, h: 1.5, d: 3.0 },
            (Tier::Extreme, Core) => Sphere { radius: 1.5, segments: 16 },
            (Tier::Extreme, Glow) => Cuboid { w: 18.0, h: 4.5, d: 15.0 },
            (Tier::Extreme, Shadow) => Plane { w: 18.0, h: 15.0 },
            (Tier::Extreme, Hitbox) => Cuboid { w: 20.0, h: 6.0, d: 16.0 },

            _ => return None,
        };
        Some(geometry)
    }
}

/// Reusable, read-only shape definition shared by many entities.
#[derive(Debug, PartialEq)]
pub struct SharedTemplate {
    /// Pool key this template was created for
    pub key: TemplateKey,
    /// Geometry handed to the renderer
    pub geometry: Geometry,
    /// Creation order within the pool (diagnostics)
    pub serial: u64,
}

/// Process-wide template cache.
#[derive(Debug, Default)]
pub struct SharedResourcePool {
    templates: HashMap<TemplateKey, Arc<SharedTemplate>>,
    created: u64,
    disposed: bool,
}

impl SharedResourcePool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the template for `(tier, shape)`, creating it on first use.
    ///
    /// Returns `None` once the pool has been disposed, or when the shape is not part
    /// of the tier's silhouette.
    pub fn template_for(&mut self, tier: Tier, shape: ShapeName) -> Option<Arc<SharedTemplate>> {
        if self.disposed {
            return None;
        }
        let key = TemplateKey { tier, shape };
        if let Some(template) = self.templates.get(&key) {
            return Some(Arc::clone(template));
        }

        let geometry = Geometry::for_key(key)?;
        self.created += 1;
        let template = Arc::new(SharedTemplate {
            key,
            geometry,
            serial: self.created,
        });
        trace!(tier = %tier, shape = %shape, serial = self.created, "Template created");
        self.templates.insert(key, Arc::clone(&template));
        Some(template)
    }

    /// All templates for a tier's silhouette, in drawing order.
    pub fn templates_for_tier(&mut self, tier: Tier) -> Option<Vec<Arc<SharedTemplate>>> {
        ShapeName::for_tier(tier)
            .iter()
            .map(|&shape| self.template_for(tier, shape))
            .collect()
    }

    /// Number of cached templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Returns true if no template has been created (or the pool was disposed).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Total templates ever created by this pool.
    #[must_use]
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Whether `dispose` has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Release every template. Returns how many were released; a second call
    /// releases nothing.
    pub fn dispose(&mut self) -> usize {
        if self.disposed {
            return 0;
        }
        self.disposed = true;
        let released = self.templates.len();
        self.templates.clear();
        debug!(released, "Shared template pool disposed");
        released
    }
}

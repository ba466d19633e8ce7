//! Scene-side resource management: shared templates, entities and the bounded ledger.

pub mod entity;
pub mod ledger;
pub mod pool;

pub use entity::{EntityId, VisualEntity};
pub use ledger::{EntityLedger, LedgerStats};
pub use pool::{SharedResourcePool, SharedTemplate};

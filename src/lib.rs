//! # Satoshi's Grid Core Library
//!
//! Live blockchain feed ingestion and a bounded scene-resource lifecycle. The crate pulls
//! transactions, blocks and market aggregates from a push feed plus periodic REST pulls
//! (degrading to a synthetic generator when the push feed stays unreachable), classifies
//! each transaction into a visual tier, and keeps the population of live scene entities
//! bounded. Rendering, audio and the metrics display are external collaborators reached
//! through [`collaborator::Collaborator`].
//!
//! ## Crate Structure
//!
//! - **`config`**: figment-loaded `GridConfig` and the runtime `SessionConfig`.
//! - **`error`**: `GridError` and its recovery classification.
//! - **`logging`**: tracing-subscriber initialisation.
//! - **`model`**: raw events, tiers, feed messages and connection states.
//! - **`height`**: the monotonic observed chain height.
//! - **`collaborator`**: the outbound call contract and its fan-out.
//! - **`scene`**: shared template pool, visual entities and the bounded ledger.
//! - **`effects`**: alert throttle and the single-flight pulse.
//! - **`feed`**: push link, pollers, reconnect policy and demo generator.
//! - **`pipeline`**: classification and dispatch of feed messages.
//! - **`coordinator`**: session ownership, frame loop and ordered teardown.

pub mod collaborator;
pub mod config;
pub mod coordinator;
pub mod effects;
pub mod error;
pub mod feed;
pub mod height;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod scene;

pub use collaborator::{Collaborator, CollaboratorSet, TracingCollaborator};
pub use config::{GridConfig, SessionConfig};
pub use coordinator::{LifecycleCoordinator, LifecycleHandle, LifecycleSignal};
pub use error::{GridError, GridResult};
pub use feed::{FeedConnector, FeedSettings};
pub use model::{ConnectionState, FeedMessage, RawEvent, Tier};
pub use pipeline::IngestionPipeline;

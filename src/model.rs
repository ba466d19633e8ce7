//! Core data types flowing from the feed into the pipeline.
//!
//! - [`RawEvent`]: an opaque inbound record (transaction or block), produced by the
//!   feed connector and consumed exactly once by the ingestion pipeline.
//! - [`FeedMessage`]: everything the connector emits, including aggregate values from
//!   the periodic pulls (price, fee rate, hash rate, ...).
//! - [`Tier`]: value-magnitude classification attached to every visual entity.
//! - [`ConnectionState`]: the connector's state machine position.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Satoshis per whole coin.
pub const SATS_PER_COIN: u64 = 100_000_000;

// =============================================================================
// Tier
// =============================================================================

/// Classification bucket derived from a transaction's value.
///
/// Ordered by prominence: `Minor < Standard < Notable < Extreme`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Small transfers (light cycles).
    Minor,
    /// Medium transfers (armored transports).
    Standard,
    /// Large transfers (small recognizers).
    Notable,
    /// Whale transfers (large recognizers).
    Extreme,
}

impl Tier {
    /// All tiers in ascending order.
    pub const ALL: [Tier; 4] = [Tier::Minor, Tier::Standard, Tier::Notable, Tier::Extreme];

    /// Short label for logs and statistics.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Tier::Minor => "minor",
            Tier::Standard => "standard",
            Tier::Notable => "notable",
            Tier::Extreme => "extreme",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Raw events
// =============================================================================

/// A single unconfirmed transaction as reported by the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTransaction {
    /// Transaction identifier (hex).
    pub txid: String,
    /// Total output value in satoshi.
    pub value_sats: u64,
    /// Fee rate in sat/vB. `None` when the source omitted it or it was not numeric.
    pub fee_rate: Option<f64>,
    /// Absolute fee in satoshi, if known.
    pub fee: Option<u64>,
    /// Virtual size in vbytes, if known.
    pub vsize: Option<u64>,
    /// Local arrival time.
    pub arrived_at: DateTime<Utc>,
}

impl RawTransaction {
    /// Value in whole coins.
    #[must_use]
    pub fn value_coins(&self) -> f64 {
        self.value_sats as f64 / SATS_PER_COIN as f64
    }
}

/// A newly mined block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockEvent {
    /// Chain height of the block.
    pub height: u64,
    /// Block hash, when the source provides it.
    pub id: Option<String>,
    /// Number of transactions in the block, when known.
    pub tx_count: Option<u64>,
    /// Local arrival time.
    pub arrived_at: DateTime<Utc>,
}

impl BlockEvent {
    /// Create a block event observed now.
    pub fn at_height(height: u64) -> Self {
        Self {
            height,
            id: None,
            tx_count: None,
            arrived_at: Utc::now(),
        }
    }
}

/// Opaque inbound record.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    /// Unconfirmed transaction.
    Transaction(RawTransaction),
    /// Newly mined block.
    Block(BlockEvent),
}

// =============================================================================
// Feed messages
// =============================================================================

/// Where a height observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeightSource {
    /// Push channel (`blocks` snapshot).
    Push,
    /// Periodic tip-height pull.
    Poll,
    /// Synthetic generator.
    Demo,
}

/// Normalized output of the feed connector.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// A transaction or block.
    Event(RawEvent),
    /// A height report that is not tied to a block animation.
    Height {
        /// Reported chain height.
        height: u64,
        /// Reporting source.
        source: HeightSource,
    },
    /// Aggregate mempool transaction count.
    MempoolSize(u64),
    /// Recommended / projected-block median fee rate (sat/vB).
    FeeRate(f64),
    /// Spot price in USD.
    Price(f64),
    /// Network hash rate (H/s).
    HashRate(f64),
    /// Difficulty-adjustment progress and expected change, both in percent.
    Difficulty {
        /// Progress through the current retarget epoch.
        progress_percent: f64,
        /// Estimated difficulty change at the next retarget.
        change_percent: f64,
    },
    /// The connector moved to a new state.
    Connection(ConnectionState),
}

// =============================================================================
// Connection state
// =============================================================================

/// Position of the feed connector's state machine.
///
/// `Open` and `Demo` are mutually exclusive: entering one stops the other's
/// timers and sockets first. `Disconnected` is the resting state before the
/// first `start()` and the terminal state after `stop()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started, or stopped by teardown.
    Disconnected,
    /// Handshake with the push endpoint in progress.
    Connecting,
    /// Push connection established and subscribed.
    Open,
    /// Waiting for a scheduled reconnect attempt.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// Synthetic generator active after the reconnect ceiling was exceeded.
    Demo,
}

impl ConnectionState {
    /// Returns true while a handshake or reconnect is pending.
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting { .. })
    }

    /// Short status label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting...",
            Self::Open => "Live",
            Self::Reconnecting { .. } => "Reconnecting...",
            Self::Demo => "Demo",
        }
    }
}

//! Synthetic feed.
//!
//! Used once the push endpoint is unreachable beyond the reconnect ceiling (or when
//! the binary runs in `demo` mode). Produces transactions at randomized intervals with
//! a fixed value distribution, and blocks through a low-probability lottery on a
//! fixed tick.
//!
//! | Draw      | Share | Value (BTC)  |
//! |-----------|-------|--------------|
//! | `< 0.70`  | 70 %  | 0 – 0.1      |
//! | `< 0.95`  | 25 %  | 0.1 – 10     |
//! | `< 0.99`  | 4 %   | 10 – 100     |
//! | otherwise | 1 %   | 100 – 1000   |

use crate::config::DemoConfig;
use crate::model::{FeedMessage, HeightSource, RawTransaction, SATS_PER_COIN};
use chrono::Utc;
use rand::Rng;
use std::time::Duration;

const HEX: &[u8; 16] = b"0123456789abcdef";

/// Random-data source for Demo mode.
#[derive(Debug)]
pub struct DemoGenerator<R> {
    rng: R,
    config: DemoConfig,
}

impl<R: Rng> DemoGenerator<R> {
    /// Generator drawing from `rng`.
    pub fn new(config: DemoConfig, rng: R) -> Self {
        Self { rng, config }
    }

    /// Gap before the next synthetic transaction.
    pub fn next_interval(&mut self) -> Duration {
        let (min, max) = (self.config.tx_interval_min, self.config.tx_interval_max);
        if max <= min {
            return min;
        }
        self.rng.gen_range(min..=max)
    }

    /// One synthetic transaction.
    pub fn transaction(&mut self) -> RawTransaction {
        let value_sats = sample_value_sats(&mut self.rng);
        RawTransaction {
            txid: random_txid(&mut self.rng),
            value_sats,
            fee_rate: Some(f64::from(self.rng.gen_range(5u32..55))),
            fee: Some(self.rng.gen_range(0..50_000)),
            vsize: Some(self.rng.gen_range(200..700)),
            arrived_at: Utc::now(),
        }
    }

    /// Block lottery for one tick.
    pub fn block_roll(&mut self) -> bool {
        self.rng.gen_bool(self.config.block_probability.clamp(0.0, 1.0))
    }
}

/// Draw a value from the demo distribution.
pub fn sample_value_sats<R: Rng + ?Sized>(rng: &mut R) -> u64 {
    let bucket: f64 = rng.gen();
    let coins = if bucket < 0.7 {
        rng.gen_range(0.0..0.1)
    } else if bucket < 0.95 {
        rng.gen_range(0.1..10.0)
    } else if bucket < 0.99 {
        rng.gen_range(10.0..100.0)
    } else {
        rng.gen_range(100.0..1000.0)
    };
    (coins * SATS_PER_COIN as f64).round() as u64
}

/// 64 lowercase hex characters.
pub fn random_txid<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..64)
        .map(|_| char::from(HEX[rng.gen_range(0..HEX.len())]))
        .collect()
}

/// Display values published when Demo starts. The height keeps whatever was already
/// observed.
#[must_use]
pub fn seed_messages(config: &DemoConfig, observed_height: Option<u64>) -> Vec<FeedMessage> {
    vec![
        FeedMessage::Height {
            height: observed_height.unwrap_or(config.initial_height),
            source: HeightSource::Demo,
        },
        FeedMessage::MempoolSize(config.initial_mempool_size),
        FeedMessage::FeeRate(config.initial_fee_rate),
        FeedMessage::HashRate(config.initial_hash_rate),
    ]
}

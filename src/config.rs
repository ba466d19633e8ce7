//! Configuration system using Figment
//!
//! Strongly-typed configuration for the feed core. Configuration is loaded from:
//! 1. Built-in defaults (every field has one, so an empty file is valid)
//! 2. A TOML file (default `config/grid.toml`)
//! 3. Environment variables prefixed with `SATOSHIS_GRID_`, using `__` between
//!    section and key (e.g. `SATOSHIS_GRID_SCENE__LEDGER_CAPACITY=80`)
//!
//! Durations are written as humantime strings (`"2s"`, `"500ms"`).
//!
//! # Example
//! ```no_run
//! use satoshis_grid::config::GridConfig;
//!
//! let config = GridConfig::load()?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), satoshis_grid::error::GridError>(())
//! ```

use crate::error::{GridError, GridResult};
use crate::model::{Tier, SATS_PER_COIN};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/grid.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SATOSHIS_GRID_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Push endpoint and reconnect policy
    pub feed: FeedConfig,
    /// Pull endpoint cadences
    pub polling: PollingConfig,
    /// Synthetic generator settings
    pub demo: DemoConfig,
    /// Classification, motion and ledger settings
    pub scene: SceneConfig,
    /// Alert throttling settings
    pub effects: EffectsConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Satoshis Grid".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Push connection and endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Duplex push endpoint
    pub websocket_url: String,
    /// Base URL of the REST API (tip height, hash rate, fees, mempool)
    pub api_base_url: String,
    /// Primary price endpoint
    pub price_primary_url: String,
    /// Fallback price endpoint, tried when the primary fails
    pub price_fallback_url: String,
    /// Base reconnect delay; attempt `k` waits `k × base`
    #[serde(with = "humantime_serde")]
    pub reconnect_base_delay: Duration,
    /// Reconnect attempts before degrading to demo mode
    pub max_reconnect_attempts: u32,
    /// Upper bound on a single push handshake; a stalled handshake counts as a closure
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    /// Capacity of the internal event channel
    pub channel_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            websocket_url: "wss://mempool.space/api/v1/ws".to_string(),
            api_base_url: "https://mempool.space/api".to_string(),
            price_primary_url: "https://api.binance.com/api/v3/ticker/price?symbol=BTCUSDT"
                .to_string(),
            price_fallback_url:
                "https://api.coingecko.com/api/v3/simple/price?ids=bitcoin&vs_currencies=usd"
                    .to_string(),
            reconnect_base_delay: Duration::from_secs(2),
            max_reconnect_attempts: 10,
            handshake_timeout: Duration::from_secs(10),
            channel_capacity: 1024,
        }
    }
}

/// Pull endpoint intervals. Each endpoint runs on its own timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Spot price
    #[serde(with = "humantime_serde")]
    pub price: Duration,
    /// Chain tip height
    #[serde(with = "humantime_serde")]
    pub height: Duration,
    /// Network hash rate
    #[serde(with = "humantime_serde")]
    pub hash_rate: Duration,
    /// Difficulty-adjustment progress
    #[serde(with = "humantime_serde")]
    pub difficulty: Duration,
    /// Fee-rate recommendation
    #[serde(with = "humantime_serde")]
    pub fee_rate: Duration,
    /// Mempool size snapshot
    #[serde(with = "humantime_serde")]
    pub mempool: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            price: Duration::from_secs(30),
            height: Duration::from_secs(30),
            hash_rate: Duration::from_secs(300),
            difficulty: Duration::from_secs(300),
            fee_rate: Duration::from_secs(60),
            mempool: Duration::from_secs(60),
        }
    }
}

/// Synthetic generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Lower bound of the randomized gap between synthetic transactions
    #[serde(with = "humantime_serde")]
    pub tx_interval_min: Duration,
    /// Upper bound of the randomized gap between synthetic transactions
    #[serde(with = "humantime_serde")]
    pub tx_interval_max: Duration,
    /// Period of the block lottery tick
    #[serde(with = "humantime_serde")]
    pub block_tick: Duration,
    /// Probability that a block tick produces a block
    pub block_probability: f64,
    /// Height published on entry when nothing was observed yet
    pub initial_height: u64,
    /// Mempool size published on entry
    pub initial_mempool_size: u64,
    /// Fee rate published on entry (sat/vB)
    pub initial_fee_rate: f64,
    /// Hash rate published on entry (H/s)
    pub initial_hash_rate: f64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            tx_interval_min: Duration::from_millis(800),
            tx_interval_max: Duration::from_millis(2000),
            block_tick: Duration::from_secs(1),
            block_probability: 0.02,
            initial_height: 878_000,
            initial_mempool_size: 50_000,
            initial_fee_rate: 15.0,
            initial_hash_rate: 700e18,
        }
    }
}

/// Classification, motion and population settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Maximum number of live entities
    pub ledger_capacity: usize,
    /// Frame loop rate in Hz
    pub frame_rate: u32,
    /// Values below this are `Minor` (satoshi)
    pub minor_below_sats: u64,
    /// Values below this are `Standard` (satoshi)
    pub standard_below_sats: u64,
    /// Values below this are `Notable`, anything else `Extreme` (satoshi)
    pub notable_below_sats: u64,
    /// Speed of a zero-fee entity (units/s)
    pub base_speed: f64,
    /// Fee rate is divided by this before capping
    pub fee_divisor: f64,
    /// Cap applied to `fee_rate / fee_divisor`
    pub fee_cap: f64,
    /// Multiplier applied to the capped fee term
    pub fee_gain: f64,
    /// Fee rate assumed when the reported one is absent or not numeric
    pub default_fee_rate: f64,
    /// Width of the spawn band; lanes are drawn from `[-w/2, w/2)`
    pub lane_width: f64,
    /// Depth at which entities spawn
    pub spawn_depth: f64,
    /// Depth past which entities leave the visible volume
    pub exit_depth: f64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            ledger_capacity: 50,
            frame_rate: 60,
            minor_below_sats: SATS_PER_COIN / 10,
            standard_below_sats: 10 * SATS_PER_COIN,
            notable_below_sats: 100 * SATS_PER_COIN,
            base_speed: 20.0,
            fee_divisor: 10.0,
            fee_cap: 5.0,
            fee_gain: 10.0,
            default_fee_rate: 10.0,
            lane_width: 80.0,
            spawn_depth: -150.0,
            exit_depth: 50.0,
        }
    }
}

impl SceneConfig {
    /// Interval between frame ticks.
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frame_rate.max(1)))
    }
}

/// Alert throttling and pulse settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsConfig {
    /// Minimum spacing between accepted alerts
    #[serde(with = "humantime_serde")]
    pub throttle_window: Duration,
    /// Lowest tier that raises an alert
    pub alert_min_tier: Tier,
    /// Resting pulse intensity the ramp returns to
    pub baseline_intensity: f64,
    /// How long the alert indicator overlay stays visible
    #[serde(with = "humantime_serde")]
    pub indicator_hold: Duration,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            throttle_window: Duration::from_millis(500),
            alert_min_tier: Tier::Extreme,
            baseline_intensity: 0.5,
            indicator_hold: Duration::from_millis(1500),
        }
    }
}

/// Runtime settings owned by the lifecycle coordinator and passed down to every
/// component it builds.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Push endpoint and reconnect policy
    pub feed: FeedConfig,
    /// Pull cadences
    pub polling: PollingConfig,
    /// Synthetic generator
    pub demo: DemoConfig,
    /// Classification, motion and ledger
    pub scene: SceneConfig,
    /// Alert throttling
    pub effects: EffectsConfig,
}

impl GridConfig {
    /// Load configuration from `config/grid.toml` and environment variables.
    pub fn load() -> GridResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error: defaults and environment overrides still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> GridResult<Self> {
        let config = Figment::from(Serialized::defaults(GridConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> GridResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(GridError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(GridError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.feed.max_reconnect_attempts == 0 {
            return Err(GridError::Configuration(
                "feed.max_reconnect_attempts must be at least 1".into(),
            ));
        }

        if self.feed.handshake_timeout.is_zero() {
            return Err(GridError::Configuration(
                "feed.handshake_timeout must be non-zero".into(),
            ));
        }

        if self.feed.channel_capacity == 0 {
            return Err(GridError::Configuration(
                "feed.channel_capacity must be at least 1".into(),
            ));
        }

        let scene = &self.scene;
        if scene.ledger_capacity == 0 {
            return Err(GridError::Configuration(
                "scene.ledger_capacity must be at least 1".into(),
            ));
        }
        if scene.frame_rate == 0 {
            return Err(GridError::Configuration(
                "scene.frame_rate must be at least 1".into(),
            ));
        }
        if !(scene.minor_below_sats < scene.standard_below_sats
            && scene.standard_below_sats < scene.notable_below_sats)
        {
            return Err(GridError::Configuration(format!(
                "Tier thresholds must be strictly ascending (got {} / {} / {})",
                scene.minor_below_sats, scene.standard_below_sats, scene.notable_below_sats
            )));
        }
        if scene.fee_divisor <= 0.0 {
            return Err(GridError::Configuration(
                "scene.fee_divisor must be positive".into(),
            ));
        }

        let demo = &self.demo;
        if demo.tx_interval_min > demo.tx_interval_max {
            return Err(GridError::Configuration(format!(
                "demo.tx_interval_min ({:?}) exceeds demo.tx_interval_max ({:?})",
                demo.tx_interval_min, demo.tx_interval_max
            )));
        }
        if !(0.0..=1.0).contains(&demo.block_probability) {
            return Err(GridError::Configuration(format!(
                "demo.block_probability {} must be within [0, 1]",
                demo.block_probability
            )));
        }

        Ok(())
    }

    /// Runtime settings handed to the lifecycle coordinator.
    #[must_use]
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            feed: self.feed.clone(),
            polling: self.polling.clone(),
            demo: self.demo.clone(),
            scene: self.scene.clone(),
            effects: self.effects.clone(),
        }
    }
}

//! Pull endpoints.
//!
//! Aggregate values (price, tip height, hash rate, difficulty progress, fee rate,
//! mempool size) are fetched on independent timers. [`MarketDataApi`] is the seam the
//! pollers call through; [`HttpMarketApi`] implements it with `reqwest`.
//!
//! Every fetch either yields a fresh value or an error. Errors are never surfaced
//! beyond the poller: the last good value simply stays on display.

use crate::config::{FeedConfig, PollingConfig};
use crate::error::{GridError, GridResult};
use crate::model::{FeedMessage, HeightSource};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Difficulty-adjustment progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifficultySnapshot {
    /// Progress through the current epoch, percent
    pub progress_percent: f64,
    /// Expected change at the next retarget, percent
    pub change_percent: f64,
}

/// Source of aggregate values.
#[async_trait]
pub trait MarketDataApi: Send + Sync {
    /// Spot price in USD.
    async fn price(&self) -> GridResult<f64>;
    /// Current chain tip height.
    async fn tip_height(&self) -> GridResult<u64>;
    /// Network hash rate in H/s.
    async fn hash_rate(&self) -> GridResult<f64>;
    /// Difficulty-adjustment progress.
    async fn difficulty(&self) -> GridResult<DifficultySnapshot>;
    /// Recommended fee rate for the next block (sat/vB).
    async fn fee_rate(&self) -> GridResult<f64>;
    /// Mempool transaction count.
    async fn mempool_size(&self) -> GridResult<u64>;
}

// =============================================================================
// Poll kinds
// =============================================================================

/// One independently timed pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollKind {
    /// Spot price
    Price,
    /// Tip height
    Height,
    /// Hash rate
    HashRate,
    /// Difficulty progress
    Difficulty,
    /// Fee rate
    FeeRate,
    /// Mempool size
    Mempool,
}

impl PollKind {
    /// Every pull, in start order.
    pub const ALL: [PollKind; 6] = [
        PollKind::Price,
        PollKind::Height,
        PollKind::HashRate,
        PollKind::Difficulty,
        PollKind::FeeRate,
        PollKind::Mempool,
    ];

    /// Configured cadence.
    #[must_use]
    pub fn interval(self, polling: &PollingConfig) -> Duration {
        match self {
            PollKind::Price => polling.price,
            PollKind::Height => polling.height,
            PollKind::HashRate => polling.hash_rate,
            PollKind::Difficulty => polling.difficulty,
            PollKind::FeeRate => polling.fee_rate,
            PollKind::Mempool => polling.mempool,
        }
    }

    /// Fetch once and wrap the value as a feed message.
    pub async fn fetch(self, api: &dyn MarketDataApi) -> GridResult<FeedMessage> {
        Ok(match self {
            PollKind::Price => FeedMessage::Price(api.price().await?),
            PollKind::Height => FeedMessage::Height {
                height: api.tip_height().await?,
                source: HeightSource::Poll,
            },
            PollKind::HashRate => FeedMessage::HashRate(api.hash_rate().await?),
            PollKind::Difficulty => {
                let snapshot = api.difficulty().await?;
                FeedMessage::Difficulty {
                    progress_percent: snapshot.progress_percent,
                    change_percent: snapshot.change_percent,
                }
            }
            PollKind::FeeRate => FeedMessage::FeeRate(api.fee_rate().await?),
            PollKind::Mempool => FeedMessage::MempoolSize(api.mempool_size().await?),
        })
    }
}

impl fmt::Display for PollKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PollKind::Price => "price",
            PollKind::Height => "height",
            PollKind::HashRate => "hash_rate",
            PollKind::Difficulty => "difficulty",
            PollKind::FeeRate => "fee_rate",
            PollKind::Mempool => "mempool",
        })
    }
}

// =============================================================================
// HTTP implementation
// =============================================================================

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ExchangeTicker {
    price: String,
}

#[derive(Debug, Deserialize)]
struct AggregatorQuote {
    bitcoin: AggregatorPrice,
}

#[derive(Debug, Deserialize)]
struct AggregatorPrice {
    usd: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HashrateWindow {
    current_hashrate: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DifficultyAdjustment {
    progress_percent: f64,
    difficulty_change: f64,
    estimated_hashrate: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendedFees {
    fastest_fee: f64,
}

#[derive(Debug, Deserialize)]
struct MempoolSnapshot {
    count: u64,
}

/// REST implementation of [`MarketDataApi`].
#[derive(Debug, Clone)]
pub struct HttpMarketApi {
    client: reqwest::Client,
    api_base: String,
    price_primary: String,
    price_fallback: String,
}

impl HttpMarketApi {
    /// Build a client for the configured endpoints.
    pub fn new(config: &FeedConfig) -> GridResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("satoshis-grid/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base_url.trim_end_matches('/').to_string(),
            price_primary: config.price_primary_url.clone(),
            price_fallback: config.price_fallback_url.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> GridResult<T> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.json::<T>().await?)
    }

    async fn primary_price(&self) -> GridResult<f64> {
        let ticker: ExchangeTicker = self.get_json(&self.price_primary).await?;
        ticker
            .price
            .parse::<f64>()
            .ok()
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or_else(|| GridError::MalformedPayload(format!("price '{}'", ticker.price)))
    }

    async fn fallback_price(&self) -> GridResult<f64> {
        let quote: AggregatorQuote = self.get_json(&self.price_fallback).await?;
        Ok(quote.bitcoin.usd)
    }
}

#[async_trait]
impl MarketDataApi for HttpMarketApi {
    async fn price(&self) -> GridResult<f64> {
        match self.primary_price().await {
            Ok(price) => Ok(price),
            Err(e) => {
                debug!(error = %e, "Primary price endpoint failed, trying fallback");
                self.fallback_price().await
            }
        }
    }

    async fn tip_height(&self) -> GridResult<u64> {
        self.get_json(&self.endpoint("/blocks/tip/height")).await
    }

    async fn hash_rate(&self) -> GridResult<f64> {
        let primary: GridResult<HashrateWindow> =
            self.get_json(&self.endpoint("/v1/mining/hashrate/3d")).await;
        match primary {
            Ok(HashrateWindow {
                current_hashrate: Some(rate),
            }) => Ok(rate),
            other => {
                if let Err(e) = other {
                    debug!(error = %e, "Hash rate endpoint failed, trying difficulty adjustment");
                }
                let adjustment: DifficultyAdjustment = self
                    .get_json(&self.endpoint("/v1/difficulty-adjustment"))
                    .await?;
                adjustment.estimated_hashrate.ok_or_else(|| {
                    GridError::MalformedPayload("no hash rate in either endpoint".into())
                })
            }
        }
    }

    async fn difficulty(&self) -> GridResult<DifficultySnapshot> {
        let adjustment: DifficultyAdjustment = self
            .get_json(&self.endpoint("/v1/difficulty-adjustment"))
            .await?;
        Ok(DifficultySnapshot {
            progress_percent: adjustment.progress_percent,
            change_percent: adjustment.difficulty_change,
        })
    }

    async fn fee_rate(&self) -> GridResult<f64> {
        let fees: RecommendedFees = self.get_json(&self.endpoint("/v1/fees/recommended")).await?;
        Ok(fees.fastest_fee)
    }

    async fn mempool_size(&self) -> GridResult<u64> {
        let mempool: MempoolSnapshot = self.get_json(&self.endpoint("/mempool")).await?;
        Ok(mempool.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_intervals_follow_config() {
        let polling = PollingConfig::default();
        assert_eq!(PollKind::Price.interval(&polling), Duration::from_secs(30));
        assert_eq!(PollKind::HashRate.interval(&polling), Duration::from_secs(300));
        assert_eq!(PollKind::ALL.len(), 6);
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let config = FeedConfig {
            api_base_url: "https://example.org/api/".into(),
            ..Default::default()
        };
        let api = HttpMarketApi::new(&config).unwrap();
        assert_eq!(
            api.endpoint("/blocks/tip/height"),
            "https://example.org/api/blocks/tip/height"
        );
    }

    #[test]
    fn wire_shapes_decode() {
        let ticker: ExchangeTicker = serde_json::from_str(r#"{"symbol":"BTCUSDT","price":"97123.45"}"#).unwrap();
        assert_eq!(ticker.price, "97123.45");
        let quote: AggregatorQuote = serde_json::from_str(r#"{"bitcoin":{"usd":97000}}"#).unwrap();
        assert_eq!(quote.bitcoin.usd, 97_000.0);
        let adjustment: DifficultyAdjustment = serde_json::from_str(
            r#"{"progressPercent":61.2,"difficultyChange":2.4,"estimatedRetargetDate":0}"#,
        )
        .unwrap();
        assert_eq!(adjustment.estimated_hashrate, None);
        assert_eq!(adjustment.progress_percent, 61.2);
    }

    struct FixedApi;

    #[async_trait]
    impl MarketDataApi for FixedApi {
        async fn price(&self) -> GridResult<f64> {
            Ok(97_000.0)
        }
        async fn tip_height(&self) -> GridResult<u64> {
            Ok(878_123)
        }
        async fn hash_rate(&self) -> GridResult<f64> {
            Err(GridError::Transport("offline".into()))
        }
        async fn difficulty(&self) -> GridResult<DifficultySnapshot> {
            Ok(DifficultySnapshot {
                progress_percent: 10.0,
                change_percent: 1.0,
            })
        }
        async fn fee_rate(&self) -> GridResult<f64> {
            Ok(8.0)
        }
        async fn mempool_size(&self) -> GridResult<u64> {
            Ok(42_000)
        }
    }

    #[tokio::test]
    async fn fetch_wraps_values() {
        let api = FixedApi;
        assert_eq!(
            PollKind::Height.fetch(&api).await.unwrap(),
            FeedMessage::Height {
                height: 878_123,
                source: HeightSource::Poll
            }
        );
        assert_eq!(PollKind::Mempool.fetch(&api).await.unwrap(), FeedMessage::MempoolSize(42_000));
        assert!(PollKind::HashRate.fetch(&api).await.unwrap_err().is_retriable());
    }
}

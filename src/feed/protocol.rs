//! Push protocol: subscription requests and inbound message decoding.
//!
//! The server tags each push message by the keys it carries; one message may carry
//! several (`block` together with `mempoolInfo`, for example). [`decode`] turns one
//! text frame into the [`FeedMessage`]s it contains, in a fixed key order. A frame
//! that is not valid JSON, or whose known keys have the wrong shape, is rejected as a
//! whole with [`GridError::MalformedPayload`].

use crate::error::{GridError, GridResult};
use crate::model::{BlockEvent, FeedMessage, HeightSource, RawEvent, RawTransaction};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event classes requested on every successful handshake.
pub const SUBSCRIBED_CLASSES: [&str; 3] = ["blocks", "stats", "mempool-blocks"];

#[derive(Debug, Serialize)]
struct WantRequest<'a> {
    action: &'a str,
    data: &'a [&'a str],
}

#[derive(Debug, Serialize)]
struct TrackMempoolBlock {
    #[serde(rename = "track-mempool-block")]
    index: u32,
}

/// Frames sent right after the handshake: the class subscription, then the
/// "track next block" directive.
pub fn subscription_requests() -> GridResult<Vec<String>> {
    Ok(vec![
        serde_json::to_string(&WantRequest {
            action: "want",
            data: &SUBSCRIBED_CLASSES,
        })?,
        track_next_block()?,
    ])
}

/// Directive to stream the projected next block's transactions. Re-sent after each block.
pub fn track_next_block() -> GridResult<String> {
    Ok(serde_json::to_string(&TrackMempoolBlock { index: 0 })?)
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct PushEnvelope {
    block: Option<WireBlock>,
    blocks: Option<Vec<WireBlock>>,
    #[serde(rename = "mempoolInfo")]
    mempool_info: Option<WireMempoolInfo>,
    #[serde(rename = "mempool-blocks")]
    mempool_blocks: Option<Vec<WireMempoolBlock>>,
    transactions: Option<Vec<WireTransaction>>,
    #[serde(rename = "projected-block-transactions")]
    projected: Option<WireProjected>,
    da: Option<WireDifficulty>,
}

#[derive(Debug, Deserialize)]
struct WireBlock {
    height: u64,
    id: Option<String>,
    tx_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireMempoolInfo {
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMempoolBlock {
    median_fee: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTransaction {
    txid: String,
    value: Option<f64>,
    #[serde(default)]
    vout: Vec<WireOutput>,
    rate: Option<Value>,
    fee_per_vsize: Option<Value>,
    fee: Option<f64>,
    vsize: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireOutput {
    #[serde(default)]
    value: f64,
}

#[derive(Debug, Deserialize)]
struct WireProjected {
    #[serde(default)]
    added: Vec<WireTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDifficulty {
    current_hashrate: Option<f64>,
    progress_percent: Option<f64>,
    difficulty_change: Option<f64>,
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

fn numeric(value: &Option<Value>) -> Option<f64> {
    positive(value.as_ref().and_then(Value::as_f64))
}

impl WireTransaction {
    fn into_raw(self) -> RawTransaction {
        let value = positive(self.value)
            .unwrap_or_else(|| self.vout.iter().map(|out| out.value).sum::<f64>());
        let fee_rate = numeric(&self.rate)
            .or_else(|| numeric(&self.fee_per_vsize))
            .or_else(|| match (positive(self.fee), positive(self.vsize)) {
                (Some(fee), Some(vsize)) => Some((fee / vsize).round()),
                _ => None,
            });
        RawTransaction {
            txid: self.txid,
            value_sats: to_whole_u64(value),
            fee_rate,
            fee: self.fee.map(to_whole_u64),
            vsize: self.vsize.map(to_whole_u64),
            arrived_at: Utc::now(),
        }
    }
}

fn to_whole_u64(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode one push frame.
pub fn decode(text: &str) -> GridResult<Vec<FeedMessage>> {
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(GridError::MalformedPayload(format!(
            "expected a JSON object, got {}",
            kind(&value)
        )));
    }
    let envelope: PushEnvelope = serde_json::from_value(value)?;
    Ok(envelope.into_messages())
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl PushEnvelope {
    fn into_messages(self) -> Vec<FeedMessage> {
        let mut out = Vec::new();

        if let Some(block) = self.block {
            out.push(FeedMessage::Event(RawEvent::Block(BlockEvent {
                height: block.height,
                id: block.id,
                tx_count: block.tx_count,
                arrived_at: Utc::now(),
            })));
        }

        if let Some(height) = self.blocks.iter().flatten().map(|b| b.height).max() {
            out.push(FeedMessage::Height {
                height,
                source: HeightSource::Push,
            });
        }

        if let Some(size) = self.mempool_info.and_then(|info| info.size) {
            out.push(FeedMessage::MempoolSize(size));
        }

        if let Some(fee) = self
            .mempool_blocks
            .and_then(|blocks| blocks.into_iter().next())
            .and_then(|next| next.median_fee)
            .filter(|fee| fee.is_finite())
        {
            out.push(FeedMessage::FeeRate(fee));
        }

        let transactions = self
            .transactions
            .into_iter()
            .flatten()
            .chain(self.projected.into_iter().flat_map(|p| p.added));
        out.extend(
            transactions.map(|tx| FeedMessage::Event(RawEvent::Transaction(tx.into_raw()))),
        );

        if let Some(da) = self.da {
            if let Some(rate) = positive(da.current_hashrate) {
                out.push(FeedMessage::HashRate(rate));
            }
            if let (Some(progress_percent), Some(change_percent)) =
                (da.progress_percent, da.difficulty_change)
            {
                out.push(FeedMessage::Difficulty {
                    progress_percent,
                    change_percent,
                });
            }
        }

        out
    }
}

/// Returns true if any decoded message is a block event.
#[must_use]
pub fn contains_block(messages: &[FeedMessage]) -> bool {
    messages
        .iter()
        .any(|m| matches!(m, FeedMessage::Event(RawEvent::Block(_))))
}

//! Scripted doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use satoshis_grid::config::SessionConfig;
use satoshis_grid::feed::api::{DifficultySnapshot, MarketDataApi};
use satoshis_grid::feed::transport::{PushLink, PushTransport};
use satoshis_grid::feed::FeedSettings;
use satoshis_grid::model::{FeedMessage, RawEvent, RawTransaction};
use satoshis_grid::{GridError, GridResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// =============================================================================
// Push transport
// =============================================================================

/// What the next `connect` call does.
#[derive(Debug, Clone)]
pub enum LinkScript {
    /// Handshake fails.
    Refuse,
    /// Handshake never completes.
    Hang,
    /// Handshake succeeds; the link yields `frames`, then closes if `close` is set or
    /// stays silent otherwise.
    Open {
        /// Inbound text frames
        frames: Vec<String>,
        /// Close after the last frame
        close: bool,
    },
}

/// Push transport that follows a script. Refuses once the script runs out.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<VecDeque<LinkScript>>>,
    connects: Arc<AtomicU32>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    pub fn refusing() -> Self {
        Self::default()
    }

    /// Transport whose first `attempts` handshakes stall forever.
    pub fn stalling(attempts: usize) -> Self {
        Self::with_script(std::iter::repeat(LinkScript::Hang).take(attempts))
    }

    pub fn with_script(script: impl IntoIterator<Item = LinkScript>) -> Self {
        let transport = Self::default();
        transport.script.lock().extend(script);
        transport
    }

    pub fn push(&self, step: LinkScript) {
        self.script.lock().push_back(step);
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Frames the connector sent on any link.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl PushTransport for ScriptedTransport {
    async fn connect(&self, _url: &str) -> GridResult<Box<dyn PushLink>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().pop_front().unwrap_or(LinkScript::Refuse);
        match step {
            LinkScript::Refuse => Err(GridError::Transport("connection refused".into())),
            LinkScript::Hang => std::future::pending().await,
            LinkScript::Open { frames, close } => Ok(Box::new(ScriptedLink {
                frames: frames.into(),
                close,
                sent: Arc::clone(&self.sent),
            })),
        }
    }
}

struct ScriptedLink {
    frames: VecDeque<String>,
    close: bool,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl PushLink for ScriptedLink {
    async fn send_text(&mut self, text: String) -> GridResult<()> {
        self.sent.lock().push(text);
        Ok(())
    }

    async fn next_text(&mut self) -> Option<GridResult<String>> {
        if let Some(frame) = self.frames.pop_front() {
            return Some(Ok(frame));
        }
        if self.close {
            return None;
        }
        std::future::pending().await
    }

    async fn close(&mut self) {}
}

// =============================================================================
// Market data
// =============================================================================

/// API whose price endpoint succeeds `price_successes` times and then fails. Every other
/// endpoint always fails.
#[derive(Debug)]
pub struct FlakyApi {
    price: f64,
    price_successes: AtomicU32,
    pub price_calls: AtomicU32,
}

impl FlakyApi {
    pub fn new(price: f64, price_successes: u32) -> Self {
        Self {
            price,
            price_successes: AtomicU32::new(price_successes),
            price_calls: AtomicU32::new(0),
        }
    }
}

fn unreachable_endpoint<T>() -> GridResult<T> {
    Err(GridError::Transport("endpoint unreachable".into()))
}

#[async_trait]
impl MarketDataApi for FlakyApi {
    async fn price(&self) -> GridResult<f64> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        let left = self.price_successes.load(Ordering::SeqCst);
        if left == 0 {
            return unreachable_endpoint();
        }
        self.price_successes.store(left - 1, Ordering::SeqCst);
        Ok(self.price)
    }

    async fn tip_height(&self) -> GridResult<u64> {
        unreachable_endpoint()
    }

    async fn hash_rate(&self) -> GridResult<f64> {
        unreachable_endpoint()
    }

    async fn difficulty(&self) -> GridResult<DifficultySnapshot> {
        unreachable_endpoint()
    }

    async fn fee_rate(&self) -> GridResult<f64> {
        unreachable_endpoint()
    }

    async fn mempool_size(&self) -> GridResult<u64> {
        unreachable_endpoint()
    }
}

// =============================================================================
// Helpers
// =============================================================================

pub fn settings() -> FeedSettings {
    FeedSettings::from_session(&SessionConfig::default())
}

pub fn transaction(value_sats: u64) -> FeedMessage {
    FeedMessage::Event(RawEvent::Transaction(RawTransaction {
        txid: format!("{value_sats:064x}"),
        value_sats,
        fee_rate: Some(12.0),
        fee: None,
        vsize: None,
        arrived_at: Utc::now(),
    }))
}

// =============================================================================
// Shared Cache — Redis streams, counters, reference data, and signalling
// =============================================================================
//
// Every cross-process artefact that is not a trade row lives here: the tick
// and candle streams the Data Engine feeds, the daily trade counters that are
// the *authoritative* rate limit, the previous-day OHLC hash, and the token
// update channel. Key and stream names are interop constants shared with the
// dashboard and must not change.
// =============================================================================

pub mod counters;
pub mod prev_day;
pub mod streams;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use tracing::info;

/// Append-only stream of raw LTP updates.
pub const TICK_STREAM: &str = "market_ticks";
/// Append-only stream of closed one-minute candles.
pub const CANDLE_STREAM: &str = "candle_stream_1m";
/// Hash of symbol → previous-day OHLCV JSON.
pub const PREV_DAY_HASH: &str = "prev_day_ohlc";
/// Pub/sub channel announcing a fresh access token.
pub const TOKEN_CHANNEL: &str = "fyers_token_update";
/// Consumer group shared by all algo worker instances.
pub const ALGO_GROUP: &str = "ALGO_GROUP";

/// Handle to the shared Redis instance.
///
/// `ConnectionManager` reconnects transparently and is cheap to clone;
/// the underlying `Client` is kept for pub/sub, which needs a dedicated
/// connection.
#[derive(Clone)]
pub struct Cache {
    client: redis::Client,
    conn: ConnectionManager,
}

impl Cache {
    /// Connect to Redis at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid REDIS_URL")?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .context("failed to connect to Redis")?;

        info!("cache connected");
        Ok(Self { client, conn })
    }

    /// Clone of the managed command connection.
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Block until any message arrives on the token-update channel.
    ///
    /// The payload is ignored; the occurrence alone means credentials were
    /// rewritten and sockets must be re-established with the new token.
    pub async fn wait_for_token_update(&self) -> Result<()> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .context("failed to open pub/sub connection")?;
        pubsub
            .subscribe(TOKEN_CHANNEL)
            .await
            .with_context(|| format!("failed to subscribe to {TOKEN_CHANNEL}"))?;

        info!(channel = TOKEN_CHANNEL, "listening for token updates");

        let mut messages = pubsub.on_message();
        messages
            .next()
            .await
            .context("token-update subscription ended")?;

        info!("token update signal received");
        Ok(())
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").finish_non_exhaustive()
    }
}

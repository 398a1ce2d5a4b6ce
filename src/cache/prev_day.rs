// =============================================================================
// Previous-Day OHLC cache — write-once reference data for the session
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::PREV_DAY_HASH;

/// Previous trading session's daily candle for one symbol.
///
/// A symbol missing from the hash is simply not tradable today; the strategy
/// drops its candles without complaint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrevDayOhlc {
    /// Unix epoch seconds of the session the candle belongs to.
    pub ts: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

/// Store one symbol's previous-day candle.
pub async fn store(
    conn: &mut ConnectionManager,
    symbol: &str,
    ohlc: &PrevDayOhlc,
) -> Result<()> {
    let payload = serde_json::to_string(ohlc).context("failed to serialize prev-day OHLC")?;
    let _: i64 = conn
        .hset(PREV_DAY_HASH, symbol, payload)
        .await
        .with_context(|| format!("HSET {PREV_DAY_HASH} failed for {symbol}"))?;
    Ok(())
}

/// Load the whole hash into memory.
///
/// Called once per worker start; entries that fail to parse are skipped so a
/// single corrupt value cannot take the worker down.
pub async fn load_all(conn: &mut ConnectionManager) -> Result<HashMap<String, PrevDayOhlc>> {
    let raw: HashMap<String, String> = conn
        .hgetall(PREV_DAY_HASH)
        .await
        .context("HGETALL of prev-day cache failed")?;

    let mut map = HashMap::with_capacity(raw.len());
    for (symbol, payload) in raw {
        match serde_json::from_str::<PrevDayOhlc>(&payload) {
            Ok(ohlc) => {
                map.insert(symbol, ohlc);
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "skipping unparseable prev-day entry");
            }
        }
    }

    Ok(map)
}

// =============================================================================
// Market Data Feed — broker tick socket → tick stream + candle stream
// =============================================================================
//
// Connects to the broker's market-data socket in full (non-lite) mode so the
// cumulative day volume rides along with every LTP update. Each tick is
// published raw to the tick stream and folded into the per-symbol candle
// aggregator; closed candles go out on the candle stream as one JSON field.
//
// Credential lifecycle: the outer engine loop re-reads the active
// credentials before every connection attempt, so both a 403 from the socket
// and a token-update signal simply tear down the connection and loop.
// =============================================================================

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use redis::aio::ConnectionManager;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::cache::{streams, Cache};
use crate::config::EngineConfig;
use crate::fyers::client::json_decimal;
use crate::market_data::CandleAggregator;
use crate::store::credentials::Credentials;

const DATA_SOCKET_URL: &str = "wss://api-t1.fyers.in/socket/v2/dataSock";

/// Broker rate limit: subscribe in chunks with a short gap.
const SUBSCRIBE_BATCH: usize = 50;
const SUBSCRIBE_GAP_MS: u64 = 500;

/// One LTP update from the broker socket.
#[derive(Debug, Clone, PartialEq)]
struct FeedTick {
    symbol: String,
    ltp: Decimal,
    day_volume: i64,
}

/// Long-running data engine entry point.
pub async fn run_data_engine(config: &EngineConfig, cache: &Cache, pool: &PgPool) -> Result<()> {
    info!(symbols = config.symbols.len(), "data engine starting");

    loop {
        let creds = match Credentials::load_active(pool).await? {
            Some(c) => c,
            None => {
                error!("no active credentials — retrying in 10s");
                tokio::time::sleep(tokio::time::Duration::from_secs(10)).await;
                continue;
            }
        };
        let token = match creds.formatted_token() {
            Ok(t) => t,
            Err(e) => {
                error!(error = %e, "credentials unusable — retrying in 10s");
                tokio::time::sleep(tokio::time::Duration::from_secs(10)).await;
                continue;
            }
        };
        info!(app_id = %creds.app_id, "data engine token loaded");

        let mut conn = cache.connection();

        // A token update makes the current socket worthless; drop it and
        // loop so the fresh token is read from persistence.
        tokio::select! {
            result = run_feed(&token, &config.symbols, &mut conn) => {
                if let Err(e) = result {
                    error!(error = %e, "data feed terminated — reconnecting in 5s");
                } else {
                    warn!("data feed ended — reconnecting in 5s");
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
            _ = cache.wait_for_token_update() => {
                info!("token update received — reconnecting with fresh credentials");
            }
        }
    }
}

/// One socket session: connect, subscribe, aggregate until the stream drops.
async fn run_feed(
    token: &str,
    symbols: &[String],
    conn: &mut ConnectionManager,
) -> Result<()> {
    let url = format!("{DATA_SOCKET_URL}?access_token={token}");
    info!("connecting to market data socket");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect to market data socket")?;

    info!("market data socket connected");
    let (mut write, mut read) = ws_stream.split();

    // Batched subscription in full mode (lite mode drops day volume).
    for batch in symbols.chunks(SUBSCRIBE_BATCH) {
        let sub = serde_json::json!({
            "T": "SUB_DATA",
            "SLIST": batch,
            "SUB_T": 1,
            "L": "full",
        });
        write
            .send(Message::Text(sub.to_string()))
            .await
            .context("failed to send subscription batch")?;
        debug!(count = batch.len(), "subscription batch sent");
        tokio::time::sleep(tokio::time::Duration::from_millis(SUBSCRIBE_GAP_MS)).await;
    }
    info!(count = symbols.len(), "subscribed to symbol universe");

    let mut aggregator = CandleAggregator::new();

    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                match parse_tick(&text) {
                    Ok(Some(tick)) => {
                        let now = chrono::Utc::now().timestamp();

                        streams::publish_tick(conn, &tick.symbol, tick.ltp, now).await?;

                        if let Some(candle) =
                            aggregator.on_tick(&tick.symbol, tick.ltp, tick.day_volume, now)
                        {
                            let payload = serde_json::to_string(&candle)
                                .context("failed to serialize candle")?;
                            streams::publish_candle(conn, &payload).await?;
                            debug!(symbol = %candle.symbol, ts = %candle.ts, "candle published");
                        }
                    }
                    Ok(None) => {
                        // Housekeeping frame; a token rejection surfaces here.
                        if is_auth_rejection(&text) {
                            bail!("market data socket rejected token (403)");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to parse feed message");
                    }
                }
            }
            Some(Ok(_)) => {
                // Ping/pong/binary frames are handled by the library.
            }
            Some(Err(e)) => {
                error!(error = %e, "market data socket read error");
                return Err(e.into());
            }
            None => {
                warn!("market data socket stream ended");
                return Ok(());
            }
        }
    }
}

/// Token-rejection check, applied only to housekeeping frames so a price
/// like 403.2 in a tick can never trip it.
fn is_auth_rejection(text: &str) -> bool {
    text.contains("403") || text.contains("Forbidden")
}

/// Parse an LTP update; housekeeping frames (acks, heartbeats) yield `None`.
fn parse_tick(text: &str) -> Result<Option<FeedTick>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("feed message is not JSON")?;

    // Frames without both symbol and ltp are connection housekeeping.
    if root.get("symbol").is_none() || root.get("ltp").is_none() {
        return Ok(None);
    }

    let symbol = root["symbol"]
        .as_str()
        .context("feed message has non-string symbol")?
        .to_string();
    let ltp = json_decimal(&root["ltp"], "ltp").context("feed message has bad ltp")?;
    let day_volume = root["vol_traded_today"].as_i64().unwrap_or(0);

    Ok(Some(FeedTick {
        symbol,
        ltp,
        day_volume,
    }))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_full_mode_tick() {
        let tick = parse_tick(
            r#"{"type":"sf","symbol":"NSE:SBIN-EQ","ltp":812.45,"vol_traded_today":1234567}"#,
        )
        .unwrap()
        .expect("tick frame");

        assert_eq!(tick.symbol, "NSE:SBIN-EQ");
        assert_eq!(tick.ltp, dec!(812.45));
        assert_eq!(tick.day_volume, 1_234_567);
    }

    #[test]
    fn housekeeping_frames_are_skipped() {
        let ack = parse_tick(r#"{"type":"cn","code":200,"message":"Connected"}"#).unwrap();
        assert!(ack.is_none());
    }

    #[test]
    fn missing_day_volume_defaults_to_zero() {
        let tick = parse_tick(r#"{"symbol":"NSE:INFY-EQ","ltp":"1520.1"}"#)
            .unwrap()
            .expect("tick frame");
        assert_eq!(tick.day_volume, 0);
        assert_eq!(tick.ltp, dec!(1520.1));
    }

    #[test]
    fn garbage_is_an_error_not_a_tick() {
        assert!(parse_tick("not json").is_err());
    }

    #[test]
    fn auth_rejection_is_detected() {
        assert!(is_auth_rejection(r#"{"code":403,"message":"Forbidden"}"#));
        assert!(!is_auth_rejection(r#"{"type":"sf","symbol":"X","ltp":1}"#));
    }
}

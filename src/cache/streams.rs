// =============================================================================
// Stream plumbing — tick/candle publication and consumer-group reads
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::{ALGO_GROUP, CANDLE_STREAM, TICK_STREAM};

/// How many messages one blocking read may deliver.
const READ_COUNT: usize = 10;
/// Blocking-read timeout in milliseconds.
const BLOCK_MS: usize = 1000;

/// Which stream a delivered message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Candles,
    Ticks,
}

impl StreamSource {
    pub fn key(self) -> &'static str {
        match self {
            Self::Candles => CANDLE_STREAM,
            Self::Ticks => TICK_STREAM,
        }
    }
}

/// One message delivered to the consumer group, fields decoded to strings.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub source: StreamSource,
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// Append a tick to the tick stream.
pub async fn publish_tick(
    conn: &mut ConnectionManager,
    symbol: &str,
    ltp: Decimal,
    ts_secs: i64,
) -> Result<()> {
    let _: String = conn
        .xadd(
            TICK_STREAM,
            "*",
            &[
                ("symbol", symbol.to_string()),
                ("ltp", ltp.to_string()),
                ("ts", ts_secs.to_string()),
            ],
        )
        .await
        .context("XADD to tick stream failed")?;
    Ok(())
}

/// Append a closed candle to the candle stream.
///
/// The candle travels as a single serialized `data` field so downstream
/// consumers see one atomic JSON document.
pub async fn publish_candle(conn: &mut ConnectionManager, payload: &str) -> Result<()> {
    let _: String = conn
        .xadd(CANDLE_STREAM, "*", &[("data", payload)])
        .await
        .context("XADD to candle stream failed")?;
    Ok(())
}

/// Create the algo consumer group on both streams.
///
/// The candle cursor starts at the beginning of the stream so setups printed
/// before the worker came up are not lost; the tick cursor starts at the tail
/// because a stale tick has no trading value. An already-existing group is
/// fine (another worker got there first).
pub async fn ensure_groups(conn: &mut ConnectionManager) -> Result<()> {
    for (stream, cursor) in [(CANDLE_STREAM, "0"), (TICK_STREAM, "$")] {
        let created: redis::RedisResult<()> =
            conn.xgroup_create_mkstream(stream, ALGO_GROUP, cursor).await;
        match created {
            Ok(()) => debug!(stream, cursor, group = ALGO_GROUP, "consumer group created"),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(stream, group = ALGO_GROUP, "consumer group already exists");
            }
            Err(e) => {
                return Err(e).with_context(|| format!("XGROUP CREATE failed for {stream}"))
            }
        }
    }
    Ok(())
}

/// One blocking batch read for `consumer` across both streams.
///
/// Returns at most `READ_COUNT` messages per stream after blocking up to one
/// second. Messages stay in the group's pending list until acknowledged.
pub async fn read_group_batch(
    conn: &mut ConnectionManager,
    consumer: &str,
) -> Result<Vec<StreamMessage>> {
    let opts = StreamReadOptions::default()
        .group(ALGO_GROUP, consumer)
        .count(READ_COUNT)
        .block(BLOCK_MS);

    let reply: StreamReadReply = conn
        .xread_options(&[CANDLE_STREAM, TICK_STREAM], &[">", ">"], &opts)
        .await
        .context("XREADGROUP failed")?;

    let mut messages = Vec::new();
    for key in reply.keys {
        let source = match key.key.as_str() {
            CANDLE_STREAM => StreamSource::Candles,
            TICK_STREAM => StreamSource::Ticks,
            other => {
                warn!(stream = other, "unexpected stream in group read");
                continue;
            }
        };

        for entry in key.ids {
            let mut fields = HashMap::with_capacity(entry.map.len());
            for (name, value) in entry.map {
                match redis::from_redis_value::<String>(&value) {
                    Ok(text) => {
                        fields.insert(name, text);
                    }
                    Err(e) => {
                        warn!(id = %entry.id, field = %name, error = %e, "undecodable stream field");
                    }
                }
            }
            messages.push(StreamMessage {
                source,
                id: entry.id,
                fields,
            });
        }
    }

    Ok(messages)
}

/// Acknowledge a processed message so the group forgets it.
pub async fn ack(conn: &mut ConnectionManager, source: StreamSource, id: &str) -> Result<()> {
    let _: i64 = conn
        .xack(source.key(), ALGO_GROUP, &[id])
        .await
        .with_context(|| format!("XACK failed for {id} on {}", source.key()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_sources_map_to_interop_names() {
        assert_eq!(StreamSource::Candles.key(), "candle_stream_1m");
        assert_eq!(StreamSource::Ticks.key(), "market_ticks");
    }
}

// =============================================================================
// Order Socket Worker — broker order updates → trade lifecycle reconciliation
// =============================================================================
//
// Runs as the supervised child. A background listener on the token-update
// channel exits the process with code 0 so the supervisor respawns us with
// the credentials the auth flow just wrote; a 403 from the socket does the
// same. Reconciliation itself never raises out of the read loop; a bad
// update is logged and the loop continues.
// =============================================================================

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use sqlx::PgPool;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::cache::Cache;
use crate::fyers::client::json_decimal;
use crate::reconciler::rules::{self, EntryAction, ExitAction, OrderUpdate};
use crate::store::credentials::Credentials;
use crate::store::trades;

const ORDER_SOCKET_URL: &str = "wss://api-t1.fyers.in/socket/v2/orderSock";

/// How a socket session ended (errors are returned separately).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Broker rejected the token: exit 0 so the supervisor reloads us.
    TokenRejected,
    /// Plain disconnect: reconnect after a short pause.
    Disconnected,
}

/// Entry point of the supervised child process.
pub async fn run_order_socket_worker(cache: &Cache, pool: &PgPool) -> Result<()> {
    // Instant token reload: any message on the channel ends this process
    // cleanly; the supervisor restarts it against fresh credentials.
    let listener = cache.clone();
    tokio::spawn(async move {
        match listener.wait_for_token_update().await {
            Ok(()) => {
                info!("token update signal — exiting for supervised restart");
                std::process::exit(0);
            }
            Err(e) => {
                error!(error = %e, "token listener failed");
            }
        }
    });

    loop {
        info!("initializing order socket");

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
        info!(app_id = %creds.app_id, "order socket token loaded");

        match run_socket(&token, pool).await {
            Ok(SessionEnd::TokenRejected) => {
                error!("token rejected by order socket — exiting for reload");
                std::process::exit(0);
            }
            Ok(SessionEnd::Disconnected) => {
                warn!("order socket disconnected — reconnecting in 5s");
            }
            Err(e) => {
                error!(error = %e, "order socket error — reconnecting in 5s");
            }
        }
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
    }
}

/// One socket session: connect, subscribe, reconcile until it drops.
async fn run_socket(token: &str, pool: &PgPool) -> Result<SessionEnd> {
    let url = format!("{ORDER_SOCKET_URL}?access_token={token}");
    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect to order socket")?;

    info!("order socket connected — subscribing to order updates");
    let (mut write, mut read) = ws_stream.split();

    let sub = serde_json::json!({ "T": "SUB_ORD", "SLIST": ["orderUpdate"] });
    write
        .send(Message::Text(sub.to_string()))
        .await
        .context("failed to subscribe to order updates")?;

    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                match parse_order_update(&text) {
                    Ok(Some(update)) => {
                        info!(order_id = %update.id, status = update.status, "order update");
                        if let Err(e) = apply_update(pool, &update).await {
                            // Never raise into the socket loop.
                            error!(order_id = %update.id, error = %e, "reconciliation failed");
                        }
                    }
                    Ok(None) => {
                        // Housekeeping frame; an auth rejection surfaces here,
                        // never inside an order update (ids can contain "403").
                        if text.contains("403") || text.contains("Forbidden") {
                            return Ok(SessionEnd::TokenRejected);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to parse order message");
                    }
                }
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(error = %e, "order socket read error");
                return Err(e.into());
            }
            None => return Ok(SessionEnd::Disconnected),
        }
    }
}

/// Parse an order-update frame; acks and heartbeats yield `None`.
fn parse_order_update(text: &str) -> Result<Option<OrderUpdate>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("order message is not JSON")?;

    // Updates arrive wrapped in an `orders` object; connection acks do not.
    let data = if root.get("orders").is_some() {
        &root["orders"]
    } else {
        &root
    };

    // Ids usually arrive as strings, occasionally as bare numbers.
    let Some(id) = data.get("id").and_then(|v| {
        v.as_str()
            .map(str::to_string)
            .or_else(|| v.as_i64().map(|n| n.to_string()))
    }) else {
        return Ok(None);
    };
    let status = data["status"]
        .as_i64()
        .context("order update missing status")?;
    let traded_price = match data.get("tradedPrice") {
        Some(v) if !v.is_null() => json_decimal(v, "tradedPrice")
            .context("order update has bad tradedPrice")?,
        _ => rust_decimal::Decimal::ZERO,
    };
    let symbol = data
        .get("symbol")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Ok(Some(OrderUpdate {
        id,
        status,
        traded_price,
        symbol,
    }))
}

/// Apply one update under the shared row-lock discipline.
async fn apply_update(pool: &PgPool, update: &OrderUpdate) -> Result<()> {
    // Entry side first; an order id can only match one of the two columns.
    if let Some(trade_id) = trades::id_by_entry_order(pool, &update.id).await? {
        let mut tx = pool.begin().await?;
        let Some(trade) = trades::lock_trade(&mut tx, trade_id).await? else {
            // Locked by a worker right now; the broker will not retransmit,
            // but entry state is re-verified on the next update or restart.
            warn!(trade_id, "trade row locked — skipping update");
            return Ok(());
        };

        match rules::entry_action(update, trade.status) {
            EntryAction::Open { fill_price } => {
                trades::set_open_from_entry(&mut tx, trade_id, fill_price).await?;
                info!(trade_id, symbol = %trade.symbol, fill = %fill_price, "entry confirmed — position open");
            }
            EntryAction::Fail => {
                trades::set_failed(&mut tx, trade_id).await?;
                warn!(trade_id, symbol = %trade.symbol, "entry order failed");
            }
            EntryAction::Ignore => {
                debug!(trade_id, status = update.status, "entry update ignored");
            }
        }
        tx.commit().await?;
        return Ok(());
    }

    if let Some(trade_id) = trades::id_by_exit_order(pool, &update.id).await? {
        let mut tx = pool.begin().await?;
        let Some(trade) = trades::lock_trade(&mut tx, trade_id).await? else {
            warn!(trade_id, "trade row locked — skipping update");
            return Ok(());
        };

        match rules::exit_action(update, trade.status, trade.effective_entry(), trade.quantity) {
            ExitAction::Close { exit_price, pnl } => {
                trades::set_closed(&mut tx, trade_id, exit_price, pnl).await?;
                info!(trade_id, symbol = %trade.symbol, exit = %exit_price, pnl = %pnl, "exit confirmed — trade closed");
            }
            ExitAction::Revert => {
                trades::revert_exit_to_open(&mut tx, trade_id).await?;
                warn!(trade_id, symbol = %trade.symbol, "exit order failed — reverted to open");
            }
            ExitAction::Ignore => {
                debug!(trade_id, status = update.status, "exit update ignored");
            }
        }
        tx.commit().await?;
        return Ok(());
    }

    debug!(order_id = %update.id, "update for unknown order — not ours");
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_wrapped_order_update() {
        let update = parse_order_update(
            r#"{"s":"ok","orders":{"id":"25080100012345","status":2,"tradedPrice":1994.55,"qty":36,"symbol":"NSE:SBIN-EQ"}}"#,
        )
        .unwrap()
        .expect("order frame");

        assert_eq!(update.id, "25080100012345");
        assert_eq!(update.status, 2);
        assert_eq!(update.traded_price, dec!(1994.55));
        assert_eq!(update.symbol.as_deref(), Some("NSE:SBIN-EQ"));
    }

    #[test]
    fn parses_flat_order_update_without_price() {
        let update = parse_order_update(r#"{"id":"X","status":5}"#)
            .unwrap()
            .expect("order frame");
        assert_eq!(update.status, 5);
        assert_eq!(update.traded_price, dec!(0));
    }

    #[test]
    fn ack_frames_are_skipped() {
        let ack = parse_order_update(r#"{"s":"ok","code":200,"message":"Subscribed"}"#).unwrap();
        assert!(ack.is_none());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_order_update("no json here").is_err());
    }
}

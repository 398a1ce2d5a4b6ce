// =============================================================================
// Algo Worker — pattern recognition on candles, execution on ticks
// =============================================================================
//
// Joins the shared consumer group on both streams, so extra worker instances
// simply split the message load. Acknowledgement discipline: a message is
// XACKed only after its handler returns cleanly; handler failures leave it
// pending for a retry pass. Unparseable payloads are acked; a poison pill
// must not wedge the group.
//
// Cap discipline: the PENDING insert at candle time costs nothing. The
// counters are claimed atomically at trigger time, and rolled back when the
// broker refuses the order.
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::counters::{self, TradeSlot};
use crate::cache::prev_day::{self, PrevDayOhlc};
use crate::cache::streams::{self, StreamMessage, StreamSource};
use crate::cache::Cache;
use crate::fyers::FyersClient;
use crate::market_data::CandleMessage;
use crate::store::credentials::Credentials;
use crate::store::settings::RiskSettings;
use crate::store::trades::{self, NewSetup};
use crate::strategy;
use crate::types::{ExitReason, OrderSide, TradeStatus};

/// Long-running algo worker entry point.
pub async fn run_algo_worker(cache: &Cache, pool: &PgPool) -> Result<()> {
    let mut conn = cache.connection();
    streams::ensure_groups(&mut conn).await?;

    let creds = Credentials::load_active(pool)
        .await?
        .context("no active credentials — authenticate from the dashboard first")?;
    let token = creds
        .access_token
        .as_deref()
        .context("active credentials have no access token")?;
    let client = FyersClient::new(&creds.app_id, token);
    info!(app_id = %creds.app_id, "algo worker authenticated");

    let settings = RiskSettings::load(pool).await?;
    info!(
        max_trades_per_day = settings.max_trades_per_day,
        max_trades_per_symbol = settings.max_trades_per_symbol,
        risk_per_trade = %settings.risk_per_trade_amount,
        "risk settings loaded"
    );

    let prev_day = prev_day::load_all(&mut conn).await?;
    info!(symbols = prev_day.len(), "previous-day OHLC cache loaded");
    if prev_day.is_empty() {
        warn!("previous-day cache is empty — run fetch-daily-ohlc before the session");
    }

    let worker = AlgoWorker {
        pool: pool.clone(),
        client,
        settings,
        prev_day,
    };

    let consumer = format!("worker-{}", Uuid::new_v4().simple());
    info!(consumer = %consumer, "algo worker loop started");

    loop {
        let batch = match streams::read_group_batch(&mut conn, &consumer).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "stream read failed — retrying in 5s");
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                continue;
            }
        };

        for message in batch {
            match worker.handle_message(&mut conn, &message).await {
                Ok(()) => {
                    if let Err(e) = streams::ack(&mut conn, message.source, &message.id).await {
                        error!(id = %message.id, error = %e, "ack failed");
                    }
                }
                Err(e) => {
                    // Left unacked on purpose: the message stays claimable.
                    error!(id = %message.id, error = %e, "message handling failed");
                }
            }
        }
    }
}

/// Per-process worker state: broker client, risk settings, and the session's
/// reference data, all loaded once at startup.
struct AlgoWorker {
    pool: PgPool,
    client: FyersClient,
    settings: RiskSettings,
    prev_day: HashMap<String, PrevDayOhlc>,
}

impl AlgoWorker {
    async fn handle_message(
        &self,
        conn: &mut ConnectionManager,
        message: &StreamMessage,
    ) -> Result<()> {
        match message.source {
            StreamSource::Candles => {
                let Some(payload) = message.fields.get("data") else {
                    warn!(id = %message.id, "candle message without data field — acking");
                    return Ok(());
                };
                let candle: CandleMessage = match serde_json::from_str(payload) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(id = %message.id, error = %e, "unparseable candle — acking");
                        return Ok(());
                    }
                };
                self.process_candle(&candle).await
            }
            StreamSource::Ticks => {
                let (symbol, ltp) = match parse_tick_fields(&message.fields) {
                    Some(parsed) => parsed,
                    None => {
                        warn!(id = %message.id, "unparseable tick — acking");
                        return Ok(());
                    }
                };
                self.process_tick(conn, &symbol, ltp).await
            }
        }
    }

    // -------------------------------------------------------------------------
    // Pattern recognition (candle close)
    // -------------------------------------------------------------------------

    async fn process_candle(&self, candle: &CandleMessage) -> Result<()> {
        // No reference data ⇒ the symbol is not tradable today.
        let Some(pdl) = self.prev_day.get(&candle.symbol) else {
            return Ok(());
        };

        let Some(plan) = strategy::evaluate(candle, pdl.low, &self.settings) else {
            return Ok(());
        };

        // Advisory pre-filter only; the cache counter decides at trigger
        // time. Saves a pointless PENDING row when the symbol is maxed out.
        let existing =
            trades::count_for_symbol_today(&self.pool, &candle.symbol, Utc::now()).await?;
        if existing >= self.settings.max_trades_per_symbol {
            return Ok(());
        }

        let candle_timestamp = match DateTime::parse_from_rfc3339(&candle.ts) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(e) => {
                warn!(symbol = %candle.symbol, error = %e, "candle with bad timestamp — dropping");
                return Ok(());
            }
        };

        let setup = NewSetup {
            symbol: candle.symbol.clone(),
            candle_timestamp,
            candle_open: candle.open,
            candle_high: candle.high,
            candle_low: candle.low,
            candle_close: candle.close,
            prev_day_low: pdl.low,
            entry_level: plan.entry_level,
            stop_loss: plan.stop_loss,
            target_price: plan.target_price,
            quantity: plan.quantity,
        };
        let id = trades::insert_pending(&self.pool, &setup).await?;

        info!(
            trade_id = id,
            symbol = %candle.symbol,
            turnover = %strategy::turnover(candle),
            entry = %plan.entry_level,
            stop = %plan.stop_loss,
            target = %plan.target_price,
            qty = plan.quantity,
            "breakdown signal — monitoring entry"
        );
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Execution (every tick)
    // -------------------------------------------------------------------------

    async fn process_tick(
        &self,
        conn: &mut ConnectionManager,
        symbol: &str,
        ltp: Decimal,
    ) -> Result<()> {
        self.handle_entries(conn, symbol, ltp).await?;
        self.handle_exits(symbol, ltp).await?;
        Ok(())
    }

    /// Entry path: PENDING trades whose trigger the tape just touched.
    async fn handle_entries(
        &self,
        conn: &mut ConnectionManager,
        symbol: &str,
        ltp: Decimal,
    ) -> Result<()> {
        let pending = trades::ids_by_status(&self.pool, symbol, TradeStatus::Pending).await?;

        for trade_id in pending {
            let mut tx = self.pool.begin().await?;

            // Locked by a sibling worker, or already transitioned: skip.
            let Some(trade) = trades::lock_trade(&mut tx, trade_id).await? else {
                continue;
            };
            if trade.status != TradeStatus::Pending {
                continue;
            }
            if ltp > trade.entry_level {
                continue;
            }

            let date = counters::trading_date(Utc::now());
            let slot = counters::try_acquire_trade_slot(
                conn,
                &date,
                symbol,
                self.settings.max_trades_per_day,
                self.settings.max_trades_per_symbol,
            )
            .await?;

            match slot {
                TradeSlot::GlobalLimitHit => {
                    trades::set_expired(&mut tx, trade_id, ExitReason::GlobalLimitReached)
                        .await?;
                    info!(trade_id, symbol, "setup expired — global limit reached");
                }
                TradeSlot::SymbolLimitHit => {
                    trades::set_expired(&mut tx, trade_id, ExitReason::SymbolLimitReached)
                        .await?;
                    info!(trade_id, symbol, "setup expired — symbol limit reached");
                }
                TradeSlot::Allowed => {
                    info!(trade_id, symbol, ltp = %ltp, "entry trigger — placing SELL");
                    match self
                        .client
                        .place_order(symbol, trade.quantity, OrderSide::Sell)
                        .await
                    {
                        Ok(order_id) => {
                            trades::set_pending_entry(&mut tx, trade_id, &order_id).await?;
                            info!(trade_id, order_id = %order_id, "entry order placed");
                        }
                        Err(e) => {
                            // Give the claimed slot back before failing the
                            // trade, or the cap leaks for the whole day.
                            counters::rollback_trade_slot(conn, &date, symbol).await?;
                            trades::set_failed(&mut tx, trade_id).await?;
                            error!(trade_id, error = %e, "entry placement failed — limits rolled back");
                        }
                    }
                }
            }

            tx.commit().await?;
        }
        Ok(())
    }

    /// Exit path: OPEN trades checked for stop/target, then break-even.
    async fn handle_exits(&self, symbol: &str, ltp: Decimal) -> Result<()> {
        let open = trades::ids_by_status(&self.pool, symbol, TradeStatus::Open).await?;

        for trade_id in open {
            let mut tx = self.pool.begin().await?;

            let Some(trade) = trades::lock_trade(&mut tx, trade_id).await? else {
                continue;
            };
            if trade.status != TradeStatus::Open {
                continue;
            }

            if let Some(reason) = strategy::exit_trigger(ltp, trade.stop_loss, trade.target_price)
            {
                match self
                    .client
                    .place_order(symbol, trade.quantity, OrderSide::Buy)
                    .await
                {
                    Ok(order_id) => {
                        trades::set_pending_exit(&mut tx, trade_id, &order_id, reason).await?;
                        info!(trade_id, reason = %reason, order_id = %order_id, "exit order placed");
                    }
                    Err(e) => {
                        // Stay OPEN; the next qualifying tick retries.
                        error!(trade_id, error = %e, "exit placement failed — will retry");
                    }
                }
            } else if !trade.is_breakeven_moved {
                let entry = trade.effective_entry();
                if let Some(new_stop) = strategy::breakeven_stop(
                    entry,
                    trade.stop_loss,
                    ltp,
                    self.settings.breakeven_trigger_r,
                ) {
                    trades::move_stop_to_breakeven(&mut tx, trade_id, new_stop).await?;
                    info!(trade_id, symbol, stop = %new_stop, "stop moved to breakeven");
                }
            }

            tx.commit().await?;
        }
        Ok(())
    }
}

/// Decode the `symbol`/`ltp` fields of a tick message.
fn parse_tick_fields(fields: &HashMap<String, String>) -> Option<(String, Decimal)> {
    let symbol = fields.get("symbol")?.clone();
    let ltp = fields.get("ltp")?.parse().ok()?;
    Some((symbol, ltp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn tick_fields_decode() {
        let mut fields = HashMap::new();
        fields.insert("symbol".to_string(), "NSE:SBIN-EQ".to_string());
        fields.insert("ltp".to_string(), "812.45".to_string());
        fields.insert("ts".to_string(), "1754017200".to_string());

        let (symbol, ltp) = parse_tick_fields(&fields).unwrap();
        assert_eq!(symbol, "NSE:SBIN-EQ");
        assert_eq!(ltp, dec!(812.45));
    }

    #[test]
    fn tick_without_price_is_rejected() {
        let mut fields = HashMap::new();
        fields.insert("symbol".to_string(), "NSE:SBIN-EQ".to_string());
        assert!(parse_tick_fields(&fields).is_none());

        fields.insert("ltp".to_string(), "not-a-number".to_string());
        assert!(parse_tick_fields(&fields).is_none());
    }
}

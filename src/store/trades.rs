// =============================================================================
// Trade repository — row-locked access to the central trade table
// =============================================================================
//
// Concurrency contract: any mutation happens inside a transaction that first
// takes the row via `FOR UPDATE SKIP LOCKED` and re-checks the status. Two
// workers (or a worker and the reconciler) can therefore never act on the
// same trade at once, and a locked row is skipped rather than waited on.
// =============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Asia::Kolkata;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use crate::types::{ExitReason, TradeStatus};

/// One row of the trade table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Trade {
    pub id: i64,
    pub symbol: String,
    pub status: TradeStatus,
    pub candle_timestamp: DateTime<Utc>,
    pub candle_open: Decimal,
    pub candle_high: Decimal,
    pub candle_low: Decimal,
    pub candle_close: Decimal,
    pub prev_day_low: Decimal,
    pub entry_level: Decimal,
    pub stop_loss: Decimal,
    pub target_price: Decimal,
    pub quantity: i64,
    pub entry_order_id: Option<String>,
    pub exit_order_id: Option<String>,
    pub actual_entry_price: Option<Decimal>,
    pub actual_exit_price: Option<Decimal>,
    pub is_breakeven_moved: bool,
    pub pnl: Option<Decimal>,
    pub exit_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Trade {
    /// Entry price used for risk math: the actual fill when known, the
    /// planned trigger level otherwise.
    pub fn effective_entry(&self) -> Decimal {
        self.actual_entry_price.unwrap_or(self.entry_level)
    }
}

/// A freshly detected setup, not yet persisted.
#[derive(Debug, Clone)]
pub struct NewSetup {
    pub symbol: String,
    pub candle_timestamp: DateTime<Utc>,
    pub candle_open: Decimal,
    pub candle_high: Decimal,
    pub candle_low: Decimal,
    pub candle_close: Decimal,
    pub prev_day_low: Decimal,
    pub entry_level: Decimal,
    pub stop_loss: Decimal,
    pub target_price: Decimal,
    pub quantity: i64,
}

// ---------------------------------------------------------------------------
// Inserts & scans (pool level)
// ---------------------------------------------------------------------------

/// Persist a new PENDING setup and return its id.
pub async fn insert_pending(pool: &PgPool, setup: &NewSetup) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO trades (symbol, status, candle_timestamp, candle_open, candle_high,
                             candle_low, candle_close, prev_day_low, entry_level,
                             stop_loss, target_price, quantity)
         VALUES ($1, 'PENDING', $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         RETURNING id",
    )
    .bind(&setup.symbol)
    .bind(setup.candle_timestamp)
    .bind(setup.candle_open)
    .bind(setup.candle_high)
    .bind(setup.candle_low)
    .bind(setup.candle_close)
    .bind(setup.prev_day_low)
    .bind(setup.entry_level)
    .bind(setup.stop_loss)
    .bind(setup.target_price)
    .bind(setup.quantity)
    .fetch_one(pool)
    .await
    .context("failed to insert pending trade")?;

    Ok(id)
}

/// Ids of trades in `status` for `symbol`, oldest first.
pub async fn ids_by_status(
    pool: &PgPool,
    symbol: &str,
    status: TradeStatus,
) -> Result<Vec<i64>> {
    sqlx::query_scalar("SELECT id FROM trades WHERE symbol = $1 AND status = $2 ORDER BY id")
        .bind(symbol)
        .bind(status)
        .fetch_all(pool)
        .await
        .context("failed to scan trades by status")
}

/// Advisory count of live trades for `symbol` on the current IST day.
///
/// Excludes EXPIRED and FAILED rows; they never consumed a slot. This count
/// is only a candle-time pre-filter; the cache counters decide at trigger
/// time.
pub async fn count_for_symbol_today(
    pool: &PgPool,
    symbol: &str,
    now: DateTime<Utc>,
) -> Result<i64> {
    let (day_start, day_end) = ist_day_bounds(now)?;

    sqlx::query_scalar(
        "SELECT COUNT(*) FROM trades
         WHERE symbol = $1
           AND created_at >= $2
           AND created_at < $3
           AND status NOT IN ('EXPIRED', 'FAILED')",
    )
    .bind(symbol)
    .bind(day_start)
    .bind(day_end)
    .fetch_one(pool)
    .await
    .context("failed to count today's trades")
}

/// Locate a trade by its entry order id.
pub async fn id_by_entry_order(pool: &PgPool, order_id: &str) -> Result<Option<i64>> {
    sqlx::query_scalar("SELECT id FROM trades WHERE entry_order_id = $1")
        .bind(order_id)
        .fetch_optional(pool)
        .await
        .context("failed to look up trade by entry order id")
}

/// Locate a trade by its exit order id.
pub async fn id_by_exit_order(pool: &PgPool, order_id: &str) -> Result<Option<i64>> {
    sqlx::query_scalar("SELECT id FROM trades WHERE exit_order_id = $1")
        .bind(order_id)
        .fetch_optional(pool)
        .await
        .context("failed to look up trade by exit order id")
}

// ---------------------------------------------------------------------------
// Locked mutations (transaction level)
// ---------------------------------------------------------------------------

/// Take an exclusive lock on one trade row, skipping it when already locked.
///
/// Callers MUST re-check `status` on the returned row: it may have changed
/// between the id scan and the lock.
pub async fn lock_trade(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
) -> Result<Option<Trade>> {
    sqlx::query_as::<_, Trade>("SELECT * FROM trades WHERE id = $1 FOR UPDATE SKIP LOCKED")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .context("failed to lock trade row")
}

/// PENDING → EXPIRED when a cap was hit at trigger time.
pub async fn set_expired(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
    reason: ExitReason,
) -> Result<()> {
    sqlx::query("UPDATE trades SET status = 'EXPIRED', exit_reason = $2 WHERE id = $1")
        .bind(id)
        .bind(reason.to_string())
        .execute(&mut **tx)
        .await
        .context("failed to expire trade")?;
    Ok(())
}

/// PENDING → PENDING_ENTRY once the entry order is on the wire.
pub async fn set_pending_entry(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
    order_id: &str,
) -> Result<()> {
    sqlx::query("UPDATE trades SET status = 'PENDING_ENTRY', entry_order_id = $2 WHERE id = $1")
        .bind(id)
        .bind(order_id)
        .execute(&mut **tx)
        .await
        .context("failed to mark trade pending-entry")?;
    Ok(())
}

/// Terminal FAILED (entry placement refused or entry order rejected).
pub async fn set_failed(tx: &mut Transaction<'_, Postgres>, id: i64) -> Result<()> {
    sqlx::query("UPDATE trades SET status = 'FAILED' WHERE id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await
        .context("failed to mark trade failed")?;
    Ok(())
}

/// OPEN → PENDING_EXIT once the covering order is on the wire.
pub async fn set_pending_exit(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
    order_id: &str,
    reason: ExitReason,
) -> Result<()> {
    sqlx::query(
        "UPDATE trades SET status = 'PENDING_EXIT', exit_order_id = $2, exit_reason = $3
         WHERE id = $1",
    )
    .bind(id)
    .bind(order_id)
    .bind(reason.to_string())
    .execute(&mut **tx)
    .await
    .context("failed to mark trade pending-exit")?;
    Ok(())
}

/// Relocate the stop to the entry price, once, irreversibly.
pub async fn move_stop_to_breakeven(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
    new_stop: Decimal,
) -> Result<()> {
    sqlx::query("UPDATE trades SET stop_loss = $2, is_breakeven_moved = TRUE WHERE id = $1")
        .bind(id)
        .bind(new_stop)
        .execute(&mut **tx)
        .await
        .context("failed to move stop to breakeven")?;
    Ok(())
}

/// PENDING_ENTRY → OPEN on an entry fill.
pub async fn set_open_from_entry(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
    fill_price: Decimal,
) -> Result<()> {
    sqlx::query("UPDATE trades SET status = 'OPEN', actual_entry_price = $2 WHERE id = $1")
        .bind(id)
        .bind(fill_price)
        .execute(&mut **tx)
        .await
        .context("failed to open trade")?;
    Ok(())
}

/// PENDING_EXIT → CLOSED on an exit fill, with realized PnL.
pub async fn set_closed(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
    exit_price: Decimal,
    pnl: Decimal,
) -> Result<()> {
    sqlx::query(
        "UPDATE trades SET status = 'CLOSED', actual_exit_price = $2, pnl = $3 WHERE id = $1",
    )
    .bind(id)
    .bind(exit_price)
    .bind(pnl)
    .execute(&mut **tx)
    .await
    .context("failed to close trade")?;
    Ok(())
}

/// PENDING_EXIT → OPEN after an exit rejection; the cleared exit order id
/// lets the worker place a fresh cover on the next qualifying tick.
pub async fn revert_exit_to_open(tx: &mut Transaction<'_, Postgres>, id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE trades SET status = 'OPEN', exit_order_id = NULL, exit_reason = $2
         WHERE id = $1",
    )
    .bind(id)
    .bind(ExitReason::OrderFailed.to_string())
    .execute(&mut **tx)
    .await
    .context("failed to revert trade to open")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Time helpers
// ---------------------------------------------------------------------------

/// UTC bounds of the IST calendar day containing `now`.
fn ist_day_bounds(now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let ist_date = now.with_timezone(&Kolkata).date_naive();
    let midnight = ist_date
        .and_hms_opt(0, 0, 0)
        .context("invalid midnight for IST date")?;
    let day_start = Kolkata
        .from_local_datetime(&midnight)
        .earliest()
        .context("ambiguous IST midnight")?
        .with_timezone(&Utc);

    Ok((day_start, day_start + Duration::days(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn ist_day_bounds_span_one_day_offset_by_half_past_five() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 5, 0, 0).unwrap();
        let (start, end) = ist_day_bounds(now).unwrap();

        // IST midnight on Aug 1 is 18:30 UTC on Jul 31.
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 7, 31, 18, 30, 0).unwrap());
        assert_eq!(end - start, Duration::days(1));
    }

    #[test]
    fn effective_entry_prefers_actual_fill() {
        let mut trade = Trade {
            id: 1,
            symbol: "NSE:SBIN-EQ".into(),
            status: TradeStatus::Open,
            candle_timestamp: Utc::now(),
            candle_open: dec!(2005),
            candle_high: dec!(2008),
            candle_low: dec!(1995),
            candle_close: dec!(1998),
            prev_day_low: dec!(2000),
            entry_level: dec!(1994.601),
            stop_loss: dec!(2008.4016),
            target_price: dec!(1960.0995),
            quantity: 36,
            entry_order_id: Some("X1".into()),
            exit_order_id: None,
            actual_entry_price: None,
            actual_exit_price: None,
            is_breakeven_moved: false,
            pnl: None,
            exit_reason: None,
            created_at: Utc::now(),
        };

        assert_eq!(trade.effective_entry(), dec!(1994.601));
        trade.actual_entry_price = Some(dec!(1994.55));
        assert_eq!(trade.effective_entry(), dec!(1994.55));
    }
}

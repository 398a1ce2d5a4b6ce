// =============================================================================
// Reference Loader — previous-day OHLC snapshot, run before market open
// =============================================================================
//
// One-shot batch job. For every symbol in the universe it pulls a few days of
// daily candles (weekends and holidays mean "yesterday" is not always one
// calendar day back), picks the most recent *completed* session, and writes
// it to the previous-day hash. Workers read that hash once at startup.
// =============================================================================

use anyhow::{Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use chrono_tz::Asia::Kolkata;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::cache::{prev_day, Cache};
use crate::config::EngineConfig;
use crate::fyers::{DailyCandle, FyersClient};
use crate::store::credentials::Credentials;

/// Look-back window covering weekends and exchange holidays.
const LOOKBACK_DAYS: i64 = 5;
/// Pause between history calls to respect the broker's rate limit.
const REQUEST_GAP_MS: u64 = 100;

/// One-shot loader entry point.
pub async fn run_reference_loader(
    config: &EngineConfig,
    cache: &Cache,
    pool: &PgPool,
) -> Result<()> {
    let creds = Credentials::load_active(pool)
        .await?
        .context("no active credentials — authenticate from the dashboard first")?;
    let token = creds
        .access_token
        .as_deref()
        .context("active credentials have no access token")?;
    let client = FyersClient::new(&creds.app_id, token);

    let today = Utc::now().with_timezone(&Kolkata).date_naive();
    let range_from = (today - chrono::Duration::days(LOOKBACK_DAYS))
        .format("%Y-%m-%d")
        .to_string();
    let range_to = today.format("%Y-%m-%d").to_string();

    info!(
        symbols = config.symbols.len(),
        from = %range_from,
        to = %range_to,
        "fetching previous-day history"
    );

    let mut conn = cache.connection();
    let mut cached = 0usize;

    for symbol in &config.symbols {
        tokio::time::sleep(tokio::time::Duration::from_millis(REQUEST_GAP_MS)).await;

        let candles = match client.history(symbol, &range_from, &range_to).await {
            Ok(c) => c,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "history fetch failed — skipping");
                continue;
            }
        };

        let Some(candle) = select_prev_day(&candles, today) else {
            // Only today's forming candle was available; not tradable.
            continue;
        };

        let ohlc = prev_day::PrevDayOhlc {
            ts: candle.ts,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
        };
        prev_day::store(&mut conn, symbol, &ohlc).await?;
        cached += 1;

        if cached % 50 == 0 {
            info!(cached, total = config.symbols.len(), "progress");
        }
    }

    info!(cached, "previous-day OHLC load complete");
    Ok(())
}

/// Pick the most recent completed session from a daily history response.
///
/// If the last candle belongs to today (fetch ran after the open), use the
/// one before it; with nothing before it, the symbol is skipped.
fn select_prev_day(candles: &[DailyCandle], today: NaiveDate) -> Option<&DailyCandle> {
    let last = candles.last()?;
    if ist_date(last.ts) == Some(today) {
        if candles.len() > 1 {
            candles.get(candles.len() - 2)
        } else {
            None
        }
    } else {
        Some(last)
    }
}

/// IST calendar date of an epoch-second timestamp.
fn ist_date(ts: i64) -> Option<NaiveDate> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.with_timezone(&Kolkata).date_naive())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(ts: i64, low: rust_decimal::Decimal) -> DailyCandle {
        DailyCandle {
            ts,
            open: dec!(2010),
            high: dec!(2030),
            low,
            close: dec!(2004),
            volume: 1_000_000,
        }
    }

    /// 09:15 IST on the given IST date, as epoch seconds.
    fn session_open(date: NaiveDate) -> i64 {
        Kolkata
            .from_local_datetime(&date.and_hms_opt(9, 15, 0).unwrap())
            .unwrap()
            .timestamp()
    }

    #[test]
    fn completed_last_candle_is_used_directly() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let yesterday = NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();
        let candles = vec![candle(session_open(yesterday), dec!(2000))];

        let picked = select_prev_day(&candles, today).unwrap();
        assert_eq!(picked.low, dec!(2000));
    }

    #[test]
    fn todays_forming_candle_is_skipped_for_the_prior_one() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let yesterday = NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();
        let candles = vec![
            candle(session_open(yesterday), dec!(1990)),
            candle(session_open(today), dec!(2001)),
        ];

        let picked = select_prev_day(&candles, today).unwrap();
        assert_eq!(picked.low, dec!(1990));
    }

    #[test]
    fn lone_candle_from_today_means_not_tradable() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let candles = vec![candle(session_open(today), dec!(2001))];
        assert!(select_prev_day(&candles, today).is_none());
    }

    #[test]
    fn empty_history_yields_nothing() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        assert!(select_prev_day(&[], today).is_none());
    }
}

// =============================================================================
// Daily Trade Counters — atomic cap enforcement on the shared cache
// =============================================================================
//
// The counters are the single source of truth for the daily caps. The
// check-and-increment runs as one server-side script so two workers racing on
// the same tick can never both pass a nearly-full limit. Keys carry the IST
// trading date and a 24h TTL, so yesterday's counts can never leak into
// today's session.
// =============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Asia::Kolkata;
use redis::aio::ConnectionManager;

/// Counter TTL: one trading day.
const COUNTER_TTL_SECS: i64 = 86_400;

/// Check both caps and increment both counters atomically.
/// Returns 1 (allowed), -1 (global cap hit), -2 (symbol cap hit).
const CHECK_AND_INCR_LUA: &str = r#"
local global_count = tonumber(redis.call('GET', KEYS[1]) or 0)
local symbol_count = tonumber(redis.call('GET', KEYS[2]) or 0)
local global_limit = tonumber(ARGV[1])
local symbol_limit = tonumber(ARGV[2])

if global_count >= global_limit then
    return -1
end

if symbol_count >= symbol_limit then
    return -2
end

redis.call('INCR', KEYS[1])
redis.call('INCR', KEYS[2])
redis.call('EXPIRE', KEYS[1], ARGV[3])
redis.call('EXPIRE', KEYS[2], ARGV[3])

return 1
"#;

/// Undo a successful check-and-increment after a failed order placement.
/// Decrements are floored at zero.
const ROLLBACK_LUA: &str = r#"
local global_val = tonumber(redis.call('GET', KEYS[1]) or 0)
local symbol_val = tonumber(redis.call('GET', KEYS[2]) or 0)

if global_val > 0 then redis.call('DECR', KEYS[1]) end
if symbol_val > 0 then redis.call('DECR', KEYS[2]) end
return 1
"#;

/// Outcome of the atomic limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSlot {
    Allowed,
    GlobalLimitHit,
    SymbolLimitHit,
}

/// IST calendar date string used in counter keys (`YYYY-MM-DD`).
pub fn trading_date(now: DateTime<Utc>) -> String {
    now.with_timezone(&Kolkata).format("%Y-%m-%d").to_string()
}

/// Key of the global daily counter.
pub fn global_key(date: &str) -> String {
    format!("daily_count:{date}")
}

/// Key of the per-symbol daily counter.
pub fn symbol_key(date: &str, symbol: &str) -> String {
    format!("symbol_count:{date}:{symbol}")
}

/// Atomically claim a trade slot for `symbol` on `date`.
///
/// On `Allowed` both counters have already been incremented; a failed order
/// placement MUST be followed by [`rollback_trade_slot`] or the slot is lost
/// for the rest of the day.
pub async fn try_acquire_trade_slot(
    conn: &mut ConnectionManager,
    date: &str,
    symbol: &str,
    global_limit: i64,
    symbol_limit: i64,
) -> Result<TradeSlot> {
    let script = redis::Script::new(CHECK_AND_INCR_LUA);
    let verdict: i64 = script
        .key(global_key(date))
        .key(symbol_key(date, symbol))
        .arg(global_limit)
        .arg(symbol_limit)
        .arg(COUNTER_TTL_SECS)
        .invoke_async(conn)
        .await
        .context("limit check script failed")?;

    Ok(match verdict {
        -1 => TradeSlot::GlobalLimitHit,
        -2 => TradeSlot::SymbolLimitHit,
        _ => TradeSlot::Allowed,
    })
}

/// Release a previously acquired slot after a placement failure.
pub async fn rollback_trade_slot(
    conn: &mut ConnectionManager,
    date: &str,
    symbol: &str,
) -> Result<()> {
    let script = redis::Script::new(ROLLBACK_LUA);
    let _: i64 = script
        .key(global_key(date))
        .key(symbol_key(date, symbol))
        .invoke_async(conn)
        .await
        .context("limit rollback script failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn counter_keys_carry_date_and_symbol() {
        assert_eq!(global_key("2026-08-01"), "daily_count:2026-08-01");
        assert_eq!(
            symbol_key("2026-08-01", "NSE:SBIN-EQ"),
            "symbol_count:2026-08-01:NSE:SBIN-EQ"
        );
    }

    #[test]
    fn trading_date_is_ist_not_utc() {
        // 20:00 UTC on Jul 31 is already 01:30 IST on Aug 1.
        let late_utc = Utc.with_ymd_and_hms(2026, 7, 31, 20, 0, 0).unwrap();
        assert_eq!(trading_date(late_utc), "2026-08-01");

        // 05:00 UTC on Aug 1 is 10:30 IST the same day.
        let morning_utc = Utc.with_ymd_and_hms(2026, 8, 1, 5, 0, 0).unwrap();
        assert_eq!(trading_date(morning_utc), "2026-08-01");
    }

    #[test]
    fn scripts_cover_both_keys() {
        // Guard against accidental edits dropping a key or the TTL.
        assert!(CHECK_AND_INCR_LUA.contains("KEYS[1]"));
        assert!(CHECK_AND_INCR_LUA.contains("KEYS[2]"));
        assert!(CHECK_AND_INCR_LUA.contains("EXPIRE"));
        assert!(ROLLBACK_LUA.contains("DECR"));
    }
}

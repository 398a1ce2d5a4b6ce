// =============================================================================
// Candle Aggregator — per-symbol tick → one-minute OHLCV accumulation
// =============================================================================
//
// Minute classification uses the local wall clock, never broker timestamps,
// so every symbol's candles close on the same boundary. A candle is emitted
// exactly once, when the first tick of the *next* minute arrives for that
// symbol. Volume is derived from the broker's cumulative day volume: the
// delta between the value at candle open and at rollover, floored at zero
// (the counter resets at session start).
// =============================================================================

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use chrono_tz::Asia::Kolkata;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A closed one-minute candle as it travels on the candle stream.
///
/// `ts` is the ISO-8601 timestamp of the minute the candle covers, rendered
/// in IST so the dashboard reads exchange-local times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleMessage {
    pub symbol: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    pub ts: String,
}

/// In-progress accumulation for one symbol.
#[derive(Debug, Clone)]
struct Accumulator {
    minute: i64,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    start_volume: i64,
}

impl Accumulator {
    fn begin(minute: i64, ltp: Decimal, day_volume: i64) -> Self {
        Self {
            minute,
            open: ltp,
            high: ltp,
            low: ltp,
            close: ltp,
            start_volume: day_volume,
        }
    }
}

/// Per-symbol candle accumulator map.
///
/// Owned by the feed's read loop; ticks arrive serially per connection so no
/// locking is needed.
#[derive(Debug, Default)]
pub struct CandleAggregator {
    accumulators: HashMap<String, Accumulator>,
}

impl CandleAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one tick in; returns the finalized candle when the tick opens a
    /// new minute for this symbol.
    pub fn on_tick(
        &mut self,
        symbol: &str,
        ltp: Decimal,
        day_volume: i64,
        ts_secs: i64,
    ) -> Option<CandleMessage> {
        let minute = ts_secs.div_euclid(60);

        let acc = match self.accumulators.entry(symbol.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(Accumulator::begin(minute, ltp, day_volume));
                return None;
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };

        if minute > acc.minute {
            let closed = CandleMessage {
                symbol: symbol.to_string(),
                open: acc.open,
                high: acc.high,
                low: acc.low,
                close: acc.close,
                volume: (day_volume - acc.start_volume).max(0),
                ts: minute_to_iso(acc.minute),
            };
            *acc = Accumulator::begin(minute, ltp, day_volume);
            Some(closed)
        } else {
            // Same minute (or a late tick from an earlier one): extend the
            // current candle.
            if ltp > acc.high {
                acc.high = ltp;
            }
            if ltp < acc.low {
                acc.low = ltp;
            }
            acc.close = ltp;
            None
        }
    }
}

/// ISO-8601 IST timestamp for a minute bucket.
fn minute_to_iso(minute: i64) -> String {
    match Utc.timestamp_opt(minute * 60, 0).single() {
        Some(dt) => dt.with_timezone(&Kolkata).to_rfc3339(),
        None => String::new(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const T0: i64 = 1_754_017_200; // an exact minute boundary

    fn feed(
        agg: &mut CandleAggregator,
        ticks: &[(i64, Decimal, i64)],
    ) -> Vec<CandleMessage> {
        ticks
            .iter()
            .filter_map(|&(ts, ltp, vol)| agg.on_tick("NSE:SBIN-EQ", ltp, vol, ts))
            .collect()
    }

    #[test]
    fn open_is_first_close_is_last_high_low_are_extremes() {
        let mut agg = CandleAggregator::new();
        let closed = feed(
            &mut agg,
            &[
                (T0, dec!(100.0), 1000),
                (T0 + 10, dec!(103.5), 1400),
                (T0 + 20, dec!(99.2), 1900),
                (T0 + 50, dec!(101.0), 2500),
                (T0 + 60, dec!(101.5), 2600), // rollover
            ],
        );

        assert_eq!(closed.len(), 1);
        let c = &closed[0];
        assert_eq!(c.open, dec!(100.0));
        assert_eq!(c.high, dec!(103.5));
        assert_eq!(c.low, dec!(99.2));
        assert_eq!(c.close, dec!(101.0));
        assert_eq!(c.volume, 1500); // 2500 - 1000
    }

    #[test]
    fn one_candle_per_symbol_per_minute() {
        let mut agg = CandleAggregator::new();
        let closed = feed(
            &mut agg,
            &[
                (T0, dec!(100.0), 0),
                (T0 + 61, dec!(101.0), 10),
                (T0 + 62, dec!(101.2), 20),
                (T0 + 125, dec!(102.0), 30),
            ],
        );

        // Two rollovers, two candles, distinct minutes.
        assert_eq!(closed.len(), 2);
        assert_ne!(closed[0].ts, closed[1].ts);
    }

    #[test]
    fn day_volume_reset_clamps_to_zero() {
        let mut agg = CandleAggregator::new();
        let closed = feed(
            &mut agg,
            &[(T0, dec!(100.0), 5000), (T0 + 60, dec!(100.5), 100)],
        );

        assert_eq!(closed[0].volume, 0);
    }

    #[test]
    fn late_tick_from_earlier_minute_extends_current_candle() {
        let mut agg = CandleAggregator::new();
        assert!(agg.on_tick("NSE:SBIN-EQ", dec!(100.0), 0, T0).is_none());
        // A tick stamped before the open must not emit or reset anything.
        assert!(agg.on_tick("NSE:SBIN-EQ", dec!(98.0), 0, T0 - 30).is_none());
        let closed = agg
            .on_tick("NSE:SBIN-EQ", dec!(100.2), 0, T0 + 60)
            .expect("rollover closes the candle");
        assert_eq!(closed.low, dec!(98.0));
    }

    #[test]
    fn symbols_accumulate_independently() {
        let mut agg = CandleAggregator::new();
        agg.on_tick("NSE:SBIN-EQ", dec!(100.0), 0, T0);
        agg.on_tick("NSE:INFY-EQ", dec!(1500.0), 0, T0 + 5);

        let sbin = agg.on_tick("NSE:SBIN-EQ", dec!(101.0), 10, T0 + 60);
        assert_eq!(sbin.as_ref().map(|c| c.symbol.as_str()), Some("NSE:SBIN-EQ"));
        assert_eq!(sbin.unwrap().close, dec!(100.0));

        // INFY has seen no rollover yet.
        assert!(agg.on_tick("NSE:INFY-EQ", dec!(1501.0), 5, T0 + 30).is_none());
    }

    #[test]
    fn candle_timestamp_is_ist_minute_start() {
        let mut agg = CandleAggregator::new();
        agg.on_tick("NSE:SBIN-EQ", dec!(100.0), 0, T0);
        let closed = agg.on_tick("NSE:SBIN-EQ", dec!(100.0), 0, T0 + 60).unwrap();

        assert!(closed.ts.ends_with("+05:30"));
        let parsed = chrono::DateTime::parse_from_rfc3339(&closed.ts).unwrap();
        assert_eq!(parsed.timestamp(), T0);
    }

    #[test]
    fn stream_payload_round_trips() {
        let msg = CandleMessage {
            symbol: "NSE:SBIN-EQ".into(),
            open: dec!(2005),
            high: dec!(2008),
            low: dec!(1995),
            close: dec!(1998),
            volume: 100_000,
            ts: "2026-08-01T10:15:00+05:30".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: CandleMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}

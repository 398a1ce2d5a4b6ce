// =============================================================================
// Breakdown Strategy — pattern detection, trade planning, exit rules
// =============================================================================
//
// Pure price math only: no I/O, no clocks. The worker owns persistence and
// rate limiting; everything here is deterministic and unit tested against
// the literal reference scenarios.
//
// Setup: a one-minute candle that opens above the previous day's low and
// closes below it, on meaningful turnover. The plan shorts a break under the
// candle low with the stop above the candle high.
// =============================================================================

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::market_data::CandleMessage;
use crate::store::settings::RiskSettings;
use crate::types::ExitReason;

/// Entry trigger sits a hair under the candle low: low × 0.9998.
fn entry_factor() -> Decimal {
    Decimal::new(9998, 4)
}

/// Stop sits a hair above the candle high: high × 1.0002.
fn stop_factor() -> Decimal {
    Decimal::new(10002, 4)
}

/// Computed short plan for a confirmed setup.
#[derive(Debug, Clone, PartialEq)]
pub struct TradePlan {
    pub entry_level: Decimal,
    pub stop_loss: Decimal,
    pub target_price: Decimal,
    pub quantity: i64,
}

/// Turnover of a candle: traded volume × closing price.
pub fn turnover(candle: &CandleMessage) -> Decimal {
    Decimal::from(candle.volume) * candle.close
}

/// Breakdown geometry: open above PDL, close below it.
pub fn is_breakdown(candle: &CandleMessage, prev_day_low: Decimal) -> bool {
    candle.open > prev_day_low && candle.close < prev_day_low
}

/// Size and price the short off the triggering candle.
///
/// Returns `None` when the candle is degenerate (stop at or under entry ⇒
/// non-positive risk per share).
pub fn build_plan(candle: &CandleMessage, settings: &RiskSettings) -> Option<TradePlan> {
    let entry_level = candle.low * entry_factor();
    let stop_loss = candle.high * stop_factor();

    let risk = stop_loss - entry_level;
    if risk <= Decimal::ZERO {
        return None;
    }

    let quantity = (settings.risk_per_trade_amount / risk)
        .floor()
        .to_i64()
        .unwrap_or(0)
        .max(1);

    let target_price = entry_level - risk * settings.risk_reward_ratio;

    Some(TradePlan {
        entry_level,
        stop_loss,
        target_price,
        quantity,
    })
}

/// Full candle evaluation: liquidity filter, geometry, then the plan.
pub fn evaluate(
    candle: &CandleMessage,
    prev_day_low: Decimal,
    settings: &RiskSettings,
) -> Option<TradePlan> {
    if !is_breakdown(candle, prev_day_low) {
        return None;
    }
    if turnover(candle) <= Decimal::from(settings.volume_threshold) {
        return None;
    }
    build_plan(candle, settings)
}

/// Does this tick force the short out of the market?
///
/// Stop has priority when a single print satisfies both sides.
pub fn exit_trigger(ltp: Decimal, stop_loss: Decimal, target: Decimal) -> Option<ExitReason> {
    if ltp >= stop_loss {
        Some(ExitReason::StopLoss)
    } else if ltp <= target {
        Some(ExitReason::Target)
    } else {
        None
    }
}

/// Break-even rule: once unrealized profit reaches `trigger_r` risk units,
/// the stop relocates to the entry price. Returns the new stop, or `None`
/// when the move is not (yet) earned.
pub fn breakeven_stop(
    entry: Decimal,
    stop_loss: Decimal,
    ltp: Decimal,
    trigger_r: Decimal,
) -> Option<Decimal> {
    let risk = stop_loss - entry;
    if risk <= Decimal::ZERO {
        return None;
    }
    if (entry - ltp) >= risk * trigger_r {
        Some(entry)
    } else {
        None
    }
}

// =============================================================================
// Tests — reference scenarios
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn settings() -> RiskSettings {
        RiskSettings {
            max_trades_per_day: 10,
            max_trades_per_symbol: 2,
            risk_per_trade_amount: dec!(500),
            risk_reward_ratio: dec!(2.5),
            breakeven_trigger_r: dec!(1.25),
            volume_threshold: 10_000_000,
        }
    }

    fn breakdown_candle(volume: i64) -> CandleMessage {
        CandleMessage {
            symbol: "NSE:TATASTEEL-EQ".into(),
            open: dec!(2005),
            high: dec!(2008),
            low: dec!(1995),
            close: dec!(1998),
            volume,
            ts: "2026-08-01T10:16:00+05:30".into(),
        }
    }

    #[test]
    fn clean_breakdown_produces_the_reference_plan() {
        let candle = breakdown_candle(100_000);
        let plan = evaluate(&candle, dec!(2000), &settings()).expect("setup expected");

        assert_eq!(plan.entry_level, dec!(1994.6010));
        assert_eq!(plan.stop_loss, dec!(2008.4016));
        assert_eq!(plan.stop_loss - plan.entry_level, dec!(13.8006));
        assert_eq!(plan.quantity, 36);
        assert_eq!(plan.target_price, dec!(1960.0995));
    }

    #[test]
    fn low_turnover_is_skipped() {
        // 1998 x 1000 = 1,998,000, under one crore.
        let candle = breakdown_candle(1000);
        assert!(evaluate(&candle, dec!(2000), &settings()).is_none());
    }

    #[test]
    fn no_breakdown_no_setup() {
        let mut candle = breakdown_candle(100_000);
        candle.close = dec!(2001); // closed back above PDL
        assert!(evaluate(&candle, dec!(2000), &settings()).is_none());

        candle.close = dec!(1998);
        candle.open = dec!(1999); // opened already below PDL
        assert!(evaluate(&candle, dec!(2000), &settings()).is_none());
    }

    #[test]
    fn turnover_exactly_at_threshold_is_rejected() {
        let mut candle = breakdown_candle(10_000);
        candle.close = dec!(1000);
        candle.open = dec!(2005);
        // 10_000 × 1000 = exactly 1e7; the filter demands strictly more.
        assert_eq!(turnover(&candle), dec!(10000000));
        assert!(evaluate(&candle, dec!(2000), &settings()).is_none());
    }

    #[test]
    fn degenerate_candle_is_refused() {
        // high below low can only come from corrupt data; risk goes negative.
        let candle = CandleMessage {
            symbol: "NSE:X-EQ".into(),
            open: dec!(2005),
            high: dec!(1900),
            low: dec!(1995),
            close: dec!(1998),
            volume: 100_000,
            ts: String::new(),
        };
        assert!(build_plan(&candle, &settings()).is_none());
    }

    #[test]
    fn tiny_risk_budget_still_trades_one_share() {
        let mut s = settings();
        s.risk_per_trade_amount = dec!(5); // far below risk per share
        let plan = build_plan(&breakdown_candle(100_000), &s).unwrap();
        assert_eq!(plan.quantity, 1);
    }

    #[test]
    fn exit_triggers_follow_short_geometry() {
        let stop = dec!(1010);
        let target = dec!(975);

        assert_eq!(exit_trigger(dec!(1010), stop, target), Some(ExitReason::StopLoss));
        assert_eq!(exit_trigger(dec!(1011.5), stop, target), Some(ExitReason::StopLoss));
        assert_eq!(exit_trigger(dec!(975), stop, target), Some(ExitReason::Target));
        assert_eq!(exit_trigger(dec!(990), stop, target), None);
    }

    #[test]
    fn breakeven_moves_exactly_at_trigger() {
        // entry 1000, stop 1010 ⇒ risk 10; 1.25R = 12.5 points.
        assert_eq!(
            breakeven_stop(dec!(1000), dec!(1010), dec!(987.5), dec!(1.25)),
            Some(dec!(1000))
        );
        // One paisa short of the trigger: no move.
        assert_eq!(
            breakeven_stop(dec!(1000), dec!(1010), dec!(987.51), dec!(1.25)),
            None
        );
    }

    #[test]
    fn breakeven_then_stop_at_entry() {
        // After the move the stop sits at the entry; a pullback through it
        // exits the trade (reference scenario 5).
        let new_stop = breakeven_stop(dec!(1000), dec!(1010), dec!(987.5), dec!(1.25)).unwrap();
        assert_eq!(new_stop, dec!(1000));
        assert_eq!(
            exit_trigger(dec!(1000.5), new_stop, dec!(975)),
            Some(ExitReason::StopLoss)
        );
    }
}

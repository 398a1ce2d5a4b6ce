// =============================================================================
// Reconciliation rules — order-update classification, pure and idempotent
// =============================================================================
//
// Broker updates can arrive out of order and more than once. Every decision
// here is a function of (update, current trade state) so a replayed or stale
// update degrades to Ignore instead of corrupting the lifecycle.
//
// Broker status codes: 1 = cancelled, 2 = traded/filled, 4 = transit,
// 5 = rejected, 6 = pending.
// =============================================================================

use rust_decimal::Decimal;

use crate::types::TradeStatus;

pub const STATUS_CANCELLED: i64 = 1;
pub const STATUS_TRADED: i64 = 2;
pub const STATUS_REJECTED: i64 = 5;

/// One order update from the broker's order socket.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub id: String,
    pub status: i64,
    pub traded_price: Decimal,
    pub symbol: Option<String>,
}

/// What to do with an update matching a trade's entry order.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryAction {
    /// Entry filled: PENDING_ENTRY → OPEN with the fill price.
    Open { fill_price: Decimal },
    /// Entry cancelled/rejected: PENDING_ENTRY → FAILED.
    Fail,
    /// Stale, repeated, or in-flight update.
    Ignore,
}

/// What to do with an update matching a trade's exit order.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitAction {
    /// Exit filled: PENDING_EXIT → CLOSED with realized PnL.
    Close { exit_price: Decimal, pnl: Decimal },
    /// Exit cancelled/rejected: PENDING_EXIT → OPEN so the worker retries.
    Revert,
    Ignore,
}

/// Classify an update against the trade's entry order.
pub fn entry_action(update: &OrderUpdate, current: TradeStatus) -> EntryAction {
    match update.status {
        STATUS_TRADED if current == TradeStatus::PendingEntry => EntryAction::Open {
            fill_price: update.traded_price,
        },
        STATUS_CANCELLED | STATUS_REJECTED if current == TradeStatus::PendingEntry => {
            EntryAction::Fail
        }
        // Already OPEN/FAILED (replay), or transit/pending codes.
        _ => EntryAction::Ignore,
    }
}

/// Classify an update against the trade's exit order.
///
/// `effective_entry` is the actual entry fill when known, else the planned
/// entry level; short convention: pnl = (entry − exit) × quantity.
pub fn exit_action(
    update: &OrderUpdate,
    current: TradeStatus,
    effective_entry: Decimal,
    quantity: i64,
) -> ExitAction {
    match update.status {
        STATUS_TRADED if current == TradeStatus::PendingExit => ExitAction::Close {
            exit_price: update.traded_price,
            pnl: (effective_entry - update.traded_price) * Decimal::from(quantity),
        },
        STATUS_CANCELLED | STATUS_REJECTED if current == TradeStatus::PendingExit => {
            ExitAction::Revert
        }
        _ => ExitAction::Ignore,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn update(status: i64, price: Decimal) -> OrderUpdate {
        OrderUpdate {
            id: "X".into(),
            status,
            traded_price: price,
            symbol: Some("NSE:SBIN-EQ".into()),
        }
    }

    #[test]
    fn entry_fill_opens_exactly_once() {
        let fill = update(STATUS_TRADED, dec!(1994.55));

        assert_eq!(
            entry_action(&fill, TradeStatus::PendingEntry),
            EntryAction::Open {
                fill_price: dec!(1994.55)
            }
        );
        // Replay after the trade is already OPEN: no-op.
        assert_eq!(entry_action(&fill, TradeStatus::Open), EntryAction::Ignore);
    }

    #[test]
    fn entry_rejection_fails_the_trade() {
        assert_eq!(
            entry_action(&update(STATUS_REJECTED, dec!(0)), TradeStatus::PendingEntry),
            EntryAction::Fail
        );
        assert_eq!(
            entry_action(&update(STATUS_CANCELLED, dec!(0)), TradeStatus::PendingEntry),
            EntryAction::Fail
        );
        // A late cancel must not kill an already-failed or open trade.
        assert_eq!(
            entry_action(&update(STATUS_REJECTED, dec!(0)), TradeStatus::Failed),
            EntryAction::Ignore
        );
        assert_eq!(
            entry_action(&update(STATUS_CANCELLED, dec!(0)), TradeStatus::Open),
            EntryAction::Ignore
        );
    }

    #[test]
    fn transit_and_pending_codes_are_noops() {
        for code in [4, 6] {
            assert_eq!(
                entry_action(&update(code, dec!(0)), TradeStatus::PendingEntry),
                EntryAction::Ignore
            );
            assert_eq!(
                exit_action(&update(code, dec!(0)), TradeStatus::PendingExit, dec!(1000), 1),
                ExitAction::Ignore
            );
        }
    }

    #[test]
    fn exit_fill_realizes_short_pnl() {
        let fill = update(STATUS_TRADED, dec!(990));

        assert_eq!(
            exit_action(&fill, TradeStatus::PendingExit, dec!(1000), 36),
            ExitAction::Close {
                exit_price: dec!(990),
                pnl: dec!(360), // (1000 − 990) × 36
            }
        );
        // Replay after CLOSED: no-op.
        assert_eq!(
            exit_action(&fill, TradeStatus::Closed, dec!(1000), 36),
            ExitAction::Ignore
        );
    }

    #[test]
    fn losing_exit_has_negative_pnl() {
        let fill = update(STATUS_TRADED, dec!(1010.5));
        assert_eq!(
            exit_action(&fill, TradeStatus::PendingExit, dec!(1000), 10),
            ExitAction::Close {
                exit_price: dec!(1010.5),
                pnl: dec!(-105.0),
            }
        );
    }

    #[test]
    fn exit_rejection_reverts_for_retry() {
        assert_eq!(
            exit_action(&update(STATUS_REJECTED, dec!(0)), TradeStatus::PendingExit, dec!(1000), 1),
            ExitAction::Revert
        );
        // Once reverted to OPEN, a replayed rejection is a no-op.
        assert_eq!(
            exit_action(&update(STATUS_REJECTED, dec!(0)), TradeStatus::Open, dec!(1000), 1),
            ExitAction::Ignore
        );
    }
}

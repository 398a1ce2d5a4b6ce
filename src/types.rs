// =============================================================================
// Shared types used across the Banyan trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Lifecycle of a breakdown trade.
///
/// `PENDING` setups wait for the tape to touch the entry level; from there
/// the trade walks the order lifecycle until it lands in one of the terminal
/// states (`CLOSED`, `EXPIRED`, `FAILED`). A rejected exit order reverts the
/// trade from `PENDING_EXIT` back to `OPEN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "trade_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Pending,
    PendingEntry,
    Open,
    PendingExit,
    Closed,
    Expired,
    Failed,
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::PendingEntry => write!(f, "PENDING_ENTRY"),
            Self::Open => write!(f, "OPEN"),
            Self::PendingExit => write!(f, "PENDING_EXIT"),
            Self::Closed => write!(f, "CLOSED"),
            Self::Expired => write!(f, "EXPIRED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Why a trade left (or never reached) the market.
///
/// The rendered strings are stored on the trade row and shown verbatim on the
/// dashboard, so they must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    Target,
    OrderFailed,
    GlobalLimitReached,
    SymbolLimitReached,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "Stop Loss"),
            Self::Target => write!(f, "Target"),
            Self::OrderFailed => write!(f, "Order Failed"),
            Self::GlobalLimitReached => write!(f, "Global Limit Reached"),
            Self::SymbolLimitReached => write!(f, "Symbol Limit Reached"),
        }
    }
}

/// Order side on the broker wire: -1 = sell, +1 = buy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Sell,
    Buy,
}

impl OrderSide {
    /// Wire encoding used by the broker order API.
    pub fn code(self) -> i32 {
        match self {
            Self::Sell => -1,
            Self::Buy => 1,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sell => write!(f, "SELL"),
            Self::Buy => write!(f, "BUY"),
        }
    }
}

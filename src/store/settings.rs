// =============================================================================
// Strategy settings — dashboard-editable risk parameters
// =============================================================================

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::PgPool;

/// Risk parameters governing the breakdown strategy.
///
/// Loaded once at worker startup; a settings edit takes effect on the next
/// worker restart, matching how the caps themselves only reset daily.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RiskSettings {
    pub max_trades_per_day: i64,
    pub max_trades_per_symbol: i64,
    pub risk_per_trade_amount: Decimal,
    pub risk_reward_ratio: Decimal,
    pub breakeven_trigger_r: Decimal,
    pub volume_threshold: i64,
}

impl RiskSettings {
    /// Load the settings row (seeded by migration, so it always exists).
    pub async fn load(pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            "SELECT max_trades_per_day, max_trades_per_symbol, risk_per_trade_amount,
                    risk_reward_ratio, breakeven_trigger_r, volume_threshold
             FROM strategy_settings
             WHERE id = 1",
        )
        .fetch_one(pool)
        .await
        .context("failed to load strategy settings")
    }
}

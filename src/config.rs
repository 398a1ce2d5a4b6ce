// =============================================================================
// Engine Configuration — process-level settings from the environment
// =============================================================================
//
// Risk parameters (trade caps, risk per trade, RR) are NOT here: those live
// in the `strategy_settings` table so the dashboard can edit them. This
// module only carries what a process needs before it can reach the database:
// connection URLs and the symbol universe.
// =============================================================================

use anyhow::{Context, Result};

/// Default NSE cash-market universe used when `BANYAN_SYMBOLS` is unset.
fn default_symbols() -> Vec<String> {
    [
        "NSE:SBIN-EQ",
        "NSE:RELIANCE-EQ",
        "NSE:TATAMOTORS-EQ",
        "NSE:HDFCBANK-EQ",
        "NSE:ICICIBANK-EQ",
        "NSE:INFY-EQ",
        "NSE:TCS-EQ",
        "NSE:AXISBANK-EQ",
        "NSE:KOTAKBANK-EQ",
        "NSE:LT-EQ",
        "NSE:ITC-EQ",
        "NSE:BHARTIARTL-EQ",
        "NSE:MARUTI-EQ",
        "NSE:BAJFINANCE-EQ",
        "NSE:HINDUNILVR-EQ",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Process-level configuration shared by every subcommand.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Postgres connection string (trades, credentials, settings).
    pub database_url: String,
    /// Redis connection string (streams, counters, PDL cache, pub/sub).
    pub redis_url: String,
    /// Symbol universe the strategy watches.
    pub symbols: Vec<String>,
}

impl EngineConfig {
    /// Build the configuration from environment variables.
    ///
    /// `DATABASE_URL` and `REDIS_URL` are required. `BANYAN_SYMBOLS` is an
    /// optional comma-separated override of the built-in universe.
    pub fn from_env() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is not set")?;

        let symbols = match std::env::var("BANYAN_SYMBOLS") {
            Ok(raw) => {
                let parsed: Vec<String> = raw
                    .split(',')
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect();
                if parsed.is_empty() {
                    default_symbols()
                } else {
                    parsed
                }
            }
            Err(_) => default_symbols(),
        };

        Ok(Self {
            database_url,
            redis_url,
            symbols,
        })
    }
}

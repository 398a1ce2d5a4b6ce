// =============================================================================
// Broker credentials — single active record, written by the auth flow
// =============================================================================

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::fyers::socket_token;

/// The active broker credential set.
///
/// Mutated only by the external auth flow; the engine treats it as read-only
/// and re-reads it after every token-update signal or 403.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Credentials {
    pub app_id: String,
    pub secret_key: String,
    pub access_token: Option<String>,
    pub is_active: bool,
}

impl Credentials {
    /// Load the active credentials row, if one exists.
    pub async fn load_active(pool: &PgPool) -> Result<Option<Self>> {
        let creds = sqlx::query_as::<_, Self>(
            "SELECT app_id, secret_key, access_token, is_active
             FROM credentials
             WHERE is_active
             LIMIT 1",
        )
        .fetch_optional(pool)
        .await
        .context("failed to load active credentials")?;

        Ok(creds)
    }

    /// The `app_id:access_token` form required by sockets and REST calls.
    ///
    /// Errors when no token has been written yet (auth flow never ran).
    pub fn formatted_token(&self) -> Result<String> {
        let raw = self
            .access_token
            .as_deref()
            .context("active credentials have no access token")?;
        Ok(socket_token(&self.app_id, raw))
    }
}

pub mod client;

pub use client::{BrokerError, DailyCandle, FyersClient};

/// Format the access token for socket and REST authentication.
///
/// The broker expects `app_id:access_token`; tokens written by the auth flow
/// sometimes already carry the prefix, so only prepend when the colon is
/// missing.
pub fn socket_token(app_id: &str, raw_token: &str) -> String {
    if raw_token.contains(':') {
        raw_token.to_string()
    } else {
        format!("{app_id}:{raw_token}")
    }
}

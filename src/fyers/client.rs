// =============================================================================
// Fyers REST API Client — daily history and market order placement
// =============================================================================
//
// SECURITY: the access token is never logged or serialized. Every request
// carries `Authorization: app_id:access_token` and a hard per-call timeout so
// a stalled broker endpoint cannot wedge a worker mid-tick.
// =============================================================================

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::OrderSide;

/// Per-call timeout for broker REST requests.
const REQUEST_TIMEOUT_SECS: u64 = 5;

/// Error classification for broker REST calls.
///
/// The split matters operationally: `TokenExpired` forces a credential
/// reload, `Api` is a logical refusal (counters must be rolled back), and
/// `Transport`/`Malformed` are treated the same as a refusal by callers that
/// already incremented counters.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("access token expired or rejected (HTTP {status})")]
    TokenExpired { status: u16 },

    #[error("broker api refused request: s={s} message={message}")]
    Api { s: String, message: String },

    #[error("malformed broker response: {0}")]
    Malformed(String),
}

/// One completed daily candle from the history endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyCandle {
    /// Unix epoch seconds of the session start.
    pub ts: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

/// Market order request body.
///
/// Field values are fixed by the strategy: intraday product, day validity,
/// market order (type 2) with zeroed limit/stop/disclosed quantities.
#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    symbol: &'a str,
    qty: i64,
    #[serde(rename = "type")]
    order_type: i32,
    side: i32,
    #[serde(rename = "productType")]
    product_type: &'static str,
    validity: &'static str,
    #[serde(rename = "limitPrice")]
    limit_price: i32,
    #[serde(rename = "stopPrice")]
    stop_price: i32,
    #[serde(rename = "disclosedQty")]
    disclosed_qty: i32,
    #[serde(rename = "offlineOrder")]
    offline_order: bool,
}

/// Fyers REST API client.
#[derive(Clone)]
pub struct FyersClient {
    auth: String,
    base_url: String,
    http: reqwest::Client,
}

impl FyersClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new `FyersClient`.
    ///
    /// # Arguments
    /// * `app_id`       — broker application id.
    /// * `access_token` — raw access token from the credentials record; the
    ///                    `app_id:` prefix is added when missing.
    pub fn new(app_id: &str, access_token: &str) -> Self {
        Self::with_base_url(app_id, access_token, "https://api-t1.fyers.in")
    }

    /// Create a client against an explicit base URL (tests point this at a
    /// local mock server).
    pub fn with_base_url(app_id: &str, access_token: &str, base_url: impl Into<String>) -> Self {
        let auth = super::socket_token(app_id, access_token);

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        Self {
            auth,
            base_url: base_url.into(),
            http,
        }
    }

    // -------------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------------

    /// GET /data/history — daily candles for `symbol` over a date range.
    ///
    /// Response shape: `{ "s": "ok", "candles": [[ts,o,h,l,c,v], …] }`.
    pub async fn history(
        &self,
        symbol: &str,
        range_from: &str,
        range_to: &str,
    ) -> Result<Vec<DailyCandle>, BrokerError> {
        let url = format!("{}/data/history", self.base_url);

        let resp = self
            .http
            .get(&url)
            .header("Authorization", &self.auth)
            .query(&[
                ("symbol", symbol),
                ("resolution", "D"),
                ("date_format", "1"),
                ("range_from", range_from),
                ("range_to", range_to),
                ("cont_flag", "1"),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(BrokerError::TokenExpired {
                status: status.as_u16(),
            });
        }

        let body: serde_json::Value = resp.json().await?;
        Self::check_api_status(&body)?;

        let raw = body["candles"]
            .as_array()
            .ok_or_else(|| BrokerError::Malformed("history response missing 'candles'".into()))?;

        let mut candles = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = entry
                .as_array()
                .ok_or_else(|| BrokerError::Malformed("candle entry is not an array".into()))?;
            if arr.len() < 6 {
                warn!(symbol, len = arr.len(), "skipping malformed history candle");
                continue;
            }

            candles.push(DailyCandle {
                ts: arr[0].as_i64().unwrap_or(0),
                open: json_decimal(&arr[1], "open")?,
                high: json_decimal(&arr[2], "high")?,
                low: json_decimal(&arr[3], "low")?,
                close: json_decimal(&arr[4], "close")?,
                volume: arr[5].as_i64().unwrap_or(0),
            });
        }

        debug!(symbol, count = candles.len(), "daily history fetched");
        Ok(candles)
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// POST /api/v3/orders — place an intraday market order.
    ///
    /// Returns the broker order id on success. A logical refusal
    /// (`s != "ok"`) is an error: the caller rolls back its counters and
    /// fails the trade.
    pub async fn place_order(
        &self,
        symbol: &str,
        qty: i64,
        side: OrderSide,
    ) -> Result<String, BrokerError> {
        let url = format!("{}/api/v3/orders", self.base_url);

        let body = OrderRequest {
            symbol,
            qty,
            order_type: 2,
            side: side.code(),
            product_type: "INTRADAY",
            validity: "DAY",
            limit_price: 0,
            stop_price: 0,
            disclosed_qty: 0,
            offline_order: false,
        };

        debug!(symbol, qty, side = %side, "placing market order");

        let resp = self
            .http
            .post(&url)
            .header("Authorization", &self.auth)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(BrokerError::TokenExpired {
                status: status.as_u16(),
            });
        }

        let body: serde_json::Value = resp.json().await?;
        Self::check_api_status(&body)?;

        let id = body["id"]
            .as_str()
            .map(str::to_string)
            .or_else(|| body["id"].as_i64().map(|n| n.to_string()))
            .ok_or_else(|| BrokerError::Malformed("order response missing 'id'".into()))?;

        debug!(symbol, order_id = %id, "order placed");
        Ok(id)
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    /// Reject logical API failures (`s != "ok"`).
    fn check_api_status(body: &serde_json::Value) -> Result<(), BrokerError> {
        let s = body["s"].as_str().unwrap_or("");
        if s != "ok" {
            return Err(BrokerError::Api {
                s: s.to_string(),
                message: body["message"].as_str().unwrap_or("").to_string(),
            });
        }
        Ok(())
    }
}

/// Parse a JSON value that may be either a string or a number into `Decimal`.
///
/// Routing numbers through their literal text keeps broker prices exact
/// instead of round-tripping through f64.
pub fn json_decimal(val: &serde_json::Value, name: &str) -> Result<Decimal, BrokerError> {
    match val {
        serde_json::Value::String(s) => Decimal::from_str(s)
            .map_err(|_| BrokerError::Malformed(format!("field {name} is not decimal: {s}"))),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .map_err(|_| BrokerError::Malformed(format!("field {name} is not decimal: {n}"))),
        other => Err(BrokerError::Malformed(format!(
            "field {name} has unexpected JSON type: {other}"
        ))),
    }
}

impl std::fmt::Debug for FyersClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FyersClient")
            .field("auth", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn json_decimal_handles_strings_and_numbers() {
        assert_eq!(
            json_decimal(&serde_json::json!("625.55"), "x").unwrap(),
            dec!(625.55)
        );
        assert_eq!(
            json_decimal(&serde_json::json!(1994.601), "x").unwrap(),
            dec!(1994.601)
        );
        assert!(json_decimal(&serde_json::json!(null), "x").is_err());
    }

    #[tokio::test]
    async fn history_parses_candle_arrays() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/data/history")
            .match_query(mockito::Matcher::UrlEncoded(
                "symbol".into(),
                "NSE:SBIN-EQ".into(),
            ))
            .with_status(200)
            .with_body(
                r#"{"s":"ok","candles":[
                    [1753765800,800.0,812.5,795.0,810.2,1200000],
                    [1753852200,810.0,818.0,802.0,805.5,900000]
                ]}"#,
            )
            .create_async()
            .await;

        let client = FyersClient::with_base_url("APP-100", "tok", server.url());
        let candles = client
            .history("NSE:SBIN-EQ", "2026-07-27", "2026-08-01")
            .await
            .unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].low, dec!(795.0));
        assert_eq!(candles[1].close, dec!(805.5));
        assert_eq!(candles[1].volume, 900000);
    }

    #[tokio::test]
    async fn history_api_refusal_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/data/history")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"s":"no_data","message":"no data"}"#)
            .create_async()
            .await;

        let client = FyersClient::with_base_url("APP-100", "tok", server.url());
        let err = client
            .history("NSE:SBIN-EQ", "2026-07-27", "2026-08-01")
            .await
            .unwrap_err();

        assert!(matches!(err, BrokerError::Api { .. }));
    }

    #[tokio::test]
    async fn place_order_returns_broker_id() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/v3/orders")
            .with_status(200)
            .with_body(r#"{"s":"ok","id":"25080100012345"}"#)
            .create_async()
            .await;

        let client = FyersClient::with_base_url("APP-100", "tok", server.url());
        let id = client
            .place_order("NSE:SBIN-EQ", 36, OrderSide::Sell)
            .await
            .unwrap();

        assert_eq!(id, "25080100012345");
    }

    #[tokio::test]
    async fn place_order_logical_failure() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/v3/orders")
            .with_status(200)
            .with_body(r#"{"s":"error","message":"margin shortfall"}"#)
            .create_async()
            .await;

        let client = FyersClient::with_base_url("APP-100", "tok", server.url());
        let err = client
            .place_order("NSE:SBIN-EQ", 36, OrderSide::Sell)
            .await
            .unwrap_err();

        match err {
            BrokerError::Api { message, .. } => assert_eq!(message, "margin shortfall"),
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn forbidden_maps_to_token_expired() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/v3/orders")
            .with_status(403)
            .with_body(r#"{"s":"error","message":"forbidden"}"#)
            .create_async()
            .await;

        let client = FyersClient::with_base_url("APP-100", "tok", server.url());
        let err = client
            .place_order("NSE:SBIN-EQ", 1, OrderSide::Buy)
            .await
            .unwrap_err();

        assert!(matches!(err, BrokerError::TokenExpired { status: 403 }));
    }
}

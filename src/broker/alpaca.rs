// =============================================================================
// Alpaca Trading API Client — positions and liquidation
// =============================================================================
//
// SECURITY: The secret key is never logged or serialized. Both keys travel as
// request headers on every call (`APCA-API-KEY-ID`, `APCA-API-SECRET-KEY`).
//
// Alpaca reports numeric position fields as strings. Values that fail to parse
// are surfaced as `None` so the decision engine can reject that one position
// instead of the whole listing failing.
// =============================================================================

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::exit::rules::classify_asset;
use crate::types::Position;

/// Live trading endpoint, used when no base URL is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.alpaca.markets";

/// Per-request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Position object as returned by `GET /v2/positions`.
#[derive(Debug, Deserialize)]
struct AlpacaPosition {
    symbol: String,
    #[serde(default)]
    qty: Option<String>,
    #[serde(default)]
    avg_entry_price: Option<String>,
    #[serde(default)]
    current_price: Option<String>,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    asset_class: Option<String>,
}

fn parse_decimal(raw: Option<&str>) -> Option<f64> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<f64>().ok())
}

impl AlpacaPosition {
    fn into_position(self) -> Position {
        let mut quantity = parse_decimal(self.qty.as_deref()).unwrap_or(0.0);
        let is_short = self
            .side
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("short"))
            .unwrap_or(false);
        // Alpaca already signs short quantities, but not every proxy does.
        if is_short && quantity > 0.0 {
            quantity = -quantity;
        }

        let asset_class = classify_asset(&self.symbol, self.asset_class.as_deref());

        Position {
            cost_basis: parse_decimal(self.avg_entry_price.as_deref()),
            current_price: parse_decimal(self.current_price.as_deref()),
            ticker: self.symbol,
            quantity,
            asset_class,
        }
    }
}

/// Decode a `GET /v2/positions` body.
fn decode_positions(body: &str) -> Result<Vec<Position>, BrokerError> {
    let raw: Vec<AlpacaPosition> =
        serde_json::from_str(body).map_err(|e| BrokerError::Decode(e.to_string()))?;
    Ok(raw.into_iter().map(AlpacaPosition::into_position).collect())
}

/// Alpaca REST client.
#[derive(Clone)]
pub struct AlpacaClient {
    base_url: String,
    client: reqwest::Client,
}

impl AlpacaClient {
    /// Build a client. `base_url` selects paper or live trading.
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, BrokerError> {
        let api_key = api_key.into();
        let api_secret = api_secret.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut default_headers = HeaderMap::new();
        match HeaderValue::from_str(&api_key) {
            Ok(val) => {
                default_headers.insert("APCA-API-KEY-ID", val);
            }
            Err(_) => warn!("ALPACA_API_KEY contains invalid header characters; omitted"),
        }
        match HeaderValue::from_str(&api_secret) {
            Ok(mut val) => {
                val.set_sensitive(true);
                default_headers.insert("APCA-API-SECRET-KEY", val);
            }
            Err(_) => warn!("ALPACA_API_SECRET contains invalid header characters; omitted"),
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        debug!(base_url = %base_url, "AlpacaClient initialised");

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn read_body(resp: reqwest::Response) -> Result<String, BrokerError> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(BrokerError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl Broker for AlpacaClient {
    /// GET /v2/positions
    #[instrument(skip(self), name = "alpaca::list_positions")]
    async fn list_open_positions(&self) -> Result<Vec<Position>, BrokerError> {
        let url = format!("{}/v2/positions", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let body = Self::read_body(resp).await?;

        let positions = decode_positions(&body)?;
        debug!(count = positions.len(), "open positions retrieved");
        Ok(positions)
    }

    /// DELETE /v2/positions/{symbol}
    #[instrument(skip(self), name = "alpaca::close_position")]
    async fn close_position(&self, ticker: &str) -> Result<(), BrokerError> {
        let url = format!("{}/v2/positions/{}", self.base_url, ticker);
        let resp = self.client.delete(&url).send().await?;
        let body = Self::read_body(resp).await?;

        debug!(ticker, response = %body, "close order accepted");
        Ok(())
    }
}

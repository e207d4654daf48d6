//! REST API last-price fetchers.
//!
//! One request per instrument; each exchange's response shape is parsed by a
//! dedicated function and normalized to a single positive `f64`.

use crate::{FetchError, PriceSource};
use async_trait::async_trait;
use pricewatch_core::{Exchange, InstrumentKey};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

const BINANCE_URL: &str = "https://api.binance.com/api/v3/ticker/price";
const BYBIT_URL: &str = "https://api.bybit.com/v5/market/tickers";
const COINBASE_URL: &str = "https://api.exchange.coinbase.com/products";
const GATEIO_URL: &str = "https://api.gateio.ws/api/v4/spot/tickers";
const UPBIT_URL: &str = "https://api.upbit.com/v1/ticker";

/// Price source backed by the exchanges' public REST endpoints.
#[derive(Debug, Clone)]
pub struct RestPriceSource {
    client: reqwest::Client,
    enabled: Vec<Exchange>,
}

impl RestPriceSource {
    /// Create a source for the given exchanges with a per-request timeout.
    pub fn new(enabled: Vec<Exchange>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pricewatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, enabled })
    }

    pub fn enabled(&self) -> &[Exchange] {
        &self.enabled
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<String, FetchError> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::BadResponse(format!("HTTP {}", status)));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl PriceSource for RestPriceSource {
    async fn fetch(&self, instrument: &InstrumentKey) -> Result<f64, FetchError> {
        let exchange = instrument.exchange;
        if !self.enabled.contains(&exchange) {
            return Err(FetchError::UnknownExchange(exchange.to_string()));
        }
        let symbol = instrument.symbol();

        let price = match exchange {
            Exchange::Binance => {
                let body = self.get(BINANCE_URL, &[("symbol", symbol)]).await?;
                parse_binance(&body)?
            }
            Exchange::Bybit => {
                let body = self
                    .get(BYBIT_URL, &[("category", "spot"), ("symbol", symbol)])
                    .await?;
                parse_bybit(&body)?
            }
            Exchange::Coinbase => {
                let url = format!("{}/{}/ticker", COINBASE_URL, symbol);
                let body = self.get(&url, &[]).await?;
                parse_coinbase(&body)?
            }
            Exchange::GateIO => {
                let body = self.get(GATEIO_URL, &[("currency_pair", symbol)]).await?;
                parse_gateio(&body)?
            }
            Exchange::Upbit => {
                let body = self.get(UPBIT_URL, &[("markets", symbol)]).await?;
                parse_upbit(&body)?
            }
        };

        debug!(exchange = %exchange, symbol = symbol, price = price, "Fetched price");
        Ok(price)
    }
}

fn positive(price: f64) -> Result<f64, FetchError> {
    if price.is_finite() && price > 0.0 {
        Ok(price)
    } else {
        Err(FetchError::BadResponse(format!("non-positive price {}", price)))
    }
}

fn parse_decimal(raw: &str) -> Result<f64, FetchError> {
    let price = raw
        .trim()
        .parse::<f64>()
        .map_err(|e| FetchError::BadResponse(format!("invalid price {:?}: {}", raw, e)))?;
    positive(price)
}

#[derive(Debug, Deserialize)]
struct BinanceTickerPrice {
    price: String,
}

/// `{"symbol":"BTCUSDT","price":"43000.01"}`
pub fn parse_binance(body: &str) -> Result<f64, FetchError> {
    let ticker: BinanceTickerPrice = serde_json::from_str(body)?;
    parse_decimal(&ticker.price)
}

#[derive(Debug, Deserialize)]
struct BybitResponse {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    result: Option<BybitResult>,
}

#[derive(Debug, Deserialize)]
struct BybitResult {
    #[serde(default)]
    list: Vec<BybitTicker>,
}

#[derive(Debug, Deserialize)]
struct BybitTicker {
    #[serde(rename = "lastPrice")]
    last_price: String,
}

/// `{"retCode":0,"result":{"list":[{"symbol":"SOLUSDT","lastPrice":"98.1"}]}}`
pub fn parse_bybit(body: &str) -> Result<f64, FetchError> {
    let response: BybitResponse = serde_json::from_str(body)?;
    if response.ret_code != 0 {
        return Err(FetchError::BadResponse(format!(
            "retCode {}: {}",
            response.ret_code, response.ret_msg
        )));
    }
    let ticker = response
        .result
        .and_then(|r| r.list.into_iter().next())
        .ok_or_else(|| FetchError::BadResponse("empty ticker list".to_string()))?;
    parse_decimal(&ticker.last_price)
}

#[derive(Debug, Deserialize)]
struct CoinbaseTicker {
    price: String,
}

/// `{"trade_id":1,"price":"43000.01","size":"0.1",...}`
pub fn parse_coinbase(body: &str) -> Result<f64, FetchError> {
    let ticker: CoinbaseTicker = serde_json::from_str(body)?;
    parse_decimal(&ticker.price)
}

#[derive(Debug, Deserialize)]
struct GateIOTicker {
    last: String,
}

/// `[{"currency_pair":"BTC_USDT","last":"43000.01",...}]`
pub fn parse_gateio(body: &str) -> Result<f64, FetchError> {
    let tickers: Vec<GateIOTicker> = serde_json::from_str(body)?;
    let ticker = tickers
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::BadResponse("empty ticker list".to_string()))?;
    parse_decimal(&ticker.last)
}

#[derive(Debug, Deserialize)]
struct UpbitTicker {
    trade_price: f64,
}

/// `[{"market":"KRW-BTC","trade_price":58000000.0,...}]`
pub fn parse_upbit(body: &str) -> Result<f64, FetchError> {
    let tickers: Vec<UpbitTicker> = serde_json::from_str(body)?;
    let ticker = tickers
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::BadResponse("empty ticker list".to_string()))?;
    positive(ticker.trade_price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_binance() {
        let body = r#"{"symbol":"BTCUSDT","price":"43000.01000000"}"#;
        assert_eq!(parse_binance(body).unwrap(), 43000.01);
    }

    #[test]
    fn test_parse_bybit() {
        let body = r#"{"retCode":0,"retMsg":"OK","result":{"category":"spot","list":[{"symbol":"SOLUSDT","lastPrice":"98.15","bid1Price":"98.14"}]},"time":1700000000000}"#;
        assert_eq!(parse_bybit(body).unwrap(), 98.15);
    }

    #[test]
    fn test_parse_bybit_error_code() {
        let body = r#"{"retCode":10001,"retMsg":"Not supported symbols","result":{}}"#;
        let err = parse_bybit(body).unwrap_err();
        assert!(matches!(err, FetchError::BadResponse(msg) if msg.contains("10001")));
    }

    #[test]
    fn test_parse_bybit_empty_list() {
        let body = r#"{"retCode":0,"retMsg":"OK","result":{"category":"spot","list":[]}}"#;
        assert!(matches!(parse_bybit(body), Err(FetchError::BadResponse(_))));
    }

    #[test]
    fn test_parse_coinbase() {
        let body = r#"{"trade_id":86326522,"price":"2451.37","size":"0.01","time":"2024-01-01T00:00:00Z","bid":"2451.36","ask":"2451.38","volume":"1000"}"#;
        assert_eq!(parse_coinbase(body).unwrap(), 2451.37);
    }

    #[test]
    fn test_parse_gateio() {
        let body = r#"[{"currency_pair":"BTC_USDT","last":"43000.5","lowest_ask":"43000.6","highest_bid":"43000.4"}]"#;
        assert_eq!(parse_gateio(body).unwrap(), 43000.5);
        assert!(matches!(parse_gateio("[]"), Err(FetchError::BadResponse(_))));
    }

    #[test]
    fn test_parse_upbit() {
        let body = r#"[{"market":"KRW-BTC","trade_price":58000000.0,"change":"RISE"}]"#;
        assert_eq!(parse_upbit(body).unwrap(), 58_000_000.0);
    }

    #[test]
    fn test_rejects_zero_and_malformed_prices() {
        assert!(matches!(
            parse_binance(r#"{"symbol":"X","price":"0"}"#),
            Err(FetchError::BadResponse(_))
        ));
        assert!(matches!(
            parse_coinbase(r#"{"price":"abc"}"#),
            Err(FetchError::BadResponse(_))
        ));
        assert!(matches!(parse_binance("<html>"), Err(FetchError::BadResponse(_))));
    }

    #[tokio::test]
    async fn test_disabled_exchange_is_unknown() {
        let source = RestPriceSource::new(vec![Exchange::Binance], DEFAULT_FETCH_TIMEOUT).unwrap();
        let key = InstrumentKey::new(Exchange::Upbit, "KRW-BTC");
        let err = source.fetch(&key).await.unwrap_err();
        assert!(matches!(err, FetchError::UnknownExchange(name) if name == "Upbit"));
    }

    #[tokio::test]
    async fn test_binance_fetch_price() {
        // This is an integration test - requires network
        let source = RestPriceSource::new(vec![Exchange::Binance], DEFAULT_FETCH_TIMEOUT).unwrap();
        let key = InstrumentKey::new(Exchange::Binance, "BTCUSDT");
        if let Ok(price) = source.fetch(&key).await {
            assert!(price > 0.0);
        }
        // Don't fail if network is unavailable
    }
}

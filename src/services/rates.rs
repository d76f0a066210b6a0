use moka::future::Cache;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::config::Config;
use crate::error::DepositError;
use crate::models::Currency;

const QUOTE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateSource {
    CoinGecko,
    Coinbase,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateQuote {
    pub currency: Currency,
    pub usd: f64,
    pub source: RateSource,
}

/// Currency to USD pricing with a fallback chain:
/// CoinGecko, then Coinbase, then a fixed conservative rate.
pub struct RateService {
    client: reqwest::Client,
    coingecko_url: String,
    coinbase_url: String,
    default_eth: f64,
    default_sol: f64,
    quotes: Cache<Currency, RateQuote>,
}

impl RateService {
    pub fn new(
        coingecko_url: impl Into<String>,
        coinbase_url: impl Into<String>,
        default_eth: f64,
        default_sol: f64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            coingecko_url: coingecko_url.into().trim_end_matches('/').to_string(),
            coinbase_url: coinbase_url.into().trim_end_matches('/').to_string(),
            default_eth,
            default_sol,
            quotes: Cache::builder()
                .max_capacity(16)
                .time_to_live(QUOTE_TTL)
                .build(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.coingecko_api_url.clone(),
            config.coinbase_api_url.clone(),
            config.default_eth_usd_rate,
            config.default_sol_usd_rate,
        )
    }

    /// Never fails: the fixed default rate is the last resort.
    pub async fn usd_rate(&self, currency: Currency) -> RateQuote {
        if let Some(cached) = self.quotes.get(&currency).await {
            tracing::debug!("Using cached {}/USD rate: ${}", currency, cached.usd);
            return cached;
        }

        match self.coingecko(currency).await {
            Ok(usd) => {
                tracing::info!("Got {}/USD rate from CoinGecko: ${}", currency, usd);
                return self.remember(currency, usd, RateSource::CoinGecko).await;
            }
            Err(e) => tracing::warn!("CoinGecko {}/USD rate failed: {}", currency, e),
        }

        match self.coinbase(currency).await {
            Ok(usd) => {
                tracing::info!("Got {}/USD rate from Coinbase fallback: ${}", currency, usd);
                return self.remember(currency, usd, RateSource::Coinbase).await;
            }
            Err(e) => tracing::warn!("Coinbase {}/USD rate failed: {}", currency, e),
        }

        let usd = self.default_rate(currency);
        tracing::warn!("Using default {}/USD rate: ${}", currency, usd);
        RateQuote {
            currency,
            usd,
            source: RateSource::Default,
        }
    }

    pub fn default_rate(&self, currency: Currency) -> f64 {
        match currency {
            Currency::Eth => self.default_eth,
            Currency::Sol => self.default_sol,
        }
    }

    async fn remember(&self, currency: Currency, usd: f64, source: RateSource) -> RateQuote {
        let quote = RateQuote {
            currency,
            usd,
            source,
        };
        self.quotes.insert(currency, quote).await;
        quote
    }

    async fn coingecko(&self, currency: Currency) -> Result<f64, DepositError> {
        let asset = currency.coingecko_id();
        let body: Value = self
            .client
            .get(format!("{}/api/v3/simple/price", self.coingecko_url))
            .query(&[("ids", asset), ("vs_currencies", "usd")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let usd = body[asset]["usd"]
            .as_f64()
            .ok_or_else(|| DepositError::RateUnavailable(format!("no usd price for {}", asset)))?;
        positive(usd)
    }

    // `rates.USD` is the USD price of one unit of `currency`.
    async fn coinbase(&self, currency: Currency) -> Result<f64, DepositError> {
        let body: Value = self
            .client
            .get(format!("{}/v2/exchange-rates", self.coinbase_url))
            .query(&[("currency", currency.symbol())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let usd = body["data"]["rates"]["USD"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| DepositError::RateUnavailable("no USD rate in response".to_string()))?;
        positive(usd)
    }
}

fn positive(usd: f64) -> Result<f64, DepositError> {
    if usd.is_finite() && usd > 0.0 {
        Ok(usd)
    } else {
        Err(DepositError::RateUnavailable(format!("rate out of range: {}", usd)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    #[tokio::test]
    async fn prefers_coingecko() {
        let mut gecko = Server::new_async().await;
        let coinbase = Server::new_async().await;
        let mock = gecko
            .mock("GET", "/api/v3/simple/price")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("ids".into(), "ethereum".into()),
                Matcher::UrlEncoded("vs_currencies".into(), "usd".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ethereum":{"usd":1800.5}}"#)
            .create_async()
            .await;

        let rates = RateService::new(gecko.url(), coinbase.url(), 1600.0, 100.0);
        let quote = rates.usd_rate(Currency::Eth).await;

        mock.assert_async().await;
        assert_eq!(quote.usd, 1800.5);
        assert_eq!(quote.source, RateSource::CoinGecko);
    }

    #[tokio::test]
    async fn falls_back_to_coinbase() {
        let mut gecko = Server::new_async().await;
        let mut coinbase = Server::new_async().await;
        gecko
            .mock("GET", "/api/v3/simple/price")
            .match_query(Matcher::Any)
            .with_status(429)
            .create_async()
            .await;
        coinbase
            .mock("GET", "/v2/exchange-rates")
            .match_query(Matcher::UrlEncoded("currency".into(), "SOL".into()))
            .with_status(200)
            .with_body(r#"{"data":{"currency":"SOL","rates":{"USD":"142.25","EUR":"130.1"}}}"#)
            .create_async()
            .await;

        let rates = RateService::new(gecko.url(), coinbase.url(), 1600.0, 100.0);
        let quote = rates.usd_rate(Currency::Sol).await;

        assert_eq!(quote.usd, 142.25);
        assert_eq!(quote.source, RateSource::Coinbase);
    }

    #[tokio::test]
    async fn falls_back_to_default_when_both_fail() {
        let mut gecko = Server::new_async().await;
        let mut coinbase = Server::new_async().await;
        gecko
            .mock("GET", "/api/v3/simple/price")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;
        coinbase
            .mock("GET", "/v2/exchange-rates")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data":{"rates":{"USD":"0"}}}"#)
            .create_async()
            .await;

        let rates = RateService::new(gecko.url(), coinbase.url(), 1600.0, 100.0);

        let eth = rates.usd_rate(Currency::Eth).await;
        assert_eq!(eth.usd, 1600.0);
        assert_eq!(eth.source, RateSource::Default);

        let sol = rates.usd_rate(Currency::Sol).await;
        assert_eq!(sol.usd, 100.0);
    }

    #[tokio::test]
    async fn live_quotes_are_cached() {
        let mut gecko = Server::new_async().await;
        let coinbase = Server::new_async().await;
        let mock = gecko
            .mock("GET", "/api/v3/simple/price")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"solana":{"usd":150.0}}"#)
            .expect(1)
            .create_async()
            .await;

        let rates = RateService::new(gecko.url(), coinbase.url(), 1600.0, 100.0);
        assert_eq!(rates.usd_rate(Currency::Sol).await.usd, 150.0);
        assert_eq!(rates.usd_rate(Currency::Sol).await.usd, 150.0);

        mock.assert_async().await;
    }
}

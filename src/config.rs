use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Environment {
    Development,
    Testnet,
    Production,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub host: String,
    pub port: u16,

    // Persistence (memory store when unset or unreachable)
    pub redis_url: Option<String>,

    // ETH balance sources
    pub etherscan_api_url: String,
    pub etherscan_api_key: Option<String>,
    pub eth_rpc_urls: Vec<String>,

    // SOL balance sources
    pub sol_rpc_urls: Vec<String>,

    // Exchange rates
    pub coingecko_api_url: String,
    pub coinbase_api_url: String,
    pub default_eth_usd_rate: f64,
    pub default_sol_usd_rate: f64,

    // Payment lifecycle
    pub payment_ttl: Duration,
    pub poll_interval: Duration,
    pub trust_single_source: bool,

    pub admin_api_keys: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let environment = Self::parse_environment()?;

        let config = Self {
            environment: environment.clone(),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_var("PORT", 8080)?,

            redis_url: std::env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),

            etherscan_api_url: std::env::var("ETHERSCAN_API_URL")
                .unwrap_or_else(|_| "https://api.etherscan.io/api".to_string()),
            etherscan_api_key: std::env::var("ETHERSCAN_API_KEY").ok(),
            eth_rpc_urls: Self::parse_list("ETH_RPC_URLS", &["https://rpc.ankr.com/eth"]),

            sol_rpc_urls: Self::parse_list(
                "SOL_RPC_URLS",
                &["https://api.mainnet-beta.solana.com"],
            ),

            coingecko_api_url: std::env::var("COINGECKO_API_URL")
                .unwrap_or_else(|_| "https://api.coingecko.com".to_string()),
            coinbase_api_url: std::env::var("COINBASE_API_URL")
                .unwrap_or_else(|_| "https://api.coinbase.com".to_string()),
            default_eth_usd_rate: Self::parse_var("DEFAULT_ETH_USD_RATE", 1600.0)?,
            default_sol_usd_rate: Self::parse_var("DEFAULT_SOL_USD_RATE", 100.0)?,

            payment_ttl: Duration::from_secs(Self::parse_var("PAYMENT_TTL_SECS", 3600)?),
            poll_interval: Duration::from_secs(Self::parse_var("POLL_INTERVAL_SECS", 120)?),
            trust_single_source: Self::parse_var("ORACLE_TRUST_SINGLE_SOURCE", true)?,

            admin_api_keys: Self::parse_list("ADMIN_API_KEYS", &[]),
        };

        config.validate()?;
        Ok(config)
    }

    fn parse_environment() -> Result<Environment> {
        let env = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        match env.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testnet" | "test" => Ok(Environment::Testnet),
            "production" | "prod" => Ok(Environment::Production),
            _ => bail!("Unknown environment: {}", env),
        }
    }

    fn parse_var<T>(var: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match std::env::var(var) {
            Ok(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}", var)),
            Err(_) => Ok(default),
        }
    }

    fn parse_list(var: &str, default: &[&str]) -> Vec<String> {
        match std::env::var(var) {
            Ok(raw) => split_list(&raw),
            Err(_) => default.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn validate(&self) -> Result<()> {
        for url in self
            .eth_rpc_urls
            .iter()
            .chain(self.sol_rpc_urls.iter())
            .chain([&self.etherscan_api_url, &self.coingecko_api_url, &self.coinbase_api_url])
        {
            if !url.starts_with("http") {
                bail!("{} must be an HTTP(S) URL", url);
            }
        }

        if !usable_rate(self.default_eth_usd_rate) || !usable_rate(self.default_sol_usd_rate) {
            bail!("Default exchange rates must be positive finite numbers");
        }
        if self.poll_interval.is_zero() {
            bail!("POLL_INTERVAL_SECS must be greater than zero");
        }
        if self.payment_ttl.is_zero() {
            bail!("PAYMENT_TTL_SECS must be greater than zero");
        }

        if self.trust_single_source {
            tracing::warn!(
                "ORACLE_TRUST_SINGLE_SOURCE is enabled: a lone responding balance source can confirm a deposit"
            );
        }
        if self.admin_api_keys.is_empty() {
            tracing::warn!("ADMIN_API_KEYS is empty, admin endpoints will reject every request");
        }

        tracing::info!(
            "Configuration validated for {:?} environment",
            self.environment
        );

        Ok(())
    }
}

fn usable_rate(rate: f64) -> bool {
    rate.is_finite() && rate > 0.0
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

use async_trait::async_trait;
use ethers::{
    providers::{Http, Middleware, Provider},
    types::{Address, U256},
    utils::format_ether,
};
use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::DepositError;
use crate::models::{BalanceReport, Currency};

/// Two sources agree when their balances differ by at most this much.
pub const AGREEMENT_EPSILON: f64 = 1e-5;

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// One independent balance-reporting service for a single currency.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    fn name(&self) -> &str;

    fn currency(&self) -> Currency;

    /// Balance of `address` in native units.
    async fn balance(&self, address: &str) -> Result<f64, DepositError>;
}

/// Queries every configured source for a currency and reconciles the answers.
pub struct BalanceOracle {
    sources: Vec<Arc<dyn BalanceSource>>,
    trust_single_source: bool,
}

impl BalanceOracle {
    pub fn new(sources: Vec<Arc<dyn BalanceSource>>, trust_single_source: bool) -> Self {
        Self {
            sources,
            trust_single_source,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, DepositError> {
        let client = http_client();
        let mut sources: Vec<Arc<dyn BalanceSource>> = Vec::new();

        sources.push(Arc::new(EtherscanSource::new(
            client.clone(),
            &config.etherscan_api_url,
            config.etherscan_api_key.clone(),
        )));
        for url in &config.eth_rpc_urls {
            sources.push(Arc::new(EthRpcSource::new(url)?));
        }
        for url in &config.sol_rpc_urls {
            sources.push(Arc::new(SolanaRpcSource::new(client.clone(), url)));
        }

        let oracle = Self::new(sources, config.trust_single_source);
        tracing::info!(
            "Balance oracle initialized: {} ETH sources, {} SOL sources",
            oracle.source_count(Currency::Eth),
            oracle.source_count(Currency::Sol)
        );
        Ok(oracle)
    }

    pub fn source_count(&self, currency: Currency) -> usize {
        self.sources
            .iter()
            .filter(|s| s.currency() == currency)
            .count()
    }

    /// Never fails; sources that error are left out of the report.
    pub async fn check(&self, address: &str, currency: Currency) -> BalanceReport {
        let queries = self
            .sources
            .iter()
            .filter(|s| s.currency() == currency)
            .map(|source| async move { (source.name().to_string(), source.balance(address).await) });

        let mut per_source = BTreeMap::new();
        for (name, result) in join_all(queries).await {
            match result {
                Ok(balance) => {
                    let key = distinct_key(&per_source, name);
                    tracing::debug!("{} balance for {}: {} {}", key, address, balance, currency);
                    per_source.insert(key, balance);
                }
                Err(e) => tracing::warn!("Balance check via {} failed for {}: {}", name, address, e),
            }
        }

        if per_source.len() == 1 && self.trust_single_source {
            tracing::warn!(
                "Only one source responded for {}, accepting single-source verification",
                address
            );
        }

        let report = reconcile(per_source, self.trust_single_source);
        tracing::info!(
            "Total {} balance for {}: {} (verified: {}, sources: {})",
            currency,
            address,
            report.total,
            report.verified,
            report.responders()
        );
        report
    }
}

/// Highest reported balance wins; verification needs two responders within
/// [`AGREEMENT_EPSILON`], or a lone responder when `trust_single_source`.
pub fn reconcile(per_source: BTreeMap<String, f64>, trust_single_source: bool) -> BalanceReport {
    let balances: Vec<f64> = per_source.values().copied().collect();

    let total = balances.iter().copied().fold(0.0_f64, f64::max);

    let verified = match balances.len() {
        0 => false,
        1 => trust_single_source,
        _ => balances.iter().enumerate().any(|(i, a)| {
            balances[i + 1..]
                .iter()
                .any(|b| (a - b).abs() <= AGREEMENT_EPSILON)
        }),
    };

    BalanceReport {
        total,
        verified,
        per_source,
    }
}

/// Sources on the same host share a display name; repeats get `#2`, `#3`, ...
/// so every answer is counted as its own responder.
fn distinct_key(per_source: &BTreeMap<String, f64>, name: String) -> String {
    let mut key = name.clone();
    let mut n = 2;
    while per_source.contains_key(&key) {
        key = format!("{}#{}", name, n);
        n += 1;
    }
    key
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .unwrap_or_default()
}

fn source_name(prefix: &str, url: &str) -> String {
    match reqwest::Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)) {
        Some(host) => format!("{}:{}", prefix, host),
        None => prefix.to_string(),
    }
}

fn wei_to_eth(wei: U256) -> Result<f64, DepositError> {
    format_ether(wei)
        .parse()
        .map_err(|e| DepositError::InternalError(format!("unparseable ether amount: {}", e)))
}

/// Etherscan-compatible `module=account&action=balance` endpoint.
pub struct EtherscanSource {
    name: String,
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl EtherscanSource {
    pub fn new(client: reqwest::Client, api_url: &str, api_key: Option<String>) -> Self {
        Self {
            name: source_name("etherscan", api_url),
            client,
            api_url: api_url.to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl BalanceSource for EtherscanSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn currency(&self) -> Currency {
        Currency::Eth
    }

    async fn balance(&self, address: &str) -> Result<f64, DepositError> {
        let mut query = vec![
            ("module", "account"),
            ("action", "balance"),
            ("address", address),
            ("tag", "latest"),
        ];
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.as_str()));
        }

        let body: Value = self
            .client
            .get(&self.api_url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if body["status"].as_str() != Some("1") {
            let message = body["message"].as_str().unwrap_or("unknown error");
            return Err(DepositError::source_failure(&self.name, message));
        }

        let wei = body["result"]
            .as_str()
            .and_then(|raw| U256::from_dec_str(raw).ok())
            .ok_or_else(|| DepositError::source_failure(&self.name, "malformed result"))?;
        wei_to_eth(wei)
    }
}

/// Ethereum JSON-RPC node queried with `eth_getBalance`.
pub struct EthRpcSource {
    name: String,
    provider: Provider<Http>,
}

impl EthRpcSource {
    pub fn new(rpc_url: &str) -> Result<Self, DepositError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| DepositError::ConfigError(format!("Invalid RPC URL {}: {}", rpc_url, e)))?;

        Ok(Self {
            name: source_name("eth-rpc", rpc_url),
            provider,
        })
    }
}

#[async_trait]
impl BalanceSource for EthRpcSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn currency(&self) -> Currency {
        Currency::Eth
    }

    async fn balance(&self, address: &str) -> Result<f64, DepositError> {
        let address: Address = address
            .parse()
            .map_err(|_| DepositError::InvalidRequest(format!("Invalid ETH address: {}", address)))?;
        let wei = self.provider.get_balance(address, None).await?;
        wei_to_eth(wei)
    }
}

/// Solana JSON-RPC node queried with `getBalance`.
pub struct SolanaRpcSource {
    name: String,
    client: reqwest::Client,
    rpc_url: String,
}

impl SolanaRpcSource {
    pub fn new(client: reqwest::Client, rpc_url: &str) -> Self {
        Self {
            name: source_name("sol-rpc", rpc_url),
            client,
            rpc_url: rpc_url.to_string(),
        }
    }
}

#[async_trait]
impl BalanceSource for SolanaRpcSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn currency(&self) -> Currency {
        Currency::Sol
    }

    async fn balance(&self, address: &str) -> Result<f64, DepositError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBalance",
            "params": [address],
        });

        let body: Value = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = body.get("error") {
            return Err(DepositError::source_failure(&self.name, error));
        }

        let lamports = body["result"]["value"]
            .as_u64()
            .ok_or_else(|| DepositError::source_failure(&self.name, "malformed result"))?;
        Ok(lamports as f64 / LAMPORTS_PER_SOL)
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::DepositError;

/// Maximum number of balance observations kept per payment.
pub const HISTORY_LIMIT: usize = 10;

/// A payment counts as received at 99.5% of the required amount.
pub const PAYMENT_TOLERANCE: f64 = 0.995;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Eth,
    Sol,
}

impl Currency {
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Eth => "ETH",
            Currency::Sol => "SOL",
        }
    }

    /// CoinGecko asset id
    pub fn coingecko_id(&self) -> &'static str {
        match self {
            Currency::Eth => "ethereum",
            Currency::Sol => "solana",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Currency {
    type Err = DepositError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "eth" => Ok(Currency::Eth),
            "sol" => Ok(Currency::Sol),
            _ => Err(DepositError::UnsupportedCurrency(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Expired,
    Cancelled,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl FromStr for PaymentStatus {
    type Err = DepositError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "expired" => Ok(PaymentStatus::Expired),
            "cancelled" | "canceled" => Ok(PaymentStatus::Cancelled),
            _ => Err(DepositError::InvalidRequest(format!("Unknown payment status: {}", s))),
        }
    }
}

/// Reconciled balance of one address across all responding sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceReport {
    pub total: f64,
    pub verified: bool,
    pub per_source: BTreeMap<String, f64>,
}

impl BalanceReport {
    pub fn responders(&self) -> usize {
        self.per_source.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceObservation {
    pub timestamp: DateTime<Utc>,
    pub balance: f64,
    pub verified: bool,
    pub sources: BTreeMap<String, f64>,
}

impl BalanceObservation {
    pub fn from_report(report: &BalanceReport, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            balance: report.total,
            verified: report.verified,
            sources: report.per_source.clone(),
        }
    }
}

/// A single deposit attempt, tracked from creation to a terminal status.
///
/// The record carries no private key material; see [`WalletSecret`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub id: String,
    pub owner: String,
    pub address: String,
    pub currency: Currency,
    pub requested_usd: f64,
    /// Native units owed, fixed when the request is created
    pub required_amount: f64,
    pub rate: f64,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    pub balance_history: Vec<BalanceObservation>,
    #[serde(default)]
    pub current_balance: f64,
}

impl PaymentRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        owner: String,
        address: String,
        currency: Currency,
        requested_usd: f64,
        rate: f64,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id,
            owner,
            address,
            currency,
            requested_usd,
            required_amount: required_amount(requested_usd, rate),
            rate,
            status: PaymentStatus::Pending,
            created_at,
            expires_at: created_at + ttl,
            updated_at: None,
            last_checked: None,
            balance_history: Vec::new(),
            current_balance: 0.0,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Lowest observed balance accepted as full payment.
    pub fn required_threshold(&self) -> f64 {
        self.required_amount * PAYMENT_TOLERANCE
    }

    /// Moves a pending request into `to`. Terminal requests never move again.
    pub fn transition(&mut self, to: PaymentStatus, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() || !to.is_terminal() {
            return false;
        }
        self.status = to;
        self.updated_at = Some(now);
        true
    }

    pub fn record_observation(&mut self, observation: BalanceObservation) {
        self.current_balance = observation.balance;
        self.last_checked = Some(observation.timestamp);
        self.balance_history.push(observation);
        if self.balance_history.len() > HISTORY_LIMIT {
            let excess = self.balance_history.len() - HISTORY_LIMIT;
            self.balance_history.drain(..excess);
        }
    }

    pub fn receipt(&self) -> PaymentReceipt {
        PaymentReceipt {
            payment_id: self.id.clone(),
            address: self.address.clone(),
            currency: self.currency,
            amount_crypto: self.required_amount,
            amount_usd: self.requested_usd,
            rate: self.rate,
            expires_at: self.expires_at,
        }
    }
}

/// `requested_usd / rate`, rounded to 8 decimal places.
pub fn required_amount(requested_usd: f64, rate: f64) -> f64 {
    ((requested_usd / rate) * 1e8).round() / 1e8
}

/// Public half of a freshly created payment, safe to hand to the payer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub payment_id: String,
    pub address: String,
    pub currency: Currency,
    pub amount_crypto: f64,
    pub amount_usd: f64,
    pub rate: f64,
    pub expires_at: DateTime<Utc>,
}

/// Private key material of a receiving wallet.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSecret {
    pub currency: Currency,
    pub private_key: String,
}

impl fmt::Debug for WalletSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletSecret")
            .field("currency", &self.currency)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

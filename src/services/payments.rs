use chrono::{Duration, Utc};
use rand::RngCore;
use std::sync::Arc;

use crate::error::DepositError;
use crate::models::{Currency, PaymentReceipt, PaymentRequest, PaymentStatus};
use crate::services::{generate_wallet, PaymentMonitor, PaymentStore, RateService};

/// Creates deposit requests and hands them to the monitor.
pub struct PaymentService {
    store: Arc<dyn PaymentStore>,
    rates: Arc<RateService>,
    monitor: Arc<PaymentMonitor>,
    ttl: Duration,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        rates: Arc<RateService>,
        monitor: Arc<PaymentMonitor>,
        ttl: std::time::Duration,
    ) -> Self {
        Self {
            store,
            rates,
            monitor,
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(1)),
        }
    }

    pub fn monitor(&self) -> &Arc<PaymentMonitor> {
        &self.monitor
    }

    pub fn store(&self) -> &Arc<dyn PaymentStore> {
        &self.store
    }

    pub async fn create_payment(
        &self,
        owner: &str,
        requested_usd: f64,
        currency: Currency,
    ) -> Result<PaymentReceipt, DepositError> {
        if !requested_usd.is_finite() || requested_usd <= 0.0 {
            return Err(DepositError::InvalidAmount(format!(
                "{} (must be greater than zero)",
                requested_usd
            )));
        }
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(DepositError::InvalidRequest("owner must not be empty".to_string()));
        }

        let wallet = generate_wallet(currency);
        let quote = self.rates.usd_rate(currency).await;

        let payment = PaymentRequest::new(
            new_payment_id(),
            owner.to_string(),
            wallet.address,
            currency,
            requested_usd,
            quote.usd,
            Utc::now(),
            self.ttl,
        );

        self.store.insert(&payment, &wallet.secret).await?;
        self.monitor.watch(&payment.id);

        tracing::info!(
            "Created {} payment request {} for user {}: ${} ({} {}, rate source: {:?})",
            currency,
            payment.id,
            payment.owner,
            requested_usd,
            payment.required_amount,
            currency,
            quote.source
        );

        Ok(payment.receipt())
    }

    pub async fn cancel(&self, payment_id: &str) -> Result<bool, DepositError> {
        self.monitor.cancel(payment_id).await
    }

    pub async fn details(&self, payment_id: &str) -> Result<PaymentRequest, DepositError> {
        self.store
            .get(payment_id)
            .await?
            .ok_or_else(|| DepositError::PaymentNotFound(payment_id.to_string()))
    }

    pub async fn list(&self, status: Option<PaymentStatus>) -> Result<Vec<PaymentRequest>, DepositError> {
        self.store.list(status).await
    }

    /// Re-attaches the monitor to every pending record, e.g. after a restart.
    pub async fn resume_pending(&self) -> Result<usize, DepositError> {
        let pending = self.store.list(Some(PaymentStatus::Pending)).await?;
        let resumed = pending
            .iter()
            .filter(|payment| self.monitor.watch(&payment.id))
            .count();

        if resumed > 0 {
            tracing::info!("Resumed monitoring for {} pending payments", resumed);
        }
        Ok(resumed)
    }
}

/// 16 random bytes, hex encoded.
fn new_payment_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{BalanceOracle, Ledger, MemoryStore};
    use mockito::{Matcher, Server};

    async fn service(gecko: &Server, coinbase: &Server) -> (PaymentService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let oracle = Arc::new(BalanceOracle::new(Vec::new(), true));
        let monitor = Arc::new(PaymentMonitor::new(
            store.clone(),
            oracle,
            Arc::new(Ledger::new(None)),
            std::time::Duration::from_secs(120),
        ));
        let rates = Arc::new(RateService::new(gecko.url(), coinbase.url(), 1600.0, 100.0));
        let service = PaymentService::new(
            store.clone(),
            rates,
            monitor,
            std::time::Duration::from_secs(3600),
        );
        (service, store)
    }

    #[tokio::test]
    async fn creates_pending_payment_priced_at_current_rate() {
        let mut gecko = Server::new_async().await;
        let coinbase = Server::new_async().await;
        gecko
            .mock("GET", "/api/v3/simple/price")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"ethereum":{"usd":1600}}"#)
            .create_async()
            .await;
        let (service, store) = service(&gecko, &coinbase).await;

        let receipt = service.create_payment("user-1", 40.0, Currency::Eth).await.unwrap();

        assert_eq!(receipt.amount_crypto, 0.025);
        assert_eq!(receipt.rate, 1600.0);
        assert_eq!(receipt.payment_id.len(), 32);
        assert!(receipt.address.starts_with("0x"));

        let stored = store.get(&receipt.payment_id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
        assert_eq!(stored.expires_at - stored.created_at, Duration::hours(1));
        assert!(store.secret(&receipt.payment_id).await.unwrap().is_some());
        assert!(service.monitor().is_watching(&receipt.payment_id));
    }

    #[tokio::test]
    async fn unreachable_rate_sources_use_default_rate() {
        let mut gecko = Server::new_async().await;
        let mut coinbase = Server::new_async().await;
        gecko.mock("GET", Matcher::Any).with_status(503).create_async().await;
        coinbase.mock("GET", Matcher::Any).with_status(503).create_async().await;
        let (service, _) = service(&gecko, &coinbase).await;

        let receipt = service.create_payment("user-1", 50.0, Currency::Sol).await.unwrap();
        assert_eq!(receipt.rate, 100.0);
        assert_eq!(receipt.amount_crypto, 0.5);
    }

    #[tokio::test]
    async fn rejects_non_positive_amounts_and_blank_owner() {
        let gecko = Server::new_async().await;
        let coinbase = Server::new_async().await;
        let (service, store) = service(&gecko, &coinbase).await;

        for amount in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let err = service.create_payment("user-1", amount, Currency::Eth).await.unwrap_err();
            assert!(matches!(err, DepositError::InvalidAmount(_)));
        }
        let err = service.create_payment("  ", 10.0, Currency::Eth).await.unwrap_err();
        assert!(matches!(err, DepositError::InvalidRequest(_)));
        assert!(store.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn details_and_cancel_round_trip() {
        let mut gecko = Server::new_async().await;
        let coinbase = Server::new_async().await;
        gecko
            .mock("GET", "/api/v3/simple/price")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"solana":{"usd":125}}"#)
            .create_async()
            .await;
        let (service, store) = service(&gecko, &coinbase).await;

        let receipt = service.create_payment("user-9", 25.0, Currency::Sol).await.unwrap();
        assert_eq!(receipt.amount_crypto, 0.2);

        assert!(service.cancel(&receipt.payment_id).await.unwrap());
        assert!(!service.cancel(&receipt.payment_id).await.unwrap());

        let details = service.details(&receipt.payment_id).await.unwrap();
        assert_eq!(details.status, PaymentStatus::Cancelled);
        assert!(store.secret(&receipt.payment_id).await.unwrap().is_none());

        assert!(matches!(
            service.details("nope").await,
            Err(DepositError::PaymentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn resume_pending_watches_stored_requests() {
        let gecko = Server::new_async().await;
        let coinbase = Server::new_async().await;
        let (service, store) = service(&gecko, &coinbase).await;

        let wallet = generate_wallet(Currency::Sol);
        let payment = PaymentRequest::new(
            "restored".to_string(),
            "user-3".to_string(),
            wallet.address,
            Currency::Sol,
            10.0,
            100.0,
            Utc::now(),
            Duration::hours(1),
        );
        store.insert(&payment, &wallet.secret).await.unwrap();

        assert_eq!(service.resume_pending().await.unwrap(), 1);
        assert!(service.monitor().is_watching("restored"));
        assert_eq!(service.resume_pending().await.unwrap(), 0);
    }
}

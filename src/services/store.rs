use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::DepositError;
use crate::models::{PaymentRequest, PaymentStatus, WalletSecret};

/// Durable payment records, keyed by payment id.
///
/// Wallet secrets live beside the records but are only reachable through
/// [`PaymentStore::secret`]; record reads never include them.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(
        &self,
        payment: &PaymentRequest,
        secret: &WalletSecret,
    ) -> Result<(), DepositError>;

    async fn get(&self, id: &str) -> Result<Option<PaymentRequest>, DepositError>;

    /// Overwrites an existing record. Unknown ids are an error.
    async fn update(&self, payment: &PaymentRequest) -> Result<(), DepositError>;

    async fn secret(&self, id: &str) -> Result<Option<WalletSecret>, DepositError>;

    /// Returns whether a secret was present.
    async fn delete_secret(&self, id: &str) -> Result<bool, DepositError>;

    async fn list(&self, status: Option<PaymentStatus>) -> Result<Vec<PaymentRequest>, DepositError>;

    async fn ping(&self) -> bool {
        true
    }

    fn backend(&self) -> &'static str;
}

#[derive(Default)]
pub struct MemoryStore {
    payments: RwLock<HashMap<String, PaymentRequest>>,
    secrets: RwLock<HashMap<String, WalletSecret>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert(
        &self,
        payment: &PaymentRequest,
        secret: &WalletSecret,
    ) -> Result<(), DepositError> {
        let mut payments = self.payments.write().await;
        if payments.contains_key(&payment.id) {
            return Err(DepositError::StoreError(format!(
                "Duplicate payment id {}",
                payment.id
            )));
        }
        payments.insert(payment.id.clone(), payment.clone());
        self.secrets
            .write()
            .await
            .insert(payment.id.clone(), secret.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<PaymentRequest>, DepositError> {
        Ok(self.payments.read().await.get(id).cloned())
    }

    async fn update(&self, payment: &PaymentRequest) -> Result<(), DepositError> {
        match self.payments.write().await.get_mut(&payment.id) {
            Some(existing) => {
                *existing = payment.clone();
                Ok(())
            }
            None => Err(DepositError::PaymentNotFound(payment.id.clone())),
        }
    }

    async fn secret(&self, id: &str) -> Result<Option<WalletSecret>, DepositError> {
        Ok(self.secrets.read().await.get(id).cloned())
    }

    async fn delete_secret(&self, id: &str) -> Result<bool, DepositError> {
        Ok(self.secrets.write().await.remove(id).is_some())
    }

    async fn list(&self, status: Option<PaymentStatus>) -> Result<Vec<PaymentRequest>, DepositError> {
        let mut payments: Vec<PaymentRequest> = self
            .payments
            .read()
            .await
            .values()
            .filter(|p| status.map_or(true, |s| p.status == s))
            .cloned()
            .collect();
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(payments)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

const PAYMENT_INDEX_KEY: &str = "payments";

fn payment_key(id: &str) -> String {
    format!("payment:{}", id)
}

fn wallet_key(id: &str) -> String {
    format!("wallet:{}", id)
}

/// Record, secret and index entry are written in one MULTI/EXEC.
fn insert_transaction(id: &str, record: &str, secret: &str) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic()
        .set_nx(payment_key(id), record)
        .set_nx(wallet_key(id), secret)
        .sadd(PAYMENT_INDEX_KEY, id)
        .ignore();
    pipe
}

/// Redis layout: `payment:{id}` JSON record, `wallet:{id}` JSON secret,
/// `payments` set of every id.
pub struct RedisStore {
    redis: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub fn new(redis: redis::aio::ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl PaymentStore for RedisStore {
    async fn insert(
        &self,
        payment: &PaymentRequest,
        secret: &WalletSecret,
    ) -> Result<(), DepositError> {
        let record = serde_json::to_string(payment)?;
        let secret = serde_json::to_string(secret)?;
        let mut redis = self.redis.clone();

        let (created, secret_written): (bool, bool) = insert_transaction(&payment.id, &record, &secret)
            .query_async(&mut redis)
            .await?;
        if !created {
            // Only reachable when an earlier record under this id lost its secret.
            if secret_written {
                redis.del::<_, ()>(wallet_key(&payment.id)).await?;
            }
            return Err(DepositError::StoreError(format!(
                "Duplicate payment id {}",
                payment.id
            )));
        }

        tracing::debug!("Stored payment {} in Redis", payment.id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<PaymentRequest>, DepositError> {
        let mut redis = self.redis.clone();
        let raw: Option<String> = redis.get(payment_key(id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, payment: &PaymentRequest) -> Result<(), DepositError> {
        let record = serde_json::to_string(payment)?;
        let mut redis = self.redis.clone();

        let updated: bool = redis::cmd("SET")
            .arg(payment_key(&payment.id))
            .arg(record)
            .arg("XX")
            .query_async::<_, Option<String>>(&mut redis)
            .await?
            .is_some();

        if updated {
            Ok(())
        } else {
            Err(DepositError::PaymentNotFound(payment.id.clone()))
        }
    }

    async fn secret(&self, id: &str) -> Result<Option<WalletSecret>, DepositError> {
        let mut redis = self.redis.clone();
        let raw: Option<String> = redis.get(wallet_key(id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn delete_secret(&self, id: &str) -> Result<bool, DepositError> {
        let mut redis = self.redis.clone();
        let removed: u64 = redis.del(wallet_key(id)).await?;
        Ok(removed > 0)
    }

    async fn list(&self, status: Option<PaymentStatus>) -> Result<Vec<PaymentRequest>, DepositError> {
        let mut redis = self.redis.clone();
        let ids: Vec<String> = redis.smembers(PAYMENT_INDEX_KEY).await?;

        let mut payments = Vec::with_capacity(ids.len());
        for id in ids {
            let raw: Option<String> = redis.get(payment_key(&id)).await?;
            let Some(raw) = raw else {
                tracing::warn!("Payment {} indexed but missing from Redis", id);
                continue;
            };
            match serde_json::from_str::<PaymentRequest>(&raw) {
                Ok(payment) if status.map_or(true, |s| payment.status == s) => {
                    payments.push(payment)
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping corrupt payment record {}: {}", id, e),
            }
        }
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(payments)
    }

    async fn ping(&self) -> bool {
        let mut redis = self.redis.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut redis)
            .await
            .is_ok()
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

/// Opens a Redis connection manager, or `None` when Redis is unreachable.
pub async fn connect_redis(redis_url: &str) -> Option<redis::aio::ConnectionManager> {
    match redis::Client::open(redis_url) {
        Ok(client) => match client.get_connection_manager().await {
            Ok(conn) => {
                tracing::info!("Redis connected successfully");
                Some(conn)
            }
            Err(e) => {
                tracing::warn!("Redis connection failed: {}, using memory store only", e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Redis client creation failed: {}, using memory store only", e);
            None
        }
    }
}

pub fn open_store(redis: Option<redis::aio::ConnectionManager>) -> Arc<dyn PaymentStore> {
    match redis {
        Some(conn) => Arc::new(RedisStore::new(conn)),
        None => {
            tracing::warn!("Payment records are kept in memory and will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Currency;
    use chrono::{Duration, Utc};

    fn payment(id: &str, minutes_ago: i64) -> PaymentRequest {
        PaymentRequest::new(
            id.to_string(),
            "owner".to_string(),
            "addr".to_string(),
            Currency::Sol,
            10.0,
            100.0,
            Utc::now() - Duration::minutes(minutes_ago),
            Duration::hours(1),
        )
    }

    fn secret() -> WalletSecret {
        WalletSecret {
            currency: Currency::Sol,
            private_key: "c2VjcmV0".to_string(),
        }
    }

    #[tokio::test]
    async fn memory_store_keeps_secret_apart_from_record() {
        let store = MemoryStore::new();
        store.insert(&payment("a", 0), &secret()).await.unwrap();

        let record = store.get("a").await.unwrap().unwrap();
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("c2VjcmV0"));

        assert_eq!(store.secret("a").await.unwrap(), Some(secret()));
        assert!(store.delete_secret("a").await.unwrap());
        assert!(!store.delete_secret("a").await.unwrap());
        assert!(store.get("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn memory_store_rejects_duplicates_and_unknown_updates() {
        let store = MemoryStore::new();
        store.insert(&payment("a", 0), &secret()).await.unwrap();
        assert!(store.insert(&payment("a", 0), &secret()).await.is_err());

        let err = store.update(&payment("missing", 0)).await.unwrap_err();
        assert!(matches!(err, DepositError::PaymentNotFound(_)));
    }

    #[tokio::test]
    async fn memory_store_lists_by_status_oldest_first() {
        let store = MemoryStore::new();
        store.insert(&payment("new", 1), &secret()).await.unwrap();
        store.insert(&payment("old", 30), &secret()).await.unwrap();

        let mut done = payment("done", 10);
        done.transition(PaymentStatus::Completed, Utc::now());
        store.insert(&done, &secret()).await.unwrap();

        let pending: Vec<String> = store
            .list(Some(PaymentStatus::Pending))
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(pending, vec!["old".to_string(), "new".to_string()]);
        assert_eq!(store.list(None).await.unwrap().len(), 3);
    }

    #[test]
    fn redis_insert_is_a_single_transaction() {
        let packed = insert_transaction("abc", "{}", "{}").get_packed_pipeline();
        let packed = String::from_utf8_lossy(&packed);

        let order: Vec<usize> = ["MULTI", "payment:abc", "wallet:abc", "SADD", "EXEC"]
            .iter()
            .map(|needle| packed.find(needle).unwrap())
            .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]), "{}", packed);
        assert_eq!(packed.matches("SETNX").count(), 2);
    }

    #[tokio::test]
    #[ignore = "needs a Redis server at REDIS_URL"]
    async fn redis_store_inserts_record_secret_and_index_together() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let client = redis::Client::open(url).unwrap();
        let redis = redis::aio::ConnectionManager::new(client).await.unwrap();
        let store = RedisStore::new(redis);

        let id = format!("test-{}", uuid::Uuid::new_v4());
        store.insert(&payment(&id, 0), &secret()).await.unwrap();
        assert!(store.insert(&payment(&id, 0), &secret()).await.is_err());

        assert!(store.secret(&id).await.unwrap().is_some());
        let listed = store.list(None).await.unwrap();
        assert!(listed.iter().any(|p| p.id == id));
    }
}

use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::services::CompletionHandler;

fn balance_key(owner: &str) -> String {
    format!("balance:{}", owner)
}

fn to_cents(usd: f64) -> i64 {
    (usd * 100.0).round() as i64
}

/// Owner balances in USD, kept as integer cents.
///
/// Uses Redis when available and an in-process map otherwise.
pub struct Ledger {
    redis: Option<redis::aio::ConnectionManager>,
    memory: RwLock<HashMap<String, i64>>,
}

impl Ledger {
    pub fn new(redis: Option<redis::aio::ConnectionManager>) -> Self {
        Self {
            redis,
            memory: RwLock::new(HashMap::new()),
        }
    }

    /// Adds `usd` to the owner's balance and returns the new balance.
    pub async fn credit(&self, owner: &str, usd: f64) -> anyhow::Result<f64> {
        let cents = to_cents(usd);

        let balance = if let Some(mut redis) = self.redis.clone() {
            redis.incr::<_, _, i64>(balance_key(owner), cents).await?
        } else {
            let mut memory = self.memory.write().await;
            let entry = memory.entry(owner.to_string()).or_insert(0);
            *entry += cents;
            *entry
        };

        Ok(balance as f64 / 100.0)
    }

    pub async fn balance(&self, owner: &str) -> anyhow::Result<f64> {
        let cents = if let Some(mut redis) = self.redis.clone() {
            redis
                .get::<_, Option<i64>>(balance_key(owner))
                .await?
                .unwrap_or(0)
        } else {
            self.memory.read().await.get(owner).copied().unwrap_or(0)
        };

        Ok(cents as f64 / 100.0)
    }
}

#[async_trait]
impl CompletionHandler for Ledger {
    async fn payment_completed(
        &self,
        payment_id: &str,
        owner: &str,
        requested_usd: f64,
    ) -> anyhow::Result<()> {
        let balance = self.credit(owner, requested_usd).await?;
        tracing::info!(
            "Credited ${:.2} to {} for payment {} (balance: ${:.2})",
            requested_usd,
            owner,
            payment_id,
            balance
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn credits_accumulate_per_owner() {
        let ledger = Ledger::new(None);

        assert_eq!(ledger.balance("alice").await.unwrap(), 0.0);
        assert_eq!(ledger.credit("alice", 40.0).await.unwrap(), 40.0);
        assert_eq!(ledger.credit("alice", 0.1).await.unwrap(), 40.1);
        assert_eq!(ledger.credit("bob", 5.0).await.unwrap(), 5.0);

        assert_eq!(ledger.balance("alice").await.unwrap(), 40.1);
        assert_eq!(ledger.balance("bob").await.unwrap(), 5.0);
    }

    #[tokio::test]
    async fn completion_credits_the_owner() {
        let ledger = Ledger::new(None);
        tokio_test::assert_ok!(ledger.payment_completed("p1", "carol", 12.5).await);
        assert_eq!(ledger.balance("carol").await.unwrap(), 12.5);
    }
}

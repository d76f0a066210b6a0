use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::DepositError;
use crate::models::{BalanceObservation, PaymentRequest, PaymentStatus};
use crate::services::{BalanceOracle, PaymentStore};

/// Invoked exactly once per completed payment.
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    async fn payment_completed(
        &self,
        payment_id: &str,
        owner: &str,
        requested_usd: f64,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Still waiting; poll again on the next tick.
    Pending,
    Completed,
    Expired,
    /// Record gone or already terminal.
    Stopped,
}

impl TickOutcome {
    pub fn keeps_polling(&self) -> bool {
        matches!(self, TickOutcome::Pending)
    }
}

/// Polls every pending payment on its own task until it completes,
/// expires or is cancelled.
///
/// Record mutations for one payment are serialised by a per-payment lock so
/// a cancellation racing an in-flight tick can never be overwritten by a
/// late `Completed`.
pub struct PaymentMonitor {
    store: Arc<dyn PaymentStore>,
    oracle: Arc<BalanceOracle>,
    on_complete: Arc<dyn CompletionHandler>,
    poll_interval: Duration,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PaymentMonitor {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        oracle: Arc<BalanceOracle>,
        on_complete: Arc<dyn CompletionHandler>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            oracle,
            on_complete,
            poll_interval,
            tasks: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Starts polling `payment_id`. Returns false if it is already watched.
    pub fn watch(self: &Arc<Self>, payment_id: &str) -> bool {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.contains_key(payment_id) {
            return false;
        }

        let monitor = Arc::clone(self);
        let id = payment_id.to_string();
        let period = self.poll_interval;

        // The spawned task only touches `tasks` after its first tick, by which
        // time the handle below has been inserted.
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if !monitor.tick(&id).await.keeps_polling() {
                    break;
                }
            }

            monitor.release(&id);
        });

        tasks.insert(payment_id.to_string(), handle);
        tracing::info!(
            "Started monitoring payment {} every {}s",
            payment_id,
            period.as_secs()
        );
        true
    }

    pub fn is_watching(&self, payment_id: &str) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(payment_id)
    }

    pub fn active_count(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub async fn tick(&self, payment_id: &str) -> TickOutcome {
        self.tick_at(payment_id, Utc::now()).await
    }

    /// One polling step evaluated at `now`.
    pub async fn tick_at(&self, payment_id: &str, now: DateTime<Utc>) -> TickOutcome {
        let payment = match self.load_pending(payment_id).await {
            Ok(Some(payment)) => payment,
            Ok(None) => return TickOutcome::Stopped,
            Err(DepositError::CorruptRecord(e)) => {
                tracing::error!("Payment {} record is corrupt, giving up: {}", payment_id, e);
                return TickOutcome::Stopped;
            }
            Err(e) => {
                tracing::warn!("Could not load payment {}: {}, retrying next tick", payment_id, e);
                return TickOutcome::Pending;
            }
        };

        if payment.is_expired_at(now) {
            return self.expire(payment_id, now).await;
        }

        let report = self.oracle.check(&payment.address, payment.currency).await;

        let lock = self.lock_for(payment_id);
        let guard = lock.lock().await;

        // Re-read under the lock: a cancellation may have landed during the
        // oracle query.
        let mut current = match self.load_pending(payment_id).await {
            Ok(Some(current)) => current,
            Ok(None) => return TickOutcome::Stopped,
            Err(e) => {
                tracing::warn!("Could not reload payment {}: {}", payment_id, e);
                return TickOutcome::Pending;
            }
        };

        if report.responders() == 0 {
            tracing::debug!("No balance observed for payment {} this tick", payment_id);
        } else {
            current.record_observation(BalanceObservation::from_report(&report, now));
        }

        let threshold = current.required_threshold();
        tracing::info!(
            "Payment {}: balance {} {} (required {}, threshold {}, verified: {})",
            payment_id,
            report.total,
            current.currency,
            current.required_amount,
            threshold,
            report.verified
        );

        let paid = report.verified && report.total >= threshold;
        if paid {
            current.transition(PaymentStatus::Completed, now);
        }

        if let Err(e) = self.store.update(&current).await {
            tracing::warn!("Could not persist tick for payment {}: {}", payment_id, e);
            return TickOutcome::Pending;
        }
        drop(guard);

        if !paid {
            return TickOutcome::Pending;
        }

        tracing::info!(
            "Payment {} received! Verified balance: {} {}",
            payment_id,
            report.total,
            current.currency
        );
        if let Err(e) = self
            .on_complete
            .payment_completed(&current.id, &current.owner, current.requested_usd)
            .await
        {
            tracing::error!("Completion handler failed for payment {}: {:#}", payment_id, e);
        }
        TickOutcome::Completed
    }

    /// Stops polling and marks a pending payment cancelled, deleting its
    /// wallet secret. Returns false for unknown or already terminal payments.
    pub async fn cancel(&self, payment_id: &str) -> Result<bool, DepositError> {
        let lock = self.lock_for(payment_id);
        let _guard = lock.lock().await;

        let cancelled = self.cancel_locked(payment_id).await;
        if !matches!(cancelled, Ok(true)) {
            self.forget_idle_lock(payment_id);
        }
        cancelled
    }

    async fn cancel_locked(&self, payment_id: &str) -> Result<bool, DepositError> {
        let Some(mut payment) = self.store.get(payment_id).await? else {
            tracing::debug!("Cancel for unknown payment {}", payment_id);
            return Ok(false);
        };
        if !payment.transition(PaymentStatus::Cancelled, Utc::now()) {
            tracing::debug!(
                "Payment {} already {}, cancel is a no-op",
                payment_id,
                payment.status
            );
            return Ok(false);
        }

        self.store.update(&payment).await?;
        self.stop(payment_id);
        if self.store.delete_secret(payment_id).await? {
            tracing::info!("Deleted wallet secret for payment {}", payment_id);
        }

        tracing::info!("Payment {} cancelled and all resources cleaned up", payment_id);
        Ok(true)
    }

    /// Aborts every polling task. Records stay pending for a later resume.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }

    async fn expire(&self, payment_id: &str, now: DateTime<Utc>) -> TickOutcome {
        let lock = self.lock_for(payment_id);
        let _guard = lock.lock().await;

        let mut payment = match self.load_pending(payment_id).await {
            Ok(Some(payment)) => payment,
            Ok(None) => return TickOutcome::Stopped,
            Err(e) => {
                tracing::warn!("Could not reload payment {}: {}", payment_id, e);
                return TickOutcome::Pending;
            }
        };

        payment.transition(PaymentStatus::Expired, now);
        if let Err(e) = self.store.update(&payment).await {
            tracing::warn!("Could not persist expiry of payment {}: {}", payment_id, e);
            return TickOutcome::Pending;
        }

        tracing::info!("Payment {} expired", payment_id);
        TickOutcome::Expired
    }

    async fn load_pending(&self, payment_id: &str) -> Result<Option<PaymentRequest>, DepositError> {
        match self.store.get(payment_id).await? {
            Some(payment) if payment.status == PaymentStatus::Pending => Ok(Some(payment)),
            Some(payment) => {
                tracing::info!("Payment {} already {}", payment_id, payment.status);
                Ok(None)
            }
            None => {
                tracing::info!("Payment {} no longer exists", payment_id);
                Ok(None)
            }
        }
    }

    fn lock_for(&self, payment_id: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(payment_id.to_string())
            .or_default()
            .clone()
    }

    fn stop(&self, payment_id: &str) {
        let handle = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(payment_id);
        if let Some(handle) = handle {
            handle.abort();
            tracing::info!("Stopped monitoring payment {}", payment_id);
        }
        self.forget_lock(payment_id);
    }

    fn release(&self, payment_id: &str) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(payment_id);
        self.forget_lock(payment_id);
        tracing::debug!("Monitor for payment {} finished", payment_id);
    }

    fn forget_lock(&self, payment_id: &str) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(payment_id);
    }

    /// Drops the lock entry unless a polling task still owns the payment.
    fn forget_idle_lock(&self, payment_id: &str) {
        if !self.is_watching(payment_id) {
            self.forget_lock(payment_id);
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

use axum::{extract::State, Json};

use crate::{
    error::DepositError,
    handlers::AppState,
    models::{PaymentRequest, PaymentStatus, Stats},
};

pub async fn get_stats(State(state): State<AppState>) -> Result<Json<Stats>, DepositError> {
    let payments = state.payments.list(None).await?;

    let mut stats = summarize(&payments);
    stats.active_monitors = state.payments.monitor().active_count();
    stats.uptime_seconds = state.uptime_seconds();

    Ok(Json(stats))
}

pub fn summarize(payments: &[PaymentRequest]) -> Stats {
    let mut stats = Stats::default();
    for payment in payments {
        match payment.status {
            PaymentStatus::Pending => stats.pending += 1,
            PaymentStatus::Completed => {
                stats.completed += 1;
                stats.completed_usd += payment.requested_usd;
            }
            PaymentStatus::Expired => stats.expired += 1,
            PaymentStatus::Cancelled => stats.cancelled += 1,
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Currency;
    use chrono::{Duration, Utc};

    #[test]
    fn summarize_counts_each_status() {
        let now = Utc::now();
        let make = |id: &str, usd: f64, status: Option<PaymentStatus>| {
            let mut p = PaymentRequest::new(
                id.to_string(),
                "o".to_string(),
                "a".to_string(),
                Currency::Eth,
                usd,
                2000.0,
                now,
                Duration::hours(1),
            );
            if let Some(status) = status {
                p.transition(status, now);
            }
            p
        };

        let stats = summarize(&[
            make("1", 10.0, None),
            make("2", 20.0, Some(PaymentStatus::Completed)),
            make("3", 30.0, Some(PaymentStatus::Completed)),
            make("4", 40.0, Some(PaymentStatus::Expired)),
            make("5", 50.0, Some(PaymentStatus::Cancelled)),
        ]);

        assert_eq!(stats.pending, 1);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.completed_usd, 50.0);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.cancelled, 1);
    }
}

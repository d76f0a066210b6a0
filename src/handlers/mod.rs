pub mod admin;
pub mod health;
pub mod payments;
pub mod stats;

pub use admin::*;
pub use health::*;
pub use payments::*;
pub use stats::*;

use crate::middleware::admin_key_layer;
use crate::services::{BalanceOracle, Ledger, PaymentService};
use axum::{
    extract::Request,
    middleware::{self as axum_middleware, Next},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub payments: Arc<PaymentService>,
    pub ledger: Arc<Ledger>,
    pub oracle: Arc<BalanceOracle>,
    pub started_at: Instant,
}

impl AppState {
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub fn router(state: AppState, admin_keys: Vec<String>) -> Router {
    let admin_keys = Arc::new(admin_keys);

    // Admin endpoints (X-Admin-Key required)
    let admin = Router::new()
        .route("/payments", get(list_payments))
        .layer(axum_middleware::from_fn(move |req: Request, next: Next| {
            let keys = admin_keys.clone();
            async move { admin_key_layer(keys, req, next).await }
        }));

    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .route("/api/payments", post(create_payment))
        .route("/api/payments/:id", get(get_payment).delete(cancel_payment))
        .route("/api/balances/:owner", get(get_balance))
        .nest("/admin", admin)
        .with_state(state)
}

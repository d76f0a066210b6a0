use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            timestamp: Utc::now(),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub store: bool,
    pub eth_sources: usize,
    pub sol_sources: usize,
    pub active_monitors: usize,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct Stats {
    pub pending: u64,
    pub completed: u64,
    pub expired: u64,
    pub cancelled: u64,
    pub completed_usd: f64,
    pub active_monitors: usize,
    pub uptime_seconds: u64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CancelResult {
    pub payment_id: String,
    pub cancelled: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct OwnerBalance {
    pub owner: String,
    pub balance_usd: f64,
}

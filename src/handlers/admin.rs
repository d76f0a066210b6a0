use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::{
    error::DepositError,
    handlers::AppState,
    models::{ApiResponse, PaymentRequest, PaymentStatus},
};

#[derive(Debug, Deserialize)]
pub struct ListPaymentsQuery {
    pub status: Option<String>,
}

pub async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<ApiResponse<Vec<PaymentRequest>>>, DepositError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<PaymentStatus>)
        .transpose()?;

    let payments = state.payments.list(status).await?;
    Ok(Json(ApiResponse::ok(payments)))
}

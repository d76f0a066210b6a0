use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::{
    error::DepositError,
    handlers::AppState,
    models::{ApiResponse, CancelResult, Currency, OwnerBalance, PaymentReceipt, PaymentRequest},
};

#[derive(Debug, Deserialize)]
pub struct CreatePaymentBody {
    pub owner: String,
    pub amount_usd: f64,
    pub currency: String,
}

pub async fn create_payment(
    State(state): State<AppState>,
    Json(body): Json<CreatePaymentBody>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentReceipt>>), DepositError> {
    let currency: Currency = body.currency.parse()?;
    let receipt = state
        .payments
        .create_payment(&body.owner, body.amount_usd, currency)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(receipt))))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<Json<ApiResponse<PaymentRequest>>, DepositError> {
    let payment = state.payments.details(&payment_id).await?;
    Ok(Json(ApiResponse::ok(payment)))
}

pub async fn cancel_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<Json<ApiResponse<CancelResult>>, DepositError> {
    let cancelled = state.payments.cancel(&payment_id).await?;
    Ok(Json(ApiResponse::ok(CancelResult {
        payment_id,
        cancelled,
    })))
}

pub async fn get_balance(
    State(state): State<AppState>,
    Path(owner): Path<String>,
) -> Result<Json<ApiResponse<OwnerBalance>>, DepositError> {
    let balance_usd = state
        .ledger
        .balance(&owner)
        .await
        .map_err(|e| DepositError::StoreError(e.to_string()))?;

    Ok(Json(ApiResponse::ok(OwnerBalance { owner, balance_usd })))
}

//! HTTP handlers for transfers

use axum::{extract::State, Json};

use crate::error::AppResult;
use crate::services::transfer::{TransferInput, TransferOutcome, TransferService};
use crate::AppState;

/// Move stock between two ledgers
pub async fn create_transfer(
    State(state): State<AppState>,
    Json(input): Json<TransferInput>,
) -> AppResult<Json<TransferOutcome>> {
    let service = TransferService::new(state.registry, state.config.transfer.clone());
    let outcome = service.transfer(input).await?;
    Ok(Json(outcome))
}

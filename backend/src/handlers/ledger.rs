//! HTTP handlers for ledger endpoints

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use ledger_core::{BatchId, CommandOutcome, LedgerEvent, LedgerKey, LedgerSnapshot};
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::ledger::{
    AdjustInput, AllocateInput, EventsQuery, ExpireBatchesInput, LedgerService, ReceiveBatchInput,
    WriteOffBatchInput,
};
use crate::AppState;

/// Header carrying the client's idempotency key
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Path segments identifying one ledger
pub type LedgerPath = Path<(Uuid, Uuid, Uuid)>;

fn ledger_key((organization_id, site_id, product_id): (Uuid, Uuid, Uuid)) -> LedgerKey {
    LedgerKey::new(organization_id, site_id, product_id)
}

pub(crate) fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Receive a batch
pub async fn receive_batch(
    State(state): State<AppState>,
    Path(path): LedgerPath,
    headers: HeaderMap,
    Json(input): Json<ReceiveBatchInput>,
) -> AppResult<Json<CommandOutcome>> {
    let service = LedgerService::new(state.registry);
    let outcome = service
        .receive_batch(ledger_key(path), input, idempotency_key(&headers))
        .await?;
    Ok(Json(outcome))
}

/// Consume stock
pub async fn consume(
    State(state): State<AppState>,
    Path(path): LedgerPath,
    headers: HeaderMap,
    Json(input): Json<AllocateInput>,
) -> AppResult<Json<CommandOutcome>> {
    let service = LedgerService::new(state.registry);
    let outcome = service
        .consume(ledger_key(path), input, idempotency_key(&headers))
        .await?;
    Ok(Json(outcome))
}

/// Write off a quantity
pub async fn write_off(
    State(state): State<AppState>,
    Path(path): LedgerPath,
    headers: HeaderMap,
    Json(input): Json<AllocateInput>,
) -> AppResult<Json<CommandOutcome>> {
    let service = LedgerService::new(state.registry);
    let outcome = service
        .write_off(ledger_key(path), input, idempotency_key(&headers))
        .await?;
    Ok(Json(outcome))
}

/// Apply a manual adjustment
pub async fn adjust(
    State(state): State<AppState>,
    Path(path): LedgerPath,
    headers: HeaderMap,
    Json(input): Json<AdjustInput>,
) -> AppResult<Json<CommandOutcome>> {
    let service = LedgerService::new(state.registry);
    let outcome = service
        .adjust(ledger_key(path), input, idempotency_key(&headers))
        .await?;
    Ok(Json(outcome))
}

/// Write off one whole batch
pub async fn write_off_batch(
    State(state): State<AppState>,
    Path((organization_id, site_id, product_id, batch_id)): Path<(Uuid, Uuid, Uuid, BatchId)>,
    headers: HeaderMap,
    Json(input): Json<WriteOffBatchInput>,
) -> AppResult<Json<CommandOutcome>> {
    let service = LedgerService::new(state.registry);
    let key = LedgerKey::new(organization_id, site_id, product_id);
    let outcome = service
        .write_off_batch(key, batch_id, input, idempotency_key(&headers))
        .await?;
    Ok(Json(outcome))
}

/// Expire batches past their expiry date
pub async fn expire_batches(
    State(state): State<AppState>,
    Path(path): LedgerPath,
    headers: HeaderMap,
    input: Option<Json<ExpireBatchesInput>>,
) -> AppResult<Json<CommandOutcome>> {
    let service = LedgerService::new(state.registry);
    let input = input.map(|Json(input)| input).unwrap_or_default();
    let outcome = service
        .expire_batches(ledger_key(path), input, idempotency_key(&headers))
        .await?;
    Ok(Json(outcome))
}

/// Get the current ledger snapshot
pub async fn get_snapshot(
    State(state): State<AppState>,
    Path(path): LedgerPath,
) -> AppResult<Json<LedgerSnapshot>> {
    let service = LedgerService::new(state.registry);
    let snapshot = service.snapshot(ledger_key(path)).await?;
    Ok(Json(snapshot))
}

/// List events after a version, for clients keeping a local copy
pub async fn list_events(
    State(state): State<AppState>,
    Path(path): LedgerPath,
    Query(query): Query<EventsQuery>,
) -> AppResult<Json<Vec<LedgerEvent>>> {
    let service = LedgerService::new(state.registry);
    let events = service.events_since(ledger_key(path), query).await?;
    Ok(Json(events))
}

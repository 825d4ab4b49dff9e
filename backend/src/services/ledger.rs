//! Ledger service: turns API requests into ledger commands

use chrono::{DateTime, NaiveDate, Utc};
use ledger_core::{
    types::{fits_scale, COST_SCALE, MAX_QUANTITY, MAX_UNIT_COST, QUANTITY_SCALE},
    BatchId, CommandMeta, CommandOutcome, LedgerCommand, LedgerEvent, LedgerKey, LedgerSnapshot,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::registry::LedgerRegistry;
use crate::error::{AppError, AppResult};

/// Largest page returned by the event feed
pub const MAX_EVENTS_PAGE: usize = 1000;

/// Ledger service for recording stock movements
#[derive(Clone)]
pub struct LedgerService {
    registry: LedgerRegistry,
}

/// Input for receiving a batch
#[derive(Debug, Deserialize, Validate)]
pub struct ReceiveBatchInput {
    /// Defaults to a new random id
    pub batch_id: Option<BatchId>,
    #[validate(custom = "positive_quantity")]
    pub quantity: Decimal,
    #[validate(custom = "non_negative_cost")]
    pub unit_cost: Decimal,
    /// Defaults to the time the request is handled
    pub received_at: Option<DateTime<Utc>>,
    pub expiry: Option<NaiveDate>,
}

/// Input for consumptions and quantity write-offs
#[derive(Debug, Deserialize, Validate)]
pub struct AllocateInput {
    #[validate(custom = "positive_quantity")]
    pub quantity: Decimal,
    #[validate(length(min = 1, max = 64, message = "Reason code must be 1-64 characters"))]
    pub reason_code: String,
    #[validate(custom = "non_negative_cost")]
    pub fallback_unit_cost: Option<Decimal>,
}

/// Input for manual adjustments
#[derive(Debug, Deserialize, Validate)]
pub struct AdjustInput {
    #[validate(custom = "non_zero_delta")]
    pub delta: Decimal,
    #[validate(length(min = 1, max = 64, message = "Reason code must be 1-64 characters"))]
    pub reason_code: String,
    #[validate(custom = "non_negative_cost")]
    pub fallback_unit_cost: Option<Decimal>,
}

/// Input for writing off one whole batch
#[derive(Debug, Deserialize, Validate)]
pub struct WriteOffBatchInput {
    #[validate(length(min = 1, max = 64, message = "Reason code must be 1-64 characters"))]
    pub reason_code: String,
}

/// Input for expiring batches
#[derive(Debug, Default, Deserialize)]
pub struct ExpireBatchesInput {
    /// Defaults to today (UTC)
    pub as_of: Option<NaiveDate>,
}

/// Query for the event feed
#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since_version: u64,
    pub limit: Option<usize>,
}

pub(crate) fn positive_quantity(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        return Err(error("positive", "Quantity must be greater than zero"));
    }
    if !fits_scale(*value, QUANTITY_SCALE) {
        return Err(error("scale", "Quantity has too many decimal places"));
    }
    if *value > MAX_QUANTITY {
        return Err(error("range", "Quantity exceeds the largest amount the ledger tracks"));
    }
    Ok(())
}

fn non_zero_delta(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_zero() {
        return Err(error("non_zero", "Adjustment delta must not be zero"));
    }
    if !fits_scale(*value, QUANTITY_SCALE) {
        return Err(error("scale", "Adjustment delta has too many decimal places"));
    }
    if value.abs() > MAX_QUANTITY {
        return Err(error("range", "Adjustment delta exceeds the largest amount the ledger tracks"));
    }
    Ok(())
}

pub(crate) fn non_negative_cost(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO {
        return Err(error("non_negative", "Unit cost cannot be negative"));
    }
    if !fits_scale(*value, COST_SCALE) {
        return Err(error("scale", "Unit cost has too many decimal places"));
    }
    if *value > MAX_UNIT_COST {
        return Err(error("range", "Unit cost exceeds the largest cost the ledger tracks"));
    }
    Ok(())
}

fn error(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    error
}

fn meta(idempotency_key: Option<String>) -> CommandMeta {
    CommandMeta {
        occurred_at: Utc::now(),
        idempotency_key,
    }
}

impl LedgerService {
    pub fn new(registry: LedgerRegistry) -> Self {
        Self { registry }
    }

    /// Receive a new batch at its purchase cost
    pub async fn receive_batch(
        &self,
        key: LedgerKey,
        input: ReceiveBatchInput,
        idempotency_key: Option<String>,
    ) -> AppResult<CommandOutcome> {
        input.validate()?;

        let command = LedgerCommand::ReceiveBatch {
            batch_id: input.batch_id.unwrap_or_else(Uuid::new_v4),
            quantity: input.quantity,
            unit_cost: input.unit_cost,
            received_at: input.received_at.unwrap_or_else(Utc::now),
            expiry: input.expiry,
            source: None,
            transfer_id: None,
        };
        self.registry.execute(key, command, meta(idempotency_key)).await
    }

    /// Consume stock in FIFO order
    pub async fn consume(
        &self,
        key: LedgerKey,
        input: AllocateInput,
        idempotency_key: Option<String>,
    ) -> AppResult<CommandOutcome> {
        input.validate()?;

        let command = LedgerCommand::Consume {
            quantity: input.quantity,
            reason_code: input.reason_code,
            fallback_unit_cost: input.fallback_unit_cost,
        };
        self.registry.execute(key, command, meta(idempotency_key)).await
    }

    /// Write off a quantity in FIFO order
    pub async fn write_off(
        &self,
        key: LedgerKey,
        input: AllocateInput,
        idempotency_key: Option<String>,
    ) -> AppResult<CommandOutcome> {
        input.validate()?;

        let command = LedgerCommand::WriteOff {
            quantity: input.quantity,
            reason_code: input.reason_code,
            fallback_unit_cost: input.fallback_unit_cost,
        };
        self.registry.execute(key, command, meta(idempotency_key)).await
    }

    /// Apply a signed manual adjustment
    pub async fn adjust(
        &self,
        key: LedgerKey,
        input: AdjustInput,
        idempotency_key: Option<String>,
    ) -> AppResult<CommandOutcome> {
        input.validate()?;

        let command = LedgerCommand::Adjust {
            delta: input.delta,
            reason_code: input.reason_code,
            adjustment_batch_id: Uuid::new_v4(),
            fallback_unit_cost: input.fallback_unit_cost,
        };
        self.registry.execute(key, command, meta(idempotency_key)).await
    }

    /// Write off whatever remains of one batch
    pub async fn write_off_batch(
        &self,
        key: LedgerKey,
        batch_id: BatchId,
        input: WriteOffBatchInput,
        idempotency_key: Option<String>,
    ) -> AppResult<CommandOutcome> {
        input.validate()?;

        let command = LedgerCommand::WriteOffBatch {
            batch_id,
            reason_code: input.reason_code,
        };
        self.registry.execute(key, command, meta(idempotency_key)).await
    }

    /// Expire every active batch whose expiry date is before `as_of`
    pub async fn expire_batches(
        &self,
        key: LedgerKey,
        input: ExpireBatchesInput,
        idempotency_key: Option<String>,
    ) -> AppResult<CommandOutcome> {
        let as_of = input.as_of.unwrap_or_else(|| Utc::now().date_naive());
        let command = LedgerCommand::ExpireBatches { as_of };
        self.registry.execute(key, command, meta(idempotency_key)).await
    }

    /// Current state of a ledger
    pub async fn snapshot(&self, key: LedgerKey) -> AppResult<LedgerSnapshot> {
        self.registry.snapshot(key).await
    }

    /// Events after `since_version`, oldest first
    pub async fn events_since(&self, key: LedgerKey, query: EventsQuery) -> AppResult<Vec<LedgerEvent>> {
        let limit = match query.limit {
            Some(0) => {
                return Err(AppError::Validation {
                    field: "limit".to_string(),
                    message: "Limit must be greater than zero".to_string(),
                })
            }
            Some(limit) => limit.min(MAX_EVENTS_PAGE),
            None => MAX_EVENTS_PAGE,
        };

        self.registry
            .store()
            .load_events(key, query.since_version, Some(limit))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerSettings;
    use crate::services::store::EventStore;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn key() -> LedgerKey {
        LedgerKey::new(Uuid::from_u128(10), Uuid::from_u128(20), Uuid::from_u128(30))
    }

    fn service() -> LedgerService {
        LedgerService::new(LedgerRegistry::new(
            EventStore::in_memory(),
            LedgerSettings::default(),
        ))
    }

    fn receipt(quantity: &str, unit_cost: &str) -> ReceiveBatchInput {
        ReceiveBatchInput {
            batch_id: None,
            quantity: dec(quantity),
            unit_cost: dec(unit_cost),
            received_at: None,
            expiry: None,
        }
    }

    #[test]
    fn test_input_validation() {
        assert!(receipt("1", "0").validate().is_ok());
        assert!(receipt("0", "1").validate().is_err());
        assert!(receipt("1.00001", "1").validate().is_err());
        assert!(receipt("1", "-0.5").validate().is_err());

        let adjust = AdjustInput {
            delta: Decimal::ZERO,
            reason_code: "count".to_string(),
            fallback_unit_cost: None,
        };
        assert!(adjust.validate().is_err());

        let consume = AllocateInput {
            quantity: dec("1"),
            reason_code: String::new(),
            fallback_unit_cost: None,
        };
        let err = AppError::from(consume.validate().unwrap_err());
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "reason_code"));
    }

    #[test]
    fn test_amounts_beyond_ledger_range_rejected() {
        assert!(receipt("1000000000000", "1000000000").validate().is_ok());

        let err = AppError::from(receipt("100000000000000000000", "1").validate().unwrap_err());
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "quantity"));
        let err = AppError::from(receipt("1", "10000000000").validate().unwrap_err());
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "unit_cost"));

        let adjust = AdjustInput {
            delta: dec("-1000000000001"),
            reason_code: "count".to_string(),
            fallback_unit_cost: None,
        };
        assert!(adjust.validate().is_err());
    }

    #[tokio::test]
    async fn test_oversized_receipt_never_reaches_the_log() {
        let service = service();

        let result = service
            .receive_batch(key(), receipt("100000000000000000000", "1000000000"), None)
            .await;
        assert!(matches!(result, Err(AppError::Validation { .. })));
        assert_eq!(service.snapshot(key()).await.unwrap().version, 0);
    }

    #[tokio::test]
    async fn test_deficit_then_reconciling_receipt() {
        let service = service();

        let consumed = service
            .consume(
                key(),
                AllocateInput {
                    quantity: dec("5"),
                    reason_code: "sale".to_string(),
                    fallback_unit_cost: Some(dec("4.00")),
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(consumed.deficit_delta, dec("5"));
        assert_eq!(consumed.total_cost, dec("20"));

        let received = service.receive_batch(key(), receipt("8", "5.00"), None).await.unwrap();
        assert_eq!(received.deficit_reconciled, Some(dec("5")));

        let snapshot = service.snapshot(key()).await.unwrap();
        assert_eq!(snapshot.deficit, Decimal::ZERO);
        assert_eq!(snapshot.quantity_on_hand, dec("3"));
        assert_eq!(snapshot.available_quantity, dec("3"));
    }

    #[tokio::test]
    async fn test_events_since_pages_the_log() {
        let service = service();
        for _ in 0..5 {
            service.receive_batch(key(), receipt("1", "1"), None).await.unwrap();
        }

        let page = service
            .events_since(key(), EventsQuery { since_version: 2, limit: Some(2) })
            .await
            .unwrap();
        let versions: Vec<u64> = page.iter().map(|e| e.sequence).collect();
        assert_eq!(versions, vec![3, 4]);

        let rejected = service
            .events_since(key(), EventsQuery { since_version: 0, limit: Some(0) })
            .await;
        assert!(matches!(rejected, Err(AppError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_write_off_batch_and_expire() {
        let service = service();
        let batch_id = Uuid::new_v4();
        let mut expiring = receipt("4", "2.50");
        expiring.batch_id = Some(batch_id);
        expiring.expiry = NaiveDate::from_ymd_opt(2024, 1, 31);
        service.receive_batch(key(), expiring, None).await.unwrap();
        service.receive_batch(key(), receipt("6", "1.00"), None).await.unwrap();

        let expired = service
            .expire_batches(
                key(),
                ExpireBatchesInput { as_of: NaiveDate::from_ymd_opt(2024, 2, 1) },
                None,
            )
            .await
            .unwrap();
        assert_eq!(expired.event_type, "BatchesExpired");

        let late = service
            .write_off_batch(
                key(),
                batch_id,
                WriteOffBatchInput { reason_code: "damaged".to_string() },
                None,
            )
            .await;
        assert!(matches!(
            late,
            Err(AppError::Ledger(ledger_core::LedgerError::BatchNotActive { .. }))
        ));

        let snapshot = service.snapshot(key()).await.unwrap();
        assert_eq!(snapshot.available_quantity, dec("6"));
        assert_eq!(snapshot.active_batch_count(), 1);
    }
}

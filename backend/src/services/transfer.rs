//! Transfers between ledgers
//!
//! A transfer touches two ledgers that may be owned by different workers, so
//! it runs as a two-step saga instead of one transaction:
//!
//! 1. `TransferOut` on the source, idempotency key `{transfer_id}:out`
//! 2. `TransferIn` on the destination carrying the quantity and extended cost
//!    the source recorded, idempotency key `{transfer_id}:in`
//!
//! Both steps are idempotent, so a failed transfer can be retried with the
//! same id until it completes. Steps are retried here with exponential
//! backoff on transient errors.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ledger_core::{
    breakdown_quantity, ledger::cost::allocation_unit_cost, CommandMeta, CommandOutcome, LedgerCommand,
    LedgerError, LedgerKey,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::ledger::{non_negative_cost, positive_quantity};
use super::registry::LedgerRegistry;
use crate::config::TransferSettings;
use crate::error::{AppError, AppResult};

/// Transfer service for moving stock between ledgers
#[derive(Clone)]
pub struct TransferService {
    registry: LedgerRegistry,
    settings: TransferSettings,
}

/// Input for a transfer
#[derive(Debug, Deserialize, Validate)]
pub struct TransferInput {
    #[validate(length(min = 1, max = 120, message = "Transfer id must be 1-120 characters"))]
    pub transfer_id: String,
    pub source: LedgerKey,
    pub destination: LedgerKey,
    #[validate(custom = "positive_quantity")]
    pub quantity: Decimal,
    #[validate(custom = "non_negative_cost")]
    pub fallback_unit_cost: Option<Decimal>,
    /// Defaults to the time the request is handled
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Result of a completed transfer
#[derive(Debug, Serialize)]
pub struct TransferOutcome {
    pub transfer_id: String,
    pub source: CommandOutcome,
    pub destination: CommandOutcome,
    /// Quantity that left the source and entered the destination
    pub quantity: Decimal,
    /// Cost per unit carried into the destination batch
    pub unit_cost: Decimal,
}

impl TransferService {
    pub fn new(registry: LedgerRegistry, settings: TransferSettings) -> Self {
        Self { registry, settings }
    }

    /// Move stock out of one ledger and into another
    pub async fn transfer(&self, input: TransferInput) -> AppResult<TransferOutcome> {
        input.validate()?;
        if input.source == input.destination {
            return Err(AppError::Validation {
                field: "destination".to_string(),
                message: "Source and destination must be different ledgers".to_string(),
            });
        }

        let occurred_at = input.occurred_at.unwrap_or_else(Utc::now);
        let transfer_id = input.transfer_id.clone();

        let out_command = LedgerCommand::TransferOut {
            quantity: input.quantity,
            destination: input.destination,
            transfer_id: Some(transfer_id.clone()),
            fallback_unit_cost: input.fallback_unit_cost,
        };
        let out_meta = CommandMeta::at(occurred_at).with_idempotency_key(format!("{}:out", transfer_id));
        let source = self
            .step("transfer_out", input.source, out_command, out_meta)
            .await?;

        // A retried transfer must carry what the source actually recorded
        let quantity = breakdown_quantity(&source.breakdown) + source.deficit_delta;
        let unit_cost = allocation_unit_cost(source.total_cost, quantity).map_err(LedgerError::from)?;
        tracing::info!(
            transfer_id = %transfer_id,
            source = %input.source,
            destination = %input.destination,
            quantity = %quantity,
            unit_cost = %unit_cost,
            "Stock left source ledger"
        );

        let in_command = LedgerCommand::TransferIn {
            batch_id: Uuid::new_v4(),
            quantity,
            total_cost: source.total_cost,
            received_at: occurred_at,
            source: input.source,
            transfer_id: transfer_id.clone(),
        };
        let in_meta = CommandMeta::at(occurred_at).with_idempotency_key(format!("{}:in", transfer_id));
        let destination = self
            .step("transfer_in", input.destination, in_command, in_meta)
            .await
            .map_err(|e| {
                tracing::error!(
                    transfer_id = %transfer_id,
                    "Transfer left source ledger but receipt failed: {}",
                    e
                );
                AppError::TransferIncomplete {
                    transfer_id: transfer_id.clone(),
                    message: format!(
                        "stock left the source ledger but the destination receipt failed ({}); retry with the same transfer id",
                        e
                    ),
                }
            })?;

        Ok(TransferOutcome {
            transfer_id,
            source,
            destination,
            quantity,
            unit_cost,
        })
    }

    async fn step(
        &self,
        step: &'static str,
        key: LedgerKey,
        command: LedgerCommand,
        meta: CommandMeta,
    ) -> AppResult<CommandOutcome> {
        let registry = self.registry.clone();
        with_retry(&self.settings, step, move || {
            let registry = registry.clone();
            let command = command.clone();
            let meta = meta.clone();
            async move { registry.execute(key, command, meta).await }
        })
        .await
    }
}

/// Run `operation` until it succeeds, fails permanently or runs out of attempts
async fn with_retry<F, Fut, T>(settings: &TransferSettings, step: &'static str, mut operation: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let max_attempts = settings.max_attempts.max(1);
    let mut backoff = Duration::from_millis(settings.initial_backoff_ms);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(step, attempt, "Transfer step failed, retrying: {}", e);
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

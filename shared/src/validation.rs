//! Validation utilities for ledger commands
//!
//! Validation runs before any event is considered; a failure never changes
//! ledger state.

use rust_decimal::Decimal;

use crate::types::{fits_scale, COST_SCALE, MAX_QUANTITY, MAX_UNIT_COST, QUANTITY_SCALE};

/// Longest accepted reason code
pub const MAX_REASON_CODE_LEN: usize = 64;

/// Longest accepted idempotency key
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

// ============================================================================
// Quantity and Cost Validations
// ============================================================================

/// Validate a quantity is strictly positive, bounded and on the quantity grid
pub fn validate_quantity(quantity: Decimal) -> Result<(), &'static str> {
    if quantity <= Decimal::ZERO {
        return Err("Quantity must be greater than zero");
    }
    if quantity > MAX_QUANTITY {
        return Err("Quantity exceeds the largest amount the ledger tracks");
    }
    if !fits_scale(quantity, QUANTITY_SCALE) {
        return Err("Quantity has more decimal places than the ledger tracks");
    }
    Ok(())
}

/// Validate a signed adjustment delta (non-zero, on the quantity grid)
pub fn validate_delta(delta: Decimal) -> Result<(), &'static str> {
    if delta.is_zero() {
        return Err("Adjustment delta must not be zero");
    }
    validate_quantity(delta.abs())
}

/// Validate a unit cost is non-negative, bounded and on the cost grid
pub fn validate_unit_cost(unit_cost: Decimal) -> Result<(), &'static str> {
    if unit_cost < Decimal::ZERO {
        return Err("Unit cost cannot be negative");
    }
    if unit_cost > MAX_UNIT_COST {
        return Err("Unit cost exceeds the largest cost the ledger tracks");
    }
    if !fits_scale(unit_cost, COST_SCALE) {
        return Err("Unit cost has more decimal places than the ledger tracks");
    }
    Ok(())
}

// ============================================================================
// Identifier Validations
// ============================================================================

/// Validate reason code format (lowercase alphanumeric with `_`, `-` or `.`)
pub fn validate_reason_code(code: &str) -> Result<(), &'static str> {
    if code.is_empty() {
        return Err("Reason code must not be empty");
    }
    if code.len() > MAX_REASON_CODE_LEN {
        return Err("Reason code must be at most 64 characters");
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.'))
    {
        return Err("Reason code must be lowercase alphanumeric, '_', '-' or '.'");
    }
    Ok(())
}

/// Validate an idempotency key or transfer id (printable ASCII, bounded)
pub fn validate_idempotency_key(key: &str) -> Result<(), &'static str> {
    if key.is_empty() {
        return Err("Idempotency key must not be empty");
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err("Idempotency key must be at most 128 characters");
    }
    if !key.chars().all(|c| c.is_ascii_graphic()) {
        return Err("Idempotency key must be printable ASCII without spaces");
    }
    Ok(())
}

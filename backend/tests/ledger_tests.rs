//! Ledger accounting tests
//!
//! Tests for the FIFO batch ledger including:
//! - Quantity conservation across receipts, allocations, adjustments,
//!   transfers, batch write-offs and expiry
//! - Allocation completeness (breakdown + deficit = requested)
//! - FIFO ordering of allocations
//! - Deficit reconciliation by later receipts

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use ledger_core::{
    BatchStatus, CommandMeta, Decision, Ledger, LedgerCommand, LedgerError, LedgerEvent,
    LedgerEventKind, LedgerKey,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn key() -> LedgerKey {
    LedgerKey::new(Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(3))
}

fn at(step: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::minutes(step)
}

fn receive(id: u128, quantity: &str, unit_cost: &str, step: i64) -> LedgerCommand {
    LedgerCommand::ReceiveBatch {
        batch_id: Uuid::from_u128(id),
        quantity: dec(quantity),
        unit_cost: dec(unit_cost),
        received_at: at(step),
        expiry: None,
        source: None,
        transfer_id: None,
    }
}

fn consume(quantity: &str, fallback: Option<&str>) -> LedgerCommand {
    LedgerCommand::Consume {
        quantity: dec(quantity),
        reason_code: "sale".to_string(),
        fallback_unit_cost: fallback.map(dec),
    }
}

fn run(ledger: &mut Ledger, command: &LedgerCommand, step: i64) -> LedgerEvent {
    match ledger.execute(command, &CommandMeta::at(at(step))).unwrap() {
        Decision::Emit(event) => event,
        other => panic!("expected an event, got {:?}", other),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Receive 10 @ 2.00 and 5 @ 3.00, consume 12
    #[test]
    fn test_consumption_spans_batches_in_fifo_order() {
        let mut ledger = Ledger::new(key());
        run(&mut ledger, &receive(1, "10", "2.00", 0), 0);
        run(&mut ledger, &receive(2, "5", "3.00", 1), 1);

        let event = run(&mut ledger, &consume("12", None), 2);
        match event.payload {
            LedgerEventKind::StockConsumed {
                breakdown,
                deficit_delta,
                ..
            } => {
                let breakdown = breakdown.unwrap();
                assert_eq!(breakdown.len(), 2);
                assert_eq!(breakdown[0].batch_id, Uuid::from_u128(1));
                assert_eq!(breakdown[0].quantity, dec("10"));
                assert_eq!(breakdown[0].unit_cost, dec("2.00"));
                assert_eq!(breakdown[1].batch_id, Uuid::from_u128(2));
                assert_eq!(breakdown[1].quantity, dec("2"));
                assert_eq!(breakdown[1].unit_cost, dec("3.00"));
                assert_eq!(deficit_delta, Some(Decimal::ZERO));
            }
            other => panic!("unexpected payload {:?}", other),
        }

        assert_eq!(ledger.quantity_on_hand(), dec("3"));
        assert_eq!(ledger.deficit(), Decimal::ZERO);
        assert_eq!(ledger.weighted_average_cost(), Some(dec("3")));
        assert_eq!(
            ledger.batch(Uuid::from_u128(1)).unwrap().status,
            BatchStatus::Exhausted
        );
    }

    /// Consume 5 with fallback 4.00 on an empty ledger
    #[test]
    fn test_consumption_on_empty_ledger_creates_deficit() {
        let mut ledger = Ledger::new(key());

        let event = run(&mut ledger, &consume("5", Some("4.00")), 0);
        match event.payload {
            LedgerEventKind::StockConsumed {
                breakdown,
                deficit_delta,
                deficit_unit_cost,
                ..
            } => {
                assert_eq!(breakdown, Some(vec![]));
                assert_eq!(deficit_delta, Some(dec("5")));
                assert_eq!(deficit_unit_cost, Some(dec("4.00")));
            }
            other => panic!("unexpected payload {:?}", other),
        }

        assert_eq!(ledger.quantity_on_hand(), dec("-5"));
        assert_eq!(ledger.deficit(), dec("5"));
        assert_eq!(ledger.weighted_average_cost(), Some(dec("4.00")));
    }

    /// Deficit of 5 @ 4.00, then receive 8 @ 5.00
    #[test]
    fn test_receipt_reconciles_deficit() {
        let mut ledger = Ledger::new(key());
        run(&mut ledger, &consume("5", Some("4.00")), 0);

        let event = run(&mut ledger, &receive(3, "8", "5.00", 1), 1);
        match event.payload {
            LedgerEventKind::BatchReceived {
                deficit_reconciled,
                deficit_cost_variance,
                ..
            } => {
                assert_eq!(deficit_reconciled, Some(dec("5")));
                assert_eq!(deficit_cost_variance, Some(dec("5")));
            }
            other => panic!("unexpected payload {:?}", other),
        }

        let batch = ledger.batch(Uuid::from_u128(3)).unwrap();
        assert_eq!(batch.quantity_received, dec("8"));
        assert_eq!(batch.quantity_remaining, dec("3"));
        assert_eq!(ledger.deficit(), Decimal::ZERO);
        assert_eq!(ledger.quantity_on_hand(), dec("3"));
        assert_eq!(ledger.weighted_average_cost(), Some(dec("5")));
    }

    #[test]
    fn test_partial_reconciliation_leaves_deficit() {
        let mut ledger = Ledger::new(key());
        run(&mut ledger, &consume("10", Some("1.00")), 0);
        run(&mut ledger, &receive(4, "4", "1.00", 1), 1);

        assert_eq!(ledger.deficit(), dec("6"));
        assert_eq!(ledger.available_quantity(), Decimal::ZERO);
        assert_eq!(ledger.quantity_on_hand(), dec("-6"));
        assert_eq!(
            ledger.batch(Uuid::from_u128(4)).unwrap().status,
            BatchStatus::Exhausted
        );
    }

    #[test]
    fn test_weighted_average_frozen_during_stock_out() {
        let mut ledger = Ledger::new(key());
        run(&mut ledger, &receive(1, "2", "7.50", 0), 0);
        run(&mut ledger, &consume("2", None), 1);
        assert_eq!(ledger.weighted_average_cost(), Some(dec("7.5")));

        // Deficit priced at the frozen average, no fallback needed
        let event = run(&mut ledger, &consume("1", None), 2);
        match event.payload {
            LedgerEventKind::StockConsumed {
                deficit_unit_cost, ..
            } => assert_eq!(deficit_unit_cost, Some(dec("7.5"))),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_missing_fallback_cost_is_rejected_without_change() {
        let mut ledger = Ledger::new(key());
        let result = ledger.execute(&consume("1", None), &CommandMeta::at(at(0)));

        assert!(matches!(result, Err(LedgerError::MissingFallbackCost { .. })));
        assert_eq!(ledger.version(), 0);
        assert_eq!(ledger, Ledger::new(key()));
    }

    #[test]
    fn test_invalid_commands_rejected() {
        let mut ledger = Ledger::new(key());
        run(&mut ledger, &receive(1, "10", "2.00", 0), 0);
        let before = ledger.clone();

        let rejected = [
            consume("0", None),
            consume("-1", None),
            consume("0.00001", None),
            receive(2, "1", "-1", 1),
            receive(1, "1", "1", 1),
            LedgerCommand::Consume {
                quantity: dec("1"),
                reason_code: "Not A Code".to_string(),
                fallback_unit_cost: None,
            },
        ];
        for command in &rejected {
            assert!(ledger.execute(command, &CommandMeta::at(at(1))).is_err());
        }
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_write_off_and_transfer_allocate_like_consumption() {
        let mut ledger = Ledger::new(key());
        run(&mut ledger, &receive(1, "3", "1.00", 0), 0);
        run(&mut ledger, &receive(2, "3", "2.00", 1), 1);

        let write_off = LedgerCommand::WriteOff {
            quantity: dec("4"),
            reason_code: "spoilage".to_string(),
            fallback_unit_cost: None,
        };
        let event = run(&mut ledger, &write_off, 2);
        assert_eq!(event.payload.name(), "StockWrittenOff");

        let transfer = LedgerCommand::TransferOut {
            quantity: dec("3"),
            destination: LedgerKey::new(Uuid::from_u128(1), Uuid::from_u128(9), Uuid::from_u128(3)),
            transfer_id: Some("t-1".to_string()),
            fallback_unit_cost: None,
        };
        let event = run(&mut ledger, &transfer, 3);
        match event.payload {
            LedgerEventKind::StockTransferredOut {
                breakdown,
                deficit_delta,
                deficit_unit_cost,
                ..
            } => {
                let breakdown = breakdown.unwrap();
                assert_eq!(breakdown.len(), 1);
                assert_eq!(breakdown[0].quantity, dec("2"));
                assert_eq!(deficit_delta, Some(dec("1")));
                assert_eq!(deficit_unit_cost, Some(dec("2")));
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(ledger.quantity_on_hand(), dec("-1"));
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    #[derive(Debug, Clone)]
    enum Op {
        /// Receipt dated `backdate` minutes before its step, optionally expiring
        Receive {
            quantity: Decimal,
            unit_cost: Decimal,
            backdate: i64,
            expiry_day: Option<u32>,
        },
        Consume(Decimal),
        WriteOff(Decimal),
        Adjust(Decimal),
        TransferOut(Decimal),
        /// Write off the n-th active batch (modulo the active count)
        WriteOffBatch(usize),
        ExpireBatches(u32),
    }

    /// Strategy for generating valid quantities (0.1 to 50.0)
    fn quantity_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=500i64).prop_map(|n| Decimal::new(n, 1))
    }

    /// Strategy for generating valid unit costs (0.01 to 100.00)
    fn cost_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=10000i64).prop_map(|n| Decimal::new(n, 2))
    }

    fn receive_strategy() -> impl Strategy<Value = Op> {
        (
            quantity_strategy(),
            cost_strategy(),
            prop_oneof![3 => Just(0i64), 1 => 1i64..=90i64],
            prop::option::of(0u32..30),
        )
            .prop_map(|(quantity, unit_cost, backdate, expiry_day)| Op::Receive {
                quantity,
                unit_cost,
                backdate,
                expiry_day,
            })
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => receive_strategy(),
            3 => quantity_strategy().prop_map(Op::Consume),
            1 => quantity_strategy().prop_map(Op::WriteOff),
            1 => (quantity_strategy(), any::<bool>())
                .prop_map(|(q, up)| Op::Adjust(if up { q } else { -q })),
            1 => quantity_strategy().prop_map(Op::TransferOut),
            1 => (0usize..8).prop_map(Op::WriteOffBatch),
            1 => (0u32..30).prop_map(Op::ExpireBatches),
        ]
    }

    fn day(offset: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset as i64)
    }

    fn other_site() -> LedgerKey {
        LedgerKey::new(Uuid::from_u128(1), Uuid::from_u128(7), Uuid::from_u128(3))
    }

    /// The command for `op` against the current ledger and the change it makes
    /// to quantity on hand, or `None` when the op has nothing to act on
    fn resolve(ledger: &Ledger, op: &Op, step: usize) -> Option<(LedgerCommand, Decimal)> {
        let fallback = Some(dec("1.00"));
        let resolved = match op {
            Op::Receive {
                quantity,
                unit_cost,
                backdate,
                expiry_day,
            } => (
                LedgerCommand::ReceiveBatch {
                    batch_id: Uuid::from_u128(step as u128 + 1),
                    quantity: *quantity,
                    unit_cost: *unit_cost,
                    received_at: at(step as i64 - backdate),
                    expiry: expiry_day.map(day),
                    source: None,
                    transfer_id: None,
                },
                *quantity,
            ),
            Op::Consume(quantity) => (
                LedgerCommand::Consume {
                    quantity: *quantity,
                    reason_code: "sale".to_string(),
                    fallback_unit_cost: fallback,
                },
                -*quantity,
            ),
            Op::WriteOff(quantity) => (
                LedgerCommand::WriteOff {
                    quantity: *quantity,
                    reason_code: "spoilage".to_string(),
                    fallback_unit_cost: fallback,
                },
                -*quantity,
            ),
            Op::Adjust(delta) => (
                LedgerCommand::Adjust {
                    delta: *delta,
                    reason_code: "count".to_string(),
                    adjustment_batch_id: Uuid::from_u128(10_000 + step as u128),
                    fallback_unit_cost: fallback,
                },
                *delta,
            ),
            Op::TransferOut(quantity) => (
                LedgerCommand::TransferOut {
                    quantity: *quantity,
                    destination: other_site(),
                    transfer_id: Some(format!("tr-{}", step)),
                    fallback_unit_cost: fallback,
                },
                -*quantity,
            ),
            Op::WriteOffBatch(index) => {
                let active: Vec<_> = ledger.batches().active().collect();
                if active.is_empty() {
                    return None;
                }
                let batch = active[index % active.len()];
                (
                    LedgerCommand::WriteOffBatch {
                        batch_id: batch.id,
                        reason_code: "damaged".to_string(),
                    },
                    -batch.quantity_remaining,
                )
            }
            Op::ExpireBatches(offset) => {
                let as_of = day(*offset);
                let expiring: Vec<_> = ledger
                    .batches()
                    .active()
                    .filter(|batch| batch.is_expired_at(as_of))
                    .collect();
                if expiring.is_empty() {
                    return None;
                }
                let removed: Decimal = expiring.iter().map(|batch| batch.quantity_remaining).sum();
                (LedgerCommand::ExpireBatches { as_of }, -removed)
            }
        };
        Some(resolved)
    }

    fn command(op: &Op, step: usize) -> LedgerCommand {
        match resolve(&Ledger::new(key()), op, step) {
            Some((command, _)) => command,
            None => panic!("{:?} needs ledger state", op),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Quantity on hand equals the net of every movement
        #[test]
        fn prop_quantity_conservation(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let mut ledger = Ledger::new(key());
            let mut expected = Decimal::ZERO;

            for (step, op) in ops.iter().enumerate() {
                let Some((command, flow)) = resolve(&ledger, op, step) else {
                    continue;
                };
                run(&mut ledger, &command, step as i64);
                expected += flow;

                prop_assert_eq!(ledger.quantity_on_hand(), expected);
                prop_assert!(ledger.deficit() >= Decimal::ZERO);
                prop_assert!(ledger.batches().iter().all(|b| b.quantity_remaining >= Decimal::ZERO));
                // Deficit only exists once active stock is gone
                prop_assert!(ledger.deficit().is_zero() || ledger.available_quantity().is_zero());
            }
        }

        /// Every allocation is fully explained by its breakdown and deficit,
        /// and draws batches oldest first
        #[test]
        fn prop_allocation_complete_and_fifo(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let mut ledger = Ledger::new(key());

            for (step, op) in ops.iter().enumerate() {
                let before = ledger.clone();
                let Some((command, _)) = resolve(&ledger, op, step) else {
                    continue;
                };
                let event = run(&mut ledger, &command, step as i64);

                let allocation = match &event.payload {
                    LedgerEventKind::StockConsumed { quantity, breakdown, deficit_delta, .. }
                    | LedgerEventKind::StockWrittenOff { quantity, breakdown, deficit_delta, .. }
                    | LedgerEventKind::StockTransferredOut { quantity, breakdown, deficit_delta, .. } => {
                        Some((*quantity, breakdown.clone(), *deficit_delta))
                    }
                    LedgerEventKind::StockAdjusted { delta, breakdown, deficit_delta, .. }
                        if delta.is_sign_negative() =>
                    {
                        Some((-*delta, breakdown.clone(), *deficit_delta))
                    }
                    _ => None,
                };

                if let Some((requested, breakdown, deficit_delta)) = allocation {
                    let breakdown = breakdown.unwrap_or_default();
                    let deficit_delta = deficit_delta.unwrap_or(Decimal::ZERO);
                    let drawn: Decimal = breakdown.iter().map(|line| line.quantity).sum();
                    prop_assert_eq!(drawn + deficit_delta, requested);

                    // Lines follow FIFO order and all but the last drain their batch
                    let active: Vec<_> = before.batches().active().collect();
                    prop_assert!(breakdown.len() <= active.len());
                    for (i, line) in breakdown.iter().enumerate() {
                        prop_assert_eq!(line.batch_id, active[i].id);
                        prop_assert_eq!(line.unit_cost, active[i].unit_cost);
                        if i + 1 < breakdown.len() || deficit_delta > Decimal::ZERO {
                            prop_assert_eq!(line.quantity, active[i].quantity_remaining);
                        }
                    }
                    if deficit_delta > Decimal::ZERO {
                        prop_assert_eq!(drawn, before.available_quantity());
                    }
                }
            }
        }

        /// Receipts absorb outstanding deficit before adding stock
        #[test]
        fn prop_receipt_reconciles_deficit(
            shortfall in quantity_strategy(),
            received in quantity_strategy(),
            cost in cost_strategy()
        ) {
            let mut ledger = Ledger::new(key());
            run(&mut ledger, &command(&Op::Consume(shortfall), 0), 0);
            let receipt = Op::Receive {
                quantity: received,
                unit_cost: cost,
                backdate: 0,
                expiry_day: None,
            };
            run(&mut ledger, &command(&receipt, 1), 1);

            let reconciled = shortfall.min(received);
            prop_assert_eq!(ledger.deficit(), shortfall - reconciled);
            prop_assert_eq!(ledger.available_quantity(), received - reconciled);
            prop_assert_eq!(ledger.quantity_on_hand(), received - shortfall);
        }
    }
}

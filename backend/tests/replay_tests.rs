//! Event log replay tests
//!
//! Tests for rebuilding ledgers from their event logs:
//! - Replay reproduces live state exactly
//! - Snapshot plus suffix equals replay from genesis
//! - Events written before enrichment replay through the allocator
//! - Corrupt logs are rejected instead of silently folded

use chrono::{TimeZone, Utc};
use ledger_core::{
    CommandMeta, Decision, Ledger, LedgerCommand, LedgerEvent, LedgerEventKind, LedgerKey,
    LedgerSnapshot, ReplayError, CURRENT_SCHEMA_VERSION, LEGACY_SCHEMA_VERSION,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn key() -> LedgerKey {
    LedgerKey::new(Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(3))
}

fn key_json() -> serde_json::Value {
    serde_json::to_value(key()).unwrap()
}

/// Events as written before enrichment: allocations carry only a quantity
fn legacy_log() -> Vec<LedgerEvent> {
    let raw = json!([
        {
            "key": key_json(),
            "sequence": 1,
            "occurred_at": "2024-03-01T08:00:00Z",
            "payload": {
                "type": "BatchReceived",
                "batch_id": Uuid::from_u128(11),
                "quantity": "10",
                "unit_cost": "2.00",
                "received_at": "2024-03-01T08:00:00Z"
            }
        },
        {
            "key": key_json(),
            "sequence": 2,
            "occurred_at": "2024-03-02T08:00:00Z",
            "payload": {
                "type": "BatchReceived",
                "batch_id": Uuid::from_u128(12),
                "quantity": "5",
                "unit_cost": "3.00",
                "received_at": "2024-03-02T08:00:00Z"
            }
        },
        {
            "key": key_json(),
            "sequence": 3,
            "occurred_at": "2024-03-03T08:00:00Z",
            "payload": {
                "type": "StockConsumed",
                "quantity": "12",
                "reason_code": "sale"
            }
        }
    ]);
    serde_json::from_value(raw).unwrap()
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_legacy_events_decode_with_defaults() {
        let events = legacy_log();
        assert!(events.iter().all(|e| e.schema_version == LEGACY_SCHEMA_VERSION));
        assert!(events.iter().all(|e| e.idempotency_key.is_none()));
        assert!(!events[2].is_enriched());
    }

    #[test]
    fn test_legacy_log_replays_through_allocator() {
        let ledger = Ledger::replay(key(), &legacy_log()).unwrap();

        assert_eq!(ledger.version(), 3);
        assert_eq!(ledger.quantity_on_hand(), dec("3"));
        assert_eq!(ledger.batch(Uuid::from_u128(11)).unwrap().quantity_remaining, Decimal::ZERO);
        assert_eq!(ledger.batch(Uuid::from_u128(12)).unwrap().quantity_remaining, dec("3"));
        assert_eq!(ledger.weighted_average_cost(), Some(dec("3")));
    }

    #[test]
    fn test_mixed_legacy_and_enriched_log() {
        let mut events = legacy_log();
        let mut ledger = Ledger::replay(key(), &events).unwrap();

        let meta = CommandMeta::at(Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap());
        let command = LedgerCommand::Consume {
            quantity: dec("4"),
            reason_code: "sale".to_string(),
            fallback_unit_cost: None,
        };
        if let Decision::Emit(event) = ledger.execute(&command, &meta).unwrap() {
            assert_eq!(event.schema_version, CURRENT_SCHEMA_VERSION);
            assert!(event.is_enriched());
            events.push(event);
        }

        let replayed = Ledger::replay(key(), &events).unwrap();
        assert_eq!(replayed, ledger);
        assert_eq!(replayed.deficit(), dec("1"));
    }

    #[test]
    fn test_enriched_breakdown_is_applied_verbatim() {
        let mut events = legacy_log();
        events[2].payload = LedgerEventKind::StockConsumed {
            quantity: dec("12"),
            breakdown: Some(vec![
                ledger_core::BreakdownLine {
                    batch_id: Uuid::from_u128(12),
                    quantity: dec("5"),
                    unit_cost: dec("3.00"),
                },
                ledger_core::BreakdownLine {
                    batch_id: Uuid::from_u128(11),
                    quantity: dec("7"),
                    unit_cost: dec("2.00"),
                },
            ]),
            deficit_delta: Some(Decimal::ZERO),
            deficit_unit_cost: None,
            reason_code: "sale".to_string(),
        };

        // The recorded breakdown wins over what FIFO would pick today
        let ledger = Ledger::replay(key(), &events).unwrap();
        assert_eq!(ledger.batch(Uuid::from_u128(11)).unwrap().quantity_remaining, dec("3"));
        assert_eq!(ledger.batch(Uuid::from_u128(12)).unwrap().quantity_remaining, Decimal::ZERO);
    }

    #[test]
    fn test_corrupt_logs_rejected() {
        // Gap in sequence
        let mut gapped = legacy_log();
        gapped.remove(1);
        assert!(matches!(
            Ledger::replay(key(), &gapped),
            Err(ReplayError::OutOfOrder { expected: 2, found: 3 })
        ));

        // Breakdown draws more than the batch holds
        let mut overdrawn = legacy_log();
        overdrawn[2].payload = LedgerEventKind::StockConsumed {
            quantity: dec("11"),
            breakdown: Some(vec![ledger_core::BreakdownLine {
                batch_id: Uuid::from_u128(11),
                quantity: dec("11"),
                unit_cost: dec("2.00"),
            }]),
            deficit_delta: Some(Decimal::ZERO),
            deficit_unit_cost: None,
            reason_code: "sale".to_string(),
        };
        assert!(matches!(
            Ledger::replay(key(), &overdrawn),
            Err(ReplayError::Overdraw { sequence: 3, .. })
        ));

        // Event from another ledger
        let other = LedgerKey::new(Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(4));
        assert!(matches!(
            Ledger::replay(other, &legacy_log()),
            Err(ReplayError::KeyMismatch { sequence: 1, .. })
        ));
    }

    #[test]
    fn test_snapshot_json_round_trip_keeps_replay_contract() {
        let ledger = Ledger::replay(key(), &legacy_log()).unwrap();
        let json = serde_json::to_string(&ledger.snapshot()).unwrap();
        let snapshot: LedgerSnapshot = serde_json::from_str(&json).unwrap();

        assert_eq!(Ledger::restore(snapshot), ledger);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;

    #[derive(Debug, Clone)]
    enum Op {
        Receive(Decimal, Decimal),
        Consume(Decimal),
        Adjust(Decimal),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let quantity = (1i64..=400i64).prop_map(|n| Decimal::new(n, 1));
        let cost = (1i64..=5000i64).prop_map(|n| Decimal::new(n, 2));
        prop_oneof![
            (quantity.clone(), cost).prop_map(|(q, c)| Op::Receive(q, c)),
            quantity.clone().prop_map(Op::Consume),
            (quantity, any::<bool>()).prop_map(|(q, up)| Op::Adjust(if up { q } else { -q })),
        ]
    }

    fn build(ops: &[Op]) -> (Ledger, Vec<LedgerEvent>) {
        let mut ledger = Ledger::new(key());
        let mut events = Vec::new();

        for (step, op) in ops.iter().enumerate() {
            let command = match op {
                Op::Receive(quantity, unit_cost) => LedgerCommand::ReceiveBatch {
                    batch_id: Uuid::from_u128(step as u128 + 1),
                    quantity: *quantity,
                    unit_cost: *unit_cost,
                    received_at: Utc.timestamp_opt(1_700_000_000 + step as i64, 0).unwrap(),
                    expiry: None,
                    source: None,
                    transfer_id: None,
                },
                Op::Consume(quantity) => LedgerCommand::Consume {
                    quantity: *quantity,
                    reason_code: "sale".to_string(),
                    fallback_unit_cost: Some(dec("2.50")),
                },
                Op::Adjust(delta) => LedgerCommand::Adjust {
                    delta: *delta,
                    reason_code: "count".to_string(),
                    adjustment_batch_id: Uuid::from_u128(50_000 + step as u128),
                    fallback_unit_cost: Some(dec("2.50")),
                },
            };
            let meta = CommandMeta::at(Utc.timestamp_opt(1_700_000_000 + step as i64, 0).unwrap())
                .with_idempotency_key(format!("op-{}", step));
            if let Decision::Emit(event) = ledger.execute(&command, &meta).unwrap() {
                events.push(event);
            }
        }
        (ledger, events)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Replaying the log reproduces the live ledger exactly
        #[test]
        fn prop_replay_is_deterministic(ops in prop::collection::vec(op_strategy(), 1..30)) {
            let (live, events) = build(&ops);

            let replayed = Ledger::replay(key(), &events).unwrap();
            prop_assert_eq!(&replayed, &live);
            prop_assert_eq!(replayed.snapshot(), live.snapshot());
        }

        /// Any snapshot plus the events after it equals replay from genesis
        #[test]
        fn prop_snapshot_plus_suffix_matches_genesis(
            ops in prop::collection::vec(op_strategy(), 1..30),
            cut in 0usize..30
        ) {
            let (live, events) = build(&ops);
            let cut = cut.min(events.len());

            let prefix = Ledger::replay(key(), &events[..cut]).unwrap();
            let json = serde_json::to_string(&prefix.snapshot()).unwrap();
            let mut restored = Ledger::restore(serde_json::from_str(&json).unwrap());

            // Overlapping events are skipped
            let applied = restored.catch_up(&events).unwrap();
            prop_assert_eq!(applied, events.len() - cut);
            prop_assert_eq!(restored, live);
        }

        /// Log JSON round trip does not change replay
        #[test]
        fn prop_log_survives_serialization(ops in prop::collection::vec(op_strategy(), 1..20)) {
            let (live, events) = build(&ops);
            let json = serde_json::to_string(&events).unwrap();
            let decoded: Vec<LedgerEvent> = serde_json::from_str(&json).unwrap();

            prop_assert_eq!(&decoded, &events);
            prop_assert_eq!(Ledger::replay(key(), &decoded).unwrap(), live);
        }
    }
}

//! WebAssembly module for the batch ledger
//!
//! Lets a disconnected client keep its own copy of a ledger in sync:
//! - Replay an event log from genesis
//! - Catch up a cached snapshot with newer events
//! - Preview which batches a consumption would draw from
//!
//! All inputs and outputs are JSON strings in the same schema the server
//! writes, and the fold is the same code the server runs, so the client
//! reaches identical state without calling back.

use std::str::FromStr;

use rust_decimal::Decimal;
use wasm_bindgen::prelude::*;

pub use ledger_core::models::*;
pub use ledger_core::types::*;
use ledger_core::Ledger;

/// Rebuild a ledger snapshot from its full event log
#[wasm_bindgen]
pub fn replay_ledger(key_json: &str, events_json: &str) -> Result<String, JsValue> {
    replay_json(key_json, events_json).map_err(to_js_error)
}

/// Apply events newer than a cached snapshot; already-seen events are skipped
#[wasm_bindgen]
pub fn catch_up_ledger(snapshot_json: &str, events_json: &str) -> Result<String, JsValue> {
    catch_up_json(snapshot_json, events_json).map_err(to_js_error)
}

/// Plan and price an allocation against a snapshot without changing it
#[wasm_bindgen]
pub fn preview_allocation(
    snapshot_json: &str,
    quantity: &str,
    fallback_unit_cost: Option<String>,
) -> Result<String, JsValue> {
    preview_json(snapshot_json, quantity, fallback_unit_cost.as_deref()).map_err(to_js_error)
}

fn to_js_error(message: String) -> JsValue {
    web_sys::console::warn_1(&JsValue::from_str(&message));
    js_sys::Error::new(&message).into()
}

fn parse_events(events_json: &str) -> Result<Vec<LedgerEvent>, String> {
    serde_json::from_str(events_json).map_err(|e| format!("Invalid events JSON: {}", e))
}

fn parse_snapshot(snapshot_json: &str) -> Result<LedgerSnapshot, String> {
    serde_json::from_str(snapshot_json).map_err(|e| format!("Invalid snapshot JSON: {}", e))
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, String> {
    Decimal::from_str(value).map_err(|e| format!("Invalid {}: {}", field, e))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| format!("Serialization failed: {}", e))
}

fn replay_json(key_json: &str, events_json: &str) -> Result<String, String> {
    let key: LedgerKey =
        serde_json::from_str(key_json).map_err(|e| format!("Invalid key JSON: {}", e))?;
    let events = parse_events(events_json)?;

    let ledger = Ledger::replay(key, &events).map_err(|e| e.to_string())?;
    to_json(&ledger.snapshot())
}

fn catch_up_json(snapshot_json: &str, events_json: &str) -> Result<String, String> {
    let snapshot = parse_snapshot(snapshot_json)?;
    let events = parse_events(events_json)?;

    let mut ledger = Ledger::restore(snapshot);
    ledger.catch_up(&events).map_err(|e| e.to_string())?;
    to_json(&ledger.snapshot())
}

fn preview_json(
    snapshot_json: &str,
    quantity: &str,
    fallback_unit_cost: Option<&str>,
) -> Result<String, String> {
    let ledger = Ledger::restore(parse_snapshot(snapshot_json)?);
    let quantity = parse_decimal("quantity", quantity)?;
    let fallback = fallback_unit_cost
        .map(|value| parse_decimal("fallback unit cost", value))
        .transpose()?;

    let priced = ledger
        .preview(quantity, fallback)
        .map_err(|e| e.to_string())?;
    to_json(&priced)
}

//! Decoding of inbound feed frames into validated `TokenEvent`s.
//!
//! Validation is per field: a field that fails validation is dropped and
//! reported, the rest of the event is still usable. Only a frame that is not a
//! JSON object or lacks a usable `pubkey` is rejected as a whole.

use crate::types::{TokenEvent, TradeFill};
use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Value};

/// A decoded event together with the names of the fields that were dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub event: TokenEvent,
    pub rejected_fields: Vec<&'static str>,
}

/// Decode a raw text frame.
pub fn decode_frame(text: &str) -> Result<DecodedEvent> {
    let value: Value = serde_json::from_str(text).context("Frame is not valid JSON")?;
    decode_value(&value)
}

/// Decode an already parsed JSON value.
pub fn decode_value(value: &Value) -> Result<DecodedEvent> {
    let object = value
        .as_object()
        .ok_or_else(|| anyhow!("Frame is not a JSON object"))?;

    let pubkey = match lookup(object, &["pubkey", "mint"]) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(_) => bail!("Frame has an invalid pubkey"),
        None => bail!("Frame has no pubkey"),
    };

    let mut rejected = Vec::new();
    let mut event = TokenEvent::new(pubkey);

    event.name = text_field(object, &["name"], "name", &mut rejected);
    event.symbol = text_field(object, &["symbol"], "symbol", &mut rejected);
    event.market_cap = amount_field(object, &["marketCap", "market_cap"], "marketCap", &mut rejected);
    event.price = amount_field(object, &["price"], "price", &mut rejected);
    event.buy_volume = amount_field(object, &["buyVolume", "buy_volume"], "buyVolume", &mut rejected);
    event.sell_volume =
        amount_field(object, &["sellVolume", "sell_volume"], "sellVolume", &mut rejected);
    event.unique_address = text_field(
        object,
        &["uniqueAddress", "unique_address", "owner"],
        "uniqueAddress",
        &mut rejected,
    )
    .filter(|address| !address.is_empty());
    event.timestamp = timestamp_field(object, &mut rejected);
    event.trade = trade_field(object, &mut rejected);

    Ok(DecodedEvent {
        event,
        rejected_fields: rejected,
    })
}

fn lookup<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| object.get(*key))
        .filter(|value| !value.is_null())
}

fn text_field(
    object: &Map<String, Value>,
    keys: &[&str],
    label: &'static str,
    rejected: &mut Vec<&'static str>,
) -> Option<String> {
    match lookup(object, keys)? {
        Value::String(s) => Some(s.trim().to_string()),
        _ => {
            rejected.push(label);
            None
        }
    }
}

/// Non-negative, finite number; numeric strings are accepted.
fn parse_amount(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (number.is_finite() && number >= 0.0).then_some(number)
}

fn amount_field(
    object: &Map<String, Value>,
    keys: &[&str],
    label: &'static str,
    rejected: &mut Vec<&'static str>,
) -> Option<f64> {
    let value = lookup(object, keys)?;
    let amount = parse_amount(value);
    if amount.is_none() {
        rejected.push(label);
    }
    amount
}

fn timestamp_field(object: &Map<String, Value>, rejected: &mut Vec<&'static str>) -> Option<u64> {
    let value = lookup(object, &["timestamp"])?;
    let timestamp = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    if timestamp.is_none() {
        rejected.push("timestamp");
    }
    timestamp
}

fn trade_field(object: &Map<String, Value>, rejected: &mut Vec<&'static str>) -> Option<TradeFill> {
    let amount = lookup(object, &["swapAmount", "swap_amount"]);
    let side = lookup(object, &["isBuy", "is_buy"]);

    match (amount, side) {
        (None, None) => None,
        (Some(amount), Some(Value::Bool(is_buy))) => match parse_amount(amount) {
            Some(amount) => Some(TradeFill {
                amount,
                is_buy: *is_buy,
            }),
            None => {
                rejected.push("swapAmount");
                None
            }
        },
        _ => {
            rejected.push("trade");
            None
        }
    }
}

//! Wire shaping for the trade stream and the control protocol.
//!
//! Base-unit amounts cross the wire as decimal strings; display amounts and
//! values are floats, converted at this boundary only.

use serde_json::{json, Value};

use crate::db::models::{BroadcastTrade, TradeAction};
use crate::utils::{amount_display, UZIG, UZIG_EXPONENT};

/// First frame on every connection.
pub fn hello_frame() -> String {
    json!({ "ok": true, "hello": "degenter-ws", "path": "/ws" }).to_string()
}

/// A parsed client control frame.
#[derive(Debug, PartialEq, Eq)]
pub enum ControlOp {
    Subscribe(String),
    Unsubscribe(String),
}

/// Parse a client frame. The error string is the wire error code.
pub fn parse_control(text: &str) -> Result<ControlOp, &'static str> {
    let value: Value = serde_json::from_str(text).map_err(|_| "invalid_json")?;

    let op = value.get("op").and_then(Value::as_str).unwrap_or_default();
    let topic = value
        .get("topic")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match op {
        "subscribe" => Ok(ControlOp::Subscribe(topic)),
        "unsubscribe" => Ok(ControlOp::Unsubscribe(topic)),
        _ => Err("unknown_op"),
    }
}

pub fn ack_frame(op: &ControlOp) -> String {
    match op {
        ControlOp::Subscribe(topic) => json!({ "ok": true, "subscribed": topic }).to_string(),
        ControlOp::Unsubscribe(topic) => {
            json!({ "ok": true, "unsubscribed": topic }).to_string()
        },
    }
}

pub fn error_frame(code: &str) -> String {
    json!({ "ok": false, "error": code }).to_string()
}

/// Exponent of a denom within the trade's pair.
fn denom_exponent(trade: &BroadcastTrade, denom: &str) -> u32 {
    if denom == trade.base_denom {
        trade.base_exponent.max(0) as u32
    } else if denom == trade.quote_denom {
        trade.quote_exponent.max(0) as u32
    } else {
        UZIG_EXPONENT
    }
}

fn display_of(trade: &BroadcastTrade, denom: Option<&str>, amount: Option<&str>) -> Option<f64> {
    let denom = denom?;
    amount.and_then(|a| amount_display(a, denom_exponent(trade, denom)))
}

/// Native-unit notional of a trade. Swaps read their uzig leg; liquidity
/// actions carry no leg amounts and report zero.
pub fn value_native(trade: &BroadcastTrade) -> f64 {
    if trade.action != TradeAction::Swap {
        return 0.0;
    }

    let amount = if trade.offer_denom.as_deref() == Some(UZIG) {
        trade.offer_amount_base.as_deref()
    } else if trade.ask_denom.as_deref() == Some(UZIG) {
        trade.return_amount_base.as_deref()
    } else {
        None
    };

    amount
        .and_then(|a| amount_display(a, UZIG_EXPONENT))
        .unwrap_or(0.0)
}

/// Broadcast payload for one trade.
pub fn shape_trade(trade: &BroadcastTrade, native_price_usd: f64) -> Value {
    let value_native = value_native(trade);
    let return_denom = trade.ask_denom.as_deref();

    json!({
        "type": "trade",
        "data": {
            "time": trade.created_at.to_rfc3339(),
            "txHash": trade.tx_hash,
            "pairContract": trade.pair_contract,
            "signer": trade.signer,
            "direction": trade.direction.as_str(),
            "offerDenom": trade.offer_denom,
            "offerAmountBase": trade.offer_amount_base,
            "offerAmount": display_of(trade, trade.offer_denom.as_deref(), trade.offer_amount_base.as_deref()),
            "askDenom": trade.ask_denom,
            "askAmountBase": trade.ask_amount_base,
            "askAmount": display_of(trade, trade.ask_denom.as_deref(), trade.ask_amount_base.as_deref()),
            "returnAmountBase": trade.return_amount_base,
            "returnAmount": display_of(trade, return_denom, trade.return_amount_base.as_deref()),
            "valueNative": value_native,
            "valueUsd": value_native * native_price_usd,
        }
    })
}

/// Topics a trade fans out to: the global stream, the base token by id,
/// symbol and denom, and the pair contract.
pub fn topics_for(trade: &BroadcastTrade) -> Vec<String> {
    let mut topics = vec![
        "trades.stream".to_string(),
        format!("trades.stream.token:{}", trade.base_token_id),
        format!("trades.stream.token:{}", trade.base_denom),
        format!("trades.stream.pair:{}", trade.pair_contract),
    ];
    if let Some(symbol) = &trade.base_symbol {
        topics.push(format!("trades.stream.token:{}", symbol));
    }
    topics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::TradeDirection;
    use chrono::{TimeZone, Utc};

    fn buy_trade() -> BroadcastTrade {
        BroadcastTrade {
            id: 1,
            created_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 3).unwrap(),
            tx_hash: "AB12".to_string(),
            pair_contract: "zig1pair".to_string(),
            signer: Some("zig1alice".to_string()),
            action: TradeAction::Swap,
            direction: TradeDirection::Buy,
            offer_denom: Some("uzig".to_string()),
            offer_amount_base: Some("1000000".to_string()),
            ask_denom: Some("factory/zig1x/coin".to_string()),
            ask_amount_base: None,
            return_amount_base: Some("250000".to_string()),
            base_token_id: 7,
            base_denom: "factory/zig1x/coin".to_string(),
            base_symbol: Some("COIN".to_string()),
            base_exponent: 6,
            quote_denom: "uzig".to_string(),
            quote_exponent: 6,
        }
    }

    #[test]
    fn control_protocol_round_trip() {
        let op = parse_control(r#"{"op":"subscribe","topic":"trades.stream"}"#).unwrap();
        assert_eq!(op, ControlOp::Subscribe("trades.stream".to_string()));
        let ack: serde_json::Value = serde_json::from_str(&ack_frame(&op)).unwrap();
        assert_eq!(ack["ok"], true);
        assert_eq!(ack["subscribed"], "trades.stream");

        let op = parse_control(r#"{"op":"unsubscribe","topic":"t"}"#).unwrap();
        let ack: serde_json::Value = serde_json::from_str(&ack_frame(&op)).unwrap();
        assert_eq!(ack["ok"], true);
        assert_eq!(ack["unsubscribed"], "t");

        assert_eq!(parse_control(r#"{"op":"noop"}"#), Err("unknown_op"));
        assert_eq!(parse_control("not json"), Err("invalid_json"));

        let err: serde_json::Value = serde_json::from_str(&error_frame("unknown_op")).unwrap();
        assert_eq!(err["ok"], false);
        assert_eq!(err["error"], "unknown_op");
    }

    #[test]
    fn hello_frame_names_the_service() {
        let hello: serde_json::Value = serde_json::from_str(&hello_frame()).unwrap();
        assert_eq!(hello["ok"], true);
        assert_eq!(hello["hello"], "degenter-ws");
        assert_eq!(hello["path"], "/ws");
    }

    #[test]
    fn shaped_swap_carries_strings_and_display_floats() {
        let frame = shape_trade(&buy_trade(), 0.5);
        assert_eq!(frame["type"], "trade");

        let data = &frame["data"];
        assert_eq!(data["txHash"], "AB12");
        assert_eq!(data["direction"], "buy");
        // Base amounts stay strings, display amounts become floats.
        assert_eq!(data["offerAmountBase"], "1000000");
        assert_eq!(data["offerAmount"], 1.0);
        assert_eq!(data["returnAmountBase"], "250000");
        assert_eq!(data["returnAmount"], 0.25);
        assert_eq!(data["valueNative"], 1.0);
        assert_eq!(data["valueUsd"], 0.5);
    }

    #[test]
    fn liquidity_actions_have_zero_value() {
        let mut trade = buy_trade();
        trade.action = TradeAction::Provide;
        trade.direction = TradeDirection::Provide;
        trade.offer_denom = None;
        trade.offer_amount_base = None;
        trade.ask_denom = None;
        trade.return_amount_base = Some("500000".to_string());

        let frame = shape_trade(&trade, 1.0);
        assert_eq!(frame["data"]["valueNative"], 0.0);
        assert_eq!(frame["data"]["valueUsd"], 0.0);
        assert_eq!(frame["data"]["returnAmountBase"], "500000");
    }

    #[test]
    fn topics_cover_global_token_and_pair() {
        let topics = topics_for(&buy_trade());
        assert!(topics.contains(&"trades.stream".to_string()));
        assert!(topics.contains(&"trades.stream.token:7".to_string()));
        assert!(topics.contains(&"trades.stream.token:COIN".to_string()));
        assert!(topics.contains(&"trades.stream.token:factory/zig1x/coin".to_string()));
        assert!(topics.contains(&"trades.stream.pair:zig1pair".to_string()));
    }
}

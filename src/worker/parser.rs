//! Block-results event parsing.
//!
//! Contract events arrive as loosely-typed attribute lists whose keys drift
//! between DEX versions. Everything is normalized here into `EventAttrs`
//! with typed getters; raw JSON never leaks past this module.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::utils::{digits_or_null, sha256hex, UZIG};

/// One leg of a pool: a denom and a base-unit amount string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetAmount {
    pub denom: String,
    pub amount_base: String,
}

/// Ordered attribute map of a single event. Keys may repeat; getters return
/// the first occurrence.
#[derive(Debug, Clone)]
pub struct EventAttrs(Vec<(String, String)>);

impl EventAttrs {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }

    fn from_json(attributes: Option<&Value>) -> Self {
        let mut pairs = Vec::new();
        if let Some(attrs) = attributes.and_then(Value::as_array) {
            for attr in attrs {
                let key = attr.get("key").and_then(Value::as_str);
                let value = attr.get("value").and_then(Value::as_str);
                if let (Some(k), Some(v)) = (key, value) {
                    pairs.push((k.to_string(), v.to_string()));
                }
            }
        }
        Self(pairs)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// Attribute value accepted only if it is a pure digit string.
    pub fn digits(&self, key: &str) -> Option<String> {
        self.get(key).and_then(digits_or_null)
    }
}

/// A single typed event with its attribute map.
#[derive(Debug, Clone)]
pub struct ContractEvent {
    pub kind: String,
    pub attrs: EventAttrs,
}

/// All events of one transaction, with the node-convention tx hash.
#[derive(Debug, Clone)]
pub struct TxEvents {
    pub tx_index: usize,
    pub tx_hash: String,
    pub events: Vec<ContractEvent>,
}

/// Parsed view of a block plus its results.
#[derive(Debug, Clone)]
pub struct ParsedBlock {
    pub height: i64,
    pub time: DateTime<Utc>,
    pub txs: Vec<TxEvents>,
}

/// Pair the opaque block and block-results payloads into ordered per-tx
/// event lists. Transactions whose results are missing get an empty event
/// list rather than failing the block.
pub fn parse_block_results(block: &Value, results: &Value) -> Result<ParsedBlock> {
    let header = block.get("header").context("block missing header")?;

    let height = header
        .get("height")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<i64>().ok())
        .context("block header missing height")?;

    let time = header
        .get("time")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .context("block header missing time")?;

    let raw_txs: Vec<&str> = block
        .pointer("/data/txs")
        .and_then(Value::as_array)
        .map(|txs| txs.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let empty = Vec::new();
    let tx_results = results
        .get("txs_results")
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    let mut txs = Vec::with_capacity(raw_txs.len());
    for (tx_index, raw) in raw_txs.iter().enumerate() {
        let tx_bytes = match BASE64.decode(raw) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("Skipping undecodable tx {} in block {}: {}", tx_index, height, e);
                continue;
            },
        };
        let tx_hash = sha256hex(&tx_bytes);

        let events = tx_results
            .get(tx_index)
            .map(parse_tx_events)
            .unwrap_or_default();

        txs.push(TxEvents {
            tx_index,
            tx_hash,
            events,
        });
    }

    Ok(ParsedBlock { height, time, txs })
}

fn parse_tx_events(tx_result: &Value) -> Vec<ContractEvent> {
    // Failed transactions keep their result entry but emit no state changes.
    let code = tx_result.get("code").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        return Vec::new();
    }

    tx_result
        .get("events")
        .and_then(Value::as_array)
        .map(|events| {
            events
                .iter()
                .filter_map(|ev| {
                    let kind = ev.get("type").and_then(Value::as_str)?;
                    Some(ContractEvent {
                        kind: kind.to_string(),
                        attrs: EventAttrs::from_json(ev.get("attributes")),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// All `wasm` events whose `action` attribute matches, preserving order.
pub fn wasm_by_action<'a>(events: &'a [ContractEvent], action: &str) -> Vec<&'a ContractEvent> {
    events
        .iter()
        .filter(|ev| ev.kind == "wasm" && ev.attrs.get("action") == Some(action))
        .collect()
}

/// Map msg_index -> signer from the `message` events, for attributing the
/// on-chain EOA to contract events that share the index.
pub fn build_msg_sender_map(events: &[ContractEvent]) -> FxHashMap<u32, String> {
    let mut map = FxHashMap::default();
    for ev in events {
        if ev.kind != "message" {
            continue;
        }
        if let Some(sender) = ev.attrs.get("sender") {
            let idx = ev.attrs.get_u32("msg_index").unwrap_or(0);
            map.entry(idx).or_insert_with(|| sender.to_string());
        }
    }
    map
}

/// Split a `pair` attribute into (base, quote).
///
/// Accepted forms: `"<a>-<b>"` and `"<a>, <b>"`. The native unit is always
/// the quote; otherwise the lexically greater denom takes the quote side,
/// with the right-hand side winning ties.
pub fn normalize_pair(pair_attr: &str) -> Option<(String, String)> {
    let (a, b) = if let Some((a, b)) = pair_attr.split_once(", ") {
        (a.trim(), b.trim())
    } else {
        let (a, b) = pair_attr.split_once('-')?;
        (a.trim(), b.trim())
    };

    if a.is_empty() || b.is_empty() {
        return None;
    }

    if a == UZIG {
        return Some((b.to_string(), a.to_string()));
    }
    if b == UZIG {
        return Some((a.to_string(), b.to_string()));
    }

    if a > b {
        Some((b.to_string(), a.to_string()))
    } else {
        Some((a.to_string(), b.to_string()))
    }
}

/// Parse a `denom:amount,denom:amount` reserves attribute. Always returns
/// two legs; unparseable legs are None.
pub fn parse_reserves_kv(s: &str) -> Vec<Option<AssetAmount>> {
    let mut legs: Vec<Option<AssetAmount>> = s
        .split(',')
        .take(2)
        .map(|entry| {
            let (denom, amount) = entry.trim().split_once(':')?;
            let amount = digits_or_null(amount.trim())?;
            let denom = denom.trim();
            if denom.is_empty() {
                return None;
            }
            Some(AssetAmount {
                denom: denom.to_string(),
                amount_base: amount,
            })
        })
        .collect();
    legs.resize(2, None);
    legs
}

/// Parse a coin-list attribute (`"1000000uzig, 250000factory/..."`): each
/// entry is a digit run followed by the denom. Always two legs, missing
/// legs None.
pub fn parse_assets_list(s: &str) -> Vec<Option<AssetAmount>> {
    let mut legs: Vec<Option<AssetAmount>> = s
        .split(',')
        .take(2)
        .map(|entry| {
            let entry = entry.trim();
            let split_at = entry.bytes().take_while(|b| b.is_ascii_digit()).count();
            if split_at == 0 || split_at == entry.len() {
                return None;
            }
            let (amount, denom) = entry.split_at(split_at);
            Some(AssetAmount {
                denom: denom.to_string(),
                amount_base: amount.to_string(),
            })
        })
        .collect();
    legs.resize(2, None);
    legs
}

/// Extract the two reserve legs of a swap/liquidity event.
///
/// Fallback order: direct `reserve_asset{1,2}_denom/amount` attributes,
/// then the structured `reserves`, `assets`, or `refund_assets` attribute.
pub fn extract_reserves(attrs: &EventAttrs) -> Vec<Option<AssetAmount>> {
    let direct = |n: &str| -> Option<AssetAmount> {
        let denom = attrs.get(&format!("reserve_asset{}_denom", n))?;
        let amount = attrs.digits(&format!("reserve_asset{}_amount", n))?;
        Some(AssetAmount {
            denom: denom.to_string(),
            amount_base: amount,
        })
    };

    let legs = vec![direct("1"), direct("2")];
    if legs.iter().any(Option::is_some) {
        return legs;
    }

    if let Some(kv) = attrs.get("reserves") {
        let parsed = parse_reserves_kv(kv);
        if parsed.iter().any(Option::is_some) {
            return parsed;
        }
    }

    for key in ["assets", "refund_assets"] {
        if let Some(list) = attrs.get(key) {
            let parsed = parse_assets_list(list);
            if parsed.iter().any(Option::is_some) {
                return parsed;
            }
        }
    }

    vec![None, None]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> EventAttrs {
        EventAttrs::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn wasm(action: &str) -> ContractEvent {
        ContractEvent {
            kind: "wasm".to_string(),
            attrs: attrs(&[("action", action)]),
        }
    }

    #[test]
    fn wasm_by_action_filters_and_preserves_order() {
        let events = vec![
            wasm("swap"),
            ContractEvent {
                kind: "message".to_string(),
                attrs: attrs(&[("action", "swap")]),
            },
            wasm("provide_liquidity"),
            wasm("swap"),
        ];
        let swaps = wasm_by_action(&events, "swap");
        assert_eq!(swaps.len(), 2);
        assert!(swaps.iter().all(|ev| ev.kind == "wasm"));
    }

    #[test]
    fn sender_map_keys_on_msg_index() {
        let events = vec![
            ContractEvent {
                kind: "message".to_string(),
                attrs: attrs(&[("sender", "zig1alice"), ("msg_index", "0")]),
            },
            ContractEvent {
                kind: "message".to_string(),
                attrs: attrs(&[("sender", "zig1bob"), ("msg_index", "1")]),
            },
            // Repeated message event for the same index must not overwrite.
            ContractEvent {
                kind: "message".to_string(),
                attrs: attrs(&[("sender", "zig1carol"), ("msg_index", "0")]),
            },
        ];
        let map = build_msg_sender_map(&events);
        assert_eq!(map.get(&0).map(String::as_str), Some("zig1alice"));
        assert_eq!(map.get(&1).map(String::as_str), Some("zig1bob"));
    }

    #[test]
    fn pair_normalization_puts_uzig_on_quote_side() {
        assert_eq!(
            normalize_pair("factory/zig1x/coin-uzig"),
            Some(("factory/zig1x/coin".to_string(), "uzig".to_string()))
        );
        assert_eq!(
            normalize_pair("uzig-factory/zig1x/coin"),
            Some(("factory/zig1x/coin".to_string(), "uzig".to_string()))
        );
        assert_eq!(
            normalize_pair("uzig, ibc/ABCD"),
            Some(("ibc/ABCD".to_string(), "uzig".to_string()))
        );
    }

    #[test]
    fn pair_normalization_orders_non_native_lexically() {
        // Lexically greater side becomes the quote.
        assert_eq!(
            normalize_pair("factory/zig1x/aaa, ibc/BBBB"),
            Some(("factory/zig1x/aaa".to_string(), "ibc/BBBB".to_string()))
        );
        assert_eq!(
            normalize_pair("ibc/BBBB, factory/zig1x/aaa"),
            Some(("factory/zig1x/aaa".to_string(), "ibc/BBBB".to_string()))
        );
        assert_eq!(normalize_pair(""), None);
        assert_eq!(normalize_pair("loneside"), None);
    }

    #[test]
    fn reserves_kv_parses_two_legs() {
        let legs = parse_reserves_kv("uzig:1000000,factory/zig1x/coin:250000");
        assert_eq!(
            legs[0],
            Some(AssetAmount {
                denom: "uzig".to_string(),
                amount_base: "1000000".to_string(),
            })
        );
        assert_eq!(
            legs[1],
            Some(AssetAmount {
                denom: "factory/zig1x/coin".to_string(),
                amount_base: "250000".to_string(),
            })
        );
    }

    #[test]
    fn reserves_kv_nulls_bad_legs() {
        let legs = parse_reserves_kv("uzig:10x0,factory/zig1x/coin:250000");
        assert_eq!(legs[0], None);
        assert!(legs[1].is_some());

        let legs = parse_reserves_kv("uzig:1000000");
        assert!(legs[0].is_some());
        assert_eq!(legs[1], None);
    }

    #[test]
    fn assets_list_splits_amount_prefix() {
        let legs = parse_assets_list("1000000uzig, 250000factory/zig1x/coin");
        assert_eq!(
            legs[0],
            Some(AssetAmount {
                denom: "uzig".to_string(),
                amount_base: "1000000".to_string(),
            })
        );
        assert_eq!(
            legs[1],
            Some(AssetAmount {
                denom: "factory/zig1x/coin".to_string(),
                amount_base: "250000".to_string(),
            })
        );

        // All-digit or no-digit entries are not coins.
        let legs = parse_assets_list("1000000, uzig");
        assert_eq!(legs[0], None);
        assert_eq!(legs[1], None);
    }

    #[test]
    fn reserve_extraction_prefers_direct_attributes() {
        let ev = attrs(&[
            ("reserve_asset1_denom", "uzig"),
            ("reserve_asset1_amount", "1000000"),
            ("reserve_asset2_denom", "factory/zig1x/coin"),
            ("reserve_asset2_amount", "250000"),
            ("reserves", "uzig:5,factory/zig1x/coin:5"),
        ]);
        let legs = extract_reserves(&ev);
        assert_eq!(legs[0].as_ref().unwrap().amount_base, "1000000");
        assert_eq!(legs[1].as_ref().unwrap().amount_base, "250000");
    }

    #[test]
    fn reserve_extraction_falls_back_to_structured_attributes() {
        let ev = attrs(&[("reserves", "uzig:1000000,factory/zig1x/coin:250000")]);
        let legs = extract_reserves(&ev);
        assert_eq!(legs[0].as_ref().unwrap().denom, "uzig");

        let ev = attrs(&[("assets", "1000000uzig, 250000factory/zig1x/coin")]);
        let legs = extract_reserves(&ev);
        assert_eq!(legs[1].as_ref().unwrap().denom, "factory/zig1x/coin");

        let ev = attrs(&[("unrelated", "x")]);
        assert_eq!(extract_reserves(&ev), vec![None, None]);
    }

    #[test]
    fn block_parsing_hashes_txs_and_pairs_results() {
        let tx = BASE64.encode(b"tx-bytes");
        let block = serde_json::json!({
            "header": { "height": "42", "time": "2025-06-01T12:34:56Z" },
            "data": { "txs": [tx] }
        });
        let results = serde_json::json!({
            "txs_results": [
                {
                    "code": 0,
                    "events": [
                        { "type": "wasm", "attributes": [
                            { "key": "action", "value": "swap" }
                        ]}
                    ]
                }
            ]
        });

        let parsed = parse_block_results(&block, &results).unwrap();
        assert_eq!(parsed.height, 42);
        assert_eq!(parsed.txs.len(), 1);
        assert_eq!(parsed.txs[0].tx_hash, sha256hex(b"tx-bytes"));
        assert_eq!(parsed.txs[0].events.len(), 1);
        assert_eq!(parsed.txs[0].events[0].attrs.get("action"), Some("swap"));
    }

    #[test]
    fn failed_txs_contribute_no_events() {
        let tx = BASE64.encode(b"failing");
        let block = serde_json::json!({
            "header": { "height": "7", "time": "2025-06-01T00:00:00Z" },
            "data": { "txs": [tx] }
        });
        let results = serde_json::json!({
            "txs_results": [
                { "code": 5, "events": [ { "type": "wasm", "attributes": [] } ] }
            ]
        });

        let parsed = parse_block_results(&block, &results).unwrap();
        assert!(parsed.txs[0].events.is_empty());
    }
}

//! Per-block task records.
//!
//! Scanning a transaction yields tagged requests instead of closures so the
//! drain can be instrumented and replayed: pool upserts (phase 1), trades
//! (phase 2), and first-sight metadata fetches (low priority).

use chrono::{DateTime, Utc};
use log::warn;

use crate::db::models::{NewPool, PairType, TradeAction};
use crate::worker::parser::{
    build_msg_sender_map, extract_reserves, normalize_pair, wasm_by_action, AssetAmount,
    ContractEvent, TxEvents,
};

/// A trade extracted from a swap or liquidity event, before pool
/// resolution.
#[derive(Debug, Clone)]
pub struct TradeIntent {
    pub pair_contract: String,
    pub action: TradeAction,
    pub tx_hash: String,
    pub msg_index: i32,
    pub signer: Option<String>,
    pub is_router: bool,
    pub offer_denom: Option<String>,
    pub offer_amount_base: Option<String>,
    pub ask_denom: Option<String>,
    pub ask_amount_base: Option<String>,
    pub return_amount_base: Option<String>,
    pub reserves: Vec<Option<AssetAmount>>,
    pub height: i64,
    pub created_at: DateTime<Utc>,
}

/// Task lists produced by scanning one transaction.
#[derive(Debug, Default)]
pub struct ScannedTx {
    pub pool_upserts: Vec<NewPool>,
    pub trades: Vec<TradeIntent>,
    pub denoms: Vec<String>,
}

/// Scan one transaction's events into task records.
///
/// Malformed events are logged and skipped; a single bad event never drops
/// the rest of the transaction.
pub fn scan_tx(
    tx: &TxEvents,
    height: i64,
    block_time: DateTime<Utc>,
    router_addr: Option<&str>,
) -> ScannedTx {
    let mut out = ScannedTx::default();
    let senders = build_msg_sender_map(&tx.events);

    for ev in wasm_by_action(&tx.events, "create_pair") {
        match scan_create_pair(ev, &tx.events, tx, height, block_time) {
            Some(pool) => {
                out.denoms.push(pool.base_denom.clone());
                out.denoms.push(pool.quote_denom.clone());
                out.pool_upserts.push(pool);
            },
            None => {
                warn!("Skipping malformed create_pair event in tx {}", tx.tx_hash);
            },
        }
    }

    for ev in wasm_by_action(&tx.events, "swap") {
        match scan_swap(ev, tx, height, block_time, router_addr, &senders) {
            Some(trade) => {
                if let Some(d) = &trade.offer_denom {
                    out.denoms.push(d.clone());
                }
                if let Some(d) = &trade.ask_denom {
                    out.denoms.push(d.clone());
                }
                out.trades.push(trade);
            },
            None => warn!("Skipping malformed swap event in tx {}", tx.tx_hash),
        }
    }

    for (action_attr, action) in [
        ("provide_liquidity", TradeAction::Provide),
        ("withdraw_liquidity", TradeAction::Withdraw),
    ] {
        for ev in wasm_by_action(&tx.events, action_attr) {
            match scan_liquidity(ev, action, tx, height, block_time, &senders) {
                Some(trade) => out.trades.push(trade),
                None => {
                    warn!("Skipping malformed {} event in tx {}", action_attr, tx.tx_hash)
                },
            }
        }
    }

    out
}

fn scan_create_pair(
    ev: &ContractEvent,
    all_events: &[ContractEvent],
    tx: &TxEvents,
    height: i64,
    block_time: DateTime<Utc>,
) -> Option<NewPool> {
    let (base_denom, quote_denom) = normalize_pair(ev.attrs.get("pair")?)?;

    // The factory event names the new pair contract directly on recent DEX
    // versions; older ones only instantiate it in the same tx.
    let pair_contract = ev
        .attrs
        .get("pair_contract_addr")
        .or_else(|| {
            all_events
                .iter()
                .find(|e| e.kind == "instantiate")
                .and_then(|e| e.attrs.get("_contract_address"))
        })?
        .to_string();

    let factory_contract = ev.attrs.get("_contract_address")?.to_string();

    let pair_type = ev
        .attrs
        .get("pair_type")
        .map(PairType::from_str_or_default)
        .unwrap_or(PairType::Xyk);

    Some(NewPool {
        pair_contract,
        factory_contract,
        base_denom,
        quote_denom,
        pair_type,
        creator: ev.attrs.get("creator").map(str::to_string),
        tx_hash: tx.tx_hash.clone(),
        block_height: height,
        created_at: block_time,
    })
}

fn scan_swap(
    ev: &ContractEvent,
    tx: &TxEvents,
    height: i64,
    block_time: DateTime<Utc>,
    router_addr: Option<&str>,
    senders: &rustc_hash::FxHashMap<u32, String>,
) -> Option<TradeIntent> {
    let pair_contract = ev.attrs.get("_contract_address")?.to_string();
    let msg_index = ev.attrs.get_u32("msg_index").unwrap_or(0);

    let event_sender = ev.attrs.get("sender");
    let signer = senders
        .get(&msg_index)
        .map(String::as_str)
        .or(event_sender)
        .map(str::to_string);

    let is_router = is_router_trade(ev, &tx.events, msg_index, router_addr);

    Some(TradeIntent {
        pair_contract,
        action: TradeAction::Swap,
        tx_hash: tx.tx_hash.clone(),
        msg_index: msg_index as i32,
        signer,
        is_router,
        offer_denom: ev.attrs.get("offer_asset").map(str::to_string),
        offer_amount_base: ev.attrs.digits("offer_amount"),
        ask_denom: ev.attrs.get("ask_asset").map(str::to_string),
        ask_amount_base: ev.attrs.digits("ask_amount"),
        return_amount_base: ev.attrs.digits("return_amount"),
        reserves: extract_reserves(&ev.attrs),
        height,
        created_at: block_time,
    })
}

fn scan_liquidity(
    ev: &ContractEvent,
    action: TradeAction,
    tx: &TxEvents,
    height: i64,
    block_time: DateTime<Utc>,
    senders: &rustc_hash::FxHashMap<u32, String>,
) -> Option<TradeIntent> {
    let pair_contract = ev.attrs.get("_contract_address")?.to_string();
    let msg_index = ev.attrs.get_u32("msg_index").unwrap_or(0);

    let signer = senders
        .get(&msg_index)
        .map(String::as_str)
        .or_else(|| ev.attrs.get("sender"))
        .map(str::to_string);

    Some(TradeIntent {
        pair_contract,
        action,
        tx_hash: tx.tx_hash.clone(),
        msg_index: msg_index as i32,
        signer,
        is_router: false,
        offer_denom: None,
        offer_amount_base: None,
        ask_denom: None,
        ask_amount_base: None,
        // LP share minted or burned rides in the return column.
        return_amount_base: ev.attrs.digits("share"),
        reserves: extract_reserves(&ev.attrs),
        height,
        created_at: block_time,
    })
}

/// A swap is router-attributed when its sender is the router, or when any
/// execute event of the same message targets the router contract.
fn is_router_trade(
    ev: &ContractEvent,
    all_events: &[ContractEvent],
    msg_index: u32,
    router_addr: Option<&str>,
) -> bool {
    let Some(router) = router_addr else {
        return false;
    };

    if ev.attrs.get("sender") == Some(router) {
        return true;
    }

    all_events.iter().any(|e| {
        e.kind == "execute"
            && e.attrs.get("_contract_address") == Some(router)
            && e.attrs.get_u32("msg_index").unwrap_or(0) == msg_index
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::parser::EventAttrs;
    use chrono::TimeZone;

    const ROUTER: &str = "zig1router";

    fn event(kind: &str, pairs: &[(&str, &str)]) -> ContractEvent {
        ContractEvent {
            kind: kind.to_string(),
            attrs: EventAttrs::new(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
        }
    }

    fn tx(events: Vec<ContractEvent>) -> TxEvents {
        TxEvents {
            tx_index: 0,
            tx_hash: "AB12".to_string(),
            events,
        }
    }

    fn block_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 3).unwrap()
    }

    #[test]
    fn create_pair_produces_pool_upsert_and_meta_denoms() {
        let t = tx(vec![event(
            "wasm",
            &[
                ("_contract_address", "zig1factory"),
                ("action", "create_pair"),
                ("pair", "factory/zig1x/coin-uzig"),
                ("pair_contract_addr", "zig1pair"),
                ("pair_type", "xyk"),
                ("creator", "zig1alice"),
            ],
        )]);

        let scanned = scan_tx(&t, 100, block_time(), None);
        assert_eq!(scanned.pool_upserts.len(), 1);
        let pool = &scanned.pool_upserts[0];
        assert_eq!(pool.pair_contract, "zig1pair");
        assert_eq!(pool.factory_contract, "zig1factory");
        assert_eq!(pool.base_denom, "factory/zig1x/coin");
        assert_eq!(pool.quote_denom, "uzig");
        assert!(pool.is_uzig_quote());
        assert_eq!(scanned.denoms.len(), 2);
    }

    #[test]
    fn create_pair_falls_back_to_instantiate_address() {
        let t = tx(vec![
            event(
                "wasm",
                &[
                    ("_contract_address", "zig1factory"),
                    ("action", "create_pair"),
                    ("pair", "uzig-ibc/ABCD"),
                ],
            ),
            event("instantiate", &[("_contract_address", "zig1newpair")]),
        ]);

        let scanned = scan_tx(&t, 100, block_time(), None);
        assert_eq!(scanned.pool_upserts[0].pair_contract, "zig1newpair");
    }

    #[test]
    fn swap_scan_collects_amounts_and_signer() {
        let t = tx(vec![
            event("message", &[("sender", "zig1alice"), ("msg_index", "0")]),
            event(
                "wasm",
                &[
                    ("_contract_address", "zig1pair"),
                    ("action", "swap"),
                    ("offer_asset", "uzig"),
                    ("offer_amount", "1000000"),
                    ("ask_asset", "factory/zig1x/coin"),
                    ("return_amount", "250000"),
                    ("reserve_asset1_denom", "uzig"),
                    ("reserve_asset1_amount", "1000000"),
                    ("reserve_asset2_denom", "factory/zig1x/coin"),
                    ("reserve_asset2_amount", "250000"),
                ],
            ),
        ]);

        let scanned = scan_tx(&t, 100, block_time(), None);
        assert_eq!(scanned.trades.len(), 1);
        let trade = &scanned.trades[0];
        assert_eq!(trade.action, TradeAction::Swap);
        assert_eq!(trade.signer.as_deref(), Some("zig1alice"));
        assert_eq!(trade.offer_amount_base.as_deref(), Some("1000000"));
        assert_eq!(trade.return_amount_base.as_deref(), Some("250000"));
        assert!(!trade.is_router);
        assert!(trade.reserves.iter().all(Option::is_some));
    }

    #[test]
    fn router_detected_by_sender_attribute() {
        let t = tx(vec![event(
            "wasm",
            &[
                ("_contract_address", "zig1pair"),
                ("action", "swap"),
                ("sender", ROUTER),
                ("offer_asset", "uzig"),
                ("offer_amount", "1000000"),
            ],
        )]);

        let scanned = scan_tx(&t, 100, block_time(), Some(ROUTER));
        assert!(scanned.trades[0].is_router);
    }

    #[test]
    fn router_detected_by_execute_event_with_same_msg_index() {
        let t = tx(vec![
            event(
                "execute",
                &[("_contract_address", ROUTER), ("msg_index", "1")],
            ),
            event(
                "wasm",
                &[
                    ("_contract_address", "zig1pair"),
                    ("action", "swap"),
                    ("sender", "zig1alice"),
                    ("msg_index", "1"),
                    ("offer_asset", "uzig"),
                    ("offer_amount", "1000000"),
                ],
            ),
        ]);

        let scanned = scan_tx(&t, 100, block_time(), Some(ROUTER));
        assert!(scanned.trades[0].is_router);

        // Same tx, different msg_index: no router attribution.
        let t = tx(vec![
            event(
                "execute",
                &[("_contract_address", ROUTER), ("msg_index", "0")],
            ),
            event(
                "wasm",
                &[
                    ("_contract_address", "zig1pair"),
                    ("action", "swap"),
                    ("sender", "zig1alice"),
                    ("msg_index", "1"),
                    ("offer_asset", "uzig"),
                    ("offer_amount", "1000000"),
                ],
            ),
        ]);
        let scanned = scan_tx(&t, 100, block_time(), Some(ROUTER));
        assert!(!scanned.trades[0].is_router);
    }

    #[test]
    fn provide_liquidity_maps_share_to_return_amount() {
        let t = tx(vec![event(
            "wasm",
            &[
                ("_contract_address", "zig1pair"),
                ("action", "provide_liquidity"),
                ("assets", "1000000uzig, 250000factory/zig1x/coin"),
                ("share", "500000"),
            ],
        )]);

        let scanned = scan_tx(&t, 100, block_time(), None);
        let trade = &scanned.trades[0];
        assert_eq!(trade.action, TradeAction::Provide);
        assert_eq!(trade.offer_amount_base, None);
        assert_eq!(trade.ask_amount_base, None);
        assert_eq!(trade.return_amount_base.as_deref(), Some("500000"));
        assert!(trade.reserves.iter().all(Option::is_some));
    }

    #[test]
    fn malformed_event_skips_without_dropping_the_rest() {
        let t = tx(vec![
            // No pair attribute: malformed create_pair.
            event(
                "wasm",
                &[("_contract_address", "zig1factory"), ("action", "create_pair")],
            ),
            event(
                "wasm",
                &[
                    ("_contract_address", "zig1pair"),
                    ("action", "swap"),
                    ("offer_asset", "uzig"),
                    ("offer_amount", "1000000"),
                ],
            ),
        ]);

        let scanned = scan_tx(&t, 100, block_time(), None);
        assert!(scanned.pool_upserts.is_empty());
        assert_eq!(scanned.trades.len(), 1);
    }
}

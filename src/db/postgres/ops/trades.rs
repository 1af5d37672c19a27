use std::collections::HashSet;

use chrono::{DateTime, Utc};
use log::error;

use crate::db::models::{
    BroadcastTrade, NewTrade, TradeAction, TradeDirection,
};
use crate::db::postgres::PostgresClient;

/// Natural key of a trade row.
pub(crate) type TradeKey = (String, i64, i32, DateTime<Utc>);

pub(crate) fn trade_key(trade: &NewTrade) -> TradeKey {
    (
        trade.tx_hash.clone(),
        trade.pool_id,
        trade.msg_index,
        trade.created_at,
    )
}

/// Map the keys RETURNING handed back onto per-input inserted flags.
///
/// A key is consumed on first match, so an intra-batch duplicate of the
/// same natural key is flagged new at most once.
pub(crate) fn inserted_flags(trades: &[NewTrade], new_keys: &mut HashSet<TradeKey>) -> Vec<bool> {
    trades
        .iter()
        .map(|trade| new_keys.remove(&trade_key(trade)))
        .collect()
}

impl PostgresClient {
    /// Batched, deduplicated trade insertion (true batch insert with
    /// multi-row VALUES). The natural-key conflict target makes block
    /// replays a no-op; the returned flags mark which inputs actually
    /// created a row, so callers can apply once-only side writes.
    pub async fn insert_trades(&self, trades: &[NewTrade]) -> anyhow::Result<Vec<bool>> {
        if trades.is_empty() {
            return Ok(vec![]);
        }

        const COLS_PER_ROW: usize = 19;
        const BATCH_SIZE: usize = 200; // Smaller batches due to large number of columns

        let client = self.pool.get().await?;
        let mut flags = Vec::with_capacity(trades.len());

        for chunk in trades.chunks(BATCH_SIZE) {
            let values_clauses: Vec<String> = chunk
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    let start = i * COLS_PER_ROW + 1;
                    let placeholders: Vec<String> = (start..start + COLS_PER_ROW)
                        .map(|n| format!("${}", n))
                        .collect();
                    format!("({})", placeholders.join(", "))
                })
                .collect();

            let query = format!(
                r#"
                INSERT INTO indexer.trades (
                    pool_id, tx_hash, msg_index, action, direction,
                    offer_denom, offer_amount_base, ask_denom, ask_amount_base,
                    return_amount_base, reserve1_denom, reserve1_amount,
                    reserve2_denom, reserve2_amount, size_class, is_router,
                    signer, height, created_at
                ) VALUES {}
                ON CONFLICT (tx_hash, pool_id, msg_index, created_at) DO NOTHING
                RETURNING tx_hash, pool_id, msg_index, created_at
                "#,
                values_clauses.join(", ")
            );

            // Enum string forms must outlive the params slice.
            let mut strings: Vec<(String, String, Option<String>)> =
                Vec::with_capacity(chunk.len());
            for trade in chunk {
                strings.push((
                    trade.action.as_str().to_string(),
                    trade.direction.as_str().to_string(),
                    trade.size_class.map(|c| c.as_str().to_string()),
                ));
            }

            let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
                Vec::with_capacity(chunk.len() * COLS_PER_ROW);

            for (i, trade) in chunk.iter().enumerate() {
                params.push(&trade.pool_id);
                params.push(&trade.tx_hash);
                params.push(&trade.msg_index);
                params.push(&strings[i].0);
                params.push(&strings[i].1);
                params.push(&trade.offer_denom);
                params.push(&trade.offer_amount_base);
                params.push(&trade.ask_denom);
                params.push(&trade.ask_amount_base);
                params.push(&trade.return_amount_base);
                params.push(&trade.reserve1_denom);
                params.push(&trade.reserve1_amount);
                params.push(&trade.reserve2_denom);
                params.push(&trade.reserve2_amount);
                params.push(&strings[i].2);
                params.push(&trade.is_router);
                params.push(&trade.signer);
                params.push(&trade.height);
                params.push(&trade.created_at);
            }

            let rows = client.query(&query, &params).await.map_err(|e| {
                error!("Failed to batch insert {} trades: {:?}", chunk.len(), e);
                e
            })?;

            let mut new_keys: HashSet<TradeKey> = rows
                .iter()
                .map(|r| {
                    (
                        r.get("tx_hash"),
                        r.get("pool_id"),
                        r.get("msg_index"),
                        r.get("created_at"),
                    )
                })
                .collect();

            flags.extend(inserted_flags(chunk, &mut new_keys));
        }

        Ok(flags)
    }

    /// Trades strictly after the watermark, ascending, joined with their
    /// pool and token legs for broadcast shaping.
    pub async fn trades_since(
        &self,
        watermark: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<BroadcastTrade>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT
                t.id, t.created_at, t.tx_hash, t.signer, t.action, t.direction,
                t.offer_denom, t.offer_amount_base, t.ask_denom, t.ask_amount_base,
                t.return_amount_base,
                p.pair_contract, p.base_token_id, p.base_denom, p.quote_denom,
                bt.symbol AS base_symbol, bt.exponent AS base_exponent,
                qt.exponent AS quote_exponent
            FROM indexer.trades t
            JOIN indexer.pools p ON p.id = t.pool_id
            JOIN indexer.tokens bt ON bt.id = p.base_token_id
            JOIN indexer.tokens qt ON qt.id = p.quote_token_id
            WHERE t.created_at > $1
            ORDER BY t.created_at ASC, t.id ASC
            LIMIT $2
        "#;

        let rows = client.query(query, &[&watermark, &limit]).await?;
        Ok(rows.iter().map(row_to_broadcast_trade).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::SizeClass;
    use chrono::TimeZone;

    fn trade(tx_hash: &str, msg_index: i32) -> NewTrade {
        NewTrade {
            pool_id: 1,
            tx_hash: tx_hash.to_string(),
            msg_index,
            action: TradeAction::Swap,
            direction: TradeDirection::Buy,
            offer_denom: Some("uzig".to_string()),
            offer_amount_base: Some("1000000".to_string()),
            ask_denom: Some("factory/zig1x/coin".to_string()),
            ask_amount_base: None,
            return_amount_base: Some("250000".to_string()),
            reserve1_denom: None,
            reserve1_amount: None,
            reserve2_denom: None,
            reserve2_amount: None,
            size_class: Some(SizeClass::Shrimp),
            is_router: false,
            signer: None,
            height: 100,
            created_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 3).unwrap(),
        }
    }

    #[test]
    fn replayed_batch_flags_nothing_as_new() {
        let batch = vec![trade("AA", 0), trade("AA", 1), trade("BB", 0)];

        // First run: the insert returned every key.
        let mut returned: HashSet<TradeKey> = batch.iter().map(trade_key).collect();
        assert_eq!(inserted_flags(&batch, &mut returned), vec![true, true, true]);

        // Replay: every row conflicted, RETURNING came back empty.
        let mut returned = HashSet::new();
        assert_eq!(inserted_flags(&batch, &mut returned), vec![false, false, false]);
    }

    #[test]
    fn intra_batch_duplicate_key_is_new_at_most_once() {
        // Same natural key twice in one batch (retained buffer re-push):
        // the statement inserts it once, so only one input may be flagged.
        let batch = vec![trade("AA", 0), trade("AA", 0)];
        let mut returned: HashSet<TradeKey> = [trade_key(&batch[0])].into_iter().collect();

        assert_eq!(inserted_flags(&batch, &mut returned), vec![true, false]);
    }
}

fn row_to_broadcast_trade(row: &tokio_postgres::Row) -> BroadcastTrade {
    let action: String = row.get("action");
    let direction: String = row.get("direction");
    BroadcastTrade {
        id: row.get("id"),
        created_at: row.get("created_at"),
        tx_hash: row.get("tx_hash"),
        pair_contract: row.get("pair_contract"),
        signer: row.get("signer"),
        action: TradeAction::from_str_or_default(&action),
        direction: TradeDirection::from_str_or_default(&direction),
        offer_denom: row.get("offer_denom"),
        offer_amount_base: row.get("offer_amount_base"),
        ask_denom: row.get("ask_denom"),
        ask_amount_base: row.get("ask_amount_base"),
        return_amount_base: row.get("return_amount_base"),
        base_token_id: row.get("base_token_id"),
        base_denom: row.get("base_denom"),
        base_symbol: row.get("base_symbol"),
        base_exponent: row.get("base_exponent"),
        quote_denom: row.get("quote_denom"),
        quote_exponent: row.get("quote_exponent"),
    }
}

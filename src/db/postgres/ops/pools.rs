use log::error;

use crate::db::models::{NewPool, PairType, Pool, PoolWithTokens, Token, TokenType};
use crate::db::postgres::PostgresClient;

/// Name used for auto-inserted catalogue rows when a factory is unknown.
const UNKNOWN_DEX_NAME: &str = "UnknownDEX";

impl PostgresClient {
    /// Resolve the catalogue id for a factory, inserting an UnknownDEX row
    /// for factories the catalogue has never seen.
    pub async fn resolve_dex_id(&self, factory_contract: &str) -> anyhow::Result<i64> {
        let client = self.pool.get().await?;

        let existing = client
            .query_opt(
                "SELECT id FROM indexer.dex_catalogue WHERE factory_contract = $1",
                &[&factory_contract],
            )
            .await?;

        if let Some(row) = existing {
            return Ok(row.get("id"));
        }

        let query = r#"
            INSERT INTO indexer.dex_catalogue (name, factory_contract)
            VALUES ($1, $2)
            ON CONFLICT (factory_contract) DO UPDATE
                SET factory_contract = EXCLUDED.factory_contract
            RETURNING id
        "#;

        let row = client
            .query_one(query, &[&UNKNOWN_DEX_NAME, &factory_contract])
            .await
            .map_err(|e| {
                error!("Failed to auto-insert dex for factory {}: {:?}", factory_contract, e);
                e
            })?;

        Ok(row.get("id"))
    }

    /// Atomic upsert on pair_contract. Returns (pool_id, inserted); replays
    /// of an already-known pair land on the conflict arm and report
    /// inserted = false so pair_created is not re-announced.
    pub async fn upsert_pool(
        &self,
        pool: &NewPool,
        dex_id: i64,
        base_token_id: i64,
        quote_token_id: i64,
    ) -> anyhow::Result<(i64, bool)> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO indexer.pools (
                pair_contract, dex_id, base_token_id, quote_token_id,
                base_denom, quote_denom, pair_type, is_uzig_quote,
                creator, tx_hash, block_height, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (pair_contract) DO UPDATE
                SET pair_contract = EXCLUDED.pair_contract
            RETURNING id, (xmax = 0) AS inserted
        "#;

        let row = client
            .query_one(
                query,
                &[
                    &pool.pair_contract,
                    &dex_id,
                    &base_token_id,
                    &quote_token_id,
                    &pool.base_denom,
                    &pool.quote_denom,
                    &pool.pair_type.as_str(),
                    &pool.is_uzig_quote(),
                    &pool.creator,
                    &pool.tx_hash,
                    &pool.block_height,
                    &pool.created_at,
                ],
            )
            .await
            .map_err(|e| {
                error!("Failed to upsert pool {}: {:?}", pool.pair_contract, e);
                e
            })?;

        Ok((row.get("id"), row.get("inserted")))
    }

    /// Full pool + token triple for one pair contract.
    pub async fn pool_with_tokens(
        &self,
        pair_contract: &str,
    ) -> anyhow::Result<Option<PoolWithTokens>> {
        let mut found = self.pools_with_tokens(&[pair_contract.to_string()]).await?;
        Ok(found.pop())
    }

    /// Batched pool + token lookup used by the phase-2 prefetch.
    pub async fn pools_with_tokens(
        &self,
        pair_contracts: &[String],
    ) -> anyhow::Result<Vec<PoolWithTokens>> {
        if pair_contracts.is_empty() {
            return Ok(vec![]);
        }

        let client = self.pool.get().await?;
        let query = r#"
            SELECT
                p.id, p.pair_contract, p.dex_id, p.base_token_id, p.quote_token_id,
                p.base_denom, p.quote_denom, p.pair_type, p.is_uzig_quote,
                p.creator, p.tx_hash, p.block_height, p.created_at,
                bt.id AS bt_id, bt.denom AS bt_denom, bt.token_type AS bt_token_type,
                bt.name AS bt_name, bt.symbol AS bt_symbol, bt.display AS bt_display,
                bt.exponent AS bt_exponent, bt.total_supply AS bt_total_supply,
                bt.max_supply AS bt_max_supply, bt.holders_count AS bt_holders_count,
                bt.website AS bt_website, bt.twitter AS bt_twitter,
                bt.telegram AS bt_telegram, bt.created_at AS bt_created_at,
                bt.updated_at AS bt_updated_at,
                qt.id AS qt_id, qt.denom AS qt_denom, qt.token_type AS qt_token_type,
                qt.name AS qt_name, qt.symbol AS qt_symbol, qt.display AS qt_display,
                qt.exponent AS qt_exponent, qt.total_supply AS qt_total_supply,
                qt.max_supply AS qt_max_supply, qt.holders_count AS qt_holders_count,
                qt.website AS qt_website, qt.twitter AS qt_twitter,
                qt.telegram AS qt_telegram, qt.created_at AS qt_created_at,
                qt.updated_at AS qt_updated_at
            FROM indexer.pools p
            JOIN indexer.tokens bt ON bt.id = p.base_token_id
            JOIN indexer.tokens qt ON qt.id = p.quote_token_id
            WHERE p.pair_contract = ANY($1)
        "#;

        let rows = client.query(query, &[&pair_contracts]).await?;
        Ok(rows.iter().map(row_to_pool_with_tokens).collect())
    }

    /// Pool ids with at least one trade since the cutoff, for the periodic
    /// matrix refresh.
    pub async fn active_pool_ids(
        &self,
        since: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<Vec<i64>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT DISTINCT pool_id FROM indexer.trades WHERE created_at >= $1",
                &[&since],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get("pool_id")).collect())
    }

    /// Base token ids of pools with trades since the cutoff.
    pub async fn active_base_token_ids(
        &self,
        since: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<Vec<i64>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT DISTINCT p.base_token_id
                FROM indexer.trades t
                JOIN indexer.pools p ON p.id = t.pool_id
                WHERE t.created_at >= $1
                "#,
                &[&since],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get("base_token_id")).collect())
    }
}

fn row_to_pool_with_tokens(row: &tokio_postgres::Row) -> PoolWithTokens {
    let pair_type: String = row.get("pair_type");
    let pool = Pool {
        id: row.get("id"),
        pair_contract: row.get("pair_contract"),
        dex_id: row.get("dex_id"),
        base_token_id: row.get("base_token_id"),
        quote_token_id: row.get("quote_token_id"),
        base_denom: row.get("base_denom"),
        quote_denom: row.get("quote_denom"),
        pair_type: PairType::from_str_or_default(&pair_type),
        is_uzig_quote: row.get("is_uzig_quote"),
        creator: row.get("creator"),
        tx_hash: row.get("tx_hash"),
        block_height: row.get("block_height"),
        created_at: row.get("created_at"),
    };

    PoolWithTokens {
        pool,
        base: prefixed_token(row, "bt_"),
        quote: prefixed_token(row, "qt_"),
    }
}

fn prefixed_token(row: &tokio_postgres::Row, prefix: &str) -> Token {
    let col = |name: &str| format!("{}{}", prefix, name);
    let token_type: String = row.get(col("token_type").as_str());
    Token {
        id: row.get(col("id").as_str()),
        denom: row.get(col("denom").as_str()),
        token_type: TokenType::from_str_or_default(&token_type),
        name: row.get(col("name").as_str()),
        symbol: row.get(col("symbol").as_str()),
        display: row.get(col("display").as_str()),
        exponent: row.get(col("exponent").as_str()),
        total_supply: row.get(col("total_supply").as_str()),
        max_supply: row.get(col("max_supply").as_str()),
        holders_count: row.get(col("holders_count").as_str()),
        website: row.get(col("website").as_str()),
        twitter: row.get(col("twitter").as_str()),
        telegram: row.get(col("telegram").as_str()),
        created_at: row.get(col("created_at").as_str()),
        updated_at: row.get(col("updated_at").as_str()),
    }
}

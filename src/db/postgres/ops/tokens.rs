use chrono::{DateTime, Utc};
use log::error;

use crate::db::models::{Token, TokenMetadata, TokenType};
use crate::db::postgres::PostgresClient;

/// Sanitize a string for PostgreSQL by removing null bytes (0x00)
/// which are invalid in UTF-8 text columns
fn sanitize_string(s: &str) -> String {
    s.replace('\0', "")
}

impl PostgresClient {
    /// Idempotent insert-or-return by denom. New rows carry only the denom,
    /// an inferred type, and the default exponent; metadata arrives later.
    pub async fn upsert_token_minimal(&self, denom: &str) -> anyhow::Result<i64> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO indexer.tokens (denom, token_type)
            VALUES ($1, $2)
            ON CONFLICT (denom) DO UPDATE SET denom = EXCLUDED.denom
            RETURNING id
        "#;

        let token_type = TokenType::infer(denom);
        let row = client
            .query_one(query, &[&denom, &token_type.as_str()])
            .await
            .map_err(|e| {
                error!("Failed to upsert token {}: {:?}", denom, e);
                e
            })?;

        Ok(row.get::<_, i64>("id"))
    }

    pub async fn get_token_by_denom(&self, denom: &str) -> anyhow::Result<Option<Token>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT id, denom, token_type, name, symbol, display, exponent,
                   total_supply, max_supply, holders_count,
                   website, twitter, telegram, created_at, updated_at
            FROM indexer.tokens
            WHERE denom = $1
        "#;

        let row = client.query_opt(query, &[&denom]).await?;
        Ok(row.as_ref().map(row_to_token))
    }

    /// Fill metadata columns from an LCD fetch. COALESCE keeps previously
    /// known values when the fetch comes back partial, so two concurrent
    /// refreshes converge without a constraint violation.
    pub async fn set_token_metadata(
        &self,
        denom: &str,
        meta: &TokenMetadata,
    ) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            UPDATE indexer.tokens SET
                name = COALESCE($2, name),
                symbol = COALESCE($3, symbol),
                display = COALESCE($4, display),
                exponent = COALESCE($5, exponent),
                total_supply = COALESCE($6, total_supply),
                max_supply = COALESCE($7, max_supply),
                updated_at = NOW()
            WHERE denom = $1
        "#;

        let name = meta.name.as_deref().map(sanitize_string);
        let symbol = meta.symbol.as_deref().map(sanitize_string);

        client
            .execute(
                query,
                &[
                    &denom,
                    &name,
                    &symbol,
                    &meta.display,
                    &meta.exponent,
                    &meta.total_supply,
                    &meta.max_supply,
                ],
            )
            .await
            .map_err(|e| {
                error!("Failed to set metadata for token {}: {:?}", denom, e);
                e
            })?;

        Ok(())
    }

    pub async fn set_token_holders(&self, token_id: i64, holders: i64) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE indexer.tokens SET holders_count = $2, updated_at = NOW() WHERE id = $1",
                &[&token_id, &holders],
            )
            .await?;
        Ok(())
    }

    /// Denoms whose metadata has not been refreshed since the cutoff,
    /// oldest first. Feeds the periodic refresher.
    pub async fn stale_token_denoms(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<String>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT denom FROM indexer.tokens
            WHERE updated_at < $1
            ORDER BY updated_at ASC
            LIMIT $2
        "#;

        let rows = client.query(query, &[&older_than, &limit]).await?;
        Ok(rows.iter().map(|r| r.get("denom")).collect())
    }

    /// Denoms that never received a symbol, for the one-shot backfill
    /// sweep. Keyset-paginated by token id.
    pub async fn denoms_missing_metadata(
        &self,
        after_id: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<(i64, String)>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT id, denom FROM indexer.tokens
            WHERE symbol IS NULL AND id > $1
            ORDER BY id ASC
            LIMIT $2
        "#;

        let rows = client.query(query, &[&after_id, &limit]).await?;
        Ok(rows.iter().map(|r| (r.get("id"), r.get("denom"))).collect())
    }

    /// Advisory security findings for a token.
    pub async fn upsert_token_security(
        &self,
        token_id: i64,
        has_metadata: bool,
        has_supply_cap: bool,
        flags: Option<&str>,
    ) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO indexer.token_security
                (token_id, has_metadata, has_supply_cap, holders_checked_at, flags, updated_at)
            VALUES ($1, $2, $3, NOW(), $4, NOW())
            ON CONFLICT (token_id) DO UPDATE SET
                has_metadata = EXCLUDED.has_metadata,
                has_supply_cap = EXCLUDED.has_supply_cap,
                holders_checked_at = EXCLUDED.holders_checked_at,
                flags = EXCLUDED.flags,
                updated_at = EXCLUDED.updated_at
        "#;

        client
            .execute(query, &[&token_id, &has_metadata, &has_supply_cap, &flags])
            .await
            .map_err(|e| {
                error!("Failed to upsert security row for token {}: {:?}", token_id, e);
                e
            })?;

        Ok(())
    }
}

pub(crate) fn row_to_token(row: &tokio_postgres::Row) -> Token {
    let token_type: String = row.get("token_type");
    Token {
        id: row.get("id"),
        denom: row.get("denom"),
        token_type: TokenType::from_str_or_default(&token_type),
        name: row.get("name"),
        symbol: row.get("symbol"),
        display: row.get("display"),
        exponent: row.get("exponent"),
        total_supply: row.get("total_supply"),
        max_supply: row.get("max_supply"),
        holders_count: row.get("holders_count"),
        website: row.get("website"),
        twitter: row.get("twitter"),
        telegram: row.get("telegram"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

//! Chain LCD client.
//!
//! Token metadata, supply, holder counts, and wasm smart queries against the
//! pair contracts. All lookups are best-effort: callers log failures and move
//! on rather than aborting their pipeline stage.

use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use url::Url;

use crate::db::models::TokenMetadata;
use crate::worker::parser::AssetAmount;

const LCD_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_MS: u64 = 100;

#[derive(Clone)]
pub struct LcdClient {
    base: Url,
    http: reqwest::Client,
}

impl LcdClient {
    pub fn new(lcd_url: &str) -> Result<Self> {
        let base = Url::parse(lcd_url).context("Invalid LCD URL")?;
        let http = reqwest::Client::builder()
            .timeout(LCD_CALL_TIMEOUT)
            .build()
            .context("Failed to build LCD http client")?;

        Ok(Self { base, http })
    }

    /// Bank metadata for a denom. None when the chain has no entry.
    pub async fn denom_metadata(&self, denom: &str) -> Result<Option<TokenMetadata>> {
        let path = format!(
            "cosmos/bank/v1beta1/denoms_metadata/{}",
            encode_denom(denom)
        );
        let body = match self.get_json(&path, &[]).await {
            Ok(v) => v,
            // Missing metadata comes back as a 404; treat it as absent.
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e),
        };

        let meta = match body.get("metadata") {
            Some(m) => m,
            None => return Ok(None),
        };

        let display = meta
            .get("display")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        // The display unit's exponent is the decimal scale of the token.
        let exponent = display.as_deref().and_then(|d| {
            meta.get("denom_units")?
                .as_array()?
                .iter()
                .find(|u| u.get("denom").and_then(Value::as_str) == Some(d))?
                .get("exponent")?
                .as_i64()
                .map(|e| e as i32)
        });

        Ok(Some(TokenMetadata {
            name: non_empty(meta.get("name")),
            symbol: non_empty(meta.get("symbol")),
            display,
            exponent,
            total_supply: None,
            max_supply: None,
        }))
    }

    /// Current supply of a denom in base units, as a decimal string.
    pub async fn supply_by_denom(&self, denom: &str) -> Result<Option<String>> {
        let body = match self
            .get_json("cosmos/bank/v1beta1/supply/by_denom", &[("denom", denom)])
            .await
        {
            Ok(v) => v,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(body
            .pointer("/amount/amount")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Number of addresses holding a denom, via paginated denom_owners with
    /// a count_total probe.
    pub async fn holders_count(&self, denom: &str) -> Result<Option<i64>> {
        let path = format!("cosmos/bank/v1beta1/denom_owners/{}", encode_denom(denom));
        let body = match self
            .get_json(
                &path,
                &[("pagination.count_total", "true"), ("pagination.limit", "1")],
            )
            .await
        {
            Ok(v) => v,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(body
            .pointer("/pagination/total")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<i64>().ok()))
    }

    /// Current reserves of a pair contract via the `{"pool":{}}` smart query.
    pub async fn pool_reserves(&self, pair_contract: &str) -> Result<Vec<AssetAmount>> {
        let query = BASE64.encode(b"{\"pool\":{}}");
        let path = format!(
            "cosmwasm/wasm/v1/contract/{}/smart/{}",
            pair_contract, query
        );
        let body = self.get_json(&path, &[]).await?;

        let assets = body
            .pointer("/data/assets")
            .and_then(Value::as_array)
            .context("pool query response missing data.assets")?;

        let mut out = Vec::with_capacity(assets.len());
        for asset in assets {
            let denom = asset
                .pointer("/info/native_token/denom")
                .or_else(|| asset.pointer("/info/token/contract_addr"))
                .and_then(Value::as_str);
            let amount = asset.get("amount").and_then(Value::as_str);

            if let (Some(denom), Some(amount)) = (denom, amount) {
                out.push(AssetAmount {
                    denom: denom.to_string(),
                    amount_base: amount.to_string(),
                });
            }
        }

        Ok(out)
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let mut url = self.base.join(path).context("Invalid LCD path")?;
        for (k, v) in query {
            url.query_pairs_mut().append_pair(k, v);
        }

        let mut last_error = None;
        for attempt in 0..MAX_RETRIES {
            match self.try_get(url.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    // 404s are semantic (entity absent), not transient.
                    if is_not_found(&e) {
                        return Err(e);
                    }
                    last_error = Some(e);
                    if attempt < MAX_RETRIES - 1 {
                        let delay = Duration::from_millis(RETRY_DELAY_MS * 2_u64.pow(attempt));
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("LCD call failed")))
            .with_context(|| format!("LCD {} failed after {} attempts", path, MAX_RETRIES))
    }

    async fn try_get(&self, url: Url) -> Result<Value> {
        let resp = self.http.get(url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            anyhow::bail!("not found");
        }
        let resp = resp.error_for_status()?;
        Ok(resp.json::<Value>().await?)
    }
}

/// Percent-encode the path segment of a denom; factory and ibc denoms
/// contain slashes.
fn encode_denom(denom: &str) -> String {
    denom.replace('/', "%2F")
}

fn is_not_found(e: &anyhow::Error) -> bool {
    e.to_string().contains("not found")
}

fn non_empty(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denom_path_encoding_escapes_slashes() {
        assert_eq!(
            encode_denom("factory/zig1abc/mycoin"),
            "factory%2Fzig1abc%2Fmycoin"
        );
        assert_eq!(encode_denom("uzig"), "uzig");
    }
}

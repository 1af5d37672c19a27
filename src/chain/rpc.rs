//! Tendermint RPC client.
//!
//! Fetches raw block and block-results JSON for a height plus the node tip.
//! The node is trusted; responses are passed to the parser opaquely.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use url::Url;

/// Timeout for individual RPC calls
const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retries per call
const MAX_RETRIES: u32 = 3;

/// Delay between retries (exponential backoff base)
const RETRY_DELAY_MS: u64 = 100;

#[derive(Clone)]
pub struct RpcClient {
    base: Url,
    http: reqwest::Client,
}

impl RpcClient {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let base = Url::parse(rpc_url).context("Invalid RPC URL")?;
        let http = reqwest::Client::builder()
            .timeout(RPC_CALL_TIMEOUT)
            .build()
            .context("Failed to build RPC http client")?;

        Ok(Self { base, http })
    }

    /// Latest committed height according to /status.
    pub async fn latest_height(&self) -> Result<i64> {
        let body = self.get_json("status", &[]).await?;
        let height = body
            .pointer("/result/sync_info/latest_block_height")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<i64>().ok())
            .context("status response missing latest_block_height")?;
        Ok(height)
    }

    /// Raw block JSON (`result.block`) for a height.
    pub async fn block(&self, height: i64) -> Result<Value> {
        let h = height.to_string();
        let body = self.get_json("block", &[("height", h.as_str())]).await?;
        body.pointer("/result/block")
            .cloned()
            .context("block response missing result.block")
    }

    /// Raw block-results JSON (`result`) for a height.
    pub async fn block_results(&self, height: i64) -> Result<Value> {
        let h = height.to_string();
        let body = self
            .get_json("block_results", &[("height", h.as_str())])
            .await?;
        body.get("result")
            .cloned()
            .context("block_results response missing result")
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let mut url = self.base.join(path).context("Invalid RPC path")?;
        for (k, v) in query {
            url.query_pairs_mut().append_pair(k, v);
        }

        let mut last_error = None;
        for attempt in 0..MAX_RETRIES {
            match self.try_get(url.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < MAX_RETRIES - 1 {
                        let delay = Duration::from_millis(RETRY_DELAY_MS * 2_u64.pow(attempt));
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("RPC call failed")))
            .with_context(|| format!("RPC {} failed after {} attempts", path, MAX_RETRIES))
    }

    async fn try_get(&self, url: Url) -> Result<Value> {
        let resp = self.http.get(url).send().await?;
        let resp = resp.error_for_status()?;
        Ok(resp.json::<Value>().await?)
    }
}

use serde::{Deserialize, Serialize};

/// Topic the pool registry publishes on after a successful creation.
pub const PAIR_CREATED_TOPIC: &str = "pair_created";

/// A message on the in-process notify bus.
#[derive(Debug, Clone)]
pub struct NotifyPayload {
    pub topic: String,
    pub data: serde_json::Value,
}

impl NotifyPayload {
    pub fn new(topic: &str, data: serde_json::Value) -> Self {
        Self {
            topic: topic.to_string(),
            data,
        }
    }
}

/// Payload of the `pair_created` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairCreatedPayload {
    pub pool_id: i64,
    pub pair_contract: String,
    pub base_denom: String,
    pub quote_denom: String,
    pub base_token_id: i64,
    pub quote_token_id: i64,
    pub is_uzig_quote: bool,
}

impl PairCreatedPayload {
    pub fn into_notify(self) -> anyhow::Result<NotifyPayload> {
        Ok(NotifyPayload::new(
            PAIR_CREATED_TOPIC,
            serde_json::to_value(self)?,
        ))
    }
}

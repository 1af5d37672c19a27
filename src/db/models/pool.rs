use chrono::{DateTime, Utc};

use crate::db::models::Token;
use crate::utils::UZIG;

/// AMM curve family of a pair contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairType {
    Xyk,
    Concentrated,
    CustomConcentrated,
}

impl PairType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairType::Xyk => "xyk",
            PairType::Concentrated => "concentrated",
            PairType::CustomConcentrated => "custom-concentrated",
        }
    }

    pub fn from_str_or_default(s: &str) -> Self {
        match s {
            "concentrated" => PairType::Concentrated,
            "custom-concentrated" => PairType::CustomConcentrated,
            _ => PairType::Xyk,
        }
    }
}

/// A liquidity pool, unique by pair contract (PostgreSQL)
#[derive(Debug, Clone)]
pub struct Pool {
    pub id: i64,
    pub pair_contract: String,
    pub dex_id: i64,
    pub base_token_id: i64,
    pub quote_token_id: i64,
    pub base_denom: String,
    pub quote_denom: String,
    pub pair_type: PairType,
    pub is_uzig_quote: bool,
    pub creator: Option<String>,
    pub tx_hash: Option<String>,
    pub block_height: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Upsert request carried by a phase-1 task.
#[derive(Debug, Clone)]
pub struct NewPool {
    pub pair_contract: String,
    pub factory_contract: String,
    pub base_denom: String,
    pub quote_denom: String,
    pub pair_type: PairType,
    pub creator: Option<String>,
    pub tx_hash: String,
    pub block_height: i64,
    pub created_at: DateTime<Utc>,
}

impl NewPool {
    pub fn is_uzig_quote(&self) -> bool {
        self.quote_denom == UZIG
    }
}

/// Pool joined with both token rows, the unit the phase-2 cache holds.
#[derive(Debug, Clone)]
pub struct PoolWithTokens {
    pub pool: Pool,
    pub base: Token,
    pub quote: Token,
}

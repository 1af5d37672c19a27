use chrono::{DateTime, Utc};

use crate::utils::UZIG;

/// Token denomination class, inferred from the denom shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Native,
    Factory,
    Ibc,
    Cw20,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Native => "native",
            TokenType::Factory => "factory",
            TokenType::Ibc => "ibc",
            TokenType::Cw20 => "cw20",
        }
    }

    pub fn from_str_or_default(s: &str) -> Self {
        match s {
            "native" => TokenType::Native,
            "ibc" => TokenType::Ibc,
            "cw20" => TokenType::Cw20,
            _ => TokenType::Factory,
        }
    }

    /// Classify a denom by shape: the native unit, `factory/...` subdenoms,
    /// `ibc/...` voucher hashes, or a bare contract address (cw20).
    pub fn infer(denom: &str) -> Self {
        if denom == UZIG {
            TokenType::Native
        } else if denom.starts_with("factory/") {
            TokenType::Factory
        } else if denom.starts_with("ibc/") {
            TokenType::Ibc
        } else if denom.starts_with("zig1") {
            TokenType::Cw20
        } else {
            TokenType::Factory
        }
    }
}

/// Token metadata and supply state (PostgreSQL)
///
/// Unique by denom. A row is created on first sighting with just the denom;
/// metadata arrives later from the LCD.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Token {
    pub id: i64,
    pub denom: String,
    pub token_type: TokenType,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub display: Option<String>,
    pub exponent: i32,
    pub total_supply: Option<String>,
    pub max_supply: Option<String>,
    pub holders_count: Option<i64>,
    pub website: Option<String>,
    pub twitter: Option<String>,
    pub telegram: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata payload produced by the LCD fetch.
#[derive(Debug, Clone, Default)]
pub struct TokenMetadata {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub display: Option<String>,
    pub exponent: Option<i32>,
    pub total_supply: Option<String>,
    pub max_supply: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_type_from_denom_shape() {
        assert_eq!(TokenType::infer("uzig"), TokenType::Native);
        assert_eq!(
            TokenType::infer("factory/zig1creator/mycoin"),
            TokenType::Factory
        );
        assert_eq!(TokenType::infer("ibc/27394FB092D2EC"), TokenType::Ibc);
        assert_eq!(TokenType::infer("zig1contractaddr"), TokenType::Cw20);
    }
}

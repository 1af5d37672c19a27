pub mod checkpoint;
pub mod notify;
pub mod ohlcv;
pub mod pool;
pub mod price;
pub mod token;
pub mod trade;

pub use checkpoint::IndexState;
pub use notify::{NotifyPayload, PairCreatedPayload, PAIR_CREATED_TOPIC};
pub use ohlcv::{MatrixBucket, OhlcvUpdate};
pub use pool::{NewPool, PairType, Pool, PoolWithTokens};
pub use price::NativePrice;
pub use token::{Token, TokenMetadata, TokenType};
pub use trade::{
    BroadcastTrade, NewTrade, PriceContribution, SizeClass, TradeAction, TradeDirection,
    TradeInsert,
};

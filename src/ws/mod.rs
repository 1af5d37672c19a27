pub mod broadcaster;
pub mod hub;
pub mod server;
pub mod shape;

pub use broadcaster::TradePump;
pub use hub::SubscriberHub;

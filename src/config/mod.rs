pub mod config;

pub use config::{
    ChainSettings, IndexerSettings, MetaSettings, PostgresSettings, Settings, WsSettings,
};

pub mod chain;
pub mod config;
pub mod cron;
pub mod db;
pub mod fasttrack;
pub mod pubsub;
pub mod utils;
pub mod worker;
pub mod ws;

pub use config::Settings;
pub use cron::{CronScheduler, CronSettings};
pub use db::Database;
pub use pubsub::NotifyBus;
pub use worker::{BlockProcessor, IndexWorker, TokenFetcher, TradeSink};

pub mod parser;
pub mod pricing;
pub mod processor;
pub mod scheduler;
pub mod tasks;
pub mod token_fetcher;
pub mod trade_sink;
pub mod worker;

pub use processor::BlockProcessor;
pub use token_fetcher::TokenFetcher;
pub use trade_sink::{batch_queue, trade_sink, BatchQueue, TradeSink};
pub use worker::IndexWorker;

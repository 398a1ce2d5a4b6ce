pub mod aggregator;
pub mod feed;

pub use aggregator::{CandleAggregator, CandleMessage};

pub mod batch_fetcher;
pub mod candle;
pub mod candle_service;
pub mod rate_limiter;

pub use batch_fetcher::{BatchFetcher, FetchStats, FetcherConfig};
pub use candle::{Candle, CandleSet};
pub use candle_service::CandleService;
pub use rate_limiter::RateLimiter;

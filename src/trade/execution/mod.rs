pub mod paper_provider;

pub use paper_provider::PaperTradingProvider;

// src/lib.rs
pub mod config;
pub mod email_client;
pub mod market_data;
pub mod orchestrator;
pub mod outcome;
pub mod pair;
pub mod pairtrade;
pub mod ports;
pub mod position;
pub mod rate_limit_notifier;
pub mod scheduler;
pub mod settings;
pub mod statistics;
pub mod trade;

#[cfg(test)]
mod testing;

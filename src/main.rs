use chrono::{DateTime, FixedOffset, Utc};
use env_logger::Builder;
use log::LevelFilter;
use statarb::config::OrchestratorConfig;
use statarb::pairtrade::PairTradeEngine;
use std::env;
use std::io::Write;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Log timestamps in local time
    let offset_seconds = env::var("TIMEZONE_OFFSET")
        .ok()
        .and_then(|v| v.parse::<i32>().ok())
        .unwrap_or(3600);
    let offset = FixedOffset::east_opt(offset_seconds)
        .or_else(|| FixedOffset::east_opt(0))
        .ok_or_else(|| anyhow::anyhow!("invalid TIMEZONE_OFFSET {}", offset_seconds))?;
    let log_spec =
        env::var("RUST_LOG").unwrap_or_else(|_| "debug,reqwest=info,hyper=info".to_string());
    let mut builder = Builder::new();
    builder
        .format(move |buf, record| {
            let utc_now: DateTime<Utc> = Utc::now();
            let local_now = utc_now.with_timezone(&offset);
            writeln!(
                buf,
                "{} [{}] - {}",
                local_now.format("%Y-%m-%dT%H:%M:%S%z"),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Debug)
        .parse_filters(&log_spec)
        .init();

    log::info!("Starting statarb orchestrator...");
    let cfg = OrchestratorConfig::from_env_or_yaml()?;
    let engine = PairTradeEngine::new(cfg).await?;
    engine.run().await
}

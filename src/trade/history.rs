use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use crate::pair::{ExitReason, Pair, TradeStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLogRecord {
    pub ts: DateTime<Utc>,
    pub event: String,
    pub pair_id: Uuid,
    pub pair: String,
    pub status: TradeStatus,
    pub z_score: Option<f64>,
    pub profit_percent: Decimal,
    pub realized_pnl: Decimal,
    pub averaging_count: u32,
    pub exit_reason: Option<ExitReason>,
    pub error: Option<String>,
}

impl TradeLogRecord {
    pub fn new(event: &str, pair: &Pair, now: DateTime<Utc>) -> Self {
        Self {
            ts: now,
            event: event.to_string(),
            pair_id: pair.id,
            pair: pair.name(),
            status: pair.status,
            z_score: pair.current_z(),
            profit_percent: pair.profit_percent(),
            realized_pnl: pair.pnl.realized_quote,
            averaging_count: pair.averaging_count,
            exit_reason: pair.exit_reason,
            error: pair.error_description.clone(),
        }
    }
}

/// Append-only JSONL trade log. A log without a path only writes to the
/// process logger.
#[derive(Debug, Default)]
pub struct TradeHistory {
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl TradeHistory {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Appends a record for `pair`. Write failures are logged, never returned.
    pub fn record(&self, event: &str, pair: &Pair) {
        let record = TradeLogRecord::new(event, pair, Utc::now());
        log::info!(
            "[HISTORY] {} {} status={} z={:?} profit={}%",
            record.event,
            record.pair,
            record.status,
            record.z_score,
            record.profit_percent
        );
        if let Err(err) = self.append(&record) {
            log::warn!("[HISTORY] failed to append record: {:?}", err);
        }
    }

    fn append(&self, record: &TradeLogRecord) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn read_all(&self) -> std::io::Result<Vec<TradeLogRecord>> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(path)?;
        Ok(raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::pair::{Pair, PairKind, TradeStatus};
use crate::ports::PairRepository;

/// Pair store backed by one JSON file. Every write rewrites the file through
/// a temporary sibling so a crash never leaves a truncated store behind.
pub struct JsonPairRepository {
    path: PathBuf,
    pairs: Mutex<HashMap<Uuid, Pair>>,
}

impl JsonPairRepository {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let pairs = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let stored: Vec<Pair> = if content.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&content)
                    .with_context(|| format!("corrupt pair store {}", path.display()))?
            };
            stored.into_iter().map(|pair| (pair.id, pair)).collect()
        } else {
            HashMap::new()
        };
        log::info!(
            "[REPO] {} pairs loaded from {}",
            pairs.len(),
            path.display()
        );
        Ok(Self {
            path,
            pairs: Mutex::new(pairs),
        })
    }

    fn persist(&self, pairs: &HashMap<Uuid, Pair>) -> Result<()> {
        let mut sorted: Vec<&Pair> = pairs.values().collect();
        sorted.sort_by_key(|pair| (pair.created_at, pair.id));
        let json = serde_json::to_string_pretty(&sorted).context("failed to encode pairs")?;
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl PairRepository for JsonPairRepository {
    async fn save(&self, pair: &Pair) -> Result<()> {
        let mut pairs = self.pairs.lock().await;
        let previous = pairs.insert(pair.id, pair.clone());
        if let Err(err) = self.persist(&pairs) {
            // Keep memory in step with the file.
            match previous {
                Some(previous) => pairs.insert(pair.id, previous),
                None => pairs.remove(&pair.id),
            };
            return Err(err);
        }
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Pair>> {
        Ok(self.pairs.lock().await.get(&id).cloned())
    }

    async fn find_by_status_in(&self, statuses: &[TradeStatus]) -> Result<Vec<Pair>> {
        let pairs = self.pairs.lock().await;
        let mut found: Vec<Pair> = pairs
            .values()
            .filter(|pair| statuses.contains(&pair.status))
            .cloned()
            .collect();
        found.sort_by_key(|pair| (pair.created_at, pair.id));
        Ok(found)
    }

    async fn delete_by_status(&self, kind: PairKind, status: TradeStatus) -> Result<usize> {
        let mut pairs = self.pairs.lock().await;
        let mut remaining = pairs.clone();
        remaining.retain(|_, pair| !(pair.kind == kind && pair.status == status));
        let removed = pairs.len() - remaining.len();
        if removed > 0 {
            self.persist(&remaining)?;
            *pairs = remaining;
        }
        Ok(removed)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TradeStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut pairs = self.pairs.lock().await;
        let Some(current) = pairs.get(&id) else {
            return Ok(false);
        };
        let mut updated = current.clone();
        updated.status = status;
        updated.updated_at = at;
        let mut next = pairs.clone();
        next.insert(id, updated);
        self.persist(&next)?;
        *pairs = next;
        Ok(true)
    }
}

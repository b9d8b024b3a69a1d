use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

/// Delivered-id window: `item_id -> delivered_at` (unix seconds). An entry
/// suppresses redelivery until its TTL lapses; the map is also capped so a
/// noisy source cannot grow it without bound.
#[derive(Debug, Clone)]
pub struct RecencyWindow {
    path: PathBuf,
    ttl_secs: i64,
    max_entries: usize,
}

impl RecencyWindow {
    pub fn new(state_dir: &Path, ttl_secs: u64, max_entries: usize) -> Self {
        Self {
            path: state_dir.join("recency.json"),
            ttl_secs: ttl_secs as i64,
            max_entries: max_entries.max(1),
        }
    }

    /// True only for entries still inside the TTL; anything older counts as
    /// unseen even if a purge has not rewritten the file yet.
    pub fn contains(&self, item_id: &str) -> Result<bool> {
        let map = self.read_map()?;
        let now = Utc::now().timestamp();
        Ok(map
            .get(item_id)
            .is_some_and(|&at| now.saturating_sub(at) <= self.ttl_secs))
    }

    /// Record delivered ids at "now". Re-adding an id refreshes its
    /// timestamp, extending suppression. Every write purges expired entries
    /// and enforces the cardinality bound (oldest delivered evicted first).
    pub fn add_all<I, S>(&self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = self.read_map()?;
        let now = Utc::now().timestamp();
        for id in ids {
            map.insert(id.as_ref().to_string(), now);
        }
        self.prune(&mut map, now);
        self.write_map(&map)
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let mut map = self.read_map()?;
        let before = map.len();
        let now = Utc::now().timestamp();
        self.prune(&mut map, now);
        self.write_map(&map)?;
        Ok(before - map.len())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read_map()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read_map()?.is_empty())
    }

    fn prune(&self, map: &mut BTreeMap<String, i64>, now: i64) {
        map.retain(|_, &mut at| now.saturating_sub(at) <= self.ttl_secs);
        if map.len() > self.max_entries {
            let mut by_age: Vec<(String, i64)> =
                map.iter().map(|(k, &v)| (k.clone(), v)).collect();
            by_age.sort_by_key(|&(_, at)| at);
            let excess = map.len() - self.max_entries;
            for (id, _) in by_age.into_iter().take(excess) {
                map.remove(&id);
            }
        }
    }

    fn read_map(&self) -> Result<BTreeMap<String, i64>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("read {}", self.path.display()));
            }
        };
        serde_json::from_str(&raw).with_context(|| format!("parse {}", self.path.display()))
    }

    fn write_map(&self, map: &BTreeMap<String, i64>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(map).context("serialize recency window")?;
        let mut f = fs::File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
        f.write_all(&json)?;
        f.sync_all()?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename into {}", self.path.display()))?;
        Ok(())
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Where a source's last poll left off. Shape depends on what the upstream
/// exposes: a numeric id, a publish timestamp, or the full ranked id set of
/// the previous scrape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Marker {
    LastId { id: u64 },
    LastTimestamp { ts: i64 },
    RankedSet { ids: BTreeSet<String> },
}

/// One JSON map `source_id -> Marker` on disk. Reads always go back to the
/// file so an operator can edit or delete a marker between cycles and the
/// next poll honors it.
#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("cursors.json"),
        }
    }

    pub fn get(&self, source_id: &str) -> Result<Option<Marker>> {
        Ok(self.read_map()?.remove(source_id))
    }

    pub fn set(&self, source_id: &str, marker: Marker) -> Result<()> {
        let mut map = self.read_map()?;
        map.insert(source_id.to_string(), marker);
        self.write_map(&map)
    }

    fn read_map(&self) -> Result<BTreeMap<String, Marker>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("read {}", self.path.display()));
            }
        };
        serde_json::from_str(&raw).with_context(|| format!("parse {}", self.path.display()))
    }

    /// Temp file + fsync + rename, so a crash mid-write leaves the old map.
    fn write_map(&self, map: &BTreeMap<String, Marker>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(map).context("serialize cursors")?;
        let mut f = fs::File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
        f.write_all(&json)?;
        f.sync_all()?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename into {}", self.path.display()))?;
        Ok(())
    }
}

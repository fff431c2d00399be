// src/ingest/archive.rs
//! Raw payload archive: one pretty-printed JSON file per parsed match.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;

use crate::opendota::{MatchId, MatchSource};

#[derive(Debug, Clone)]
pub struct PayloadArchive {
    matches_dir: PathBuf,
    public_matches_dir: PathBuf,
}

impl PayloadArchive {
    pub fn new(matches_dir: impl Into<PathBuf>, public_matches_dir: impl Into<PathBuf>) -> Self {
        Self {
            matches_dir: matches_dir.into(),
            public_matches_dir: public_matches_dir.into(),
        }
    }

    pub fn dir_for(&self, source: MatchSource) -> &Path {
        match source {
            MatchSource::Matches => &self.matches_dir,
            MatchSource::PublicMatches => &self.public_matches_dir,
        }
    }

    pub fn path_for(&self, source: MatchSource, match_id: MatchId) -> PathBuf {
        self.dir_for(source).join(format!("{match_id}.json"))
    }

    /// Write the payload and return its size in bytes.
    pub fn write(&self, source: MatchSource, match_id: MatchId, payload: &Value) -> Result<u64> {
        let dir = self.dir_for(source);
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

        let path = self.path_for(source, match_id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(payload).context("serializing match payload")?;
        let mut f = fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(&body)
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(body.len() as u64)
    }

    /// Number of archived payloads for a source (0 if the dir is absent).
    pub fn count(&self, source: MatchSource) -> usize {
        let Ok(rd) = fs::read_dir(self.dir_for(source)) else {
            return 0;
        };
        rd.filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "json"))
            .count()
    }
}

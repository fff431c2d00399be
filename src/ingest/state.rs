// src/ingest/state.rs
//! Durable tracking state: the download ledger and the parse backlog.
//!
//! Both tables live as CSV files in the tracking directory. A run must find
//! both files in place; a header-only file is a valid empty table. Saves go
//! through a temp file + rename so a crash never leaves a half-written table.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{info, warn};

use crate::opendota::{MatchId, MatchSource};

pub const LEDGER_FILE: &str = "downloaded_matches.csv";
pub const BACKLOG_FILE: &str = "parse_backlog.csv";

pub const LEDGER_COLUMNS: [&str; 6] = [
    "match_id",
    "start_time",
    "source",
    "downloaded_time",
    "file_size",
    "patch",
];
pub const BACKLOG_COLUMNS: [&str; 6] = [
    "match_id",
    "source",
    "attempts",
    "last_attempt_time",
    "status",
    "first_queued_time",
];

/// One fully downloaded match. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub match_id: MatchId,
    pub start_time: i64,
    pub source: MatchSource,
    pub downloaded_time: DateTime<Utc>,
    pub file_size: u64,
    pub patch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BacklogStatus {
    Pending,
    Skipped,
}

/// A discovered match still waiting for upstream parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacklogEntry {
    pub match_id: MatchId,
    pub source: MatchSource,
    pub attempts: u32,
    pub last_attempt_time: DateTime<Utc>,
    pub status: BacklogStatus,
    pub first_queued_time: DateTime<Utc>,
}

impl BacklogEntry {
    /// New entry for a match whose first fetch just came back unparsed.
    pub fn first_attempt(match_id: MatchId, source: MatchSource, now: DateTime<Utc>) -> Self {
        Self {
            match_id,
            source,
            attempts: 1,
            last_attempt_time: now,
            status: BacklogStatus::Pending,
            first_queued_time: now,
        }
    }

    pub fn is_retryable(&self, max_attempts: u32) -> bool {
        self.status == BacklogStatus::Pending && self.attempts < max_attempts
    }

    /// Count one more failed attempt; flips to `Skipped` at the ceiling.
    pub fn record_failure(&mut self, now: DateTime<Utc>, max_attempts: u32) -> BacklogStatus {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt_time = now;
        if self.attempts >= max_attempts {
            self.status = BacklogStatus::Skipped;
        }
        self.status
    }
}

/// Append-only ledger with an ID index.
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
    ids: HashSet<MatchId>,
}

impl Ledger {
    /// Append an entry. Returns false (and keeps the ledger unchanged) when the
    /// ID is already present.
    pub fn push(&mut self, entry: LedgerEntry) -> bool {
        if !self.ids.insert(entry.match_id) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn contains(&self, id: MatchId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter()
    }

    pub fn count_by_source(&self, source: MatchSource) -> usize {
        self.entries.iter().filter(|e| e.source == source).count()
    }
}

/// Backlog keyed by match ID.
#[derive(Debug, Default, Clone)]
pub struct Backlog {
    entries: BTreeMap<MatchId, BacklogEntry>,
}

impl Backlog {
    /// Insert a new entry. Existing entries are never overwritten.
    pub fn insert(&mut self, entry: BacklogEntry) -> bool {
        if self.entries.contains_key(&entry.match_id) {
            return false;
        }
        self.entries.insert(entry.match_id, entry);
        true
    }

    pub fn get(&self, id: MatchId) -> Option<&BacklogEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: MatchId) -> Option<&mut BacklogEntry> {
        self.entries.get_mut(&id)
    }

    pub fn remove(&mut self, id: MatchId) -> Option<BacklogEntry> {
        self.entries.remove(&id)
    }

    pub fn contains(&self, id: MatchId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = MatchId> + '_ {
        self.entries.keys().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = &BacklogEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count_with_status(&self, status: BacklogStatus) -> usize {
        self.entries.values().filter(|e| e.status == status).count()
    }
}

/// Both tables, loaded into memory for one run.
#[derive(Debug, Default, Clone)]
pub struct TrackingState {
    pub ledger: Ledger,
    pub backlog: Backlog,
}

/// CSV-backed store rooted at the tracking directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE)
    }

    pub fn backlog_path(&self) -> PathBuf {
        self.dir.join(BACKLOG_FILE)
    }

    /// Load both tables. Missing files, missing columns and any row that does
    /// not parse are errors: a save after a partial load would drop those rows.
    pub fn load(&self) -> Result<TrackingState> {
        let mut state = TrackingState::default();

        let ledger_rows: Vec<LedgerEntry> = read_table(&self.ledger_path(), &LEDGER_COLUMNS)?;
        for entry in ledger_rows {
            let id = entry.match_id;
            if !state.ledger.push(entry) {
                warn!(target: "state", match_id = id, "duplicate ledger row ignored");
            }
        }
        info!(target: "state", rows = state.ledger.len(), "loaded downloaded matches");

        let backlog_rows: Vec<BacklogEntry> = read_table(&self.backlog_path(), &BACKLOG_COLUMNS)?;
        for entry in backlog_rows {
            let id = entry.match_id;
            if !state.backlog.insert(entry) {
                warn!(target: "state", match_id = id, "duplicate backlog row ignored");
            }
        }
        info!(target: "state", rows = state.backlog.len(), "loaded parse backlog");

        Ok(state)
    }

    /// Write both tables back, each through a temp file + rename.
    pub fn save(&self, state: &TrackingState) -> Result<()> {
        write_table(&self.ledger_path(), &LEDGER_COLUMNS, state.ledger.iter())?;
        write_table(&self.backlog_path(), &BACKLOG_COLUMNS, state.backlog.values())?;
        info!(
            target: "state",
            ledger = state.ledger.len(),
            backlog = state.backlog.len(),
            "saved tracking state"
        );
        Ok(())
    }

    /// Create header-only tables for any file that does not exist yet.
    /// Existing files are left untouched. Returns how many files were created.
    pub fn init(&self) -> Result<usize> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating tracking dir {}", self.dir.display()))?;
        let mut created = 0;
        if !self.ledger_path().exists() {
            write_table::<LedgerEntry, _>(&self.ledger_path(), &LEDGER_COLUMNS, std::iter::empty())?;
            created += 1;
        }
        if !self.backlog_path().exists() {
            write_table::<BacklogEntry, _>(&self.backlog_path(), &BACKLOG_COLUMNS, std::iter::empty())?;
            created += 1;
        }
        Ok(created)
    }
}

fn read_table<T: DeserializeOwned>(path: &Path, columns: &[&str]) -> Result<Vec<T>> {
    if !path.exists() {
        bail!("state file not found: {}", path.display());
    }
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let headers = rdr
        .headers()
        .with_context(|| format!("reading header of {}", path.display()))?
        .clone();
    let missing: Vec<&str> = columns
        .iter()
        .copied()
        .filter(|c| !headers.iter().any(|h| h.trim() == *c))
        .collect();
    if !missing.is_empty() {
        bail!(
            "{} is missing columns: {}",
            path.display(),
            missing.join(", ")
        );
    }

    let mut out = Vec::new();
    for (idx, record) in rdr.deserialize::<T>().enumerate() {
        let row = record
            .with_context(|| format!("{}: malformed row {}", path.display(), idx + 1))?;
        out.push(row);
    }
    Ok(out)
}

fn write_table<'a, T, I>(path: &Path, columns: &[&str], rows: I) -> Result<()>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let tmp = path.with_extension("csv.tmp");
    {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        wtr.write_record(columns)?;
        for row in rows {
            wtr.serialize(row)
                .with_context(|| format!("writing row to {}", tmp.display()))?;
        }
        wtr.flush()
            .with_context(|| format!("flushing {}", tmp.display()))?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn backlog_entry_skips_exactly_at_ceiling() {
        let mut e = BacklogEntry::first_attempt(7, MatchSource::PublicMatches, ts(100));
        assert_eq!(e.attempts, 1);
        assert!(e.is_retryable(2));

        assert_eq!(e.record_failure(ts(200), 2), BacklogStatus::Skipped);
        assert_eq!(e.attempts, 2);
        assert_eq!(e.last_attempt_time, ts(200));
        assert_eq!(e.first_queued_time, ts(100));
        assert!(!e.is_retryable(2));
    }

    #[test]
    fn backlog_entry_stays_pending_below_ceiling() {
        let mut e = BacklogEntry::first_attempt(7, MatchSource::PublicMatches, ts(100));
        assert_eq!(e.record_failure(ts(200), 3), BacklogStatus::Pending);
        assert_eq!(e.attempts, 2);
    }

    #[test]
    fn ledger_rejects_duplicate_ids() {
        let mut l = Ledger::default();
        let e = LedgerEntry {
            match_id: 1,
            start_time: 10,
            source: MatchSource::PublicMatches,
            downloaded_time: ts(20),
            file_size: 5,
            patch: "58".into(),
        };
        assert!(l.push(e.clone()));
        assert!(!l.push(e));
        assert_eq!(l.len(), 1);
    }

    #[test]
    fn header_only_files_load_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert_eq!(store.init().unwrap(), 2);
        assert_eq!(store.init().unwrap(), 0);

        let header = fs::read_to_string(store.ledger_path()).unwrap();
        assert_eq!(header.trim(), LEDGER_COLUMNS.join(","));

        let state = store.load().unwrap();
        assert!(state.ledger.is_empty());
        assert!(state.backlog.is_empty());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        fs::write(store.ledger_path(), LEDGER_COLUMNS.join(",") + "\n").unwrap();
        let err = store.load().unwrap_err();
        assert!(err.to_string().contains(BACKLOG_FILE), "{err}");
    }

    #[test]
    fn missing_columns_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.init().unwrap();
        fs::write(store.backlog_path(), "match_id,source\n1,public_matches\n").unwrap();
        assert!(store.load().is_err());
    }

    #[test]
    fn malformed_row_fails_load_and_file_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.init().unwrap();
        let original = "match_id,start_time,source,downloaded_time,file_size,patch\n\
             1,1000,public_matches,2025-06-01T10:00:00.123456+00:00,2048,58\n\
             2,1001,public_matches,,10,58\n";
        fs::write(store.ledger_path(), original).unwrap();

        let err = store.load().unwrap_err();
        assert!(format!("{err:#}").contains("malformed row 2"), "{err:#}");
        assert_eq!(fs::read_to_string(store.ledger_path()).unwrap(), original);
    }

    #[test]
    fn load_save_reload_keeps_every_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.init().unwrap();
        fs::write(
            store.ledger_path(),
            "match_id,start_time,source,downloaded_time,file_size,patch\n\
             1,1000,public_matches,2025-06-01T10:00:00.123456+00:00,2048,58\n\
             2,1001,matches,2025-06-01T10:00:00+00:00,10,57\n",
        )
        .unwrap();

        let first = store.load().unwrap();
        store.save(&first).unwrap();
        let again = store.load().unwrap();
        assert_eq!(again.ledger.len(), 2);
        assert!(again.ledger.contains(1) && again.ledger.contains(2));
        assert_eq!(
            again.ledger.iter().collect::<Vec<_>>(),
            first.ledger.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn save_then_load_preserves_tables() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.init().unwrap();

        let mut state = TrackingState::default();
        state.ledger.push(LedgerEntry {
            match_id: 42,
            start_time: 1_750_000_000,
            source: MatchSource::PublicMatches,
            downloaded_time: ts(1_750_000_500),
            file_size: 123_456,
            patch: "58".into(),
        });
        let mut skipped = BacklogEntry::first_attempt(43, MatchSource::PublicMatches, ts(1));
        skipped.record_failure(ts(2), 2);
        state.backlog.insert(skipped.clone());

        store.save(&state).unwrap();
        assert!(!store.ledger_path().with_extension("csv.tmp").exists());

        let loaded = store.load().unwrap();
        assert_eq!(loaded.ledger.iter().next().unwrap().file_size, 123_456);
        assert_eq!(loaded.backlog.get(43), Some(&skipped));

        let raw = fs::read_to_string(store.backlog_path()).unwrap();
        assert!(raw.contains(",skipped,"), "{raw}");
    }
}

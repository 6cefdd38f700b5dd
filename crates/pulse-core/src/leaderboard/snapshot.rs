//! JSON snapshot wire format for the leaderboard
//!
//! The writer emits exactly `{decay_factor, max_users, entries[]}`.
//! The loader is deliberately forgiving: unknown keys are ignored,
//! top-level fields may be absent, and any entry missing one of its
//! three required fields is skipped rather than failing the load.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SnapshotEntry {
    pub user_id: String,
    pub score: f64,
    pub last_update: i64,
}

#[derive(Serialize, Debug)]
pub struct Snapshot {
    pub decay_factor: f64,
    pub max_users: u64,
    pub entries: Vec<SnapshotEntry>,
}

/// Snapshot as recovered from disk; top-level fields keep their
/// on-disk absence visible to the caller.
#[derive(Debug)]
pub struct LoadedSnapshot {
    pub decay_factor: Option<f64>,
    pub max_users: Option<u64>,
    pub entries: Vec<SnapshotEntry>,
}

pub fn write(path: &Path, snapshot: &Snapshot) -> Result<(), Error> {
    let file = fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, snapshot)
        .map_err(|e| Error::Io(e.into()))?;
    writer.flush()?;
    Ok(())
}

pub fn read(path: &Path) -> Result<LoadedSnapshot, Error> {
    let text = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text).map_err(|e| Error::Io(e.into()))?;

    let decay_factor = value.get("decay_factor").and_then(Value::as_f64);
    let max_users = value.get("max_users").and_then(Value::as_u64);

    let mut entries = Vec::new();
    if let Some(raw) = value.get("entries").and_then(Value::as_array) {
        for item in raw {
            let user_id = item.get("user_id").and_then(Value::as_str);
            let score = item.get("score").and_then(Value::as_f64);
            let last_update = item.get("last_update").and_then(Value::as_i64);
            if let (Some(user_id), Some(score), Some(last_update)) =
                (user_id, score, last_update)
            {
                entries.push(SnapshotEntry {
                    user_id: user_id.to_owned(),
                    score,
                    last_update,
                });
            }
        }
    }

    Ok(LoadedSnapshot {
        decay_factor,
        max_users,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("pulse-snapshot-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_round_trip() {
        let path = temp_file("roundtrip.json");
        let snapshot = Snapshot {
            decay_factor: 0.95,
            max_users: 100,
            entries: vec![
                SnapshotEntry {
                    user_id: "alice \"the boss\" \\ admin".into(),
                    score: 101.25,
                    last_update: 1_696_284_800,
                },
                SnapshotEntry {
                    user_id: "bob".into(),
                    score: 50.0,
                    last_update: 1_696_284_900,
                },
            ],
        };

        write(&path, &snapshot).unwrap();
        let loaded = read(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(loaded.decay_factor, Some(0.95));
        assert_eq!(loaded.max_users, Some(100));
        assert_eq!(loaded.entries, snapshot.entries);
    }

    #[test]
    fn test_tolerant_load_skips_bad_entries() {
        let path = temp_file("tolerant.json");
        fs::write(
            &path,
            r#"{
                "decay_factor": 0.9,
                "extra": true,
                "entries": [
                    {"user_id": "ok", "score": 1.5, "last_update": 10},
                    {"user_id": "missing-score", "last_update": 10},
                    {"score": 2.0, "last_update": 10},
                    {"user_id": "also-ok", "score": 3.0, "last_update": 11, "junk": []}
                ]
            }"#,
        )
        .unwrap();

        let loaded = read(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(loaded.decay_factor, Some(0.9));
        assert_eq!(loaded.max_users, None);
        let ids: Vec<&str> = loaded.entries.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(ids, ["ok", "also-ok"]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let missing = temp_file("does-not-exist.json");
        assert!(matches!(read(&missing), Err(Error::Io(_))));
    }
}

//! Publishes the cached standings as a JSON file for the web layer.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use common::{Result, Snapshot};

/// Writes snapshots with write-to-temp-then-rename so a reader of the file
/// never sees a half-written document.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    path: PathBuf,
}

impl SnapshotWriter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        let written = write_synced(&tmp, &json).and_then(|()| fs::rename(&tmp, &self.path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

fn write_synced(path: &Path, json: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(json)?;
    file.write_all(b"\n")?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{Dataset, TeamRecord};

    #[test]
    fn test_write_creates_parent_and_replaces_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = SnapshotWriter::new(dir.path().join("out/team-ranking.json"));

        let first = Snapshot {
            updated_at: None,
            rankings: Dataset::empty(),
        };
        writer.write(&first).expect("first write");

        let second = Snapshot {
            updated_at: Some(Utc::now()),
            rankings: Dataset::new(vec![TeamRecord {
                rank: "1".into(),
                team_name: "두산".into(),
                ..Default::default()
            }]),
        };
        writer.write(&second).expect("second write");

        let raw = fs::read_to_string(writer.path()).expect("read back");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
        assert_eq!(value["rankings"][0]["team_name"], "두산");
        assert!(value["updated_at"].is_string());
        assert!(!writer.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("team-ranking.json");
        fs::create_dir_all(target.join("occupied")).expect("blocking dir");

        let writer = SnapshotWriter::new(target.clone());
        let snapshot = Snapshot {
            updated_at: Some(Utc::now()),
            rankings: Dataset::empty(),
        };

        assert!(writer.write(&snapshot).is_err(), "rename onto a directory should fail");
        assert!(!target.with_extension("json.tmp").exists());
        assert!(target.is_dir());
    }
}

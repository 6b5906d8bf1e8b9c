//! Copies of the live daemon config.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};

const PREFIX: &str = "config_backup_";
const SUFFIX: &str = ".json";

/// `config_backup_YYYYmmdd_HHMMSS.json` for `at`.
pub fn backup_name<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}{}{}", PREFIX, at.format("%Y%m%d_%H%M%S"), SUFFIX)
}

/// Whether `name` is a bare backup file name (no directories).
pub fn is_backup_name(name: &str) -> bool {
    name.starts_with(PREFIX)
        && name.ends_with(SUFFIX)
        && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name)
}

/// Copy `live` into `dir` under `name`, creating `dir` if needed.
pub async fn copy_to_backup(live: &Path, dir: &Path, name: &str) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let target = dir.join(name);
    tokio::fs::copy(live, &target).await?;
    Ok(target)
}

/// Backup file names in `dir`, newest first. A missing directory has none.
pub async fn list_backups(dir: &Path) -> io::Result<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            if is_backup_name(name) {
                names.push(name.to_string());
            }
        }
    }

    // The timestamp format sorts lexically.
    names.sort_unstable_by(|a, b| b.cmp(a));
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_backup_name() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(backup_name(&at), "config_backup_20240309_070501.json");
    }

    #[test]
    fn test_rejects_paths() {
        assert!(is_backup_name("config_backup_20240309_070501.json"));
        assert!(!is_backup_name("../config_backup_20240309_070501.json"));
        assert!(!is_backup_name("config.json"));
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "config_backup_20240101_000000.json",
            "config_backup_20240301_000000.json",
            "notes.txt",
        ] {
            tokio::fs::write(dir.path().join(name), b"{}").await.unwrap();
        }

        let names = list_backups(dir.path()).await.unwrap();
        assert_eq!(
            names,
            vec!["config_backup_20240301_000000.json", "config_backup_20240101_000000.json"]
        );
        assert!(list_backups(&dir.path().join("missing")).await.unwrap().is_empty());
    }
}

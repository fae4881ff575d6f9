//! Pre-update backups of installed tool artifacts
//!
//! Each backup is a copy of the artifact at `<dir>/<tool>-<millis>.bak`
//! plus a JSON sidecar `<tool>-<millis>.bak.json` recording where the
//! artifact came from. Names are tool-scoped and timestamped, so backups of
//! different tools never collide.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::update::error::BackupError;

const BACKUP_EXTENSION: &str = "bak";
const METADATA_EXTENSION: &str = "bak.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub tool: String,
    pub backup_path: PathBuf,
    /// Where the artifact is restored to; `None` if the sidecar is missing
    pub original_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupMetadata {
    tool: String,
    original_path: PathBuf,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File-name-safe form of a tool name ("@scope/pkg" -> "_scope_pkg")
    fn stem(tool: &str) -> String {
        tool.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    fn backup_path(&self, stem: &str, millis: i64) -> PathBuf {
        self.dir.join(format!("{stem}-{millis}.{BACKUP_EXTENSION}"))
    }

    fn metadata_path(backup_path: &Path) -> PathBuf {
        backup_path.with_extension(METADATA_EXTENSION)
    }

    /// Copies `original` into the store and records where it came from
    pub async fn create(&self, tool: &str, original: &Path) -> Result<BackupRecord, BackupError> {
        let metadata = fs::metadata(original).await?;
        if !metadata.is_file() {
            return Err(BackupError::NotAFile(original.to_path_buf()));
        }

        fs::create_dir_all(&self.dir).await?;

        let stem = Self::stem(tool);
        let mut millis = Utc::now().timestamp_millis();
        let mut backup_path = self.backup_path(&stem, millis);
        while fs::try_exists(&backup_path).await? {
            millis += 1;
            backup_path = self.backup_path(&stem, millis);
        }
        let created_at = DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now);

        fs::copy(original, &backup_path).await?;

        let sidecar = BackupMetadata {
            tool: tool.to_string(),
            original_path: original.to_path_buf(),
            created_at,
        };
        fs::write(
            Self::metadata_path(&backup_path),
            serde_json::to_vec_pretty(&sidecar)?,
        )
        .await?;

        info!("Backed up {} from {:?} to {:?}", tool, original, backup_path);

        Ok(BackupRecord {
            tool: tool.to_string(),
            backup_path,
            original_path: Some(original.to_path_buf()),
            created_at,
        })
    }

    /// Backups of `tool`, newest first
    pub async fn list(&self, tool: &str) -> Result<Vec<BackupRecord>, BackupError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{}-", Self::stem(tool));
        let suffix = format!(".{BACKUP_EXTENSION}");
        let mut records = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(millis) = file_name
                .to_str()
                .and_then(|name| name.strip_prefix(&prefix))
                .and_then(|rest| rest.strip_suffix(&suffix))
                .filter(|millis| !millis.is_empty() && millis.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|millis| millis.parse::<i64>().ok())
            else {
                continue;
            };

            let backup_path = entry.path();
            let original_path = match fs::read(Self::metadata_path(&backup_path)).await {
                Ok(bytes) => Some(serde_json::from_slice::<BackupMetadata>(&bytes)?.original_path),
                Err(e) if e.kind() == ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            };

            records.push(BackupRecord {
                tool: tool.to_string(),
                backup_path,
                original_path,
                created_at: DateTime::from_timestamp_millis(millis).unwrap_or_default(),
            });
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    pub async fn latest(&self, tool: &str) -> Result<Option<BackupRecord>, BackupError> {
        Ok(self.list(tool).await?.into_iter().next())
    }

    /// Copies a backup back over its original location
    pub async fn restore(&self, record: &BackupRecord) -> Result<(), BackupError> {
        let original = record
            .original_path
            .as_ref()
            .ok_or_else(|| BackupError::MissingMetadata(record.backup_path.clone()))?;

        fs::copy(&record.backup_path, original).await?;
        info!(
            "Restored {} from {:?} to {:?}",
            record.tool, record.backup_path, original
        );
        Ok(())
    }

    /// Restores the most recent backup of `tool`
    pub async fn restore_latest(&self, tool: &str) -> Result<BackupRecord, BackupError> {
        let record = self
            .latest(tool)
            .await?
            .ok_or_else(|| BackupError::NoBackup(tool.to_string()))?;
        self.restore(&record).await?;
        Ok(record)
    }

    /// Deletes all but the `keep` newest backups of `tool`, returning how many were removed
    pub async fn clean(&self, tool: &str, keep: usize) -> Result<usize, BackupError> {
        let stale: Vec<_> = self.list(tool).await?.into_iter().skip(keep).collect();

        for record in &stale {
            fs::remove_file(&record.backup_path).await?;
            match fs::remove_file(Self::metadata_path(&record.backup_path)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            debug!("Removed backup {:?}", record.backup_path);
        }

        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn artifact(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("bin").join("tool");
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(&path, contents).await.unwrap();
        path
    }

    #[tokio::test]
    async fn create_copies_artifact_and_writes_sidecar() {
        let temp_dir = TempDir::new().unwrap();
        let original = artifact(&temp_dir, "v1").await;
        let store = BackupStore::new(temp_dir.path().join("backups"));

        let record = store.create("node", &original).await.unwrap();

        assert_eq!(fs::read_to_string(&record.backup_path).await.unwrap(), "v1");
        assert!(BackupStore::metadata_path(&record.backup_path).exists());
        assert_eq!(record.original_path.as_deref(), Some(original.as_path()));
        assert_eq!(store.list("node").await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn restore_latest_overwrites_original() {
        let temp_dir = TempDir::new().unwrap();
        let original = artifact(&temp_dir, "v1").await;
        let store = BackupStore::new(temp_dir.path().join("backups"));
        store.create("node", &original).await.unwrap();

        fs::write(&original, "broken").await.unwrap();
        store.restore_latest("node").await.unwrap();

        assert_eq!(fs::read_to_string(&original).await.unwrap(), "v1");
    }

    #[tokio::test]
    async fn list_is_scoped_to_tool_and_newest_first() {
        let temp_dir = TempDir::new().unwrap();
        let original = artifact(&temp_dir, "v1").await;
        let store = BackupStore::new(temp_dir.path().join("backups"));

        let first = store.create("node", &original).await.unwrap();
        let second = store.create("node", &original).await.unwrap();
        store.create("node-gyp", &original).await.unwrap();

        let records = store.list("node").await.unwrap();

        assert_eq!(records, vec![second, first]);
    }

    #[tokio::test]
    async fn list_ignores_tools_sharing_a_dash_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let original = artifact(&temp_dir, "v1").await;
        let store = BackupStore::new(temp_dir.path().join("backups"));

        let other = store.create("a-", &original).await.unwrap();

        assert!(store.list("a").await.unwrap().is_empty());
        assert_eq!(store.clean("a", 0).await.unwrap(), 0);
        assert!(other.backup_path.exists());
        assert_eq!(store.list("a-").await.unwrap(), vec![other]);
    }

    #[tokio::test]
    async fn list_of_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = BackupStore::new(temp_dir.path().join("never-created"));

        assert!(store.list("node").await.unwrap().is_empty());
        assert!(matches!(
            store.restore_latest("node").await,
            Err(BackupError::NoBackup(_))
        ));
    }

    #[tokio::test]
    async fn clean_keeps_newest_and_tolerates_missing_sidecar() {
        let temp_dir = TempDir::new().unwrap();
        let original = artifact(&temp_dir, "v1").await;
        let store = BackupStore::new(temp_dir.path().join("backups"));

        let oldest = store.create("deno", &original).await.unwrap();
        let middle = store.create("deno", &original).await.unwrap();
        let newest = store.create("deno", &original).await.unwrap();
        fs::remove_file(BackupStore::metadata_path(&oldest.backup_path))
            .await
            .unwrap();

        let removed = store.clean("deno", 1).await.unwrap();

        assert_eq!(removed, 2);
        assert!(!oldest.backup_path.exists());
        assert!(!middle.backup_path.exists());
        assert!(!BackupStore::metadata_path(&middle.backup_path).exists());
        assert_eq!(store.list("deno").await.unwrap(), vec![newest]);
    }

    #[tokio::test]
    async fn restore_without_sidecar_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let original = artifact(&temp_dir, "v1").await;
        let store = BackupStore::new(temp_dir.path().join("backups"));
        let record = store.create("bun", &original).await.unwrap();
        fs::remove_file(BackupStore::metadata_path(&record.backup_path))
            .await
            .unwrap();

        let listed = store.latest("bun").await.unwrap().unwrap();

        assert_eq!(listed.original_path, None);
        assert!(matches!(
            store.restore(&listed).await,
            Err(BackupError::MissingMetadata(_))
        ));
    }

    #[tokio::test]
    async fn create_rejects_directories() {
        let temp_dir = TempDir::new().unwrap();
        let store = BackupStore::new(temp_dir.path().join("backups"));

        let result = store.create("node", temp_dir.path()).await;

        assert!(matches!(result, Err(BackupError::NotAFile(_))));
    }

    #[test]
    fn stem_replaces_path_separators() {
        assert_eq!(BackupStore::stem("@openai/codex"), "_openai_codex");
        assert_eq!(BackupStore::stem("node-20.x"), "node-20.x");
    }
}

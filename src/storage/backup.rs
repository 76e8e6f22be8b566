use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

/// A processed-task record as it lands in the daily backup file
#[derive(Debug, Serialize)]
pub struct BackupRecord<'a> {
    pub timestamp: DateTime<Utc>,
    pub task_id: Option<&'a str>,
    pub address: &'a str,
    pub container_type: &'a str,
    pub problem: &'a str,
    pub district: &'a str,
    pub driver: &'a str,
    pub vehicle: &'a str,
    pub photo_count: usize,
}

/// Daily JSON-lines backup, one file per calendar day.
///
/// Survives crashes of the primary sinks: each record is a self-contained
/// line appended with its own write.
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn append(&self, record: &BackupRecord<'_>) -> Result<()> {
        std::fs::create_dir_all(&self.dir).context(format!(
            "Failed to create backup directory: {}",
            self.dir.display()
        ))?;

        let path = self.dir.join(format!(
            "backup_{}.jsonl",
            record.timestamp.format("%Y%m%d")
        ));
        let line = serde_json::to_string(record).context("Failed to serialize backup record")?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context(format!("Failed to open backup file: {}", path.display()))?;
        writeln!(file, "{}", line).context("Failed to append backup record")?;
        debug!("Backup record appended to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn records_land_in_a_per_day_file() {
        let dir = std::env::temp_dir().join(format!("backup_store_test_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let store = BackupStore::new(dir.clone());
        let timestamp = Utc.with_ymd_and_hms(2026, 1, 5, 10, 30, 0).unwrap();
        let record = BackupRecord {
            timestamp,
            task_id: Some("48213"),
            address: "г. Подольск, ул. Кирова, 15",
            container_type: "ТБО",
            problem: "ЗАТРУДНЕН ПРОЕЗД",
            district: "г.о. Подольск",
            driver: "Иванов И. И.",
            vehicle: "А123БВ50",
            photo_count: 2,
        };
        store.append(&record).unwrap();
        store.append(&record).unwrap();

        let path = dir.join("backup_20260105.jsonl");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        let parsed: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(parsed["task_id"], "48213");
        assert_eq!(parsed["photo_count"], 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

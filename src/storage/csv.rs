use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info};

/// Column order matches the spreadsheet so both sinks stay comparable
const HEADERS: &[&str] = &[
    "Дата",
    "Время",
    "Адрес",
    "Тип контейнера",
    "Проблема",
    "Округ",
    "Водитель",
    "Машина",
    "Фото",
];

const DELIMITER: char = ';';

/// Semicolon-delimited local log, one row per processed task.
///
/// The header row is written once when the file is created; rows are
/// appended afterwards.
pub struct CsvStore {
    path: PathBuf,
}

impl CsvStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn append_row(&self, fields: &[String]) -> Result<()> {
        let is_new = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context(format!("Failed to open CSV file: {}", self.path.display()))?;

        if is_new {
            info!("Creating CSV log at {}", self.path.display());
            writeln!(file, "{}", join_row(HEADERS.iter().map(|h| h.to_string())))
                .context("Failed to write CSV header")?;
        }

        writeln!(file, "{}", join_row(fields.iter().cloned()))
            .context("Failed to append CSV row")?;
        debug!("CSV row appended");
        Ok(())
    }
}

fn join_row(fields: impl Iterator<Item = String>) -> String {
    fields
        .map(|field| escape_field(&field))
        .collect::<Vec<_>>()
        .join(&DELIMITER.to_string())
}

/// Quote a field when it contains the delimiter, a quote, or a newline
fn escape_field(field: &str) -> String {
    if field.contains(DELIMITER) || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_fields_pass_through() {
        assert_eq!(escape_field("г.о. Подольск"), "г.о. Подольск");
    }

    #[test]
    fn delimiter_and_quotes_force_quoting() {
        assert_eq!(escape_field("а; б"), "\"а; б\"");
        assert_eq!(escape_field("са\"мосвал"), "\"са\"\"мосвал\"");
        assert_eq!(escape_field("две\nстроки"), "\"две\nстроки\"");
    }

    #[test]
    fn header_written_once_then_rows_appended() {
        let dir = std::env::temp_dir().join(format!("csv_store_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("log.csv");
        let _ = std::fs::remove_file(&path);

        let store = CsvStore::new(path.clone());
        store
            .append_row(&["2026-01-05".into(), "10:00".into(), "адрес, 1".into()])
            .unwrap();
        store
            .append_row(&["2026-01-05".into(), "10:05".into(), "адрес; 2".into()])
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Дата;Время;Адрес"));
        assert!(lines[1].contains("адрес, 1"));
        assert!(lines[2].contains("\"адрес; 2\""));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

use crate::ops::outcome::{DumpResult, ImportResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const MAX_ENTRIES: usize = 1000;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Dump,
    Import,
}

/// A single dump or import in the log
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OperationEntry {
    pub id: String,
    pub timestamp: String,
    pub kind: OperationKind,
    pub server: String,
    pub database: String,
    pub file: PathBuf,
    pub success: bool,
    pub bytes: Option<u64>,
    pub duration_ms: u128,
    pub error: Option<String>,
}

impl OperationEntry {
    fn new(kind: OperationKind, server: &str, database: &str, file: &Path) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Local::now().to_rfc3339(),
            kind,
            server: server.to_string(),
            database: database.to_string(),
            file: file.to_path_buf(),
            success: false,
            bytes: None,
            duration_ms: 0,
            error: None,
        }
    }

    pub fn from_dump(server: &str, database: &str, result: &DumpResult) -> Self {
        Self {
            success: result.is_success(),
            bytes: result.is_success().then(|| result.size_bytes()),
            duration_ms: result.duration().as_millis(),
            error: result.error().map(str::to_string),
            ..Self::new(OperationKind::Dump, server, database, result.file_path())
        }
    }

    pub fn from_import(server: &str, database: &str, result: &ImportResult) -> Self {
        Self {
            success: result.is_success(),
            duration_ms: result.duration().as_millis(),
            error: result.error().map(str::to_string),
            ..Self::new(OperationKind::Import, server, database, result.file_path())
        }
    }
}

/// Persistent log of dumps and imports in ~/.sqlhop/history.json
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct OperationLog {
    pub entries: Vec<OperationEntry>,
}

impl OperationLog {
    pub fn path() -> PathBuf {
        crate::config::data_dir().join("history.json")
    }

    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        // Keep only the most recent entries
        let trimmed = if self.entries.len() > MAX_ENTRIES {
            OperationLog {
                entries: self.entries[self.entries.len() - MAX_ENTRIES..].to_vec(),
            }
        } else {
            self.clone()
        };

        let json = serde_json::to_string_pretty(&trimmed)?;
        let mut file = fs::File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Append to the log at `path` and save
    pub fn record_at(path: &Path, entry: OperationEntry) -> anyhow::Result<()> {
        let mut log = Self::load_from(path);
        log.entries.push(entry);
        log.save_to(path)
    }

    pub fn record(entry: OperationEntry) -> anyhow::Result<()> {
        Self::record_at(&Self::path(), entry)
    }

    /// Most recent first
    pub fn recent(&self, n: usize) -> Vec<&OperationEntry> {
        self.entries.iter().rev().take(n).collect()
    }
}

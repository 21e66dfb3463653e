use crate::error::{OpsError, Result};
use chrono::Local;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// What to dump and where to write it. Validated on construction.
#[derive(Debug, Clone, PartialEq)]
pub struct DumpOptions {
    database: String,
    tables: Vec<String>,
    schema_only: bool,
    data_only: bool,
    drop_tables: bool,
    gzip: bool,
    output_path: PathBuf,
}

/// Unvalidated dump request, turned into [`DumpOptions`] by `build`.
#[derive(Debug, Clone, Default)]
pub struct DumpRequest {
    pub database: String,
    pub tables: Vec<String>,
    pub schema_only: bool,
    pub data_only: bool,
    pub drop_tables: bool,
    pub gzip: bool,
    pub output_path: Option<PathBuf>,
}

impl DumpRequest {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            ..Self::default()
        }
    }

    pub fn build(self) -> Result<DumpOptions> {
        if self.database.trim().is_empty() {
            return Err(OpsError::Validation("Database name must not be empty".to_string()));
        }
        if self.schema_only && self.data_only {
            return Err(OpsError::Validation(
                "--schema-only and --data-only are mutually exclusive".to_string(),
            ));
        }
        if let Some(empty) = self.tables.iter().position(|t| t.trim().is_empty()) {
            return Err(OpsError::Validation(format!(
                "Table name at position {} is empty",
                empty + 1
            )));
        }

        let output_path = self
            .output_path
            .unwrap_or_else(|| generate_output_path(&self.database, self.gzip));

        Ok(DumpOptions {
            database: self.database,
            tables: self.tables,
            schema_only: self.schema_only,
            data_only: self.data_only,
            drop_tables: self.drop_tables,
            gzip: self.gzip,
            output_path,
        })
    }
}

impl DumpOptions {
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Empty means every table in the database.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn schema_only(&self) -> bool {
        self.schema_only
    }

    pub fn data_only(&self) -> bool {
        self.data_only
    }

    pub fn drop_tables(&self) -> bool {
        self.drop_tables
    }

    pub fn gzip(&self) -> bool {
        self.gzip
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

/// Source file and target database for an import.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportOptions {
    database: String,
    file_path: PathBuf,
}

impl ImportOptions {
    /// Checks the file on disk every time; nothing is cached.
    pub fn new(database: &str, file_path: impl Into<PathBuf>) -> Result<Self> {
        let file_path = file_path.into();
        if database.trim().is_empty() {
            return Err(OpsError::Validation("Database name must not be empty".to_string()));
        }

        let name = file_path.to_string_lossy().to_lowercase();
        if !(name.ends_with(".sql") || name.ends_with(".sql.gz")) {
            return Err(OpsError::Validation(format!(
                "Import file must end in .sql or .sql.gz: {}",
                file_path.display()
            )));
        }

        let meta = fs::metadata(&file_path).map_err(|e| {
            OpsError::Validation(format!("Cannot access {}: {}", file_path.display(), e))
        })?;
        if !meta.is_file() {
            return Err(OpsError::Validation(format!(
                "Not a regular file: {}",
                file_path.display()
            )));
        }
        if meta.len() == 0 {
            return Err(OpsError::Validation(format!(
                "Import file is empty: {}",
                file_path.display()
            )));
        }
        fs::File::open(&file_path).map_err(|e| {
            OpsError::Validation(format!("Cannot read {}: {}", file_path.display(), e))
        })?;

        Ok(Self {
            database: database.to_string(),
            file_path,
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

/// `{database}_{YYYY-MM-DD_HHmmss}.sql`, or `.sql.gz` when compressing.
///
/// Always a bare file name: separators in the database name become `_`.
pub fn generate_output_path(database: &str, gzip: bool) -> PathBuf {
    let stamp = Local::now().format("%Y-%m-%d_%H%M%S");
    let ext = if gzip { "sql.gz" } else { "sql" };
    PathBuf::from(format!("{}_{}.{}", file_stem_for(database), stamp, ext))
}

fn file_stem_for(database: &str) -> String {
    database
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// True for a `.gz` name or a file starting with the gzip magic bytes.
pub fn is_gzipped(path: &Path) -> bool {
    let by_name = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    by_name || has_gzip_magic(path)
}

fn has_gzip_magic(path: &Path) -> bool {
    let mut header = [0u8; 2];
    match fs::File::open(path).and_then(|mut f| f.read_exact(&mut header)) {
        Ok(()) => header == GZIP_MAGIC,
        Err(_) => false,
    }
}

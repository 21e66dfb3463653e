use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Outcome of a dump. Built only through `success` or `failure`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DumpResult {
    success: bool,
    file_path: PathBuf,
    size_bytes: u64,
    duration: Duration,
    error: Option<String>,
}

impl DumpResult {
    pub fn success(file_path: &Path, size_bytes: u64, duration: Duration) -> Self {
        Self {
            success: true,
            file_path: file_path.to_path_buf(),
            size_bytes,
            duration,
            error: None,
        }
    }

    pub fn failure(file_path: &Path, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            file_path: file_path.to_path_buf(),
            size_bytes: 0,
            duration,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Outcome of an import.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportResult {
    success: bool,
    file_path: PathBuf,
    duration: Duration,
    error: Option<String>,
}

impl ImportResult {
    pub fn success(file_path: &Path, duration: Duration) -> Self {
        Self {
            success: true,
            file_path: file_path.to_path_buf(),
            duration,
            error: None,
        }
    }

    pub fn failure(file_path: &Path, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            file_path: file_path.to_path_buf(),
            duration,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_has_message_and_no_size() {
        let r = DumpResult::failure(Path::new("x.sql"), "Access denied", Duration::from_secs(1));
        assert!(!r.is_success());
        assert_eq!(r.size_bytes(), 0);
        assert_eq!(r.error(), Some("Access denied"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    }
}

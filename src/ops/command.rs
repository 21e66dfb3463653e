//! Shell command lines for `mysqldump` and `mysql`.
//!
//! Every value that came from a profile or the user is passed through
//! [`shell_escape`] as one word. Only flag names and the fixed pipeline
//! glue are literal.

use crate::ops::options::{is_gzipped, DumpOptions, ImportOptions};
use crate::ops::registry::ServerProfile;
use crate::ops::shell::shell_escape;

/// Host and port the client should connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }

    pub fn of(profile: &ServerProfile) -> Self {
        Self::new(&profile.host, profile.port)
    }
}

/// Flags that keep dumps consistent and replayable.
const DUMP_BASE_FLAGS: &[&str] = &[
    "--single-transaction",
    "--routines",
    "--triggers",
    "--set-gtid-purged=OFF",
];

fn connection_args(profile: &ServerProfile, endpoint: &Endpoint) -> Vec<String> {
    let mut args = vec![
        format!("--host={}", shell_escape(&endpoint.host)),
        format!("--port={}", endpoint.port),
        format!("--user={}", shell_escape(&profile.username)),
    ];
    if let Some(password) = profile.password.as_deref().filter(|p| !p.is_empty()) {
        args.push(format!("--password={}", shell_escape(password)));
    }
    args.push(format!(
        "--default-character-set={}",
        shell_escape(&profile.charset)
    ));
    args
}

/// `mysqldump ... db [tables...]` redirected (optionally through gzip) to the
/// output path. `endpoint_override` replaces only the host and port.
pub fn build_dump_command(
    profile: &ServerProfile,
    options: &DumpOptions,
    endpoint_override: Option<&Endpoint>,
) -> String {
    let endpoint = endpoint_override
        .cloned()
        .unwrap_or_else(|| Endpoint::of(profile));

    let mut parts = vec!["mysqldump".to_string()];
    parts.extend(connection_args(profile, &endpoint));
    parts.extend(DUMP_BASE_FLAGS.iter().map(|f| f.to_string()));

    if options.schema_only() {
        parts.push("--no-data".to_string());
    }
    if options.data_only() {
        parts.push("--no-create-info".to_string());
    }
    if options.drop_tables() {
        parts.push("--add-drop-table".to_string());
    }

    parts.push(shell_escape(options.database()));
    parts.extend(options.tables().iter().map(|t| shell_escape(t)));

    let output = shell_escape(&options.output_path().to_string_lossy());
    if options.gzip() {
        parts.push(format!("| gzip > {}", output));
    } else {
        parts.push(format!("> {}", output));
    }

    parts.join(" ")
}

/// `mysql ... db < file`, or `gzip -dc file | mysql ... db` for gzip input.
pub fn build_import_command(
    profile: &ServerProfile,
    options: &ImportOptions,
    endpoint_override: Option<&Endpoint>,
) -> String {
    let endpoint = endpoint_override
        .cloned()
        .unwrap_or_else(|| Endpoint::of(profile));

    let mut client = vec!["mysql".to_string()];
    client.extend(connection_args(profile, &endpoint));
    client.push(shell_escape(options.database()));
    let client = client.join(" ");

    let file = shell_escape(&options.file_path().to_string_lossy());
    if is_gzipped(options.file_path()) {
        format!("gzip -dc {} | {}", file, client)
    } else {
        format!("{} < {}", client, file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::options::DumpRequest;
    use std::path::PathBuf;

    fn profile() -> ServerProfile {
        ServerProfile::new("prod", "db.internal", 3306, "app").with_password("pa'ss")
    }

    fn dump(tables: &[&str]) -> DumpOptions {
        DumpRequest {
            tables: tables.iter().map(|t| t.to_string()).collect(),
            output_path: Some(PathBuf::from("/tmp/out.sql")),
            ..DumpRequest::new("shop")
        }
        .build()
        .unwrap()
    }

    #[test]
    fn test_dump_base_flags() {
        let cmd = build_dump_command(&profile(), &dump(&[]), None);
        assert!(cmd.starts_with("mysqldump "));
        for flag in DUMP_BASE_FLAGS {
            assert!(cmd.contains(flag), "missing {}", flag);
        }
        assert!(cmd.contains("--host='db.internal'"));
        assert!(cmd.contains("--port=3306"));
        assert!(cmd.contains("--password='pa'\\''ss'"));
        assert!(cmd.ends_with("'shop' > '/tmp/out.sql'"));
    }

    #[test]
    fn test_dump_flag_mapping() {
        let options = DumpRequest {
            schema_only: true,
            drop_tables: true,
            output_path: Some(PathBuf::from("o.sql")),
            ..DumpRequest::new("shop")
        }
        .build()
        .unwrap();
        let cmd = build_dump_command(&profile(), &options, None);
        assert!(cmd.contains("--no-data"));
        assert!(cmd.contains("--add-drop-table"));
        assert!(!cmd.contains("--no-create-info"));
    }

    #[test]
    fn test_dump_gzip_pipes_through_filter() {
        let options = DumpRequest {
            gzip: true,
            output_path: Some(PathBuf::from("o.sql.gz")),
            ..DumpRequest::new("shop")
        }
        .build()
        .unwrap();
        let cmd = build_dump_command(&profile(), &options, None);
        assert!(cmd.ends_with("'shop' | gzip > 'o.sql.gz'"));
    }

    #[test]
    fn test_no_password_flag_when_unset() {
        let p = ServerProfile::new("dev", "localhost", 3306, "root");
        let cmd = build_dump_command(&p, &dump(&[]), None);
        assert!(!cmd.contains("--password"));
    }

    #[test]
    fn test_import_plain() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("seed.sql");
        std::fs::write(&file, "CREATE TABLE t (id INT);").unwrap();
        let options = ImportOptions::new("shop", &file).unwrap();

        let cmd = build_import_command(&profile(), &options, None);
        assert!(cmd.starts_with("mysql "));
        assert!(cmd.contains("--default-character-set='utf8mb4'"));
        assert!(cmd.ends_with(&format!("'shop' < '{}'", file.display())));
    }

    #[test]
    fn test_import_gzip_decompresses_first() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("seed.sql.gz");
        std::fs::write(&file, [0x1f, 0x8b, 0x08, 0x00]).unwrap();
        let options = ImportOptions::new("shop", &file).unwrap();

        let cmd = build_import_command(&profile(), &options, None);
        assert!(cmd.starts_with(&format!("gzip -dc '{}' | mysql ", file.display())));
        assert!(!cmd.contains(" < "));
    }

    #[test]
    fn test_import_override_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("seed.sql");
        std::fs::write(&file, "SELECT 1;").unwrap();
        let options = ImportOptions::new("shop", &file).unwrap();

        let cmd = build_import_command(
            &profile(),
            &options,
            Some(&Endpoint::new("127.0.0.1", 41234)),
        );
        assert!(cmd.contains("--host='127.0.0.1' --port=41234"));
        assert!(!cmd.contains("db.internal"));
    }
}

use crate::ops::command::Endpoint;
use crate::ops::registry::ServerProfile;
use crate::ops::tunnel::{TunnelHandle, TunnelManager};
use serde::Serialize;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{ConnectOptions, Connection, Row};
use std::time::{Duration, Instant};

const SYSTEM_SCHEMAS: &[&str] = &["information_schema", "mysql", "performance_schema", "sys"];

#[derive(Debug, Clone, Serialize)]
pub struct ProbeDetails {
    pub server_version: String,
    pub endpoint: String,
    pub tunneled: bool,
    pub latency_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub success: bool,
    pub message: String,
    pub details: Option<ProbeDetails>,
}

/// Result of a metadata listing. Keeps "nothing there" apart from "could
/// not ask".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing {
    Items(Vec<String>),
    Unreachable(String),
}

impl Listing {
    /// Collapse to a plain list, treating an unreachable server as empty.
    pub fn into_names(self) -> Vec<String> {
        match self {
            Listing::Items(names) => names,
            Listing::Unreachable(_) => Vec::new(),
        }
    }

    pub fn is_reachable(&self) -> bool {
        matches!(self, Listing::Items(_))
    }
}

/// Short-lived connections for reachability checks and schema listings.
pub struct Prober {
    tunnels: TunnelManager,
    connect_timeout: Duration,
}

impl Prober {
    pub fn new(tunnels: TunnelManager) -> Self {
        Self {
            tunnels,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub async fn test(&self, profile: &ServerProfile) -> ProbeReport {
        let started = Instant::now();
        match self.query(profile, None, "SELECT VERSION()").await {
            Ok((rows, endpoint, tunneled)) => {
                let server_version = rows.into_iter().next().unwrap_or_default();
                ProbeReport {
                    success: true,
                    message: format!("Connected to '{}' (MySQL {})", profile.name, server_version),
                    details: Some(ProbeDetails {
                        server_version,
                        endpoint: format!("{}:{}", endpoint.host, endpoint.port),
                        tunneled,
                        latency_ms: started.elapsed().as_millis(),
                    }),
                }
            }
            Err(message) => ProbeReport {
                success: false,
                message,
                details: None,
            },
        }
    }

    pub async fn list_databases(&self, profile: &ServerProfile, include_system: bool) -> Listing {
        match self.query(profile, None, "SHOW DATABASES").await {
            Ok((names, _, _)) => Listing::Items(
                names
                    .into_iter()
                    .filter(|n| include_system || !SYSTEM_SCHEMAS.contains(&n.as_str()))
                    .collect(),
            ),
            Err(message) => Listing::Unreachable(message),
        }
    }

    pub async fn list_tables(&self, profile: &ServerProfile, database: &str) -> Listing {
        let sql = format!("SHOW TABLES FROM {}", quote_ident(database));
        match self.query(profile, Some(database), &sql).await {
            Ok((names, _, _)) => Listing::Items(names),
            Err(message) => Listing::Unreachable(message),
        }
    }

    // Open tunnel (if any) -> connect -> first column of every row -> close
    // connection and tunnel, whatever happened in between.
    async fn query(
        &self,
        profile: &ServerProfile,
        database: Option<&str>,
        sql: &str,
    ) -> Result<(Vec<String>, Endpoint, bool), String> {
        let mut tunnel = self
            .tunnels
            .open_if_configured(profile)
            .await
            .map_err(|e| e.to_string())?;
        let endpoint = tunnel
            .as_ref()
            .map(TunnelHandle::endpoint)
            .unwrap_or_else(|| Endpoint::of(profile));

        let rows = self.fetch_names(profile, &endpoint, database, sql).await;

        if let Some(handle) = tunnel.as_mut() {
            self.tunnels.close_tunnel(handle).await;
        }
        rows.map(|names| (names, endpoint, tunnel.is_some()))
    }

    async fn fetch_names(
        &self,
        profile: &ServerProfile,
        endpoint: &Endpoint,
        database: Option<&str>,
        sql: &str,
    ) -> Result<Vec<String>, String> {
        let mut options = MySqlConnectOptions::new()
            .host(&endpoint.host)
            .port(endpoint.port)
            .username(&profile.username)
            .charset(&profile.charset)
            .collation(&profile.collation);
        if let Some(password) = &profile.password {
            options = options.password(password);
        }
        if let Some(db) = database.filter(|d| !d.is_empty()) {
            options = options.database(db);
        }

        let mut conn: MySqlConnection = tokio::time::timeout(self.connect_timeout, options.connect())
            .await
            .map_err(|_| {
                format!(
                    "Connection to {}:{} timed out after {}s",
                    endpoint.host,
                    endpoint.port,
                    self.connect_timeout.as_secs()
                )
            })?
            .map_err(|e| describe_connect_error(&e, endpoint))?;

        let rows = sqlx::query(sql)
            .fetch_all(&mut conn)
            .await
            .map_err(|e| format!("Query failed: {}", e));

        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "error closing probe connection");
        }

        Ok(rows?.iter().map(first_column).collect())
    }
}

fn describe_connect_error(e: &sqlx::Error, endpoint: &Endpoint) -> String {
    let msg = e.to_string();
    if msg.contains("os error 111") || msg.contains("Connection refused") {
        return format!(
            "Connection refused ({})\nCheck that MySQL is running on {}:{}",
            msg, endpoint.host, endpoint.port
        );
    }
    format!("Connection failed: {}", msg)
}

// Some servers return metadata columns as binary.
fn first_column(row: &MySqlRow) -> String {
    row.try_get::<String, _>(0).unwrap_or_else(|_| {
        row.try_get::<Vec<u8>, _>(0)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    })
}

/// Backtick-quote a MySQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

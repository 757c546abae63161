//! Connection settings for the binlog source and the checkpoint table

use crate::common::{CdcError, Result};
use mysql_async::{Opts, OptsBuilder};
use regex::Regex;
use std::sync::LazyLock;

/// Default checkpoint table name.
pub const DEFAULT_POSITION_TABLE: &str = "relay_positions";

const MAX_IDENTIFIER_LENGTH: usize = 64;

static IDENTIFIER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]{0,63}$").unwrap());

/// Binlog source connection.
///
/// The server must run with `gtid_mode=ON` and `binlog_format=ROW`, and the
/// user needs `REPLICATION SLAVE` and `REPLICATION CLIENT`.
#[derive(Clone)]
pub struct MySqlSourceConfig {
    pub host: String,
    /// MySQL port (default: 3306)
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Server ID for replication (must be unique among all replicas)
    pub server_id: u32,
}

impl std::fmt::Debug for MySqlSourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlSourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("server_id", &self.server_id)
            .finish()
    }
}

impl Default for MySqlSourceConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: None,
            server_id: 1001,
        }
    }
}

impl MySqlSourceConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_server_id(mut self, server_id: u32) -> Self {
        self.server_id = server_id;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(CdcError::config("source host must not be empty"));
        }
        if self.user.is_empty() {
            return Err(CdcError::config("source user must not be empty"));
        }
        if self.server_id == 0 {
            return Err(CdcError::config(
                "server_id 0 is reserved, pick a unique non-zero replica id",
            ));
        }
        Ok(())
    }

    pub fn opts(&self) -> Opts {
        connection_opts(
            &self.host,
            self.port,
            &self.user,
            self.password.as_deref(),
            None,
        )
    }
}

/// Checkpoint table connection.
#[derive(Clone)]
pub struct MySqlStoreConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Schema holding the checkpoint table
    pub database: String,
    /// Checkpoint table name (plain identifier, no schema prefix)
    pub table: String,
}

impl std::fmt::Debug for MySqlStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlStoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("database", &self.database)
            .field("table", &self.table)
            .finish()
    }
}

impl MySqlStoreConfig {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: 3306,
            user: user.into(),
            password: None,
            database: database.into(),
            table: DEFAULT_POSITION_TABLE.to_string(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(CdcError::config("checkpoint host must not be empty"));
        }
        validate_identifier(&self.database)?;
        validate_identifier(&self.table)
    }

    pub fn opts(&self) -> Opts {
        connection_opts(
            &self.host,
            self.port,
            &self.user,
            self.password.as_deref(),
            Some(&self.database),
        )
    }
}

fn connection_opts(
    host: &str,
    port: u16,
    user: &str,
    password: Option<&str>,
    database: Option<&str>,
) -> Opts {
    OptsBuilder::default()
        .ip_or_hostname(host)
        .tcp_port(port)
        .user(Some(user))
        .pass(password)
        .db_name(database)
        .into()
}

/// Validate a SQL identifier that is spliced into statements.
///
/// Must start with a letter or underscore and contain only ASCII
/// alphanumerics and underscores.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CdcError::config("identifier cannot be empty"));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(CdcError::config(format!(
            "identifier too long: {} chars (max: {})",
            name.len(),
            MAX_IDENTIFIER_LENGTH
        )));
    }

    if !IDENTIFIER_REGEX.is_match(name) {
        return Err(CdcError::config(format!(
            "invalid identifier '{}': must start with letter/underscore and contain only alphanumeric characters and underscores",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let source = MySqlSourceConfig::new("db", "repl").with_password("hunter2");
        let store = MySqlStoreConfig::new("db", "app", "relay").with_password("hunter2");

        for rendered in [format!("{:?}", source), format!("{:?}", store)] {
            assert!(!rendered.contains("hunter2"));
            assert!(rendered.contains("[REDACTED]"));
        }
    }

    #[test]
    fn test_source_defaults() {
        let config = MySqlSourceConfig::default();
        assert_eq!(config.port, 3306);
        assert_eq!(config.server_id, 1001);
        assert!(config.validate().is_ok());
        assert!(config.with_server_id(0).validate().is_err());
    }

    #[test]
    fn test_store_validation() {
        let config = MySqlStoreConfig::new("db", "app", "relay");
        assert_eq!(config.table, DEFAULT_POSITION_TABLE);
        assert!(config.validate().is_ok());

        assert!(config.clone().with_table("positions; DROP TABLE x").validate().is_err());
        assert!(config.clone().with_table("`quoted`").validate().is_err());
        assert!(MySqlStoreConfig::new("db", "app", "").validate().is_err());
    }

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_identifier("relay_positions").is_ok());
        assert!(validate_identifier("_private").is_ok());
        assert!(validate_identifier("Table123").is_ok());
        assert!(validate_identifier(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("123table").is_err());
        assert!(validate_identifier("table-name").is_err());
        assert!(validate_identifier("schema.table").is_err());
        assert!(validate_identifier(&"a".repeat(65)).is_err());
        assert!(validate_identifier("tablé").is_err());
        assert!(validate_identifier("positions\n").is_err());
    }
}

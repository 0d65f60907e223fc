//! Connection settings for every backend.
//!
//! The harness only exposes the host on its command line; everything else comes from the defaults
//! here, which match a stock local install of each server.

use std::{
    fmt::{Display, Formatter},
    path::PathBuf,
};

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub mysql: MysqlConfig,
    pub handlersocket: HandlerSocketConfig,
    pub redis: RedisConfig,
    pub sqlite: SqliteConfig,
}

impl Config {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            mysql: MysqlConfig::default(),
            handlersocket: HandlerSocketConfig::default(),
            redis: RedisConfig::default(),
            sqlite: SqliteConfig::default(),
        }
    }
}

/// A database or table name that is safe to splice into SQL text.
///
/// Parameters cannot stand in for identifiers, so names are restricted to ASCII alphanumerics and
/// underscores when they are created.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Ident(String);

impl Ident {
    pub fn new(what: &'static str, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("must not be empty")
        } else if name.len() > 64 {
            Some("longer than 64 characters")
        } else if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            Some("only ASCII letters, digits and '_' are allowed")
        } else if name.as_bytes()[0].is_ascii_digit() {
            Some("must not start with a digit")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(Error::InvalidConfig {
                what,
                value: name,
                reason,
            }),
            None => Ok(Self(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Ident {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct MysqlConfig {
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: Ident,
    pub table: Ident,
}

impl MysqlConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.user = user.into();
        self.password = password;
        self
    }

    pub fn with_database(mut self, database: &str) -> Result<Self> {
        self.database = Ident::new("database", database)?;
        Ok(self)
    }

    pub fn with_table(mut self, table: &str) -> Result<Self> {
        self.table = Ident::new("table", table)?;
        Ok(self)
    }
}

impl Default for MysqlConfig {
    fn default() -> Self {
        Self {
            port: 3306,
            user: "root".to_owned(),
            password: None,
            database: Ident("test".to_owned()),
            table: Ident("hs_test".to_owned()),
        }
    }
}

/// HandlerSocket reads the MySQL table named in [`MysqlConfig`]; only the ports and index differ.
#[derive(Debug, Clone)]
pub struct HandlerSocketConfig {
    pub read_port: u16,
    pub write_port: u16,
    pub index: String,
    /// Slot the index is opened under on each connection.
    pub index_id: u32,
}

impl HandlerSocketConfig {
    pub fn with_ports(mut self, read_port: u16, write_port: u16) -> Self {
        self.read_port = read_port;
        self.write_port = write_port;
        self
    }
}

impl Default for HandlerSocketConfig {
    fn default() -> Self {
        Self {
            read_port: 9998,
            write_port: 9999,
            index: "PRIMARY".to_owned(),
            index_id: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub port: u16,
    pub db: i64,
}

impl RedisConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self { port: 6379, db: 0 }
    }
}

/// The SQLite database lives in a local file; the host is ignored.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub path: PathBuf,
}

impl SqliteConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self::at(std::env::temp_dir().join("kvs_bench.sqlite"))
    }
}

#![warn(missing_debug_implementations)]

//! Uniform access to the key-value capable backends under benchmark.
//!
//! Every backend is driven through [`Backend`]: reset, bulk load, single-row inserts and
//! single-key lookups. Each adapter owns exactly one client connection; nothing is shared between
//! adapters, so every worker that needs a connection has to [`connect`][BackendKind::connect] its
//! own.

use std::fmt::{Display, Formatter};

use rand::{distributions::Distribution, SeedableRng};

pub mod config;
mod error;
pub mod hs_store;
pub mod mysql_store;
pub mod redis_store;
pub mod sample;
pub mod sqlite_store;

pub use config::Config;
pub use error::{Error, Result};
pub use sample::{Row, Sample};

/// The operations every benchmarked backend supports.
pub trait Backend {
    fn kind(&self) -> BackendKind;

    /// Drops any existing data, leaving an empty store ready for inserts.
    fn reset(&mut self) -> Result<()>;

    /// Resets the store and bulk loads the whole sample.
    ///
    /// Calling this repeatedly always leaves exactly the sample behind.
    fn setup(&mut self, sample: &Sample) -> Result<()>;

    fn insert_one(&mut self, row: &Row) -> Result<()>;

    /// Writes every row of the sample with one write per row.
    fn insert_all(&mut self, sample: &Sample) -> Result<()> {
        for row in sample.rows() {
            self.insert_one(row)?;
        }
        Ok(())
    }

    /// Point lookup by id. A missing id is `Ok(None)`, not an error.
    fn lookup(&mut self, id: u64) -> Result<Option<Row>>;

    /// Looks up one id drawn from `keys`.
    fn lookup_random(&mut self, keys: &mut KeyPicker) -> Result<Option<Row>> {
        let id = keys.next_id();
        self.lookup(id)
    }

    /// Number of rows currently stored.
    fn count(&mut self) -> Result<u64>;

    /// Releases the connection. Dropping an adapter releases it as well.
    fn close(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum BackendKind {
    Mysql,
    #[cfg_attr(feature = "clap", value(name = "handlersocket"))]
    HandlerSocket,
    Redis,
    Sqlite,
}

impl BackendKind {
    pub const ALL: [Self; 4] = [Self::Mysql, Self::HandlerSocket, Self::Redis, Self::Sqlite];

    pub fn name(self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::HandlerSocket => "handlersocket",
            Self::Redis => "redis",
            Self::Sqlite => "sqlite",
        }
    }

    /// Opens a fresh connection to this backend.
    pub fn connect(self, config: &Config, mode: Mode) -> Result<Box<dyn Backend>> {
        log::debug!("connecting to {self} ({mode:?})");
        Ok(match self {
            Self::Mysql => Box::new(mysql_store::MysqlStore::connect(&config.host, &config.mysql)?),
            Self::HandlerSocket => Box::new(hs_store::HandlerSocketStore::connect(config, mode)?),
            Self::Redis => Box::new(redis_store::RedisStore::connect(&config.host, &config.redis)?),
            Self::Sqlite => Box::new(sqlite_store::SqliteStore::open(&config.sqlite, &config.mysql.table)?),
        })
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which side of a backend a connection is used for.
///
/// Only HandlerSocket distinguishes them, with separate read-only and read-write ports.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Mode {
    Read,
    Write,
}

/// Draws lookup ids for a sample of `size` rows.
///
/// Ids are uniform over `0..=size`. Row ids start at 1, so one draw in `size + 1` is a lookup
/// that is guaranteed to miss and the miss path is part of every measurement.
#[derive(Debug, Clone)]
pub struct KeyPicker {
    ids: rand::distributions::Uniform<u64>,
    rng: rand_pcg::Pcg64Mcg,
}

impl KeyPicker {
    pub fn new(size: u64, rng: rand_pcg::Pcg64Mcg) -> Self {
        Self {
            ids: rand::distributions::Uniform::new_inclusive(0, size),
            rng,
        }
    }

    pub fn from_entropy(size: u64) -> Self {
        Self::new(size, rand_pcg::Pcg64Mcg::from_entropy())
    }

    pub fn seeded(size: u64, seed: u64) -> Self {
        Self::new(size, rand_pcg::Pcg64Mcg::seed_from_u64(seed))
    }

    pub fn next_id(&mut self) -> u64 {
        self.ids.sample(&mut self.rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_picker_range() {
        let mut keys = KeyPicker::seeded(5, 7);
        let mut seen = [false; 6];
        for _ in 0..1000 {
            let id = keys.next_id();
            assert!(id <= 5, "{id} out of range");
            seen[id as usize] = true;
        }
        assert!(seen.iter().all(|&s| s), "{seen:?}");
    }

    #[test]
    fn key_picker_seeded_is_reproducible() {
        let a = (0..32).map({
            let mut k = KeyPicker::seeded(1000, 3);
            move |_| k.next_id()
        });
        let b = (0..32).map({
            let mut k = KeyPicker::seeded(1000, 3);
            move |_| k.next_id()
        });
        assert!(a.eq(b));
    }

    #[test]
    fn kind_names() {
        assert_eq!(BackendKind::HandlerSocket.to_string(), "handlersocket");
        assert_eq!(BackendKind::ALL.len(), 4);
    }
}

use std::fmt::{Debug, Formatter};

use redis::Commands;

use crate::{config::RedisConfig, Backend, BackendKind, Error, Result, Row, Sample};

// SETs per pipeline round trip while bulk loading.
const LOAD_CHUNK: usize = 10_000;

/// Rows stored as plain string keys (`"<id>"` -> url) in one Redis database.
pub struct RedisStore {
    conn: redis::Connection,
    db: i64,
}

impl RedisStore {
    pub fn connect(host: &str, config: &RedisConfig) -> Result<Self> {
        let url = format!("redis://{host}:{}/{}", config.port, config.db);
        let conn = redis::Client::open(url)
            .and_then(|client| client.get_connection())
            .map_err(|e| Error::connect(BackendKind::Redis, e))?;
        Ok(Self { conn, db: config.db })
    }
}

impl Debug for RedisStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("db", &self.db).finish_non_exhaustive()
    }
}

impl Backend for RedisStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Redis
    }

    fn reset(&mut self) -> Result<()> {
        redis::cmd("FLUSHDB").query::<()>(&mut self.conn)?;
        Ok(())
    }

    fn setup(&mut self, sample: &Sample) -> Result<()> {
        self.reset()?;
        for chunk in sample.rows().chunks(LOAD_CHUNK) {
            let mut pipe = redis::pipe();
            for row in chunk {
                pipe.set(row.id, &row.value).ignore();
            }
            pipe.query::<()>(&mut self.conn)?;
        }
        Ok(())
    }

    fn insert_one(&mut self, row: &Row) -> Result<()> {
        self.conn.set::<_, _, ()>(row.id, &row.value)?;
        Ok(())
    }

    fn lookup(&mut self, id: u64) -> Result<Option<Row>> {
        let value = self.conn.get::<_, Option<String>>(id)?;
        Ok(value.map(|value| Row { id, value }))
    }

    fn count(&mut self) -> Result<u64> {
        Ok(redis::cmd("DBSIZE").query::<u64>(&mut self.conn)?)
    }

    fn close(self: Box<Self>) -> Result<()> {
        drop(self.conn);
        Ok(())
    }
}

use std::time::Duration;

use rusqlite::{Connection, OptionalExtension};

use crate::{config::Ident, config::SqliteConfig, Backend, BackendKind, Result, Row, Sample};

/// The same `(id, url)` table as the MySQL store, in a local SQLite file.
///
/// Needs no server, so it doubles as the reference backend when none is available.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    table: Ident,
    select: String,
    insert: String,
}

impl SqliteStore {
    pub fn open(config: &SqliteConfig, table: &Ident) -> Result<Self> {
        let conn = Connection::open(&config.path).map_err(|e| crate::Error::connect(BackendKind::Sqlite, e))?;
        // Parallel workers each hold their own connection to the file.
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} ( id INTEGER PRIMARY KEY, url TEXT NOT NULL );"
        ))?;
        Ok(Self {
            conn,
            select: format!("SELECT id, url FROM {table} WHERE id = ?1;"),
            insert: format!("INSERT INTO {table} (id, url) VALUES (?1, ?2);"),
            table: table.clone(),
        })
    }
}

impl Backend for SqliteStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn reset(&mut self) -> Result<()> {
        let table = &self.table;
        self.conn.execute_batch(&format!(
            r#"
            DROP TABLE IF EXISTS {table};
            CREATE TABLE {table} ( id INTEGER PRIMARY KEY, url TEXT NOT NULL );
            "#
        ))?;
        Ok(())
    }

    fn setup(&mut self, sample: &Sample) -> Result<()> {
        self.reset()?;
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&self.insert)?;
            for row in sample.rows() {
                stmt.execute((row.id, &row.value))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn insert_one(&mut self, row: &Row) -> Result<()> {
        self.conn.prepare_cached(&self.insert)?.execute((row.id, &row.value))?;
        Ok(())
    }

    fn lookup(&mut self, id: u64) -> Result<Option<Row>> {
        let row = self
            .conn
            .prepare_cached(&self.select)?
            .query_row((id,), |r| {
                Ok(Row {
                    id: r.get(0)?,
                    value: r.get(1)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    fn count(&mut self) -> Result<u64> {
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {};", self.table), (), |r| r.get::<_, u64>(0))?;
        Ok(count)
    }

    fn close(self: Box<Self>) -> Result<()> {
        if let Err((_, e)) = self.conn.close() {
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::SeedableRng;

    use super::*;
    use crate::KeyPicker;

    fn store(dir: &tempfile::TempDir) -> SqliteStore {
        let config = SqliteConfig::at(dir.path().join("t.sqlite"));
        SqliteStore::open(&config, &Ident::new("table", "hs_test").unwrap()).unwrap()
    }

    fn sample(size: u64) -> Sample {
        Sample::generate(size, &mut rand_pcg::Pcg64Mcg::seed_from_u64(9))
    }

    #[test]
    fn setup_then_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir);
        let sample = sample(100);
        store.setup(&sample).unwrap();
        assert_eq!(store.count().unwrap(), 100);

        let mut keys = KeyPicker::seeded(sample.size(), 1);
        for _ in 0..sample.size() {
            if let Some(row) = store.lookup_random(&mut keys).unwrap() {
                assert_eq!(&row, &sample.rows()[row.id as usize - 1]);
            }
        }
        for row in sample.rows() {
            assert_eq!(store.lookup(row.id).unwrap().as_ref(), Some(row));
        }
        assert_eq!(store.lookup(0).unwrap(), None);
        assert_eq!(store.lookup(101).unwrap(), None);
    }

    #[test]
    fn setup_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir);
        store.setup(&sample(50)).unwrap();
        let extra = Row {
            id: 1000,
            value: "http://x.co.jp/y".to_owned(),
        };
        store.insert_one(&extra).unwrap();
        store.setup(&sample(20)).unwrap();
        assert_eq!(store.count().unwrap(), 20);
        assert_eq!(store.lookup(1000).unwrap(), None);
    }

    #[test]
    fn insert_all_persists_every_row_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir);
        let sample = sample(64);
        store.reset().unwrap();
        assert_eq!(store.count().unwrap(), 0);
        store.insert_all(&sample).unwrap();
        assert_eq!(store.count().unwrap(), 64);

        let ids = sample
            .rows()
            .iter()
            .filter_map(|r| store.lookup(r.id).unwrap())
            .map(|r| r.id)
            .collect::<HashSet<_>>();
        assert_eq!(ids.len(), 64);

        // Primary key rejects a second copy.
        assert!(store.insert_one(&sample.rows()[0]).is_err());
    }

    #[test]
    fn reopen_sees_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = store(&dir);
        first.setup(&sample(10)).unwrap();
        Box::new(first).close().unwrap();

        let mut second = store(&dir);
        assert_eq!(second.count().unwrap(), 10);
        assert!(second.lookup(10).unwrap().is_some());
    }
}

use mysql::{prelude::Queryable, Conn, Opts, OptsBuilder};

use crate::{
    config::{Ident, MysqlConfig},
    Backend, BackendKind, Error, Result, Row, Sample,
};

/// A table of `(id, url)` rows in MySQL, accessed over plain SQL.
#[derive(Debug)]
pub struct MysqlStore {
    conn: Conn,
    table: Ident,
    select: String,
    insert: String,
}

impl MysqlStore {
    pub fn connect(host: &str, config: &MysqlConfig) -> Result<Self> {
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(host))
            .tcp_port(config.port)
            .user(Some(&config.user))
            .pass(config.password.as_deref())
            .db_name(Some(config.database.as_str()));
        let conn = Conn::new(Opts::from(opts)).map_err(|e| Error::connect(BackendKind::Mysql, e))?;
        let table = config.table.clone();
        Ok(Self {
            conn,
            select: format!("SELECT id, url FROM {table} WHERE id = ?"),
            insert: format!("INSERT INTO {table} (id, url) VALUES (?, ?)"),
            table,
        })
    }
}

impl Backend for MysqlStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Mysql
    }

    fn reset(&mut self) -> Result<()> {
        let table = &self.table;
        self.conn.query_drop(format!("DROP TABLE IF EXISTS {table}"))?;
        self.conn.query_drop(format!(
            "CREATE TABLE {table} (
                id INT UNSIGNED NOT NULL PRIMARY KEY,
                url VARCHAR(100) NOT NULL
            ) ENGINE = InnoDB DEFAULT CHARSET = utf8mb4"
        ))?;
        Ok(())
    }

    fn setup(&mut self, sample: &Sample) -> Result<()> {
        let path = sample.exported().ok_or(Error::NotExported(BackendKind::Mysql))?;
        self.reset()?;
        // The file is read by the server, so this only works against a server on this machine.
        self.conn.query_drop(format!(
            "LOAD DATA INFILE {} INTO TABLE {} FIELDS TERMINATED BY ',' LINES TERMINATED BY '\\n' (id, url)",
            quote_literal(&path.to_string_lossy()),
            self.table,
        ))?;
        Ok(())
    }

    fn insert_one(&mut self, row: &Row) -> Result<()> {
        self.conn.exec_drop(&self.insert, (row.id, row.value.as_str()))?;
        Ok(())
    }

    fn lookup(&mut self, id: u64) -> Result<Option<Row>> {
        let row = self.conn.exec_first::<(u64, String), _, _>(&self.select, (id,))?;
        Ok(row.map(|(id, value)| Row { id, value }))
    }

    fn count(&mut self) -> Result<u64> {
        let count = self.conn.query_first::<u64, _>(format!("SELECT COUNT(*) FROM {}", self.table))?;
        Ok(count.unwrap_or(0))
    }

    fn close(self: Box<Self>) -> Result<()> {
        drop(self.conn);
        Ok(())
    }
}

/// Quotes `s` as a MySQL string literal.
fn quote_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals() {
        assert_eq!(quote_literal("/tmp/sample.txt"), "'/tmp/sample.txt'");
        assert_eq!(quote_literal("it's"), "'it\\'s'");
        assert_eq!(quote_literal(r"C:\tmp"), r"'C:\\tmp'");
    }
}

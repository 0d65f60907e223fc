use handlersocket::{Client, Record};

use crate::{mysql_store::MysqlStore, Backend, BackendKind, Config, Error, Mode, Result, Row, Sample};

const COLUMNS: [&str; 2] = ["id", "url"];

/// The MySQL table, read and written through the HandlerSocket plugin instead of SQL.
///
/// HandlerSocket has no DDL, so resetting, loading and counting go through a plain MySQL
/// connection that is only opened the first time one of those is needed.
#[derive(Debug)]
pub struct HandlerSocketStore {
    client: Client,
    index_id: u32,
    config: Config,
    admin: Option<MysqlStore>,
}

impl HandlerSocketStore {
    pub fn connect(config: &Config, mode: Mode) -> Result<Self> {
        let hs = &config.handlersocket;
        let port = match mode {
            Mode::Read => hs.read_port,
            Mode::Write => hs.write_port,
        };
        let client = Client::connect((config.host.as_str(), port)).map_err(|e| Error::connect(BackendKind::HandlerSocket, e))?;
        let mut this = Self {
            client,
            index_id: hs.index_id,
            config: config.clone(),
            admin: None,
        };
        this.open_index()?;
        Ok(this)
    }

    fn open_index(&mut self) -> Result<()> {
        let Config { mysql, handlersocket, .. } = &self.config;
        self.client.open_index(
            self.index_id,
            mysql.database.as_str(),
            mysql.table.as_str(),
            &handlersocket.index,
            &COLUMNS,
        )?;
        Ok(())
    }

    fn admin(&mut self) -> Result<&mut MysqlStore> {
        let admin = match self.admin.take() {
            Some(admin) => admin,
            None => MysqlStore::connect(&self.config.host, &self.config.mysql)?,
        };
        Ok(self.admin.insert(admin))
    }
}

impl Backend for HandlerSocketStore {
    fn kind(&self) -> BackendKind {
        BackendKind::HandlerSocket
    }

    fn reset(&mut self) -> Result<()> {
        self.admin()?.reset()?;
        // The table was recreated underneath the plugin; reopen it.
        self.open_index()
    }

    fn setup(&mut self, sample: &Sample) -> Result<()> {
        self.admin()?.setup(sample)?;
        self.open_index()
    }

    fn insert_one(&mut self, row: &Row) -> Result<()> {
        let id = row.id.to_string();
        self.client.insert(self.index_id, &[id.as_str(), row.value.as_str()])?;
        Ok(())
    }

    fn lookup(&mut self, id: u64) -> Result<Option<Row>> {
        match self.client.find_one(self.index_id, &id.to_string())? {
            Some(record) => to_row(record).map(Some),
            None => Ok(None),
        }
    }

    fn count(&mut self) -> Result<u64> {
        self.admin()?.count()
    }

    fn close(self: Box<Self>) -> Result<()> {
        let Self { client, admin, .. } = *self;
        client.close()?;
        if let Some(admin) = admin {
            Box::new(admin).close()?;
        }
        Ok(())
    }
}

fn to_row(record: Record) -> Result<Row> {
    let bad = |detail: String| Error::BadRow {
        backend: BackendKind::HandlerSocket,
        detail,
    };
    let mut fields = record.into_iter();
    let (Some(Some(id)), Some(Some(value)), None) = (fields.next(), fields.next(), fields.next()) else {
        return Err(bad("expected two non-null columns".to_owned()));
    };
    let id = std::str::from_utf8(&id)
        .ok()
        .and_then(|id| id.parse::<u64>().ok())
        .ok_or_else(|| bad(format!("invalid id {:?}", String::from_utf8_lossy(&id))))?;
    let value = String::from_utf8(value).map_err(|e| bad(format!("value is not utf-8: {e}")))?;
    Ok(Row { id, value })
}

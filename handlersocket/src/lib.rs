#![warn(missing_debug_implementations)]

//! A small blocking client for the MySQL HandlerSocket plugin.
//!
//! Only the requests needed for point lookups and single-row inserts are supported: opening an
//! index slot, `find` and `insert`. A connection is not thread safe and is meant to be owned by a
//! single caller; open one client per thread or process.

use std::{
    collections::HashMap,
    io::{BufRead, BufReader, BufWriter, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
};

use log::trace;

use crate::codec::{Request, Response};

pub mod codec;
mod error;

pub use error::Error;

/// One row returned by a find, one entry per opened column.
pub type Record = Vec<Option<Vec<u8>>>;

/// Comparison operators accepted by `find`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Op {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug)]
pub struct Client {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    // index id -> number of opened columns
    indexes: HashMap<u32, usize>,
    line: Vec<u8>,
}

impl Client {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self, Error> {
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream);
        Ok(Self {
            reader,
            writer,
            indexes: HashMap::new(),
            line: Vec::with_capacity(256),
        })
    }

    /// Opens `index` of `database.table` under slot `id`, exposing `columns` in that order.
    ///
    /// Slots are per connection; reopening an id replaces the previous definition.
    pub fn open_index(&mut self, id: u32, database: &str, table: &str, index: &str, columns: &[&str]) -> Result<(), Error> {
        let request = Request::new()
            .token("P")
            .token(id.to_string())
            .token(database)
            .token(table)
            .token(index)
            .token(columns.join(","))
            .finish();
        self.call(request)?;
        self.indexes.insert(id, columns.len());
        Ok(())
    }

    pub fn find(&mut self, id: u32, op: Op, keys: &[&str], limit: u32, offset: u32) -> Result<Vec<Record>, Error> {
        let expected = self.columns(id)?;
        let mut request = Request::new().token(id.to_string()).token(op.as_str()).token(keys.len().to_string());
        for key in keys {
            request = request.token(key);
        }
        let request = request.token(limit.to_string()).token(offset.to_string()).finish();
        let response = self.call(request)?;
        if response.columns != expected && !response.values.is_empty() {
            return Err(Error::Malformed(
                format!("expected {expected} columns, server sent {}", response.columns).into(),
            ));
        }
        Ok(response.rows().map(|r| r.to_vec()).collect())
    }

    /// Looks up the single row whose key equals `key`.
    pub fn find_one(&mut self, id: u32, key: &str) -> Result<Option<Record>, Error> {
        Ok(self.find(id, Op::Eq, &[key], 1, 0)?.into_iter().next())
    }

    /// Inserts one row; `values` must match the columns the slot was opened with.
    pub fn insert(&mut self, id: u32, values: &[&str]) -> Result<(), Error> {
        self.columns(id)?;
        let mut request = Request::new().token(id.to_string()).token("+").token(values.len().to_string());
        for value in values {
            request = request.token(value);
        }
        self.call(request.finish())?;
        Ok(())
    }

    pub fn close(mut self) -> Result<(), Error> {
        self.writer.flush()?;
        self.writer.get_ref().shutdown(Shutdown::Both)?;
        Ok(())
    }

    fn columns(&self, id: u32) -> Result<usize, Error> {
        self.indexes.get(&id).copied().ok_or(Error::UnknownIndex(id))
    }

    fn call(&mut self, request: Vec<u8>) -> Result<Response, Error> {
        trace!("-> {:?}", bstr::BStr::new(&request));
        self.writer.write_all(&request)?;
        self.writer.flush()?;

        self.line.clear();
        if self.reader.read_until(b'\n', &mut self.line)? == 0 {
            return Err(Error::Closed);
        }
        if self.line.last() != Some(&b'\n') {
            return Err(Error::Closed);
        }
        self.line.pop();
        trace!("<- {:?}", bstr::BStr::new(&self.line));
        codec::parse_response(&self.line)
    }
}

#[cfg(test)]
mod tests {
    use std::{net::TcpListener, thread};

    use super::*;

    /// Accepts one connection and answers each request line with the next canned response,
    /// returning the requests it saw.
    fn fake_server(responses: Vec<&'static str>) -> (std::net::SocketAddr, thread::JoinHandle<Vec<Vec<u8>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut seen = Vec::new();
            for response in responses {
                let mut line = Vec::new();
                if reader.read_until(b'\n', &mut line).unwrap() == 0 {
                    break;
                }
                seen.push(line);
                writer.write_all(response.as_bytes()).unwrap();
            }
            seen
        });
        (addr, handle)
    }

    #[test]
    fn open_find_insert() {
        let (addr, server) = fake_server(vec!["0\t1\n", "0\t2\t7\thttp://x.co.jp/y\n", "0\t2\n", "0\t1\n"]);
        let mut client = Client::connect(addr).unwrap();
        client.open_index(1, "test", "hs_test", "PRIMARY", &["id", "url"]).unwrap();

        let row = client.find_one(1, "7").unwrap().unwrap();
        assert_eq!(row, vec![Some(b"7".to_vec()), Some(b"http://x.co.jp/y".to_vec())]);
        assert!(client.find_one(1, "0").unwrap().is_none());
        client.insert(1, &["8", "http://z.co.jp/w"]).unwrap();
        client.close().unwrap();

        let seen = server.join().unwrap();
        assert_eq!(seen[0], b"P\t1\ttest\ths_test\tPRIMARY\tid,url\n");
        assert_eq!(seen[1], b"1\t=\t1\t7\t1\t0\n");
        assert_eq!(seen[3], b"1\t+\t2\t8\thttp://z.co.jp/w\n");
    }

    #[test]
    fn server_error_is_reported() {
        let (addr, server) = fake_server(vec!["2\t1\topen_table\n"]);
        let mut client = Client::connect(addr).unwrap();
        let err = client.open_index(1, "test", "missing", "PRIMARY", &["id"]).unwrap_err();
        assert!(matches!(err, Error::Server { code: 2, .. }), "{err}");
        drop(client);
        server.join().unwrap();
    }

    #[test]
    fn unopened_index() {
        let (addr, server) = fake_server(vec![]);
        let mut client = Client::connect(addr).unwrap();
        assert!(matches!(client.find_one(3, "1"), Err(Error::UnknownIndex(3))));
        drop(client);
        server.join().unwrap();
    }

    #[test]
    fn closed_connection() {
        let (addr, server) = fake_server(vec!["0\t1\n"]);
        let mut client = Client::connect(addr).unwrap();
        client.open_index(1, "test", "hs_test", "PRIMARY", &["id", "url"]).unwrap();
        server.join().unwrap();
        assert!(matches!(client.find_one(1, "1"), Err(Error::Closed | Error::Io(_))));
    }
}

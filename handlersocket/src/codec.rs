//! Encoding for the HandlerSocket text protocol.
//!
//! A request or response is one line of tab separated tokens terminated by `\n`. Bytes in
//! `0x00..=0x0f` inside a token are written as `0x01` followed by the byte shifted by `0x40`, and a
//! token consisting of the single byte `0x00` stands for SQL `NULL`.

use bstr::BString;

use crate::Error;

const NULL: u8 = 0x00;
const ESCAPE_PREFIX: u8 = 0x01;
const ESCAPE_SHIFT: u8 = 0x40;
const SEPARATOR: u8 = b'\t';
const TERMINATOR: u8 = b'\n';

/// Appends `token` to `out`, escaping control bytes.
pub fn escape_into(token: &[u8], out: &mut Vec<u8>) {
    for &b in token {
        if b <= 0x0f {
            out.push(ESCAPE_PREFIX);
            out.push(b | ESCAPE_SHIFT);
        } else {
            out.push(b);
        }
    }
}

/// Reverses [`escape_into`]. Returns `None` for the `NULL` token.
pub fn unescape(token: &[u8]) -> Result<Option<Vec<u8>>, Error> {
    if token == [NULL] {
        return Ok(None);
    }
    let mut out = Vec::with_capacity(token.len());
    let mut bytes = token.iter().copied();
    while let Some(b) = bytes.next() {
        if b == ESCAPE_PREFIX {
            match bytes.next() {
                Some(e) if e >= ESCAPE_SHIFT => out.push(e - ESCAPE_SHIFT),
                _ => return Err(Error::Malformed(BString::from(token))),
            }
        } else {
            out.push(b);
        }
    }
    Ok(Some(out))
}

/// Builds one request line out of its tokens.
#[derive(Debug)]
pub struct Request {
    buf: Vec<u8>,
    empty: bool,
}

impl Request {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(64),
            empty: true,
        }
    }

    pub fn token(mut self, token: impl AsRef<[u8]>) -> Self {
        if !self.empty {
            self.buf.push(SEPARATOR);
        }
        self.empty = false;
        escape_into(token.as_ref(), &mut self.buf);
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.buf.push(TERMINATOR);
        self.buf
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

/// A successful response: the column count followed by the raw values, row major.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Response {
    pub columns: usize,
    pub values: Vec<Option<Vec<u8>>>,
}

impl Response {
    /// Groups the values into rows of `columns` entries.
    pub fn rows(&self) -> impl Iterator<Item = &[Option<Vec<u8>>]> {
        self.values.chunks(self.columns.max(1))
    }
}

/// Parses one response line, without its trailing newline.
pub fn parse_response(line: &[u8]) -> Result<Response, Error> {
    let malformed = || Error::Malformed(BString::from(line));
    let mut tokens = line.split(|&b| b == SEPARATOR);
    let code = tokens
        .next()
        .and_then(|t| std::str::from_utf8(t).ok())
        .and_then(|t| t.parse::<u32>().ok())
        .ok_or_else(malformed)?;
    let columns = tokens
        .next()
        .and_then(|t| std::str::from_utf8(t).ok())
        .and_then(|t| t.parse::<usize>().ok())
        .ok_or_else(malformed)?;

    if code != 0 {
        let message = tokens
            .next()
            .map(|t| String::from_utf8_lossy(t).into_owned())
            .unwrap_or_default();
        return Err(Error::Server { code, message });
    }

    let values = tokens.map(unescape).collect::<Result<Vec<_>, _>>()?;
    if columns != 0 && values.len() % columns != 0 {
        return Err(malformed());
    }
    Ok(Response { columns, values })
}

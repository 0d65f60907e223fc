use std::path::{Path, PathBuf};

use rand::{distributions::Distribution, Rng};

use crate::{Error, Result};

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Row {
    pub id: u64,
    pub value: String,
}

/// The rows every backend is loaded with: ids `1..=size`, each with a random URL as its value.
///
/// Values only ever contain `[0-9a-z:/.]`, so they can be written to a comma separated file
/// without quoting.
#[derive(Debug)]
pub struct Sample {
    rows: Vec<Row>,
    exported: Option<PathBuf>,
}

impl Sample {
    pub fn generate(size: u64, rng: &mut impl Rng) -> Self {
        let rows = (1..=size)
            .map(|id| Row {
                id,
                value: url(rng),
            })
            .collect();
        Self { rows, exported: None }
    }

    pub fn size(&self) -> u64 {
        self.rows.len() as u64
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Writes `id,value` lines to `path`, one per row, for backends that bulk load from a file.
    pub fn export(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let file = fs_err::File::create(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(file);
        for row in &self.rows {
            let id = row.id.to_string();
            writer.write_record([id.as_str(), row.value.as_str()])?;
        }
        writer.flush()?;
        log::debug!("exported {} rows to {}", self.rows.len(), path.display());
        self.exported = Some(path);
        Ok(())
    }

    /// Where the sample was last exported to, if anywhere.
    pub fn exported(&self) -> Option<&Path> {
        self.exported.as_deref()
    }

    /// Reads a file written by [`export`][Self::export].
    pub fn import(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = fs_err::File::open(&path)?;
        let mut reader = csv::ReaderBuilder::new().has_headers(false).from_reader(file);
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let line = record.position().map_or(0, |p| p.line());
            let bad = |detail: String| Error::SampleFormat { line, detail };
            if record.len() != 2 {
                return Err(bad(format!("expected 2 fields, found {}", record.len())));
            }
            let id = record[0]
                .parse::<u64>()
                .map_err(|e| bad(format!("invalid id {:?}: {e}", &record[0])))?;
            rows.push(Row {
                id,
                value: record[1].to_owned(),
            });
        }
        Ok(Self {
            rows,
            exported: Some(path),
        })
    }
}

impl<'a> IntoIterator for &'a Sample {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

fn url(rng: &mut impl Rng) -> String {
    let lens = rand::distributions::Uniform::new_inclusive(10, 19);
    let host_len = lens.sample(rng);
    let path_len = lens.sample(rng);
    let mut url = String::with_capacity(14 + host_len + path_len);
    url.push_str("http://");
    push_base36(rng, host_len, &mut url);
    url.push_str(".co.jp/");
    push_base36(rng, path_len, &mut url);
    url
}

fn push_base36(rng: &mut impl Rng, len: usize, out: &mut String) {
    out.extend((0..len).map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())])));
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn rng() -> rand_pcg::Pcg64Mcg {
        rand_pcg::Pcg64Mcg::seed_from_u64(42)
    }

    #[test]
    fn ids_are_dense() {
        for size in [1, 2, 17, 1000] {
            let sample = Sample::generate(size, &mut rng());
            assert_eq!(sample.size(), size);
            assert!(sample.rows().iter().map(|r| r.id).eq(1..=size));
        }
    }

    #[test]
    fn values_are_url_shaped() {
        let sample = Sample::generate(500, &mut rng());
        for row in &sample {
            assert!((20..=200).contains(&row.value.len()), "{:?}", row.value);
            assert!(row.value.starts_with("http://"));
            assert!(row.value.contains(".co.jp/"));
            assert!(!row.value.contains(',') && !row.value.contains('\n'));
        }
    }

    #[test]
    fn export_import_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.txt");
        let mut sample = Sample::generate(250, &mut rng());
        assert!(sample.exported().is_none());
        sample.export(&path).unwrap();
        assert_eq!(sample.exported(), Some(path.as_path()));

        let text = fs_err::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 250);
        assert_eq!(text.lines().next().unwrap(), format!("1,{}", sample.rows()[0].value));

        let back = Sample::import(&path).unwrap();
        assert_eq!(back.rows(), sample.rows());
    }

    #[test]
    fn import_rejects_bad_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        fs_err::write(&path, "1,http://a.co.jp/b\nx,http://c.co.jp/d\n").unwrap();
        match Sample::import(&path) {
            Err(Error::SampleFormat { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {other:?}"),
        }
    }
}

use kvs::{Backend, KeyPicker};
use log::{debug, error, warn};

/// What one worker did. Failures are reported here rather than propagated.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WorkerReport {
    pub index: u64,
    pub completed: u64,
    pub hits: u64,
    pub failure: Option<String>,
}

impl WorkerReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Lookup keys for worker `index`: derived from `seed` when given, so reruns repeat, otherwise
/// from entropy.
pub fn keys_for(size: u64, seed: Option<u64>, index: u64) -> KeyPicker {
    match seed {
        Some(seed) => KeyPicker::seeded(size, seed.wrapping_add(index).wrapping_add(1)),
        None => KeyPicker::from_entropy(size),
    }
}

/// Opens a connection with `connect`, runs `ops` random lookups and closes it again.
///
/// The first failing lookup ends the worker; it is logged with its operation index.
pub fn run(
    index: u64,
    ops: u64,
    mut keys: KeyPicker,
    connect: impl FnOnce() -> anyhow::Result<Box<dyn Backend>>,
) -> WorkerReport {
    let mut report = WorkerReport {
        index,
        completed: 0,
        hits: 0,
        failure: None,
    };
    let mut backend = match connect() {
        Ok(backend) => backend,
        Err(e) => {
            error!("worker {index}: {e:#}");
            report.failure = Some(format!("{e:#}"));
            return report;
        }
    };

    for op in 0..ops {
        match backend.lookup_random(&mut keys) {
            Ok(row) => {
                report.completed += 1;
                report.hits += u64::from(row.is_some());
            }
            Err(e) => {
                error!("worker {index}: lookup #{op} against {} failed: {e}", backend.kind());
                report.failure = Some(format!("lookup #{op}: {e}"));
                break;
            }
        }
    }

    if let Err(e) = backend.close() {
        warn!("worker {index}: closing connection: {e}");
        report.failure.get_or_insert_with(|| format!("close: {e}"));
    }
    debug!("worker {index}: {} lookups, {} hits", report.completed, report.hits);
    report
}

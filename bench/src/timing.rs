use std::{
    ops::{Add, Sub},
    time::{Duration, Instant},
};

use anyhow::Context;

/// User and system CPU time.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct CpuTime {
    pub user: Duration,
    pub sys: Duration,
}

impl CpuTime {
    /// CPU time used so far by this process plus every child process it has waited for.
    ///
    /// Including children means a measurement spanning a full fork/join batch accounts for the
    /// workers' CPU time too. `None` where resource usage is unavailable.
    #[cfg(unix)]
    pub fn now() -> Option<Self> {
        Some(rusage(libc::RUSAGE_SELF)? + rusage(libc::RUSAGE_CHILDREN)?)
    }

    #[cfg(not(unix))]
    pub fn now() -> Option<Self> {
        None
    }
}

#[cfg(unix)]
fn rusage(who: libc::c_int) -> Option<CpuTime> {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    if unsafe { libc::getrusage(who, usage.as_mut_ptr()) } != 0 {
        return None;
    }
    let usage = unsafe { usage.assume_init() };
    Some(CpuTime {
        user: timeval(usage.ru_utime),
        sys: timeval(usage.ru_stime),
    })
}

#[cfg(unix)]
fn timeval(tv: libc::timeval) -> Duration {
    Duration::new(tv.tv_sec.max(0) as u64, (tv.tv_usec.max(0) as u32) * 1000)
}

impl Add for CpuTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            user: self.user + rhs.user,
            sys: self.sys + rhs.sys,
        }
    }
}

impl Sub for CpuTime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            user: self.user.saturating_sub(rhs.user),
            sys: self.sys.saturating_sub(rhs.sys),
        }
    }
}

/// One labeled measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingRecord {
    pub label: String,
    pub real: Duration,
    pub cpu: Option<CpuTime>,
}

impl TimingRecord {
    pub fn real_seconds(&self) -> f64 {
        self.real.as_secs_f64()
    }

    pub fn user_seconds(&self) -> Option<f64> {
        self.cpu.map(|c| c.user.as_secs_f64())
    }

    pub fn sys_seconds(&self) -> Option<f64> {
        self.cpu.map(|c| c.sys.as_secs_f64())
    }
}

/// Runs labeled operations and keeps one [`TimingRecord`] per successful run, in run order.
#[derive(Debug, Default)]
pub struct TimedRunner {
    records: Vec<TimingRecord>,
}

impl TimedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `op` once.
    ///
    /// A failing `op` leaves no record behind; the error is returned with the label attached.
    pub fn once<T, E>(&mut self, label: impl Into<String>, op: impl FnOnce() -> Result<T, E>) -> anyhow::Result<T>
    where
        E: Into<anyhow::Error>,
    {
        let label = label.into();
        let (result, real, cpu) = measure(op);
        let value = result.map_err(Into::<anyhow::Error>::into).with_context(|| format!("{label} failed"))?;
        log::debug!("{label}: {real:.2?}");
        self.records.push(TimingRecord { label, real, cpu });
        Ok(value)
    }

    /// Runs `op` `n` times in a tight loop, passing the iteration index, and records the total.
    pub fn repeat<E>(&mut self, label: impl Into<String>, n: u64, mut op: impl FnMut(u64) -> Result<(), E>) -> anyhow::Result<()>
    where
        E: Into<anyhow::Error>,
    {
        self.once(label, || {
            for i in 0..n {
                op(i).map_err(Into::<anyhow::Error>::into).with_context(|| format!("operation #{i}"))?;
            }
            anyhow::Ok(())
        })
    }

    pub fn records(&self) -> &[TimingRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<TimingRecord> {
        self.records
    }
}

fn measure<R>(f: impl FnOnce() -> R) -> (R, Duration, Option<CpuTime>) {
    let cpu_start = CpuTime::now();
    let start = Instant::now();
    let r = f();
    let real = start.elapsed();
    let cpu = match (cpu_start, CpuTime::now()) {
        (Some(start), Some(end)) => Some(end - start),
        _ => None,
    };
    (r, real, cpu)
}

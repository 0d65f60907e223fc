#![warn(missing_debug_implementations)]

//! Benchmark driver: loads one generated sample into every selected backend and times inserts,
//! sequential lookups and lookups spread over worker processes.

use std::{num::NonZeroU64, thread, time::Duration};

use anyhow::{bail, Context};
use kdam::BarExt;
use kvs::{BackendKind, Config, Mode, Sample};
use log::{info, warn};
use rand::SeedableRng;

use crate::{
    cli::{Cli, Phase},
    parallel::{ParallelRunner, Spawn},
    timing::TimedRunner,
};

pub mod cli;
pub mod parallel;
pub mod report;
pub mod timing;
pub mod worker;

/// The label a measurement is reported under, e.g. `redis [parallel]`.
pub fn label(kind: BackendKind, phase: Phase) -> String {
    format!("{kind} [{phase}]")
}

#[derive(Debug)]
pub struct Harness {
    cli: Cli,
    config: Config,
    sample: Sample,
}

impl Harness {
    /// Generates the sample and exports it to the data directory.
    pub fn new(cli: Cli) -> anyhow::Result<Self> {
        let mut rng = match cli.seed {
            Some(seed) => rand_pcg::Pcg64Mcg::seed_from_u64(seed),
            None => rand_pcg::Pcg64Mcg::from_entropy(),
        };
        info!("Generating {} rows...", cli.size);
        let mut sample = Sample::generate(cli.size, &mut rng);
        fs_err::create_dir_all(&cli.data_dir)?;
        sample.export(cli.sample_path()).context("exporting the sample")?;
        let config = cli.config();
        Ok(Self { cli, config, sample })
    }

    pub fn cli(&self) -> &Cli {
        &self.cli
    }

    pub fn sample(&self) -> &Sample {
        &self.sample
    }

    /// Runs every selected phase against every selected backend, recording into `timer`.
    ///
    /// `spawner_for` provides the workers of the parallel phase for one backend. The first failing
    /// measurement ends the run; everything measured before it stays in `timer`.
    pub fn run<S: Spawn>(
        &self,
        timer: &mut TimedRunner,
        spawner_for: impl Fn(BackendKind) -> anyhow::Result<S>,
    ) -> anyhow::Result<()> {
        let backends = self.cli.backends();
        let mut prepared = false;
        for phase in self.cli.phases() {
            info!("'{phase}' benchmark...");
            match phase {
                Phase::Insert => {
                    for &kind in &backends {
                        self.insert(timer, kind)?;
                    }
                    prepared = false;
                }
                Phase::Lookup => {
                    if !prepared {
                        self.prepare(&backends)?;
                        prepared = true;
                    }
                    for &kind in &backends {
                        self.lookup(timer, kind)?;
                    }
                }
                Phase::Parallel => {
                    if !prepared {
                        self.prepare(&backends)?;
                        prepared = true;
                    }
                    self.settle()?;
                    for &kind in &backends {
                        let spawner = spawner_for(kind)?;
                        self.parallel(timer, kind, &spawner)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn connect(&self, kind: BackendKind, mode: Mode) -> anyhow::Result<Box<dyn kvs::Backend>> {
        Ok(kind.connect(&self.config, mode)?)
    }

    /// Loads the full sample into every backend.
    fn prepare(&self, backends: &[BackendKind]) -> anyhow::Result<()> {
        info!("Preparing data...");
        for &kind in backends {
            let mut backend = self.connect(kind, Mode::Write)?;
            backend
                .setup(&self.sample)
                .with_context(|| format!("loading the sample into {kind}"))?;
            backend.close()?;
        }
        Ok(())
    }

    fn insert(&self, timer: &mut TimedRunner, kind: BackendKind) -> anyhow::Result<()> {
        let mut backend = self.connect(kind, Mode::Write)?;
        backend.reset()?;
        timer.once(label(kind, Phase::Insert), || backend.insert_all(&self.sample))?;
        let stored = backend.count()?;
        if stored != self.sample.size() {
            bail!("{kind} holds {stored} rows after inserting {}", self.sample.size());
        }
        backend.close()?;
        Ok(())
    }

    fn lookup(&self, timer: &mut TimedRunner, kind: BackendKind) -> anyhow::Result<()> {
        let mut backend = self.connect(kind, Mode::Read)?;
        let mut keys = worker::keys_for(self.cli.size, self.cli.seed, 0);
        timer.repeat(label(kind, Phase::Lookup), self.cli.size, |_| {
            backend.lookup_random(&mut keys).map(drop)
        })?;
        backend.close()?;
        Ok(())
    }

    fn parallel<S: Spawn>(&self, timer: &mut TimedRunner, kind: BackendKind, spawner: &S) -> anyhow::Result<()> {
        let workers = NonZeroU64::new(self.cli.threads).context("at least one worker is needed")?;
        let runner = ParallelRunner::new(self.cli.size, workers);
        if runner.ops_per_worker() == 0 {
            warn!("{} workers share {} lookups; every worker runs none", workers, self.cli.size);
        } else if runner.dropped_ops() > 0 {
            warn!(
                "{} lookups do not divide evenly over {} workers; running {}",
                self.cli.size,
                self.cli.threads,
                self.cli.size - runner.dropped_ops()
            );
        }
        let outcome = timer.once(label(kind, Phase::Parallel), || runner.run(spawner))?;
        if outcome.failed > 0 {
            warn!("{kind}: {} of {} workers failed", outcome.failed, outcome.workers);
        }
        Ok(())
    }

    /// Gives the freshly loaded backends time to flush before anything is timed.
    fn settle(&self) -> anyhow::Result<()> {
        if self.cli.settle == 0 {
            return Ok(());
        }
        info!("Wait...");
        let mut bar = kdam::Bar::new(self.cli.settle as usize);
        for _ in 0..self.cli.settle {
            thread::sleep(Duration::from_secs(1));
            bar.update(1)?;
        }
        bar.clear()?;
        Ok(())
    }
}

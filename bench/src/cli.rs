use std::{
    ffi::OsString,
    fmt::{Display, Formatter},
    io::Write,
    path::PathBuf,
};

use clap::{builder::NonEmptyStringValueParser, error::ErrorKind, Args, CommandFactory, Parser, Subcommand, ValueEnum};
use kvs::{config::SqliteConfig, BackendKind, Config};
use log::LevelFilter;

pub const SAMPLE_FILE: &str = "kvs_bench_sample.txt";
pub const SQLITE_FILE: &str = "kvs_bench.sqlite";

/// Times inserts and point lookups against several key-value capable backends.
#[derive(Debug, Clone, Parser)]
#[command(name = "kvs-bench")]
pub struct Cli {
    /// Number of records to generate, and of lookups to run per backend
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub size: u64,

    /// Number of worker processes in the parallel phase
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    pub threads: u64,

    /// Host every backend is reached at
    #[arg(long, value_parser = NonEmptyStringValueParser::new())]
    pub host: String,

    /// Backend to benchmark; repeat to select several
    #[arg(
        long = "backend",
        value_enum,
        default_values_t = [BackendKind::Mysql, BackendKind::HandlerSocket, BackendKind::Redis]
    )]
    pub backends: Vec<BackendKind>,

    /// Benchmark phase to run; repeat to select several
    #[arg(long = "phase", value_enum, default_values_t = [Phase::Parallel])]
    pub phases: Vec<Phase>,

    /// Seconds to let the backends settle between loading data and the parallel phase
    #[arg(long, default_value_t = 10)]
    pub settle: u64,

    /// Seed for the sample and lookup keys; random when absent
    #[arg(long)]
    pub seed: Option<u64>,

    /// Directory for the exported sample and the SQLite database
    #[arg(long, default_value_os_t = std::env::temp_dir())]
    pub data_dir: PathBuf,

    #[arg(long, default_value_t = LevelFilter::Info)]
    pub log_level: LevelFilter,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Runs one share of the parallel phase; started by the harness itself
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Debug, Clone, Args)]
pub struct WorkerArgs {
    #[arg(long, value_enum)]
    pub backend: BackendKind,
    #[arg(long)]
    pub index: u64,
    #[arg(long)]
    pub ops: u64,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, ValueEnum)]
pub enum Phase {
    /// Time one insert per row into an emptied backend
    Insert,
    /// Time `size` sequential random lookups
    Lookup,
    /// Time `size` random lookups spread over `threads` worker processes
    Parallel,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Insert => "insert",
            Self::Lookup => "lookup",
            Self::Parallel => "parallel",
        })
    }
}

impl Cli {
    /// Connection settings for every backend, built from the defaults and the given host.
    pub fn config(&self) -> Config {
        let mut config = Config::new(&self.host);
        config.sqlite = SqliteConfig::at(self.data_dir.join(SQLITE_FILE));
        config
    }

    pub fn sample_path(&self) -> PathBuf {
        self.data_dir.join(SAMPLE_FILE)
    }

    /// Phases in execution order, each at most once.
    pub fn phases(&self) -> Vec<Phase> {
        let mut phases = self.phases.clone();
        phases.sort();
        phases.dedup();
        phases
    }

    /// Backends in the order given, each at most once.
    pub fn backends(&self) -> Vec<BackendKind> {
        let mut backends = Vec::with_capacity(self.backends.len());
        for &kind in &self.backends {
            if !backends.contains(&kind) {
                backends.push(kind);
            }
        }
        backends
    }

    /// The global arguments a worker process needs to rebuild the same configuration.
    pub fn worker_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--size".into(),
            self.size.to_string().into(),
            "--host".into(),
            self.host.clone().into(),
            "--data-dir".into(),
            self.data_dir.clone().into(),
            "--log-level".into(),
            self.log_level.to_string().into(),
        ];
        if let Some(seed) = self.seed {
            args.push("--seed".into());
            args.push(seed.to_string().into());
        }
        args
    }
}

/// Parses the process arguments. On invalid input the error and the usage text go to stdout and
/// the process exits with status 2.
pub fn parse() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{}", e.render());
            let _ = writeln!(stdout, "{}", Cli::command().render_help());
            let _ = stdout.flush();
            std::process::exit(2)
        }
    }
}

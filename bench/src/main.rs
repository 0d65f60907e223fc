use std::process::ExitCode;

use bench::{
    cli::{self, Cli, Command, WorkerArgs},
    parallel::ProcessSpawner,
    report,
    timing::TimedRunner,
    worker, Harness,
};
use kvs::Mode;
use log::error;

fn main() -> ExitCode {
    let cli = cli::parse();
    if let Err(e) = simplelog::TermLogger::init(
        cli.log_level,
        simplelog::ConfigBuilder::new()
            .add_filter_allow_str("bench")
            .add_filter_allow_str("kvs")
            .add_filter_allow_str("handlersocket")
            .build(),
        simplelog::TerminalMode::Stderr,
        Default::default(),
    ) {
        eprintln!("could not set up logging: {e}");
    }

    match cli.command.clone() {
        Some(Command::Worker(args)) => run_worker(&cli, &args),
        None => run_benchmarks(cli),
    }
}

fn run_worker(cli: &Cli, args: &WorkerArgs) -> ExitCode {
    let config = cli.config();
    let keys = worker::keys_for(cli.size, cli.seed, args.index);
    let report = worker::run(args.index, args.ops, keys, || Ok(args.backend.connect(&config, Mode::Read)?));
    if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run_benchmarks(cli: Cli) -> ExitCode {
    let mut timer = TimedRunner::new();
    let result = Harness::new(cli).and_then(|harness| {
        harness.run(&mut timer, |kind| ProcessSpawner::current(harness.cli(), kind))
    });

    // Whatever was measured before a failure is still reported.
    if let Err(e) = report::stdout(timer.records()) {
        error!("printing the report: {e:#}");
    }
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tn_vmc::{
    read_config, read_state, run_local, Communicator, InterruptCoordinator, InterruptFlag, OptimizationDriver,
    OptimizeConfig, ProductState, Result, RunSummary, SamplingMethod, SignalOutcome,
};

/// Variational Monte Carlo optimization of a lattice product state
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// YAML configuration file; defaults are used when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of cooperating workers
    #[arg(short, long, default_value_t = 1)]
    workers: usize,

    /// Override the sampling method (direct, sweep, ergodic)
    #[arg(long)]
    sampling_method: Option<SamplingMethod>,

    /// Override the root seed
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(Args::parse()) {
        Ok(summary) => {
            if let Some(energy) = summary.last_energy() {
                info!(
                    steps = summary.steps_completed,
                    interrupted = summary.interrupted,
                    energy = energy.mean,
                    error = energy.error,
                    "optimization finished"
                );
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<RunSummary> {
    let mut config = match &args.config {
        Some(path) => read_config(path)?,
        None => OptimizeConfig::default(),
    };
    if let Some(method) = args.sampling_method {
        config.sampling.method = method;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.validate()?;

    let root_seed = config.seed.unwrap_or_else(rand::random);
    let state = match &config.output.resume {
        Some(path) => {
            info!(path = %path.display(), "resuming from checkpoint");
            read_state::<ProductState, _>(path)?
        }
        None => config.model.random_state(&mut StdRng::seed_from_u64(root_seed))?,
    };

    let workers = args.workers.max(1);
    let interrupts: Vec<InterruptCoordinator> = (0..workers).map(|_| InterruptCoordinator::new()).collect();
    install_signal_handler(interrupts.iter().map(InterruptCoordinator::flag).collect());

    let results = run_local(workers, |world| -> Result<RunSummary> {
        let interrupt = interrupts[world.rank()].clone();
        let mut driver =
            OptimizationDriver::new(&world, config.clone(), state.clone(), root_seed)?.with_interrupt(interrupt);
        driver.run()
    });
    // Every rank holds the same reduced summary.
    results.into_iter().next().unwrap_or_else(|| Ok(RunSummary::default()))
}

/// The first Ctrl-C asks every worker to stop at the next gradient step, a
/// second one terminates immediately.
fn install_signal_handler(flags: Vec<Arc<InterruptFlag>>) {
    let handler = move || {
        let escalate = flags
            .iter()
            .fold(false, |escalate, flag| (flag.signal() == SignalOutcome::Escalate) || escalate);
        if escalate {
            std::process::exit(130);
        }
    };
    if let Err(err) = ctrlc::set_handler(handler) {
        warn!("interrupt handler not installed: {err}");
    }
}

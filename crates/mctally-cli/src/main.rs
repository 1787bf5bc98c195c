//! CLI for mctally: drive every tally kind through a synthetic slab problem.

mod commands;

use clap::{Parser, Subcommand};

use commands::run::KindArg;

#[derive(Parser)]
#[command(name = "mctally")]
#[command(about = "mctally: Monte Carlo tally estimators with per-history moment statistics")]
#[command(version = mctally_core::VERSION)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transport photons through a stack of slabs and report every tally.
    /// Ranks are threads of this process joined by an in-process communicator.
    Run {
        /// Total number of source histories across all ranks
        #[arg(long, default_value_t = 100_000)]
        histories: u64,

        /// Worker threads per rank
        #[arg(long, default_value_t = 4)]
        threads: usize,

        /// In-process ranks reduced onto rank 0 at every checkpoint
        #[arg(long, default_value_t = 1)]
        ranks: usize,

        /// Tally kind to run, or "all"
        #[arg(long, value_enum, default_value_t = KindArg::All)]
        kind: KindArg,

        /// Base seed; history i uses seed + i, so results do not depend on
        /// --threads or --ranks
        #[arg(long, default_value_t = 0x5eed)]
        seed: u64,

        /// Number of moment snapshots the root takes for the check battery
        #[arg(long, default_value_t = 10)]
        checkpoints: usize,

        /// Print the tally snapshots as JSON instead of the text report
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = match cli.command {
        Commands::Run {
            histories,
            threads,
            ranks,
            kind,
            seed,
            checkpoints,
            json,
        } => commands::run::run(&commands::run::RunCommandConfig {
            histories,
            threads,
            ranks,
            kinds: kind.kinds(),
            seed,
            checkpoints,
            json,
        }),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

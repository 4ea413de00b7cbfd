use anyhow::Result;
use beltline::queue::DrainPolicy;
use beltline::runtime::{PipelineConfig, run_pipeline};
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "beltline")]
#[command(about = "Bounded producer/consumer pipeline driver", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run producers and consumers against one shared bounded queue
    Run(RunArgs),
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    #[arg(long, default_value_t = 10, help = "Queue capacity in slots")]
    capacity: usize,
    #[arg(long, default_value_t = 2)]
    producers: usize,
    #[arg(long, default_value_t = 5)]
    consumers: usize,
    #[arg(
        long,
        default_value_t = 1_000,
        help = "Max simulated delay before producing each item"
    )]
    producer_delay_ms: u64,
    #[arg(
        long,
        default_value_t = 2_000,
        help = "Max simulated delay while processing each item"
    )]
    consumer_delay_ms: u64,
    #[arg(long, help = "Stop automatically after this long (default: wait for enter)")]
    run_for_ms: Option<u64>,
    #[arg(
        long,
        default_value_t = false,
        action = clap::ArgAction::Set,
        help = "Drop queued items at shutdown instead of letting consumers drain them"
    )]
    discard_on_shutdown: bool,
    #[arg(long, default_value_t = 10)]
    progress_interval_secs: u64,
    #[arg(long, default_value_t = false, help = "Emit final stats as JSON")]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args),
    }
}

fn run(args: RunArgs) -> Result<()> {
    let drain_policy = if args.discard_on_shutdown {
        DrainPolicy::DiscardRemaining
    } else {
        DrainPolicy::DrainRemaining
    };
    let config = PipelineConfig {
        capacity: args.capacity,
        producers: args.producers,
        consumers: args.consumers,
        producer_delay_ms: args.producer_delay_ms,
        consumer_delay_ms: args.consumer_delay_ms,
        run_for_ms: args.run_for_ms,
        drain_policy,
        progress_interval_secs: args.progress_interval_secs,
    };

    let stats = run_pipeline(config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!(
            "Total items produced: {}, total items consumed: {}",
            stats.produced, stats.consumed
        );
        println!(
            "Peak queue depth: {} (capacity {}), ran for {} ms",
            stats.max_depth, args.capacity, stats.duration_millis
        );
    }
    Ok(())
}

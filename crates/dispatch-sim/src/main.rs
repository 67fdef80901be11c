#[macro_use]
mod macros;
mod bandwidth;
mod peer;
mod remote;
mod simulation;
mod storage;

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use simulation::{Simulation, SimulationConfig};
use tokio::time::MissedTickBehavior;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

const TRACING_ENV: &str = "BTT_LOG";

#[derive(Parser, Debug)]
#[command(version)]
struct Arguments {
    /// Number of pieces to download from the simulated peer
    #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(u32).range(1..))]
    pub pieces: u32,
    /// Number of 16 KiB blocks in every piece
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..))]
    pub blocks_per_piece: u32,
    /// Seconds an unanswered block request stays outstanding
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub request_timeout: u64,
    /// Milliseconds between two dispatch passes
    #[arg(long, value_name = "MILLIS", default_value_t = 10)]
    pub dispatch_tick: u64,
    /// Milliseconds between two sweeps of the outstanding requests
    #[arg(long, value_name = "MILLIS", default_value_t = 1_000)]
    pub sweep_tick: u64,
    /// Milliseconds between two events of the remote peer
    #[arg(long, value_name = "MILLIS", default_value_t = 5)]
    pub event_tick: u64,
    /// Bytes the socket accepts per dispatch pass
    #[arg(long, value_name = "BYTES", default_value_t = 32_768)]
    pub window: usize,
    /// Maximum number of outstanding block requests
    #[arg(long, default_value_t = 8)]
    pub pipeline: usize,
    /// Upload limit of the torrent in bytes per second, 0 disables it
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    pub upload_limit: u64,
    /// Upload limit of the whole client in bytes per second, 0 disables it
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    pub overall_upload_limit: u64,
    /// Don't use the Fast Extension
    #[arg(long)]
    pub no_fast_extension: bool,
    /// Stop after this many seconds even if the download isn't complete
    #[arg(short, long, value_name = "SECS", default_value_t = 30)]
    pub duration: u64,
    /// Seed of the event generator
    #[arg(long)]
    pub seed: Option<u64>,
}

#[tokio::main]
#[tracing::instrument(err)]
async fn main() -> anyhow::Result<()> {
    setup_logger()?;

    let args = Arguments::parse();

    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let config = SimulationConfig {
        peer_addr: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 6881),
        pieces: args.pieces,
        blocks_per_piece: args.blocks_per_piece,
        request_timeout: Duration::from_secs(args.request_timeout),
        window: args.window,
        pipeline: args.pipeline,
        upload_limit: args.upload_limit,
        overall_upload_limit: args.overall_upload_limit,
        fast_extension: !args.no_fast_extension,
        allowed_fast: 4,
    };
    tracing::info!(?config, "starting the simulation");

    let mut simulation = Simulation::new(config, rng);
    run(&mut simulation, &args).await?;
    simulation.log_summary();

    Ok(())
}

async fn run(simulation: &mut Simulation, args: &Arguments) -> anyhow::Result<()> {
    let mut dispatch_interval = interval(args.dispatch_tick);
    let mut sweep_interval = interval(args.sweep_tick);
    let mut event_interval = interval(args.event_tick);
    let deadline = tokio::time::sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = dispatch_interval.tick() => {
                simulation.dispatch().context("dispatch pass")?;
                if simulation.is_complete() {
                    tracing::info!("download complete");
                    break;
                }
            }
            _ = sweep_interval.tick() => simulation.sweep(),
            _ = event_interval.tick() => simulation.remote_event(),
            _ = &mut deadline => {
                tracing::info!("time is up, stopping the simulation");
                break;
            }
        }
    }

    Ok(())
}

fn interval(millis: u64) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(Duration::from_millis(millis.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn setup_logger() -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_env_var(TRACING_ENV)
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt().compact().with_env_filter(env_filter).finish();

    tracing::subscriber::set_global_default(subscriber).context("setting a global tracing subscriber")
}

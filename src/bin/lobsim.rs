use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};

use lobsim::{
    error::Error,
    feed::{generate_events, write_fills, EventGen, JsonlFeed},
    live::{spawn_live_thread, LiveConfig, LiveMsg, PaperGateway},
    sim::{SimReport, Simulator},
    strategy::{EvMaker, FillProbTable, NaiveMaker, SizeFn, Strategy},
    types::size_to_units,
};

#[derive(Parser)]
#[command(name = "lobsim")]
#[command(about = "Limit order book market making: backtest and live quoting")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a day of recorded events against a strategy
    Backtest {
        #[arg(long)]
        date: String,
        #[arg(long, default_value = "btcusdt")]
        symbol: String,
        #[arg(long, value_enum, default_value = "naive")]
        strategy: StrategyKind,
        #[arg(long, default_value = "data")]
        data_path: PathBuf,
        /// Write the fill log here as JSON lines
        #[arg(long)]
        output: Option<PathBuf>,
        /// Replay a seeded synthetic stream instead of recorded data
        #[arg(long)]
        synthetic: bool,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = 100_000)]
        events: usize,
    },
    /// Quote continuously until ctrl-c, then cancel-all and exit
    Live {
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        api_secret: Option<String>,
        /// Paper trading against the in-process book
        #[arg(long)]
        paper: bool,
        #[arg(long, default_value = "btcusdt")]
        symbol: String,
        #[arg(long, value_enum, default_value = "ev")]
        strategy: StrategyKind,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyKind {
    Naive,
    Ev,
}

fn build_strategy(kind: StrategyKind) -> Box<dyn Strategy> {
    match kind {
        StrategyKind::Naive => Box::new(NaiveMaker::new(2, size_to_units(0.001))),
        StrategyKind::Ev => Box::new(EvMaker::new(
            50,
            8.0,
            SizeFn::linear(size_to_units(0.001), size_to_units(1.0)),
            FillProbTable::from_decay(64, 0.05),
        )),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Backtest {
            date,
            symbol,
            strategy,
            data_path,
            output,
            synthetic,
            seed,
            events,
        } => run_backtest(
            &date, &symbol, strategy, &data_path, output, synthetic, seed, events,
        ),
        Commands::Live {
            api_key,
            api_secret,
            paper,
            symbol,
            strategy,
        } => run_live(api_key, api_secret, paper, &symbol, strategy),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_backtest(
    date: &str,
    symbol: &str,
    strategy: StrategyKind,
    data_path: &std::path::Path,
    output: Option<PathBuf>,
    synthetic: bool,
    seed: u64,
    events: usize,
) -> ExitCode {
    let mut sim = Simulator::new(build_strategy(strategy), 128);

    let result = if synthetic {
        info!("replaying {events} synthetic events (seed {seed})");
        sim.run(generate_events(seed, events).into_iter().map(Ok))
    } else {
        let path = JsonlFeed::day_path(data_path, symbol, date);
        if !path.exists() {
            error!("no data for {symbol} on {date}: {}", path.display());
            return ExitCode::from(2);
        }
        info!("replaying {}", path.display());
        match JsonlFeed::open(&path) {
            Ok(feed) => sim.run(feed),
            Err(err) => {
                error!("could not open {}: {err}", path.display());
                return ExitCode::from(2);
            }
        }
    };

    match result {
        Ok(report) => {
            log_report(&report);
            if let Some(path) = output {
                if let Err(err) = write_fills(&path, sim.fills()) {
                    error!("could not write fills to {}: {err}", path.display());
                    return ExitCode::FAILURE;
                }
                info!("fill log written to {}", path.display());
            }
            ExitCode::SUCCESS
        }
        Err(err @ Error::EngineFault(_)) => {
            error!("aborting, book state is undefined: {err}");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!("backtest failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn log_report(report: &SimReport) {
    info!("events processed: {}", report.events);
    info!(
        "fills: {} total, {} ours",
        report.fill_count, report.maker_fill_count
    );
    info!("total pnl: {:.8}", report.total_pnl);
    info!("final position: {:.8}", report.final_position);
    info!("average fill size: {:.8}", report.avg_fill_size);
    info!("final book checksum: {:#x}", report.book_checksum);
    for level in &report.top_levels.bids {
        info!(
            "bid {} size {} ({} orders)",
            level.price, level.total_size, level.total_count
        );
    }
    for level in &report.top_levels.asks {
        info!(
            "ask {} size {} ({} orders)",
            level.price, level.total_size, level.total_count
        );
    }
}

fn run_live(
    api_key: Option<String>,
    api_secret: Option<String>,
    paper: bool,
    symbol: &str,
    strategy: StrategyKind,
) -> ExitCode {
    if !paper && (api_key.is_none() || api_secret.is_none()) {
        warn!("no api credentials provided, falling back to paper trading");
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("could not start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    info!("starting live loop for {symbol} (paper)");
    runtime.block_on(live_loop(strategy))
}

async fn live_loop(strategy: StrategyKind) -> ExitCode {
    let sim = Simulator::new(build_strategy(strategy), 128);
    let (producer, mut controller) =
        spawn_live_thread(sim, PaperGateway::new(), LiveConfig::default());
    let token = CancellationToken::new();

    // The other tasks send here and suspend; only this bridge task takes
    // the blocking hop onto the live thread's bounded channel, so the
    // current-thread executor never stalls on a full buffer.
    let (tx, mut rx) = tokio::sync::mpsc::channel::<LiveMsg>(1_024);
    let bridge = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if producer.send(msg).is_err() {
                break;
            }
        }
    });

    // ingress task: paced synthetic feed standing in for the venue stream
    let feeder = tokio::spawn({
        let tx = tx.clone();
        let token = token.clone();
        async move {
            let mut source = EventGen::new(1042);
            let mut ticker = tokio::time::interval(Duration::from_millis(10));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(event) = source.next() else { break };
                        if tx.send(LiveMsg::Event(event)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });

    // gateway-poll task: ask the live thread to reconcile confirmations
    let poller = tokio::spawn({
        let tx = tx.clone();
        let token = token.clone();
        async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(500));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(LiveMsg::PollFills).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });
    // the bridge ends once every sender is gone
    drop(tx);

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("could not listen for ctrl-c: {err}");
    }
    info!("signal received, cancelling open quotes");
    token.cancel();
    let _ = tokio::join!(feeder, poller, bridge);

    match controller.shutdown() {
        Ok(outcome) => {
            log_report(&outcome.sim.report());
            info!(
                "gateway: {} submitted, {} cancelled",
                outcome.gateway.submitted(),
                outcome.gateway.cancelled()
            );
            match outcome.fault {
                None => ExitCode::SUCCESS,
                Some(err) => {
                    error!("live loop faulted: {err}");
                    ExitCode::FAILURE
                }
            }
        }
        Err(err) => {
            error!("shutdown failed: {err}");
            ExitCode::FAILURE
        }
    }
}

//! WebDataset shard inspector
//!
//! Reads one or more tar shards and prints one line per sample: its key
//! followed by each member's extension and size.
//!
//! # Usage
//!
//! ```bash
//! # Read shards one after another
//! wds-cat shard-000.tar shard-001.tar
//!
//! # Read shards produced by a command
//! wds-cat 'pipe:curl -s https://example.com/shard-000.tar'
//!
//! # Read on four threads with two grouping threads
//! wds-cat --threads 4 --groupers 2 shards/*.tar
//! ```

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wds_core::dataset::KEY_FIELD;
use wds_core::{
    AsyncSampleReader, LocalOpener, Sample, ShardOpener, ShardOrder, ShardPipeline,
    ShardSequencer, WdsConfig, WdsError,
};

/// Print the samples contained in webdataset shards
#[derive(Parser, Debug)]
#[command(name = "wds-cat")]
#[command(about = "Print the samples contained in webdataset shards")]
struct Args {
    /// Shard paths or `pipe:` commands
    #[arg(required = true)]
    shards: Vec<String>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Reader threads; more than one enables the threaded pipeline
    #[arg(short, long)]
    threads: Option<usize>,

    /// Grouping threads for the threaded pipeline (0 groups in the readers)
    #[arg(long)]
    groupers: Option<usize>,

    /// Read shards in the order given instead of last-first
    #[arg(long)]
    fifo: bool,

    /// Give up if no sample arrives within this many milliseconds
    /// (without it the threaded pipeline waits as long as it takes)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Stop after printing this many samples
    #[arg(short = 'n', long)]
    limit: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&args)?;
    let opener: Arc<dyn ShardOpener> = Arc::new(LocalOpener::new(&config.opener));
    let limit = args.limit.unwrap_or(u64::MAX);
    let give_up_on_timeout = args.timeout_ms.is_some();

    tracing::info!("Reading {} shard(s)", args.shards.len());
    tracing::debug!("  Shard order: {:?}", config.reader.shard_order);
    tracing::debug!("  Reader threads: {}", config.pipeline.reader_threads);
    tracing::debug!("  Grouper threads: {}", config.pipeline.grouper_threads);

    let (printed, failed) = if config.pipeline.reader_threads > 1 {
        let shards = args.shards.clone();
        tokio::task::spawn_blocking(move || {
            run_pipeline(config, opener, shards, limit, give_up_on_timeout)
        })
        .await??
    } else {
        run_sequential(config, opener, args.shards, limit).await
    };

    tracing::info!("Printed {} sample(s), {} shard error(s)", printed, failed);
    if failed > 0 {
        return Err(format!("{} shard(s) failed", failed).into());
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<WdsConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => WdsConfig::from_file(path)?,
        None => WdsConfig::default(),
    }
    .with_env_overrides();

    if let Some(threads) = args.threads {
        config.pipeline.reader_threads = threads;
    }
    if let Some(groupers) = args.groupers {
        config.pipeline.grouper_threads = groupers;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.pipeline.next_timeout_ms = timeout_ms;
    }
    if args.fifo {
        config.reader.shard_order = ShardOrder::Fifo;
    }

    config.validate()?;
    Ok(config)
}

async fn run_sequential(
    config: WdsConfig,
    opener: Arc<dyn ShardOpener>,
    shards: Vec<String>,
    limit: u64,
) -> (u64, u64) {
    let mut sequencer = ShardSequencer::from_config(opener, &config.reader);
    sequencer.set_shards(shards);

    let mut reader = AsyncSampleReader::new(sequencer, config.reader.prefetch_samples);
    let (mut printed, mut failed) = (0, 0);
    while printed < limit {
        match reader.next().await {
            Ok(Some(sample)) => {
                print_sample(&sample);
                printed += 1;
            }
            Ok(None) => break,
            Err(e) => {
                tracing::error!("{}", e);
                failed += 1;
            }
        }
    }
    reader.stop().await;
    (printed, failed)
}

fn run_pipeline(
    config: WdsConfig,
    opener: Arc<dyn ShardOpener>,
    mut shards: Vec<String>,
    limit: u64,
    give_up_on_timeout: bool,
) -> wds_core::Result<(u64, u64)> {
    let mut pipeline = ShardPipeline::start(config.pipeline, opener)?;
    if config.reader.shard_order == ShardOrder::Lifo {
        shards.reverse();
    }

    // The shard queue only drains while samples are consumed, so shards are
    // fed from their own thread.
    let input = pipeline.input();
    let feeder = std::thread::Builder::new()
        .name("wds-cat-feeder".to_string())
        .spawn(move || {
            if let Err(e) = input.add_shards(shards).and_then(|()| input.close_input()) {
                tracing::debug!("Stopped feeding shards: {}", e);
            }
        })
        .map_err(|e| WdsError::pipeline(format!("failed to spawn shard feeder: {}", e)))?;

    let (mut printed, mut failed) = (0, 0);
    let mut outcome = Ok(());
    while printed < limit {
        match pipeline.next() {
            Ok(Some(sample)) => {
                print_sample(&sample);
                printed += 1;
            }
            Ok(None) => break,
            Err(e) if e.is_timeout() && give_up_on_timeout => {
                outcome = Err(e);
                break;
            }
            Err(e) if e.is_timeout() => {
                tracing::debug!(
                    "Still waiting for samples ({} shard(s) queued so far)",
                    pipeline.shards_added()
                );
            }
            Err(e) => {
                tracing::error!("{}", e);
                failed += 1;
            }
        }
    }

    // Closing also releases a feeder blocked on a full shard queue.
    pipeline.close();
    if feeder.join().is_err() {
        tracing::error!("Shard feeder thread panicked");
    }
    outcome.map(|()| (printed, failed))
}

fn print_sample(sample: &Sample) {
    let members: Vec<String> = sample
        .iter()
        .filter(|(field, _)| field.as_str() != KEY_FIELD)
        .map(|(ext, payload)| format!("{}:{}", ext, payload.len()))
        .collect();
    println!("{}\t{}", sample.key(), members.join(" "));
}

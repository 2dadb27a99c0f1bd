//! catlog CLI
//!
//! Inspect and maintain catalogs kept in a file store directory.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use catlog::{
    Catalog, Config, Cookie, FileStore, LogEntry, LogId, LogRecord, LogStore, Result, ScanControl,
    ScanPosition,
};
use tracing_subscriber::{fmt, EnvFilter};

/// catlog CLI
#[derive(Parser, Debug)]
#[command(name = "catlog-cli")]
#[command(about = "Inspect and maintain catalog-structured recovery logs")]
#[command(version)]
struct Args {
    /// Data directory of the file store
    #[arg(short, long, default_value = "./catlog_data")]
    data_dir: String,

    /// Slots in a new catalog
    #[arg(long, default_value = "8192")]
    catalog_capacity: u32,

    /// Slots in each new segment
    #[arg(long, default_value = "8192")]
    segment_capacity: u32,

    /// Largest record accepted by append (bytes)
    #[arg(long, default_value = "8192")]
    chunk_size: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an empty catalog and print its id
    Create,

    /// Show catalog counters
    Info {
        /// Catalog id (0xOID:0xGEN)
        catalog: LogId,
    },

    /// Print every live record
    Print {
        /// Catalog id (0xOID:0xGEN)
        catalog: LogId,

        /// Newest record first
        #[arg(long)]
        reverse: bool,

        /// Resume after this catalog slot...
        #[arg(long, requires = "start_index", conflicts_with = "reverse")]
        start_slot: Option<u32>,

        /// ...and this record index within it
        #[arg(long, requires = "start_slot")]
        start_index: Option<u32>,
    },

    /// Append one record
    ///
    /// Every invocation reopens the catalog, which has no current segment
    /// after open, so each append lands in a fresh segment and uses up one
    /// catalog slot until that record is cancelled.
    Append {
        /// Catalog id (0xOID:0xGEN)
        catalog: LogId,

        /// Record type tag
        #[arg(long, default_value = "0")]
        type_tag: u32,

        /// Payload (stored as UTF-8 bytes)
        payload: String,
    },

    /// Cancel one record
    Cancel {
        /// Catalog id (0xOID:0xGEN)
        catalog: LogId,

        /// Segment id (0xOID:0xGEN)
        log: LogId,

        /// Record index in the segment
        index: u32,
    },

    /// Check catalog bookkeeping
    Verify {
        /// Catalog id (0xOID:0xGEN)
        catalog: LogId,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,catlog=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .catalog_capacity(args.catalog_capacity)
        .segment_capacity(args.segment_capacity)
        .chunk_size(args.chunk_size)
        .build();

    let store: Arc<dyn LogStore> = Arc::new(FileStore::open(&config)?);

    match args.command {
        Commands::Create => {
            let catalog = Catalog::create(store, config)?;
            println!("{}", catalog.id());
            catalog.close()
        }

        Commands::Info { catalog } => {
            let catalog = Catalog::open(store, catalog, config)?;
            let stats = catalog.stats()?;
            println!("catalog:        {}", stats.id);
            println!("capacity:       {}", stats.capacity);
            println!("oldest index:   {}", stats.oldest_index);
            println!("last index:     {}", stats.last_index);
            println!("wrapped:        {}", stats.wrapped);
            println!("segments:       {}", stats.live_segments);
            println!("live records:   {}", stats.live_records);
            for (slot, segment) in catalog.segments() {
                println!("  slot {:>6}  {}", slot, segment);
            }
            catalog.close()
        }

        Commands::Print {
            catalog,
            reverse,
            start_slot,
            start_index,
        } => {
            let catalog = Catalog::open(store, catalog, config)?;
            let mut print = |entry: &LogEntry| -> Result<ScanControl> {
                println!(
                    "{:>6}:{:<6} {}  type {:#x}  {} bytes  {}",
                    entry.position.catalog_slot,
                    entry.position.index,
                    entry.cookie,
                    entry.record.type_tag,
                    entry.record.payload.len(),
                    String::from_utf8_lossy(&entry.record.payload)
                );
                Ok(ScanControl::Continue)
            };

            let summary = if reverse {
                catalog.reverse_process(&mut print)?
            } else {
                let start = start_slot
                    .zip(start_index)
                    .map(|(slot, index)| ScanPosition::new(slot, index));
                catalog.process(start, &mut print)?
            };
            tracing::info!(
                "{} records in {} segments",
                summary.records,
                summary.segments
            );
            catalog.close()
        }

        Commands::Append {
            catalog,
            type_tag,
            payload,
        } => {
            let catalog = Catalog::open(store, catalog, config)?;
            let record = LogRecord::new(type_tag, payload.into_bytes());
            catalog.check_record(&record)?;
            let cookie = catalog.add(&record)?;
            println!("{}", cookie);
            catalog.close()
        }

        Commands::Cancel {
            catalog,
            log,
            index,
        } => {
            let catalog = Catalog::open(store, catalog, config)?;
            let summary = catalog.cancel(&[Cookie::new(log, index)])?;
            for segment in &summary.destroyed {
                tracing::info!("Segment {} emptied and destroyed", segment);
            }
            catalog.close()
        }

        Commands::Verify { catalog } => {
            let catalog = Catalog::open(store, catalog, config)?;
            catalog.verify()?;
            println!("catalog {} OK", catalog.id());
            catalog.close()
        }
    }
}

//! VirtDB CLI
//!
//! Inspect and exercise a data source with byte-string keys and values.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};
use virtdb::{
    Config, Hash, InternalRecord, LeafRecord, MergeKind, Result, VirtualDataSource, HASH_SIZE,
};

type ByteSource = VirtualDataSource<Vec<u8>, Vec<u8>>;

/// VirtDB CLI
#[derive(Parser, Debug)]
#[command(name = "virtdb")]
#[command(about = "Log-structured virtual key/value engine for Merkle-tree state")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./virtdb_data")]
    data_dir: PathBuf,

    /// Maximum number of keys the data source is sized for
    #[arg(long, default_value = "1000000")]
    max_keys: u64,

    /// Paths below this keep their internal hash in RAM
    #[arg(long, default_value = "1048576")]
    ram_threshold: i64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the leaf range and per-store file statistics
    Info,

    /// Look up a leaf by key
    Get {
        /// The key to look up
        key: String,
    },

    /// Save a balanced tree of `count` synthetic leaves
    Fill {
        /// Number of leaves
        #[arg(short, long, default_value = "1000")]
        count: u64,

        /// Key prefix, keys are `{prefix}{i}`
        #[arg(short, long, default_value = "key")]
        prefix: String,
    },

    /// Run one merge now
    Merge {
        #[arg(value_enum, default_value = "small")]
        kind: Kind,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Kind {
    Small,
    Medium,
    Full,
}

impl From<Kind> for MergeKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Small => MergeKind::Small,
            Kind::Medium => MergeKind::Medium,
            Kind::Full => MergeKind::Full,
        }
    }
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,virtdb=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("VirtDB v{}", virtdb::VERSION);
    tracing::info!("Data directory: {}", args.data_dir.display());

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .label("virtdb-cli")
        .max_num_of_keys(args.max_keys)
        .internal_hashes_ram_to_disk_threshold(args.ram_threshold)
        .merging_enabled(false)
        .build();

    let source = match ByteSource::open(config) {
        Ok(source) => source,
        Err(e) => {
            tracing::error!("Failed to open data source: {}", e);
            process::exit(1);
        }
    };

    let outcome = run(&source, args.command).and_then(|_| source.close());
    if let Err(e) = outcome {
        tracing::error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn run(source: &ByteSource, command: Commands) -> Result<()> {
    match command {
        Commands::Info => {
            let stats = source.stats();
            println!("label:            {}", source.label());
            println!("leaf paths:       [{}, {}]", source.first_leaf_path(), source.last_leaf_path());
            println!("ram threshold:    {}", source.internal_hashes_ram_to_disk_threshold());
            println!("internal hashes:  {} files, {} bytes", stats.internal_hashes.files, stats.internal_hashes.bytes);
            println!("leaves:           {} files, {} bytes", stats.leaves.files, stats.leaves.bytes);
            println!("key to path:      {} files, {} bytes", stats.key_to_path.files, stats.key_to_path.bytes);
        }
        Commands::Get { key } => match source.load_leaf_record_by_key(&key.into_bytes())? {
            Some(record) => {
                println!("path:  {}", record.path);
                println!("hash:  {:?}", record.hash);
                println!("value: {}", String::from_utf8_lossy(&record.value));
            }
            None => println!("(nil)"),
        },
        Commands::Fill { count, prefix } => fill(source, count, &prefix)?,
        Commands::Merge { kind } => {
            let stats = source.merge(kind.into())?;
            println!(
                "merged {} files into {}, {} items copied",
                stats.files_merged, stats.files_created, stats.items_copied
            );
        }
    }
    Ok(())
}

/// Leaves occupy `[first, first + count - 1]`, every path below `first` is an
/// internal node
fn fill(source: &ByteSource, count: u64, prefix: &str) -> Result<()> {
    if count == 0 {
        return source.save_records(-1, -1, &[], &[]);
    }
    let first_leaf_path = count.max(2) as i64 - 1;
    let last_leaf_path = first_leaf_path + count as i64 - 1;

    let internal: Vec<InternalRecord> = (0..first_leaf_path)
        .map(|path| InternalRecord::new(path, synthetic_hash(&path.to_le_bytes())))
        .collect();
    let leaves: Vec<LeafRecord<Vec<u8>, Vec<u8>>> = (0..count)
        .map(|i| {
            let key = format!("{}{}", prefix, i).into_bytes();
            let value = format!("value-{}", i).into_bytes();
            LeafRecord::new(first_leaf_path + i as i64, synthetic_hash(&value), key, value)
        })
        .collect();

    source.save_records(first_leaf_path, last_leaf_path, &internal, &leaves)?;
    println!("saved {} leaves and {} internal nodes", leaves.len(), internal.len());
    Ok(())
}

fn synthetic_hash(seed: &[u8]) -> Hash {
    let crc = crc32fast::hash(seed).to_le_bytes();
    let mut bytes = [0u8; HASH_SIZE];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = crc[i % crc.len()];
    }
    Hash::new(bytes)
}

use clap::{Parser, Subcommand};
use exposure_kernel::config::{DEFAULT_IDS_PER_KEY, DEFAULT_SCAN_INTERVAL_SECS};
use exposure_kernel::types::TimeRange;
use exposure_cli::commands::{inspect, summary, timeline, verify};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "exposure")]
#[command(about = "Offline forensic tool for an exposure node's data directory", long_about = None)]
struct Cli {
    /// Node data directory (the node's EXPOSURE_DATA_DIR).
    #[arg(long, short, global = true, default_value = "./exposure-data")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show every file in the data directory and its status
    Inspect,
    /// Check frame, batch and watermark checksums
    Verify {
        /// Publisher secret; when given, batch signatures are checked too
        #[arg(long)]
        secret: Option<String>,
    },
    /// List stored contact records by observation time
    Timeline {
        /// Window start, seconds since the Unix epoch
        #[arg(long)]
        start: Option<u64>,

        /// Window end (exclusive)
        #[arg(long)]
        end: Option<u64>,

        #[arg(long, short)]
        limit: Option<usize>,
    },
    /// Print recorded exposures and what pending batches would add
    Summary {
        #[arg(long)]
        secret: Option<String>,

        #[arg(long, default_value_t = DEFAULT_IDS_PER_KEY)]
        ids_per_key: u32,

        #[arg(long, default_value_t = DEFAULT_SCAN_INTERVAL_SECS)]
        scan_interval_secs: u64,
    },
}

fn main() -> anyhow::Result<()> {
    println!(
        r#"
  exposure forensic tool v{}
"#,
        env!("CARGO_PKG_VERSION")
    );

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect => inspect::run(&cli.dir),
        Commands::Verify { secret } => verify::run(&cli.dir, secret.as_deref()),
        Commands::Timeline { start, end, limit } => {
            let all = TimeRange::all();
            let range = TimeRange::new(start.unwrap_or(all.start), end.unwrap_or(all.end))?;
            timeline::run(&cli.dir, range, limit)
        }
        Commands::Summary {
            secret,
            ids_per_key,
            scan_interval_secs,
        } => summary::run(
            &cli.dir,
            &summary::SummaryOptions {
                ids_per_key,
                scan_interval_secs,
                secret,
            },
        ),
    }
}

use anyhow::Result;
use chrono::NaiveDate;
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::net::lookup_host;

use zombie_finder_lib::dispatcher::EngineConfig;
use zombie_finder_lib::mrt::MrtInput;
use zombie_finder_lib::tracked::TrackedColumns;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub collector: String,
    pub engine: EngineConfig,
    pub input: InputConfig,
    pub source: SourceConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone)]
pub struct InputConfig {
    pub tracked_paths: Vec<PathBuf>,
    pub columns: TrackedColumns,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub inputs: Vec<MrtInput>,
    pub interval_start: i64,
    pub interval_end: i64,
    pub event_buffer_size: usize,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub snapshot_path: PathBuf,
    pub changing_path: PathBuf,
}

/// Analysed month, given as `YYYY_MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Month {
    pub year: i32,
    pub month: u32,
}

impl FromStr for Month {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .split_once('_')
            .ok_or_else(|| format!("expected YYYY_MM, got '{}'", s))?;
        let year = year
            .parse::<i32>()
            .map_err(|e| format!("invalid year '{}': {}", year, e))?;
        let month = month
            .parse::<u32>()
            .map_err(|e| format!("invalid month '{}': {}", month, e))?;
        if !(1..=12).contains(&month) {
            return Err(format!("month {} out of range", month));
        }
        Ok(Month { year, month })
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Zombie route record finder (MRT)", long_about = None)]
pub struct Cli {
    /// Route collector the MRT inputs were recorded by
    #[arg(long, short = 'c')]
    pub collector: String,

    /// Analysed month (format: YYYY_MM, e.g. 2017_11)
    #[arg(long, short = 'd')]
    pub date: Month,

    /// First day of the event interval within the month (00:00 UTC)
    #[arg(long, default_value_t = 10)]
    pub interval_start_day: u32,

    /// Last day of the event interval within the month (00:00 UTC, inclusive)
    #[arg(long, default_value_t = 20)]
    pub interval_end_day: u32,

    /// Directory holding the zombie detector partition files
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Number of zombie detector partition files to read
    #[arg(long, default_value_t = 1)]
    pub partitions: usize,

    /// Column (0-based) of the prefix in the partition files
    #[arg(long, default_value_t = 1)]
    pub prefix_column: usize,

    /// Column (0-based) of the expiry time in the partition files
    #[arg(long, default_value_t = 2)]
    pub expiry_column: usize,

    /// Quarantine length in seconds before each expiry
    #[arg(long, default_value_t = 3600)]
    pub quarantine_secs: u64,

    /// MRT RIB dumps (paths or URLs, comma-separated)
    #[arg(long, value_delimiter(','))]
    pub rib: Vec<String>,

    /// MRT update dumps (paths or URLs, comma-separated)
    #[arg(long, value_delimiter(','))]
    pub updates: Vec<String>,

    /// Directory receiving the snapshot and changing-events files
    #[arg(long, default_value = "results")]
    pub result_dir: PathBuf,

    /// Capacity of the channel between the MRT decoder and the dispatcher
    #[arg(long, default_value_t = 100000)]
    pub event_buffer_size: usize,

    /// Metrics listener address (IP or FQDN) for Prometheus endpoint
    #[arg(long)]
    pub metrics_address: Option<String>,

    /// Set the verbosity level
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

fn set_logging(cli: &Cli) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_max_level(cli.verbose.tracing_level_filter())
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn set_metrics(metrics_address: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_address)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus metrics exporter: {}", e))?;

    // Engine metrics
    metrics::describe_counter!(
        "zombie_finder_events_total",
        "Total number of RIB/Announce/Withdraw events dispatched"
    );
    metrics::describe_counter!(
        "zombie_finder_events_ignored_total",
        "Total number of events of untracked element types"
    );
    metrics::describe_counter!(
        "zombie_finder_quarantine_activations_total",
        "Total number of quarantine windows opened"
    );
    metrics::describe_counter!(
        "zombie_finder_snapshots_total",
        "Total number of path-state snapshots emitted"
    );
    metrics::describe_counter!(
        "zombie_finder_changing_lines_total",
        "Total number of changing-events lines written"
    );
    metrics::describe_counter!(
        "zombie_finder_unwatched_removals_total",
        "Total number of expiries of entries that were not watched"
    );
    metrics::describe_gauge!(
        "zombie_finder_watched_entries",
        "Current number of open quarantine windows"
    );
    metrics::describe_gauge!(
        "zombie_finder_pending_zombies",
        "Current number of tracked entries awaiting expiry"
    );
    metrics::describe_gauge!(
        "zombie_finder_live_prefixes",
        "Current number of prefixes held in the path state table"
    );

    // Source metrics
    metrics::describe_counter!(
        "zombie_finder_source_events_total",
        "Total number of filtered MRT events handed to the dispatcher"
    );

    Ok(())
}

pub async fn resolve_address(address: String) -> Result<SocketAddr> {
    match lookup_host(&address).await?.next() {
        Some(addr) => Ok(addr),
        None => anyhow::bail!("Failed to resolve address: {}", address),
    }
}

fn day_start(month: Month, day: u32) -> Result<i64> {
    match NaiveDate::from_ymd_opt(month.year, month.month, day)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        Some(dt) => Ok(dt.and_utc().timestamp()),
        None => anyhow::bail!(
            "invalid day {} for {}-{}",
            day,
            month.year,
            month.month
        ),
    }
}

/// Validate the parsed command line and derive the application config.
pub fn build_config(cli: Cli) -> Result<AppConfig> {
    if cli.rib.is_empty() && cli.updates.is_empty() {
        anyhow::bail!("at least one MRT input must be given with --rib or --updates");
    }
    if cli.prefix_column == cli.expiry_column {
        anyhow::bail!("--prefix-column and --expiry-column must differ");
    }
    if cli.partitions == 0 {
        anyhow::bail!("--partitions must be at least 1");
    }

    let interval_start = day_start(cli.date, cli.interval_start_day)?;
    let interval_end = day_start(cli.date, cli.interval_end_day)?;
    if interval_start >= interval_end {
        anyhow::bail!(
            "interval start day {} must precede end day {}",
            cli.interval_start_day,
            cli.interval_end_day
        );
    }

    let Month { year, month } = cli.date;
    let tracked_paths = (0..cli.partitions)
        .map(|i| {
            cli.data_dir
                .join(format!("{}-{}-zombieDetector-{}.txt", year, month, i))
        })
        .collect();

    // RIB inputs first so they win timestamp ties in the merge.
    let inputs = cli
        .rib
        .into_iter()
        .map(MrtInput::rib)
        .chain(cli.updates.into_iter().map(MrtInput::updates))
        .collect();

    Ok(AppConfig {
        engine: EngineConfig {
            quarantine_secs: cli.quarantine_secs,
        },
        input: InputConfig {
            tracked_paths,
            columns: TrackedColumns {
                prefix: cli.prefix_column,
                expiry: cli.expiry_column,
            },
        },
        source: SourceConfig {
            inputs,
            interval_start,
            interval_end,
            event_buffer_size: cli.event_buffer_size,
        },
        output: OutputConfig {
            snapshot_path: cli.result_dir.join(format!(
                "{}-{}-zombie-record-finder-{}.json",
                year, month, cli.collector
            )),
            changing_path: cli.result_dir.join(format!(
                "{}-{}-zombie-changing-events-{}.txt",
                year, month, cli.collector
            )),
        },
        collector: cli.collector,
    })
}

pub async fn configure() -> Result<AppConfig> {
    let cli = Cli::parse();

    // Set up tracing
    set_logging(&cli).map_err(|e| anyhow::anyhow!("Failed to set up logging: {}", e))?;

    let metrics_address = cli.metrics_address.clone();
    let cfg = build_config(cli)?;

    // Set up metrics
    if let Some(address) = metrics_address {
        let metrics_addr = resolve_address(address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to resolve metrics address: {}", e))?;
        set_metrics(metrics_addr)?;
    }

    Ok(cfg)
}

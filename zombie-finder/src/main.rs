mod config;
mod output;

use anyhow::Result;
use tracing::{info, trace, warn};

use zombie_finder_lib::find_zombie_records;
use zombie_finder_lib::tracked::read_tracked_files;

use crate::config::configure;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = configure().await?;
    trace!("{:?}", cfg);

    let entries = read_tracked_files(&cfg.input.tracked_paths, cfg.input.columns)?;
    if entries.is_empty() {
        warn!(
            "[{}] no tracked entries in {} partition files",
            cfg.collector,
            cfg.input.tracked_paths.len()
        );
    }
    info!(
        "[{}] {} tracked entries, {} MRT inputs, quarantine {}s",
        cfg.collector,
        entries.len(),
        cfg.source.inputs.len(),
        cfg.engine.quarantine_secs
    );

    let changing = output::open_changing_log(&cfg.output.changing_path)?;
    let run = find_zombie_records(
        cfg.engine,
        entries,
        cfg.source.inputs.clone(),
        (cfg.source.interval_start, cfg.source.interval_end),
        changing,
        cfg.source.event_buffer_size,
    )
    .await;

    // Snapshots gathered before a fault are still written.
    output::write_snapshot_file(&cfg.output.snapshot_path, &run.snapshots)?;
    info!(
        "[{}] wrote {} snapshots to {} and {} changing lines to {}",
        cfg.collector,
        run.snapshots.len(),
        cfg.output.snapshot_path.display(),
        run.summary.changing_lines,
        cfg.output.changing_path.display()
    );

    if let Some(fault) = run.fault {
        return Err(fault.context(format!(
            "[{}] run ended early, partial results were written",
            cfg.collector
        )));
    }

    Ok(())
}

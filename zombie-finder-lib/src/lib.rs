pub mod dispatcher;
pub mod event;
pub mod merge;
pub mod mrt;
pub mod path_state;
pub mod queue;
pub mod recorder;
pub mod snapshot;
pub mod source;
pub mod tracked;

use std::io::Write;
use tokio::sync::mpsc::channel;
use tracing::{error, info, warn};

use crate::dispatcher::{Dispatcher, EngineConfig, RunSummary};
use crate::mrt::{EventFilter, MrtInput};
use crate::snapshot::Snapshots;
use crate::source::spawn_event_source;
use crate::tracked::ZombieEntry;

/// Result of a complete or interrupted run.
pub struct RunOutput<W: Write> {
    pub snapshots: Snapshots,
    pub changing: W,
    pub summary: RunSummary,
    /// Fault that ended the dispatch loop before the stream was exhausted.
    pub fault: Option<anyhow::Error>,
}

/// Stream MRT inputs through a dispatcher for `entries`.
///
/// Faults inside the dispatch loop do not discard work: the snapshots
/// gathered so far are returned together with the fault.
pub async fn find_zombie_records<W: Write>(
    config: EngineConfig,
    entries: Vec<ZombieEntry>,
    inputs: Vec<MrtInput>,
    interval: (i64, i64),
    changing: W,
    buffer_size: usize,
) -> RunOutput<W> {
    let filter = EventFilter::new(
        entries.iter().map(|entry| entry.prefix.clone()),
        interval.0,
        interval.1,
    );
    let mut dispatcher = Dispatcher::new(config, entries, changing);

    let (tx, rx) = channel(buffer_size.max(1));
    let source = spawn_event_source(inputs, filter, tx);

    let outcome = dispatcher.run(rx).await;
    let summary = dispatcher.summary();
    let fault = match outcome {
        Ok(_) => {
            info!(
                "event stream exhausted: {} events, {} ignored, {} snapshots, {} changing",
                summary.events, summary.ignored, summary.snapshots, summary.changing_lines
            );
            None
        }
        Err(err) => {
            error!(
                "dispatch loop terminated early after {} events: {:#}",
                summary.events, err
            );
            Some(err)
        }
    };
    if summary.pending > 0 {
        warn!(
            "{} tracked entries never expired within the event stream",
            summary.pending
        );
    }

    let (snapshots, mut changing) = dispatcher.finish();
    let fault = match (fault, changing.flush()) {
        (None, Err(err)) => {
            error!("failed to flush changing-events output: {}", err);
            Some(err.into())
        }
        (fault, _) => fault,
    };
    if let Err(err) = source.await {
        error!("event source worker failed: {}", err);
    }

    RunOutput {
        snapshots,
        changing,
        summary,
        fault,
    }
}

use anyhow::Result;
use metrics::counter;
use std::collections::BTreeMap;
use std::io::Write;
use tracing::{debug, warn};

use crate::path_state::{PathStateTable, PeerPaths};
use crate::recorder::{EventRecorder, join_records};
use crate::tracked::ZombieEntry;

/// Snapshots keyed by `"prefix|expiry"`.
pub type Snapshots = BTreeMap<String, PeerPaths>;

/// Captures path state at expiry and flushes quarantine logs to the
/// changing-events output.
pub struct SnapshotEmitter<W: Write> {
    snapshots: Snapshots,
    changing: W,
    changing_lines: u64,
}

impl<W: Write> SnapshotEmitter<W> {
    pub fn new(changing: W) -> SnapshotEmitter<W> {
        SnapshotEmitter {
            snapshots: Snapshots::new(),
            changing,
            changing_lines: 0,
        }
    }

    pub fn emit(
        &mut self,
        entry: &ZombieEntry,
        table: &mut PathStateTable,
        recorder: &mut EventRecorder,
    ) -> Result<()> {
        let peers = table.snapshot(&entry.prefix);
        debug!(
            "{}: snapshot at {} with {} peers",
            entry.prefix,
            entry.expiry,
            peers.len()
        );
        self.snapshots.insert(entry.snapshot_key(), peers);
        counter!("zombie_finder_snapshots_total").increment(1);

        match recorder.unwatch(&entry.prefix, entry.expiry) {
            Some(records) => {
                writeln!(
                    self.changing,
                    "{} {} ? {}",
                    entry.prefix,
                    entry.expiry,
                    join_records(&records)
                )?;
                self.changing_lines += 1;
                counter!("zombie_finder_changing_lines_total").increment(1);
            }
            None => {
                warn!(
                    "{}: expired at {} but was not watched",
                    entry.prefix, entry.expiry
                );
                counter!("zombie_finder_unwatched_removals_total").increment(1);
            }
        }

        Ok(())
    }

    pub fn snapshots(&self) -> &Snapshots {
        &self.snapshots
    }

    pub fn changing_lines(&self) -> u64 {
        self.changing_lines
    }

    /// Hand back the snapshots and the changing-events writer, unflushed.
    pub fn finish(self) -> (Snapshots, W) {
        (self.snapshots, self.changing)
    }
}

/// Serialize snapshots as one JSON object.
pub fn write_snapshots<W: Write>(snapshots: &Snapshots, mut writer: W) -> Result<()> {
    serde_json::to_writer(&mut writer, snapshots)?;
    writer.flush()?;
    Ok(())
}

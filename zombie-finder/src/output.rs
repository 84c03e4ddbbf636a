use anyhow::{Context, Result};
use std::fs::{File, OpenOptions, create_dir_all};
use std::io::{BufWriter, LineWriter};
use std::path::Path;

use zombie_finder_lib::snapshot::{Snapshots, write_snapshots};

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

/// Open the changing-events log for appending. Each line reaches the
/// file as soon as it is written.
pub fn open_changing_log(path: &Path) -> Result<LineWriter<File>> {
    ensure_parent(path)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok(LineWriter::new(file))
}

pub fn write_snapshot_file(path: &Path, snapshots: &Snapshots) -> Result<()> {
    ensure_parent(path)?;
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    write_snapshots(snapshots, BufWriter::new(file))
        .with_context(|| format!("failed to write snapshots to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zombie_finder_lib::event::{ElementType, RoutingEvent};
    use zombie_finder_lib::path_state::{PeerPathState, PeerPaths};

    #[test]
    fn changing_log_appends_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results/2017-11-zombie-changing-events-rrc00.txt");

        {
            let mut log = open_changing_log(&path).unwrap();
            writeln!(log, "1.2.3.0/24 1000 ? ").unwrap();
        }
        {
            let mut log = open_changing_log(&path).unwrap();
            writeln!(log, "5.6.0.0/16 2000 ? 1950|Withdraw|10.0.0.1|65000").unwrap();
        }

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "1.2.3.0/24 1000 ? \n5.6.0.0/16 2000 ? 1950|Withdraw|10.0.0.1|65000\n"
        );
    }

    #[test]
    fn snapshot_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2017-11-zombie-record-finder-rrc00.json");
        std::fs::write(&path, "stale").unwrap();

        let mut state = PeerPathState::default();
        state.apply(
            &RoutingEvent::new(950, ElementType::Announce, "1.2.3.0/24", "10.0.0.1", "65000")
                .with_as_path("65000 65001"),
        );
        let mut peers = PeerPaths::new();
        peers.insert("10.0.0.1".to_string(), state);
        let mut snapshots = Snapshots::new();
        snapshots.insert("1.2.3.0/24|1000".to_string(), peers);
        snapshots.insert("5.6.0.0/16|2000".to_string(), PeerPaths::new());

        write_snapshot_file(&path, &snapshots).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["1.2.3.0/24|1000"]["10.0.0.1"]["asPath"], "65000 65001");
        assert_eq!(json["5.6.0.0/16|2000"], serde_json::json!({}));
    }
}

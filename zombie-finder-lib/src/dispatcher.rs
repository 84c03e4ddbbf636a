use anyhow::Result;
use metrics::{counter, gauge};
use std::io::Write;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, info, trace};

use crate::event::RoutingEvent;
use crate::path_state::PathStateTable;
use crate::queue::{QuarantineQueue, ZombieQueue};
use crate::recorder::EventRecorder;
use crate::snapshot::{SnapshotEmitter, Snapshots};
use crate::tracked::ZombieEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Length of the observation window preceding each expiry.
    pub quarantine_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub events: u64,
    pub ignored: u64,
    pub snapshots: usize,
    pub changing_lines: u64,
    /// Tracked entries whose expiry was never crossed by an event.
    pub pending: usize,
}

/// Single-pass driver synchronizing both queues against the event clock.
///
/// Events must arrive in non-decreasing timestamp order; this is not checked.
pub struct Dispatcher<W: Write> {
    zombies: ZombieQueue,
    quarantine: QuarantineQueue,
    table: PathStateTable,
    recorder: EventRecorder,
    emitter: SnapshotEmitter<W>,
    events: u64,
    ignored: u64,
}

impl<W: Write> Dispatcher<W> {
    pub fn new(config: EngineConfig, mut entries: Vec<ZombieEntry>, changing: W) -> Dispatcher<W> {
        entries.sort();
        let listed = entries.len();
        entries.dedup();
        if entries.len() != listed {
            debug!("dropped {} duplicate tracked entries", listed - entries.len());
        }

        let windows = entries
            .iter()
            .map(|entry| entry.quarantine(config.quarantine_secs))
            .collect();
        let table = PathStateTable::new(entries.iter());

        info!(
            "tracking {} entries over {} prefixes, quarantine {}s",
            entries.len(),
            table.live_prefixes(),
            config.quarantine_secs
        );
        gauge!("zombie_finder_pending_zombies").set(entries.len() as f64);

        Dispatcher {
            zombies: ZombieQueue::new(entries),
            quarantine: QuarantineQueue::new(windows),
            table,
            recorder: EventRecorder::new(),
            emitter: SnapshotEmitter::new(changing),
            events: 0,
            ignored: 0,
        }
    }

    /// Process one event: open due windows, emit due snapshots, then apply it.
    pub fn dispatch(&mut self, event: &RoutingEvent) -> Result<()> {
        if !event.element_type.is_tracked() {
            self.ignored += 1;
            counter!("zombie_finder_events_ignored_total").increment(1);
            return Ok(());
        }

        self.events += 1;
        counter!("zombie_finder_events_total", "type" => event.element_type.as_str()).increment(1);
        let now = event.timestamp;

        // Windows open before expiries are processed, so an entry whose
        // activation and expiry both fall behind `now` is watched first.
        while let Some(window) = self.quarantine.pop_before(now) {
            self.recorder.watch(&window.prefix, window.expiry);
            counter!("zombie_finder_quarantine_activations_total").increment(1);
        }

        while let Some(zombie) = self.zombies.pop_before(now) {
            self.emitter.emit(&zombie, &mut self.table, &mut self.recorder)?;
            gauge!("zombie_finder_pending_zombies").set(self.zombies.len() as f64);
        }

        let updated = self.table.update(event);
        let recorded = self.recorder.record(event);
        trace!(
            "{} {} {} {}: updated={} recorded={}",
            event.timestamp, event.element_type, event.prefix, event.peer_address, updated, recorded
        );

        Ok(())
    }

    /// Drain the event channel until the source closes it or sends an error.
    pub async fn run(&mut self, mut rx: Receiver<Result<RoutingEvent>>) -> Result<RunSummary> {
        while let Some(event) = rx.recv().await {
            let event = event?;
            self.dispatch(&event)?;
        }
        Ok(self.summary())
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            events: self.events,
            ignored: self.ignored,
            snapshots: self.emitter.snapshots().len(),
            changing_lines: self.emitter.changing_lines(),
            pending: self.zombies.len(),
        }
    }

    #[cfg(test)]
    pub fn snapshots(&self) -> &Snapshots {
        self.emitter.snapshots()
    }

    pub fn finish(self) -> (Snapshots, W) {
        self.emitter.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ElementType;
    use tokio::sync::mpsc::channel;

    const PREFIX: &str = "1.2.3.0/24";

    fn dispatcher(entries: Vec<ZombieEntry>, quarantine_secs: u64) -> Dispatcher<Vec<u8>> {
        Dispatcher::new(EngineConfig { quarantine_secs }, entries, Vec::new())
    }

    fn announce(ts: i64, prefix: &str, peer: &str, asn: &str, path: &str) -> RoutingEvent {
        RoutingEvent::new(ts, ElementType::Announce, prefix, peer, asn).with_as_path(path)
    }

    fn feed(d: &mut Dispatcher<Vec<u8>>, events: &[RoutingEvent]) {
        for event in events {
            d.dispatch(event).unwrap();
        }
    }

    fn changing_output(d: Dispatcher<Vec<u8>>) -> (Snapshots, String) {
        let (snapshots, changing) = d.finish();
        (snapshots, String::from_utf8(changing).unwrap())
    }

    #[test]
    fn quarantine_scenario() {
        let mut d = dispatcher(vec![ZombieEntry::new(PREFIX, 1000)], 100);

        feed(
            &mut d,
            &[
                announce(850, PREFIX, "10.0.0.1", "65000", "65000"),
                announce(950, PREFIX, "10.0.0.1", "65000", "65000 65001"),
                announce(1001, "9.9.9.0/24", "10.0.0.9", "65009", "65009"),
            ],
        );

        let summary = d.summary();
        assert_eq!(summary.snapshots, 1);
        assert_eq!(summary.pending, 0);

        let (snapshots, changing) = changing_output(d);
        let state = &snapshots["1.2.3.0/24|1000"]["10.0.0.1"];
        assert_eq!(state.status, ElementType::Announce);
        assert_eq!(state.peer_asn, "65000");
        assert_eq!(state.as_path, "65000 65001");
        assert_eq!(state.last_update, 950);
        assert_eq!(changing, "1.2.3.0/24 1000 ? 950|Announce|10.0.0.1|65000\n");
    }

    #[test]
    fn expiry_is_only_crossed_by_strictly_later_event() {
        let mut d = dispatcher(vec![ZombieEntry::new(PREFIX, 1000)], 100);
        let at_expiry = announce(1000, PREFIX, "10.0.0.1", "65000", "65000");
        d.dispatch(&at_expiry).unwrap();
        assert!(d.snapshots().is_empty());

        let after_expiry = announce(1001, PREFIX, "10.0.0.1", "65000", "65000 65001");
        d.dispatch(&after_expiry).unwrap();
        let (snapshots, changing) = changing_output(d);
        let state = &snapshots["1.2.3.0/24|1000"]["10.0.0.1"];
        assert_eq!(state.last_update, 1000);
        assert_eq!(state.as_path, "65000");
        // Path state includes the event at expiry; the quarantine log ends before it.
        assert_eq!(changing, "1.2.3.0/24 1000 ? \n");
    }

    #[test]
    fn events_after_expiry_do_not_change_snapshot() {
        let mut d = dispatcher(vec![ZombieEntry::new(PREFIX, 1000)], 100);
        feed(
            &mut d,
            &[
                announce(990, PREFIX, "10.0.0.1", "65000", "65000"),
                announce(1500, PREFIX, "10.0.0.1", "65000", "65000 65001"),
                announce(2000, PREFIX, "10.0.0.2", "65002", "65002"),
            ],
        );

        let (snapshots, _) = changing_output(d);
        let peers = &snapshots["1.2.3.0/24|1000"];
        assert_eq!(peers.len(), 1);
        assert_eq!(peers["10.0.0.1"].last_update, 990);
    }

    #[test]
    fn record_log_is_bounded_by_window() {
        let mut d = dispatcher(vec![ZombieEntry::new(PREFIX, 1000)], 100);
        for ts in [899, 900, 901, 999, 1000, 1001] {
            let event = announce(ts, PREFIX, "10.0.0.1", "65000", "65000");
            d.dispatch(&event).unwrap();
        }

        let (_, changing) = changing_output(d);
        // The window opens on the first event past 900 and closes before 1000.
        assert_eq!(
            changing,
            "1.2.3.0/24 1000 ? 901|Announce|10.0.0.1|65000,999|Announce|10.0.0.1|65000\n"
        );
    }

    #[test]
    fn zero_quarantine_is_watched_before_snapshot() {
        let mut d = dispatcher(vec![ZombieEntry::new(PREFIX, 1000)], 0);
        feed(
            &mut d,
            &[
                announce(1000, PREFIX, "10.0.0.1", "65000", "65000"),
                announce(1001, PREFIX, "10.0.0.1", "65000", "65000"),
            ],
        );

        let (snapshots, changing) = changing_output(d);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(changing, "1.2.3.0/24 1000 ? \n");
    }

    #[test]
    fn every_entry_is_emitted_exactly_once() {
        let entries = vec![
            ZombieEntry::new("10.0.0.0/8", 100),
            ZombieEntry::new("11.0.0.0/8", 100),
            ZombieEntry::new("12.0.0.0/8", 300),
            ZombieEntry::new("10.0.0.0/8", 500),
            ZombieEntry::new("10.0.0.0/8", 500),
        ];
        let mut d = dispatcher(entries, 50);
        for ts in [90, 150, 150, 320, 600, 700] {
            let event = announce(ts, "10.0.0.0/8", "10.0.0.1", "65000", "65000");
            d.dispatch(&event).unwrap();
        }

        let summary = d.summary();
        assert_eq!(summary.snapshots, 4);
        assert_eq!(summary.changing_lines, 4);
        let (snapshots, changing) = changing_output(d);
        let keys: Vec<&str> = snapshots.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["10.0.0.0/8|100", "10.0.0.0/8|500", "11.0.0.0/8|100", "12.0.0.0/8|300"]
        );
        assert_eq!(changing.lines().count(), 4);
    }

    #[test]
    fn repeated_prefix_keeps_state_between_expiries() {
        let entries = vec![
            ZombieEntry::new(PREFIX, 1000),
            ZombieEntry::new(PREFIX, 2000),
        ];
        let mut d = dispatcher(entries, 100);
        feed(
            &mut d,
            &[
                announce(500, PREFIX, "10.0.0.1", "65000", "65000"),
                announce(1500, PREFIX, "10.0.0.1", "65001", "65001"),
                announce(2500, PREFIX, "10.0.0.1", "65002", "65002"),
            ],
        );

        let (snapshots, _) = changing_output(d);
        assert_eq!(snapshots["1.2.3.0/24|1000"]["10.0.0.1"].peer_asn, "65000");
        assert_eq!(snapshots["1.2.3.0/24|2000"]["10.0.0.1"].peer_asn, "65000 65001");
    }

    #[test]
    fn untracked_events_are_ignored_entirely() {
        let mut d = dispatcher(vec![ZombieEntry::new(PREFIX, 1000)], 100);
        let other = RoutingEvent::new(5000, ElementType::Other, PREFIX, "10.0.0.1", "65000");
        d.dispatch(&other).unwrap();

        let summary = d.summary();
        assert_eq!(summary.ignored, 1);
        assert_eq!(summary.events, 0);
        assert_eq!(summary.snapshots, 0);
        assert_eq!(summary.pending, 1);
    }

    #[test]
    fn withdraw_after_announce_is_snapshotted() {
        let mut d = dispatcher(vec![ZombieEntry::new(PREFIX, 1000)], 100);
        feed(
            &mut d,
            &[
                RoutingEvent::new(10, ElementType::Rib, PREFIX, "10.0.0.1", "65000")
                    .with_as_path("65000 3356"),
                RoutingEvent::new(20, ElementType::Withdraw, PREFIX, "10.0.0.1", "65000"),
                RoutingEvent::new(30, ElementType::Rib, PREFIX, "10.0.0.2", "65010")
                    .with_as_path("65010 174"),
                announce(1001, "9.9.9.0/24", "10.0.0.9", "65009", "65009"),
            ],
        );

        let (snapshots, _) = changing_output(d);
        let peers = &snapshots["1.2.3.0/24|1000"];
        assert_eq!(peers["10.0.0.1"].status, ElementType::Withdraw);
        assert_eq!(peers["10.0.0.1"].as_path, "");
        assert_eq!(peers["10.0.0.2"].status, ElementType::Rib);
        assert_eq!(peers["10.0.0.2"].as_path, "65010 174");
    }

    #[tokio::test]
    async fn run_drains_channel_until_closed() {
        let (tx, rx) = channel(16);
        let mut d = dispatcher(vec![ZombieEntry::new(PREFIX, 1000)], 100);

        tx.send(Ok(announce(950, PREFIX, "10.0.0.1", "65000", "65000")))
            .await
            .unwrap();
        tx.send(Ok(announce(1001, PREFIX, "10.0.0.1", "65000", "65000")))
            .await
            .unwrap();
        drop(tx);

        let summary = d.run(rx).await.unwrap();
        assert_eq!(summary.events, 2);
        assert_eq!(summary.snapshots, 1);
    }

    #[tokio::test]
    async fn run_stops_on_source_error_and_keeps_snapshots() {
        let (tx, rx) = channel(16);
        let mut d = dispatcher(
            vec![
                ZombieEntry::new(PREFIX, 1000),
                ZombieEntry::new("4.5.6.0/24", 3000),
            ],
            100,
        );

        tx.send(Ok(announce(950, PREFIX, "10.0.0.1", "65000", "65000")))
            .await
            .unwrap();
        tx.send(Ok(announce(1001, PREFIX, "10.0.0.1", "65000", "65000")))
            .await
            .unwrap();
        tx.send(Err(anyhow::anyhow!("truncated MRT record")))
            .await
            .unwrap();
        tx.send(Ok(announce(5000, PREFIX, "10.0.0.1", "65000", "65000")))
            .await
            .unwrap();
        drop(tx);

        let err = d.run(rx).await.unwrap_err();
        assert!(err.to_string().contains("truncated"));
        assert_eq!(d.summary().pending, 1);

        let (snapshots, _) = d.finish();
        assert!(snapshots.contains_key("1.2.3.0/24|1000"));
        assert!(!snapshots.contains_key("4.5.6.0/24|3000"));
    }
}

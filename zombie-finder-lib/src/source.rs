use anyhow::Result;
use metrics::counter;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::event::RoutingEvent;
use crate::merge::OrderedMerge;
use crate::mrt::{EventFilter, MrtInput, filter_events, open_elems};

pub type EventSender = Sender<Result<RoutingEvent>>;

/// End `items` as soon as the receiving side of `tx` is gone.
///
/// Checked per raw item, so decoding stops even while the filter
/// discards everything.
pub fn until_closed<I: Iterator>(
    items: I,
    tx: &EventSender,
) -> impl Iterator<Item = I::Item> + use<I> {
    let tx = tx.clone();
    items.take_while(move |_| !tx.is_closed())
}

/// Forward events into the dispatcher channel. Stops early when the
/// receiver is gone and returns the number of events delivered. A source
/// error is returned instead of being forwarded.
pub fn forward_events<I>(events: I, tx: &EventSender) -> Result<u64>
where
    I: Iterator<Item = Result<RoutingEvent>>,
{
    let mut sent = 0;
    for event in events {
        if tx.blocking_send(Ok(event?)).is_err() {
            debug!("event receiver closed after {} events", sent);
            break;
        }
        sent += 1;
        counter!("zombie_finder_source_events_total").increment(1);
    }
    Ok(sent)
}

fn stream_inputs(inputs: &[MrtInput], filter: &EventFilter, tx: &EventSender) -> Result<u64> {
    let mut sources = Vec::with_capacity(inputs.len());
    for input in inputs {
        let elems = until_closed(open_elems(input)?, tx);
        sources.push(filter_events(elems, input.kind, filter.clone()));
    }
    forward_events(OrderedMerge::new(sources), tx)
}

/// Decode and merge MRT inputs on a blocking worker.
///
/// Inputs are merged into one time-ordered stream, RIB inputs listed first
/// win timestamp ties. A failure is delivered to the receiver as an error
/// so the dispatcher stops and flushes what it has.
pub fn spawn_event_source(
    inputs: Vec<MrtInput>,
    filter: EventFilter,
    tx: EventSender,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        info!("streaming {} MRT inputs", inputs.len());
        match stream_inputs(&inputs, &filter, &tx) {
            Ok(sent) => info!("event source finished after {} events", sent),
            Err(err) => {
                if tx.blocking_send(Err(err)).is_err() {
                    debug!("event receiver closed before source error could be delivered");
                }
            }
        }
    })
}

//! The live event stream.
//!
//! One poller samples the store for new blocks and transactions and fans
//! results out over a bounded broadcast channel; a lagging subscriber loses
//! the oldest events and the stream simply continues. Channels: `blocks`,
//! `transactions`, `mempool`, `keepalive`.

use std::time::Duration;

use futures::Stream;
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use chaindex_store::Reader;

use crate::views::{self, Expand};

/// Per-process fan-out queue depth; overflow drops the oldest events.
const EVENT_QUEUE_DEPTH: usize = 256;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Upper bound on one mempool snapshot.
const MEMPOOL_SNAPSHOT_LIMIT: i64 = 1_000;

#[derive(Clone, Debug, Serialize)]
pub struct Event {
    pub event: String,
    pub data: Value,
    pub channel: String,
}

impl Event {
    fn new(event: &str, data: Value, channel: &str) -> Event {
        Event {
            event: event.to_string(),
            data,
            channel: channel.to_string(),
        }
    }

    /// One SSE frame: a `data:` line with the JSON body, then a blank line.
    pub fn frame(&self) -> String {
        format!(
            "data: {}\n\n",
            serde_json::to_string(self).expect("event serializes")
        )
    }
}

#[derive(Clone)]
pub struct EventStream {
    sender: broadcast::Sender<Event>,
}

impl EventStream {
    /// Spawns the store poller and the keep-alive ticker.
    pub fn start(reader: Reader, endpoint: String, poll_interval: Duration) -> EventStream {
        let (sender, _) = broadcast::channel(EVENT_QUEUE_DEPTH);

        tokio::spawn(poll_store(reader, endpoint, poll_interval, sender.clone()));
        tokio::spawn(keepalive(sender.clone()));

        EventStream { sender }
    }

    /// Subscribes to a channel set; an empty set receives nothing but
    /// keeps the connection open.
    pub fn subscribe(&self, channels: Vec<String>) -> impl Stream<Item = String> {
        let mut receiver = self.sender.subscribe();
        async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if channels.iter().any(|channel| channel == &event.channel) {
                            yield event.frame();
                        }
                    }
                    // drop-oldest: skip what was lost and keep going
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!("subscriber lagged, dropped {missed} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Samples chaintip and newest transaction id; publishes deltas and flushes
/// a mempool snapshot whenever the pool turned dirty.
async fn poll_store(
    reader: Reader,
    endpoint: String,
    poll_interval: Duration,
    sender: broadcast::Sender<Event>,
) {
    let expand = Expand::default();
    let mut last_height: Option<i64> = None;
    let mut last_tx_id: Option<i64> = None;

    loop {
        tokio::time::sleep(poll_interval).await;
        let mut mempool_dirty = false;

        match reader.chaintip().await {
            Ok(Some(tip)) => {
                let height = tip.height.unwrap_or(0);
                if let Some(previous) = last_height {
                    if height > previous {
                        match reader.blocks(previous + 1, height - previous, None).await {
                            Ok(fresh) => {
                                for block in &fresh {
                                    let data =
                                        views::block_json(block, &endpoint, &expand, None, None);
                                    let _ = sender.send(Event::new("newblock", data, "blocks"));
                                }
                                mempool_dirty = true;
                            }
                            Err(err) => warn!("event poll failed reading blocks: {err}"),
                        }
                    }
                }
                last_height = Some(height);
            }
            Ok(None) => {}
            Err(err) => warn!("event poll failed reading chaintip: {err}"),
        }

        match reader.latest_transactions(1, false).await {
            Ok(newest) => {
                if let Some(newest) = newest.first() {
                    if let Some(previous) = last_tx_id {
                        if newest.id > previous {
                            let window = newest.id - previous;
                            match reader.latest_transactions(window, false).await {
                                Ok(fresh) => {
                                    for tx in fresh.iter().rev().filter(|tx| tx.id > previous) {
                                        let data =
                                            views::transaction_json(tx, &endpoint, None);
                                        let _ = sender
                                            .send(Event::new("newtx", data, "transactions"));
                                    }
                                    mempool_dirty = true;
                                }
                                Err(err) => {
                                    warn!("event poll failed reading transactions: {err}")
                                }
                            }
                        }
                    }
                    last_tx_id = Some(newest.id);
                }
            }
            Err(err) => warn!("event poll failed reading latest transaction: {err}"),
        }

        if mempool_dirty {
            match reader.mempool(MEMPOOL_SNAPSHOT_LIMIT).await {
                Ok(snapshot) => {
                    let data: Vec<Value> = snapshot
                        .iter()
                        .map(|tx| views::transaction_json(tx, &endpoint, None))
                        .collect();
                    let _ = sender.send(Event::new("mempoolupdate", Value::from(data), "mempool"));
                }
                Err(err) => warn!("event poll failed reading mempool: {err}"),
            }
        }
    }
}

async fn keepalive(sender: broadcast::Sender<Event>) {
    loop {
        tokio::time::sleep(KEEPALIVE_INTERVAL).await;
        let _ = sender.send(Event::new("keepalive", Value::Null, "keepalive"));
    }
}

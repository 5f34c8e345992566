//! Watch Broker: pushes switch changes to subscribers without polling.
//!
//! Each key with at least one live subscriber owns a `tokio::sync::watch`
//! channel. The channel is a single slot that `publish` overwrites, so a slow
//! subscriber is coalesced to the latest state instead of building a backlog.
//! The slot is only replaced by a record with a strictly greater version,
//! which makes every subscriber's view monotonic even when publishers race.
//!
//! Dropping (or cancelling) a [`Subscription`] releases its receiver at once;
//! the key's channel is pruned when its last subscriber goes away.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::types::SwitchRecord;

#[derive(Default)]
struct Channels {
    by_key: RwLock<HashMap<String, watch::Sender<SwitchRecord>>>,
}

/// Replace the slot iff `record` is newer. Never blocks on subscribers.
fn offer(tx: &watch::Sender<SwitchRecord>, record: SwitchRecord) -> bool {
    tx.send_if_modified(|current| {
        if record.version > current.version {
            *current = record;
            true
        } else {
            false
        }
    })
}

#[derive(Clone, Default)]
pub struct WatchBroker {
    channels: Arc<Channels>,
}

impl WatchBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `record` to every current subscriber of its key.
    ///
    /// Returns `true` if the record advanced the key's slot. A key with no
    /// subscribers has no slot; the record is simply not retained.
    pub fn publish(&self, record: SwitchRecord) -> bool {
        let Ok(map) = self.channels.by_key.read() else {
            tracing::error!(key = %record.key, "watch broker lock poisoned; dropping publish");
            return false;
        };
        match map.get(&record.key) {
            Some(tx) => offer(tx, record),
            None => false,
        }
    }

    /// Register a subscriber for `current.key`, seeded with `current`.
    ///
    /// If the key already has a newer state in its slot the subscriber starts
    /// there instead. The first item the stream yields is the slot's value.
    pub fn subscribe(&self, current: SwitchRecord) -> Subscription {
        let key = current.key.clone();
        let rx = {
            let mut map = match self.channels.by_key.write() {
                Ok(map) => map,
                Err(poisoned) => poisoned.into_inner(),
            };
            let tx = map
                .entry(key.clone())
                .or_insert_with(|| watch::channel(current.clone()).0);
            offer(tx, current);
            tx.subscribe()
        };
        tracing::debug!(%key, "watch subscription opened");
        Subscription {
            key,
            stream: Some(WatchStream::new(rx)),
            channels: Arc::clone(&self.channels),
        }
    }

    /// Number of live subscriptions on `key`.
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.channels
            .by_key
            .read()
            .map(|map| map.get(key).map_or(0, |tx| tx.receiver_count()))
            .unwrap_or(0)
    }

    /// Number of keys that currently hold a channel.
    pub fn channel_count(&self) -> usize {
        self.channels.by_key.read().map(|m| m.len()).unwrap_or(0)
    }
}

impl Channels {
    fn prune(&self, key: &str) {
        let mut map = match self.by_key.write() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        if map.get(key).is_some_and(|tx| tx.receiver_count() == 0) {
            map.remove(key);
            tracing::debug!(%key, "watch channel pruned");
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A live, cancellable feed of one key's successive states.
///
/// Yields the state at subscription time first, then each newer state the
/// subscriber gets to observe. Versions are strictly increasing. Intermediate
/// versions may be skipped when the subscriber falls behind.
pub struct Subscription {
    key: String,
    stream: Option<WatchStream<SwitchRecord>>,
    channels: Arc<Channels>,
}

impl Subscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stop the feed now. Later polls yield `None`.
    pub fn cancel(&mut self) {
        if let Some(stream) = self.stream.take() {
            // The receiver must be gone before the prune check counts them.
            drop(stream);
            self.channels.prune(&self.key);
            tracing::debug!(key = %self.key, "watch subscription cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.stream.is_none()
    }
}

impl Stream for Subscription {
    type Item = SwitchRecord;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut().stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_next(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrincipalId;
    use futures::StreamExt;
    use std::time::Duration;

    fn rec(version: u64) -> SwitchRecord {
        let mut r = SwitchRecord::initial("global");
        r.version = version;
        r.active = version % 2 == 1;
        r.last_actor = PrincipalId::new(format!("p{version}"));
        r
    }

    async fn next(sub: &mut Subscription) -> Option<SwitchRecord> {
        tokio::time::timeout(Duration::from_millis(200), sub.next())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn first_item_is_current_state() {
        let broker = WatchBroker::new();
        let mut sub = broker.subscribe(rec(3));
        assert_eq!(next(&mut sub).await.unwrap().version, 3);
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let broker = WatchBroker::new();
        let mut sub = broker.subscribe(rec(0));
        assert_eq!(next(&mut sub).await.unwrap().version, 0);

        assert!(broker.publish(rec(1)));
        let got = next(&mut sub).await.unwrap();
        assert_eq!(got.version, 1);
        assert!(got.active);
    }

    #[tokio::test]
    async fn slow_subscriber_is_coalesced_to_latest() {
        let broker = WatchBroker::new();
        let mut sub = broker.subscribe(rec(0));
        assert_eq!(next(&mut sub).await.unwrap().version, 0);

        for v in 1..=5 {
            broker.publish(rec(v));
        }
        assert_eq!(next(&mut sub).await.unwrap().version, 5);
        assert!(next(&mut sub).await.is_none(), "no backlog after coalescing");
    }

    #[tokio::test]
    async fn stale_publish_is_ignored() {
        let broker = WatchBroker::new();
        let mut sub = broker.subscribe(rec(4));
        assert_eq!(next(&mut sub).await.unwrap().version, 4);

        assert!(!broker.publish(rec(2)));
        assert!(!broker.publish(rec(4)));
        assert!(next(&mut sub).await.is_none());
    }

    #[tokio::test]
    async fn late_subscriber_with_stale_seed_starts_at_slot() {
        let broker = WatchBroker::new();
        let _early = broker.subscribe(rec(0));
        broker.publish(rec(7));

        let mut late = broker.subscribe(rec(2));
        assert_eq!(next(&mut late).await.unwrap().version, 7);
    }

    #[tokio::test]
    async fn versions_are_strictly_increasing_under_racing_publishers() {
        let broker = WatchBroker::new();
        let mut sub = broker.subscribe(rec(0));

        let mut handles = Vec::new();
        for t in 0..4u64 {
            let broker = broker.clone();
            handles.push(tokio::spawn(async move {
                // Each publisher walks the versions in a different order.
                for i in 0..50u64 {
                    let v = if t % 2 == 0 { i + 1 } else { 50 - i };
                    broker.publish(rec(v));
                    tokio::task::yield_now().await;
                }
            }));
        }

        let mut seen = Vec::new();
        loop {
            match next(&mut sub).await {
                Some(r) => {
                    seen.push(r.version);
                    if r.version == 50 {
                        break;
                    }
                }
                None => break,
            }
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "seen: {seen:?}");
        assert_eq!(seen.last().copied(), Some(50));
    }

    #[tokio::test]
    async fn cancel_stops_delivery_and_releases_channel() {
        let broker = WatchBroker::new();
        let mut sub = broker.subscribe(rec(0));
        assert_eq!(broker.subscriber_count("global"), 1);

        sub.cancel();
        assert!(sub.is_cancelled());
        assert_eq!(broker.subscriber_count("global"), 0);
        assert_eq!(broker.channel_count(), 0);

        assert!(!broker.publish(rec(1)));
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn dropping_one_subscriber_keeps_others() {
        let broker = WatchBroker::new();
        let a = broker.subscribe(rec(0));
        let mut b = broker.subscribe(rec(0));
        assert_eq!(broker.subscriber_count("global"), 2);

        drop(a);
        assert_eq!(broker.subscriber_count("global"), 1);
        assert_eq!(broker.channel_count(), 1);

        assert_eq!(next(&mut b).await.unwrap().version, 0);
        broker.publish(rec(1));
        assert_eq!(next(&mut b).await.unwrap().version, 1);
    }
}

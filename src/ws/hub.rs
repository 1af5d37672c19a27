//! Topic subscriber registry for the live broadcaster.
//!
//! Read-mostly: fan-out happens far more often than (un)subscribing, so
//! publish snapshots the sender list under the read lock and sends after
//! releasing it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tokio::sync::mpsc;

#[derive(Default)]
pub struct SubscriberHub {
    topics: RwLock<HashMap<String, HashMap<u64, mpsc::UnboundedSender<String>>>>,
    next_id: AtomicU64,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh connection identifier.
    pub fn next_conn_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn subscribe(&self, topic: &str, conn_id: u64, tx: mpsc::UnboundedSender<String>) {
        if let Ok(mut topics) = self.topics.write() {
            topics
                .entry(topic.to_string())
                .or_default()
                .insert(conn_id, tx);
        }
    }

    pub fn unsubscribe(&self, topic: &str, conn_id: u64) {
        if let Ok(mut topics) = self.topics.write() {
            if let Some(subs) = topics.get_mut(topic) {
                subs.remove(&conn_id);
                if subs.is_empty() {
                    topics.remove(topic);
                }
            }
        }
    }

    /// Remove a closed connection from every topic.
    pub fn drop_conn(&self, conn_id: u64) {
        if let Ok(mut topics) = self.topics.write() {
            topics.retain(|_, subs| {
                subs.remove(&conn_id);
                !subs.is_empty()
            });
        }
    }

    /// Send a frame to every subscriber of a topic. Returns how many
    /// subscribers received it.
    pub fn publish(&self, topic: &str, frame: &str) -> usize {
        let senders: Vec<mpsc::UnboundedSender<String>> = match self.topics.read() {
            Ok(topics) => topics
                .get(topic)
                .map(|subs| subs.values().cloned().collect())
                .unwrap_or_default(),
            Err(_) => return 0,
        };

        let mut delivered = 0;
        for tx in senders {
            if tx.send(frame.to_string()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publishes_only_to_matching_topic() {
        let hub = SubscriberHub::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        let id1 = hub.next_conn_id();
        let id2 = hub.next_conn_id();
        hub.subscribe("trades.stream", id1, tx1);
        hub.subscribe("trades.stream.pair:zig1pair", id2, tx2);

        assert_eq!(hub.publish("trades.stream", "frame"), 1);
        assert_eq!(rx1.recv().await.unwrap(), "frame");
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_and_drop_remove_the_connection() {
        let hub = SubscriberHub::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = hub.next_conn_id();

        hub.subscribe("trades.stream", id, tx.clone());
        hub.subscribe("trades.stream.pair:zig1pair", id, tx);

        hub.unsubscribe("trades.stream", id);
        assert_eq!(hub.publish("trades.stream", "x"), 0);
        assert_eq!(hub.publish("trades.stream.pair:zig1pair", "x"), 1);

        hub.drop_conn(id);
        assert_eq!(hub.publish("trades.stream.pair:zig1pair", "x"), 0);
    }
}

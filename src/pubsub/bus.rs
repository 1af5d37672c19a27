//! Intra-process pub/sub bus.
//!
//! Replaces a database-backed NOTIFY channel with an in-memory broker of
//! (topic -> subscriber channels). Delivery is at-least-once within the
//! process; ordering across concurrent publishers is not guaranteed. Each
//! subscription drains on its own spawned worker, so a slow handler never
//! blocks publishers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::db::models::NotifyPayload;

#[derive(Default)]
pub struct NotifyBus {
    topics: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<NotifyPayload>>>>,
}

impl NotifyBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fan a payload out to every live subscriber of its topic. Dead
    /// subscriber channels are pruned on the way through.
    pub fn publish(&self, payload: NotifyPayload) {
        let mut dropped = false;
        {
            let topics = match self.topics.read() {
                Ok(t) => t,
                Err(_) => {
                    warn!("Notify bus lock poisoned; dropping publish to {}", payload.topic);
                    return;
                },
            };

            if let Some(subscribers) = topics.get(&payload.topic) {
                for tx in subscribers {
                    if tx.send(payload.clone()).is_err() {
                        dropped = true;
                    }
                }
            } else {
                debug!("No subscribers for topic {}", payload.topic);
            }
        }

        if dropped {
            if let Ok(mut topics) = self.topics.write() {
                if let Some(subscribers) = topics.get_mut(&payload.topic) {
                    subscribers.retain(|tx| !tx.is_closed());
                }
            }
        }
    }

    /// Raw subscription channel for a topic.
    pub fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<NotifyPayload> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut topics) = self.topics.write() {
            topics.entry(topic.to_string()).or_default().push(tx);
        }
        rx
    }

    /// Subscribe with a handler running on a dedicated worker task.
    pub fn listen<F, Fut>(&self, topic: &str, handler: F)
    where
        F: Fn(NotifyPayload) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.subscribe(topic);
        let topic = topic.to_string();
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                handler(payload).await;
            }
            debug!("Listener for topic {} stopped", topic);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn payload(topic: &str, n: i64) -> NotifyPayload {
        NotifyPayload::new(topic, serde_json::json!({ "n": n }))
    }

    #[tokio::test]
    async fn delivers_to_all_topic_subscribers() {
        let bus = NotifyBus::new();
        let mut rx1 = bus.subscribe("pair_created");
        let mut rx2 = bus.subscribe("pair_created");
        let mut other = bus.subscribe("unrelated");

        bus.publish(payload("pair_created", 1));

        assert_eq!(rx1.recv().await.unwrap().data["n"], 1);
        assert_eq!(rx2.recv().await.unwrap().data["n"], 1);
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let bus = NotifyBus::new();
        bus.publish(payload("pair_created", 1));
    }

    #[tokio::test]
    async fn listener_worker_consumes_in_background() {
        let bus = NotifyBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();

        bus.listen("pair_created", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        bus.publish(payload("pair_created", 1));
        bus.publish(payload("pair_created", 2));

        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while seen.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}

//! `LocalEventBus`: an in-process pub/sub standing in for the
//! broker's event topics (§6's transport/eventlog façade). Used by the
//! event trigger and the manager's sync-event gate.
//!
//! Grounded on the subscribe/publish shape of
//! `examples/original_source/src/modules/cron/event.c`'s
//! `flux_event_subscribe`/`flux_msg_handler_create` pairing, reduced to
//! a `HashMap<topic, broadcast::Sender>` since there is no broker here
//! to fan events out across ranks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use cron_kernel::{CronError, EventBus, EventMessage, Subscription};
use tokio::sync::{broadcast, Mutex};

const TOPIC_CAPACITY: usize = 256;

#[derive(Default)]
pub struct LocalEventBus {
    next_id: AtomicU64,
    topics: Mutex<HashMap<String, broadcast::Sender<EventMessage>>>,
    subscriptions: Mutex<HashMap<u64, String>>,
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sender_for(&self, topic: &str) -> broadcast::Sender<EventMessage> {
        let mut topics = self.topics.lock().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, CronError> {
        let sender = self.sender_for(topic).await;
        let receiver = sender.subscribe();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscriptions
            .lock()
            .await
            .insert(id, topic.to_string());
        Ok(Subscription { id, receiver })
    }

    async fn unsubscribe(&self, id: u64) -> Result<(), CronError> {
        self.subscriptions.lock().await.remove(&id);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), CronError> {
        let sender = self.sender_for(topic).await;
        let _ = sender.send(EventMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_message_reaches_subscriber() {
        let bus = LocalEventBus::new();
        let mut sub = bus.subscribe("heartbeat.pulse").await.unwrap();
        bus.publish("heartbeat.pulse", serde_json::json!({"n": 1}))
            .await
            .unwrap();
        let msg = sub.receiver.recv().await.unwrap();
        assert_eq!(msg.topic, "heartbeat.pulse");
        assert_eq!(msg.payload["n"], 1);
    }

    #[tokio::test]
    async fn subscribers_on_different_topics_do_not_cross_talk() {
        let bus = LocalEventBus::new();
        let mut a = bus.subscribe("topic.a").await.unwrap();
        let mut b = bus.subscribe("topic.b").await.unwrap();
        bus.publish("topic.a", serde_json::json!(null))
            .await
            .unwrap();
        assert!(a.receiver.try_recv().is_ok());
        assert!(b.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_does_not_error() {
        let bus = LocalEventBus::new();
        let sub = bus.subscribe("topic.a").await.unwrap();
        assert!(bus.unsubscribe(sub.id).await.is_ok());
        assert!(bus.unsubscribe(sub.id).await.is_ok());
    }
}

//! Broadcast hub
//!
//! Connection registry with topic groups (`all`, `device:<id>`) and
//! non-blocking fan-out. Every subscriber owns a bounded queue with a
//! drop-oldest overflow policy; a slow subscriber never stalls the
//! publisher or its peers, it only accumulates lag.

use im_common::config::HubConfig;
use im_common::{Error, Result, TelemetryPoint, TsMillis, ValueKind};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// The firehose topic every connection may join
pub const TOPIC_ALL: &str = "all";

/// Topic carrying one device's updates
pub fn device_topic(device_id: &str) -> String {
    format!("device:{device_id}")
}

pub type ConnectionId = u64;

/// Telemetry update pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub device_id: String,
    pub tag_id: String,
    pub ts: TsMillis,
    pub quality: u16,
    pub value: serde_json::Value,
    pub value_type: ValueKind,
}

impl TelemetryEvent {
    pub fn from_point(point: &TelemetryPoint) -> Self {
        TelemetryEvent {
            device_id: point.device_id.clone(),
            tag_id: point.tag_id.clone(),
            ts: point.ts,
            quality: point.quality,
            value: point.value.to_json(),
            value_type: point.value.kind(),
        }
    }
}

/// One dropped payload on a lagging connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LagEvent {
    pub connection_id: ConnectionId,
    pub topic: String,
    pub dropped_ts: TsMillis,
}

struct ConnectionShared {
    id: ConnectionId,
    queue: Mutex<VecDeque<TelemetryEvent>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
    lag_count: AtomicU64,
    lag_events: Mutex<VecDeque<LagEvent>>,
    lag_history: usize,
}

impl ConnectionShared {
    /// Enqueue without blocking; overflow drops the oldest payload and
    /// records a lag event
    fn push(&self, topic: &str, event: TelemetryEvent) {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                if let Some(dropped) = queue.pop_front() {
                    self.lag_count.fetch_add(1, Ordering::Relaxed);
                    let mut lags = self.lag_events.lock();
                    if lags.len() >= self.lag_history {
                        lags.pop_front();
                    }
                    lags.push_back(LagEvent {
                        connection_id: self.id,
                        topic: topic.to_string(),
                        dropped_ts: dropped.ts,
                    });
                    warn!("connection {} lagging on {topic}, dropped ts {}", self.id, dropped.ts);
                }
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }
}

/// Receiving side of a connection, handed out by [`BroadcastHub::connect`]
pub struct ConnectionHandle {
    shared: Arc<ConnectionShared>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Await the next payload; `None` once the connection is closed and
    /// drained
    pub async fn recv(&self) -> Option<TelemetryEvent> {
        loop {
            if let Some(event) = self.shared.queue.lock().pop_front() {
                return Some(event);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }
            self.shared.notify.notified().await;
        }
    }

    /// Non-blocking pop
    pub fn try_recv(&self) -> Option<TelemetryEvent> {
        self.shared.queue.lock().pop_front()
    }

    /// Payloads dropped on this connection so far
    pub fn lag_count(&self) -> u64 {
        self.shared.lag_count.load(Ordering::Relaxed)
    }

    pub fn lag_events(&self) -> Vec<LagEvent> {
        self.shared.lag_events.lock().iter().cloned().collect()
    }
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Arc<ConnectionShared>>,
    topics: HashMap<String, HashSet<ConnectionId>>,
}

pub struct BroadcastHub {
    config: HubConfig,
    next_id: AtomicU64,
    registry: RwLock<Registry>,
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Self {
        BroadcastHub {
            config,
            next_id: AtomicU64::new(1),
            registry: RwLock::new(Registry::default()),
        }
    }

    /// Register a connection and hand back its receiving handle
    pub fn connect(&self) -> ConnectionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(ConnectionShared {
            id,
            queue: Mutex::new(VecDeque::with_capacity(self.config.subscriber_buffer)),
            notify: Notify::new(),
            capacity: self.config.subscriber_buffer.max(1),
            closed: AtomicBool::new(false),
            lag_count: AtomicU64::new(0),
            lag_events: Mutex::new(VecDeque::new()),
            lag_history: self.config.lag_history.max(1),
        });
        self.registry.write().connections.insert(id, shared.clone());
        debug!("connection {id} registered");
        ConnectionHandle { shared }
    }

    /// Remove a connection from every topic and wake its receiver
    pub fn disconnect(&self, id: ConnectionId) {
        let mut registry = self.registry.write();
        if let Some(shared) = registry.connections.remove(&id) {
            shared.closed.store(true, Ordering::Release);
            shared.notify.notify_one();
        }
        for members in registry.topics.values_mut() {
            members.remove(&id);
        }
        debug!("connection {id} disconnected");
    }

    pub fn subscribe(&self, id: ConnectionId, topic: &str) -> Result<()> {
        let mut registry = self.registry.write();
        if !registry.connections.contains_key(&id) {
            return Err(Error::NotFound(format!("connection {id}")));
        }
        registry.topics.entry(topic.to_string()).or_default().insert(id);
        Ok(())
    }

    pub fn unsubscribe(&self, id: ConnectionId, topic: &str) -> Result<()> {
        let mut registry = self.registry.write();
        if !registry.connections.contains_key(&id) {
            return Err(Error::NotFound(format!("connection {id}")));
        }
        if let Some(members) = registry.topics.get_mut(topic) {
            members.remove(&id);
        }
        Ok(())
    }

    /// Fan a payload out to every subscriber of `topic`. Never blocks on a
    /// subscriber; returns the number of deliveries.
    pub fn publish(&self, topic: &str, event: &TelemetryEvent) -> usize {
        // Copy the subscriber list out so enqueueing happens lock-free with
        // respect to the registry
        let targets: Vec<Arc<ConnectionShared>> = {
            let registry = self.registry.read();
            match registry.topics.get(topic) {
                Some(members) => members
                    .iter()
                    .filter_map(|id| registry.connections.get(id).cloned())
                    .collect(),
                None => return 0,
            }
        };
        for target in &targets {
            target.push(topic, event.clone());
        }
        targets.len()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.read().connections.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry.read().topics.get(topic).map(HashSet::len).unwrap_or(0)
    }

    /// Total payloads dropped across live connections
    pub fn total_lag(&self) -> u64 {
        self.registry
            .read()
            .connections
            .values()
            .map(|c| c.lag_count.load(Ordering::Relaxed))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use im_common::TelemetryValue;

    fn event(device: &str, tag: &str, ts: TsMillis) -> TelemetryEvent {
        TelemetryEvent::from_point(&TelemetryPoint::new(
            device,
            tag,
            ts,
            TelemetryValue::Float64(1.5),
        ))
    }

    fn hub(buffer: usize) -> BroadcastHub {
        BroadcastHub::new(HubConfig { subscriber_buffer: buffer, lag_history: 8 })
    }

    #[tokio::test]
    async fn fan_out_respects_topic_membership() {
        let hub = hub(16);
        let s1 = hub.connect();
        let s2 = hub.connect();
        let s3 = hub.connect();
        hub.subscribe(s1.id(), TOPIC_ALL).unwrap();
        hub.subscribe(s2.id(), &device_topic("A")).unwrap();
        hub.subscribe(s3.id(), &device_topic("B")).unwrap();

        let payload = event("A", "t1", 1000);
        assert_eq!(hub.publish(TOPIC_ALL, &payload), 1);
        assert_eq!(hub.publish(&device_topic("A"), &payload), 1);

        assert_eq!(s1.recv().await.unwrap().ts, 1000);
        assert_eq!(s2.recv().await.unwrap().ts, 1000);
        assert!(s3.try_recv().is_none());
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_records_lag() {
        let hub = hub(2);
        let slow = hub.connect();
        hub.subscribe(slow.id(), TOPIC_ALL).unwrap();

        hub.publish(TOPIC_ALL, &event("A", "t1", 1));
        hub.publish(TOPIC_ALL, &event("A", "t1", 2));
        hub.publish(TOPIC_ALL, &event("A", "t1", 3));

        // Oldest payload (ts 1) was dropped for this connection only
        assert_eq!(slow.lag_count(), 1);
        let lags = slow.lag_events();
        assert_eq!(lags.len(), 1);
        assert_eq!(lags[0].dropped_ts, 1);

        assert_eq!(slow.recv().await.unwrap().ts, 2);
        assert_eq!(slow.recv().await.unwrap().ts, 3);
    }

    #[tokio::test]
    async fn lag_is_per_connection() {
        let hub = hub(2);
        let slow = hub.connect();
        let fast = hub.connect();
        hub.subscribe(slow.id(), TOPIC_ALL).unwrap();
        hub.subscribe(fast.id(), TOPIC_ALL).unwrap();

        hub.publish(TOPIC_ALL, &event("A", "t1", 1));
        // The fast consumer drains immediately
        assert_eq!(fast.recv().await.unwrap().ts, 1);
        hub.publish(TOPIC_ALL, &event("A", "t1", 2));
        assert_eq!(fast.recv().await.unwrap().ts, 2);
        hub.publish(TOPIC_ALL, &event("A", "t1", 3));

        assert_eq!(slow.lag_count(), 1);
        assert_eq!(fast.lag_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_removes_membership_and_closes_the_handle() {
        let hub = hub(4);
        let conn = hub.connect();
        hub.subscribe(conn.id(), TOPIC_ALL).unwrap();
        assert_eq!(hub.subscriber_count(TOPIC_ALL), 1);

        hub.disconnect(conn.id());
        assert_eq!(hub.subscriber_count(TOPIC_ALL), 0);
        assert_eq!(hub.publish(TOPIC_ALL, &event("A", "t1", 1)), 0);
        assert!(conn.recv().await.is_none());
    }

    #[tokio::test]
    async fn subscribing_an_unknown_connection_fails() {
        let hub = hub(4);
        let err = hub.subscribe(999, TOPIC_ALL).unwrap_err();
        assert_eq!(err.category(), "not_found");
    }

    #[tokio::test]
    async fn unsubscribed_topics_deliver_nothing() {
        let hub = hub(4);
        let conn = hub.connect();
        hub.subscribe(conn.id(), &device_topic("A")).unwrap();
        hub.unsubscribe(conn.id(), &device_topic("A")).unwrap();
        assert_eq!(hub.publish(&device_topic("A"), &event("A", "t1", 1)), 0);
    }

    #[test]
    fn events_serialize_with_camel_case_keys() {
        let payload = event("A", "t1", 42);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["deviceId"], "A");
        assert_eq!(json["tagId"], "t1");
        assert_eq!(json["valueType"], "Float64");
        assert_eq!(json["value"], 1.5);
    }
}

//! Monotone per-tag publishing
//!
//! Both the ingest path and the ticker publish through this layer, which
//! tracks the last published timestamp per `(device, tag)` so subscribers
//! see strictly increasing, duplicate-free timestamps per key.

use im_common::{TelemetryPoint, TsMillis};
use im_hub::{device_topic, BroadcastHub, TelemetryEvent, TOPIC_ALL};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub struct Broadcaster {
    hub: Arc<BroadcastHub>,
    last_published: Mutex<HashMap<(String, String), TsMillis>>,
}

impl Broadcaster {
    pub fn new(hub: Arc<BroadcastHub>) -> Self {
        Broadcaster { hub, last_published: Mutex::new(HashMap::new()) }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Publish the points that advance their key's timestamp, to both the
    /// firehose and the per-device topic. Returns the number published.
    pub fn publish_points(&self, points: &[TelemetryPoint]) -> usize {
        let mut published = 0;
        for point in points {
            let key = (point.device_id.clone(), point.tag_id.clone());
            {
                let mut last = self.last_published.lock();
                match last.get(&key) {
                    Some(&ts) if point.ts <= ts => continue,
                    _ => last.insert(key, point.ts),
                };
            }
            let event = TelemetryEvent::from_point(point);
            self.hub.publish(TOPIC_ALL, &event);
            self.hub.publish(&device_topic(&point.device_id), &event);
            published += 1;
        }
        published
    }
}

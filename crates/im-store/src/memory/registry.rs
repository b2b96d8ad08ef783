//! In-memory device and tag registry

use crate::repository::{DeviceRepository, TagRepository};
use async_trait::async_trait;
use im_common::{Device, Error, Result, Tag};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Devices and tags live in one struct so referential rules can be checked
/// under a single lock.
#[derive(Default)]
pub struct MemoryRegistry {
    inner: RwLock<Registry>,
}

#[derive(Default)]
struct Registry {
    devices: HashMap<String, Device>,
    tags: HashMap<String, Tag>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        MemoryRegistry::default()
    }
}

#[async_trait]
impl DeviceRepository for MemoryRegistry {
    async fn list(&self) -> Result<Vec<Device>> {
        let mut devices: Vec<Device> = self.inner.read().devices.values().cloned().collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(devices)
    }

    async fn get(&self, device_id: &str) -> Result<Device> {
        self.inner
            .read()
            .devices
            .get(device_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("device {device_id}")))
    }

    async fn upsert(&self, device: Device) -> Result<()> {
        self.inner.write().devices.insert(device.device_id.clone(), device);
        Ok(())
    }

    async fn delete(&self, device_id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.devices.contains_key(device_id) {
            return Err(Error::NotFound(format!("device {device_id}")));
        }
        let referencing = inner.tags.values().filter(|t| t.device_id == device_id).count();
        if referencing > 0 {
            return Err(Error::Validation(format!(
                "device {device_id} still referenced by {referencing} tag(s)"
            )));
        }
        inner.devices.remove(device_id);
        Ok(())
    }
}

#[async_trait]
impl TagRepository for MemoryRegistry {
    async fn list(&self, device_id: Option<&str>) -> Result<Vec<Tag>> {
        let inner = self.inner.read();
        let mut tags: Vec<Tag> = inner
            .tags
            .values()
            .filter(|t| device_id.is_none_or(|d| t.device_id == d))
            .cloned()
            .collect();
        tags.sort_by(|a, b| a.tag_id.cmp(&b.tag_id));
        Ok(tags)
    }

    async fn get(&self, tag_id: &str) -> Result<Tag> {
        self.inner
            .read()
            .tags
            .get(tag_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("tag {tag_id}")))
    }

    async fn upsert(&self, tag: Tag) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.devices.contains_key(&tag.device_id) {
            return Err(Error::Validation(format!(
                "tag {} references unknown device {}",
                tag.tag_id, tag.device_id
            )));
        }
        inner.tags.insert(tag.tag_id.clone(), tag);
        Ok(())
    }

    async fn delete(&self, tag_id: &str) -> Result<()> {
        self.inner
            .write()
            .tags
            .remove(tag_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("tag {tag_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use im_common::{Protocol, ValueKind};

    fn device(id: &str) -> Device {
        Device {
            device_id: id.to_string(),
            name: None,
            protocol: Protocol::OpcUa,
            enabled: true,
            location: None,
        }
    }

    fn tag(id: &str, device_id: &str) -> Tag {
        Tag {
            tag_id: id.to_string(),
            device_id: device_id.to_string(),
            data_type: ValueKind::Float64,
            enabled: true,
            unit: None,
            address: None,
            scan_interval_ms: None,
            tag_group: None,
        }
    }

    #[tokio::test]
    async fn tag_must_reference_existing_device() {
        let registry = MemoryRegistry::new();
        let err = TagRepository::upsert(&registry, tag("t1", "missing")).await.unwrap_err();
        assert_eq!(err.category(), "validation");
    }

    #[tokio::test]
    async fn deleting_a_referenced_device_fails() {
        let registry = MemoryRegistry::new();
        DeviceRepository::upsert(&registry, device("d1")).await.unwrap();
        TagRepository::upsert(&registry, tag("t1", "d1")).await.unwrap();

        let err = DeviceRepository::delete(&registry, "d1").await.unwrap_err();
        assert_eq!(err.category(), "validation");

        TagRepository::delete(&registry, "t1").await.unwrap();
        DeviceRepository::delete(&registry, "d1").await.unwrap();
    }
}

//! In-memory motor registry: models, instances, mappings, modes, profiles

use crate::repository::{
    BaselineProfileRepository, MotorInstanceRepository, MotorMappingRepository,
    MotorModelRepository, OperationModeRepository,
};
use async_trait::async_trait;
use im_common::motor::{
    BaselineProfile, MotorInstance, MotorModel, MotorParameter, MotorParameterMapping,
    OperationMode,
};
use im_common::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

/// One struct backs the whole motor registry so cross-references stay under
/// a single lock.
#[derive(Default)]
pub struct MemoryMotorStore {
    inner: RwLock<MotorRegistry>,
}

#[derive(Default)]
struct MotorRegistry {
    models: HashMap<String, MotorModel>,
    instances: HashMap<String, MotorInstance>,
    mappings: HashMap<(String, MotorParameter), MotorParameterMapping>,
    modes: HashMap<String, OperationMode>,
    profiles: HashMap<(String, String, MotorParameter), BaselineProfile>,
}

impl MemoryMotorStore {
    pub fn new() -> Self {
        MemoryMotorStore::default()
    }
}

#[async_trait]
impl MotorModelRepository for MemoryMotorStore {
    async fn get(&self, model_id: &str) -> Result<MotorModel> {
        self.inner
            .read()
            .models
            .get(model_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("motor model {model_id}")))
    }

    async fn list(&self) -> Result<Vec<MotorModel>> {
        Ok(self.inner.read().models.values().cloned().collect())
    }

    async fn upsert(&self, model: MotorModel) -> Result<()> {
        self.inner.write().models.insert(model.model_id.clone(), model);
        Ok(())
    }

    async fn delete(&self, model_id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.instances.values().any(|i| i.model_id == model_id) {
            return Err(Error::Validation(format!("motor model {model_id} still referenced")));
        }
        inner
            .models
            .remove(model_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("motor model {model_id}")))
    }
}

#[async_trait]
impl MotorInstanceRepository for MemoryMotorStore {
    async fn get(&self, instance_id: &str) -> Result<MotorInstance> {
        self.inner
            .read()
            .instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("motor instance {instance_id}")))
    }

    async fn list(&self) -> Result<Vec<MotorInstance>> {
        let mut rows: Vec<MotorInstance> = self.inner.read().instances.values().cloned().collect();
        rows.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        Ok(rows)
    }

    async fn list_enabled(&self) -> Result<Vec<MotorInstance>> {
        let mut rows: Vec<MotorInstance> =
            self.inner.read().instances.values().filter(|i| i.enabled).cloned().collect();
        rows.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        Ok(rows)
    }

    async fn upsert(&self, instance: MotorInstance) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.models.contains_key(&instance.model_id) {
            return Err(Error::Validation(format!(
                "instance {} references unknown model {}",
                instance.instance_id, instance.model_id
            )));
        }
        inner.instances.insert(instance.instance_id.clone(), instance);
        Ok(())
    }

    async fn delete(&self, instance_id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner.mappings.retain(|(instance, _), _| instance != instance_id);
        inner.modes.retain(|_, m| m.instance_id != instance_id);
        inner.profiles.retain(|(instance, _, _), _| instance != instance_id);
        inner
            .instances
            .remove(instance_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("motor instance {instance_id}")))
    }
}

#[async_trait]
impl MotorMappingRepository for MemoryMotorStore {
    async fn list_for_instance(&self, instance_id: &str) -> Result<Vec<MotorParameterMapping>> {
        Ok(self
            .inner
            .read()
            .mappings
            .values()
            .filter(|m| m.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn upsert(&self, mapping: MotorParameterMapping) -> Result<()> {
        self.inner
            .write()
            .mappings
            .insert((mapping.instance_id.clone(), mapping.parameter), mapping);
        Ok(())
    }

    async fn delete(&self, instance_id: &str, parameter: MotorParameter) -> Result<()> {
        self.inner
            .write()
            .mappings
            .remove(&(instance_id.to_string(), parameter))
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("mapping {instance_id}/{parameter:?}")))
    }
}

#[async_trait]
impl OperationModeRepository for MemoryMotorStore {
    async fn list_for_instance(&self, instance_id: &str) -> Result<Vec<OperationMode>> {
        let mut rows: Vec<OperationMode> = self
            .inner
            .read()
            .modes
            .values()
            .filter(|m| m.instance_id == instance_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.mode_id.cmp(&b.mode_id));
        Ok(rows)
    }

    async fn upsert(&self, mode: OperationMode) -> Result<()> {
        self.inner.write().modes.insert(mode.mode_id.clone(), mode);
        Ok(())
    }

    async fn delete(&self, mode_id: &str) -> Result<()> {
        self.inner
            .write()
            .modes
            .remove(mode_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("operation mode {mode_id}")))
    }
}

#[async_trait]
impl BaselineProfileRepository for MemoryMotorStore {
    async fn get(
        &self,
        instance_id: &str,
        mode_id: &str,
        parameter: MotorParameter,
    ) -> Result<Option<BaselineProfile>> {
        Ok(self
            .inner
            .read()
            .profiles
            .get(&(instance_id.to_string(), mode_id.to_string(), parameter))
            .cloned())
    }

    async fn list(&self, instance_id: &str) -> Result<Vec<BaselineProfile>> {
        Ok(self
            .inner
            .read()
            .profiles
            .values()
            .filter(|p| p.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn save(&self, profile: BaselineProfile) -> Result<()> {
        self.inner.write().profiles.insert(
            (profile.instance_id.clone(), profile.mode_id.clone(), profile.parameter),
            profile,
        );
        Ok(())
    }

    async fn delete(&self, instance_id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let before = inner.profiles.len();
        inner.profiles.retain(|(instance, _, _), _| instance != instance_id);
        if inner.profiles.len() == before {
            return Err(Error::NotFound(format!("profiles for instance {instance_id}")));
        }
        Ok(())
    }
}

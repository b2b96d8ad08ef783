//! In-memory correlation-rule and tag-importance stores

use crate::repository::{TagCorrelationRepository, TagImportanceRepository};
use async_trait::async_trait;
use im_common::correlation::CorrelationRule;
use im_common::{Error, Result, TagImportanceRule};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
pub struct MemoryCorrelationRules {
    rules: RwLock<HashMap<String, CorrelationRule>>,
}

impl MemoryCorrelationRules {
    pub fn new() -> Self {
        MemoryCorrelationRules::default()
    }
}

#[async_trait]
impl TagCorrelationRepository for MemoryCorrelationRules {
    async fn list_enabled(&self) -> Result<Vec<CorrelationRule>> {
        let mut rules: Vec<CorrelationRule> =
            self.rules.read().values().filter(|r| r.enabled).cloned().collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rules)
    }

    async fn upsert(&self, rule: CorrelationRule) -> Result<()> {
        self.rules.write().insert(rule.id.clone(), rule);
        Ok(())
    }

    async fn delete(&self, rule_id: &str) -> Result<()> {
        self.rules
            .write()
            .remove(rule_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("correlation rule {rule_id}")))
    }
}

#[derive(Default)]
pub struct MemoryImportanceRules {
    rules: RwLock<HashMap<String, TagImportanceRule>>,
}

impl MemoryImportanceRules {
    pub fn new() -> Self {
        MemoryImportanceRules::default()
    }
}

#[async_trait]
impl TagImportanceRepository for MemoryImportanceRules {
    async fn list(&self) -> Result<Vec<TagImportanceRule>> {
        let mut rules: Vec<TagImportanceRule> = self.rules.read().values().cloned().collect();
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
        Ok(rules)
    }

    async fn upsert(&self, rule: TagImportanceRule) -> Result<()> {
        self.rules.write().insert(rule.pattern.clone(), rule);
        Ok(())
    }

    async fn delete(&self, pattern: &str) -> Result<()> {
        self.rules
            .write()
            .remove(pattern)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("importance rule {pattern}")))
    }
}

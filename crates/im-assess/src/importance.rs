//! Tag importance matcher
//!
//! Maps tag ids onto an importance rank through an ordered wildcard pattern
//! list. Patterns are compiled once per refresh and swapped atomically;
//! lookups never touch the repository.

use im_common::{Result, TagImportance, WildcardPattern};
use im_store::TagImportanceRepository;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

struct CompiledEntry {
    pattern: WildcardPattern,
    importance: TagImportance,
    priority: i32,
}

pub struct TagImportanceService {
    repo: Arc<dyn TagImportanceRepository>,
    default_importance: TagImportance,
    compiled: RwLock<Option<Arc<Vec<CompiledEntry>>>>,
    warned_uninitialized: AtomicBool,
}

impl TagImportanceService {
    pub fn new(repo: Arc<dyn TagImportanceRepository>, default_importance: TagImportance) -> Self {
        TagImportanceService {
            repo,
            default_importance,
            compiled: RwLock::new(None),
            warned_uninitialized: AtomicBool::new(false),
        }
    }

    /// Recompile the pattern set from the repository and swap it in.
    /// Invalid patterns are skipped with a warning rather than poisoning the
    /// whole set.
    pub async fn refresh(&self) -> Result<usize> {
        let rules = self.repo.list().await?;
        let mut entries: Vec<CompiledEntry> = Vec::with_capacity(rules.len());
        for rule in rules.into_iter().filter(|r| r.enabled) {
            match WildcardPattern::compile(&rule.pattern) {
                Ok(pattern) => entries.push(CompiledEntry {
                    pattern,
                    importance: rule.importance,
                    priority: rule.priority,
                }),
                Err(e) => warn!("skipping importance pattern '{}': {e}", rule.pattern),
            }
        }
        entries.sort_by_key(|e| std::cmp::Reverse(e.priority));
        let count = entries.len();
        let literal = entries.iter().filter(|e| e.pattern.is_literal()).count();
        *self.compiled.write() = Some(Arc::new(entries));
        debug!("tag importance refreshed, {count} pattern(s) active ({literal} literal)");
        Ok(count)
    }

    /// Highest-priority matching importance, or the configured default.
    /// Never blocks on I/O; before the first refresh a single warning is
    /// emitted and the default is used.
    pub fn importance_of(&self, tag_id: &str) -> TagImportance {
        let snapshot = self.compiled.read().clone();
        let Some(entries) = snapshot else {
            if !self.warned_uninitialized.swap(true, Ordering::Relaxed) {
                warn!("tag importance queried before first refresh, using default");
            }
            return self.default_importance;
        };
        entries
            .iter()
            .find(|e| e.pattern.is_match(tag_id))
            .map(|e| e.importance)
            .unwrap_or(self.default_importance)
    }

    /// Averaging weight of a tag: Critical=4 .. Trivial=1
    pub fn weight_of(&self, tag_id: &str) -> f64 {
        self.importance_of(tag_id).rank() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use im_common::TagImportanceRule;
    use im_store::memory::MemoryImportanceRules;

    fn rule(pattern: &str, importance: TagImportance, priority: i32) -> TagImportanceRule {
        TagImportanceRule {
            pattern: pattern.to_string(),
            importance,
            priority,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn highest_priority_match_wins() {
        let repo = Arc::new(MemoryImportanceRules::new());
        repo.upsert(rule("temp_*", TagImportance::Minor, 1)).await.unwrap();
        repo.upsert(rule("temp_bearing*", TagImportance::Critical, 10)).await.unwrap();

        let service = TagImportanceService::new(repo, TagImportance::Minor);
        service.refresh().await.unwrap();

        assert_eq!(service.importance_of("temp_bearing_1"), TagImportance::Critical);
        assert_eq!(service.importance_of("temp_oil"), TagImportance::Minor);
    }

    #[tokio::test]
    async fn unmatched_tags_fall_back_to_default() {
        let repo = Arc::new(MemoryImportanceRules::new());
        repo.upsert(rule("vib_*", TagImportance::Major, 1)).await.unwrap();

        let service = TagImportanceService::new(repo, TagImportance::Trivial);
        service.refresh().await.unwrap();
        assert_eq!(service.importance_of("pressure_in"), TagImportance::Trivial);
    }

    #[tokio::test]
    async fn uninitialized_lookup_uses_default_without_io() {
        let repo = Arc::new(MemoryImportanceRules::new());
        let service = TagImportanceService::new(repo, TagImportance::Minor);
        assert_eq!(service.importance_of("anything"), TagImportance::Minor);
    }

    #[tokio::test]
    async fn disabled_rules_are_ignored() {
        let repo = Arc::new(MemoryImportanceRules::new());
        let mut disabled = rule("x*", TagImportance::Critical, 99);
        disabled.enabled = false;
        repo.upsert(disabled).await.unwrap();

        let service = TagImportanceService::new(repo, TagImportance::Minor);
        service.refresh().await.unwrap();
        assert_eq!(service.importance_of("x1"), TagImportance::Minor);
    }
}

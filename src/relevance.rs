//! Oracle-backed project/task relevance screening, with an injected cache so
//! repeated nudge sweeps don't re-ask the same question.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::prompts;
use crate::traits::Oracle;
use crate::types::{Project, TaskCatalogEntry};

/// Verdict cache keyed by (project id, task id). Process-local; entries live
/// for the life of the daemon.
#[derive(Default)]
pub struct RelevanceCache {
    entries: RwLock<HashMap<(String, String), bool>>,
}

impl RelevanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, project_id: &str, task_id: &str) -> Option<bool> {
        self.entries
            .read()
            .ok()?
            .get(&(project_id.to_string(), task_id.to_string()))
            .copied()
    }

    fn put(&self, project_id: &str, task_id: &str, verdict: bool) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert((project_id.to_string(), task_id.to_string()), verdict);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}

pub struct RelevanceChecker {
    oracle: Arc<dyn Oracle>,
    cache: Arc<RelevanceCache>,
}

impl RelevanceChecker {
    pub fn new(oracle: Arc<dyn Oracle>, cache: Arc<RelevanceCache>) -> Self {
        Self { oracle, cache }
    }

    /// Whether `task` fits `project`. Fails open: an unreachable oracle never
    /// blocks a nudge, and a project without a description has nothing to
    /// screen against.
    pub async fn is_task_relevant(&self, project: &Project, task: &TaskCatalogEntry) -> bool {
        if project.description.trim().is_empty() {
            return true;
        }
        if let Some(verdict) = self.cache.get(&project.id, &task.id) {
            debug!(project_id = %project.id, task_id = %task.id, verdict, "relevance cache hit");
            return verdict;
        }

        let prompt = prompts::relevance_check(&project.description, &task.title);
        let verdict = match self.oracle.complete(&prompt).await {
            Ok(reply) => reply.trim().to_lowercase().starts_with("yes"),
            Err(e) => {
                warn!(
                    project_id = %project.id,
                    task_id = %task.id,
                    error = %e,
                    "relevance check failed; assuming relevant"
                );
                true
            }
        };
        self.cache.put(&project.id, &task.id, verdict);
        verdict
    }
}

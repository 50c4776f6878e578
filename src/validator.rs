//! Anti-hallucination validation for oracle task proposals.
//!
//! The ground truth is the set of task ids inside the user's assigned
//! projects. Proposals whose id is not in that set are dropped silently;
//! proposals the user already holds are dropped as duplicates. Survivors are
//! enriched from the catalog, so even the displayed title comes from the
//! store, never from the oracle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::StorageError;
use crate::prompts;
use crate::traits::StateStore;
use crate::types::{EnrichedTask, RecommendationCandidate, ValidationSummary};

pub struct TaskValidator {
    store: Arc<dyn StateStore>,
}

struct KnownTask {
    title: String,
    project_id: String,
    project_name: String,
}

impl TaskValidator {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Filter and enrich one batch of proposals. The result is always a
    /// subset of the user's assigned-project tasks, disjoint from their
    /// existing assignments, with no repeats.
    pub async fn validate(
        &self,
        user_id: &str,
        proposals: Vec<RecommendationCandidate>,
    ) -> Result<(Vec<EnrichedTask>, ValidationSummary), StorageError> {
        let proposed = proposals.len();
        let known = self.known_tasks(user_id).await?;
        let already_assigned: HashSet<String> = self
            .store
            .assignments_for_user(user_id)
            .await?
            .into_iter()
            .map(|a| a.task_id)
            .collect();

        let mut enriched = Vec::new();
        let mut accepted = 0usize;
        let mut hallucinated = 0usize;
        let mut duplicates = 0usize;
        let mut seen: HashSet<String> = HashSet::new();

        for proposal in proposals {
            let Some(task) = known.get(&proposal.id) else {
                hallucinated += 1;
                warn!(
                    user_id,
                    claimed_id = %proposal.id,
                    claimed_title = %proposal.title,
                    "dropping hallucinated task proposal"
                );
                continue;
            };
            // Accepted counts the valid-id partition; the duplicate guard
            // below prunes further without shrinking it.
            accepted += 1;
            if already_assigned.contains(&proposal.id) || !seen.insert(proposal.id.clone()) {
                duplicates += 1;
                continue;
            }
            enriched.push(EnrichedTask {
                task_id: proposal.id,
                task_name: task.title.clone(),
                project_id: task.project_id.clone(),
                project_name: task.project_name.clone(),
            });
        }

        let summary = ValidationSummary {
            proposed,
            accepted,
            hallucinated,
            duplicates,
            final_count: enriched.len(),
        };
        info!(
            user_id,
            proposed = summary.proposed,
            accepted = summary.accepted,
            hallucinated = summary.hallucinated,
            duplicates = summary.duplicates,
            "validated task proposals"
        );
        Ok((enriched, summary))
    }

    async fn known_tasks(&self, user_id: &str) -> Result<HashMap<String, KnownTask>, StorageError> {
        let mut known = HashMap::new();
        for assigned in self.store.assigned_projects(user_id).await? {
            let project_name = match self.store.project(&assigned.project_id).await? {
                Some(project) => project.name,
                None => assigned.project_id.clone(),
            };
            for task in self.store.tasks_for_project(&assigned.project_id).await? {
                known.insert(
                    task.id.clone(),
                    KnownTask {
                        title: task.title,
                        project_id: assigned.project_id.clone(),
                        project_name: project_name.clone(),
                    },
                );
            }
        }
        Ok(known)
    }
}

/// Render validated tasks as the user-facing recommendation message.
pub fn format_tasks_message(tasks: &[EnrichedTask]) -> String {
    if tasks.is_empty() {
        return prompts::PLAN_NOT_READY.to_string();
    }
    let mut out = String::from("Here are your recommended tasks:\n");
    for (i, task) in tasks.iter().enumerate() {
        out.push_str(&format!(
            "\n{}. *{}*\n   Project: {}\n   Task ID: {}",
            i + 1,
            task.task_name,
            task.project_name,
            task.task_id
        ));
    }
    out
}

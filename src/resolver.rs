//! Skill-Based Task Resolver.
//!
//! Given a skill name, picks the single best next task for a user through
//! three fallback tiers: the user's assigned projects (in sequence order),
//! then projects whose name/description mentions the skill, then the whole
//! catalog. Tasks the user already holds are excluded by id *and* by exact
//! title, because the same conceptual task is often duplicated across
//! projects under different ids.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};

use crate::error::StorageError;
use crate::traits::StateStore;
use crate::types::{
    AssignedBy, AssignmentComment, AssignmentStatus, TaskAssignment, TaskCatalogEntry,
};

pub struct TaskResolver {
    store: Arc<dyn StateStore>,
}

/// One run of a title after natural splitting: digit runs compare
/// numerically, text runs case-insensitively. A digit run sorts before any
/// text run so "Task 2" < "Task 2b" stays deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NaturalSegment {
    Number(u64),
    Text(String),
}

impl Ord for NaturalSegment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (NaturalSegment::Number(a), NaturalSegment::Number(b)) => a.cmp(b),
            (NaturalSegment::Text(a), NaturalSegment::Text(b)) => a.cmp(b),
            (NaturalSegment::Number(_), NaturalSegment::Text(_)) => Ordering::Less,
            (NaturalSegment::Text(_), NaturalSegment::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for NaturalSegment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sort key treating embedded numbers as numbers, so "Task 2" sorts before
/// "Task 10". Whitespace is normalized first; text compares lowercased.
pub fn natural_sort_key(title: &str) -> Vec<NaturalSegment> {
    let normalized = title.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut current_is_digit = false;

    for ch in normalized.chars() {
        let is_digit = ch.is_ascii_digit();
        if !current.is_empty() && is_digit != current_is_digit {
            segments.push(finish_segment(&current, current_is_digit));
            current.clear();
        }
        current_is_digit = is_digit;
        current.push(ch);
    }
    if !current.is_empty() {
        segments.push(finish_segment(&current, current_is_digit));
    }
    segments
}

fn finish_segment(run: &str, is_digit: bool) -> NaturalSegment {
    if is_digit {
        // Very long digit runs saturate rather than panic.
        NaturalSegment::Number(run.parse::<u64>().unwrap_or(u64::MAX))
    } else {
        NaturalSegment::Text(run.to_lowercase())
    }
}

/// Skill match: exact (case-insensitive) skill tag, or case-insensitive
/// substring on category or title.
fn matches_skill(task: &TaskCatalogEntry, skill_lower: &str) -> bool {
    task.skill_type.to_lowercase() == skill_lower
        || task.category.to_lowercase().contains(skill_lower)
        || task.title.to_lowercase().contains(skill_lower)
}

struct ExclusionSet {
    ids: HashSet<String>,
    titles: HashSet<String>,
}

impl ExclusionSet {
    fn excludes(&self, task: &TaskCatalogEntry) -> bool {
        self.ids.contains(&task.id) || self.titles.contains(&task.title)
    }
}

fn pick_first(mut candidates: Vec<TaskCatalogEntry>) -> Option<TaskCatalogEntry> {
    candidates.sort_by_key(|t| natural_sort_key(&t.title));
    candidates.into_iter().next()
}

impl TaskResolver {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// The single best unassigned task for `skill_name`, or None when every
    /// tier comes up empty.
    pub async fn resolve_next_task(
        &self,
        user_id: &str,
        skill_name: &str,
    ) -> Result<Option<TaskCatalogEntry>, StorageError> {
        let skill_lower = skill_name.trim().to_lowercase();
        if skill_lower.is_empty() {
            return Ok(None);
        }
        let exclusions = self.exclusion_set(user_id).await?;

        // Tier 1: the user's assigned projects, in sequence order. The first
        // project yielding any skill match wins.
        for assigned in self.store.assigned_projects(user_id).await? {
            let tasks = self.store.tasks_for_project(&assigned.project_id).await?;
            let candidates: Vec<_> = tasks
                .into_iter()
                .filter(|t| !exclusions.excludes(t) && matches_skill(t, &skill_lower))
                .collect();
            if let Some(task) = pick_first(candidates) {
                info!(user_id, skill = skill_name, project_id = %task.project_id,
                      title = %task.title, "resolved task from assigned project");
                return Ok(Some(task));
            }
        }

        // Tier 2: projects whose name/description mention the skill. Only the
        // exclusion filter applies here; project relevance stands in for the
        // skill match.
        for project in self.store.projects_matching_keyword(&skill_lower).await? {
            let tasks = self.store.tasks_for_project(&project.id).await?;
            let candidates: Vec<_> = tasks
                .into_iter()
                .filter(|t| !exclusions.excludes(t))
                .collect();
            if let Some(task) = pick_first(candidates) {
                info!(user_id, skill = skill_name, project_id = %project.id,
                      title = %task.title, "resolved task from keyword-matched project");
                return Ok(Some(task));
            }
        }

        // Tier 3: the whole catalog.
        let candidates: Vec<_> = self
            .store
            .all_tasks()
            .await?
            .into_iter()
            .filter(|t| !exclusions.excludes(t) && matches_skill(t, &skill_lower))
            .collect();
        if let Some(task) = pick_first(candidates) {
            info!(user_id, skill = skill_name, title = %task.title,
                  "resolved task from global fallback");
            return Ok(Some(task));
        }

        debug!(user_id, skill = skill_name, "no unassigned task found for skill");
        Ok(None)
    }

    /// Record the resolved task as an active assignment. Returns false when
    /// the (user, task) pair already exists.
    pub async fn direct_assign(
        &self,
        user_id: &str,
        task: &TaskCatalogEntry,
    ) -> Result<bool, StorageError> {
        let now = Utc::now();
        let assignment = TaskAssignment {
            task_id: task.id.clone(),
            assigned_by: AssignedBy::Admin,
            status: AssignmentStatus::Active,
            sequence: 1,
            expected_completion_date: Some((now + Duration::days(3)).date_naive()),
            completion_date: None,
            comments: vec![AssignmentComment {
                comment: "Assigned by your learning buddy".to_string(),
                comment_by: "admin".to_string(),
                created_at: now,
            }],
        };
        let inserted = self.store.append_assignment(user_id, &assignment).await?;
        if inserted {
            info!(user_id, task_id = %task.id, title = %task.title, "task assigned");
        } else {
            debug!(user_id, task_id = %task.id, "task already assigned; skipping");
        }
        Ok(inserted)
    }

    async fn exclusion_set(&self, user_id: &str) -> Result<ExclusionSet, StorageError> {
        let assignments = self.store.assignments_for_user(user_id).await?;
        let mut ids = HashSet::new();
        let mut titles = HashSet::new();
        for assignment in assignments {
            if let Some(task) = self.store.task(&assignment.task_id).await? {
                titles.insert(task.title);
            }
            ids.insert(assignment.task_id);
        }
        Ok(ExclusionSet { ids, titles })
    }
}

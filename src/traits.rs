use async_trait::async_trait;

use crate::error::StorageError;
use crate::oracle::OracleError;
use crate::types::{
    AssignedProject, AssignmentStatus, ChatTurn, EngagementState, Project, QuickReplyButton,
    TaskAssignment, TaskCatalogEntry,
};

pub type StoreResult<T> = Result<T, StorageError>;

/// The NLU/completion oracle: one stateless text-completion operation.
///
/// Trusted for fluency, never for factual task ids: everything it returns
/// goes through parsing with typed fallbacks, and task proposals go through
/// the validator.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError>;
}

/// Outbound message delivery. Fire-and-forget: delivery failures are logged
/// by the caller and never retried here.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    async fn send_text(
        &self,
        user_id: &str,
        text: &str,
        buttons: &[QuickReplyButton],
    ) -> anyhow::Result<()>;
}

/// Append-only per-user transcript.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn append_turn(&self, turn: &ChatTurn) -> StoreResult<()>;

    /// The most recent `limit` turns, returned in chronological order.
    async fn recent_turns(&self, user_id: &str, limit: usize) -> StoreResult<Vec<ChatTurn>>;
}

/// Engagement state persistence. One row per user, whole-row writes only.
#[async_trait]
pub trait EngagementStore: Send + Sync {
    async fn load_engagement(&self, user_id: &str) -> StoreResult<Option<EngagementState>>;

    async fn save_engagement(&self, state: &EngagementState) -> StoreResult<()>;

    /// All user ids with an engagement row, for the proactive sweep.
    async fn engaged_user_ids(&self) -> StoreResult<Vec<String>>;
}

/// Task assignments: the (user, task) pairings this daemon creates.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn assignments_for_user(&self, user_id: &str) -> StoreResult<Vec<TaskAssignment>>;

    /// Insert an assignment. Returns false when the (user, task) pair already
    /// exists. The pair is unique, so a concurrent duplicate is a no-op.
    async fn append_assignment(
        &self,
        user_id: &str,
        assignment: &TaskAssignment,
    ) -> StoreResult<bool>;

    /// Apply a status transition. Returns false when the transition would
    /// regress (e.g. completed back to active) or the assignment is missing.
    async fn update_assignment_status(
        &self,
        user_id: &str,
        task_id: &str,
        status: AssignmentStatus,
    ) -> StoreResult<bool>;
}

/// Read-only queries over the task/project catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Projects explicitly assigned to the user, ascending sequence order.
    async fn assigned_projects(&self, user_id: &str) -> StoreResult<Vec<AssignedProject>>;

    async fn tasks_for_project(&self, project_id: &str) -> StoreResult<Vec<TaskCatalogEntry>>;

    async fn project(&self, project_id: &str) -> StoreResult<Option<Project>>;

    async fn task(&self, task_id: &str) -> StoreResult<Option<TaskCatalogEntry>>;

    /// Projects whose name or description contains `keyword`
    /// (case-insensitive substring).
    async fn projects_matching_keyword(&self, keyword: &str) -> StoreResult<Vec<Project>>;

    async fn all_tasks(&self) -> StoreResult<Vec<TaskCatalogEntry>>;

    /// Tasks whose category matches any of the given categories. Used for
    /// preference-driven task distribution.
    async fn tasks_in_categories(
        &self,
        categories: &[String],
    ) -> StoreResult<Vec<TaskCatalogEntry>>;
}

/// The user's preferred skills/topics, set outside this daemon.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn preferences(&self, user_id: &str) -> StoreResult<Vec<String>>;
}

/// Facade over the per-concern store traits, used for trait objects.
pub trait StateStore:
    SessionStore + EngagementStore + AssignmentStore + CatalogStore + PreferenceStore
{
}

impl<T> StateStore for T where
    T: SessionStore + EngagementStore + AssignmentStore + CatalogStore + PreferenceStore
{
}

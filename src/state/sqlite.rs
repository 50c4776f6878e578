use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::error::StorageError;
use crate::traits::{
    AssignmentStore, CatalogStore, EngagementStore, PreferenceStore, SessionStore, StoreResult,
};
use crate::types::{
    AssignedBy, AssignedProject, AssignmentStatus, BuddyStatus, ChatTurn, EngagementState,
    OnboardingPhase, Project, SpeakerRole, TaskAssignment, TaskCatalogEntry,
};

/// Set restrictive file permissions (0600) on the database and WAL files.
fn set_db_file_permissions(db_path: &str) {
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::Permissions::from_mode(0o600);
    if let Err(e) = std::fs::set_permissions(db_path, mode.clone()) {
        warn!("Failed to set permissions on {}: {}", db_path, e);
    }
    for suffix in &["-wal", "-shm"] {
        let path = format!("{}{}", db_path, suffix);
        if std::path::Path::new(&path).exists() {
            if let Err(e) = std::fs::set_permissions(&path, mode.clone()) {
                warn!("Failed to set permissions on {}: {}", path, e);
            }
        }
    }
}

pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub async fn new(db_path: &str) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        set_db_file_permissions(db_path);

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// An isolated in-memory store. The pool is pinned to one connection so
    /// the database survives between queries.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chats_user ON chats(user_id)")
            .execute(pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS engagement (
                user_id TEXT PRIMARY KEY,
                onboarding_phase TEXT NOT NULL,
                buddy_status TEXT NOT NULL,
                next_contact_at TEXT,
                assistant_name TEXT,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS assignments (
                user_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                assigned_by TEXT NOT NULL,
                status TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                expected_completion_date TEXT,
                completion_date TEXT,
                comments_json TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_id, task_id)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT ''
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                skill_type TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL DEFAULT ''
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id)")
            .execute(pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS assigned_projects (
                user_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                PRIMARY KEY (user_id, project_id)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS preferences (
                user_id TEXT NOT NULL,
                skill TEXT NOT NULL,
                PRIMARY KEY (user_id, skill)
            )",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    // Seed helpers for tests and local bootstrapping. The catalog is owned by
    // an external system in production; these writes mirror its shape.

    pub async fn insert_project(&self, project: &Project) -> StoreResult<()> {
        sqlx::query("INSERT OR REPLACE INTO projects (id, name, description) VALUES (?1, ?2, ?3)")
            .bind(&project.id)
            .bind(&project.name)
            .bind(&project.description)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_task(&self, task: &TaskCatalogEntry) -> StoreResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO tasks
             (id, project_id, title, description, skill_type, category)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&task.id)
        .bind(&task.project_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.skill_type)
        .bind(&task.category)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn assign_project_to_user(
        &self,
        user_id: &str,
        project_id: &str,
        sequence: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO assigned_projects (user_id, project_id, sequence)
             VALUES (?1, ?2, ?3)",
        )
        .bind(user_id)
        .bind(project_id)
        .bind(sequence)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_preferences(&self, user_id: &str, skills: &[&str]) -> StoreResult<()> {
        sqlx::query("DELETE FROM preferences WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        for skill in skills {
            sqlx::query("INSERT INTO preferences (user_id, skill) VALUES (?1, ?2)")
                .bind(user_id)
                .bind(skill)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}

fn parse_ts(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::new(format!("bad timestamp {raw:?}: {e}")))
}

fn parse_date(raw: &str) -> StoreResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| StorageError::new(format!("bad date {raw:?}: {e}")))
}

fn parse_enum<T>(raw: &str, parse: impl Fn(&str) -> Option<T>, what: &str) -> StoreResult<T> {
    parse(raw).ok_or_else(|| StorageError::new(format!("unknown {what} value {raw:?}")))
}

fn turn_from_row(row: &SqliteRow) -> StoreResult<ChatTurn> {
    Ok(ChatTurn {
        id: row.get("id"),
        user_id: row.get("user_id"),
        role: parse_enum(row.get::<&str, _>("role"), SpeakerRole::parse, "role")?,
        text: row.get("text"),
        created_at: parse_ts(row.get("created_at"))?,
    })
}

fn engagement_from_row(row: &SqliteRow) -> StoreResult<EngagementState> {
    let next_contact_at = row
        .get::<Option<String>, _>("next_contact_at")
        .map(|raw| parse_ts(&raw))
        .transpose()?;
    Ok(EngagementState {
        user_id: row.get("user_id"),
        onboarding_phase: parse_enum(
            row.get::<&str, _>("onboarding_phase"),
            OnboardingPhase::parse,
            "onboarding phase",
        )?,
        buddy_status: parse_enum(
            row.get::<&str, _>("buddy_status"),
            BuddyStatus::parse,
            "buddy status",
        )?,
        next_contact_at,
        assistant_name: row.get("assistant_name"),
        updated_at: parse_ts(row.get("updated_at"))?,
    })
}

fn assignment_from_row(row: &SqliteRow) -> StoreResult<TaskAssignment> {
    let expected = row
        .get::<Option<String>, _>("expected_completion_date")
        .map(|raw| parse_date(&raw))
        .transpose()?;
    let completed = row
        .get::<Option<String>, _>("completion_date")
        .map(|raw| parse_date(&raw))
        .transpose()?;
    Ok(TaskAssignment {
        task_id: row.get("task_id"),
        assigned_by: parse_enum(
            row.get::<&str, _>("assigned_by"),
            AssignedBy::parse,
            "assigned_by",
        )?,
        status: parse_enum(row.get::<&str, _>("status"), AssignmentStatus::parse, "status")?,
        sequence: row.get("sequence"),
        expected_completion_date: expected,
        completion_date: completed,
        comments: serde_json::from_str(row.get::<&str, _>("comments_json"))?,
    })
}

fn task_from_row(row: &SqliteRow) -> TaskCatalogEntry {
    TaskCatalogEntry {
        id: row.get("id"),
        project_id: row.get("project_id"),
        title: row.get("title"),
        description: row.get("description"),
        skill_type: row.get("skill_type"),
        category: row.get("category"),
    }
}

#[async_trait]
impl SessionStore for SqliteStateStore {
    async fn append_turn(&self, turn: &ChatTurn) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO chats (id, user_id, role, text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&turn.id)
        .bind(&turn.user_id)
        .bind(turn.role.as_str())
        .bind(&turn.text)
        .bind(turn.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_turns(&self, user_id: &str, limit: usize) -> StoreResult<Vec<ChatTurn>> {
        let rows = sqlx::query(
            "SELECT id, user_id, role, text, created_at FROM chats
             WHERE user_id = ?1 ORDER BY rowid DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut turns = rows
            .iter()
            .map(turn_from_row)
            .collect::<StoreResult<Vec<_>>>()?;
        turns.reverse();
        Ok(turns)
    }
}

#[async_trait]
impl EngagementStore for SqliteStateStore {
    async fn load_engagement(&self, user_id: &str) -> StoreResult<Option<EngagementState>> {
        let row = sqlx::query(
            "SELECT user_id, onboarding_phase, buddy_status, next_contact_at,
                    assistant_name, updated_at
             FROM engagement WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(engagement_from_row).transpose()
    }

    async fn save_engagement(&self, state: &EngagementState) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO engagement
             (user_id, onboarding_phase, buddy_status, next_contact_at, assistant_name, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                onboarding_phase = excluded.onboarding_phase,
                buddy_status = excluded.buddy_status,
                next_contact_at = excluded.next_contact_at,
                assistant_name = excluded.assistant_name,
                updated_at = excluded.updated_at",
        )
        .bind(&state.user_id)
        .bind(state.onboarding_phase.as_str())
        .bind(state.buddy_status.as_str())
        .bind(state.next_contact_at.map(|dt| dt.to_rfc3339()))
        .bind(&state.assistant_name)
        .bind(state.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn engaged_user_ids(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT user_id FROM engagement ORDER BY user_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("user_id")).collect())
    }
}

#[async_trait]
impl AssignmentStore for SqliteStateStore {
    async fn assignments_for_user(&self, user_id: &str) -> StoreResult<Vec<TaskAssignment>> {
        let rows = sqlx::query(
            "SELECT task_id, assigned_by, status, sequence, expected_completion_date,
                    completion_date, comments_json
             FROM assignments WHERE user_id = ?1 ORDER BY sequence, rowid",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(assignment_from_row).collect()
    }

    async fn append_assignment(
        &self,
        user_id: &str,
        assignment: &TaskAssignment,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO assignments
             (user_id, task_id, assigned_by, status, sequence, expected_completion_date,
              completion_date, comments_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(user_id, task_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(&assignment.task_id)
        .bind(assignment.assigned_by.as_str())
        .bind(assignment.status.as_str())
        .bind(assignment.sequence)
        .bind(
            assignment
                .expected_completion_date
                .map(|d| d.format("%Y-%m-%d").to_string()),
        )
        .bind(
            assignment
                .completion_date
                .map(|d| d.format("%Y-%m-%d").to_string()),
        )
        .bind(serde_json::to_string(&assignment.comments)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_assignment_status(
        &self,
        user_id: &str,
        task_id: &str,
        status: AssignmentStatus,
    ) -> StoreResult<bool> {
        let row = sqlx::query("SELECT status FROM assignments WHERE user_id = ?1 AND task_id = ?2")
            .bind(user_id)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(false);
        };
        let current = parse_enum(row.get::<&str, _>("status"), AssignmentStatus::parse, "status")?;
        if !current.can_transition_to(status) {
            warn!(
                user_id,
                task_id,
                from = current.as_str(),
                to = status.as_str(),
                "rejecting status regression"
            );
            return Ok(false);
        }
        let completion_date = if status == AssignmentStatus::Completed {
            Some(Utc::now().date_naive().format("%Y-%m-%d").to_string())
        } else {
            None
        };
        sqlx::query(
            "UPDATE assignments SET status = ?3,
                completion_date = COALESCE(?4, completion_date)
             WHERE user_id = ?1 AND task_id = ?2",
        )
        .bind(user_id)
        .bind(task_id)
        .bind(status.as_str())
        .bind(completion_date)
        .execute(&self.pool)
        .await?;
        Ok(true)
    }
}

#[async_trait]
impl CatalogStore for SqliteStateStore {
    async fn assigned_projects(&self, user_id: &str) -> StoreResult<Vec<AssignedProject>> {
        let rows = sqlx::query(
            "SELECT project_id, sequence FROM assigned_projects
             WHERE user_id = ?1 ORDER BY sequence, project_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| AssignedProject {
                project_id: r.get("project_id"),
                sequence: r.get("sequence"),
            })
            .collect())
    }

    async fn tasks_for_project(&self, project_id: &str) -> StoreResult<Vec<TaskCatalogEntry>> {
        let rows = sqlx::query(
            "SELECT id, project_id, title, description, skill_type, category
             FROM tasks WHERE project_id = ?1",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(task_from_row).collect())
    }

    async fn project(&self, project_id: &str) -> StoreResult<Option<Project>> {
        let row = sqlx::query("SELECT id, name, description FROM projects WHERE id = ?1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Project {
            id: r.get("id"),
            name: r.get("name"),
            description: r.get("description"),
        }))
    }

    async fn task(&self, task_id: &str) -> StoreResult<Option<TaskCatalogEntry>> {
        let row = sqlx::query(
            "SELECT id, project_id, title, description, skill_type, category
             FROM tasks WHERE id = ?1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(task_from_row))
    }

    async fn projects_matching_keyword(&self, keyword: &str) -> StoreResult<Vec<Project>> {
        let needle = keyword.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT id, name, description FROM projects
             WHERE instr(lower(name), ?1) > 0 OR instr(lower(description), ?1) > 0
             ORDER BY name",
        )
        .bind(&needle)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| Project {
                id: r.get("id"),
                name: r.get("name"),
                description: r.get("description"),
            })
            .collect())
    }

    async fn all_tasks(&self) -> StoreResult<Vec<TaskCatalogEntry>> {
        let rows = sqlx::query(
            "SELECT id, project_id, title, description, skill_type, category FROM tasks",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(task_from_row).collect())
    }

    async fn tasks_in_categories(
        &self,
        categories: &[String],
    ) -> StoreResult<Vec<TaskCatalogEntry>> {
        let wanted: Vec<String> = categories.iter().map(|c| c.to_lowercase()).collect();
        let tasks = self.all_tasks().await?;
        Ok(tasks
            .into_iter()
            .filter(|t| wanted.iter().any(|c| t.category.to_lowercase() == *c))
            .collect())
    }
}

#[async_trait]
impl PreferenceStore for SqliteStateStore {
    async fn preferences(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT skill FROM preferences WHERE user_id = ?1 ORDER BY rowid",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("skill")).collect())
    }
}

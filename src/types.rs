use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Where a user is in the onboarding funnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingPhase {
    New,
    AwaitingName,
    AwaitingProfile,
    Conversing,
}

impl OnboardingPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnboardingPhase::New => "new",
            OnboardingPhase::AwaitingName => "awaiting_name",
            OnboardingPhase::AwaitingProfile => "awaiting_profile",
            OnboardingPhase::Conversing => "conversing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(OnboardingPhase::New),
            "awaiting_name" => Some(OnboardingPhase::AwaitingName),
            "awaiting_profile" => Some(OnboardingPhase::AwaitingProfile),
            "conversing" => Some(OnboardingPhase::Conversing),
            _ => None,
        }
    }
}

/// The user's current willingness to be proactively messaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuddyStatus {
    Active,
    Busy,
    Postponed,
}

impl BuddyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuddyStatus::Active => "active",
            BuddyStatus::Busy => "busy",
            BuddyStatus::Postponed => "postponed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(BuddyStatus::Active),
            "busy" => Some(BuddyStatus::Busy),
            "postponed" => Some(BuddyStatus::Postponed),
            _ => None,
        }
    }
}

/// Per-user engagement record: onboarding phase, buddy availability,
/// and the user-chosen assistant display name.
///
/// Invariant: `next_contact_at` is set iff `buddy_status == Postponed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementState {
    pub user_id: String,
    pub onboarding_phase: OnboardingPhase,
    pub buddy_status: BuddyStatus,
    pub next_contact_at: Option<DateTime<Utc>>,
    pub assistant_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl EngagementState {
    /// Default state for a user we have never seen before.
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            onboarding_phase: OnboardingPhase::New,
            buddy_status: BuddyStatus::Active,
            next_contact_at: None,
            assistant_name: None,
            updated_at: Utc::now(),
        }
    }

    /// The postponed-iff-dated invariant. Checked before every save.
    pub fn invariant_holds(&self) -> bool {
        (self.buddy_status == BuddyStatus::Postponed) == self.next_contact_at.is_some()
    }
}

/// Who authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerRole {
    User,
    Assistant,
}

impl SpeakerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeakerRole::User => "user",
            SpeakerRole::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(SpeakerRole::User),
            "assistant" => Some(SpeakerRole::Assistant),
            _ => None,
        }
    }
}

/// One entry in a user's append-only transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: String,
    pub user_id: String,
    pub role: SpeakerRole,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn new(user_id: &str, role: SpeakerRole, text: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            role,
            text: text.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Who created a task assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignedBy {
    User,
    Admin,
}

impl AssignedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignedBy::User => "user",
            AssignedBy::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(AssignedBy::User),
            "admin" => Some(AssignedBy::Admin),
            _ => None,
        }
    }
}

/// Lifecycle of an assignment. Transitions only move forward; a completed
/// assignment never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    Active,
    Completed,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::Active => "active",
            AssignmentStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AssignmentStatus::Pending),
            "active" => Some(AssignmentStatus::Active),
            "completed" => Some(AssignmentStatus::Completed),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            AssignmentStatus::Pending => 0,
            AssignmentStatus::Active => 1,
            AssignmentStatus::Completed => 2,
        }
    }

    /// Whether moving from `self` to `next` is a legal (monotonic) transition.
    pub fn can_transition_to(&self, next: AssignmentStatus) -> bool {
        next.rank() >= self.rank()
    }
}

/// A dated note attached to an assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentComment {
    pub comment: String,
    pub comment_by: String,
    pub created_at: DateTime<Utc>,
}

/// One (user, task) pairing. At most one exists per pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: String,
    pub assigned_by: AssignedBy,
    pub status: AssignmentStatus,
    pub sequence: i64,
    pub expected_completion_date: Option<NaiveDate>,
    pub completion_date: Option<NaiveDate>,
    pub comments: Vec<AssignmentComment>,
}

/// A task record from the catalog. Read-only from this daemon's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCatalogEntry {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub skill_type: String,
    pub category: String,
}

/// A project record from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Link between a user and a project they were assigned, with ordering.
#[derive(Debug, Clone)]
pub struct AssignedProject {
    pub project_id: String,
    pub sequence: i64,
}

/// A (claimed id, claimed title) pair proposed by the oracle. Ephemeral:
/// consumed by the validator within one turn, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationCandidate {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
}

/// A validated candidate enriched with its owning project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTask {
    pub task_id: String,
    pub task_name: String,
    pub project_id: String,
    pub project_name: String,
}

/// Counts from one validator run, retained for observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub proposed: usize,
    pub accepted: usize,
    pub hallucinated: usize,
    pub duplicates: usize,
    pub final_count: usize,
}

/// An inline quick-reply button attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickReplyButton {
    pub name: String,
    pub callback: String,
}

impl QuickReplyButton {
    pub fn new(name: &str, callback: &str) -> Self {
        Self {
            name: name.to_string(),
            callback: callback.to_string(),
        }
    }
}

/// The structured result of one conversational turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub message: String,
    pub buttons: Vec<QuickReplyButton>,
    /// Tasks attached for UI refresh (task-assignment turns and
    /// confirm-style buddy responses).
    pub tasks: Vec<EnrichedTask>,
}

impl TurnResponse {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            buttons: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn with_buttons(message: impl Into<String>, buttons: Vec<QuickReplyButton>) -> Self {
        Self {
            message: message.into(),
            buttons,
            tasks: Vec::new(),
        }
    }
}

/// Classified user intent for a general-phase message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    TaskAssignment,
    BuddyResponse,
    GeneralConversation,
}

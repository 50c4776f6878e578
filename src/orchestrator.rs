//! Conversation orchestrator.
//!
//! One entry point per inbound message ([`Orchestrator::handle_turn`]) and
//! one per proactive sweep ([`Orchestrator::proactive_check`]). Every turn
//! runs the same spine: load engagement state, resolve lazy postpone expiry,
//! branch on onboarding phase, and persist whatever the assistant said. The
//! oracle is consulted for classification and prose, but anything it claims
//! about tasks goes through the validator before a user sees it.
//!
//! Both entry points serialize per user through a keyed lock, so an inbound
//! turn and a sweep check can never interleave their engagement-state writes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, NaiveTime, Utc};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::engagement::EngagementTracker;
use crate::error::StorageError;
use crate::oracle::parse::{
    extract_control_tags, parse_agent_step, parse_candidates, parse_intent, parse_name_check,
    AgentStep, ScenarioCommand,
};
use crate::prompts;
use crate::quick_replies;
use crate::relevance::RelevanceChecker;
use crate::resolver::TaskResolver;
use crate::traits::{Oracle, StateStore};
use crate::types::{
    AssignmentStatus, ChatTurn, EngagementState, EnrichedTask, Intent, OnboardingPhase,
    RecommendationCandidate, SpeakerRole, TurnResponse,
};
use crate::validator::{format_tasks_message, TaskValidator};

/// Upper bound on oracle round-trips inside one task-proposal loop.
const MAX_AGENT_STEPS: usize = 6;

/// Bare greetings that must never be mistaken for a name offering. Checked
/// before the oracle so "hi" costs nothing.
const GREETINGS: &[&str] = &[
    "hi",
    "hii",
    "hello",
    "hey",
    "heya",
    "hola",
    "yo",
    "good morning",
    "good afternoon",
    "good evening",
];

pub struct OrchestratorSettings {
    pub transcript_window: usize,
    pub postpone_default_days: i64,
    pub default_assistant_name: String,
}

pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    oracle: Arc<dyn Oracle>,
    engagement: EngagementTracker,
    resolver: TaskResolver,
    validator: TaskValidator,
    relevance: RelevanceChecker,
    settings: OrchestratorSettings,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn StateStore>,
        oracle: Arc<dyn Oracle>,
        relevance: RelevanceChecker,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            engagement: EngagementTracker::new(store.clone(), settings.postpone_default_days),
            resolver: TaskResolver::new(store.clone()),
            validator: TaskValidator::new(store.clone()),
            store,
            oracle,
            relevance,
            settings,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn turn_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Process one inbound message. Never fails outward: any internal error
    /// is logged and turned into a generic apology so the user always gets a
    /// reply. Holds the user's turn lock for the whole turn.
    pub async fn handle_turn(&self, user_id: &str, text: &str) -> TurnResponse {
        let lock = self.turn_lock(user_id).await;
        let _guard = lock.lock().await;
        match self.run_turn(user_id, text).await {
            Ok(response) => response,
            Err(e) => {
                error!(user_id, error = %e, "turn failed");
                TurnResponse::text(prompts::GENERIC_APOLOGY)
            }
        }
    }

    async fn run_turn(&self, user_id: &str, text: &str) -> anyhow::Result<TurnResponse> {
        let mut state = self.engagement.load(user_id).await?;

        // First contact: greet and ask for a name. The inbound text is not a
        // conversational turn yet, so only the assistant side is recorded.
        if state.onboarding_phase == OnboardingPhase::New {
            self.engagement
                .advance_phase(user_id, OnboardingPhase::AwaitingName)
                .await?;
            let response = TurnResponse::text(prompts::WELCOME);
            self.record_assistant(user_id, &response.message).await?;
            return Ok(response);
        }

        self.store
            .append_turn(&ChatTurn::new(user_id, SpeakerRole::User, text))
            .await?;
        self.engagement
            .resolve_current_status(&mut state, Utc::now())
            .await?;

        let response = if state.onboarding_phase == OnboardingPhase::AwaitingName {
            self.naming_turn(user_id, text).await?
        } else {
            self.general_turn(user_id, &state, text).await?
        };

        self.record_assistant(user_id, &response.message).await?;
        Ok(response)
    }

    /// Proactive nudge decision for one user, or None when the user should
    /// be left alone. The nudge is recorded on the transcript so the next
    /// turn has it as context. Takes the same turn lock as inbound messages:
    /// a sweep must not race a turn that is rewriting the postpone window.
    pub async fn proactive_check(&self, user_id: &str) -> anyhow::Result<Option<TurnResponse>> {
        let lock = self.turn_lock(user_id).await;
        let _guard = lock.lock().await;
        let mut state = self.engagement.load(user_id).await?;
        if matches!(
            state.onboarding_phase,
            OnboardingPhase::New | OnboardingPhase::AwaitingName
        ) {
            return Ok(None);
        }
        let status = self
            .engagement
            .resolve_current_status(&mut state, Utc::now())
            .await?;
        if status == crate::types::BuddyStatus::Postponed {
            debug!(user_id, "postponed; skipping nudge");
            return Ok(None);
        }

        let response = self.build_nudge(user_id, &state).await?;
        let Some(response) = response else {
            return Ok(None);
        };
        self.record_assistant(user_id, &response.message).await?;
        Ok(Some(response))
    }

    async fn build_nudge(
        &self,
        user_id: &str,
        state: &EngagementState,
    ) -> anyhow::Result<Option<TurnResponse>> {
        let active = self.active_tasks_enriched(user_id).await?;
        if !active.is_empty() {
            let titles: Vec<String> = active.iter().map(|t| t.task_name.clone()).collect();
            let mut response = TurnResponse::text(prompts::nudge_active_tasks(&titles));
            response.tasks = active;
            return Ok(Some(response));
        }

        let preferences = self.store.preferences(user_id).await?;
        let Some(skill) = preferences.first() else {
            let name = self.assistant_name(state);
            return Ok(Some(TurnResponse::text(prompts::nudge_no_preferences(&name))));
        };

        let mut resolved = self.resolver.resolve_next_task(user_id, skill).await?;
        if resolved.is_none() {
            // Skill search came up empty; fall back to category matching
            // across all stated preferences.
            resolved = self.first_unassigned_in_categories(user_id, &preferences).await?;
        }
        let Some(task) = resolved else {
            return Ok(Some(TurnResponse::text(prompts::NUDGE_NO_FRESH_TASK)));
        };
        let project = self.store.project(&task.project_id).await?;
        if let Some(project) = &project {
            if !self.relevance.is_task_relevant(project, &task).await {
                info!(user_id, task_id = %task.id, "resolved task judged irrelevant; skipping");
                return Ok(Some(TurnResponse::text(prompts::NUDGE_NO_FRESH_TASK)));
            }
        }
        self.resolver.direct_assign(user_id, &task).await?;
        let project_name = project.map(|p| p.name).unwrap_or_else(|| task.project_id.clone());
        Ok(Some(TurnResponse::text(prompts::nudge_new_task(
            &task.title,
            &project_name,
        ))))
    }

    async fn first_unassigned_in_categories(
        &self,
        user_id: &str,
        categories: &[String],
    ) -> Result<Option<crate::types::TaskCatalogEntry>, StorageError> {
        let assigned: std::collections::HashSet<String> = self
            .store
            .assignments_for_user(user_id)
            .await?
            .into_iter()
            .map(|a| a.task_id)
            .collect();
        let mut candidates: Vec<_> = self
            .store
            .tasks_in_categories(categories)
            .await?
            .into_iter()
            .filter(|t| !assigned.contains(&t.id))
            .collect();
        candidates.sort_by_key(|t| crate::resolver::natural_sort_key(&t.title));
        Ok(candidates.into_iter().next())
    }

    // Onboarding: the user is being asked to name the assistant.

    async fn naming_turn(&self, user_id: &str, text: &str) -> anyhow::Result<TurnResponse> {
        if is_bare_greeting(text) {
            return Ok(TurnResponse::text(prompts::NAME_REPROMPT));
        }

        let context = self.recent_context(user_id).await?;
        let reply = self
            .oracle
            .complete(&prompts::name_check(&context, text))
            .await?;
        let outcome = parse_name_check(&reply);
        if let Some(reason) = outcome.fallback_reason() {
            warn!(user_id, reason, "name check fell back");
        }
        let check = outcome.into_value();
        if !check.is_name {
            return Ok(TurnResponse::text(prompts::NAME_REPROMPT));
        }

        self.engagement.set_assistant_name(user_id, &check.name).await?;
        info!(user_id, name = %check.name, "assistant named");
        Ok(TurnResponse::with_buttons(
            prompts::personalized_greeting(check.name.trim()),
            quick_replies::onboarding_buttons(),
        ))
    }

    // Post-onboarding turns: quick replies, then intent dispatch.

    async fn general_turn(
        &self,
        user_id: &str,
        state: &EngagementState,
        text: &str,
    ) -> anyhow::Result<TurnResponse> {
        if let Some(canned) = quick_replies::resolve(text) {
            // A button tap is engagement; clear any busy flag.
            self.engagement.set_active(user_id).await?;
            return Ok(TurnResponse::text(canned));
        }

        let reply = self
            .oracle
            .complete(&prompts::intent_classification(text))
            .await?;
        let outcome = parse_intent(&reply);
        if let Some(reason) = outcome.fallback_reason() {
            warn!(user_id, reason, "intent classification fell back");
        }
        let intent = outcome.into_value();
        debug!(user_id, ?intent, "classified turn");

        match intent {
            Intent::TaskAssignment => self.task_assignment_turn(user_id, state).await,
            Intent::BuddyResponse => self.buddy_turn(user_id, state, text).await,
            Intent::GeneralConversation => self.conversation_turn(user_id, state, text).await,
        }
    }

    async fn task_assignment_turn(
        &self,
        user_id: &str,
        state: &EngagementState,
    ) -> anyhow::Result<TurnResponse> {
        let proposals = self.propose_tasks(user_id, state).await?;
        let (tasks, _summary) = self.validator.validate(user_id, proposals).await?;
        let mut response = TurnResponse::text(format_tasks_message(&tasks));
        response.tasks = tasks;
        Ok(response)
    }

    /// Closed-dispatch proposal loop. The oracle may only invoke the
    /// operations named in the prompt; anything else is answered with an
    /// error line it can recover from on the next step.
    async fn propose_tasks(
        &self,
        user_id: &str,
        state: &EngagementState,
    ) -> anyhow::Result<Vec<RecommendationCandidate>> {
        let name = self.assistant_name(state);
        let mut scratch = String::new();

        for step in 0..MAX_AGENT_STEPS {
            let prompt = prompts::task_proposal(&name, user_id, &scratch);
            let reply = self.oracle.complete(&prompt).await?;
            match parse_agent_step(&reply) {
                AgentStep::Call { name: op, args } => {
                    let result = self.dispatch_operation(user_id, &op, &args).await?;
                    debug!(user_id, step, op = %op, "dispatched proposal operation");
                    scratch.push_str(&format!("{op}: {result}\n"));
                }
                AgentStep::Final(candidates) => return Ok(candidates),
                AgentStep::Text(text) => {
                    let outcome = parse_candidates(&text);
                    if let Some(reason) = outcome.fallback_reason() {
                        warn!(user_id, step, reason, "proposal loop ended without candidates");
                    }
                    return Ok(outcome.into_value());
                }
            }
        }

        warn!(user_id, "proposal loop exhausted its step limit");
        Ok(Vec::new())
    }

    async fn dispatch_operation(
        &self,
        user_id: &str,
        op: &str,
        args: &Value,
    ) -> Result<String, StorageError> {
        match op {
            "get_user_goals" => {
                let prefs = self.store.preferences(user_id).await?;
                Ok(json!(prefs).to_string())
            }
            "get_assigned_projects" => {
                let mut out = Vec::new();
                for assigned in self.store.assigned_projects(user_id).await? {
                    let name = self
                        .store
                        .project(&assigned.project_id)
                        .await?
                        .map(|p| p.name)
                        .unwrap_or_default();
                    out.push(json!({
                        "project_id": assigned.project_id,
                        "name": name,
                        "sequence": assigned.sequence,
                    }));
                }
                Ok(json!(out).to_string())
            }
            "get_tasks_for_project" => {
                let Some(project_id) = args.get("project_id").and_then(Value::as_str) else {
                    return Ok("ERROR: get_tasks_for_project requires a project_id".to_string());
                };
                let tasks: Vec<Value> = self
                    .store
                    .tasks_for_project(project_id)
                    .await?
                    .into_iter()
                    .map(|t| json!({"id": t.id, "title": t.title}))
                    .collect();
                Ok(json!(tasks).to_string())
            }
            "get_chat_history" => {
                let limit = args
                    .get("limit")
                    .and_then(Value::as_u64)
                    .map(|l| l as usize)
                    .unwrap_or(self.settings.transcript_window);
                let turns = self.store.recent_turns(user_id, limit).await?;
                Ok(prompts::transcript_context(&turns))
            }
            unknown => Ok(format!(
                "ERROR: unknown operation {unknown:?}. Available: get_user_goals, \
                 get_assigned_projects, get_tasks_for_project, get_chat_history"
            )),
        }
    }

    async fn buddy_turn(
        &self,
        user_id: &str,
        state: &EngagementState,
        text: &str,
    ) -> anyhow::Result<TurnResponse> {
        let name = self.assistant_name(state);
        let active = self.active_tasks_enriched(user_id).await?;
        let reply = self
            .oracle
            .complete(&prompts::buddy_response(&name, text, active.len()))
            .await?;
        let parsed = extract_control_tags(&reply);

        let mut response = TurnResponse::text(if parsed.clean_text.is_empty() {
            prompts::ACKNOWLEDGMENT.to_string()
        } else {
            parsed.clean_text.clone()
        });

        for command in &parsed.commands {
            match command {
                ScenarioCommand::Busy => {
                    info!(user_id, "user is busy");
                    self.engagement.set_busy(user_id).await?;
                }
                ScenarioCommand::Postpone(spec) => {
                    let until = if let Some(date) = spec.date {
                        date.and_time(NaiveTime::MIN).and_utc()
                    } else if let Some(days) = spec.days {
                        Utc::now() + Duration::days(days)
                    } else {
                        Utc::now() + Duration::days(self.settings.postpone_default_days)
                    };
                    info!(user_id, %until, "postponing contact");
                    self.engagement.set_postponed(user_id, until).await?;
                }
                ScenarioCommand::Confirm => {
                    info!(user_id, "user confirmed; surfacing active tasks");
                    self.engagement.set_active(user_id).await?;
                    response.tasks = active.clone();
                }
            }
        }

        Ok(response)
    }

    async fn conversation_turn(
        &self,
        user_id: &str,
        state: &EngagementState,
        text: &str,
    ) -> anyhow::Result<TurnResponse> {
        let name = self.assistant_name(state);
        let context = self.recent_context(user_id).await?;
        let reply = self
            .oracle
            .complete(&prompts::general_conversation(&name, &context, text))
            .await?;
        let parsed = extract_control_tags(&reply);

        let buttons = parsed
            .suggestions
            .iter()
            .filter_map(|code| quick_replies::button_for_code(code))
            .collect();
        let message = if parsed.clean_text.is_empty() {
            prompts::ACKNOWLEDGMENT.to_string()
        } else {
            parsed.clean_text
        };

        // The first completed conversational exchange ends onboarding.
        if state.onboarding_phase == OnboardingPhase::AwaitingProfile {
            self.engagement
                .advance_phase(user_id, OnboardingPhase::Conversing)
                .await?;
        }

        Ok(TurnResponse::with_buttons(message, buttons))
    }

    // Shared helpers.

    fn assistant_name(&self, state: &EngagementState) -> String {
        state
            .assistant_name
            .clone()
            .unwrap_or_else(|| self.settings.default_assistant_name.clone())
    }

    async fn recent_context(&self, user_id: &str) -> Result<String, StorageError> {
        let turns = self
            .store
            .recent_turns(user_id, self.settings.transcript_window)
            .await?;
        Ok(prompts::transcript_context(&turns))
    }

    async fn active_tasks_enriched(
        &self,
        user_id: &str,
    ) -> Result<Vec<EnrichedTask>, StorageError> {
        let mut out = Vec::new();
        for assignment in self.store.assignments_for_user(user_id).await? {
            if assignment.status != AssignmentStatus::Active {
                continue;
            }
            let Some(task) = self.store.task(&assignment.task_id).await? else {
                warn!(user_id, task_id = %assignment.task_id, "assignment points at missing task");
                continue;
            };
            let project_name = self
                .store
                .project(&task.project_id)
                .await?
                .map(|p| p.name)
                .unwrap_or_else(|| task.project_id.clone());
            out.push(EnrichedTask {
                task_id: task.id,
                task_name: task.title,
                project_id: task.project_id,
                project_name,
            });
        }
        Ok(out)
    }

    async fn record_assistant(&self, user_id: &str, message: &str) -> Result<(), StorageError> {
        self.store
            .append_turn(&ChatTurn::new(user_id, SpeakerRole::Assistant, message))
            .await
    }
}

fn is_bare_greeting(text: &str) -> bool {
    let normalized = text
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation())
        .to_lowercase();
    GREETINGS.contains(&normalized.as_str())
}

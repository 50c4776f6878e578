//! End-to-end scenarios through the orchestrator, over an in-memory store
//! and a scripted oracle.

use chrono::{Duration, Utc};

use crate::prompts;
use crate::testing::{MockOracle, TestHarness};
use crate::traits::{AssignmentStore, EngagementStore, SessionStore};
use crate::types::{
    AssignedBy, AssignmentStatus, BuddyStatus, EngagementState, OnboardingPhase, TaskAssignment,
};

fn active_assignment(task_id: &str) -> TaskAssignment {
    TaskAssignment {
        task_id: task_id.to_string(),
        assigned_by: AssignedBy::Admin,
        status: AssignmentStatus::Active,
        sequence: 1,
        expected_completion_date: None,
        completion_date: None,
        comments: Vec::new(),
    }
}

#[tokio::test]
async fn first_contact_greets_without_the_oracle() {
    let h = TestHarness::new().await;
    let response = h.orchestrator.handle_turn("u1", "hey there").await;

    assert_eq!(response.message, prompts::WELCOME);
    assert_eq!(h.oracle.call_count(), 0);

    // Only the assistant's greeting lands on the transcript; the user's
    // pre-onboarding text does not.
    let turns = h.store.recent_turns("u1", 10).await.unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].text, prompts::WELCOME);

    let state = h.store.load_engagement("u1").await.unwrap().unwrap();
    assert_eq!(state.onboarding_phase, OnboardingPhase::AwaitingName);
}

#[tokio::test]
async fn bare_greeting_is_never_a_name() {
    let h = TestHarness::new().await;
    h.orchestrator.handle_turn("u1", "hello").await;

    let response = h.orchestrator.handle_turn("u1", "hi!").await;
    assert_eq!(response.message, prompts::NAME_REPROMPT);
    assert_eq!(h.oracle.call_count(), 0);
}

#[tokio::test]
async fn naming_extracts_and_greets_with_buttons() {
    let h = TestHarness::new().await;
    h.orchestrator.handle_turn("u1", "hello").await;

    h.oracle
        .push_reply(r#"{"is_name": true, "name": "Orion"}"#);
    let response = h.orchestrator.handle_turn("u1", "Call me Orion").await;

    assert!(response.message.contains("Orion at your service"));
    assert_eq!(response.buttons.len(), 3);

    let state = h.store.load_engagement("u1").await.unwrap().unwrap();
    assert_eq!(state.assistant_name.as_deref(), Some("Orion"));
    assert_eq!(state.onboarding_phase, OnboardingPhase::AwaitingProfile);
}

#[tokio::test]
async fn non_name_answer_reprompts() {
    let h = TestHarness::new().await;
    h.orchestrator.handle_turn("u1", "hello").await;

    h.oracle
        .push_reply(r#"{"is_name": false, "name": ""}"#);
    let response = h.orchestrator.handle_turn("u1", "what can you do?").await;
    assert_eq!(response.message, prompts::NAME_REPROMPT);
}

#[tokio::test]
async fn hallucinated_proposals_never_reach_the_user() {
    let h = TestHarness::new().await;
    h.seed_rust_track("u1").await;
    h.onboard("u1", "Nova").await;

    h.oracle.push_reply("task_assignment");
    h.oracle.push_reply(
        r#"[{"id": "a", "title": "Task 1: Ownership"}, {"id": "zzz", "title": "Quantum Basket Weaving"}]"#,
    );
    let response = h.orchestrator.handle_turn("u1", "what should I work on?").await;

    assert_eq!(response.tasks.len(), 1);
    assert_eq!(response.tasks[0].task_id, "a");
    assert!(response.message.contains("Task 1: Ownership"));
    assert!(!response.message.contains("Quantum"));
}

#[tokio::test]
async fn proposal_loop_dispatches_and_recovers_from_unknown_ops() {
    let h = TestHarness::new().await;
    h.seed_rust_track("u1").await;
    h.onboard("u1", "Nova").await;

    h.oracle.push_reply("task_assignment");
    h.oracle
        .push_reply(r#"{"call": "get_assigned_projects", "args": {"user_id": "u1"}}"#);
    h.oracle.push_reply(r#"{"call": "get_magic", "args": {}}"#);
    h.oracle
        .push_reply(r#"[{"id": "a", "title": "Task 1: Ownership"}]"#);
    let response = h.orchestrator.handle_turn("u1", "pick my next task").await;

    assert_eq!(response.tasks.len(), 1);
    let calls = h.oracle.calls();
    // The operation result and the unknown-op error both land in the scratch
    // fed back to the oracle.
    assert!(calls[calls.len() - 2].contains("Rust Track"));
    assert!(calls[calls.len() - 1].contains("ERROR: unknown operation"));
}

#[tokio::test]
async fn empty_plan_yields_the_not_ready_message() {
    let h = TestHarness::new().await;
    h.onboard("u1", "Nova").await;

    h.oracle.push_reply("task_assignment");
    h.oracle.push_reply("I have no tasks for you.");
    let response = h.orchestrator.handle_turn("u1", "any tasks?").await;
    assert_eq!(response.message, prompts::PLAN_NOT_READY);
    assert!(response.tasks.is_empty());
}

#[tokio::test]
async fn postpone_tag_schedules_and_suppresses_nudges() {
    let h = TestHarness::new().await;
    h.onboard("u1", "Nova").await;

    h.oracle.push_reply("buddy_response");
    h.oracle
        .push_reply("No problem, rest up! [SCENARIO:POSTPONE days=2]");
    let response = h.orchestrator.handle_turn("u1", "can we do this next week").await;
    assert_eq!(response.message, "No problem, rest up!");

    let state = h.store.load_engagement("u1").await.unwrap().unwrap();
    assert_eq!(state.buddy_status, BuddyStatus::Postponed);
    let until = state.next_contact_at.unwrap();
    assert!(until > Utc::now() + Duration::days(1));
    assert!(until <= Utc::now() + Duration::days(2));

    assert!(h.orchestrator.proactive_check("u1").await.unwrap().is_none());
}

#[tokio::test]
async fn busy_tag_does_not_suppress_nudges() {
    let h = TestHarness::new().await;
    h.onboard("u1", "Nova").await;

    h.oracle.push_reply("buddy_response");
    h.oracle.push_reply("Catch you later! [SCENARIO:BUSY]");
    h.orchestrator.handle_turn("u1", "busy right now").await;

    let state = h.store.load_engagement("u1").await.unwrap().unwrap();
    assert_eq!(state.buddy_status, BuddyStatus::Busy);

    // Busy only mutes the current exchange; the sweep still reaches out.
    let nudge = h.orchestrator.proactive_check("u1").await.unwrap().unwrap();
    assert!(nudge.message.contains("preferences"));
}

#[tokio::test]
async fn confirm_tag_reactivates_and_returns_tasks() {
    let h = TestHarness::new().await;
    h.seed_rust_track("u1").await;
    h.onboard("u1", "Nova").await;
    h.store
        .append_assignment("u1", &active_assignment("a"))
        .await
        .unwrap();

    h.oracle.push_reply("buddy_response");
    h.oracle.push_reply("Great, here's where you left off. [SCENARIO:CONFIRM]");
    let response = h.orchestrator.handle_turn("u1", "ok I'm ready").await;

    assert_eq!(response.tasks.len(), 1);
    assert_eq!(response.tasks[0].task_name, "Task 1: Ownership");
    let state = h.store.load_engagement("u1").await.unwrap().unwrap();
    assert_eq!(state.buddy_status, BuddyStatus::Active);
}

#[tokio::test]
async fn expired_postpone_resolves_lazily_on_the_sweep() {
    let h = TestHarness::new().await;
    let mut state = EngagementState::new("u1");
    state.onboarding_phase = OnboardingPhase::Conversing;
    state.buddy_status = BuddyStatus::Postponed;
    state.next_contact_at = Some(Utc::now() - Duration::hours(1));
    h.store.save_engagement(&state).await.unwrap();

    let nudge = h.orchestrator.proactive_check("u1").await.unwrap();
    assert!(nudge.is_some());

    let reloaded = h.store.load_engagement("u1").await.unwrap().unwrap();
    assert_eq!(reloaded.buddy_status, BuddyStatus::Active);
    assert!(reloaded.next_contact_at.is_none());
}

#[tokio::test]
async fn quick_reply_answers_without_oracle_and_reactivates() {
    let h = TestHarness::new().await;
    h.onboard("u1", "Nova").await;

    h.oracle.push_reply("buddy_response");
    h.oracle.push_reply("Ok! [SCENARIO:BUSY]");
    h.orchestrator.handle_turn("u1", "busy").await;
    let calls_before = h.oracle.call_count();

    let response = h.orchestrator.handle_turn("u1", "sfs").await;
    assert!(response.message.contains("Software Finishing School"));
    assert_eq!(h.oracle.call_count(), calls_before);

    let state = h.store.load_engagement("u1").await.unwrap().unwrap();
    assert_eq!(state.buddy_status, BuddyStatus::Active);
}

#[tokio::test]
async fn suggestion_tags_become_buttons_and_onboarding_completes() {
    let h = TestHarness::new().await;
    h.onboard("u1", "Nova").await;

    h.oracle.push_reply("general_conversation");
    h.oracle
        .push_reply("Job hunting? This might help. [SUGGEST:js]");
    let response = h.orchestrator.handle_turn("u1", "I want a new job").await;

    assert_eq!(response.message, "Job hunting? This might help.");
    assert_eq!(response.buttons.len(), 1);
    assert_eq!(response.buttons[0].callback, "js");

    let state = h.store.load_engagement("u1").await.unwrap().unwrap();
    assert_eq!(state.onboarding_phase, OnboardingPhase::Conversing);
}

#[tokio::test]
async fn oracle_outage_turns_into_an_apology() {
    let h = TestHarness::with_oracle(MockOracle::failing()).await;
    h.orchestrator.handle_turn("u1", "hello").await;

    let response = h.orchestrator.handle_turn("u1", "I dub thee Max").await;
    assert_eq!(response.message, prompts::GENERIC_APOLOGY);
}

#[tokio::test]
async fn sweep_reminds_about_active_tasks() {
    let h = TestHarness::new().await;
    h.seed_rust_track("u1").await;
    h.onboard("u1", "Nova").await;
    h.store
        .append_assignment("u1", &active_assignment("a"))
        .await
        .unwrap();

    let nudge = h.orchestrator.proactive_check("u1").await.unwrap().unwrap();
    assert!(nudge.message.starts_with("You have 1 task to complete:"));
    assert!(nudge.message.contains("Task 1: Ownership"));
    assert_eq!(nudge.tasks.len(), 1);
}

#[tokio::test]
async fn sweep_assigns_a_fresh_task_from_preferences() {
    let h = TestHarness::new().await;
    h.seed_rust_track("u1").await;
    h.onboard("u1", "Nova").await;
    h.store.set_preferences("u1", &["rust"]).await.unwrap();

    h.oracle.push_reply("yes");
    let nudge = h.orchestrator.proactive_check("u1").await.unwrap().unwrap();
    assert!(nudge.message.contains("Task 1: Ownership"));
    assert!(nudge.message.contains("Rust Track"));

    let assignments = h.store.assignments_for_user("u1").await.unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].task_id, "a");
    assert_eq!(assignments[0].status, AssignmentStatus::Active);
}

#[tokio::test]
async fn sweep_falls_back_to_category_preferences() {
    let h = TestHarness::new().await;
    h.onboard("u1", "Nova").await;
    h.store
        .insert_project(&crate::types::Project {
            id: "p9".into(),
            name: "Design Studio".into(),
            description: String::new(),
        })
        .await
        .unwrap();
    h.store
        .insert_task(&crate::types::TaskCatalogEntry {
            id: "f1".into(),
            project_id: "p9".into(),
            title: "Flexbox Drills".into(),
            description: String::new(),
            skill_type: "css".into(),
            category: "frontend".into(),
        })
        .await
        .unwrap();
    h.store
        .set_preferences("u1", &["web dev", "frontend"])
        .await
        .unwrap();

    // "web dev" matches no skill tag, category, or title, so the sweep falls
    // back to exact category matching across all preferences.
    let nudge = h.orchestrator.proactive_check("u1").await.unwrap().unwrap();
    assert!(nudge.message.contains("Flexbox Drills"));
    assert_eq!(
        h.store.assignments_for_user("u1").await.unwrap()[0].task_id,
        "f1"
    );
}

#[tokio::test]
async fn sweep_skips_users_still_onboarding() {
    let h = TestHarness::new().await;
    h.orchestrator.handle_turn("u1", "hello").await;
    assert!(h.orchestrator.proactive_check("u1").await.unwrap().is_none());
}

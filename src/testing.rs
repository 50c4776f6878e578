//! Test doubles: a scripted oracle, a capturing channel, and a harness that
//! wires an orchestrator over an in-memory store.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::oracle::OracleError;
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::relevance::{RelevanceCache, RelevanceChecker};
use crate::state::SqliteStateStore;
use crate::traits::{Channel, Oracle};
use crate::types::{Project, QuickReplyButton, TaskCatalogEntry};

/// Scripted oracle: replies are consumed FIFO, every prompt is logged.
pub struct MockOracle {
    script: Mutex<VecDeque<Result<String, OracleError>>>,
    call_log: Mutex<Vec<String>>,
    fail_all: bool,
}

impl MockOracle {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            call_log: Mutex::new(Vec::new()),
            fail_all: false,
        }
    }

    pub fn with_replies(replies: &[&str]) -> Self {
        let oracle = Self::new();
        for reply in replies {
            oracle.push_reply(reply);
        }
        oracle
    }

    /// An oracle whose every call fails with a retryable server error.
    pub fn failing() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            call_log: Mutex::new(Vec::new()),
            fail_all: true,
        }
    }

    pub fn push_reply(&self, reply: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(reply.to_string()));
    }

    pub fn push_error(&self, error: OracleError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.call_log.lock().unwrap().clone()
    }
}

impl Default for MockOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        self.call_log.lock().unwrap().push(prompt.to_string());
        if self.fail_all {
            return Err(OracleError::from_status(503, "scripted outage"));
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::malformed("mock oracle script exhausted")))
    }
}

/// Channel double that records every outbound message.
#[derive(Default)]
pub struct TestChannel {
    sent: Mutex<Vec<SentMessage>>,
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub user_id: String,
    pub text: String,
    pub buttons: Vec<QuickReplyButton>,
}

impl TestChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for TestChannel {
    fn name(&self) -> &str {
        "test"
    }

    async fn send_text(
        &self,
        user_id: &str,
        text: &str,
        buttons: &[QuickReplyButton],
    ) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(SentMessage {
            user_id: user_id.to_string(),
            text: text.to_string(),
            buttons: buttons.to_vec(),
        });
        Ok(())
    }
}

/// Orchestrator over an in-memory store and a scripted oracle.
pub struct TestHarness {
    pub store: Arc<SqliteStateStore>,
    pub oracle: Arc<MockOracle>,
    pub orchestrator: Arc<Orchestrator>,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_oracle(MockOracle::new()).await
    }

    pub async fn with_oracle(oracle: MockOracle) -> Self {
        let store = Arc::new(SqliteStateStore::in_memory().await.unwrap());
        let oracle = Arc::new(oracle);
        let relevance =
            RelevanceChecker::new(oracle.clone(), Arc::new(RelevanceCache::new()));
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            oracle.clone(),
            relevance,
            OrchestratorSettings {
                transcript_window: 20,
                postpone_default_days: 3,
                default_assistant_name: "Study Buddy".to_string(),
            },
        ));
        Self {
            store,
            oracle,
            orchestrator,
        }
    }

    /// One project ("Rust Track") with two tasks, assigned to `user_id`.
    pub async fn seed_rust_track(&self, user_id: &str) {
        self.store
            .insert_project(&Project {
                id: "p1".into(),
                name: "Rust Track".into(),
                description: "Core Rust curriculum".into(),
            })
            .await
            .unwrap();
        for (id, title) in [("a", "Task 1: Ownership"), ("b", "Task 2: Lifetimes")] {
            self.store
                .insert_task(&TaskCatalogEntry {
                    id: id.into(),
                    project_id: "p1".into(),
                    title: title.into(),
                    description: String::new(),
                    skill_type: "rust".into(),
                    category: "systems".into(),
                })
                .await
                .unwrap();
        }
        self.store
            .assign_project_to_user(user_id, "p1", 1)
            .await
            .unwrap();
    }

    /// Walk a fresh user through onboarding so tests can start in the
    /// conversational phase. Scripts the one name-check reply itself.
    pub async fn onboard(&self, user_id: &str, assistant_name: &str) {
        self.orchestrator.handle_turn(user_id, "hello?").await;
        self.oracle.push_reply(&format!(
            r#"{{"is_name": true, "name": "{assistant_name}"}}"#
        ));
        self.orchestrator
            .handle_turn(user_id, &format!("Call you {assistant_name}"))
            .await;
    }
}

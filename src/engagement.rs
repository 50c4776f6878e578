//! Engagement State Tracker.
//!
//! Owns each user's onboarding phase and buddy availability. There is no
//! background timer for postpone windows: expiry is resolved lazily by
//! [`EngagementTracker::resolve_current_status`], which must run before any
//! nudge decision, every turn.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::error::StorageError;
use crate::traits::StateStore;
use crate::types::{BuddyStatus, EngagementState, OnboardingPhase};

pub struct EngagementTracker {
    store: Arc<dyn StateStore>,
    postpone_default_days: i64,
}

/// Pure expiry step: flips an overdue postponed state back to active and
/// clears the contact date. Returns true when the state changed.
pub fn expire_if_due(state: &mut EngagementState, now: DateTime<Utc>) -> bool {
    if state.buddy_status != BuddyStatus::Postponed {
        return false;
    }
    match state.next_contact_at {
        Some(next_contact) if now > next_contact => {
            state.buddy_status = BuddyStatus::Active;
            state.next_contact_at = None;
            true
        }
        Some(_) => false,
        None => {
            // Should be unreachable given the save-side invariant check;
            // repair rather than propagate the inconsistency.
            state.buddy_status = BuddyStatus::Active;
            true
        }
    }
}

impl EngagementTracker {
    pub fn new(store: Arc<dyn StateStore>, postpone_default_days: i64) -> Self {
        Self {
            store,
            postpone_default_days,
        }
    }

    /// Fetch the user's state, lazily creating (and persisting) the default
    /// for first contact.
    pub async fn load(&self, user_id: &str) -> Result<EngagementState, StorageError> {
        if let Some(state) = self.store.load_engagement(user_id).await? {
            return Ok(state);
        }
        let state = EngagementState::new(user_id);
        self.save(&state).await?;
        Ok(state)
    }

    /// Lazy postpone expiry. Mutates and persists `state` when the window
    /// has passed; returns the effective status either way.
    pub async fn resolve_current_status(
        &self,
        state: &mut EngagementState,
        now: DateTime<Utc>,
    ) -> Result<BuddyStatus, StorageError> {
        if expire_if_due(state, now) {
            info!(user_id = %state.user_id, "postpone window expired; back to active");
            self.save(state).await?;
        }
        Ok(state.buddy_status)
    }

    pub async fn set_busy(&self, user_id: &str) -> Result<(), StorageError> {
        let mut state = self.load(user_id).await?;
        state.buddy_status = BuddyStatus::Busy;
        state.next_contact_at = None;
        self.save(&state).await
    }

    /// Postpone proactive contact until `next_contact_at`. The timestamp must
    /// be in the future; a non-future value falls back to the configured
    /// default window rather than leaving the state inconsistent.
    pub async fn set_postponed(
        &self,
        user_id: &str,
        next_contact_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let now = Utc::now();
        let until = if next_contact_at > now {
            next_contact_at
        } else {
            warn!(
                user_id,
                requested = %next_contact_at,
                "postpone date not in the future; using default window"
            );
            now + Duration::days(self.postpone_default_days)
        };
        let mut state = self.load(user_id).await?;
        state.buddy_status = BuddyStatus::Postponed;
        state.next_contact_at = Some(until);
        self.save(&state).await
    }

    /// Postpone by the default window ("3 days from now" unless configured
    /// otherwise). Used when no explicit date or day count could be parsed.
    pub async fn set_postponed_default(&self, user_id: &str) -> Result<(), StorageError> {
        self.set_postponed(user_id, Utc::now() + Duration::days(self.postpone_default_days))
            .await
    }

    pub async fn set_active(&self, user_id: &str) -> Result<(), StorageError> {
        let mut state = self.load(user_id).await?;
        state.buddy_status = BuddyStatus::Active;
        state.next_contact_at = None;
        self.save(&state).await
    }

    /// Idempotent rename. Only touches the onboarding phase when the user
    /// was still being asked for a name.
    pub async fn set_assistant_name(&self, user_id: &str, name: &str) -> Result<(), StorageError> {
        let mut state = self.load(user_id).await?;
        state.assistant_name = Some(name.trim().to_string());
        if state.onboarding_phase == OnboardingPhase::AwaitingName {
            state.onboarding_phase = OnboardingPhase::AwaitingProfile;
        }
        self.save(&state).await
    }

    pub async fn advance_phase(
        &self,
        user_id: &str,
        phase: OnboardingPhase,
    ) -> Result<(), StorageError> {
        let mut state = self.load(user_id).await?;
        state.onboarding_phase = phase;
        self.save(&state).await
    }

    /// Single-row write; refuses to persist an inconsistent state.
    pub async fn save(&self, state: &EngagementState) -> Result<(), StorageError> {
        if !state.invariant_holds() {
            return Err(StorageError::new(format!(
                "refusing to persist inconsistent engagement state for {}: {} with next_contact_at {:?}",
                state.user_id,
                state.buddy_status.as_str(),
                state.next_contact_at
            )));
        }
        let mut state = state.clone();
        state.updated_at = Utc::now();
        self.store.save_engagement(&state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SqliteStateStore;
    use chrono::Duration;

    async fn tracker() -> EngagementTracker {
        let store = Arc::new(SqliteStateStore::in_memory().await.unwrap());
        EngagementTracker::new(store, 3)
    }

    #[test]
    fn expiry_is_pure_and_exact() {
        let now = Utc::now();

        let mut overdue = EngagementState::new("u1");
        overdue.buddy_status = BuddyStatus::Postponed;
        overdue.next_contact_at = Some(now - Duration::seconds(1));
        assert!(expire_if_due(&mut overdue, now));
        assert_eq!(overdue.buddy_status, BuddyStatus::Active);
        assert!(overdue.next_contact_at.is_none());

        let mut pending = EngagementState::new("u2");
        pending.buddy_status = BuddyStatus::Postponed;
        pending.next_contact_at = Some(now + Duration::hours(1));
        assert!(!expire_if_due(&mut pending, now));
        assert_eq!(pending.buddy_status, BuddyStatus::Postponed);
        assert!(pending.next_contact_at.is_some());
    }

    #[tokio::test]
    async fn load_creates_default_state() {
        let tracker = tracker().await;
        let state = tracker.load("fresh").await.unwrap();
        assert_eq!(state.onboarding_phase, OnboardingPhase::New);
        assert_eq!(state.buddy_status, BuddyStatus::Active);
        assert!(state.next_contact_at.is_none());
    }

    #[tokio::test]
    async fn resolve_persists_expiry() {
        let tracker = tracker().await;
        tracker
            .set_postponed("u1", Utc::now() + Duration::seconds(5))
            .await
            .unwrap();

        let mut state = tracker.load("u1").await.unwrap();
        let status = tracker
            .resolve_current_status(&mut state, Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(status, BuddyStatus::Active);

        let reloaded = tracker.load("u1").await.unwrap();
        assert_eq!(reloaded.buddy_status, BuddyStatus::Active);
        assert!(reloaded.next_contact_at.is_none());
    }

    #[tokio::test]
    async fn non_future_postpone_falls_back_to_default() {
        let tracker = tracker().await;
        tracker
            .set_postponed("u1", Utc::now() - Duration::days(1))
            .await
            .unwrap();
        let state = tracker.load("u1").await.unwrap();
        assert_eq!(state.buddy_status, BuddyStatus::Postponed);
        let until = state.next_contact_at.unwrap();
        assert!(until > Utc::now() + Duration::days(2));
        assert!(until <= Utc::now() + Duration::days(3));
    }

    #[tokio::test]
    async fn rename_is_idempotent_and_advances_once() {
        let tracker = tracker().await;
        tracker
            .advance_phase("u1", OnboardingPhase::AwaitingName)
            .await
            .unwrap();

        tracker.set_assistant_name("u1", "Nova").await.unwrap();
        let first = tracker.load("u1").await.unwrap();
        assert_eq!(first.assistant_name.as_deref(), Some("Nova"));
        assert_eq!(first.onboarding_phase, OnboardingPhase::AwaitingProfile);

        tracker.set_assistant_name("u1", "Nova").await.unwrap();
        let second = tracker.load("u1").await.unwrap();
        assert_eq!(second.assistant_name, first.assistant_name);
        assert_eq!(second.onboarding_phase, first.onboarding_phase);
    }

    #[tokio::test]
    async fn rename_in_conversing_keeps_phase() {
        let tracker = tracker().await;
        tracker
            .advance_phase("u1", OnboardingPhase::Conversing)
            .await
            .unwrap();
        tracker.set_assistant_name("u1", "Orion").await.unwrap();
        let state = tracker.load("u1").await.unwrap();
        assert_eq!(state.onboarding_phase, OnboardingPhase::Conversing);
    }
}

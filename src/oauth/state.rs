//! CSRF state tokens for the authorization-code flow.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Authorization started by a subject and not yet completed.
#[derive(Clone, Debug)]
pub struct PendingAuthorization {
    pub subject_id: String,
    pub created_at: DateTime<Utc>,
}

/// Issued state tokens, single use, expiring after a fixed lifetime.
#[derive(Clone)]
pub struct CsrfStates {
    pending: Arc<DashMap<String, PendingAuthorization>>,
    lifetime: Duration,
}

impl CsrfStates {
    pub fn new(lifetime_seconds: i64) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            lifetime: Duration::seconds(lifetime_seconds),
        }
    }

    /// Issue a fresh state token (UUID v4) bound to `subject_id`.
    pub fn issue(&self, subject_id: &str) -> String {
        let state = Uuid::new_v4().to_string();
        self.pending.insert(
            state.clone(),
            PendingAuthorization {
                subject_id: subject_id.to_string(),
                created_at: Utc::now(),
            },
        );
        state
    }

    /// Consume `state`. Returns `None` for unknown, reused or expired tokens.
    pub fn consume(&self, state: &str) -> Option<PendingAuthorization> {
        let (_, pending) = self.pending.remove(state)?;
        if Utc::now() - pending.created_at > self.lifetime {
            return None;
        }
        Some(pending)
    }

    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        self.pending
            .retain(|_, pending| now - pending.created_at <= self.lifetime);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Background task that drops expired states every `interval_seconds`.
pub async fn run_state_cleanup(states: CsrfStates, interval_seconds: u64) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        states.cleanup_expired();
        tracing::debug!(remaining = states.len(), "OAuth state cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_consume() {
        let states = CsrfStates::new(600);
        let state = states.issue("user123");
        assert!(!state.is_empty());

        let pending = states.consume(&state).unwrap();
        assert_eq!(pending.subject_id, "user123");
    }

    #[test]
    fn test_state_is_single_use() {
        let states = CsrfStates::new(600);
        let state = states.issue("alice");

        assert!(states.consume(&state).is_some());
        assert!(states.consume(&state).is_none());
    }

    #[test]
    fn test_unknown_state_rejected() {
        let states = CsrfStates::new(600);
        assert!(states.consume("invalid_state").is_none());
    }

    #[test]
    fn test_expired_state_rejected_and_swept() {
        // Negative lifetime: everything is already expired
        let states = CsrfStates::new(-1);

        let state = states.issue("bob");
        states.issue("carol");
        assert_eq!(states.len(), 2);

        assert!(states.consume(&state).is_none());
        states.cleanup_expired();
        assert!(states.is_empty());
    }
}

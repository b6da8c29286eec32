//! Concurrent registry of live sessions.

use super::state::{Outcome, Session};
use crate::script::Script;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

/// Configuration for session lifetime.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Sessions idle for longer than this are dropped by [`SessionRegistry::sweep_idle`].
    /// `None` keeps sessions until they complete or are cancelled.
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(3600)),
        }
    }
}

/// How far a session has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Number of answers collected.
    pub answered: usize,
    /// Number of fields in the script.
    pub total: usize,
}

type Slot = Arc<Mutex<Session>>;

/// Owns every live session and drives the question script.
///
/// The map lock is only held to look up, insert or remove a slot. Each
/// session is mutated under its own mutex, so messages for one session
/// are applied one at a time while other sessions proceed in parallel.
/// A slot that leaves the map is marked retired under its lock, which
/// makes any caller still holding the slot see [`Outcome::NoActiveSession`].
pub struct SessionRegistry {
    script: Arc<Script>,
    config: SessionConfig,
    sessions: RwLock<HashMap<String, Slot>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("fields", &self.script.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Create a registry for the given script with default configuration.
    pub fn new(script: impl Into<Arc<Script>>) -> Self {
        Self::with_config(script, SessionConfig::default())
    }

    /// Create a registry with custom configuration.
    pub fn with_config(script: impl Into<Arc<Script>>, config: SessionConfig) -> Self {
        Self {
            script: script.into(),
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// The script every session follows.
    #[must_use]
    pub const fn script(&self) -> &Arc<Script> {
        &self.script
    }

    /// The registry configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a fresh session for `id` and return the first prompt.
    ///
    /// Any session already in progress for `id` is discarded.
    pub async fn begin(&self, id: &str) -> String {
        let slot = Arc::new(Mutex::new(Session::new()));
        let previous = self.sessions.write().await.insert(id.to_string(), slot);

        if let Some(previous) = previous {
            previous.lock().await.retire();
            debug!(session = %id, "discarded session in progress");
        }

        info!(session = %id, "session started");
        self.script.first_prompt().to_string()
    }

    /// Store an answer for the current field of `id`'s session.
    pub async fn submit_answer(&self, id: &str, text: &str) -> Outcome {
        let Some(slot) = self.slot(id).await else {
            debug!(session = %id, "answer without active session");
            return Outcome::NoActiveSession;
        };

        let mut session = slot.lock().await;
        if session.is_retired() {
            debug!(session = %id, "answer for closed session");
            return Outcome::NoActiveSession;
        }

        let outcome = session.record(&self.script, text);
        if matches!(outcome, Outcome::ReadyToGenerate(_)) {
            self.remove_if_current(id, &slot).await;
            info!(session = %id, answers = session.cursor(), "all answers collected");
        } else {
            debug!(session = %id, cursor = session.cursor(), "answer recorded");
        }

        outcome
    }

    /// Cancel `id`'s session.
    pub async fn cancel(&self, id: &str) -> Outcome {
        let removed = self.sessions.write().await.remove(id);
        let Some(slot) = removed else {
            return Outcome::NoActiveSession;
        };

        let mut session = slot.lock().await;
        if session.is_retired() {
            return Outcome::NoActiveSession;
        }
        session.retire();

        info!(session = %id, answered = session.cursor(), "session cancelled");
        Outcome::Cancelled
    }

    /// Progress of `id`'s session, if one is active.
    pub async fn progress(&self, id: &str) -> Option<Progress> {
        let slot = self.slot(id).await?;
        let session = slot.lock().await;
        if session.is_retired() {
            return None;
        }
        Some(Progress {
            answered: session.cursor(),
            total: self.script.len(),
        })
    }

    /// Number of sessions in progress.
    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop sessions that have been idle longer than the configured timeout.
    ///
    /// Sessions whose lock is currently held are busy and are skipped.
    /// Returns the number of sessions removed.
    pub async fn sweep_idle(&self) -> usize {
        let Some(timeout) = self.config.idle_timeout else {
            return 0;
        };

        let now = Instant::now();
        let mut expired = Vec::new();
        self.sessions
            .write()
            .await
            .retain(|id, slot| match slot.try_lock() {
                Ok(mut session) if session.idle_for(now) >= timeout => {
                    session.retire();
                    expired.push(id.clone());
                    false
                }
                _ => true,
            });

        for id in &expired {
            info!(session = %id, "session expired after inactivity");
        }
        expired.len()
    }

    async fn slot(&self, id: &str) -> Option<Slot> {
        self.sessions.read().await.get(id).cloned()
    }

    async fn remove_if_current(&self, id: &str, slot: &Slot) {
        let mut sessions = self.sessions.write().await;
        if sessions
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            sessions.remove(id);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::script::Field;
    use crate::session::state::Answers;

    fn two_field_registry() -> SessionRegistry {
        let script = Script::new(vec![
            Field::new("name", "Enter name:"),
            Field::new("city", "Enter city:"),
        ])
        .unwrap();
        SessionRegistry::new(script)
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let registry = two_field_registry();

        assert_eq!(registry.begin("u1").await, "Enter name:");
        assert_eq!(
            registry.submit_answer("u1", "Alice").await,
            Outcome::NextPrompt("Enter city:".to_string())
        );

        let expected: Answers = [("name", "Alice"), ("city", "Paris")].into_iter().collect();
        assert_eq!(
            registry.submit_answer("u1", " Paris ").await,
            Outcome::ReadyToGenerate(expected)
        );

        // Completed sessions leave the registry.
        assert_eq!(registry.active_count().await, 0);
        assert!(registry.submit_answer("u1", "again").await.is_no_active_session());
    }

    #[tokio::test]
    async fn test_outcome_sequence_for_long_script() {
        let fields = (0..6)
            .map(|i| Field::new(format!("k{i}"), format!("Question {i}?")))
            .collect();
        let registry = SessionRegistry::new(Script::new(fields).unwrap());

        registry.begin("s").await;
        for i in 0..5 {
            let outcome = registry.submit_answer("s", &format!(" answer {i} ")).await;
            assert_eq!(outcome, Outcome::NextPrompt(format!("Question {}?", i + 1)));
        }

        let Outcome::ReadyToGenerate(answers) = registry.submit_answer("s", "last").await else {
            panic!("expected ReadyToGenerate");
        };
        let keys: Vec<_> = answers.keys().collect();
        assert_eq!(keys, ["k0", "k1", "k2", "k3", "k4", "k5"]);
        assert_eq!(answers.get("k2"), Some("answer 2"));
        assert_eq!(answers.get("k5"), Some("last"));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let registry = two_field_registry();
        assert_eq!(registry.submit_answer("ghost", "hi").await, Outcome::NoActiveSession);
        assert_eq!(registry.cancel("ghost").await, Outcome::NoActiveSession);
        assert!(registry.progress("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_then_submit() {
        let registry = two_field_registry();
        registry.begin("u1").await;
        registry.submit_answer("u1", "Alice").await;

        assert_eq!(registry.cancel("u1").await, Outcome::Cancelled);
        assert_eq!(registry.submit_answer("u1", "Paris").await, Outcome::NoActiveSession);
        assert_eq!(registry.cancel("u1").await, Outcome::NoActiveSession);
    }

    #[tokio::test]
    async fn test_begin_discards_progress() {
        let registry = two_field_registry();
        registry.begin("u1").await;
        registry.submit_answer("u1", "Alice").await;
        assert_eq!(
            registry.progress("u1").await,
            Some(Progress { answered: 1, total: 2 })
        );

        assert_eq!(registry.begin("u1").await, "Enter name:");
        assert_eq!(
            registry.progress("u1").await,
            Some(Progress { answered: 0, total: 2 })
        );
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let registry = two_field_registry();
        registry.begin("a").await;
        registry.begin("b").await;

        registry.submit_answer("a", "Alice").await;
        registry.cancel("b").await;

        assert_eq!(
            registry.progress("a").await,
            Some(Progress { answered: 1, total: 2 })
        );
        assert!(matches!(
            registry.submit_answer("a", "Paris").await,
            Outcome::ReadyToGenerate(_)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submits_are_serialized() {
        let fields = (0..3)
            .map(|i| Field::new(format!("k{i}"), format!("Q{i}")))
            .collect();
        let registry = Arc::new(SessionRegistry::new(Script::new(fields).unwrap()));

        for _ in 0..50 {
            registry.begin("race").await;

            let first = {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.submit_answer("race", "left").await })
            };
            let second = {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.submit_answer("race", "right").await })
            };
            let (first, second) = futures::future::join(first, second).await;
            let mut outcomes = [first.unwrap(), second.unwrap()];
            outcomes.sort_by_key(|o| format!("{o:?}"));

            // One answer landed at k0, the other at k1.
            assert_eq!(
                outcomes,
                [
                    Outcome::NextPrompt("Q1".to_string()),
                    Outcome::NextPrompt("Q2".to_string()),
                ]
            );
            assert_eq!(
                registry.progress("race").await,
                Some(Progress { answered: 2, total: 3 })
            );

            let Outcome::ReadyToGenerate(answers) = registry.submit_answer("race", "end").await
            else {
                panic!("expected ReadyToGenerate");
            };
            assert_eq!(answers.keys().collect::<Vec<_>>(), ["k0", "k1", "k2"]);
            let mut early: Vec<_> = [answers.get("k0"), answers.get("k1")]
                .into_iter()
                .flatten()
                .collect();
            early.sort_unstable();
            assert_eq!(early, ["left", "right"]);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_final_answers_complete_once() {
        let registry = Arc::new(two_field_registry());
        registry.begin("u").await;
        registry.submit_answer("u", "Alice").await;

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.submit_answer("u", &format!("city {i}")).await })
            })
            .collect();

        let outcomes: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        let completed = outcomes
            .iter()
            .filter(|o| matches!(o, Outcome::ReadyToGenerate(_)))
            .count();
        assert_eq!(completed, 1);
        assert_eq!(
            outcomes.iter().filter(|o| o.is_no_active_session()).count(),
            7
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_idle() {
        let script = Script::new(vec![Field::new("name", "Name?"), Field::new("city", "City?")])
            .unwrap();
        let registry = SessionRegistry::with_config(
            script,
            SessionConfig {
                idle_timeout: Some(Duration::from_secs(60)),
            },
        );

        registry.begin("old").await;
        tokio::time::advance(Duration::from_secs(45)).await;
        registry.begin("fresh").await;
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(registry.sweep_idle().await, 1);
        assert_eq!(registry.submit_answer("old", "x").await, Outcome::NoActiveSession);
        assert!(matches!(
            registry.submit_answer("fresh", "x").await,
            Outcome::NextPrompt(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_disabled() {
        let registry = SessionRegistry::with_config(
            Script::claim_response(),
            SessionConfig { idle_timeout: None },
        );
        registry.begin("u").await;
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert_eq!(registry.sweep_idle().await, 0);
        assert_eq!(registry.active_count().await, 1);
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use medichat::config::ConsultationConfig;
    use medichat::consultation::ConsultationService;
    use medichat::db::{self, service::DbService, DbPool, Expert};
    use medichat::store::{ConsultationStore, DuckDbStore, StoreError};
    use medichat::triage::{ConsultationError, ConsultationSession, Message, Referral, Role, SessionStatus, Severity};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    const PATIENT: &str = "patient-1";
    const FALLBACK: &str =
        "Thank you for sharing that information. Can you tell me more about your symptoms and when they started?";

    /// DuckDB store that can be switched offline to simulate a lost connection.
    struct FlakyStore {
        inner: DuckDbStore,
        offline: AtomicBool,
        failed_calls: AtomicUsize,
    }

    impl FlakyStore {
        fn new(pool: DbPool) -> Self {
            Self {
                inner: DuckDbStore::new(pool),
                offline: AtomicBool::new(false),
                failed_calls: AtomicUsize::new(0),
            }
        }

        fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), StoreError> {
            if self.offline.load(Ordering::SeqCst) {
                self.failed_calls.fetch_add(1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("connection lost".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ConsultationStore for FlakyStore {
        async fn append_message(&self, consultation_id: Uuid, seq: usize, message: &Message) -> Result<(), StoreError> {
            self.check()?;
            self.inner.append_message(consultation_id, seq, message).await
        }

        async fn upsert_consultation(&self, session: &ConsultationSession) -> Result<(), StoreError> {
            self.check()?;
            self.inner.upsert_consultation(session).await
        }

        async fn insert_referral(&self, referral: &Referral) -> Result<(), StoreError> {
            self.check()?;
            self.inner.insert_referral(referral).await
        }

        async fn load_consultation(&self, id: Uuid) -> Result<Option<ConsultationSession>, StoreError> {
            self.check()?;
            self.inner.load_consultation(id).await
        }
    }

    fn test_config() -> ConsultationConfig {
        ConsultationConfig {
            reply_delay_ms: 0,
            sync_retry_attempts: 2,
            sync_retry_backoff_ms: 0,
            ..Default::default()
        }
    }

    fn setup() -> (DbPool, Arc<FlakyStore>, ConsultationService, Expert) {
        setup_with(test_config())
    }

    fn setup_with(config: ConsultationConfig) -> (DbPool, Arc<FlakyStore>, ConsultationService, Expert) {
        let pool = db::open_in_memory().unwrap();
        let expert = {
            let conn = pool.lock().unwrap();
            DbService::insert_expert(&conn, "Dr. AI Cardiologist", "Cardiology", "Heart health", &[]).unwrap()
        };
        let store = Arc::new(FlakyStore::new(pool.clone()));
        let service = ConsultationService::new(store.clone(), config);
        (pool, store, service, expert)
    }

    fn stored_messages(pool: &DbPool, id: Uuid) -> Vec<Message> {
        let conn = pool.lock().unwrap();
        DbService::get_messages(&conn, id, 100, 0).unwrap()
    }

    #[tokio::test]
    async fn test_start_greets_and_persists() {
        let (pool, _store, service, expert) = setup();
        let view = service.start(&expert, PATIENT).await;

        assert_eq!(view.status, SessionStatus::InProgress);
        assert_eq!(view.severity, Severity::Low);
        assert!(!view.sync_pending);
        assert_eq!(view.messages.len(), 1);
        assert!(view.messages[0].content.starts_with("Hello, I'm Dr. AI Cardiologist."));

        let stored = stored_messages(&pool, view.id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, view.messages[0].id);
    }

    #[tokio::test]
    async fn test_headache_then_chest_pain() {
        let (pool, _store, service, expert) = setup();
        let id = service.start(&expert, PATIENT).await.id;

        let first = service.submit_turn(id, PATIENT, "I have a headache").await.unwrap();
        assert_eq!(first.new_symptom.as_deref(), Some("headache"));
        assert_eq!(first.severity, Severity::Medium);
        assert!(first.assessment.is_none());
        assert!(!first.referral_available);

        let second = service.submit_turn(id, PATIENT, "now I have chest pain").await.unwrap();
        assert_eq!(second.symptoms, vec!["headache".to_string(), "chest pain".to_string()]);
        assert_eq!(second.severity, Severity::High);
        let assessment = second.assessment.clone().unwrap();
        assert!(assessment.contains("headache, chest pain"));
        assert!(second.reply.content.ends_with(&format!("\n\n{}", assessment)));
        assert!(second.referral_available);

        let conn = pool.lock().unwrap();
        let record = DbService::get_consultation(&conn, id).unwrap().unwrap();
        assert_eq!(record.severity, Severity::High);
        assert_eq!(record.recommendation.as_deref(), Some(assessment.as_str()));
    }

    #[tokio::test]
    async fn test_empty_input_leaves_state_untouched() {
        let (pool, _store, service, expert) = setup();
        let id = service.start(&expert, PATIENT).await.id;

        let err = service.submit_turn(id, PATIENT, "   ").await.unwrap_err();
        assert_eq!(err, ConsultationError::EmptyInput);

        let view = service.snapshot(id, PATIENT).await.unwrap();
        assert_eq!(view.messages.len(), 1);
        assert!(view.symptoms.is_empty());
        assert_eq!(stored_messages(&pool, id).len(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_utterance_gets_fallback() {
        let (_pool, _store, service, expert) = setup();
        let id = service.start(&expert, PATIENT).await.id;

        let turn = service.submit_turn(id, PATIENT, "I feel tired").await.unwrap();
        assert_eq!(turn.reply.content, FALLBACK);
        assert!(turn.symptoms.is_empty());
        assert_eq!(turn.severity, Severity::Low);
    }

    #[tokio::test]
    async fn test_severity_is_monotonic() {
        let (_pool, _store, service, expert) = setup();
        let id = service.start(&expert, PATIENT).await.id;

        for utterance in ["I have a fever", "just tired", "chest pain", "feeling okay now"] {
            service.submit_turn(id, PATIENT, utterance).await.unwrap();
        }

        let view = service.snapshot(id, PATIENT).await.unwrap();
        assert_eq!(view.severity, Severity::High);
    }

    #[tokio::test]
    async fn test_repeated_symptom_and_stable_assessment() {
        let (_pool, _store, service, expert) = setup();
        let id = service.start(&expert, PATIENT).await.id;

        service.submit_turn(id, PATIENT, "I have a headache").await.unwrap();
        let repeat = service.submit_turn(id, PATIENT, "I have a headache").await.unwrap();
        assert_eq!(repeat.symptoms, vec!["headache".to_string()]);

        let second = service.submit_turn(id, PATIENT, "and a fever").await.unwrap();
        let assessment = second.assessment.unwrap();

        let third = service.submit_turn(id, PATIENT, "also a cough").await.unwrap();
        assert_eq!(third.symptoms.len(), 3);
        assert_eq!(third.assessment.as_deref(), Some(assessment.as_str()));
        assert!(!third.reply.content.contains("Based on your symptoms"));
    }

    #[tokio::test]
    async fn test_referral_sent_once() {
        let (pool, _store, service, expert) = setup();
        let id = service.start(&expert, PATIENT).await.id;

        let err = service.send_referral(id, PATIENT).await.unwrap_err();
        assert_eq!(err, ConsultationError::ReferralNotOffered);

        service.submit_turn(id, PATIENT, "my heart hurts").await.unwrap();
        assert!(service.referral_available(id, PATIENT).await.unwrap());

        let receipt = service.send_referral(id, PATIENT).await.unwrap();
        assert_eq!(receipt.referral.symptoms, "chest pain");
        assert_eq!(receipt.referral.severity, Severity::High);
        assert!(!receipt.sync_pending);

        let again = service.send_referral(id, PATIENT).await.unwrap_err();
        assert_eq!(again, ConsultationError::AlreadyReferred);
        assert!(!service.referral_available(id, PATIENT).await.unwrap());

        let view = service.snapshot(id, PATIENT).await.unwrap();
        assert_eq!(view.status, SessionStatus::Referred);
        assert_eq!(view.messages.last().map(|m| m.role), Some(Role::Assistant));

        let conn = pool.lock().unwrap();
        assert_eq!(DbService::count_referrals_for(&conn, id).unwrap(), 1);
        let record = DbService::get_consultation(&conn, id).unwrap().unwrap();
        assert_eq!(record.status, SessionStatus::Referred);
        assert!(record.referred_to_doctor);
    }

    #[tokio::test]
    async fn test_unknown_or_foreign_session_is_rejected() {
        let (_pool, _store, service, expert) = setup();
        let err = service.submit_turn(Uuid::new_v4(), PATIENT, "hello").await.unwrap_err();
        assert_eq!(err, ConsultationError::NoActiveSession);

        let id = service.start(&expert, PATIENT).await.id;
        let err = service.submit_turn(id, "patient-2", "chest pain").await.unwrap_err();
        assert_eq!(err, ConsultationError::NoActiveSession);

        let view = service.snapshot(id, PATIENT).await.unwrap();
        assert_eq!(view.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_retried_without_duplicates() {
        let (pool, store, service, expert) = setup();
        let id = service.start(&expert, PATIENT).await.id;

        store.set_offline(true);
        let turn = service.submit_turn(id, PATIENT, "I have a fever").await.unwrap();
        assert!(turn.sync_pending);
        assert_eq!(turn.symptoms, vec!["fever".to_string()]);
        assert!(store.failed_calls.load(Ordering::SeqCst) > 0);
        assert_eq!(stored_messages(&pool, id).len(), 1);

        // Ending with a backlog is refused, the session stays active
        let err = service.end(id, PATIENT).await.unwrap_err();
        assert!(matches!(err, ConsultationError::PersistenceFailure(_)));
        assert!(service.is_active(id).await);

        store.set_offline(false);
        assert!(service.sync(id, PATIENT).await.unwrap());
        assert!(service.sync(id, PATIENT).await.unwrap());

        let stored = stored_messages(&pool, id);
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[1].content, "I have a fever");
        assert_eq!(stored[1].id, turn.user_message.id);
        assert_eq!(stored[2].id, turn.reply.id);

        let view = service.snapshot(id, PATIENT).await.unwrap();
        assert!(!view.sync_pending);
        assert_eq!(view.symptoms, vec!["fever".to_string()]);
    }

    #[tokio::test]
    async fn test_backlog_flushes_on_next_turn() {
        let (pool, store, service, expert) = setup();
        let id = service.start(&expert, PATIENT).await.id;

        store.set_offline(true);
        service.submit_turn(id, PATIENT, "a rash").await.unwrap();
        store.set_offline(false);

        let turn = service.submit_turn(id, PATIENT, "and a cough").await.unwrap();
        assert!(!turn.sync_pending);

        let roles: Vec<Role> = stored_messages(&pool, id).iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::Assistant, Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn test_end_and_resume() {
        let (_pool, _store, service, expert) = setup();
        let id = service.start(&expert, PATIENT).await.id;
        service.submit_turn(id, PATIENT, "I have a headache").await.unwrap();

        service.end(id, PATIENT).await.unwrap();
        assert!(!service.is_active(id).await);
        assert_eq!(
            service.submit_turn(id, PATIENT, "still here").await.unwrap_err(),
            ConsultationError::NoActiveSession
        );

        assert_eq!(
            service.resume(id, "patient-2").await.unwrap_err(),
            ConsultationError::NoActiveSession
        );
        let view = service.resume(id, PATIENT).await.unwrap();
        assert_eq!(view.symptoms, vec!["headache".to_string()]);
        assert_eq!(view.messages.len(), 3);

        let turn = service.submit_turn(id, PATIENT, "and a fever").await.unwrap();
        assert!(turn.assessment.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_turns_stay_paired() {
        let (_pool, _store, service, expert) = setup();
        let service = Arc::new(service);
        let id = service.start(&expert, PATIENT).await.id;

        let mut handles = Vec::new();
        for utterance in ["headache", "fever", "cough", "rash", "nothing much"] {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.submit_turn(id, PATIENT, utterance).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let view = service.snapshot(id, PATIENT).await.unwrap();
        assert_eq!(view.messages.len(), 11);
        for pair in view.messages[1..].chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
        }
        assert_eq!(view.symptoms.len(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_turns_wait_for_paused_reply() {
        let (pool, _store, service, expert) = setup_with(ConsultationConfig {
            reply_delay_ms: 30,
            ..test_config()
        });
        let service = Arc::new(service);
        let id = service.start(&expert, PATIENT).await.id;

        let utterances = ["chest pain", "headache", "fever", "cough", "rash", "I feel tired"];
        let handles: Vec<_> = utterances
            .into_iter()
            .map(|utterance| {
                let service = service.clone();
                tokio::spawn(async move { service.submit_turn(id, PATIENT, utterance).await.unwrap() })
            })
            .collect();

        for handle in handles {
            let turn = handle.await.unwrap();
            assert!(!turn.sync_pending);
        }

        // Every user message is immediately followed by its own reply
        let view = service.snapshot(id, PATIENT).await.unwrap();
        assert_eq!(view.messages.len(), 13);
        for pair in view.messages[1..].chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
        }
        assert_eq!(view.severity, Severity::High);

        let stored = stored_messages(&pool, id);
        let stored_ids: Vec<Uuid> = stored.iter().map(|m| m.id).collect();
        let view_ids: Vec<Uuid> = view.messages.iter().map(|m| m.id).collect();
        assert_eq!(stored_ids, view_ids);
    }

    #[tokio::test]
    async fn test_idle_sessions_are_evicted() {
        let (_pool, _store, service, expert) = setup();
        let id = service.start(&expert, PATIENT).await.id;
        service.submit_turn(id, PATIENT, "I have a headache").await.unwrap();

        assert_eq!(service.evict_idle(Duration::from_secs(3600)).await, 0);
        assert!(service.is_active(id).await);

        assert_eq!(service.evict_idle(Duration::ZERO).await, 1);
        assert!(!service.is_active(id).await);

        let view = service.resume(id, PATIENT).await.unwrap();
        assert_eq!(view.symptoms, vec!["headache".to_string()]);
    }

    #[tokio::test]
    async fn test_eviction_keeps_unsynced_sessions() {
        let (_pool, store, service, expert) = setup();
        let id = service.start(&expert, PATIENT).await.id;

        store.set_offline(true);
        service.submit_turn(id, PATIENT, "a fever").await.unwrap();
        assert_eq!(service.evict_idle(Duration::ZERO).await, 0);
        assert!(service.is_active(id).await);

        store.set_offline(false);
        assert!(service.sync(id, PATIENT).await.unwrap());
        assert_eq!(service.evict_idle(Duration::ZERO).await, 1);
    }
}

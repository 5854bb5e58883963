use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::outbox::{Outbox, PendingWrite};
use crate::config::ConsultationConfig;
use crate::db::models::Expert;
use crate::store::ConsultationStore;
use crate::triage::{
    self, ConsultationError, ConsultationSession, Message, Referral, SessionStatus, Severity,
};

/// What the presentation layer renders for a consultation.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub expert_id: Uuid,
    pub patient_id: String,
    pub status: SessionStatus,
    pub messages: Vec<Message>,
    pub symptoms: Vec<String>,
    pub severity: Severity,
    pub assessment: Option<String>,
    pub referral_available: bool,
    pub referral_sent: bool,
    pub sync_pending: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnReply {
    pub user_message: Message,
    pub reply: Message,
    pub new_symptom: Option<String>,
    pub symptoms: Vec<String>,
    pub severity: Severity,
    pub assessment: Option<String>,
    pub referral_available: bool,
    pub sync_pending: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferralReceipt {
    pub referral: Referral,
    pub announcement: Message,
    pub sync_pending: bool,
}

struct ActiveConsultation {
    session: ConsultationSession,
    outbox: Outbox,
}

impl ActiveConsultation {
    fn view(&self) -> SessionView {
        let s = &self.session;
        SessionView {
            id: s.id,
            expert_id: s.expert_id,
            patient_id: s.patient_id.clone(),
            status: s.status,
            messages: s.messages.clone(),
            symptoms: s.symptoms.clone(),
            severity: s.severity,
            assessment: s.assessment.clone(),
            referral_available: triage::maybe_offer_referral(s),
            referral_sent: s.referral_sent,
            sync_pending: !self.outbox.is_empty(),
        }
    }

    fn ensure_owner(&self, patient_id: &str) -> Result<(), ConsultationError> {
        if self.session.patient_id == patient_id {
            Ok(())
        } else {
            Err(ConsultationError::NoActiveSession)
        }
    }
}

/// Drives consultation turns against the active-session registry.
///
/// Each session sits behind its own async lock, held for the whole turn,
/// so turns for one consultation run strictly one after another while
/// different consultations proceed independently.
pub struct ConsultationService {
    store: Arc<dyn ConsultationStore>,
    config: ConsultationConfig,
    active: RwLock<HashMap<Uuid, Arc<Mutex<ActiveConsultation>>>>,
}

impl ConsultationService {
    pub fn new(store: Arc<dyn ConsultationStore>, config: ConsultationConfig) -> Self {
        Self {
            store,
            config,
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Open a consultation with an expert and greet the patient.
    pub async fn start(&self, expert: &Expert, patient_id: &str) -> SessionView {
        let mut session = ConsultationSession::new(expert.id, patient_id);
        let greeting = session.greet(&expert.name, &expert.specialty);

        let mut active = ActiveConsultation {
            outbox: Outbox::default(),
            session,
        };
        active.outbox.push(PendingWrite::consultation(&active.session));
        active.outbox.push(PendingWrite::message(&active.session, &greeting));
        self.flush(&mut active).await;

        info!(
            consultation_id = %active.session.id,
            expert = %expert.name,
            "Consultation started"
        );

        let view = active.view();
        self.active
            .write()
            .await
            .insert(view.id, Arc::new(Mutex::new(active)));
        view
    }

    /// Bring a stored consultation back into the active registry.
    pub async fn resume(&self, consultation_id: Uuid, patient_id: &str) -> Result<SessionView, ConsultationError> {
        if let Ok(handle) = self.handle(consultation_id).await {
            let active = handle.lock().await;
            active.ensure_owner(patient_id)?;
            return Ok(active.view());
        }

        let session = self
            .store
            .load_consultation(consultation_id)
            .await?
            .ok_or(ConsultationError::NoActiveSession)?;
        if session.patient_id != patient_id {
            return Err(ConsultationError::NoActiveSession);
        }

        let handle = {
            let mut registry = self.active.write().await;
            registry
                .entry(consultation_id)
                .or_insert_with(|| {
                    Arc::new(Mutex::new(ActiveConsultation {
                        session,
                        outbox: Outbox::default(),
                    }))
                })
                .clone()
        };

        info!(consultation_id = %consultation_id, "Consultation resumed");
        let active = handle.lock().await;
        active.ensure_owner(patient_id)?;
        Ok(active.view())
    }

    /// Run one patient turn: record, classify, update state, reply.
    pub async fn submit_turn(
        &self,
        consultation_id: Uuid,
        patient_id: &str,
        utterance: &str,
    ) -> Result<TurnReply, ConsultationError> {
        let handle = self.handle(consultation_id).await?;
        let mut active = handle.lock().await;
        active.ensure_owner(patient_id)?;

        let user_message = active.session.record_utterance(utterance)?;
        let write = PendingWrite::message(&active.session, &user_message);
        active.outbox.push(write);
        self.flush(&mut active).await;

        if self.config.reply_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.reply_delay_ms)).await;
        }

        let outcome = active
            .session
            .respond(user_message, self.config.assessment_threshold);

        let consultation = PendingWrite::consultation(&active.session);
        let reply = PendingWrite::message(&active.session, &outcome.reply);
        active.outbox.push(consultation);
        active.outbox.push(reply);
        let synced = self.flush(&mut active).await;

        if let Some(tag) = &outcome.effects.new_symptom {
            info!(
                consultation_id = %consultation_id,
                symptom = %tag,
                severity = ?active.session.severity,
                "Symptom identified"
            );
        }
        if outcome.effects.referral_offered {
            warn!(consultation_id = %consultation_id, "Referral to doctor offered");
        }

        let s = &active.session;
        Ok(TurnReply {
            user_message: outcome.user_message,
            reply: outcome.reply,
            new_symptom: outcome.effects.new_symptom,
            symptoms: s.symptoms.clone(),
            severity: s.severity,
            assessment: s.assessment.clone(),
            referral_available: triage::maybe_offer_referral(s),
            sync_pending: !synced,
        })
    }

    pub async fn referral_available(&self, consultation_id: Uuid, patient_id: &str) -> Result<bool, ConsultationError> {
        let handle = self.handle(consultation_id).await?;
        let active = handle.lock().await;
        active.ensure_owner(patient_id)?;
        Ok(triage::maybe_offer_referral(&active.session))
    }

    /// Escalate the consultation to a doctor. At most once per session.
    pub async fn send_referral(
        &self,
        consultation_id: Uuid,
        patient_id: &str,
    ) -> Result<ReferralReceipt, ConsultationError> {
        let handle = self.handle(consultation_id).await?;
        let mut active = handle.lock().await;
        active.ensure_owner(patient_id)?;

        let sent = triage::send_referral(&mut active.session)?;

        let consultation = PendingWrite::consultation(&active.session);
        let announcement = PendingWrite::message(&active.session, &sent.announcement);
        active.outbox.push(consultation);
        active.outbox.push(PendingWrite::Referral(sent.referral.clone()));
        active.outbox.push(announcement);
        let synced = self.flush(&mut active).await;

        Ok(ReferralReceipt {
            referral: sent.referral,
            announcement: sent.announcement,
            sync_pending: !synced,
        })
    }

    pub async fn snapshot(&self, consultation_id: Uuid, patient_id: &str) -> Result<SessionView, ConsultationError> {
        let handle = self.handle(consultation_id).await?;
        let active = handle.lock().await;
        active.ensure_owner(patient_id)?;
        Ok(active.view())
    }

    /// Retry the persistence backlog. Returns true once nothing is pending.
    pub async fn sync(&self, consultation_id: Uuid, patient_id: &str) -> Result<bool, ConsultationError> {
        let handle = self.handle(consultation_id).await?;
        let mut active = handle.lock().await;
        active.ensure_owner(patient_id)?;
        Ok(self.flush(&mut active).await)
    }

    /// Close the consultation. Refuses while writes are still pending.
    pub async fn end(&self, consultation_id: Uuid, patient_id: &str) -> Result<(), ConsultationError> {
        let handle = self.handle(consultation_id).await?;
        let mut active = handle.lock().await;
        active.ensure_owner(patient_id)?;

        if !self.flush(&mut active).await {
            return Err(ConsultationError::PersistenceFailure(format!(
                "{} write(s) still pending",
                active.outbox.len()
            )));
        }

        self.active.write().await.remove(&consultation_id);
        info!(consultation_id = %consultation_id, "Consultation ended");
        Ok(())
    }

    /// Drop sessions idle for at least `max_idle` whose writes are all
    /// confirmed. Sessions mid-turn or with a backlog stay registered.
    /// Evicted sessions can be brought back with `resume`.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Utc::now();
        let mut registry = self.active.write().await;
        let before = registry.len();

        registry.retain(|id, handle| {
            let Ok(active) = handle.try_lock() else {
                return true;
            };
            let idle = (now - active.session.updated_at).to_std().unwrap_or_default();
            let keep = idle < max_idle || !active.outbox.is_empty();
            if !keep {
                info!(consultation_id = %id, idle_secs = idle.as_secs(), "Evicting idle consultation");
            }
            keep
        });

        before - registry.len()
    }

    pub async fn is_active(&self, consultation_id: Uuid) -> bool {
        self.active.read().await.contains_key(&consultation_id)
    }

    async fn handle(&self, consultation_id: Uuid) -> Result<Arc<Mutex<ActiveConsultation>>, ConsultationError> {
        self.active
            .read()
            .await
            .get(&consultation_id)
            .cloned()
            .ok_or(ConsultationError::NoActiveSession)
    }

    /// Push the backlog to the store with bounded retries.
    async fn flush(&self, active: &mut ActiveConsultation) -> bool {
        let attempts = self.config.sync_retry_attempts.max(1);

        for attempt in 1..=attempts {
            match active.outbox.flush(self.store.as_ref()).await {
                Ok(()) => return true,
                Err(e) if attempt < attempts => {
                    warn!(
                        consultation_id = %active.session.id,
                        attempt,
                        pending = active.outbox.len(),
                        "Persistence failed, retrying: {}",
                        e
                    );
                    let backoff = self.config.sync_retry_backoff_ms * u64::from(attempt);
                    if backoff > 0 {
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
                Err(e) => {
                    error!(
                        consultation_id = %active.session.id,
                        pending = active.outbox.len(),
                        "Persistence failed, keeping writes queued: {}",
                        e
                    );
                }
            }
        }
        false
    }
}

use std::collections::VecDeque;
use uuid::Uuid;

use crate::store::{ConsultationStore, StoreError};
use crate::triage::{ConsultationSession, Message, Referral};

/// A write that has been applied in memory but not yet confirmed by the store.
#[derive(Debug, Clone)]
pub enum PendingWrite {
    Message {
        consultation_id: Uuid,
        seq: usize,
        message: Message,
    },
    Consultation(Box<ConsultationSession>),
    Referral(Referral),
}

impl PendingWrite {
    pub fn message(session: &ConsultationSession, message: &Message) -> Self {
        let seq = session
            .messages
            .iter()
            .position(|m| m.id == message.id)
            .unwrap_or(session.messages.len());
        PendingWrite::Message {
            consultation_id: session.id,
            seq,
            message: message.clone(),
        }
    }

    /// Snapshot of the consultation row; the transcript travels separately.
    pub fn consultation(session: &ConsultationSession) -> Self {
        let mut snapshot = session.clone();
        snapshot.messages.clear();
        PendingWrite::Consultation(Box::new(snapshot))
    }

    async fn apply(&self, store: &dyn ConsultationStore) -> Result<(), StoreError> {
        match self {
            PendingWrite::Message {
                consultation_id,
                seq,
                message,
            } => store.append_message(*consultation_id, *seq, message).await,
            PendingWrite::Consultation(session) => store.upsert_consultation(session).await,
            PendingWrite::Referral(referral) => store.insert_referral(referral).await,
        }
    }
}

/// Ordered backlog of writes for one consultation.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<PendingWrite>,
}

impl Outbox {
    pub fn push(&mut self, write: PendingWrite) {
        // A newer row snapshot supersedes a queued one.
        if let PendingWrite::Consultation(_) = write {
            self.queue.retain(|w| !matches!(w, PendingWrite::Consultation(_)));
        }
        self.queue.push_back(write);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Apply queued writes in order, stopping at the first failure.
    /// Confirmed writes leave the queue; the failed one stays at the front.
    pub async fn flush(&mut self, store: &dyn ConsultationStore) -> Result<(), StoreError> {
        while let Some(write) = self.queue.front() {
            write.apply(store).await?;
            self.queue.pop_front();
        }
        Ok(())
    }
}

pub mod database;

pub use database::DuckDbStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::triage::{ConsultationError, ConsultationSession, Message, Referral};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),
    #[error("Database lock poisoned")]
    LockPoisoned,
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for ConsultationError {
    fn from(e: StoreError) -> Self {
        ConsultationError::PersistenceFailure(e.to_string())
    }
}

/// Persistence operations the consultation flow relies on.
///
/// Each call succeeds or fails on its own; nothing spans calls. Message and
/// referral writes are idempotent on their ids so a retried write never
/// duplicates a row.
#[async_trait]
pub trait ConsultationStore: Send + Sync {
    async fn append_message(&self, consultation_id: Uuid, seq: usize, message: &Message) -> Result<(), StoreError>;

    /// Write status, symptom summary, severity, assessment and referral flags.
    async fn upsert_consultation(&self, session: &ConsultationSession) -> Result<(), StoreError>;

    async fn insert_referral(&self, referral: &Referral) -> Result<(), StoreError>;

    /// Full session including its transcript.
    async fn load_consultation(&self, id: Uuid) -> Result<Option<ConsultationSession>, StoreError>;
}

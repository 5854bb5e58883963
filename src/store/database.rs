use async_trait::async_trait;
use duckdb::Connection;
use tracing::debug;
use uuid::Uuid;

use super::{ConsultationStore, StoreError};
use crate::db::{service::DbService, DbPool};
use crate::triage::{ConsultationSession, Message, Referral};

/// `ConsultationStore` backed by the shared DuckDB connection.
#[derive(Clone)]
pub struct DuckDbStore {
    pool: DbPool,
}

impl DuckDbStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> duckdb::Result<T>) -> Result<T, StoreError> {
        let conn = self.pool.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(f(&conn)?)
    }
}

#[async_trait]
impl ConsultationStore for DuckDbStore {
    async fn append_message(&self, consultation_id: Uuid, seq: usize, message: &Message) -> Result<(), StoreError> {
        let inserted = self.with_conn(|conn| DbService::append_message(conn, consultation_id, seq, message))?;
        if !inserted {
            debug!(message_id = %message.id, "Message already stored, skipping");
        }
        Ok(())
    }

    async fn upsert_consultation(&self, session: &ConsultationSession) -> Result<(), StoreError> {
        self.with_conn(|conn| DbService::upsert_consultation(conn, session))
    }

    async fn insert_referral(&self, referral: &Referral) -> Result<(), StoreError> {
        self.with_conn(|conn| DbService::insert_referral(conn, referral))?;
        Ok(())
    }

    async fn load_consultation(&self, id: Uuid) -> Result<Option<ConsultationSession>, StoreError> {
        self.with_conn(|conn| DbService::load_session(conn, id))
    }
}

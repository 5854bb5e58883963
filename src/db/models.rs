use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::triage::{Referral, SessionStatus, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expert {
    pub id: Uuid,
    pub name: String,
    pub specialty: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Row of `ai_consultations`, without the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationRecord {
    pub id: Uuid,
    pub expert_id: Uuid,
    pub patient_id: String,
    pub status: SessionStatus,
    pub symptoms: Vec<String>,
    pub summary: String,
    pub severity: Severity,
    pub recommendation: Option<String>,
    pub referral_available: bool,
    pub referred_to_doctor: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum ReviewOutcome {
    Reviewed(Referral),
    NotPending(Referral),
    NotFound,
}

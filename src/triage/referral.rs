use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::classifier::Severity;
use super::session::{ConsultationSession, Message, SessionStatus};
use super::ConsultationError;

pub const REFERRAL_ANNOUNCEMENT: &str = "I've referred your case to a doctor. They will review your symptoms and get back to you soon. You can continue to chat with me in the meantime.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    Pending,
    Accepted,
    Declined,
}

impl ReferralStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferralStatus::Pending => "pending",
            ReferralStatus::Accepted => "accepted",
            ReferralStatus::Declined => "declined",
        }
    }
}

impl fmt::Display for ReferralStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferralStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReferralStatus::Pending),
            "accepted" => Ok(ReferralStatus::Accepted),
            "declined" => Ok(ReferralStatus::Declined),
            other => Err(format!("unknown referral status '{}'", other)),
        }
    }
}

/// Escalation of a consultation to a human doctor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Referral {
    pub id: Uuid,
    pub consultation_id: Uuid,
    pub patient_id: String,
    /// Comma-joined symptom tags at time of sending.
    pub symptoms: String,
    /// Empty when no assessment had been generated yet.
    pub assessment: String,
    pub severity: Severity,
    pub status: ReferralStatus,
    pub decline_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// Doctor's verdict on a pending referral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum ReferralDecision {
    Accept,
    Decline { reason: Option<String> },
}

impl ReferralDecision {
    pub fn status(&self) -> ReferralStatus {
        match self {
            ReferralDecision::Accept => ReferralStatus::Accepted,
            ReferralDecision::Decline { .. } => ReferralStatus::Declined,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ReferralDecision::Accept => None,
            ReferralDecision::Decline { reason } => reason.as_deref(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SentReferral {
    pub referral: Referral,
    pub announcement: Message,
}

/// Whether the "refer to doctor" action should be shown.
pub fn maybe_offer_referral(session: &ConsultationSession) -> bool {
    session.referral_available && !session.referral_sent
}

/// Move the session to `referred` and produce its single referral record.
pub fn send_referral(session: &mut ConsultationSession) -> Result<SentReferral, ConsultationError> {
    if session.referral_sent || session.is_referred() {
        return Err(ConsultationError::AlreadyReferred);
    }
    if !session.referral_available {
        return Err(ConsultationError::ReferralNotOffered);
    }

    let referral = Referral {
        id: Uuid::new_v4(),
        consultation_id: session.id,
        patient_id: session.patient_id.clone(),
        symptoms: session.symptom_summary(),
        assessment: session.assessment.clone().unwrap_or_default(),
        severity: session.severity,
        status: ReferralStatus::Pending,
        decline_reason: None,
        created_at: Utc::now(),
        reviewed_at: None,
    };

    session.status = SessionStatus::Referred;
    session.referral_sent = true;
    let announcement = session.push_assistant(REFERRAL_ANNOUNCEMENT);

    tracing::info!(
        consultation_id = %session.id,
        severity = ?referral.severity,
        "Consultation referred to doctor"
    );

    Ok(SentReferral { referral, announcement })
}

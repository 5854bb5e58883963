use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::classifier::{classify, Classification, Severity};
use super::composer::compose;
use super::ConsultationError;

/// Distinct symptom count at which the one-time assessment is produced.
pub const ASSESSMENT_THRESHOLD: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Referred,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Referred => "referred",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(SessionStatus::InProgress),
            "referred" => Ok(SessionStatus::Referred),
            other => Err(format!("unknown consultation status '{}'", other)),
        }
    }
}

/// What a single turn changed on the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnEffects {
    pub new_symptom: Option<String>,
    pub severity_raised: bool,
    pub referral_offered: bool,
    /// Set only on the turn that produced the assessment.
    pub assessment_generated: bool,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub user_message: Message,
    pub classification: Classification,
    pub effects: TurnEffects,
    pub reply: Message,
}

/// One patient's chat with an AI expert.
///
/// Symptoms only grow and severity never decreases. The transcript is
/// append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationSession {
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
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConsultationSession {
    pub fn new(expert_id: Uuid, patient_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            expert_id,
            patient_id: patient_id.into(),
            status: SessionStatus::InProgress,
            messages: Vec::new(),
            symptoms: Vec::new(),
            severity: Severity::Low,
            assessment: None,
            referral_available: false,
            referral_sent: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_referred(&self) -> bool {
        self.status == SessionStatus::Referred
    }

    /// Opening line from the expert.
    pub fn greet(&mut self, expert_name: &str, specialty: &str) -> Message {
        self.push_assistant(format!(
            "Hello, I'm {}. I specialize in {}. How can I help you today?",
            expert_name, specialty
        ))
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) -> Message {
        self.push(Message::new(Role::Assistant, content))
    }

    fn push(&mut self, message: Message) -> Message {
        self.updated_at = message.created_at;
        self.messages.push(message.clone());
        message
    }

    /// Append the patient's message ahead of classification.
    pub fn record_utterance(&mut self, utterance: &str) -> Result<Message, ConsultationError> {
        if utterance.trim().is_empty() {
            return Err(ConsultationError::EmptyInput);
        }
        Ok(self.push(Message::new(Role::User, utterance)))
    }

    /// Classify an already recorded utterance, fold it into the session
    /// state and append the composed reply.
    pub fn respond(&mut self, user_message: Message, assessment_threshold: usize) -> TurnOutcome {
        let classification = classify(&user_message.content);
        let effects = self.apply_classification(&classification, assessment_threshold);
        let text = compose(&classification, self, &effects);
        let reply = self.push_assistant(text);

        TurnOutcome {
            user_message,
            classification,
            effects,
            reply,
        }
    }

    /// Record and respond in one step.
    pub fn apply_turn(&mut self, utterance: &str) -> Result<TurnOutcome, ConsultationError> {
        let user_message = self.record_utterance(utterance)?;
        Ok(self.respond(user_message, ASSESSMENT_THRESHOLD))
    }

    fn apply_classification(&mut self, classification: &Classification, threshold: usize) -> TurnEffects {
        let mut effects = TurnEffects::default();

        // Triage state is frozen once referred.
        if self.is_referred() {
            return effects;
        }

        if let Some(tag) = classification.tag {
            if !self.symptoms.iter().any(|s| s == tag) {
                self.symptoms.push(tag.to_string());
                effects.new_symptom = Some(tag.to_string());
            }
        }

        if let Some(severity) = classification.severity {
            if severity > self.severity {
                self.severity = severity;
                effects.severity_raised = true;
            }
        }

        if classification.referral_eligible && !self.referral_available && !self.referral_sent {
            self.referral_available = true;
            effects.referral_offered = true;
        }

        // An assessment always names at least one symptom.
        if self.symptoms.len() >= threshold.max(1) && self.assessment.is_none() {
            self.assessment = Some(assessment_text(&self.symptoms));
            effects.assessment_generated = true;
        }

        effects
    }

    pub fn symptom_summary(&self) -> String {
        self.symptoms.join(", ")
    }
}

pub fn assessment_text(symptoms: &[String]) -> String {
    format!(
        "Based on your symptoms ({}), I recommend consulting with a healthcare provider for a proper evaluation.",
        symptoms.join(", ")
    )
}

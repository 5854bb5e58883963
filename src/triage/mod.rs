pub mod classifier;
pub mod composer;
pub mod referral;
pub mod session;

pub use classifier::{classify, Classification, Severity};
pub use composer::compose;
pub use referral::{
    maybe_offer_referral, send_referral, Referral, ReferralDecision, ReferralStatus, SentReferral,
};
pub use session::{ConsultationSession, Message, Role, SessionStatus, TurnEffects, TurnOutcome};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsultationError {
    #[error("Message is empty")]
    EmptyInput,
    #[error("No active consultation for this patient")]
    NoActiveSession,
    #[error("Consultation has already been referred to a doctor")]
    AlreadyReferred,
    #[error("Referral has not been offered for this consultation")]
    ReferralNotOffered,
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
}

pub mod outbox;
pub mod service;

pub use outbox::{Outbox, PendingWrite};
pub use service::{ConsultationService, ReferralReceipt, SessionView, TurnReply};

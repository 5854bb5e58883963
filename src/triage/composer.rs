use super::classifier::Classification;
use super::session::{ConsultationSession, TurnEffects};

/// Build the assistant reply for a turn.
///
/// The assessment is appended as its own paragraph only on the turn that
/// generated it.
pub fn compose(classification: &Classification, session: &ConsultationSession, effects: &TurnEffects) -> String {
    let mut reply = classification.reply_template.to_string();

    if effects.assessment_generated {
        if let Some(assessment) = &session.assessment {
            reply.push_str("\n\n");
            reply.push_str(assessment);
        }
    }

    reply
}

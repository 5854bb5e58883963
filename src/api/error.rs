use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;

use crate::triage::ConsultationError;

impl ConsultationError {
    pub fn kind(&self) -> &'static str {
        match self {
            ConsultationError::EmptyInput => "empty_input",
            ConsultationError::NoActiveSession => "no_active_session",
            ConsultationError::AlreadyReferred => "already_referred",
            ConsultationError::ReferralNotOffered => "referral_not_offered",
            ConsultationError::PersistenceFailure(_) => "persistence_failure",
        }
    }
}

impl ResponseError for ConsultationError {
    fn status_code(&self) -> StatusCode {
        match self {
            ConsultationError::EmptyInput => StatusCode::BAD_REQUEST,
            ConsultationError::NoActiveSession => StatusCode::NOT_FOUND,
            ConsultationError::AlreadyReferred | ConsultationError::ReferralNotOffered => StatusCode::CONFLICT,
            ConsultationError::PersistenceFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }))
    }
}

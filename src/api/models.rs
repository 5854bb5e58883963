use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::triage::ReferralStatus;

#[derive(Debug, Deserialize)]
pub struct CreateExpertRequest {
    pub name: String,
    pub specialty: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct StartConsultationRequest {
    pub expert_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_offset")]
    pub offset: usize,
}

#[derive(Debug, Deserialize)]
pub struct ReferralListQuery {
    pub status: Option<ReferralStatus>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_offset")]
    pub offset: usize,
}

#[derive(Debug, Serialize)]
pub struct ReferralAvailability {
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct SyncStatus {
    pub synced: bool,
}

fn default_limit() -> usize {
    50
}

fn default_offset() -> usize {
    0
}

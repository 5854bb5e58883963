use crate::config::ExpertSeed;
use crate::db::models::{ConsultationRecord, Expert, ReviewOutcome};
use crate::triage::{ConsultationSession, Message, Referral, ReferralDecision, ReferralStatus};
use chrono::{DateTime, Utc};
use duckdb::{params, types::Type, Connection, Result as DbResult, Row};
use std::str::FromStr;
use uuid::Uuid;

const EXPERT_COLUMNS: &str = "id, name, specialty, description, capabilities, created_at";

const CONSULTATION_COLUMNS: &str = "id, expert_id, patient_id, status, symptoms, summary, severity, \
     recommendation, referral_available, referred_to_doctor, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, role, content, created_at";

const REFERRAL_COLUMNS: &str = "id, consultation_id, patient_id, symptoms, assessment, severity, \
     status, decline_reason, created_at, reviewed_at";

fn conversion_error(idx: usize, err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> duckdb::Error {
    duckdb::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

/// Read a text column and parse it into a domain type.
fn parse_col<T>(row: &Row, idx: usize) -> DbResult<T>
where
    T: FromStr,
    T::Err: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion_error(idx, e))
}

fn parse_opt_time(row: &Row, idx: usize) -> DbResult<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => raw
            .parse::<DateTime<Utc>>()
            .map(Some)
            .map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

fn parse_json_list(row: &Row, idx: usize) -> DbResult<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

/// Largest LIMIT/OFFSET handed to DuckDB, which rejects values near `i64::MAX`.
const MAX_SQL_COUNT: i64 = u32::MAX as i64;

/// LIMIT/OFFSET/seq values saturate instead of wrapping negative.
fn sql_count(n: usize) -> i64 {
    i64::try_from(n).map_or(MAX_SQL_COUNT, |n| n.min(MAX_SQL_COUNT))
}

fn to_json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

pub struct DbService;

impl DbService {
    fn row_to_expert(row: &Row) -> DbResult<Expert> {
        Ok(Expert {
            id: parse_col(row, 0)?,
            name: row.get(1)?,
            specialty: row.get(2)?,
            description: row.get(3)?,
            capabilities: parse_json_list(row, 4)?,
            created_at: parse_col(row, 5)?,
        })
    }

    fn row_to_consultation(row: &Row) -> DbResult<ConsultationRecord> {
        Ok(ConsultationRecord {
            id: parse_col(row, 0)?,
            expert_id: parse_col(row, 1)?,
            patient_id: row.get(2)?,
            status: parse_col(row, 3)?,
            symptoms: parse_json_list(row, 4)?,
            summary: row.get(5)?,
            severity: parse_col(row, 6)?,
            recommendation: row.get(7)?,
            referral_available: row.get(8)?,
            referred_to_doctor: row.get(9)?,
            created_at: parse_col(row, 10)?,
            updated_at: parse_col(row, 11)?,
        })
    }

    fn row_to_message(row: &Row) -> DbResult<Message> {
        Ok(Message {
            id: parse_col(row, 0)?,
            role: parse_col(row, 1)?,
            content: row.get(2)?,
            created_at: parse_col(row, 3)?,
        })
    }

    fn row_to_referral(row: &Row) -> DbResult<Referral> {
        Ok(Referral {
            id: parse_col(row, 0)?,
            consultation_id: parse_col(row, 1)?,
            patient_id: row.get(2)?,
            symptoms: row.get(3)?,
            assessment: row.get(4)?,
            severity: parse_col(row, 5)?,
            status: parse_col(row, 6)?,
            decline_reason: row.get(7)?,
            created_at: parse_col(row, 8)?,
            reviewed_at: parse_opt_time(row, 9)?,
        })
    }

    // --- Expert Operations ---

    pub fn insert_expert(
        conn: &Connection,
        name: &str,
        specialty: &str,
        description: &str,
        capabilities: &[String],
    ) -> DbResult<Expert> {
        let expert = Expert {
            id: Uuid::new_v4(),
            name: name.to_string(),
            specialty: specialty.to_string(),
            description: description.to_string(),
            capabilities: capabilities.to_vec(),
            created_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO ai_experts (id, name, specialty, description, capabilities, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                expert.id.to_string(),
                expert.name,
                expert.specialty,
                expert.description,
                to_json_list(&expert.capabilities),
                expert.created_at.to_rfc3339()
            ],
        )?;

        Ok(expert)
    }

    pub fn get_expert(conn: &Connection, id: Uuid) -> DbResult<Option<Expert>> {
        let mut stmt = conn.prepare(&format!("SELECT {} FROM ai_experts WHERE id = ?", EXPERT_COLUMNS))?;
        let mut rows = stmt.query_map(params![id.to_string()], Self::row_to_expert)?;

        rows.next().transpose()
    }

    pub fn list_experts(conn: &Connection) -> DbResult<Vec<Expert>> {
        let mut stmt = conn.prepare(&format!("SELECT {} FROM ai_experts ORDER BY created_at ASC, name ASC", EXPERT_COLUMNS))?;
        let rows = stmt.query_map([], Self::row_to_expert)?;

        rows.collect()
    }

    /// Insert the configured catalogue when no experts exist yet.
    pub fn seed_experts(conn: &Connection, seeds: &[ExpertSeed]) -> DbResult<usize> {
        let existing: i64 = conn.query_row("SELECT COUNT(*) FROM ai_experts", [], |row| row.get(0))?;
        if existing > 0 {
            return Ok(0);
        }

        for seed in seeds {
            Self::insert_expert(conn, &seed.name, &seed.specialty, &seed.description, &seed.capabilities)?;
        }
        Ok(seeds.len())
    }

    // --- Consultation Operations ---

    pub fn upsert_consultation(conn: &Connection, session: &ConsultationSession) -> DbResult<()> {
        conn.execute(
            "INSERT INTO ai_consultations (id, expert_id, patient_id, status, symptoms, summary, severity, recommendation, referral_available, referred_to_doctor, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                symptoms = EXCLUDED.symptoms,
                summary = EXCLUDED.summary,
                severity = EXCLUDED.severity,
                recommendation = EXCLUDED.recommendation,
                referral_available = EXCLUDED.referral_available,
                referred_to_doctor = EXCLUDED.referred_to_doctor,
                updated_at = EXCLUDED.updated_at",
            params![
                session.id.to_string(),
                session.expert_id.to_string(),
                session.patient_id,
                session.status.as_str(),
                to_json_list(&session.symptoms),
                session.symptom_summary(),
                session.severity.as_str(),
                session.assessment,
                session.referral_available,
                session.referral_sent,
                session.created_at.to_rfc3339(),
                session.updated_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn get_consultation(conn: &Connection, id: Uuid) -> DbResult<Option<ConsultationRecord>> {
        let mut stmt = conn.prepare(&format!("SELECT {} FROM ai_consultations WHERE id = ?", CONSULTATION_COLUMNS))?;
        let mut rows = stmt.query_map(params![id.to_string()], Self::row_to_consultation)?;

        rows.next().transpose()
    }

    pub fn list_consultations(
        conn: &Connection,
        patient_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> DbResult<Vec<ConsultationRecord>> {
        match patient_id {
            Some(patient) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM ai_consultations WHERE patient_id = ? ORDER BY updated_at DESC LIMIT ? OFFSET ?",
                    CONSULTATION_COLUMNS
                ))?;
                let rows = stmt.query_map(params![patient, sql_count(limit), sql_count(offset)], Self::row_to_consultation)?;
                rows.collect()
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM ai_consultations ORDER BY updated_at DESC LIMIT ? OFFSET ?",
                    CONSULTATION_COLUMNS
                ))?;
                let rows = stmt.query_map(params![sql_count(limit), sql_count(offset)], Self::row_to_consultation)?;
                rows.collect()
            }
        }
    }

    /// Rebuild a full session (record plus transcript).
    pub fn load_session(conn: &Connection, id: Uuid) -> DbResult<Option<ConsultationSession>> {
        let record = match Self::get_consultation(conn, id)? {
            Some(r) => r,
            None => return Ok(None),
        };
        let messages = Self::get_messages(conn, id, usize::MAX, 0)?;

        Ok(Some(ConsultationSession {
            id: record.id,
            expert_id: record.expert_id,
            patient_id: record.patient_id,
            status: record.status,
            messages,
            symptoms: record.symptoms,
            severity: record.severity,
            assessment: record.recommendation,
            referral_available: record.referral_available,
            referral_sent: record.referred_to_doctor,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }))
    }

    // --- Message Operations ---

    /// Idempotent on message id. Returns false when the message was already stored.
    pub fn append_message(conn: &Connection, consultation_id: Uuid, seq: usize, message: &Message) -> DbResult<bool> {
        let inserted = conn.execute(
            "INSERT INTO ai_consultation_messages (id, consultation_id, seq, role, content, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO NOTHING",
            params![
                message.id.to_string(),
                consultation_id.to_string(),
                sql_count(seq),
                message.role.as_str(),
                message.content,
                message.created_at.to_rfc3339()
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn get_messages(conn: &Connection, consultation_id: Uuid, limit: usize, offset: usize) -> DbResult<Vec<Message>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM ai_consultation_messages WHERE consultation_id = ? ORDER BY seq ASC LIMIT ? OFFSET ?",
            MESSAGE_COLUMNS
        ))?;

        let rows = stmt.query_map(params![consultation_id.to_string(), sql_count(limit), sql_count(offset)], Self::row_to_message)?;
        rows.collect()
    }

    // --- Referral Operations ---

    /// Idempotent on referral id.
    pub fn insert_referral(conn: &Connection, referral: &Referral) -> DbResult<bool> {
        let inserted = conn.execute(
            "INSERT INTO ai_expert_referrals (id, consultation_id, patient_id, symptoms, assessment, severity, status, decline_reason, created_at, reviewed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO NOTHING",
            params![
                referral.id.to_string(),
                referral.consultation_id.to_string(),
                referral.patient_id,
                referral.symptoms,
                referral.assessment,
                referral.severity.as_str(),
                referral.status.as_str(),
                referral.decline_reason,
                referral.created_at.to_rfc3339(),
                referral.reviewed_at.map(|t| t.to_rfc3339())
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn get_referral(conn: &Connection, id: Uuid) -> DbResult<Option<Referral>> {
        let mut stmt = conn.prepare(&format!("SELECT {} FROM ai_expert_referrals WHERE id = ?", REFERRAL_COLUMNS))?;
        let mut rows = stmt.query_map(params![id.to_string()], Self::row_to_referral)?;

        rows.next().transpose()
    }

    pub fn count_referrals_for(conn: &Connection, consultation_id: Uuid) -> DbResult<i64> {
        conn.query_row(
            "SELECT COUNT(*) FROM ai_expert_referrals WHERE consultation_id = ?",
            params![consultation_id.to_string()],
            |row| row.get(0),
        )
    }

    pub fn list_referrals(
        conn: &Connection,
        status: Option<ReferralStatus>,
        limit: usize,
        offset: usize,
    ) -> DbResult<Vec<Referral>> {
        match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM ai_expert_referrals WHERE status = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
                    REFERRAL_COLUMNS
                ))?;
                let rows = stmt.query_map(params![status.as_str(), sql_count(limit), sql_count(offset)], Self::row_to_referral)?;
                rows.collect()
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM ai_expert_referrals ORDER BY created_at DESC LIMIT ? OFFSET ?",
                    REFERRAL_COLUMNS
                ))?;
                let rows = stmt.query_map(params![sql_count(limit), sql_count(offset)], Self::row_to_referral)?;
                rows.collect()
            }
        }
    }

    /// Accept or decline a referral. Only pending referrals change.
    pub fn review_referral(conn: &Connection, id: Uuid, decision: &ReferralDecision) -> DbResult<ReviewOutcome> {
        let changed = conn.execute(
            "UPDATE ai_expert_referrals SET status = ?, decline_reason = ?, reviewed_at = ? WHERE id = ? AND status = 'pending'",
            params![
                decision.status().as_str(),
                decision.reason(),
                Utc::now().to_rfc3339(),
                id.to_string()
            ],
        )?;

        match Self::get_referral(conn, id)? {
            Some(referral) if changed > 0 => Ok(ReviewOutcome::Reviewed(referral)),
            Some(referral) => Ok(ReviewOutcome::NotPending(referral)),
            None => Ok(ReviewOutcome::NotFound),
        }
    }

    // --- Export ---

    /// Plain-text transcript, `None` when the consultation does not exist.
    pub fn export_transcript(conn: &Connection, id: Uuid) -> DbResult<Option<String>> {
        let record = match Self::get_consultation(conn, id)? {
            Some(r) => r,
            None => return Ok(None),
        };
        let expert_name = Self::get_expert(conn, record.expert_id)?
            .map(|e| e.name)
            .unwrap_or_else(|| "Unknown expert".to_string());
        let messages = Self::get_messages(conn, id, usize::MAX, 0)?;

        let mut export = String::new();
        export.push_str(&format!("Consultation: {}\n", record.id));
        export.push_str(&format!("Expert: {}\n", expert_name));
        export.push_str(&format!("Patient: {}\n", record.patient_id));
        export.push_str(&format!("Status: {}\n", record.status.as_str()));
        export.push_str(&format!("Severity: {}\n", record.severity));
        export.push_str(&format!("Symptoms: {}\n", record.summary));
        if let Some(assessment) = &record.recommendation {
            export.push_str(&format!("Assessment: {}\n", assessment));
        }
        export.push_str(&format!("Created At: {}\n", record.created_at));
        export.push_str("---\n");

        for m in messages {
            export.push_str(&format!("[{}]: {}\n", m.role.as_str().to_uppercase(), m.content));
            export.push_str("---\n");
        }

        Ok(Some(export))
    }
}

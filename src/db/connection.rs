use crate::config::DatabaseConfig;
use duckdb::{Connection, Result as DbResult};
use std::sync::{Arc, Mutex};
use tracing::info;

pub type DbPool = Arc<Mutex<Connection>>;

// Timestamps are RFC 3339 text written by the application.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ai_experts (
    id VARCHAR PRIMARY KEY,
    name VARCHAR NOT NULL,
    specialty VARCHAR NOT NULL,
    description VARCHAR NOT NULL DEFAULT '',
    capabilities VARCHAR NOT NULL DEFAULT '[]',
    created_at VARCHAR NOT NULL
);

CREATE TABLE IF NOT EXISTS ai_consultations (
    id VARCHAR PRIMARY KEY,
    expert_id VARCHAR NOT NULL,
    patient_id VARCHAR NOT NULL,
    status VARCHAR NOT NULL,
    symptoms VARCHAR NOT NULL DEFAULT '[]',
    summary VARCHAR NOT NULL DEFAULT '',
    severity VARCHAR NOT NULL DEFAULT 'low',
    recommendation VARCHAR,
    referral_available BOOLEAN NOT NULL DEFAULT FALSE,
    referred_to_doctor BOOLEAN NOT NULL DEFAULT FALSE,
    created_at VARCHAR NOT NULL,
    updated_at VARCHAR NOT NULL
);

CREATE TABLE IF NOT EXISTS ai_consultation_messages (
    id VARCHAR PRIMARY KEY,
    consultation_id VARCHAR NOT NULL,
    seq INTEGER NOT NULL,
    role VARCHAR NOT NULL,
    content TEXT NOT NULL,
    created_at VARCHAR NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_consultation_messages ON ai_consultation_messages(consultation_id, seq);

CREATE TABLE IF NOT EXISTS ai_expert_referrals (
    id VARCHAR PRIMARY KEY,
    consultation_id VARCHAR NOT NULL,
    patient_id VARCHAR NOT NULL,
    symptoms VARCHAR NOT NULL,
    assessment VARCHAR NOT NULL,
    severity VARCHAR NOT NULL,
    status VARCHAR NOT NULL DEFAULT 'pending',
    decline_reason VARCHAR,
    created_at VARCHAR NOT NULL,
    reviewed_at VARCHAR
);
"#;

pub fn get_connection(config: &DatabaseConfig) -> DbResult<DbPool> {
    info!("Connecting to DuckDB at {}", config.path);
    let conn = if config.path == ":memory:" {
        Connection::open_in_memory()?
    } else {
        Connection::open(&config.path)?
    };

    init_schema(&conn)?;

    Ok(Arc::new(Mutex::new(conn)))
}

/// Fresh in-memory database with the schema applied.
pub fn open_in_memory() -> DbResult<DbPool> {
    get_connection(&DatabaseConfig {
        path: ":memory:".to_string(),
    })
}

fn init_schema(conn: &Connection) -> DbResult<()> {
    info!("Initializing database schema");
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Patient,
    Doctor,
    Admin,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiKeyConfig {
    pub key: String,
    pub user_id: String,
    pub role: UserRole,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub api_keys: Vec<ApiKeyConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConsultationConfig {
    #[serde(default = "default_assessment_threshold")]
    pub assessment_threshold: usize,
    /// Pause before the assistant reply is composed.
    #[serde(default = "default_reply_delay_ms")]
    pub reply_delay_ms: u64,
    #[serde(default = "default_sync_retry_attempts")]
    pub sync_retry_attempts: u32,
    #[serde(default = "default_sync_retry_backoff_ms")]
    pub sync_retry_backoff_ms: u64,
    /// Active sessions untouched this long are dropped from memory. 0 disables eviction.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for ConsultationConfig {
    fn default() -> Self {
        Self {
            assessment_threshold: default_assessment_threshold(),
            reply_delay_ms: default_reply_delay_ms(),
            sync_retry_attempts: default_sync_retry_attempts(),
            sync_retry_backoff_ms: default_sync_retry_backoff_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl ConsultationConfig {
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.assessment_threshold == 0 {
            return Err(config::ConfigError::Message(
                "consultation.assessment_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_assessment_threshold() -> usize {
    crate::triage::session::ASSESSMENT_THRESHOLD
}

fn default_reply_delay_ms() -> u64 {
    1500
}

fn default_sync_retry_attempts() -> u32 {
    3
}

fn default_sync_retry_backoff_ms() -> u64 {
    200
}

fn default_idle_timeout_secs() -> u64 {
    1800
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExpertSeed {
    pub name: String,
    pub specialty: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub consultation: ConsultationConfig,
    #[serde(default)]
    pub experts: Vec<ExpertSeed>,
}

impl AppConfig {
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("MEDICHAT").separator("__"))
            .build()?;

        let mut app_config: AppConfig = settings.try_deserialize()?;

        // Expand environment variables if present like ${MEDICHAT_PATIENT_KEY}
        app_config.server.host = expand_env(&app_config.server.host);
        app_config.database.path = expand_env(&app_config.database.path);
        for entry in app_config.auth.api_keys.iter_mut() {
            entry.key = expand_env(&entry.key);
        }

        app_config.consultation.validate()?;

        Ok(app_config)
    }

    /// Look up the identity bound to an API key.
    pub fn identity_for_key(&self, token: &str) -> Option<&ApiKeyConfig> {
        self.auth
            .api_keys
            .iter()
            .find(|entry| !entry.key.is_empty() && entry.key == token)
    }
}

fn expand_env(val: &str) -> String {
    if val.starts_with("${") && val.ends_with('}') {
        let var_name = &val[2..val.len() - 1];
        std::env::var(var_name).unwrap_or_default()
    } else {
        val.to_string()
    }
}

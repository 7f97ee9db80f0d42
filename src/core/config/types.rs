use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Settings {
    pub(super) runtime: RuntimeSettings,
    pub(super) database: DatabaseSettings,
    pub(super) exam: ExamSettings,
    pub(super) telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub postgres_server: String,
    pub postgres_port: u16,
    pub postgres_user: String,
    pub postgres_password: String,
    pub postgres_db: String,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub migrations_dir: String,
}

#[derive(Debug, Clone)]
pub struct ExamSettings {
    pub score_scale: f64,
    pub max_codes_per_exam: u32,
    pub submit_grace_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub sweep_batch_size: i64,
    pub violation_details_max_chars: usize,
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub log_level: String,
    pub json: bool,
    pub prometheus_enabled: bool,
    pub prometheus_listen: String,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub environment: Environment,
    pub strict_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Test => "test",
        }
    }

    pub(super) fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("missing required secret for {0}")]
    MissingSecret(&'static str),
}

impl DatabaseSettings {
    pub fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }

        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.postgres_user,
            self.postgres_password,
            self.postgres_server,
            self.postgres_port,
            self.postgres_db
        )
    }
}

impl Default for ExamSettings {
    fn default() -> Self {
        Self {
            score_scale: 10.0,
            max_codes_per_exam: 50,
            submit_grace_seconds: 30,
            sweep_interval_seconds: 60,
            sweep_batch_size: 200,
            violation_details_max_chars: 2000,
        }
    }
}

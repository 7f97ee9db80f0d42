use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_environment, parse_f64, parse_i64, parse_u16,
    parse_u32, parse_u64,
};
use super::types::{
    ConfigError, DatabaseSettings, ExamSettings, RuntimeSettings, Settings, TelemetrySettings,
};

const MAX_SUBMIT_GRACE_SECONDS: u64 = 3600;

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            parse_environment(env_optional("PICRETE_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("PICRETE_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "picretesuperuser");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "picrete_db");
        let database_url = env_optional("DATABASE_URL");
        let max_connections = parse_u32(
            "DATABASE_MAX_CONNECTIONS",
            env_or_default("DATABASE_MAX_CONNECTIONS", "20"),
        )?;
        let migrations_dir = env_or_default("PICRETE_MIGRATIONS_DIR", "migrations");

        let score_scale = parse_f64("EXAM_SCORE_SCALE", env_or_default("EXAM_SCORE_SCALE", "10"))?;
        let max_codes_per_exam = parse_u32(
            "EXAM_MAX_CODES_PER_EXAM",
            env_or_default("EXAM_MAX_CODES_PER_EXAM", "50"),
        )?;
        let submit_grace_seconds = parse_u64(
            "EXAM_SUBMIT_GRACE_SECONDS",
            env_or_default("EXAM_SUBMIT_GRACE_SECONDS", "30"),
        )?;
        let sweep_interval_seconds = parse_u64(
            "EXAM_SWEEP_INTERVAL_SECONDS",
            env_or_default("EXAM_SWEEP_INTERVAL_SECONDS", "60"),
        )?;
        let sweep_batch_size =
            parse_i64("EXAM_SWEEP_BATCH_SIZE", env_or_default("EXAM_SWEEP_BATCH_SIZE", "200"))?;
        let violation_details_max_chars = parse_u64(
            "EXAM_VIOLATION_DETAILS_MAX_CHARS",
            env_or_default("EXAM_VIOLATION_DETAILS_MAX_CHARS", "2000"),
        )? as usize;

        let log_level = env_or_default("PICRETE_LOG_LEVEL", "info");
        let json =
            env_optional("PICRETE_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_listen = env_or_default("PROMETHEUS_LISTEN", "0.0.0.0:9100");

        let settings = Self {
            runtime: RuntimeSettings { environment, strict_config },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
                max_connections,
                migrations_dir,
            },
            exam: ExamSettings {
                score_scale,
                max_codes_per_exam,
                submit_grace_seconds,
                sweep_interval_seconds,
                sweep_batch_size,
                violation_details_max_chars,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled, prometheus_listen },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub fn exam(&self) -> &ExamSettings {
        &self.exam
    }

    pub fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    /// Defaults without touching the process environment.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        use super::types::Environment;

        Self {
            runtime: RuntimeSettings { environment: Environment::Test, strict_config: false },
            database: DatabaseSettings {
                postgres_server: "localhost".to_string(),
                postgres_port: 5432,
                postgres_user: "picretesuperuser".to_string(),
                postgres_password: String::new(),
                postgres_db: "picrete_test".to_string(),
                database_url: None,
                max_connections: 5,
                migrations_dir: "migrations".to_string(),
            },
            exam: ExamSettings::default(),
            telemetry: TelemetrySettings {
                log_level: "debug".to_string(),
                json: false,
                prometheus_enabled: false,
                prometheus_listen: "127.0.0.1:9100".to_string(),
            },
        }
    }

    /// Replaces the exam section, keeping everything else loaded from the environment.
    pub fn with_exam(mut self, exam: ExamSettings) -> Result<Self, ConfigError> {
        self.exam = exam;
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.exam.score_scale <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "EXAM_SCORE_SCALE",
                value: self.exam.score_scale.to_string(),
            });
        }

        if self.exam.max_codes_per_exam == 0 {
            return Err(ConfigError::InvalidValue {
                field: "EXAM_MAX_CODES_PER_EXAM",
                value: "0".to_string(),
            });
        }

        if self.exam.submit_grace_seconds > MAX_SUBMIT_GRACE_SECONDS {
            return Err(ConfigError::InvalidValue {
                field: "EXAM_SUBMIT_GRACE_SECONDS",
                value: self.exam.submit_grace_seconds.to_string(),
            });
        }

        if self.exam.sweep_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "EXAM_SWEEP_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.exam.sweep_batch_size <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "EXAM_SWEEP_BATCH_SIZE",
                value: self.exam.sweep_batch_size.to_string(),
            });
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "DATABASE_MAX_CONNECTIONS",
                value: "0".to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[tokio::test]
    async fn with_exam_rejects_zero_scale() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();

        let settings = Settings::load().expect("settings");
        let exam = ExamSettings { score_scale: 0.0, ..ExamSettings::default() };
        let result = settings.with_exam(exam);

        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "EXAM_SCORE_SCALE", .. })
        ));
    }

    #[tokio::test]
    async fn with_exam_caps_submit_grace() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();

        let settings = Settings::load().expect("settings");
        let exam = ExamSettings { submit_grace_seconds: u64::MAX, ..ExamSettings::default() };
        let result = settings.clone().with_exam(exam);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "EXAM_SUBMIT_GRACE_SECONDS", .. })
        ));

        let exam = ExamSettings { submit_grace_seconds: 3600, ..ExamSettings::default() };
        assert!(settings.with_exam(exam).is_ok());
    }

    #[tokio::test]
    async fn load_reads_exam_overrides() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("EXAM_SCORE_SCALE", "100");
        std::env::set_var("EXAM_MAX_CODES_PER_EXAM", "7");

        let settings = Settings::load();
        std::env::remove_var("EXAM_SCORE_SCALE");
        std::env::remove_var("EXAM_MAX_CODES_PER_EXAM");

        let settings = settings.expect("settings");
        assert_eq!(settings.exam().score_scale, 100.0);
        assert_eq!(settings.exam().max_codes_per_exam, 7);
        assert_eq!(settings.exam().submit_grace_seconds, 30);
    }

    #[tokio::test]
    async fn strict_config_requires_database_secret() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("PICRETE_STRICT_CONFIG", "1");
        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("POSTGRES_PASSWORD");

        let result = Settings::load();
        std::env::set_var("PICRETE_STRICT_CONFIG", "0");

        assert!(matches!(result, Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"))));
    }
}

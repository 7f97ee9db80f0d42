mod parsing;
mod settings;
mod types;

pub use types::{
    ConfigError, DatabaseSettings, Environment, ExamSettings, RuntimeSettings, Settings,
    TelemetrySettings,
};

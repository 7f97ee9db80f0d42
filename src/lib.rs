//! Randomized multiple-choice exam engine: per-exam code generation with
//! shuffled questions and options, the student attempt lifecycle, scoring in
//! the shuffled label space, and an anti-cheat violation log.
//!
//! Operations live in [`services`] and take an [`core::state::EngineState`]
//! plus the calling [`services::actor::ActorContext`]. Persistence goes through
//! [`repositories::ExamStore`], with Postgres and in-memory implementations.

pub mod core;
pub mod db;
pub mod errors;
pub mod repositories;
pub mod schemas;
pub mod services;
pub mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::Context;

use crate::core::config::Settings;
use crate::core::state::EngineState;
use crate::core::telemetry;
use crate::core::time::SystemClock;
use crate::repositories::PgStore;
use crate::services::enrollment::PgEnrollment;
use crate::services::notifications::TracingEventSink;

/// Runs the expiry sweeper against Postgres until SIGINT/SIGTERM.
pub async fn run_worker() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await.context("Failed to connect to Postgres")?;
    db::run_migrations(&db_pool, &settings).await.context("Failed to apply migrations")?;

    let state = EngineState::new(
        settings,
        Arc::new(PgStore::new(db_pool.clone())),
        Arc::new(SystemClock),
        Arc::new(PgEnrollment::new(db_pool.clone())),
        Arc::new(TracingEventSink),
    );

    tracing::info!(
        environment = %state.settings().runtime().environment.as_str(),
        sweep_interval_seconds = state.settings().exam().sweep_interval_seconds,
        "Exam engine worker started"
    );

    let result = tasks::scheduler::run(state).await;

    db_pool.close().await;
    tracing::info!("Exam engine worker stopped");

    result
}

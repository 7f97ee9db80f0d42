use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::db::models::DifficultyConfig;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GenerateCodesRequest {
    #[validate(range(min = 1, message = "count must be positive"))]
    pub count: u32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SuggestConfigRequest {
    #[serde(alias = "timeLimitMinutes")]
    #[validate(range(min = 1, message = "time_limit_minutes must be positive"))]
    pub time_limit_minutes: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuggestedConfig {
    pub total_questions: u32,
    pub difficulty_config: DifficultyConfig,
    pub estimated_minutes: f64,
}

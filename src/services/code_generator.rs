use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use sqlx::types::Json;
use time::OffsetDateTime;
use uuid::Uuid;
use validator::Validate;

use crate::core::state::EngineState;
use crate::db::models::{DifficultyConfig, Exam, ExamCode};
use crate::db::types::{Difficulty, ExamStatus};
use crate::errors::ExamError;
use crate::repositories::StoreError;
use crate::schemas::exam_code::{GenerateCodesRequest, SuggestConfigRequest, SuggestedConfig};
use crate::services::actor::ActorContext;
use crate::services::question_bank::QuestionBankIndex;
use crate::services::shuffle::ShuffleMap;

/// Percent of questions per tier when an exam has no explicit config.
const DEFAULT_SPLIT_PERCENT: [(Difficulty, u32); 3] =
    [(Difficulty::Easy, 50), (Difficulty::Medium, 30), (Difficulty::Hard, 20)];

fn minutes_per_question(tier: Difficulty) -> f64 {
    match tier {
        Difficulty::Easy => 1.0,
        Difficulty::Medium => 1.5,
        Difficulty::Hard => 2.5,
    }
}

/// 50/30/20 split with largest-remainder rounding; ties go to the easier tier.
pub fn default_split(total: u32) -> DifficultyConfig {
    let mut counts = [0u32; 3];
    let mut remainders = [(0u32, 0usize); 3];

    for (slot, (_, percent)) in DEFAULT_SPLIT_PERCENT.iter().enumerate() {
        let exact = total * percent;
        counts[slot] = exact / 100;
        remainders[slot] = (exact % 100, slot);
    }

    let assigned: u32 = counts.iter().sum();
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    for (_, slot) in remainders.iter().take((total - assigned) as usize) {
        counts[*slot] += 1;
    }

    DifficultyConfig::new(counts[0], counts[1], counts[2])
}

/// The tier quotas codes for `exam` must satisfy.
pub fn resolve_config(exam: &Exam) -> Result<DifficultyConfig, ExamError> {
    let total = u32::try_from(exam.total_questions)
        .ok()
        .filter(|total| *total > 0)
        .ok_or_else(|| ExamError::Validation("total_questions must be positive".to_string()))?;

    match exam.difficulty_config.as_ref().map(|config| config.0) {
        Some(config) if config.total() == total => Ok(config),
        Some(config) => Err(ExamError::Validation(format!(
            "difficulty_config sums to {} but total_questions is {total}",
            config.total()
        ))),
        None => Ok(default_split(total)),
    }
}

/// Recommends a question count for a time limit, weighting harder tiers as slower.
pub fn suggest_config(request: &SuggestConfigRequest) -> Result<SuggestedConfig, ExamError> {
    request.validate()?;

    let average: f64 = DEFAULT_SPLIT_PERCENT
        .iter()
        .map(|(tier, percent)| minutes_per_question(*tier) * f64::from(*percent) / 100.0)
        .sum();
    let total = ((f64::from(request.time_limit_minutes) / average).floor() as u32).max(1);
    let difficulty_config = default_split(total);
    let estimated_minutes = difficulty_config
        .tiers()
        .map(|(tier, count)| minutes_per_question(tier) * f64::from(count))
        .sum();

    Ok(SuggestedConfig { total_questions: total, difficulty_config, estimated_minutes })
}

fn code_label(ordinal: u32) -> String {
    format!("{ordinal:03}")
}

/// Builds `count` codes in memory. Nothing is drawn unless every tier has capacity.
pub fn build_codes(
    exam: &Exam,
    config: &DifficultyConfig,
    index: &QuestionBankIndex,
    count: u32,
    rng: &mut impl Rng,
    now: OffsetDateTime,
) -> Result<Vec<ExamCode>, ExamError> {
    index.ensure_capacity(config)?;

    let mut codes = Vec::with_capacity(count as usize);
    for ordinal in 1..=count {
        let mut order = Vec::with_capacity(config.total() as usize);
        for (tier, needed) in config.tiers() {
            order.extend(index.sample(tier, needed, rng)?.into_iter().map(|q| q.question_id));
        }
        order.shuffle(rng);

        let mut shuffle_map = BTreeMap::new();
        for question_id in &order {
            let question = index.question(question_id).ok_or_else(|| {
                StoreError::Invariant(format!("sampled question {question_id} missing from index"))
            })?;
            shuffle_map.insert(question_id.clone(), ShuffleMap::random(&question.options.0, rng));
        }

        codes.push(ExamCode {
            id: Uuid::new_v4().to_string(),
            exam_id: exam.id.clone(),
            code: code_label(ordinal),
            question_order: Json(order),
            option_shuffle_map: Json(shuffle_map),
            created_at: now,
        });
    }

    Ok(codes)
}

/// Replaces every code of an exam with `request.count` fresh ones, all or nothing.
pub async fn generate_codes(
    state: &EngineState,
    actor: &ActorContext,
    exam_id: &str,
    request: GenerateCodesRequest,
) -> Result<Vec<ExamCode>, ExamError> {
    request.validate()?;
    let max_codes = state.settings().exam().max_codes_per_exam;
    if request.count > max_codes {
        return Err(ExamError::Validation(format!("count must not exceed {max_codes}")));
    }

    let now = state.clock().now();
    let mut tx = state.store().begin().await?;
    tx.lock_exam(exam_id).await?;

    let exam = tx.find_exam(exam_id).await?.ok_or(ExamError::NotFound("Exam"))?;
    actor.require_manager(&exam)?;
    if exam.status == ExamStatus::Closed {
        return Err(ExamError::Validation("Codes cannot be generated for a closed exam".into()));
    }

    let submissions = tx.count_exam_submissions(exam_id).await?;
    if submissions > 0 {
        return Err(ExamError::RegenerationBlocked { exam_id: exam_id.to_string(), submissions });
    }

    let config = resolve_config(&exam)?;
    let index = QuestionBankIndex::load(&mut *tx, &exam.question_bank_id, &exam.chapter_ids.0)
        .await?;
    let mut rng = StdRng::seed_from_u64(rand::random());
    let codes = build_codes(&exam, &config, &index, request.count, &mut rng, now)?;

    let replaced = tx.delete_codes(exam_id).await?;
    tx.insert_codes(&codes).await?;
    tx.commit().await?;

    metrics::counter!("exam_codes_generated_total").increment(codes.len() as u64);
    tracing::info!(
        exam_id,
        actor_id = %actor.id,
        count = codes.len(),
        replaced,
        easy = config.easy,
        medium = config.medium,
        hard = config.hard,
        "Exam codes generated"
    );

    Ok(codes)
}

use std::collections::{BTreeMap, HashMap};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::core::state::EngineState;
use crate::db::models::{DifficultyConfig, Question};
use crate::db::types::Difficulty;
use crate::errors::ExamError;
use crate::repositories::{StoreError, StoreTx};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledQuestion {
    pub question_id: String,
    pub chapter_id: String,
}

/// Read-only view over a bank's questions grouped by difficulty tier.
#[derive(Debug, Clone, Default)]
pub struct QuestionBankIndex {
    questions: HashMap<String, Question>,
    tiers: BTreeMap<Difficulty, Vec<String>>,
}

impl QuestionBankIndex {
    pub fn from_questions(questions: impl IntoIterator<Item = Question>) -> Self {
        let mut index = Self::default();
        for question in questions {
            index.tiers.entry(question.difficulty).or_default().push(question.id.clone());
            index.questions.insert(question.id.clone(), question);
        }
        for ids in index.tiers.values_mut() {
            ids.sort();
        }
        index
    }

    pub(crate) async fn load(
        tx: &mut dyn StoreTx,
        bank_id: &str,
        chapter_ids: &[String],
    ) -> Result<Self, StoreError> {
        let questions = tx.list_bank_questions(bank_id, chapter_ids).await?;
        Ok(Self::from_questions(questions))
    }

    pub fn available(&self, tier: Difficulty) -> u32 {
        self.tiers.get(&tier).map_or(0, |ids| ids.len() as u32)
    }

    /// Every tier is present, possibly with zero questions.
    pub fn count_by_difficulty(&self) -> BTreeMap<Difficulty, u32> {
        Difficulty::ALL.into_iter().map(|tier| (tier, self.available(tier))).collect()
    }

    pub fn question(&self, id: &str) -> Option<&Question> {
        self.questions.get(id)
    }

    /// Fails on the first tier, in easy/medium/hard order, that cannot meet its quota.
    pub fn ensure_capacity(&self, config: &DifficultyConfig) -> Result<(), ExamError> {
        for (tier, needed) in config.tiers() {
            let available = self.available(tier);
            if needed > available {
                return Err(ExamError::InsufficientBankCapacity { tier, needed, available });
            }
        }
        Ok(())
    }

    /// Draws `n` distinct questions of one tier, uniformly.
    pub fn sample(
        &self,
        tier: Difficulty,
        n: u32,
        rng: &mut impl Rng,
    ) -> Result<Vec<SampledQuestion>, ExamError> {
        let available = self.available(tier);
        if n > available {
            return Err(ExamError::InsufficientBankCapacity { tier, needed: n, available });
        }
        let Some(ids) = self.tiers.get(&tier) else {
            return Ok(Vec::new());
        };

        Ok(ids
            .choose_multiple(rng, n as usize)
            .filter_map(|id| self.questions.get(id))
            .map(|question| SampledQuestion {
                question_id: question.id.clone(),
                chapter_id: question.chapter_id.clone(),
            })
            .collect())
    }
}

/// Tier counts for a whole bank, ignoring chapter filters.
pub async fn count_by_difficulty(
    state: &EngineState,
    bank_id: &str,
) -> Result<BTreeMap<Difficulty, u32>, ExamError> {
    let mut tx = state.store().begin().await?;
    let index = QuestionBankIndex::load(&mut *tx, bank_id, &[]).await?;
    Ok(index.count_by_difficulty())
}

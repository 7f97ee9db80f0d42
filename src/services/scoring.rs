use std::collections::{BTreeMap, HashMap};

use crate::db::models::{ExamCode, Question};
use crate::schemas::submission::QuestionResult;
use crate::services::shuffle::{self, OptionLabel};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub correct_count: i32,
    pub wrong_count: i32,
    pub unanswered_count: i32,
    pub total_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Correct,
    Wrong,
    Unanswered,
}

pub(crate) fn index_questions(questions: Vec<Question>) -> HashMap<String, Question> {
    questions.into_iter().map(|question| (question.id.clone(), question)).collect()
}

/// Judges one answer in the code's shuffled frame against the canonical key.
fn judge(
    code: &ExamCode,
    question_id: &str,
    question: Option<&Question>,
    answer: Option<&OptionLabel>,
) -> Outcome {
    let Some(answer) = answer else {
        return Outcome::Unanswered;
    };
    let Some(question) = question else {
        tracing::warn!(
            exam_code_id = %code.id,
            question_id,
            "Answered question is missing from the bank; counted as wrong"
        );
        return Outcome::Wrong;
    };

    let stored = code.shuffle_for(question_id);
    if stored.is_none() {
        tracing::warn!(
            exam_code_id = %code.id,
            question_id,
            "No shuffle map for question; scoring with identity mapping"
        );
    }
    let map = shuffle::effective_map(question, stored);

    match shuffle::to_canonical(map, answer) {
        Some(canonical) if canonical == question.correct_answer => Outcome::Correct,
        Some(_) => Outcome::Wrong,
        None => {
            tracing::warn!(
                exam_code_id = %code.id,
                question_id,
                answer = %answer,
                "Stored answer is outside the question's label set; counted as wrong"
            );
            Outcome::Wrong
        }
    }
}

fn round_score(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Pure function of the code, the answers and the answer key.
pub fn score(
    code: &ExamCode,
    answers: &BTreeMap<String, OptionLabel>,
    questions: &HashMap<String, Question>,
    scale: f64,
) -> ScoreBreakdown {
    let mut breakdown =
        ScoreBreakdown { correct_count: 0, wrong_count: 0, unanswered_count: 0, total_score: 0.0 };

    for question_id in &code.question_order.0 {
        match judge(code, question_id, questions.get(question_id), answers.get(question_id)) {
            Outcome::Correct => breakdown.correct_count += 1,
            Outcome::Wrong => breakdown.wrong_count += 1,
            Outcome::Unanswered => breakdown.unanswered_count += 1,
        }
    }

    let total = code.question_order.0.len();
    if total > 0 {
        breakdown.total_score =
            round_score(scale * f64::from(breakdown.correct_count) / total as f64);
    }
    breakdown
}

/// Question-level detail with the correct answer translated into the code's frame.
pub fn question_results(
    code: &ExamCode,
    answers: &BTreeMap<String, OptionLabel>,
    questions: &HashMap<String, Question>,
) -> Vec<QuestionResult> {
    code.question_order
        .0
        .iter()
        .enumerate()
        .map(|(position, question_id)| {
            let question = questions.get(question_id);
            let answer = answers.get(question_id);
            let outcome = judge(code, question_id, question, answer);

            let (content, options, correct_answer, explanation) = match question {
                Some(question) => {
                    let map = shuffle::effective_map(question, code.shuffle_for(question_id));
                    (
                        question.content.clone(),
                        shuffle::shuffled_options(question, map),
                        shuffle::to_shuffled(map, &question.correct_answer),
                        question.explanation.clone(),
                    )
                }
                None => (String::new(), Vec::new(), None, None),
            };

            QuestionResult {
                question_id: question_id.clone(),
                position: position + 1,
                content,
                options,
                student_answer: answer.cloned(),
                correct_answer,
                is_correct: outcome == Outcome::Correct,
                explanation,
            }
        })
        .collect()
}

// src/services/scoring.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    error::AppError,
    models::{
        attempt::AnswerInput,
        question::{Choice, Question, QuestionType},
    },
};

/// Submitted selections keyed by question id. Choice ids are a set.
pub type Selections = BTreeMap<i64, BTreeSet<i64>>;

/// Answer key for one question: every choice it owns and the correct subset.
#[derive(Debug, Clone)]
pub struct QuestionKey {
    pub id: i64,
    pub question_type: QuestionType,
    pub choices: BTreeSet<i64>,
    pub correct: BTreeSet<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreOutcome {
    pub score: i32,
    pub total_questions: usize,
}

/// Collapses request answers into a set per question.
/// A question listed twice keeps the last entry.
pub fn collect_selections(answers: &[AnswerInput]) -> Selections {
    let mut selections = Selections::new();
    for answer in answers {
        selections.insert(
            answer.question_id,
            answer.choice_ids.iter().copied().collect(),
        );
    }
    selections
}

/// Groups choice rows under their questions.
pub fn build_answer_key(
    questions: Vec<Question>,
    choices: Vec<Choice>,
) -> Result<Vec<QuestionKey>, AppError> {
    let mut keys = Vec::with_capacity(questions.len());
    let mut index = HashMap::with_capacity(questions.len());

    for q in questions {
        index.insert(q.id, keys.len());
        keys.push(QuestionKey {
            id: q.id,
            question_type: q.question_type.parse()?,
            choices: BTreeSet::new(),
            correct: BTreeSet::new(),
        });
    }

    for c in choices {
        if let Some(&i) = index.get(&c.question_id) {
            keys[i].choices.insert(c.id);
            if c.is_correct {
                keys[i].correct.insert(c.id);
            }
        }
    }

    Ok(keys)
}

/// Decides whether one question was answered correctly.
pub fn is_correct(key: &QuestionKey, submitted: &BTreeSet<i64>) -> bool {
    match key.question_type {
        // A single-choice question with zero or several correct choices is
        // malformed and can never be answered correctly.
        QuestionType::SingleChoice => {
            key.correct.len() == 1
                && submitted.len() == 1
                && submitted.iter().all(|id| key.correct.contains(id))
        }
        QuestionType::MultipleChoice => submitted == &key.correct,
    }
}

/// Checks the submission against the quiz and counts correct questions.
///
/// Fails the whole submission when a question is not part of the quiz or a
/// choice does not belong to its question. Unanswered questions score zero.
pub fn score_submission(
    questions: &[QuestionKey],
    selections: &Selections,
) -> Result<ScoreOutcome, AppError> {
    if questions.is_empty() {
        return Err(AppError::BadRequest("Quiz has no questions".to_string()));
    }

    let by_id: HashMap<i64, &QuestionKey> = questions.iter().map(|q| (q.id, q)).collect();

    for (question_id, submitted) in selections {
        let key = by_id.get(question_id).ok_or_else(|| {
            AppError::BadRequest(format!(
                "Question {} does not belong to this quiz",
                question_id
            ))
        })?;

        if let Some(stray) = submitted.iter().find(|id| !key.choices.contains(id)) {
            return Err(AppError::BadRequest(format!(
                "Choice {} does not belong to question {}",
                stray, question_id
            )));
        }
    }

    let empty = BTreeSet::new();
    let score = questions
        .iter()
        .filter(|key| is_correct(key, selections.get(&key.id).unwrap_or(&empty)))
        .count();

    Ok(ScoreOutcome {
        score: score as i32,
        total_questions: questions.len(),
    })
}

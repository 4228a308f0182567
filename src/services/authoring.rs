// src/services/authoring.rs

use crate::{
    config::{MAX_CHOICES, MIN_CHOICES},
    error::AppError,
    models::question::{ChoiceInput, QuestionType},
};

const MAX_CHOICE_LEN: usize = 500;

/// A choice that passed validation, ready to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceDraft {
    pub text: String,
    pub is_correct: bool,
}

/// Trims question text and rejects blank text.
pub fn normalize_question_text(text: &str) -> Result<String, AppError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("Question text cannot be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

/// Validates the choice list of a question being created or updated.
///
/// Blank choices are dropped after trimming. At least two must remain and at
/// least one must be correct; single-choice questions need exactly one.
pub fn validate_choices(
    question_type: QuestionType,
    choices: &[ChoiceInput],
) -> Result<Vec<ChoiceDraft>, AppError> {
    let drafts: Vec<ChoiceDraft> = choices
        .iter()
        .filter_map(|c| {
            let text = c.text.trim();
            (!text.is_empty()).then(|| ChoiceDraft {
                text: text.to_string(),
                is_correct: c.is_correct,
            })
        })
        .collect();

    if drafts.len() < MIN_CHOICES {
        return Err(AppError::BadRequest(format!(
            "A question needs at least {} non-empty choices",
            MIN_CHOICES
        )));
    }

    if drafts.len() > MAX_CHOICES {
        return Err(AppError::BadRequest(format!(
            "A question can have at most {} choices",
            MAX_CHOICES
        )));
    }

    if drafts.iter().any(|d| d.text.chars().count() > MAX_CHOICE_LEN) {
        return Err(AppError::BadRequest(format!(
            "Choice text cannot exceed {} characters",
            MAX_CHOICE_LEN
        )));
    }

    let correct = drafts.iter().filter(|d| d.is_correct).count();
    if correct == 0 {
        return Err(AppError::BadRequest(
            "At least one choice must be marked correct".to_string(),
        ));
    }
    if question_type == QuestionType::SingleChoice && correct != 1 {
        return Err(AppError::BadRequest(
            "A single-choice question must have exactly one correct choice".to_string(),
        ));
    }

    Ok(drafts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choice(text: &str, is_correct: bool) -> ChoiceInput {
        ChoiceInput {
            text: text.to_string(),
            is_correct,
        }
    }

    #[test]
    fn blank_choices_are_dropped_and_trimmed() {
        let drafts = validate_choices(
            QuestionType::SingleChoice,
            &[choice("  Paris ", true), choice("   ", false), choice("Lyon", false)],
        )
        .unwrap();

        assert_eq!(
            drafts,
            vec![
                ChoiceDraft { text: "Paris".into(), is_correct: true },
                ChoiceDraft { text: "Lyon".into(), is_correct: false },
            ]
        );
    }

    #[test]
    fn needs_two_non_empty_choices() {
        let result = validate_choices(
            QuestionType::MultipleChoice,
            &[choice("Only", true), choice(" ", false)],
        );

        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn needs_a_correct_choice() {
        let result = validate_choices(
            QuestionType::MultipleChoice,
            &[choice("A", false), choice("B", false)],
        );

        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn blank_correct_choice_does_not_count() {
        let result = validate_choices(
            QuestionType::MultipleChoice,
            &[choice("A", false), choice("B", false), choice("  ", true)],
        );

        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn single_choice_needs_exactly_one_correct() {
        let result = validate_choices(
            QuestionType::SingleChoice,
            &[choice("A", true), choice("B", true)],
        );
        assert!(matches!(result, Err(AppError::BadRequest(_))));

        let multi = validate_choices(
            QuestionType::MultipleChoice,
            &[choice("A", true), choice("B", true)],
        );
        assert!(multi.is_ok());
    }

    #[test]
    fn caps_choice_count() {
        let mut choices: Vec<ChoiceInput> = (0..MAX_CHOICES)
            .map(|i| choice(&format!("Option {}", i), i == 0))
            .collect();
        assert!(validate_choices(QuestionType::SingleChoice, &choices).is_ok());

        choices.push(choice("One too many", false));
        assert!(validate_choices(QuestionType::SingleChoice, &choices).is_err());
    }

    #[test]
    fn question_text_is_trimmed() {
        assert_eq!(normalize_question_text("  2 + 2? ").unwrap(), "2 + 2?");
        assert!(normalize_question_text("   ").is_err());
    }
}

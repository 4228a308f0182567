// src/models/question.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

use crate::error::AppError;

/// How many choices a question accepts.
/// Stored as TEXT in the 'type' column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    SingleChoice,
    MultipleChoice,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::SingleChoice => "SINGLE_CHOICE",
            QuestionType::MultipleChoice => "MULTIPLE_CHOICE",
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SINGLE_CHOICE" => Ok(QuestionType::SingleChoice),
            "MULTIPLE_CHOICE" => Ok(QuestionType::MultipleChoice),
            other => Err(AppError::InternalServerError(format!(
                "Unknown question type in database: {}",
                other
            ))),
        }
    }
}

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, FromRow)]
pub struct Question {
    pub id: i64,
    pub quiz_id: i64,

    /// Mapped from the database column 'type' since `type` is a reserved keyword in Rust.
    #[sqlx(rename = "type")]
    pub question_type: String,

    pub text: String,

    /// Display order, unique within the quiz.
    pub position: i32,
}

/// Represents the 'choices' table in the database.
#[derive(Debug, Clone, FromRow)]
pub struct Choice {
    pub id: i64,
    pub question_id: i64,
    pub text: String,
    pub is_correct: bool,
    pub position: i32,
}

/// Choice as shown to quiz takers (correctness omitted).
#[derive(Debug, Serialize)]
pub struct PublicChoice {
    pub id: i64,
    pub text: String,
    pub order: i32,
}

/// Question as shown to quiz takers.
#[derive(Debug, Serialize)]
pub struct PublicQuestion {
    pub id: i64,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub text: String,
    pub order: i32,
    pub choices: Vec<PublicChoice>,
}

/// Choice as shown to admins.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminChoice {
    pub id: i64,
    pub text: String,
    pub is_correct: bool,
    pub order: i32,
}

/// Question as shown to admins.
#[derive(Debug, Serialize)]
pub struct AdminQuestion {
    pub id: i64,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub text: String,
    pub order: i32,
    pub choices: Vec<AdminChoice>,
}

/// A choice as submitted by an admin.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceInput {
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

/// DTO for creating a new question.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[validate(length(min = 1, max = 1000))]
    pub text: String,
    pub choices: Vec<ChoiceInput>,
}

/// DTO for updating a question. Fields are optional;
/// `choices`, when present, replaces the whole choice list.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuestionRequest {
    #[serde(rename = "type")]
    pub question_type: Option<QuestionType>,
    #[validate(length(min = 1, max = 1000))]
    pub text: Option<String>,
    pub choices: Option<Vec<ChoiceInput>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveDirection {
    Up,
    Down,
}

#[derive(Debug, Deserialize)]
pub struct MoveQuestionRequest {
    pub direction: MoveDirection,
}

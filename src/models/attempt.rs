// src/models/attempt.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of an attempt.
///
/// `Graded` is reserved for manual grading; nothing in the service produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
    Graded,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "IN_PROGRESS",
            AttemptStatus::Submitted => "SUBMITTED",
            AttemptStatus::Graded => "GRADED",
        }
    }
}

/// Decodes the TEXT column; unknown values fail the row decode.
impl TryFrom<String> for AttemptStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "IN_PROGRESS" => Ok(AttemptStatus::InProgress),
            "SUBMITTED" => Ok(AttemptStatus::Submitted),
            "GRADED" => Ok(AttemptStatus::Graded),
            other => Err(format!("unknown attempt status '{}'", other)),
        }
    }
}

/// Represents the 'attempts' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub id: i64,
    pub user_id: i64,
    pub quiz_id: i64,

    /// Sequence number scoped to (user, quiz), starting at 1.
    pub attempt_no: i32,

    #[sqlx(try_from = "String")]
    pub status: AttemptStatus,

    pub score: Option<i32>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub submitted_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// One question's selections inside a save/submit request.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerInput {
    pub question_id: i64,
    #[serde(default)]
    pub choice_ids: Vec<i64>,
}

/// Body shared by `POST /quiz/save` and `POST /quiz/submit`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRequest {
    pub quiz_id: i64,

    /// The attempt the client believes it is working on.
    pub attempt_id: Option<i64>,

    #[serde(default)]
    pub answers: Vec<AnswerInput>,
}

/// Query parameters for `GET /quiz/attempts`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptListParams {
    pub quiz_id: i64,
}

/// Flattened (question, choice) row read back from 'answers' / 'answer_choices'.
#[derive(Debug, FromRow)]
pub struct SelectionRow {
    pub question_id: i64,
    pub choice_id: Option<i64>,
}

/// An attempt together with its saved selections.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptDetail {
    #[serde(flatten)]
    pub attempt: Attempt,
    pub answers: Vec<AnswerInput>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_decodes_from_column_text() {
        for status in [
            AttemptStatus::InProgress,
            AttemptStatus::Submitted,
            AttemptStatus::Graded,
        ] {
            assert_eq!(AttemptStatus::try_from(status.as_str().to_string()), Ok(status));
        }
        assert!(AttemptStatus::try_from("DRAFT".to_string()).is_err());
    }

    #[test]
    fn status_serializes_like_the_column() {
        let json = serde_json::to_value(AttemptStatus::InProgress).unwrap();
        assert_eq!(json, "IN_PROGRESS");
    }
}

// src/models/quiz.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'quizzes' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: i64,
    pub title: String,
    pub description: String,

    /// Unpublished quizzes are only visible to admins.
    pub is_published: bool,

    pub time_limit_minutes: Option<i32>,
    pub category_id: Option<i64>,

    /// The admin who authored the quiz.
    pub owner_id: i64,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Row for quiz listings, with the question count joined in.
#[derive(Debug, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSummary {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub is_published: bool,
    pub time_limit_minutes: Option<i32>,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub question_count: i64,
}

/// Query parameters for `GET /quizzes`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizListParams {
    pub category_id: Option<i64>,
}

/// Query parameters for `GET /quiz?id=`.
#[derive(Debug, Deserialize)]
pub struct QuizIdParams {
    pub id: i64,
}

/// DTO for creating a new quiz.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuizRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 5000))]
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_published: bool,
    #[validate(range(min = 1, max = 1440))]
    pub time_limit_minutes: Option<i32>,
    pub category_id: Option<i64>,
}

/// DTO for updating a quiz. Fields are optional.
///
/// `timeLimitMinutes` and `categoryId` can be cleared with `clearTimeLimit`
/// and `clearCategory`, since JSON `null` and absence are indistinguishable here.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQuizRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub is_published: Option<bool>,
    #[validate(range(min = 1, max = 1440))]
    pub time_limit_minutes: Option<i32>,
    #[serde(default)]
    pub clear_time_limit: bool,
    pub category_id: Option<i64>,
    #[serde(default)]
    pub clear_category: bool,
}

impl UpdateQuizRequest {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.is_published.is_none()
            && self.time_limit_minutes.is_none()
            && !self.clear_time_limit
            && self.category_id.is_none()
            && !self.clear_category
    }
}

// src/handlers/quiz.rs

use axum::{
    Extension, Json,
    extract::State,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;

use crate::{
    error::AppError,
    models::{
        category::Category,
        quiz::{QuizIdParams, QuizListParams, QuizSummary},
    },
    services::quizzes::{fetch_choices, fetch_questions, fetch_visible_quiz, public_questions},
    utils::{extract::AppQuery, jwt::Claims},
};

/// Lists all categories, alphabetically.
pub async fn list_categories(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let categories = sqlx::query_as::<_, Category>(
        "SELECT id, name, created_at FROM categories ORDER BY name",
    )
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list categories: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(json!({ "ok": true, "categories": categories })))
}

/// Lists quizzes visible to the caller, newest first.
///
/// Admins also see unpublished quizzes. Optional `categoryId` filter.
pub async fn list_quizzes(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    AppQuery(params): AppQuery<QuizListParams>,
) -> Result<impl IntoResponse, AppError> {
    let quizzes = sqlx::query_as::<_, QuizSummary>(
        r#"
        SELECT
            q.id, q.title, q.description, q.is_published, q.time_limit_minutes,
            q.category_id, c.name AS category_name,
            (SELECT COUNT(*) FROM questions qs WHERE qs.quiz_id = q.id) AS question_count
        FROM quizzes q
        LEFT JOIN categories c ON c.id = q.category_id
        WHERE (q.is_published OR $1)
          AND ($2::BIGINT IS NULL OR q.category_id = $2)
        ORDER BY q.created_at DESC, q.id DESC
        "#,
    )
    .bind(claims.is_admin())
    .bind(params.category_id)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list quizzes: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(json!({ "ok": true, "quizzes": quizzes })))
}

/// Returns one quiz with its questions and choices, correctness omitted.
pub async fn get_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    AppQuery(params): AppQuery<QuizIdParams>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;

    let quiz = fetch_visible_quiz(&mut conn, params.id, claims.is_admin()).await?;
    let questions = fetch_questions(&mut conn, quiz.id).await?;
    let choices = fetch_choices(&mut conn, quiz.id).await?;

    Ok(Json(json!({
        "ok": true,
        "quiz": quiz,
        "questions": public_questions(questions, choices)?,
    })))
}

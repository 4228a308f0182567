// src/handlers/attempt.rs

use axum::{
    Extension, Json,
    extract::State,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;

use crate::{
    error::AppError,
    models::attempt::{
        AnswerInput, Attempt, AttemptDetail, AttemptListParams, AttemptRequest, SelectionRow,
    },
    services::{
        attempts::{Finalized, save_draft as save_selections, submit_attempt},
        quizzes::{fetch_choices, fetch_questions, fetch_visible_quiz},
        scoring::{build_answer_key, collect_selections, score_submission},
    },
    utils::{
        extract::{AppJson, AppPath, AppQuery},
        jwt::Claims,
    },
};

/// Autosaves draft selections.
///
/// * Resolves (or starts) the caller's in-progress attempt.
/// * Replaces the stored choice set of every question in the payload.
/// * Choice ownership is not checked here; drafts are validated on submit.
pub async fn save_draft(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    AppJson(req): AppJson<AttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let selections = collect_selections(&req.answers);

    let mut tx = pool.begin().await?;

    let quiz = fetch_visible_quiz(&mut *tx, req.quiz_id, claims.is_admin()).await?;
    let attempt =
        save_selections(&mut *tx, user_id, quiz.id, req.attempt_id, &selections).await?;

    tx.commit().await.map_err(|e| {
        tracing::error!("Failed to commit draft save: {:?}", e);
        AppError::from(e)
    })?;

    tracing::debug!(
        "Saved {} answers into attempt {} (user {}, quiz {})",
        selections.len(),
        attempt.id,
        user_id,
        quiz.id
    );

    Ok(Json(json!({
        "ok": true,
        "attemptId": attempt.id,
        "attemptNo": attempt.attempt_no,
    })))
}

/// Grades and finalizes an attempt.
///
/// * Rejects the whole payload if a question or choice is foreign to the quiz.
/// * Scores one point per correctly answered question.
/// * Resolution, answer writes and the status change share one transaction.
pub async fn submit_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    AppJson(req): AppJson<AttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let selections = collect_selections(&req.answers);

    let mut tx = pool.begin().await?;

    let quiz = fetch_visible_quiz(&mut *tx, req.quiz_id, claims.is_admin()).await?;
    let questions = fetch_questions(&mut *tx, quiz.id).await?;
    let choices = fetch_choices(&mut *tx, quiz.id).await?;

    let answer_key = build_answer_key(questions, choices)?;
    let outcome = score_submission(&answer_key, &selections)?;

    let finalized = Finalized {
        score: outcome.score,
        submitted_at: Utc::now(),
    };
    let attempt = submit_attempt(
        &mut *tx,
        user_id,
        quiz.id,
        req.attempt_id,
        &selections,
        finalized,
    )
    .await?;

    tx.commit().await.map_err(|e| {
        tracing::error!("Failed to commit submission: {:?}", e);
        AppError::from(e)
    })?;

    tracing::info!(
        "User {} submitted attempt {} of quiz {}: {}/{}",
        user_id,
        attempt.attempt_no,
        quiz.id,
        outcome.score,
        outcome.total_questions
    );

    Ok(Json(json!({
        "ok": true,
        "attempt": {
            "id": attempt.id,
            "score": attempt.score,
            "attemptNo": attempt.attempt_no,
        },
        "totalQuestions": outcome.total_questions,
    })))
}

/// Lists the caller's attempts at one quiz, latest first.
pub async fn list_attempts(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    AppQuery(params): AppQuery<AttemptListParams>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let attempts = sqlx::query_as::<_, Attempt>(
        r#"
        SELECT id, user_id, quiz_id, attempt_no, status, score, started_at, submitted_at
        FROM attempts
        WHERE user_id = $1 AND quiz_id = $2
        ORDER BY attempt_no DESC
        "#,
    )
    .bind(user_id)
    .bind(params.quiz_id)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list attempts: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(json!({ "ok": true, "attempts": attempts })))
}

/// Returns one of the caller's attempts with its saved selections.
pub async fn get_attempt(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    AppPath(id): AppPath<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let attempt = sqlx::query_as::<_, Attempt>(
        r#"
        SELECT id, user_id, quiz_id, attempt_no, status, score, started_at, submitted_at
        FROM attempts
        WHERE id = $1 AND user_id = $2
        "#,
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Attempt not found".to_string()))?;

    let rows = sqlx::query_as::<_, SelectionRow>(
        r#"
        SELECT a.question_id, ac.choice_id
        FROM answers a
        LEFT JOIN answer_choices ac ON ac.answer_id = a.id
        WHERE a.attempt_id = $1
        ORDER BY a.question_id, ac.choice_id
        "#,
    )
    .bind(attempt.id)
    .fetch_all(&pool)
    .await?;

    let detail = AttemptDetail {
        attempt,
        answers: group_selections(rows),
    };

    Ok(Json(json!({ "ok": true, "attempt": detail })))
}

/// Folds ordered (question, choice) rows into one entry per question.
/// Answers with an empty choice set arrive as a single row with no choice.
fn group_selections(rows: Vec<SelectionRow>) -> Vec<AnswerInput> {
    let mut answers: Vec<AnswerInput> = Vec::new();

    for row in rows {
        let starts_new = answers
            .last()
            .is_none_or(|last| last.question_id != row.question_id);
        if starts_new {
            answers.push(AnswerInput {
                question_id: row.question_id,
                choice_ids: Vec::new(),
            });
        }
        if let (Some(choice_id), Some(last)) = (row.choice_id, answers.last_mut()) {
            last.choice_ids.push(choice_id);
        }
    }

    answers
}

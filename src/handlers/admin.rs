// src/handlers/admin.rs

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use validator::Validate;

use crate::{
    error::{AppError, is_foreign_key_violation, is_unique_violation},
    models::{
        category::{Category, CreateCategoryRequest},
        question::{
            ChoiceInput, CreateQuestionRequest, MoveDirection, MoveQuestionRequest, Question,
            QuestionType, UpdateQuestionRequest,
        },
        quiz::{CreateQuizRequest, QuizSummary, UpdateQuizRequest},
    },
    services::{
        authoring::{ChoiceDraft, normalize_question_text, validate_choices},
        quizzes::{admin_questions, fetch_choices, fetch_questions, fetch_visible_quiz},
    },
    utils::{
        extract::{AppJson, AppPath},
        html::clean_html,
        jwt::Claims,
    },
};

fn map_category_fk(e: sqlx::Error) -> AppError {
    if is_foreign_key_violation(&e) {
        AppError::BadRequest("Category does not exist".to_string())
    } else {
        tracing::error!("Quiz write failed: {:?}", e);
        AppError::from(e)
    }
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

pub async fn list_categories(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let categories = sqlx::query_as::<_, Category>(
        "SELECT id, name, created_at FROM categories ORDER BY name",
    )
    .fetch_all(&pool)
    .await?;

    Ok(Json(json!({ "ok": true, "categories": categories })))
}

/// Creates a category. Names are unique; a duplicate yields 409.
pub async fn create_category(
    State(pool): State<PgPool>,
    AppJson(payload): AppJson<CreateCategoryRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Category name cannot be empty".to_string()));
    }

    let category = sqlx::query_as::<_, Category>(
        "INSERT INTO categories (name) VALUES ($1) RETURNING id, name, created_at",
    )
    .bind(name)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(format!("Category '{}' already exists", name))
        } else {
            tracing::error!("Failed to create category: {:?}", e);
            AppError::from(e)
        }
    })?;

    Ok((StatusCode::CREATED, Json(json!({ "ok": true, "category": category }))))
}

/// Deletes a category. Its quizzes stay, uncategorized.
pub async fn delete_category(
    State(pool): State<PgPool>,
    AppPath(id): AppPath<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM categories WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete category: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Category not found".to_string()));
    }

    Ok(Json(json!({ "ok": true })))
}

// ---------------------------------------------------------------------------
// Quizzes
// ---------------------------------------------------------------------------

/// Lists every quiz, published or not.
pub async fn list_quizzes(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let quizzes = sqlx::query_as::<_, QuizSummary>(
        r#"
        SELECT
            q.id, q.title, q.description, q.is_published, q.time_limit_minutes,
            q.category_id, c.name AS category_name,
            (SELECT COUNT(*) FROM questions qs WHERE qs.quiz_id = q.id) AS question_count
        FROM quizzes q
        LEFT JOIN categories c ON c.id = q.category_id
        ORDER BY q.created_at DESC, q.id DESC
        "#,
    )
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list quizzes: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(json!({ "ok": true, "quizzes": quizzes })))
}

/// Returns a quiz with its questions, correctness included.
pub async fn get_quiz(
    State(pool): State<PgPool>,
    AppPath(id): AppPath<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;

    let quiz = fetch_visible_quiz(&mut conn, id, true).await?;
    let questions = fetch_questions(&mut conn, quiz.id).await?;
    let choices = fetch_choices(&mut conn, quiz.id).await?;

    Ok(Json(json!({
        "ok": true,
        "quiz": quiz,
        "questions": admin_questions(questions, choices)?,
    })))
}

/// Creates a quiz owned by the calling admin.
pub async fn create_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    AppJson(payload): AppJson<CreateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let owner_id = claims.user_id()?;

    let title = payload.title.trim();
    if title.is_empty() {
        return Err(AppError::BadRequest("Quiz title cannot be empty".to_string()));
    }

    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO quizzes
        (title, description, is_published, time_limit_minutes, category_id, owner_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(title)
    .bind(clean_html(&payload.description))
    .bind(payload.is_published)
    .bind(payload.time_limit_minutes)
    .bind(payload.category_id)
    .bind(owner_id)
    .fetch_one(&pool)
    .await
    .map_err(map_category_fk)?;

    tracing::info!("Admin {} created quiz {}", owner_id, id);

    Ok((StatusCode::CREATED, Json(json!({ "ok": true, "id": id }))))
}

/// Updates a quiz by ID. Only present fields change.
pub async fn update_quiz(
    State(pool): State<PgPool>,
    AppPath(id): AppPath<i64>,
    AppJson(payload): AppJson<UpdateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    if payload.is_empty() {
        let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM quizzes WHERE id = $1")
            .bind(id)
            .fetch_optional(&pool)
            .await?
            .is_some();
        if !exists {
            return Err(AppError::NotFound("Quiz not found".to_string()));
        }
        return Ok(Json(json!({ "ok": true })));
    }

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE quizzes SET ");
    let mut separated = builder.separated(", ");

    if let Some(title) = payload.title {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(AppError::BadRequest("Quiz title cannot be empty".to_string()));
        }
        separated.push("title = ");
        separated.push_bind_unseparated(title);
    }

    if let Some(description) = payload.description {
        separated.push("description = ");
        separated.push_bind_unseparated(clean_html(&description));
    }

    if let Some(is_published) = payload.is_published {
        separated.push("is_published = ");
        separated.push_bind_unseparated(is_published);
    }

    if payload.clear_time_limit {
        separated.push("time_limit_minutes = NULL");
    } else if let Some(minutes) = payload.time_limit_minutes {
        separated.push("time_limit_minutes = ");
        separated.push_bind_unseparated(minutes);
    }

    if payload.clear_category {
        separated.push("category_id = NULL");
    } else if let Some(category_id) = payload.category_id {
        separated.push("category_id = ");
        separated.push_bind_unseparated(category_id);
    }

    separated.push("updated_at = NOW()");

    builder.push(" WHERE id = ");
    builder.push_bind(id);

    let result = builder
        .build()
        .execute(&pool)
        .await
        .map_err(map_category_fk)?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Quiz not found".to_string()));
    }

    Ok(Json(json!({ "ok": true })))
}

/// Deletes a quiz with its questions and attempts.
pub async fn delete_quiz(
    State(pool): State<PgPool>,
    AppPath(id): AppPath<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM quizzes WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete quiz: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Quiz not found".to_string()));
    }

    Ok(Json(json!({ "ok": true })))
}

// ---------------------------------------------------------------------------
// Questions
// ---------------------------------------------------------------------------

async fn insert_choices(
    conn: &mut PgConnection,
    question_id: i64,
    choices: &[ChoiceDraft],
) -> Result<(), AppError> {
    for (i, choice) in choices.iter().enumerate() {
        sqlx::query(
            "INSERT INTO choices (question_id, text, is_correct, position) VALUES ($1, $2, $3, $4)",
        )
        .bind(question_id)
        .bind(&choice.text)
        .bind(choice.is_correct)
        .bind(i as i32 + 1)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn fetch_question(conn: &mut PgConnection, id: i64) -> Result<Question, AppError> {
    sqlx::query_as::<_, Question>(
        "SELECT id, quiz_id, type, text, position FROM questions WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(AppError::NotFound("Question not found".to_string()))
}

async fn has_answers(conn: &mut PgConnection, question_id: i64) -> Result<bool, AppError> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM answers WHERE question_id = $1)",
    )
    .bind(question_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(exists)
}

/// Appends a question (with its choices) to a quiz.
pub async fn create_question(
    State(pool): State<PgPool>,
    AppPath(quiz_id): AppPath<i64>,
    AppJson(payload): AppJson<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let text = normalize_question_text(&payload.text)?;
    let choices = validate_choices(payload.question_type, &payload.choices)?;

    let mut tx = pool.begin().await?;

    // Lock the quiz row so concurrent appends pick distinct positions.
    sqlx::query_scalar::<_, i64>("SELECT id FROM quizzes WHERE id = $1 FOR UPDATE")
        .bind(quiz_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Quiz not found".to_string()))?;

    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO questions (quiz_id, type, text, position)
        VALUES ($1, $2, $3, (SELECT COALESCE(MAX(position), 0) + 1 FROM questions WHERE quiz_id = $1))
        RETURNING id
        "#,
    )
    .bind(quiz_id)
    .bind(payload.question_type.as_str())
    .bind(&text)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create question: {:?}", e);
        AppError::from(e)
    })?;

    insert_choices(&mut *tx, id, &choices).await?;

    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(json!({ "ok": true, "id": id }))))
}

/// Updates a question by ID.
///
/// A new choice list replaces the old one, which is refused (409) once
/// answers reference the question.
pub async fn update_question(
    State(pool): State<PgPool>,
    AppPath(id): AppPath<i64>,
    AppJson(payload): AppJson<UpdateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let mut tx = pool.begin().await?;
    let current = fetch_question(&mut *tx, id).await?;

    let question_type = match payload.question_type {
        Some(t) => t,
        None => current.question_type.parse::<QuestionType>()?,
    };

    let text = payload
        .text
        .as_deref()
        .map(normalize_question_text)
        .transpose()?
        .unwrap_or(current.text);

    // A type change must still fit the existing correct-choice count.
    let replacement = match &payload.choices {
        Some(choices) => Some(validate_choices(question_type, choices)?),
        None if payload.question_type.is_some() => {
            let existing = sqlx::query_as::<_, (String, bool)>(
                "SELECT text, is_correct FROM choices WHERE question_id = $1 ORDER BY position",
            )
            .bind(id)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(|(text, is_correct)| ChoiceInput { text, is_correct })
            .collect::<Vec<_>>();
            validate_choices(question_type, &existing)?;
            None
        }
        None => None,
    };

    if replacement.is_some() && has_answers(&mut *tx, id).await? {
        return Err(AppError::Conflict(
            "Cannot replace choices of a question that already has answers".to_string(),
        ));
    }

    sqlx::query("UPDATE questions SET type = $1, text = $2 WHERE id = $3")
        .bind(question_type.as_str())
        .bind(&text)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!("Failed to update question: {:?}", e);
            AppError::from(e)
        })?;

    if let Some(choices) = replacement {
        sqlx::query("DELETE FROM choices WHERE question_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        insert_choices(&mut *tx, id, &choices).await?;
    }

    tx.commit().await?;

    Ok(Json(json!({ "ok": true })))
}

/// Deletes a question. Questions that already have answers are kept (409).
pub async fn delete_question(
    State(pool): State<PgPool>,
    AppPath(id): AppPath<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = pool.begin().await?;
    fetch_question(&mut *tx, id).await?;

    if has_answers(&mut *tx, id).await? {
        return Err(AppError::Conflict(
            "Cannot delete a question that already has answers".to_string(),
        ));
    }

    sqlx::query("DELETE FROM questions WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete question: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    tx.commit().await?;

    Ok(Json(json!({ "ok": true })))
}

/// Swaps a question's position with its neighbour above or below.
/// At either end of the quiz nothing moves.
pub async fn move_question(
    State(pool): State<PgPool>,
    AppPath(id): AppPath<i64>,
    AppJson(payload): AppJson<MoveQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = pool.begin().await?;
    let current = fetch_question(&mut *tx, id).await?;

    let neighbour_sql = match payload.direction {
        MoveDirection::Up => {
            "SELECT id, quiz_id, type, text, position FROM questions
             WHERE quiz_id = $1 AND position < $2
             ORDER BY position DESC LIMIT 1 FOR UPDATE"
        }
        MoveDirection::Down => {
            "SELECT id, quiz_id, type, text, position FROM questions
             WHERE quiz_id = $1 AND position > $2
             ORDER BY position ASC LIMIT 1 FOR UPDATE"
        }
    };

    let neighbour = sqlx::query_as::<_, Question>(neighbour_sql)
        .bind(current.quiz_id)
        .bind(current.position)
        .fetch_optional(&mut *tx)
        .await?;

    let Some(neighbour) = neighbour else {
        return Ok(Json(json!({ "ok": true, "moved": false })));
    };

    // The (quiz_id, position) constraint is deferred, so the swap can
    // pass through a duplicate.
    let swaps = [
        (current.id, neighbour.position),
        (neighbour.id, current.position),
    ];
    for (question_id, position) in swaps {
        sqlx::query("UPDATE questions SET position = $1 WHERE id = $2")
            .bind(position)
            .bind(question_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await.map_err(|e| {
        tracing::error!("Failed to reorder question {}: {:?}", id, e);
        AppError::from(e)
    })?;

    Ok(Json(json!({ "ok": true, "moved": true })))
}

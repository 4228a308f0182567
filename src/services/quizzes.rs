// src/services/quizzes.rs

use std::collections::HashMap;

use sqlx::PgConnection;

use crate::{
    error::AppError,
    models::{
        question::{AdminChoice, AdminQuestion, Choice, PublicChoice, PublicQuestion, Question},
        quiz::Quiz,
    },
};

const QUIZ_COLUMNS: &str = "id, title, description, is_published, time_limit_minutes, \
                            category_id, owner_id, created_at, updated_at";

/// Loads a quiz the caller may see.
///
/// Unpublished quizzes are reported exactly like missing ones to non-admins.
pub async fn fetch_visible_quiz(
    conn: &mut PgConnection,
    quiz_id: i64,
    is_admin: bool,
) -> Result<Quiz, AppError> {
    let sql = format!("SELECT {QUIZ_COLUMNS} FROM quizzes WHERE id = $1");

    let quiz = sqlx::query_as::<_, Quiz>(&sql)
        .bind(quiz_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch quiz {}: {:?}", quiz_id, e);
            AppError::from(e)
        })?;

    match quiz {
        Some(quiz) if quiz.is_published || is_admin => Ok(quiz),
        _ => Err(AppError::NotFound("Quiz not found".to_string())),
    }
}

/// Questions of a quiz in display order.
pub async fn fetch_questions(
    conn: &mut PgConnection,
    quiz_id: i64,
) -> Result<Vec<Question>, AppError> {
    let questions = sqlx::query_as::<_, Question>(
        r#"
        SELECT id, quiz_id, type, text, position
        FROM questions
        WHERE quiz_id = $1
        ORDER BY position, id
        "#,
    )
    .bind(quiz_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(questions)
}

/// Choices of every question in a quiz, in display order.
pub async fn fetch_choices(conn: &mut PgConnection, quiz_id: i64) -> Result<Vec<Choice>, AppError> {
    let choices = sqlx::query_as::<_, Choice>(
        r#"
        SELECT c.id, c.question_id, c.text, c.is_correct, c.position
        FROM choices c
        JOIN questions q ON q.id = c.question_id
        WHERE q.quiz_id = $1
        ORDER BY c.question_id, c.position, c.id
        "#,
    )
    .bind(quiz_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(choices)
}

fn group_choices(choices: Vec<Choice>) -> HashMap<i64, Vec<Choice>> {
    let mut grouped: HashMap<i64, Vec<Choice>> = HashMap::new();
    for choice in choices {
        grouped.entry(choice.question_id).or_default().push(choice);
    }
    grouped
}

/// Builds the taker's view: choice correctness is dropped.
pub fn public_questions(
    questions: Vec<Question>,
    choices: Vec<Choice>,
) -> Result<Vec<PublicQuestion>, AppError> {
    let mut grouped = group_choices(choices);

    questions
        .into_iter()
        .map(|q| {
            let choices = grouped
                .remove(&q.id)
                .unwrap_or_default()
                .into_iter()
                .map(|c| PublicChoice {
                    id: c.id,
                    text: c.text,
                    order: c.position,
                })
                .collect();

            Ok(PublicQuestion {
                id: q.id,
                question_type: q.question_type.parse()?,
                text: q.text,
                order: q.position,
                choices,
            })
        })
        .collect()
}

/// Builds the admin view, correctness included.
pub fn admin_questions(
    questions: Vec<Question>,
    choices: Vec<Choice>,
) -> Result<Vec<AdminQuestion>, AppError> {
    let mut grouped = group_choices(choices);

    questions
        .into_iter()
        .map(|q| {
            let choices = grouped
                .remove(&q.id)
                .unwrap_or_default()
                .into_iter()
                .map(|c| AdminChoice {
                    id: c.id,
                    text: c.text,
                    is_correct: c.is_correct,
                    order: c.position,
                })
                .collect();

            Ok(AdminQuestion {
                id: q.id,
                question_type: q.question_type.parse()?,
                text: q.text,
                order: q.position,
                choices,
            })
        })
        .collect()
}

// src/services/attempts.rs

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use crate::{
    error::{AppError, is_foreign_key_violation, is_unique_violation},
    models::attempt::{Attempt, AttemptStatus},
    services::scoring::Selections,
};

/// Score and timestamp for an attempt that is created already submitted.
#[derive(Debug, Clone, Copy)]
pub struct Finalized {
    pub score: i32,
    pub submitted_at: DateTime<Utc>,
}

/// Persistence needed to reconcile attempts and answers.
///
/// Implementations are expected to run every call inside one transaction.
#[async_trait]
pub trait AttemptStore: Send {
    /// The attempt with this id, if it belongs to (user, quiz) and is still in progress.
    async fn find_in_progress(
        &mut self,
        attempt_id: i64,
        user_id: i64,
        quiz_id: i64,
    ) -> Result<Option<Attempt>, AppError>;

    /// The most recently started in-progress attempt for (user, quiz).
    async fn latest_in_progress(
        &mut self,
        user_id: i64,
        quiz_id: i64,
    ) -> Result<Option<Attempt>, AppError>;

    /// Highest attempt number used so far, 0 when there is none.
    async fn max_attempt_no(&mut self, user_id: i64, quiz_id: i64) -> Result<i32, AppError>;

    async fn create_attempt(
        &mut self,
        user_id: i64,
        quiz_id: i64,
        attempt_no: i32,
        finalized: Option<Finalized>,
    ) -> Result<Attempt, AppError>;

    /// Creates the answer row if needed and replaces its choice set.
    async fn upsert_answer(
        &mut self,
        attempt_id: i64,
        question_id: i64,
        choice_ids: &BTreeSet<i64>,
    ) -> Result<(), AppError>;

    /// Moves an in-progress attempt to SUBMITTED.
    async fn finalize_attempt(
        &mut self,
        attempt_id: i64,
        finalized: Finalized,
    ) -> Result<Attempt, AppError>;
}

/// Finds the attempt a save/submit should write into.
///
/// A hint is honoured only while it names an in-progress attempt of the same
/// user and quiz; otherwise the latest in-progress attempt is used.
pub async fn find_active_attempt<S: AttemptStore + ?Sized>(
    store: &mut S,
    user_id: i64,
    quiz_id: i64,
    hint: Option<i64>,
) -> Result<Option<Attempt>, AppError> {
    if let Some(attempt_id) = hint {
        if let Some(attempt) = store.find_in_progress(attempt_id, user_id, quiz_id).await? {
            return Ok(Some(attempt));
        }
        tracing::debug!(
            "Attempt hint {} is stale for user {} quiz {}",
            attempt_id,
            user_id,
            quiz_id
        );
    }

    store.latest_in_progress(user_id, quiz_id).await
}

pub async fn next_attempt_no<S: AttemptStore + ?Sized>(
    store: &mut S,
    user_id: i64,
    quiz_id: i64,
) -> Result<i32, AppError> {
    Ok(store.max_attempt_no(user_id, quiz_id).await? + 1)
}

async fn write_answers<S: AttemptStore + ?Sized>(
    store: &mut S,
    attempt_id: i64,
    selections: &Selections,
) -> Result<(), AppError> {
    for (question_id, choice_ids) in selections {
        store.upsert_answer(attempt_id, *question_id, choice_ids).await?;
    }
    Ok(())
}

/// Persists draft selections, creating an in-progress attempt when none exists.
pub async fn save_draft<S: AttemptStore + ?Sized>(
    store: &mut S,
    user_id: i64,
    quiz_id: i64,
    hint: Option<i64>,
    selections: &Selections,
) -> Result<Attempt, AppError> {
    let attempt = match find_active_attempt(store, user_id, quiz_id, hint).await? {
        Some(attempt) => attempt,
        None => {
            let attempt_no = next_attempt_no(store, user_id, quiz_id).await?;
            tracing::info!(
                "Starting attempt {} for user {} on quiz {}",
                attempt_no,
                user_id,
                quiz_id
            );
            store.create_attempt(user_id, quiz_id, attempt_no, None).await?
        }
    };

    write_answers(store, attempt.id, selections).await?;

    Ok(attempt)
}

/// Stores the final selections and closes the attempt with its score.
///
/// Without a resolvable in-progress attempt a new one is created directly in
/// the SUBMITTED state.
pub async fn submit_attempt<S: AttemptStore + ?Sized>(
    store: &mut S,
    user_id: i64,
    quiz_id: i64,
    hint: Option<i64>,
    selections: &Selections,
    finalized: Finalized,
) -> Result<Attempt, AppError> {
    match find_active_attempt(store, user_id, quiz_id, hint).await? {
        Some(attempt) => {
            write_answers(store, attempt.id, selections).await?;
            store.finalize_attempt(attempt.id, finalized).await
        }
        None => {
            let attempt_no = next_attempt_no(store, user_id, quiz_id).await?;
            let attempt = store
                .create_attempt(user_id, quiz_id, attempt_no, Some(finalized))
                .await?;
            write_answers(store, attempt.id, selections).await?;
            Ok(attempt)
        }
    }
}

const ATTEMPT_COLUMNS: &str =
    "id, user_id, quiz_id, attempt_no, status, score, started_at, submitted_at";

/// Postgres-backed store. Pass `&mut *tx` so all writes share the transaction.
#[async_trait]
impl AttemptStore for PgConnection {
    async fn find_in_progress(
        &mut self,
        attempt_id: i64,
        user_id: i64,
        quiz_id: i64,
    ) -> Result<Option<Attempt>, AppError> {
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts
             WHERE id = $1 AND user_id = $2 AND quiz_id = $3 AND status = 'IN_PROGRESS'
             FOR UPDATE"
        );

        let attempt = sqlx::query_as::<_, Attempt>(&sql)
            .bind(attempt_id)
            .bind(user_id)
            .bind(quiz_id)
            .fetch_optional(&mut *self)
            .await?;

        Ok(attempt)
    }

    async fn latest_in_progress(
        &mut self,
        user_id: i64,
        quiz_id: i64,
    ) -> Result<Option<Attempt>, AppError> {
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts
             WHERE user_id = $1 AND quiz_id = $2 AND status = 'IN_PROGRESS'
             ORDER BY started_at DESC, id DESC
             LIMIT 1
             FOR UPDATE"
        );

        let attempt = sqlx::query_as::<_, Attempt>(&sql)
            .bind(user_id)
            .bind(quiz_id)
            .fetch_optional(&mut *self)
            .await?;

        Ok(attempt)
    }

    async fn max_attempt_no(&mut self, user_id: i64, quiz_id: i64) -> Result<i32, AppError> {
        let max = sqlx::query_scalar::<_, i32>(
            "SELECT COALESCE(MAX(attempt_no), 0) FROM attempts WHERE user_id = $1 AND quiz_id = $2",
        )
        .bind(user_id)
        .bind(quiz_id)
        .fetch_one(&mut *self)
        .await?;

        Ok(max)
    }

    async fn create_attempt(
        &mut self,
        user_id: i64,
        quiz_id: i64,
        attempt_no: i32,
        finalized: Option<Finalized>,
    ) -> Result<Attempt, AppError> {
        let status = match finalized {
            Some(_) => AttemptStatus::Submitted,
            None => AttemptStatus::InProgress,
        };
        let sql = format!(
            "INSERT INTO attempts (user_id, quiz_id, attempt_no, status, score, submitted_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {ATTEMPT_COLUMNS}"
        );

        sqlx::query_as::<_, Attempt>(&sql)
            .bind(user_id)
            .bind(quiz_id)
            .bind(attempt_no)
            .bind(status.as_str())
            .bind(finalized.map(|f| f.score))
            .bind(finalized.map(|f| f.submitted_at))
            .fetch_one(&mut *self)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict(
                        "Another attempt for this quiz was started concurrently".to_string(),
                    )
                } else {
                    tracing::error!("Failed to create attempt: {:?}", e);
                    AppError::from(e)
                }
            })
    }

    async fn upsert_answer(
        &mut self,
        attempt_id: i64,
        question_id: i64,
        choice_ids: &BTreeSet<i64>,
    ) -> Result<(), AppError> {
        let reject_unknown = |e: sqlx::Error| {
            if is_foreign_key_violation(&e) {
                AppError::BadRequest(format!(
                    "Unknown question or choice in answer to question {}",
                    question_id
                ))
            } else {
                tracing::error!("Failed to upsert answer: {:?}", e);
                AppError::from(e)
            }
        };

        let answer_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO answers (attempt_id, question_id)
            VALUES ($1, $2)
            ON CONFLICT (attempt_id, question_id) DO UPDATE SET updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(attempt_id)
        .bind(question_id)
        .fetch_one(&mut *self)
        .await
        .map_err(reject_unknown)?;

        sqlx::query("DELETE FROM answer_choices WHERE answer_id = $1")
            .bind(answer_id)
            .execute(&mut *self)
            .await?;

        if !choice_ids.is_empty() {
            let ids: Vec<i64> = choice_ids.iter().copied().collect();
            sqlx::query(
                "INSERT INTO answer_choices (answer_id, choice_id) SELECT $1, UNNEST($2::BIGINT[])",
            )
            .bind(answer_id)
            .bind(ids)
            .execute(&mut *self)
            .await
            .map_err(reject_unknown)?;
        }

        Ok(())
    }

    async fn finalize_attempt(
        &mut self,
        attempt_id: i64,
        finalized: Finalized,
    ) -> Result<Attempt, AppError> {
        let sql = format!(
            "UPDATE attempts
             SET status = 'SUBMITTED', score = $2, submitted_at = $3
             WHERE id = $1 AND status = 'IN_PROGRESS'
             RETURNING {ATTEMPT_COLUMNS}"
        );

        sqlx::query_as::<_, Attempt>(&sql)
            .bind(attempt_id)
            .bind(finalized.score)
            .bind(finalized.submitted_at)
            .fetch_optional(&mut *self)
            .await?
            .ok_or_else(|| AppError::Conflict("Attempt has already been submitted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    /// Keeps attempts and answers in plain collections.
    #[derive(Default)]
    struct MemoryStore {
        attempts: Vec<Attempt>,
        answers: BTreeMap<(i64, i64), BTreeSet<i64>>,
    }

    #[async_trait]
    impl AttemptStore for MemoryStore {
        async fn find_in_progress(
            &mut self,
            attempt_id: i64,
            user_id: i64,
            quiz_id: i64,
        ) -> Result<Option<Attempt>, AppError> {
            Ok(self
                .attempts
                .iter()
                .find(|a| {
                    a.id == attempt_id
                        && a.user_id == user_id
                        && a.quiz_id == quiz_id
                        && a.status == AttemptStatus::InProgress
                })
                .cloned())
        }

        async fn latest_in_progress(
            &mut self,
            user_id: i64,
            quiz_id: i64,
        ) -> Result<Option<Attempt>, AppError> {
            Ok(self
                .attempts
                .iter()
                .filter(|a| {
                    a.user_id == user_id
                        && a.quiz_id == quiz_id
                        && a.status == AttemptStatus::InProgress
                })
                .max_by_key(|a| (a.started_at, a.id))
                .cloned())
        }

        async fn max_attempt_no(&mut self, user_id: i64, quiz_id: i64) -> Result<i32, AppError> {
            Ok(self
                .attempts
                .iter()
                .filter(|a| a.user_id == user_id && a.quiz_id == quiz_id)
                .map(|a| a.attempt_no)
                .max()
                .unwrap_or(0))
        }

        async fn create_attempt(
            &mut self,
            user_id: i64,
            quiz_id: i64,
            attempt_no: i32,
            finalized: Option<Finalized>,
        ) -> Result<Attempt, AppError> {
            let attempt = Attempt {
                id: self.attempts.len() as i64 + 1,
                user_id,
                quiz_id,
                attempt_no,
                status: match finalized {
                    Some(_) => AttemptStatus::Submitted,
                    None => AttemptStatus::InProgress,
                },
                score: finalized.map(|f| f.score),
                started_at: Utc::now(),
                submitted_at: finalized.map(|f| f.submitted_at),
            };
            self.attempts.push(attempt.clone());
            Ok(attempt)
        }

        async fn upsert_answer(
            &mut self,
            attempt_id: i64,
            question_id: i64,
            choice_ids: &BTreeSet<i64>,
        ) -> Result<(), AppError> {
            self.answers.insert((attempt_id, question_id), choice_ids.clone());
            Ok(())
        }

        async fn finalize_attempt(
            &mut self,
            attempt_id: i64,
            finalized: Finalized,
        ) -> Result<Attempt, AppError> {
            let attempt = self
                .attempts
                .iter_mut()
                .find(|a| a.id == attempt_id && a.status == AttemptStatus::InProgress)
                .ok_or_else(|| AppError::Conflict("already submitted".to_string()))?;
            attempt.status = AttemptStatus::Submitted;
            attempt.score = Some(finalized.score);
            attempt.submitted_at = Some(finalized.submitted_at);
            Ok(attempt.clone())
        }
    }

    const USER: i64 = 1;
    const QUIZ: i64 = 10;

    fn selections(entries: &[(i64, &[i64])]) -> Selections {
        entries
            .iter()
            .map(|(q, c)| (*q, c.iter().copied().collect()))
            .collect()
    }

    fn finalized(score: i32) -> Finalized {
        Finalized { score, submitted_at: Utc::now() }
    }

    #[tokio::test]
    async fn first_save_creates_attempt_one() {
        let mut store = MemoryStore::default();

        let attempt = save_draft(&mut store, USER, QUIZ, None, &selections(&[(100, &[1])]))
            .await
            .unwrap();

        assert_eq!(attempt.attempt_no, 1);
        assert_eq!(attempt.status, AttemptStatus::InProgress);
        assert_eq!(store.attempts.len(), 1);
    }

    #[tokio::test]
    async fn repeated_saves_keep_one_answer_per_question() {
        let mut store = MemoryStore::default();

        let first = save_draft(&mut store, USER, QUIZ, None, &selections(&[(100, &[1, 2])]))
            .await
            .unwrap();
        let second = save_draft(&mut store, USER, QUIZ, Some(first.id), &selections(&[(100, &[2])]))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.answers.len(), 1);
        assert_eq!(store.answers[&(first.id, 100)], BTreeSet::from([2]));
    }

    #[tokio::test]
    async fn submit_with_hint_finalizes_without_new_attempt() {
        let mut store = MemoryStore::default();

        let draft = save_draft(&mut store, USER, QUIZ, None, &selections(&[(100, &[1])]))
            .await
            .unwrap();
        let submitted = submit_attempt(
            &mut store,
            USER,
            QUIZ,
            Some(draft.id),
            &selections(&[(100, &[1]), (200, &[3, 4])]),
            finalized(2),
        )
        .await
        .unwrap();

        assert_eq!(submitted.id, draft.id);
        assert_eq!(submitted.attempt_no, 1);
        assert_eq!(submitted.status, AttemptStatus::Submitted);
        assert_eq!(submitted.score, Some(2));
        assert!(submitted.submitted_at.is_some());
        assert_eq!(store.attempts.len(), 1);
        assert_eq!(store.answers.len(), 2);
    }

    #[tokio::test]
    async fn submit_without_draft_creates_submitted_attempt() {
        let mut store = MemoryStore::default();

        let attempt = submit_attempt(&mut store, USER, QUIZ, None, &selections(&[(100, &[1])]), finalized(1))
            .await
            .unwrap();

        assert_eq!(attempt.attempt_no, 1);
        assert_eq!(attempt.status, AttemptStatus::Submitted);
        assert_eq!(attempt.score, Some(1));
        assert_eq!(store.answers[&(attempt.id, 100)], BTreeSet::from([1]));
    }

    #[tokio::test]
    async fn attempt_numbers_strictly_increase() {
        let mut store = MemoryStore::default();
        let mut seen = Vec::new();

        for round in 0..4 {
            let draft = save_draft(&mut store, USER, QUIZ, None, &Selections::new())
                .await
                .unwrap();
            let done = submit_attempt(&mut store, USER, QUIZ, Some(draft.id), &Selections::new(), finalized(round))
                .await
                .unwrap();
            assert_eq!(draft.id, done.id);
            seen.push(done.attempt_no);
        }
        let direct = submit_attempt(&mut store, USER, QUIZ, None, &Selections::new(), finalized(0))
            .await
            .unwrap();
        seen.push(direct.attempt_no);

        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn stale_hint_falls_back_to_latest_in_progress() {
        let mut store = MemoryStore::default();

        let done = submit_attempt(&mut store, USER, QUIZ, None, &Selections::new(), finalized(0))
            .await
            .unwrap();
        let draft = save_draft(&mut store, USER, QUIZ, None, &Selections::new())
            .await
            .unwrap();

        // Hint names the already submitted attempt.
        let resolved = find_active_attempt(&mut store, USER, QUIZ, Some(done.id))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(resolved.id, draft.id);
        assert_eq!(draft.attempt_no, 2);
    }

    #[tokio::test]
    async fn hint_from_another_user_is_ignored() {
        let mut store = MemoryStore::default();

        let theirs = save_draft(&mut store, 2, QUIZ, None, &Selections::new())
            .await
            .unwrap();
        let mine = save_draft(&mut store, USER, QUIZ, Some(theirs.id), &Selections::new())
            .await
            .unwrap();

        assert_ne!(mine.id, theirs.id);
        assert_eq!(mine.user_id, USER);
        assert_eq!(mine.attempt_no, 1);
    }

    #[tokio::test]
    async fn attempt_numbers_are_scoped_per_quiz() {
        let mut store = MemoryStore::default();

        submit_attempt(&mut store, USER, QUIZ, None, &Selections::new(), finalized(0))
            .await
            .unwrap();
        let other = save_draft(&mut store, USER, QUIZ + 1, None, &Selections::new())
            .await
            .unwrap();

        assert_eq!(other.attempt_no, 1);
    }
}

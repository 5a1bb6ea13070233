use chrono::{NaiveDate, Utc};
use sqlx::Result;
use std::collections::HashSet;
use uuid::Uuid;

use crate::db::Db;
use crate::models::*;

/// All reads and writes against the database. Cheap to clone (pool is
/// Arc-backed). Every write is a single independently committed statement;
/// rows are partitioned by user, so no cross-request locking is needed.
#[derive(Clone)]
pub struct Store {
    pool: Db,
}

impl Store {
    pub fn new(pool: Db) -> Self {
        Self { pool }
    }

    // --- users & auth sessions ---

    pub async fn create_user(&self, email: &str, password_hash: &str) -> Result<User> {
        let res = sqlx::query("INSERT INTO users (email, password_hash, created_at) VALUES (?, ?, ?)")
            .bind(email)
            .bind(password_hash)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        self.get_user(res.last_insert_rowid()).await
    }

    pub async fn get_user(&self, id: i64) -> Result<User> {
        sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn create_auth_session(&self, user_id: i64) -> Result<String> {
        let token = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO auth_sessions (token, user_id, created_at) VALUES (?, ?, ?)")
            .bind(&token)
            .bind(user_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(token)
    }

    pub async fn session_user(&self, token: &str) -> Result<Option<i64>> {
        sqlx::query_scalar("SELECT user_id FROM auth_sessions WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn delete_auth_session(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- study logs ---

    pub async fn insert_log_entry(
        &self,
        user_id: i64,
        topic: &str,
        minutes: i64,
        date: NaiveDate,
    ) -> Result<StudyLogEntry> {
        let res = sqlx::query(
            "INSERT INTO study_logs (user_id, topic, minutes, log_date) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(topic)
        .bind(minutes)
        .bind(date)
        .execute(&self.pool)
        .await?;
        sqlx::query_as("SELECT * FROM study_logs WHERE id = ?")
            .bind(res.last_insert_rowid())
            .fetch_one(&self.pool)
            .await
    }

    pub async fn list_log_entries(&self, user_id: i64) -> Result<Vec<StudyLogEntry>> {
        sqlx::query_as("SELECT * FROM study_logs WHERE user_id = ? ORDER BY log_date DESC, id DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
    }

    /// Distinct calendar dates with at least one log entry — the streak
    /// engine's input. Duplicates on a day collapse here, not in the engine.
    pub async fn fetch_log_dates(&self, user_id: i64) -> Result<HashSet<NaiveDate>> {
        let dates: Vec<NaiveDate> =
            sqlx::query_scalar("SELECT DISTINCT log_date FROM study_logs WHERE user_id = ?")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(dates.into_iter().collect())
    }

    // --- study plans ---

    pub async fn insert_plan(&self, user_id: i64, goal: &str) -> Result<StudyPlan> {
        let res = sqlx::query("INSERT INTO study_plans (user_id, goal, created_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(goal)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        sqlx::query_as("SELECT * FROM study_plans WHERE id = ?")
            .bind(res.last_insert_rowid())
            .fetch_one(&self.pool)
            .await
    }

    pub async fn list_plans(&self, user_id: i64) -> Result<Vec<StudyPlan>> {
        sqlx::query_as("SELECT * FROM study_plans WHERE user_id = ? ORDER BY created_at DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
    }

    // --- courses & enrollments ---

    pub async fn create_course(&self, title: &str, description: &str) -> Result<Course> {
        let res = sqlx::query("INSERT INTO courses (title, description, created_at) VALUES (?, ?, ?)")
            .bind(title)
            .bind(description)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        self.get_course(res.last_insert_rowid()).await
    }

    pub async fn get_course(&self, id: i64) -> Result<Course> {
        sqlx::query_as("SELECT * FROM courses WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn list_courses(&self) -> Result<Vec<Course>> {
        sqlx::query_as("SELECT * FROM courses ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn enroll(&self, user_id: i64, course_id: i64) -> Result<Enrollment> {
        let res = sqlx::query(
            "INSERT INTO enrollments (user_id, course_id, progress, enrolled_at) VALUES (?, ?, 0, ?)",
        )
        .bind(user_id)
        .bind(course_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        sqlx::query_as("SELECT * FROM enrollments WHERE id = ?")
            .bind(res.last_insert_rowid())
            .fetch_one(&self.pool)
            .await
    }

    pub async fn list_enrollments(&self, user_id: i64) -> Result<Vec<Enrollment>> {
        sqlx::query_as("SELECT * FROM enrollments WHERE user_id = ? ORDER BY enrolled_at DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
    }

    /// Returns false when the user is not enrolled in the course.
    pub async fn set_progress(&self, user_id: i64, course_id: i64, progress: f64) -> Result<bool> {
        let res = sqlx::query("UPDATE enrollments SET progress = ? WHERE user_id = ? AND course_id = ?")
            .bind(progress)
            .bind(user_id)
            .bind(course_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    // --- quizzes ---

    pub async fn create_quiz(
        &self,
        course_id: i64,
        topic: &str,
        question: &str,
        correct_answer: &str,
    ) -> Result<Quiz> {
        let res = sqlx::query(
            "INSERT INTO quizzes (course_id, topic, question, correct_answer, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(course_id)
        .bind(topic)
        .bind(question)
        .bind(correct_answer)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        sqlx::query_as("SELECT * FROM quizzes WHERE id = ?")
            .bind(res.last_insert_rowid())
            .fetch_one(&self.pool)
            .await
    }

    pub async fn list_quizzes(&self, course_id: i64) -> Result<Vec<Quiz>> {
        sqlx::query_as("SELECT * FROM quizzes WHERE course_id = ? ORDER BY id")
            .bind(course_id)
            .fetch_all(&self.pool)
            .await
    }

    pub async fn insert_quiz_result(
        &self,
        user_id: i64,
        course_id: i64,
        score: f64,
    ) -> Result<QuizResult> {
        let res = sqlx::query(
            "INSERT INTO quiz_results (user_id, course_id, score, taken_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(course_id)
        .bind(score)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        sqlx::query_as("SELECT * FROM quiz_results WHERE id = ?")
            .bind(res.last_insert_rowid())
            .fetch_one(&self.pool)
            .await
    }

    pub async fn insert_weak_topic(&self, user_id: i64, topic: &str) -> Result<WeakTopic> {
        let res = sqlx::query("INSERT INTO weak_topics (user_id, topic, flagged_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(topic)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        sqlx::query_as("SELECT * FROM weak_topics WHERE id = ?")
            .bind(res.last_insert_rowid())
            .fetch_one(&self.pool)
            .await
    }

    pub async fn list_weak_topics(&self, user_id: i64) -> Result<Vec<WeakTopic>> {
        sqlx::query_as("SELECT * FROM weak_topics WHERE user_id = ? ORDER BY flagged_at DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
    }

    // test helper: number of rows the study tools are allowed to write
    #[cfg(test)]
    pub async fn count_rows(&self, table: &str) -> i64 {
        let sql = format!("SELECT COUNT(*) FROM {table}");
        sqlx::query_scalar(&sql).fetch_one(&self.pool).await.unwrap()
    }
}

#[cfg(test)]
pub async fn test_store() -> Store {
    use sqlx::sqlite::SqlitePoolOptions;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    Store::new(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_dates_are_distinct() {
        let store = test_store().await;
        let user = store.create_user("a@b.c", "hash").await.unwrap();
        let day: NaiveDate = "2024-01-03".parse().unwrap();

        store.insert_log_entry(user.id, "rust", 30, day).await.unwrap();
        store.insert_log_entry(user.id, "sql", 15, day).await.unwrap();

        let dates = store.fetch_log_dates(user.id).await.unwrap();
        assert_eq!(dates.len(), 1);
        assert!(dates.contains(&day));
        assert_eq!(store.count_rows("study_logs").await, 2);
    }

    #[tokio::test]
    async fn auth_session_round_trip() {
        let store = test_store().await;
        let user = store.create_user("a@b.c", "hash").await.unwrap();

        let token = store.create_auth_session(user.id).await.unwrap();
        assert_eq!(store.session_user(&token).await.unwrap(), Some(user.id));

        store.delete_auth_session(&token).await.unwrap();
        assert_eq!(store.session_user(&token).await.unwrap(), None);
        assert_eq!(store.session_user("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = test_store().await;
        store.create_user("a@b.c", "h1").await.unwrap();
        let err = store.create_user("a@b.c", "h2").await.unwrap_err();
        assert!(err.to_string().contains("UNIQUE"));
    }

    #[tokio::test]
    async fn enrollment_progress_update() {
        let store = test_store().await;
        let user = store.create_user("a@b.c", "h").await.unwrap();
        let course = store.create_course("Rust 101", "intro").await.unwrap();

        store.enroll(user.id, course.id).await.unwrap();
        assert!(store.set_progress(user.id, course.id, 40.0).await.unwrap());
        assert!(!store.set_progress(user.id, course.id + 1, 40.0).await.unwrap());

        let enrollments = store.list_enrollments(user.id).await.unwrap();
        assert_eq!(enrollments.len(), 1);
        assert_eq!(enrollments[0].progress, 40.0);
    }
}

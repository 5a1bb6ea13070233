use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct StudyLogEntry {
    pub id: i64,
    pub user_id: i64,
    pub topic: String,
    pub minutes: i64,
    pub log_date: NaiveDate,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct StudyPlan {
    pub id: i64,
    pub user_id: i64,
    pub goal: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Course {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Enrollment {
    pub id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub progress: f64,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct Quiz {
    pub id: i64,
    pub course_id: i64,
    pub topic: String,
    pub question: String,
    // never sent to clients
    #[serde(skip_serializing)]
    pub correct_answer: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct QuizResult {
    pub id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub score: f64,
    pub taken_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct WeakTopic {
    pub id: i64,
    pub user_id: i64,
    pub topic: String,
    pub flagged_at: DateTime<Utc>,
}

// --- request payloads ---

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CredentialsReq {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateLogReq {
    pub topic: String,
    pub minutes: i64,
    pub date: Option<NaiveDate>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreatePlanReq {
    pub goal: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateCourseReq {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SetProgressReq {
    pub progress: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateQuizReq {
    pub topic: String,
    pub question: String,
    pub correct_answer: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubmitQuizReq {
    pub answers: Vec<QuizAnswer>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct QuizAnswer {
    pub quiz_id: i64,
    pub answer: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChatReq {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

// prior turns live client-side; only user/assistant roles are replayed
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

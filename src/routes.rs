use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::Utc;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::agent::CoachModel;
use crate::models::*;
use crate::store::Store;
use crate::streak::compute_streak;
use crate::{coach, tools};

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub coach: Arc<dyn CoachModel>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // auth
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        // study state
        .route("/api/dashboard", get(dashboard))
        .route("/api/logs", post(create_log).get(list_logs))
        .route("/api/streak", get(streak))
        .route("/api/plans", post(create_plan).get(list_plans))
        // courses & quizzes
        .route("/api/courses", post(create_course).get(list_courses))
        .route("/api/courses/:id/enroll", post(enroll))
        .route("/api/enrollments", get(list_enrollments))
        .route("/api/courses/:id/progress", post(set_progress))
        .route("/api/courses/:id/quizzes", post(create_quiz).get(list_quizzes))
        .route("/api/courses/:id/quiz/submit", post(submit_quiz))
        .route("/api/weak-topics", get(list_weak_topics))
        // coach
        .route("/api/coach/chat", post(coach_chat))
        // dashboard shell
        .route("/", get(shell))
        .with_state(state)
}

type Reject = (StatusCode, String);

fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

async fn authed(store: &Store, token: &str) -> Result<i64, Reject> {
    store
        .session_user(token)
        .await
        .map_err(e500)?
        .ok_or_else(|| e401("invalid or expired session token"))
}

// --- auth ---

async fn register(
    State(state): State<AppState>,
    Json(req): Json<CredentialsReq>,
) -> Result<Json<User>, Reject> {
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(e400("email and password are required"));
    }
    match state.store.create_user(req.email.trim(), &hash_password(&req.password)).await {
        Ok(user) => Ok(Json(user)),
        Err(sqlx::Error::Database(e)) if e.message().contains("UNIQUE") => {
            Err(e409("email already registered"))
        }
        Err(e) => Err(e500(e)),
    }
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<CredentialsReq>,
) -> Result<Json<Value>, Reject> {
    let user = state
        .store
        .find_user_by_email(req.email.trim())
        .await
        .map_err(e500)?
        .filter(|u| u.password_hash == hash_password(&req.password))
        .ok_or_else(|| e401("invalid credentials"))?;

    let token = state.store.create_auth_session(user.id).await.map_err(e500)?;
    Ok(Json(json!({ "token": token, "email": user.email })))
}

async fn logout(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, Reject> {
    state.store.delete_auth_session(auth.token()).await.map_err(e500)?;
    Ok(Json(json!({ "ok": true })))
}

// --- study state ---

async fn dashboard(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, Reject> {
    let user_id = authed(&state.store, auth.token()).await?;
    let user = state.store.get_user(user_id).await.map_err(e500)?;
    let dates = state.store.fetch_log_dates(user_id).await.map_err(e500)?;
    let streak = compute_streak(&dates, Utc::now().date_naive());
    let mut recent = state.store.list_log_entries(user_id).await.map_err(e500)?;
    recent.truncate(10);
    Ok(Json(json!({ "email": user.email, "streak": streak, "recent_logs": recent })))
}

async fn create_log(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(req): Json<CreateLogReq>,
) -> Result<Json<StudyLogEntry>, Reject> {
    let user_id = authed(&state.store, auth.token()).await?;
    let topic = req.topic.trim();
    if topic.is_empty() {
        return Err(e400("topic is required"));
    }
    if req.minutes <= 0 {
        return Err(e400("minutes must be a positive integer"));
    }
    let date = req.date.unwrap_or_else(|| Utc::now().date_naive());
    let row = state
        .store
        .insert_log_entry(user_id, topic, req.minutes, date)
        .await
        .map_err(e500)?;
    Ok(Json(row))
}

async fn list_logs(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Vec<StudyLogEntry>>, Reject> {
    let user_id = authed(&state.store, auth.token()).await?;
    Ok(Json(state.store.list_log_entries(user_id).await.map_err(e500)?))
}

async fn streak(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, Reject> {
    let user_id = authed(&state.store, auth.token()).await?;
    let dates = state.store.fetch_log_dates(user_id).await.map_err(e500)?;
    let streak = compute_streak(&dates, Utc::now().date_naive());
    Ok(Json(json!({ "streak": streak })))
}

async fn create_plan(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(req): Json<CreatePlanReq>,
) -> Result<Json<StudyPlan>, Reject> {
    let user_id = authed(&state.store, auth.token()).await?;
    let goal = req.goal.trim();
    if goal.is_empty() {
        return Err(e400("goal is required"));
    }
    Ok(Json(state.store.insert_plan(user_id, goal).await.map_err(e500)?))
}

async fn list_plans(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Vec<StudyPlan>>, Reject> {
    let user_id = authed(&state.store, auth.token()).await?;
    Ok(Json(state.store.list_plans(user_id).await.map_err(e500)?))
}

// --- courses & quizzes ---

async fn create_course(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(req): Json<CreateCourseReq>,
) -> Result<Json<Course>, Reject> {
    authed(&state.store, auth.token()).await?;
    let title = req.title.trim();
    if title.is_empty() {
        return Err(e400("title is required"));
    }
    Ok(Json(state.store.create_course(title, req.description.trim()).await.map_err(e500)?))
}

async fn list_courses(State(state): State<AppState>) -> Result<Json<Vec<Course>>, Reject> {
    Ok(Json(state.store.list_courses().await.map_err(e500)?))
}

async fn enroll(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(course_id): Path<i64>,
) -> Result<Json<Enrollment>, Reject> {
    let user_id = authed(&state.store, auth.token()).await?;
    state.store.get_course(course_id).await.map_err(|_| e400("course not found"))?;
    match state.store.enroll(user_id, course_id).await {
        Ok(enrollment) => Ok(Json(enrollment)),
        Err(sqlx::Error::Database(e)) if e.message().contains("UNIQUE") => {
            Err(e409("already enrolled"))
        }
        Err(e) => Err(e500(e)),
    }
}

async fn list_enrollments(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Vec<Enrollment>>, Reject> {
    let user_id = authed(&state.store, auth.token()).await?;
    Ok(Json(state.store.list_enrollments(user_id).await.map_err(e500)?))
}

async fn set_progress(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(course_id): Path<i64>,
    Json(req): Json<SetProgressReq>,
) -> Result<Json<Value>, Reject> {
    let user_id = authed(&state.store, auth.token()).await?;
    if !(0.0..=100.0).contains(&req.progress) {
        return Err(e400("progress must be between 0 and 100"));
    }
    let updated = state
        .store
        .set_progress(user_id, course_id, req.progress)
        .await
        .map_err(e500)?;
    if !updated {
        return Err(e400("not enrolled in this course"));
    }
    Ok(Json(json!({ "ok": true })))
}

async fn create_quiz(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(course_id): Path<i64>,
    Json(req): Json<CreateQuizReq>,
) -> Result<Json<Quiz>, Reject> {
    authed(&state.store, auth.token()).await?;
    state.store.get_course(course_id).await.map_err(|_| e400("course not found"))?;
    if req.topic.trim().is_empty() || req.question.trim().is_empty() || req.correct_answer.trim().is_empty() {
        return Err(e400("topic, question and correct_answer are required"));
    }
    let quiz = state
        .store
        .create_quiz(course_id, req.topic.trim(), req.question.trim(), req.correct_answer.trim())
        .await
        .map_err(e500)?;
    Ok(Json(quiz))
}

async fn list_quizzes(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
) -> Result<Json<Vec<Quiz>>, Reject> {
    Ok(Json(state.store.list_quizzes(course_id).await.map_err(e500)?))
}

async fn submit_quiz(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(course_id): Path<i64>,
    Json(req): Json<SubmitQuizReq>,
) -> Result<Json<Value>, Reject> {
    let user_id = authed(&state.store, auth.token()).await?;
    let quizzes = state.store.list_quizzes(course_id).await.map_err(e500)?;
    if quizzes.is_empty() {
        return Err(e400("course has no quiz"));
    }

    let mut correct = 0;
    let mut weak_topics = Vec::new();
    for quiz in &quizzes {
        let given = req
            .answers
            .iter()
            .find(|a| a.quiz_id == quiz.id)
            .map(|a| a.answer.trim())
            .unwrap_or("");
        if given.eq_ignore_ascii_case(quiz.correct_answer.trim()) {
            correct += 1;
        } else {
            state.store.insert_weak_topic(user_id, &quiz.topic).await.map_err(e500)?;
            weak_topics.push(quiz.topic.clone());
        }
    }

    let score = correct as f64 / quizzes.len() as f64 * 100.0;
    let result = state
        .store
        .insert_quiz_result(user_id, course_id, score)
        .await
        .map_err(e500)?;
    Ok(Json(json!({ "score": result.score, "weak_topics": weak_topics })))
}

async fn list_weak_topics(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Vec<WeakTopic>>, Reject> {
    let user_id = authed(&state.store, auth.token()).await?;
    Ok(Json(state.store.list_weak_topics(user_id).await.map_err(e500)?))
}

// --- coach ---

async fn coach_chat(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(req): Json<ChatReq>,
) -> Result<Json<Value>, Reject> {
    let user_id = authed(&state.store, auth.token()).await?;
    if req.message.trim().is_empty() {
        return Err(e400("message is required"));
    }
    let today = Utc::now().date_naive();
    match coach::run_turn(
        &state.store,
        state.coach.as_ref(),
        user_id,
        today,
        &req.history,
        req.message.trim(),
    )
    .await
    {
        Ok(reply) => Ok(Json(json!({ "reply": reply }))),
        // transient: report, never retry from here
        Err(e) => {
            tracing::error!(error = %e, "coach turn failed");
            Err((
                StatusCode::BAD_GATEWAY,
                "The study coach is unavailable right now, please try again.".into(),
            ))
        }
    }
}

// --- dashboard shell ---

async fn shell() -> Html<String> {
    let tool_names: Vec<&str> = tools::CoachTool::ALL.iter().map(|t| t.name()).collect();
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>StudyStreak</title>
  <style>
    body{{font-family:sans-serif;max-width:640px;margin:2rem auto;padding:0 1rem}}
    .streak{{font-size:3rem;font-weight:bold}}
    #chat div{{margin:.25rem 0}}
  </style>
</head>
<body>
<h1>StudyStreak</h1>
<p>Log in via <code>POST /api/login</code>, then paste your token:</p>
<input id='token' placeholder='bearer token' size='40'/>
<button onclick='load()'>Load dashboard</button>
<div class='streak' id='streak'>-</div>
<div id='chat'></div>
<input id='msg' placeholder='Tell the coach what you studied'/>
<button onclick='send()'>Send</button>
<script>
(function(){{
  const history = [];
  function headers(){{
    return {{'content-type':'application/json',
             'authorization':'Bearer '+document.getElementById('token').value}};
  }}
  window.load = async function(){{
    const res = await fetch('/api/dashboard', {{headers: headers()}});
    const j = await res.json().catch(()=>({{}}));
    document.getElementById('streak').textContent = (j.streak ?? '?') + ' day streak';
  }};
  window.send = async function(){{
    const msg = document.getElementById('msg').value;
    if (!msg) return;
    const res = await fetch('/api/coach/chat', {{
      method:'POST', headers: headers(),
      body: JSON.stringify({{message: msg, history: history}})
    }});
    const j = await res.json().catch(()=>({{}}));
    const chat = document.getElementById('chat');
    chat.innerHTML += '<div><b>you:</b> '+msg+'</div>';
    chat.innerHTML += '<div><b>coach:</b> '+(j.reply || 'unavailable')+'</div>';
    history.push({{role:'user', content: msg}});
    if (j.reply) history.push({{role:'assistant', content: j.reply}});
    document.getElementById('msg').value = '';
    load();
  }};
}})();
</script>
<p><small>Coach tools: {tools}</small></p>
</body>
</html>"#,
        tools = tool_names.join(", ")
    );
    Html(html)
}

// --- helpers ---

fn e400<T: Into<String>>(msg: T) -> Reject {
    (StatusCode::BAD_REQUEST, msg.into())
}

fn e401<T: Into<String>>(msg: T) -> Reject {
    (StatusCode::UNAUTHORIZED, msg.into())
}

fn e409<T: Into<String>>(msg: T) -> Reject {
    (StatusCode::CONFLICT, msg.into())
}

fn e500<E: std::fmt::Display>(e: E) -> Reject {
    tracing::error!(error = %e, "internal error");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

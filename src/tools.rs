// The four coach tools. The enum is the single source of truth: the
// capability list sent to the model and the dispatch table are both derived
// from it, so a tool cannot be advertised without being executable.

use chrono::NaiveDate;
use serde_json::{json, Value};
use thiserror::Error;

use crate::store::Store;
use crate::streak::{compute_streak, motivation_line};

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("store operation failed: {0}")]
    Store(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoachTool {
    LogStudySession,
    GetStreakData,
    CreateStudyPlan,
    GenerateMotivation,
}

impl CoachTool {
    pub const ALL: [CoachTool; 4] = [
        CoachTool::LogStudySession,
        CoachTool::GetStreakData,
        CoachTool::CreateStudyPlan,
        CoachTool::GenerateMotivation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CoachTool::LogStudySession => "log_study_session",
            CoachTool::GetStreakData => "get_streak_data",
            CoachTool::CreateStudyPlan => "create_study_plan",
            CoachTool::GenerateMotivation => "generate_motivation",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    fn description(self) -> &'static str {
        match self {
            CoachTool::LogStudySession => {
                "Record a study session for the user, dated today. Use when the user says they studied something."
            }
            CoachTool::GetStreakData => {
                "Get the user's current consecutive-day study streak."
            }
            CoachTool::CreateStudyPlan => {
                "Save a study plan with the given goal for the user."
            }
            CoachTool::GenerateMotivation => {
                "Produce an encouraging message based on the user's current streak."
            }
        }
    }

    fn parameters(self) -> Value {
        match self {
            CoachTool::LogStudySession => json!({
                "type": "object",
                "properties": {
                    "topic": {"type": "string", "description": "What was studied"},
                    "minutes": {"type": "integer", "description": "Duration in minutes"}
                },
                "required": ["topic", "minutes"]
            }),
            CoachTool::CreateStudyPlan => json!({
                "type": "object",
                "properties": {
                    "goal": {"type": "string", "description": "The study goal"}
                },
                "required": ["goal"]
            }),
            CoachTool::GetStreakData | CoachTool::GenerateMotivation => json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    pub fn spec(self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": self.parameters(),
            }
        })
    }

    pub async fn execute(
        self,
        store: &Store,
        user_id: i64,
        today: NaiveDate,
        raw_args: &str,
    ) -> Result<String, ToolError> {
        let args: Value = serde_json::from_str(raw_args)
            .map_err(|e| ToolError::InvalidArgs(format!("arguments are not valid JSON: {e}")))?;

        match self {
            CoachTool::LogStudySession => {
                let topic = require_str(&args, "topic")?;
                let minutes = args
                    .get("minutes")
                    .and_then(Value::as_i64)
                    .filter(|m| *m > 0)
                    .ok_or_else(|| {
                        ToolError::InvalidArgs("minutes must be a positive integer".into())
                    })?;
                store.insert_log_entry(user_id, topic, minutes, today).await?;
                Ok(format!("Logged {minutes} min of {topic}"))
            }
            CoachTool::GetStreakData => {
                let dates = store.fetch_log_dates(user_id).await?;
                let n = compute_streak(&dates, today);
                Ok(format!("Current streak: {n} days"))
            }
            CoachTool::CreateStudyPlan => {
                let goal = require_str(&args, "goal")?;
                store.insert_plan(user_id, goal).await?;
                Ok(format!("Plan created: {goal}"))
            }
            CoachTool::GenerateMotivation => {
                let dates = store.fetch_log_dates(user_id).await?;
                Ok(motivation_line(compute_streak(&dates, today)))
            }
        }
    }
}

/// Tool descriptors in the wire shape the model expects.
pub fn tool_specs() -> Vec<Value> {
    CoachTool::ALL.iter().map(|t| t.spec()).collect()
}

/// Look up and run one requested invocation against the store.
pub async fn execute_tool(
    store: &Store,
    user_id: i64,
    today: NaiveDate,
    name: &str,
    raw_args: &str,
) -> Result<String, ToolError> {
    let tool =
        CoachTool::from_name(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
    tool.execute(store, user_id, today, raw_args).await
}

fn require_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    args.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArgs(format!("{field} is required")))
}

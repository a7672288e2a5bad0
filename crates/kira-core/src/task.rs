use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::datetime::{civil_date_serde, parse_civil_date};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Status {
    #[serde(rename = "To-do")]
    Todo,
    #[serde(rename = "In-progress")]
    InProgress,
    #[serde(rename = "Blocked")]
    Blocked,
    #[serde(rename = "Completed")]
    Completed,
}

impl Status {
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "to-do" | "todo" | "to do" => Some(Self::Todo),
            "in-progress" | "in progress" | "inprogress" => Some(Self::InProgress),
            "blocked" => Some(Self::Blocked),
            "completed" | "done" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "To-do",
            Self::InProgress => "In-progress",
            Self::Blocked => "Blocked",
            Self::Completed => "Completed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRef {
    #[serde(alias = "user_id")]
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Canonical task shape. Everything past ingestion assumes this shape only.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub status: Status,
    pub priority: Option<u8>,
    #[serde(with = "civil_date_serde::option")]
    pub start_date: Option<NaiveDate>,
    #[serde(with = "civil_date_serde::option")]
    pub deadline: Option<NaiveDate>,
    pub project_id: Option<i64>,
    pub tag: Option<String>,
    pub recurring: Option<u32>,
    pub subtasks: Vec<Task>,
    pub assignees: Vec<UserRef>,
}

impl Task {
    pub fn new(id: i64, title: impl Into<String>, status: Status) -> Self {
        Self {
            id,
            title: title.into(),
            status,
            priority: None,
            start_date: None,
            deadline: None,
            project_id: None,
            tag: None,
            recurring: None,
            subtasks: vec![],
            assignees: vec![],
        }
    }

    pub fn with_deadline(mut self, deadline: NaiveDate) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_start(mut self, start: NaiveDate) -> Self {
        self.start_date = Some(start);
        self
    }

    pub fn with_subtasks(mut self, subtasks: Vec<Task>) -> Self {
        self.subtasks = subtasks;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == Status::Completed
    }

    /// Title for display; falls back to `(untitled #id)`.
    pub fn display_title(&self) -> String {
        let trimmed = self.title.trim();
        if trimmed.is_empty() {
            format!("(untitled #{})", self.id)
        } else {
            trimmed.to_string()
        }
    }
}

/// Task record as served by the task API. Accepts the aliases older
/// payloads use (`subTasks`, `users`, `startDate`, `due`, `due_date`).
#[derive(Debug, Clone, Deserialize)]
pub struct RawTask {
    pub id: i64,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub priority: Option<Value>,

    #[serde(default, alias = "startDate")]
    pub start_date: Option<String>,

    #[serde(default, alias = "due", alias = "due_date")]
    pub deadline: Option<String>,

    #[serde(default)]
    pub project_id: Option<i64>,

    #[serde(default)]
    pub tag: Option<String>,

    #[serde(default)]
    pub recurring: Option<u32>,

    #[serde(default, alias = "subTasks")]
    pub subtasks: Option<Vec<Value>>,

    #[serde(default, alias = "users")]
    pub assignees: Option<Vec<UserRef>>,
}

impl RawTask {
    /// Maps one raw record into the canonical shape. Returns `None` when
    /// the status is missing or unknown; malformed dates become `None`.
    #[tracing::instrument(skip(self), fields(task_id = self.id))]
    pub fn normalize(self) -> Option<Task> {
        let raw_status = self.status.as_deref().unwrap_or_default();
        let Some(status) = Status::parse(raw_status) else {
            warn!(status = %raw_status, "skipping task with unknown status");
            return None;
        };

        let start_date = normalize_date(self.id, "start_date", self.start_date.as_deref());
        let deadline = normalize_date(self.id, "deadline", self.deadline.as_deref());
        let priority = self.priority.as_ref().and_then(normalize_priority);

        let subtasks = decode_records(self.subtasks.unwrap_or_default())
            .into_iter()
            .filter_map(RawTask::normalize)
            .collect();

        Some(Task {
            id: self.id,
            title: self.title.unwrap_or_default(),
            status,
            priority,
            start_date,
            deadline,
            project_id: self.project_id,
            tag: self.tag.filter(|tag| !tag.trim().is_empty()),
            recurring: self.recurring,
            subtasks,
            assignees: self.assignees.unwrap_or_default(),
        })
    }
}

#[tracing::instrument(skip(raw))]
pub fn normalize_tasks(raw: Vec<RawTask>) -> Vec<Task> {
    let before = raw.len();
    let tasks: Vec<Task> = raw.into_iter().filter_map(RawTask::normalize).collect();
    debug!(before, after = tasks.len(), "normalized task records");
    tasks
}

/// Parses a JSON array of task records (the list endpoint payload).
/// Only a payload that is not an array fails; a bad record is skipped.
pub fn parse_task_payload(json: &str) -> anyhow::Result<Vec<Task>> {
    let values: Vec<Value> = serde_json::from_str(json)?;
    Ok(normalize_tasks(decode_records(values)))
}

fn decode_records(values: Vec<Value>) -> Vec<RawTask> {
    values
        .into_iter()
        .filter_map(|value| {
            let task_id = value.get("id").and_then(Value::as_i64);
            match serde_json::from_value::<RawTask>(value) {
                Ok(raw) => Some(raw),
                Err(err) => {
                    warn!(task_id, error = %err, "skipping undecodable task record");
                    None
                }
            }
        })
        .collect()
}

fn normalize_date(task_id: i64, field: &str, raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match parse_civil_date(raw) {
        Ok(date) => Some(date),
        Err(err) => {
            warn!(task_id, field, error = %err, "ignoring malformed date field");
            None
        }
    }
}

fn normalize_priority(value: &Value) -> Option<u8> {
    let number = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    (1..=10).contains(&number).then_some(number as u8)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{Status, parse_task_payload};

    #[test]
    fn accepts_alias_shapes() {
        let json = r#"[
            {"id": 1, "title": "Parent", "status": "In-progress", "priority": "8",
             "startDate": "2024-06-01", "due_date": "2024-06-10",
             "subTasks": [{"id": 2, "title": "Child", "status": "To-do"}],
             "users": [{"user_id": 7, "name": "Ana"}]},
            {"id": 3, "title": "Other", "status": "Completed", "priority": 3,
             "deadline": "2024-05-01", "subtasks": [], "assignees": []}
        ]"#;

        let tasks = parse_task_payload(json).expect("payload parses");
        assert_eq!(tasks.len(), 2);

        let parent = &tasks[0];
        assert_eq!(parent.status, Status::InProgress);
        assert_eq!(parent.priority, Some(8));
        assert_eq!(parent.start_date, NaiveDate::from_ymd_opt(2024, 6, 1));
        assert_eq!(parent.deadline, NaiveDate::from_ymd_opt(2024, 6, 10));
        assert_eq!(parent.subtasks.len(), 1);
        assert_eq!(parent.subtasks[0].id, 2);
        assert_eq!(parent.assignees[0].id, 7);

        assert_eq!(tasks[1].status, Status::Completed);
        assert_eq!(tasks[1].priority, Some(3));
    }

    #[test]
    fn malformed_dates_are_dropped_not_fatal() {
        let json = r#"[
            {"id": 1, "title": "a", "status": "To-do", "deadline": "06/10/2024"},
            {"id": 2, "title": "b", "status": "Unknown"},
            {"id": 3, "title": "c", "status": "Blocked", "priority": 42}
        ]"#;

        let tasks = parse_task_payload(json).expect("payload parses");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].deadline, None);
        assert_eq!(tasks[1].id, 3);
        assert_eq!(tasks[1].priority, None);
    }

    #[test]
    fn off_type_fields_skip_only_that_record() {
        let json = r#"[
            {"id": 1, "title": "ok", "status": "To-do", "deadline": "2024-06-10"},
            {"id": 2, "title": "bad", "status": "To-do", "recurring": "3"},
            {"id": 3, "title": "bad tag", "status": "Blocked", "tag": 5},
            {"title": "no id", "status": "To-do"},
            {"id": 4, "title": "parent", "status": "In-progress", "subTasks": [
                {"id": 5, "title": "fine", "status": "To-do"},
                {"id": 6, "title": "broken", "status": "To-do", "project_id": "x"}
            ]}
        ]"#;

        let tasks = parse_task_payload(json).expect("payload parses");
        let ids: Vec<i64> = tasks.iter().map(|task| task.id).collect();
        assert_eq!(ids, vec![1, 4]);
        let subtask_ids: Vec<i64> = tasks[1].subtasks.iter().map(|task| task.id).collect();
        assert_eq!(subtask_ids, vec![5]);

        assert!(parse_task_payload(r#"{"id": 1}"#).is_err());
    }

    #[test]
    fn status_parsing_is_lenient_on_case() {
        assert_eq!(Status::parse("to-do"), Some(Status::Todo));
        assert_eq!(Status::parse("In Progress"), Some(Status::InProgress));
        assert_eq!(Status::parse("archived"), None);
    }
}

use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use tracing::{
  debug,
  info,
  warn
};

use crate::dispatch::{
  Notifier,
  NotifyResponse
};
use crate::dedup::NotificationKind;
use crate::error::EngineError;
use crate::task::{
  Task,
  parse_task_payload
};

pub const DEFAULT_API_BASE: &str =
  "http://localhost:5000/task";
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = concat!(
  "kira/",
  env!("CARGO_PKG_VERSION")
);
const BODY_PREVIEW_CHARS: usize = 200;

/// Where a reload gets its task snapshot.
pub trait TaskSource {
  fn fetch_tasks(
    &self
  ) -> anyhow::Result<Vec<Task>>;

  fn describe(&self) -> String;
}

/// Task list and notify endpoints of the
/// task service.
#[derive(Debug, Clone)]
pub struct HttpTaskApi {
  base:   String,
  client: Client
}

impl HttpTaskApi {
  #[tracing::instrument]
  pub fn new(
    base: &str
  ) -> anyhow::Result<Self> {
    let trimmed =
      base.trim().trim_end_matches('/');
    if trimmed.is_empty() {
      anyhow::bail!(
        "api.base is empty"
      );
    }

    let client = Client::builder()
      .timeout(Duration::from_secs(
        REQUEST_TIMEOUT_SECS
      ))
      .user_agent(USER_AGENT)
      .build()
      .context(
        "failed building HTTP client \
         for the task API"
      )?;

    Ok(Self {
      base: trimmed.to_string(),
      client
    })
  }

  pub fn base(&self) -> &str {
    &self.base
  }

  fn notify_url(
    &self,
    task_id: i64,
    kind: NotificationKind
  ) -> String {
    let action = match kind {
      | NotificationKind::Upcoming => {
        "notify-upcoming"
      }
      | NotificationKind::Overdue => {
        "notify-overdue"
      }
    };
    format!(
      "{}/{task_id}/{action}",
      self.base
    )
  }

  #[tracing::instrument(skip(self, kind), fields(kind = %kind))]
  fn notify(
    &self,
    task_id: i64,
    kind: NotificationKind
  ) -> Result<NotifyResponse, EngineError>
  {
    let url =
      self.notify_url(task_id, kind);
    debug!(url = %url, "posting notify request");

    let response = self
      .client
      .post(url.as_str())
      .send()
      .map_err(|err| {
        EngineError::NetworkFailure {
          task_id,
          reason: err.to_string()
        }
      })?;

    let status = response.status();
    let body = response.text().map_err(
      |err| EngineError::NetworkFailure {
        task_id,
        reason: format!(
          "failed reading response \
           body: {err}"
        )
      }
    )?;

    interpret_notify_response(
      task_id, status, &body
    )
  }
}

impl TaskSource for HttpTaskApi {
  #[tracing::instrument(skip(self), fields(base = %self.base))]
  fn fetch_tasks(
    &self
  ) -> anyhow::Result<Vec<Task>> {
    let url = format!("{}/", self.base);
    let response = self
      .client
      .get(url.as_str())
      .send()
      .with_context(|| {
        format!(
          "failed requesting task \
           list: {url}"
        )
      })?;

    let status = response.status();
    let body =
      response.text().with_context(
        || {
          format!(
            "failed reading task list \
             body from {url}"
          )
        }
      )?;

    if !status.is_success() {
      warn!(
        status = %status,
        "task list request returned \
         non-success status"
      );
      anyhow::bail!(
        "task list returned HTTP {} \
         for {}: {}",
        status,
        url,
        preview(&body)
      );
    }

    let tasks = parse_task_payload(&body)
      .with_context(|| {
        format!(
          "task list from {url} is not \
           a JSON array of tasks"
        )
      })?;
    info!(
      count = tasks.len(),
      "fetched tasks"
    );
    Ok(tasks)
  }

  fn describe(&self) -> String {
    self.base.clone()
  }
}

impl Notifier for HttpTaskApi {
  fn notify_upcoming(
    &self,
    task_id: i64
  ) -> Result<NotifyResponse, EngineError>
  {
    self.notify(
      task_id,
      NotificationKind::Upcoming
    )
  }

  fn notify_overdue(
    &self,
    task_id: i64
  ) -> Result<NotifyResponse, EngineError>
  {
    self.notify(
      task_id,
      NotificationKind::Overdue
    )
  }
}

/// Classifies a notify reply. Non-2xx is
/// a network failure; an unparseable body
/// or `success != true` is malformed.
pub fn interpret_notify_response(
  task_id: i64,
  status: StatusCode,
  body: &str
) -> Result<NotifyResponse, EngineError> {
  if !status.is_success() {
    return Err(
      EngineError::NetworkFailure {
        task_id,
        reason: format!(
          "HTTP {}: {}",
          status,
          preview(body)
        )
      }
    );
  }

  let parsed: NotifyResponse =
    serde_json::from_str(body).map_err(
      |err| {
        EngineError::MalformedResponse {
          task_id,
          reason: err.to_string()
        }
      }
    )?;

  if !parsed.success {
    return Err(
      EngineError::MalformedResponse {
        task_id,
        reason: "success flag is false"
          .to_string()
      }
    );
  }

  Ok(parsed)
}

fn preview(body: &str) -> String {
  let trimmed = body.trim();
  if trimmed.chars().count()
    <= BODY_PREVIEW_CHARS
  {
    return trimmed.to_string();
  }
  let mut cut: String = trimmed
    .chars()
    .take(BODY_PREVIEW_CHARS)
    .collect();
  cut.push_str("...");
  cut
}

/// The list payload read from a local
/// file, for offline runs.
#[derive(Debug, Clone)]
pub struct FileTaskSource {
  pub path: PathBuf
}

impl FileTaskSource {
  pub fn new(path: &Path) -> Self {
    Self {
      path: path.to_path_buf()
    }
  }
}

impl TaskSource for FileTaskSource {
  #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
  fn fetch_tasks(
    &self
  ) -> anyhow::Result<Vec<Task>> {
    let raw = fs::read_to_string(
      &self.path
    )
    .with_context(|| {
      format!(
        "failed to read {}",
        self.path.display()
      )
    })?;
    let tasks = parse_task_payload(&raw)
      .with_context(|| {
        format!(
          "failed to parse {}",
          self.path.display()
        )
      })?;
    info!(
      count = tasks.len(),
      "loaded tasks from file"
    );
    Ok(tasks)
  }

  fn describe(&self) -> String {
    self.path.display().to_string()
  }
}

use std::collections::BTreeMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::api::DEFAULT_API_BASE;
use crate::calendar::{
  DEFAULT_MAX_PER_DAY,
  DateMode
};
use crate::dispatch::DispatchOptions;
use crate::reminder::{
  DEFAULT_TOLERANCE_HOURS,
  ReminderWindow
};

const KIRARC_ENV_VAR: &str = "KIRARC";
const KIRARC_FILE: &str = ".kirarc";
const DEFAULT_DATA_DIR: &str = ".kira";

/// Built-in values every lookup can fall
/// back to.
fn defaults() -> BTreeMap<String, String> {
  let max_per_day =
    DEFAULT_MAX_PER_DAY.to_string();
  let tolerance =
    DEFAULT_TOLERANCE_HOURS.to_string();
  [
    ("data.location", "~/.kira"),
    ("api.base", DEFAULT_API_BASE),
    (
      "calendar.max_per_day",
      max_per_day.as_str()
    ),
    ("calendar.mode", "due"),
    (
      "reminder.tolerance_hours",
      tolerance.as_str()
    ),
    ("notify.upcoming", "on"),
    ("notify.overdue", "on"),
    ("color", "on")
  ]
  .into_iter()
  .map(|(k, v)| {
    (k.to_string(), v.to_string())
  })
  .collect()
}

/// `key=value` settings layered as
/// defaults, then kirarc (with includes),
/// then command-line overrides.
#[derive(Debug, Clone)]
pub struct Config {
  map: BTreeMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    Self {
      map:          defaults(),
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    kirarc_override
  ))]
  pub fn load(
    kirarc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::default();

    match resolve_kirarc_path(
      kirarc_override
    )? {
      | Some(path) => {
        info!(kirarc = %path.display(), "loading kirarc");
        cfg.load_file(&path)?;
      }
      | None => {
        debug!(
          "no kirarc found; using \
           defaults"
        );
      }
    }

    Ok(cfg)
  }

  /// Parses rc text without touching the
  /// filesystem; includes are not
  /// followed.
  pub fn from_text(
    text: &str
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::default();
    cfg.load_text(
      text,
      Path::new("<inline>"),
      None
    )?;
    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .trim()
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn get_u32(
    &self,
    key: &str
  ) -> Option<u32> {
    self.get_parsed(key)
  }

  pub fn get_i64(
    &self,
    key: &str
  ) -> Option<i64> {
    self.get_parsed(key)
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  pub fn api_base(&self) -> String {
    self
      .get("api.base")
      .unwrap_or_else(|| {
        DEFAULT_API_BASE.to_string()
      })
  }

  pub fn timezone(
    &self
  ) -> Option<String> {
    self
      .get("timezone")
      .filter(|tz| !tz.trim().is_empty())
  }

  pub fn color(&self) -> bool {
    self
      .get_bool("color")
      .unwrap_or(true)
  }

  pub fn calendar_max_per_day(
    &self
  ) -> usize {
    match self
      .get_u32("calendar.max_per_day")
    {
      | Some(0) | None => {
        DEFAULT_MAX_PER_DAY
      }
      | Some(n) => n as usize
    }
  }

  pub fn calendar_mode(
    &self
  ) -> DateMode {
    let raw = self
      .get("calendar.mode")
      .unwrap_or_default();
    DateMode::from_key(&raw)
      .unwrap_or_else(|| {
        warn!(
          value = %raw,
          "unknown calendar.mode; \
           using due"
        );
        DateMode::default()
      })
  }

  pub fn reminder_window(
    &self
  ) -> ReminderWindow {
    ReminderWindow::with_tolerance_hours(
      self
        .get_i64(
          "reminder.tolerance_hours"
        )
        .unwrap_or(
          DEFAULT_TOLERANCE_HOURS
        )
    )
  }

  pub fn dispatch_options(
    &self
  ) -> DispatchOptions {
    DispatchOptions {
      notify_upcoming: self
        .get_bool("notify.upcoming")
        .unwrap_or(true),
      notify_overdue:  self
        .get_bool("notify.overdue")
        .unwrap_or(true)
    }
  }

  fn get_parsed<T: std::str::FromStr>(
    &self,
    key: &str
  ) -> Option<T> {
    let raw = self.map.get(key)?;
    match raw.trim().parse::<T>() {
      | Ok(value) => Some(value),
      | Err(_) => {
        warn!(
          key,
          value = %raw,
          "ignoring non-numeric \
           config value"
        );
        None
      }
    }
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });
    self.load_text(
      &text,
      &path,
      Some(&base_dir)
    )
  }

  fn load_text(
    &mut self,
    text: &str,
    origin: &Path,
    base_dir: Option<&Path>
  ) -> anyhow::Result<()> {
    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let line = raw_line
        .split_once('#')
        .map_or(raw_line, |(before, _)| {
          before
        })
        .trim();
      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let Some(base_dir) = base_dir
        else {
          warn!(
            line = line_num + 1,
            "include ignored outside \
             a kirarc file"
          );
          continue;
        };
        let include_path =
          resolve_include_path(
            base_dir,
            include_rest.trim()
          )?;
        debug!(
          file = %origin.display(),
          include = %include_path.display(),
          line = line_num + 1,
          "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            origin.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    home_dir()?.join(DEFAULT_DATA_DIR)
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

/// `--kirarc`, then `KIRARC`
/// (`/dev/null` disables), then
/// `~/.kirarc` when present.
fn resolve_kirarc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(kirarc_env) =
    std::env::var(KIRARC_ENV_VAR)
  {
    if kirarc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      kirarc_env
    )));
  }

  let candidate =
    home_dir()?.join(KIRARC_FILE);
  Ok(candidate.exists().then_some(candidate))
}

fn home_dir() -> anyhow::Result<PathBuf>
{
  dirs::home_dir().ok_or_else(|| {
    anyhow!(
      "cannot determine home directory"
    )
  })
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let expanded =
    expand_tilde(Path::new(include));
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::tempdir;

  use super::Config;
  use crate::calendar::DateMode;

  #[test]
  fn defaults_cover_every_key() {
    let cfg = Config::default();
    assert_eq!(
      cfg.calendar_max_per_day(),
      5
    );
    assert_eq!(
      cfg.calendar_mode(),
      DateMode::Due
    );
    assert_eq!(
      cfg.reminder_window().tolerance,
      chrono::Duration::hours(4)
    );
    let options = cfg.dispatch_options();
    assert!(
      options.notify_upcoming
        && options.notify_overdue
    );
    assert!(cfg.color());
    assert_eq!(cfg.timezone(), None);
  }

  #[test]
  fn rc_text_and_overrides_layer() {
    let mut cfg = Config::from_text(
      "# reminders\n\
       calendar.max_per_day = 3\n\
       calendar.mode=start  # start axis\n\
       notify.overdue=off\n\
       timezone=Asia/Tokyo\n"
    )
    .expect("rc parses");
    assert_eq!(
      cfg.calendar_max_per_day(),
      3
    );
    assert_eq!(
      cfg.calendar_mode(),
      DateMode::Start
    );
    assert!(
      !cfg
        .dispatch_options()
        .notify_overdue
    );
    assert_eq!(
      cfg.timezone().as_deref(),
      Some("Asia/Tokyo")
    );

    cfg.apply_overrides([
      (
        "rc.calendar.max_per_day"
          .to_string(),
        "8".to_string()
      ),
      (
        "reminder.tolerance_hours"
          .to_string(),
        "nope".to_string()
      )
    ]);
    assert_eq!(
      cfg.calendar_max_per_day(),
      8
    );
    assert_eq!(
      cfg.get_i64(
        "reminder.tolerance_hours"
      ),
      None
    );
    assert_eq!(
      cfg.reminder_window().tolerance,
      chrono::Duration::hours(4)
    );
  }

  #[test]
  fn malformed_line_is_an_error() {
    assert!(
      Config::from_text("no equals sign")
        .is_err()
    );
  }

  #[test]
  fn kirarc_follows_includes() {
    let temp = tempdir().expect("tempdir");
    let extra = temp.path().join("extra.rc");
    fs::write(&extra, "color=off\n")
      .expect("write include");
    let rc = temp.path().join("kirarc");
    fs::write(
      &rc,
      "include extra.rc\napi.base=http://example.test/task\n"
    )
    .expect("write kirarc");

    let cfg = Config::load(Some(rc.as_path()))
      .expect("kirarc loads");
    assert!(!cfg.color());
    assert_eq!(
      cfg.api_base(),
      "http://example.test/task"
    );
    assert_eq!(cfg.loaded_files.len(), 2);
  }
}

use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use chrono::NaiveDate;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::calendar::DateMode;
use crate::datetime::{parse_civil_date, parse_month};
use crate::filter::{PriorityBand, TaskFilter};
use crate::task::Status;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "kira",
    version,
    about = "Kira: task calendar, overdue tracking and deadline reminders",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "kirarc", global = true)]
    pub kirarc: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    /// Read the task list from a JSON file instead of the API.
    #[arg(long = "tasks", global = true)]
    pub tasks: Option<PathBuf>,

    /// Pin the civil date used as "today" (YYYY-MM-DD).
    #[arg(long = "today", value_parser = parse_date_arg, global = true)]
    pub today: Option<NaiveDate>,

    /// Act as this user id; a different id than last time resets reminder
    /// settings and notification tracking.
    #[arg(long = "user", global = true)]
    pub user: Option<i64>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Month grid of tasks and subtasks.
    Calendar(CalendarArgs),
    /// Tasks past their deadline.
    Overdue(FilterArgs),
    /// Tasks inside the reminder window.
    Upcoming,
    /// Run one notification batch.
    Notify {
        #[arg(long)]
        dry_run: bool,
    },
    /// Reload and notify on an interval.
    Watch {
        #[arg(long, default_value_t = 300)]
        interval: u64,
        /// Stop after this many batches.
        #[arg(long)]
        iterations: Option<u32>,
    },
    /// Per-project progress and the Gantt date range.
    Timeline,
    /// Show or change reminder preferences.
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
    /// Forget which notifications were sent today.
    ResetNotifications,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SettingsAction {
    Show,
    /// Days before the deadline to remind; 0 disables.
    Set { days: u32 },
    Reset,
}

#[derive(Args, Debug, Clone, Default)]
pub struct CalendarArgs {
    /// Month to show (YYYY-MM); defaults to the current month.
    #[arg(long, value_parser = parse_month_arg)]
    pub month: Option<NaiveDate>,

    /// Which date places a task: start or due.
    #[arg(long, value_parser = parse_mode_arg)]
    pub mode: Option<DateMode>,

    /// Include subtasks at every nesting level.
    #[arg(long)]
    pub nested: bool,

    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    #[arg(long, value_parser = parse_status_arg)]
    pub status: Option<Status>,

    #[arg(long, value_parser = parse_priority_arg)]
    pub priority: Option<PriorityBand>,

    #[arg(long)]
    pub project: Option<i64>,

    #[arg(long)]
    pub tag: Option<String>,
}

impl FilterArgs {
    pub fn to_filter(&self) -> TaskFilter {
        TaskFilter {
            status: self.status,
            priority: self.priority,
            project_id: self.project,
            tag: self.tag.clone(),
        }
    }
}

fn parse_date_arg(raw: &str) -> Result<NaiveDate, String> {
    parse_civil_date(raw.trim()).map_err(|err| err.to_string())
}

fn parse_month_arg(raw: &str) -> Result<NaiveDate, String> {
    parse_month(raw).map_err(|_| format!("expected YYYY-MM, got {raw:?}"))
}

fn parse_mode_arg(raw: &str) -> Result<DateMode, String> {
    DateMode::from_key(raw).ok_or_else(|| format!("expected start or due, got {raw:?}"))
}

fn parse_status_arg(raw: &str) -> Result<Status, String> {
    Status::parse(raw).ok_or_else(|| {
        format!("unknown status {raw:?}; expected To-do, In-progress, Blocked or Completed")
    })
}

fn parse_priority_arg(raw: &str) -> Result<PriorityBand, String> {
    PriorityBand::from_key(raw).ok_or_else(|| format!("expected high, medium or low, got {raw:?}"))
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` overrides out of
/// the argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest.split_once('=').or_else(|| rest.split_once(':'));
            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((format!("rc.{k}"), v.to_string()));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use chrono::NaiveDate;
    use clap::Parser;

    use super::{Command, GlobalCli, SettingsAction, preprocess_args};
    use crate::calendar::DateMode;
    use crate::filter::PriorityBand;
    use crate::task::Status;

    fn args(raw: &[&str]) -> Vec<OsString> {
        raw.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&args(&[
            "kira",
            "rc.calendar.mode=start",
            "calendar",
            "rc.color:off",
        ]))
        .expect("preprocess");
        assert_eq!(pre.cleaned_args, args(&["kira", "calendar"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.calendar.mode".to_string(), "start".to_string()),
                ("rc.color".to_string(), "off".to_string()),
            ]
        );
    }

    #[test]
    fn calendar_flags_parse() {
        let cli = GlobalCli::try_parse_from([
            "kira",
            "--today",
            "2024-06-11",
            "calendar",
            "--month",
            "2024-07",
            "--mode",
            "start",
            "--status",
            "blocked",
            "--priority",
            "high",
        ])
        .expect("parses");

        assert_eq!(cli.today, NaiveDate::from_ymd_opt(2024, 6, 11));
        let Some(Command::Calendar(cal)) = cli.command else {
            panic!("expected calendar command");
        };
        assert_eq!(cal.month, NaiveDate::from_ymd_opt(2024, 7, 1));
        assert_eq!(cal.mode, Some(DateMode::Start));
        let filter = cal.filter.to_filter();
        assert_eq!(filter.status, Some(Status::Blocked));
        assert_eq!(filter.priority, Some(PriorityBand::High));
    }

    #[test]
    fn rejects_loose_dates_and_parses_settings() {
        assert!(GlobalCli::try_parse_from(["kira", "--today", "6/11/2024", "overdue"]).is_err());

        let cli = GlobalCli::try_parse_from(["kira", "settings", "set", "3", "-v"]).expect("parses");
        assert_eq!(cli.verbose, 1);
        assert!(matches!(
            cli.command,
            Some(Command::Settings {
                action: Some(SettingsAction::Set { days: 3 })
            })
        ));
    }
}

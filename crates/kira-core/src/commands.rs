mod notify;
mod settings;
mod views;

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument};

use crate::api::TaskSource;
use crate::cli::Command;
use crate::config::Config;
use crate::datetime::Zone;
use crate::dispatch::{DispatchContext, Notifier};
use crate::render::Renderer;
use crate::state::AppState;
use crate::store::BlobStore;

/// Everything a command needs: configuration, the clock, application
/// state and the two remote seams.
pub struct Session {
    pub cfg: Config,
    pub zone: Zone,
    pinned_today: Option<NaiveDate>,
    pub state: AppState,
    source: Box<dyn TaskSource>,
    notifier: Box<dyn Notifier>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("zone", &self.zone)
            .field("pinned_today", &self.pinned_today)
            .field("source", &self.source.describe())
            .field("state", &self.state)
            .finish()
    }
}

impl Session {
    pub fn new(
        cfg: Config,
        zone: Zone,
        pinned_today: Option<NaiveDate>,
        store: Arc<dyn BlobStore>,
        source: Box<dyn TaskSource>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        let today = pinned_today.unwrap_or_else(|| zone.civil_today(Utc::now()));
        let mut state = AppState::new(store, today);
        state.set_date_mode(cfg.calendar_mode());
        Self {
            cfg,
            zone,
            pinned_today,
            state,
            source,
            notifier,
        }
    }

    /// A pinned day is evaluated at its local midnight.
    pub fn now(&self) -> DateTime<Utc> {
        match self.pinned_today {
            Some(day) => self.zone.midnight_utc(day),
            None => Utc::now(),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.pinned_today
            .unwrap_or_else(|| self.zone.civil_today(Utc::now()))
    }

    /// Replaces the task snapshot from the configured source.
    #[instrument(skip(self), fields(source = %self.source.describe()))]
    pub fn reload(&mut self) -> anyhow::Result<()> {
        let tasks = self
            .source
            .fetch_tasks()
            .with_context(|| format!("failed to load tasks from {}", self.source.describe()))?;
        self.state.set_tasks(tasks);
        Ok(())
    }

    pub fn dispatch_context(&self) -> DispatchContext {
        DispatchContext {
            now: self.now(),
            zone: self.zone,
            settings: self.state.reminder_settings(),
            window: self.cfg.reminder_window(),
            options: self.cfg.dispatch_options(),
        }
    }

    fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }
}

#[instrument(skip(session, renderer, out))]
pub fn dispatch(
    session: &mut Session,
    renderer: &Renderer,
    command: Option<Command>,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let command = command.unwrap_or_else(|| {
        debug!("no explicit command, showing the calendar");
        Command::Calendar(Default::default())
    });

    match command {
        Command::Calendar(args) => views::cmd_calendar(session, renderer, &args, out),
        Command::Overdue(args) => views::cmd_overdue(session, renderer, &args, out),
        Command::Upcoming => views::cmd_upcoming(session, renderer, out),
        Command::Timeline => views::cmd_timeline(session, renderer, out),
        Command::Notify { dry_run } => notify::cmd_notify(session, renderer, dry_run, out),
        Command::Watch {
            interval,
            iterations,
        } => notify::cmd_watch(session, renderer, interval, iterations, out),
        Command::Settings { action } => settings::cmd_settings(session, renderer, action, out),
        Command::ResetNotifications => {
            session.state.reset_notifications();
            info!("notification registry reset");
            writeln!(out, "notification tracking cleared")?;
            Ok(())
        }
    }
}

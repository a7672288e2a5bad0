use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::datetime::{Zone, add_days};
use crate::error::EngineError;
use crate::store::{BlobStore, REMINDER_SETTINGS_KEY, load_json, save_json};
use crate::task::Task;

pub const MAX_REMINDER_DAYS: u32 = 365;
pub const DEFAULT_TOLERANCE_HOURS: i64 = 4;

/// User reminder preference; `reminder_days == 0` disables reminders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReminderSettings {
    pub reminder_days: u32,
}

impl ReminderSettings {
    pub fn new(reminder_days: u32) -> Result<Self, EngineError> {
        if reminder_days > MAX_REMINDER_DAYS {
            return Err(EngineError::InvalidSetting {
                reason: format!(
                    "reminder days must be between 0 and {MAX_REMINDER_DAYS}, got {reminder_days}"
                ),
            });
        }
        Ok(Self { reminder_days })
    }

    pub fn enabled(&self) -> bool {
        self.reminder_days > 0
    }

    /// Missing or corrupt preferences fall back to defaults.
    #[tracing::instrument(skip(store))]
    pub fn load(store: &dyn BlobStore) -> Self {
        let loaded = load_json::<Self>(store, REMINDER_SETTINGS_KEY).unwrap_or_default();
        if loaded.reminder_days > MAX_REMINDER_DAYS {
            warn!(
                reminder_days = loaded.reminder_days,
                "stored reminder days out of range; using defaults"
            );
            return Self::default();
        }
        debug!(reminder_days = loaded.reminder_days, "loaded reminder settings");
        loaded
    }

    #[tracing::instrument(skip(store))]
    pub fn save(&self, store: &dyn BlobStore) -> Result<(), EngineError> {
        save_json(store, REMINDER_SETTINGS_KEY, self)?;
        info!(reminder_days = self.reminder_days, "saved reminder settings");
        Ok(())
    }

    #[tracing::instrument(skip(store))]
    pub fn reset(store: &dyn BlobStore) -> Result<(), EngineError> {
        store.remove(REMINDER_SETTINGS_KEY)?;
        info!("reminder settings reset to defaults");
        Ok(())
    }
}

/// Tolerance around the reminder lead time. Reload-driven checks do not
/// run on a fixed tick, so the window is widened on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderWindow {
    pub tolerance: Duration,
}

impl Default for ReminderWindow {
    fn default() -> Self {
        Self {
            tolerance: Duration::hours(DEFAULT_TOLERANCE_HOURS),
        }
    }
}

impl ReminderWindow {
    pub fn with_tolerance_hours(hours: i64) -> Self {
        Self {
            tolerance: Duration::hours(hours.max(0)),
        }
    }

    /// Deadline `reminder_days` away, give or take the tolerance. Past
    /// deadlines never qualify.
    pub fn contains(
        &self,
        now: DateTime<Utc>,
        deadline: DateTime<Utc>,
        reminder_days: u32,
    ) -> bool {
        if reminder_days == 0 {
            return false;
        }

        let until = deadline - now;
        if until < Duration::zero() {
            return false;
        }

        let lead = Duration::days(i64::from(reminder_days));
        until >= lead - self.tolerance && until <= lead + self.tolerance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpcomingReminder {
    pub task_id: i64,
    pub reminder_days: u32,
    pub deadline: NaiveDate,
}

/// `deadline - reminder_days`, or nothing when reminders are off.
pub fn compute_reminder_date(deadline: NaiveDate, reminder_days: u32) -> Option<NaiveDate> {
    (reminder_days > 0).then(|| add_days(deadline, -i64::from(reminder_days)))
}

pub fn is_within_reminder_window(
    now: DateTime<Utc>,
    deadline: DateTime<Utc>,
    reminder_days: u32,
    window: ReminderWindow,
) -> bool {
    window.contains(now, deadline, reminder_days)
}

/// Resolves the task deadline to local midnight and checks the window.
pub fn upcoming_reminder(
    task: &Task,
    settings: ReminderSettings,
    now: DateTime<Utc>,
    zone: Zone,
    window: ReminderWindow,
) -> Option<UpcomingReminder> {
    if task.is_completed() || !settings.enabled() {
        return None;
    }
    let deadline = task.deadline?;
    let deadline_at = zone.midnight_utc(deadline);

    window
        .contains(now, deadline_at, settings.reminder_days)
        .then_some(UpcomingReminder {
            task_id: task.id,
            reminder_days: settings.reminder_days,
            deadline,
        })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    use super::{
        ReminderSettings, ReminderWindow, compute_reminder_date, is_within_reminder_window,
        upcoming_reminder,
    };
    use crate::datetime::Zone;
    use crate::store::{BlobStore, MemoryStore, REMINDER_SETTINGS_KEY};
    use crate::task::{Status, Task};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 9, 1, 0, 0)
            .single()
            .expect("valid now")
    }

    #[test]
    fn one_day_window_uses_four_hour_tolerance() {
        let window = ReminderWindow::default();
        let now = now();

        assert!(is_within_reminder_window(now, now + Duration::hours(23), 1, window));
        assert!(is_within_reminder_window(now, now + Duration::hours(20), 1, window));
        assert!(is_within_reminder_window(now, now + Duration::hours(28), 1, window));
        assert!(!is_within_reminder_window(now, now + Duration::hours(30), 1, window));
        assert!(!is_within_reminder_window(now, now + Duration::hours(19), 1, window));
        assert!(!is_within_reminder_window(now, now - Duration::hours(1), 1, window));
    }

    #[test]
    fn zero_days_never_reminds() {
        let window = ReminderWindow::with_tolerance_hours(48);
        let now = now();
        for hours in [0, 1, 12, 24, 72] {
            assert!(!is_within_reminder_window(now, now + Duration::hours(hours), 0, window));
        }
        let deadline = NaiveDate::from_ymd_opt(2024, 6, 10).expect("valid date");
        assert_eq!(compute_reminder_date(deadline, 0), None);
        assert_eq!(
            compute_reminder_date(deadline, 3),
            NaiveDate::from_ymd_opt(2024, 6, 7)
        );
    }

    #[test]
    fn upcoming_uses_local_midnight_of_deadline() {
        let zone = Zone::Named(chrono_tz::UTC);
        let settings = ReminderSettings::new(1).expect("valid settings");
        let task = Task::new(9, "ship", Status::Todo)
            .with_deadline(NaiveDate::from_ymd_opt(2024, 6, 10).expect("valid date"));

        // 23 hours before 2024-06-10T00:00Z.
        let found = upcoming_reminder(&task, settings, now(), zone, ReminderWindow::default())
            .expect("inside window");
        assert_eq!(found.task_id, 9);
        assert_eq!(found.reminder_days, 1);

        let early = now() - Duration::hours(7);
        assert!(upcoming_reminder(&task, settings, early, zone, ReminderWindow::default()).is_none());

        let mut done = task.clone();
        done.status = Status::Completed;
        assert!(upcoming_reminder(&done, settings, now(), zone, ReminderWindow::default()).is_none());
    }

    #[test]
    fn settings_persist_validate_and_reset() {
        let store = MemoryStore::new();
        assert_eq!(ReminderSettings::load(&store), ReminderSettings::default());

        ReminderSettings::new(3).expect("valid").save(&store).expect("save");
        assert_eq!(ReminderSettings::load(&store).reminder_days, 3);
        assert_eq!(
            store.get(REMINDER_SETTINGS_KEY).expect("get").as_deref(),
            Some(r#"{"reminderDays":3}"#)
        );

        assert!(ReminderSettings::new(366).is_err());

        store.set(REMINDER_SETTINGS_KEY, "garbage").expect("set");
        assert_eq!(ReminderSettings::load(&store), ReminderSettings::default());

        store
            .set(REMINDER_SETTINGS_KEY, r#"{"reminderDays":2,"showUpcoming":true}"#)
            .expect("set");
        assert_eq!(ReminderSettings::load(&store).reminder_days, 2);

        ReminderSettings::reset(&store).expect("reset");
        assert_eq!(ReminderSettings::load(&store), ReminderSettings::default());
    }
}

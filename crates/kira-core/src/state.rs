use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::calendar::DateMode;
use crate::datetime::{add_months, start_of_month};
use crate::dedup::NotificationDeduplicator;
use crate::dispatch::DispatchGate;
use crate::error::EngineError;
use crate::filter::FilterSync;
use crate::reminder::ReminderSettings;
use crate::store::{BlobStore, CURRENT_USER_KEY, load_json, save_json};
use crate::task::{Task, UserRef};

/// Application state for one session: the task snapshot, the viewer,
/// calendar position and the stores behind reminders and dispatch.
pub struct AppState {
    tasks: Vec<Task>,
    user: Option<UserRef>,
    month: NaiveDate,
    date_mode: DateMode,
    filters: FilterSync,
    store: Arc<dyn BlobStore>,
    gate: DispatchGate,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("tasks", &self.tasks.len())
            .field("user", &self.user)
            .field("month", &self.month)
            .field("date_mode", &self.date_mode)
            .finish()
    }
}

impl AppState {
    pub fn new(store: Arc<dyn BlobStore>, today: NaiveDate) -> Self {
        let dedup = NotificationDeduplicator::open(Arc::clone(&store));
        let user = load_json::<UserRef>(store.as_ref(), CURRENT_USER_KEY);
        Self {
            tasks: vec![],
            user,
            month: start_of_month(today),
            date_mode: DateMode::default(),
            filters: FilterSync::new().with_renderer(|side, filter| {
                debug!(?side, ?filter, "mirrored filter re-rendered");
            }),
            store,
            gate: DispatchGate::new(dedup),
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn set_tasks(&mut self, tasks: Vec<Task>) {
        info!(count = tasks.len(), "task snapshot replaced");
        self.tasks = tasks;
    }

    pub fn current_month(&self) -> NaiveDate {
        self.month
    }

    pub fn set_month(&mut self, month: NaiveDate) {
        self.month = start_of_month(month);
    }

    pub fn shift_month(&mut self, months: i32) -> NaiveDate {
        self.month = add_months(self.month, months);
        self.month
    }

    pub fn jump_to_today(&mut self, today: NaiveDate) -> NaiveDate {
        self.set_month(today);
        self.month
    }

    pub fn date_mode(&self) -> DateMode {
        self.date_mode
    }

    pub fn set_date_mode(&mut self, mode: DateMode) {
        self.date_mode = mode;
    }

    pub fn filters(&self) -> &FilterSync {
        &self.filters
    }

    pub fn filters_mut(&mut self) -> &mut FilterSync {
        &mut self.filters
    }

    pub fn user(&self) -> Option<&UserRef> {
        self.user.as_ref()
    }

    pub fn store(&self) -> &dyn BlobStore {
        self.store.as_ref()
    }

    pub fn gate(&self) -> &DispatchGate {
        &self.gate
    }

    pub fn reminder_settings(&self) -> ReminderSettings {
        ReminderSettings::load(self.store.as_ref())
    }

    pub fn set_reminder_days(&self, days: u32) -> Result<ReminderSettings, EngineError> {
        let settings = ReminderSettings::new(days)?;
        settings.save(self.store.as_ref())?;
        Ok(settings)
    }

    pub fn reset_reminder_settings(&self) -> Result<(), EngineError> {
        ReminderSettings::reset(self.store.as_ref())
    }

    /// Waits for any in-flight batch before wiping the registry.
    pub fn reset_notifications(&self) {
        self.gate.dedup().clear();
    }

    /// A different viewer starts with default reminder settings and an
    /// empty notification registry. The viewer is remembered in the store
    /// so the next session can tell whether it changed.
    #[tracing::instrument(skip(self, user), fields(user_id = user.as_ref().map(|u| u.id)))]
    pub fn switch_user(&mut self, user: Option<UserRef>) {
        let previous = self.user.as_ref().map(|u| u.id);
        let next = user.as_ref().map(|u| u.id);
        self.user = user;
        if previous == next {
            return;
        }

        let persisted = match &self.user {
            Some(user) => save_json(self.store.as_ref(), CURRENT_USER_KEY, user),
            None => self.store.remove(CURRENT_USER_KEY),
        };
        if let Err(err) = persisted {
            warn!(error = %err, "failed persisting current user");
        }

        if let Err(err) = self.reset_reminder_settings() {
            warn!(error = %err, "failed resetting reminder settings on user switch");
        }
        self.reset_notifications();
        info!(?previous, ?next, "switched user");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use super::AppState;
    use crate::dedup::DedupKey;
    use crate::store::MemoryStore;
    use crate::task::UserRef;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn user(id: i64) -> UserRef {
        UserRef {
            id,
            name: None,
            email: None,
        }
    }

    #[test]
    fn month_navigation_stays_on_first_of_month() {
        let mut state = AppState::new(Arc::new(MemoryStore::new()), day(2024, 1, 31));
        assert_eq!(state.current_month(), day(2024, 1, 1));
        assert_eq!(state.shift_month(1), day(2024, 2, 1));
        assert_eq!(state.shift_month(-14), day(2022, 12, 1));

        state.set_month(day(2025, 7, 19));
        assert_eq!(state.current_month(), day(2025, 7, 1));
        assert_eq!(state.jump_to_today(day(2024, 6, 11)), day(2024, 6, 1));
    }

    #[test]
    fn switching_user_resets_settings_and_registry() {
        let mut state = AppState::new(Arc::new(MemoryStore::new()), day(2024, 6, 11));
        state.switch_user(Some(user(1)));
        state.set_reminder_days(3).expect("valid days");

        let key = DedupKey::overdue(5, day(2024, 6, 11));
        state.gate().dedup().mark_sent(&key, day(2024, 6, 11));

        state.switch_user(Some(user(1)));
        assert_eq!(state.reminder_settings().reminder_days, 3);

        state.switch_user(Some(user(2)));
        assert_eq!(state.reminder_settings().reminder_days, 0);
        assert_eq!(state.gate().dedup().sent_count(), 0);
        assert_eq!(state.user().map(|u| u.id), Some(2));
    }

    #[test]
    fn remembered_user_survives_a_new_session() {
        let store = Arc::new(MemoryStore::new());
        {
            let mut state = AppState::new(store.clone(), day(2024, 6, 11));
            state.switch_user(Some(user(7)));
            state.set_reminder_days(2).expect("valid days");
        }

        let mut state = AppState::new(store.clone(), day(2024, 6, 12));
        assert_eq!(state.user().map(|u| u.id), Some(7));
        state.switch_user(Some(user(7)));
        assert_eq!(state.reminder_settings().reminder_days, 2);

        state.switch_user(None);
        let state = AppState::new(store, day(2024, 6, 12));
        assert_eq!(state.user(), None);
        assert_eq!(state.reminder_settings().reminder_days, 0);
    }
}

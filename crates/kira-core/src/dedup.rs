use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::datetime::{format_civil_date, parse_civil_date};
use crate::store::{BlobStore, SENT_NOTIFICATIONS_KEY, SESSION_DATE_KEY, save_json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Upcoming,
    Overdue,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Overdue => "overdue",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{kind}_{task_id}_{variant}_{day}`. Upcoming keys carry the lead time
/// so a mid-day settings change is not suppressed by an earlier send.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub kind: NotificationKind,
    pub task_id: i64,
    pub variant: String,
    pub day: NaiveDate,
}

impl DedupKey {
    pub fn upcoming(task_id: i64, reminder_days: u32, day: NaiveDate) -> Self {
        Self {
            kind: NotificationKind::Upcoming,
            task_id,
            variant: format!("{reminder_days}days"),
            day,
        }
    }

    pub fn overdue(task_id: i64, day: NaiveDate) -> Self {
        Self {
            kind: NotificationKind::Overdue,
            task_id,
            variant: "due".to_string(),
            day,
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.kind,
            self.task_id,
            self.variant,
            format_civil_date(self.day)
        )
    }
}

/// Per-day record of sent notifications. Every check and mark re-reads
/// the blob store first, so batches from other sessions are honoured and
/// never overwritten. Keys whose write failed stay in memory and are
/// merged back into each reload.
pub struct NotificationDeduplicator {
    store: Arc<dyn BlobStore>,
    sent: BTreeSet<String>,
    unsynced: BTreeSet<String>,
    session_date: Option<NaiveDate>,
    date_unsynced: bool,
}

impl fmt::Debug for NotificationDeduplicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationDeduplicator")
            .field("sent", &self.sent.len())
            .field("unsynced", &self.unsynced.len())
            .field("session_date", &self.session_date)
            .finish()
    }
}

impl NotificationDeduplicator {
    #[tracing::instrument(skip(store))]
    pub fn open(store: Arc<dyn BlobStore>) -> Self {
        let mut dedup = Self {
            store,
            sent: BTreeSet::new(),
            unsynced: BTreeSet::new(),
            session_date: None,
            date_unsynced: false,
        };
        dedup.reload();
        dedup
    }

    /// Re-reads persisted state. A store that cannot be read leaves the
    /// in-memory state as it was; a corrupt registry counts as empty.
    pub fn reload(&mut self) {
        match self.store.get(SESSION_DATE_KEY) {
            Ok(_) if self.date_unsynced => {}
            Ok(raw) => {
                self.session_date = raw.and_then(|raw| parse_civil_date(raw.trim()).ok());
            }
            Err(err) => {
                warn!(error = %err, "session date unavailable; keeping in-memory state");
            }
        }

        match self.store.get(SENT_NOTIFICATIONS_KEY) {
            Ok(raw) => {
                let persisted = raw
                    .and_then(|raw| match serde_json::from_str::<BTreeSet<String>>(&raw) {
                        Ok(set) => Some(set),
                        Err(err) => {
                            warn!(error = %err, "discarding corrupt notification registry");
                            None
                        }
                    })
                    .unwrap_or_default();
                self.sent = persisted.union(&self.unsynced).cloned().collect();
            }
            Err(err) => {
                warn!(error = %err, "notification registry unavailable; keeping in-memory state");
            }
        }

        debug!(
            session_date = ?self.session_date,
            sent = self.sent.len(),
            unsynced = self.unsynced.len(),
            "loaded notification registry"
        );
    }

    pub fn session_date(&self) -> Option<NaiveDate> {
        self.session_date
    }

    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }

    /// Reloads, applies day rollover, then reports whether `key` is still
    /// unsent.
    pub fn should_fire(&mut self, key: &DedupKey, today: NaiveDate) -> bool {
        self.reload();
        self.roll_over(today);
        let fire = !self.sent.contains(&key.to_string());
        debug!(key = %key, fire, "dedup check");
        fire
    }

    /// Read-only check for previews against the last loaded state; a
    /// stale session counts as unsent.
    pub fn is_sent(&self, key: &DedupKey, today: NaiveDate) -> bool {
        self.session_date == Some(today) && self.sent.contains(&key.to_string())
    }

    pub fn mark_sent(&mut self, key: &DedupKey, today: NaiveDate) {
        self.reload();
        self.roll_over(today);
        let key = key.to_string();
        if self.sent.insert(key.clone()) {
            self.persist_sent(key);
        }
    }

    /// Drops all tracking; used on user switch and explicit reset.
    #[tracing::instrument(skip(self))]
    pub fn clear(&mut self) {
        self.sent.clear();
        self.unsynced.clear();
        self.session_date = None;
        self.date_unsynced = false;
        for key in [SENT_NOTIFICATIONS_KEY, SESSION_DATE_KEY] {
            if let Err(err) = self.store.remove(key) {
                warn!(error = %err, "failed clearing notification registry");
            }
        }
        info!("notification tracking cleared");
    }

    fn roll_over(&mut self, today: NaiveDate) {
        if self.session_date == Some(today) {
            return;
        }

        info!(
            previous = ?self.session_date,
            today = %today,
            discarded = self.sent.len(),
            "notification session rolled over"
        );
        self.sent.clear();
        self.unsynced.clear();
        self.session_date = Some(today);

        if let Err(err) = self.store.remove(SENT_NOTIFICATIONS_KEY) {
            warn!(error = %err, "failed discarding previous day's registry");
        }
        self.date_unsynced = match self.store.set(SESSION_DATE_KEY, &format_civil_date(today)) {
            Ok(()) => false,
            Err(err) => {
                warn!(error = %err, "failed persisting session date");
                true
            }
        };
    }

    fn persist_sent(&mut self, key: String) {
        match save_json(self.store.as_ref(), SENT_NOTIFICATIONS_KEY, &self.sent) {
            Ok(()) => self.unsynced.clear(),
            Err(err) => {
                warn!(error = %err, "failed persisting notification registry; keeping it in memory");
                self.unsynced.insert(key);
            }
        }
    }
}

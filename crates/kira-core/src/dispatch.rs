use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::datetime::Zone;
use crate::dedup::{DedupKey, NotificationDeduplicator, NotificationKind};
use crate::error::EngineError;
use crate::overdue::is_overdue;
use crate::reminder::{ReminderSettings, ReminderWindow, upcoming_reminder};
use crate::task::Task;

/// Body returned by the notify endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyResponse {
    pub success: bool,
    #[serde(default)]
    pub recipients_count: u32,
    #[serde(default)]
    pub email_id: Option<String>,
}

/// Remote side effect of a dispatch. Implementations block until the
/// call completes.
pub trait Notifier: Send + Sync {
    fn notify_upcoming(&self, task_id: i64) -> Result<NotifyResponse, EngineError>;
    fn notify_overdue(&self, task_id: i64) -> Result<NotifyResponse, EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    pub notify_upcoming: bool,
    pub notify_overdue: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            notify_upcoming: true,
            notify_overdue: true,
        }
    }
}

/// Everything a batch needs besides the tasks and the collaborators.
#[derive(Debug, Clone, Copy)]
pub struct DispatchContext {
    pub now: DateTime<Utc>,
    pub zone: Zone,
    pub settings: ReminderSettings,
    pub window: ReminderWindow,
    pub options: DispatchOptions,
}

impl DispatchContext {
    pub fn today(&self) -> NaiveDate {
        self.zone.civil_today(self.now)
    }
}

/// A positive classification that may turn into a notify call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub task_id: i64,
    pub kind: NotificationKind,
    pub key: DedupKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { recipients: u32 },
    Failed { reason: String },
    Suppressed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchEntry {
    pub task_id: i64,
    pub kind: NotificationKind,
    pub key: String,
    pub outcome: DispatchOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub batch_id: Uuid,
    pub entries: Vec<DispatchEntry>,
    /// Completed tasks left out of classification.
    pub skipped: usize,
}

impl DispatchReport {
    pub fn new(batch_id: Uuid) -> Self {
        Self {
            batch_id,
            entries: vec![],
            skipped: 0,
        }
    }

    pub fn sent(&self) -> usize {
        self.count(|outcome| matches!(outcome, DispatchOutcome::Sent { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, DispatchOutcome::Failed { .. }))
    }

    pub fn suppressed(&self) -> usize {
        self.count(|outcome| matches!(outcome, DispatchOutcome::Suppressed))
    }

    fn count(&self, pred: impl Fn(&DispatchOutcome) -> bool) -> usize {
        self.entries
            .iter()
            .filter(|entry| pred(&entry.outcome))
            .count()
    }
}

/// Classifies top-level tasks in input order; overdue before upcoming
/// within a task.
pub fn candidates(tasks: &[Task], ctx: &DispatchContext) -> Vec<Candidate> {
    let today = ctx.today();
    let mut out = Vec::new();

    for task in tasks.iter().filter(|task| !task.is_completed()) {
        if ctx.options.notify_overdue && is_overdue(task, today) {
            out.push(Candidate {
                task_id: task.id,
                kind: NotificationKind::Overdue,
                key: DedupKey::overdue(task.id, today),
            });
        }

        if ctx.options.notify_upcoming
            && let Some(reminder) =
                upcoming_reminder(task, ctx.settings, ctx.now, ctx.zone, ctx.window)
        {
            out.push(Candidate {
                task_id: task.id,
                kind: NotificationKind::Upcoming,
                key: DedupKey::upcoming(task.id, reminder.reminder_days, today),
            });
        }
    }

    out
}

/// Candidates that a batch would still send today. Touches nothing.
pub fn plan_batch(
    tasks: &[Task],
    dedup: &NotificationDeduplicator,
    ctx: &DispatchContext,
) -> Vec<Candidate> {
    let today = ctx.today();
    candidates(tasks, ctx)
        .into_iter()
        .filter(|candidate| !dedup.is_sent(&candidate.key, today))
        .collect()
}

/// Runs one dispatch pass. A candidate is marked sent only after the
/// notifier reports success; every failure stays eligible for the next
/// batch and never stops the rest of this one.
#[tracing::instrument(skip_all, fields(tasks = tasks.len()))]
pub fn dispatch_batch(
    tasks: &[Task],
    notifier: &dyn Notifier,
    dedup: &mut NotificationDeduplicator,
    ctx: &DispatchContext,
) -> DispatchReport {
    let today = ctx.today();
    let mut report = DispatchReport::new(Uuid::new_v4());
    report.skipped = tasks.iter().filter(|task| task.is_completed()).count();

    for candidate in candidates(tasks, ctx) {
        let key = candidate.key.to_string();
        if !dedup.should_fire(&candidate.key, today) {
            debug!(task_id = candidate.task_id, key = %key, "already notified today");
            report.entries.push(DispatchEntry {
                task_id: candidate.task_id,
                kind: candidate.kind,
                key,
                outcome: DispatchOutcome::Suppressed,
            });
            continue;
        }

        let result = match candidate.kind {
            NotificationKind::Overdue => notifier.notify_overdue(candidate.task_id),
            NotificationKind::Upcoming => notifier.notify_upcoming(candidate.task_id),
        };

        let outcome = match result {
            Ok(response) if response.success => {
                dedup.mark_sent(&candidate.key, today);
                info!(
                    task_id = candidate.task_id,
                    kind = %candidate.kind,
                    recipients = response.recipients_count,
                    "notification sent"
                );
                DispatchOutcome::Sent {
                    recipients: response.recipients_count,
                }
            }
            Ok(_) => {
                warn!(
                    task_id = candidate.task_id,
                    kind = %candidate.kind,
                    "notify endpoint reported failure; will retry"
                );
                DispatchOutcome::Failed {
                    reason: "endpoint reported success=false".to_string(),
                }
            }
            Err(err) => {
                warn!(
                    task_id = candidate.task_id,
                    kind = %candidate.kind,
                    error = %err,
                    "notify call failed; will retry"
                );
                DispatchOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        };

        report.entries.push(DispatchEntry {
            task_id: candidate.task_id,
            kind: candidate.kind,
            key,
            outcome,
        });
    }

    report
}

/// Single-flight wrapper around the deduplicator. Reload-triggered
/// batches go through here so two batches never interleave.
#[derive(Debug)]
pub struct DispatchGate {
    dedup: Mutex<NotificationDeduplicator>,
}

impl DispatchGate {
    pub fn new(dedup: NotificationDeduplicator) -> Self {
        Self {
            dedup: Mutex::new(dedup),
        }
    }

    /// Waits for any in-flight batch, then runs this one.
    pub fn run(
        &self,
        tasks: &[Task],
        notifier: &dyn Notifier,
        ctx: &DispatchContext,
    ) -> DispatchReport {
        let mut dedup = self.dedup.lock();
        Self::run_locked(&mut dedup, tasks, notifier, ctx)
    }

    /// Like `run`, but gives up when a batch is already in progress.
    pub fn try_run(
        &self,
        tasks: &[Task],
        notifier: &dyn Notifier,
        ctx: &DispatchContext,
    ) -> Option<DispatchReport> {
        let Some(mut dedup) = self.dedup.try_lock() else {
            debug!("dispatch batch already in flight; skipping");
            return None;
        };
        Some(Self::run_locked(&mut dedup, tasks, notifier, ctx))
    }

    /// Exclusive access for previews and resets.
    pub fn dedup(&self) -> MutexGuard<'_, NotificationDeduplicator> {
        self.dedup.lock()
    }

    fn run_locked(
        dedup: &mut NotificationDeduplicator,
        tasks: &[Task],
        notifier: &dyn Notifier,
        ctx: &DispatchContext,
    ) -> DispatchReport {
        let batch_id = Uuid::new_v4();
        let span = tracing::info_span!("dispatch_batch", batch_id = %batch_id);
        let _entered = span.enter();

        dedup.reload();
        let mut report = dispatch_batch(tasks, notifier, dedup, ctx);
        report.batch_id = batch_id;
        info!(
            sent = report.sent(),
            failed = report.failed(),
            suppressed = report.suppressed(),
            skipped = report.skipped,
            "dispatch batch finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use chrono::{NaiveDate, TimeZone, Utc};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use super::{
        DispatchContext, DispatchGate, DispatchOptions, DispatchOutcome, Notifier, NotifyResponse,
        candidates, dispatch_batch, plan_batch,
    };
    use crate::datetime::Zone;
    use crate::dedup::{DedupKey, NotificationDeduplicator, NotificationKind};
    use crate::error::EngineError;
    use crate::reminder::{ReminderSettings, ReminderWindow};
    use crate::store::MemoryStore;
    use crate::task::{Status, Task};

    #[derive(Default)]
    struct RecordingNotifier {
        calls: Mutex<Vec<(NotificationKind, i64)>>,
        failing: Mutex<BTreeSet<i64>>,
    }

    impl RecordingNotifier {
        fn fail(&self, task_id: i64) {
            self.failing.lock().insert(task_id);
        }

        fn heal(&self, task_id: i64) {
            self.failing.lock().remove(&task_id);
        }

        fn calls(&self) -> Vec<(NotificationKind, i64)> {
            self.calls.lock().clone()
        }

        fn respond(&self, kind: NotificationKind, task_id: i64) -> Result<NotifyResponse, EngineError> {
            self.calls.lock().push((kind, task_id));
            if self.failing.lock().contains(&task_id) {
                return Err(EngineError::NetworkFailure {
                    task_id,
                    reason: "connection refused".to_string(),
                });
            }
            Ok(NotifyResponse {
                success: true,
                recipients_count: 2,
                email_id: None,
            })
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify_upcoming(&self, task_id: i64) -> Result<NotifyResponse, EngineError> {
            self.respond(NotificationKind::Upcoming, task_id)
        }

        fn notify_overdue(&self, task_id: i64) -> Result<NotifyResponse, EngineError> {
            self.respond(NotificationKind::Overdue, task_id)
        }
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).expect("valid date")
    }

    fn ctx(reminder_days: u32) -> DispatchContext {
        DispatchContext {
            // 2024-06-11 01:00 UTC: 23 h before 2024-06-12 midnight.
            now: Utc
                .with_ymd_and_hms(2024, 6, 11, 1, 0, 0)
                .single()
                .expect("valid now"),
            zone: Zone::Named(chrono_tz::UTC),
            settings: ReminderSettings::new(reminder_days).expect("valid settings"),
            window: ReminderWindow::default(),
            options: DispatchOptions::default(),
        }
    }

    fn tasks() -> Vec<Task> {
        vec![
            Task::new(1, "late", Status::Todo).with_deadline(date(6, 10)),
            Task::new(2, "done", Status::Completed).with_deadline(date(5, 1)),
            Task::new(3, "tomorrow", Status::InProgress).with_deadline(date(6, 12)),
            Task::new(4, "also late", Status::Blocked).with_deadline(date(6, 1)),
        ]
    }

    fn dedup() -> NotificationDeduplicator {
        NotificationDeduplicator::open(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn classifies_in_task_order_overdue_first() {
        let found: Vec<(i64, NotificationKind)> = candidates(&tasks(), &ctx(1))
            .into_iter()
            .map(|candidate| (candidate.task_id, candidate.kind))
            .collect();
        assert_eq!(
            found,
            vec![
                (1, NotificationKind::Overdue),
                (3, NotificationKind::Upcoming),
                (4, NotificationKind::Overdue),
            ]
        );

        let mut only_upcoming = ctx(1);
        only_upcoming.options.notify_overdue = false;
        assert_eq!(candidates(&tasks(), &only_upcoming).len(), 1);
    }

    #[test]
    fn second_batch_is_suppressed() {
        let notifier = RecordingNotifier::default();
        let mut dedup = dedup();
        let ctx = ctx(1);

        let first = dispatch_batch(&tasks(), &notifier, &mut dedup, &ctx);
        assert_eq!(first.sent(), 3);
        assert_eq!(first.skipped, 1);

        let second = dispatch_batch(&tasks(), &notifier, &mut dedup, &ctx);
        assert_eq!(second.sent(), 0);
        assert_eq!(second.suppressed(), 3);
        assert_eq!(notifier.calls().len(), 3);
        assert!(plan_batch(&tasks(), &dedup, &ctx).is_empty());
    }

    #[test]
    fn failure_is_isolated_and_retried() {
        let notifier = RecordingNotifier::default();
        notifier.fail(1);
        let mut dedup = dedup();
        let ctx = ctx(0);

        let first = dispatch_batch(&tasks(), &notifier, &mut dedup, &ctx);
        assert_eq!(first.failed(), 1);
        assert_eq!(first.sent(), 1);
        assert!(matches!(
            first.entries[0].outcome,
            DispatchOutcome::Failed { .. }
        ));

        notifier.heal(1);
        let second = dispatch_batch(&tasks(), &notifier, &mut dedup, &ctx);
        assert_eq!(second.sent(), 1);
        assert_eq!(second.suppressed(), 1);
        assert_eq!(second.entries[0].task_id, 1);
    }

    #[test]
    fn unsuccessful_response_is_not_marked() {
        struct Refusing;
        impl Notifier for Refusing {
            fn notify_upcoming(&self, _task_id: i64) -> Result<NotifyResponse, EngineError> {
                Ok(NotifyResponse {
                    success: false,
                    recipients_count: 0,
                    email_id: None,
                })
            }

            fn notify_overdue(&self, task_id: i64) -> Result<NotifyResponse, EngineError> {
                self.notify_upcoming(task_id)
            }
        }

        let mut dedup = dedup();
        let report = dispatch_batch(&tasks(), &Refusing, &mut dedup, &ctx(1));
        assert_eq!(report.failed(), 3);
        assert_eq!(dedup.sent_count(), 0);
    }

    #[test]
    fn gate_reports_batch_and_skips_when_busy() {
        let gate = DispatchGate::new(dedup());
        let notifier = RecordingNotifier::default();
        let ctx = ctx(1);

        let report = gate.run(&tasks(), &notifier, &ctx);
        assert_eq!(report.sent(), 3);

        let held = gate.dedup();
        assert!(gate.try_run(&tasks(), &notifier, &ctx).is_none());
        drop(held);

        let again = gate.try_run(&tasks(), &notifier, &ctx).expect("gate free");
        assert_eq!(again.suppressed(), 3);
        assert_ne!(again.batch_id, report.batch_id);
    }

    #[test]
    fn gate_sees_sends_recorded_by_another_session() {
        let store = Arc::new(MemoryStore::new());
        let gate = DispatchGate::new(NotificationDeduplicator::open(store.clone()));
        let notifier = RecordingNotifier::default();
        let ctx = ctx(1);

        let mut other = NotificationDeduplicator::open(store);
        other.mark_sent(&DedupKey::overdue(1, date(6, 11)), date(6, 11));

        let report = gate.run(&tasks(), &notifier, &ctx);
        assert_eq!(report.sent(), 2);
        assert_eq!(report.suppressed(), 1);
        assert!(!notifier.calls().contains(&(NotificationKind::Overdue, 1)));
    }
}

use std::io::Write;

use tracing::{debug, info};

use super::Session;
use crate::calendar::bucket_tasks;
use crate::cli::{CalendarArgs, FilterArgs};
use crate::filter::{SyncEffect, TaskFilter};
use crate::flatten::FlattenDepth;
use crate::overdue::is_overdue;
use crate::reminder::upcoming_reminder;
use crate::render::Renderer;
use crate::task::Task;
use crate::views::{gantt_range, group_by_project};

pub(super) fn cmd_calendar(
    session: &mut Session,
    renderer: &Renderer,
    args: &CalendarArgs,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    session.reload()?;
    let today = session.today();

    if let Some(month) = args.month {
        session.state.set_month(month);
    }
    if let Some(mode) = args.mode {
        session.state.set_date_mode(mode);
    }
    let effect = sync_filters(session, &args.filter.to_filter(), true);
    debug!(?effect, "calendar controls applied");

    let visible: Vec<Task> = session
        .state
        .filters()
        .calendar()
        .apply(session.state.tasks())
        .into_iter()
        .cloned()
        .collect();
    let depth = if args.nested {
        FlattenDepth::Full
    } else {
        FlattenDepth::OneLevel
    };

    let cal = bucket_tasks(
        &visible,
        session.state.current_month(),
        session.state.date_mode(),
        today,
        session.cfg.calendar_max_per_day(),
        depth,
    );
    info!(items = cal.item_count(), "calendar built");
    renderer.write_calendar(&mut *out, &cal)
}

pub(super) fn cmd_overdue(
    session: &mut Session,
    renderer: &Renderer,
    args: &FilterArgs,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    session.reload()?;
    let today = session.today();
    sync_filters(session, &args.to_filter(), false);

    let overdue: Vec<&Task> = session
        .state
        .filters()
        .list()
        .apply(session.state.tasks())
        .into_iter()
        .filter(|task| is_overdue(task, today))
        .collect();

    if overdue.is_empty() {
        writeln!(out, "no overdue tasks")?;
        return Ok(());
    }
    renderer.write_task_table(&mut *out, &overdue, today)?;
    writeln!(out, "\n{} overdue task(s)", overdue.len())?;
    Ok(())
}

pub(super) fn cmd_upcoming(
    session: &mut Session,
    renderer: &Renderer,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    session.reload()?;
    let ctx = session.dispatch_context();
    if !ctx.settings.enabled() {
        writeln!(out, "reminders are off; enable them with `kira settings set <days>`")?;
        return Ok(());
    }

    let upcoming: Vec<&Task> = session
        .state
        .tasks()
        .iter()
        .filter(|task| {
            upcoming_reminder(task, ctx.settings, ctx.now, ctx.zone, ctx.window).is_some()
        })
        .collect();

    if upcoming.is_empty() {
        writeln!(out, "no tasks inside the reminder window")?;
        return Ok(());
    }
    renderer.write_reminder_table(&mut *out, &upcoming, ctx.settings)
}

pub(super) fn cmd_timeline(
    session: &mut Session,
    renderer: &Renderer,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    session.reload()?;
    let today = session.today();
    let tasks = session.state.tasks();
    let groups = group_by_project(tasks, today);
    renderer.write_timeline(&mut *out, &groups, gantt_range(tasks))
}

/// Pushes command-line filters into one side of the sync pair; the
/// other side follows.
fn sync_filters(session: &mut Session, filter: &TaskFilter, calendar: bool) -> SyncEffect {
    let sync = session.state.filters_mut();
    let mut effect = SyncEffect::default();
    for change in filter.changes() {
        let step = if calendar {
            sync.set_calendar(change)
        } else {
            sync.set_list(change)
        };
        effect.list |= step.list;
        effect.calendar |= step.calendar;
    }
    effect
}

use std::io::{self, IsTerminal, Write};

use chrono::{Datelike, NaiveDate};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::calendar::{CalendarCell, MonthCalendar, WEEKDAY_LABELS};
use crate::config::Config;
use crate::datetime::{format_civil_date, is_weekend};
use crate::dispatch::{Candidate, DispatchOutcome, DispatchReport};
use crate::flatten::FlattenedItem;
use crate::overdue::is_overdue;
use crate::reminder::{ReminderSettings, compute_reminder_date};
use crate::task::Task;
use crate::views::{ProjectGroup, subtask_progress};

const CELL_WIDTH: usize = 16;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    /// Colour follows the `color` key and is only emitted on a terminal.
    pub fn new(cfg: &Config) -> Self {
        Self::for_output(cfg, io::stdout().is_terminal())
    }

    pub fn for_output(cfg: &Config, is_terminal: bool) -> Self {
        Self {
            color: cfg.color() && is_terminal,
        }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip(self, out, cal), fields(month = %cal.month))]
    pub fn write_calendar<W: Write>(&self, mut out: W, cal: &MonthCalendar<'_>) -> anyhow::Result<()> {
        let grid_width = (CELL_WIDTH + 1) * 7 - 1;
        let title = cal.title();
        let pad = grid_width.saturating_sub(UnicodeWidthStr::width(title.as_str())) / 2;
        writeln!(out, "{}{}", " ".repeat(pad), self.paint(&title, "1"))?;

        let header: Vec<String> = WEEKDAY_LABELS
            .iter()
            .map(|label| fit(label, CELL_WIDTH))
            .collect();
        writeln!(out, "{}", header.join(" "))?;
        writeln!(out, "{}", "-".repeat(grid_width))?;

        for week in cal.weeks() {
            let day_row: Vec<String> = week.iter().map(|cell| self.day_label(cell)).collect();
            writeln!(out, "{}", day_row.join(" ").trim_end())?;

            let lines: Vec<Vec<String>> = week.iter().map(cell_lines).collect();
            let depth = lines.iter().map(Vec::len).max().unwrap_or(0);
            for row in 0..depth {
                let rendered: Vec<String> = lines
                    .iter()
                    .map(|cell| fit(cell.get(row).map_or("", String::as_str), CELL_WIDTH))
                    .collect();
                writeln!(out, "{}", rendered.join(" ").trim_end())?;
            }
            writeln!(out)?;
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, out, tasks))]
    pub fn write_task_table<W: Write>(
        &self,
        out: W,
        tasks: &[&Task],
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let headers = ["ID", "Status", "Pri", "Due", "Project", "Title", "Subtasks"]
            .map(str::to_string)
            .to_vec();

        let rows = tasks
            .iter()
            .map(|task| {
                let due = task.deadline.map(format_civil_date).unwrap_or_default();
                let due = if is_overdue(task, today) {
                    self.paint(&due, "31")
                } else {
                    due
                };
                let (done, total) = subtask_progress(task);
                vec![
                    self.paint(&task.id.to_string(), "33"),
                    task.status.to_string(),
                    task.priority.map(|p| p.to_string()).unwrap_or_default(),
                    due,
                    task.project_id.map(|p| p.to_string()).unwrap_or_default(),
                    task.display_title(),
                    if total == 0 {
                        String::new()
                    } else {
                        format!("{done}/{total}")
                    },
                ]
            })
            .collect();

        write_table(out, headers, rows)
    }

    pub fn write_reminder_table<W: Write>(
        &self,
        out: W,
        tasks: &[&Task],
        settings: ReminderSettings,
    ) -> anyhow::Result<()> {
        let headers = ["ID", "Due", "Remind on", "Title"].map(str::to_string).to_vec();
        let rows = tasks
            .iter()
            .map(|task| {
                let remind_on = task
                    .deadline
                    .and_then(|due| compute_reminder_date(due, settings.reminder_days))
                    .map(format_civil_date)
                    .unwrap_or_default();
                vec![
                    self.paint(&task.id.to_string(), "33"),
                    task.deadline.map(format_civil_date).unwrap_or_default(),
                    remind_on,
                    task.display_title(),
                ]
            })
            .collect();
        write_table(out, headers, rows)
    }

    #[tracing::instrument(skip(self, out, report), fields(batch_id = %report.batch_id))]
    pub fn write_dispatch_report<W: Write>(
        &self,
        mut out: W,
        report: &DispatchReport,
    ) -> anyhow::Result<()> {
        for entry in &report.entries {
            let (label, detail) = match &entry.outcome {
                DispatchOutcome::Sent { recipients } => {
                    (self.paint("sent", "32"), format!("{recipients} recipient(s)"))
                }
                DispatchOutcome::Failed { reason } => (self.paint("failed", "31"), reason.clone()),
                DispatchOutcome::Suppressed => {
                    (self.paint("suppressed", "2"), "already sent today".to_string())
                }
            };
            writeln!(
                out,
                "{label} {kind} task {id}: {detail}",
                kind = entry.kind,
                id = entry.task_id
            )?;
        }

        writeln!(
            out,
            "batch {}: {} sent, {} failed, {} suppressed, {} completed skipped",
            report.batch_id,
            report.sent(),
            report.failed(),
            report.suppressed(),
            report.skipped
        )?;
        Ok(())
    }

    pub fn write_plan<W: Write>(&self, mut out: W, plan: &[Candidate]) -> anyhow::Result<()> {
        if plan.is_empty() {
            writeln!(out, "nothing to notify")?;
            return Ok(());
        }
        for candidate in plan {
            writeln!(
                out,
                "would notify {} task {} ({})",
                candidate.kind, candidate.task_id, candidate.key
            )?;
        }
        Ok(())
    }

    pub fn write_timeline<W: Write>(
        &self,
        mut out: W,
        groups: &[ProjectGroup<'_>],
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> anyhow::Result<()> {
        let headers = ["Project", "Tasks", "Done", "Overdue", "Progress"]
            .map(str::to_string)
            .to_vec();
        let rows = groups
            .iter()
            .map(|group| {
                let overdue = group.summary.overdue.to_string();
                vec![
                    group.key.to_string(),
                    group.summary.total.to_string(),
                    group.summary.completed.to_string(),
                    if group.summary.overdue > 0 {
                        self.paint(&overdue, "31")
                    } else {
                        overdue
                    },
                    format!("{}%", group.summary.percent_complete()),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)?;

        match range {
            Some((from, to)) => writeln!(
                out,
                "\ngantt range {} .. {}",
                format_civil_date(from),
                format_civil_date(to)
            )?,
            None => writeln!(out, "\nno dated tasks")?,
        }
        Ok(())
    }

    pub fn write_settings<W: Write>(
        &self,
        mut out: W,
        settings: ReminderSettings,
    ) -> anyhow::Result<()> {
        if settings.enabled() {
            writeln!(
                out,
                "reminders: {} day(s) before the deadline",
                settings.reminder_days
            )?;
        } else {
            writeln!(out, "reminders: off")?;
        }
        Ok(())
    }

    fn day_label(&self, cell: &CalendarCell<'_>) -> String {
        let marker = if cell.is_today { "*" } else { "" };
        let text = fit(&format!("{}{marker}", cell.date.day()), CELL_WIDTH);
        if cell.is_today {
            self.paint(&text, "1;36")
        } else if cell.other_month {
            self.paint(&text, "2")
        } else if is_weekend(cell.date) {
            self.paint(&text, "36")
        } else {
            text
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn cell_lines(cell: &CalendarCell<'_>) -> Vec<String> {
    let mut lines: Vec<String> = cell.items.iter().map(item_label).collect();
    lines.extend(cell.overflow_label());
    lines
}

fn item_label(item: &FlattenedItem<'_>) -> String {
    let prefix = if item.is_subtask { "> " } else { "" };
    format!("{prefix}#{} {}", item.id(), item.task.display_title())
}

/// Pads or truncates to exactly `width` display columns.
fn fit(text: &str, width: usize) -> String {
    let mut out = String::new();
    let mut used = 0usize;
    for ch in text.chars() {
        let w = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w > width {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push_str(&" ".repeat(width - used));
    out
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let header_line: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(header, &width)| format!("{header:width$}"))
        .collect();
    writeln!(writer, "{}", header_line.join(" ").trim_end())?;

    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    writeln!(writer, "{}", rule.join(" "))?;

    for row in rows {
        let mut line = String::new();
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            line.push_str(cell);
            line.push_str(&" ".repeat(padding));
            line.push(' ');
        }
        writeln!(writer, "{}", line.trim_end())?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

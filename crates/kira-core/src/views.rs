use std::fmt;

use chrono::NaiveDate;

use crate::datetime::add_days;
use crate::overdue::is_overdue;
use crate::task::Task;

pub const GANTT_LEAD_DAYS: i64 = 2;
pub const GANTT_TAIL_DAYS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectKey {
    Project(i64),
    Unassigned,
}

impl ProjectKey {
    pub fn of(task: &Task) -> Self {
        task.project_id.map_or(Self::Unassigned, Self::Project)
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project(id) => write!(f, "Project {id}"),
            Self::Unassigned => f.write_str("Unassigned"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectSummary {
    pub total: usize,
    pub completed: usize,
    pub overdue: usize,
}

impl ProjectSummary {
    pub fn of<'a>(tasks: impl IntoIterator<Item = &'a Task>, today: NaiveDate) -> Self {
        let mut summary = Self::default();
        for task in tasks {
            summary.total += 1;
            if task.is_completed() {
                summary.completed += 1;
            }
            if is_overdue(task, today) {
                summary.overdue += 1;
            }
        }
        summary
    }

    /// Whole-number completion percentage; an empty project is 0%.
    pub fn percent_complete(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        ((self.completed * 100) / self.total) as u32
    }
}

#[derive(Debug, Clone)]
pub struct ProjectGroup<'a> {
    pub key: ProjectKey,
    pub tasks: Vec<&'a Task>,
    pub summary: ProjectSummary,
}

/// Groups top-level tasks by project in first-seen order.
pub fn group_by_project(tasks: &[Task], today: NaiveDate) -> Vec<ProjectGroup<'_>> {
    let mut groups: Vec<ProjectGroup<'_>> = Vec::new();
    for task in tasks {
        let key = ProjectKey::of(task);
        match groups.iter_mut().find(|group| group.key == key) {
            Some(group) => group.tasks.push(task),
            None => groups.push(ProjectGroup {
                key,
                tasks: vec![task],
                summary: ProjectSummary::default(),
            }),
        }
    }

    for group in &mut groups {
        group.summary = ProjectSummary::of(group.tasks.iter().copied(), today);
    }
    groups
}

/// `(completed, total)` over direct subtasks.
pub fn subtask_progress(task: &Task) -> (usize, usize) {
    let completed = task.subtasks.iter().filter(|sub| sub.is_completed()).count();
    (completed, task.subtasks.len())
}

/// Date span covering every start and due date in the tree, padded for
/// display. `None` when nothing is dated.
pub fn gantt_range(tasks: &[Task]) -> Option<(NaiveDate, NaiveDate)> {
    let mut dates = Vec::new();
    collect_dates(tasks, &mut dates);

    let min = dates.iter().min()?;
    let max = dates.iter().max()?;
    Some((
        add_days(*min, -GANTT_LEAD_DAYS),
        add_days(*max, GANTT_TAIL_DAYS),
    ))
}

fn collect_dates(tasks: &[Task], out: &mut Vec<NaiveDate>) {
    for task in tasks {
        out.extend(task.start_date);
        out.extend(task.deadline);
        collect_dates(&task.subtasks, out);
    }
}

use chrono::NaiveDate;

use crate::task::Task;

/// Past its deadline and not completed. A task due today is not overdue.
pub fn is_overdue(task: &Task, today: NaiveDate) -> bool {
    match task.deadline {
        Some(deadline) => !task.is_completed() && deadline < today,
        None => false,
    }
}

pub fn overdue_count(tasks: &[Task], today: NaiveDate) -> usize {
    tasks.iter().filter(|task| is_overdue(task, today)).count()
}

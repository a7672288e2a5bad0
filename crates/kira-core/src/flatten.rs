use chrono::NaiveDate;

use crate::task::Task;

/// How far below the top level a flattening pass descends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlattenDepth {
    /// Top-level tasks plus their direct subtasks.
    #[default]
    OneLevel,
    /// Every level of the subtask tree.
    Full,
}

/// A task or subtask addressed as one calendar/reminder item.
#[derive(Debug, Clone, Copy)]
pub struct FlattenedItem<'a> {
    pub task: &'a Task,
    pub is_subtask: bool,
    pub parent: Option<&'a Task>,
    pub depth: usize,
}

impl<'a> FlattenedItem<'a> {
    pub fn parent_id(&self) -> Option<i64> {
        self.parent.map(|p| p.id)
    }

    pub fn parent_title(&self) -> Option<&'a str> {
        self.parent.map(|p| p.title.as_str())
    }

    pub fn id(&self) -> i64 {
        self.task.id
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.task.start_date
    }

    pub fn deadline(&self) -> Option<NaiveDate> {
        self.task.deadline
    }
}

/// Depth-first flattening: each task precedes its subtasks, siblings keep
/// their input order, and completed subtasks are dropped together with
/// anything nested under them.
pub fn flatten_tasks<'a, I>(tasks: I, depth: FlattenDepth) -> Vec<FlattenedItem<'a>>
where
    I: IntoIterator<Item = &'a Task>,
{
    let mut out = Vec::new();
    for task in tasks {
        out.push(FlattenedItem {
            task,
            is_subtask: false,
            parent: None,
            depth: 0,
        });
        push_subtasks(task, 1, depth, &mut out);
    }
    out
}

fn push_subtasks<'a>(
    parent: &'a Task,
    level: usize,
    depth: FlattenDepth,
    out: &mut Vec<FlattenedItem<'a>>,
) {
    for sub in parent.subtasks.iter().filter(|sub| !sub.is_completed()) {
        out.push(FlattenedItem {
            task: sub,
            is_subtask: true,
            parent: Some(parent),
            depth: level,
        });
        if depth == FlattenDepth::Full {
            push_subtasks(sub, level + 1, depth, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{FlattenDepth, flatten_tasks};
    use crate::task::{Status, Task};

    fn tree() -> Vec<Task> {
        let grandchild = Task::new(4, "grandchild", Status::Todo);
        let child = Task::new(2, "child", Status::Todo).with_subtasks(vec![grandchild]);
        let done_child = Task::new(3, "done child", Status::Completed)
            .with_subtasks(vec![Task::new(5, "hidden", Status::Todo)]);
        vec![
            Task::new(1, "parent", Status::InProgress).with_subtasks(vec![child, done_child]),
            Task::new(6, "solo", Status::Blocked),
        ]
    }

    #[test]
    fn one_level_keeps_parent_first_and_drops_completed_subtasks() {
        let tasks = tree();
        let flat = flatten_tasks(&tasks, FlattenDepth::OneLevel);
        let ids: Vec<i64> = flat.iter().map(|item| item.id()).collect();
        assert_eq!(ids, vec![1, 2, 6]);

        assert!(!flat[0].is_subtask);
        assert!(flat[1].is_subtask);
        assert_eq!(flat[1].parent_id(), Some(1));
        assert_eq!(flat[1].parent_title(), Some("parent"));
        assert_eq!(flat[2].parent_id(), None);
    }

    #[test]
    fn full_depth_walks_the_whole_tree() {
        let tasks = tree();
        let flat = flatten_tasks(&tasks, FlattenDepth::Full);
        let ids: Vec<(i64, usize)> = flat.iter().map(|item| (item.id(), item.depth)).collect();
        assert_eq!(ids, vec![(1, 0), (2, 1), (4, 2), (6, 0)]);
        assert_eq!(flat[2].parent_id(), Some(2));
    }
}

use std::fmt;

use tracing::{
  debug,
  trace
};

use crate::task::{
  Status,
  Task
};

/// Priority buckets used by the list
/// view. Priorities run 1..=10.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash
)]
pub enum PriorityBand {
  High,
  Medium,
  Low
}

impl PriorityBand {
  pub fn from_key(
    raw: &str
  ) -> Option<Self> {
    match raw
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "high" | "h" => Some(Self::High),
      | "medium" | "med" | "m" => {
        Some(Self::Medium)
      }
      | "low" | "l" => Some(Self::Low),
      | _ => None
    }
  }

  pub fn as_key(self) -> &'static str {
    match self {
      | Self::High => "high",
      | Self::Medium => "medium",
      | Self::Low => "low"
    }
  }

  /// A missing priority counts as 0 and
  /// falls in no band.
  pub fn contains(
    self,
    priority: Option<u8>
  ) -> bool {
    let value = priority.unwrap_or(0);
    match self {
      | Self::High => value >= 8,
      | Self::Medium => {
        (5..=7).contains(&value)
      }
      | Self::Low => {
        (1..=4).contains(&value)
      }
    }
  }
}

impl fmt::Display for PriorityBand {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_key())
  }
}

/// Conjunction of the optional list and
/// calendar controls. Unset fields match
/// everything.
#[derive(
  Debug, Clone, Default, PartialEq, Eq,
)]
pub struct TaskFilter {
  pub status:     Option<Status>,
  pub priority:   Option<PriorityBand>,
  pub project_id: Option<i64>,
  pub tag:        Option<String>
}

impl TaskFilter {
  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }

  pub fn matches(
    &self,
    task: &Task
  ) -> bool {
    if let Some(status) = self.status
      && task.status != status
    {
      return false;
    }
    if let Some(band) = self.priority
      && !band.contains(task.priority)
    {
      return false;
    }
    if let Some(project) = self.project_id
      && task.project_id != Some(project)
    {
      return false;
    }
    if let Some(tag) = &self.tag
      && !task
        .tag
        .as_deref()
        .is_some_and(|t| {
          t.eq_ignore_ascii_case(tag)
        })
    {
      return false;
    }

    trace!(
      task_id = task.id,
      "task matches filter"
    );
    true
  }

  pub fn apply<'a>(
    &self,
    tasks: &'a [Task]
  ) -> Vec<&'a Task> {
    tasks
      .iter()
      .filter(|task| self.matches(task))
      .collect()
  }

  /// One change per control, in a fixed
  /// order, reproducing this filter.
  pub fn changes(
    &self
  ) -> [FilterChange; 4] {
    [
      FilterChange::Status(self.status),
      FilterChange::Priority(
        self.priority
      ),
      FilterChange::Project(
        self.project_id
      ),
      FilterChange::Tag(self.tag.clone())
    ]
  }

  /// Writes one control; returns whether
  /// the stored value changed.
  pub fn set(
    &mut self,
    change: &FilterChange
  ) -> bool {
    match change {
      | FilterChange::Status(value) => {
        replace_if_changed(
          &mut self.status,
          *value
        )
      }
      | FilterChange::Priority(value) => {
        replace_if_changed(
          &mut self.priority,
          *value
        )
      }
      | FilterChange::Project(value) => {
        replace_if_changed(
          &mut self.project_id,
          *value
        )
      }
      | FilterChange::Tag(value) => {
        replace_if_changed(
          &mut self.tag,
          value.clone()
        )
      }
    }
  }
}

fn replace_if_changed<T: PartialEq>(
  slot: &mut T,
  value: T
) -> bool {
  if *slot == value {
    return false;
  }
  *slot = value;
  true
}

/// One control edit; `None` clears it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterChange {
  Status(Option<Status>),
  Priority(Option<PriorityBand>),
  Project(Option<i64>),
  Tag(Option<String>)
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum ViewSide {
  List,
  Calendar
}

impl ViewSide {
  fn other(self) -> Self {
    match self {
      | Self::List => Self::Calendar,
      | Self::Calendar => Self::List
    }
  }
}

/// Views that need a re-render after a
/// control change.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq
)]
pub struct SyncEffect {
  pub list:     bool,
  pub calendar: bool
}

impl SyncEffect {
  fn mark(&mut self, side: ViewSide) {
    match side {
      | ViewSide::List => self.list = true,
      | ViewSide::Calendar => {
        self.calendar = true
      }
    }
  }
}

type RenderHook =
  Box<dyn FnMut(ViewSide, &TaskFilter)>;

/// Keeps the list and calendar controls
/// mirrored. Propagation writes the other
/// side's state and calls its renderer
/// directly, so a change never comes back
/// around through the change handler.
#[derive(Default)]
pub struct FilterSync {
  list:      TaskFilter,
  calendar:  TaskFilter,
  on_render: Option<RenderHook>
}

impl fmt::Debug for FilterSync {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.debug_struct("FilterSync")
      .field("list", &self.list)
      .field("calendar", &self.calendar)
      .field(
        "on_render",
        &self.on_render.is_some()
      )
      .finish()
  }
}

impl FilterSync {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_renderer(
    mut self,
    hook: impl FnMut(ViewSide, &TaskFilter)
    + 'static
  ) -> Self {
    self.on_render = Some(Box::new(hook));
    self
  }

  pub fn list(&self) -> &TaskFilter {
    &self.list
  }

  pub fn calendar(&self) -> &TaskFilter {
    &self.calendar
  }

  pub fn set_list(
    &mut self,
    change: FilterChange
  ) -> SyncEffect {
    self.apply(ViewSide::List, &change)
  }

  pub fn set_calendar(
    &mut self,
    change: FilterChange
  ) -> SyncEffect {
    self.apply(
      ViewSide::Calendar,
      &change
    )
  }

  fn side_mut(
    &mut self,
    side: ViewSide
  ) -> &mut TaskFilter {
    match side {
      | ViewSide::List => &mut self.list,
      | ViewSide::Calendar => {
        &mut self.calendar
      }
    }
  }

  fn render(&mut self, side: ViewSide) {
    let filter = match side {
      | ViewSide::List => &self.list,
      | ViewSide::Calendar => &self.calendar
    };
    if let Some(hook) =
      self.on_render.as_mut()
    {
      hook(side, filter);
    }
  }

  fn apply(
    &mut self,
    origin: ViewSide,
    change: &FilterChange
  ) -> SyncEffect {
    let mut effect = SyncEffect::default();
    if !self
      .side_mut(origin)
      .set(change)
    {
      return effect;
    }
    effect.mark(origin);
    self.render(origin);

    let target = origin.other();
    if self.side_mut(target).set(change) {
      debug!(
        ?origin,
        ?change,
        "mirrored filter change"
      );
      effect.mark(target);
      self.render(target);
    }

    effect
  }
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;
  use std::rc::Rc;

  use pretty_assertions::assert_eq;

  use super::{
    FilterChange,
    FilterSync,
    PriorityBand,
    SyncEffect,
    TaskFilter,
    ViewSide
  };
  use crate::task::{
    Status,
    Task
  };

  fn task(
    id: i64,
    status: Status,
    priority: Option<u8>
  ) -> Task {
    let mut task =
      Task::new(id, format!("t{id}"), status);
    task.priority = priority;
    task
  }

  #[test]
  fn priority_bands() {
    assert!(
      PriorityBand::High.contains(Some(8))
    );
    assert!(
      PriorityBand::Medium.contains(Some(5))
    );
    assert!(
      PriorityBand::Medium.contains(Some(7))
    );
    assert!(
      PriorityBand::Low.contains(Some(1))
    );
    assert!(
      !PriorityBand::Low.contains(None)
    );
    assert!(
      !PriorityBand::High.contains(Some(7))
    );
    assert_eq!(
      PriorityBand::from_key("MED"),
      Some(PriorityBand::Medium)
    );
  }

  #[test]
  fn filter_is_a_conjunction() {
    let mut tagged =
      task(3, Status::Todo, Some(9));
    tagged.tag = Some("Ops".to_string());
    tagged.project_id = Some(7);
    let tasks = vec![
      task(1, Status::Todo, Some(9)),
      task(2, Status::Blocked, Some(9)),
      tagged,
    ];

    let filter = TaskFilter {
      status: Some(Status::Todo),
      priority: Some(PriorityBand::High),
      ..TaskFilter::default()
    };
    let ids: Vec<i64> = filter
      .apply(&tasks)
      .iter()
      .map(|t| t.id)
      .collect();
    assert_eq!(ids, vec![1, 3]);

    let narrowed = TaskFilter {
      tag: Some("ops".to_string()),
      project_id: Some(7),
      ..filter
    };
    assert_eq!(narrowed.apply(&tasks).len(), 1);
    assert!(TaskFilter::default().is_empty());
  }

  #[test]
  fn list_change_updates_calendar_once() {
    let renders: Rc<RefCell<Vec<ViewSide>>> =
      Rc::default();
    let seen = Rc::clone(&renders);
    let mut sync = FilterSync::new()
      .with_renderer(move |side, _| {
        seen.borrow_mut().push(side)
      });

    let effect = sync.set_list(
      FilterChange::Status(Some(
        Status::Blocked
      ))
    );
    assert_eq!(
      effect,
      SyncEffect {
        list:     true,
        calendar: true
      }
    );
    assert_eq!(
      sync.calendar().status,
      Some(Status::Blocked)
    );
    assert_eq!(
      *renders.borrow(),
      vec![
        ViewSide::List,
        ViewSide::Calendar
      ]
    );

    // Echo from the calendar is a no-op.
    let echo = sync.set_calendar(
      FilterChange::Status(Some(
        Status::Blocked
      ))
    );
    assert_eq!(echo, SyncEffect::default());
    assert_eq!(renders.borrow().len(), 2);
  }

  #[test]
  fn calendar_change_only_touches_differing_side() {
    let mut sync = FilterSync::new();
    sync.set_list(FilterChange::Tag(Some(
      "ops".to_string()
    )));

    let effect = sync.set_calendar(
      FilterChange::Priority(Some(
        PriorityBand::Low
      ))
    );
    assert!(effect.list && effect.calendar);
    assert_eq!(
      sync.list().priority,
      Some(PriorityBand::Low)
    );
    assert_eq!(sync.list(), sync.calendar());

    let cleared = sync
      .set_list(FilterChange::Tag(None));
    assert!(cleared.calendar);
    assert_eq!(sync.calendar().tag, None);
  }
}

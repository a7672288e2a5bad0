use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::datetime::{
  add_days,
  month_grid_start,
  start_of_month
};
use crate::flatten::{
  FlattenDepth,
  FlattenedItem,
  flatten_tasks
};
use crate::task::Task;

pub const DEFAULT_MAX_PER_DAY: usize = 5;
pub const GRID_WEEKS: usize = 6;
pub const GRID_CELLS: usize =
  GRID_WEEKS * 7;
pub const WEEKDAY_LABELS: [&str; 7] = [
  "Sun", "Mon", "Tue", "Wed", "Thu",
  "Fri", "Sat"
];

/// Which date axis places an item on
/// the calendar.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default
)]
pub enum DateMode {
  Start,
  #[default]
  Due
}

impl DateMode {
  pub fn from_key(
    raw: &str
  ) -> Option<Self> {
    match raw
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "start" | "start_date" => {
        Some(Self::Start)
      }
      | "due" | "deadline" => {
        Some(Self::Due)
      }
      | _ => None
    }
  }

  pub fn as_key(self) -> &'static str {
    match self {
      | Self::Start => "start",
      | Self::Due => "due"
    }
  }
}

#[derive(Debug, Clone)]
pub struct CalendarCell<'a> {
  pub date:           NaiveDate,
  pub items:          Vec<FlattenedItem<'a>>,
  pub overflow_count: usize,
  pub other_month:    bool,
  pub is_today:       bool
}

impl CalendarCell<'_> {
  pub fn total(&self) -> usize {
    self.items.len()
      + self.overflow_count
  }

  /// `+N more` when the day holds more
  /// items than it shows.
  pub fn overflow_label(
    &self
  ) -> Option<String> {
    (self.overflow_count > 0).then(
      || {
        format!(
          "+{} more",
          self.overflow_count
        )
      }
    )
  }
}

#[derive(Debug, Clone)]
pub struct MonthCalendar<'a> {
  pub month: NaiveDate,
  pub mode:  DateMode,
  pub cells: Vec<CalendarCell<'a>>
}

impl<'a> MonthCalendar<'a> {
  pub fn title(&self) -> String {
    self
      .month
      .format("%B %Y")
      .to_string()
  }

  pub fn weeks(
    &self
  ) -> impl Iterator<
    Item = &[CalendarCell<'a>]
  > {
    self.cells.chunks(7)
  }

  pub fn cell(
    &self,
    date: NaiveDate
  ) -> Option<&CalendarCell<'a>> {
    self
      .cells
      .iter()
      .find(|cell| cell.date == date)
  }

  pub fn item_count(&self) -> usize {
    self
      .cells
      .iter()
      .map(CalendarCell::total)
      .sum()
  }
}

/// Mode-primary date with the opposite
/// axis as fallback.
pub fn bucket_date(
  item: &FlattenedItem<'_>,
  mode: DateMode
) -> Option<NaiveDate> {
  match mode {
    | DateMode::Due => {
      item
        .deadline()
        .or_else(|| item.start_date())
    }
    | DateMode::Start => {
      item
        .start_date()
        .or_else(|| item.deadline())
    }
  }
}

/// Buckets already-filtered items onto
/// the 6x7 grid of `month`. Items with
/// no date on either axis are dropped;
/// within a day, input order is kept.
#[tracing::instrument(skip_all, fields(month = %month, mode = mode.as_key(), items = items.len()))]
pub fn bucket_items<'a>(
  items: &[FlattenedItem<'a>],
  month: NaiveDate,
  mode: DateMode,
  today: NaiveDate,
  max_per_day: usize
) -> MonthCalendar<'a> {
  let month = start_of_month(month);
  let cap = max_per_day.max(1);

  let mut by_day: BTreeMap<
    NaiveDate,
    Vec<FlattenedItem<'a>>
  > = BTreeMap::new();
  let mut undated = 0usize;
  for item in items {
    match bucket_date(item, mode) {
      | Some(date) => {
        by_day
          .entry(date)
          .or_default()
          .push(*item);
      }
      | None => undated += 1
    }
  }

  let grid_start =
    month_grid_start(month);
  let mut cells =
    Vec::with_capacity(GRID_CELLS);
  for offset in 0..GRID_CELLS {
    let date = add_days(
      grid_start,
      offset as i64
    );
    let mut day_items = by_day
      .remove(&date)
      .unwrap_or_default();
    let overflow_count = day_items
      .len()
      .saturating_sub(cap);
    day_items.truncate(cap);

    cells.push(CalendarCell {
      date,
      items: day_items,
      overflow_count,
      other_month: start_of_month(date)
        != month,
      is_today: date == today
    });
  }

  tracing::debug!(
    undated,
    outside_grid = by_day.len(),
    "calendar items bucketed"
  );

  MonthCalendar {
    month,
    mode,
    cells
  }
}

/// Calendar entry point: drops completed
/// top-level tasks, flattens the rest and
/// buckets them.
pub fn bucket_tasks<'a>(
  tasks: &'a [Task],
  month: NaiveDate,
  mode: DateMode,
  today: NaiveDate,
  max_per_day: usize,
  depth: FlattenDepth
) -> MonthCalendar<'a> {
  let flat = flatten_tasks(
    tasks
      .iter()
      .filter(|task| !task.is_completed()),
    depth
  );
  bucket_items(
    &flat,
    month,
    mode,
    today,
    max_per_day
  )
}

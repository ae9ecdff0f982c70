//! View/filter engine
//!
//! Four orthogonal axes (status, tag, priority, creation date) combined
//! with AND. The view keeps the input order; it never sorts.

use chrono::{DateTime, Local, Months, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Priority, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateFilter {
    Today,
    Week,
    Month,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterState {
    #[serde(default)]
    pub status: StatusFilter,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub date: Option<DateFilter>,
}

/// A filter intent from the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "axis", content = "value", rename_all = "lowercase")]
pub enum FilterChange {
    Status(StatusFilter),
    /// Select-style: `None` or an empty id clears the axis
    Tag(Option<String>),
    Priority(Priority),
    Date(DateFilter),
    Clear,
}

impl FilterState {
    /// Selecting the active status again returns to `All`
    pub fn toggle_status(&mut self, status: StatusFilter) {
        self.status = if self.status == status {
            StatusFilter::All
        } else {
            status
        };
    }

    pub fn toggle_tag(&mut self, tag_id: &str) {
        toggle(&mut self.tag, tag_id.to_string());
    }

    pub fn set_tag(&mut self, tag_id: Option<String>) {
        self.tag = tag_id.filter(|id| !id.is_empty());
    }

    pub fn toggle_priority(&mut self, priority: Priority) {
        toggle(&mut self.priority, priority);
    }

    pub fn toggle_date(&mut self, date: DateFilter) {
        toggle(&mut self.date, date);
    }

    pub fn apply(&mut self, change: FilterChange) {
        match change {
            FilterChange::Status(status) => self.toggle_status(status),
            FilterChange::Tag(tag_id) => self.set_tag(tag_id),
            FilterChange::Priority(priority) => self.toggle_priority(priority),
            FilterChange::Date(date) => self.toggle_date(date),
            FilterChange::Clear => *self = Self::default(),
        }
    }

    fn matches(&self, task: &Task, since: Option<DateTime<Utc>>) -> bool {
        let status = match self.status {
            StatusFilter::All => true,
            StatusFilter::Active => !task.is_complete,
            StatusFilter::Completed => task.is_complete,
        };
        status
            && self
                .tag
                .as_ref()
                .is_none_or(|tag| task.tag_id.as_ref() == Some(tag))
            && self.priority.is_none_or(|p| task.priority == p)
            && since.is_none_or(|since| task.created_at >= since)
    }
}

fn toggle<T: PartialEq>(slot: &mut Option<T>, value: T) {
    if slot.as_ref() == Some(&value) {
        *slot = None;
    } else {
        *slot = Some(value);
    }
}

/// Tasks passing `filter` as of the local clock, in input order
pub fn filtered_view(tasks: &[Task], filter: &FilterState) -> Vec<Task> {
    filtered_view_at(tasks, filter, &Local::now())
}

pub fn filtered_view_at<Tz: TimeZone>(
    tasks: &[Task],
    filter: &FilterState,
    now: &DateTime<Tz>,
) -> Vec<Task> {
    let since = filter.date.map(|date| window_start(date, now));
    tasks
        .iter()
        .filter(|task| filter.matches(task, since))
        .cloned()
        .collect()
}

/// Earliest creation instant inside the date window
///
/// `today` starts at local midnight, `week` seven days before that, and
/// `month` at midnight on the same day of the previous month.
///
/// A day the previous month does not have clamps to that month's last day,
/// so Mar 29 through Mar 31 all start the window on Feb 28 (Feb 29 in leap
/// years). It never rolls forward into the current month, which would
/// shrink the window to a few days.
pub fn window_start<Tz: TimeZone>(date: DateFilter, now: &DateTime<Tz>) -> DateTime<Utc> {
    let today = now.date_naive();
    match date {
        DateFilter::Today => midnight(today, &now.timezone()),
        DateFilter::Week => midnight(today, &now.timezone()) - TimeDelta::days(7),
        DateFilter::Month => {
            let day = today.checked_sub_months(Months::new(1)).unwrap_or(today);
            midnight(day, &now.timezone())
        }
    }
}

fn midnight<Tz: TimeZone>(day: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let naive = day.and_time(NaiveTime::MIN);
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        // Midnight skipped by a DST jump; the UTC reading is close enough
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

/// Aggregate counts over the whole collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total: usize,
    pub completed: usize,
    pub created_today: usize,
    pub completed_today: usize,
}

pub fn stats(tasks: &[Task]) -> Stats {
    stats_at(tasks, &Local::now())
}

pub fn stats_at<Tz: TimeZone>(tasks: &[Task], now: &DateTime<Tz>) -> Stats {
    let tz = now.timezone();
    let today = now.date_naive();
    let on_today = |at: &DateTime<Utc>| at.with_timezone(&tz).date_naive() == today;

    Stats {
        total: tasks.len(),
        completed: tasks.iter().filter(|t| t.is_complete).count(),
        created_today: tasks.iter().filter(|t| on_today(&t.created_at)).count(),
        completed_today: tasks
            .iter()
            .filter(|t| t.is_complete && t.completed_at.as_ref().is_some_and(on_today))
            .count(),
    }
}

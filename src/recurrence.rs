//! Weekly recurrence expansion into concrete class sessions.
//!
//! A recurring setup names a date range, a set of weekday indices and a
//! time-of-day. Expansion walks the range one calendar day at a time and
//! keeps the days whose weekday was requested. Weekend days are never
//! scheduled, even when the setup asks for them.

use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

const SUNDAY: u8 = 0;
const SATURDAY: u8 = 6;

#[derive(Debug, Error)]
pub enum RecurrenceError {
    #[error("invalid date {value:?}, expected YYYY-MM-DD")]
    Parse {
        value: String,
        #[source]
        source: Option<chrono::ParseError>,
    },

    #[error("failed to persist sessions: {0:#}")]
    Persistence(anyhow::Error),
}

/// Set of weekday indices, 0 = Sunday through 6 = Saturday.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    /// Builds a set from raw indices. Duplicates collapse; the first index
    /// outside 0..=6 is returned as the error.
    pub fn from_indices<I>(indices: I) -> Result<Self, i64>
    where
        I: IntoIterator<Item = i64>,
    {
        let mut bits = 0u8;
        for idx in indices {
            if !(0..=6).contains(&idx) {
                return Err(idx);
            }
            bits |= 1u8 << idx;
        }
        Ok(Self(bits))
    }

    pub fn contains(self, idx: u8) -> bool {
        idx <= SATURDAY && self.0 & (1u8 << idx) != 0
    }

    /// Indices in ascending order.
    pub fn indices(self) -> Vec<u8> {
        (SUNDAY..=SATURDAY).filter(|d| self.contains(*d)).collect()
    }

    /// Whether a session may be placed on this weekday: requested, and not
    /// Saturday or Sunday.
    fn schedules(self, idx: u8) -> bool {
        idx != SUNDAY && idx != SATURDAY && self.contains(idx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionType {
    Lecture,
    Lab,
    Tutorial,
    Extras,
}

impl SessionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Lecture" => Some(Self::Lecture),
            "Lab" => Some(Self::Lab),
            "Tutorial" => Some(Self::Tutorial),
            "Extras" => Some(Self::Extras),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lecture => "Lecture",
            Self::Lab => "Lab",
            Self::Tutorial => "Tutorial",
            Self::Extras => "Extras",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Scheduled,
    Completed,
    Cancelled,
    Rescheduled,
}

impl SessionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Scheduled" => Some(Self::Scheduled),
            "Completed" => Some(Self::Completed),
            "Cancelled" => Some(Self::Cancelled),
            "Rescheduled" => Some(Self::Rescheduled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "Scheduled",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
            Self::Rescheduled => "Rescheduled",
        }
    }
}

/// A validated recurring setup, ready to expand.
#[derive(Debug, Clone)]
pub struct RecurrenceDescriptor {
    pub recurring_setup_id: String,
    pub group_id: String,
    pub subject_id: String,
    pub teacher_id: String,
    pub session_type: SessionType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub weekdays: WeekdaySet,
    pub start_time: String,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSessionOccurrence {
    pub id: String,
    pub recurring_setup_id: String,
    pub group_id: String,
    pub subject_id: String,
    pub teacher_id: String,
    pub session_type: SessionType,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: Option<String>,
    pub status: SessionStatus,
    pub reason: Option<String>,
}

/// Receives each non-empty batch of generated sessions. A batch is written
/// completely or not at all.
pub trait SessionSink {
    fn insert_batch(&mut self, sessions: &[ClassSessionOccurrence]) -> anyhow::Result<()>;
}

/// Parses a calendar date. Only the leading `YYYY-MM-DD` is significant, so
/// timestamps such as `2024-01-01T00:00:00Z` resolve to their date portion
/// without any timezone shift. Signed or five-digit years are rejected.
pub fn parse_date(raw: &str) -> Result<NaiveDate, RecurrenceError> {
    let trimmed = raw.trim();
    let date_part = trimmed
        .split_once(|c: char| c == 'T' || c == ' ')
        .map(|(d, _)| d)
        .unwrap_or(trimmed);
    if !has_date_shape(date_part) {
        return Err(RecurrenceError::Parse {
            value: raw.to_string(),
            source: None,
        });
    }
    NaiveDate::parse_from_str(date_part, DATE_FORMAT).map_err(|source| RecurrenceError::Parse {
        value: raw.to_string(),
        source: Some(source),
    })
}

fn has_date_shape(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 10
        && b.iter().enumerate().all(|(i, c)| match i {
            4 | 7 => *c == b'-',
            _ => c.is_ascii_digit(),
        })
}

/// Inclusive length of `[start, end]` in days; zero or negative when reversed.
pub fn range_days(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days() + 1
}

/// 0 = Sunday .. 6 = Saturday.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Dates in `[start, end]` whose weekday is requested and falls Monday to
/// Friday, ascending. A reversed range yields nothing.
pub fn expand_weekdays(
    start: NaiveDate,
    end: NaiveDate,
    weekdays: WeekdaySet,
) -> impl Iterator<Item = NaiveDate> {
    start
        .iter_days()
        .take_while(move |d| *d <= end)
        .filter(move |d| weekdays.schedules(weekday_index(*d)))
}

pub fn expand_date_strings(
    start: &str,
    end: &str,
    weekdays: WeekdaySet,
) -> Result<Vec<String>, RecurrenceError> {
    let start = parse_date(start)?;
    let end = parse_date(end)?;
    Ok(expand_weekdays(start, end, weekdays)
        .map(|d| d.format(DATE_FORMAT).to_string())
        .collect())
}

/// `HH:MM` gains a `:00` seconds component; anything else passes through.
pub fn normalize_time(raw: &str) -> String {
    if raw.len() == 5 && raw.as_bytes()[2] == b':' {
        format!("{}:00", raw)
    } else {
        raw.to_string()
    }
}

pub fn validate_time(raw: &str) -> bool {
    match raw.len() {
        5 => NaiveTime::parse_from_str(raw, "%H:%M").is_ok(),
        8 => NaiveTime::parse_from_str(raw, "%H:%M:%S").is_ok(),
        _ => false,
    }
}

/// Expands the descriptor and hands the resulting sessions to `sink` in one
/// batch. When no date qualifies the sink is never called.
pub fn materialize<S>(
    descriptor: &RecurrenceDescriptor,
    sink: &mut S,
) -> Result<Vec<ClassSessionOccurrence>, RecurrenceError>
where
    S: SessionSink + ?Sized,
{
    let start_time = normalize_time(&descriptor.start_time);
    let end_time = descriptor.end_time.as_deref().map(normalize_time);

    let sessions: Vec<ClassSessionOccurrence> = expand_weekdays(
        descriptor.start_date,
        descriptor.end_date,
        descriptor.weekdays,
    )
    .map(|date| ClassSessionOccurrence {
        id: Uuid::new_v4().to_string(),
        recurring_setup_id: descriptor.recurring_setup_id.clone(),
        group_id: descriptor.group_id.clone(),
        subject_id: descriptor.subject_id.clone(),
        teacher_id: descriptor.teacher_id.clone(),
        session_type: descriptor.session_type,
        date,
        start_time: start_time.clone(),
        end_time: end_time.clone(),
        status: SessionStatus::Scheduled,
        reason: None,
    })
    .collect();

    debug!(
        recurring_setup_id = %descriptor.recurring_setup_id,
        count = sessions.len(),
        "expanded recurring setup"
    );

    if sessions.is_empty() {
        return Ok(sessions);
    }

    sink.insert_batch(&sessions)
        .map_err(RecurrenceError::Persistence)?;
    info!(
        recurring_setup_id = %descriptor.recurring_setup_id,
        count = sessions.len(),
        "stored class sessions"
    );
    Ok(sessions)
}

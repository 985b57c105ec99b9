use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::attendance::AttendancePolicy;
use super::domain::{GradingScales, PeriodType};

/// School-year boundaries used to bound absence queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolCalendar {
    pub year_start: NaiveDate,
    pub first_term_end: NaiveDate,
    pub year_end: NaiveDate,
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl SchoolCalendar {
    /// Calendar for the school year starting in September of `start_year`.
    pub fn for_school_year(start_year: i32) -> Self {
        let fallback = NaiveDate::MIN;
        Self {
            year_start: NaiveDate::from_ymd_opt(start_year, 9, 15).unwrap_or(fallback),
            first_term_end: NaiveDate::from_ymd_opt(start_year + 1, 1, 31).unwrap_or(fallback),
            year_end: NaiveDate::from_ymd_opt(start_year + 1, 6, 10).unwrap_or(fallback),
        }
    }

    /// Calendar for the school year in progress on `today`.
    pub fn containing(today: NaiveDate) -> Self {
        let start_year = if today.month() >= 9 {
            today.year()
        } else {
            today.year() - 1
        };
        Self::for_school_year(start_year)
    }

    pub fn window(&self, period: PeriodType) -> DateWindow {
        match period {
            PeriodType::FirstTerm => DateWindow {
                from: self.year_start,
                to: self.first_term_end,
            },
            PeriodType::Final | PeriodType::MakeupExam | PeriodType::DeferredMakeup => {
                DateWindow {
                    from: self.first_term_end + Duration::days(1),
                    to: self.year_end,
                }
            }
        }
    }

    /// Enrolment date used to pick the roster of a regular session.
    pub fn roster_date(&self, period: PeriodType) -> NaiveDate {
        self.window(period).to
    }
}

/// Knobs shared by every transition guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingPolicy {
    pub calendar: SchoolCalendar,
    pub attendance: AttendancePolicy,
    pub scales: GradingScales,
}

impl GradingPolicy {
    pub fn new(calendar: SchoolCalendar, attendance: AttendancePolicy) -> Self {
        Self {
            calendar,
            attendance,
            scales: GradingScales::default(),
        }
    }

    pub fn with_scales(mut self, scales: GradingScales) -> Self {
        self.scales = scales;
        self
    }
}

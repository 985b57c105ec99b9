//! Credit bands, carried-over credits and the competency certificate.

use serde::{Deserialize, Serialize};

use super::domain::{PeriodType, PreviousCredits, StudentId};
use super::messages::{Message, MessageCode, Validation};
use super::outcomes::{GradeProfile, Verdict};
use super::session::SessionWorkspace;

/// Year level that issues the baseline-competency certificate.
pub const CERTIFICATION_YEAR: u8 = 2;

/// Grounds the council can tick to award the upper credit of a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditCriterion {
    Attendance,
    Interest,
    Participation,
    Religion,
    OtherActivities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditBand {
    pub min: u8,
    pub max: u8,
}

impl CreditBand {
    pub const fn contains(&self, credit: u8) -> bool {
        credit >= self.min && credit <= self.max
    }
}

/// Whether credits are assigned to this year level at all.
pub const fn awards_credit(year: u8) -> bool {
    matches!(year, 3..=5)
}

/// Band for the given year and average, keyed by the average rounded up.
pub fn credit_band(year: u8, average: f64) -> Option<CreditBand> {
    let key = average.ceil().clamp(0.0, 10.0) as u8;
    let min = match (year, key) {
        (3, 6) => 7,
        (3, 7) => 8,
        (3, 8) => 9,
        (3, 9) => 10,
        (3, 10) => 11,
        (4, 6) => 8,
        (4, 7) => 9,
        (4, 8) => 10,
        (4, 9) => 11,
        (4, 10) => 12,
        (5, 0..=5) => 7,
        (5, 6) => 9,
        (5, 7) => 10,
        (5, 8) => 11,
        (5, 9) => 13,
        (5, 10) => 14,
        _ => return None,
    };
    Some(CreditBand { min, max: min + 1 })
}

/// Credits earned in the years before the class's current one.
pub fn previous_credit(year: u8, credits: PreviousCredits) -> u8 {
    match year {
        4 => credits.year3.unwrap_or(0),
        5 => credits
            .year3
            .unwrap_or(0)
            .saturating_add(credits.year4.unwrap_or(0)),
        _ => 0,
    }
}

/// Credit for one admitted student given the ticked criteria.
///
/// The upper value of the band needs two criteria plus, in the graduating
/// final session, no failing grade, or in make-up sessions a recovered
/// subject scored at least 7.
pub fn suggested_credit(
    workspace: &SessionWorkspace,
    student: StudentId,
    average: f64,
    criteria: &[CreditCriterion],
    recovered_with_merit: bool,
) -> Option<u8> {
    let band = credit_band(workspace.class.year, average)?;
    let mut distinct = criteria.to_vec();
    distinct.sort();
    distinct.dedup();

    let context_allows = match workspace.session.period {
        PeriodType::Final if workspace.class.is_graduating() => {
            !GradeProfile::for_student(workspace, student).has_any_failure()
        }
        PeriodType::Final | PeriodType::FirstTerm => true,
        PeriodType::MakeupExam | PeriodType::DeferredMakeup => recovered_with_merit,
    };

    if distinct.len() >= 2 && context_allows {
        Some(band.max)
    } else {
        Some(band.min)
    }
}

/// Guard of the credits stage: certificate in year 2, a banded credit in years 3 to 5.
pub fn credit_issues(workspace: &SessionWorkspace) -> Validation {
    let year = workspace.class.year;
    let mut validation = Validation::new();

    for student in workspace.active_roster() {
        let Some(outcome) = workspace
            .outcomes
            .get(&student)
            .filter(|outcome| outcome.verdict == Verdict::Admitted)
        else {
            continue;
        };
        let name = workspace.student_name(student);

        if year == CERTIFICATION_YEAR {
            if !outcome.certification_completed {
                validation.push(
                    Message::blocking(
                        MessageCode::MissingCertification,
                        format!("Competency certificate not completed for {name}"),
                    )
                    .for_student(student),
                );
            }
            continue;
        }
        if !awards_credit(year) {
            continue;
        }

        match outcome.credit.filter(|credit| *credit > 0) {
            None => validation.push(
                Message::blocking(MessageCode::MissingCredit, format!("Credit missing for {name}"))
                    .for_student(student),
            ),
            Some(credit) => {
                let in_band = outcome
                    .average
                    .and_then(|average| credit_band(year, average))
                    .map(|band| band.contains(credit))
                    .unwrap_or(false);
                if !in_band {
                    validation.push(
                        Message::blocking(
                            MessageCode::CreditOutOfBand,
                            format!("Credit {credit} of {name} is outside the allowed band"),
                        )
                        .for_student(student),
                    );
                }
            }
        }
    }

    validation
}

/// Allowed range for a credit carried over from an earlier year.
pub fn carry_over_bounds(from_year: u8) -> Option<(u8, u8)> {
    match from_year {
        3 => Some((7, 12)),
        4 => Some((8, 13)),
        _ => None,
    }
}

/// A carried-over credit is valid inside its bounds or exactly zero.
pub fn carry_over_valid(from_year: u8, credit: u8) -> bool {
    credit == 0
        || carry_over_bounds(from_year)
            .map(|(min, max)| credit >= min && credit <= max)
            .unwrap_or(false)
}

/// Earlier years whose credits a class of the given year may adjust.
pub fn adjustable_years(class_year: u8) -> &'static [u8] {
    match class_year {
        4 => &[3],
        5 => &[3, 4],
        _ => &[],
    }
}

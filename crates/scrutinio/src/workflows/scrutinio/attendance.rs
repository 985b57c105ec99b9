use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{ClassInfo, Student, StudentId};
use super::messages::{Message, MessageCode, Validation};
use super::session::{EligibilityPartition, WaivedStudent};
use super::votes::FinalVote;

const DEFAULT_SCHOOL_WEEKS: u16 = 33;
const CEILING_DIVISOR: u16 = 4;

/// Absence ceiling rule: a quarter of the yearly lesson hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendancePolicy {
    school_weeks: u16,
    divisor: u16,
}

impl AttendancePolicy {
    pub fn new(school_weeks: u16) -> Self {
        let school_weeks = if school_weeks == 0 {
            DEFAULT_SCHOOL_WEEKS
        } else {
            school_weeks
        };
        Self {
            school_weeks,
            divisor: CEILING_DIVISOR,
        }
    }

    pub fn school_weeks(&self) -> u16 {
        self.school_weeks
    }

    pub fn yearly_hours(&self, weekly_hours: u16) -> u32 {
        u32::from(weekly_hours) * u32::from(self.school_weeks)
    }

    pub fn ceiling(&self, weekly_hours: u16) -> u32 {
        self.yearly_hours(weekly_hours) / u32::from(self.divisor)
    }
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SCHOOL_WEEKS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Eligible,
    OverCeiling,
    Abroad,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentAttendance {
    pub student: StudentId,
    pub name: String,
    pub hours: u32,
    pub percentage: f64,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceAssessment {
    pub ceiling: u32,
    pub yearly_hours: u32,
    pub students: Vec<StudentAttendance>,
}

/// Explicit decision for a student over the ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Disposition {
    Waiver { justification: String },
    Ineligible,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispositionEntry {
    pub student: StudentId,
    #[serde(flatten)]
    pub disposition: Disposition,
}

/// Sums absence hours per student over the first-term and final votes plus
/// hours accrued elsewhere.
pub fn tally_absences<'a>(
    students: &[&Student],
    votes: impl IntoIterator<Item = &'a FinalVote>,
) -> BTreeMap<StudentId, u32> {
    let mut tallies: BTreeMap<StudentId, u32> = students
        .iter()
        .map(|student| (student.id, student.extra_absence_hours))
        .collect();
    for vote in votes {
        if let Some(hours) = tallies.get_mut(&vote.student) {
            *hours += vote.absence_hours;
        }
    }
    tallies
}

pub fn evaluate(
    class: &ClassInfo,
    students: &[&Student],
    tallies: &BTreeMap<StudentId, u32>,
    policy: &AttendancePolicy,
) -> AttendanceAssessment {
    let ceiling = policy.ceiling(class.weekly_hours);
    let yearly_hours = policy.yearly_hours(class.weekly_hours);

    let students = students
        .iter()
        .map(|student| {
            let hours = tallies.get(&student.id).copied().unwrap_or(0);
            let percentage = if yearly_hours == 0 {
                0.0
            } else {
                (f64::from(hours) * 10_000.0 / f64::from(yearly_hours)).round() / 100.0
            };
            let status = if student.abroad {
                AttendanceStatus::Abroad
            } else if hours > ceiling {
                AttendanceStatus::OverCeiling
            } else {
                AttendanceStatus::Eligible
            };
            StudentAttendance {
                student: student.id,
                name: student.name.clone(),
                hours,
                percentage,
                status,
            }
        })
        .collect();

    AttendanceAssessment {
        ceiling,
        yearly_hours,
        students,
    }
}

impl AttendanceAssessment {
    pub fn over_ceiling(&self) -> impl Iterator<Item = &StudentAttendance> {
        self.students
            .iter()
            .filter(|entry| entry.status == AttendanceStatus::OverCeiling)
    }

    /// Applies the dispositions, listing every over-ceiling student still undecided.
    pub fn resolve(
        &self,
        dispositions: &[DispositionEntry],
    ) -> Result<EligibilityPartition, Validation> {
        let decided: BTreeMap<StudentId, &Disposition> = dispositions
            .iter()
            .map(|entry| (entry.student, &entry.disposition))
            .collect();

        let mut partition = EligibilityPartition::default();
        let mut validation = Validation::new();
        for entry in &self.students {
            match entry.status {
                AttendanceStatus::Eligible => partition.eligible.push(entry.student),
                AttendanceStatus::Abroad => partition.abroad.push(entry.student),
                AttendanceStatus::OverCeiling => match decided.get(&entry.student) {
                    None => validation.push(
                        Message::blocking(
                            MessageCode::MissingDisposition,
                            format!(
                                "{} exceeds the absence ceiling ({} of {} hours) without a decision",
                                entry.name, entry.hours, self.ceiling
                            ),
                        )
                        .for_student(entry.student),
                    ),
                    Some(Disposition::Waiver { justification })
                        if justification.trim().is_empty() =>
                    {
                        validation.push(
                            Message::blocking(
                                MessageCode::MissingWaiverJustification,
                                format!("Waiver for {} needs a justification", entry.name),
                            )
                            .for_student(entry.student),
                        )
                    }
                    Some(Disposition::Waiver { justification }) => {
                        partition.waived.push(WaivedStudent {
                            student: entry.student,
                            justification: justification.trim().to_string(),
                        })
                    }
                    Some(Disposition::Ineligible) => partition.ineligible.push(entry.student),
                },
            }
        }

        if validation.is_blocked() {
            Err(validation)
        } else {
            Ok(partition)
        }
    }
}

use std::collections::BTreeMap;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::credits::{adjustable_years, carry_over_valid, previous_credit};
use super::domain::{PeriodType, PreviousCredits, StudentId};
use super::messages::{Message, MessageCode, Validation};
use super::session::{CreditAdjustment, CreditAdjustmentEntry, MinutesState, SessionWorkspace};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MinutesStepKind {
    Procedural {
        section: String,
    },
    Argument {
        section: String,
        argument: u8,
        required: bool,
        default_text: String,
    },
    CreditAdjustment {
        section: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinutesStep {
    pub index: u8,
    pub kind: MinutesStepKind,
    /// Restricts the step to classes of one year level.
    pub year_level: Option<u8>,
}

impl MinutesStep {
    pub fn section(&self) -> &str {
        match &self.kind {
            MinutesStepKind::Procedural { section }
            | MinutesStepKind::Argument { section, .. }
            | MinutesStepKind::CreditAdjustment { section } => section,
        }
    }

    pub fn is_validable(&self) -> bool {
        !matches!(self.kind, MinutesStepKind::Procedural { .. })
    }

    pub fn applies_to(&self, year: u8) -> bool {
        self.year_level.map(|level| level == year).unwrap_or(true)
    }
}

/// Ordered structure of the minutes for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinutesBlueprint {
    pub steps: Vec<MinutesStep>,
}

impl MinutesBlueprint {
    pub fn standard(period: PeriodType) -> Self {
        let procedural = |index: u8, section: &str| MinutesStep {
            index,
            kind: MinutesStepKind::Procedural {
                section: section.to_string(),
            },
            year_level: None,
        };
        let argument = |index: u8, argument: u8, section: &str, default_text: &str| MinutesStep {
            index,
            kind: MinutesStepKind::Argument {
                section: section.to_string(),
                argument,
                required: true,
                default_text: default_text.to_string(),
            },
            year_level: None,
        };
        let credits = |index: u8, year: u8| MinutesStep {
            index,
            kind: MinutesStepKind::CreditAdjustment {
                section: "Previous credits".to_string(),
            },
            year_level: Some(year),
        };

        let steps = match period {
            PeriodType::FirstTerm => vec![
                procedural(1, "Opening"),
                argument(2, 1, "Class progress", "No remarks on the class progress."),
                procedural(3, "Grade review"),
                argument(4, 2, "Recovery activities", "Recovery activities as proposed."),
                procedural(5, "Closing"),
            ],
            PeriodType::Final => vec![
                procedural(1, "Opening"),
                argument(2, 1, "Class progress", "No remarks on the class progress."),
                credits(3, 4),
                credits(4, 5),
                argument(5, 2, "Outcomes", "Outcomes as deliberated."),
                procedural(6, "Grade review"),
                argument(7, 3, "Communications to families", "No further communications."),
                procedural(8, "Closing"),
            ],
            PeriodType::MakeupExam | PeriodType::DeferredMakeup => vec![
                procedural(1, "Opening"),
                argument(2, 1, "Make-up exams", "Make-up exams held as scheduled."),
                procedural(3, "Closing"),
            ],
        };
        Self { steps }
    }

    pub fn step(&self, index: u8) -> Option<&MinutesStep> {
        self.steps.iter().find(|step| step.index == index)
    }

    pub fn validable_for(&self, year: u8) -> impl Iterator<Item = &MinutesStep> {
        self.steps
            .iter()
            .filter(move |step| step.is_validable() && step.applies_to(year))
    }
}

/// Marks every validable step as pending, as happens on entering the minutes stage.
pub fn initialize(minutes: &mut MinutesState, blueprint: &MinutesBlueprint, year: u8) {
    minutes.steps = blueprint
        .validable_for(year)
        .map(|step| (step.index, false))
        .collect();
}

/// Clears the validation flags when the session moves back past the minutes stage.
pub fn reset(minutes: &mut MinutesState) {
    minutes.steps.clear();
}

/// Text shown for an argument: the stored text or the step's default.
pub fn argument_text(minutes: &MinutesState, step: &MinutesStep) -> Option<String> {
    let MinutesStepKind::Argument { default_text, .. } = &step.kind else {
        return None;
    };
    Some(
        minutes
            .arguments
            .get(&step.index)
            .filter(|text| !text.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| default_text.clone()),
    )
}

/// Stores an argument text and validates the step. Empty text is accepted.
pub fn record_argument(
    minutes: &mut MinutesState,
    blueprint: &MinutesBlueprint,
    index: u8,
    text: &str,
) -> Validation {
    let mut validation = Validation::new();
    match blueprint.step(index) {
        Some(step) if matches!(step.kind, MinutesStepKind::Argument { .. }) => {
            if !minutes.is_open(index) {
                validation.push(
                    Message::blocking(
                        MessageCode::MinutesNotOpen,
                        format!("Minutes step {index} is not open for editing"),
                    )
                    .in_section(step.section()),
                );
                return validation;
            }
            minutes.arguments.insert(index, text.to_string());
            minutes.steps.insert(index, true);
        }
        _ => validation.push(Message::blocking(
            MessageCode::UnknownMinutesStep,
            format!("Minutes step {index} is not an argument"),
        )),
    }
    validation
}

/// Applies corrected carried-over credits.
///
/// Every entry must sit inside the year's bounds; every changed entry needs a
/// justification. On success later steps go back to pending and this one is
/// validated; on failure this step is left unvalidated.
pub fn record_credit_adjustment(
    workspace: &mut SessionWorkspace,
    blueprint: &MinutesBlueprint,
    index: u8,
    entries: &[CreditAdjustmentEntry],
) -> Validation {
    let mut validation = Validation::new();
    let year = workspace.class.year;
    let Some(step) = blueprint.step(index).cloned() else {
        validation.push(Message::blocking(
            MessageCode::UnknownMinutesStep,
            format!("Minutes step {index} does not exist"),
        ));
        return validation;
    };
    if !matches!(step.kind, MinutesStepKind::CreditAdjustment { .. }) || !step.applies_to(year) {
        validation.push(
            Message::blocking(
                MessageCode::CreditAdjustmentNotApplicable,
                format!("Minutes step {index} does not adjust credits for year {year}"),
            )
            .in_section(step.section()),
        );
        return validation;
    }
    if !workspace.session.minutes.is_open(index) {
        validation.push(
            Message::blocking(
                MessageCode::MinutesNotOpen,
                format!("Minutes step {index} is not open for editing"),
            )
            .in_section(step.section()),
        );
        return validation;
    }

    let years = adjustable_years(year);
    let mut updates: BTreeMap<StudentId, PreviousCredits> = BTreeMap::new();
    for entry in entries {
        let Some(student) = workspace.students.get(&entry.student) else {
            continue;
        };
        let name = student.name.clone();
        let current = workspace
            .credit_updates
            .get(&entry.student)
            .copied()
            .unwrap_or(student.previous_credits);
        let mut corrected = current;
        for from_year in years {
            let value = match *from_year {
                3 => entry.year3,
                _ => entry.year4,
            };
            let Some(value) = value else { continue };
            if !carry_over_valid(*from_year, value) {
                validation.push(
                    Message::blocking(
                        MessageCode::CreditAdjustmentOutOfBounds,
                        format!("Year {from_year} credit {value} of {name} is out of bounds"),
                    )
                    .for_student(entry.student)
                    .in_section(step.section()),
                );
            }
            match *from_year {
                3 => corrected.year3 = Some(value),
                _ => corrected.year4 = Some(value),
            }
        }
        if corrected != current && entry.justification.trim().is_empty() {
            validation.push(
                Message::blocking(
                    MessageCode::MissingCreditJustification,
                    format!("Credit correction for {name} needs a justification"),
                )
                .for_student(entry.student)
                .in_section(step.section()),
            );
        }
        if corrected != current {
            updates.insert(entry.student, corrected);
        }
    }

    if validation.is_blocked() {
        workspace.session.minutes.steps.insert(index, false);
        return validation;
    }

    for (student, credits) in &updates {
        if let Some(outcome) = workspace.outcomes.get_mut(student) {
            outcome.previous_credit = Some(previous_credit(year, *credits));
        }
        workspace.credit_updates.insert(*student, *credits);
    }
    let adjustment = workspace
        .session
        .credit_adjustment
        .get_or_insert_with(CreditAdjustment::default);
    for entry in entries {
        adjustment
            .entries
            .retain(|stored| stored.student != entry.student);
        adjustment.entries.push(entry.clone());
    }

    let minutes = &mut workspace.session.minutes;
    for (_, validated) in minutes.steps.range_mut(index.saturating_add(1)..) {
        *validated = false;
    }
    minutes.steps.insert(index, true);
    validation
}

/// Details captured by the closing transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosingForm {
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub minutes_number: Option<i64>,
}

/// Closing guard: end time, a positive minutes number and every step validated.
pub fn closing_issues(
    minutes: &MinutesState,
    blueprint: &MinutesBlueprint,
    year: u8,
    closing: Option<&ClosingForm>,
) -> Validation {
    let mut validation = Validation::new();
    if closing.and_then(|form| form.end_time).is_none() {
        validation.push(Message::blocking(
            MessageCode::MissingEndTime,
            "End time of the session is missing",
        ));
    }
    if closing
        .and_then(|form| form.minutes_number)
        .map(|number| number <= 0)
        .unwrap_or(true)
    {
        validation.push(Message::blocking(
            MessageCode::InvalidMinutesNumber,
            "Minutes number must be greater than zero",
        ));
    }
    for step in blueprint.validable_for(year) {
        if !minutes.is_validated(step.index) {
            validation.push(
                Message::blocking(
                    MessageCode::UnvalidatedMinutesStep,
                    format!("Minutes section '{}' is not validated", step.section()),
                )
                .in_section(step.section()),
            );
        }
    }
    validation
}

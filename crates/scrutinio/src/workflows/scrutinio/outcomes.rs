use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::credits::CreditCriterion;
use super::domain::{SessionId, StudentId, SubjectId, SubjectKind, TeacherId};
use super::messages::{Message, MessageCode, Validation};
use super::session::SessionWorkspace;
use super::votes::FinalVote;

/// Verdict recorded for each student at the end of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Admitted,
    NotAdmitted,
    /// Judgement suspended until the make-up exam.
    Suspended,
    Deferred,
    Abroad,
    /// Over the absence ceiling without a waiver.
    Ineligible,
}

impl Verdict {
    /// Verdicts assigned by the attendance check rather than by the council.
    pub const fn is_attendance_verdict(self) -> bool {
        matches!(self, Self::Abroad | Self::Ineligible)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub session: SessionId,
    pub student: StudentId,
    pub verdict: Verdict,
    #[serde(default)]
    pub unanimous: Option<bool>,
    #[serde(default)]
    pub dissenters: Vec<TeacherId>,
    #[serde(default)]
    pub judgement: Option<String>,
    #[serde(default)]
    pub deferral_reason: Option<String>,
    #[serde(default)]
    pub average: Option<f64>,
    #[serde(default)]
    pub credit: Option<u8>,
    #[serde(default)]
    pub previous_credit: Option<u8>,
    #[serde(default)]
    pub credit_criteria: Vec<CreditCriterion>,
    #[serde(default)]
    pub certification_completed: bool,
    #[serde(default)]
    pub debt_notice_confirmed: bool,
    #[serde(default)]
    pub deficiency_notice_confirmed: bool,
}

impl Outcome {
    pub fn new(session: SessionId, student: StudentId, verdict: Verdict) -> Self {
        Self {
            session,
            student,
            verdict,
            unanimous: Some(true),
            dissenters: Vec::new(),
            judgement: None,
            deferral_reason: None,
            average: None,
            credit: None,
            previous_credit: None,
            credit_criteria: Vec::new(),
            certification_completed: false,
            debt_notice_confirmed: false,
            deficiency_notice_confirmed: false,
        }
    }

    pub fn has_judgement(&self) -> bool {
        has_text(self.judgement.as_deref())
    }

    pub fn has_deferral_reason(&self) -> bool {
        has_text(self.deferral_reason.as_deref())
    }

    fn deliberation_issue(&self) -> Option<MessageCode> {
        match self.unanimous {
            None => Some(MessageCode::MissingDeliberation),
            Some(false) if self.dissenters.is_empty() => Some(MessageCode::MissingDissenters),
            _ => None,
        }
    }
}

fn has_text(value: Option<&str>) -> bool {
    value.map(|text| !text.trim().is_empty()).unwrap_or(false)
}

/// Grade situation of one student, as seen by the outcome checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GradeProfile {
    /// Standard and civic-education subjects below pass.
    pub failing: Vec<SubjectId>,
    pub failing_religion: bool,
    pub failing_conduct: bool,
    pub missing: Vec<SubjectId>,
    pub out_of_range: Vec<SubjectId>,
}

impl GradeProfile {
    pub fn for_student(workspace: &SessionWorkspace, student: StudentId) -> Self {
        let mut profile = Self::default();
        let Some(record) = workspace.students.get(&student) else {
            return profile;
        };
        let scales = workspace.scales();

        for subject in workspace
            .subjects
            .iter()
            .filter(|subject| subject.applies_to(record))
        {
            let scale = scales.for_kind(subject.kind);
            let Some(grade) = workspace.vote(student, subject.id).and_then(|vote| vote.grade)
            else {
                profile.missing.push(subject.id);
                continue;
            };
            if !scale.contains(grade) {
                profile.out_of_range.push(subject.id);
                continue;
            }
            if !scale.is_failing(grade) {
                continue;
            }
            match subject.kind {
                SubjectKind::Religion => profile.failing_religion = true,
                SubjectKind::Conduct => profile.failing_conduct = true,
                SubjectKind::Standard | SubjectKind::CivicEducation => {
                    profile.failing.push(subject.id)
                }
            }
        }
        profile
    }

    pub fn has_any_failure(&self) -> bool {
        !self.failing.is_empty() || self.failing_religion || self.failing_conduct
    }
}

/// Outcome coherence for the final session.
pub fn final_coherence(workspace: &SessionWorkspace) -> Validation {
    let mut validation = Validation::new();
    let graduating = workspace.class.is_graduating();

    for student in workspace.active_roster() {
        let name = workspace.student_name(student);
        let profile = GradeProfile::for_student(workspace, student);
        let block = |code: MessageCode, text: String| {
            Message::blocking(code, text).for_student(student)
        };
        grade_presence(workspace, student, &name, &profile, &mut validation);

        let Some(outcome) = workspace.outcomes.get(&student) else {
            validation.push(block(
                MessageCode::MissingOutcome,
                format!("Outcome missing for {name}"),
            ));
            continue;
        };
        deliberation(outcome, &name, &mut validation);

        match outcome.verdict {
            Verdict::NotAdmitted => {
                if !outcome.has_judgement() {
                    validation.push(block(
                        MessageCode::MissingJudgement,
                        format!("Non-admission of {name} needs a judgement"),
                    ));
                }
                if !profile.has_any_failure() {
                    validation.push(block(
                        MessageCode::NotAdmittedWithoutFailures,
                        format!("{name} is not admitted but has no failing grade"),
                    ));
                }
            }
            Verdict::Admitted if graduating => {
                if profile.failing.len() > 1 || profile.failing_conduct {
                    validation.push(block(
                        MessageCode::AdmittedWithFailures,
                        format!("{name} is admitted to the final exam with failing grades"),
                    ));
                } else if profile.failing.len() == 1 && !outcome.has_judgement() {
                    validation.push(block(
                        MessageCode::MissingJudgement,
                        format!("Admission of {name} with one failing grade needs a judgement"),
                    ));
                }
            }
            Verdict::Admitted => {
                if profile.has_any_failure() {
                    validation.push(block(
                        MessageCode::AdmittedWithFailures,
                        format!("{name} is admitted with failing grades"),
                    ));
                }
            }
            Verdict::Suspended => {
                if graduating {
                    validation.push(block(
                        MessageCode::SuspendedInFinalYear,
                        format!("{name} cannot have a suspended judgement in the final year"),
                    ));
                }
                if profile.failing.is_empty() {
                    validation.push(block(
                        MessageCode::SuspendedWithoutFailures,
                        format!("{name} has a suspended judgement but no failing subject"),
                    ));
                }
                if profile.failing_religion {
                    validation.push(block(
                        MessageCode::FailingReligionOutcome,
                        format!("{name} has a suspended judgement with failing religion"),
                    ));
                }
                if profile.failing_conduct {
                    validation.push(block(
                        MessageCode::FailingConductOutcome,
                        format!("{name} has a suspended judgement with failing conduct"),
                    ));
                }
                if profile.failing.len() > 3 {
                    validation.push(block(
                        MessageCode::TooManyFailures,
                        format!("{name} has too many failing subjects for a suspended judgement"),
                    ));
                }
            }
            Verdict::Deferred | Verdict::Abroad | Verdict::Ineligible => {}
        }
    }

    validation
}

/// Outcome coherence for make-up sessions, comparing with the final votes.
pub fn makeup_coherence(
    workspace: &SessionWorkspace,
    final_votes: &BTreeMap<(StudentId, SubjectId), FinalVote>,
) -> Validation {
    let mut validation = Validation::new();

    for student in workspace.active_roster() {
        let name = workspace.student_name(student);
        let profile = GradeProfile::for_student(workspace, student);
        let block = |code: MessageCode, text: String| {
            Message::blocking(code, text).for_student(student)
        };
        grade_presence(workspace, student, &name, &profile, &mut validation);

        for subject in &workspace.subjects {
            let current = workspace.vote(student, subject.id).and_then(|vote| vote.grade);
            let previous = final_votes
                .get(&(student, subject.id))
                .and_then(|vote| vote.grade);
            if let (Some(current), Some(previous)) = (current, previous) {
                if current < previous {
                    validation.push(
                        block(
                            MessageCode::MakeupGradeBelowFinal,
                            format!(
                                "{} grade of {name} is lower than in the final session",
                                subject.name
                            ),
                        )
                        .for_subject(subject.id),
                    );
                }
            }
        }

        let Some(outcome) = workspace.outcomes.get(&student) else {
            validation.push(block(
                MessageCode::MissingOutcome,
                format!("Outcome missing for {name}"),
            ));
            continue;
        };
        if outcome.verdict != Verdict::Deferred {
            deliberation(outcome, &name, &mut validation);
        }

        match outcome.verdict {
            Verdict::NotAdmitted => {
                if !outcome.has_judgement() {
                    validation.push(block(
                        MessageCode::MissingJudgement,
                        format!("Non-admission of {name} needs a judgement"),
                    ));
                }
                if !profile.has_any_failure() {
                    validation.push(block(
                        MessageCode::NotAdmittedWithoutFailures,
                        format!("{name} is not admitted but has no failing grade"),
                    ));
                }
            }
            Verdict::Deferred if !outcome.has_deferral_reason() => {
                validation.push(block(
                    MessageCode::MissingDeferralReason,
                    format!("Deferral of {name} needs a reason"),
                ));
            }
            Verdict::Admitted if !profile.failing.is_empty() => {
                validation.push(block(
                    MessageCode::AdmittedWithFailures,
                    format!("{name} is admitted with failing grades"),
                ));
            }
            _ => {}
        }

        if outcome.verdict != Verdict::NotAdmitted {
            if profile.failing_religion {
                validation.push(block(
                    MessageCode::FailingReligionOutcome,
                    format!("{name} cannot pass with failing religion"),
                ));
            }
            if profile.failing_conduct {
                validation.push(block(
                    MessageCode::FailingConductOutcome,
                    format!("{name} cannot pass with failing conduct"),
                ));
            }
        }
    }

    validation
}

fn grade_presence(
    workspace: &SessionWorkspace,
    student: StudentId,
    name: &str,
    profile: &GradeProfile,
    validation: &mut Validation,
) {
    for subject in &profile.missing {
        validation.push(
            Message::blocking(
                MessageCode::MissingGrade,
                format!("{} grade missing for {name}", workspace.subject_name(*subject)),
            )
            .for_student(student)
            .for_subject(*subject),
        );
    }
    for subject in &profile.out_of_range {
        validation.push(
            Message::blocking(
                MessageCode::InvalidGrade,
                format!(
                    "{} grade of {name} is outside the scale",
                    workspace.subject_name(*subject)
                ),
            )
            .for_student(student)
            .for_subject(*subject),
        );
    }
}

fn deliberation(outcome: &Outcome, name: &str, validation: &mut Validation) {
    let Some(code) = outcome.deliberation_issue() else {
        return;
    };
    let text = if code == MessageCode::MissingDeliberation {
        format!("Deliberation not recorded for {name}")
    } else {
        format!("Dissenting teachers missing for {name}")
    };
    validation.push(Message::blocking(code, text).for_student(outcome.student));
}

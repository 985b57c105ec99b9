//! Grade proposals, final votes and the completeness checks built on them.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::domain::{
    ClassId, PeriodType, SessionId, Student, StudentId, Subject, SubjectId, SubjectKind,
    TeacherId,
};
use super::messages::{Message, MessageCode, Severity, Validation};
use super::session::SessionWorkspace;

/// How a sub-pass grade will be remediated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    SelfStudy,
    Course,
    HelpDesk,
    InClass,
    TeachingPause,
}

/// Provisional grade entered by a subject teacher before the session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteProposal {
    pub class_id: ClassId,
    pub period: PeriodType,
    pub student: StudentId,
    pub subject: SubjectId,
    #[serde(default)]
    pub teacher: Option<TeacherId>,
    #[serde(default)]
    pub grade: Option<u8>,
    #[serde(default)]
    pub recovery: Option<RecoveryMode>,
    #[serde(default)]
    pub debt: Option<String>,
}

impl VoteProposal {
    pub fn empty(
        class_id: ClassId,
        period: PeriodType,
        student: StudentId,
        subject: SubjectId,
        teacher: Option<TeacherId>,
    ) -> Self {
        Self {
            class_id,
            period,
            student,
            subject,
            teacher,
            grade: None,
            recovery: None,
            debt: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliberation {
    #[serde(default)]
    pub motivation: String,
    /// `None` until the council records how the vote went.
    #[serde(default)]
    pub unanimous: Option<bool>,
    #[serde(default)]
    pub dissenters: Vec<TeacherId>,
}

impl Default for Deliberation {
    fn default() -> Self {
        Self {
            motivation: String::new(),
            unanimous: Some(true),
            dissenters: Vec::new(),
        }
    }
}

impl Deliberation {
    pub fn issue(&self) -> Option<MessageCode> {
        match self.unanimous {
            None => Some(MessageCode::MissingDeliberation),
            Some(false) if self.dissenters.is_empty() => Some(MessageCode::MissingDissenters),
            _ => None,
        }
    }
}

/// Authoritative grade of one student in one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalVote {
    pub session: SessionId,
    pub student: StudentId,
    pub subject: SubjectId,
    pub grade: Option<u8>,
    /// Grade originally proposed, kept to detect deficiencies resolved in council.
    #[serde(default)]
    pub proposed: Option<u8>,
    #[serde(default)]
    pub absence_hours: u32,
    #[serde(default)]
    pub recovery: Option<RecoveryMode>,
    #[serde(default)]
    pub debt: Option<String>,
    #[serde(default)]
    pub deliberation: Deliberation,
}

impl FinalVote {
    pub fn has_debt_text(&self) -> bool {
        self.debt
            .as_deref()
            .map(|text| !text.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Proposal list for one subject, with an empty placeholder for every student lacking one.
pub fn collect_proposals(
    class_id: ClassId,
    period: PeriodType,
    subject: &Subject,
    teacher: Option<TeacherId>,
    students: &[Student],
    existing: &[VoteProposal],
) -> Vec<VoteProposal> {
    students
        .iter()
        .filter(|student| subject.applies_to(student))
        .map(|student| {
            let mut candidates = existing
                .iter()
                .filter(|proposal| proposal.student == student.id && proposal.subject == subject.id);
            let own = candidates
                .clone()
                .find(|proposal| teacher.is_some() && proposal.teacher == teacher);
            own.or_else(|| candidates.next())
                .cloned()
                .unwrap_or_else(|| {
                    VoteProposal::empty(class_id, period, student.id, subject.id, teacher)
                })
        })
        .collect()
}

/// Snapshot of every proposal for the class with the issues found so far.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposalOverview {
    pub proposals: Vec<VoteProposal>,
    pub messages: Validation,
}

pub fn proposal_overview(
    workspace: &SessionWorkspace,
    proposals: &[VoteProposal],
) -> ProposalOverview {
    let students: Vec<Student> = workspace.active_students().into_iter().cloned().collect();
    let collected = workspace
        .subjects
        .iter()
        .filter(|subject| subject.kind.has_register_proposals())
        .flat_map(|subject| {
            collect_proposals(
                workspace.class.id,
                workspace.session.period,
                subject,
                None,
                &students,
                proposals,
            )
        })
        .collect();

    ProposalOverview {
        proposals: collected,
        messages: proposal_issues(workspace, proposals),
    }
}

/// Completeness check applied before final votes are created.
///
/// Missing grades and conflicting proposals block; missing recovery or debt
/// annotations are only warnings at this stage. Civic education and conduct
/// are left to their own council stages.
pub fn proposal_issues(workspace: &SessionWorkspace, proposals: &[VoteProposal]) -> Validation {
    let mut grouped: BTreeMap<(StudentId, SubjectId), Vec<&VoteProposal>> = BTreeMap::new();
    for proposal in proposals {
        grouped
            .entry((proposal.student, proposal.subject))
            .or_default()
            .push(proposal);
    }

    let scales = workspace.scales();
    let mut board = IssueBoard::default();
    for subject in workspace
        .subjects
        .iter()
        .filter(|subject| subject.kind.has_register_proposals())
    {
        let scale = scales.for_kind(subject.kind);
        for student in workspace.active_students() {
            if !subject.applies_to(student) {
                continue;
            }
            let entries = grouped
                .get(&(student.id, subject.id))
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let grades: BTreeSet<u8> = entries.iter().filter_map(|entry| entry.grade).collect();
            if grades.len() > 1 {
                board.raise(subject.id, student.id, IssueKind::MultipleProposals);
                break;
            }

            let Some(grade) = grades.into_iter().next() else {
                board.raise(subject.id, student.id, IssueKind::MissingGrade);
                continue;
            };
            if !scale.is_failing(grade) || recovery_exempt(workspace, subject) {
                continue;
            }
            let annotated = entries.iter().find(|entry| entry.grade == Some(grade));
            let recovery = annotated.and_then(|entry| entry.recovery);
            let debt = annotated
                .and_then(|entry| entry.debt.as_deref())
                .map(|text| !text.trim().is_empty())
                .unwrap_or(false);
            if recovery.is_none() {
                board.raise(subject.id, student.id, IssueKind::MissingRecoveryMode);
            } else if !debt && grade > scale.min {
                board.raise(subject.id, student.id, IssueKind::MissingDebtDescription);
            }
        }
    }

    board.into_validation(workspace, Severity::Warning)
}

/// Creates a final vote for every roster student and subject, copying the proposal.
///
/// Civic education and conduct votes start ungraded. Existing votes only get
/// their absence hours refreshed.
pub fn materialize_final_votes<E>(
    workspace: &mut SessionWorkspace,
    proposals: &[VoteProposal],
    mut absences: impl FnMut(StudentId, &Subject) -> Result<u32, E>,
) -> Result<(), E> {
    let session = workspace.session.id;
    let roster = workspace.active_roster();
    let subjects = workspace.subjects.clone();

    for student_id in roster {
        let Some(student) = workspace.students.get(&student_id).cloned() else {
            continue;
        };
        for subject in subjects.iter().filter(|subject| subject.applies_to(&student)) {
            let hours = absences(student_id, subject)?;
            if let Some(vote) = workspace.votes.get_mut(&(student_id, subject.id)) {
                vote.absence_hours = hours;
                continue;
            }

            let proposal = if subject.kind.has_register_proposals() {
                proposals
                    .iter()
                    .filter(|proposal| {
                        proposal.student == student_id && proposal.subject == subject.id
                    })
                    .max_by_key(|proposal| proposal.grade.is_some())
            } else {
                None
            };
            let vote = FinalVote {
                session,
                student: student_id,
                subject: subject.id,
                grade: proposal.and_then(|proposal| proposal.grade),
                proposed: proposal.and_then(|proposal| proposal.grade),
                absence_hours: hours,
                recovery: proposal.and_then(|proposal| proposal.recovery),
                debt: proposal.and_then(|proposal| proposal.debt.clone()),
                deliberation: Deliberation::default(),
            };
            workspace.votes.insert((student_id, subject.id), vote);
        }
    }

    Ok(())
}

/// Mean over the subjects that count toward the average.
///
/// A grade equal to the scale's "not classified" value adds zero but still counts.
pub fn compute_average(workspace: &SessionWorkspace, student: StudentId) -> Option<f64> {
    let record = workspace.students.get(&student)?;
    let scales = workspace.scales();
    let (sum, count) = workspace
        .subjects
        .iter()
        .filter(|subject| subject.counts_toward_average && subject.applies_to(record))
        .filter_map(|subject| {
            let grade = workspace.vote(student, subject.id)?.grade?;
            let scale = scales.for_kind(subject.kind);
            Some(if scale.is_unclassified(grade) { 0 } else { u32::from(grade) })
        })
        .fold((0u32, 0u32), |(sum, count), grade| (sum + grade, count + 1));

    if count == 0 {
        return None;
    }
    let average = f64::from(sum) / f64::from(count);
    Some((average * 100.0).round() / 100.0)
}

/// Guard for vote finalization: every annotation is mandatory here.
pub fn finalization_issues(workspace: &SessionWorkspace) -> Validation {
    let scales = workspace.scales();
    let mut board = IssueBoard::default();

    for subject in workspace
        .subjects
        .iter()
        .filter(|subject| subject.kind != SubjectKind::Conduct)
    {
        let scale = scales.for_kind(subject.kind);
        for student in workspace.active_students() {
            if !subject.applies_to(student) {
                continue;
            }
            let vote = workspace.vote(student.id, subject.id);
            let Some(grade) = vote.and_then(|vote| vote.grade) else {
                board.raise(subject.id, student.id, IssueKind::MissingGrade);
                continue;
            };
            if !scale.is_failing(grade) || recovery_exempt(workspace, subject) {
                continue;
            }
            let Some(vote) = vote else { continue };
            if vote.recovery.is_none() {
                board.raise(subject.id, student.id, IssueKind::MissingRecoveryMode);
            } else if !vote.has_debt_text() && grade > scale.min {
                board.raise(subject.id, student.id, IssueKind::MissingDebtDescription);
            }
        }
    }

    let mut validation = board.into_validation(workspace, Severity::Blocking);
    validation.extend(conduct_issues(workspace));
    validation
}

/// Every roster student needs a civic-education grade.
pub fn civic_issues(workspace: &SessionWorkspace) -> Validation {
    let mut validation = Validation::new();
    for subject in workspace
        .subjects
        .iter()
        .filter(|subject| subject.kind == SubjectKind::CivicEducation)
    {
        for student in workspace.active_students() {
            let graded = workspace
                .vote(student.id, subject.id)
                .and_then(|vote| vote.grade)
                .is_some();
            if !graded {
                validation.push(
                    Message::blocking(
                        MessageCode::MissingGrade,
                        format!("Civic education grade missing for {}", student.name),
                    )
                    .for_student(student.id)
                    .for_subject(subject.id),
                );
            }
        }
    }
    validation
}

/// Conduct needs a grade, a motivation and a recorded deliberation for each student.
pub fn conduct_issues(workspace: &SessionWorkspace) -> Validation {
    let mut validation = Validation::new();
    for subject in workspace
        .subjects
        .iter()
        .filter(|subject| subject.kind == SubjectKind::Conduct)
    {
        for student in workspace.active_students() {
            let vote = workspace.vote(student.id, subject.id);
            let message = |code: MessageCode, text: &str| {
                Message::blocking(code, format!("{text} for {}", student.name))
                    .for_student(student.id)
                    .for_subject(subject.id)
            };

            let Some(vote) = vote.filter(|vote| vote.grade.is_some()) else {
                validation.push(message(MessageCode::MissingGrade, "Conduct grade missing"));
                continue;
            };
            if vote.deliberation.motivation.trim().is_empty() {
                validation.push(message(
                    MessageCode::MissingMotivation,
                    "Conduct motivation missing",
                ));
            }
            match vote.deliberation.issue() {
                Some(MessageCode::MissingDeliberation) => validation.push(message(
                    MessageCode::MissingDeliberation,
                    "Conduct deliberation not recorded",
                )),
                Some(code) => validation.push(message(code, "Conduct dissenters missing")),
                None => {}
            }
        }
    }
    validation
}

/// Religion never needs remediation; neither does the final session of a graduating class.
fn recovery_exempt(workspace: &SessionWorkspace, subject: &Subject) -> bool {
    subject.kind == SubjectKind::Religion
        || (workspace.session.period == PeriodType::Final && workspace.class.is_graduating())
}

/// Ordered by priority: a higher kind suppresses lower ones for the same subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum IssueKind {
    MissingDebtDescription,
    MissingRecoveryMode,
    MissingGrade,
    MultipleProposals,
}

impl IssueKind {
    fn code(self) -> MessageCode {
        match self {
            Self::MissingDebtDescription => MessageCode::MissingDebtDescription,
            Self::MissingRecoveryMode => MessageCode::MissingRecoveryMode,
            Self::MissingGrade => MessageCode::MissingGrade,
            Self::MultipleProposals => MessageCode::MultipleProposals,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::MissingDebtDescription => "Debt description missing",
            Self::MissingRecoveryMode => "Recovery mode missing",
            Self::MissingGrade => "Grade missing",
            Self::MultipleProposals => "Conflicting proposals",
        }
    }

    const fn always_blocking(self) -> bool {
        matches!(self, Self::MissingGrade | Self::MultipleProposals)
    }
}

/// Keeps only the highest-priority issue per subject, with every student it affects.
#[derive(Debug, Default)]
struct IssueBoard {
    subjects: BTreeMap<SubjectId, (IssueKind, Vec<StudentId>)>,
}

impl IssueBoard {
    fn raise(&mut self, subject: SubjectId, student: StudentId, kind: IssueKind) {
        let entry = self
            .subjects
            .entry(subject)
            .or_insert_with(|| (kind, Vec::new()));
        if kind > entry.0 {
            *entry = (kind, vec![student]);
        } else if kind == entry.0 {
            entry.1.push(student);
        }
    }

    fn into_validation(self, workspace: &SessionWorkspace, annotations: Severity) -> Validation {
        self.subjects
            .into_iter()
            .map(|(subject, (kind, students))| {
                let names: Vec<String> = students
                    .iter()
                    .map(|student| workspace.student_name(*student))
                    .collect();
                let text = format!(
                    "{} in {} for {}",
                    kind.describe(),
                    workspace.subject_name(subject),
                    names.join(", ")
                );
                let message = if kind.always_blocking() || annotations == Severity::Blocking {
                    Message::blocking(kind.code(), text)
                } else {
                    Message::warning(kind.code(), text)
                };
                let message = message.for_subject(subject);
                match students.as_slice() {
                    [only] => message.for_student(*only),
                    _ => message,
                }
            })
            .collect()
    }
}

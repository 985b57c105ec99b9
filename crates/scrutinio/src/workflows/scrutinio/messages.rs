use serde::{Deserialize, Serialize};

use super::domain::{StudentId, SubjectId, TeacherId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Refuses the transition.
    Blocking,
    /// Surfaced to the caller without refusing anything.
    Warning,
}

/// Machine-readable reason attached to every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCode {
    MissingGrade,
    MultipleProposals,
    MissingRecoveryMode,
    MissingDebtDescription,
    MissingMotivation,
    MissingDeliberation,
    MissingDissenters,
    MissingSessionDate,
    MissingStartTime,
    MissingChair,
    MissingSecretary,
    IncompletePresence,
    MissingDisposition,
    MissingWaiverJustification,
    MissingDebtCommunication,
    InvalidGrade,
    MissingOutcome,
    MissingJudgement,
    MissingDeferralReason,
    AdmittedWithFailures,
    NotAdmittedWithoutFailures,
    SuspendedWithoutFailures,
    FailingReligionOutcome,
    FailingConductOutcome,
    TooManyFailures,
    SuspendedInFinalYear,
    MakeupGradeBelowFinal,
    MissingMakeupProposal,
    FinalSessionNotClosed,
    MissingCredit,
    CreditOutOfBand,
    MissingCertification,
    MissingDebtNotice,
    MissingDeficiencyNotice,
    MissingEndTime,
    InvalidMinutesNumber,
    UnvalidatedMinutesStep,
    UnknownMinutesStep,
    MinutesNotOpen,
    CreditAdjustmentNotApplicable,
    CreditAdjustmentOutOfBounds,
    MissingCreditJustification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub severity: Severity,
    pub code: MessageCode,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student: Option<StudentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<SubjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher: Option<TeacherId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl Message {
    pub fn blocking(code: MessageCode, text: impl Into<String>) -> Self {
        Self::new(Severity::Blocking, code, text)
    }

    pub fn warning(code: MessageCode, text: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, text)
    }

    fn new(severity: Severity, code: MessageCode, text: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            text: text.into(),
            student: None,
            subject: None,
            teacher: None,
            section: None,
        }
    }

    pub fn for_student(mut self, student: StudentId) -> Self {
        self.student = Some(student);
        self
    }

    pub fn for_subject(mut self, subject: SubjectId) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn for_teacher(mut self, teacher: TeacherId) -> Self {
        self.teacher = Some(teacher);
        self
    }

    pub fn in_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }
}

/// Messages accumulated over one validation pass. Every violation is listed;
/// nothing short-circuits on the first failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Validation {
    messages: Vec<Message>,
}

impl Validation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, other: Validation) {
        self.messages.extend(other.messages);
    }

    pub fn is_blocked(&self) -> bool {
        self.messages.iter().any(Message::is_blocking)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn count(&self, code: MessageCode) -> usize {
        self.messages
            .iter()
            .filter(|message| message.code == code)
            .count()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|message| !message.is_blocking())
    }

    /// Drops blocking messages, keeping the warnings.
    pub fn into_warnings(self) -> Self {
        Self {
            messages: self
                .messages
                .into_iter()
                .filter(|message| !message.is_blocking())
                .collect(),
        }
    }
}

impl From<Vec<Message>> for Validation {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

impl FromIterator<Message> for Validation {
    fn from_iter<T: IntoIterator<Item = Message>>(iter: T) -> Self {
        Self {
            messages: iter.into_iter().collect(),
        }
    }
}

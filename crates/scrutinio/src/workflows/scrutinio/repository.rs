use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    ClassId, ClassInfo, PeriodType, SessionId, SessionState, Student, StudentId, Subject,
    SubjectId, TeacherId,
};
use super::outcomes::Outcome;
use super::session::{GradingSession, SessionChanges};
use super::votes::{FinalVote, VoteProposal};

/// How the students of a session are selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RosterCriterion {
    /// Students enrolled in the class on the given date.
    EnrolledOn(NaiveDate),
    /// An explicit list, as frozen in a session snapshot.
    Listed(Vec<StudentId>),
}

/// Absence hours of one student in one subject over a date range.
///
/// Adapters include lessons attended while temporarily assigned to another class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsenceQuery {
    pub class_id: ClassId,
    pub student: StudentId,
    pub subject: SubjectId,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Data access consumed by the grading engine.
pub trait GradingRepository: Send + Sync {
    fn class(&self, id: ClassId) -> Result<Option<ClassInfo>, RepositoryError>;
    fn subjects(&self, class: ClassId) -> Result<Vec<Subject>, RepositoryError>;
    fn students(
        &self,
        class: ClassId,
        criterion: &RosterCriterion,
    ) -> Result<Vec<Student>, RepositoryError>;
    fn teachers(&self, class: ClassId) -> Result<Vec<TeacherId>, RepositoryError>;
    fn absence_hours(&self, query: &AbsenceQuery) -> Result<u32, RepositoryError>;
    fn session(
        &self,
        class: ClassId,
        period: PeriodType,
    ) -> Result<Option<GradingSession>, RepositoryError>;
    /// Creates the session in state `N`; `Conflict` if one already exists.
    fn create_session(
        &self,
        class: ClassId,
        period: PeriodType,
    ) -> Result<GradingSession, RepositoryError>;
    fn proposals(
        &self,
        class: ClassId,
        period: PeriodType,
    ) -> Result<Vec<VoteProposal>, RepositoryError>;
    /// Upserts by (class, period, student, subject, teacher).
    fn save_proposal(&self, proposal: VoteProposal) -> Result<(), RepositoryError>;
    fn final_votes(&self, session: SessionId) -> Result<Vec<FinalVote>, RepositoryError>;
    fn outcomes(&self, session: SessionId) -> Result<Vec<Outcome>, RepositoryError>;
    /// Writes the session, its votes and outcomes, and student credits as one unit.
    fn commit(&self, changes: SessionChanges) -> Result<(), RepositoryError>;

    /// First-term votes of the class; empty until that session is closed.
    fn closed_first_term_votes(&self, class: ClassId) -> Result<Vec<FinalVote>, RepositoryError> {
        match self.session(class, PeriodType::FirstTerm)? {
            Some(session) if session.state == SessionState::Closed => {
                self.final_votes(session.id)
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Folder holding the generated documents of one class and period.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentFolder {
    pub class_label: String,
    pub period: PeriodType,
}

impl DocumentFolder {
    pub fn new(class: &ClassInfo, period: PeriodType) -> Self {
        Self {
            class_label: class.label(),
            period,
        }
    }

    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.period.code().to_string()).join(&self.class_label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Minutes,
    Summary,
    ReportCards,
    DebtNotices,
    Certifications,
}

impl DocumentKind {
    pub const fn file_stem(self) -> &'static str {
        match self {
            Self::Minutes => "verbale",
            Self::Summary => "riepilogo-voti",
            Self::ReportCards => "pagelle",
            Self::DebtNotices => "debiti",
            Self::Certifications => "certificazioni",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub folder: DocumentFolder,
    pub kind: DocumentKind,
}

impl DocumentKey {
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}.pdf",
            self.folder.class_label,
            self.folder.period.code(),
            self.kind.file_stem()
        )
    }
}

/// Result of moving generated documents aside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveReceipt {
    /// Backup folder name, `None` when nothing had been generated.
    pub backup: Option<String>,
    pub moved: usize,
}

/// Generated-document storage. The engine never renders documents itself.
pub trait DocumentStore: Send + Sync {
    fn exists(&self, key: &DocumentKey) -> Result<bool, DocumentError>;
    fn write(&self, key: &DocumentKey, contents: &[u8]) -> Result<(), DocumentError>;
    /// Deletes every generated document in the folder, returning how many went.
    fn remove_all(&self, folder: &DocumentFolder) -> Result<usize, DocumentError>;
    /// Moves every generated document into a timestamped `BACKUP` subfolder.
    fn archive(&self, folder: &DocumentFolder) -> Result<ArchiveReceipt, DocumentError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("document storage failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("document store unavailable: {0}")]
    Unavailable(String),
}

pub const AUDIT_CATEGORY: &str = "SCRUTINIO";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub actor: TeacherId,
    pub ip: Option<String>,
    pub category: String,
    pub action: String,
    pub context: BTreeMap<String, String>,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only audit trail.
pub trait AuditSink: Send + Sync {
    fn append(&self, record: AuditRecord) -> Result<(), AuditError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

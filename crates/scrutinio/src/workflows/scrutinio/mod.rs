//! Grading-session ("scrutinio") workflow engine.
//!
//! One session per class and period walks a period-specific state graph, from
//! the proposal check through attendance, outcomes, credits and minutes up to
//! closure. Each transition is a guard over the loaded workspace; guards report
//! every violation at once and the service commits only when a guard passes.

pub mod attendance;
pub mod credits;
pub mod domain;
pub mod import;
pub mod machine;
pub mod messages;
pub mod minutes;
pub mod outcomes;
pub mod policy;
pub mod repository;
pub(crate) mod roster;
pub mod router;
pub mod service;
pub mod session;
pub mod votes;

#[cfg(test)]
mod tests;

pub use attendance::{
    AttendanceAssessment, AttendancePolicy, AttendanceStatus, Disposition, DispositionEntry,
    StudentAttendance,
};
pub use credits::{CreditBand, CreditCriterion};
pub use domain::{
    Actor, ClassId, ClassInfo, DomainParseError, GradingScale, GradingScales, PeriodType,
    PreviousCredits, SessionId, SessionState, Student, StudentId, Subject, SubjectId, SubjectKind,
    TeacherId,
};
pub use import::{ProposalImportError, ProposalImporter};
pub use machine::{GuardResult, PresenceForm, TransitionPayload, TransitionTable};
pub use messages::{Message, MessageCode, Severity, Validation};
pub use minutes::{ClosingForm, MinutesBlueprint, MinutesStep, MinutesStepKind};
pub use outcomes::{Outcome, Verdict};
pub use policy::{DateWindow, GradingPolicy, SchoolCalendar};
pub use repository::{
    AbsenceQuery, ArchiveReceipt, AuditError, AuditRecord, AuditSink, DocumentError,
    DocumentFolder, DocumentKey, DocumentKind, DocumentStore, GradingRepository, RepositoryError,
    RosterCriterion, AUDIT_CATEGORY,
};
pub use router::grading_router;
pub use service::{
    GradingSessionService, OutcomeForm, SessionServiceError, StepReport, TransitionCommand,
    TransitionReport, VoteUpdate, ANNULMENT_ACTION,
};
pub use session::{
    CreditAdjustment, CreditAdjustmentEntry, EligibilityPartition, GradingSession, MinutesState,
    PresenceRoll, RosterSnapshot, SessionChanges, SessionWorkspace, Substitute, TeacherAttendance,
    WaivedStudent,
};
pub use votes::{Deliberation, FinalVote, ProposalOverview, RecoveryMode, VoteProposal};

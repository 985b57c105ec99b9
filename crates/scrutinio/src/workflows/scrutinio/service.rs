use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::attendance::{self, AttendanceAssessment};
use super::credits::{self, CreditCriterion};
use super::domain::{
    Actor, ClassId, ClassInfo, PeriodType, SessionId, SessionState, Student, StudentId,
    SubjectId, TeacherId,
};
use super::machine::{GuardResult, TransitionContext, TransitionPayload, TransitionTable};
use super::messages::{Message, Validation};
use super::minutes::{self, MinutesBlueprint};
use super::outcomes::{Outcome, Verdict};
use super::policy::GradingPolicy;
use super::repository::{
    AuditError, AuditRecord, AuditSink, DocumentError, DocumentFolder, DocumentStore,
    GradingRepository, RepositoryError, AUDIT_CATEGORY,
};
use super::roster;
use super::session::{CreditAdjustmentEntry, GradingSession, SessionChanges, SessionWorkspace};
use super::votes::{self, Deliberation, FinalVote, ProposalOverview, RecoveryMode, VoteProposal};

/// Audit action written when a change already logged fails to commit.
pub const ANNULMENT_ACTION: &str = "Annullamento";

/// Request to move a session from one state to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionCommand {
    pub class_id: ClassId,
    pub period: PeriodType,
    pub from: SessionState,
    pub to: SessionState,
    pub actor: Actor,
    #[serde(default)]
    pub payload: TransitionPayload,
}

/// Outcome of a transition request. `applied` is false for refused, unauthorized
/// and unknown transitions alike; only refusals carry messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionReport {
    pub class_id: ClassId,
    pub period: PeriodType,
    pub from: SessionState,
    pub to: SessionState,
    pub state: SessionState,
    pub applied: bool,
    pub messages: Vec<Message>,
}

/// Outcome of a minutes edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub step: u8,
    pub validated: bool,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteUpdate {
    pub student: StudentId,
    pub subject: SubjectId,
    #[serde(default)]
    pub grade: Option<u8>,
    #[serde(default)]
    pub recovery: Option<RecoveryMode>,
    #[serde(default)]
    pub debt: Option<String>,
    #[serde(default)]
    pub deliberation: Option<Deliberation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeForm {
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
}

/// Orchestrates loading, the transition table, the single commit and the audit trail.
pub struct GradingSessionService<R, D, A> {
    repository: Arc<R>,
    documents: Arc<D>,
    audit: Arc<A>,
    policy: Arc<GradingPolicy>,
    table: Arc<TransitionTable>,
}

impl<R, D, A> GradingSessionService<R, D, A>
where
    R: GradingRepository + 'static,
    D: DocumentStore + 'static,
    A: AuditSink + 'static,
{
    pub fn new(repository: Arc<R>, documents: Arc<D>, audit: Arc<A>, policy: GradingPolicy) -> Self {
        Self {
            repository,
            documents,
            audit,
            policy: Arc::new(policy),
            table: Arc::new(TransitionTable::standard()),
        }
    }

    pub fn policy(&self) -> &GradingPolicy {
        &self.policy
    }

    /// States the session can move to from where it is now.
    pub fn available_transitions(
        &self,
        class_id: ClassId,
        period: PeriodType,
    ) -> Result<Vec<SessionState>, SessionServiceError> {
        let state = self
            .repository
            .session(class_id, period)?
            .map(|session| session.state)
            .unwrap_or(SessionState::NotStarted);
        Ok(self.table.targets(period, state))
    }

    pub fn transition(
        &self,
        command: TransitionCommand,
    ) -> Result<TransitionReport, SessionServiceError> {
        let class = self.class(command.class_id)?;
        let session = match self.repository.session(class.id, command.period)? {
            Some(session) => session,
            None => self.repository.create_session(class.id, command.period)?,
        };

        let mut report = TransitionReport {
            class_id: class.id,
            period: command.period,
            from: command.from,
            to: command.to,
            state: session.state,
            applied: false,
            messages: Vec::new(),
        };

        let handler = self
            .table
            .get(command.period, command.from, command.to)
            .filter(|_| command.from == session.state);
        let Some(handler) = handler else {
            debug!(
                class = %class.label(),
                period = %command.period,
                state = %session.state,
                from = %command.from,
                to = %command.to,
                "ignoring unregistered transition"
            );
            return Ok(report);
        };

        let mut workspace = self.load_workspace(class, session)?;
        let result = {
            let mut context = TransitionContext {
                workspace: &mut workspace,
                actor: &command.actor,
                payload: &command.payload,
                repository: &*self.repository,
                documents: &*self.documents,
                policy: self.policy.as_ref(),
            };
            handler(&mut context)?
        };

        match result {
            GuardResult::Passed(validation) => {
                workspace.session.state = command.to;
                let session = workspace.session.clone();
                let label = workspace.class.label();
                let record = self.audit_record(
                    &command.actor,
                    "Cambio stato",
                    [
                        ("Scrutinio", session.id.to_string()),
                        ("Classe", label.clone()),
                        ("Periodo", command.period.code().to_string()),
                        ("Stato iniziale", command.from.token()),
                        ("Stato finale", command.to.token()),
                    ],
                );
                self.commit_audited(workspace.into_changes(), record)?;
                info!(
                    class = %label,
                    period = %command.period,
                    from = %command.from,
                    to = %command.to,
                    warnings = validation.warnings().count(),
                    "grading session transition applied"
                );
                report.state = command.to;
                report.applied = true;
                report.messages = validation.into_messages();
            }
            GuardResult::Blocked(validation) => {
                warn!(
                    class = %workspace.class.label(),
                    period = %command.period,
                    from = %command.from,
                    to = %command.to,
                    messages = validation.messages().len(),
                    "grading session transition refused"
                );
                report.messages = validation.into_messages();
            }
            GuardResult::Unauthorized => {
                warn!(
                    class = %workspace.class.label(),
                    period = %command.period,
                    actor = %command.actor.id,
                    "grading session transition not authorized"
                );
            }
        }

        Ok(report)
    }

    pub fn session(
        &self,
        class_id: ClassId,
        period: PeriodType,
    ) -> Result<Option<GradingSession>, SessionServiceError> {
        self.class(class_id)?;
        Ok(self.repository.session(class_id, period)?)
    }

    /// Students subject to the session in its current stage.
    pub fn roster(
        &self,
        class_id: ClassId,
        period: PeriodType,
    ) -> Result<Vec<Student>, SessionServiceError> {
        let workspace = self.inspect(class_id, period)?;
        Ok(workspace
            .active_students()
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn proposal_overview(
        &self,
        class_id: ClassId,
        period: PeriodType,
    ) -> Result<ProposalOverview, SessionServiceError> {
        let workspace = self.inspect(class_id, period)?;
        let proposals = self.repository.proposals(class_id, period)?;
        Ok(votes::proposal_overview(&workspace, &proposals))
    }

    /// Attendance assessment of the final session against the absence ceiling.
    pub fn eligibility(&self, class_id: ClassId) -> Result<AttendanceAssessment, SessionServiceError> {
        let workspace = self.inspect(class_id, PeriodType::Final)?;
        let first_term_votes = self.repository.closed_first_term_votes(class_id)?;
        let roster: Vec<&Student> = match &workspace.session.roster {
            snapshot if snapshot.is_empty() => workspace.students.values().collect(),
            snapshot => snapshot
                .students()
                .iter()
                .filter_map(|id| workspace.students.get(id))
                .collect(),
        };
        let tallies = attendance::tally_absences(
            &roster,
            first_term_votes.iter().chain(workspace.votes.values()),
        );
        Ok(attendance::evaluate(
            &workspace.class,
            &roster,
            &tallies,
            &self.policy.attendance,
        ))
    }

    /// Proposal sheet of one subject, with placeholders for students lacking one.
    pub fn collect_proposals(
        &self,
        class_id: ClassId,
        period: PeriodType,
        subject: SubjectId,
        teacher: Option<TeacherId>,
    ) -> Result<Vec<VoteProposal>, SessionServiceError> {
        let workspace = self.inspect(class_id, period)?;
        let subject = workspace
            .subjects
            .iter()
            .find(|candidate| candidate.id == subject)
            .ok_or(SessionServiceError::UnknownSubject(subject))?;
        let students: Vec<Student> = workspace.active_students().into_iter().cloned().collect();
        let existing = self.repository.proposals(class_id, period)?;
        Ok(votes::collect_proposals(
            class_id, period, subject, teacher, &students, &existing,
        ))
    }

    /// Proposals can change only before the session starts.
    pub fn submit_proposal(&self, proposal: VoteProposal) -> Result<(), SessionServiceError> {
        self.class(proposal.class_id)?;
        if let Some(session) = self
            .repository
            .session(proposal.class_id, proposal.period)?
        {
            if session.state != SessionState::NotStarted {
                return Err(SessionServiceError::NotEditable(session.state));
            }
        }
        self.repository.save_proposal(proposal)?;
        Ok(())
    }

    /// Bulk variant of [`Self::submit_proposal`] used by the register export.
    pub fn import_proposals(
        &self,
        proposals: Vec<VoteProposal>,
    ) -> Result<usize, SessionServiceError> {
        let count = proposals.len();
        for proposal in proposals {
            self.submit_proposal(proposal)?;
        }
        debug!(count, "grade proposals imported");
        Ok(count)
    }

    pub fn record_vote(
        &self,
        class_id: ClassId,
        period: PeriodType,
        update: VoteUpdate,
    ) -> Result<FinalVote, SessionServiceError> {
        let workspace = self.editable(class_id, period)?;
        ensure_on_roster(&workspace, update.student)?;

        let mut vote = workspace
            .vote(update.student, update.subject)
            .cloned()
            .unwrap_or_else(|| FinalVote {
                session: workspace.session.id,
                student: update.student,
                subject: update.subject,
                grade: None,
                proposed: None,
                absence_hours: 0,
                recovery: None,
                debt: None,
                deliberation: Deliberation::default(),
            });
        vote.grade = update.grade;
        vote.recovery = update.recovery;
        vote.debt = update.debt;
        if let Some(deliberation) = update.deliberation {
            vote.deliberation = deliberation;
        }

        let mut changes = SessionChanges::session_only(workspace.session);
        changes.votes.push(vote.clone());
        self.repository.commit(changes)?;
        Ok(vote)
    }

    /// Records the council's verdict. Abroad and ineligible verdicts come only
    /// from the attendance check.
    pub fn record_outcome(
        &self,
        class_id: ClassId,
        period: PeriodType,
        form: OutcomeForm,
    ) -> Result<Outcome, SessionServiceError> {
        if form.verdict.is_attendance_verdict() {
            return Err(SessionServiceError::ReservedVerdict(form.verdict));
        }
        let workspace = self.editable(class_id, period)?;
        ensure_on_roster(&workspace, form.student)?;

        let mut outcome = workspace
            .outcomes
            .get(&form.student)
            .cloned()
            .unwrap_or_else(|| Outcome::new(workspace.session.id, form.student, form.verdict));
        outcome.verdict = form.verdict;
        outcome.unanimous = form.unanimous;
        outcome.dissenters = form.dissenters;
        outcome.judgement = form.judgement;
        outcome.deferral_reason = form.deferral_reason;

        self.commit_outcome(workspace.session, outcome)
    }

    /// Sets the credit from the band of the student's average and the ticked criteria.
    pub fn assign_credit(
        &self,
        class_id: ClassId,
        period: PeriodType,
        student: StudentId,
        criteria: Vec<CreditCriterion>,
    ) -> Result<Outcome, SessionServiceError> {
        let workspace = self.editable(class_id, period)?;
        ensure_on_roster(&workspace, student)?;
        let mut outcome = workspace
            .outcomes
            .get(&student)
            .filter(|outcome| outcome.verdict == Verdict::Admitted)
            .cloned()
            .ok_or(SessionServiceError::NotAdmitted(student))?;

        if outcome.average.is_none() {
            outcome.average = votes::compute_average(&workspace, student);
        }
        let recovered_with_merit = if period.is_makeup() {
            self.recovered_with_merit(&workspace, student)?
        } else {
            false
        };
        outcome.credit = outcome.average.and_then(|average| {
            credits::suggested_credit(&workspace, student, average, &criteria, recovered_with_merit)
        });
        outcome.credit_criteria = criteria;

        self.commit_outcome(workspace.session, outcome)
    }

    pub fn record_certification(
        &self,
        class_id: ClassId,
        period: PeriodType,
        student: StudentId,
        completed: bool,
    ) -> Result<Outcome, SessionServiceError> {
        let workspace = self.editable(class_id, period)?;
        let mut outcome = workspace
            .outcomes
            .get(&student)
            .cloned()
            .ok_or(SessionServiceError::NotAdmitted(student))?;
        outcome.certification_completed = completed;
        self.commit_outcome(workspace.session, outcome)
    }

    pub fn confirm_notices(
        &self,
        class_id: ClassId,
        period: PeriodType,
        student: StudentId,
        debt_notice: bool,
        deficiency_notice: bool,
    ) -> Result<Outcome, SessionServiceError> {
        let workspace = self.editable(class_id, period)?;
        let mut outcome = workspace
            .outcomes
            .get(&student)
            .cloned()
            .ok_or(SessionServiceError::UnknownStudent(student))?;
        outcome.debt_notice_confirmed = debt_notice;
        outcome.deficiency_notice_confirmed = deficiency_notice;
        self.commit_outcome(workspace.session, outcome)
    }

    /// Stores a minutes argument; the step validates whatever the text.
    pub fn record_argument(
        &self,
        class_id: ClassId,
        period: PeriodType,
        step: u8,
        text: &str,
        actor: &Actor,
    ) -> Result<StepReport, SessionServiceError> {
        let mut workspace = self.editable(class_id, period)?;
        let blueprint = MinutesBlueprint::standard(period);
        let validation =
            minutes::record_argument(&mut workspace.session.minutes, &blueprint, step, text);
        if validation.is_blocked() {
            return Ok(step_report(step, false, validation));
        }

        let label = workspace.class.label();
        let session = workspace.session;
        let record = self.minutes_record(actor, session.id, &label, period, "Argomento", step);
        self.commit_audited(SessionChanges::session_only(session), record)?;
        Ok(step_report(step, true, validation))
    }

    /// Corrects carried-over credits. Generated documents are removed so they
    /// get regenerated with the new figures.
    pub fn record_credit_adjustment(
        &self,
        class_id: ClassId,
        period: PeriodType,
        step: u8,
        entries: Vec<CreditAdjustmentEntry>,
        actor: &Actor,
    ) -> Result<StepReport, SessionServiceError> {
        let mut workspace = self.editable(class_id, period)?;
        let blueprint = MinutesBlueprint::standard(period);
        let validation =
            minutes::record_credit_adjustment(&mut workspace, &blueprint, step, &entries);
        if validation.is_blocked() {
            if workspace.session.minutes.is_open(step) {
                self.repository
                    .commit(SessionChanges::session_only(workspace.session))?;
            }
            return Ok(step_report(step, false, validation));
        }

        let folder = DocumentFolder::new(&workspace.class, period);
        let removed = self.documents.remove_all(&folder)?;
        let label = workspace.class.label();
        let record = self.minutes_record(
            actor,
            workspace.session.id,
            &label,
            period,
            "Crediti",
            step,
        );
        self.commit_audited(workspace.into_changes(), record)?;
        info!(class = %label, removed, "previous credits corrected");
        Ok(step_report(step, true, validation))
    }

    /// Set or cleared by the external register synchronisation.
    pub fn set_sync_lock(
        &self,
        class_id: ClassId,
        period: PeriodType,
        locked: bool,
    ) -> Result<GradingSession, SessionServiceError> {
        let mut session = self
            .repository
            .session(class_id, period)?
            .ok_or(SessionServiceError::SessionNotFound { class_id, period })?;
        session.sync_locked = locked;
        self.repository
            .commit(SessionChanges::session_only(session.clone()))?;
        Ok(session)
    }

    fn class(&self, class_id: ClassId) -> Result<ClassInfo, SessionServiceError> {
        self.repository
            .class(class_id)?
            .ok_or(SessionServiceError::UnknownClass(class_id))
    }

    fn load_workspace(
        &self,
        class: ClassInfo,
        session: GradingSession,
    ) -> Result<SessionWorkspace, SessionServiceError> {
        let subjects = self.repository.subjects(class.id)?;
        let students = roster::roster_students(&*self.repository, &class, &session, &self.policy)?;
        let votes = self.repository.final_votes(session.id)?;
        let outcomes = self.repository.outcomes(session.id)?;
        Ok(SessionWorkspace::new(
            class, session, subjects, students, votes, outcomes,
        ))
    }

    /// Read-only view; sessions that do not exist yet are not created.
    fn inspect(
        &self,
        class_id: ClassId,
        period: PeriodType,
    ) -> Result<SessionWorkspace, SessionServiceError> {
        let class = self.class(class_id)?;
        let session = self
            .repository
            .session(class_id, period)?
            .unwrap_or_else(|| GradingSession::new(SessionId(0), class_id, period));
        self.load_workspace(class, session)
    }

    fn editable(
        &self,
        class_id: ClassId,
        period: PeriodType,
    ) -> Result<SessionWorkspace, SessionServiceError> {
        let class = self.class(class_id)?;
        let session = self
            .repository
            .session(class_id, period)?
            .ok_or(SessionServiceError::SessionNotFound { class_id, period })?;
        if !session.is_editable() {
            return Err(SessionServiceError::NotEditable(session.state));
        }
        self.load_workspace(class, session)
    }

    fn commit_outcome(
        &self,
        session: GradingSession,
        outcome: Outcome,
    ) -> Result<Outcome, SessionServiceError> {
        let mut changes = SessionChanges::session_only(session);
        changes.outcomes.push(outcome.clone());
        self.repository.commit(changes)?;
        Ok(outcome)
    }

    /// Whether a subject failed in the final session was recovered with at least 7.
    fn recovered_with_merit(
        &self,
        workspace: &SessionWorkspace,
        student: StudentId,
    ) -> Result<bool, SessionServiceError> {
        let Some(final_session) = self
            .repository
            .session(workspace.class.id, PeriodType::Final)?
        else {
            return Ok(false);
        };
        let scales = workspace.scales();
        let final_votes = self.repository.final_votes(final_session.id)?;
        Ok(final_votes
            .iter()
            .filter(|vote| vote.student == student)
            .any(|previous| {
                let Some(subject) = workspace
                    .subjects
                    .iter()
                    .find(|subject| subject.id == previous.subject)
                else {
                    return false;
                };
                let failed = previous
                    .grade
                    .map(|grade| scales.for_kind(subject.kind).is_failing(grade))
                    .unwrap_or(false);
                let recovered = workspace
                    .vote(student, subject.id)
                    .and_then(|vote| vote.grade)
                    .map(|grade| grade >= 7)
                    .unwrap_or(false);
                failed && recovered
            }))
    }

    /// Appends the record, then commits. When the commit fails the record is
    /// followed by an annulment, so the trail never reports an unwritten change.
    fn commit_audited(
        &self,
        changes: SessionChanges,
        record: AuditRecord,
    ) -> Result<(), SessionServiceError> {
        self.audit.append(record.clone())?;
        if let Err(err) = self.repository.commit(changes) {
            let mut annulment = record;
            annulment
                .context
                .insert("Azione annullata".to_string(), annulment.action);
            annulment.action = ANNULMENT_ACTION.to_string();
            annulment.recorded_at = Utc::now();
            if let Err(audit_err) = self.audit.append(annulment) {
                error!(error = %audit_err, "audit annulment not recorded");
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn minutes_record(
        &self,
        actor: &Actor,
        session: SessionId,
        class_label: &str,
        period: PeriodType,
        kind: &str,
        step: u8,
    ) -> AuditRecord {
        self.audit_record(
            actor,
            "Modifica verbale",
            [
                ("Scrutinio", session.to_string()),
                ("Classe", class_label.to_string()),
                ("Periodo", period.code().to_string()),
                ("Tipo", kind.to_string()),
                ("Punto", step.to_string()),
            ],
        )
    }

    fn audit_record<const N: usize>(
        &self,
        actor: &Actor,
        action: &str,
        context: [(&str, String); N],
    ) -> AuditRecord {
        AuditRecord {
            actor: actor.id,
            ip: actor.ip.clone(),
            category: AUDIT_CATEGORY.to_string(),
            action: action.to_string(),
            context: context
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect::<BTreeMap<_, _>>(),
            recorded_at: Utc::now(),
        }
    }
}

fn ensure_on_roster(
    workspace: &SessionWorkspace,
    student: StudentId,
) -> Result<(), SessionServiceError> {
    if workspace.active_roster().contains(&student) {
        Ok(())
    } else {
        Err(SessionServiceError::UnknownStudent(student))
    }
}

fn step_report(step: u8, validated: bool, validation: Validation) -> StepReport {
    StepReport {
        step,
        validated,
        messages: validation.into_messages(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionServiceError {
    #[error("class {0} not found")]
    UnknownClass(ClassId),
    #[error("no {period} session for class {class_id}")]
    SessionNotFound { class_id: ClassId, period: PeriodType },
    #[error("session cannot be edited in state {0}")]
    NotEditable(SessionState),
    #[error("student {0} is not part of this session")]
    UnknownStudent(StudentId),
    #[error("subject {0} is not taught in this class")]
    UnknownSubject(SubjectId),
    #[error("student {0} has no admitted outcome")]
    NotAdmitted(StudentId),
    #[error("verdict {0:?} is assigned by the attendance check")]
    ReservedVerdict(Verdict),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Audit(#[from] AuditError),
}

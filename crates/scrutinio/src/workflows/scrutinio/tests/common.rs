use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::response::Response;
use chrono::{NaiveDate, NaiveTime};
use serde_json::Value;

use crate::workflows::scrutinio::{
    AbsenceQuery, Actor, ArchiveReceipt, AttendancePolicy, AuditError, AuditRecord, AuditSink,
    ClassId, ClassInfo, ClosingForm, Deliberation, DocumentError, DocumentFolder, DocumentKey,
    DocumentStore, FinalVote, GradingPolicy, GradingRepository, GradingScales, GradingSession,
    GradingSessionService, Outcome, PeriodType, PresenceForm, PresenceRoll, RecoveryMode,
    RepositoryError, RosterCriterion, RosterSnapshot, SchoolCalendar, SessionChanges, SessionId,
    SessionState, SessionWorkspace, Student, StudentId, Subject, SubjectId, SubjectKind,
    TeacherAttendance, TeacherId, TransitionCommand, TransitionPayload, TransitionReport,
    VoteProposal, VoteUpdate,
};

pub(super) const CLASS: ClassId = ClassId(1);
pub(super) const ANNA: StudentId = StudentId(101);
/// Opted out of religion.
pub(super) const LUCA: StudentId = StudentId(102);
pub(super) const SARA: StudentId = StudentId(103);
pub(super) const ITALIAN: SubjectId = SubjectId(1);
pub(super) const MATH: SubjectId = SubjectId(2);
pub(super) const RELIGION: SubjectId = SubjectId(3);
pub(super) const CIVICS: SubjectId = SubjectId(4);
pub(super) const CONDUCT: SubjectId = SubjectId(5);
pub(super) const TEACHERS: [TeacherId; 3] = [TeacherId(201), TeacherId(202), TeacherId(203)];

pub(super) type TestService = GradingSessionService<MemoryRepository, MemoryDocuments, MemoryAudit>;

pub(super) fn class_info(year: u8, weekly_hours: u16) -> ClassInfo {
    ClassInfo {
        id: CLASS,
        year,
        section: "A".to_string(),
        weekly_hours,
    }
}

pub(super) fn subjects() -> Vec<Subject> {
    let subject = |id: SubjectId, name: &str, kind: SubjectKind, counts: bool| Subject {
        id,
        name: name.to_string(),
        kind,
        counts_toward_average: counts,
    };
    vec![
        subject(ITALIAN, "Italiano", SubjectKind::Standard, true),
        subject(MATH, "Matematica", SubjectKind::Standard, true),
        subject(RELIGION, "Religione", SubjectKind::Religion, false),
        subject(CIVICS, "Educazione civica", SubjectKind::CivicEducation, true),
        subject(CONDUCT, "Condotta", SubjectKind::Conduct, true),
    ]
}

pub(super) fn students() -> Vec<Student> {
    let student = |id: StudentId, name: &str, religion: bool| Student {
        id,
        name: name.to_string(),
        religion_opt_in: religion,
        abroad: false,
        previous_credits: Default::default(),
        extra_absence_hours: 0,
    };
    vec![
        student(ANNA, "Anna Bianchi", true),
        student(LUCA, "Luca Rossi", false),
        student(SARA, "Sara Verdi", true),
    ]
}

pub(super) fn policy() -> GradingPolicy {
    GradingPolicy::new(
        SchoolCalendar::for_school_year(2024),
        AttendancePolicy::default(),
    )
}

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
}

/// A session already past its start, with the whole class frozen and no votes.
pub(super) fn workspace(period: PeriodType, year: u8) -> SessionWorkspace {
    let mut session = GradingSession::new(SessionId(1), CLASS, period);
    session.state = SessionState::Stage(1);
    session.roster = RosterSnapshot::new(students().iter().map(|student| student.id));
    session.scales = Some(GradingScales::default());
    SessionWorkspace::new(
        class_info(year, 30),
        session,
        subjects(),
        students(),
        Vec::new(),
        Vec::new(),
    )
}

pub(super) fn vote(student: StudentId, subject: SubjectId, grade: Option<u8>) -> FinalVote {
    FinalVote {
        session: SessionId(1),
        student,
        subject,
        grade,
        proposed: grade,
        absence_hours: 0,
        recovery: None,
        debt: None,
        deliberation: Deliberation::default(),
    }
}

pub(super) fn motivated() -> Deliberation {
    Deliberation {
        motivation: "Comportamento corretto e partecipe".to_string(),
        unanimous: Some(true),
        dissenters: Vec::new(),
    }
}

pub(super) fn passing_grade(kind: SubjectKind) -> u8 {
    match kind {
        SubjectKind::Religion => 25,
        SubjectKind::Conduct => 8,
        SubjectKind::Standard | SubjectKind::CivicEducation => 7,
    }
}

/// Every applicable subject graded with a pass; conduct fully deliberated.
pub(super) fn grade_everything(workspace: &mut SessionWorkspace) {
    let subjects = workspace.subjects.clone();
    let students: Vec<Student> = workspace.students.values().cloned().collect();
    for student in &students {
        for subject in subjects.iter().filter(|subject| subject.applies_to(student)) {
            let mut record = vote(student.id, subject.id, Some(passing_grade(subject.kind)));
            if subject.kind == SubjectKind::Conduct {
                record.deliberation = motivated();
            }
            workspace.votes.insert((student.id, subject.id), record);
        }
    }
}

pub(super) fn set_grade(
    workspace: &mut SessionWorkspace,
    student: StudentId,
    subject: SubjectId,
    grade: u8,
) {
    workspace
        .votes
        .entry((student, subject))
        .or_insert_with(|| vote(student, subject, None))
        .grade = Some(grade);
}

pub(super) fn proposal(
    period: PeriodType,
    student: StudentId,
    subject: SubjectId,
    grade: Option<u8>,
) -> VoteProposal {
    VoteProposal {
        class_id: CLASS,
        period,
        student,
        subject,
        teacher: Some(TEACHERS[0]),
        grade,
        recovery: None,
        debt: None,
    }
}

/// Passing proposals for everyone, except Luca failing maths with full annotations.
/// Civic education and conduct get none.
pub(super) fn class_proposals(period: PeriodType) -> Vec<VoteProposal> {
    let subjects = subjects();
    students()
        .iter()
        .flat_map(|student| {
            subjects
                .iter()
                .filter(|subject| subject.kind.has_register_proposals())
                .filter(|subject| subject.applies_to(student))
                .map(|subject| {
                    if student.id == LUCA && subject.id == MATH {
                        VoteProposal {
                            recovery: Some(RecoveryMode::Course),
                            debt: Some("Equazioni di secondo grado".to_string()),
                            ..proposal(period, student.id, subject.id, Some(5))
                        }
                    } else {
                        proposal(period, student.id, subject.id, Some(passing_grade(subject.kind)))
                    }
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

pub(super) fn presence_payload() -> TransitionPayload {
    TransitionPayload {
        presence: Some(PresenceForm {
            date: Some(date(2025, 6, 12)),
            start_time: Some(time(14, 30)),
            roll: PresenceRoll {
                principal_presides: true,
                chair: None,
                secretary: Some(TEACHERS[1]),
                attendance: TEACHERS
                    .iter()
                    .map(|teacher| TeacherAttendance {
                        teacher: *teacher,
                        present: true,
                        substitute: None,
                    })
                    .collect(),
            },
        }),
        ..TransitionPayload::default()
    }
}

pub(super) fn closing_payload(number: i64) -> TransitionPayload {
    TransitionPayload {
        closing: Some(ClosingForm {
            end_time: Some(time(16, 0)),
            minutes_number: Some(number),
        }),
        ..TransitionPayload::default()
    }
}

pub(super) fn seeded_repository(year: u8, weekly_hours: u16) -> MemoryRepository {
    let repository = MemoryRepository::default();
    {
        let mut store = repository.store();
        store.classes.insert(CLASS, class_info(year, weekly_hours));
        store.subjects.insert(CLASS, subjects());
        store.students.insert(CLASS, students());
        store.teachers.insert(CLASS, TEACHERS.to_vec());
    }
    repository
}

pub(super) fn build_service(
    repository: MemoryRepository,
) -> (
    TestService,
    Arc<MemoryRepository>,
    Arc<MemoryDocuments>,
    Arc<MemoryAudit>,
) {
    let repository = Arc::new(repository);
    let documents = Arc::new(MemoryDocuments::default());
    let audit = Arc::new(MemoryAudit::default());
    let service = GradingSessionService::new(
        repository.clone(),
        documents.clone(),
        audit.clone(),
        policy(),
    );
    (service, repository, documents, audit)
}

pub(super) fn command(
    period: PeriodType,
    from: SessionState,
    to: SessionState,
    actor: Actor,
    payload: TransitionPayload,
) -> TransitionCommand {
    TransitionCommand {
        class_id: CLASS,
        period,
        from,
        to,
        actor,
        payload,
    }
}

pub(super) fn advance(
    service: &TestService,
    period: PeriodType,
    from: SessionState,
    to: SessionState,
    payload: TransitionPayload,
) -> TransitionReport {
    service
        .transition(command(period, from, to, Actor::teacher(201), payload))
        .expect("transition runs")
}

/// Records a motivated conduct vote for every student on the current roster.
pub(super) fn deliberate_conduct(service: &TestService, period: PeriodType) {
    for student in service.roster(CLASS, period).expect("roster loads") {
        service
            .record_vote(
                CLASS,
                period,
                VoteUpdate {
                    student: student.id,
                    subject: CONDUCT,
                    grade: Some(8),
                    recovery: None,
                    debt: None,
                    deliberation: Some(motivated()),
                },
            )
            .expect("conduct vote recorded");
    }
}

pub(super) fn grade_civics(service: &TestService, period: PeriodType) {
    for student in service.roster(CLASS, period).expect("roster loads") {
        service
            .record_vote(
                CLASS,
                period,
                VoteUpdate {
                    student: student.id,
                    subject: CIVICS,
                    grade: Some(passing_grade(SubjectKind::CivicEducation)),
                    recovery: None,
                    debt: None,
                    deliberation: None,
                },
            )
            .expect("civic vote recorded");
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

#[derive(Default)]
pub(super) struct MemoryStore {
    pub(super) classes: HashMap<ClassId, ClassInfo>,
    pub(super) subjects: HashMap<ClassId, Vec<Subject>>,
    pub(super) students: HashMap<ClassId, Vec<Student>>,
    pub(super) teachers: HashMap<ClassId, Vec<TeacherId>>,
    pub(super) absences: HashMap<(StudentId, SubjectId), u32>,
    pub(super) sessions: HashMap<(ClassId, PeriodType), GradingSession>,
    pub(super) proposals: Vec<VoteProposal>,
    pub(super) votes: BTreeMap<(SessionId, StudentId, SubjectId), FinalVote>,
    pub(super) outcomes: BTreeMap<(SessionId, StudentId), Outcome>,
    pub(super) commits: usize,
    /// Refuse every commit while reads keep working.
    pub(super) reject_commits: bool,
}

#[derive(Default, Clone)]
pub(super) struct MemoryRepository {
    store: Arc<Mutex<MemoryStore>>,
}

impl MemoryRepository {
    pub(super) fn store(&self) -> MutexGuard<'_, MemoryStore> {
        self.store.lock().expect("repository mutex poisoned")
    }

    pub(super) fn set_absences(&self, student: StudentId, subject: SubjectId, hours: u32) {
        self.store().absences.insert((student, subject), hours);
    }

    pub(super) fn commits(&self) -> usize {
        self.store().commits
    }

    pub(super) fn stored_session(&self, period: PeriodType) -> Option<GradingSession> {
        self.store().sessions.get(&(CLASS, period)).cloned()
    }

    pub(super) fn stored_outcome(&self, period: PeriodType, student: StudentId) -> Option<Outcome> {
        let store = self.store();
        let session = store.sessions.get(&(CLASS, period))?.id;
        store.outcomes.get(&(session, student)).cloned()
    }

    pub(super) fn stored_vote(
        &self,
        period: PeriodType,
        student: StudentId,
        subject: SubjectId,
    ) -> Option<FinalVote> {
        let store = self.store();
        let session = store.sessions.get(&(CLASS, period))?.id;
        store.votes.get(&(session, student, subject)).cloned()
    }

    pub(super) fn seed_proposals(&self, proposals: Vec<VoteProposal>) {
        for proposal in proposals {
            self.save_proposal(proposal).expect("proposal saved");
        }
    }
}

impl GradingRepository for MemoryRepository {
    fn class(&self, id: ClassId) -> Result<Option<ClassInfo>, RepositoryError> {
        Ok(self.store().classes.get(&id).cloned())
    }

    fn subjects(&self, class: ClassId) -> Result<Vec<Subject>, RepositoryError> {
        Ok(self.store().subjects.get(&class).cloned().unwrap_or_default())
    }

    fn students(
        &self,
        class: ClassId,
        criterion: &RosterCriterion,
    ) -> Result<Vec<Student>, RepositoryError> {
        let enrolled = self.store().students.get(&class).cloned().unwrap_or_default();
        Ok(match criterion {
            RosterCriterion::EnrolledOn(_) => enrolled,
            RosterCriterion::Listed(ids) => enrolled
                .into_iter()
                .filter(|student| ids.contains(&student.id))
                .collect(),
        })
    }

    fn teachers(&self, class: ClassId) -> Result<Vec<TeacherId>, RepositoryError> {
        Ok(self.store().teachers.get(&class).cloned().unwrap_or_default())
    }

    fn absence_hours(&self, query: &AbsenceQuery) -> Result<u32, RepositoryError> {
        Ok(self
            .store()
            .absences
            .get(&(query.student, query.subject))
            .copied()
            .unwrap_or(0))
    }

    fn session(
        &self,
        class: ClassId,
        period: PeriodType,
    ) -> Result<Option<GradingSession>, RepositoryError> {
        Ok(self.store().sessions.get(&(class, period)).cloned())
    }

    fn create_session(
        &self,
        class: ClassId,
        period: PeriodType,
    ) -> Result<GradingSession, RepositoryError> {
        let mut store = self.store();
        if store.sessions.contains_key(&(class, period)) {
            return Err(RepositoryError::Conflict);
        }
        let id = SessionId(store.sessions.len() as u32 + 1);
        let session = GradingSession::new(id, class, period);
        store.sessions.insert((class, period), session.clone());
        Ok(session)
    }

    fn proposals(
        &self,
        class: ClassId,
        period: PeriodType,
    ) -> Result<Vec<VoteProposal>, RepositoryError> {
        Ok(self
            .store()
            .proposals
            .iter()
            .filter(|proposal| proposal.class_id == class && proposal.period == period)
            .cloned()
            .collect())
    }

    fn save_proposal(&self, proposal: VoteProposal) -> Result<(), RepositoryError> {
        let mut store = self.store();
        store.proposals.retain(|stored| {
            (
                stored.class_id,
                stored.period,
                stored.student,
                stored.subject,
                stored.teacher,
            ) != (
                proposal.class_id,
                proposal.period,
                proposal.student,
                proposal.subject,
                proposal.teacher,
            )
        });
        store.proposals.push(proposal);
        Ok(())
    }

    fn final_votes(&self, session: SessionId) -> Result<Vec<FinalVote>, RepositoryError> {
        Ok(self
            .store()
            .votes
            .values()
            .filter(|vote| vote.session == session)
            .cloned()
            .collect())
    }

    fn outcomes(&self, session: SessionId) -> Result<Vec<Outcome>, RepositoryError> {
        Ok(self
            .store()
            .outcomes
            .values()
            .filter(|outcome| outcome.session == session)
            .cloned()
            .collect())
    }

    fn commit(&self, changes: SessionChanges) -> Result<(), RepositoryError> {
        let mut store = self.store();
        if store.reject_commits {
            return Err(RepositoryError::Unavailable("write rejected".to_string()));
        }
        let session = changes.session;
        let id = session.id;
        let class = session.class_id;
        for vote in changes.votes {
            store.votes.insert((id, vote.student, vote.subject), vote);
        }
        for outcome in changes.outcomes {
            store.outcomes.insert((id, outcome.student), outcome);
        }
        for student in changes.removed_outcomes {
            store.outcomes.remove(&(id, student));
        }
        if let Some(enrolled) = store.students.get_mut(&class) {
            for (student, credits) in changes.student_credits {
                if let Some(record) = enrolled.iter_mut().find(|record| record.id == student) {
                    record.previous_credits = credits;
                }
            }
        }
        store.sessions.insert((class, session.period), session);
        store.commits += 1;
        Ok(())
    }
}

/// Generated documents keyed by `<period>/<class>/<file>`.
#[derive(Default, Clone)]
pub(super) struct MemoryDocuments {
    files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    receipts: Arc<Mutex<Vec<ArchiveReceipt>>>,
}

impl MemoryDocuments {
    fn prefix(folder: &DocumentFolder) -> String {
        format!("{}/", folder.relative_path().to_string_lossy())
    }

    pub(super) fn count(&self, folder: &DocumentFolder) -> usize {
        let prefix = Self::prefix(folder);
        self.files
            .lock()
            .expect("documents mutex poisoned")
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .count()
    }

    pub(super) fn receipts(&self) -> Vec<ArchiveReceipt> {
        self.receipts
            .lock()
            .expect("documents mutex poisoned")
            .clone()
    }

    fn take_folder(&self, folder: &DocumentFolder) -> usize {
        let prefix = Self::prefix(folder);
        let mut files = self.files.lock().expect("documents mutex poisoned");
        let before = files.len();
        files.retain(|key, _| !key.starts_with(&prefix));
        before - files.len()
    }
}

impl DocumentStore for MemoryDocuments {
    fn exists(&self, key: &DocumentKey) -> Result<bool, DocumentError> {
        let path = format!("{}{}", Self::prefix(&key.folder), key.file_name());
        Ok(self
            .files
            .lock()
            .expect("documents mutex poisoned")
            .contains_key(&path))
    }

    fn write(&self, key: &DocumentKey, contents: &[u8]) -> Result<(), DocumentError> {
        let path = format!("{}{}", Self::prefix(&key.folder), key.file_name());
        self.files
            .lock()
            .expect("documents mutex poisoned")
            .insert(path, contents.to_vec());
        Ok(())
    }

    fn remove_all(&self, folder: &DocumentFolder) -> Result<usize, DocumentError> {
        Ok(self.take_folder(folder))
    }

    fn archive(&self, folder: &DocumentFolder) -> Result<ArchiveReceipt, DocumentError> {
        let moved = self.take_folder(folder);
        let mut receipts = self.receipts.lock().expect("documents mutex poisoned");
        let receipt = ArchiveReceipt {
            backup: (moved > 0).then(|| format!("BACKUP.{}", receipts.len() + 1)),
            moved,
        };
        receipts.push(receipt.clone());
        Ok(receipt)
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryAudit {
    records: Arc<Mutex<Vec<AuditRecord>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryAudit {
    pub(super) fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit mutex poisoned").clone()
    }

    pub(super) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

impl AuditSink for MemoryAudit {
    fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable("log server down".to_string()));
        }
        self.records
            .lock()
            .expect("audit mutex poisoned")
            .push(record);
        Ok(())
    }
}

/// Every call fails, as a database outage would.
pub(super) struct UnavailableRepository;

impl UnavailableRepository {
    fn offline<T>() -> Result<T, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

impl GradingRepository for UnavailableRepository {
    fn class(&self, _id: ClassId) -> Result<Option<ClassInfo>, RepositoryError> {
        Self::offline()
    }

    fn subjects(&self, _class: ClassId) -> Result<Vec<Subject>, RepositoryError> {
        Self::offline()
    }

    fn students(
        &self,
        _class: ClassId,
        _criterion: &RosterCriterion,
    ) -> Result<Vec<Student>, RepositoryError> {
        Self::offline()
    }

    fn teachers(&self, _class: ClassId) -> Result<Vec<TeacherId>, RepositoryError> {
        Self::offline()
    }

    fn absence_hours(&self, _query: &AbsenceQuery) -> Result<u32, RepositoryError> {
        Self::offline()
    }

    fn session(
        &self,
        _class: ClassId,
        _period: PeriodType,
    ) -> Result<Option<GradingSession>, RepositoryError> {
        Self::offline()
    }

    fn create_session(
        &self,
        _class: ClassId,
        _period: PeriodType,
    ) -> Result<GradingSession, RepositoryError> {
        Self::offline()
    }

    fn proposals(
        &self,
        _class: ClassId,
        _period: PeriodType,
    ) -> Result<Vec<VoteProposal>, RepositoryError> {
        Self::offline()
    }

    fn save_proposal(&self, _proposal: VoteProposal) -> Result<(), RepositoryError> {
        Self::offline()
    }

    fn final_votes(&self, _session: SessionId) -> Result<Vec<FinalVote>, RepositoryError> {
        Self::offline()
    }

    fn outcomes(&self, _session: SessionId) -> Result<Vec<Outcome>, RepositoryError> {
        Self::offline()
    }

    fn commit(&self, _changes: SessionChanges) -> Result<(), RepositoryError> {
        Self::offline()
    }
}

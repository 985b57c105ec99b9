use chrono::{NaiveDate, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use scrutinio::workflows::scrutinio::{
    AbsenceQuery, ArchiveReceipt, AuditError, AuditRecord, AuditSink, ClassId, ClassInfo,
    DocumentError, DocumentFolder, DocumentKey, DocumentStore, FinalVote, GradingRepository,
    GradingSession, GradingSessionService, Outcome, PeriodType, RepositoryError, RosterCriterion,
    SessionChanges, SessionId, Student, StudentId, Subject, SubjectId, SubjectKind, TeacherId,
    VoteProposal,
};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

pub(crate) type ApiGradingService =
    GradingSessionService<InMemoryGradingRepository, FsDocumentStore, InMemoryAuditSink>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default)]
struct GradingStore {
    classes: HashMap<ClassId, ClassInfo>,
    subjects: HashMap<ClassId, Vec<Subject>>,
    students: HashMap<ClassId, Vec<Student>>,
    teachers: HashMap<ClassId, Vec<TeacherId>>,
    absences: HashMap<(StudentId, SubjectId), u32>,
    sessions: HashMap<(ClassId, PeriodType), GradingSession>,
    proposals: Vec<VoteProposal>,
    votes: BTreeMap<(SessionId, StudentId, SubjectId), FinalVote>,
    outcomes: BTreeMap<(SessionId, StudentId), Outcome>,
}

/// Class roster, register data and session state kept in process memory.
#[derive(Default, Clone)]
pub(crate) struct InMemoryGradingRepository {
    store: Arc<Mutex<GradingStore>>,
}

impl InMemoryGradingRepository {
    fn lock(&self) -> Result<MutexGuard<'_, GradingStore>, RepositoryError> {
        self.store
            .lock()
            .map_err(|_| RepositoryError::Unavailable("repository mutex poisoned".to_string()))
    }

    pub(crate) fn add_class(
        &self,
        class: ClassInfo,
        subjects: Vec<Subject>,
        students: Vec<Student>,
        teachers: Vec<TeacherId>,
    ) -> Result<(), RepositoryError> {
        let mut store = self.lock()?;
        if store.classes.contains_key(&class.id) {
            return Err(RepositoryError::Conflict);
        }
        store.subjects.insert(class.id, subjects);
        store.students.insert(class.id, students);
        store.teachers.insert(class.id, teachers);
        store.classes.insert(class.id, class);
        Ok(())
    }

    pub(crate) fn record_absences(
        &self,
        student: StudentId,
        subject: SubjectId,
        hours: u32,
    ) -> Result<(), RepositoryError> {
        self.lock()?.absences.insert((student, subject), hours);
        Ok(())
    }
}

impl GradingRepository for InMemoryGradingRepository {
    fn class(&self, id: ClassId) -> Result<Option<ClassInfo>, RepositoryError> {
        Ok(self.lock()?.classes.get(&id).cloned())
    }

    fn subjects(&self, class: ClassId) -> Result<Vec<Subject>, RepositoryError> {
        Ok(self.lock()?.subjects.get(&class).cloned().unwrap_or_default())
    }

    fn students(
        &self,
        class: ClassId,
        criterion: &RosterCriterion,
    ) -> Result<Vec<Student>, RepositoryError> {
        let store = self.lock()?;
        let enrolled = store.students.get(&class).cloned().unwrap_or_default();
        Ok(match criterion {
            RosterCriterion::EnrolledOn(_) => enrolled,
            RosterCriterion::Listed(ids) => enrolled
                .into_iter()
                .filter(|student| ids.contains(&student.id))
                .collect(),
        })
    }

    fn teachers(&self, class: ClassId) -> Result<Vec<TeacherId>, RepositoryError> {
        Ok(self.lock()?.teachers.get(&class).cloned().unwrap_or_default())
    }

    fn absence_hours(&self, query: &AbsenceQuery) -> Result<u32, RepositoryError> {
        Ok(self
            .lock()?
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
        Ok(self.lock()?.sessions.get(&(class, period)).cloned())
    }

    fn create_session(
        &self,
        class: ClassId,
        period: PeriodType,
    ) -> Result<GradingSession, RepositoryError> {
        let mut store = self.lock()?;
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
            .lock()?
            .proposals
            .iter()
            .filter(|proposal| proposal.class_id == class && proposal.period == period)
            .cloned()
            .collect())
    }

    fn save_proposal(&self, proposal: VoteProposal) -> Result<(), RepositoryError> {
        let mut store = self.lock()?;
        let key = |candidate: &VoteProposal| {
            (
                candidate.class_id,
                candidate.period,
                candidate.student,
                candidate.subject,
                candidate.teacher,
            )
        };
        let wanted = key(&proposal);
        match store
            .proposals
            .iter_mut()
            .find(|stored| key(stored) == wanted)
        {
            Some(stored) => *stored = proposal,
            None => store.proposals.push(proposal),
        }
        Ok(())
    }

    fn final_votes(&self, session: SessionId) -> Result<Vec<FinalVote>, RepositoryError> {
        Ok(self
            .lock()?
            .votes
            .range((session, StudentId(0), SubjectId(0))..)
            .take_while(|((id, _, _), _)| *id == session)
            .map(|(_, vote)| vote.clone())
            .collect())
    }

    fn outcomes(&self, session: SessionId) -> Result<Vec<Outcome>, RepositoryError> {
        Ok(self
            .lock()?
            .outcomes
            .range((session, StudentId(0))..)
            .take_while(|((id, _), _)| *id == session)
            .map(|(_, outcome)| outcome.clone())
            .collect())
    }

    fn commit(&self, changes: SessionChanges) -> Result<(), RepositoryError> {
        let mut store = self.lock()?;
        let key = (changes.session.class_id, changes.session.period);
        if !store.sessions.contains_key(&key) {
            return Err(RepositoryError::NotFound);
        }

        let id = changes.session.id;
        for vote in changes.votes {
            store.votes.insert((id, vote.student, vote.subject), vote);
        }
        for outcome in changes.outcomes {
            store.outcomes.insert((id, outcome.student), outcome);
        }
        for student in changes.removed_outcomes {
            store.outcomes.remove(&(id, student));
        }
        if let Some(students) = store.students.get_mut(&changes.session.class_id) {
            for (student_id, credits) in changes.student_credits {
                if let Some(student) = students.iter_mut().find(|student| student.id == student_id)
                {
                    student.previous_credits = credits;
                }
            }
        }
        store.sessions.insert(key, changes.session);
        Ok(())
    }
}

/// Keeps the audit trail in memory and mirrors every entry to the log.
#[derive(Default, Clone)]
pub(crate) struct InMemoryAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl AuditSink for InMemoryAuditSink {
    fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        info!(
            actor = %record.actor,
            category = %record.category,
            action = %record.action,
            context = ?record.context,
            "audit entry recorded"
        );
        let mut guard = self
            .records
            .lock()
            .map_err(|_| AuditError::Unavailable("audit mutex poisoned".to_string()))?;
        guard.push(record);
        Ok(())
    }
}

impl InMemoryAuditSink {
    pub(crate) fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

/// Generated documents under `<root>/<period code>/<class label>/`.
#[derive(Debug, Clone)]
pub(crate) struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn folder_path(&self, folder: &DocumentFolder) -> PathBuf {
        self.root.join(folder.relative_path())
    }

    fn document_path(&self, key: &DocumentKey) -> PathBuf {
        self.folder_path(&key.folder).join(key.file_name())
    }

    fn documents_in(dir: &Path) -> Result<Vec<PathBuf>, DocumentError> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// `BACKUP.<timestamp>`, suffixed with `.1`, `.2`... when already taken.
    fn backup_dir(dir: &Path) -> PathBuf {
        let base = format!("BACKUP.{}", Utc::now().format("%Y%m%d%H%M%S"));
        let mut candidate = dir.join(&base);
        let mut suffix = 1;
        while candidate.exists() {
            candidate = dir.join(format!("{base}.{suffix}"));
            suffix += 1;
        }
        candidate
    }
}

impl DocumentStore for FsDocumentStore {
    fn exists(&self, key: &DocumentKey) -> Result<bool, DocumentError> {
        Ok(self.document_path(key).is_file())
    }

    fn write(&self, key: &DocumentKey, contents: &[u8]) -> Result<(), DocumentError> {
        let path = self.document_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    fn remove_all(&self, folder: &DocumentFolder) -> Result<usize, DocumentError> {
        let files = Self::documents_in(&self.folder_path(folder))?;
        for file in &files {
            fs::remove_file(file)?;
        }
        Ok(files.len())
    }

    fn archive(&self, folder: &DocumentFolder) -> Result<ArchiveReceipt, DocumentError> {
        let dir = self.folder_path(folder);
        let files = Self::documents_in(&dir)?;
        if files.is_empty() {
            return Ok(ArchiveReceipt {
                backup: None,
                moved: 0,
            });
        }

        let backup = Self::backup_dir(&dir);
        fs::create_dir_all(&backup)?;
        for file in &files {
            if let Some(name) = file.file_name() {
                fs::rename(file, backup.join(name))?;
            }
        }
        Ok(ArchiveReceipt {
            backup: backup
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            moved: files.len(),
        })
    }
}

pub(crate) const DEMO_CLASS: ClassId = ClassId(1);

/// Third-year class used by the service until a register integration exists.
pub(crate) fn seed_demo_class(repository: &InMemoryGradingRepository) -> Result<(), RepositoryError> {
    let subject = |id: u32, name: &str, kind: SubjectKind| Subject {
        id: SubjectId(id),
        name: name.to_string(),
        kind,
        counts_toward_average: kind != SubjectKind::Religion,
    };
    let student = |id: u32, name: &str, religion_opt_in: bool| Student {
        id: StudentId(id),
        name: name.to_string(),
        religion_opt_in,
        abroad: false,
        previous_credits: Default::default(),
        extra_absence_hours: 0,
    };

    repository.add_class(
        ClassInfo {
            id: DEMO_CLASS,
            year: 3,
            section: "A".to_string(),
            weekly_hours: 30,
        },
        vec![
            subject(1, "Italiano", SubjectKind::Standard),
            subject(2, "Matematica", SubjectKind::Standard),
            subject(3, "Religione", SubjectKind::Religion),
            subject(4, "Educazione civica", SubjectKind::CivicEducation),
            subject(5, "Condotta", SubjectKind::Conduct),
        ],
        vec![
            student(101, "Anna Bianchi", true),
            student(102, "Luca Rossi", false),
            student(103, "Sara Verdi", true),
        ],
        vec![TeacherId(201), TeacherId(202), TeacherId(203)],
    )?;
    for (student, subject, hours) in [(101, 1, 6), (102, 2, 14), (103, 4, 3)] {
        repository.record_absences(StudentId(student), SubjectId(subject), hours)?;
    }
    Ok(())
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

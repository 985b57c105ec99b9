use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::domain::{
    ClassId, ClassInfo, GradingScales, PeriodType, PreviousCredits, SessionId, SessionState,
    Student, StudentId, Subject, SubjectId, TeacherId,
};
use super::outcomes::Outcome;
use super::votes::FinalVote;

/// One grading session per (class, period).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingSession {
    pub id: SessionId,
    pub class_id: ClassId,
    pub period: PeriodType,
    pub state: SessionState,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub roster: RosterSnapshot,
    /// Scales frozen when the first working state is entered.
    #[serde(default)]
    pub scales: Option<GradingScales>,
    #[serde(default)]
    pub presence: Option<PresenceRoll>,
    #[serde(default)]
    pub eligibility: Option<EligibilityPartition>,
    #[serde(default)]
    pub minutes: MinutesState,
    #[serde(default)]
    pub credit_adjustment: Option<CreditAdjustment>,
    /// Set by the register synchronisation job; forbids reopening.
    #[serde(default)]
    pub sync_locked: bool,
}

impl GradingSession {
    pub fn new(id: SessionId, class_id: ClassId, period: PeriodType) -> Self {
        Self {
            id,
            class_id,
            period,
            state: SessionState::NotStarted,
            date: None,
            start_time: None,
            end_time: None,
            roster: RosterSnapshot::default(),
            scales: None,
            presence: None,
            eligibility: None,
            minutes: MinutesState::default(),
            credit_adjustment: None,
            sync_locked: false,
        }
    }

    pub fn is_editable(&self) -> bool {
        matches!(self.state, SessionState::Stage(_))
    }
}

/// Students subject to the session, frozen when the first working state is entered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RosterSnapshot {
    students: Vec<StudentId>,
}

impl RosterSnapshot {
    pub fn new(students: impl IntoIterator<Item = StudentId>) -> Self {
        let unique: BTreeSet<StudentId> = students.into_iter().collect();
        Self {
            students: unique.into_iter().collect(),
        }
    }

    pub fn students(&self) -> &[StudentId] {
        &self.students
    }

    pub fn contains(&self, student: StudentId) -> bool {
        self.students.binary_search(&student).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRoll {
    /// The principal chairs the session; otherwise `chair` names the delegate.
    pub principal_presides: bool,
    pub chair: Option<TeacherId>,
    pub secretary: Option<TeacherId>,
    pub attendance: Vec<TeacherAttendance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeacherAttendance {
    pub teacher: TeacherId,
    pub present: bool,
    #[serde(default)]
    pub substitute: Option<Substitute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitute {
    pub name: String,
    #[serde(default)]
    pub sex: Option<char>,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub delegation_date: Option<NaiveDate>,
}

impl Substitute {
    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty()
            && !self.protocol.trim().is_empty()
            && self.delegation_date.is_some()
    }
}

/// Roster partition frozen by the attendance check of the final session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityPartition {
    pub eligible: Vec<StudentId>,
    pub waived: Vec<WaivedStudent>,
    pub ineligible: Vec<StudentId>,
    pub abroad: Vec<StudentId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaivedStudent {
    pub student: StudentId,
    pub justification: String,
}

impl EligibilityPartition {
    /// Students who go on to be assessed: eligible plus waived.
    pub fn assessed(&self) -> Vec<StudentId> {
        let mut students: BTreeSet<StudentId> = self.eligible.iter().copied().collect();
        students.extend(self.waived.iter().map(|waived| waived.student));
        students.into_iter().collect()
    }

    pub fn is_waived(&self, student: StudentId) -> bool {
        self.waived.iter().any(|waived| waived.student == student)
    }
}

/// Validation flags and argument texts of the session minutes, keyed by step index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinutesState {
    #[serde(default)]
    pub steps: BTreeMap<u8, bool>,
    #[serde(default)]
    pub arguments: BTreeMap<u8, String>,
    #[serde(default)]
    pub number: Option<u32>,
}

impl MinutesState {
    pub fn is_open(&self, step: u8) -> bool {
        self.steps.contains_key(&step)
    }

    pub fn is_validated(&self, step: u8) -> bool {
        self.steps.get(&step).copied().unwrap_or(false)
    }
}

/// Credits carried over from earlier years, as corrected during the final session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAdjustment {
    pub entries: Vec<CreditAdjustmentEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAdjustmentEntry {
    pub student: StudentId,
    #[serde(default)]
    pub year3: Option<u8>,
    #[serde(default)]
    pub year4: Option<u8>,
    #[serde(default)]
    pub justification: String,
}

/// Everything one transition or edit writes back, committed as a single unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionChanges {
    pub session: GradingSession,
    pub votes: Vec<FinalVote>,
    pub outcomes: Vec<Outcome>,
    pub removed_outcomes: Vec<StudentId>,
    pub student_credits: Vec<(StudentId, PreviousCredits)>,
}

impl SessionChanges {
    pub fn session_only(session: GradingSession) -> Self {
        Self {
            session,
            votes: Vec::new(),
            outcomes: Vec::new(),
            removed_outcomes: Vec::new(),
            student_credits: Vec::new(),
        }
    }
}

/// Loaded view of a session that transition handlers read and mutate in memory.
#[derive(Debug, Clone)]
pub struct SessionWorkspace {
    pub class: ClassInfo,
    pub session: GradingSession,
    pub subjects: Vec<Subject>,
    pub students: BTreeMap<StudentId, Student>,
    pub votes: BTreeMap<(StudentId, SubjectId), FinalVote>,
    pub outcomes: BTreeMap<StudentId, Outcome>,
    pub removed_outcomes: BTreeSet<StudentId>,
    pub credit_updates: BTreeMap<StudentId, PreviousCredits>,
}

impl SessionWorkspace {
    pub fn new(
        class: ClassInfo,
        session: GradingSession,
        subjects: Vec<Subject>,
        students: Vec<Student>,
        votes: Vec<FinalVote>,
        outcomes: Vec<Outcome>,
    ) -> Self {
        Self {
            class,
            session,
            subjects,
            students: students
                .into_iter()
                .map(|student| (student.id, student))
                .collect(),
            votes: votes
                .into_iter()
                .map(|vote| ((vote.student, vote.subject), vote))
                .collect(),
            outcomes: outcomes
                .into_iter()
                .map(|outcome| (outcome.student, outcome))
                .collect(),
            removed_outcomes: BTreeSet::new(),
            credit_updates: BTreeMap::new(),
        }
    }

    /// Authoritative roster for the current stage.
    ///
    /// In the final session the frozen eligibility partition replaces the snapshot.
    pub fn active_roster(&self) -> Vec<StudentId> {
        match (&self.session.eligibility, self.session.period) {
            (Some(partition), PeriodType::Final) => partition.assessed(),
            _ if self.session.roster.is_empty() => self.students.keys().copied().collect(),
            _ => self.session.roster.students().to_vec(),
        }
    }

    pub fn active_students(&self) -> Vec<&Student> {
        self.active_roster()
            .into_iter()
            .filter_map(|id| self.students.get(&id))
            .collect()
    }

    pub fn scales(&self) -> GradingScales {
        self.session.scales.unwrap_or_default()
    }

    pub fn vote(&self, student: StudentId, subject: SubjectId) -> Option<&FinalVote> {
        self.votes.get(&(student, subject))
    }

    pub fn student_name(&self, student: StudentId) -> String {
        self.students
            .get(&student)
            .map(|record| record.name.clone())
            .unwrap_or_else(|| format!("student {student}"))
    }

    pub fn subject_name(&self, subject: SubjectId) -> String {
        self.subjects
            .iter()
            .find(|record| record.id == subject)
            .map(|record| record.name.clone())
            .unwrap_or_else(|| format!("subject {subject}"))
    }

    pub fn insert_outcome(&mut self, outcome: Outcome) {
        self.removed_outcomes.remove(&outcome.student);
        self.outcomes.insert(outcome.student, outcome);
    }

    pub fn remove_outcome(&mut self, student: StudentId) {
        if self.outcomes.remove(&student).is_some() {
            self.removed_outcomes.insert(student);
        }
    }

    pub fn into_changes(self) -> SessionChanges {
        SessionChanges {
            session: self.session,
            votes: self.votes.into_values().collect(),
            outcomes: self.outcomes.into_values().collect(),
            removed_outcomes: self.removed_outcomes.into_iter().collect(),
            student_credits: self.credit_updates.into_iter().collect(),
        }
    }
}
